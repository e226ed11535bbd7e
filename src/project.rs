//! The in-memory project description.  The kernel consumes this tree only;
//! how it is produced (an XML loader, a YAML file, test code building it
//! by hand) is a front-end concern.  The sections mirror the experiment
//! file: dynamics, conditions, observables, outputs, views, the model
//! list, connectors, and the experiment header.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dynamics::InitEventList;
use crate::graph::{AtomicModel, Connector};
use crate::utils::errors::SimulationError;
use crate::values::Value;

/// Binds a dynamics name to the constructor library that builds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicsSpec {
    name: String,
    library: String,
}

impl DynamicsSpec {
    pub fn new(name: &str, library: &str) -> Self {
        Self {
            name: name.to_string(),
            library: library.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &str {
        &self.library
    }
}

/// A named bundle of initialization values, one list per port.  The merge
/// rule takes the first value of each port; conditions listed later on a
/// model override earlier ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    name: String,
    #[serde(default)]
    ports: BTreeMap<String, Vec<Value>>,
}

impl Condition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_value_to_port(&mut self, port_name: &str, value: Value) {
        self.ports
            .entry(port_name.to_string())
            .or_default()
            .push(value);
    }

    pub fn with_value(mut self, port_name: &str, value: Value) -> Self {
        self.add_value_to_port(port_name, value);
        self
    }

    /// The first value of every port, the slice of this condition used
    /// when instantiating a dynamics.
    pub fn first_values(&self) -> InitEventList {
        let mut list = InitEventList::default();
        for (port_name, values) in &self.ports {
            if let Some(first) = values.first() {
                list.insert(port_name, first.clone());
            }
        }
        list
    }
}

/// Wires a model's observable ports to the views that watch them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observable {
    name: String,
    #[serde(default)]
    ports: BTreeMap<String, Vec<String>>,
}

impl Observable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_port(&mut self, port_name: &str, view: &str) {
        self.ports
            .entry(port_name.to_string())
            .or_default()
            .push(view.to_string());
    }

    pub fn with_port(mut self, port_name: &str, view: &str) -> Self {
        self.add_port(port_name, view);
        self
    }

    pub fn ports(&self) -> &BTreeMap<String, Vec<String>> {
        &self.ports
    }
}

/// Where a view's records go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    /// JSON-lines file on the local filesystem.
    Local,
    /// In-memory buffer, the test-harness writer.
    Memory,
}

/// One stream-writer descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    name: String,
    format: OutputFormat,
    #[serde(default)]
    location: String,
    #[serde(default)]
    plugin: String,
    #[serde(default)]
    data: Value,
}

impl Output {
    pub fn new(name: &str, format: OutputFormat) -> Self {
        Self {
            name: name.to_string(),
            format,
            location: String::new(),
            plugin: String::new(),
            data: Value::Null,
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// The observation discipline of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewType {
    Timed,
    Event,
    Finish,
}

/// One view descriptor: its discipline, polling step (timed views), the
/// optional first-sample time, and the output it writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    name: String,
    view_type: ViewType,
    #[serde(default)]
    timestep: f64,
    #[serde(default)]
    begin: Option<f64>,
    output: String,
}

impl ViewSpec {
    pub fn timed(name: &str, timestep: f64, output: &str) -> Self {
        Self {
            name: name.to_string(),
            view_type: ViewType::Timed,
            timestep,
            begin: None,
            output: output.to_string(),
        }
    }

    pub fn event(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            view_type: ViewType::Event,
            timestep: 0.0,
            begin: None,
            output: output.to_string(),
        }
    }

    pub fn finish(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            view_type: ViewType::Finish,
            timestep: 0.0,
            begin: None,
            output: output.to_string(),
        }
    }

    pub fn with_begin(mut self, begin: f64) -> Self {
        self.begin = Some(begin);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view_type(&self) -> ViewType {
        self.view_type
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn begin(&self) -> Option<f64> {
        self.begin
    }

    pub fn output(&self) -> &str {
        &self.output
    }
}

/// One model instantiation: the atomic identity plus the dynamics name,
/// the conditions merged into its init list, and its observable bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomicSpec {
    model: AtomicModel,
    dynamics: String,
    #[serde(default)]
    conditions: Vec<String>,
    #[serde(default)]
    observables: Option<String>,
}

impl AtomicSpec {
    pub fn new(model: AtomicModel, dynamics: &str) -> Self {
        Self {
            model,
            dynamics: dynamics.to_string(),
            conditions: Vec::new(),
            observables: None,
        }
    }

    pub fn with_conditions(mut self, conditions: &[&str]) -> Self {
        self.conditions = conditions.iter().map(|name| name.to_string()).collect();
        self
    }

    pub fn with_observables(mut self, observables: &str) -> Self {
        self.observables = Some(observables.to_string());
        self
    }

    pub fn model(&self) -> &AtomicModel {
        &self.model
    }

    pub fn dynamics(&self) -> &str {
        &self.dynamics
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn observables(&self) -> Option<&str> {
        self.observables.as_deref()
    }
}

/// The experiment header: run name, begin time, horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    name: String,
    #[serde(default)]
    begin: f64,
    duration: f64,
}

impl Experiment {
    pub fn new(name: &str, begin: f64, duration: f64) -> Self {
        Self {
            name: name.to_string(),
            begin,
            duration,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn begin(&self) -> f64 {
        self.begin
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }
}

/// The whole project description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    experiment: Experiment,
    #[serde(default)]
    dynamics: Vec<DynamicsSpec>,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    observables: Vec<Observable>,
    #[serde(default)]
    outputs: Vec<Output>,
    #[serde(default)]
    views: Vec<ViewSpec>,
    #[serde(default)]
    model: Vec<AtomicSpec>,
    #[serde(default)]
    connectors: Vec<Connector>,
}

impl Project {
    pub fn new(experiment: Experiment) -> Self {
        Self {
            experiment,
            dynamics: Vec::new(),
            conditions: Vec::new(),
            observables: Vec::new(),
            outputs: Vec::new(),
            views: Vec::new(),
            model: Vec::new(),
            connectors: Vec::new(),
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self, SimulationError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn add_dynamics(&mut self, spec: DynamicsSpec) {
        self.dynamics.push(spec);
    }

    pub fn add_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn add_observable(&mut self, observable: Observable) {
        self.observables.push(observable);
    }

    pub fn add_output(&mut self, output: Output) {
        self.outputs.push(output);
    }

    pub fn add_view(&mut self, view: ViewSpec) {
        self.views.push(view);
    }

    pub fn add_model(&mut self, spec: AtomicSpec) {
        self.model.push(spec);
    }

    pub fn add_connector(&mut self, connector: Connector) {
        self.connectors.push(connector);
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn dynamics(&self) -> &[DynamicsSpec] {
        &self.dynamics
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn observables(&self) -> &[Observable] {
        &self.observables
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn views(&self) -> &[ViewSpec] {
        &self.views
    }

    pub fn model(&self) -> &[AtomicSpec] {
        &self.model
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }
}
