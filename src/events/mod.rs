//! Events are the mechanism of information exchange in the kernel.  Five
//! kinds exist: internal events a simulator schedules for itself, external
//! events routed between models, request events demanding a synchronous
//! response, observation events querying state for a view, and response
//! events answering a request.  Within one tick, a simulator's coincident
//! events are grouped into an `EventBag`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

pub mod table;

pub use self::table::EventTable;

/// Opaque handle for a simulator.  Events and view subscriptions reference
/// simulators through this handle, never through an owning pointer; the
/// coordinator is the sole owner of the simulators themselves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimulatorId(usize);

impl SimulatorId {
    pub(crate) fn new(raw: usize) -> Self {
        SimulatorId(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

/// The attribute map carried as payload by external and request events.
pub type Attributes = BTreeMap<String, Value>;

/// A message produced by a dynamics on one of its output ports, before the
/// coordinator routes it through the graph.  Marked as a request when the
/// producer demands a synchronous response from each destination.
#[derive(Debug, Clone)]
pub struct OutputMessage {
    port_name: String,
    attributes: Attributes,
    request: bool,
}

impl OutputMessage {
    pub fn new(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            attributes: Attributes::new(),
            request: false,
        }
    }

    pub fn request(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            attributes: Attributes::new(),
            request: true,
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn is_request(&self) -> bool {
        self.request
    }

    pub(crate) fn into_attributes(self) -> Attributes {
        self.attributes
    }
}

/// The one self-scheduled event a simulator has in flight at a time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InternalEvent {
    time: Time,
    target: SimulatorId,
}

impl InternalEvent {
    pub fn new(time: Time, target: SimulatorId) -> Self {
        Self { time, target }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn target(&self) -> SimulatorId {
        self.target
    }
}

/// An event routed from a source model's output port to a destination
/// model's input port, carrying a typed payload.
#[derive(Debug, Clone)]
pub struct ExternalEvent {
    time: Time,
    source: SimulatorId,
    source_port: String,
    target: SimulatorId,
    target_port: String,
    attributes: Attributes,
}

impl ExternalEvent {
    pub fn new(
        time: Time,
        source: SimulatorId,
        source_port: String,
        target: SimulatorId,
        target_port: String,
        attributes: Attributes,
    ) -> Self {
        Self {
            time,
            source,
            source_port,
            target,
            target_port,
            attributes,
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn source(&self) -> SimulatorId {
        self.source
    }

    pub fn source_port(&self) -> &str {
        &self.source_port
    }

    pub fn target(&self) -> SimulatorId {
        self.target
    }

    pub fn target_port(&self) -> &str {
        &self.target_port
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Whether this event arrived on the given input port.
    pub fn on_port(&self, port_name: &str) -> bool {
        self.target_port == port_name
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute(&self, name: &str) -> Result<&Value, SimulationError> {
        self.attributes
            .get(name)
            .ok_or_else(|| SimulationError::AttributeNotFound {
                name: name.to_string(),
            })
    }

    pub fn string_attribute(&self, name: &str) -> Result<&str, SimulationError> {
        self.attribute(name)?.as_string()
    }

    pub fn double_attribute(&self, name: &str) -> Result<f64, SimulationError> {
        self.attribute(name)?.as_double()
    }

    pub fn int_attribute(&self, name: &str) -> Result<i64, SimulationError> {
        self.attribute(name)?.as_int()
    }

    pub fn bool_attribute(&self, name: &str) -> Result<bool, SimulationError> {
        self.attribute(name)?.as_bool()
    }
}

/// An external event that demands a synchronous response from its target
/// at the same simulated time.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    event: ExternalEvent,
}

impl RequestEvent {
    pub fn new(event: ExternalEvent) -> Self {
        Self { event }
    }

    pub fn event(&self) -> &ExternalEvent {
        &self.event
    }

    pub fn time(&self) -> Time {
        self.event.time()
    }

    pub fn target(&self) -> SimulatorId {
        self.event.target()
    }

    pub fn string_attribute(&self, name: &str) -> Result<&str, SimulationError> {
        self.event.string_attribute(name)
    }
}

/// A state query against one simulator port on behalf of a view.  Reads
/// post-transition state and never mutates.
#[derive(Debug, Clone)]
pub struct ObservationEvent {
    time: Time,
    target: SimulatorId,
    view_name: String,
    port_name: String,
}

impl ObservationEvent {
    pub fn new(time: Time, target: SimulatorId, view_name: String, port_name: String) -> Self {
        Self {
            time,
            target,
            view_name,
            port_name,
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn target(&self) -> SimulatorId {
        self.target
    }

    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// The closed sum of event kinds held by the event table.
#[derive(Debug, Clone)]
pub enum Event {
    Internal(InternalEvent),
    External(ExternalEvent),
    Request(RequestEvent),
    Observation(ObservationEvent),
    Response(ExternalEvent),
}

impl Event {
    pub fn time(&self) -> Time {
        match self {
            Event::Internal(event) => event.time(),
            Event::External(event) => event.time(),
            Event::Request(event) => event.time(),
            Event::Observation(event) => event.time(),
            Event::Response(event) => event.time(),
        }
    }

    /// Whether this event is addressed to the given simulator.  Used when
    /// purging a deleted model's events; events it already produced for
    /// other models stay deliverable, their source id is provenance only.
    pub fn references(&self, simulator: SimulatorId) -> bool {
        match self {
            Event::Internal(event) => event.target() == simulator,
            Event::External(event) | Event::Response(event) => event.target() == simulator,
            Event::Request(event) => event.event().target() == simulator,
            Event::Observation(event) => event.target() == simulator,
        }
    }
}

/// The per-simulator grouping of coincident events within one tick: at
/// most one internal event, any number of externals (responses included),
/// any number of requests.  A bag is drained exactly once.
#[derive(Debug, Default)]
pub struct EventBag {
    internal: Option<InternalEvent>,
    externals: Vec<ExternalEvent>,
    requests: Vec<RequestEvent>,
}

impl EventBag {
    pub fn is_empty(&self) -> bool {
        self.internal.is_none() && self.externals.is_empty() && self.requests.is_empty()
    }

    pub fn has_internal(&self) -> bool {
        self.internal.is_some()
    }

    pub fn has_externals(&self) -> bool {
        !self.externals.is_empty()
    }

    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    pub fn externals(&self) -> &[ExternalEvent] {
        &self.externals
    }

    pub fn take_internal(&mut self) -> Option<InternalEvent> {
        self.internal.take()
    }

    pub fn take_externals(&mut self) -> Vec<ExternalEvent> {
        std::mem::take(&mut self.externals)
    }

    pub fn take_requests(&mut self) -> Vec<RequestEvent> {
        std::mem::take(&mut self.requests)
    }

    pub(crate) fn drain(&mut self) {
        self.internal = None;
        self.externals.clear();
        self.requests.clear();
    }

    pub(crate) fn set_internal(&mut self, event: InternalEvent) {
        self.internal = Some(event);
    }

    pub(crate) fn push_external(&mut self, event: ExternalEvent) {
        self.externals.push(event);
    }

    pub(crate) fn push_request(&mut self, event: RequestEvent) {
        self.requests.push(event);
    }
}

/// Everything the event table yields for one tick: the tick time, the
/// per-simulator bags, and the observation events held aside until all
/// transitions at this time have completed.
#[derive(Debug, Default)]
pub struct CompleteEventBag {
    time: Time,
    bags: BTreeMap<SimulatorId, EventBag>,
    observations: Vec<ObservationEvent>,
}

impl CompleteEventBag {
    pub(crate) fn new(time: Time) -> Self {
        Self {
            time,
            bags: BTreeMap::new(),
            observations: Vec::new(),
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty() && self.observations.is_empty()
    }

    pub fn bag_ids(&self) -> Vec<SimulatorId> {
        self.bags.keys().copied().collect()
    }

    pub fn bag_mut(&mut self, simulator: SimulatorId) -> &mut EventBag {
        self.bags.entry(simulator).or_default()
    }

    pub fn observations(&self) -> &[ObservationEvent] {
        &self.observations
    }

    pub fn take_observations(&mut self) -> Vec<ObservationEvent> {
        std::mem::take(&mut self.observations)
    }

    pub(crate) fn push_observation(&mut self, event: ObservationEvent) {
        self.observations.push(event);
    }
}
