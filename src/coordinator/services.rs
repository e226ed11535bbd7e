//! `Services` is what a transition sees of the coordinator: the simulation
//! clock, and the executive operations that mutate the model graph at
//! runtime.  Executive calls are recorded here and applied by the
//! coordinator as soon as the phase function returns; deletions are
//! additionally staged until the next tick boundary.

use crate::graph::{AtomicModel, Connector};
use crate::project::{Condition, DynamicsSpec, Observable};
use crate::time::Time;

#[derive(Debug, Clone)]
pub(crate) enum ExecutiveRequest {
    CreateModel {
        model: AtomicModel,
        dynamics: String,
        conditions: Vec<String>,
        observable: Option<String>,
    },
    DelModel {
        name: String,
    },
    AddConnector {
        connector: Connector,
    },
    AddDynamics {
        spec: DynamicsSpec,
    },
    AddCondition {
        condition: Condition,
    },
    AddObservable {
        observable: Observable,
    },
    AddObservableToView {
        model: String,
        port_name: String,
        view: String,
    },
}

/// The per-transition service handle threaded through every phase call.
#[derive(Debug)]
pub struct Services {
    global_time: Time,
    requests: Vec<ExecutiveRequest>,
}

impl Services {
    pub(crate) fn new(global_time: Time) -> Self {
        Self {
            global_time,
            requests: Vec::new(),
        }
    }

    /// The current simulated time.
    pub fn global_time(&self) -> Time {
        self.global_time
    }

    /// Requests the instantiation of a new atomic model with the named
    /// dynamics, conditions and observable bundle.
    pub fn create_model(
        &mut self,
        model: AtomicModel,
        dynamics: &str,
        conditions: &[&str],
        observable: Option<&str>,
    ) {
        self.requests.push(ExecutiveRequest::CreateModel {
            model,
            dynamics: dynamics.to_string(),
            conditions: conditions.iter().map(|name| name.to_string()).collect(),
            observable: observable.map(|name| name.to_string()),
        });
    }

    /// Requests the deletion of a model.  The simulator disappears at the
    /// next tick boundary; events already produced this tick are still
    /// delivered.  Requesting one's own deletion is legal.
    pub fn del_model(&mut self, name: &str) {
        self.requests.push(ExecutiveRequest::DelModel {
            name: name.to_string(),
        });
    }

    /// Requests a new connector in the routing graph.
    pub fn add_connector(&mut self, connector: Connector) {
        self.requests
            .push(ExecutiveRequest::AddConnector { connector });
    }

    /// Adds a dynamics descriptor to the permanent catalog.
    pub fn add_permanent_dynamics(&mut self, spec: DynamicsSpec) {
        self.requests.push(ExecutiveRequest::AddDynamics { spec });
    }

    /// Adds a condition to the permanent catalog.
    pub fn add_permanent_condition(&mut self, condition: Condition) {
        self.requests
            .push(ExecutiveRequest::AddCondition { condition });
    }

    /// Adds an observable bundle to the permanent catalog.
    pub fn add_permanent_observable(&mut self, observable: Observable) {
        self.requests
            .push(ExecutiveRequest::AddObservable { observable });
    }

    /// Attaches one model port to a view; for a timed view this also
    /// schedules an observation at the current time.
    pub fn add_observable_to_view(&mut self, model: &str, port_name: &str, view: &str) {
        self.requests.push(ExecutiveRequest::AddObservableToView {
            model: model.to_string(),
            port_name: port_name.to_string(),
            view: view.to_string(),
        });
    }

    pub(crate) fn take_requests(&mut self) -> Vec<ExecutiveRequest> {
        std::mem::take(&mut self.requests)
    }
}
