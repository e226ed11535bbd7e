//! The `Dynamics` trait defines everything required for a user model to
//! operate within the discrete event simulation.  The DEVS formalism
//! requires `init`, `time_advance`, `output`, `internal_transition`,
//! `external_transition` and `confluent_transitions`; observation,
//! request handling and finalization have provided defaults.

use std::collections::BTreeMap;

use crate::coordinator::Services;
use crate::events::{ExternalEvent, ObservationEvent, OutputMessage, RequestEvent};
use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

/// The merged condition values handed to a dynamics constructor.
#[derive(Debug, Clone, Default)]
pub struct InitEventList {
    values: BTreeMap<String, Value>,
}

impl InitEventList {
    pub fn insert(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Value, SimulationError> {
        self.values
            .get(name)
            .ok_or_else(|| SimulationError::AttributeNotFound {
                name: name.to_string(),
            })
    }

    pub fn get_opt(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// The branch selected by the confluent rule when an internal and an
/// external event coincide on the same model: which class of transition
/// runs first.  Both still run within the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfluentOrder {
    Internal,
    External,
}

pub trait DynamicsClone {
    fn clone_box(&self) -> Box<dyn Dynamics>;
}

impl<T> DynamicsClone for T
where
    T: 'static + Dynamics + Clone,
{
    fn clone_box(&self) -> Box<dyn Dynamics> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Dynamics> {
    fn clone(&self) -> Box<dyn Dynamics> {
        self.clone_box()
    }
}

/// The contract every model implements.  `output` and `observation` take
/// `&self` so purity is enforced by the borrow checker; transitions
/// receive `Services` to read the clock and queue executive requests.
pub trait Dynamics: DynamicsClone {
    /// Returns the duration until the first internal event.
    fn init(&mut self, time: Time) -> Result<Time, SimulationError>;

    /// The duration until the next internal event, possibly `+inf`.
    /// Queried after every transition; must be deterministic and depend
    /// only on model state.
    fn time_advance(&self) -> Time;

    /// The emissions due at an internal event, computed before the
    /// internal transition at the same instant.  Must not mutate state.
    fn output(&self, _time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        Ok(Vec::new())
    }

    fn internal_transition(
        &mut self,
        time: Time,
        services: &mut Services,
    ) -> Result<(), SimulationError>;

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        time: Time,
        services: &mut Services,
    ) -> Result<(), SimulationError>;

    /// Selects which transition class runs first when internal and
    /// external events coincide.  Defaults to internal-first.
    fn confluent_transitions(&self, _time: Time, _events: &[ExternalEvent]) -> ConfluentOrder {
        ConfluentOrder::Internal
    }

    /// Answers a state query without mutating.  `None` reads as "nothing
    /// to report" and still produces a record with a null value.
    fn observation(&self, _event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        Ok(None)
    }

    /// Produces the response emissions for a request event.  Reads the
    /// state after any transition at this time.
    fn request(
        &self,
        _event: &RequestEvent,
        _time: Time,
    ) -> Result<Vec<OutputMessage>, SimulationError> {
        Ok(Vec::new())
    }

    /// Called once when the run terminates.
    fn finish(&mut self) {}
}
