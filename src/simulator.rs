//! The simulator is the runtime shell around one atomic model.  It owns
//! the dynamics instance, caches the times of the last and next
//! transitions, and converts contract breaches (a negative time advance,
//! a call on a cleared model) into protocol errors naming the model.

use tracing::trace;

use crate::dynamics::{ConfluentOrder, Dynamics};
use crate::events::{
    ExternalEvent, InternalEvent, ObservationEvent, OutputMessage, RequestEvent, SimulatorId,
};
use crate::graph::AtomicModel;
use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

/// The runtime wrapper for one atomic model.  Only the coordinator
/// mutates it; between ticks `next_time >= current_time` holds.
pub struct Simulator {
    id: SimulatorId,
    atomic: AtomicModel,
    dynamics: Option<Box<dyn Dynamics>>,
    last_time: Time,
    next_time: Time,
}

impl Simulator {
    pub fn new(id: SimulatorId, atomic: AtomicModel, dynamics: Box<dyn Dynamics>) -> Self {
        Self {
            id,
            atomic,
            dynamics: Some(dynamics),
            last_time: Time::ZERO,
            next_time: Time::INFINITY,
        }
    }

    pub fn id(&self) -> SimulatorId {
        self.id
    }

    pub fn atomic(&self) -> &AtomicModel {
        &self.atomic
    }

    pub fn name(&self) -> &str {
        self.atomic.name()
    }

    pub fn last_time(&self) -> Time {
        self.last_time
    }

    pub fn next_time(&self) -> Time {
        self.next_time
    }

    pub fn is_cleared(&self) -> bool {
        self.dynamics.is_none()
    }

    fn dynamics(&self) -> Result<&dyn Dynamics, SimulationError> {
        self.dynamics
            .as_deref()
            .ok_or_else(|| SimulationError::ProtocolViolation {
                model: self.name().to_string(),
                message: "the simulator was cleared".to_string(),
            })
    }

    fn dynamics_mut(&mut self) -> Result<&mut Box<dyn Dynamics>, SimulationError> {
        let name = self.atomic.name().to_string();
        self.dynamics
            .as_mut()
            .ok_or(SimulationError::ProtocolViolation {
                model: name,
                message: "the simulator was cleared".to_string(),
            })
    }

    fn checked_duration(&self, duration: Time) -> Result<Time, SimulationError> {
        if duration.is_finite() && duration.as_f64() < 0.0 {
            Err(SimulationError::NegativeTimeAdvance {
                model: self.name().to_string(),
            })
        } else {
            Ok(duration)
        }
    }

    /// Re-reads `time_advance` after a transition at `time`, caches the
    /// next transition time, and returns the fresh internal event to
    /// schedule (`None` when the model goes passive).
    fn reschedule(&mut self, time: Time) -> Result<Option<InternalEvent>, SimulationError> {
        let advance = self.checked_duration(self.dynamics()?.time_advance())?;
        self.last_time = time;
        self.next_time = time + advance;
        trace!(
            model = self.name(),
            next_time = %self.next_time,
            "rescheduled"
        );
        if self.next_time.is_infinite() {
            Ok(None)
        } else {
            Ok(Some(InternalEvent::new(self.next_time, self.id)))
        }
    }

    /// Asks the dynamics for its initial time advance and schedules the
    /// first internal event.
    pub fn init(&mut self, time: Time) -> Result<Option<InternalEvent>, SimulationError> {
        let sigma = self.dynamics_mut()?.init(time)?;
        let sigma = self.checked_duration(sigma)?;
        self.last_time = time;
        self.next_time = time + sigma;
        if self.next_time.is_infinite() {
            Ok(None)
        } else {
            Ok(Some(InternalEvent::new(self.next_time, self.id)))
        }
    }

    pub fn on_internal(
        &mut self,
        event: &InternalEvent,
        services: &mut crate::coordinator::Services,
    ) -> Result<Option<InternalEvent>, SimulationError> {
        let time = event.time();
        self.dynamics_mut()?.internal_transition(time, services)?;
        self.reschedule(time)
    }

    pub fn on_external(
        &mut self,
        events: &[ExternalEvent],
        time: Time,
        services: &mut crate::coordinator::Services,
    ) -> Result<Option<InternalEvent>, SimulationError> {
        self.dynamics_mut()?
            .external_transition(events, time, services)?;
        self.reschedule(time)
    }

    pub fn confluent_order(
        &self,
        time: Time,
        events: &[ExternalEvent],
    ) -> Result<ConfluentOrder, SimulationError> {
        Ok(self.dynamics()?.confluent_transitions(time, events))
    }

    /// Pure: the coordinator calls this before `internal_transition` at
    /// the same instant.
    pub fn output(&self, time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        self.dynamics()?.output(time)
    }

    /// Pure state query on behalf of a view.
    pub fn observation(
        &self,
        event: &ObservationEvent,
    ) -> Result<Option<Value>, SimulationError> {
        self.dynamics()?.observation(event)
    }

    pub fn request(
        &self,
        event: &RequestEvent,
        time: Time,
    ) -> Result<Vec<OutputMessage>, SimulationError> {
        self.dynamics()?.request(event, time)
    }

    pub fn finish(&mut self) {
        if let Some(dynamics) = self.dynamics.as_mut() {
            dynamics.finish();
        }
    }

    /// Marks the simulator dead and drops the owned dynamics so its
    /// resources release immediately; the shell itself is dropped at the
    /// next tick boundary.
    pub fn clear(&mut self) {
        self.dynamics = None;
        self.next_time = Time::INFINITY;
    }
}
