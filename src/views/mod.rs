//! Observation sinks.  A view binds simulator ports to a stream writer
//! under one of three disciplines: timed views poll at a fixed step, event
//! views push on every transition of an observed model, finish views are
//! pulled once at the end of the run.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::events::{ObservationEvent, SimulatorId};
use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

pub mod stream;

pub use self::stream::{LocalStreamWriter, MemoryStreamWriter, ObservationRecord, StreamWriter};

/// The observation discipline of a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewKind {
    Timed { timestep: f64 },
    Event,
    Finish,
}

/// One observation sink.  The coordinator owns the view; the view owns
/// its writer.  Observed simulators are referenced by handle only.
pub struct View {
    name: String,
    kind: ViewKind,
    begin: Option<Time>,
    observables: BTreeMap<SimulatorId, Vec<String>>,
    writer: Box<dyn StreamWriter>,
    degraded: bool,
}

impl View {
    pub fn new(name: &str, kind: ViewKind, writer: Box<dyn StreamWriter>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            begin: None,
            observables: BTreeMap::new(),
            writer,
            degraded: false,
        }
    }

    pub fn with_begin(mut self, begin: Time) -> Self {
        self.begin = Some(begin);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn is_timed(&self) -> bool {
        matches!(self.kind, ViewKind::Timed { .. })
    }

    pub fn is_event(&self) -> bool {
        self.kind == ViewKind::Event
    }

    pub fn is_finish(&self) -> bool {
        self.kind == ViewKind::Finish
    }

    /// A view that failed to write is marked degraded and skipped for the
    /// rest of the run.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// The writer, exposed for harnesses that downcast to read buffered
    /// records after a run.
    pub fn writer(&self) -> &dyn StreamWriter {
        self.writer.as_ref()
    }

    /// Registers one observed port.  Timed views arm their first poll
    /// here and hand back the observation event to schedule.
    pub(crate) fn add_observable(
        &mut self,
        simulator: SimulatorId,
        port_name: &str,
        now: Time,
    ) -> Option<ObservationEvent> {
        self.observables
            .entry(simulator)
            .or_default()
            .push(port_name.to_string());
        match self.kind {
            ViewKind::Timed { .. } => {
                let first = match self.begin {
                    Some(begin) if begin > now => begin,
                    _ => now,
                };
                Some(ObservationEvent::new(
                    first,
                    simulator,
                    self.name.clone(),
                    port_name.to_string(),
                ))
            }
            ViewKind::Event | ViewKind::Finish => None,
        }
    }

    pub(crate) fn remove_observable(&mut self, simulator: SimulatorId) {
        self.observables.remove(&simulator);
    }

    /// The ports this view watches on one simulator.
    pub(crate) fn ports(&self, simulator: SimulatorId) -> &[String] {
        match self.observables.get(&simulator) {
            Some(ports) => ports.as_slice(),
            None => &[],
        }
    }

    pub(crate) fn observables(&self) -> &BTreeMap<SimulatorId, Vec<String>> {
        &self.observables
    }

    /// Writes one observation tuple; for a timed view, returns the
    /// follow-up event one timestep later so the poll re-arms.
    pub(crate) fn process_observation(
        &mut self,
        event: &ObservationEvent,
        model_name: &str,
        value: Option<Value>,
    ) -> Result<Option<ObservationEvent>, SimulationError> {
        if !self.degraded {
            let record =
                ObservationRecord::new(event.time(), model_name, event.port_name(), value);
            if let Err(error) = self.writer.process(&record) {
                warn!(view = %self.name, %error, "stream writer failed; view degraded");
                self.degraded = true;
            }
        }
        match self.kind {
            ViewKind::Timed { timestep } => Ok(Some(ObservationEvent::new(
                event.time() + timestep,
                event.target(),
                self.name.clone(),
                event.port_name().to_string(),
            ))),
            ViewKind::Event | ViewKind::Finish => Ok(None),
        }
    }

    /// Flushes and releases the writer at the terminal time.
    pub(crate) fn finish(&mut self, time: Time) -> Result<(), SimulationError> {
        debug!(view = %self.name, time = %time, "closing view");
        self.writer.close(time)
    }
}
