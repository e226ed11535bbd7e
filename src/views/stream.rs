//! The stream-writer boundary.  A view owns exactly one writer; the
//! kernel only ever calls `open`, `set_view`, `process` and `close`.
//! Two writers ship: a JSON-lines file writer and an in-memory buffer
//! used by the test harness.  A network-backed writer would implement the
//! same trait.

use std::any::Any;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

/// One serialized observation tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRecord {
    time: f64,
    model: String,
    port: String,
    value: Option<Value>,
}

impl ObservationRecord {
    pub fn new(time: Time, model: &str, port: &str, value: Option<Value>) -> Self {
        Self {
            time: time.as_f64(),
            model: model.to_string(),
            port: port.to_string(),
            value,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}

/// The observation-push interface between a view and its backend.
pub trait StreamWriter {
    /// Prepares the backend.  `file` is the stream name, conventionally
    /// `experiment_output`; `data` carries plugin-specific parameters.
    fn open(
        &mut self,
        plugin: &str,
        location: &str,
        file: &str,
        data: &Value,
        time: Time,
    ) -> Result<(), SimulationError>;

    /// Tells the writer which view feeds it, for headers and diagnostics.
    fn set_view(&mut self, view_name: &str);

    /// Pushes one observation tuple.
    fn process(&mut self, record: &ObservationRecord) -> Result<(), SimulationError>;

    /// Flushes and releases the backend at the terminal time.
    fn close(&mut self, time: Time) -> Result<(), SimulationError>;

    /// Concrete-type access, used by test harnesses to read buffered
    /// records back out of a finished run.
    fn as_any(&self) -> &dyn Any;
}

/// Writes observation tuples as JSON lines to a local file.
#[derive(Debug, Default)]
pub struct LocalStreamWriter {
    view_name: String,
    path: Option<PathBuf>,
    file: Option<BufWriter<File>>,
}

impl LocalStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl StreamWriter for LocalStreamWriter {
    fn open(
        &mut self,
        _plugin: &str,
        location: &str,
        file: &str,
        _data: &Value,
        time: Time,
    ) -> Result<(), SimulationError> {
        let mut path = PathBuf::from(location);
        if !location.is_empty() {
            fs::create_dir_all(&path)?;
        }
        path.push(format!("{}.jsonl", file));
        debug!(path = %path.display(), time = %time, "opening local stream");
        self.file = Some(BufWriter::new(File::create(&path)?));
        self.path = Some(path);
        Ok(())
    }

    fn set_view(&mut self, view_name: &str) {
        self.view_name = view_name.to_string();
    }

    fn process(&mut self, record: &ObservationRecord) -> Result<(), SimulationError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SimulationError::ProtocolViolation {
                model: self.view_name.clone(),
                message: "stream written before open".to_string(),
            })?;
        serde_json::to_writer(&mut *file, record)?;
        file.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self, time: Time) -> Result<(), SimulationError> {
        debug!(view = %self.view_name, time = %time, "closing local stream");
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Buffers observation tuples in memory; the test-harness writer.
#[derive(Debug, Default)]
pub struct MemoryStreamWriter {
    view_name: String,
    records: Vec<ObservationRecord>,
    closed_at: Option<Time>,
}

impl MemoryStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ObservationRecord] {
        &self.records
    }

    pub fn closed_at(&self) -> Option<Time> {
        self.closed_at
    }
}

impl StreamWriter for MemoryStreamWriter {
    fn open(
        &mut self,
        _plugin: &str,
        _location: &str,
        _file: &str,
        _data: &Value,
        _time: Time,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    fn set_view(&mut self, view_name: &str) {
        self.view_name = view_name.to_string();
    }

    fn process(&mut self, record: &ObservationRecord) -> Result<(), SimulationError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn close(&mut self, time: Time) -> Result<(), SimulationError> {
        self.closed_at = Some(time);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
