//! A continuous variable integrated over discrete events.  The model
//! carries one state variable `x(t)` whose gradient is a user-supplied
//! function of the model state and its external inputs; integration is
//! explicit Euler over a configurable timestep.  The phase machine
//! alternates value updates and gradient recomputations, waits on fresh
//! external values when any input is numerical (no gradient supplied),
//! broadcasts `update` events, watches thresholds, and accepts `perturb`
//! events that reset the variable.

use std::collections::{BTreeMap, VecDeque};

use crate::coordinator::Services;
use crate::dynamics::{ConfluentOrder, Dynamics, InitEventList};
use crate::events::{ExternalEvent, ObservationEvent, OutputMessage, RequestEvent};
use crate::graph::AtomicModel;
use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

/// The gradient function: `dx/dt = f(state, t)`.  Reads the current value
/// and the external inputs through the model's accessors.
pub type GradientFn = fn(&DifferentialEquation, Time) -> f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    PostInit,
    Run,
    Run2,
    Post,
    Post2,
    Post3,
}

/// Crossing direction of a watched threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDirection {
    Up,
    Down,
}

type ValueBuffer = VecDeque<(Time, f64)>;

/// One continuous state variable with history buffering, thresholds and
/// gradient exchange.
#[derive(Debug, Clone)]
pub struct DifferentialEquation {
    model_name: String,
    variable_name: String,
    compute: GradientFn,
    active: bool,
    dependance: bool,
    initial_value: f64,
    timestep: f64,
    use_gradient: bool,
    thresholds: BTreeMap<String, (f64, ThresholdDirection)>,
    bufferized: bool,
    delay: f64,
    size: Option<usize>,

    phase: Phase,
    sigma: Time,
    start_time: Time,
    last_time: Time,
    // instant of the last value update, the anchor for extrapolation
    value_time: Time,
    value: f64,
    previous_value: f64,
    gradient: f64,
    value_buffer: ValueBuffer,
    external_values: BTreeMap<String, f64>,
    external_gradients: BTreeMap<String, f64>,
    external_is_linear: BTreeMap<String, bool>,
    external_buffers: BTreeMap<String, ValueBuffer>,
    // true when at least one external input carries no gradient and the
    // model must wait on fresh values after each step
    has_numerical_externals: bool,
    linear_external_count: usize,
}

impl DifferentialEquation {
    pub fn new(
        model: &AtomicModel,
        events: &InitEventList,
        compute: GradientFn,
    ) -> Result<Self, SimulationError> {
        let variable_name = events.get("name")?.as_string()?.to_string();
        let initial_value = events.get("value")?.as_double()?;
        let active = match events.get_opt("active") {
            Some(value) => value.as_bool()?,
            None => true,
        };
        let dependance = match events.get_opt("dependance") {
            Some(value) => value.as_bool()?,
            None => true,
        };
        let timestep = match events.get_opt("timestep") {
            Some(value) => value.as_double()?,
            None => 1.0,
        };
        if timestep <= 0.0 {
            return Err(SimulationError::ProtocolViolation {
                model: model.name().to_string(),
                message: format!("invalid timestep: {}", timestep),
            });
        }
        let use_gradient = match events.get_opt("gradient") {
            Some(value) => value.as_bool()?,
            None => true,
        };
        let mut thresholds = BTreeMap::new();
        if let Some(value) = events.get_opt("thresholds") {
            for (name, entry) in value.as_map()? {
                let entry = entry.as_set()?;
                let (threshold, direction) = match (entry.first(), entry.get(1)) {
                    (Some(threshold), Some(direction)) => {
                        (threshold.as_double()?, direction.as_string()?)
                    }
                    _ => {
                        return Err(SimulationError::ProtocolViolation {
                            model: model.name().to_string(),
                            message: format!("malformed threshold '{}'", name),
                        })
                    }
                };
                let direction = match direction {
                    "up" => ThresholdDirection::Up,
                    "down" => ThresholdDirection::Down,
                    other => {
                        return Err(SimulationError::ProtocolViolation {
                            model: model.name().to_string(),
                            message: format!("unknown threshold direction '{}'", other),
                        })
                    }
                };
                thresholds.insert(name.clone(), (threshold, direction));
            }
        }
        let bufferized = match events.get_opt("bufferized") {
            Some(value) => value.as_bool()?,
            None => false,
        };
        let delay = match events.get_opt("delay") {
            Some(value) => value.as_double()?,
            None => 0.0,
        };
        let size = match events.get_opt("size") {
            Some(value) => {
                let size = value.as_int()?;
                if size <= 0 {
                    return Err(SimulationError::ProtocolViolation {
                        model: model.name().to_string(),
                        message: format!("invalid history size: {}", size),
                    });
                }
                Some(size as usize)
            }
            None => None,
        };
        Ok(Self {
            model_name: model.name().to_string(),
            variable_name,
            compute,
            active,
            dependance,
            initial_value,
            timestep,
            use_gradient,
            thresholds,
            bufferized,
            delay,
            size,
            phase: Phase::Init,
            sigma: Time::ZERO,
            start_time: Time::ZERO,
            last_time: Time::ZERO,
            value_time: Time::ZERO,
            value: 0.0,
            previous_value: 0.0,
            gradient: 0.0,
            value_buffer: ValueBuffer::new(),
            external_values: BTreeMap::new(),
            external_gradients: BTreeMap::new(),
            external_is_linear: BTreeMap::new(),
            external_buffers: BTreeMap::new(),
            has_numerical_externals: false,
            linear_external_count: 0,
        })
    }

    pub fn variable_name(&self) -> &str {
        &self.variable_name
    }

    /// The current value of the state variable.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn gradient(&self) -> f64 {
        self.gradient
    }

    /// The current value of one external input, zero before any arrives.
    pub fn external_value(&self, name: &str) -> f64 {
        self.external_values.get(name).copied().unwrap_or(0.0)
    }

    pub fn external_gradient(&self, name: &str) -> f64 {
        self.external_gradients.get(name).copied().unwrap_or(0.0)
    }

    fn check_delay(&self, delay: f64) -> Result<(), SimulationError> {
        let bounded_ok = match self.size {
            Some(size) => -delay <= size as f64,
            None => true,
        };
        if delay > 0.0 || !bounded_ok {
            return Err(SimulationError::ProtocolViolation {
                model: self.model_name.clone(),
                message: format!("invalid history delay: {}", delay),
            });
        }
        Ok(())
    }

    fn lookup(buffer: &ValueBuffer, time: Time) -> f64 {
        // front is newest; take the value at the greatest stored time not
        // after `time`, or the oldest entry when `time` precedes them all
        let mut result = buffer.back().map(|(_, value)| *value).unwrap_or(0.0);
        for (stored, value) in buffer.iter().rev() {
            if *stored <= time {
                result = *value;
            } else {
                break;
            }
        }
        result
    }

    /// The state variable at `now + delay` (`delay <= 0`), read from the
    /// history buffer as a piecewise-constant signal.  With a bounded
    /// buffer the delay counts in units of the configured spacing.
    pub fn get_value(&self, now: Time, delay: f64) -> Result<f64, SimulationError> {
        self.check_delay(delay)?;
        if delay == 0.0 {
            return Ok(self.value);
        }
        let reach = if self.size.is_some() {
            -delay * self.delay
        } else {
            -delay
        };
        // before the history covers the requested depth, the oldest
        // recorded value stands in
        if now - self.start_time < reach {
            return Ok(self
                .value_buffer
                .back()
                .map(|(_, value)| *value)
                .unwrap_or(self.initial_value));
        }
        Ok(Self::lookup(&self.value_buffer, now + (-reach)))
    }

    /// One external input at `now + delay`, from its per-name buffer.
    pub fn get_external_value(
        &self,
        name: &str,
        now: Time,
        delay: f64,
    ) -> Result<f64, SimulationError> {
        self.check_delay(delay)?;
        if delay == 0.0 {
            return Ok(self.external_value(name));
        }
        let buffer = self.external_buffers.get(name).ok_or_else(|| {
            SimulationError::AttributeNotFound {
                name: name.to_string(),
            }
        })?;
        let reach = if self.size.is_some() {
            -delay * self.delay
        } else {
            -delay
        };
        if now - self.start_time < reach {
            return Ok(buffer.back().map(|(_, value)| *value).unwrap_or(0.0));
        }
        Ok(Self::lookup(buffer, now + (-reach)))
    }

    fn bound_buffer(buffer: &mut ValueBuffer, now: Time, size: usize, delay: f64) {
        let oldest_kept = now + (-(size as f64) * delay);
        let mut removed = None;
        while buffer
            .back()
            .map_or(false, |(stored, _)| *stored < oldest_kept)
        {
            removed = buffer.pop_back();
        }
        // keep one entry beyond the bound so lookups at the edge resolve
        if let Some(entry) = removed {
            buffer.push_back(entry);
        }
    }

    fn push_value(&mut self, now: Time, value: f64) {
        self.value = value;
        self.value_time = now;
        if self.bufferized {
            self.value_buffer.push_front((now, value));
            if let Some(size) = self.size {
                Self::bound_buffer(&mut self.value_buffer, now, size, self.delay);
            }
        }
    }

    fn push_external_value(&mut self, name: &str, now: Time, value: f64) {
        self.external_values.insert(name.to_string(), value);
        if self.bufferized {
            let buffer = self.external_buffers.entry(name.to_string()).or_default();
            buffer.push_front((now, value));
            if let Some(size) = self.size {
                Self::bound_buffer(buffer, now, size, self.delay);
            }
        }
    }

    fn estimated_value_at(&self, now: Time) -> f64 {
        self.value + (now - self.value_time) * self.gradient
    }

    fn update_sigma(&mut self, _time: Time) {
        self.sigma = Time::new(self.timestep);
    }

    fn update_value(&mut self, _external: bool, time: Time) {
        let elapsed = time - self.last_time;
        self.previous_value = self.value;
        let next = self.value + elapsed * self.gradient;
        self.push_value(time, next);
    }

    fn update_gradient(&mut self, external: bool, time: Time) {
        let gradient = (self.compute)(self, time);
        if external {
            let elapsed = time - self.last_time;
            let remaining = (self.sigma.as_f64() - elapsed).max(0.0);
            self.sigma = Time::new(remaining);
        } else {
            self.update_sigma(time);
        }
        self.gradient = gradient;
        self.last_time = time;
    }

    /// Linear inputs advance along their gradients between events.
    fn update_external_variables(&mut self, time: Time) {
        if self.linear_external_count > 1 {
            let elapsed = time - self.last_time;
            for (name, value) in self.external_values.iter_mut() {
                let gradient = self.external_gradients.get(name).copied().unwrap_or(0.0);
                *value += elapsed * gradient;
            }
        }
    }

    /// A perturbation forces the variable to `value` and re-fires
    /// immediately from the post-reset phase.
    fn reset(&mut self, time: Time, value: f64) {
        self.previous_value = value;
        self.push_value(time, value);
        self.last_time = time;
        self.phase = Phase::Post3;
        self.sigma = Time::ZERO;
    }

    fn crossed_threshold(&self) -> Option<String> {
        for (name, (threshold, direction)) in &self.thresholds {
            let found = match direction {
                ThresholdDirection::Down => {
                    self.previous_value >= *threshold && *threshold >= self.value
                }
                ThresholdDirection::Up => {
                    self.previous_value <= *threshold && *threshold <= self.value
                }
            };
            if found {
                return Some(name.clone());
            }
        }
        None
    }
}

impl Dynamics for DifferentialEquation {
    fn init(&mut self, time: Time) -> Result<Time, SimulationError> {
        self.start_time = time;
        self.previous_value = self.initial_value;
        self.push_value(time, self.initial_value);
        self.gradient = 0.0;
        self.sigma = Time::ZERO;
        self.last_time = time;
        self.phase = Phase::Init;
        Ok(Time::ZERO)
    }

    fn time_advance(&self) -> Time {
        self.sigma
    }

    fn output(&self, time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        let mut output = Vec::new();
        // value broadcasts
        if (self.phase == Phase::Init && self.active)
            || (self.phase == Phase::Post3 && self.has_numerical_externals)
            || (self.phase == Phase::Run && self.active)
        {
            let mut message = OutputMessage::new("update")
                .with_attribute("name", Value::String(self.variable_name.clone()))
                .with_attribute("value", Value::Double(self.estimated_value_at(time)));
            if self.use_gradient {
                message = message.with_attribute("gradient", Value::Double(self.gradient));
            }
            output.push(message);
        }
        // threshold crossings
        if self.phase == Phase::Run2 || self.phase == Phase::Post2 {
            if let Some(name) = self.crossed_threshold() {
                output.push(
                    OutputMessage::new("threshold").with_attribute("name", Value::String(name)),
                );
            }
        }
        Ok(output)
    }

    fn internal_transition(
        &mut self,
        time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        match self.phase {
            Phase::Init => {
                if self.dependance {
                    self.phase = Phase::PostInit;
                    self.sigma = Time::INFINITY;
                } else {
                    self.phase = Phase::Run;
                    self.gradient = (self.compute)(self, time);
                    self.update_sigma(time);
                }
            }
            Phase::Post2 => {
                // gradient refresh after the awaited external values
                self.phase = Phase::Run;
                self.update_gradient(false, time);
            }
            Phase::Post3 => {
                self.phase = Phase::Run;
                self.update_sigma(time);
            }
            Phase::Run => {
                self.update_value(false, time);
                if self.active && self.has_numerical_externals {
                    // wait for fresh values of the numerical inputs
                    self.phase = Phase::Post;
                    self.sigma = Time::INFINITY;
                } else {
                    self.phase = Phase::Run2;
                    self.sigma = Time::ZERO;
                }
            }
            Phase::Run2 => {
                self.phase = Phase::Run;
                self.update_gradient(false, time);
            }
            Phase::Post | Phase::PostInit => {}
        }
        Ok(())
    }

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        if self.phase == Phase::PostInit {
            let mut linear = 0usize;
            for event in events {
                let name = event.string_attribute("name")?.to_string();
                let value = event.double_attribute("value")?;
                self.external_buffers
                    .insert(name.clone(), ValueBuffer::new());
                self.push_external_value(&name, time, value);
                let is_linear = event.has_attribute("gradient");
                self.external_is_linear.insert(name.clone(), is_linear);
                if is_linear {
                    self.external_gradients
                        .insert(name.clone(), event.double_attribute("gradient")?);
                    linear += 1;
                }
            }
            self.has_numerical_externals = linear < self.external_values.len();
            self.linear_external_count = linear;
            self.phase = Phase::Run;
            self.gradient = (self.compute)(self, time);
            self.update_sigma(time);
            return Ok(());
        }
        let mut was_reset = false;
        for event in events {
            if event.on_port("update") {
                let name = event.string_attribute("name")?.to_string();
                if name == self.variable_name {
                    return Err(SimulationError::ProtocolViolation {
                        model: self.model_name.clone(),
                        message: format!("update with own variable name '{}'", name),
                    });
                }
                let value = event.double_attribute("value")?;
                self.push_external_value(&name, time, value);
                if self.external_is_linear.get(&name).copied().unwrap_or(false) {
                    self.external_gradients
                        .insert(name, event.double_attribute("gradient")?);
                }
            }
            if event.on_port("perturb") {
                let name = event.string_attribute("name")?;
                if name != self.variable_name {
                    return Err(SimulationError::ProtocolViolation {
                        model: self.model_name.clone(),
                        message: format!("perturbation with mismatched name '{}'", name),
                    });
                }
                let value = event.double_attribute("value")?;
                self.reset(time, value);
                was_reset = true;
            }
        }
        match self.phase {
            Phase::Post => {
                self.phase = Phase::Post2;
                self.sigma = Time::ZERO;
            }
            Phase::Run | Phase::Run2 => {
                if was_reset {
                    self.sigma = Time::ZERO;
                } else {
                    self.update_value(true, time);
                    self.update_external_variables(time);
                    self.update_gradient(true, time);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn confluent_transitions(&self, _time: Time, _events: &[ExternalEvent]) -> ConfluentOrder {
        ConfluentOrder::External
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        if event.port_name() != self.variable_name {
            return Err(SimulationError::ProtocolViolation {
                model: self.model_name.clone(),
                message: format!("observation on unknown variable '{}'", event.port_name()),
            });
        }
        Ok(Some(Value::Double(self.estimated_value_at(event.time()))))
    }

    fn request(
        &self,
        event: &RequestEvent,
        time: Time,
    ) -> Result<Vec<OutputMessage>, SimulationError> {
        let name = event.string_attribute("name")?;
        if name != self.variable_name {
            return Err(SimulationError::ProtocolViolation {
                model: self.model_name.clone(),
                message: format!("request for unknown variable '{}'", name),
            });
        }
        let mut message = OutputMessage::new("response")
            .with_attribute("name", Value::String(self.variable_name.clone()))
            .with_attribute("value", Value::Double(self.estimated_value_at(time)));
        if self.use_gradient {
            message = message.with_attribute("gradient", Value::Double(self.gradient));
        }
        Ok(vec![message])
    }
}
