//! A place/transition net driven through the DEVS protocol.  Places,
//! transitions, arcs and the initial marking come from the condition
//! value tree; four firing disciplines govern how enabled transitions
//! resolve over simulated time.  External events inject tokens through
//! ports bound to input places or input transitions; output-bound
//! transitions and places emit external events when they fire or receive
//! tokens.

use std::collections::BTreeMap;

use crate::coordinator::Services;
use crate::dynamics::{Dynamics, InitEventList};
use crate::events::{ExternalEvent, ObservationEvent, OutputMessage};
use crate::graph::AtomicModel;
use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::values::Value;

/// The firing discipline of the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PetriDynamics {
    /// One enabled transition fires per zero-time tick, map order breaking
    /// ties.
    StepByStep,
    /// Every simultaneously-enabled transition fires per zero-time tick,
    /// repeating until stable.
    PhaseByPhase,
    /// Phase firing, but a deadlock halts the net permanently.
    WhileAlive,
    /// Transitions carry delays; the net alternates a waiting phase with
    /// an output phase that emits at the current time.
    TransitionTimed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRole {
    Input,
    Output,
    Internal,
}

#[derive(Debug, Clone)]
struct Place {
    name: String,
    role: NodeRole,
    port: Option<String>,
    // tokens added per external event on the bound port
    weight: usize,
}

#[derive(Debug, Clone)]
struct Transition {
    name: String,
    role: NodeRole,
    port: Option<String>,
    delay: Option<f64>,
}

#[derive(Debug, Clone)]
struct Arc {
    place: String,
    transition: String,
    weight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetPhase {
    Out,
    Run,
}

/// The Petri-net dynamics.
#[derive(Debug, Clone)]
pub struct PetriNet {
    model_name: String,
    dynamics_type: PetriDynamics,
    places: BTreeMap<String, Place>,
    transitions: BTreeMap<String, Transition>,
    // place -> transition
    input_arcs: Vec<Arc>,
    // transition -> place
    output_arcs: Vec<Arc>,
    initial_marking: BTreeMap<String, usize>,
    markings: BTreeMap<String, usize>,
    port_places: BTreeMap<String, String>,
    port_transitions: BTreeMap<String, String>,

    phase: NetPhase,
    sigma: Time,
    last_time: Time,
    dead: bool,
    // TransitionTimed: remaining delay per enabled transition
    timers: BTreeMap<String, f64>,
    // TransitionTimed: expired transitions whose inputs were consumed,
    // awaiting the output phase
    staged_firings: Vec<String>,
}

impl PetriNet {
    /// The factory constructor registered under the `PetriNet` library.
    pub fn from_init(
        model: &AtomicModel,
        events: &InitEventList,
    ) -> Result<Box<dyn Dynamics>, SimulationError> {
        Ok(Box::new(PetriNet::new(model, events)?))
    }

    pub fn new(model: &AtomicModel, events: &InitEventList) -> Result<Self, SimulationError> {
        let model_name = model.name().to_string();
        let structure = |message: String| SimulationError::ProtocolViolation {
            model: model_name.clone(),
            message,
        };
        let dynamics_type = match events.get("dynamics")?.as_string()? {
            "StepByStep" => PetriDynamics::StepByStep,
            "PhaseByPhase" => PetriDynamics::PhaseByPhase,
            "WhileAlive" => PetriDynamics::WhileAlive,
            "TransitionTimed" => PetriDynamics::TransitionTimed,
            other => return Err(structure(format!("unknown dynamics type '{}'", other))),
        };

        let mut places = BTreeMap::new();
        let mut port_places = BTreeMap::new();
        for entry in events.get("places")?.as_set()? {
            let fields = entry.as_set()?;
            let name = fields
                .first()
                .ok_or_else(|| structure("empty place entry".to_string()))?
                .as_string()?
                .to_string();
            let role = parse_role(fields.get(1), &model_name)?;
            let port = match fields.get(2) {
                Some(value) => Some(value.as_string()?.to_string()),
                None => None,
            };
            let weight = match fields.get(3) {
                Some(value) => value.as_int()?.max(1) as usize,
                None => 1,
            };
            if let (NodeRole::Input, Some(port)) = (role, port.as_ref()) {
                port_places.insert(port.clone(), name.clone());
            }
            places.insert(
                name.clone(),
                Place {
                    name,
                    role,
                    port,
                    weight,
                },
            );
        }

        let mut transitions = BTreeMap::new();
        let mut port_transitions = BTreeMap::new();
        for entry in events.get("transitions")?.as_set()? {
            let fields = entry.as_set()?;
            let name = fields
                .first()
                .ok_or_else(|| structure("empty transition entry".to_string()))?
                .as_string()?
                .to_string();
            let role = parse_role(fields.get(1), &model_name)?;
            let port = match fields.get(2) {
                Some(value) => Some(value.as_string()?.to_string()),
                None => None,
            };
            let delay = match fields.get(3) {
                Some(value) => Some(value.as_double()?),
                None => None,
            };
            if let (NodeRole::Input, Some(port)) = (role, port.as_ref()) {
                port_transitions.insert(port.clone(), name.clone());
            }
            transitions.insert(
                name.clone(),
                Transition {
                    name,
                    role,
                    port,
                    delay,
                },
            );
        }

        let mut input_arcs = Vec::new();
        let mut output_arcs = Vec::new();
        for entry in events.get("arcs")?.as_set()? {
            let fields = entry.as_set()?;
            let place = match fields.first() {
                Some(value) => value.as_string()?.to_string(),
                None => return Err(structure("empty arc entry".to_string())),
            };
            let transition = match fields.get(1) {
                Some(value) => value.as_string()?.to_string(),
                None => return Err(structure("arc without transition".to_string())),
            };
            let direction = match fields.get(2) {
                Some(value) => value.as_string()?,
                None => return Err(structure("arc without direction".to_string())),
            };
            let weight = match fields.get(3) {
                Some(value) => value.as_int()?.max(1) as usize,
                None => 1,
            };
            if !places.contains_key(&place) {
                return Err(structure(format!("arc references unknown place '{}'", place)));
            }
            if !transitions.contains_key(&transition) {
                return Err(structure(format!(
                    "arc references unknown transition '{}'",
                    transition
                )));
            }
            let arc = Arc {
                place,
                transition,
                weight,
            };
            match direction {
                "input" => input_arcs.push(arc),
                "output" => output_arcs.push(arc),
                other => {
                    return Err(structure(format!("unknown arc direction '{}'", other)))
                }
            }
        }

        let mut initial_marking = BTreeMap::new();
        if let Some(value) = events.get_opt("initialMarkings") {
            for entry in value.as_set()? {
                let fields = entry.as_set()?;
                let place = match fields.first() {
                    Some(value) => value.as_string()?.to_string(),
                    None => return Err(structure("empty marking entry".to_string())),
                };
                let tokens = match fields.get(1) {
                    Some(value) => value.as_int()?.max(0) as usize,
                    None => 0,
                };
                if !places.contains_key(&place) {
                    return Err(structure(format!(
                        "marking references unknown place '{}'",
                        place
                    )));
                }
                initial_marking.insert(place, tokens);
            }
        }

        Ok(Self {
            model_name,
            dynamics_type,
            places,
            transitions,
            input_arcs,
            output_arcs,
            initial_marking,
            markings: BTreeMap::new(),
            port_places,
            port_transitions,
            phase: NetPhase::Run,
            sigma: Time::INFINITY,
            last_time: Time::ZERO,
            dead: false,
            timers: BTreeMap::new(),
            staged_firings: Vec::new(),
        })
    }

    /// The current marking, token count per place.
    pub fn markings(&self) -> &BTreeMap<String, usize> {
        &self.markings
    }

    fn tokens(&self, place: &str) -> usize {
        self.markings.get(place).copied().unwrap_or(0)
    }

    fn enabled_under(&self, markings: &BTreeMap<String, usize>, transition: &str) -> bool {
        self.input_arcs
            .iter()
            .filter(|arc| arc.transition == transition)
            .all(|arc| markings.get(&arc.place).copied().unwrap_or(0) >= arc.weight)
    }

    fn is_enabled(&self, transition: &str) -> bool {
        self.enabled_under(&self.markings, transition)
    }

    fn is_alive(&self) -> bool {
        self.transitions
            .keys()
            .any(|name| self.is_enabled(name))
    }

    /// The transitions that fire at the next internal event, derived
    /// purely from current state so `output` and the transition agree.
    fn firing_set(&self) -> Vec<String> {
        match self.dynamics_type {
            PetriDynamics::StepByStep => self
                .transitions
                .keys()
                .find(|name| self.is_enabled(name))
                .map(|name| vec![name.clone()])
                .unwrap_or_default(),
            PetriDynamics::PhaseByPhase | PetriDynamics::WhileAlive => {
                let mut working = self.markings.clone();
                let mut firings = Vec::new();
                for name in self.transitions.keys() {
                    if self.enabled_under(&working, name) {
                        for arc in self.input_arcs.iter().filter(|arc| &arc.transition == name) {
                            if let Some(tokens) = working.get_mut(&arc.place) {
                                *tokens -= arc.weight;
                            }
                        }
                        firings.push(name.clone());
                    }
                }
                firings
            }
            PetriDynamics::TransitionTimed => match self.phase {
                NetPhase::Out => self.staged_firings.clone(),
                NetPhase::Run => Vec::new(),
            },
        }
    }

    fn consume(&mut self, transition: &str) -> Result<(), SimulationError> {
        if !self.is_enabled(transition) {
            return Err(SimulationError::ProtocolViolation {
                model: self.model_name.clone(),
                message: format!("firing disabled transition '{}'", transition),
            });
        }
        for arc in self.input_arcs.iter().filter(|arc| arc.transition == transition) {
            if let Some(tokens) = self.markings.get_mut(&arc.place) {
                *tokens -= arc.weight;
            }
        }
        Ok(())
    }

    fn produce(&mut self, transition: &str) {
        for index in 0..self.output_arcs.len() {
            if self.output_arcs[index].transition == transition {
                let place = self.output_arcs[index].place.clone();
                let weight = self.output_arcs[index].weight;
                *self.markings.entry(place).or_insert(0) += weight;
            }
        }
    }

    fn fire(&mut self, transition: &str) -> Result<(), SimulationError> {
        self.consume(transition)?;
        self.produce(transition);
        Ok(())
    }

    fn min_timer(&self) -> Time {
        self.timers
            .values()
            .fold(Time::INFINITY, |min, remaining| min.min(Time::new(*remaining)))
    }

    /// Starts timers for newly enabled transitions and drops timers whose
    /// transition lost its enabling tokens.
    fn refresh_timers(&mut self) {
        let enabled: Vec<String> = self
            .transitions
            .keys()
            .filter(|name| self.is_enabled(name))
            .cloned()
            .collect();
        self.timers.retain(|name, _| enabled.contains(name));
        for name in enabled {
            if !self.timers.contains_key(&name) {
                let delay = self
                    .transitions
                    .get(&name)
                    .and_then(|transition| transition.delay)
                    .unwrap_or(0.0);
                self.timers.insert(name, delay);
            }
        }
    }

    fn elapse_timers(&mut self, elapsed: f64) {
        for remaining in self.timers.values_mut() {
            *remaining = (*remaining - elapsed).max(0.0);
        }
    }

    fn rearm(&mut self) {
        match self.dynamics_type {
            PetriDynamics::StepByStep | PetriDynamics::PhaseByPhase => {
                self.sigma = if self.is_alive() {
                    Time::ZERO
                } else {
                    Time::INFINITY
                };
            }
            PetriDynamics::WhileAlive => {
                if self.is_alive() {
                    self.sigma = Time::ZERO;
                } else {
                    self.dead = true;
                    self.sigma = Time::INFINITY;
                }
            }
            PetriDynamics::TransitionTimed => {
                self.refresh_timers();
                self.phase = NetPhase::Run;
                self.sigma = self.min_timer();
            }
        }
    }
}

fn parse_role(value: Option<&Value>, model: &str) -> Result<NodeRole, SimulationError> {
    let role = match value {
        Some(value) => value.as_string()?,
        None => "internal",
    };
    match role {
        "input" => Ok(NodeRole::Input),
        "output" => Ok(NodeRole::Output),
        "internal" => Ok(NodeRole::Internal),
        other => Err(SimulationError::ProtocolViolation {
            model: model.to_string(),
            message: format!("unknown role '{}'", other),
        }),
    }
}

impl Dynamics for PetriNet {
    fn init(&mut self, time: Time) -> Result<Time, SimulationError> {
        self.markings = self
            .places
            .keys()
            .map(|name| (name.clone(), 0))
            .collect();
        for (place, tokens) in &self.initial_marking {
            self.markings.insert(place.clone(), *tokens);
        }
        self.last_time = time;
        self.dead = false;
        self.staged_firings.clear();
        self.timers.clear();
        match self.dynamics_type {
            PetriDynamics::TransitionTimed => {
                self.refresh_timers();
                self.phase = NetPhase::Run;
                self.sigma = self.min_timer();
            }
            _ => {
                self.sigma = if self.is_alive() {
                    Time::ZERO
                } else {
                    Time::INFINITY
                };
            }
        }
        Ok(self.sigma)
    }

    fn time_advance(&self) -> Time {
        self.sigma
    }

    fn output(&self, _time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        let firings = self.firing_set();
        if firings.is_empty() {
            return Ok(Vec::new());
        }
        let mut output = Vec::new();
        for name in &firings {
            if let Some(transition) = self.transitions.get(name) {
                if transition.role == NodeRole::Output {
                    if let Some(port) = &transition.port {
                        output.push(
                            OutputMessage::new(port)
                                .with_attribute("name", Value::String(transition.name.clone())),
                        );
                    }
                }
            }
        }
        // token arrivals on output-bound places
        let inputs_consumed = self.dynamics_type == PetriDynamics::TransitionTimed;
        let mut deltas: BTreeMap<String, i64> = BTreeMap::new();
        for name in &firings {
            for arc in self.output_arcs.iter().filter(|arc| &arc.transition == name) {
                *deltas.entry(arc.place.clone()).or_insert(0) += arc.weight as i64;
            }
            if !inputs_consumed {
                for arc in self.input_arcs.iter().filter(|arc| &arc.transition == name) {
                    *deltas.entry(arc.place.clone()).or_insert(0) -= arc.weight as i64;
                }
            }
        }
        for (place_name, delta) in &deltas {
            let Some(place) = self.places.get(place_name) else {
                continue;
            };
            if place.role != NodeRole::Output {
                continue;
            }
            let produced = self
                .output_arcs
                .iter()
                .any(|arc| &arc.place == place_name && firings.contains(&arc.transition));
            if !produced {
                continue;
            }
            if let Some(port) = &place.port {
                let resulting = self.tokens(place_name) as i64 + delta;
                output.push(
                    OutputMessage::new(port)
                        .with_attribute("name", Value::String(place.name.clone()))
                        .with_attribute("tokens", Value::Int(resulting.max(0))),
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
        match self.dynamics_type {
            PetriDynamics::StepByStep
            | PetriDynamics::PhaseByPhase
            | PetriDynamics::WhileAlive => {
                let firings = self.firing_set();
                for name in &firings {
                    self.fire(name)?;
                }
                self.last_time = time;
                self.rearm();
            }
            PetriDynamics::TransitionTimed => match self.phase {
                NetPhase::Run => {
                    let elapsed = time - self.last_time;
                    self.elapse_timers(elapsed);
                    let expired: Vec<String> = self
                        .timers
                        .iter()
                        .filter(|(_, remaining)| **remaining <= 0.0)
                        .map(|(name, _)| name.clone())
                        .collect();
                    let mut fired = Vec::new();
                    for name in expired {
                        self.timers.remove(&name);
                        if self.is_enabled(&name) {
                            self.consume(&name)?;
                            fired.push(name);
                        }
                    }
                    self.staged_firings = fired;
                    self.last_time = time;
                    self.phase = NetPhase::Out;
                    self.sigma = Time::ZERO;
                }
                NetPhase::Out => {
                    let fired = std::mem::take(&mut self.staged_firings);
                    for name in &fired {
                        self.produce(name);
                    }
                    self.last_time = time;
                    self.rearm();
                }
            },
        }
        Ok(())
    }

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        for event in events {
            let port = event.target_port();
            if let Some(place_name) = self.port_places.get(port).cloned() {
                let weight = self
                    .places
                    .get(&place_name)
                    .map(|place| place.weight)
                    .unwrap_or(1);
                *self.markings.entry(place_name).or_insert(0) += weight;
            } else if let Some(transition_name) = self.port_transitions.get(port).cloned() {
                self.produce(&transition_name);
            } else {
                return Err(SimulationError::PortNotFound {
                    model: self.model_name.clone(),
                    port: port.to_string(),
                });
            }
        }
        match self.dynamics_type {
            PetriDynamics::WhileAlive if self.dead => {
                // a deadlocked net stays halted
                self.last_time = time;
            }
            PetriDynamics::TransitionTimed => {
                let elapsed = time - self.last_time;
                self.elapse_timers(elapsed);
                self.refresh_timers();
                self.last_time = time;
                if self.phase == NetPhase::Run {
                    self.sigma = self.min_timer();
                }
            }
            _ => {
                self.last_time = time;
                self.sigma = if self.is_alive() {
                    Time::ZERO
                } else {
                    Time::INFINITY
                };
            }
        }
        Ok(())
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        let port = event.port_name();
        if port == "tokens" {
            let total: i64 = self.markings.values().map(|tokens| *tokens as i64).sum();
            return Ok(Some(Value::Int(total)));
        }
        if self.places.contains_key(port) {
            return Ok(Some(Value::Int(self.tokens(port) as i64)));
        }
        Err(SimulationError::PortNotFound {
            model: self.model_name.clone(),
            port: port.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Services;

    fn set(values: Vec<Value>) -> Value {
        Value::Set(values)
    }

    fn string(value: &str) -> Value {
        Value::String(value.to_string())
    }

    // p1 --> t1 --> p2 --> t2 --> p3, two tokens seeded in p1
    fn chain_events(dynamics: &str, initial_p1: i64) -> InitEventList {
        let mut events = InitEventList::default();
        events.insert("dynamics", string(dynamics));
        events.insert(
            "places",
            set(vec![
                set(vec![string("p1"), string("internal")]),
                set(vec![string("p2"), string("internal")]),
                set(vec![string("p3"), string("internal")]),
            ]),
        );
        events.insert(
            "transitions",
            set(vec![
                set(vec![string("t1"), string("internal")]),
                set(vec![string("t2"), string("internal")]),
            ]),
        );
        events.insert(
            "arcs",
            set(vec![
                set(vec![string("p1"), string("t1"), string("input"), Value::Int(1)]),
                set(vec![string("p2"), string("t1"), string("output"), Value::Int(1)]),
                set(vec![string("p2"), string("t2"), string("input"), Value::Int(1)]),
                set(vec![string("p3"), string("t2"), string("output"), Value::Int(1)]),
            ]),
        );
        events.insert(
            "initialMarkings",
            set(vec![set(vec![string("p1"), Value::Int(initial_p1)])]),
        );
        events
    }

    fn model() -> AtomicModel {
        AtomicModel::new("net", "root")
    }

    fn run_to_passive(net: &mut PetriNet) -> Vec<Vec<String>> {
        let mut firing_sequence = Vec::new();
        let mut time = Time::ZERO;
        let mut guard = 0;
        while !net.time_advance().is_infinite() {
            time = time + net.time_advance();
            let firings = net.firing_set();
            if !firings.is_empty() {
                firing_sequence.push(firings);
            }
            let mut services = Services::new(time);
            net.internal_transition(time, &mut services).unwrap();
            guard += 1;
            assert!(guard < 100, "net failed to stabilize");
        }
        firing_sequence
    }

    #[test]
    fn step_by_step_fires_one_transition_per_tick() {
        let mut net = PetriNet::new(&model(), &chain_events("StepByStep", 2)).unwrap();
        net.init(Time::ZERO).unwrap();
        let sequence = run_to_passive(&mut net);
        // each tick fires exactly one transition, map order breaking ties
        assert!(sequence.iter().all(|firings| firings.len() == 1));
        assert_eq!(net.tokens("p1"), 0);
        assert_eq!(net.tokens("p2"), 0);
        assert_eq!(net.tokens("p3"), 2);
    }

    #[test]
    fn phase_by_phase_fires_all_enabled_each_round() {
        let mut net = PetriNet::new(&model(), &chain_events("PhaseByPhase", 2)).unwrap();
        net.init(Time::ZERO).unwrap();
        let sequence = run_to_passive(&mut net);
        // the first round fires t1 alone; once p2 holds a token the rounds
        // fire t1 and t2 together
        assert_eq!(sequence.first().map(Vec::len), Some(1));
        assert!(sequence.iter().skip(1).any(|firings| firings.len() == 2));
        assert_eq!(net.tokens("p3"), 2);
    }

    #[test]
    fn while_alive_halts_permanently_on_deadlock() {
        let mut events = chain_events("WhileAlive", 1);
        events.insert(
            "places",
            set(vec![
                set(vec![string("p1"), string("input"), string("in")]),
                set(vec![string("p2"), string("internal")]),
                set(vec![string("p3"), string("internal")]),
            ]),
        );
        let mut net = PetriNet::new(&model(), &events).unwrap();
        net.init(Time::ZERO).unwrap();
        run_to_passive(&mut net);
        assert!(net.time_advance().is_infinite());
        // re-injecting tokens does not revive a halted net
        let mut services = Services::new(Time::new(1.0));
        let event = ExternalEvent::new(
            Time::new(1.0),
            crate::events::SimulatorId::new(0),
            "out".to_string(),
            crate::events::SimulatorId::new(1),
            "in".to_string(),
            Default::default(),
        );
        net.external_transition(&[event], Time::new(1.0), &mut services)
            .unwrap();
        assert_eq!(net.tokens("p1"), 1);
        assert!(net.time_advance().is_infinite());
    }

    #[test]
    fn reloaded_marking_reproduces_the_firing_sequence() {
        let mut original = PetriNet::new(&model(), &chain_events("StepByStep", 3)).unwrap();
        original.init(Time::ZERO).unwrap();
        // advance two firings, then save the marking
        for _ in 0..2 {
            let mut services = Services::new(Time::ZERO);
            original.internal_transition(Time::ZERO, &mut services).unwrap();
        }
        let saved = serde_json::to_string(original.markings()).unwrap();
        let restored: BTreeMap<String, usize> = serde_json::from_str(&saved).unwrap();

        let mut replayed = PetriNet::new(&model(), &chain_events("StepByStep", 3)).unwrap();
        replayed.init(Time::ZERO).unwrap();
        replayed.markings = restored;
        replayed.rearm();

        let remaining_original = run_to_passive(&mut original);
        let remaining_replayed = run_to_passive(&mut replayed);
        assert_eq!(remaining_original, remaining_replayed);
    }

    #[test]
    fn transition_timed_waits_the_minimum_delay() {
        let mut events = chain_events("TransitionTimed", 1);
        events.insert(
            "transitions",
            set(vec![
                set(vec![
                    string("t1"),
                    string("internal"),
                    string(""),
                    Value::Double(2.0),
                ]),
                set(vec![
                    string("t2"),
                    string("internal"),
                    string(""),
                    Value::Double(0.5),
                ]),
            ]),
        );
        let mut net = PetriNet::new(&model(), &events).unwrap();
        let first = net.init(Time::ZERO).unwrap();
        // only t1 is enabled at the start
        assert_eq!(first, Time::new(2.0));
        let mut services = Services::new(Time::new(2.0));
        net.internal_transition(Time::new(2.0), &mut services).unwrap();
        // output phase at the firing instant
        assert_eq!(net.time_advance(), Time::ZERO);
        net.internal_transition(Time::new(2.0), &mut services).unwrap();
        assert_eq!(net.tokens("p2"), 1);
        // now t2 runs with its own delay
        assert_eq!(net.time_advance(), Time::new(0.5));
    }
}
