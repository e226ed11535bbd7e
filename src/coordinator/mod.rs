//! The coordinator is the central event loop of the kernel.  It owns the
//! simulators, the event table, the routing graph and the views; each
//! tick it pops the bag of coincident events, resolves every simulator's
//! transitions, routes the produced events at the current time, and
//! flushes observations to the views.  The coordinator is flat: every
//! atomic model hangs off one coupled root, and coupled-model routing has
//! been flattened into the connector table beforehand.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, trace};

use crate::dynamics::ConfluentOrder;
use crate::events::{
    EventBag, EventTable, ExternalEvent, ObservationEvent, OutputMessage, RequestEvent,
    SimulatorId,
};
use crate::factory::ModelFactory;
use crate::graph::{AtomicModel, ModelGraph};
use crate::project::{OutputFormat, Project, ViewType};
use crate::simulator::Simulator;
use crate::time::Time;
use crate::utils::errors::SimulationError;
use crate::views::{LocalStreamWriter, MemoryStreamWriter, StreamWriter, View, ViewKind};

pub mod services;

pub use self::services::Services;

use self::services::ExecutiveRequest;

/// The flat DEVS coordinator: tick loop, event dispatch, executive
/// surface and observation routing.
pub struct Coordinator {
    current_time: Time,
    simulators: BTreeMap<SimulatorId, Simulator>,
    names: HashMap<String, SimulatorId>,
    next_id: usize,
    graph: ModelGraph,
    event_table: EventTable,
    views: BTreeMap<String, View>,
    factory: ModelFactory,
    // two-phase deletion: cleared simulators wait here until the tick
    // boundary after their events were purged
    deleted: Vec<Simulator>,
    to_delete: usize,
}

impl Coordinator {
    /// Builds the coordinator from a project description: opens the
    /// writers, constructs the views, materializes the routing graph and
    /// instantiates every model in the project, scheduling its first
    /// internal event.
    pub fn new(project: &Project, factory: ModelFactory) -> Result<Self, SimulationError> {
        let current_time = Time::new(project.experiment().begin());
        let mut coordinator = Self {
            current_time,
            simulators: BTreeMap::new(),
            names: HashMap::new(),
            next_id: 0,
            graph: ModelGraph::new(project.connectors().to_vec()),
            event_table: EventTable::new(),
            views: BTreeMap::new(),
            factory,
            deleted: Vec::new(),
            to_delete: 0,
        };
        coordinator.build_views(project)?;
        for spec in project.model() {
            coordinator.create_model(
                spec.model().clone(),
                spec.dynamics(),
                spec.conditions(),
                spec.observables(),
            )?;
        }
        info!(
            models = coordinator.simulators.len(),
            views = coordinator.views.len(),
            begin = %current_time,
            "coordinator ready"
        );
        Ok(coordinator)
    }

    fn build_views(&mut self, project: &Project) -> Result<(), SimulationError> {
        let mut writers: HashMap<String, Box<dyn StreamWriter>> = HashMap::new();
        for output in project.outputs() {
            let mut writer: Box<dyn StreamWriter> = match output.format() {
                OutputFormat::Local => Box::new(LocalStreamWriter::new()),
                OutputFormat::Memory => Box::new(MemoryStreamWriter::new()),
            };
            let file = format!("{}_{}", project.experiment().name(), output.name());
            writer.open(
                output.plugin(),
                output.location(),
                &file,
                output.data(),
                self.current_time,
            )?;
            writers.insert(output.name().to_string(), writer);
        }
        for spec in project.views() {
            let mut writer =
                writers
                    .remove(spec.output())
                    .ok_or_else(|| SimulationError::OutputNotFound {
                        view: spec.name().to_string(),
                        output: spec.output().to_string(),
                    })?;
            writer.set_view(spec.name());
            let kind = match spec.view_type() {
                ViewType::Timed => {
                    if spec.timestep() <= 0.0 {
                        return Err(SimulationError::InvalidTimestep {
                            view: spec.name().to_string(),
                        });
                    }
                    ViewKind::Timed {
                        timestep: spec.timestep(),
                    }
                }
                ViewType::Event => ViewKind::Event,
                ViewType::Finish => ViewKind::Finish,
            };
            let mut view = View::new(spec.name(), kind, writer);
            if let Some(begin) = spec.begin() {
                view = view.with_begin(Time::new(begin));
            }
            self.views.insert(spec.name().to_string(), view);
        }
        Ok(())
    }

    /// The current simulated time.
    pub fn current_time(&self) -> Time {
        self.current_time
    }

    /// The time of the next pending event, `+inf` when the run is over.
    pub fn next_time(&mut self) -> Time {
        self.event_table.top_time()
    }

    pub fn model_id(&self, name: &str) -> Result<SimulatorId, SimulationError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SimulationError::ModelNotFound {
                name: name.to_string(),
            })
    }

    pub fn simulator(&self, id: SimulatorId) -> Option<&Simulator> {
        self.simulators.get(&id)
    }

    pub fn view(&self, name: &str) -> Result<&View, SimulationError> {
        self.views
            .get(name)
            .ok_or_else(|| SimulationError::ViewNotFound {
                name: name.to_string(),
            })
    }

    /// The event table, exposed read-only for invariant checks.
    pub fn event_table(&self) -> &EventTable {
        &self.event_table
    }

    /// Instantiates a dynamics for the atomic model, registers the
    /// simulator, wires its observables and schedules its first internal
    /// event at the current time.
    pub fn create_model(
        &mut self,
        model: AtomicModel,
        dynamics: &str,
        conditions: &[String],
        observable: Option<&str>,
    ) -> Result<SimulatorId, SimulationError> {
        if self.names.contains_key(model.name()) {
            return Err(SimulationError::DuplicateModel {
                name: model.name().to_string(),
            });
        }
        let instance = self.factory.create_dynamics(dynamics, &model, conditions)?;
        let id = SimulatorId::new(self.next_id);
        self.next_id += 1;
        let name = model.name().to_string();
        let mut simulator = Simulator::new(id, model, instance);
        debug!(model = %name, dynamics, time = %self.current_time, "model created");
        if let Some(event) = simulator.init(self.current_time)? {
            self.event_table.put_internal(event);
        }
        self.names.insert(name.clone(), id);
        self.simulators.insert(id, simulator);
        if let Some(observable_name) = observable {
            let observable = self.factory.observable(observable_name)?.clone();
            for (port_name, view_names) in observable.ports() {
                for view_name in view_names {
                    self.add_observable_to_view(&name, port_name, view_name)?;
                }
            }
        }
        Ok(id)
    }

    /// Attaches a model port to a view; a timed view schedules its first
    /// poll at the current time.
    pub fn add_observable_to_view(
        &mut self,
        model: &str,
        port_name: &str,
        view: &str,
    ) -> Result<(), SimulationError> {
        let id = self.model_id(model)?;
        let view = self
            .views
            .get_mut(view)
            .ok_or_else(|| SimulationError::ViewNotFound {
                name: view.to_string(),
            })?;
        if let Some(event) = view.add_observable(id, port_name, self.current_time) {
            self.event_table.put_observation(event);
        }
        Ok(())
    }

    /// Stages the deletion of a model: its pending events are purged, its
    /// view subscriptions and connectors removed, the dynamics dropped;
    /// the simulator shell itself is released at the next tick boundary.
    pub fn del_model(&mut self, name: &str) -> Result<(), SimulationError> {
        let id = self
            .names
            .remove(name)
            .ok_or_else(|| SimulationError::ModelNotFound {
                name: name.to_string(),
            })?;
        let mut simulator =
            self.simulators
                .remove(&id)
                .ok_or_else(|| SimulationError::ModelNotFound {
                    name: name.to_string(),
                })?;
        debug!(model = name, time = %self.current_time, "model deletion staged");
        self.event_table.del_model_events(id);
        for view in self.views.values_mut() {
            view.remove_observable(id);
        }
        self.graph.del_model(name);
        simulator.clear();
        self.deleted.push(simulator);
        Ok(())
    }

    /// Routes a batch of emissions through the graph, scheduling the
    /// resulting external, request or response events at the current
    /// time.
    fn dispatch_messages(
        &mut self,
        source: SimulatorId,
        messages: Vec<OutputMessage>,
        response: bool,
    ) -> Result<(), SimulationError> {
        for message in messages {
            let source_name = match self.simulators.get(&source) {
                Some(simulator) => simulator.name().to_string(),
                None => continue,
            };
            let targets = self.graph.target_ports(&source_name, message.port_name());
            trace!(
                model = %source_name,
                port = message.port_name(),
                fanout = targets.len(),
                "dispatch"
            );
            let request = message.is_request();
            let source_port = message.port_name().to_string();
            let attributes = message.into_attributes();
            for (target_name, target_port) in targets {
                let target = self.model_id(&target_name)?;
                let event = ExternalEvent::new(
                    self.current_time,
                    source,
                    source_port.clone(),
                    target,
                    target_port,
                    attributes.clone(),
                );
                if request {
                    self.event_table.put_request(RequestEvent::new(event));
                } else if response {
                    self.event_table.put_response(event);
                } else {
                    self.event_table.put_external(event);
                }
            }
        }
        Ok(())
    }

    fn apply_executive(
        &mut self,
        requests: Vec<ExecutiveRequest>,
    ) -> Result<(), SimulationError> {
        for request in requests {
            match request {
                ExecutiveRequest::CreateModel {
                    model,
                    dynamics,
                    conditions,
                    observable,
                } => {
                    self.create_model(model, &dynamics, &conditions, observable.as_deref())?;
                }
                ExecutiveRequest::DelModel { name } => {
                    self.del_model(&name)?;
                }
                ExecutiveRequest::AddConnector { connector } => {
                    self.graph.add_connector(connector);
                }
                ExecutiveRequest::AddDynamics { spec } => {
                    self.factory.add_permanent_dynamics(spec);
                }
                ExecutiveRequest::AddCondition { condition } => {
                    self.factory.add_permanent_condition(condition);
                }
                ExecutiveRequest::AddObservable { observable } => {
                    self.factory.add_permanent_observable(observable);
                }
                ExecutiveRequest::AddObservableToView {
                    model,
                    port_name,
                    view,
                } => {
                    self.add_observable_to_view(&model, &port_name, &view)?;
                }
            }
        }
        Ok(())
    }

    /// Pushes the post-transition state of one simulator to every event
    /// view watching it.
    fn notify_event_views(
        &mut self,
        id: SimulatorId,
        time: Time,
    ) -> Result<(), SimulationError> {
        let simulators = &self.simulators;
        let Some(simulator) = simulators.get(&id) else {
            return Ok(());
        };
        for view in self.views.values_mut() {
            if !view.is_event() {
                continue;
            }
            let ports: Vec<String> = view.ports(id).to_vec();
            for port_name in ports {
                let event =
                    ObservationEvent::new(time, id, view.name().to_string(), port_name);
                let value = simulator.observation(&event)?;
                view.process_observation(&event, simulator.name(), value)?;
            }
        }
        Ok(())
    }

    fn process_internal(
        &mut self,
        id: SimulatorId,
        bag: &mut EventBag,
    ) -> Result<(), SimulationError> {
        let Some(event) = bag.take_internal() else {
            return Ok(());
        };
        // output precedes the transition at the same instant
        let output = match self.simulators.get(&id) {
            Some(simulator) => simulator.output(self.current_time)?,
            None => return Ok(()),
        };
        self.dispatch_messages(id, output, false)?;
        let mut services = Services::new(self.current_time);
        let next = match self.simulators.get_mut(&id) {
            Some(simulator) => simulator.on_internal(&event, &mut services)?,
            None => return Ok(()),
        };
        // reschedule before the executive runs, so a self-deletion purges
        // the fresh event along with the rest
        match next {
            Some(next) => self.event_table.put_internal(next),
            None => self.event_table.cancel_internal(id),
        }
        self.apply_executive(services.take_requests())?;
        self.notify_event_views(id, event.time())
    }

    fn process_externals(
        &mut self,
        id: SimulatorId,
        bag: &mut EventBag,
    ) -> Result<(), SimulationError> {
        let events = bag.take_externals();
        if events.is_empty() {
            return Ok(());
        }
        let mut services = Services::new(self.current_time);
        let next = match self.simulators.get_mut(&id) {
            Some(simulator) => simulator.on_external(&events, self.current_time, &mut services)?,
            None => return Ok(()),
        };
        match next {
            Some(next) => self.event_table.put_internal(next),
            None => self.event_table.cancel_internal(id),
        }
        self.apply_executive(services.take_requests())?;
        self.notify_event_views(id, self.current_time)
    }

    fn process_requests(
        &mut self,
        id: SimulatorId,
        bag: &mut EventBag,
    ) -> Result<(), SimulationError> {
        let requests = bag.take_requests();
        for request in requests {
            let output = match self.simulators.get(&id) {
                Some(simulator) => simulator.request(&request, self.current_time)?,
                None => continue,
            };
            self.dispatch_messages(id, output, true)?;
        }
        Ok(())
    }

    /// Resolves one simulator's bag: the confluent rule decides whether
    /// the internal or the external class runs first when both are
    /// present; both run within the tick, and requests go last so they
    /// read post-transition state.
    fn process_bag(&mut self, id: SimulatorId, bag: &mut EventBag) -> Result<(), SimulationError> {
        while !bag.is_empty() {
            if !self.simulators.contains_key(&id) {
                // deleted earlier this tick; its remaining events lapse
                bag.drain();
                return Ok(());
            }
            if bag.has_internal() {
                if bag.has_externals() {
                    let order = match self.simulators.get(&id) {
                        Some(simulator) => {
                            simulator.confluent_order(self.current_time, bag.externals())?
                        }
                        None => continue,
                    };
                    match order {
                        ConfluentOrder::Internal => self.process_internal(id, bag)?,
                        ConfluentOrder::External => self.process_externals(id, bag)?,
                    }
                } else {
                    self.process_internal(id, bag)?;
                }
            } else if bag.has_externals() {
                self.process_externals(id, bag)?;
            } else {
                self.process_requests(id, bag)?;
            }
        }
        Ok(())
    }

    /// Observation events read post-transition state, after every
    /// transition at this time has completed; a timed view re-arms by
    /// scheduling its next poll.
    fn process_observation_events(
        &mut self,
        events: Vec<ObservationEvent>,
    ) -> Result<(), SimulationError> {
        for event in events {
            let observed = match self.simulators.get(&event.target()) {
                Some(simulator) => Some((
                    simulator.name().to_string(),
                    simulator.observation(&event)?,
                )),
                None => None,
            };
            let Some((model_name, value)) = observed else {
                continue;
            };
            let view = self.views.get_mut(event.view_name()).ok_or_else(|| {
                SimulationError::ViewNotFound {
                    name: event.view_name().to_string(),
                }
            })?;
            if let Some(next) = view.process_observation(&event, &model_name, value)? {
                self.event_table.put_observation(next);
            }
        }
        Ok(())
    }

    /// Executes one tick: advances the clock to the minimum pending event
    /// time, resolves every scheduled simulator, finalizes deletions
    /// staged before this tick, and flushes this tick's observations.
    /// Returns `false` when no event is pending.
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        let next = self.event_table.top_time();
        if next.is_infinite() {
            return Ok(false);
        }
        if next < self.current_time {
            return Err(SimulationError::ProtocolViolation {
                model: "coordinator".to_string(),
                message: format!(
                    "event at {} scheduled before current time {}",
                    next, self.current_time
                ),
            });
        }
        self.current_time = next;
        trace!(time = %next, "tick");
        let old_to_delete = self.to_delete;
        let mut bag = self.event_table.pop_tick();
        for id in bag.bag_ids() {
            let mut model_bag = std::mem::take(bag.bag_mut(id));
            self.process_bag(id, &mut model_bag)?;
        }
        if old_to_delete > 0 {
            self.deleted.drain(..old_to_delete);
        }
        self.to_delete = self.deleted.len();
        self.process_observation_events(bag.take_observations())?;
        Ok(true)
    }

    /// Steps until every pending event later than `horizon` (or nothing
    /// at all) remains, then parks the clock at the horizon.
    pub fn step_until(&mut self, horizon: Time) -> Result<(), SimulationError> {
        loop {
            let next = self.event_table.top_time();
            if next.is_infinite() || next > horizon {
                break;
            }
            self.step()?;
        }
        if horizon.is_finite() && self.current_time < horizon {
            self.current_time = horizon;
        }
        Ok(())
    }

    /// Executes at most `n` ticks.
    pub fn step_n(&mut self, n: usize) -> Result<(), SimulationError> {
        for _ in 0..n {
            if !self.step()? {
                break;
            }
        }
        Ok(())
    }

    /// Terminates the run: dynamics finalizers, one observation per
    /// finish-view observable at the terminal time, then every writer is
    /// flushed and released.  A writer failure degrades its view and the
    /// first error is reported once all views have been closed.
    pub fn finish(&mut self) -> Result<(), SimulationError> {
        info!(time = %self.current_time, "finishing run");
        for simulator in self.simulators.values_mut() {
            simulator.finish();
        }
        let mut finish_targets: Vec<(String, SimulatorId, String)> = Vec::new();
        for view in self.views.values() {
            if !view.is_finish() {
                continue;
            }
            for (id, ports) in view.observables() {
                for port_name in ports {
                    finish_targets.push((view.name().to_string(), *id, port_name.clone()));
                }
            }
        }
        for (view_name, id, port_name) in finish_targets {
            let event = ObservationEvent::new(
                self.current_time,
                id,
                view_name.clone(),
                port_name,
            );
            let observed = match self.simulators.get(&id) {
                Some(simulator) => Some((
                    simulator.name().to_string(),
                    simulator.observation(&event)?,
                )),
                None => None,
            };
            let Some((model_name, value)) = observed else {
                continue;
            };
            if let Some(view) = self.views.get_mut(&view_name) {
                view.process_observation(&event, &model_name, value)?;
            }
        }
        let mut first_error = None;
        for view in self.views.values_mut() {
            if let Err(error) = view.finish(self.current_time) {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        self.deleted.clear();
        self.to_delete = 0;
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
