use devsim::coordinator::{Coordinator, Services};
use devsim::dynamics::{ConfluentOrder, Dynamics, InitEventList};
use devsim::events::{ExternalEvent, ObservationEvent, OutputMessage, RequestEvent};
use devsim::extensions::DifferentialEquation;
use devsim::factory::ModelFactory;
use devsim::graph::{AtomicModel, Connector};
use devsim::project::{
    AtomicSpec, Condition, DynamicsSpec, Experiment, Observable, Output, OutputFormat, Project,
    ViewSpec,
};
use devsim::time::Time;
use devsim::utils::errors::SimulationError;
use devsim::values::Value;
use devsim::views::MemoryStreamWriter;

// A generator that releases one numbered tick per unit of simulated time.
#[derive(Debug, Clone, Default)]
struct Generator {
    count: i64,
}

impl Dynamics for Generator {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        self.count = 0;
        Ok(Time::new(1.0))
    }

    fn time_advance(&self) -> Time {
        Time::new(1.0)
    }

    fn output(&self, _time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        Ok(vec![OutputMessage::new("tick")
            .with_attribute("count", Value::Int(self.count + 1))])
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        self.count += 1;
        Ok(())
    }

    fn external_transition(
        &mut self,
        _events: &[ExternalEvent],
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        match event.port_name() {
            "count" => Ok(Some(Value::Int(self.count))),
            _ => Ok(None),
        }
    }
}

fn generator_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(Generator::default()))
}

// A passive accumulator summing the counters it receives.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    sum: i64,
}

impl Dynamics for Accumulator {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        self.sum = 0;
        Ok(Time::INFINITY)
    }

    fn time_advance(&self) -> Time {
        Time::INFINITY
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        for event in events {
            self.sum += event.int_attribute("count")?;
        }
        Ok(())
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        match event.port_name() {
            "sum" => Ok(Some(Value::Int(self.sum))),
            _ => Ok(None),
        }
    }
}

fn accumulator_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(Accumulator::default()))
}

// Fires two internals at t=1 while exchanging pings with its peer, so the
// second bag carries an internal and an external at the same instant.
#[derive(Debug, Clone)]
struct CollisionProbe {
    order: ConfluentOrder,
    phase: u8,
    log: Vec<String>,
}

impl CollisionProbe {
    fn new(order: ConfluentOrder) -> Self {
        Self {
            order,
            phase: 0,
            log: Vec::new(),
        }
    }
}

impl Dynamics for CollisionProbe {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        Ok(Time::new(1.0))
    }

    fn time_advance(&self) -> Time {
        match self.phase {
            0 => Time::new(1.0),
            1 => Time::ZERO,
            _ => Time::INFINITY,
        }
    }

    fn output(&self, _time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        if self.phase < 2 {
            Ok(vec![OutputMessage::new("ping")])
        } else {
            Ok(Vec::new())
        }
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        self.log.push("internal".to_string());
        self.phase += 1;
        Ok(())
    }

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        self.log.push(format!("external:{}", events.len()));
        Ok(())
    }

    fn confluent_transitions(&self, _time: Time, _events: &[ExternalEvent]) -> ConfluentOrder {
        self.order
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        match event.port_name() {
            "log" => Ok(Some(Value::String(self.log.join(",")))),
            _ => Ok(None),
        }
    }
}

fn external_first_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(CollisionProbe::new(ConfluentOrder::External)))
}

fn internal_first_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(CollisionProbe::new(ConfluentOrder::Internal)))
}

// Emits a farewell at t=1 and deletes itself during the transition.
#[derive(Debug, Clone, Default)]
struct Quitter;

impl Dynamics for Quitter {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        Ok(Time::new(1.0))
    }

    fn time_advance(&self) -> Time {
        Time::new(1.0)
    }

    fn output(&self, _time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        Ok(vec![
            OutputMessage::new("tick").with_attribute("count", Value::Int(1))
        ])
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        services: &mut Services,
    ) -> Result<(), SimulationError> {
        services.del_model("quitter");
        Ok(())
    }

    fn external_transition(
        &mut self,
        _events: &[ExternalEvent],
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        Ok(())
    }
}

fn quitter_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(Quitter))
}

// Answers requests with a constant reading.
#[derive(Debug, Clone, Default)]
struct Responder;

impl Dynamics for Responder {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        Ok(Time::INFINITY)
    }

    fn time_advance(&self) -> Time {
        Time::INFINITY
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    fn external_transition(
        &mut self,
        _events: &[ExternalEvent],
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    fn request(
        &self,
        _event: &RequestEvent,
        _time: Time,
    ) -> Result<Vec<OutputMessage>, SimulationError> {
        Ok(vec![
            OutputMessage::new("response").with_attribute("value", Value::Int(42))
        ])
    }
}

fn responder_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(Responder))
}

// Issues one request at t=1 and records the responses it gets back.
#[derive(Debug, Clone, Default)]
struct Requester {
    responses: Vec<i64>,
    asked: bool,
}

impl Dynamics for Requester {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        Ok(Time::new(1.0))
    }

    fn time_advance(&self) -> Time {
        if self.asked {
            Time::INFINITY
        } else {
            Time::new(1.0)
        }
    }

    fn output(&self, _time: Time) -> Result<Vec<OutputMessage>, SimulationError> {
        if self.asked {
            Ok(Vec::new())
        } else {
            Ok(vec![OutputMessage::request("query")])
        }
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        self.asked = true;
        Ok(())
    }

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        for event in events {
            self.responses.push(event.int_attribute("value")?);
        }
        Ok(())
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        match event.port_name() {
            "responses" => Ok(Some(Value::Int(self.responses.len() as i64))),
            _ => Ok(None),
        }
    }
}

fn requester_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(Requester::default()))
}

// Collects every event it receives, with arrival times.
#[derive(Debug, Clone, Default)]
struct Collector {
    received: Vec<(f64, String)>,
}

impl Dynamics for Collector {
    fn init(&mut self, _time: Time) -> Result<Time, SimulationError> {
        Ok(Time::INFINITY)
    }

    fn time_advance(&self) -> Time {
        Time::INFINITY
    }

    fn internal_transition(
        &mut self,
        _time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        Ok(())
    }

    fn external_transition(
        &mut self,
        events: &[ExternalEvent],
        time: Time,
        _services: &mut Services,
    ) -> Result<(), SimulationError> {
        for event in events {
            let label = event
                .string_attribute("name")
                .map(|name| name.to_string())
                .unwrap_or_else(|_| event.target_port().to_string());
            self.received.push((time.as_f64(), label));
        }
        Ok(())
    }

    fn observation(&self, event: &ObservationEvent) -> Result<Option<Value>, SimulationError> {
        match event.port_name() {
            "received" => Ok(Some(Value::Set(
                self.received
                    .iter()
                    .map(|(time, label)| {
                        Value::Tuple(vec![
                            Value::Double(*time),
                            Value::String(label.clone()),
                        ])
                    })
                    .collect(),
            ))),
            _ => Ok(None),
        }
    }
}

fn collector_constructor(
    _model: &AtomicModel,
    _events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(Collector::default()))
}

fn unit_gradient(_equation: &DifferentialEquation, _time: Time) -> f64 {
    1.0
}

fn unit_growth_constructor(
    model: &AtomicModel,
    events: &InitEventList,
) -> Result<Box<dyn Dynamics>, SimulationError> {
    Ok(Box::new(DifferentialEquation::new(
        model,
        events,
        unit_gradient,
    )?))
}

fn memory_records(coordinator: &Coordinator, view: &str) -> Vec<(f64, Option<Value>)> {
    coordinator
        .view(view)
        .unwrap()
        .writer()
        .as_any()
        .downcast_ref::<MemoryStreamWriter>()
        .unwrap()
        .records()
        .iter()
        .map(|record| (record.time(), record.value().cloned()))
        .collect()
}

fn observe(coordinator: &Coordinator, model: &str, port: &str) -> Option<Value> {
    let id = coordinator.model_id(model).unwrap();
    let simulator = coordinator.simulator(id).unwrap();
    let event = ObservationEvent::new(
        coordinator.current_time(),
        id,
        String::new(),
        port.to_string(),
    );
    simulator.observation(&event).unwrap()
}

#[test]
fn empty_run_is_a_no_op() {
    let mut project = Project::new(Experiment::new("empty", 0.0, 10.0));
    project.add_output(Output::new("records", OutputFormat::Memory));
    project.add_view(ViewSpec::timed("samples", 1.0, "records"));
    let factory = ModelFactory::new(&project);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    assert!(coordinator.next_time().is_infinite());
    assert!(!coordinator.step().unwrap());
    coordinator.finish().unwrap();
    let writer = coordinator
        .view("samples")
        .unwrap()
        .writer()
        .as_any()
        .downcast_ref::<MemoryStreamWriter>()
        .unwrap();
    assert!(writer.records().is_empty());
    assert_eq!(writer.closed_at(), Some(Time::ZERO));
}

#[test]
fn single_generator_timed_view() {
    let mut project = Project::new(Experiment::new("generator", 0.0, 5.0));
    project.add_dynamics(DynamicsSpec::new("Generator", "Generator"));
    project.add_output(Output::new("records", OutputFormat::Memory));
    project.add_view(ViewSpec::timed("count-view", 1.0, "records").with_begin(1.0));
    project.add_observable(Observable::new("counting").with_port("count", "count-view"));
    project.add_model(
        AtomicSpec::new(
            AtomicModel::new("generator-01", "root").with_ports(&[], &["tick"]),
            "Generator",
        )
        .with_observables("counting"),
    );
    let mut factory = ModelFactory::new(&project);
    factory.register("Generator", generator_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator.step_until(Time::new(5.0)).unwrap();
    coordinator.finish().unwrap();
    let records = memory_records(&coordinator, "count-view");
    let expected: Vec<(f64, Option<Value>)> = (1..=5)
        .map(|step| (step as f64, Some(Value::Int(step))))
        .collect();
    assert_eq!(records, expected);
}

#[test]
fn generator_feeds_accumulator() {
    let mut project = Project::new(Experiment::new("pipeline", 0.0, 5.0));
    project.add_dynamics(DynamicsSpec::new("Generator", "Generator"));
    project.add_dynamics(DynamicsSpec::new("Accumulator", "Accumulator"));
    project.add_output(Output::new("sums", OutputFormat::Memory));
    project.add_output(Output::new("course", OutputFormat::Memory));
    project.add_view(ViewSpec::finish("final-sum", "sums"));
    project.add_view(ViewSpec::event("sum-course", "course"));
    project.add_observable(
        Observable::new("summing")
            .with_port("sum", "final-sum")
            .with_port("sum", "sum-course"),
    );
    project.add_model(AtomicSpec::new(
        AtomicModel::new("generator-01", "root").with_ports(&[], &["tick"]),
        "Generator",
    ));
    project.add_model(
        AtomicSpec::new(
            AtomicModel::new("consumer-01", "root").with_ports(&["in"], &[]),
            "Accumulator",
        )
        .with_observables("summing"),
    );
    project.add_connector(Connector::new(
        "connector-01".to_string(),
        "generator-01".to_string(),
        "consumer-01".to_string(),
        "tick".to_string(),
        "in".to_string(),
    ));
    let mut factory = ModelFactory::new(&project);
    factory.register("Generator", generator_constructor);
    factory.register("Accumulator", accumulator_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator.step_until(Time::new(5.0)).unwrap();
    coordinator.finish().unwrap();
    // 1+2+3+4+5, pulled once at the terminal time by the finish view
    let finals = memory_records(&coordinator, "final-sum");
    assert_eq!(finals, vec![(5.0, Some(Value::Int(15)))]);
    // the event view pushed once per external transition
    let course = memory_records(&coordinator, "sum-course");
    let expected: Vec<(f64, Option<Value>)> = [1, 3, 6, 10, 15]
        .iter()
        .enumerate()
        .map(|(index, sum)| ((index + 1) as f64, Some(Value::Int(*sum))))
        .collect();
    assert_eq!(course, expected);
}

#[test]
fn confluent_collision_preserves_both_paths() {
    let mut project = Project::new(Experiment::new("collision", 0.0, 2.0));
    project.add_dynamics(DynamicsSpec::new("ExternalFirst", "ExternalFirst"));
    project.add_dynamics(DynamicsSpec::new("InternalFirst", "InternalFirst"));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("alpha", "root").with_ports(&["in"], &["ping"]),
        "ExternalFirst",
    ));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("beta", "root").with_ports(&["in"], &["ping"]),
        "InternalFirst",
    ));
    project.add_connector(Connector::new(
        "connector-01".to_string(),
        "alpha".to_string(),
        "beta".to_string(),
        "ping".to_string(),
        "in".to_string(),
    ));
    project.add_connector(Connector::new(
        "connector-02".to_string(),
        "beta".to_string(),
        "alpha".to_string(),
        "ping".to_string(),
        "in".to_string(),
    ));
    let mut factory = ModelFactory::new(&project);
    factory.register("ExternalFirst", external_first_constructor);
    factory.register("InternalFirst", internal_first_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator.step_until(Time::new(2.0)).unwrap();
    coordinator.finish().unwrap();
    let alpha_log = observe(&coordinator, "alpha", "log").unwrap();
    let beta_log = observe(&coordinator, "beta", "log").unwrap();
    // alpha resolves the collision external-first, beta internal-first;
    // every ping is accounted for on both sides
    assert_eq!(
        alpha_log,
        Value::String("internal,external:1,internal,external:1".to_string())
    );
    assert_eq!(
        beta_log,
        Value::String("internal,internal,external:1,external:1".to_string())
    );
}

#[test]
fn threshold_crossing_emits_between_bracketing_samples() {
    let mut project = Project::new(Experiment::new("growth", 0.0, 6.0));
    project.add_dynamics(DynamicsSpec::new("UnitGrowth", "UnitGrowth"));
    project.add_dynamics(DynamicsSpec::new("Collector", "Collector"));
    let mut thresholds = std::collections::BTreeMap::new();
    thresholds.insert(
        "limit".to_string(),
        Value::Set(vec![Value::Double(3.0), Value::String("up".to_string())]),
    );
    project.add_condition(
        Condition::new("growth-setup")
            .with_value("name", Value::String("x".to_string()))
            .with_value("value", Value::Double(0.0))
            .with_value("dependance", Value::Bool(false))
            .with_value("timestep", Value::Double(0.4))
            .with_value("thresholds", Value::Map(thresholds)),
    );
    project.add_output(Output::new("curve", OutputFormat::Memory));
    project.add_view(ViewSpec::timed("x-view", 1.0, "curve").with_begin(1.0));
    project.add_observable(Observable::new("tracking").with_port("x", "x-view"));
    project.add_model(
        AtomicSpec::new(
            AtomicModel::new("integrator", "root")
                .with_ports(&["update", "perturb"], &["update", "threshold"]),
            "UnitGrowth",
        )
        .with_conditions(&["growth-setup"])
        .with_observables("tracking"),
    );
    project.add_model(AtomicSpec::new(
        AtomicModel::new("watcher", "root").with_ports(&["in"], &[]),
        "Collector",
    ));
    project.add_connector(Connector::new(
        "connector-01".to_string(),
        "integrator".to_string(),
        "watcher".to_string(),
        "threshold".to_string(),
        "in".to_string(),
    ));
    let mut factory = ModelFactory::new(&project);
    factory.register("UnitGrowth", unit_growth_constructor);
    factory.register("Collector", collector_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator.step_until(Time::new(6.0)).unwrap();
    coordinator.finish().unwrap();
    // the threshold fires once, at the sample where x first reaches 3.0
    let received = observe(&coordinator, "watcher", "received").unwrap();
    let received = match received {
        Value::Set(values) => values,
        other => panic!("expected a set, found {:?}", other),
    };
    assert_eq!(received.len(), 1);
    let entry = received[0].as_tuple().unwrap();
    let crossing_time = entry[0].as_double().unwrap();
    // between the samples bracketing x = 3.0
    assert!(crossing_time > 2.8 && crossing_time < 3.61);
    assert_eq!(entry[1], Value::String("limit".to_string()));
    // the timed view tracked x(t) = t
    let curve = memory_records(&coordinator, "x-view");
    assert_eq!(curve.len(), 6);
    for (index, (time, value)) in curve.iter().enumerate() {
        assert_eq!(*time, (index + 1) as f64);
        let Some(Value::Double(sample)) = value else {
            panic!("expected a double sample");
        };
        assert!((sample - time).abs() < 1.0e-9);
    }
}

#[test]
fn executive_self_deletion_is_two_phase() {
    let mut project = Project::new(Experiment::new("deletion", 0.0, 3.0));
    project.add_dynamics(DynamicsSpec::new("Quitter", "Quitter"));
    project.add_dynamics(DynamicsSpec::new("Accumulator", "Accumulator"));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("quitter", "root").with_ports(&[], &["tick"]),
        "Quitter",
    ));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("survivor", "root").with_ports(&["in"], &[]),
        "Accumulator",
    ));
    project.add_connector(Connector::new(
        "connector-01".to_string(),
        "quitter".to_string(),
        "survivor".to_string(),
        "tick".to_string(),
        "in".to_string(),
    ));
    let mut factory = ModelFactory::new(&project);
    factory.register("Quitter", quitter_constructor);
    factory.register("Accumulator", accumulator_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator.step_until(Time::new(3.0)).unwrap();
    // the farewell produced at the deletion tick was still delivered
    assert_eq!(observe(&coordinator, "survivor", "sum"), Some(Value::Int(1)));
    // the simulator is gone and nothing referencing it remains scheduled
    assert!(coordinator.model_id("quitter").is_err());
    assert!(coordinator.next_time().is_infinite());
    coordinator.finish().unwrap();
}

#[test]
fn request_gets_a_synchronous_response() {
    let mut project = Project::new(Experiment::new("probe", 0.0, 2.0));
    project.add_dynamics(DynamicsSpec::new("Requester", "Requester"));
    project.add_dynamics(DynamicsSpec::new("Responder", "Responder"));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("asker", "root").with_ports(&["in"], &["query"]),
        "Requester",
    ));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("oracle", "root").with_ports(&["query"], &["response"]),
        "Responder",
    ));
    project.add_connector(Connector::new(
        "connector-01".to_string(),
        "asker".to_string(),
        "oracle".to_string(),
        "query".to_string(),
        "query".to_string(),
    ));
    project.add_connector(Connector::new(
        "connector-02".to_string(),
        "oracle".to_string(),
        "asker".to_string(),
        "response".to_string(),
        "in".to_string(),
    ));
    let mut factory = ModelFactory::new(&project);
    factory.register("Requester", requester_constructor);
    factory.register("Responder", responder_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator.step_until(Time::new(2.0)).unwrap();
    coordinator.finish().unwrap();
    assert_eq!(
        observe(&coordinator, "asker", "responses"),
        Some(Value::Int(1))
    );
}

#[test]
fn init_then_finish_emits_the_initial_timed_observation() {
    let mut project = Project::new(Experiment::new("idle", 0.0, 10.0));
    project.add_dynamics(DynamicsSpec::new("Accumulator", "Accumulator"));
    project.add_output(Output::new("records", OutputFormat::Memory));
    project.add_view(ViewSpec::timed("sum-view", 2.0, "records"));
    project.add_observable(Observable::new("summing").with_port("sum", "sum-view"));
    project.add_model(
        AtomicSpec::new(
            AtomicModel::new("consumer-01", "root").with_ports(&["in"], &[]),
            "Accumulator",
        )
        .with_observables("summing"),
    );
    let mut factory = ModelFactory::new(&project);
    factory.register("Accumulator", accumulator_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    // no transitions are pending; the only event is the view's first poll
    coordinator.step_until(Time::ZERO).unwrap();
    coordinator.finish().unwrap();
    let records = memory_records(&coordinator, "sum-view");
    assert_eq!(records, vec![(0.0, Some(Value::Int(0)))]);
}

#[test]
fn internal_events_stay_unique_and_consistent() {
    let mut project = Project::new(Experiment::new("invariants", 0.0, 4.0));
    project.add_dynamics(DynamicsSpec::new("Generator", "Generator"));
    project.add_model(AtomicSpec::new(
        AtomicModel::new("generator-01", "root").with_ports(&[], &["tick"]),
        "Generator",
    ));
    let mut factory = ModelFactory::new(&project);
    factory.register("Generator", generator_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    let id = coordinator.model_id("generator-01").unwrap();
    let mut previous = coordinator.current_time();
    for _ in 0..4 {
        assert!(coordinator.step().unwrap());
        // ticks never move backwards
        assert!(coordinator.current_time() >= previous);
        previous = coordinator.current_time();
        // at most one internal event per simulator between ticks
        assert!(coordinator.event_table().count_internal(id) <= 1);
        // the rescheduled internal sits at t + time_advance
        let simulator = coordinator.simulator(id).unwrap();
        assert_eq!(
            simulator.next_time(),
            coordinator.current_time() + Time::new(1.0)
        );
        // output is pure: two consecutive calls agree
        let first = simulator.output(coordinator.current_time()).unwrap();
        let second = simulator.output(coordinator.current_time()).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.port_name(), b.port_name());
            assert_eq!(a.attributes(), b.attributes());
        }
    }
}

#[test]
fn project_round_trips_through_yaml() {
    let source = r#"
experiment:
  name: demo
  begin: 0.0
  duration: 5.0
dynamics:
  - name: Generator
    library: Generator
outputs:
  - name: records
    format: memory
views:
  - name: count-view
    viewType: timed
    timestep: 1.0
    begin: 1.0
    output: records
observables:
  - name: counting
    ports:
      count:
        - count-view
model:
  - model:
      name: generator-01
      parent: root
      portsIn: []
      portsOut:
        - tick
    dynamics: Generator
    observables: counting
"#;
    let project = Project::from_yaml(source).unwrap();
    assert_eq!(project.experiment().name(), "demo");
    let mut factory = ModelFactory::new(&project);
    factory.register("Generator", generator_constructor);
    let mut coordinator = Coordinator::new(&project, factory).unwrap();
    coordinator
        .step_until(Time::new(project.experiment().duration()))
        .unwrap();
    coordinator.finish().unwrap();
    let records = memory_records(&coordinator, "count-view");
    assert_eq!(records.len(), 5);
    assert_eq!(records[4], (5.0, Some(Value::Int(5))));
}
