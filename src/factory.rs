//! The model factory instantiates dynamics for atomic models from the
//! project's descriptor catalog.  Constructors are plain functions keyed
//! by library name; the built-in extensions are pre-registered and user
//! models register at runtime.  Instantiation is deterministic: the same
//! descriptors and conditions always produce the same dynamics.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::dynamics::{Dynamics, InitEventList};
use crate::extensions::PetriNet;
use crate::graph::AtomicModel;
use crate::project::{Condition, DynamicsSpec, Observable, Project};
use crate::utils::errors::SimulationError;

pub type DynamicsConstructor =
    fn(&AtomicModel, &InitEventList) -> Result<Box<dyn Dynamics>, SimulationError>;

lazy_static! {
    static ref BUILTIN_CONSTRUCTORS: HashMap<&'static str, DynamicsConstructor> = {
        let mut m = HashMap::new();
        m.insert("PetriNet", PetriNet::from_init as DynamicsConstructor);
        m
    };
}

/// Catalog of named dynamics, conditions and observables, plus the
/// constructor registry that turns descriptors into `Dynamics` instances.
pub struct ModelFactory {
    constructors: HashMap<String, DynamicsConstructor>,
    dynamics: HashMap<String, DynamicsSpec>,
    conditions: HashMap<String, Condition>,
    observables: HashMap<String, Observable>,
}

impl ModelFactory {
    /// Builds a factory over the project's descriptor catalog, with the
    /// built-in constructors pre-registered.
    pub fn new(project: &Project) -> Self {
        let constructors = BUILTIN_CONSTRUCTORS
            .iter()
            .map(|(name, constructor)| (name.to_string(), *constructor))
            .collect();
        let mut factory = Self {
            constructors,
            dynamics: HashMap::new(),
            conditions: HashMap::new(),
            observables: HashMap::new(),
        };
        for spec in project.dynamics() {
            factory.add_permanent_dynamics(spec.clone());
        }
        for condition in project.conditions() {
            factory.add_permanent_condition(condition.clone());
        }
        for observable in project.observables() {
            factory.add_permanent_observable(observable.clone());
        }
        factory
    }

    /// Registers a constructor under a library name.  User dynamics call
    /// this before the coordinator is built.
    pub fn register(&mut self, library: &str, constructor: DynamicsConstructor) {
        self.constructors.insert(library.to_string(), constructor);
    }

    pub fn add_permanent_dynamics(&mut self, spec: DynamicsSpec) {
        self.dynamics.insert(spec.name().to_string(), spec);
    }

    pub fn add_permanent_condition(&mut self, condition: Condition) {
        self.conditions.insert(condition.name().to_string(), condition);
    }

    pub fn add_permanent_observable(&mut self, observable: Observable) {
        self.observables
            .insert(observable.name().to_string(), observable);
    }

    pub fn observable(&self, name: &str) -> Result<&Observable, SimulationError> {
        self.observables
            .get(name)
            .ok_or_else(|| SimulationError::ObservableNotFound {
                name: name.to_string(),
            })
    }

    /// Instantiates the named dynamics for an atomic model, with the
    /// listed conditions merged into its init list.  Later conditions
    /// override earlier ones, first value per port.
    pub fn create_dynamics(
        &self,
        dynamics_name: &str,
        model: &AtomicModel,
        conditions: &[String],
    ) -> Result<Box<dyn Dynamics>, SimulationError> {
        let spec =
            self.dynamics
                .get(dynamics_name)
                .ok_or_else(|| SimulationError::DynamicsNotFound {
                    name: dynamics_name.to_string(),
                })?;
        let constructor = self.constructors.get(spec.library()).ok_or_else(|| {
            SimulationError::DynamicsNotFound {
                name: spec.library().to_string(),
            }
        })?;
        let mut init = InitEventList::default();
        for condition_name in conditions {
            let condition = self.conditions.get(condition_name).ok_or_else(|| {
                SimulationError::ConditionNotFound {
                    name: condition_name.to_string(),
                }
            })?;
            let values = condition.first_values();
            for (name, value) in values.iter() {
                init.insert(name, value.clone());
            }
        }
        constructor(model, &init)
    }
}
