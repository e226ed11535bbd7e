//! Instructive model extensions exercising the kernel's protocol: a
//! differential-equation block with history buffering, thresholds and
//! gradient exchange, and a Petri-net block with several firing policies.

pub mod differential_equation;
pub mod petri_net;

pub use self::differential_equation::{DifferentialEquation, GradientFn, ThresholdDirection};
pub use self::petri_net::{PetriDynamics, PetriNet};
