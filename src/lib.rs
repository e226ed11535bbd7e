//! # Overview
//! Devsim provides a discrete event simulation kernel implementing the
//! DEVS formalism.
//!
//! This repository contains:
//!
//! * A flat coordinator, for advancing simulated time, resolving each
//! tick's event bags and routing events between models.
//! * A time-ordered event table over the five event kinds.
//! * A simulator wrapper sequencing the DEVS phase functions of each
//! atomic model and enforcing their contract.
//! * Observation views (timed, event-driven, finish-only) streaming
//! records through an exchangeable writer boundary.
//! * A model factory instantiating dynamics from project descriptors.
//! * Two instructive extensions, a differential-equation block and a
//! Petri-net block, exercising the kernel's protocol.
pub mod coordinator;
pub mod dynamics;
pub mod events;
pub mod extensions;
pub mod factory;
pub mod graph;
pub mod project;
pub mod simulator;
pub mod time;
pub mod utils;
pub mod values;
pub mod views;
