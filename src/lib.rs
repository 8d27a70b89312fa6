// Copyright 2024 Cornell University
// released under MIT License

//! Symbolic execution of security protocols against a Dolev-Yao attacker,
//! with bounded exploration of interleavings and checking of secrecy and
//! (injective) correspondence queries.

pub mod config;
pub mod engine;
pub mod errors;
pub mod interpreter;
pub mod ir;
pub mod knowledge;
pub mod query;
pub mod scheduler;
pub mod serialize;
pub mod synthesis;
pub mod term;
pub mod trace;
pub mod typecheck;

pub use config::{Config, Strategy};
pub use engine::{evaluate_queries, load_specification, Engine, QueryVerdict, Report};
pub use errors::{EngineError, EngineResult, InvariantViolation, SpecificationError};
pub use query::{Bound, Verdict};
pub use term::{Name, Term};
pub use trace::{Culprit, Step, Witness};
