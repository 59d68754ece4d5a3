//! Instruction-stream instrumentation engine.
//!
//! Turns an unprotected [`CompiledUnit`](warden_bytecode::CompiledUnit)
//! into one whose every shared-state mutation calls the runtime checker
//! first:
//!
//! - [`classify`] finds injection sites and resolves guard tags into
//!   pool-resident descriptors
//! - [`synthesize`] expands each site with a stack-neutral shuffle
//!   recipe around a checker invoke
//! - [`Instrumenter`] drives both passes per method with whole-unit
//!   atomicity and an outcome report
//! - [`UnitRepository`] holds every unit of a run for cross-unit field
//!   metadata lookup

pub mod classify;
pub mod driver;
pub mod error;
pub mod repository;
pub mod synthesize;

pub use classify::{classify, Check, ClassifyContext, InjectionSite, SiteKind};
pub use driver::{InstrumentOptions, Instrumenter, MethodOutcome, RewrittenUnit};
pub use error::InstrumentError;
pub use repository::UnitRepository;
pub use synthesize::{
    synthesize, CHECK_SYMBOL, GUARD_BY_FIELD_SYMBOL, GUARD_BY_THIS_SYMBOL, RUNTIME_UNIT,
};
