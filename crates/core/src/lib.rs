//! kcfp-core
//!
//! Build-time control-flow protection for AArch64 kernel images.
//!
//! This crate holds the disassembly model (corpus), the instruction codec, the
//! image accessor, the JOPP/ROPP rewrite engine and the validator that checks
//! its output. Frontends only gather inputs and print results.

pub mod codec;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod image;
pub mod model;
pub mod policy;
pub mod services;
pub mod validate;

pub use config::{ConfigError, KernelConfig, ProtectionConfig};
pub use corpus::Corpus;
pub use engine::{Engine, EngineOutcome, InstrumentScope};
pub use error::{CfpError, CfpResult};
pub use policy::SkipPolicy;
pub use validate::{ValidationReport, Validator};

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
