// src/engine/mod.rs

//! Build orchestration engine.
//!
//! [`BuildService`] plans a build against the image graph, then drives every
//! step through its gate, the dispatcher and the build driver. Per-run knobs
//! live in [`BuildOptions`].

pub mod options;
pub mod service;

pub use options::BuildOptions;
pub use service::{BuildReport, BuildService, StepReport};
