// src/exec/mod.rs

//! Build execution layer.
//!
//! - [`driver`] defines the [`BuildDriver`] trait, the options drivers
//!   receive, and the registry that maps `builder` names to drivers.
//! - [`shell`] and [`dry_run`] are the built-in drivers.
//! - [`command`], [`job`], [`worker`] and [`dispatcher`] form the bounded
//!   worker pool that runs builds independently of how many steps are ready.

pub mod command;
pub mod dispatcher;
pub mod driver;
pub mod dry_run;
pub mod job;
pub mod shell;
pub mod worker;

pub use command::{BuildCommand, Command};
pub use dispatcher::{DEFAULT_NUM_WORKERS, DEFAULT_QUEUE_CAPACITY, Dispatcher};
pub use driver::{BuildDriver, BuildDriverOptions, BuildFuture, DriverRegistry, RegistryAuth};
pub use dry_run::DryRunDriver;
pub use job::{Job, JobHandle};
pub use shell::ShellDriver;
pub use worker::Worker;
