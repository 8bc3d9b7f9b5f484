//! Real-time XPBD cloth constraint solver core.
//!
//! A [`BuildDesc`](build_desc::BuildDesc) describes initial state, topology,
//! and policy; [`Solver::create`](solver::Solver::create) validates and
//! cooks it into an immutable [`Model`](model::Model) plus mutable
//! [`Data`](data::Data), then [`Solver::step`](solver::Solver::step) advances
//! the simulation. Between steps, [`Command`](command::Command)s queued
//! through [`Solver::push_command`](solver::Solver::push_command) mutate
//! parameters, toggle operators, or (for structural changes) trigger a
//! recook -- but only take effect once the caller explicitly drains the
//! matching phase with [`Solver::flush_commands`](solver::Solver::flush_commands);
//! nothing here auto-flushes around `step`. Rendering, windowing, file I/O,
//! and language bindings are out of scope for this crate; see `DESIGN.md`
//! for what was kept, dropped, or added relative to the reference
//! implementation this core follows.

pub mod backend;
pub mod build_desc;
pub mod command;
pub mod cooking;
pub mod data;
pub mod error;
pub mod kernels;
pub mod model;
pub mod runtime;
pub mod scheduler;
pub mod solver;
pub mod storage;
pub mod telemetry;
pub mod validate;

pub use backend::{Capability, Chosen};
pub use build_desc::{BuildDesc, ExecPolicy, ParamValue, Parameters, Policy, SolvePolicy};
pub use command::{Command, Phase};
pub use error::{SolverError, SolverResult, Status};
pub use solver::Solver;
pub use telemetry::TelemetryFrame;
