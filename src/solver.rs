//! The opaque `Solver` handle: owns Model, Data, the per-phase command
//! queues, and cached telemetry. This is the one type the Shell (or an
//! embedding application) interacts with; everything else in this crate is
//! assembled on its behalf by `create`/`step`.

use std::time::Instant;

use crate::backend::{self, Chosen};
use crate::build_desc::BuildDesc;
use crate::command::{Command, CommandQueue, Phase};
use crate::cooking;
use crate::data::Data;
use crate::error::{SolverError, SolverResult};
use crate::model::Model;
use crate::runtime;
use crate::telemetry::{Telemetry, TelemetryFrame};
use crate::validate;

/// Coarse lifecycle state, mirroring the reference core's state machine.
/// Not a hard lock -- `push_command` is always legal -- but `step` refuses
/// to run while a structural rebuild from a previous flush hasn't settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Created,
    Applying,
    Stepping,
}

pub struct Solver {
    desc: BuildDesc,
    model: Model,
    data: Data,
    chosen: Chosen,
    before_frame: CommandQueue,
    after_solve: CommandQueue,
    telemetry: Telemetry,
    telemetry_enabled: bool,
    state: SolverState,
    applied_command_counter: u64,
    structural_rebuild_counter: u64,
}

impl Solver {
    /// Validates, cooks, and initializes a new Solver from `desc`.
    pub fn create(desc: BuildDesc) -> SolverResult<Solver> {
        validate::validate(&desc)?;
        let model = cooking::cook(&desc)?;
        let data = Data::from_build(&desc, &model)?;
        let chosen = backend::choose(&desc.policy, &model)?;
        let telemetry_enabled = desc.policy.exec.telemetry;
        Ok(Solver {
            desc,
            model,
            data,
            chosen,
            before_frame: CommandQueue::default(),
            after_solve: CommandQueue::default(),
            telemetry: Telemetry::default(),
            telemetry_enabled,
            state: SolverState::Created,
            applied_command_counter: 0,
            structural_rebuild_counter: 0,
        })
    }

    /// Queues `command` for the given phase. Never fails: malformed
    /// commands are rejected at flush time, not at enqueue time.
    pub fn push_command(&mut self, phase: Phase, command: Command) {
        match phase {
            Phase::BeforeFrame => self.before_frame.push(command),
            Phase::AfterSolve => self.after_solve.push(command),
        }
    }

    /// Applies every command queued for `phase` (`BeforeFrame` or
    /// `AfterSolve`). A structural command in the batch forces a full
    /// recook of `self.desc` and a `Data` remap before any small commands in
    /// the same batch are applied; this release's structural commands carry
    /// no topology payload of their own, so the recook reproduces the
    /// current topology with an identity remap. The caller drives the
    /// `flush(BeforeFrame) -> step -> flush(AfterSolve)` sequence; this
    /// crate never auto-flushes either queue.
    pub fn flush_commands(&mut self, phase: Phase) -> SolverResult<()> {
        self.state = SolverState::Applying;
        let queue = match phase {
            Phase::BeforeFrame => &mut self.before_frame,
            Phase::AfterSolve => &mut self.after_solve,
        };
        let commands = queue.drain();
        if commands.is_empty() {
            self.state = SolverState::Created;
            return Ok(());
        }

        let structural: Vec<&Command> = commands.iter().filter(|c| c.is_structural()).collect();
        if !structural.is_empty() {
            if phase == Phase::AfterSolve {
                return Err(SolverError::InvalidArgs("structural commands are not valid in the AfterSolve phase".into()));
            }
            log::debug!("structural command(s) queued, recooking model");
            let started = Instant::now();
            let (model, remap) = cooking::rebuild(&self.desc)?;
            let mut data = self.data.apply_remap(&remap, model.node_count as usize);
            data.resize_edges(model.edge_count());
            self.data = data;
            self.model = model;
            self.chosen = backend::choose(&self.desc.policy, &self.model)?;
            self.structural_rebuild_counter += 1;
            if self.telemetry_enabled {
                self.telemetry.record_rebuild(started.elapsed());
            }
        }

        let applied = commands.len() as u64;
        let small: Vec<Command> = commands.into_iter().filter(|c| !c.is_structural()).collect();
        self.data.apply_overrides(&small)?;
        self.applied_command_counter += applied;
        if self.telemetry_enabled {
            self.telemetry.set_counters(self.applied_command_counter, self.structural_rebuild_counter);
        }
        self.state = SolverState::Created;
        Ok(())
    }

    /// Advances the simulation by `dt`. Per SPEC_FULL §5, this crate never
    /// auto-flushes either command queue: the caller is responsible for the
    /// `flush_commands(BeforeFrame) -> step -> flush_commands(AfterSolve)`
    /// sequence. Returns the telemetry recorded for this frame.
    pub fn step(&mut self, dt: f32) -> SolverResult<TelemetryFrame> {
        self.state = SolverState::Stepping;

        let started = Instant::now();
        let stats = runtime::step(&self.model, &mut self.data, self.chosen, dt);
        let elapsed = started.elapsed();
        if self.telemetry_enabled {
            self.telemetry.record_step(elapsed, stats.residual, stats.substeps_used, stats.iterations_used);
        }

        self.state = SolverState::Created;
        Ok(self.telemetry.latest)
    }

    pub fn telemetry_query_frame(&self) -> TelemetryFrame {
        self.telemetry.latest
    }

    pub fn query_chosen(&self) -> Chosen {
        self.chosen
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Copies current positions (`x`, not the in-flight predicted `p`) into
    /// `out`, laid out as `[x0, y0, z0, x1, y1, z1, ...]`. `max_count == 0`
    /// copies every node; otherwise at most `max_count` nodes are copied.
    /// Fails if `out` is too small for the nodes that would be written.
    /// Returns the number of nodes actually written.
    pub fn copy_positions(&self, out: &mut [f32], max_count: usize) -> SolverResult<usize> {
        let n = self.model.node_count as usize;
        let n = if max_count == 0 { n } else { n.min(max_count) };
        if out.len() < n * 3 {
            return Err(SolverError::InvalidArgs(format!("output buffer has {} floats, need at least {}", out.len(), n * 3)));
        }
        for i in 0..n {
            out[i * 3] = self.data.x[i];
            out[i * 3 + 1] = self.data.y[i];
            out[i * 3 + 2] = self.data.z[i];
        }
        Ok(n)
    }

    /// Lists the (backend, layout) combinations this build of the crate can
    /// run, independent of any particular Solver instance.
    pub fn enumerate_capabilities() -> Vec<backend::Capability> {
        backend::enumerate()
    }

    /// Consumes the Solver. A no-op beyond ordinary drop semantics; exists
    /// for API parity with the reference core's explicit `destroy` call.
    pub fn destroy(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_desc::{FieldView, ParamValue, RelationView};

    fn two_node_desc() -> BuildDesc {
        let mut desc = BuildDesc::default();
        desc.topology.node_count = 2;
        desc.state.fields.push(FieldView::vec3("position", vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]));
        desc.topology.relations.push(RelationView::edges(&[(0, 1)]));
        desc.parameters.set("gravity_y", ParamValue::F32(0.0));
        desc
    }

    #[test]
    fn create_then_step_succeeds() {
        crate::cooking::clear_cache();
        let mut solver = Solver::create(two_node_desc()).unwrap();
        let frame = solver.step(1.0 / 60.0).unwrap();
        assert!(frame.residual.is_finite());
    }

    #[test]
    fn copy_positions_reflects_committed_x_not_in_flight_prediction() {
        crate::cooking::clear_cache();
        let mut solver = Solver::create(two_node_desc()).unwrap();
        solver.step(1.0 / 60.0).unwrap();
        let mut out = vec![0.0f32; 6];
        let written = solver.copy_positions(&mut out, 0).unwrap();
        assert_eq!(written, 2);
        assert_eq!(out[0], solver.data.x[0]);
    }

    #[test]
    fn copy_positions_rejects_undersized_buffer() {
        crate::cooking::clear_cache();
        let solver = Solver::create(two_node_desc()).unwrap();
        let mut out = vec![0.0f32; 2];
        assert!(solver.copy_positions(&mut out, 0).is_err());
    }

    #[test]
    fn copy_positions_honors_max_count_cap() {
        crate::cooking::clear_cache();
        let solver = Solver::create(two_node_desc()).unwrap();
        let mut out = vec![0.0f32; 6];
        let written = solver.copy_positions(&mut out, 1).unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn set_param_command_takes_effect_after_explicit_flush() {
        crate::cooking::clear_cache();
        let mut solver = Solver::create(two_node_desc()).unwrap();
        solver.push_command(Phase::BeforeFrame, Command::SetParam { name: "damping".into(), value: ParamValue::F32(0.5) });
        solver.flush_commands(Phase::BeforeFrame).unwrap();
        solver.step(1.0 / 60.0).unwrap();
        assert_eq!(solver.data.params.damping, 0.5);
    }

    #[test]
    fn after_solve_commands_are_not_applied_until_explicit_flush() {
        crate::cooking::clear_cache();
        let mut solver = Solver::create(two_node_desc()).unwrap();
        solver.push_command(Phase::AfterSolve, Command::SetParam { name: "damping".into(), value: ParamValue::F32(0.5) });
        solver.step(1.0 / 60.0).unwrap();
        assert_eq!(solver.data.params.damping, 0.0);
        solver.flush_commands(Phase::AfterSolve).unwrap();
        assert_eq!(solver.data.params.damping, 0.5);
    }

    #[test]
    fn structural_after_solve_command_is_rejected() {
        crate::cooking::clear_cache();
        let mut solver = Solver::create(two_node_desc()).unwrap();
        solver.push_command(Phase::AfterSolve, Command::AddNodes { count: 1 });
        solver.step(1.0 / 60.0).unwrap();
        assert!(solver.flush_commands(Phase::AfterSolve).is_err());
    }

    #[test]
    fn enumerate_capabilities_is_nonempty() {
        assert!(!Solver::enumerate_capabilities().is_empty());
    }
}
