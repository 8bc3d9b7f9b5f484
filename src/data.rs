//! The mutable Data store: positions, velocities, predicted positions, per-
//! node masses and attachment state, per-edge Lagrange multipliers and
//! compliance, and the scalar solver parameters. Everything here is owned,
//! flat SoA storage; layout-specific views ([`crate::storage`]) are built on
//! top of these arrays at `step` time, never stored themselves.

use crate::build_desc::{BuildDesc, ParamValue};
use crate::command::Command;
use crate::error::{SolverError, SolverResult};
use crate::model::Model;

const POSITION_ALIASES: [&str; 3] = ["position", "pos", "positions"];
const VELOCITY_ALIASES: [&str; 3] = ["velocity", "vel", "velocities"];
const INV_MASS_ALIASES: [&str; 2] = ["inv_mass", "inverse_mass"];
const ATTACH_WEIGHT_ALIASES: [&str; 2] = ["attach_weight", "attachment_weight"];
const ATTACH_TARGET_ALIASES: [&str; 2] = ["attach_target", "attachment_target"];

/// Scalar solver parameters read from `BuildDesc.parameters`, with the
/// same defaults `SolvePolicy`/gravity use elsewhere in the core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    pub gravity: (f32, f32, f32),
    pub dt: f32,
    pub substeps: u32,
    pub iterations: u32,
    pub damping: f32,
    pub distance_compliance: f32,
    pub warmstart: bool,
    pub warmstart_decay: f32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            gravity: (0.0, -9.8, 0.0),
            dt: 1.0 / 60.0,
            substeps: 1,
            iterations: 8,
            damping: 0.0,
            distance_compliance: 0.0,
            warmstart: false,
            warmstart_decay: 0.0,
        }
    }
}

/// The full mutable simulation state for one Solver instance.
#[derive(Debug, Clone)]
pub struct Data {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,
    pub vz: Vec<f32>,
    pub px: Vec<f32>,
    pub py: Vec<f32>,
    pub pz: Vec<f32>,
    pub inv_mass: Vec<f32>,
    pub attach_weight: Vec<f32>,
    pub attach_target_x: Vec<f32>,
    pub attach_target_y: Vec<f32>,
    pub attach_target_z: Vec<f32>,

    pub lambda: Vec<f32>,
    /// Per-edge override compliance; only meaningful where `has_override`.
    pub compliance_override: Vec<f32>,
    pub has_override: Vec<bool>,
    /// Recomputed every substep from either the global or per-edge override
    /// compliance and the current substep `dt`.
    pub alpha_tilde: Vec<f32>,

    pub distance_enabled: bool,
    pub bending_enabled: bool,
    pub attachment_enabled: bool,

    pub params: Params,
}

impl Data {
    /// Builds a fresh Data store from a validated BuildDesc and its cooked
    /// Model. `desc` must already have passed [`crate::validate::validate`].
    pub fn from_build(desc: &BuildDesc, model: &Model) -> SolverResult<Data> {
        let n = model.node_count as usize;
        let edge_count = model.edge_count();

        let position = desc
            .state
            .find(&POSITION_ALIASES)
            .ok_or_else(|| SolverError::ValidationFailed("missing \"position\" field".into()))?;
        let mut x = vec![0.0f32; n];
        let mut y = vec![0.0f32; n];
        let mut z = vec![0.0f32; n];
        for i in 0..n {
            x[i] = position.component(i, 0);
            y[i] = position.component(i, 1);
            z[i] = position.component(i, 2);
        }

        let (mut vx, mut vy, mut vz) = (vec![0.0f32; n], vec![0.0f32; n], vec![0.0f32; n]);
        if let Some(velocity) = desc.state.find(&VELOCITY_ALIASES) {
            for i in 0..n {
                vx[i] = velocity.component(i, 0);
                vy[i] = velocity.component(i, 1);
                vz[i] = velocity.component(i, 2);
            }
        }

        let mut inv_mass = vec![1.0f32; n];
        if let Some(field) = desc.state.find(&INV_MASS_ALIASES) {
            for i in 0..n {
                inv_mass[i] = field.component(i, 0);
            }
        }

        let mut attach_weight = vec![0.0f32; n];
        if let Some(field) = desc.state.find(&ATTACH_WEIGHT_ALIASES) {
            for i in 0..n {
                attach_weight[i] = field.component(i, 0);
            }
        }

        let (mut tx, mut ty, mut tz) = (x.clone(), y.clone(), z.clone());
        if let Some(field) = desc.state.find(&ATTACH_TARGET_ALIASES) {
            for i in 0..n {
                tx[i] = field.component(i, 0);
                ty[i] = field.component(i, 1);
                tz[i] = field.component(i, 2);
            }
        }

        let px = x.clone();
        let py = y.clone();
        let pz = z.clone();

        let mut params = Params::default();
        params.substeps = desc.policy.solve.substeps.max(1);
        params.iterations = desc.policy.solve.iterations;
        params.damping = desc.policy.solve.damping;
        params.warmstart = desc.policy.solve.warmstart;
        params.warmstart_decay = desc.policy.solve.warmstart_decay;
        if let Some(g) = desc.parameters.get_f32("gravity_x") {
            params.gravity.0 = g;
        }
        if let Some(g) = desc.parameters.get_f32("gravity_y") {
            params.gravity.1 = g;
        }
        if let Some(g) = desc.parameters.get_f32("gravity_z") {
            params.gravity.2 = g;
        }
        if let Some(dt) = desc.parameters.get_f32("dt") {
            params.dt = dt;
        }
        if let Some(c) = desc.parameters.get_f32("distance_compliance") {
            params.distance_compliance = c;
        }
        if let Some(s) = desc.parameters.get_f32("substeps") {
            params.substeps = (s as u32).max(1);
        }
        if let Some(it) = desc.parameters.get_f32("iterations") {
            params.iterations = it as u32;
        }

        let mut compliance_override = vec![0.0f32; edge_count];
        let mut has_override = vec![false; edge_count];
        if let Some(name) = edge_override_param_name() {
            for e in 0..edge_count {
                let key = format!("{name}_{e}");
                if let Some(v) = desc.parameters.get_f32(&key) {
                    compliance_override[e] = v;
                    has_override[e] = true;
                }
            }
        }

        Ok(Data {
            x,
            y,
            z,
            vx,
            vy,
            vz,
            px,
            py,
            pz,
            inv_mass,
            attach_weight,
            attach_target_x: tx,
            attach_target_y: ty,
            attach_target_z: tz,
            lambda: vec![0.0f32; edge_count],
            compliance_override,
            has_override,
            alpha_tilde: vec![0.0f32; edge_count],
            distance_enabled: true,
            bending_enabled: true,
            attachment_enabled: true,
            params,
        })
    }

    /// Recomputes `alpha_tilde` for the current substep `dt`, combining the
    /// global `distance_compliance` with any per-edge override: an
    /// overridden edge uses its own compliance in place of the global value
    /// rather than adding to it.
    pub fn recompute_alpha_tilde(&mut self, substep_dt: f32) {
        let dt2 = (substep_dt * substep_dt).max(1e-12);
        for e in 0..self.alpha_tilde.len() {
            let compliance = if self.has_override[e] { self.compliance_override[e] } else { self.params.distance_compliance };
            self.alpha_tilde[e] = compliance / dt2;
        }
    }

    /// Applies a batch of *small* commands in place. Structural commands
    /// must never reach here -- the Shell routes them to a recook instead
    /// (see [`crate::command::Command::is_structural`]).
    pub fn apply_overrides(&mut self, commands: &[Command]) -> SolverResult<()> {
        for command in commands {
            match command {
                Command::SetParam { name, value } => self.apply_set_param(name, value)?,
                Command::EnableOperator { tag } => self.set_operator_enabled(tag, true),
                Command::DisableOperator { tag } => self.set_operator_enabled(tag, false),
                Command::SetFieldRegion { field, start, values } => self.apply_field_region(field, *start, values)?,
                Command::AddNodes { .. } | Command::RemoveNodes { .. } | Command::AddRelations { .. } | Command::RemoveRelations { .. } => {
                    return Err(SolverError::InvalidArgs("structural command routed to Data::apply_overrides".into()));
                }
                Command::Custom { tag, .. } => {
                    log::trace!("ignoring unrecognized custom command \"{tag}\"");
                }
            }
        }
        Ok(())
    }

    fn apply_set_param(&mut self, name: &str, value: &ParamValue) -> SolverResult<()> {
        let v = value.as_f32().ok_or_else(|| SolverError::InvalidArgs(format!("parameter \"{name}\" is not numeric")))?;
        match name {
            "gravity_x" => self.params.gravity.0 = v,
            "gravity_y" => self.params.gravity.1 = v,
            "gravity_z" => self.params.gravity.2 = v,
            "dt" => self.params.dt = v,
            "damping" => self.params.damping = v,
            "distance_compliance" => self.params.distance_compliance = v,
            "substeps" => self.params.substeps = (v as u32).max(1),
            "iterations" => self.params.iterations = v as u32,
            "warmstart" => self.params.warmstart = v != 0.0,
            "warmstart_decay" => self.params.warmstart_decay = v,
            other if other.starts_with("distance_compliance_edge_") => {
                let idx: usize = other
                    .rsplit('_')
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| SolverError::InvalidArgs(format!("malformed per-edge override name \"{other}\"")))?;
                if idx >= self.compliance_override.len() {
                    return Err(SolverError::InvalidArgs(format!("edge index {idx} out of range for per-edge compliance override")));
                }
                self.compliance_override[idx] = v;
                self.has_override[idx] = true;
            }
            other => log::trace!("ignoring unrecognized parameter \"{other}\""),
        }
        Ok(())
    }

    fn set_operator_enabled(&mut self, tag: &str, enabled: bool) {
        match tag {
            // The reference core treats toggling the distance operator as a
            // no-op; kept for wire compatibility with callers that send it.
            "distance" => {}
            "bending" => self.bending_enabled = enabled,
            "attachment" => self.attachment_enabled = enabled,
            other => log::trace!("ignoring unrecognized operator tag \"{other}\""),
        }
    }

    /// Writes `values` into `field` starting at node `start`. A region that
    /// runs past the array's length is clamped to the in-range portion
    /// (logged at `warn`); it never panics or fails the flush, per the
    /// command-buffer contract on out-of-range `SetFieldRegion` writes.
    fn apply_field_region(&mut self, field: &str, start: usize, values: &[f32]) -> SolverResult<()> {
        let (components, slots): (usize, [&mut Vec<f32>; 3]) = match field {
            "position" | "pos" | "positions" => (3, [&mut self.x, &mut self.y, &mut self.z]),
            "velocity" | "vel" | "velocities" => (3, [&mut self.vx, &mut self.vy, &mut self.vz]),
            "attach_target" | "attachment_target" => (3, [&mut self.attach_target_x, &mut self.attach_target_y, &mut self.attach_target_z]),
            _ => {
                return self.apply_scalar_field_region(field, start, values);
            }
        };
        let requested = values.len() / components;
        let len = slots[0].len();
        let count = if start >= len { 0 } else { requested.min(len - start) };
        if count < requested {
            log::warn!("SetFieldRegion for \"{field}\" starting at {start} with {requested} entries overflows length {len}; clamped to {count}");
        }
        for i in 0..count {
            let node = start + i;
            slots[0][node] = values[i * components];
            slots[1][node] = values[i * components + 1];
            slots[2][node] = values[i * components + 2];
        }
        Ok(())
    }

    fn apply_scalar_field_region(&mut self, field: &str, start: usize, values: &[f32]) -> SolverResult<()> {
        if field == "distance_compliance_edge" {
            let len = self.compliance_override.len();
            let count = if start >= len { 0 } else { values.len().min(len - start) };
            if count < values.len() {
                log::warn!("SetFieldRegion for \"{field}\" starting at {start} with {} entries overflows length {len}; clamped to {count}", values.len());
            }
            for (i, &v) in values[..count].iter().enumerate() {
                let edge = start + i;
                self.compliance_override[edge] = v;
                self.has_override[edge] = true;
            }
            return Ok(());
        }
        let slot = match field {
            "inv_mass" | "inverse_mass" => &mut self.inv_mass,
            "attach_w" | "attach_weight" | "attachment_weight" => &mut self.attach_weight,
            _ => {
                log::trace!("ignoring SetFieldRegion for unrecognized field \"{field}\"");
                return Ok(());
            }
        };
        let len = slot.len();
        let count = if start >= len { 0 } else { values.len().min(len - start) };
        if count < values.len() {
            log::warn!("SetFieldRegion for \"{field}\" starting at {start} with {} entries overflows length {len}; clamped to {count}", values.len());
        }
        for (i, &v) in values[..count].iter().enumerate() {
            let node = start + i;
            slot[node] = v;
        }
        Ok(())
    }

    /// Builds the next generation's Data by permuting every per-node array
    /// according to `remap` (`remap[old_id] == new_id`). Per-edge arrays
    /// are rebuilt by the caller from the new Model since edge identity
    /// itself can change across a structural rebuild; this only carries
    /// forward per-node state.
    pub fn apply_remap(&self, remap: &[u32], new_node_count: usize) -> Data {
        let mut out = self.clone();
        let remap_len = remap.len().min(self.x.len());
        macro_rules! permute {
            ($field:ident, $default:expr) => {{
                let mut next = vec![$default; new_node_count];
                for old in 0..remap_len {
                    let new_id = remap[old] as usize;
                    if new_id < new_node_count {
                        next[new_id] = self.$field[old];
                    }
                }
                out.$field = next;
            }};
        }
        permute!(x, 0.0f32);
        permute!(y, 0.0f32);
        permute!(z, 0.0f32);
        permute!(vx, 0.0f32);
        permute!(vy, 0.0f32);
        permute!(vz, 0.0f32);
        permute!(px, 0.0f32);
        permute!(py, 0.0f32);
        permute!(pz, 0.0f32);
        permute!(inv_mass, 1.0f32);
        permute!(attach_weight, 0.0f32);
        permute!(attach_target_x, 0.0f32);
        permute!(attach_target_y, 0.0f32);
        permute!(attach_target_z, 0.0f32);
        out
    }

    /// Resizes every per-edge array to `new_edge_count`, truncating or
    /// filling new entries with 0. This release's rebuild always reproduces
    /// the same topology, so `new_edge_count` equals the old edge count
    /// today, but the resize is applied unconditionally so a future rebuild
    /// that does change edge count stays correct without touching the call
    /// site.
    pub fn resize_edges(&mut self, new_edge_count: usize) {
        self.lambda.resize(new_edge_count, 0.0);
        self.compliance_override.resize(new_edge_count, 0.0);
        self.has_override.resize(new_edge_count, false);
        self.alpha_tilde.resize(new_edge_count, 0.0);
    }
}

/// Name of the per-edge compliance override parameter family, as
/// `"{name}_{edge_index}"`. A function (not a constant) so the naming
/// scheme has one place to change.
fn edge_override_param_name() -> Option<&'static str> {
    Some("distance_compliance_edge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_desc::{FieldView, RelationView};
    use crate::cooking::{clear_cache, cook};

    fn two_node_desc() -> BuildDesc {
        let mut desc = BuildDesc::default();
        desc.topology.node_count = 2;
        desc.state.fields.push(FieldView::vec3("position", vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]));
        desc.topology.relations.push(RelationView::edges(&[(0, 1)]));
        desc
    }

    #[test]
    fn from_build_seeds_positions_from_state() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let data = Data::from_build(&desc, &model).unwrap();
        assert_eq!(data.x, vec![0.0, 1.0]);
        assert_eq!(data.inv_mass, vec![1.0, 1.0]);
    }

    #[test]
    fn set_param_updates_damping() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.apply_overrides(&[Command::SetParam { name: "damping".into(), value: ParamValue::F32(0.5) }]).unwrap();
        assert_eq!(data.params.damping, 0.5);
    }

    #[test]
    fn set_param_updates_warmstart_mode_and_decay() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.apply_overrides(&[
            Command::SetParam { name: "warmstart".into(), value: ParamValue::Bool(true) },
            Command::SetParam { name: "warmstart_decay".into(), value: ParamValue::F32(0.8) },
        ])
        .unwrap();
        assert!(data.params.warmstart);
        assert_eq!(data.params.warmstart_decay, 0.8);
    }

    #[test]
    fn disable_operator_clears_bending_flag() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.apply_overrides(&[Command::DisableOperator { tag: "bending".into() }]).unwrap();
        assert!(!data.bending_enabled);
    }

    #[test]
    fn disable_operator_distance_is_a_no_op() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.apply_overrides(&[Command::DisableOperator { tag: "distance".into() }]).unwrap();
        assert!(data.distance_enabled);
    }

    #[test]
    fn per_edge_override_takes_precedence_over_global() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.params.distance_compliance = 0.01;
        data.apply_overrides(&[Command::SetParam { name: "distance_compliance_edge_0".into(), value: ParamValue::F32(0.5) }])
            .unwrap();
        data.recompute_alpha_tilde(1.0 / 60.0);
        let dt2 = (1.0f32 / 60.0).powi(2);
        assert!((data.alpha_tilde[0] - 0.5 / dt2).abs() < 1e-4);
    }

    #[test]
    fn set_field_region_distance_compliance_edge_sets_override() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.apply_overrides(&[Command::SetFieldRegion { field: "distance_compliance_edge".into(), start: 0, values: vec![0.01] }])
            .unwrap();
        assert!(data.has_override[0]);
        assert_eq!(data.compliance_override[0], 0.01);
    }

    #[test]
    fn set_field_region_attach_w_alias_updates_attach_weight() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.apply_overrides(&[Command::SetFieldRegion { field: "attach_w".into(), start: 0, values: vec![1.0] }]).unwrap();
        assert_eq!(data.attach_weight[0], 1.0);
    }

    #[test]
    fn set_field_region_vec3_overflow_is_clamped_not_an_error() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        // node_count is 2; a region starting at node 1 with two vec3 entries
        // only has room for the first before running off the end.
        let result = data.apply_overrides(&[Command::SetFieldRegion {
            field: "position".into(),
            start: 1,
            values: vec![9.0, 9.0, 9.0, -1.0, -1.0, -1.0],
        }]);
        assert!(result.is_ok());
        assert_eq!((data.x[1], data.y[1], data.z[1]), (9.0, 9.0, 9.0));
    }

    #[test]
    fn set_field_region_scalar_overflow_is_clamped_not_an_error() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        let result = data.apply_overrides(&[Command::SetFieldRegion { field: "inv_mass".into(), start: 1, values: vec![0.5, 0.5] }]);
        assert!(result.is_ok());
        assert_eq!(data.inv_mass[1], 0.5);
    }

    #[test]
    fn set_field_region_with_start_past_end_is_skipped_not_an_error() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        let before = data.inv_mass.clone();
        let result = data.apply_overrides(&[Command::SetFieldRegion { field: "inv_mass".into(), start: 50, values: vec![0.0] }]);
        assert!(result.is_ok());
        assert_eq!(data.inv_mass, before);
    }

    #[test]
    fn set_field_region_distance_compliance_edge_overflow_is_clamped_not_an_error() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        // Only one edge exists; ask for two overrides starting at edge 0.
        let result = data.apply_overrides(&[Command::SetFieldRegion {
            field: "distance_compliance_edge".into(),
            start: 0,
            values: vec![0.02, 0.03],
        }]);
        assert!(result.is_ok());
        assert_eq!(data.compliance_override[0], 0.02);
    }

    #[test]
    fn identity_remap_preserves_all_node_state() {
        clear_cache();
        let desc = two_node_desc();
        let model = cook(&desc).unwrap();
        let data = Data::from_build(&desc, &model).unwrap();
        let remapped = data.apply_remap(&model.node_remap, model.node_count as usize);
        assert_eq!(remapped.x, data.x);
        assert_eq!(remapped.inv_mass, data.inv_mass);
    }
}
