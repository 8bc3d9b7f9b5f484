//! `validate(BuildDesc)`: the gate every BuildDesc must pass before Cooking
//! ever sees it, at either `create` or structural-rebuild time.

use crate::build_desc::{BuildDesc, ValidateLevel};
use crate::error::{SolverError, SolverResult};

pub const POSITION_ALIASES: [&str; 3] = ["position", "pos", "positions"];
pub const VELOCITY_ALIASES: [&str; 3] = ["velocity", "vel", "velocities"];

pub fn validate(desc: &BuildDesc) -> SolverResult<()> {
    let node_count = desc.topology.node_count as usize;

    let position = desc
        .state
        .find(&POSITION_ALIASES)
        .ok_or_else(|| SolverError::ValidationFailed("missing required \"position\" field".into()))?;
    if position.components != 3 {
        return Err(SolverError::ValidationFailed("\"position\" field must have 3 components".into()));
    }
    if position.count != node_count {
        return Err(SolverError::ValidationFailed(format!(
            "\"position\" count {} does not match topology.node_count {}",
            position.count, node_count
        )));
    }
    if position.data.iter().any(|v| v.is_nan()) {
        return Err(SolverError::ValidationFailed("\"position\" field contains NaN".into()));
    }

    if let Some(velocity) = desc.state.find(&VELOCITY_ALIASES) {
        if velocity.components != 3 {
            return Err(SolverError::ValidationFailed("\"velocity\" field must have 3 components".into()));
        }
        if velocity.count != node_count {
            return Err(SolverError::ValidationFailed(format!(
                "\"velocity\" count {} does not match topology.node_count {}",
                velocity.count, node_count
            )));
        }
        if velocity.data.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::ValidationFailed("\"velocity\" field contains non-finite values".into()));
        }
    }

    let strict = desc.validate_level == ValidateLevel::Strict;

    if let Some(edges) = desc.topology.find("edges") {
        if edges.arity != 2 {
            return Err(SolverError::ValidationFailed("\"edges\" relation must have arity 2".into()));
        }
        if strict {
            for &idx in &edges.indices {
                if idx as usize >= node_count {
                    return Err(SolverError::ValidationFailed(format!(
                        "edge index {idx} out of range for node_count {node_count}"
                    )));
                }
            }
            let mut seen = std::collections::HashSet::new();
            for pair in edges.indices.chunks_exact(2) {
                let (a, b) = (pair[0], pair[1]);
                let key = if a < b { (a, b) } else { (b, a) };
                if !seen.insert(key) {
                    return Err(SolverError::ValidationFailed(format!("duplicate undirected edge ({a}, {b})")));
                }
            }
        }
    }

    if let Some(bend) = desc.topology.find("bend_pairs") {
        if bend.arity != 4 {
            return Err(SolverError::ValidationFailed("\"bend_pairs\" relation must have arity 4".into()));
        }
        if strict {
            for &idx in &bend.indices {
                if idx as usize >= node_count {
                    return Err(SolverError::ValidationFailed(format!(
                        "bend quad index {idx} out of range for node_count {node_count}"
                    )));
                }
            }
        }
    }

    if let Some(substeps) = desc.parameters.get_f32("substeps") {
        if substeps < 0.0 {
            return Err(SolverError::ValidationFailed("substeps must be >= 0".into()));
        }
    }
    if let Some(iterations) = desc.parameters.get_f32("iterations") {
        if iterations < 0.0 {
            return Err(SolverError::ValidationFailed("iterations must be >= 0".into()));
        }
    }
    if desc.policy.solve.iterations == 0 && desc.parameters.get_f32("iterations").is_none() {
        // 0 iterations is legal (a no-op solve pass), nothing to reject here.
    }

    Ok(())
}
