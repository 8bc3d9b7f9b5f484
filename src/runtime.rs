//! The per-substep solve pipeline: predict, attach, recompute compliance,
//! project distance + bending constraints, then commit velocities. Called
//! once per `step`, internally looping over `Data::params.substeps`.

use crate::backend::Chosen;
use crate::build_desc::{BackendChoice, LayoutChoice};
use crate::data::Data;
use crate::kernels::{attachment, bending, distance};
use crate::model::Model;
use crate::scheduler::{run_parallel, run_sequential, Scheduling};
use crate::storage::{blocks_for, pack_soa_to_blocked, unpack_blocked_to_soa, AosView, SoaView};

/// The physics-facing subset of one frame's telemetry: everything
/// `runtime::step` itself can observe. The Solver wraps the call with a
/// wall-clock timer and merges this into the full `TelemetryFrame` (which
/// also carries rebuild/command-counter fields `runtime::step` has no
/// reason to know about).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepStats {
    pub residual: f32,
    pub substeps_used: u32,
    pub iterations_used: u32,
}

/// Advances `data` by one frame of duration `dt`, internally split into
/// `data.params.substeps` equal substeps (a `substeps` of 0 is coerced to 1
/// at the point of use, never upstream, so a caller's BuildDesc/SetParam
/// value is never silently rewritten).
pub fn step(model: &Model, data: &mut Data, chosen: Chosen, dt: f32) -> StepStats {
    let substeps = data.params.substeps.max(1);
    let sub_dt = dt / substeps as f32;
    let n = data.x.len();

    for _ in 0..substeps {
        predict(data, n, sub_dt);

        if data.attachment_enabled {
            let mut view = SoaView::new(&mut data.px, &mut data.py, &mut data.pz);
            attachment::apply(&mut view, &data.attach_weight, &data.attach_target_x, &data.attach_target_y, &data.attach_target_z, &data.inv_mass);
        }

        data.recompute_alpha_tilde(sub_dt);
        if !data.params.warmstart {
            data.lambda.iter_mut().for_each(|l| *l = 0.0);
        } else {
            let decay = data.params.warmstart_decay;
            data.lambda.iter_mut().for_each(|l| *l *= decay);
        }

        if data.distance_enabled && model.edge_count() > 0 {
            project_distance(model, data, chosen);
        }

        if data.bending_enabled && !model.bend_quads.is_empty() {
            let mut view = SoaView::new(&mut data.px, &mut data.py, &mut data.pz);
            bending::project_all(&mut view, &model.bend_quads, &model.bend_rest_angle, data.params.iterations);
        }

        finalize(data, n, sub_dt);
    }

    StepStats {
        residual: compute_residual(data, model),
        substeps_used: substeps,
        iterations_used: data.params.iterations,
    }
}

fn predict(data: &mut Data, n: usize, sub_dt: f32) {
    let (gx, gy, gz) = data.params.gravity;
    for i in 0..n {
        if data.inv_mass[i] <= 0.0 {
            data.px[i] = data.x[i];
            data.py[i] = data.y[i];
            data.pz[i] = data.z[i];
            data.vx[i] = 0.0;
            data.vy[i] = 0.0;
            data.vz[i] = 0.0;
            continue;
        }
        data.vx[i] += gx * sub_dt;
        data.vy[i] += gy * sub_dt;
        data.vz[i] += gz * sub_dt;
        data.px[i] = data.x[i] + data.vx[i] * sub_dt;
        data.py[i] = data.y[i] + data.vy[i] * sub_dt;
        data.pz[i] = data.z[i] + data.vz[i] * sub_dt;
    }
}

fn finalize(data: &mut Data, n: usize, sub_dt: f32) {
    let inv_dt = if sub_dt > 0.0 { 1.0 / sub_dt } else { 0.0 };
    let mul = 1.0 - data.params.damping.clamp(0.0, 1.0);
    for i in 0..n {
        if data.inv_mass[i] <= 0.0 {
            data.vx[i] = 0.0;
            data.vy[i] = 0.0;
            data.vz[i] = 0.0;
            data.px[i] = data.x[i];
            data.py[i] = data.y[i];
            data.pz[i] = data.z[i];
            continue;
        }
        data.vx[i] = (data.px[i] - data.x[i]) * inv_dt * mul;
        data.vy[i] = (data.py[i] - data.y[i]) * inv_dt * mul;
        data.vz[i] = (data.pz[i] - data.z[i]) * inv_dt * mul;
        data.x[i] = data.px[i];
        data.y[i] = data.py[i];
        data.z[i] = data.pz[i];
    }
}

fn project_distance(model: &Model, data: &mut Data, chosen: Chosen) {
    let iterations = data.params.iterations;
    match (chosen.layout, chosen.backend) {
        (LayoutChoice::Soa, BackendChoice::SimdWide) => {
            distance::project_range_simd(
                &mut data.px,
                &mut data.py,
                &mut data.pz,
                &model.edges,
                &model.rest,
                &data.inv_mass,
                &mut data.lambda,
                &data.alpha_tilde,
                0..model.edge_count(),
                iterations,
            );
        }
        (_, BackendChoice::TaskPool) => {
            project_distance_parallel(model, data, chosen.threads, iterations);
        }
        (LayoutChoice::Aos, _) => {
            project_distance_aos(model, data, iterations);
        }
        (LayoutChoice::Blocked, _) => {
            project_distance_blocked(model, data, iterations);
        }
        (LayoutChoice::Soa, _) => {
            let mut view = SoaView::new(&mut data.px, &mut data.py, &mut data.pz);
            run_sequential(&model.islands, |range| {
                distance::project_range(&mut view, &model.edges, &model.rest, &data.inv_mass, &mut data.lambda, &data.alpha_tilde, range, iterations);
            });
        }
    }
}

fn project_distance_aos(model: &Model, data: &mut Data, iterations: u32) {
    let n = data.x.len();
    let mut interleaved = vec![0.0f32; n * 3];
    for i in 0..n {
        interleaved[i * 3] = data.px[i];
        interleaved[i * 3 + 1] = data.py[i];
        interleaved[i * 3 + 2] = data.pz[i];
    }
    {
        let mut view = AosView::new(&mut interleaved, 3);
        run_sequential(&model.islands, |range| {
            distance::project_range(&mut view, &model.edges, &model.rest, &data.inv_mass, &mut data.lambda, &data.alpha_tilde, range, iterations);
        });
    }
    for i in 0..n {
        data.px[i] = interleaved[i * 3];
        data.py[i] = interleaved[i * 3 + 1];
        data.pz[i] = interleaved[i * 3 + 2];
    }
}

fn project_distance_blocked(model: &Model, data: &mut Data, iterations: u32) {
    let n = data.x.len();
    let block_size = model.block_size;
    let blocks = blocks_for(n, block_size);
    let mut packed = vec![0.0f32; 3 * block_size * blocks];
    pack_soa_to_blocked(&data.px, &data.py, &data.pz, n, block_size, &mut packed);
    {
        let mut view = crate::storage::BlockedView::new(&mut packed, block_size, n);
        run_sequential(&model.islands, |range| {
            distance::project_range(&mut view, &model.edges, &model.rest, &data.inv_mass, &mut data.lambda, &data.alpha_tilde, range, iterations);
        });
    }
    unpack_blocked_to_soa(&packed, n, block_size, &mut data.px, &mut data.py, &mut data.pz);
}

/// Raw pointers to the position/lambda buffers, shared read-only across
/// island-parallel tasks. Sound because islands partition the edge set into
/// disjoint node sets (`Model::check_invariants`): two concurrently running
/// tasks never touch the same index, even though they hold handles into the
/// same backing allocation.
struct RawBuffers {
    x: *mut f32,
    y: *mut f32,
    z: *mut f32,
    lambda: *mut f32,
    n: usize,
    edge_count: usize,
}
unsafe impl Sync for RawBuffers {}

fn project_distance_parallel(model: &Model, data: &mut Data, max_threads: usize, iterations: u32) {
    let n = data.x.len();
    let edge_count = model.edge_count();
    let buffers = RawBuffers {
        x: data.px.as_mut_ptr(),
        y: data.py.as_mut_ptr(),
        z: data.pz.as_mut_ptr(),
        lambda: data.lambda.as_mut_ptr(),
        n,
        edge_count,
    };
    let edges = &model.edges;
    let rest = &model.rest;
    let inv_mass = &data.inv_mass;
    let alpha_tilde = &data.alpha_tilde;

    run_parallel(&model.islands, max_threads, |_idx, range| {
        // SAFETY: see RawBuffers doc comment; `range` never overlaps
        // another concurrently running island's range.
        let x = unsafe { std::slice::from_raw_parts_mut(buffers.x, buffers.n) };
        let y = unsafe { std::slice::from_raw_parts_mut(buffers.y, buffers.n) };
        let z = unsafe { std::slice::from_raw_parts_mut(buffers.z, buffers.n) };
        let lambda = unsafe { std::slice::from_raw_parts_mut(buffers.lambda, buffers.edge_count) };
        let mut view = SoaView::new(x, y, z);
        distance::project_range(&mut view, edges, rest, inv_mass, lambda, alpha_tilde, range, iterations);
    });
}

/// Average over edges of `|length - rest|`, skipping degenerate (coincident
/// endpoints produce a non-finite or already-excluded length upstream) or
/// non-finite entries. Zero edges yields 0, not NaN.
fn compute_residual(data: &Data, model: &Model) -> f32 {
    let mut sum = 0.0f32;
    let mut counted = 0u32;
    for e in 0..model.edge_count() {
        let a = model.edges[2 * e] as usize;
        let b = model.edges[2 * e + 1] as usize;
        let dx = data.x[b] - data.x[a];
        let dy = data.y[b] - data.y[a];
        let dz = data.z[b] - data.z[a];
        let l = (dx * dx + dy * dy + dz * dz).sqrt();
        let c = (l - model.rest[e]).abs();
        if !c.is_finite() {
            continue;
        }
        sum += c;
        counted += 1;
    }
    if counted > 0 {
        sum / counted as f32
    } else {
        0.0
    }
}

/// Scheduling strategy implied by a resolved `Chosen` backend: `TaskPool`
/// parallelizes across islands, everything else runs sequentially (the
/// SIMD kernel parallelizes *within* a sweep via lanes instead).
pub fn scheduling_for(chosen: Chosen) -> Scheduling {
    match chosen.backend {
        BackendChoice::TaskPool => Scheduling::Parallel { max_threads: chosen.threads },
        _ => Scheduling::Sequential,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::choose;
    use crate::build_desc::{BuildDesc, FieldView, ParamValue, RelationView};
    use crate::cooking::{clear_cache, cook};

    fn two_node_chain() -> BuildDesc {
        let mut desc = BuildDesc::default();
        desc.topology.node_count = 2;
        desc.state.fields.push(FieldView::vec3("position", vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]));
        desc.topology.relations.push(RelationView::edges(&[(0, 1)]));
        desc.parameters.set("gravity_y", ParamValue::F32(0.0));
        desc
    }

    #[test]
    fn stretched_edge_relaxes_toward_rest_length_over_steps() {
        clear_cache();
        let mut desc = two_node_chain();
        desc.state.fields[0].data[3] = 3.0; // stretch node 1 out to x=3
        desc.policy.exec.backend = crate::build_desc::BackendChoice::Scalar;
        desc.policy.solve.iterations = 12;
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        data.recompute_alpha_tilde(1.0 / 60.0);
        let chosen = choose(&desc.policy, &model).unwrap();

        for _ in 0..30 {
            step(&model, &mut data, chosen, 1.0 / 60.0);
        }

        let length = (data.x[1] - data.x[0]).abs();
        assert!((length - 1.0).abs() < 0.05, "edge length did not relax: {length}");
    }

    #[test]
    fn pinned_node_never_moves() {
        clear_cache();
        let mut desc = two_node_chain();
        desc.state.fields.push(FieldView { name: "inv_mass".into(), ty: crate::build_desc::FieldType::F32, components: 1, data: vec![0.0, 1.0], count: 2 });
        let model = cook(&desc).unwrap();
        let mut data = Data::from_build(&desc, &model).unwrap();
        let chosen = choose(&desc.policy, &model).unwrap();

        let (x0, y0, z0) = (data.x[0], data.y[0], data.z[0]);
        for _ in 0..10 {
            step(&model, &mut data, chosen, 1.0 / 60.0);
        }
        assert_eq!((data.x[0], data.y[0], data.z[0]), (x0, y0, z0));
    }

    #[test]
    fn taskpool_backend_matches_scalar_backend_on_disjoint_islands() {
        clear_cache();
        let mut desc = BuildDesc::default();
        desc.topology.node_count = 6;
        desc.state.fields.push(FieldView::vec3(
            "position",
            vec![
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
            ],
        ));
        desc.topology.relations.push(RelationView::edges(&[(0, 1), (2, 3), (4, 5)]));
        desc.parameters.set("gravity_y", ParamValue::F32(0.0));
        desc.policy.solve.iterations = 10;

        let model = cook(&desc).unwrap();

        let mut scalar_desc = desc.clone();
        scalar_desc.policy.exec.backend = crate::build_desc::BackendChoice::Scalar;
        let mut scalar_data = Data::from_build(&scalar_desc, &model).unwrap();
        let scalar_chosen = choose(&scalar_desc.policy, &model).unwrap();
        for _ in 0..5 {
            step(&model, &mut scalar_data, scalar_chosen, 1.0 / 60.0);
        }

        let mut pool_desc = desc.clone();
        pool_desc.policy.exec.backend = crate::build_desc::BackendChoice::TaskPool;
        let mut pool_data = Data::from_build(&pool_desc, &model).unwrap();
        let pool_chosen = choose(&pool_desc.policy, &model).unwrap();
        for _ in 0..5 {
            step(&model, &mut pool_data, pool_chosen, 1.0 / 60.0);
        }

        for i in 0..6 {
            assert!((scalar_data.x[i] - pool_data.x[i]).abs() < 1e-3, "node {i} diverged between scalar and taskpool");
        }
    }
}
