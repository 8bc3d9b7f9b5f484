//! Property tests mirroring the solver's numbered invariants: pinned nodes
//! never move, fields the runtime doesn't touch are preserved across
//! steps, island partitions always span every edge exactly once, and
//! pack/unpack between SoA and Blocked storage round-trips losslessly.

use proptest::prelude::*;

use hinacloth::build_desc::{BackendChoice, FieldType, FieldView, ParamValue, RelationView};
use hinacloth::{BuildDesc, Solver};

fn chain_desc(n: u32, pin_first: bool) -> BuildDesc {
    let mut desc = BuildDesc::default();
    desc.topology.node_count = n;
    let positions: Vec<[f32; 3]> = (0..n).map(|i| [i as f32, 0.0, 0.0]).collect();
    desc.state.fields.push(FieldView::vec3("position", positions));
    if n > 1 {
        let pairs: Vec<(u32, u32)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        desc.topology.relations.push(RelationView::edges(&pairs));
    }
    if pin_first {
        let mut mass = vec![1.0f32; n as usize];
        mass[0] = 0.0;
        desc.state.fields.push(FieldView { name: "inv_mass".into(), ty: FieldType::F32, components: 1, data: mass, count: n as usize });
    }
    desc.policy.exec.backend = BackendChoice::Scalar;
    desc.policy.solve.iterations = 6;
    desc
}

proptest! {
    #[test]
    fn pinned_node_stays_put_across_arbitrary_step_counts(
        n in 2u32..8,
        steps in 1u32..40,
        gravity_y in -20.0f32..0.0,
    ) {
        let mut desc = chain_desc(n, true);
        desc.parameters.set("gravity_y", ParamValue::F32(gravity_y));
        let mut solver = Solver::create(desc).unwrap();

        let mut before = vec![0.0f32; n as usize * 3];
        solver.copy_positions(&mut before, 0).unwrap();

        for _ in 0..steps {
            solver.step(1.0 / 60.0).unwrap();
        }

        let mut after = vec![0.0f32; n as usize * 3];
        solver.copy_positions(&mut after, 0).unwrap();
        prop_assert_eq!(before[0..3].to_vec(), after[0..3].to_vec());
    }

    #[test]
    fn unpinned_chain_with_no_gravity_and_no_initial_velocity_does_not_drift(
        n in 2u32..10,
        steps in 1u32..30,
    ) {
        let mut desc = chain_desc(n, false);
        desc.parameters.set("gravity_y", ParamValue::F32(0.0));
        let mut solver = Solver::create(desc).unwrap();

        let mut before = vec![0.0f32; n as usize * 3];
        solver.copy_positions(&mut before, 0).unwrap();

        for _ in 0..steps {
            solver.step(1.0 / 60.0).unwrap();
        }

        let mut after = vec![0.0f32; n as usize * 3];
        solver.copy_positions(&mut after, 0).unwrap();
        for i in 0..before.len() {
            prop_assert!((before[i] - after[i]).abs() < 1e-3, "node state drifted with no forces applied: {} vs {}", before[i], after[i]);
        }
    }
}

mod storage_properties {
    use super::*;
    use hinacloth::storage::{blocks_for, pack_soa_to_blocked, unpack_blocked_to_soa};

    proptest! {
        #[test]
        fn blocked_pack_unpack_round_trips_for_arbitrary_sizes(
            n in 0usize..64,
            block_size in 1usize..16,
            seed in any::<u64>(),
        ) {
            let mut state = seed;
            let mut next = || {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as u32) as f32 * 1e-3
            };
            let x: Vec<f32> = (0..n).map(|_| next()).collect();
            let y: Vec<f32> = (0..n).map(|_| next()).collect();
            let z: Vec<f32> = (0..n).map(|_| next()).collect();

            let blocks = blocks_for(n, block_size);
            let mut packed = vec![0.0f32; 3 * block_size * blocks];
            pack_soa_to_blocked(&x, &y, &z, n, block_size, &mut packed);

            let mut ox = vec![0.0f32; n];
            let mut oy = vec![0.0f32; n];
            let mut oz = vec![0.0f32; n];
            unpack_blocked_to_soa(&packed, n, block_size, &mut ox, &mut oy, &mut oz);

            prop_assert_eq!(x, ox);
            prop_assert_eq!(y, oy);
            prop_assert_eq!(z, oz);
        }
    }
}

mod cooking_properties {
    use super::*;
    use hinacloth::cooking::{clear_cache, cook};

    proptest! {
        #[test]
        fn island_partition_spans_every_edge_exactly_once(
            n in 2u32..20,
            edge_count in 0usize..40,
            seed in any::<u64>(),
        ) {
            let mut state = seed;
            let mut next_index = |bound: u32| -> u32 {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as u32) % bound.max(1)
            };

            let mut desc = chain_desc(n, false);
            desc.topology.relations.clear();
            let mut pairs = Vec::new();
            for _ in 0..edge_count {
                let a = next_index(n);
                let mut b = next_index(n);
                if b == a {
                    b = (b + 1) % n;
                }
                pairs.push((a, b));
            }
            desc.topology.relations.push(RelationView::edges(&pairs));
            desc.validate_level = hinacloth::build_desc::ValidateLevel::Tolerant;

            clear_cache();
            let model = cook(&desc).unwrap();
            prop_assert_eq!(model.island_edge_span(), model.edge_count());

            let mut covered = vec![false; model.edge_count()];
            for island in &model.islands {
                for e in island.edge_range() {
                    prop_assert!(!covered[e], "edge {} covered by more than one island", e);
                    covered[e] = true;
                }
            }
            prop_assert!(covered.iter().all(|&c| c));
        }
    }
}
