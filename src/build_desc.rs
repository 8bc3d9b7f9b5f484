//! The 4+3 input contract: State, Parameters, Topology, Policy, and (opaque)
//! Space, Operators, Events. A `BuildDesc` aggregates all of these; the
//! Shell validates it, Cooking compiles it into a [`crate::model::Model`],
//! and the Data store initializes its mutable arrays from it.

use std::collections::HashMap;

/// Scalar element type tag for a [`FieldView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    F32,
    I32,
    U32,
}

/// One named field in [`StateInit`], e.g. `"position"` or `"velocity"`.
/// Components are stored contiguously per node (component count 1..4); the
/// original C surface additionally carried a byte stride for interleaved
/// external buffers, but since this crate owns its data (no foreign-memory
/// aliasing across the API boundary) every field is densely packed.
#[derive(Debug, Clone)]
pub struct FieldView {
    pub name: String,
    pub ty: FieldType,
    pub components: u8,
    pub data: Vec<f32>,
    pub count: usize,
}

impl FieldView {
    pub fn vec3(name: impl Into<String>, values: Vec<[f32; 3]>) -> Self {
        let count = values.len();
        let mut data = Vec::with_capacity(count * 3);
        for v in values {
            data.extend_from_slice(&v);
        }
        Self {
            name: name.into(),
            ty: FieldType::F32,
            components: 3,
            data,
            count,
        }
    }

    pub fn component(&self, i: usize, c: usize) -> f32 {
        self.data[i * self.components as usize + c]
    }
}

/// Ordered list of [`FieldView`] entries describing initial per-node state.
#[derive(Debug, Clone, Default)]
pub struct StateInit {
    pub fields: Vec<FieldView>,
}

impl StateInit {
    /// Looks up a field by any of the given name aliases, in order.
    pub fn find(&self, aliases: &[&str]) -> Option<&FieldView> {
        aliases.iter().find_map(|name| self.fields.iter().find(|f| f.name == *name))
    }
}

/// A scalar parameter value. Only `F32` is consumed by `SetParam` in this
/// core; the other variants exist so the enum matches the shape of values a
/// caller might reasonably hand in, without carrying unreachable Mat3/Mat4/
/// Blob variants the original C surface declared but nothing here ever
/// produces or consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    String(String),
}

impl ParamValue {
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            ParamValue::F32(v) => Some(v),
            ParamValue::I32(v) => Some(v as f32),
            ParamValue::U32(v) => Some(v as f32),
            ParamValue::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

/// Named scalar parameters, e.g. `gravity_x`, `distance_compliance`.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub values: HashMap<String, ParamValue>,
}

impl Parameters {
    pub fn set(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get_f32(&self, name: &str) -> Option<f32> {
        self.values.get(name).and_then(ParamValue::as_f32)
    }
}

/// One relation: a flat index array of the given arity (2 for edges, 4 for
/// bend quads) tagged with a name such as `"edges"` or `"bend_pairs"`.
#[derive(Debug, Clone)]
pub struct RelationView {
    pub tag: String,
    pub arity: u8,
    pub indices: Vec<u32>,
}

impl RelationView {
    pub fn edges(pairs: &[(u32, u32)]) -> Self {
        let mut indices = Vec::with_capacity(pairs.len() * 2);
        for &(a, b) in pairs {
            indices.push(a);
            indices.push(b);
        }
        Self {
            tag: "edges".into(),
            arity: 2,
            indices,
        }
    }

    pub fn bend_pairs(quads: &[(u32, u32, u32, u32)]) -> Self {
        let mut indices = Vec::with_capacity(quads.len() * 4);
        for &(i0, i1, i2, i3) in quads {
            indices.extend_from_slice(&[i0, i1, i2, i3]);
        }
        Self {
            tag: "bend_pairs".into(),
            arity: 4,
            indices,
        }
    }

    pub fn count(&self) -> usize {
        self.indices.len() / self.arity as usize
    }
}

/// Node count plus a list of relations (edges, bend quads, ...).
#[derive(Debug, Clone, Default)]
pub struct TopologyIn {
    pub node_count: u32,
    pub relations: Vec<RelationView>,
}

impl TopologyIn {
    pub fn find(&self, tag: &str) -> Option<&RelationView> {
        self.relations.iter().find(|r| r.tag == tag)
    }
}

/// Layout selection for the storage views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutChoice {
    #[default]
    Auto,
    Soa,
    Aos,
    Blocked,
}

/// Backend selection for constraint projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendChoice {
    #[default]
    Auto,
    Scalar,
    SimdWide,
    TaskPool,
    /// Named for parity with the original capability enum; never actually
    /// available from this crate (GPU offload is an explicit Non-goal).
    Gpu,
}

/// Execution policy: layout/backend/threading preferences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecPolicy {
    pub layout: LayoutChoice,
    pub backend: BackendChoice,
    /// 0 or negative means "library default".
    pub threads: i32,
    pub deterministic: bool,
    pub telemetry: bool,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            layout: LayoutChoice::Auto,
            backend: BackendChoice::Auto,
            threads: 0,
            deterministic: true,
            telemetry: true,
        }
    }
}

/// Solve-loop policy: substep/iteration counts, damping, warm-start mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolvePolicy {
    pub substeps: u32,
    pub iterations: u32,
    pub damping: f32,
    pub warmstart: bool,
    pub warmstart_decay: f32,
}

impl Default for SolvePolicy {
    fn default() -> Self {
        Self {
            substeps: 1,
            iterations: 8,
            damping: 0.0,
            warmstart: false,
            warmstart_decay: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Policy {
    pub exec: ExecPolicy,
    pub solve: SolvePolicy,
}

/// Opaque metadata the current core treats as inert -- it is carried
/// through the BuildDesc and cache key but never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpaceDesc {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OperatorsDecl {
    pub tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventsScript {
    pub tag: String,
}

/// Strictness level for [`crate::validate::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidateLevel {
    #[default]
    Strict,
    Tolerant,
}

/// Packing preferences for the Blocked layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackOptions {
    pub lazy_pack: bool,
    pub block_size: i32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            lazy_pack: false,
            block_size: 8,
        }
    }
}

/// The full input contract to `Solver::create` and to a structural rebuild.
#[derive(Debug, Clone, Default)]
pub struct BuildDesc {
    pub state: StateInit,
    pub parameters: Parameters,
    pub topology: TopologyIn,
    pub policy: Policy,
    pub space: SpaceDesc,
    pub operators: OperatorsDecl,
    pub events: EventsScript,
    pub validate_level: ValidateLevel,
    pub pack: PackOptions,
}
