//! Backend registry: enumerates the layout/backend pairs this process can
//! actually run, and resolves a [`Policy`]'s `Auto` choices into a concrete
//! [`Chosen`] combination.

use crate::build_desc::{BackendChoice, LayoutChoice, Policy};
use crate::error::{SolverError, SolverResult};
use crate::kernels::distance::simd_available;
use crate::model::Model;

/// One enumerable (backend, layout) pair this build of the crate supports,
/// independent of what the current CPU can run -- `enumerate` reports
/// compile-time availability; `choose` additionally consults the runtime
/// CPU feature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub backend: BackendChoice,
    pub layout: LayoutChoice,
    pub name: &'static str,
}

/// Lists every (backend, layout) combination this build could select,
/// exposed to callers through `query_chosen`/`enumerate_capabilities`.
/// `SimdWide` is always listed on x86_64 builds even if the running CPU
/// lacks AVX2 -- compile-time presence, not runtime availability.
pub fn enumerate() -> Vec<Capability> {
    let mut caps = vec![
        Capability { backend: BackendChoice::Scalar, layout: LayoutChoice::Soa, name: "scalar+soa" },
        Capability { backend: BackendChoice::Scalar, layout: LayoutChoice::Aos, name: "scalar+aos" },
        Capability { backend: BackendChoice::Scalar, layout: LayoutChoice::Blocked, name: "scalar+blocked" },
        Capability { backend: BackendChoice::TaskPool, layout: LayoutChoice::Soa, name: "taskpool+soa" },
        Capability { backend: BackendChoice::TaskPool, layout: LayoutChoice::Aos, name: "taskpool+aos" },
        Capability { backend: BackendChoice::TaskPool, layout: LayoutChoice::Blocked, name: "taskpool+blocked" },
    ];
    #[cfg(target_arch = "x86_64")]
    {
        caps.push(Capability { backend: BackendChoice::SimdWide, layout: LayoutChoice::Soa, name: "simd+soa" });
    }
    caps
}

/// The resolved, concrete (backend, layout, thread count) a `create`/rebuild
/// call ends up running with, after `Auto` has been settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chosen {
    pub backend: BackendChoice,
    pub layout: LayoutChoice,
    /// Always concrete: 0/negative policy threads resolve to rayon's
    /// current default pool size here.
    pub threads: usize,
}

/// Resolves a Policy's backend/layout/thread preferences into a concrete
/// [`Chosen`]:
///
/// - An explicit (non-`Auto`) backend is used as requested, or the call
///   fails with [`SolverError::NoBackend`] if this build/CPU cannot run it.
/// - `Auto` backend picks `SimdWide` when the running CPU supports it,
///   else falls back to `Scalar` (logged at `debug`).
/// - `Auto` layout always resolves to `Soa`, regardless of the resolved
///   backend -- `SimdWide`'s gather kernel reads flat SoA arrays directly,
///   and `Blocked`'s only benefit is scalar-kernel cache locality, so it's
///   never picked implicitly. An explicit layout is always honored as given.
/// - `threads <= 0` resolves to `rayon::current_num_threads()`.
pub fn choose(policy: &Policy, _model: &Model) -> SolverResult<Chosen> {
    let backend = match policy.exec.backend {
        BackendChoice::Auto => {
            if simd_available() {
                BackendChoice::SimdWide
            } else {
                log::debug!("Auto backend: no SIMD-capable CPU detected, falling back to Scalar");
                BackendChoice::Scalar
            }
        }
        BackendChoice::SimdWide => {
            if !simd_available() {
                return Err(SolverError::NoBackend);
            }
            BackendChoice::SimdWide
        }
        BackendChoice::Gpu => return Err(SolverError::NoBackend),
        other => other,
    };

    // `SimdWide` only has a gather-based kernel for flat SoA arrays; Blocked
    // is only ever chosen by an explicit request, never by Auto (its value
    // is cache locality for the scalar kernel, not SIMD dispatch).
    let layout = match policy.exec.layout {
        LayoutChoice::Auto => LayoutChoice::Soa,
        other => other,
    };

    let threads = if policy.exec.threads > 0 {
        policy.exec.threads as usize
    } else {
        rayon::current_num_threads()
    };

    Ok(Chosen { backend, layout, threads })
}
