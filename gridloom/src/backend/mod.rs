// SPDX-License-Identifier: AGPL-3.0-only

//! Backend kinds and the closed dispatch surface.
//!
//! The engine ships two execution contexts: the scalar reference backend
//! (`ref`) and the parallel CPU backend (`cpu`). The `gpu` and `hybrid`
//! kinds exist in the dispatch surface so task lists built against an
//! accelerated build keep their meaning, but selecting them here fails at
//! creation — device kernels live out of tree. `auto` resolves by
//! availability priority, preferring the fastest capable context.

use std::fmt;

use serde::Deserialize;

use crate::coef::{prepare_alpha, prepare_coef, prepare_pab, GridFunc};
use crate::config::GridConfig;
use crate::cube::{compute_cube_properties, CubeProperties};
use crate::error::GridError;
use crate::task::{BlockBuffer, LevelGeometry, TaskDescriptor, TaskGeometry, TaskList, TaskListInput};
use crate::tensor::GridArray;

pub mod cpu;
pub mod reference;

use cpu::CpuContext;
use reference::RefContext;

/// Which execution context a task list runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Scalar reference implementation; the correctness baseline.
    Ref,
    /// Parallel CPU implementation.
    Cpu,
    /// Device backend (not built into this crate).
    Gpu,
    /// Mixed host/device backend (not built into this crate).
    Hybrid,
    /// Pick the best available backend at creation.
    Auto,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ref => "ref",
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Hybrid => "hybrid",
            Self::Auto => "auto",
        };
        write!(f, "{name}")
    }
}

/// Resolve the requested kind to a buildable one.
///
/// Selection priority for `auto`: cpu, then ref (best available first).
///
/// # Errors
///
/// `BackendUnavailable` for kinds without an in-tree context.
pub fn resolve_backend(requested: BackendKind) -> Result<BackendKind, GridError> {
    match requested {
        BackendKind::Ref => Ok(BackendKind::Ref),
        BackendKind::Cpu | BackendKind::Auto => Ok(BackendKind::Cpu),
        BackendKind::Gpu | BackendKind::Hybrid => {
            Err(GridError::BackendUnavailable { kind: requested })
        }
    }
}

/// The closed set of execution contexts a handle can own.
#[derive(Debug)]
pub enum ActiveContext {
    /// Reference context.
    Ref(RefContext),
    /// CPU context.
    Cpu(CpuContext),
}

impl ActiveContext {
    /// Build a context of the (already resolved) kind.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input; `BackendUnavailable` when the
    /// kind has no in-tree context.
    pub fn create(
        kind: BackendKind,
        input: &TaskListInput<'_>,
        config: &GridConfig,
    ) -> Result<Self, GridError> {
        match kind {
            BackendKind::Ref => Ok(Self::Ref(RefContext::create(input)?)),
            BackendKind::Cpu => Ok(Self::Cpu(CpuContext::create(input, config)?)),
            _ => Err(GridError::BackendUnavailable { kind }),
        }
    }

    /// Kind of the held context.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Ref(_) => BackendKind::Ref,
            Self::Cpu(_) => BackendKind::Cpu,
        }
    }

    /// Refresh the held context in place from new input.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input.
    pub fn update(&mut self, input: &TaskListInput<'_>) -> Result<(), GridError> {
        match self {
            Self::Ref(ctx) => ctx.update(input),
            Self::Cpu(ctx) => ctx.update(input),
        }
    }

    /// Dispatch a collocation pass.
    ///
    /// # Errors
    ///
    /// Propagated from the context.
    pub fn collocate(
        &self,
        orthorhombic: bool,
        func: GridFunc,
        geometry: &[LevelGeometry],
        pab_blocks: &BlockBuffer,
        grids: &mut [GridArray],
    ) -> Result<(), GridError> {
        match self {
            Self::Ref(ctx) => ctx.collocate(orthorhombic, func, geometry, pab_blocks, grids),
            Self::Cpu(ctx) => ctx.collocate(orthorhombic, func, geometry, pab_blocks, grids),
        }
    }

    /// Total number of stored tasks.
    #[must_use]
    pub fn ntasks(&self) -> usize {
        match self {
            Self::Ref(ctx) => ctx.list().ntasks(),
            Self::Cpu(ctx) => ctx.list().ntasks(),
        }
    }

    /// Number of grid levels the stored list was built for.
    #[must_use]
    pub fn nlevels(&self) -> usize {
        match self {
            Self::Ref(ctx) => ctx.list().nlevels,
            Self::Cpu(ctx) => ctx.list().nlevels,
        }
    }
}

/// What an integration pass computes besides the Hamiltonian blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrateOptions {
    /// Integrate the kinetic-energy density instead of the density.
    pub compute_tau: bool,
    /// Accumulate per-atom position-gradient contributions.
    pub calculate_forces: bool,
    /// Accumulate atom-centered strain-derivative contributions.
    pub compute_virial: bool,
}

/// Cartesian-frame expansion of one task, ready for cube evaluation.
pub(crate) struct TaskExpansion {
    /// Pair geometry.
    pub geom: TaskGeometry,
    /// Coefficient cube `[lz][ly][lx]` centered at `rp`.
    pub coef: GridArray,
    /// Discretized footprint on this level's grid.
    pub props: CubeProperties,
}

/// Shared front half of every per-task kernel: block lookup, pab
/// preparation, alpha tables, coefficient contraction, cube footprint.
pub(crate) fn expand_task(
    task: &TaskDescriptor,
    list: &TaskList,
    geo: &LevelGeometry,
    orthorhombic: bool,
    func: GridFunc,
    pab_blocks: &BlockBuffer,
) -> Result<TaskExpansion, GridError> {
    let geom = TaskGeometry::for_task(task, list);
    if !(geom.zetp > 0.0) {
        return Err(GridError::Precondition(format!(
            "non-positive combined exponent {} for atoms {}/{}",
            geom.zetp, task.iatom, task.jatom
        )));
    }
    let pab = pab_blocks.block(task.block_num, geom.block_len)?;
    let prep = prepare_pab(
        func,
        pab,
        geom.block_ld,
        geom.la_min,
        geom.la_max,
        geom.lb_min,
        geom.lb_max,
        geom.zeta,
        geom.zetb,
    )?;
    let lp = prep.la_max + prep.lb_max;
    let alpha = prepare_alpha(&geom.ra, &geom.rb, &geom.rp, prep.la_max, prep.lb_max)?;
    let coef = prepare_coef(
        [prep.la_min, prep.lb_min],
        [prep.la_max, prep.lb_max],
        lp,
        geom.prefactor,
        &alpha,
        &prep.cab,
        prep.cab_ld,
    )?;
    let props = compute_cube_properties(orthorhombic, task.radius, &geo.dh, &geo.dh_inv, &geom.rp);
    Ok(TaskExpansion { geom, coef, props })
}

/// Cartesian displacement of one cube point from the product center.
/// `idx` are 0-based cube indices (storage order); the result is `[x, y, z]`.
pub(crate) fn point_displacement(
    props: &CubeProperties,
    geo: &LevelGeometry,
    orthorhombic: bool,
    idx: [usize; 3],
) -> [f64; 3] {
    let t = [
        f64::from(props.lb_cube[0] + idx[0] as i32),
        f64::from(props.lb_cube[1] + idx[1] as i32),
        f64::from(props.lb_cube[2] + idx[2] as i32),
    ];
    if orthorhombic {
        // storage axis a is Cartesian direction 2 - a
        let dx = [geo.dh[2][2], geo.dh[1][1], geo.dh[0][0]];
        [
            t[2] * dx[2] - props.roffset[2],
            t[1] * dx[1] - props.roffset[1],
            t[0] * dx[0] - props.roffset[0],
        ]
    } else {
        let mut cart = [0.0; 3];
        for (a, ti) in t.iter().enumerate() {
            let delta = ti - props.roffset[a];
            let dir = 2 - a;
            for (c, out) in cart.iter_mut().enumerate() {
                *out += delta * geo.dh[dir][c];
            }
        }
        cart
    }
}
