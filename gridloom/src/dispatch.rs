// SPDX-License-Identifier: AGPL-3.0-only

//! Task-list handle: creation, update, collocation, integration.
//!
//! The handle owns exactly one execution context of the kind resolved at
//! creation (the kind never changes over the handle's lifetime; updates
//! only refresh task content) plus, when validation is enabled, a second
//! reference context that shadows every collocation. Dropping the handle
//! releases everything.

use crate::backend::{resolve_backend, ActiveContext, BackendKind, IntegrateOptions};
use crate::coef::GridFunc;
use crate::config::GridConfig;
use crate::error::GridError;
use crate::task::{BlockBuffer, LevelGeometry, TaskListInput};
use crate::tensor::GridArray;
use crate::validate::compare_grids;

/// An owned task list bound to one backend context.
#[derive(Debug)]
pub struct TaskListHandle {
    config: GridConfig,
    backend: BackendKind,
    context: ActiveContext,
    validation: Option<ActiveContext>,
}

impl TaskListHandle {
    /// Create a handle, or refresh an existing one in place.
    ///
    /// On first creation the backend kind is resolved from `config` and
    /// fixed for the handle's lifetime; validation additionally builds a
    /// reference context unless the primary already is the reference. On
    /// update, both contexts re-bin the new tasks without being recreated,
    /// and `config` is ignored in favor of the stored one.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` for backends without an in-tree context;
    /// `Precondition` on inconsistent input or configuration.
    pub fn create_or_update(
        existing: Option<TaskListHandle>,
        config: &GridConfig,
        input: &TaskListInput<'_>,
    ) -> Result<TaskListHandle, GridError> {
        if let Some(mut handle) = existing {
            handle.context.update(input)?;
            if let Some(validation) = handle.validation.as_mut() {
                validation.update(input)?;
            }
            return Ok(handle);
        }

        config.check()?;
        let backend = resolve_backend(config.backend)?;
        let context = ActiveContext::create(backend, input, config)?;
        let validation = if config.validate && backend != BackendKind::Ref {
            Some(ActiveContext::create(BackendKind::Ref, input, config)?)
        } else {
            None
        };
        Ok(TaskListHandle {
            config: *config,
            backend,
            context,
            validation,
        })
    }

    /// The resolved backend kind.
    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Whether every collocation is shadowed by the reference backend.
    #[must_use]
    pub fn validation_enabled(&self) -> bool {
        self.validation.is_some()
    }

    /// Total number of stored tasks.
    #[must_use]
    pub fn ntasks(&self) -> usize {
        self.context.ntasks()
    }

    /// Number of grid levels.
    #[must_use]
    pub fn nlevels(&self) -> usize {
        self.context.nlevels()
    }

    fn check_level_args(
        &self,
        geometry: &[LevelGeometry],
        ngrids: usize,
    ) -> Result<(), GridError> {
        let nlevels = self.nlevels();
        if geometry.len() != nlevels || ngrids != nlevels {
            return Err(GridError::Precondition(format!(
                "level argument mismatch: {} geometry entries and {} grids for {} levels",
                geometry.len(),
                ngrids,
                nlevels
            )));
        }
        Ok(())
    }

    /// Collocate all tasks onto the level grids. Contributions from
    /// different tasks are summed into whatever the grids already hold.
    ///
    /// With validation enabled, the reference backend additionally runs on
    /// fresh zeroed copies of the grids and every point is compared; a
    /// disagreement beyond the documented tolerance is fatal.
    ///
    /// # Errors
    ///
    /// `Precondition` on mismatched level arguments, `ValidationMismatch`
    /// on backend disagreement, otherwise propagated from the backend.
    pub fn collocate(
        &self,
        orthorhombic: bool,
        func: GridFunc,
        geometry: &[LevelGeometry],
        pab_blocks: &BlockBuffer,
        grids: &mut [GridArray],
    ) -> Result<(), GridError> {
        self.check_level_args(geometry, grids.len())?;

        // Snapshot for the validation pass: the primary's own contribution
        // is the difference against the incoming grids.
        let before: Option<Vec<GridArray>> = if self.validation.is_some() {
            Some(grids.to_vec())
        } else {
            None
        };

        self.context
            .collocate(orthorhombic, func, geometry, pab_blocks, grids)?;

        if let (Some(validation), Some(before)) = (self.validation.as_ref(), before) {
            let mut ref_grids: Vec<GridArray> = Vec::with_capacity(grids.len());
            for grid in grids.iter() {
                ref_grids.push(grid.like()?);
            }
            validation.collocate(orthorhombic, func, geometry, pab_blocks, &mut ref_grids)?;
            for (level, (grid, (mut ref_grid, base))) in grids
                .iter()
                .zip(ref_grids.into_iter().zip(before.into_iter()))
                .enumerate()
            {
                // fold the pre-existing content into the reference result so
                // both sides describe the same final grid
                for (r, b) in ref_grid
                    .as_mut_slice()
                    .iter_mut()
                    .zip(base.as_slice().iter())
                {
                    *r += b;
                }
                compare_grids(level, grid, &ref_grid)?;
            }
        }
        Ok(())
    }

    /// Project level grids back onto Hamiltonian blocks, optionally
    /// accumulating per-atom gradient and strain-derivative contributions.
    /// Only the reference backend supports this operation.
    ///
    /// # Errors
    ///
    /// `Precondition` when the handle's backend is not `ref`; otherwise
    /// propagated from the reference context.
    #[allow(clippy::too_many_arguments)]
    pub fn integrate(
        &self,
        orthorhombic: bool,
        opts: IntegrateOptions,
        geometry: &[LevelGeometry],
        pab_blocks: &BlockBuffer,
        grids: &[GridArray],
        hab_blocks: &mut BlockBuffer,
        forces: Option<&mut [[f64; 3]]>,
        virial: Option<&mut [[f64; 3]; 3]>,
    ) -> Result<(), GridError> {
        self.check_level_args(geometry, grids.len())?;
        match &self.context {
            ActiveContext::Ref(ctx) => ctx.integrate(
                orthorhombic,
                opts,
                geometry,
                pab_blocks,
                grids,
                hab_blocks,
                forces,
                virial,
            ),
            other => Err(GridError::Precondition(format!(
                "integrate is only implemented for the ref backend, not {}",
                other.kind()
            ))),
        }
    }

    /// The stored configuration.
    #[must_use]
    pub fn config(&self) -> &GridConfig {
        &self.config
    }
}
