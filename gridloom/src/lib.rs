// SPDX-License-Identifier: AGPL-3.0-only

//! gridLoom — task-list collocation/integration engine.
//!
//! Maps products of localized Gaussian basis functions onto and from
//! periodic real-space grids at multiple resolution levels, with support
//! for window-shifted (distributed) grids and non-orthogonal cells.
//!
//! ## Modules
//!   - `basis` — Cartesian angular-momentum indexing, basis-set contract
//!   - `tensor` — dense 3-D arrays with shape/stride/window metadata
//!   - `coef` — pair-coefficient expansions, layouts, frame rotations
//!   - `cube` — discretized footprint of a localized function
//!   - `window` — bounds-checked cube/grid copies with periodic wrapping
//!   - `dgemm` — reference dense matrix multiply + descriptor
//!   - `task` — task descriptors, task-list storage, block buffers
//!   - `backend` — reference and CPU execution contexts, kind dispatch
//!   - `dispatch` — the task-list handle (create/update, collocate,
//!     integrate, validation mode)
//!   - `validate` — element-wise grid comparison
//!   - `config` — explicit engine configuration, no global state
//!   - `tolerances` — every numeric threshold, documented in one place
//!   - `error` — typed fail-fast errors
//!
//! ## Entry points
//!
//! [`TaskListHandle::create_or_update`] builds a handle bound to one
//! backend; [`TaskListHandle::collocate`] and
//! [`TaskListHandle::integrate`] run the passes; dropping the handle
//! releases all contexts.

pub mod backend;
pub mod basis;
pub mod coef;
pub mod config;
pub mod cube;
pub mod dgemm;
pub mod dispatch;
pub mod error;
pub mod task;
pub mod tensor;
pub mod tolerances;
pub mod validate;
pub mod window;

pub use backend::{BackendKind, IntegrateOptions};
pub use basis::BasisSet;
pub use coef::GridFunc;
pub use config::GridConfig;
pub use dispatch::TaskListHandle;
pub use error::GridError;
pub use task::{BlockBuffer, LevelGeometry, TaskDescriptor, TaskListInput};
pub use tensor::GridArray;
