// SPDX-License-Identifier: AGPL-3.0-only

//! Parallel CPU backend.
//!
//! Cube evaluation is separable: per-axis value tables are contracted with
//! the coefficient tensor through two small matrix multiplies per z-degree
//! plus a rank-1 accumulation, instead of the reference backend's per-point
//! polynomial loop. On orthorhombic cells the Gaussian factorizes into the
//! tables; on triclinic cells the coefficients are first rotated into the
//! lattice frame and the (non-separable) exponential is applied per point.
//!
//! Tasks of one level are evaluated in parallel in bounded batches; each
//! batch is folded into the level grid serially, so no two tasks ever write
//! the same grid range concurrently.

use rayon::prelude::*;

use crate::backend::{expand_task, point_displacement};
use crate::coef::{rotate_to_lattice_frame, GridFunc};
use crate::config::GridConfig;
use crate::cube::CubeProperties;
use crate::dgemm::{dgemm, DgemmParams};
use crate::error::GridError;
use crate::task::{BlockBuffer, LevelGeometry, TaskList, TaskListInput};
use crate::tensor::{alloc_f64, GridArray};
use crate::tolerances::PAR_BATCH;
use crate::window::add_cube_to_grid;

/// CPU execution context: the task list plus the per-level execution sets
/// left after optional cutoff pruning.
#[derive(Debug)]
pub struct CpuContext {
    list: TaskList,
    active: Vec<Vec<usize>>,
    apply_cutoff: bool,
    pair_cutoff: f64,
}

impl CpuContext {
    /// Build the context from creation input and configuration.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input or cutoff configuration.
    pub fn create(input: &TaskListInput<'_>, config: &GridConfig) -> Result<Self, GridError> {
        config.check()?;
        let mut ctx = Self {
            list: TaskList::build(input)?,
            active: Vec::new(),
            apply_cutoff: config.apply_cutoff,
            pair_cutoff: config.pair_cutoff,
        };
        ctx.rebuild_active();
        Ok(ctx)
    }

    /// Refresh the stored list and execution sets in place.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input.
    pub fn update(&mut self, input: &TaskListInput<'_>) -> Result<(), GridError> {
        self.list.update(input)?;
        self.rebuild_active();
        Ok(())
    }

    /// The stored task list (pruning never touches it).
    #[must_use]
    pub fn list(&self) -> &TaskList {
        &self.list
    }

    /// Number of tasks that will actually execute on `level`.
    #[must_use]
    pub fn active_tasks(&self, level: usize) -> usize {
        self.active[level].len()
    }

    fn rebuild_active(&mut self) {
        self.active.resize(self.list.nlevels, Vec::new());
        for (level, bin) in self.active.iter_mut().enumerate() {
            bin.clear();
            for &ti in &self.list.tasks_per_level[level] {
                if self.apply_cutoff {
                    let rab = self.list.tasks[ti].rab;
                    let dist = (rab[0] * rab[0] + rab[1] * rab[1] + rab[2] * rab[2]).sqrt();
                    if dist > self.pair_cutoff {
                        continue;
                    }
                }
                bin.push(ti);
            }
        }
    }

    /// Collocate the active tasks onto the level grids. Cubes of one batch
    /// are evaluated in parallel; accumulation is serial.
    ///
    /// # Errors
    ///
    /// Propagated from expansion, evaluation, or grid placement.
    pub fn collocate(
        &self,
        orthorhombic: bool,
        func: GridFunc,
        geometry: &[LevelGeometry],
        pab_blocks: &BlockBuffer,
        grids: &mut [GridArray],
    ) -> Result<(), GridError> {
        struct TaskCube {
            cube: GridArray,
            cube_center: [i32; 3],
            lb_cube: [i32; 3],
            ub_cube: [i32; 3],
            border_mask: u32,
        }

        for level in 0..self.list.nlevels {
            let geo = &geometry[level];
            let grid = &mut grids[level];
            for chunk in self.active[level].chunks(PAR_BATCH) {
                let cubes: Vec<Result<TaskCube, GridError>> = chunk
                    .par_iter()
                    .map(|&ti| {
                        let task = &self.list.tasks[ti];
                        let exp =
                            expand_task(task, &self.list, geo, orthorhombic, func, pab_blocks)?;
                        let cube = fill_cube_separable(
                            &exp.coef,
                            &exp.props,
                            geo,
                            orthorhombic,
                            exp.geom.zetp,
                        )?;
                        Ok(TaskCube {
                            cube,
                            cube_center: exp.props.cube_center,
                            lb_cube: exp.props.lb_cube,
                            ub_cube: exp.props.ub_cube,
                            border_mask: task.border_mask,
                        })
                    })
                    .collect();
                for result in cubes {
                    let tc = result?;
                    add_cube_to_grid(
                        &tc.cube,
                        &tc.cube_center,
                        &tc.lb_cube,
                        &tc.ub_cube,
                        &geo.shift_local,
                        &geo.npts_global,
                        &geo.border_width,
                        tc.border_mask,
                        grid,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Per-axis value tables `table[a][l * n_a + t]` for the separable
/// contraction. Orthorhombic tables carry the axis Gaussian; lattice-frame
/// monomial tables carry bare powers.
fn axis_tables(
    props: &CubeProperties,
    geo: &LevelGeometry,
    orthorhombic: bool,
    zetp: f64,
    nl: usize,
) -> Result<[Vec<f64>; 3], GridError> {
    let mut tables = [Vec::new(), Vec::new(), Vec::new()];
    for a in 0..3 {
        let n = props.cube_size[a] as usize;
        let mut table = alloc_f64(nl * n, "axis value table")?;
        for t in 0..n {
            let (d, weight) = if orthorhombic {
                // storage axis a is Cartesian direction 2 - a
                let dx = geo.dh[2 - a][2 - a];
                let d = f64::from(props.lb_cube[a] + t as i32) * dx - props.roffset[a];
                (d, (-zetp * d * d).exp())
            } else {
                let d = f64::from(props.lb_cube[a] + t as i32) - props.roffset[a];
                (d, 1.0)
            };
            let mut pow = weight;
            for l in 0..nl {
                table[l * n + t] = pow;
                pow *= d;
            }
        }
        tables[a] = table;
    }
    Ok(tables)
}

/// Contract a coefficient cube (`[e0][e1][e2]`, aligned with the cube's
/// storage axes) with per-axis value tables into the cube buffer.
fn contract_tables(
    coef: &GridArray,
    tables: &[Vec<f64>; 3],
    cube: &mut GridArray,
) -> Result<(), GridError> {
    let nl = coef.size()[0];
    let [nz, ny, nx] = cube.size();
    let mut t1 = alloc_f64(nl * nx, "contraction scratch")?;
    let mut t2 = alloc_f64(ny * nx, "contraction scratch")?;

    for lz in 0..nl {
        // t1[ly][i] = sum_lx coef[lz][ly][lx] * x_table[lx][i]
        let plane = &coef.as_slice()[lz * nl * nl..(lz + 1) * nl * nl];
        dgemm(
            &DgemmParams {
                transa: false,
                transb: false,
                m: nl,
                n: nx,
                k: nl,
                alpha: 1.0,
                beta: 0.0,
                lda: nl,
                ldb: nx,
                ldc: nx,
            },
            plane,
            &tables[2],
            &mut t1,
        )?;
        // t2[j][i] = sum_ly y_table[ly][j] * t1[ly][i]
        dgemm(
            &DgemmParams {
                transa: true,
                transb: false,
                m: ny,
                n: nx,
                k: nl,
                alpha: 1.0,
                beta: 0.0,
                lda: ny,
                ldb: nx,
                ldc: nx,
            },
            &tables[1],
            &t1,
            &mut t2,
        )?;
        // cube[k] += z_table[lz][k] * t2
        for k in 0..nz {
            let w = tables[0][lz * nz + k];
            if w == 0.0 {
                continue;
            }
            for j in 0..ny {
                let src = &t2[j * nx..(j + 1) * nx];
                for (dst, s) in cube.row_mut(k, j).iter_mut().zip(src) {
                    *dst += w * s;
                }
            }
        }
    }
    Ok(())
}

/// Separable cube evaluation; see the module docs for the two paths.
fn fill_cube_separable(
    coef_cart: &GridArray,
    props: &CubeProperties,
    geo: &LevelGeometry,
    orthorhombic: bool,
    zetp: f64,
) -> Result<GridArray, GridError> {
    let n = [
        props.cube_size[0] as usize,
        props.cube_size[1] as usize,
        props.cube_size[2] as usize,
    ];
    let mut cube = GridArray::new(n)?;
    let nl = coef_cart.size()[0];

    if orthorhombic {
        let tables = axis_tables(props, geo, true, zetp, nl)?;
        contract_tables(coef_cart, &tables, &mut cube)?;
    } else {
        let coef_latt = rotate_to_lattice_frame(&geo.dh, coef_cart)?;
        let tables = axis_tables(props, geo, false, zetp, nl)?;
        contract_tables(&coef_latt, &tables, &mut cube)?;
        for iz in 0..n[0] {
            for iy in 0..n[1] {
                for ix in 0..n[2] {
                    let d = point_displacement(props, geo, false, [iz, iy, ix]);
                    let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                    let v = cube.at(iz, iy, ix) * (-zetp * r2).exp();
                    cube.set(iz, iy, ix, v);
                }
            }
        }
    }
    Ok(cube)
}
