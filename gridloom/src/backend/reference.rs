// SPDX-License-Identifier: AGPL-3.0-only

//! Scalar reference backend.
//!
//! Every quantity is evaluated point by point in Cartesian coordinates,
//! with no separability tricks and no frame rotation. The faster backends
//! validate against this baseline. This is also the only backend required
//! to support integration (Hamiltonian blocks, gradient and
//! strain-derivative contributions).

use crate::backend::{expand_task, point_displacement, IntegrateOptions};
use crate::basis::{coset, ncoset};
use crate::coef::{
    for_each_component, prepare_alpha, tau_hab_from_vab, Alpha, GridFunc,
};
use crate::cube::{compute_cube_properties, CubeProperties};
use crate::error::GridError;
use crate::task::{
    BlockBuffer, LevelGeometry, TaskDescriptor, TaskGeometry, TaskList, TaskListInput,
};
use crate::tensor::{alloc_f64, GridArray};
use crate::window::{add_cube_to_grid, extract_cube_from_grid};

/// Reference execution context: the task list and nothing else.
#[derive(Debug)]
pub struct RefContext {
    list: TaskList,
}

impl RefContext {
    /// Build the context from creation input.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input.
    pub fn create(input: &TaskListInput<'_>) -> Result<Self, GridError> {
        Ok(Self {
            list: TaskList::build(input)?,
        })
    }

    /// Refresh the stored task list in place.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input.
    pub fn update(&mut self, input: &TaskListInput<'_>) -> Result<(), GridError> {
        self.list.update(input)
    }

    /// The stored task list.
    #[must_use]
    pub fn list(&self) -> &TaskList {
        &self.list
    }

    /// Collocate every task onto the level grids. Contributions are summed;
    /// the grids are not zeroed here.
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
        for level in 0..self.list.nlevels {
            let geo = &geometry[level];
            let grid = &mut grids[level];
            for &ti in &self.list.tasks_per_level[level] {
                let task = &self.list.tasks[ti];
                let exp = expand_task(task, &self.list, geo, orthorhombic, func, pab_blocks)?;
                let cube = fill_cube(&exp.coef, &exp.props, geo, orthorhombic, exp.geom.zetp)?;
                add_cube_to_grid(
                    &cube,
                    &exp.props.cube_center,
                    &exp.props.lb_cube,
                    &exp.props.ub_cube,
                    &geo.shift_local,
                    &geo.npts_global,
                    &geo.border_width,
                    task.border_mask,
                    grid,
                )?;
            }
        }
        Ok(())
    }

    /// Project the level grids back onto basis-pair blocks, optionally with
    /// gradient and strain-derivative contributions.
    ///
    /// # Errors
    ///
    /// `Precondition` when forces or the virial are requested together with
    /// tau integration (not implemented); otherwise propagated from the
    /// per-task kernels.
    #[allow(clippy::too_many_arguments)]
    pub fn integrate(
        &self,
        orthorhombic: bool,
        opts: IntegrateOptions,
        geometry: &[LevelGeometry],
        pab_blocks: &BlockBuffer,
        grids: &[GridArray],
        hab_blocks: &mut BlockBuffer,
        mut forces: Option<&mut [[f64; 3]]>,
        mut virial: Option<&mut [[f64; 3]; 3]>,
    ) -> Result<(), GridError> {
        if opts.compute_tau && (opts.calculate_forces || opts.compute_virial) {
            return Err(GridError::Precondition(
                "force/virial contributions are not implemented for tau integration".into(),
            ));
        }
        for level in 0..self.list.nlevels {
            let geo = &geometry[level];
            let grid = &grids[level];
            for &ti in &self.list.tasks_per_level[level] {
                let task = &self.list.tasks[ti];
                self.integrate_task(
                    task,
                    geo,
                    orthorhombic,
                    opts,
                    pab_blocks,
                    grid,
                    hab_blocks,
                    forces.as_deref_mut(),
                    virial.as_deref_mut(),
                )?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn integrate_task(
        &self,
        task: &TaskDescriptor,
        geo: &LevelGeometry,
        orthorhombic: bool,
        opts: IntegrateOptions,
        pab_blocks: &BlockBuffer,
        grid: &GridArray,
        hab_blocks: &mut BlockBuffer,
        forces: Option<&mut [[f64; 3]]>,
        virial: Option<&mut [[f64; 3]; 3]>,
    ) -> Result<(), GridError> {
        let geom = TaskGeometry::for_task(task, &self.list);
        if !(geom.zetp > 0.0) {
            return Err(GridError::Precondition(format!(
                "non-positive combined exponent {} for atoms {}/{}",
                geom.zetp, task.iatom, task.jatom
            )));
        }
        let tau_ext = i32::from(opts.compute_tau);
        let der_ext = if opts.compute_virial {
            2
        } else {
            i32::from(opts.calculate_forces)
        };
        let la_vab = geom.la_max + tau_ext + der_ext;
        let lb_vab = geom.lb_max + tau_ext + der_ext;
        let lp = la_vab + lb_vab;

        let alpha = prepare_alpha(&geom.ra, &geom.rb, &geom.rp, la_vab, lb_vab)?;
        let props =
            compute_cube_properties(orthorhombic, task.radius, &geo.dh, &geo.dh_inv, &geom.rp);
        let mut cube = GridArray::new([
            props.cube_size[0] as usize,
            props.cube_size[1] as usize,
            props.cube_size[2] as usize,
        ])?;
        extract_cube_from_grid(
            grid,
            &props.cube_center,
            &props.lb_cube,
            &props.ub_cube,
            &geo.shift_local,
            &geo.npts_global,
            &geo.border_width,
            task.border_mask,
            &mut cube,
        )?;
        let moments = cube_moments(&cube, &props, geo, orthorhombic, geom.zetp, lp)?;
        let vab = vab_from_moments(&moments, &alpha, la_vab, lb_vab, geom.prefactor)?;
        let vab_ld = ncoset(la_vab);

        let hab = hab_blocks.block_mut(task.block_num, geom.block_len)?;
        if opts.compute_tau {
            tau_hab_from_vab(
                &vab,
                vab_ld,
                geom.la_min,
                geom.la_max,
                geom.lb_min,
                geom.lb_max,
                geom.zeta,
                geom.zetb,
                hab,
                geom.block_ld,
            );
        } else {
            for_each_component(geom.lb_min, geom.lb_max, |bx, by, bz| {
                let jco = coset(bx, by, bz);
                for_each_component(geom.la_min, geom.la_max, |ax, ay, az| {
                    let ico = coset(ax, ay, az);
                    hab[jco * geom.block_ld + ico] += vab[jco * vab_ld + ico];
                });
            });
        }

        if opts.calculate_forces || opts.compute_virial {
            let pab = pab_blocks.block(task.block_num, geom.block_len)?;
            accumulate_derivatives(
                task, &geom, pab, &vab, vab_ld, opts, forces, virial,
            );
        }
        Ok(())
    }
}

/// Evaluate the expansion times the product Gaussian on every cube point.
fn fill_cube(
    coef: &GridArray,
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
    let lp = coef.size()[0] - 1;
    let mut xp = alloc_f64(lp + 1, "power scratch")?;
    let mut yp = alloc_f64(lp + 1, "power scratch")?;
    let mut zp = alloc_f64(lp + 1, "power scratch")?;

    for iz in 0..n[0] {
        for iy in 0..n[1] {
            for ix in 0..n[2] {
                let d = point_displacement(props, geo, orthorhombic, [iz, iy, ix]);
                let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                let gauss = (-zetp * r2).exp();
                powers(d, lp, &mut xp, &mut yp, &mut zp);
                let mut val = 0.0;
                for lz in 0..=lp {
                    for ly in 0..=lp - lz {
                        for lx in 0..=lp - lz - ly {
                            val += coef.at(lz, ly, lx) * zp[lz] * yp[ly] * xp[lx];
                        }
                    }
                }
                cube.set(iz, iy, ix, gauss * val);
            }
        }
    }
    Ok(cube)
}

/// Accumulate Gaussian-weighted Cartesian moments of the extracted cube.
fn cube_moments(
    cube: &GridArray,
    props: &CubeProperties,
    geo: &LevelGeometry,
    orthorhombic: bool,
    zetp: f64,
    lp: i32,
) -> Result<GridArray, GridError> {
    let lp = lp as usize;
    let mut m = GridArray::cube(lp + 1)?;
    let n = cube.size();
    let mut xp = alloc_f64(lp + 1, "power scratch")?;
    let mut yp = alloc_f64(lp + 1, "power scratch")?;
    let mut zp = alloc_f64(lp + 1, "power scratch")?;

    for iz in 0..n[0] {
        for iy in 0..n[1] {
            for ix in 0..n[2] {
                let v = cube.at(iz, iy, ix);
                if v == 0.0 {
                    continue;
                }
                let d = point_displacement(props, geo, orthorhombic, [iz, iy, ix]);
                let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                let w = v * (-zetp * r2).exp();
                powers(d, lp, &mut xp, &mut yp, &mut zp);
                for lz in 0..=lp {
                    for ly in 0..=lp - lz {
                        for lx in 0..=lp - lz - ly {
                            m.add(lz, ly, lx, w * zp[lz] * yp[ly] * xp[lx]);
                        }
                    }
                }
            }
        }
    }
    Ok(m)
}

#[inline]
fn powers(d: [f64; 3], lp: usize, xp: &mut [f64], yp: &mut [f64], zp: &mut [f64]) {
    xp[0] = 1.0;
    yp[0] = 1.0;
    zp[0] = 1.0;
    for l in 1..=lp {
        xp[l] = xp[l - 1] * d[0];
        yp[l] = yp[l - 1] * d[1];
        zp[l] = zp[l - 1] * d[2];
    }
}

/// Contract moments with the alpha tables into per-component-pair
/// integrals `vab[jco][ico]`, all shells from 0 up to the given maxima.
fn vab_from_moments(
    moments: &GridArray,
    alpha: &Alpha,
    la_max: i32,
    lb_max: i32,
    prefactor: f64,
) -> Result<Vec<f64>, GridError> {
    let ld = ncoset(la_max);
    let mut vab = alloc_f64(ncoset(lb_max) * ld, "vab block")?;
    for_each_component(0, lb_max, |bx, by, bz| {
        let jco = coset(bx, by, bz);
        for_each_component(0, la_max, |ax, ay, az| {
            let mut acc = 0.0;
            for lzp in 0..=az + bz {
                let wz = alpha.at(2, bz, az, lzp);
                for lyp in 0..=ay + by {
                    let wy = wz * alpha.at(1, by, ay, lyp);
                    for lxp in 0..=ax + bx {
                        acc += wy
                            * alpha.at(0, bx, ax, lxp)
                            * moments.at(lzp as usize, lyp as usize, lxp as usize);
                    }
                }
            }
            vab[jco * ld + coset(ax, ay, az)] = prefactor * acc;
        });
    });
    Ok(vab)
}

#[inline]
fn vab_at(vab: &[f64], ld: usize, a: [i32; 3], b: [i32; 3]) -> f64 {
    vab[coset(b[0], b[1], b[2]) * ld + coset(a[0], a[1], a[2])]
}

/// Fold the extended integrals into per-atom gradient contributions
/// (`dE/dR`) and atom-centered strain-derivative contributions.
#[allow(clippy::too_many_arguments)]
fn accumulate_derivatives(
    task: &TaskDescriptor,
    geom: &TaskGeometry,
    pab: &[f64],
    vab: &[f64],
    vab_ld: usize,
    opts: IntegrateOptions,
    mut forces: Option<&mut [[f64; 3]]>,
    mut virial: Option<&mut [[f64; 3]; 3]>,
) {
    for_each_component(geom.lb_min, geom.lb_max, |bx, by, bz| {
        let b = [bx, by, bz];
        let jco = coset(bx, by, bz);
        for_each_component(geom.la_min, geom.la_max, |ax, ay, az| {
            let a = [ax, ay, az];
            let p = pab[jco * geom.block_ld + coset(ax, ay, az)];
            for c in 0..3 {
                let mut ap = a;
                ap[c] += 1;
                let mut bp = b;
                bp[c] += 1;
                let mut da = 2.0 * geom.zeta * vab_at(vab, vab_ld, ap, b);
                if a[c] >= 1 {
                    let mut am = a;
                    am[c] -= 1;
                    da -= f64::from(a[c]) * vab_at(vab, vab_ld, am, b);
                }
                let mut db = 2.0 * geom.zetb * vab_at(vab, vab_ld, a, bp);
                if b[c] >= 1 {
                    let mut bm = b;
                    bm[c] -= 1;
                    db -= f64::from(b[c]) * vab_at(vab, vab_ld, a, bm);
                }
                if opts.calculate_forces {
                    if let Some(f) = forces.as_deref_mut() {
                        f[task.iatom][c] += p * da;
                        f[task.jatom][c] += p * db;
                    }
                }
                if opts.compute_virial {
                    if let Some(w) = virial.as_deref_mut() {
                        for cp in 0..3 {
                            let mut app = ap;
                            app[cp] += 1;
                            let mut wa = 2.0 * geom.zeta * vab_at(vab, vab_ld, app, b);
                            if a[c] >= 1 {
                                let mut amp = a;
                                amp[c] -= 1;
                                amp[cp] += 1;
                                wa -= f64::from(a[c]) * vab_at(vab, vab_ld, amp, b);
                            }
                            let mut bpp = bp;
                            bpp[cp] += 1;
                            let mut wb = 2.0 * geom.zetb * vab_at(vab, vab_ld, a, bpp);
                            if b[c] >= 1 {
                                let mut bmp = b;
                                bmp[c] -= 1;
                                bmp[cp] += 1;
                                wb -= f64::from(b[c]) * vab_at(vab, vab_ld, a, bmp);
                            }
                            w[c][cp] += p * (wa + wb);
                        }
                    }
                }
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::BasisSet;
    use crate::cube::invert_cell;

    fn s_system(zet_a: f64, zet_b: f64, rab: [f64; 3], radius: f64) -> (TaskList, BlockBuffer) {
        let input = TaskListInput {
            nlevels: 1,
            atom_positions: &[[1.1, 1.3, 0.9], [0.0; 3]],
            atom_kinds: &[0, 1],
            basis_sets: &[
                BasisSet {
                    lmin: vec![0],
                    lmax: vec![0],
                    npgf: vec![1],
                    zet: vec![vec![zet_a]],
                },
                BasisSet {
                    lmin: vec![0],
                    lmax: vec![0],
                    npgf: vec![1],
                    zet: vec![vec![zet_b]],
                },
            ],
            block_offsets: &[0],
            tasks: &[TaskDescriptor {
                level: 0,
                iatom: 0,
                jatom: 1,
                iset: 0,
                jset: 0,
                ipgf: 0,
                jpgf: 0,
                border_mask: 0,
                block_num: 0,
                radius,
                rab,
            }],
        };
        let list = TaskList::build(&input).expect("build");
        let pab = BlockBuffer::from_data(vec![0], vec![1.0]);
        (list, pab)
    }

    fn ortho_geo(n: i32, h: f64) -> LevelGeometry {
        let dh = [[h, 0.0, 0.0], [0.0, h, 0.0], [0.0, 0.0, h]];
        LevelGeometry {
            npts_global: [n; 3],
            shift_local: [0; 3],
            border_width: [0; 3],
            dh_inv: invert_cell(&dh),
            dh,
        }
    }

    #[test]
    fn collocated_s_pair_matches_direct_formula() {
        let (list, pab) = s_system(0.9, 1.2, [0.4, -0.3, 0.2], 3.0);
        let ctx = RefContext { list };
        let geo = ortho_geo(24, 0.35);
        let mut grid = GridArray::new([24, 24, 24]).expect("alloc");
        ctx.collocate(true, GridFunc::Density, &[geo.clone()], &pab, std::slice::from_mut(&mut grid))
            .expect("collocate");

        let g = TaskGeometry::for_task(&ctx.list.tasks[0], &ctx.list);
        // compare a handful of points near the center against the closed form
        let mut checked = 0;
        for i in 0..24usize {
            for j in 0..24usize {
                for k in 0..24usize {
                    // storage (i, j, k) -> cartesian point (k, j, i) * h
                    let r = [k as f64 * 0.35, j as f64 * 0.35, i as f64 * 0.35];
                    let d2 = (r[0] - g.rp[0]).powi(2)
                        + (r[1] - g.rp[1]).powi(2)
                        + (r[2] - g.rp[2]).powi(2);
                    if d2 > 2.0 {
                        continue;
                    }
                    let want = g.prefactor * (-g.zetp * d2).exp();
                    let got = grid.at(i, j, k);
                    assert!(
                        (got - want).abs() < 1e-12 * want.abs().max(1.0),
                        "({i},{j},{k}): {got} vs {want}"
                    );
                    checked += 1;
                }
            }
        }
        assert!(checked > 10, "test must actually cover points");
    }

    #[test]
    fn integrate_of_unit_potential_gives_overlap() {
        // with V == 1 everywhere, hab[0][0] is the lattice sum of the pair
        // Gaussian: prefactor * (pi/zetp)^(3/2) / h^3 for a well-resolved,
        // well-contained product
        let (list, pab) = s_system(1.1, 0.9, [0.5, 0.0, -0.25], 4.5);
        let ctx = RefContext { list };
        let h = 0.3;
        let n = 40;
        let geo = ortho_geo(n, h);
        let mut grid = GridArray::new([n as usize; 3]).expect("alloc");
        grid.as_mut_slice().iter_mut().for_each(|v| *v = 1.0);

        let mut hab = BlockBuffer::new(vec![0], 1).expect("alloc");
        ctx.integrate(
            true,
            IntegrateOptions::default(),
            &[geo],
            &pab,
            std::slice::from_ref(&grid),
            &mut hab,
            None,
            None,
        )
        .expect("integrate");

        let g = TaskGeometry::for_task(&ctx.list.tasks[0], &ctx.list);
        let want = g.prefactor * (std::f64::consts::PI / g.zetp).powf(1.5) / (h * h * h);
        let got = hab.block(0, 1).expect("block")[0];
        assert!(
            ((got - want) / want).abs() < 1e-8,
            "overlap sum: {got} vs {want}"
        );
    }

    #[test]
    fn tau_with_forces_is_rejected() {
        let (list, pab) = s_system(1.0, 1.0, [0.3, 0.0, 0.0], 3.0);
        let ctx = RefContext { list };
        let geo = ortho_geo(16, 0.4);
        let grid = GridArray::new([16; 3]).expect("alloc");
        let mut hab = BlockBuffer::new(vec![0], 1).expect("alloc");
        let mut forces = vec![[0.0; 3]; 2];
        let err = ctx.integrate(
            true,
            IntegrateOptions {
                compute_tau: true,
                calculate_forces: true,
                compute_virial: false,
            },
            &[geo],
            &pab,
            std::slice::from_ref(&grid),
            &mut hab,
            Some(&mut forces),
            None,
        );
        assert!(matches!(err, Err(GridError::Precondition(_))));
    }
}
