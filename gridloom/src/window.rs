// SPDX-License-Identifier: AGPL-3.0-only

//! Bounds-checked data movement between cube buffers and windowed grids.
//!
//! [`extract_sub_grid`] and [`add_sub_grid`] move one rectangular box
//! between a dense cube buffer and a (possibly window-shifted) grid buffer.
//! Box corners are given in the grid's global coordinates with an exclusive
//! upper corner; `add_sub_grid` indexes the destination relative to the
//! grid's `lower_corner` and validates the box against the window before
//! touching anything — a bad box risks grid corruption and is a fatal
//! precondition error, not something to patch up here.
//!
//! [`add_cube_to_grid`] / [`extract_cube_from_grid`] sit one level up: they
//! split a cube whose periodic global footprint wraps the grid boundary (or
//! is clipped by the border mask) into maximal contiguous runs per axis and
//! move each piece with one box copy. They assume the buffer-equals-window
//! convention the engine uses for local grids (`window_shift == lower_corner`,
//! `window_size == size`), which `GridArray::new` sets up.

use crate::cube::modulo;
use crate::error::GridError;
use crate::tensor::GridArray;

fn box_sizes(lower: &[i32; 3], upper: &[i32; 3]) -> [i32; 3] {
    [
        upper[0] - lower[0],
        upper[1] - lower[1],
        upper[2] - lower[2],
    ]
}

fn validate_box(
    what: &str,
    lower: &[i32; 3],
    upper: &[i32; 3],
    position: &[i32; 3],
    cube: &GridArray,
    grid: &GridArray,
) -> Result<(), GridError> {
    for d in 0..3 {
        let bad = lower[d] < grid.window_shift[d]
            || lower[d] < 0
            || lower[d] >= upper[d]
            || upper[d] > grid.window_shift[d] + grid.window_size[d]
            || upper[d] <= 0
            || upper[d] - lower[d] > cube.size()[d] as i32 - position[d]
            || position[d] < 0
            || lower[d] - grid.lower_corner[d] < 0
            || upper[d] - grid.lower_corner[d] > grid.size()[d] as i32;
        if bad {
            return Err(GridError::Precondition(format!(
                "{what}: invalid box along dimension {d}: \
                 lower corner [{d}] = {}, upper corner [{d}] = {}, diff [{d}] = {}, \
                 cube position [{d}] = {}, cube size [{d}] = {}, grid size [{d}] = {}, \
                 window shift [{d}] = {}, window size [{d}] = {}, grid lower corner [{d}] = {}",
                lower[d],
                upper[d],
                upper[d] - lower[d],
                position[d],
                cube.size()[d],
                grid.size()[d],
                grid.window_shift[d],
                grid.window_size[d],
                grid.lower_corner[d]
            )));
        }
    }
    Ok(())
}

/// Copy the box `[lower, upper)` of the window-shifted grid into the cube
/// buffer starting at `position`.
///
/// # Errors
///
/// `Precondition` when the box is degenerate, escapes the grid window, or
/// does not fit the cube at `position`.
pub fn extract_sub_grid(
    lower: &[i32; 3],
    upper: &[i32; 3],
    position: Option<&[i32; 3]>,
    grid: &GridArray,
    cube: &mut GridArray,
) -> Result<(), GridError> {
    let position = position.copied().unwrap_or([0; 3]);
    validate_box("extract_sub_grid", lower, upper, &position, cube, grid)?;
    let sizes = box_sizes(lower, upper);

    for z in 0..sizes[0] {
        for y in 0..sizes[1] {
            let src_row = grid.row(
                (lower[0] + z - grid.window_shift[0]) as usize,
                (lower[1] + y - grid.window_shift[1]) as usize,
            );
            let src_off = (lower[2] - grid.window_shift[2]) as usize;
            let dst_row = cube.row_mut(
                (position[0] + z) as usize,
                (position[1] + y) as usize,
            );
            let dst_off = position[2] as usize;
            let n = sizes[2] as usize;
            dst_row[dst_off..dst_off + n].copy_from_slice(&src_row[src_off..src_off + n]);
        }
    }
    Ok(())
}

/// Accumulate the cube box starting at `position` into the grid box
/// `[lower, upper)`, addressed relative to the grid's `lower_corner`.
/// Existing grid values are never overwritten, only added to.
///
/// # Errors
///
/// `Precondition` when the box is degenerate, escapes the grid window, or
/// does not fit the cube at `position`.
pub fn add_sub_grid(
    lower: &[i32; 3],
    upper: &[i32; 3],
    position: Option<&[i32; 3]>,
    cube: &GridArray,
    grid: &mut GridArray,
) -> Result<(), GridError> {
    let position = position.copied().unwrap_or([0; 3]);
    validate_box("add_sub_grid", lower, upper, &position, cube, grid)?;
    let sizes = box_sizes(lower, upper);

    for z in 0..sizes[0] {
        for y in 0..sizes[1] {
            let src_row = cube.row((position[0] + z) as usize, (position[1] + y) as usize);
            let src_off = position[2] as usize;
            let dst_off = (lower[2] - grid.lower_corner[2]) as usize;
            let dst_row = grid.row_mut(
                (lower[0] + z - grid.lower_corner[0]) as usize,
                (lower[1] + y - grid.lower_corner[1]) as usize,
            );
            let n = sizes[2] as usize;
            for (d, s) in dst_row[dst_off..dst_off + n]
                .iter_mut()
                .zip(&src_row[src_off..src_off + n])
            {
                *d += s;
            }
        }
    }
    Ok(())
}

/// One contiguous piece of a periodically wrapped cube axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisRun {
    /// Start offset within the cube (0-based).
    pub cube_start: i32,
    /// Start index in the local grid buffer.
    pub grid_start: i32,
    /// Piece length.
    pub len: i32,
}

/// Writable index window of one storage axis after border masking: bit `2d`
/// of the mask shrinks the low face by `border_width`, bit `2d + 1` the
/// high face.
#[must_use]
pub fn valid_window(axis: usize, npts_local: i32, border_width: i32, border_mask: u32) -> (i32, i32) {
    let lo = if border_mask & (1 << (2 * axis)) != 0 {
        border_width
    } else {
        0
    };
    let hi = if border_mask & (1 << (2 * axis + 1)) != 0 {
        npts_local - border_width
    } else {
        npts_local
    };
    (lo, hi)
}

/// Decompose one cube axis `[lb, ub]` (inclusive, relative to
/// `cube_center`) into maximal runs that are contiguous in the local grid
/// after periodic wrapping and clipping to `[valid_lo, valid_hi)`.
#[must_use]
pub fn axis_runs(
    lb: i32,
    ub: i32,
    cube_center: i32,
    shift_local: i32,
    npts_global: i32,
    valid_lo: i32,
    valid_hi: i32,
) -> Vec<AxisRun> {
    let mut runs = Vec::new();
    let mut current: Option<AxisRun> = None;
    for t in lb..=ub {
        let wrapped = modulo(cube_center + t, npts_global);
        let loc = wrapped - shift_local;
        let ok = loc >= valid_lo && loc < valid_hi;
        if ok {
            if let Some(run) = current.as_mut() {
                if run.grid_start + run.len == loc {
                    run.len += 1;
                    continue;
                }
                runs.push(*run);
            }
            current = Some(AxisRun {
                cube_start: t - lb,
                grid_start: loc,
                len: 1,
            });
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

fn runs_for(
    axis: usize,
    lb_cube: &[i32; 3],
    ub_cube: &[i32; 3],
    cube_center: &[i32; 3],
    shift_local: &[i32; 3],
    npts_global: &[i32; 3],
    border_width: &[i32; 3],
    border_mask: u32,
    npts_local: i32,
) -> Vec<AxisRun> {
    let (lo, hi) = valid_window(axis, npts_local, border_width[axis], border_mask);
    axis_runs(
        lb_cube[axis],
        ub_cube[axis],
        cube_center[axis],
        shift_local[axis],
        npts_global[axis],
        lo,
        hi,
    )
}

/// Accumulate a filled cube into the periodic level grid, splitting the
/// footprint into contiguous boxes. Points masked out by the border mask or
/// falling outside the local window are skipped.
///
/// # Errors
///
/// `Precondition` propagated from [`add_sub_grid`] on inconsistent windows.
#[allow(clippy::too_many_arguments)]
pub fn add_cube_to_grid(
    cube: &GridArray,
    cube_center: &[i32; 3],
    lb_cube: &[i32; 3],
    ub_cube: &[i32; 3],
    shift_local: &[i32; 3],
    npts_global: &[i32; 3],
    border_width: &[i32; 3],
    border_mask: u32,
    grid: &mut GridArray,
) -> Result<(), GridError> {
    let size = grid.size();
    let runs: Vec<Vec<AxisRun>> = (0..3)
        .map(|a| {
            runs_for(
                a,
                lb_cube,
                ub_cube,
                cube_center,
                shift_local,
                npts_global,
                border_width,
                border_mask,
                size[a] as i32,
            )
        })
        .collect();

    for rz in &runs[0] {
        for ry in &runs[1] {
            for rx in &runs[2] {
                let lower = [
                    grid.lower_corner[0] + rz.grid_start,
                    grid.lower_corner[1] + ry.grid_start,
                    grid.lower_corner[2] + rx.grid_start,
                ];
                let upper = [lower[0] + rz.len, lower[1] + ry.len, lower[2] + rx.len];
                let position = [rz.cube_start, ry.cube_start, rx.cube_start];
                add_sub_grid(&lower, &upper, Some(&position), cube, grid)?;
            }
        }
    }
    Ok(())
}

/// Gather the periodic grid values a cube touches into the cube buffer.
/// Masked or out-of-window points stay zero.
///
/// # Errors
///
/// `Precondition` propagated from [`extract_sub_grid`].
#[allow(clippy::too_many_arguments)]
pub fn extract_cube_from_grid(
    grid: &GridArray,
    cube_center: &[i32; 3],
    lb_cube: &[i32; 3],
    ub_cube: &[i32; 3],
    shift_local: &[i32; 3],
    npts_global: &[i32; 3],
    border_width: &[i32; 3],
    border_mask: u32,
    cube: &mut GridArray,
) -> Result<(), GridError> {
    cube.zero();
    let size = grid.size();
    let runs: Vec<Vec<AxisRun>> = (0..3)
        .map(|a| {
            runs_for(
                a,
                lb_cube,
                ub_cube,
                cube_center,
                shift_local,
                npts_global,
                border_width,
                border_mask,
                size[a] as i32,
            )
        })
        .collect();

    for rz in &runs[0] {
        for ry in &runs[1] {
            for rx in &runs[2] {
                let lower = [
                    grid.window_shift[0] + rz.grid_start,
                    grid.window_shift[1] + ry.grid_start,
                    grid.window_shift[2] + rx.grid_start,
                ];
                let upper = [lower[0] + rz.len, lower[1] + ry.len, lower[2] + rx.len];
                let position = [rz.cube_start, ry.cube_start, rx.cube_start];
                extract_sub_grid(&lower, &upper, Some(&position), grid, cube)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_grid(size: [usize; 3]) -> GridArray {
        let mut g = GridArray::new(size).expect("alloc");
        for i in 0..size[0] {
            for j in 0..size[1] {
                for k in 0..size[2] {
                    g.set(i, j, k, (i * 10000 + j * 100 + k) as f64);
                }
            }
        }
        g
    }

    #[test]
    fn extract_then_add_reproduces_box() {
        let grid = numbered_grid([6, 6, 6]);
        let mut cube = GridArray::cube(3).expect("alloc");
        let lower = [1, 2, 3];
        let upper = [4, 5, 6];
        extract_sub_grid(&lower, &upper, None, &grid, &mut cube).expect("extract");

        let mut target = GridArray::new([6, 6, 6]).expect("alloc");
        add_sub_grid(&lower, &upper, None, &cube, &mut target).expect("add");
        for z in 1..4 {
            for y in 2..5 {
                for x in 3..6 {
                    assert!(
                        (target.at(z, y, x) - grid.at(z, y, x)).abs() < 1e-15,
                        "({z},{y},{x})"
                    );
                }
            }
        }
        // untouched elsewhere
        assert!(target.at(0, 0, 0).abs() < 1e-15);
    }

    #[test]
    fn add_twice_doubles() {
        let mut cube = GridArray::cube(2).expect("alloc");
        cube.set(0, 0, 0, 1.5);
        cube.set(1, 1, 1, -2.0);
        let mut grid = GridArray::new([4, 4, 4]).expect("alloc");
        let lower = [1, 1, 1];
        let upper = [3, 3, 3];
        add_sub_grid(&lower, &upper, None, &cube, &mut grid).expect("add");
        add_sub_grid(&lower, &upper, None, &cube, &mut grid).expect("add");
        assert!((grid.at(1, 1, 1) - 3.0).abs() < 1e-15);
        assert!((grid.at(2, 2, 2) + 4.0).abs() < 1e-15);
    }

    #[test]
    fn window_shift_offsets_the_source() {
        // local buffer holds global indices [10, 14) per axis
        let mut grid = GridArray::new([4, 4, 4]).expect("alloc");
        grid.window_shift = [10; 3];
        grid.window_size = [4; 3];
        grid.lower_corner = [10; 3];
        grid.set(1, 1, 1, 7.0);

        let mut cube = GridArray::cube(2).expect("alloc");
        extract_sub_grid(&[11; 3], &[13; 3], None, &grid, &mut cube).expect("extract");
        assert!((cube.at(0, 0, 0) - 7.0).abs() < 1e-15);

        let mut dst = GridArray::new([4, 4, 4]).expect("alloc");
        dst.window_shift = [10; 3];
        dst.window_size = [4; 3];
        dst.lower_corner = [10; 3];
        add_sub_grid(&[11; 3], &[13; 3], None, &cube, &mut dst).expect("add");
        assert!((dst.at(1, 1, 1) - 7.0).abs() < 1e-15);
    }

    #[test]
    fn add_rejects_degenerate_box() {
        let cube = GridArray::cube(2).expect("alloc");
        let mut grid = GridArray::new([4, 4, 4]).expect("alloc");
        let err = add_sub_grid(&[1, 1, 1], &[1, 3, 3], None, &cube, &mut grid);
        assert!(matches!(err, Err(GridError::Precondition(_))));
    }

    #[test]
    fn add_rejects_box_outside_window() {
        let cube = GridArray::cube(2).expect("alloc");
        let mut grid = GridArray::new([4, 4, 4]).expect("alloc");
        let err = add_sub_grid(&[3, 3, 3], &[5, 5, 5], None, &cube, &mut grid);
        assert!(matches!(err, Err(GridError::Precondition(_))));
    }

    #[test]
    fn add_rejects_box_larger_than_cube() {
        let cube = GridArray::cube(2).expect("alloc");
        let mut grid = GridArray::new([8, 8, 8]).expect("alloc");
        let err = add_sub_grid(&[0, 0, 0], &[3, 3, 3], None, &cube, &mut grid);
        assert!(matches!(err, Err(GridError::Precondition(_))));
    }

    #[test]
    fn error_message_names_failing_dimension() {
        let cube = GridArray::cube(2).expect("alloc");
        let mut grid = GridArray::new([4, 4, 4]).expect("alloc");
        let err = add_sub_grid(&[0, 1, 1], &[2, 1, 3], None, &cube, &mut grid).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dimension 1"), "got: {msg}");
        assert!(msg.contains("upper corner"), "got: {msg}");
    }

    #[test]
    fn axis_runs_without_wrap_is_single_run() {
        let runs = axis_runs(-2, 2, 5, 0, 20, 0, 20);
        assert_eq!(
            runs,
            vec![AxisRun {
                cube_start: 0,
                grid_start: 3,
                len: 5
            }]
        );
    }

    #[test]
    fn axis_runs_split_at_periodic_boundary() {
        // center 0, bounds [-2, 2] on a 10-point axis: wraps to 8,9,0,1,2
        let runs = axis_runs(-2, 2, 0, 0, 10, 0, 10);
        assert_eq!(runs.len(), 2);
        assert_eq!(
            runs[0],
            AxisRun {
                cube_start: 0,
                grid_start: 8,
                len: 2
            }
        );
        assert_eq!(
            runs[1],
            AxisRun {
                cube_start: 2,
                grid_start: 0,
                len: 3
            }
        );
    }

    #[test]
    fn axis_runs_clip_to_valid_window() {
        let runs = axis_runs(-2, 2, 5, 0, 20, 4, 6);
        assert_eq!(
            runs,
            vec![AxisRun {
                cube_start: 1,
                grid_start: 4,
                len: 2
            }]
        );
    }

    #[test]
    fn axis_runs_cube_larger_than_period_revisits_points() {
        // 6-point cube on a 4-point axis: every grid point is visited,
        // some twice
        let runs = axis_runs(0, 5, 0, 0, 4, 0, 4);
        let total: i32 = runs.iter().map(|r| r.len).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn add_cube_matches_pointwise_modulo_accumulation() {
        let n = 6;
        let mut cube = GridArray::cube(4).expect("alloc");
        let mut v = 1.0;
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    cube.set(i, j, k, v);
                    v += 1.0;
                }
            }
        }
        let cube_center = [4, -1, 2];
        let lb = [-1, -2, -1];
        let ub = [2, 1, 2];
        let mut grid = GridArray::new([n, n, n]).expect("alloc");
        add_cube_to_grid(
            &cube,
            &cube_center,
            &lb,
            &ub,
            &[0; 3],
            &[n as i32; 3],
            &[0; 3],
            0,
            &mut grid,
        )
        .expect("add cube");

        // brute force reference
        let mut want = GridArray::new([n, n, n]).expect("alloc");
        for (ci, t0) in (lb[0]..=ub[0]).enumerate() {
            for (cj, t1) in (lb[1]..=ub[1]).enumerate() {
                for (ck, t2) in (lb[2]..=ub[2]).enumerate() {
                    let g0 = modulo(cube_center[0] + t0, n as i32) as usize;
                    let g1 = modulo(cube_center[1] + t1, n as i32) as usize;
                    let g2 = modulo(cube_center[2] + t2, n as i32) as usize;
                    want.add(g0, g1, g2, cube.at(ci, cj, ck));
                }
            }
        }
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    assert!(
                        (grid.at(i, j, k) - want.at(i, j, k)).abs() < 1e-12,
                        "({i},{j},{k}): {} vs {}",
                        grid.at(i, j, k),
                        want.at(i, j, k)
                    );
                }
            }
        }
    }

    #[test]
    fn extract_cube_is_adjoint_of_add() {
        let n = 5;
        let grid = numbered_grid([n, n, n]);
        let mut cube = GridArray::cube(3).expect("alloc");
        let cube_center = [3, 0, 4];
        let lb = [-1; 3];
        let ub = [1; 3];
        extract_cube_from_grid(
            &grid,
            &cube_center,
            &lb,
            &ub,
            &[0; 3],
            &[n as i32; 3],
            &[0; 3],
            0,
            &mut cube,
        )
        .expect("extract cube");
        for (ci, t0) in (lb[0]..=ub[0]).enumerate() {
            for (cj, t1) in (lb[1]..=ub[1]).enumerate() {
                for (ck, t2) in (lb[2]..=ub[2]).enumerate() {
                    let g0 = modulo(cube_center[0] + t0, n as i32) as usize;
                    let g1 = modulo(cube_center[1] + t1, n as i32) as usize;
                    let g2 = modulo(cube_center[2] + t2, n as i32) as usize;
                    assert!(
                        (cube.at(ci, cj, ck) - grid.at(g0, g1, g2)).abs() < 1e-15,
                        "({ci},{cj},{ck})"
                    );
                }
            }
        }
    }

    #[test]
    fn border_mask_skips_masked_faces() {
        let n = 8;
        let mut cube = GridArray::cube(8).expect("alloc");
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    cube.set(i, j, k, 1.0);
                }
            }
        }
        // cube covers the whole axis; mask the low face of axis 0
        let mut grid = GridArray::new([n, n, n]).expect("alloc");
        add_cube_to_grid(
            &cube,
            &[0; 3],
            &[0; 3],
            &[7; 3],
            &[0; 3],
            &[n as i32; 3],
            &[2, 0, 0],
            0b01,
            &mut grid,
        )
        .expect("add cube");
        // planes 0 and 1 of axis 0 masked out
        for j in 0..n {
            for k in 0..n {
                assert!(grid.at(0, j, k).abs() < 1e-15);
                assert!(grid.at(1, j, k).abs() < 1e-15);
                assert!((grid.at(2, j, k) - 1.0).abs() < 1e-15);
            }
        }
    }
}
