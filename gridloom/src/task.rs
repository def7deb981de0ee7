// SPDX-License-Identifier: AGPL-3.0-only

//! Task descriptors, task-list storage, and the block-buffer contract.
//!
//! One task is one (atom pair, set pair, primitive pair, grid level) unit of
//! work. The task list owns the descriptors for its lifetime, immutable once
//! created and binned per grid level; backend contexts iterate one level at
//! a time.
//!
//! Geometry convention: every `[i32; 3]` / `[usize; 3]` here is in storage
//! order (slowest grid axis first; storage axis `a` holds lattice direction
//! `2 - a`), while positions, displacements, and cell matrices are Cartesian
//! (`dh[d]` = lattice vector `d` in Cartesian components).

use crate::basis::{ncoset, BasisSet};
use crate::error::GridError;
use crate::tensor::alloc_f64;

/// One unit of collocation/integration work.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// Grid level the task collocates onto.
    pub level: usize,
    /// First atom index.
    pub iatom: usize,
    /// Second atom index.
    pub jatom: usize,
    /// Basis set index on atom i.
    pub iset: usize,
    /// Basis set index on atom j.
    pub jset: usize,
    /// Primitive index within set i.
    pub ipgf: usize,
    /// Primitive index within set j.
    pub jpgf: usize,
    /// Face mask for distributed-grid borders (bit `2d` low face of storage
    /// axis `d`, bit `2d + 1` high face).
    pub border_mask: u32,
    /// Which block of the pair-density buffer this task reads.
    pub block_num: usize,
    /// Screening radius of the pair.
    pub radius: f64,
    /// Minimum-image displacement of atom j relative to atom i (Cartesian).
    pub rab: [f64; 3],
}

/// Per-level grid geometry, one entry per resolution level.
#[derive(Debug, Clone)]
pub struct LevelGeometry {
    /// Global periodic grid size (storage order).
    pub npts_global: [i32; 3],
    /// Offset of the local window within the global grid (storage order).
    pub shift_local: [i32; 3],
    /// Halo width per axis for border masking (storage order).
    pub border_width: [i32; 3],
    /// Cell matrix of this level: `dh[d]` = lattice vector `d`.
    pub dh: [[f64; 3]; 3],
    /// Inverse cell matrix, `frac_d = sum_c dh_inv[c][d] * r_c`.
    pub dh_inv: [[f64; 3]; 3],
}

/// Borrowed creation/update input for a task list.
#[derive(Debug, Clone, Copy)]
pub struct TaskListInput<'a> {
    /// Number of grid levels.
    pub nlevels: usize,
    /// Atom positions (Cartesian).
    pub atom_positions: &'a [[f64; 3]],
    /// Kind index per atom.
    pub atom_kinds: &'a [usize],
    /// Basis set per kind.
    pub basis_sets: &'a [BasisSet],
    /// Offset of each block in the block buffers.
    pub block_offsets: &'a [usize],
    /// The work items.
    pub tasks: &'a [TaskDescriptor],
}

/// Owned task-list storage inside a backend context. Updated in place on
/// re-neighboring; existing allocations are reused where possible.
#[derive(Debug, Clone)]
pub struct TaskList {
    /// Number of grid levels.
    pub nlevels: usize,
    /// Atom positions.
    pub atom_positions: Vec<[f64; 3]>,
    /// Kind index per atom.
    pub atom_kinds: Vec<usize>,
    /// Basis set per kind.
    pub basis_sets: Vec<BasisSet>,
    /// Block offsets.
    pub block_offsets: Vec<usize>,
    /// All task descriptors.
    pub tasks: Vec<TaskDescriptor>,
    /// Task indices binned per level.
    pub tasks_per_level: Vec<Vec<usize>>,
}

impl TaskList {
    /// Build owned storage from borrowed input.
    ///
    /// # Errors
    ///
    /// `Precondition` when any task references an atom, kind, set,
    /// primitive, level, or block that does not exist.
    pub fn build(input: &TaskListInput<'_>) -> Result<Self, GridError> {
        let mut list = Self {
            nlevels: 0,
            atom_positions: Vec::new(),
            atom_kinds: Vec::new(),
            basis_sets: Vec::new(),
            block_offsets: Vec::new(),
            tasks: Vec::new(),
            tasks_per_level: Vec::new(),
        };
        list.update(input)?;
        Ok(list)
    }

    /// Refresh the stored list in place from new input.
    ///
    /// # Errors
    ///
    /// `Precondition` on inconsistent input; the list is left unusable for
    /// dispatch and must be rebuilt.
    pub fn update(&mut self, input: &TaskListInput<'_>) -> Result<(), GridError> {
        validate_input(input)?;

        self.nlevels = input.nlevels;
        self.atom_positions.clear();
        self.atom_positions.extend_from_slice(input.atom_positions);
        self.atom_kinds.clear();
        self.atom_kinds.extend_from_slice(input.atom_kinds);
        self.basis_sets.clear();
        self.basis_sets.extend_from_slice(input.basis_sets);
        self.block_offsets.clear();
        self.block_offsets.extend_from_slice(input.block_offsets);
        self.tasks.clear();
        self.tasks.extend_from_slice(input.tasks);

        self.tasks_per_level.resize(input.nlevels, Vec::new());
        for bin in &mut self.tasks_per_level {
            bin.clear();
        }
        for (i, task) in self.tasks.iter().enumerate() {
            self.tasks_per_level[task.level].push(i);
        }
        Ok(())
    }

    /// Total number of tasks.
    #[must_use]
    pub fn ntasks(&self) -> usize {
        self.tasks.len()
    }
}

fn validate_input(input: &TaskListInput<'_>) -> Result<(), GridError> {
    if input.atom_kinds.len() != input.atom_positions.len() {
        return Err(GridError::Precondition(format!(
            "{} atom kinds for {} atoms",
            input.atom_kinds.len(),
            input.atom_positions.len()
        )));
    }
    for basis in input.basis_sets {
        basis.check()?;
    }
    for (t, task) in input.tasks.iter().enumerate() {
        let fail = |what: String| {
            Err(GridError::Precondition(format!(
                "task {t}: {what} (level {}, atoms {}/{}, sets {}/{}, pgfs {}/{}, block {})",
                task.level,
                task.iatom,
                task.jatom,
                task.iset,
                task.jset,
                task.ipgf,
                task.jpgf,
                task.block_num
            )))
        };
        if task.level >= input.nlevels {
            return fail(format!("level out of range 0..{}", input.nlevels));
        }
        if task.iatom >= input.atom_positions.len() || task.jatom >= input.atom_positions.len() {
            return fail("atom index out of range".into());
        }
        if task.block_num >= input.block_offsets.len() {
            return fail("block number out of range".into());
        }
        for (atom, set, pgf) in [
            (task.iatom, task.iset, task.ipgf),
            (task.jatom, task.jset, task.jpgf),
        ] {
            let kind = input.atom_kinds[atom];
            let Some(basis) = input.basis_sets.get(kind) else {
                return fail(format!("kind {kind} has no basis set"));
            };
            if set >= basis.nset() {
                return fail(format!("set {set} out of range for kind {kind}"));
            }
            if pgf >= basis.npgf[set] as usize {
                return fail(format!("pgf {pgf} out of range for kind {kind} set {set}"));
            }
        }
    }
    Ok(())
}

/// Flat block storage for pair-density and Hamiltonian matrices.
///
/// Block `num` holds the dense Cartesian matrix `[jco][ico]` for one
/// (atom pair, set pair): row stride `ncoset(lmax_a_set)`, shared by all
/// primitive pairs of that set pair.
#[derive(Debug, Clone)]
pub struct BlockBuffer {
    data: Vec<f64>,
    offsets: Vec<usize>,
}

impl BlockBuffer {
    /// Zeroed buffer with the given block offsets and total length.
    ///
    /// # Errors
    ///
    /// `Allocation` on reserve failure.
    pub fn new(offsets: Vec<usize>, total_len: usize) -> Result<Self, GridError> {
        Ok(Self {
            data: alloc_f64(total_len, "block buffer")?,
            offsets,
        })
    }

    /// Wrap existing host data.
    #[must_use]
    pub fn from_data(offsets: Vec<usize>, data: Vec<f64>) -> Self {
        Self { data, offsets }
    }

    /// Number of blocks.
    #[must_use]
    pub fn nblocks(&self) -> usize {
        self.offsets.len()
    }

    /// Read block `num` of `len` elements.
    ///
    /// # Errors
    ///
    /// `Precondition` when the block escapes the buffer.
    pub fn block(&self, num: usize, len: usize) -> Result<&[f64], GridError> {
        let off = self.block_offset(num, len)?;
        Ok(&self.data[off..off + len])
    }

    /// Mutable block access.
    ///
    /// # Errors
    ///
    /// `Precondition` when the block escapes the buffer.
    pub fn block_mut(&mut self, num: usize, len: usize) -> Result<&mut [f64], GridError> {
        let off = self.block_offset(num, len)?;
        Ok(&mut self.data[off..off + len])
    }

    fn block_offset(&self, num: usize, len: usize) -> Result<usize, GridError> {
        let Some(&off) = self.offsets.get(num) else {
            return Err(GridError::Precondition(format!(
                "block {num} out of range ({} blocks)",
                self.offsets.len()
            )));
        };
        if off + len > self.data.len() {
            return Err(GridError::Precondition(format!(
                "block {num} at offset {off} with {len} elements escapes buffer of {}",
                self.data.len()
            )));
        }
        Ok(off)
    }

    /// The whole backing buffer.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable backing buffer.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }
}

/// Per-task quantities derived from atoms and basis sets: the product
/// Gaussian's center, exponent, and prefactor, and the shell ranges and
/// block shape of the set pair.
#[derive(Debug, Clone)]
pub struct TaskGeometry {
    /// Center of atom i.
    pub ra: [f64; 3],
    /// Center of atom j (`ra + rab`).
    pub rb: [f64; 3],
    /// Center of the product Gaussian.
    pub rp: [f64; 3],
    /// Exponent on atom i.
    pub zeta: f64,
    /// Exponent on atom j.
    pub zetb: f64,
    /// Combined exponent `zeta + zetb`.
    pub zetp: f64,
    /// `exp(-zeta * zetb / zetp * |rab|^2)`.
    pub prefactor: f64,
    /// Shell range of set i.
    pub la_min: i32,
    /// Highest shell of set i.
    pub la_max: i32,
    /// Shell range of set j.
    pub lb_min: i32,
    /// Highest shell of set j.
    pub lb_max: i32,
    /// Row stride of the task's pab/hab block (`ncoset` of set i's lmax).
    pub block_ld: usize,
    /// Total block length.
    pub block_len: usize,
}

impl TaskGeometry {
    /// Derive the pair quantities for one task.
    #[must_use]
    pub fn for_task(task: &TaskDescriptor, list: &TaskList) -> Self {
        let basis_a = &list.basis_sets[list.atom_kinds[task.iatom]];
        let basis_b = &list.basis_sets[list.atom_kinds[task.jatom]];
        let zeta = basis_a.zet[task.iset][task.ipgf];
        let zetb = basis_b.zet[task.jset][task.jpgf];
        let zetp = zeta + zetb;
        let f = zetb / zetp;
        let ra = list.atom_positions[task.iatom];
        let rab = task.rab;
        let rab2 = rab[0] * rab[0] + rab[1] * rab[1] + rab[2] * rab[2];
        let prefactor = (-zeta * f * rab2).exp();
        let mut rb = [0.0; 3];
        let mut rp = [0.0; 3];
        for c in 0..3 {
            rb[c] = ra[c] + rab[c];
            rp[c] = ra[c] + f * rab[c];
        }
        let la_max = basis_a.lmax[task.iset];
        let lb_max = basis_b.lmax[task.jset];
        let block_ld = ncoset(la_max);
        Self {
            ra,
            rb,
            rp,
            zeta,
            zetb,
            zetp,
            prefactor,
            la_min: basis_a.lmin[task.iset],
            la_max,
            lb_min: basis_b.lmin[task.jset],
            lb_max,
            block_ld,
            block_len: ncoset(lb_max) * block_ld,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s_basis(zet: f64) -> BasisSet {
        BasisSet {
            lmin: vec![0],
            lmax: vec![0],
            npgf: vec![1],
            zet: vec![vec![zet]],
        }
    }

    fn one_task() -> TaskDescriptor {
        TaskDescriptor {
            level: 0,
            iatom: 0,
            jatom: 1,
            iset: 0,
            jset: 0,
            ipgf: 0,
            jpgf: 0,
            border_mask: 0,
            block_num: 0,
            radius: 2.0,
            rab: [1.0, 0.0, 0.0],
        }
    }

    #[test]
    fn build_bins_tasks_per_level() {
        let positions = [[0.0; 3], [1.0, 0.0, 0.0]];
        let kinds = [0, 0];
        let basis = [s_basis(0.5)];
        let offsets = [0];
        let mut t0 = one_task();
        t0.level = 1;
        let t1 = one_task();
        let input = TaskListInput {
            nlevels: 2,
            atom_positions: &positions,
            atom_kinds: &kinds,
            basis_sets: &basis,
            block_offsets: &offsets,
            tasks: &[t0, t1],
        };
        let list = TaskList::build(&input).expect("build");
        assert_eq!(list.ntasks(), 2);
        assert_eq!(list.tasks_per_level[0], vec![1]);
        assert_eq!(list.tasks_per_level[1], vec![0]);
    }

    #[test]
    fn update_reuses_storage() {
        let positions = [[0.0; 3], [1.0, 0.0, 0.0]];
        let kinds = [0, 0];
        let basis = [s_basis(0.5)];
        let offsets = [0];
        let tasks = [one_task()];
        let input = TaskListInput {
            nlevels: 1,
            atom_positions: &positions,
            atom_kinds: &kinds,
            basis_sets: &basis,
            block_offsets: &offsets,
            tasks: &tasks,
        };
        let mut list = TaskList::build(&input).expect("build");
        list.update(&input).expect("update");
        assert_eq!(list.ntasks(), 1);
        assert_eq!(list.tasks_per_level.len(), 1);
        assert_eq!(list.tasks_per_level[0], vec![0]);
    }

    #[test]
    fn build_rejects_bad_level() {
        let positions = [[0.0; 3], [1.0, 0.0, 0.0]];
        let kinds = [0, 0];
        let basis = [s_basis(0.5)];
        let offsets = [0];
        let mut bad = one_task();
        bad.level = 3;
        let input = TaskListInput {
            nlevels: 1,
            atom_positions: &positions,
            atom_kinds: &kinds,
            basis_sets: &basis,
            block_offsets: &offsets,
            tasks: &[bad],
        };
        assert!(matches!(
            TaskList::build(&input),
            Err(GridError::Precondition(_))
        ));
    }

    #[test]
    fn build_rejects_bad_pgf() {
        let positions = [[0.0; 3], [1.0, 0.0, 0.0]];
        let kinds = [0, 0];
        let basis = [s_basis(0.5)];
        let offsets = [0];
        let mut bad = one_task();
        bad.jpgf = 4;
        let input = TaskListInput {
            nlevels: 1,
            atom_positions: &positions,
            atom_kinds: &kinds,
            basis_sets: &basis,
            block_offsets: &offsets,
            tasks: &[bad],
        };
        assert!(matches!(
            TaskList::build(&input),
            Err(GridError::Precondition(_))
        ));
    }

    #[test]
    fn task_geometry_product_gaussian() {
        let positions = [[0.0; 3], [1.0, 0.0, 0.0]];
        let kinds = [0, 0];
        let basis = [s_basis(0.5)];
        let offsets = [0];
        let tasks = [one_task()];
        let input = TaskListInput {
            nlevels: 1,
            atom_positions: &positions,
            atom_kinds: &kinds,
            basis_sets: &basis,
            block_offsets: &offsets,
            tasks: &tasks,
        };
        let list = TaskList::build(&input).expect("build");
        let g = TaskGeometry::for_task(&list.tasks[0], &list);
        assert!((g.zetp - 1.0).abs() < 1e-15);
        // equal exponents: product center halfway along rab
        assert!((g.rp[0] - 0.5).abs() < 1e-15);
        assert!((g.prefactor - (-0.25f64).exp()).abs() < 1e-15);
        assert_eq!(g.block_ld, 1);
        assert_eq!(g.block_len, 1);
        assert!((g.rb[0] - 1.0).abs() < 1e-15);
    }

    #[test]
    fn block_buffer_round_trip() {
        let mut buf = BlockBuffer::new(vec![0, 4], 8).expect("alloc");
        buf.block_mut(1, 4).expect("block")[2] = 5.0;
        assert!((buf.block(1, 4).expect("block")[2] - 5.0).abs() < 1e-15);
        assert_eq!(buf.nblocks(), 2);
    }

    #[test]
    fn block_buffer_rejects_escape() {
        let buf = BlockBuffer::new(vec![0, 4], 8).expect("alloc");
        assert!(matches!(
            buf.block(1, 5),
            Err(GridError::Precondition(_))
        ));
        assert!(matches!(
            buf.block(2, 1),
            Err(GridError::Precondition(_))
        ));
    }
}
