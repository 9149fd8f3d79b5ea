use crate::error::Error;
use crate::gas::MAX_VARS;
use rayon::prelude::*;

/**
 * Sparse matrix of dense nvar x nvar blocks in CSR layout. The sparsity
 * pattern is the dual graph plus the diagonal, fixed at construction;
 * implicit iterations only zero and refill the block storage. Column
 * indices are sorted within each row and the diagonal slot is cached.
 */
pub struct BlockMatrix {
    nvar: usize,
    n_rows: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<u32>,
    diag_slot: Vec<usize>,
    data: Vec<f64>,
}

// ============================================================================
impl BlockMatrix {
    /// Build the pattern from an edge list: one off-diagonal block per edge
    /// direction plus every diagonal.
    pub fn from_graph(n_rows: usize, nvar: usize, edges: &[[u32; 2]]) -> Self {
        let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); n_rows];
        for &[i, j] in edges {
            neighbors[i as usize].push(j);
            neighbors[j as usize].push(i);
        }

        let mut row_ptr = Vec::with_capacity(n_rows + 1);
        let mut col_idx = Vec::new();
        let mut diag_slot = Vec::with_capacity(n_rows);
        row_ptr.push(0);
        for (row, list) in neighbors.iter_mut().enumerate() {
            list.push(row as u32);
            list.sort_unstable();
            list.dedup();
            diag_slot.push(
                col_idx.len() + list.iter().position(|&c| c == row as u32).unwrap(),
            );
            col_idx.extend_from_slice(list);
            row_ptr.push(col_idx.len());
        }

        let block_len = nvar * nvar;
        Self {
            nvar,
            n_rows,
            data: vec![0.0; col_idx.len() * block_len],
            row_ptr,
            col_idx,
            diag_slot,
        }
    }

    pub fn nvar(&self) -> usize {
        self.nvar
    }

    pub fn rows(&self) -> usize {
        self.n_rows
    }

    pub fn block_len(&self) -> usize {
        self.nvar * self.nvar
    }

    pub fn zero(&mut self) {
        self.data.par_iter_mut().for_each(|x| *x = 0.0);
    }

    /// CSR slot of block (row, col), if the pattern contains it.
    pub fn slot(&self, row: usize, col: usize) -> Option<usize> {
        let lo = self.row_ptr[row];
        let hi = self.row_ptr[row + 1];
        self.col_idx[lo..hi]
            .binary_search(&(col as u32))
            .ok()
            .map(|k| lo + k)
    }

    pub fn diagonal_slot(&self, row: usize) -> usize {
        self.diag_slot[row]
    }

    pub fn row_slots(&self, row: usize) -> std::ops::Range<usize> {
        self.row_ptr[row]..self.row_ptr[row + 1]
    }

    pub fn col_of_slot(&self, slot: usize) -> usize {
        self.col_idx[slot] as usize
    }

    pub fn block(&self, slot: usize) -> &[f64] {
        let len = self.block_len();
        &self.data[slot * len..(slot + 1) * len]
    }

    pub fn block_mut(&mut self, slot: usize) -> &mut [f64] {
        let len = self.block_len();
        &mut self.data[slot * len..(slot + 1) * len]
    }

    /// Accumulate `scale * block` into slot (row, col). The block is passed
    /// in the fixed-size kernel layout; only the leading nvar x nvar part
    /// is read.
    pub fn add_block(
        &mut self,
        slot: usize,
        block: &[[f64; MAX_VARS]; MAX_VARS],
        scale: f64,
    ) {
        let nvar = self.nvar;
        let target = self.block_mut(slot);
        for i in 0..nvar {
            for j in 0..nvar {
                target[i * nvar + j] += scale * block[i][j];
            }
        }
    }

    /// Add `value * I` to the diagonal block of a row.
    pub fn add_to_diagonal(&mut self, row: usize, value: f64) {
        let nvar = self.nvar;
        let slot = self.diag_slot[row];
        let target = self.block_mut(slot);
        for i in 0..nvar {
            target[i * nvar + i] += value;
        }
    }

    /// y = A x, parallel over block rows.
    pub fn spmv(&self, x: &[f64], y: &mut [f64]) {
        let nvar = self.nvar;
        let len = self.block_len();
        y.par_chunks_exact_mut(nvar)
            .enumerate()
            .for_each(|(row, y_row)| {
                y_row.iter_mut().for_each(|v| *v = 0.0);
                for slot in self.row_ptr[row]..self.row_ptr[row + 1] {
                    let col = self.col_idx[slot] as usize;
                    let block = &self.data[slot * len..(slot + 1) * len];
                    let x_col = &x[col * nvar..(col + 1) * nvar];
                    for i in 0..nvar {
                        let mut sum = 0.0;
                        for j in 0..nvar {
                            sum += block[i * nvar + j] * x_col[j];
                        }
                        y_row[i] += sum;
                    }
                }
            });
    }

    /// Copy of the raw block storage (preconditioner factorizations start
    /// from this).
    pub fn clone_data(&self) -> Vec<f64> {
        self.data.clone()
    }

    /// Visit every row in parallel with mutable access to its contiguous
    /// block storage. Rows are disjoint slices of the data array, so the
    /// assembly loop over rows needs no synchronization.
    pub fn with_rows_mut<F>(&mut self, f: F)
    where
        F: Fn(usize, &mut [f64]) + Send + Sync,
    {
        let len = self.block_len();
        let row_ptr = &self.row_ptr;
        let mut rows: Vec<(usize, &mut [f64])> = Vec::with_capacity(self.n_rows);
        let mut rest: &mut [f64] = &mut self.data;
        for row in 0..self.n_rows {
            let count = (row_ptr[row + 1] - row_ptr[row]) * len;
            let (head, tail) = rest.split_at_mut(count);
            rows.push((row, head));
            rest = tail;
        }
        rows.into_par_iter().for_each(|(row, blocks)| f(row, blocks));
    }

    /// Local slot (offset within the row) of a column, for use with the
    /// row slices handed out by `with_rows_mut`.
    pub fn local_slot(&self, row: usize, col: usize) -> Option<usize> {
        self.slot(row, col).map(|s| s - self.row_ptr[row])
    }
}

/// Accumulate `scale * block` into one flattened block of a row slice.
pub fn add_into_row(
    row_blocks: &mut [f64],
    local_slot: usize,
    nvar: usize,
    block: &[[f64; MAX_VARS]; MAX_VARS],
    scale: f64,
) {
    let target = &mut row_blocks[local_slot * nvar * nvar..(local_slot + 1) * nvar * nvar];
    for i in 0..nvar {
        for j in 0..nvar {
            target[i * nvar + j] += scale * block[i][j];
        }
    }
}

// ============================================================================
// Dense kernels on flattened nvar x nvar blocks.

/// In-place LU factorization with partial pivoting. Fails on a numerically
/// singular block.
pub fn lu_factor(a: &mut [f64], nvar: usize, pivots: &mut [usize]) -> Result<(), Error> {
    for k in 0..nvar {
        let mut pivot_row = k;
        let mut pivot_val = a[k * nvar + k].abs();
        for r in k + 1..nvar {
            let v = a[r * nvar + k].abs();
            if v > pivot_val {
                pivot_val = v;
                pivot_row = r;
            }
        }
        if pivot_val < 1e-300 {
            return Err(Error::LinearSolverDiverged {
                achieved: f64::INFINITY,
                target: 0.0,
                iterations: 0,
            });
        }
        pivots[k] = pivot_row;
        if pivot_row != k {
            for c in 0..nvar {
                a.swap(k * nvar + c, pivot_row * nvar + c);
            }
        }
        let inv = 1.0 / a[k * nvar + k];
        for r in k + 1..nvar {
            let factor = a[r * nvar + k] * inv;
            a[r * nvar + k] = factor;
            for c in k + 1..nvar {
                a[r * nvar + c] -= factor * a[k * nvar + c];
            }
        }
    }
    Ok(())
}

/// Solve LU x = b in place using the factors and pivots from `lu_factor`.
pub fn lu_solve(lu: &[f64], nvar: usize, pivots: &[usize], x: &mut [f64]) {
    for k in 0..nvar {
        x.swap(k, pivots[k]);
        for r in k + 1..nvar {
            x[r] -= lu[r * nvar + k] * x[k];
        }
    }
    for k in (0..nvar).rev() {
        for c in k + 1..nvar {
            x[k] -= lu[k * nvar + c] * x[c];
        }
        x[k] /= lu[k * nvar + k];
    }
}

/// Explicit inverse via the LU factors (columns of the identity).
pub fn lu_invert(a: &[f64], nvar: usize) -> Result<Vec<f64>, Error> {
    let mut lu = a.to_vec();
    let mut pivots = vec![0usize; nvar];
    lu_factor(&mut lu, nvar, &mut pivots)?;
    let mut inv = vec![0.0; nvar * nvar];
    let mut column = vec![0.0; nvar];
    for c in 0..nvar {
        column.iter_mut().for_each(|x| *x = 0.0);
        column[c] = 1.0;
        lu_solve(&lu, nvar, &pivots, &mut column);
        for r in 0..nvar {
            inv[r * nvar + c] = column[r];
        }
    }
    Ok(inv)
}

/// c -= a * b for flattened blocks.
pub fn block_mulsub(c: &mut [f64], a: &[f64], b: &[f64], nvar: usize) {
    for i in 0..nvar {
        for k in 0..nvar {
            let aik = a[i * nvar + k];
            if aik != 0.0 {
                for j in 0..nvar {
                    c[i * nvar + j] -= aik * b[k * nvar + j];
                }
            }
        }
    }
}

/// c = a * b for flattened blocks.
pub fn block_mul(a: &[f64], b: &[f64], nvar: usize) -> Vec<f64> {
    let mut c = vec![0.0; nvar * nvar];
    for i in 0..nvar {
        for k in 0..nvar {
            let aik = a[i * nvar + k];
            if aik != 0.0 {
                for j in 0..nvar {
                    c[i * nvar + j] += aik * b[k * nvar + j];
                }
            }
        }
    }
    c
}

/// y -= A x for one flattened block and block-vectors.
pub fn block_mulsub_vec(y: &mut [f64], a: &[f64], x: &[f64], nvar: usize) {
    for i in 0..nvar {
        let mut sum = 0.0;
        for j in 0..nvar {
            sum += a[i * nvar + j] * x[j];
        }
        y[i] -= sum;
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pattern_has_sorted_rows_and_cached_diagonals() {
        let edges = [[0, 1], [1, 2], [0, 2]];
        let matrix = BlockMatrix::from_graph(3, 2, &edges);
        for row in 0..3 {
            let slots: Vec<usize> = matrix.row_slots(row).collect();
            assert_eq!(slots.len(), 3);
            let cols: Vec<usize> = slots.iter().map(|&s| matrix.col_of_slot(s)).collect();
            let mut sorted = cols.clone();
            sorted.sort_unstable();
            assert_eq!(cols, sorted);
            assert_eq!(matrix.col_of_slot(matrix.diagonal_slot(row)), row);
        }
        assert!(matrix.slot(0, 1).is_some());
        assert!(matrix.slot(2, 0).is_some());
    }

    #[test]
    fn spmv_matches_a_dense_reference() {
        let edges = [[0u32, 1], [1, 2]];
        let mut matrix = BlockMatrix::from_graph(3, 2, &edges);
        let mut block = [[0.0; MAX_VARS]; MAX_VARS];
        block[0][0] = 2.0;
        block[0][1] = 1.0;
        block[1][1] = 3.0;
        for row in 0..3 {
            let slot = matrix.diagonal_slot(row);
            matrix.add_block(slot, &block, 1.0);
        }
        let slot = matrix.slot(0, 1).unwrap();
        matrix.add_block(slot, &block, -0.5);

        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut y = [0.0; 6];
        matrix.spmv(&x, &mut y);

        // row 0: D x0 - 0.5 D x1
        assert_relative_eq!(y[0], (2.0 + 2.0) - 0.5 * (6.0 + 4.0));
        assert_relative_eq!(y[1], 6.0 - 0.5 * 12.0);
        // row 2: D x2
        assert_relative_eq!(y[4], 2.0 * 5.0 + 6.0);
        assert_relative_eq!(y[5], 18.0);
    }

    #[test]
    fn lu_solves_a_permuted_system() {
        // matrix that requires pivoting
        let mut a = vec![0.0, 2.0, 1.0, 1.0];
        let mut pivots = vec![0; 2];
        lu_factor(&mut a, 2, &mut pivots).unwrap();
        let mut x = vec![4.0, 3.0]; // solve [[0,2],[1,1]] x = [4,3]
        lu_solve(&a, 2, &pivots, &mut x);
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-14);
        assert_relative_eq!(x[1], 2.0, epsilon = 1e-14);
    }

    #[test]
    fn singular_blocks_are_rejected() {
        let mut a = vec![1.0, 2.0, 2.0, 4.0];
        let mut pivots = vec![0; 2];
        assert!(lu_factor(&mut a, 2, &mut pivots).is_err());
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let a = vec![4.0, 1.0, 0.5, 2.0, 5.0, 1.0, 0.0, 1.0, 3.0];
        let inv = lu_invert(&a, 3).unwrap();
        let product = block_mul(&inv, &a, 3);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(product[i * 3 + j], expected, epsilon = 1e-12);
            }
        }
    }
}
