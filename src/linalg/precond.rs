use super::block::{
    block_mul, block_mulsub, block_mulsub_vec, lu_invert, BlockMatrix,
};
use crate::config::PreconditionerKind;
use crate::error::Error;
use crate::gas::MAX_VARS;
use rayon::prelude::*;

/**
 * Preconditioners over the block-sparse Jacobian. Block-Jacobi applies the
 * inverted diagonal and is fully parallel; ILU(0) factorizes on the fixed
 * pattern without fill; symmetric block Gauss-Seidel sweeps forward then
 * backward over the original matrix. The triangular sweeps run sequentially
 * over rows, which keeps them deterministic.
 */
pub enum Preconditioner {
    Jacobi {
        inv_diag: Vec<f64>,
    },
    Ilu0 {
        factors: Vec<f64>,
        inv_diag: Vec<f64>,
    },
    Sgs {
        inv_diag: Vec<f64>,
    },
}

// ============================================================================
impl Preconditioner {
    pub fn build(kind: PreconditionerKind, matrix: &BlockMatrix) -> Result<Self, Error> {
        match kind {
            PreconditionerKind::Jacobi => Ok(Preconditioner::Jacobi {
                inv_diag: invert_diagonals(matrix, matrix.clone_data())?,
            }),
            PreconditionerKind::Sgs => Ok(Preconditioner::Sgs {
                inv_diag: invert_diagonals(matrix, matrix.clone_data())?,
            }),
            PreconditionerKind::Ilu0 => {
                let nvar = matrix.nvar();
                let len = matrix.block_len();
                let n = matrix.rows();
                let mut factors = matrix.clone_data();
                let mut inv_diag = vec![0.0; n * len];

                for i in 0..n {
                    for slot_ik in matrix.row_slots(i) {
                        let k = matrix.col_of_slot(slot_ik);
                        if k >= i {
                            break;
                        }
                        // L_ik = A_ik * inv(D_k), then eliminate within the
                        // pattern of row i
                        let l_ik = block_mul(
                            &factors[slot_ik * len..(slot_ik + 1) * len],
                            &inv_diag[k * len..(k + 1) * len],
                            nvar,
                        );
                        factors[slot_ik * len..(slot_ik + 1) * len].copy_from_slice(&l_ik);
                        for slot_ij in matrix.row_slots(i) {
                            let j = matrix.col_of_slot(slot_ij);
                            if j <= k {
                                continue;
                            }
                            if let Some(slot_kj) = matrix.slot(k, j) {
                                let a_kj =
                                    factors[slot_kj * len..(slot_kj + 1) * len].to_vec();
                                let target =
                                    &mut factors[slot_ij * len..(slot_ij + 1) * len];
                                block_mulsub(target, &l_ik, &a_kj, nvar);
                            }
                        }
                    }
                    let diag = matrix.diagonal_slot(i);
                    let inverse = lu_invert(&factors[diag * len..(diag + 1) * len], nvar)?;
                    inv_diag[i * len..(i + 1) * len].copy_from_slice(&inverse);
                }
                Ok(Preconditioner::Ilu0 { factors, inv_diag })
            }
        }
    }

    /// z = M^-1 r.
    pub fn apply(&self, matrix: &BlockMatrix, r: &[f64], z: &mut [f64]) {
        let nvar = matrix.nvar();
        let len = matrix.block_len();
        let n = matrix.rows();

        match self {
            Preconditioner::Jacobi { inv_diag } => {
                z.par_chunks_exact_mut(nvar)
                    .zip(r.par_chunks_exact(nvar))
                    .enumerate()
                    .for_each(|(row, (z_row, r_row))| {
                        let inv = &inv_diag[row * len..(row + 1) * len];
                        for i in 0..nvar {
                            let mut sum = 0.0;
                            for j in 0..nvar {
                                sum += inv[i * nvar + j] * r_row[j];
                            }
                            z_row[i] = sum;
                        }
                    });
            }

            Preconditioner::Ilu0 { factors, inv_diag } => {
                z.copy_from_slice(r);
                // unit-lower sweep
                for i in 0..n {
                    for slot in matrix.row_slots(i) {
                        let k = matrix.col_of_slot(slot);
                        if k >= i {
                            break;
                        }
                        let l_ik = &factors[slot * len..(slot + 1) * len];
                        let z_k = z[k * nvar..(k + 1) * nvar].to_vec();
                        block_mulsub_vec(&mut z[i * nvar..(i + 1) * nvar], l_ik, &z_k, nvar);
                    }
                }
                // upper sweep with the inverted diagonals
                for i in (0..n).rev() {
                    for slot in matrix.row_slots(i).rev() {
                        let j = matrix.col_of_slot(slot);
                        if j <= i {
                            break;
                        }
                        let u_ij = &factors[slot * len..(slot + 1) * len];
                        let z_j = z[j * nvar..(j + 1) * nvar].to_vec();
                        block_mulsub_vec(&mut z[i * nvar..(i + 1) * nvar], u_ij, &z_j, nvar);
                    }
                    let inv = &inv_diag[i * len..(i + 1) * len];
                    let mut solved = [0.0; MAX_VARS];
                    for a in 0..nvar {
                        let mut sum = 0.0;
                        for b in 0..nvar {
                            sum += inv[a * nvar + b] * z[i * nvar + b];
                        }
                        solved[a] = sum;
                    }
                    z[i * nvar..(i + 1) * nvar].copy_from_slice(&solved[..nvar]);
                }
            }

            Preconditioner::Sgs { inv_diag } => {
                // (D + L) D^-1 (D + U) z = r
                let mut y = vec![0.0; z.len()];
                for i in 0..n {
                    let mut rhs = r[i * nvar..(i + 1) * nvar].to_vec();
                    for slot in matrix.row_slots(i) {
                        let j = matrix.col_of_slot(slot);
                        if j >= i {
                            break;
                        }
                        let a_ij = matrix.block(slot);
                        let y_j = &y[j * nvar..(j + 1) * nvar];
                        for a in 0..nvar {
                            let mut sum = 0.0;
                            for b in 0..nvar {
                                sum += a_ij[a * nvar + b] * y_j[b];
                            }
                            rhs[a] -= sum;
                        }
                    }
                    let inv = &inv_diag[i * len..(i + 1) * len];
                    for a in 0..nvar {
                        let mut sum = 0.0;
                        for b in 0..nvar {
                            sum += inv[a * nvar + b] * rhs[b];
                        }
                        y[i * nvar + a] = sum;
                    }
                }
                for i in (0..n).rev() {
                    // D_i y_i recovers the (D + U)-system right-hand side
                    let diag = matrix.block(matrix.diagonal_slot(i));
                    let mut rhs = vec![0.0; nvar];
                    for a in 0..nvar {
                        for b in 0..nvar {
                            rhs[a] += diag[a * nvar + b] * y[i * nvar + b];
                        }
                    }
                    for slot in matrix.row_slots(i).rev() {
                        let j = matrix.col_of_slot(slot);
                        if j <= i {
                            break;
                        }
                        let a_ij = matrix.block(slot);
                        let z_j = &z[j * nvar..(j + 1) * nvar];
                        for a in 0..nvar {
                            let mut sum = 0.0;
                            for b in 0..nvar {
                                sum += a_ij[a * nvar + b] * z_j[b];
                            }
                            rhs[a] -= sum;
                        }
                    }
                    let inv = &inv_diag[i * len..(i + 1) * len];
                    for a in 0..nvar {
                        let mut sum = 0.0;
                        for b in 0..nvar {
                            sum += inv[a * nvar + b] * rhs[b];
                        }
                        z[i * nvar + a] = sum;
                    }
                }
            }
        }
    }
}

fn invert_diagonals(matrix: &BlockMatrix, data: Vec<f64>) -> Result<Vec<f64>, Error> {
    let nvar = matrix.nvar();
    let len = matrix.block_len();
    let mut inv_diag = vec![0.0; matrix.rows() * len];
    for row in 0..matrix.rows() {
        let slot = matrix.diagonal_slot(row);
        let inverse = lu_invert(&data[slot * len..(slot + 1) * len], nvar)?;
        inv_diag[row * len..(row + 1) * len].copy_from_slice(&inverse);
    }
    Ok(inv_diag)
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::*;
    use crate::gas::MAX_VARS;
    use approx::assert_relative_eq;

    /// Diagonally dominant block-tridiagonal test matrix on a chain graph.
    fn chain_matrix(n: usize, nvar: usize) -> BlockMatrix {
        let edges: Vec<[u32; 2]> = (0..n as u32 - 1).map(|i| [i, i + 1]).collect();
        let mut matrix = BlockMatrix::from_graph(n, nvar, &edges);
        let mut diag = [[0.0; MAX_VARS]; MAX_VARS];
        let mut off = [[0.0; MAX_VARS]; MAX_VARS];
        for i in 0..nvar {
            for j in 0..nvar {
                diag[i][j] = if i == j { 6.0 } else { 0.7 };
                off[i][j] = if i == j { -1.0 } else { 0.2 };
            }
        }
        for row in 0..n {
            matrix.add_block(matrix.diagonal_slot(row), &diag, 1.0 + row as f64 * 0.1);
            if row + 1 < n {
                matrix.add_block(matrix.slot(row, row + 1).unwrap(), &off, 1.0);
                matrix.add_block(matrix.slot(row + 1, row).unwrap(), &off, 0.8);
            }
        }
        matrix
    }

    #[test]
    fn jacobi_is_exact_on_a_block_diagonal_matrix() {
        let mut matrix = BlockMatrix::from_graph(3, 2, &[]);
        let mut diag = [[0.0; MAX_VARS]; MAX_VARS];
        diag[0][0] = 4.0;
        diag[0][1] = 1.0;
        diag[1][0] = 0.5;
        diag[1][1] = 3.0;
        for row in 0..3 {
            matrix.add_block(matrix.diagonal_slot(row), &diag, 1.0);
        }
        let precond = Preconditioner::build(PreconditionerKind::Jacobi, &matrix).unwrap();

        let x_true = [1.0, -2.0, 0.5, 3.0, 2.0, 1.0];
        let mut b = [0.0; 6];
        matrix.spmv(&x_true, &mut b);
        let mut z = [0.0; 6];
        precond.apply(&matrix, &b, &mut z);
        for k in 0..6 {
            assert_relative_eq!(z[k], x_true[k], epsilon = 1e-13);
        }
    }

    #[test]
    fn ilu0_is_an_exact_solve_on_a_chain() {
        // a chain graph has no fill outside the pattern, so ILU(0) = LU
        let matrix = chain_matrix(6, 3);
        let precond = Preconditioner::build(PreconditionerKind::Ilu0, &matrix).unwrap();

        let n = 6 * 3;
        let x_true: Vec<f64> = (0..n).map(|k| (k as f64 * 0.37).sin()).collect();
        let mut b = vec![0.0; n];
        matrix.spmv(&x_true, &mut b);
        let mut z = vec![0.0; n];
        precond.apply(&matrix, &b, &mut z);
        for k in 0..n {
            assert_relative_eq!(z[k], x_true[k], epsilon = 1e-10);
        }
    }

    #[test]
    fn sgs_reduces_the_residual() {
        let matrix = chain_matrix(8, 2);
        let precond = Preconditioner::build(PreconditionerKind::Sgs, &matrix).unwrap();

        let n = 8 * 2;
        let b: Vec<f64> = (0..n).map(|k| 1.0 + (k as f64 * 0.2).cos()).collect();
        let mut z = vec![0.0; n];
        precond.apply(&matrix, &b, &mut z);

        // one symmetric sweep must beat the zero iterate by a wide margin
        let mut az = vec![0.0; n];
        matrix.spmv(&z, &mut az);
        let res: f64 = az
            .iter()
            .zip(&b)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        let b_norm: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!(res < 0.5 * b_norm, "residual {} vs {}", res, b_norm);
    }
}
