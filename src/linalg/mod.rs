pub mod block;
pub mod krylov;
pub mod precond;

pub use block::BlockMatrix;
pub use krylov::{bicgstab, gmres, SolveStats};
pub use precond::Preconditioner;

use rayon::prelude::*;

// Shared dense-vector kernels, parallel over row blocks like the matrix
// operations they accompany.

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// y += alpha * x
pub fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    y.par_iter_mut().zip(x.par_iter()).for_each(|(y, x)| {
        *y += alpha * x;
    });
}

/// y = x + beta * y
pub fn xpby(x: &[f64], beta: f64, y: &mut [f64]) {
    y.par_iter_mut().zip(x.par_iter()).for_each(|(y, x)| {
        *y = x + beta * *y;
    });
}

pub fn scale(alpha: f64, x: &mut [f64]) {
    x.par_iter_mut().for_each(|x| *x *= alpha);
}
