use super::block::BlockMatrix;
use super::precond::Preconditioner;
use super::{axpy, dot, norm, xpby};

/**
 * Outcome of an iterative solve. `stalled` flags a cycle that reduced the
 * residual by less than one percent; the caller treats it like a divergence
 * and cuts the CFL, but the best iterate is still in `x`.
 */
#[derive(Clone, Copy, Debug)]
pub struct SolveStats {
    pub iterations: usize,
    pub residual: f64,
    pub target: f64,
    pub converged: bool,
    pub stalled: bool,
}

/**
 * Right-preconditioned restarted GMRES. Works in the preconditioned
 * variable u = M x, so the Arnoldi residual norms are those of the true
 * system and the update is x += M^-1 (V y) once per cycle.
 */
pub fn gmres(
    matrix: &BlockMatrix,
    precond: &Preconditioner,
    b: &[f64],
    x: &mut [f64],
    restart: usize,
    tol_rel: f64,
    tol_abs: f64,
    max_iter: usize,
) -> SolveStats {
    let n = b.len();
    let mut work = vec![0.0; n];
    matrix.spmv(x, &mut work);
    let mut r: Vec<f64> = b.iter().zip(&work).map(|(b, ax)| b - ax).collect();
    let beta0 = norm(&r);
    let target = (tol_rel * beta0).max(tol_abs);

    let mut stats = SolveStats {
        iterations: 0,
        residual: beta0,
        target,
        converged: beta0 <= target,
        stalled: false,
    };
    if stats.converged || beta0 == 0.0 {
        return stats;
    }

    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(restart + 1);
    let mut h = vec![vec![0.0f64; restart]; restart + 1];
    let mut cs = vec![0.0f64; restart];
    let mut sn = vec![0.0f64; restart];
    let mut g = vec![0.0f64; restart + 1];

    while stats.iterations < max_iter && !stats.converged {
        let cycle_start_residual = stats.residual;
        let beta = norm(&r);
        basis.clear();
        let mut v0 = r.clone();
        super::scale(1.0 / beta, &mut v0);
        basis.push(v0);
        g.iter_mut().for_each(|x| *x = 0.0);
        g[0] = beta;

        let mut k_used = 0;
        for k in 0..restart {
            if stats.iterations >= max_iter {
                break;
            }
            stats.iterations += 1;
            k_used = k + 1;

            // w = A M^-1 v_k
            precond.apply(matrix, &basis[k], &mut work);
            let mut w = vec![0.0; n];
            matrix.spmv(&work, &mut w);

            // modified Gram-Schmidt
            for (l, v) in basis.iter().enumerate() {
                h[l][k] = dot(&w, v);
                axpy(-h[l][k], v, &mut w);
            }
            h[k + 1][k] = norm(&w);
            if h[k + 1][k] > 0.0 {
                super::scale(1.0 / h[k + 1][k], &mut w);
            }
            basis.push(w);

            // apply the accumulated Givens rotations, then form a new one
            for l in 0..k {
                let t = cs[l] * h[l][k] + sn[l] * h[l + 1][k];
                h[l + 1][k] = -sn[l] * h[l][k] + cs[l] * h[l + 1][k];
                h[l][k] = t;
            }
            let denom = (h[k][k] * h[k][k] + h[k + 1][k] * h[k + 1][k]).sqrt();
            if denom == 0.0 {
                break;
            }
            cs[k] = h[k][k] / denom;
            sn[k] = h[k + 1][k] / denom;
            h[k][k] = denom;
            h[k + 1][k] = 0.0;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];

            stats.residual = g[k + 1].abs();
            if stats.residual <= target {
                stats.converged = true;
                break;
            }
        }

        // back-substitute y and update x += M^-1 (V y)
        let mut y = vec![0.0f64; k_used];
        for i in (0..k_used).rev() {
            let mut sum = g[i];
            for j in i + 1..k_used {
                sum -= h[i][j] * y[j];
            }
            y[i] = sum / h[i][i];
        }
        let mut update = vec![0.0; n];
        for (j, yj) in y.iter().enumerate() {
            axpy(*yj, &basis[j], &mut update);
        }
        precond.apply(matrix, &update, &mut work);
        axpy(1.0, &work, x);

        // true residual for the next cycle
        matrix.spmv(x, &mut work);
        r.iter_mut()
            .zip(b.iter().zip(&work))
            .for_each(|(r, (b, ax))| *r = b - ax);
        stats.residual = norm(&r);
        stats.converged = stats.residual <= target;

        if !stats.converged && stats.residual > 0.99 * cycle_start_residual {
            stats.stalled = true;
            break;
        }
    }
    stats
}

/**
 * Preconditioned BiCGStab with the usual breakdown guards; breakdown is
 * reported as a stall with the best iterate left in x.
 */
pub fn bicgstab(
    matrix: &BlockMatrix,
    precond: &Preconditioner,
    b: &[f64],
    x: &mut [f64],
    tol_rel: f64,
    tol_abs: f64,
    max_iter: usize,
) -> SolveStats {
    let n = b.len();
    let mut work = vec![0.0; n];
    matrix.spmv(x, &mut work);
    let mut r: Vec<f64> = b.iter().zip(&work).map(|(b, ax)| b - ax).collect();
    let beta0 = norm(&r);
    let target = (tol_rel * beta0).max(tol_abs);

    let mut stats = SolveStats {
        iterations: 0,
        residual: beta0,
        target,
        converged: beta0 <= target,
        stalled: false,
    };
    if stats.converged || beta0 == 0.0 {
        return stats;
    }

    let r_shadow = r.clone();
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut rho = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;

    while stats.iterations < max_iter {
        stats.iterations += 1;

        let rho_new = dot(&r_shadow, &r);
        if rho_new.abs() < 1e-300 {
            stats.stalled = true;
            break;
        }
        let beta = (rho_new / rho) * (alpha / omega);
        // p = r + beta (p - omega v)
        axpy(-omega, &v, &mut p);
        xpby(&r, beta, &mut p);

        precond.apply(matrix, &p, &mut p_hat);
        matrix.spmv(&p_hat, &mut v);
        let denom = dot(&r_shadow, &v);
        if denom.abs() < 1e-300 {
            stats.stalled = true;
            break;
        }
        alpha = rho_new / denom;

        // s = r - alpha v (reuse r)
        axpy(-alpha, &v, &mut r);
        stats.residual = norm(&r);
        if stats.residual <= target {
            axpy(alpha, &p_hat, x);
            stats.converged = true;
            break;
        }

        precond.apply(matrix, &r, &mut s_hat);
        matrix.spmv(&s_hat, &mut t);
        let tt = dot(&t, &t);
        if tt < 1e-300 {
            stats.stalled = true;
            break;
        }
        omega = dot(&t, &r) / tt;

        axpy(alpha, &p_hat, x);
        axpy(omega, &s_hat, x);
        axpy(-omega, &t, &mut r);

        stats.residual = norm(&r);
        if stats.residual <= target {
            stats.converged = true;
            break;
        }
        rho = rho_new;
    }
    stats
}
