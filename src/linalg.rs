//! Small dense linear-algebra helpers for the ridge/Bayesian linear models.
//! Matrices are row-major `Vec<f64>` of length `d * d`.

const EPSILON: f64 = 1e-10;

/// Cholesky factorization of a symmetric positive-definite matrix,
/// `A = L·Lᵀ`, with a tiny diagonal regularization so near-singular inputs
/// still produce a usable factor.
pub fn cholesky_decompose(a: &[f64], d: usize) -> Vec<f64> {
    let mut l = vec![0.0; d * d];
    let mut work = a.to_vec();
    for i in 0..d {
        work[i * d + i] += EPSILON;
    }

    for i in 0..d {
        for j in 0..=i {
            let mut sum = work[i * d + j];
            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }

            if i == j {
                l[i * d + i] = if sum <= 0.0 { EPSILON.sqrt() } else { sum.sqrt() };
            } else {
                let diag = l[j * d + j];
                l[i * d + j] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
            }
        }
    }

    l
}

/// Solves `A·x = b` given the Cholesky factor `L` of `A`.
pub fn solve_cholesky(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let y = solve_triangular_lower(l, b, d);
    solve_triangular_upper_transpose(l, &y, d)
}

/// Forward substitution for `L·x = b`.
pub fn solve_triangular_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }
        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

/// Back substitution for `Lᵀ·x = b`.
pub fn solve_triangular_upper_transpose(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

/// `xᵀ·A⁻¹·x` via the Cholesky factor: `‖L⁻¹x‖²`. The uncertainty term of
/// the UCB rule.
pub fn quadratic_form(l: &[f64], x: &[f64], d: usize) -> f64 {
    let z = solve_triangular_lower(l, x, d);
    z.iter().map(|&v| v * v).sum()
}

pub fn mat_vec_mul(a: &[f64], x: &[f64], d: usize) -> Vec<f64> {
    let mut result = vec![0.0; d];
    for i in 0..d {
        for j in 0..d {
            result[i] += a[i * d + j] * x[j];
        }
    }
    result
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// Outer-product update `A += x·xᵀ`.
pub fn rank1_update(a: &mut [f64], x: &[f64], d: usize) {
    for i in 0..d {
        for j in 0..d {
            a[i * d + j] += x[i] * x[j];
        }
    }
}

/// `a += scale · b`.
pub fn vec_add_scaled(a: &mut [f64], b: &[f64], scale: f64) {
    for (ai, &bi) in a.iter_mut().zip(b.iter()) {
        *ai += scale * bi;
    }
}

pub fn identity(d: usize) -> Vec<f64> {
    let mut m = vec![0.0; d * d];
    for i in 0..d {
        m[i * d + i] = 1.0;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cholesky_of_identity_is_identity() {
        let l = cholesky_decompose(&identity(3), 3);
        for i in 0..3 {
            assert!((l[i * 3 + i] - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn solve_recovers_known_solution() {
        let a = vec![2.0, 1.0, 1.0, 2.0];
        let b = vec![1.0, 2.0];
        let l = cholesky_decompose(&a, 2);
        let x = solve_cholesky(&l, &b, 2);
        let ax = mat_vec_mul(&a, &x, 2);
        assert!((ax[0] - b[0]).abs() < 1e-6);
        assert!((ax[1] - b[1]).abs() < 1e-6);
    }

    #[test]
    fn quadratic_form_matches_direct_computation() {
        let l = cholesky_decompose(&identity(2), 2);
        let x = vec![3.0, 4.0];
        assert!((quadratic_form(&l, &x, 2) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn rank1_update_adds_outer_product() {
        let mut a = identity(2);
        rank1_update(&mut a, &[0.5, 0.5], 2);
        assert!((a[0] - 1.25).abs() < 1e-12);
        assert!((a[1] - 0.25).abs() < 1e-12);
        assert!((a[3] - 1.25).abs() < 1e-12);
    }

    #[test]
    fn dot_and_scaled_add() {
        assert!((dot(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]) - 32.0).abs() < 1e-12);
        let mut a = vec![1.0, 1.0];
        vec_add_scaled(&mut a, &[2.0, 4.0], 0.5);
        assert_eq!(a, vec![2.0, 3.0]);
    }
}
