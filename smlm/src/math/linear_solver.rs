//! Dense linear system solvers for the Levenberg-Marquardt step.
//!
//! Matrices are square, row-major and sized by the number of fitted
//! parameters, which varies with the peak count.

/// A pivot is treated as zero when elimination has reduced it below this
/// fraction of its original diagonal element.
const PIVOT_EPSILON: f64 = 1e-12;

#[inline]
fn is_degenerate(pivot: f64, diagonal: f64) -> bool {
    !pivot.is_finite() || pivot == 0.0 || pivot <= PIVOT_EPSILON * diagonal
}

/// Solve `A x = b` using Gaussian elimination with partial pivoting.
///
/// `a` is an `n x n` row-major matrix and is consumed as scratch space; `b` is
/// overwritten with the solution. Returns `false` if the matrix is singular.
#[allow(clippy::needless_range_loop)]
pub fn solve_in_place(a: &mut [f64], b: &mut [f64]) -> bool {
    let n = b.len();
    debug_assert_eq!(a.len(), n * n);

    let diagonal: Vec<f64> = (0..n).map(|i| a[i * n + i].abs()).collect();

    // Forward elimination with partial pivoting
    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col * n + col].abs();
        for row in (col + 1)..n {
            let v = a[row * n + col].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }

        if is_degenerate(max_val, diagonal[col]) {
            return false;
        }

        if max_row != col {
            for j in 0..n {
                a.swap(col * n + j, max_row * n + j);
            }
            b.swap(col, max_row);
        }

        let pivot = a[col * n + col];
        for row in (col + 1)..n {
            let factor = a[row * n + col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[row * n + j] -= factor * a[col * n + j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i * n + j] * b[j];
        }
        b[i] = sum / a[i * n + i];
    }

    b.iter().all(|v| v.is_finite())
}

/// Invert an `n x n` row-major matrix with Gauss-Jordan elimination.
///
/// Returns `None` if the matrix is singular.
#[allow(clippy::needless_range_loop)]
pub fn invert(a: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);

    let mut m = a.to_vec();
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n + i] = 1.0;
    }
    let diagonal: Vec<f64> = (0..n).map(|i| m[i * n + i].abs()).collect();

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = m[col * n + col].abs();
        for row in (col + 1)..n {
            let v = m[row * n + col].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }
        if is_degenerate(max_val, diagonal[col]) {
            return None;
        }
        if max_row != col {
            for j in 0..n {
                m.swap(col * n + j, max_row * n + j);
                inv.swap(col * n + j, max_row * n + j);
            }
        }

        let pivot = m[col * n + col];
        for j in 0..n {
            m[col * n + j] /= pivot;
            inv[col * n + j] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[row * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                m[row * n + j] -= factor * m[col * n + j];
                inv[row * n + j] -= factor * inv[col * n + j];
            }
        }
    }

    Some(inv)
}
