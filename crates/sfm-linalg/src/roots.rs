//! Real-root extraction for dense univariate polynomials.
//!
//! Roots are found as the eigenvalues of the companion matrix, the standard
//! approach for the small, fixed-degree polynomials arising in minimal
//! solvers (quartic for P3P, degree 10 for the five-point problem).

use nalgebra::DMatrix;

/// Relative magnitude below which a leading coefficient is treated as zero.
const LEADING_EPS: f64 = 1e-12;

/// Imaginary-part tolerance for accepting an eigenvalue as a real root.
const IMAG_EPS: f64 = 1e-8;

/// Find all real roots of the polynomial `c[0] + c[1]*x + ... + c[n]*x^n`.
///
/// Coefficients are in ascending order of degree. Leading coefficients that
/// are negligibly small relative to the largest coefficient are trimmed
/// before the companion matrix is formed. Each accepted root is polished by
/// two Newton iterations.
///
/// Returns an empty vector for constant (or effectively zero) polynomials.
pub fn find_real_roots(coeffs: &[f64]) -> Vec<f64> {
    let max_abs = coeffs.iter().fold(0.0f64, |m, c| m.max(c.abs()));
    if max_abs == 0.0 || !max_abs.is_finite() {
        return Vec::new();
    }

    // Trim negligible leading coefficients.
    let mut degree = coeffs.len() - 1;
    while degree > 0 && coeffs[degree].abs() < LEADING_EPS * max_abs {
        degree -= 1;
    }
    if degree == 0 {
        return Vec::new();
    }

    let mut roots = if degree == 1 {
        vec![-coeffs[0] / coeffs[1]]
    } else if degree == 2 {
        solve_quadratic(coeffs[0], coeffs[1], coeffs[2])
    } else {
        companion_roots(&coeffs[..=degree])
    };

    for root in &mut roots {
        *root = newton_polish(coeffs, *root, 2);
    }
    roots
}

fn solve_quadratic(c0: f64, c1: f64, c2: f64) -> Vec<f64> {
    let disc = c1 * c1 - 4.0 * c2 * c0;
    if disc < 0.0 {
        return Vec::new();
    }
    // Citardauq form avoids cancellation for small roots.
    let q = -0.5 * (c1 + c1.signum() * disc.sqrt());
    let mut roots = Vec::with_capacity(2);
    if c2 != 0.0 {
        roots.push(q / c2);
    }
    if q != 0.0 {
        roots.push(c0 / q);
    }
    roots
}

fn companion_roots(coeffs: &[f64]) -> Vec<f64> {
    let n = coeffs.len() - 1;
    let lead = coeffs[n];

    // Companion matrix with the monic coefficients in the last column.
    let mut companion = DMatrix::<f64>::zeros(n, n);
    for i in 1..n {
        companion[(i, i - 1)] = 1.0;
    }
    for i in 0..n {
        companion[(i, n - 1)] = -coeffs[i] / lead;
    }

    let eigenvalues = companion.complex_eigenvalues();
    eigenvalues
        .iter()
        .filter(|e| e.im.abs() <= IMAG_EPS * (1.0 + e.re.abs()))
        .map(|e| e.re)
        .collect()
}

fn newton_polish(coeffs: &[f64], x0: f64, iterations: usize) -> f64 {
    let mut x = x0;
    for _ in 0..iterations {
        let mut value = 0.0;
        let mut deriv = 0.0;
        for &c in coeffs.iter().rev() {
            deriv = deriv * x + value;
            value = value * x + c;
        }
        if deriv.abs() < f64::MIN_POSITIVE.sqrt() {
            break;
        }
        let step = value / deriv;
        if !step.is_finite() {
            break;
        }
        x -= step;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sorted(mut roots: Vec<f64>) -> Vec<f64> {
        roots.sort_by(|a, b| a.total_cmp(b));
        roots
    }

    #[test]
    fn test_linear() {
        let roots = find_real_roots(&[-6.0, 2.0]);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quadratic_two_roots() {
        // (x - 1)(x + 4) = x^2 + 3x - 4
        let roots = sorted(find_real_roots(&[-4.0, 3.0, 1.0]));
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], -4.0, epsilon = 1e-10);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_quadratic_no_real_roots() {
        let roots = find_real_roots(&[1.0, 0.0, 1.0]);
        assert!(roots.is_empty());
    }

    #[test]
    fn test_quartic() {
        // (x - 1)(x + 2)(x - 3)(x + 0.5)
        // = x^4 - 1.5x^3 - 6.5x^2 + 7x + 3
        let roots = sorted(find_real_roots(&[3.0, 7.0, -6.5, -1.5, 1.0]));
        assert_eq!(roots.len(), 4);
        let expected = [-2.0, -0.5, 1.0, 3.0];
        for (r, e) in roots.iter().zip(expected.iter()) {
            assert_relative_eq!(*r, *e, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_degree_ten_known_roots() {
        // prod_{k=1..5} (x - k)(x + k) = prod (x^2 - k^2)
        let mut coeffs = vec![1.0];
        for k in 1..=5 {
            let k2 = (k * k) as f64;
            // multiply by (x^2 - k2)
            let mut next = vec![0.0; coeffs.len() + 2];
            for (i, &c) in coeffs.iter().enumerate() {
                next[i + 2] += c;
                next[i] -= k2 * c;
            }
            coeffs = next;
        }
        let roots = sorted(find_real_roots(&coeffs));
        assert_eq!(roots.len(), 10);
        let expected = [-5.0, -4.0, -3.0, -2.0, -1.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        for (r, e) in roots.iter().zip(expected.iter()) {
            assert_relative_eq!(*r, *e, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_trimmed_leading_zeros() {
        // Effectively linear despite the quartic storage.
        let roots = find_real_roots(&[-2.0, 1.0, 0.0, 0.0, 1e-300]);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_constant_polynomial() {
        assert!(find_real_roots(&[4.0]).is_empty());
        assert!(find_real_roots(&[0.0, 0.0]).is_empty());
    }
}
