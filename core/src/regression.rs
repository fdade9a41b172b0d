//! Fee curves: polynomials mapping payment frequency to a fee fraction.
//!
//! Coefficients are stored in ascending power order, `[c0, c1, c2, ...]`,
//! so `f(x) = c0 + c1*x + c2*x^2 + ...`.

use serde::{Deserialize, Serialize};

/// Upper bound on the fitted degree when no configuration overrides it.
pub const MAX_DEGREE: usize = 5;

/// One user-supplied control point of a fee curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePoint {
    pub freq: f64,
    pub fee: f64,
}

impl CurvePoint {
    pub fn new(freq: f64, fee: f64) -> Self {
        Self { freq, fee }
    }
}

/// Fit a fee curve through `points` using the default degree cap.
pub fn fit(points: &[CurvePoint], max_fee: f64) -> Vec<f64> {
    fit_with_degree(points, max_fee, MAX_DEGREE)
}

/// Fit a fee curve. The point count decides the shape:
///
/// - 0 points: `f(x) = max_fee * x`
/// - 1 point: a line through the origin and the point
/// - 2 points: a line through the origin with the slope between the points
/// - 3+ points: least squares of degree `min(n - 1, max_degree)`
///
/// One or two points with an undefined slope fall back to
/// `f(x) = max_fee * x`. Three or more points always yield
/// `degree + 1` coefficients; when repeated frequencies make the fit
/// underdetermined, the minimum-norm least-squares solution is returned.
pub fn fit_with_degree(points: &[CurvePoint], max_fee: f64, max_degree: usize) -> Vec<f64> {
    let identity = vec![0.0, max_fee];

    match points {
        [] => identity,
        [p] => {
            if p.freq == 0.0 {
                return identity;
            }
            vec![0.0, p.fee / p.freq]
        }
        [p1, p2] => {
            if p2.freq == p1.freq {
                return identity;
            }
            vec![0.0, (p2.fee - p1.fee) / (p2.freq - p1.freq)]
        }
        _ => {
            let degree = (points.len() - 1).min(max_degree.max(1));
            least_squares(points, degree).unwrap_or_else(|| minimum_norm(points, degree))
        }
    }
}

/// Evaluate `Σ cᵢ·xⁱ` by direct summation.
pub fn evaluate(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .enumerate()
        .map(|(i, c)| c * x.powi(i as i32))
        .sum()
}

/// Least-squares polynomial of `degree` through `points`, solved with a
/// Householder QR factorisation of the Vandermonde matrix.
/// Returns `None` when the matrix is rank deficient.
fn least_squares(points: &[CurvePoint], degree: usize) -> Option<Vec<f64>> {
    let rows = points.len();
    let cols = degree + 1;
    if rows < cols {
        return None;
    }

    let mut a: Vec<Vec<f64>> = points
        .iter()
        .map(|p| (0..cols).map(|k| p.freq.powi(k as i32)).collect())
        .collect();
    let mut b: Vec<f64> = points.iter().map(|p| p.fee).collect();

    let column_norms: Vec<f64> = (0..cols)
        .map(|k| a.iter().map(|row| row[k] * row[k]).sum::<f64>().sqrt())
        .collect();

    for k in 0..cols {
        let norm = (k..rows).map(|i| a[i][k] * a[i][k]).sum::<f64>().sqrt();
        if column_norms[k] == 0.0 || norm <= 1e-10 * column_norms[k] {
            return None;
        }

        let alpha = if a[k][k] > 0.0 { -norm } else { norm };
        let mut v: Vec<f64> = (k..rows).map(|i| a[i][k]).collect();
        v[0] -= alpha;
        let v_norm2: f64 = v.iter().map(|e| e * e).sum();
        if v_norm2 == 0.0 {
            continue;
        }

        for j in k..cols {
            let dot: f64 = (k..rows).map(|i| v[i - k] * a[i][j]).sum();
            let factor = 2.0 * dot / v_norm2;
            for i in k..rows {
                a[i][j] -= factor * v[i - k];
            }
        }
        let dot: f64 = (k..rows).map(|i| v[i - k] * b[i]).sum();
        let factor = 2.0 * dot / v_norm2;
        for i in k..rows {
            b[i] -= factor * v[i - k];
        }
    }

    // Back substitution on the upper-triangular R.
    let mut coefficients = vec![0.0; cols];
    for k in (0..cols).rev() {
        let tail: f64 = ((k + 1)..cols).map(|j| a[k][j] * coefficients[j]).sum();
        coefficients[k] = (b[k] - tail) / a[k][k];
    }

    if coefficients.iter().all(|c| c.is_finite()) {
        Some(coefficients)
    } else {
        None
    }
}

/// Least-squares polynomial of `degree` for a rank-deficient Vandermonde
/// system: of all curves with the minimal residual, the one whose
/// coefficients, each weighted by its column norm, have the smallest norm.
fn minimum_norm(points: &[CurvePoint], degree: usize) -> Vec<f64> {
    let cols = degree + 1;
    let roots = distinct_frequencies(points);
    log::debug!(
        "regression: {} points over {} distinct frequencies, degree {degree} is underdetermined",
        points.len(),
        roots.len()
    );

    // A fit of degree (distinct - 1) already reaches the minimal residual.
    let mut particular = vec![0.0; cols];
    let start = (roots.len().max(1) - 1).min(degree);
    for d in (0..=start).rev() {
        if let Some(c) = least_squares(points, d) {
            particular[..c.len()].copy_from_slice(&c);
            break;
        }
    }

    let scale: Vec<f64> = (0..cols)
        .map(|k| points.iter().map(|p| p.freq.powi(k as i32).powi(2)).sum::<f64>().sqrt())
        .collect();

    // Null space: multiples of the polynomial vanishing on every distinct
    // frequency, orthonormalised in the scaled coordinates.
    let mut basis: Vec<Vec<f64>> = Vec::new();
    if roots.len() <= degree {
        let vanishing = roots.iter().fold(vec![1.0], |poly, &r| multiply_by_root(&poly, r));
        for shift in 0..=(degree - roots.len()) {
            let mut v = vec![0.0; cols];
            for (i, c) in vanishing.iter().enumerate() {
                v[i + shift] = c * scale[i + shift];
            }
            let initial = dot(&v, &v).sqrt();
            if initial == 0.0 {
                continue;
            }
            for u in &basis {
                let along = dot(&v, u);
                v.iter_mut().zip(u).for_each(|(a, b)| *a -= along * b);
            }
            let norm = dot(&v, &v).sqrt();
            if norm > 1e-12 * initial {
                v.iter_mut().for_each(|a| *a /= norm);
                basis.push(v);
            }
        }
    }

    let mut scaled: Vec<f64> = particular.iter().zip(&scale).map(|(c, s)| c * s).collect();
    for u in &basis {
        let along = dot(&scaled, u);
        scaled.iter_mut().zip(u).for_each(|(a, b)| *a -= along * b);
    }
    scaled
        .iter()
        .zip(&scale)
        .map(|(d, s)| if *s == 0.0 { 0.0 } else { d / s })
        .collect()
}

/// Sorted frequencies with near-equal values merged.
fn distinct_frequencies(points: &[CurvePoint]) -> Vec<f64> {
    let mut freqs: Vec<f64> = points.iter().map(|p| p.freq).collect();
    freqs.sort_by(|a, b| a.total_cmp(b));
    let span = freqs.iter().fold(1.0_f64, |m, f| m.max(f.abs()));
    freqs.dedup_by(|a, b| (*a - *b).abs() <= 1e-12 * span);
    freqs
}

/// `poly * (x - root)`, ascending coefficients.
fn multiply_by_root(poly: &[f64], root: f64) -> Vec<f64> {
    let mut out = vec![0.0; poly.len() + 1];
    for (i, c) in poly.iter().enumerate() {
        out[i] -= root * c;
        out[i + 1] += c;
    }
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn pts(raw: &[(f64, f64)]) -> Vec<CurvePoint> {
        raw.iter().map(|&(f, y)| CurvePoint::new(f, y)).collect()
    }

    #[test]
    fn no_points_gives_identity_line() {
        assert_eq!(fit(&[], 0.2), vec![0.0, 0.2]);
    }

    #[test]
    fn single_point_at_zero_frequency_falls_back() {
        assert_eq!(fit(&pts(&[(0.0, 5.0)]), 1.0), vec![0.0, 1.0]);
    }

    #[test]
    fn single_point_defines_slope_through_origin() {
        assert_eq!(fit(&pts(&[(0.5, 2.0)]), 0.1), vec![0.0, 4.0]);
    }

    #[test]
    fn two_points_define_slope() {
        assert_eq!(fit(&pts(&[(0.2, 0.01), (0.6, 0.05)]), 0.1)[0], 0.0);
        assert!(close(fit(&pts(&[(0.2, 0.01), (0.6, 0.05)]), 0.1)[1], 0.1));
        assert_eq!(fit(&pts(&[(0.3, 0.01), (0.3, 0.05)]), 0.4), vec![0.0, 0.4]);
    }

    #[test]
    fn three_points_interpolate_a_quadratic() {
        // y = 1 + 2x + 3x^2
        let coefficients = fit(&pts(&[(0.0, 1.0), (1.0, 6.0), (2.0, 17.0)]), 0.1);
        assert_eq!(coefficients.len(), 3);
        assert!(close(coefficients[0], 1.0));
        assert!(close(coefficients[1], 2.0));
        assert!(close(coefficients[2], 3.0));
    }

    #[test]
    fn degree_is_capped_at_five() {
        let raw: Vec<(f64, f64)> = (0..10).map(|i| {
            let x = i as f64 / 10.0;
            (x, 0.05 * x)
        }).collect();
        let coefficients = fit(&pts(&raw), 0.1);
        assert_eq!(coefficients.len(), MAX_DEGREE + 1);
        assert!(close(evaluate(&coefficients, 0.55), 0.0275));
    }

    #[test]
    fn overdetermined_fit_minimises_squared_error() {
        // Best line through (0,0), (1,1), (2,1), (3,2) with a degree cap of 1
        // is y = 0.1 + 0.6x.
        let coefficients = fit_with_degree(&pts(&[(0.0, 0.0), (1.0, 1.0), (2.0, 1.0), (3.0, 2.0)]), 0.1, 1);
        assert!(close(coefficients[0], 0.1));
        assert!(close(coefficients[1], 0.6));
    }

    #[test]
    fn repeated_frequencies_keep_the_requested_degree() {
        // Two distinct abscissae: the quadratic is underdetermined but the
        // curve still passes through the mean fee at each frequency.
        let coefficients = fit(&pts(&[(0.0, 0.0), (0.5, 0.02), (0.5, 0.04)]), 0.1);
        assert_eq!(coefficients.len(), 3);
        assert!(close(evaluate(&coefficients, 0.0), 0.0));
        assert!(close(evaluate(&coefficients, 0.5), 0.03));

        let coefficients = fit(&pts(&[(0.2, 0.01), (0.2, 0.03), (0.6, 0.05)]), 0.3);
        assert_eq!(coefficients.len(), 3);
        assert!(close(evaluate(&coefficients, 0.2), 0.02));
        assert!(close(evaluate(&coefficients, 0.6), 0.05));
    }

    #[test]
    fn three_points_on_one_frequency_fit_their_fee() {
        let points = [CurvePoint::new(0.5, 0.02); 3];
        let coefficients = fit(&points, 0.3);
        assert_eq!(coefficients.len(), 3);
        assert!(close(evaluate(&coefficients, 0.5), 0.02));
        let sse: f64 = points.iter().map(|p| (evaluate(&coefficients, p.freq) - p.fee).powi(2)).sum();
        assert!(sse < 1e-18);
        // Smallest solution once each power is weighted by its column norm.
        assert!(close(coefficients[0], 0.02 / 3.0));
        assert!(close(coefficients[1], 0.04 / 3.0));
        assert!(close(coefficients[2], 0.08 / 3.0));
    }

    #[test]
    fn all_points_at_zero_frequency_fit_the_mean_fee() {
        let coefficients = fit(&pts(&[(0.0, 1.0), (0.0, 2.0), (0.0, 3.0)]), 0.3);
        assert_eq!(coefficients.len(), 3);
        assert!(close(coefficients[0], 2.0));
        assert_eq!(&coefficients[1..], &[0.0, 0.0]);
    }

    #[test]
    fn evaluate_sums_powers() {
        assert_eq!(evaluate(&[], 3.0), 0.0);
        assert_eq!(evaluate(&[2.0], 0.0), 2.0);
        assert_eq!(evaluate(&[1.0, 2.0, 3.0], 2.0), 17.0);
        assert_eq!(evaluate(&[0.0, 0.2], 0.5), 0.1);
    }
}
