//! Sample-ratio-mismatch check.
//!
//! Pearson chi-square goodness-of-fit of observed unit counts against the
//! configured variation weights. The p-value comes from the regularized
//! upper incomplete gamma function.

use std::f64::consts::PI;

/// p-value that `observed` was drawn with the proportions in `weights`.
///
/// Variations with zero weight or zero units are left out. With fewer than
/// two usable variations there is nothing to compare and the result is 1.0.
pub fn check_srm(observed: &[f64], weights: &[f64]) -> f64 {
    let usable: Vec<(f64, f64)> = observed
        .iter()
        .zip(weights)
        .filter(|(&o, &w)| o > 0.0 && w > 0.0)
        .map(|(&o, &w)| (o, w))
        .collect();

    if usable.len() < 2 {
        return 1.0;
    }

    let total_units: f64 = usable.iter().map(|(o, _)| o).sum();
    let total_weight: f64 = usable.iter().map(|(_, w)| w).sum();

    let statistic: f64 = usable
        .iter()
        .map(|&(o, w)| {
            let expected = w / total_weight * total_units;
            (o - expected).powi(2) / expected
        })
        .sum();

    chi_squared_survival((usable.len() - 1) as f64, statistic)
}

/// `P(X > x)` for a chi-square variable with `dof` degrees of freedom.
pub fn chi_squared_survival(dof: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    regularized_upper_gamma(0.5 * dof, 0.5 * x)
}

const MAX_ITER: usize = 2000;
const EPS: f64 = 1e-14;
const FPMIN: f64 = f64::MIN_POSITIVE / EPS;

fn regularized_upper_gamma(s: f64, x: f64) -> f64 {
    let prefactor = (-x + s * x.ln() - ln_gamma(s)).exp();
    if x < s + 1.0 {
        // Series for P(s, x), then complement.
        let mut sum = 1.0 / s;
        let mut term = sum;
        let mut ap = s;
        for _ in 0..MAX_ITER {
            ap += 1.0;
            term *= x / ap;
            sum += term;
            if term.abs() < EPS * sum.abs() {
                break;
            }
        }
        (1.0 - sum * prefactor).clamp(0.0, 1.0)
    } else {
        // Lentz continued fraction for Q(s, x).
        let mut b = x + 1.0 - s;
        let mut c = 1.0 / FPMIN;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let an = -(i as f64) * ((i as f64) - s);
            b += 2.0;
            d = an * d + b;
            if d.abs() < FPMIN {
                d = FPMIN;
            }
            c = b + an / c;
            if c.abs() < FPMIN {
                c = FPMIN;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        (h * prefactor).clamp(0.0, 1.0)
    }
}

/// Lanczos approximation, g = 7.
fn ln_gamma(z: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if z < 0.5 {
        return PI.ln() - (PI * z).sin().ln() - ln_gamma(1.0 - z);
    }
    let z = z - 1.0;
    let mut x = COEFFS[0];
    for (i, coeff) in COEFFS.iter().enumerate().skip(1) {
        x += coeff / (z + i as f64);
    }
    let t = z + 7.5;
    0.5 * (2.0 * PI).ln() + (z + 0.5) * t.ln() - t + x.ln()
}
