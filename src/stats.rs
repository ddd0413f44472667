//! # Stage: Significance Statistics
//!
//! ## Responsibility
//! Numeric building blocks for winner declaration: running moments, Welch's
//! t-test for mean-type metrics, a pooled two-proportion z-test for rate
//! metrics, and a least-squares slope for the trend signal.
//!
//! ## Guarantees
//! - Non-panicking: every routine returns `None` instead of dividing by zero
//! - Two-tailed p-values are clamped to `[0, 1]`
//! - The t-distribution tail is computed from the regularized incomplete beta
//!   function, so small day counts are not over-reported as significant
//!
//! ## NOT Responsible For
//! - Choosing which test applies to a metric (see [`crate::aggregate`])
//! - Sample-size gating (see [`crate::analysis`])

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RowStats — running moments over sample rows
// ---------------------------------------------------------------------------

/// Running count, mean and variance of a sequence of row values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RowStats {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

impl RowStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    /// Sample variance (Bessel's correction). Clamped at zero against
    /// floating-point cancellation.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        let m = self.mean();
        ((self.sum_sq - n * m * m) / (n - 1.0)).max(0.0)
    }
}

impl FromIterator<f64> for RowStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = RowStats::new();
        for v in iter {
            stats.record(v);
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Test results
// ---------------------------------------------------------------------------

/// Which significance test produced a [`TestResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMethod {
    WelchT,
    TwoProportionZ,
}

/// Outcome of comparing a treatment against control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub method: TestMethod,
    /// t or z statistic, signed as `treatment - control`.
    pub statistic: f64,
    /// Degrees of freedom for the t-test (Welch–Satterthwaite).
    pub df: Option<f64>,
    /// Two-tailed p-value.
    pub p_value: f64,
}

impl TestResult {
    /// Confidence actually achieved, in percent.
    pub fn confidence_achieved(&self) -> f64 {
        ((1.0 - self.p_value) * 100.0).clamp(0.0, 100.0)
    }

    /// Whether the result clears a target confidence level given in percent.
    pub fn is_significant_at(&self, confidence_level: u8) -> bool {
        self.p_value < 1.0 - f64::from(confidence_level) / 100.0
    }
}

// ---------------------------------------------------------------------------
// Welch's t-test
// ---------------------------------------------------------------------------

/// Welch's independent-samples t-test between control and treatment rows.
///
/// Returns `None` if either side has fewer than 2 observations.
pub fn welch_t_test(control: &RowStats, treatment: &RowStats) -> Option<TestResult> {
    let n1 = control.count() as f64;
    let n2 = treatment.count() as f64;
    if n1 < 2.0 || n2 < 2.0 {
        return None;
    }

    let m1 = control.mean();
    let m2 = treatment.mean();
    let se1 = control.variance() / n1;
    let se2 = treatment.variance() / n2;
    let se_total = se1 + se2;

    // When variance is zero but means differ, the result is definitively significant.
    if se_total <= 0.0 {
        let equal = (m1 - m2).abs() < 1e-10;
        return Some(TestResult {
            method: TestMethod::WelchT,
            statistic: if equal { 0.0 } else { (m2 - m1).signum() * f64::INFINITY },
            df: Some(n1 + n2 - 2.0),
            p_value: if equal { 1.0 } else { 0.0 },
        });
    }

    let t_stat = (m2 - m1) / se_total.sqrt();

    // Welch–Satterthwaite degrees of freedom
    let denom = se1 * se1 / (n1 - 1.0) + se2 * se2 / (n2 - 1.0);
    let df = if denom > 0.0 { (se_total * se_total) / denom } else { n1 + n2 - 2.0 };

    Some(TestResult {
        method: TestMethod::WelchT,
        statistic: t_stat,
        df: Some(df),
        p_value: student_t_two_tailed_p(t_stat.abs(), df),
    })
}

// ---------------------------------------------------------------------------
// Two-proportion z-test
// ---------------------------------------------------------------------------

/// Pooled two-proportion z-test. Proportions are in `[0, 1]`, `n` are the
/// observation counts behind them.
///
/// Returns `None` when either side has no observations or the pooled
/// proportion is degenerate (0 or 1) with equal proportions.
pub fn two_proportion_z_test(p_control: f64, n_control: f64, p_treatment: f64, n_treatment: f64) -> Option<TestResult> {
    if n_control <= 0.0 || n_treatment <= 0.0 || !p_control.is_finite() || !p_treatment.is_finite() {
        return None;
    }
    let pooled = (p_control * n_control + p_treatment * n_treatment) / (n_control + n_treatment);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_control + 1.0 / n_treatment)).sqrt();
    let diff = p_treatment - p_control;
    if se <= 0.0 {
        if diff.abs() < 1e-12 {
            return None;
        }
        return Some(TestResult {
            method: TestMethod::TwoProportionZ,
            statistic: diff.signum() * f64::INFINITY,
            df: None,
            p_value: 0.0,
        });
    }
    let z = diff / se;
    Some(TestResult {
        method: TestMethod::TwoProportionZ,
        statistic: z,
        df: None,
        p_value: (2.0 * standard_normal_upper_tail(z.abs())).min(1.0),
    })
}

// ---------------------------------------------------------------------------
// Distribution tails
// ---------------------------------------------------------------------------

/// Two-tailed p-value of Student's t with `df` degrees of freedom.
fn student_t_two_tailed_p(t_abs: f64, df: f64) -> f64 {
    if !t_abs.is_finite() {
        return 0.0;
    }
    if df <= 0.0 || !df.is_finite() {
        return (2.0 * standard_normal_upper_tail(t_abs)).min(1.0);
    }
    let x = df / (df + t_abs * t_abs);
    regularized_incomplete_beta(x, df / 2.0, 0.5).clamp(0.0, 1.0)
}

/// Upper tail probability of the standard normal distribution (z > x).
/// Abramowitz & Stegun 26.2.17 approximation, accurate to ~1e-7.
pub fn standard_normal_upper_tail(x: f64) -> f64 {
    if x < 0.0 { return 1.0 - standard_normal_upper_tail(-x); }
    if x > 8.0 { return 0.0; }
    let t = 1.0 / (1.0 + 0.2316419 * x);
    let poly = t * (0.319381530
        + t * (-0.356563782
        + t * (1.781477937
        + t * (-1.821255978
        + t * 1.330274429))));
    let pdf = (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt();
    pdf * poly
}

/// Lanczos approximation of ln Γ(x) for x > 0.
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = COEF[0];
    for (i, c) in COEF.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// Regularized incomplete beta I_x(a, b).
fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 { return 0.0; }
    if x >= 1.0 { return 1.0; }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(x, a, b) / a
    } else {
        1.0 - front * beta_continued_fraction(1.0 - x, b, a) / b
    }
}

/// Lentz's method for the incomplete beta continued fraction.
fn beta_continued_fraction(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 3e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY { d = TINY; }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY { d = TINY; }
        c = 1.0 + aa / c;
        if c.abs() < TINY { c = TINY; }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY { d = TINY; }
        c = 1.0 + aa / c;
        if c.abs() < TINY { c = TINY; }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

// ---------------------------------------------------------------------------
// Trend slope
// ---------------------------------------------------------------------------

/// Ordinary least-squares slope of `y` over `x`.
///
/// Returns `None` with fewer than two points or when every `x` is equal.
pub fn linear_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    if sxx <= 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    Some(sxy / sxx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
