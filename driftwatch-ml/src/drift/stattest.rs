//! Per-column two-sample statistical tests.
//!
//! The test for a column is picked from the sample sizes and the column's
//! shape:
//!
//! | reference rows | column                      | test                  | drift when   |
//! |----------------|-----------------------------|-----------------------|--------------|
//! | ≤ cutoff       | numeric, > 5 distinct values | Kolmogorov–Smirnov    | p < 0.05     |
//! | ≤ cutoff       | > 2 categories              | chi-square            | p < 0.05     |
//! | ≤ cutoff       | binary                      | two-proportion z-test | p < 0.05     |
//! | > cutoff       | numeric, > 5 distinct values | normed Wasserstein    | score ≥ 0.1  |
//! | > cutoff       | otherwise                   | Jensen–Shannon        | score ≥ 0.1  |
//!
//! Distinct values are counted over both samples together. Numeric columns
//! with few distinct values are compared as categories.

use crate::data::frame::{ColumnData, Frame};
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Numeric columns with at most this many distinct values are categorical.
pub const MAX_DISCRETE_VALUES: usize = 5;

/// Replacement for empty proportions in Jensen–Shannon.
const EMPTY_BIN_FILL: f64 = 1e-4;

/// Floor for the Wasserstein normaliser.
const MIN_NORM_STD: f64 = 0.001;

/// A two-sample test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatTest {
    KolmogorovSmirnov,
    ChiSquare,
    ZTest,
    Wasserstein,
    JensenShannon,
}

impl StatTest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::KolmogorovSmirnov => "ks",
            Self::ChiSquare => "chisquare",
            Self::ZTest => "z",
            Self::Wasserstein => "wasserstein",
            Self::JensenShannon => "jensenshannon",
        }
    }

    /// Whether the score is a p-value (drift when small) or a distance.
    pub fn is_p_value(&self) -> bool {
        matches!(self, Self::KolmogorovSmirnov | Self::ChiSquare | Self::ZTest)
    }

    pub fn default_threshold(&self) -> f64 {
        if self.is_p_value() { 0.05 } else { 0.1 }
    }

    pub fn detects_drift(&self, score: f64, threshold: f64) -> bool {
        if self.is_p_value() {
            score < threshold
        } else {
            score >= threshold
        }
    }
}

/// Test selection knobs.
#[derive(Debug, Clone, Copy)]
pub struct StatTestOptions {
    /// Overrides every test's default threshold.
    pub threshold: Option<f64>,
    /// Reference sizes above this switch from p-value tests to distances.
    pub small_sample_cutoff: usize,
}

impl Default for StatTestOptions {
    fn default() -> Self {
        Self {
            threshold: None,
            small_sample_cutoff: 1000,
        }
    }
}

/// Non-missing values of one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl ColumnValues {
    /// Collect the present values of `column`, dropping missing cells.
    pub fn from_frame(frame: &Frame, column: &str) -> Result<Self, MonitorError> {
        let col = frame
            .column(column)
            .ok_or_else(|| MonitorError::schema(format!("column '{column}' not found")))?;
        match &col.data {
            ColumnData::Float(values) => Ok(Self::Numeric(
                values.iter().flatten().copied().filter(|v| v.is_finite()).collect(),
            )),
            ColumnData::Text(values) => {
                Ok(Self::Categorical(values.iter().flatten().cloned().collect()))
            }
            ColumnData::Timestamp(_) => Err(MonitorError::report(format!(
                "timestamp column '{column}' cannot be tested for drift"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn labels(&self) -> Vec<String> {
        match self {
            Self::Numeric(v) => v.iter().map(|x| x.to_string()).collect(),
            Self::Categorical(v) => v.clone(),
        }
    }
}

/// Outcome of testing one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub test: StatTest,
    /// p-value or distance, depending on `test`.
    pub score: f64,
    pub threshold: f64,
    pub drifted: bool,
}

/// Test one column. `None` when either sample is empty.
pub fn column_drift(
    column: &str,
    reference: &ColumnValues,
    current: &ColumnValues,
    options: &StatTestOptions,
) -> Option<ColumnDrift> {
    if reference.is_empty() || current.is_empty() {
        return None;
    }
    let small = reference.len() <= options.small_sample_cutoff;

    let (test, score) = match (reference, current) {
        (ColumnValues::Numeric(r), ColumnValues::Numeric(c))
            if distinct_numbers(r, c) > MAX_DISCRETE_VALUES =>
        {
            if small {
                (StatTest::KolmogorovSmirnov, ks_p_value(r, c))
            } else {
                (StatTest::Wasserstein, wasserstein_normed(r, c))
            }
        }
        _ => {
            let r = category_counts(&reference.labels());
            let c = category_counts(&current.labels());
            let categories = r.keys().chain(c.keys()).collect::<BTreeSet<_>>().len();
            if !small {
                (StatTest::JensenShannon, jensen_shannon(&r, &c))
            } else if categories > 2 {
                (StatTest::ChiSquare, chi_square_p_value(&r, &c))
            } else {
                (StatTest::ZTest, z_test_p_value(&r, &c))
            }
        }
    };

    let threshold = options.threshold.unwrap_or_else(|| test.default_threshold());
    Some(ColumnDrift {
        column: column.to_string(),
        test,
        score,
        threshold,
        drifted: test.detects_drift(score, threshold),
    })
}

fn distinct_numbers(a: &[f64], b: &[f64]) -> usize {
    // + 0.0 folds -0.0 into 0.0
    a.iter()
        .chain(b)
        .map(|v| (v + 0.0).to_bits())
        .collect::<HashSet<_>>()
        .len()
}

fn category_counts(labels: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for label in labels {
        *counts.entry(label.clone()).or_insert(0) += 1;
    }
    counts
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Largest gap between the two empirical CDFs.
pub fn ks_statistic(reference: &[f64], current: &[f64]) -> f64 {
    let a = sorted(reference);
    let b = sorted(current);
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = if a[i].total_cmp(&b[j]) == Ordering::Greater { b[j] } else { a[i] };
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 - j as f64 / n2).abs());
    }
    d
}

/// Two-sample Kolmogorov–Smirnov p-value (asymptotic distribution).
pub fn ks_p_value(reference: &[f64], current: &[f64]) -> f64 {
    let d = ks_statistic(reference, current);
    let (n1, n2) = (reference.len() as f64, current.len() as f64);
    let en = (n1 * n2 / (n1 + n2)).sqrt();
    kolmogorov_q((en + 0.12 + 0.11 / en) * d)
}

/// Survival function of the Kolmogorov distribution.
pub fn kolmogorov_q(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut previous: f64 = 0.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = fac * (a2 * j * j).exp();
        sum += term;
        if term.abs() <= 0.001 * previous || term.abs() <= 1e-8 * sum {
            return sum.clamp(0.0, 1.0);
        }
        fac = -fac;
        previous = term.abs();
    }
    1.0
}

/// Chi-square goodness of fit of the current counts against reference
/// proportions, `k - 1` degrees of freedom over the union of categories.
pub fn chi_square_p_value(
    reference: &BTreeMap<String, usize>,
    current: &BTreeMap<String, usize>,
) -> f64 {
    let keys: BTreeSet<&String> = reference.keys().chain(current.keys()).collect();
    if keys.len() <= 1 {
        return 1.0;
    }
    let n_ref: usize = reference.values().sum();
    let n_cur: usize = current.values().sum();
    if n_ref == 0 || n_cur == 0 {
        return 1.0;
    }
    let scale = n_cur as f64 / n_ref as f64;

    let mut statistic = 0.0;
    for key in &keys {
        let observed = current.get(*key).copied().unwrap_or(0) as f64;
        let expected = reference.get(*key).copied().unwrap_or(0) as f64 * scale;
        if expected == 0.0 {
            if observed > 0.0 {
                return 0.0;
            }
            continue;
        }
        statistic += (observed - expected).powi(2) / expected;
    }
    let dof = (keys.len() - 1) as f64;
    gamma_q(dof / 2.0, statistic / 2.0)
}

/// Two-proportion z-test on the share of the first category (in label order).
pub fn z_test_p_value(
    reference: &BTreeMap<String, usize>,
    current: &BTreeMap<String, usize>,
) -> f64 {
    let Some(label) = reference.keys().chain(current.keys()).min() else {
        return 1.0;
    };
    let n1 = reference.values().sum::<usize>() as f64;
    let n2 = current.values().sum::<usize>() as f64;
    if n1 == 0.0 || n2 == 0.0 {
        return 1.0;
    }
    let c1 = reference.get(label).copied().unwrap_or(0) as f64;
    let c2 = current.get(label).copied().unwrap_or(0) as f64;
    let pooled = (c1 + c2) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 {
        return 1.0;
    }
    let z = (c1 / n1 - c2 / n2) / se;
    erfc(z.abs() / std::f64::consts::SQRT_2)
}

/// First Wasserstein distance between two empirical distributions.
pub fn wasserstein_distance(reference: &[f64], current: &[f64]) -> f64 {
    let u = sorted(reference);
    let v = sorted(current);
    let mut all: Vec<f64> = u.iter().chain(v.iter()).copied().collect();
    all.sort_by(f64::total_cmp);

    let (nu, nv) = (u.len() as f64, v.len() as f64);
    let (mut i, mut j) = (0, 0);
    let mut total = 0.0;
    for pair in all.windows(2) {
        let x = pair[0];
        while i < u.len() && u[i] <= x {
            i += 1;
        }
        while j < v.len() && v[j] <= x {
            j += 1;
        }
        total += (i as f64 / nu - j as f64 / nv).abs() * (pair[1] - pair[0]);
    }
    total
}

/// Wasserstein distance in units of the reference standard deviation.
pub fn wasserstein_normed(reference: &[f64], current: &[f64]) -> f64 {
    let norm = std_dev(reference).unwrap_or(0.0).max(MIN_NORM_STD);
    wasserstein_distance(reference, current) / norm
}

/// Jensen–Shannon distance (natural log) between category proportions.
pub fn jensen_shannon(
    reference: &BTreeMap<String, usize>,
    current: &BTreeMap<String, usize>,
) -> f64 {
    let keys: BTreeSet<&String> = reference.keys().chain(current.keys()).collect();
    let proportions = |counts: &BTreeMap<String, usize>| -> Vec<f64> {
        let n = counts.values().sum::<usize>().max(1) as f64;
        let raw: Vec<f64> = keys
            .iter()
            .map(|k| match counts.get(*k).copied().unwrap_or(0) {
                0 => EMPTY_BIN_FILL,
                c => c as f64 / n,
            })
            .collect();
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|p| p / total).collect()
    };
    let p = proportions(reference);
    let q = proportions(current);

    let mut divergence = 0.0;
    for (pi, qi) in p.iter().zip(&q) {
        let m = (pi + qi) / 2.0;
        divergence += 0.5 * pi * (pi / m).ln() + 0.5 * qi * (qi / m).ln();
    }
    divergence.max(0.0).sqrt()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// `q`-quantile with linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let pos = q.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(v[lo] + (v[hi] - v[lo]) * (pos - lo as f64))
}

const LANCZOS: [f64; 6] = [
    76.180_091_729_471_46,
    -86.505_320_329_416_77,
    24.014_098_240_830_91,
    -1.231_739_572_450_155,
    0.120_865_097_386_617_9e-2,
    -0.539_523_938_495_3e-5,
];

fn ln_gamma(x: f64) -> f64 {
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut y = x;
    let mut series = 1.000_000_000_190_015;
    for c in LANCZOS {
        y += 1.0;
        series += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * series / x).ln()
}

const GAMMA_ITERATIONS: usize = 500;
const GAMMA_EPS: f64 = 1e-14;
const GAMMA_FPMIN: f64 = 1e-300;

/// Regularised upper incomplete gamma `Q(a, x)`.
pub fn gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        return (1.0 - gamma_p_series(a, x)).clamp(0.0, 1.0);
    }
    // Lentz continued fraction
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / GAMMA_FPMIN;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=GAMMA_ITERATIONS {
        let i = i as f64;
        let an = -i * (i - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < GAMMA_FPMIN {
            d = GAMMA_FPMIN;
        }
        c = b + an / c;
        if c.abs() < GAMMA_FPMIN {
            c = GAMMA_FPMIN;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPS {
            break;
        }
    }
    ((-x + a * x.ln() - ln_gamma(a)).exp() * h).clamp(0.0, 1.0)
}

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut sum = 1.0 / a;
    let mut delta = sum;
    for _ in 0..GAMMA_ITERATIONS {
        ap += 1.0;
        delta *= x / ap;
        sum += delta;
        if delta.abs() < sum.abs() * GAMMA_EPS {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Complementary error function (Chebyshev fit, relative error < 1.2e-7).
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}
