// SPDX-License-Identifier: Apache-2.0

//! Statistical divergence detectors over count maps.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::executor::CountMap;
use crate::morph_error::{MorphError, Result};

/// Outcome of one detector comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergenceVerdict {
    pub test_name: String,
    pub statistic: f64,
    /// In `[0, 1]`, or `-1` when the detector itself failed.
    pub p_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DivergenceVerdict {
    pub fn failed(test_name: &str, error: &str) -> Self {
        DivergenceVerdict {
            test_name: test_name.to_string(),
            statistic: 0.0,
            p_value: -1.0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.p_value < 0.0
    }
}

/// Expands a count map into one bitstring per shot, in key order.
pub fn obtain_raw_samples(counts: &CountMap) -> Vec<String> {
    counts
        .iter()
        .flat_map(|(k, c)| std::iter::repeat(k.clone()).take(*c as usize))
        .collect()
}

fn bitstring_value(bits: &str) -> Result<u128> {
    if bits.len() > 128 {
        return Err(MorphError::Detector(format!(
            "bitstring of width {} does not fit in 128 bits",
            bits.len()
        )));
    }
    u128::from_str_radix(bits, 2)
        .map_err(|e| MorphError::Detector(format!("invalid bitstring {:?}: {}", bits, e)))
}

/// Same as [`obtain_raw_samples`] with each bitstring read as an integer.
pub fn obtain_raw_integer_samples(counts: &CountMap) -> Result<Vec<u128>> {
    let mut out = Vec::new();
    for (k, c) in counts {
        let v = bitstring_value(k)?;
        out.extend(std::iter::repeat(v).take(*c as usize));
    }
    Ok(out)
}

pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `(statistic, p_value)`.
    fn check(&self, result_a: &CountMap, result_b: &CountMap) -> Result<(f64, f64)>;

    /// Runs [`Detector::check`], folding a failure into the verdict.
    fn verdict(&self, result_a: &CountMap, result_b: &CountMap) -> DivergenceVerdict {
        match self.check(result_a, result_b) {
            Ok((statistic, p_value)) => DivergenceVerdict {
                test_name: self.name().to_string(),
                statistic,
                p_value,
                error: None,
            },
            Err(e) => DivergenceVerdict::failed(self.name(), &e.to_string()),
        }
    }
}

/// Two-sample Kolmogorov-Smirnov test on the integer value of each shot.
#[derive(Debug, Default, Clone, Copy)]
pub struct KsDetector;

/// Kolmogorov distribution tail `Q_KS(lambda)`.
fn kolmogorov_tail(lambda: f64) -> f64 {
    const EPS1: f64 = 1e-3;
    const EPS2: f64 = 1e-8;
    let a2 = -2.0 * lambda * lambda;
    let mut fac = 2.0;
    let mut sum = 0.0;
    let mut term_prev: f64 = 0.0;
    for j in 1..=100 {
        let jf = j as f64;
        let term = fac * (a2 * jf * jf).exp();
        sum += term;
        if term.abs() <= EPS1 * term_prev || term.abs() <= EPS2 * sum {
            return sum;
        }
        fac = -fac;
        term_prev = term.abs();
    }
    // Only reached for lambda near zero, where the tail is 1.
    1.0
}

fn sorted_counts(counts: &CountMap) -> Result<Vec<(u128, u64)>> {
    let mut out = counts
        .iter()
        .filter(|(_, c)| **c > 0)
        .map(|(k, c)| Ok((bitstring_value(k)?, *c)))
        .collect::<Result<Vec<_>>>()?;
    out.sort_unstable();
    Ok(out)
}

impl KsDetector {
    /// Largest distance between the two empirical CDFs.
    pub fn statistic(a: &[(u128, u64)], b: &[(u128, u64)]) -> f64 {
        let n1: u64 = a.iter().map(|(_, c)| c).sum();
        let n2: u64 = b.iter().map(|(_, c)| c).sum();
        let (mut i, mut j) = (0, 0);
        let (mut c1, mut c2) = (0u64, 0u64);
        let mut d: f64 = 0.0;
        while i < a.len() || j < b.len() {
            let next = match (a.get(i), b.get(j)) {
                (Some(x), Some(y)) => x.0.min(y.0),
                (Some(x), None) => x.0,
                (None, Some(y)) => y.0,
                (None, None) => break,
            };
            while i < a.len() && a[i].0 == next {
                c1 += a[i].1;
                i += 1;
            }
            while j < b.len() && b[j].0 == next {
                c2 += b[j].1;
                j += 1;
            }
            let f1 = c1 as f64 / n1 as f64;
            let f2 = c2 as f64 / n2 as f64;
            d = d.max((f1 - f2).abs());
        }
        d
    }
}

impl Detector for KsDetector {
    fn name(&self) -> &str {
        "ks"
    }

    fn check(&self, result_a: &CountMap, result_b: &CountMap) -> Result<(f64, f64)> {
        let a = sorted_counts(result_a)?;
        let b = sorted_counts(result_b)?;
        let n1: u64 = a.iter().map(|(_, c)| c).sum();
        let n2: u64 = b.iter().map(|(_, c)| c).sum();
        if n1 == 0 || n2 == 0 {
            return Err(MorphError::Detector(format!(
                "cannot compare empty samples ({} vs {} shots)",
                n1, n2
            )));
        }
        let d = Self::statistic(&a, &b);
        let (n1, n2) = (n1 as f64, n2 as f64);
        let en = (n1 * n2 / (n1 + n2)).sqrt();
        let p = kolmogorov_tail((en + 0.12 + 0.11 / en) * d).clamp(0.0, 1.0);
        debug!("ks: n1={} n2={} D={} p={}", n1, n2, d, p);
        Ok((d, p))
    }
}

pub fn detector_names() -> Vec<&'static str> {
    vec!["ks"]
}

pub fn build_detector(name: &str) -> Result<Box<dyn Detector>> {
    match name {
        "ks" => Ok(Box::new(KsDetector)),
        other => Err(MorphError::Config(format!(
            "unknown detector {:?}; expected one of {:?}",
            other,
            detector_names()
        ))),
    }
}
