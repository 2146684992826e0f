// src/sampling.rs

//! Next-token sampling: temperature, top-k and top-p over a logits row.
//!
//! Works on host vectors in f64. The order is fixed: temperature, then
//! top-k, then top-p, then softmax and one categorical draw.

use log::{debug, trace};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("invalid sampling parameter: {0}")]
    InvalidParameter(String),

    #[error("invalid probability distribution: {0}")]
    InvalidDistribution(String),
}

pub type Result<T> = std::result::Result<T, SamplingError>;

// ═════════════════════════════════════════════════════════════════════════════
// Random source
// ═════════════════════════════════════════════════════════════════════════════

/// Random source injected into the sampler and the generation loop.
pub trait TokenRng {
    /// Uniform draw in [0, 1).
    fn next_unit(&mut self) -> f64;

    /// Uniform integer in [lo, hi). `hi` must be greater than `lo`.
    fn next_in_range(&mut self, lo: usize, hi: usize) -> usize {
        debug_assert!(hi > lo, "empty range [{lo}, {hi})");
        let span = (hi - lo) as f64;
        let offset = (self.next_unit() * span) as usize;
        lo + offset.min(hi - lo - 1)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        // Avoid the all-zero state.
        let s = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: s }
    }

    /// Seeded from the system clock.
    pub fn from_entropy() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::new(nanos)
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

impl TokenRng for XorShift64 {
    #[inline]
    fn next_unit(&mut self) -> f64 {
        // Top 53 bits -> [0,1)
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Softmax
// ═════════════════════════════════════════════════════════════════════════════

/// Max-subtracted softmax. A row of all `-inf` yields NaNs, which the
/// distribution check rejects.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

// ═════════════════════════════════════════════════════════════════════════════
// Temperature scaling
// ═════════════════════════════════════════════════════════════════════════════

pub fn check_temperature(temperature: f64) -> Result<()> {
    if !(temperature > 0.0 && temperature.is_finite()) {
        return Err(SamplingError::InvalidParameter(format!(
            "temperature must be a finite value > 0, got {temperature}"
        )));
    }
    Ok(())
}

/// Shifts by the largest finite logit, then divides by `temperature`.
///
/// The shift keeps tiny temperatures from overflowing to `+inf`; results
/// are finite or `-inf` and the softmax is unchanged.
pub fn apply_temperature(logits: &[f64], temperature: f64) -> Result<Vec<f64>> {
    check_temperature(temperature)?;
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    let shift = if max.is_finite() { max } else { 0.0 };
    trace!("Applying temperature scaling: {} (shift {})", temperature, shift);
    Ok(logits.iter().map(|&l| (l - shift) / temperature).collect())
}

// ═════════════════════════════════════════════════════════════════════════════
// Top-k filtering
// ═════════════════════════════════════════════════════════════════════════════

/// Indices sorted by descending value; ties keep the lower index first.
fn descending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Keeps exactly the `k` highest logits; `k == 0` or `k >= len` is a no-op.
pub fn top_k_filter(logits: &[f64], k: usize) -> Vec<f64> {
    let vocab = logits.len();
    if k == 0 || k >= vocab {
        return logits.to_vec();
    }
    trace!("Applying top-k filter: k={}", k);

    let mut out = vec![f64::NEG_INFINITY; vocab];
    for &idx in descending_order(logits).iter().take(k) {
        out[idx] = logits[idx];
    }
    out
}

// ═════════════════════════════════════════════════════════════════════════════
// Top-p (nucleus) filtering
// ═════════════════════════════════════════════════════════════════════════════

pub fn check_top_p(p: f64) -> Result<()> {
    if !(p > 0.0 && p <= 1.0) {
        return Err(SamplingError::InvalidParameter(format!(
            "top_p must be in (0, 1], got {p}"
        )));
    }
    Ok(())
}

/// Keeps the shortest descending-probability prefix whose mass reaches `p`
/// (the crossing token included, the top token always kept).
pub fn top_p_filter(logits: &[f64], p: f64) -> Result<Vec<f64>> {
    check_top_p(p)?;
    if p >= 1.0 {
        return Ok(logits.to_vec());
    }
    trace!("Applying top-p filter: p={}", p);

    let probs = softmax(logits);
    let mut out = vec![f64::NEG_INFINITY; logits.len()];
    let mut cum = 0.0f64;
    for idx in descending_order(&probs) {
        out[idx] = logits[idx];
        cum += probs[idx];
        if cum >= p {
            break;
        }
    }
    Ok(out)
}

// ═════════════════════════════════════════════════════════════════════════════
// Sampling
// ═════════════════════════════════════════════════════════════════════════════

/// Rejects NaN, negative or zero-mass distributions.
pub fn check_distribution(probs: &[f64]) -> Result<()> {
    if probs.is_empty() {
        return Err(SamplingError::InvalidDistribution(
            "empty distribution".to_string(),
        ));
    }
    if let Some(i) = probs.iter().position(|p| p.is_nan() || *p < 0.0) {
        return Err(SamplingError::InvalidDistribution(format!(
            "entry {i} is {}",
            probs[i]
        )));
    }
    let sum: f64 = probs.iter().sum();
    if !(sum > f64::EPSILON) || !sum.is_finite() {
        return Err(SamplingError::InvalidDistribution(format!(
            "probabilities sum to {sum}"
        )));
    }
    Ok(())
}

#[inline]
fn sample_categorical(probs: &[f64], rng: &mut impl TokenRng) -> usize {
    let r = rng.next_unit();
    let mut cum = 0.0f64;
    let mut last_positive = 0;

    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        last_positive = i;
        cum += p;
        if r < cum {
            return i;
        }
    }
    // Rounding left r above the cumulative mass.
    last_positive
}

/// Draws one token id from a logits row.
pub fn sample_next_token(
    logits: &[f32],
    temperature: f64,
    top_k: Option<usize>,
    top_p: Option<f64>,
    rng: &mut impl TokenRng,
) -> Result<usize> {
    let logits: Vec<f64> = logits.iter().map(|&l| l as f64).collect();

    let mut scaled = apply_temperature(&logits, temperature)?;
    if let Some(k) = top_k {
        scaled = top_k_filter(&scaled, k);
    }
    if let Some(p) = top_p {
        scaled = top_p_filter(&scaled, p)?;
    }

    let probs = softmax(&scaled);
    check_distribution(&probs)?;

    let id = sample_categorical(&probs, rng);
    debug!("Sampled token {} (p={:.4})", id, probs[id]);
    Ok(id)
}

// ═════════════════════════════════════════════════════════════════════════════
// Sampling parameters
// ═════════════════════════════════════════════════════════════════════════════

/// Validated sampling knobs carried by the generation loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: Option<usize>,
    pub top_p: Option<f64>,
}

impl SamplingParams {
    pub fn new(temperature: f64, top_k: Option<usize>, top_p: Option<f64>) -> Result<Self> {
        check_temperature(temperature)?;
        if let Some(p) = top_p {
            check_top_p(p)?;
        }
        Ok(Self {
            temperature,
            top_k,
            top_p,
        })
    }

    pub fn sample(&self, logits: &[f32], rng: &mut impl TokenRng) -> Result<usize> {
        sample_next_token(logits, self.temperature, self.top_k, self.top_p, rng)
    }
}
