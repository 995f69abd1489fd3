//! Stage 5b: Just-intonation candidate search
//!
//! Inputs: the ratio `f0 / f_ref` of a bar against the corpus reference.
//! For each prime limit, enumerate reduced fractions p/q with both terms drawn from the
//! limit-smooth integers up to `max_term`, score each with a weighted objective and keep
//! the best few overall.
//!
//! Notes (theory):
//! - Cents error: e = 1200 · log2((p/q) / ratio), signed, candidate relative to the ratio.
//! - Complexity: Tenney height in bits, log2(p·q).
//! - Score (lower is better): |e| + w_c · log2(p·q) + w_l · (limit − base_limit).
//!   Higher prime limits pay a flat penalty so the same fraction ranks best at its
//!   lowest listed limit.
//!
//! The top-ranked candidate becomes `ji_primary`, named when it is a common interval.

use serde::{Deserialize, Serialize};

use crate::common::{gcd, largest_prime_factor, ratio_to_cents};

/// Configuration for the JI search.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Prime limits searched; a fraction may appear once per limit.
    pub prime_limits: Vec<u32>,
    /// Largest numerator or denominator enumerated.
    pub max_term: u32,
    /// Weight on log2(p·q).
    pub complexity_weight: f64,
    /// Weight per prime-limit step above `base_limit`.
    pub limit_weight: f64,
    pub base_limit: u32,
    /// Number of ranked candidates kept.
    pub keep: usize,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            prime_limits: vec![5, 7, 11, 13],
            max_term: 256,
            complexity_weight: 6.0,
            limit_weight: 2.0,
            base_limit: 5,
            keep: 10,
        }
    }
}

/// A rational approximation of a bar's ratio to the reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JiCandidate {
    pub p: u32,
    pub q: u32,
    /// Signed, from the measured ratio to p/q.
    pub cents_error: f64,
    pub prime_limit: u32,
    /// log2(p·q).
    pub complexity_score: f64,
    /// "p/q"
    pub label: String,
    /// Composite ranking score (lower is better).
    #[serde(skip)]
    pub score: f64,
}

/// Best candidate plus a human-readable justification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JiPrimary {
    #[serde(flatten)]
    pub candidate: JiCandidate,
    pub why: String,
    /// Conventional interval name for common small ratios.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalResult {
    /// Ranked best-first.
    pub ji_candidates: Vec<JiCandidate>,
    pub ji_primary: Option<JiPrimary>,
}

/// Run the JI search for one ratio.
///
/// A non-positive or non-finite ratio has no approximation and yields an empty result.
pub fn run_interval_step(ratio: f64, cfg: &IntervalConfig) -> IntervalResult {
    if !(ratio.is_finite() && ratio > 0.0) {
        log::warn!("no JI search for ratio {ratio}");
        return IntervalResult::default();
    }

    let mut candidates = Vec::new();
    for &limit in &cfg.prime_limits {
        let terms = smooth_terms(limit, cfg.max_term);
        // Coprime pairs of smooth terms are exactly the reduced forms of all smooth pairs.
        for &p in &terms {
            for &q in &terms {
                if gcd(p, q) != 1 {
                    continue;
                }
                candidates.push(score_candidate(p, q, limit, ratio, cfg));
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.cents_error.abs().total_cmp(&b.cents_error.abs()))
            .then_with(|| a.complexity_score.total_cmp(&b.complexity_score))
            .then_with(|| a.p.cmp(&b.p))
            .then_with(|| a.q.cmp(&b.q))
    });
    candidates.truncate(cfg.keep);

    let ji_primary = candidates.first().map(|best| JiPrimary {
        why: format!(
            "closest weighted JI fit with {} at {:.3} cents error, complexity {:.3}, prime limit {}",
            best.label, best.cents_error, best.complexity_score, best.prime_limit
        ),
        interval_name: interval_name(best.p, best.q).map(str::to_string),
        candidate: best.clone(),
    });

    if let Some(primary) = &ji_primary {
        log::debug!(
            "ratio {:.6}: best {} ({:+.3} c, limit {})",
            ratio,
            primary.candidate.label,
            primary.candidate.cents_error,
            primary.candidate.prime_limit
        );
    }

    IntervalResult {
        ji_candidates: candidates,
        ji_primary,
    }
}

fn score_candidate(p: u32, q: u32, limit: u32, ratio: f64, cfg: &IntervalConfig) -> JiCandidate {
    let cents_error = ratio_to_cents((p as f64 / q as f64) / ratio);
    let complexity_score = ((p as u64 * q as u64) as f64).log2();
    let limit_penalty = limit.saturating_sub(cfg.base_limit) as f64;
    JiCandidate {
        p,
        q,
        cents_error,
        prime_limit: limit,
        complexity_score,
        label: format!("{p}/{q}"),
        score: cents_error.abs()
            + cfg.complexity_weight * complexity_score
            + cfg.limit_weight * limit_penalty,
    }
}

/// Integers in `1..=max_term` whose prime factors are all ≤ `limit`, ascending.
fn smooth_terms(limit: u32, max_term: u32) -> Vec<u32> {
    (1..=max_term)
        .filter(|&n| largest_prime_factor(n).is_none_or(|f| f <= limit))
        .collect()
}

/// Friendly name for common small-ratio intervals.
fn interval_name(p: u32, q: u32) -> Option<&'static str> {
    const MAP: &[(u32, u32, &str)] = &[
        (1, 1, "unison"),
        (16, 15, "minor second"),
        (9, 8, "major second"),
        (8, 7, "septimal whole tone"),
        (7, 6, "septimal minor third"),
        (6, 5, "minor third"),
        (5, 4, "major third"),
        (9, 7, "septimal major third"),
        (4, 3, "perfect fourth"),
        (11, 8, "undecimal tritone"),
        (7, 5, "septimal tritone"),
        (45, 32, "augmented fourth"),
        (64, 45, "diminished fifth"),
        (10, 7, "septimal tritone"),
        (3, 2, "perfect fifth"),
        (8, 5, "minor sixth"),
        (13, 8, "tridecimal neutral sixth"),
        (5, 3, "major sixth"),
        (7, 4, "harmonic seventh"),
        (16, 9, "small minor seventh"),
        (9, 5, "large minor seventh"),
        (15, 8, "major seventh"),
        (2, 1, "octave"),
    ];
    MAP.iter()
        .find(|(pn, qn, _)| *pn == p && *qn == q)
        .map(|(_, _, name)| *name)
}
