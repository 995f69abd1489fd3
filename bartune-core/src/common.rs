use std::f64::consts::PI;

#[inline]
pub fn ratio_to_cents(r: f64) -> f64 {
    1200.0 * r.log2()
}

/// Compute median of a list (mean of the two middle values for even lengths).
pub fn median(xs: &mut [f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.sort_by(f64::total_cmp);
    let m = xs.len() / 2;
    if xs.len() % 2 == 1 {
        xs[m]
    } else {
        0.5 * (xs[m - 1] + xs[m])
    }
}

/// Quantile with linear interpolation between closest ranks; q in [0,1].
pub fn quantile(xs: &[f64], q: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let mut v = xs.to_vec();
    v.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (v.len() - 1) as f64;
    let i = pos.floor() as usize;
    let frac = pos - i as f64;
    if i + 1 < v.len() {
        v[i] + (v[i + 1] - v[i]) * frac
    } else {
        v[i]
    }
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

/// Population variance (divides by N).
pub fn variance(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64
}

/// Symmetric Hann window of length `n` (endpoints are zero).
pub fn hann(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

/// GCD for u32
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Largest prime factor of `n`; `None` for 1 (the empty factorisation).
pub fn largest_prime_factor(n: u32) -> Option<u32> {
    let mut x = n;
    let mut d = 2;
    let mut largest = None;
    while d * d <= x {
        while x % d == 0 {
            largest = Some(d);
            x /= d;
        }
        d += 1;
    }
    if x > 1 {
        largest = Some(x);
    }
    largest
}

/// Relative deviation of `hz` from the nearest positive integer multiple of `f0_hz`.
///
/// Returns the multiple and the deviation, or `None` when the nearest multiple is zero.
pub fn nearest_harmonic(hz: f64, f0_hz: f64) -> Option<(u32, f64)> {
    if f0_hz <= 0.0 {
        return None;
    }
    let k = (hz / f0_hz).round_ties_even();
    if k < 1.0 {
        return None;
    }
    let target = k * f0_hz;
    Some((k as u32, (hz - target).abs() / target.max(1e-9)))
}
