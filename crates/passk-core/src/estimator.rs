//! Unbiased pass@k estimator.
//!
//! `pass@k(n, c, k) = 1 - C(n - c, k) / C(n, k)`, undefined when `k > n`.

pub const DEFAULT_PRECISION: u32 = 4;
/// Digits beyond this exceed f64 resolution for values in [0, 1].
pub const MAX_PRECISION: u32 = 15;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Exact binomial coefficient `C(x, y)`.
///
/// Returns `Some(0)` when `y > x` and `None` only if the exact value does not
/// fit in a `u128`.
pub fn binomial(x: u64, y: u64) -> Option<u128> {
    if y > x {
        return Some(0);
    }
    let y = y.min(x - y);

    // acc holds C(x - y + i, i) after step i; dividing out the gcd first keeps
    // the intermediate product no larger than the result.
    let mut acc: u128 = 1;
    for i in 1..=y {
        let numerator = (x - y + i) as u128;
        let i = i as u128;
        let g = gcd(acc, i);
        acc = (acc / g).checked_mul(numerator / (i / g))?;
    }
    Some(acc)
}

/// Probability that at least one of `k` draws without replacement from `n`
/// recorded trials (of which `c` passed) is a pass.
///
/// Returns `None` when `k > n`: there are not enough samples to draw from.
pub fn pass_at_k(n: u64, c: u64, k: u64) -> Option<f64> {
    debug_assert!(c <= n, "passing count {c} exceeds sample count {n}");
    if k > n {
        return None;
    }

    let failing = n.saturating_sub(c);
    if k > failing {
        return Some(1.0);
    }

    let value = match (binomial(failing, k), binomial(n, k)) {
        (Some(num), Some(den)) => 1.0 - num as f64 / den as f64,
        _ => {
            tracing::debug!(n, c, k, "binomial exceeds u128, using product form");
            1.0 - survival_product(n, failing, k)
        }
    };
    Some(value.clamp(0.0, 1.0))
}

/// `C(failing, k) / C(n, k)` as `prod_{i<k} (failing - i) / (n - i)`.
fn survival_product(n: u64, failing: u64, k: u64) -> f64 {
    (0..k).fold(1.0_f64, |acc, i| {
        acc * (failing - i) as f64 / (n - i) as f64
    })
}

/// Round for display. Not part of the estimator contract.
///
/// `digits` is capped at [`MAX_PRECISION`]; past that `10^digits` overflows
/// and the result would be NaN.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits.min(MAX_PRECISION) as i32);
    (value * factor).round() / factor
}
