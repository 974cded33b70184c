//! Reporting-only fairness diagnostics for a reward distribution.

/// Gini coefficient of a set of non-negative shares, clamped to [0, 1]
///
/// ```text
/// G = 2·Σ(i·r_i) / (n·Σr) − (n + 1) / n      r ascending, i = 1..n
/// ```
pub fn gini(shares: &[f64]) -> f64 {
    let n = shares.len();
    if n == 0 {
        return 0.0;
    }

    let mut sorted: Vec<f64> = shares.iter().map(|s| s.max(0.0)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let total: f64 = sorted.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, r)| (i + 1) as f64 * r)
        .sum();

    let n = n as f64;
    (2.0 * weighted / (n * total) - (n + 1.0) / n).clamp(0.0, 1.0)
}

/// Share of the total held by the `top` largest entries
pub fn top_concentration(shares: &[f64], top: usize) -> f64 {
    let total: f64 = shares.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let mut sorted = shares.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let head: f64 = sorted.iter().take(top).sum();

    (head / total).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_shares_have_zero_gini() {
        assert_eq!(gini(&[5.0; 20]), 0.0);
        assert_eq!(gini(&[42.0]), 0.0);
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_single_holder_approaches_one() {
        let mut shares = vec![0.0; 999];
        shares.push(1.0);
        let g = gini(&shares);
        assert!((g - 0.999).abs() < 1e-9);
    }

    #[test]
    fn test_known_value() {
        // r = [1, 2, 3]: 2·(1 + 4 + 9)/(3·6) − 4/3 = 28/18 − 24/18
        let g = gini(&[3.0, 1.0, 2.0]);
        assert!((g - 4.0 / 18.0).abs() < 1e-12);
    }

    #[test]
    fn test_top_concentration() {
        let shares: Vec<f64> = (1..=20).map(|i| i as f64).collect();
        let top10: f64 = (11..=20).sum::<i32>() as f64;
        assert!((top_concentration(&shares, 10) - top10 / 210.0).abs() < 1e-12);
        assert_eq!(top_concentration(&[1.0, 1.0], 10), 1.0);
        assert_eq!(top_concentration(&[], 10), 0.0);
    }
}
