/// Per-bucket consumption from consecutive boundary values.
///
/// `consumption[i] = max(0, cumulative[i + 1] - cumulative[i])`. A decrease
/// means a meter reset or a bad sample and is reported as zero for that bucket
/// rather than failing the whole report.
pub fn deltas(cumulative: &[i64]) -> Vec<i64> {
    cumulative
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]).max(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differences_consecutive_boundaries() {
        assert_eq!(deltas(&[0, 1000, 1500, 1500]), vec![1000, 500, 0]);
    }

    #[test]
    fn decrease_is_clamped_to_zero() {
        let out = deltas(&[5000, 7000, 2000, 2500]);
        assert_eq!(out, vec![2000, 0, 500]);
        assert!(out.iter().all(|v| *v >= 0));
    }

    #[test]
    fn needs_two_boundaries_for_a_bucket() {
        assert!(deltas(&[]).is_empty());
        assert!(deltas(&[42]).is_empty());
    }

    #[test]
    fn monotonic_input_telescopes() {
        let cumulative = [100, 250, 250, 900, 1_200];
        let total: i64 = deltas(&cumulative).iter().sum();
        assert_eq!(total, 1_200 - 100);
    }
}
