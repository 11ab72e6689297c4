//! Stake-proportional split of a request budget into per-node capacities.

use tracing::{debug, warn};

/// Divide `total_requests` among nodes with at least `min_stake`, proportionally to stake.
///
/// Every eligible node gets at least one request. Nodes below the minimum are
/// left out of the result entirely. Integer division rounds down, so the sum
/// may be slightly under `total_requests` (or over it, when the floor of one
/// lifts many tiny stakes).
pub fn stake_weighted_capacities<Id: Clone>(
    stakes: &[(Id, u64)],
    min_stake: u64,
    total_requests: u64,
) -> Vec<(Id, u64)> {
    let eligible: Vec<&(Id, u64)> = stakes
        .iter()
        .filter(|(_, stake)| *stake >= min_stake)
        .collect();

    let total_stake: u128 = eligible.iter().map(|(_, stake)| u128::from(*stake)).sum();
    if eligible.is_empty() || total_stake == 0 {
        warn!(nodes = stakes.len(), min_stake, "no eligible nodes with sufficient stake");
        return Vec::new();
    }

    let allocation: Vec<(Id, u64)> = eligible
        .into_iter()
        .map(|(id, stake)| {
            let share = u128::from(total_requests) * u128::from(*stake) / total_stake;
            let share = u64::try_from(share).unwrap_or(u64::MAX);
            (id.clone(), share.max(1))
        })
        .collect();

    debug!(nodes = allocation.len(), total_requests, "computed stake-weighted capacities");
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_split() {
        let stakes = [("a", 1_000), ("b", 3_000), ("c", 4_000)];
        let caps = stake_weighted_capacities(&stakes, 1_000, 256);
        assert_eq!(caps, vec![("a", 32), ("b", 96), ("c", 128)]);
    }

    #[test]
    fn test_below_min_stake_excluded() {
        let stakes = [("whale", 10_000), ("minnow", 999)];
        let caps = stake_weighted_capacities(&stakes, 1_000, 256);
        assert_eq!(caps, vec![("whale", 256)]);
    }

    #[test]
    fn test_minimum_of_one() {
        let stakes = [("whale", 1_000_000), ("small", 1_000)];
        let caps = stake_weighted_capacities(&stakes, 1_000, 10);
        assert_eq!(caps, vec![("whale", 9), ("small", 1)]);
    }

    #[test]
    fn test_no_eligible_nodes() {
        let stakes = [("a", 10), ("b", 20)];
        assert!(stake_weighted_capacities(&stakes, 1_000, 256).is_empty());
        assert!(stake_weighted_capacities::<&str>(&[], 0, 256).is_empty());
    }

    #[test]
    fn test_zero_stake_with_zero_minimum() {
        let stakes = [("a", 0), ("b", 0)];
        assert!(stake_weighted_capacities(&stakes, 0, 256).is_empty());
    }
}
