use std::collections::HashMap;

use alloy::primitives::U256;
use indexmap::IndexMap;

/// Native balance as observed on a fork. Account-model chains populate only
/// `free`; runtime-module chains carry the full triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NativeBalance {
    pub free: U256,
    pub reserved: U256,
    pub frozen: U256,
}

impl NativeBalance {
    pub fn single(amount: U256) -> Self {
        Self {
            free: amount,
            ..Default::default()
        }
    }

    /// The total controlled balance: free + reserved. Frozen is a lock on
    /// free funds, not an addition to them.
    pub fn total(&self) -> U256 {
        self.free + self.reserved
    }
}

/// Balances observed for one address at one point in time. Fungible keys are
/// token contract addresses or decimal asset ids; insertion order is
/// preserved so reports list tokens the way they were tracked.
#[derive(Debug, Clone, Default)]
pub struct BalanceSnapshot {
    pub native: NativeBalance,
    pub fungibles: IndexMap<String, U256>,
}

/// Snapshots keyed by canonical address.
pub type SnapshotMap = HashMap<String, BalanceSnapshot>;

/// Merges newly captured snapshots into an existing map without overwriting
/// addresses that were already observed (the earlier observation is the
/// historical one).
pub fn merge_missing(into: &mut SnapshotMap, from: SnapshotMap) {
    for (address, snapshot) in from {
        into.entry(address).or_insert(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_free_plus_reserved() {
        let native = NativeBalance {
            free: U256::from(70u64),
            reserved: U256::from(30u64),
            frozen: U256::from(50u64),
        };
        assert_eq!(native.total(), U256::from(100u64));
    }

    #[test]
    fn merge_keeps_earlier_observation() {
        let mut map = SnapshotMap::new();
        map.insert(
            "alice".into(),
            BalanceSnapshot {
                native: NativeBalance::single(U256::from(1u64)),
                fungibles: IndexMap::new(),
            },
        );

        let mut incoming = SnapshotMap::new();
        incoming.insert(
            "alice".into(),
            BalanceSnapshot {
                native: NativeBalance::single(U256::from(999u64)),
                fungibles: IndexMap::new(),
            },
        );
        incoming.insert("bob".into(), BalanceSnapshot::default());

        merge_missing(&mut map, incoming);
        assert_eq!(map["alice"].native.free, U256::from(1u64));
        assert!(map.contains_key("bob"));
    }
}
