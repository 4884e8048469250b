//! Zone registry: per-zone delivery state and membership diffing

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Zone identifier
pub type ZoneId = u32;

/// Server identifier within a zone
pub type ServerId = u32;

/// Membership input for one zone: its candidate endpoints in server order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDescriptor {
    /// Zone identifier
    pub zone_id: ZoneId,
    /// server_id -> address, tried in ascending order
    pub endpoints: BTreeMap<ServerId, String>,
}

impl ZoneDescriptor {
    /// Create a descriptor from (server_id, address) pairs
    pub fn new(zone_id: ZoneId, endpoints: impl IntoIterator<Item = (ServerId, String)>) -> Self {
        Self {
            zone_id,
            endpoints: endpoints.into_iter().collect(),
        }
    }
}

/// Per-zone delivery state.
///
/// `next` is the index of the next record this zone is expected to
/// receive. Invariant: `next <= last_index + 1`. Mutated only while
/// holding the registry lock.
#[derive(Debug, Clone)]
pub struct ZoneState {
    /// Zone identifier
    pub zone_id: ZoneId,
    /// server_id -> address
    pub endpoints: BTreeMap<ServerId, String>,
    /// Next index to deliver to this zone
    pub next: u64,
}

impl ZoneState {
    /// Create zone state with the delivery cursor at `next`
    pub fn new(descriptor: ZoneDescriptor, next: u64) -> Self {
        Self {
            zone_id: descriptor.zone_id,
            endpoints: descriptor.endpoints,
            next,
        }
    }
}

/// Process-wide shared replication state, guarded by one exclusion lock
#[derive(Debug, Default)]
pub struct FederationState {
    /// Index of the most recently committed record
    pub last_index: u64,
    /// Highest purge floor handed to the store; no zone cursor may be
    /// rewound to it or below
    pub purged_through: u64,
    /// zone_id -> delivery state
    pub zones: HashMap<ZoneId, ZoneState>,
}

/// Explicit start/stop plan produced by a membership change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPlan {
    /// Zones to create state and a delivery worker for
    pub start: Vec<ZoneId>,
    /// Zones whose worker must be stopped and state dropped
    pub stop: Vec<ZoneId>,
}

/// Diff the current zone set against the desired membership.
///
/// Output vectors are sorted so that a given membership change always
/// produces the same plan.
pub fn membership_plan(
    current: &HashMap<ZoneId, ZoneState>,
    desired: &[ZoneDescriptor],
) -> MembershipPlan {
    let mut start: Vec<ZoneId> = desired
        .iter()
        .filter(|d| !current.contains_key(&d.zone_id))
        .map(|d| d.zone_id)
        .collect();
    start.sort_unstable();
    start.dedup();

    let mut stop: Vec<ZoneId> = current
        .keys()
        .filter(|id| !desired.iter().any(|d| d.zone_id == **id))
        .copied()
        .collect();
    stop.sort_unstable();

    MembershipPlan { start, stop }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(id: ZoneId) -> ZoneDescriptor {
        ZoneDescriptor::new(id, [(0, format!("zone-{id}:2633"))])
    }

    fn current(ids: &[ZoneId]) -> HashMap<ZoneId, ZoneState> {
        ids.iter()
            .map(|id| (*id, ZoneState::new(zone(*id), 1)))
            .collect()
    }

    #[test]
    fn test_plan_from_empty() {
        let plan = membership_plan(&HashMap::new(), &[zone(3), zone(1)]);
        assert_eq!(
            plan,
            MembershipPlan {
                start: vec![1, 3],
                stop: vec![],
            }
        );
    }

    #[test]
    fn test_plan_to_empty() {
        let plan = membership_plan(&current(&[2, 1]), &[]);
        assert_eq!(
            plan,
            MembershipPlan {
                start: vec![],
                stop: vec![1, 2],
            }
        );
    }

    #[test]
    fn test_plan_mixed_change() {
        // zones {1, 2} -> {2, 3}: start 3, stop 1, leave 2 running
        let plan = membership_plan(&current(&[1, 2]), &[zone(2), zone(3)]);
        assert_eq!(
            plan,
            MembershipPlan {
                start: vec![3],
                stop: vec![1],
            }
        );
    }

    #[test]
    fn test_plan_no_change() {
        let plan = membership_plan(&current(&[1, 2]), &[zone(1), zone(2)]);
        assert_eq!(plan, MembershipPlan::default());
    }

    #[test]
    fn test_endpoints_ordered_by_server_id() {
        let descriptor = ZoneDescriptor::new(
            7,
            [
                (2, "c:2633".to_string()),
                (0, "a:2633".to_string()),
                (1, "b:2633".to_string()),
            ],
        );
        let addrs: Vec<&str> = descriptor.endpoints.values().map(String::as_str).collect();
        assert_eq!(addrs, ["a:2633", "b:2633", "c:2633"]);
    }
}
