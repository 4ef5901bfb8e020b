//! Matching test case slots to available adapters
//!
//! Allocation is a small constraint-satisfaction search: each slot is tried
//! against each remaining adapter that satisfies its capability, recursing on
//! the rest and backtracking on dead ends. The first complete assignment in
//! iteration order wins, so results are deterministic for a given pool order.

use crate::adapter::Adapter;
use trafficlight_common::CapabilityType;

/// One named role of a test case and the capability it requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSlot {
    pub role: String,
    pub capability: CapabilityType,
}

impl ClientSlot {
    pub fn new(role: impl Into<String>, capability: CapabilityType) -> Self {
        Self {
            role: role.into(),
            capability,
        }
    }
}

/// A role assigned to an adapter handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub role: String,
    pub adapter: String,
}

/// Assign every slot a distinct adapter, or `None` if no assignment exists.
///
/// The returned allocations follow slot order. `available` is never mutated.
pub fn allocate(slots: &[ClientSlot], available: &[&Adapter]) -> Option<Vec<Allocation>> {
    let mut used = vec![false; available.len()];
    let mut chosen = Vec::with_capacity(slots.len());
    if search(slots, available, &mut used, &mut chosen) {
        Some(
            slots
                .iter()
                .zip(chosen)
                .map(|(slot, index)| Allocation {
                    role: slot.role.clone(),
                    adapter: available[index].handle().to_string(),
                })
                .collect(),
        )
    } else {
        None
    }
}

fn search(slots: &[ClientSlot], available: &[&Adapter], used: &mut [bool], chosen: &mut Vec<usize>) -> bool {
    let Some((slot, rest)) = slots.split_first() else {
        return true;
    };

    for (index, adapter) in available.iter().enumerate() {
        if used[index] || !adapter.satisfies(slot.capability) {
            continue;
        }
        used[index] = true;
        chosen.push(index);
        if search(rest, available, used, chosen) {
            return true;
        }
        chosen.pop();
        used[index] = false;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trafficlight_common::CapabilityDescriptor;

    fn adapter(handle: &str, ty: &str) -> Adapter {
        let mut descriptor = CapabilityDescriptor::new();
        descriptor.insert("type".into(), json!(ty));
        Adapter::new(handle, descriptor)
    }

    fn pairs(allocations: &[Allocation]) -> Vec<(&str, &str)> {
        allocations
            .iter()
            .map(|a| (a.role.as_str(), a.adapter.as_str()))
            .collect()
    }

    const A: CapabilityType = CapabilityType::ElementWeb;
    const B: CapabilityType = CapabilityType::ElementAndroid;

    #[test]
    fn test_insufficient_adapters_of_type() {
        let pool = [adapter("a1", "element-web"), adapter("a2", "element-android")];
        let available: Vec<&Adapter> = pool.iter().collect();
        let slots = [ClientSlot::new("alice", A), ClientSlot::new("bob", A)];

        assert!(allocate(&slots, &available).is_none());
        assert_eq!(available.len(), 2);
        assert_eq!(available[0].handle(), "a1");
        assert_eq!(available[1].handle(), "a2");
    }

    #[test]
    fn test_full_mapping_uses_both() {
        let pool = [adapter("a1", "element-web"), adapter("a2", "element-web")];
        let available: Vec<&Adapter> = pool.iter().collect();
        let slots = [ClientSlot::new("alice", A), ClientSlot::new("bob", A)];

        let allocations = allocate(&slots, &available).unwrap();
        assert_eq!(pairs(&allocations), vec![("alice", "a1"), ("bob", "a2")]);
    }

    #[test]
    fn test_every_role_gets_a_distinct_matching_adapter() {
        let pool = [
            adapter("p1", "network-proxy"),
            adapter("w1", "element-web"),
            adapter("d1", "element-android"),
            adapter("w2", "element-web"),
        ];
        let available: Vec<&Adapter> = pool.iter().collect();
        let slots = [
            ClientSlot::new("alice", A),
            ClientSlot::new("bob", B),
            ClientSlot::new("carol", A),
            ClientSlot::new("proxy", CapabilityType::NetworkProxy),
        ];

        let allocations = allocate(&slots, &available).unwrap();
        assert_eq!(allocations.len(), 4);
        let mut handles: Vec<&str> = allocations.iter().map(|a| a.adapter.as_str()).collect();
        handles.sort_unstable();
        handles.dedup();
        assert_eq!(handles.len(), 4);
        for (slot, allocation) in slots.iter().zip(&allocations) {
            let chosen = pool.iter().find(|a| a.handle() == allocation.adapter).unwrap();
            assert!(chosen.satisfies(slot.capability));
        }
    }

    #[test]
    fn test_deterministic_first_found() {
        let pool = [
            adapter("a1", "element-web"),
            adapter("a2", "element-web"),
            adapter("a3", "element-web"),
        ];
        let available: Vec<&Adapter> = pool.iter().collect();
        let slots = [ClientSlot::new("alice", A)];

        for _ in 0..3 {
            let allocations = allocate(&slots, &available).unwrap();
            assert_eq!(pairs(&allocations), vec![("alice", "a1")]);
        }
    }

    #[test]
    fn test_no_slots_is_trivially_satisfied() {
        assert_eq!(allocate(&[], &[]), Some(vec![]));
    }
}
