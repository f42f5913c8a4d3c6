// ============================================
// File: crates/gatesplice-proxy/src/dispatch/registry.rs
// ============================================
//! # Hook Registry
//!
//! ## Creation Reason
//! Stores hooks per opcode in deterministic firing order and produces the
//! merged global/specific sequence the dispatcher walks for each message.
//!
//! ## Storage Layout
//! ```text
//! HookKey::Any      ──► [ group(order=-5) group(order=0) group(order=10) ]
//! HookKey::Code(c)  ──► [ group(order=0)  group(order=7) ]
//! HookKey::Unknown  ──► hooks for names the codec could not resolve
//!                       (retained for cleanup, never fired)
//! ```
//! Groups are kept sorted ascending by `order` via binary search; hooks
//! with equal order share a group in registration order.
//!
//! ## Merge Algorithm
//! For a message with opcode `c`, walk the `Any` and `Code(c)` group lists
//! front to front, always yielding the group with the lower `order`;
//! globals win ties. Within a group, registration order.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Removal is by `Arc` pointer identity, never structural equality
//! - Empty groups and empty keys are pruned so "no hooks" and "no entry"
//!   stay indistinguishable
//!
//! ## Last Modified
//! v0.1.0 - Initial registry

use std::collections::HashMap;
use std::sync::Arc;

use gatesplice_common::Opcode;

use crate::dispatch::hooks::Hook;

// ============================================
// HookKey
// ============================================

/// Registry key: a concrete opcode, the wildcard, or the unresolved-name
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKey {
    /// The `*` wildcard: fires for every opcode.
    Any,
    /// Sentinel for names the codec did not recognize; retained but never
    /// fired.
    Unknown,
    /// A concrete opcode.
    Code(u16),
}

// ============================================
// HookGroup
// ============================================

/// Hooks sharing one `order` value, in registration order.
#[derive(Debug, Clone)]
pub struct HookGroup {
    /// The shared chain position.
    pub order: i32,
    /// Members, oldest registration first.
    pub hooks: Vec<Arc<Hook>>,
}

// ============================================
// HookRegistry
// ============================================

/// Ordered, per-opcode hook storage.
#[derive(Debug, Default)]
pub struct HookRegistry {
    map: HashMap<HookKey, Vec<HookGroup>>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a hook under its key at the position its `order` dictates.
    pub fn add(&mut self, hook: Arc<Hook>) {
        let groups = self.map.entry(hook.key).or_default();
        match groups.binary_search_by_key(&hook.order, |g| g.order) {
            Ok(index) => groups[index].hooks.push(hook),
            Err(index) => groups.insert(
                index,
                HookGroup {
                    order: hook.order,
                    hooks: vec![hook],
                },
            ),
        }
    }

    /// Removes a hook by pointer identity. Idempotent.
    ///
    /// # Returns
    /// `true` if the hook was present.
    pub fn remove(&mut self, hook: &Arc<Hook>) -> bool {
        let key = hook.key;
        let Some(groups) = self.map.get_mut(&key) else {
            return false;
        };
        let Ok(index) = groups.binary_search_by_key(&hook.order, |g| g.order) else {
            return false;
        };

        let group = &mut groups[index];
        let before = group.hooks.len();
        group.hooks.retain(|h| !Arc::ptr_eq(h, hook));
        let removed = group.hooks.len() != before;

        if group.hooks.is_empty() {
            groups.remove(index);
        }
        if groups.is_empty() {
            self.map.remove(&key);
        }
        removed
    }

    /// Removes every hook owned by `module`, across all keys.
    ///
    /// # Returns
    /// How many hooks were dropped.
    pub fn remove_module(&mut self, module: &str) -> usize {
        let mut removed = 0;
        self.map.retain(|_, groups| {
            groups.retain_mut(|group| {
                let before = group.hooks.len();
                group
                    .hooks
                    .retain(|h| h.module.as_deref() != Some(module));
                removed += before - group.hooks.len();
                !group.hooks.is_empty()
            });
            !groups.is_empty()
        });
        removed
    }

    /// Drops every hook.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Total number of registered hooks, sentinel included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map
            .values()
            .flat_map(|groups| groups.iter())
            .map(|g| g.hooks.len())
            .sum()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns `true` if a message with `code` would meet any hook.
    #[must_use]
    pub fn has_hooks_for(&self, code: Opcode) -> bool {
        self.map.contains_key(&HookKey::Any)
            || self.map.contains_key(&HookKey::Code(code.value()))
    }

    /// The group list stored under `key`, for inspection.
    #[must_use]
    pub fn groups(&self, key: HookKey) -> &[HookGroup] {
        self.map.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Produces the total firing order for a message with opcode `code`:
    /// non-decreasing `order`, globals before specifics at equal `order`,
    /// registration order within a group. Hooks under `Unknown` never
    /// appear.
    #[must_use]
    pub fn merged(&self, code: Opcode) -> Vec<Arc<Hook>> {
        let globals = self.groups(HookKey::Any);
        let specific = self.groups(HookKey::Code(code.value()));

        let mut out = Vec::new();
        let (mut gi, mut si) = (0, 0);

        while gi < globals.len() || si < specific.len() {
            let take_global = match (globals.get(gi), specific.get(si)) {
                (Some(g), Some(s)) => g.order <= s.order,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if take_global {
                out.extend(globals[gi].hooks.iter().cloned());
                gi += 1;
            } else {
                out.extend(specific[si].hooks.iter().cloned());
                si += 1;
            }
        }
        out
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::hooks::{HookCallback, HookFilter, RawVerdict};
    use gatesplice_core::protocol::DefVersion;

    fn hook(key: HookKey, name: &str, order: i32, module: Option<&str>) -> Arc<Hook> {
        Arc::new(Hook {
            key,
            name: name.to_string(),
            filter: HookFilter::default(),
            order,
            definition: DefVersion::Raw,
            module: module.map(String::from),
            callback: HookCallback::Raw(Box::new(|_ctx, _data| Ok(RawVerdict::Pass))),
        })
    }

    fn names(hooks: &[Arc<Hook>]) -> Vec<&str> {
        hooks.iter().map(|h| h.name.as_str()).collect()
    }

    #[test]
    fn test_groups_stay_sorted() {
        let mut registry = HookRegistry::new();
        let key = HookKey::Code(5);
        registry.add(hook(key, "c", 10, None));
        registry.add(hook(key, "a", -3, None));
        registry.add(hook(key, "b", 0, None));

        let orders: Vec<i32> = registry.groups(key).iter().map(|g| g.order).collect();
        assert_eq!(orders, vec![-3, 0, 10]);
    }

    #[test]
    fn test_equal_order_shares_group_in_registration_order() {
        let mut registry = HookRegistry::new();
        let key = HookKey::Code(5);
        registry.add(hook(key, "first", 0, None));
        registry.add(hook(key, "second", 0, None));

        let groups = registry.groups(key);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0].hooks), vec!["first", "second"]);
    }

    #[test]
    fn test_merge_order() {
        // G10, C5, G5, C10 registered in that order must fire as
        // G5, C5, G10, C10.
        let mut registry = HookRegistry::new();
        registry.add(hook(HookKey::Any, "G10", 10, None));
        registry.add(hook(HookKey::Code(7), "C5", 5, None));
        registry.add(hook(HookKey::Any, "G5", 5, None));
        registry.add(hook(HookKey::Code(7), "C10", 10, None));

        let merged = registry.merged(Opcode::new(7));
        assert_eq!(names(&merged), vec!["G5", "C5", "G10", "C10"]);
    }

    #[test]
    fn test_merge_is_nondecreasing_with_global_tiebreak() {
        let mut registry = HookRegistry::new();
        for (name, order) in [("g1", 3), ("g2", 3), ("g3", 8)] {
            registry.add(hook(HookKey::Any, name, order, None));
        }
        for (name, order) in [("c1", 1), ("c2", 3), ("c3", 9)] {
            registry.add(hook(HookKey::Code(2), name, order, None));
        }

        let merged = registry.merged(Opcode::new(2));
        assert_eq!(names(&merged), vec!["c1", "g1", "g2", "c2", "g3", "c3"]);

        let orders: Vec<i32> = merged.iter().map(|h| h.order).collect();
        assert!(orders.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_merged_ignores_other_codes_and_unknown() {
        let mut registry = HookRegistry::new();
        registry.add(hook(HookKey::Code(1), "one", 0, None));
        registry.add(hook(HookKey::Unknown, "lost", 0, None));

        assert!(registry.merged(Opcode::new(2)).is_empty());
        assert_eq!(names(&registry.merged(Opcode::new(1))), vec!["one"]);
    }

    #[test]
    fn test_remove_by_identity() {
        let mut registry = HookRegistry::new();
        let key = HookKey::Code(5);
        let target = hook(key, "x", 0, None);
        let twin = hook(key, "x", 0, None); // structurally equal, distinct identity

        registry.add(target.clone());
        registry.add(twin.clone());
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(&target));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.groups(key)[0].hooks[0], &twin));

        // Idempotent.
        assert!(!registry.remove(&target));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_prunes_empty_entries() {
        let mut registry = HookRegistry::new();
        let key = HookKey::Code(5);
        let h = hook(key, "x", 0, None);
        registry.add(h.clone());
        registry.remove(&h);

        assert!(registry.is_empty());
        assert!(!registry.has_hooks_for(Opcode::new(5)));
    }

    #[test]
    fn test_remove_module() {
        let mut registry = HookRegistry::new();
        registry.add(hook(HookKey::Any, "a", 0, Some("mod-a")));
        registry.add(hook(HookKey::Code(1), "b", 0, Some("mod-a")));
        registry.add(hook(HookKey::Code(1), "c", 0, Some("mod-b")));
        registry.add(hook(HookKey::Unknown, "d", 0, Some("mod-a")));
        registry.add(hook(HookKey::Code(2), "e", 0, None));

        assert_eq!(registry.remove_module("mod-a"), 3);
        assert_eq!(registry.len(), 2);
        assert_eq!(names(&registry.merged(Opcode::new(1))), vec!["c"]);
        assert!(registry.groups(HookKey::Unknown).is_empty());
    }

    #[test]
    fn test_has_hooks_for() {
        let mut registry = HookRegistry::new();
        assert!(!registry.has_hooks_for(Opcode::new(1)));

        registry.add(hook(HookKey::Code(1), "a", 0, None));
        assert!(registry.has_hooks_for(Opcode::new(1)));
        assert!(!registry.has_hooks_for(Opcode::new(2)));

        registry.add(hook(HookKey::Any, "g", 0, None));
        assert!(registry.has_hooks_for(Opcode::new(2)));
    }
}
