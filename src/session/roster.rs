//! Session Roster
//!
//! Single source of truth for "who is in the session". The same structure
//! backs both sides of the wire: the host mutates it directly from joins
//! and leaves, clients rebuild it from `LOBBY_STATE` snapshots. Slots are
//! stable: removing a participant leaves a hole that the next join fills.

use std::collections::HashMap;

use tracing::warn;

use crate::MAX_PLAYERS;

/// One populated roster slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Unique display name, fixed for the participant's lifetime.
    pub nickname: String,
    /// Chosen loadout id; `None` until the participant picks one.
    pub loadout: Option<String>,
    /// Last measured round-trip latency, milliseconds.
    pub latency_ms: Option<u32>,
}

impl RosterEntry {
    fn new(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            loadout: None,
            latency_ms: None,
        }
    }
}

/// Ordered, capacity-bounded participant list.
#[derive(Debug, Clone)]
pub struct SessionRoster {
    slots: Vec<Option<RosterEntry>>,
    /// Host nickname pinned to slot 0; set only on the hosting side.
    host: Option<String>,
}

impl SessionRoster {
    /// Empty roster with the given slot count.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            host: None,
        }
    }

    /// Pin `nickname` as the host: occupies slot 0 and is never evicted
    /// by a snapshot.
    pub fn set_host(&mut self, nickname: &str) {
        self.remove(nickname);
        self.host = Some(nickname.to_string());
        self.slots[0] = Some(RosterEntry::new(nickname));
    }

    /// Occupy the first empty slot with `nickname`. Rejects duplicates,
    /// empty names, and a full roster.
    pub fn try_add(&mut self, nickname: &str) -> bool {
        if nickname.is_empty() || self.contains(nickname) {
            return false;
        }
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(RosterEntry::new(nickname));
                true
            }
            None => false,
        }
    }

    /// Clear the slot holding `nickname`, if any.
    pub fn remove(&mut self, nickname: &str) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|e| e.nickname == nickname) {
                *slot = None;
                return;
            }
        }
    }

    /// Idempotent full-replace from an ordered snapshot.
    ///
    /// Slot assignment follows the snapshot's own order, but loadout and
    /// latency survive by nickname key for names that persist. A pinned
    /// host always keeps slot 0 regardless of what the snapshot says.
    pub fn apply_snapshot(&mut self, ordered: &[String]) {
        let mut saved: HashMap<String, RosterEntry> = self
            .slots
            .iter_mut()
            .filter_map(|slot| slot.take())
            .map(|entry| (entry.nickname.clone(), entry))
            .collect();

        let mut placed: Vec<RosterEntry> = Vec::with_capacity(self.slots.len());
        if let Some(host) = self.host.clone() {
            placed.push(
                saved
                    .remove(host.as_str())
                    .unwrap_or_else(|| RosterEntry::new(&host)),
            );
        }

        for nickname in ordered {
            if placed.iter().any(|entry| &entry.nickname == nickname) {
                continue;
            }
            if placed.len() >= self.slots.len() {
                warn!(nickname = %nickname, "roster snapshot exceeds capacity; dropping tail");
                break;
            }
            placed.push(
                saved
                    .remove(nickname.as_str())
                    .unwrap_or_else(|| RosterEntry::new(nickname)),
            );
        }

        for (slot, entry) in self.slots.iter_mut().zip(
            placed
                .into_iter()
                .map(Some)
                .chain(std::iter::repeat_with(|| None)),
        ) {
            *slot = entry;
        }
    }

    /// Record a loadout choice for an existing entry; no-op otherwise.
    pub fn set_loadout(&mut self, nickname: &str, loadout: &str) {
        if let Some(entry) = self.get_mut(nickname) {
            entry.loadout = Some(loadout.to_string());
        }
    }

    /// Record a latency measurement for an existing entry; no-op otherwise.
    pub fn set_latency(&mut self, nickname: &str, latency_ms: u32) {
        if let Some(entry) = self.get_mut(nickname) {
            entry.latency_ms = Some(latency_ms);
        }
    }

    /// Drop loadout and latency on every entry, keeping membership.
    pub fn clear_session_fields(&mut self) {
        for entry in self.slots.iter_mut().flatten() {
            entry.loadout = None;
            entry.latency_ms = None;
        }
    }

    /// Empty every slot and forget the host pin.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.host = None;
    }

    /// Whether `nickname` occupies a slot.
    pub fn contains(&self, nickname: &str) -> bool {
        self.get(nickname).is_some()
    }

    /// Entry for `nickname`, if present.
    pub fn get(&self, nickname: &str) -> Option<&RosterEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.nickname == nickname)
    }

    fn get_mut(&mut self, nickname: &str) -> Option<&mut RosterEntry> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.nickname == nickname)
    }

    /// Entry at a slot index, if populated.
    pub fn entry_at(&self, slot: usize) -> Option<&RosterEntry> {
        self.slots.get(slot).and_then(|s| s.as_ref())
    }

    /// Populated slot count.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot is populated.
    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    /// Slot count, populated or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Populated nicknames in slot order, as carried by `LOBBY_STATE`.
    pub fn snapshot(&self) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| entry.nickname.clone())
            .collect()
    }

    /// Display line for one slot: `Player1: Alice, 23 ms`.
    pub fn slot_line(&self, slot: usize) -> String {
        match self.entry_at(slot) {
            Some(entry) => match entry.latency_ms {
                Some(ms) => format!("Player{}: {}, {} ms", slot + 1, entry.nickname, ms),
                None => format!("Player{}: {}", slot + 1, entry.nickname),
            },
            None => format!("Player{}: Empty Slot", slot + 1),
        }
    }

    /// Session title from the slot-0 occupant: `Alice's session`.
    pub fn session_title(&self) -> Option<String> {
        self.entry_at(0)
            .map(|entry| format!("{}'s session", entry.nickname))
    }
}

impl Default for SessionRoster {
    fn default() -> Self {
        Self::new(MAX_PLAYERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sequential_joins_keep_arrival_order() {
        let mut roster = SessionRoster::default();
        roster.set_host("Host");
        for name in ["Alice", "Bob", "Cara"] {
            assert!(roster.try_add(name));
        }
        assert_eq!(roster.len(), 4);
        assert_eq!(roster.snapshot(), names(&["Host", "Alice", "Bob", "Cara"]));
    }

    #[test]
    fn test_capacity_and_duplicates_rejected() {
        let mut roster = SessionRoster::new(2);
        assert!(roster.try_add("Alice"));
        assert!(!roster.try_add("Alice"));
        assert!(roster.try_add("Bob"));
        assert!(!roster.try_add("Cara"));
        assert!(!roster.try_add(""));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_remove_leaves_hole_for_next_join() {
        let mut roster = SessionRoster::default();
        roster.set_host("Host");
        roster.try_add("Alice");
        roster.try_add("Bob");

        roster.remove("Alice");
        assert_eq!(roster.snapshot(), names(&["Host", "Bob"]));
        assert!(roster.entry_at(1).is_none());

        // The next join fills the vacated slot, not the end.
        roster.try_add("Cara");
        assert_eq!(roster.entry_at(1).unwrap().nickname, "Cara");
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut roster = SessionRoster::default();
        roster.try_add("Alice");
        roster.remove("Nobody");
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_snapshot_preserves_aux_state_by_nickname() {
        let mut roster = SessionRoster::default();
        roster.apply_snapshot(&names(&["Host", "Alice", "Bob"]));
        roster.set_loadout("Alice", "light_scout");
        roster.set_latency("Alice", 42);

        // Bob leaves; Alice moves up a slot but keeps her state.
        roster.apply_snapshot(&names(&["Host", "Alice"]));
        let alice = roster.get("Alice").unwrap();
        assert_eq!(alice.loadout.as_deref(), Some("light_scout"));
        assert_eq!(alice.latency_ms, Some(42));

        // A fresh name gets fresh state.
        roster.apply_snapshot(&names(&["Host", "Alice", "Dana"]));
        let dana = roster.get("Dana").unwrap();
        assert_eq!(dana.loadout, None);
        assert_eq!(dana.latency_ms, None);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let mut roster = SessionRoster::default();
        let snapshot = names(&["Host", "Alice", "Bob"]);
        roster.apply_snapshot(&snapshot);
        roster.set_latency("Bob", 17);
        let before = roster.clone();
        roster.apply_snapshot(&snapshot);
        assert_eq!(roster.snapshot(), before.snapshot());
        assert_eq!(roster.get("Bob"), before.get("Bob"));
        assert_eq!(roster.get("Alice"), before.get("Alice"));
    }

    #[test]
    fn test_pinned_host_survives_snapshot() {
        let mut roster = SessionRoster::default();
        roster.set_host("Host");
        roster.try_add("Alice");

        // A snapshot that omits the host must not evict slot 0.
        roster.apply_snapshot(&names(&["Alice", "Bob"]));
        assert_eq!(roster.entry_at(0).unwrap().nickname, "Host");
        assert_eq!(roster.snapshot(), names(&["Host", "Alice", "Bob"]));
    }

    #[test]
    fn test_latency_touches_only_matching_entry() {
        let mut roster = SessionRoster::default();
        roster.apply_snapshot(&names(&["Host", "Alice", "Bob"]));
        roster.set_loadout("Bob", "heavy_breacher");

        let host_before = roster.get("Host").cloned();
        let bob_before = roster.get("Bob").cloned();

        roster.set_latency("Alice", 99);

        assert_eq!(roster.get("Host").cloned(), host_before);
        assert_eq!(roster.get("Bob").cloned(), bob_before);
        assert_eq!(roster.get("Alice").unwrap().latency_ms, Some(99));
    }

    #[test]
    fn test_aux_setters_ignore_absent_names() {
        let mut roster = SessionRoster::default();
        roster.set_loadout("Ghost", "light_scout");
        roster.set_latency("Ghost", 5);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_clear_session_fields_keeps_membership() {
        let mut roster = SessionRoster::default();
        roster.apply_snapshot(&names(&["Host", "Alice"]));
        roster.set_loadout("Alice", "light_scout");
        roster.set_latency("Alice", 30);

        roster.clear_session_fields();
        let alice = roster.get("Alice").unwrap();
        assert_eq!(alice.loadout, None);
        assert_eq!(alice.latency_ms, None);
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_slot_lines() {
        let mut roster = SessionRoster::default();
        roster.set_host("Host");
        roster.try_add("Alice");
        roster.set_latency("Alice", 23);

        assert_eq!(roster.slot_line(0), "Player1: Host");
        assert_eq!(roster.slot_line(1), "Player2: Alice, 23 ms");
        assert_eq!(roster.slot_line(3), "Player4: Empty Slot");
        assert_eq!(roster.session_title().unwrap(), "Host's session");
    }

    #[test]
    fn test_oversized_snapshot_truncated() {
        let mut roster = SessionRoster::new(2);
        roster.apply_snapshot(&names(&["A", "B", "C"]));
        assert_eq!(roster.snapshot(), names(&["A", "B"]));
    }

    proptest! {
        #[test]
        fn prop_apply_snapshot_idempotent(
            raw in proptest::collection::vec("[A-Za-z][A-Za-z0-9]{0,8}", 0..6)
        ) {
            let mut unique = raw.clone();
            unique.sort();
            unique.dedup();

            let mut roster = SessionRoster::default();
            roster.apply_snapshot(&unique);
            let once = roster.snapshot();
            roster.apply_snapshot(&unique);
            prop_assert_eq!(once, roster.snapshot());
        }
    }
}
