//! Multi-User Chat room membership.
//!
//! This is intentionally a membership table, not a XEP-0045 room actor:
//! no roles, no affiliations, no room configuration. A room is just a
//! name and the set of accounts currently joined to it, which is all the
//! presence-relay semantics this server needs.

use dashmap::DashMap;

use crate::account::AccountId;

/// Concurrent table of MUC rooms, keyed by room name.
pub struct MucTable {
    rooms: DashMap<String, DashMap<AccountId, String>>,
}

impl MucTable {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add `account_id` to `room`, creating the room if it doesn't exist
    /// yet. Joining a room the account is already in overwrites its
    /// display name but does not create a duplicate membership entry.
    pub fn join(&self, room: &str, account_id: &AccountId, display_name: &str) {
        let occupants = self
            .rooms
            .entry(room.to_string())
            .or_insert_with(DashMap::new);
        occupants.insert(account_id.clone(), display_name.to_string());
    }

    /// Remove `account_id` from `room`. No-op if either doesn't exist.
    ///
    /// A room is dropped from the table entirely once its last occupant
    /// leaves, so that "a room exists iff it has ≥1 member" always holds.
    pub fn leave(&self, room: &str, account_id: &str) {
        let Some(occupants) = self.rooms.get(room) else {
            return;
        };
        occupants.remove(account_id);
        let is_empty = occupants.is_empty();
        drop(occupants);
        if is_empty {
            self.rooms.remove_if(room, |_, occupants| occupants.is_empty());
        }
    }

    /// Remove `account_id` from every room it currently occupies.
    pub fn leave_all(&self, account_id: &str) {
        for room in self.rooms.iter().map(|e| e.key().clone()).collect::<Vec<_>>() {
            self.leave(&room, account_id);
        }
    }

    /// Current occupants of `room` as (account_id, display_name) pairs.
    pub fn members(&self, room: &str) -> Vec<(AccountId, String)> {
        self.rooms
            .get(room)
            .map(|occupants| {
                occupants
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `account_id` currently occupies `room`.
    pub fn is_member(&self, room: &str, account_id: &str) -> bool {
        self.rooms
            .get(room)
            .map(|occupants| occupants.contains_key(account_id))
            .unwrap_or(false)
    }

    /// Number of rooms with at least one occupant tracked.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

impl Default for MucTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_list_members() {
        let table = MucTable::new();
        table.join("lobby", &"alice".to_string(), "Alice");
        table.join("lobby", &"bob".to_string(), "Bob");

        let mut members = table.members("lobby");
        members.sort();
        assert_eq!(
            members,
            vec![
                ("alice".to_string(), "Alice".to_string()),
                ("bob".to_string(), "Bob".to_string()),
            ]
        );
    }

    #[test]
    fn leave_removes_single_membership() {
        let table = MucTable::new();
        table.join("lobby", &"alice".to_string(), "Alice");
        table.leave("lobby", "alice");

        assert!(!table.is_member("lobby", "alice"));
        assert!(table.members("lobby").is_empty());
    }

    #[test]
    fn leave_drops_room_once_last_occupant_leaves() {
        let table = MucTable::new();
        table.join("lobby", &"alice".to_string(), "Alice");
        table.leave("lobby", "alice");

        assert_eq!(table.room_count(), 0);
    }

    #[test]
    fn leave_all_clears_every_room() {
        let table = MucTable::new();
        table.join("lobby", &"alice".to_string(), "Alice");
        table.join("vip", &"alice".to_string(), "Alice");

        table.leave_all("alice");

        assert!(!table.is_member("lobby", "alice"));
        assert!(!table.is_member("vip", "alice"));
    }

    #[test]
    fn rejoining_does_not_duplicate_membership() {
        let table = MucTable::new();
        table.join("lobby", &"alice".to_string(), "Alice");
        table.join("lobby", &"alice".to_string(), "Alice (renamed)");

        assert_eq!(table.members("lobby").len(), 1);
    }
}
