//! Presence list: who else is in the design and where their cursor is.
//!
//! Entries are keyed by user id and kept in arrival order. Presence is
//! ephemeral; it is never written to history or persisted.

use crate::protocol::{CursorPosition, OnlineUser};

/// Result of feeding a cursor frame into the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// First frame from this user; a record was inserted.
    Joined,
    /// Known user; only the cursor moved.
    Moved,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceList {
    users: Vec<OnlineUser>,
}

impl PresenceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `user_id` if unseen, otherwise update its cursor only.
    ///
    /// `identity` (the frame's `payload.user`) is used for the inserted
    /// record; without it a placeholder name is generated. For known users
    /// the identity is ignored and only the cursor changes.
    pub fn upsert_cursor(
        &mut self,
        user_id: &str,
        cursor: Option<CursorPosition>,
        identity: Option<&OnlineUser>,
    ) -> PresenceChange {
        if let Some(existing) = self.users.iter_mut().find(|u| u.id == user_id) {
            if let Some(cursor) = cursor {
                existing.cursor = cursor;
            }
            return PresenceChange::Moved;
        }

        let mut user = match identity {
            Some(identity) => {
                let mut user = identity.clone();
                user.id = user_id.to_string();
                user
            }
            None => OnlineUser::anonymous(user_id),
        };
        if let Some(cursor) = cursor {
            user.cursor = cursor;
        }
        log::info!("{} ({}) joined", user.name, user.id);
        self.users.push(user);
        PresenceChange::Joined
    }

    /// Record which component `user_id` is editing. Unknown users are ignored.
    pub fn set_selection(&mut self, user_id: &str, selection: Option<String>) -> bool {
        match self.users.iter_mut().find(|u| u.id == user_id) {
            Some(user) => {
                user.selection = selection;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&OnlineUser> {
        self.users.iter().find(|u| u.id == user_id)
    }

    /// Users in arrival order.
    pub fn users(&self) -> &[OnlineUser] {
        &self.users
    }

    /// Users currently editing `component_id`.
    pub fn editing(&self, component_id: &str) -> Vec<&OnlineUser> {
        self.users
            .iter()
            .filter(|u| u.selection.as_deref() == Some(component_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
