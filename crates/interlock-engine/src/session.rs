//! Process-local login table.
//!
//! Maps logged-in user identities to the privilege they held at login
//! time. Lives only in memory; a restart logs everyone out. Authorization
//! checks read the cached privilege, not the users table, so a privilege
//! change takes effect at the next login.

use interlock_buffer::LinkedHashMap;
use interlock_common::Id;

/// In-memory session table: user id to privilege at login.
pub struct Session {
    logged_in: LinkedHashMap<Id, i32>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            logged_in: LinkedHashMap::new(),
        }
    }

    pub fn is_logged_in(&self, uid: Id) -> bool {
        self.logged_in.contains_key(&uid)
    }

    /// The privilege cached at login, `None` when not logged in.
    pub fn privilege(&mut self, uid: Id) -> Option<i32> {
        self.logged_in.get(&uid).copied()
    }

    pub fn login(&mut self, uid: Id, privilege: i32) {
        self.logged_in.insert(uid, privilege);
    }

    /// Removes a session; false when there was none.
    pub fn logout(&mut self, uid: Id) -> bool {
        self.logged_in.remove(&uid).is_some()
    }

    pub fn clear(&mut self) {
        self.logged_in.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
