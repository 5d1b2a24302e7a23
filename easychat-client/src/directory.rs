//! Session identity and the local user directory.
//!
//! The dispatcher task writes here as frames arrive while callers read from
//! their own tasks. Every operation takes its lock for the duration of one
//! read or one mutation and never across I/O.

use easychat_protocol::{UserEntry, UNAUTHENTICATED_ID};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// The locally authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionIdentity {
    /// `-1` until a login succeeds.
    pub user_id: i32,
    pub username: String,
}

impl SessionIdentity {
    pub fn unauthenticated() -> Self {
        Self {
            user_id: UNAUTHENTICATED_ID,
            username: String::new(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id != UNAUTHENTICATED_ID
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

/// A name lookup waiting for the server's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLookup {
    pub key: String,
    pub deadline: Instant,
}

/// Bidirectional name/id index. Both maps change together.
#[derive(Debug, Default)]
struct Index {
    name_to_id: HashMap<String, i32>,
    id_to_name: HashMap<i32, String>,
}

impl Index {
    fn insert(&mut self, id: i32, name: &str) {
        // Drop the halves that would dangle: the id's previous name and the
        // name's previous id.
        if let Some(old_name) = self.id_to_name.remove(&id) {
            if self.name_to_id.get(&old_name) == Some(&id) {
                self.name_to_id.remove(&old_name);
            }
        }
        if let Some(old_id) = self.name_to_id.remove(name) {
            self.id_to_name.remove(&old_id);
        }

        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.insert(id, name.to_string());
    }

    fn clear(&mut self) {
        self.name_to_id.clear();
        self.id_to_name.clear();
    }
}

/// Shared session state: identity, known users, pending name lookups.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    index: RwLock<Index>,
    identity: RwLock<SessionIdentity>,
    /// Username of the login request in flight.
    login_username: Mutex<Option<String>>,
    /// Pending lookups: username -> latest deadline.
    pending: Mutex<HashMap<String, Instant>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id known for `name`.
    pub fn lookup_id(&self, name: &str) -> Option<i32> {
        self.index.read().name_to_id.get(name).copied()
    }

    /// Returns the name known for `id`, or the id itself as text.
    pub fn lookup_name(&self, id: i32) -> String {
        self.index
            .read()
            .id_to_name
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Replaces every entry with `users`.
    pub fn replace_all(&self, users: &[UserEntry]) {
        {
            let mut index = self.index.write();
            index.clear();
            for user in users {
                index.insert(user.id, &user.name);
            }
        }
        let mut pending = self.pending.lock();
        for user in users {
            pending.remove(&user.name);
        }
    }

    /// Inserts or updates one entry, keeping every other entry.
    pub fn upsert(&self, id: i32, name: &str) {
        self.index.write().insert(id, name);
        self.pending.lock().remove(name);
    }

    /// Returns every known user, ordered by id.
    pub fn entries(&self) -> Vec<UserEntry> {
        let mut entries: Vec<UserEntry> = self
            .index
            .read()
            .id_to_name
            .iter()
            .map(|(id, name)| UserEntry::new(*id, name.clone()))
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn len(&self) -> usize {
        self.index.read().id_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of the session identity.
    pub fn identity(&self) -> SessionIdentity {
        self.identity.read().clone()
    }

    pub fn set_identity(&self, user_id: i32, username: &str) {
        *self.identity.write() = SessionIdentity {
            user_id,
            username: username.to_string(),
        };
    }

    pub fn reset_identity(&self) {
        *self.identity.write() = SessionIdentity::unauthenticated();
    }

    /// Remembers the username of an outgoing login so the response can be
    /// committed with it.
    pub fn begin_login(&self, username: &str) {
        *self.login_username.lock() = Some(username.to_string());
    }

    /// Takes the username of the login in flight.
    pub fn take_login_username(&self) -> Option<String> {
        self.login_username.lock().take()
    }

    /// Records a lookup for `name` that expires at `deadline`.
    pub fn register_lookup(&self, name: &str, deadline: Instant) {
        let mut pending = self.pending.lock();
        let entry = pending.entry(name.to_string()).or_insert(deadline);
        if *entry < deadline {
            *entry = deadline;
        }
    }

    pub fn remove_lookup(&self, name: &str) -> bool {
        self.pending.lock().remove(name).is_some()
    }

    /// Drops lookups whose deadline is at or before `now`. Returns how many
    /// were removed.
    pub fn prune_lookups(&self, now: Instant) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, deadline| *deadline > now);
        before - pending.len()
    }

    /// Returns the lookups still waiting for an answer.
    pub fn pending_lookups(&self) -> Vec<PendingLookup> {
        self.pending
            .lock()
            .iter()
            .map(|(key, deadline)| PendingLookup {
                key: key.clone(),
                deadline: *deadline,
            })
            .collect()
    }
}
