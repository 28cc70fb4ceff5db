use std::sync::RwLock;

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberError {
    #[error("already a member")]
    AlreadyPresent,
    #[error("not a member")]
    NotFound,
}

/// Membership list of a single group.
///
/// Readers (`contains`, `values`) share the lock; `insert`/`remove` take it
/// exclusively. Duplicates are rejected rather than ignored so handlers can
/// report "already in group" / "not in group" to the client.
#[derive(Debug, Default)]
pub struct MemberList {
    names: RwLock<Vec<String>>,
}

impl MemberList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str) -> Result<(), MemberError> {
        let mut names = self.names.write().expect("member list lock poisoned");
        if names.iter().any(|n| n == name) {
            return Err(MemberError::AlreadyPresent);
        }
        names.push(name.to_owned());
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), MemberError> {
        let mut names = self.names.write().expect("member list lock poisoned");
        match names.iter().position(|n| n == name) {
            Some(i) => {
                names.remove(i);
                Ok(())
            }
            None => Err(MemberError::NotFound),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.read().expect("member list lock poisoned").iter().any(|n| n == name)
    }

    /// Snapshot of the members, in insertion order.
    pub fn values(&self) -> Vec<String> {
        self.names.read().expect("member list lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.names.read().expect("member list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
