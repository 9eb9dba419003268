//! Dependency resolution for nested cycles.
//!
//! Creating a variant needs its parent; creating a remote order needs its
//! products. Each nested cycle descends the trail, and revisiting a key that
//! is already being resolved is reported instead of recursing (or waiting on
//! a lock this task already holds).

use ledgerbridge_api::{EntityKey, SyncError};

use crate::Result;

/// Longest chain of nested cycles before we give up.
pub const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct DependencyTrail {
    chain: Vec<EntityKey>,
}

impl DependencyTrail {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn descend(&self, key: &EntityKey) -> Result<Self> {
        if self.chain.contains(key) || self.chain.len() >= MAX_DEPTH {
            let mut chain: Vec<String> = self.chain.iter().map(|k| k.to_string()).collect();
            chain.push(key.to_string());
            return Err(SyncError::DependencyCycle {
                chain: chain.join(" -> "),
            });
        }
        let mut chain = self.chain.clone();
        chain.push(key.clone());
        Ok(Self { chain })
    }

    /// Marks an alias (e.g. the local key of an entity locked by its remote key).
    pub fn alias(&mut self, key: EntityKey) {
        if !self.chain.contains(&key) {
            self.chain.push(key);
        }
    }

    pub fn depth(&self) -> usize {
        self.chain.len()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.chain.contains(key)
    }
}
