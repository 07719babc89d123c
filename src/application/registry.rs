//! Per-parent registry of child entities
//!
//! Every parent owns its own map, so registries of different parents never
//! contend. Additions and removals go through the parent's voting channel:
//! a veto leaves the registry untouched and notifies nobody.

use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::application::events::VotingChannel;
use crate::shared::{DomainError, DomainResult};

/// Outcome of a voted structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<T> {
    Applied(T),
    Vetoed,
}

impl<T> Mutation<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Mutation::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            Mutation::Applied(value) => Some(value),
            Mutation::Vetoed => None,
        }
    }
}

pub struct EntityRegistry<K, V> {
    kind: &'static str,
    entries: DashMap<K, Arc<V>>,
}

impl<K, V> EntityRegistry<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display,
{
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, id: &K) -> Option<Arc<V>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: &K) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of the children. Callers iterate the snapshot, never the map,
    /// so no shard lock is held while they work.
    pub fn values(&self) -> Vec<Arc<V>> {
        self.entries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vote on adding `child` under `parent`; on approval insert it and
    /// notify the channel's listeners exactly once.
    pub fn add<P>(
        &self,
        timestamp: DateTime<Utc>,
        parent: &P,
        id: K,
        child: Arc<V>,
        channel: &VotingChannel<P, V>,
    ) -> DomainResult<Mutation<Arc<V>>> {
        if self.entries.contains_key(&id) {
            return Err(DomainError::Conflict(format!(
                "{} '{}' already exists",
                self.kind, id
            )));
        }

        if !channel.vote(timestamp, parent, &child) {
            debug!(kind = self.kind, %id, "Addition vetoed");
            return Ok(Mutation::Vetoed);
        }

        match self.entries.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(DomainError::Conflict(format!(
                    "{} '{}' already exists",
                    self.kind, id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&child));
            }
        }

        channel.notify(timestamp, parent, &child);
        Ok(Mutation::Applied(child))
    }

    pub fn remove<P>(
        &self,
        timestamp: DateTime<Utc>,
        parent: &P,
        id: &K,
        channel: &VotingChannel<P, V>,
    ) -> DomainResult<Mutation<Arc<V>>> {
        let child = self
            .get(id)
            .ok_or_else(|| DomainError::not_found(self.kind, id))?;

        if !channel.vote(timestamp, parent, &child) {
            debug!(kind = self.kind, %id, "Removal vetoed");
            return Ok(Mutation::Vetoed);
        }

        match self.entries.remove(id) {
            Some((_, removed)) => {
                channel.notify(timestamp, parent, &removed);
                Ok(Mutation::Applied(removed))
            }
            None => Err(DomainError::not_found(self.kind, id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Child(&'static str);

    fn registry() -> EntityRegistry<String, Child> {
        EntityRegistry::new("child")
    }

    #[test]
    fn add_notifies_once() {
        let registry = registry();
        let channel = VotingChannel::<(), Child>::new("children");
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        channel.add_listener(move |_, _, _| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        let result = registry
            .add(Utc::now(), &(), "a".into(), Arc::new(Child("a")), &channel)
            .unwrap();

        assert!(result.is_applied());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get(&"a".to_string()).unwrap().0, "a");
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let registry = registry();
        let channel = VotingChannel::<(), Child>::new("children");
        registry
            .add(Utc::now(), &(), "a".into(), Arc::new(Child("a")), &channel)
            .unwrap();

        let err = registry
            .add(Utc::now(), &(), "a".into(), Arc::new(Child("a2")), &channel)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn veto_leaves_registry_unchanged() {
        let registry = registry();
        let channel = VotingChannel::<(), Child>::new("children");
        channel.add_voter(|_, _, child| child.0 != "forbidden");
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        channel.add_listener(move |_, _, _| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        let result = registry
            .add(
                Utc::now(),
                &(),
                "x".into(),
                Arc::new(Child("forbidden")),
                &channel,
            )
            .unwrap();

        assert_eq!(result, Mutation::Vetoed);
        assert!(registry.is_empty());
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let registry = registry();
        let channel = VotingChannel::<(), Child>::new("children");
        let err = registry
            .remove(Utc::now(), &(), &"missing".to_string(), &channel)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[test]
    fn vetoed_removal_keeps_child() {
        let registry = registry();
        let additions = VotingChannel::<(), Child>::new("add");
        let removals = VotingChannel::<(), Child>::new("remove");
        removals.add_voter(|_, _, _| false);
        registry
            .add(Utc::now(), &(), "a".into(), Arc::new(Child("a")), &additions)
            .unwrap();

        let result = registry
            .remove(Utc::now(), &(), &"a".to_string(), &removals)
            .unwrap();
        assert_eq!(result, Mutation::Vetoed);
        assert!(registry.contains(&"a".to_string()));
    }
}
