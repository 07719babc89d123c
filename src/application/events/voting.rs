//! Veto-capable mutation protocol
//!
//! Structural changes (adding or removing a child entity) are first put to a
//! vote. Any voter, local or further up the chain, can veto. Only an
//! affirmative vote lets the change happen, after which the listeners are
//! notified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, error};

use super::channel::ListenerId;

type Voter<P, C> = Arc<dyn Fn(DateTime<Utc>, &P, &C) -> bool + Send + Sync>;
type MutationListener<P, C> = Arc<dyn Fn(DateTime<Utc>, &P, &C) + Send + Sync>;

pub struct VotingChannel<P, C> {
    name: &'static str,
    voters: RwLock<Vec<(ListenerId, Voter<P, C>)>>,
    listeners: RwLock<Vec<(ListenerId, MutationListener<P, C>)>>,
    upstream: Option<Arc<VotingChannel<P, C>>>,
}

impl<P, C> VotingChannel<P, C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            voters: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            upstream: None,
        }
    }

    pub fn chained_to(name: &'static str, upstream: Arc<VotingChannel<P, C>>) -> Self {
        Self {
            upstream: Some(upstream),
            ..Self::new(name)
        }
    }

    /// Register a voter. Returning `false` vetoes the mutation.
    pub fn add_voter<F>(&self, voter: F) -> ListenerId
    where
        F: Fn(DateTime<Utc>, &P, &C) -> bool + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.voters.write().push((id, Arc::new(voter)));
        id
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(DateTime<Utc>, &P, &C) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a voter or a listener.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut removed = false;
        {
            let mut voters = self.voters.write();
            let before = voters.len();
            voters.retain(|(vid, _)| *vid != id);
            removed |= voters.len() != before;
        }
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        removed | (listeners.len() != before)
    }

    /// Affirmative unless a local or upstream voter vetoes. Stops at the
    /// first veto. A panicking voter counts as a veto.
    pub fn vote(&self, timestamp: DateTime<Utc>, parent: &P, child: &C) -> bool {
        let voters: Vec<Voter<P, C>> = self
            .voters
            .read()
            .iter()
            .map(|(_, voter)| Arc::clone(voter))
            .collect();

        for voter in voters {
            match catch_unwind(AssertUnwindSafe(|| voter(timestamp, parent, child))) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(channel = self.name, "Mutation vetoed");
                    return false;
                }
                Err(_) => {
                    error!(channel = self.name, "Voter panicked, treating as veto");
                    return false;
                }
            }
        }

        match &self.upstream {
            Some(upstream) => upstream.vote(timestamp, parent, child),
            None => true,
        }
    }

    /// Tell local, then upstream listeners that the mutation happened.
    pub fn notify(&self, timestamp: DateTime<Utc>, parent: &P, child: &C) {
        let listeners: Vec<MutationListener<P, C>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(timestamp, parent, child))).is_err() {
                error!(channel = self.name, "Mutation listener panicked");
            }
        }

        if let Some(upstream) = &self.upstream {
            upstream.notify(timestamp, parent, child);
        }
    }
}

/// Addition and removal channels for one kind of child.
pub struct MutationChannels<P, C> {
    pub addition: Arc<VotingChannel<P, C>>,
    pub removal: Arc<VotingChannel<P, C>>,
}

impl<P, C> MutationChannels<P, C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            addition: Arc::new(VotingChannel::new(name)),
            removal: Arc::new(VotingChannel::new(name)),
        }
    }

    pub fn chained_to(name: &'static str, parent: &MutationChannels<P, C>) -> Self {
        Self {
            addition: Arc::new(VotingChannel::chained_to(name, Arc::clone(&parent.addition))),
            removal: Arc::new(VotingChannel::chained_to(name, Arc::clone(&parent.removal))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn vote_is_affirmative_without_voters() {
        let channel = VotingChannel::<&str, u32>::new("test");
        assert!(channel.vote(Utc::now(), &"parent", &1));
    }

    #[test]
    fn upstream_voter_can_veto() {
        let upstream = Arc::new(VotingChannel::<&str, u32>::new("up"));
        upstream.add_voter(|_, _, child| *child != 13);
        let local = VotingChannel::chained_to("local", Arc::clone(&upstream));
        local.add_voter(|_, _, _| true);

        assert!(local.vote(Utc::now(), &"p", &12));
        assert!(!local.vote(Utc::now(), &"p", &13));
    }

    #[test]
    fn local_veto_short_circuits() {
        let upstream_calls = Arc::new(AtomicUsize::new(0));
        let upstream = Arc::new(VotingChannel::<(), ()>::new("up"));
        let calls = Arc::clone(&upstream_calls);
        upstream.add_voter(move |_, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        });
        let local = VotingChannel::chained_to("local", Arc::clone(&upstream));
        local.add_voter(|_, _, _| false);

        assert!(!local.vote(Utc::now(), &(), &()));
        assert_eq!(upstream_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_voter_vetoes() {
        let channel = VotingChannel::<(), ()>::new("test");
        channel.add_voter(|_, _, _| panic!("voter failure"));
        assert!(!channel.vote(Utc::now(), &(), &()));
    }

    #[test]
    fn notify_reaches_local_and_upstream_listeners() {
        let hits = Arc::new(AtomicUsize::new(0));
        let parent = MutationChannels::<(), ()>::new("parent");
        let child = MutationChannels::chained_to("child", &parent);
        for channel in [&parent.addition, &child.addition] {
            let h = Arc::clone(&hits);
            channel.add_listener(move |_, _, _| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }

        child.addition.notify(Utc::now(), &(), &());
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        child.removal.notify(Utc::now(), &(), &());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_voter_no_longer_vetoes() {
        let channel = VotingChannel::<(), ()>::new("test");
        let id = channel.add_voter(|_, _, _| false);
        assert!(!channel.vote(Utc::now(), &(), &()));
        assert!(channel.remove(id));
        assert!(channel.vote(Utc::now(), &(), &()));
    }
}
