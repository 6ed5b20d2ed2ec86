//! Copy-on-write subscriber roster.
//!
//! The set of active subscriptions is an immutable snapshot replaced by
//! compare-and-swap on every membership change. Reads on the hot path
//! (`on_next` fan-out) are a single wait-free pointer load; the O(n) copy
//! cost lands on subscribe/cancel, which are rare by comparison.
//!
//! "Open and empty" and "terminated" are distinct states: a terminated
//! roster admits no further additions, ever. The terminal swap happens
//! exactly once per processor lifetime.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::subscription::ReplaySubscription;

/// One immutable snapshot of the subscriber set.
pub(crate) struct Roster<T> {
    /// Active subscriptions at the time of the snapshot.
    pub(crate) entries: Vec<Arc<ReplaySubscription<T>>>,
    /// Whether the terminal swap has happened. A terminated roster is
    /// frozen: `add` fails against it unconditionally.
    pub(crate) terminated: bool,
}

/// Lock-free registry of active subscriptions.
pub(crate) struct SubscriberSet<T> {
    roster: ArcSwap<Roster<T>>,
}

impl<T> SubscriberSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            roster: ArcSwap::from_pointee(Roster {
                entries: Vec::new(),
                terminated: false,
            }),
        }
    }

    /// Appends `rp` to the roster.
    ///
    /// Returns `false` if the roster is terminated, in which case the
    /// caller must drain `rp` directly so it observes the latched terminal
    /// signal.
    pub(crate) fn add(&self, rp: &Arc<ReplaySubscription<T>>) -> bool {
        loop {
            let current = self.roster.load_full();
            if current.terminated {
                return false;
            }

            let mut entries = Vec::with_capacity(current.entries.len() + 1);
            entries.extend(current.entries.iter().map(Arc::clone));
            entries.push(Arc::clone(rp));

            let next = Arc::new(Roster {
                entries,
                terminated: false,
            });
            let prev = self.roster.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                return true;
            }
        }
    }

    /// Removes the subscription at address `rp`, matching by identity.
    ///
    /// No-op when the roster is terminated, already empty, or does not
    /// contain the subscription.
    pub(crate) fn remove(&self, rp: *const ReplaySubscription<T>) {
        loop {
            let current = self.roster.load_full();
            if current.terminated || current.entries.is_empty() {
                return;
            }

            let Some(position) = current
                .entries
                .iter()
                .position(|entry| std::ptr::eq(Arc::as_ptr(entry), rp))
            else {
                return;
            };

            let mut entries = current.entries.clone();
            entries.remove(position);

            let next = Arc::new(Roster {
                entries,
                terminated: false,
            });
            let prev = self.roster.compare_and_swap(&current, next);
            if Arc::ptr_eq(&prev, &current) {
                return;
            }
        }
    }

    /// Swaps the roster to the terminated state, returning the prior
    /// snapshot so the caller can broadcast the terminal signal.
    ///
    /// Called exactly once per lifetime, on the first terminal producer
    /// signal.
    pub(crate) fn terminate_and_snapshot(&self) -> Arc<Roster<T>> {
        self.roster.swap(Arc::new(Roster {
            entries: Vec::new(),
            terminated: true,
        }))
    }

    /// Returns the current snapshot.
    pub(crate) fn snapshot(&self) -> Arc<Roster<T>> {
        self.roster.load_full()
    }

    pub(crate) fn len(&self) -> usize {
        self.roster.load().entries.len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.roster.load().terminated
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    use crate::buffer::ReplayBuffer;
    use crate::config::ReplayConfig;
    use crate::subscriber::Subscriber;

    struct Discard;

    impl Subscriber<u32> for Discard {
        fn on_next(&self, _value: u32) {}
    }

    fn make_subscription() -> Arc<ReplaySubscription<u32>> {
        let buffer = Arc::new(ReplayBuffer::new(&ReplayConfig::unbounded(4)));
        Arc::new(ReplaySubscription::new(
            Arc::new(Discard),
            buffer,
            Weak::new(),
        ))
    }

    #[test]
    fn test_add_and_len() {
        let set = SubscriberSet::new();
        assert_eq!(set.len(), 0);

        let a = make_subscription();
        let b = make_subscription();
        assert!(set.add(&a));
        assert!(set.add(&b));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remove_by_identity() {
        let set = SubscriberSet::new();
        let a = make_subscription();
        let b = make_subscription();
        set.add(&a);
        set.add(&b);

        set.remove(Arc::as_ptr(&a));
        assert_eq!(set.len(), 1);

        let snapshot = set.snapshot();
        assert!(Arc::ptr_eq(&snapshot.entries[0], &b));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let set = SubscriberSet::new();
        let a = make_subscription();
        let stranger = make_subscription();
        set.add(&a);

        set.remove(Arc::as_ptr(&stranger));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_terminate_freezes_roster() {
        let set = SubscriberSet::new();
        let a = make_subscription();
        set.add(&a);

        let prior = set.terminate_and_snapshot();
        assert_eq!(prior.entries.len(), 1);
        assert!(!prior.terminated);
        assert!(set.is_terminated());
        assert_eq!(set.len(), 0);

        // No additions after the terminal swap.
        let late = make_subscription();
        assert!(!set.add(&late));

        // Removals against the terminated roster are no-ops.
        set.remove(Arc::as_ptr(&a));
        assert!(set.is_terminated());
    }

    #[test]
    fn test_concurrent_adds_all_land() {
        let set = Arc::new(SubscriberSet::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let set = Arc::clone(&set);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let rp = make_subscription();
                    assert!(set.add(&rp));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(set.len(), 200);
    }

    #[test]
    fn test_concurrent_add_remove_converges() {
        let set = Arc::new(SubscriberSet::new());
        let keep = make_subscription();
        set.add(&keep);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let set = Arc::clone(&set);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let rp = make_subscription();
                    set.add(&rp);
                    set.remove(Arc::as_ptr(&rp));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(set.len(), 1);
        assert!(Arc::ptr_eq(&set.snapshot().entries[0], &keep));
    }
}
