//! Leader/follower rendezvous between the driver and the node workers.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

/// Blocks one designated driver thread (the "leader") until enough worker
/// threads ("followers") are parked, and lets the driver wake individual
/// followers back up.
///
/// The leader is the thread that constructs the barrier. Calling [`wait`]
/// from the leader blocks until the number of parked followers reaches the
/// threshold (returning immediately if it is already met). Calling it from
/// any other thread parks that thread until it is explicitly released with
/// [`release`] or [`release_all`].
///
/// [`wait`]: StepBarrier::wait
/// [`release`]: StepBarrier::release
/// [`release_all`]: StepBarrier::release_all
pub struct StepBarrier {
    leader: ThreadId,
    threshold: usize,
    state: Mutex<BarrierState>,
    // Signalled when the follower count reaches the threshold.
    threshold_met: Condvar,
    // Signalled whenever a follower parks; release() waits on this until
    // its target has actually arrived.
    registered: Condvar,
}

struct BarrierState {
    leader_parked: bool,
    followers: HashMap<ThreadId, Arc<Condvar>>,
}

impl StepBarrier {
    /// Creates a barrier with the calling thread as leader.
    ///
    /// Panics if `threshold` is zero.
    pub fn new(threshold: usize) -> Self {
        assert!(threshold >= 1, "barrier follower threshold must be at least 1");
        Self {
            leader: thread::current().id(),
            threshold,
            state: Mutex::new(BarrierState {
                leader_parked: false,
                followers: HashMap::with_capacity(threshold),
            }),
            threshold_met: Condvar::new(),
            registered: Condvar::new(),
        }
    }

    /// The number of parked followers required before the leader may pass.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The thread id of the leader.
    pub fn leader(&self) -> ThreadId {
        self.leader
    }

    /// The number of followers currently parked.
    pub fn follower_count(&self) -> usize {
        self.state.lock().unwrap().followers.len()
    }

    /// Parks the calling thread at the barrier.
    ///
    /// The leader returns once the follower threshold is met; a follower
    /// returns once it has been released.
    pub fn wait(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock().unwrap();
        if me == self.leader {
            state.leader_parked = true;
            while state.followers.len() < self.threshold {
                state = self.threshold_met.wait(state).unwrap();
            }
            state.leader_parked = false;
        } else {
            let signal = Arc::new(Condvar::new());
            let prev = state.followers.insert(me, Arc::clone(&signal));
            assert!(prev.is_none(), "thread is already parked at the barrier");
            if state.followers.len() >= self.threshold {
                self.threshold_met.notify_one();
            }
            self.registered.notify_all();
            // A released follower is removed from the map before its signal
            // is notified, so spurious wakeups fall back into the wait.
            while state.followers.contains_key(&me) {
                state = signal.wait(state).unwrap();
            }
        }
    }

    /// Releases one parked follower, waiting for it to park first if it has
    /// not arrived yet.
    ///
    /// The wait-until-parked step closes the race where a release issued
    /// just after the target decided to block would otherwise be lost. If
    /// the target never parks, this call never returns.
    ///
    /// Panics if `target` is the leader or the calling thread itself.
    pub fn release(&self, target: ThreadId) {
        assert!(target != self.leader, "cannot release the leader from the barrier");
        assert!(
            target != thread::current().id(),
            "a thread cannot release itself from the barrier"
        );
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(signal) = state.followers.remove(&target) {
                signal.notify_one();
                return;
            }
            state = self.registered.wait(state).unwrap();
        }
    }

    /// Releases every parked follower. Used at teardown.
    pub fn release_all(&self) {
        let mut state = self.state.lock().unwrap();
        for (_, signal) in state.followers.drain() {
            signal.notify_one();
        }
    }

    /// Whether the given thread (leader or follower) is currently parked.
    pub fn contains(&self, member: ThreadId) -> bool {
        let state = self.state.lock().unwrap();
        (state.leader_parked && member == self.leader) || state.followers.contains_key(&member)
    }
}
