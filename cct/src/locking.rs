//! Optional write lock shared between a controller and its deletion listener.
//!
//! Scene actors can be released from another thread while the simulation
//! thread moves a controller. With locking enabled, the listener and the move
//! serialize on a `parking_lot` mutex. Single-threaded setups skip it entirely.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::scene::{ActorHandle, DeletionListener};

/// Locking policy of one controller, fixed at creation.
#[derive(Debug)]
pub enum WriteLock {
    Disabled,
    Enabled(Mutex<()>),
}

impl WriteLock {
    pub fn new(enabled: bool) -> Self {
        if enabled {
            WriteLock::Enabled(Mutex::new(()))
        } else {
            WriteLock::Disabled
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, WriteLock::Enabled(_))
    }

    /// `None` when locking is disabled.
    pub fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        match self {
            WriteLock::Disabled => None,
            WriteLock::Enabled(m) => Some(m.lock()),
        }
    }
}

const NO_ACTOR: u64 = u64::MAX;

/// What a controller's deletion listener observed since the last move.
///
/// The controller publishes the actor it stands on after every move; the
/// listener flags the cache as stale on any release and remembers whether the
/// released actor was the one under the controller.
#[derive(Debug)]
pub struct TouchedState {
    lock: WriteLock,
    touched_actor: AtomicU64,
    touched_released: AtomicBool,
    cache_invalidated: AtomicBool,
}

impl TouchedState {
    pub fn new(locking_enabled: bool) -> Self {
        Self {
            lock: WriteLock::new(locking_enabled),
            touched_actor: AtomicU64::new(NO_ACTOR),
            touched_released: AtomicBool::new(false),
            cache_invalidated: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.lock.lock()
    }

    pub fn is_locking_enabled(&self) -> bool {
        self.lock.is_enabled()
    }

    pub(crate) fn publish_touched(&self, actor: Option<ActorHandle>) {
        let raw = actor.map_or(NO_ACTOR, |a| a.0);
        self.touched_actor.store(raw, Ordering::Release);
    }

    /// `true` once after any actor release.
    pub(crate) fn take_cache_invalidated(&self) -> bool {
        self.cache_invalidated.swap(false, Ordering::AcqRel)
    }

    /// `true` once after the published touched actor was released.
    pub(crate) fn take_touched_released(&self) -> bool {
        self.touched_released.swap(false, Ordering::AcqRel)
    }
}

impl DeletionListener for TouchedState {
    fn on_release(&self, actor: ActorHandle) {
        let _guard = self.lock();
        self.cache_invalidated.store(true, Ordering::Release);
        if self
            .touched_actor
            .compare_exchange(actor.0, NO_ACTOR, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.touched_released.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    #[test]
    fn disabled_lock_never_blocks() {
        let lock = WriteLock::new(false);
        assert!(lock.lock().is_none());
        assert!(!lock.is_enabled());
    }

    #[test]
    fn release_of_touched_actor_is_reported_once() {
        let state = TouchedState::new(false);
        state.publish_touched(Some(ActorHandle(7)));

        state.on_release(ActorHandle(3));
        assert!(state.take_cache_invalidated());
        assert!(!state.take_touched_released());

        state.on_release(ActorHandle(7));
        assert!(state.take_touched_released());
        assert!(!state.take_touched_released());
        assert!(state.take_cache_invalidated());
        assert!(!state.take_cache_invalidated());
    }

    #[test]
    fn listener_waits_for_the_move_lock() {
        let state = Arc::new(TouchedState::new(true));
        state.publish_touched(Some(ActorHandle(1)));

        let guard = state.lock();
        assert!(guard.is_some());

        let started = Arc::new(Barrier::new(2));
        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let state = Arc::clone(&state);
            let started = Arc::clone(&started);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                started.wait();
                state.on_release(ActorHandle(1));
                done.store(true, Ordering::Release);
            })
        };

        started.wait();
        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::Acquire));
        assert!(!handle.is_finished());
        assert!(!state.touched_released.load(Ordering::Acquire));

        drop(guard);
        handle.join().unwrap();
        assert!(done.load(Ordering::Acquire));
        assert!(state.take_touched_released());
    }
}
