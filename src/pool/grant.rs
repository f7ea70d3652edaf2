//! # Thread grants.
//!
//! A [`ThreadGrant`] is the caller's exclusive claim on one reserved thread.
//! It is not `Clone`; the thread goes back to the pool exactly once, either
//! through [`ThreadGrant::release`], [`ThreadPool::release`](super::ThreadPool::release)
//! or when the grant is dropped.

use std::fmt;
use std::sync::Arc;

use crate::error::PoolError;
use crate::runtime::ThreadId;

use super::manager::Shared;
use super::state::ThreadState;

/// Exclusive reservation of one execution thread.
pub struct ThreadGrant {
    shared: Arc<Shared>,
    thread: ThreadId,
    released: bool,
}

impl ThreadGrant {
    pub(crate) fn new(shared: Arc<Shared>, thread: ThreadId) -> Self {
        Self {
            shared,
            thread,
            released: false,
        }
    }

    /// The reserved thread.
    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Marks the thread as executing (`Reserved → Executing`).
    pub fn begin(&self) -> Result<(), PoolError> {
        self.shared.transition(self.thread, ThreadState::Executing)
    }

    /// Marks the thread as reserved again (`Executing → Reserved`).
    pub fn finish(&self) -> Result<(), PoolError> {
        self.shared.transition(self.thread, ThreadState::Reserved)
    }

    /// Gives the thread back to its pool.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.released = true;
        self.shared.release_thread(self.thread)
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }
}

impl Drop for ThreadGrant {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.shared.release_thread(self.thread);
        }
    }
}

impl fmt::Debug for ThreadGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGrant")
            .field("thread", &self.thread)
            .field("released", &self.released)
            .finish()
    }
}
