//! Thread pool: warm floor, elastic ceiling and admission control.
//!
//! ## Contents
//! - [`ThreadPool`] acquire/release/resize/close over interpreter threads
//! - [`ThreadGrant`] exclusive claim on one reserved thread
//! - [`PoolStats`], [`ThreadState`] observable state

mod grant;
mod manager;
mod state;

pub use grant::ThreadGrant;
pub use manager::ThreadPool;
pub use state::{PoolStats, ThreadState};
