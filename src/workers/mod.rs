//! Worker declaration registry.
//!
//! ## Contents
//! - [`WorkerDeclaration`] normalized, validated worker registration
//! - [`PreparedEnv`] canonical key-ordered environment
//! - [`WatchPattern`] glob / path patterns that trigger restarts

mod declaration;
mod env;
mod watch;

pub use declaration::WorkerDeclaration;
pub use env::PreparedEnv;
pub use watch::WatchPattern;
