#![forbid(unsafe_code)]
//! The Anchor Worker Pool (spec.md §4.D): concurrent consumers with
//! lease/heartbeat, retries, and dead-letter handling.

mod handler;
mod pool;

pub use handler::{AnchorHandler, GenericHandler};
pub use pool::{WorkerPool, WorkerPoolConfig};
