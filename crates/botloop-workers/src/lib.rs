//! # Botloop Workers
//! Execution substrate of the polling engine.
//!
//! ## Architecture
//! ```text
//! TaskQueue (crossbeam MPMC)
//!   ├── Worker "botloop-pool-0"  ─┐
//!   ├── Worker "botloop-pool-1"  ─┼─ failures → pool `exception` signal
//!   └── Worker "botloop-pool-N"  ─┘
//!
//! CompositeSignal(fetch.done, fetch.exception, pool.exception)
//!   └── one wait for "fetch finished OR anything failed"
//! ```
//!
//! A callback failure never takes a worker thread down: it is captured as a
//! [`BotError`](botloop_core::BotError) value and surfaced through signals.

pub mod composite;
pub mod pool;
pub mod queue;
pub mod signal;
pub mod worker;

pub use composite::CompositeSignal;
pub use pool::{PoolStats, WorkerPool};
pub use queue::{Task, TaskQueue};
pub use signal::{Signal, SignalObserver};
pub use worker::{ExceptionCallback, Worker, WorkerHandle};
