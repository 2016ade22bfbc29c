//! # Botloop Poller
//! The fetch → classify → dispatch loop and the bot facade around it.
//!
//! ## Architecture
//! ```text
//! control thread (Poller)
//!   ├── fetch Worker ── UpdateSource::fetch_updates(offset, timeout)
//!   ├── CompositeSignal(fetch.done, fetch.exception, pool.exception).wait()
//!   ├── UpdateDispatcher::process(batch) → [(handler, event)]
//!   └── WorkerPool::put(handler, event) ── handlers run in parallel
//!
//! RemoteError  → backoff + retry (none_stop) | stop
//! HandlerError → log + clear      (none_stop) | fatal stop
//! ```

pub mod backoff;
pub mod bot;
pub mod poller;

pub use backoff::{Backoff, Sleeper, ThreadSleeper};
pub use bot::Bot;
pub use poller::{ExceptionHandler, PollOptions, Poller, PollerState};
