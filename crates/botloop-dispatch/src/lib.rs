//! # Botloop Dispatch
//! Routes each fetched update to at most one matching handler path.
//!
//! ## Routing order for messages
//! ```text
//! message ─┬─ next-step handler for chat? ── pop + run, message consumed
//!          ├─ reply handler for replied-to message? ── pop + run (keeps going)
//!          └─ message handlers, registration order ── first full filter match runs
//! other kinds ── their own handler list, first match wins
//! ```

pub mod dispatcher;
pub mod filters;
pub mod handler;
pub mod registry;
pub mod saver;

pub use dispatcher::{Classified, Dispatch, Route, UpdateDispatcher};
pub use filters::{Filters, Predicate, extract_command};
pub use handler::{Callback, CallbackRegistry, Handler, HandlerRecord, SavedHandler};
pub use registry::{HandlerRegistry, KeyedHandlers};
pub use saver::{DebouncedSaver, FileHandlerStore, HandlerStore, SavedHandlers};
