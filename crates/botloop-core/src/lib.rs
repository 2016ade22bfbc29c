//! # Botloop Core
//! Shared vocabulary for the polling engine.
//!
//! - [`types`]: updates and their payload kinds
//! - [`error`]: the engine's error taxonomy
//! - [`config`]: TOML configuration
//! - [`source`]: the fetch collaborator contract

pub mod config;
pub mod error;
pub mod source;
pub mod types;

pub use config::{BackoffConfig, BotConfig, PersistenceConfig, PollingConfig, PollingMode, SaverConfig, WorkerConfig};
pub use error::{BotError, HandlerError, RemoteError, Result, panic_message};
pub use source::{FetchRequest, UpdateSource};
pub use types::{
    CallbackQuery, Chat, ChatJoinRequest, ChatMemberUpdated, ChosenInlineResult, Event, EventKind,
    InlineQuery, Message, Poll, PollAnswer, PreCheckoutQuery, ShippingQuery, Update, User,
};
