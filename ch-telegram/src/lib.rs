//! Telegram request/reply coordination for consult-human.
//!
//! Several independent CLI invocations may share one bot account and one
//! state directory with no daemon between them. Coordination is entirely
//! file-based: a pending-request store, an update inbox with a shared
//! `getUpdates` offset, and a single-poller election lock. The
//! [`AskCoordinator`] ties those together for one end-to-end question.

pub mod api;
pub mod coordinator;
pub mod inbox;
pub mod linker;
mod lockfile;
pub mod pending;
pub mod poller;
pub mod prompt;

pub use api::{HttpTelegramApi, TelegramApi, Update, WebhookInfo};
pub use coordinator::{ensure_polling_mode, AskCoordinator};
pub use inbox::{InboxEntry, InboxStore};
pub use linker::discover_chat;
pub use pending::{PendingRecord, PendingStore};
pub use poller::PollerLock;
