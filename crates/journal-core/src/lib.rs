pub mod config;
pub mod entry;
pub mod error;

pub use config::JournalConfig;
pub use entry::{load_journal, recent_for_user, Entry, JournalLoad};
pub use error::{JournalError, Result};
