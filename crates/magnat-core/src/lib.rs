pub mod config;
pub mod dialog;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use dialog::{ConversationState, Dialog, MAIN_CHANNEL};
pub use error::{MagnatError, Result};
pub use event::{EventBus, LogTracer};
pub use types::*;
