pub mod app_state;
pub mod chat;
pub mod config;
pub mod drafts;
pub mod editor;
pub mod overlay;
pub mod persistence;
pub mod testing;
pub mod transport;
pub mod versions;

pub use app_state::AppContext;
pub use chat::{ChatSession, ChatStatus, SessionOptions, SessionSnapshot};
pub use config::Config;
pub use drafts::{AutoOpenPolicy, Draft, DraftStore};
pub use overlay::OverlayStore;
