//! Session lifecycle, caching and artifact tracking

pub mod manager;
pub mod registry;
pub mod shell;
pub mod state;
pub mod tracker;

pub use manager::SessionManager;
pub use registry::{SessionKey, SessionRegistry};
pub use shell::CachedShell;
pub use state::SessionState;
pub use tracker::ResourceTracker;
