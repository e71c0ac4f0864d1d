pub mod api;
pub mod browser;
pub mod core;
pub mod harvest;
pub mod session;

// --- Primary core exports ---
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;
