//! Shared types for the frequency admin client: REST models, the real-time
//! wire protocol and error types.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
