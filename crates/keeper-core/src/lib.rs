//! Core abstractions for keeper: account group identifiers, typed values,
//! the error taxonomy, and the secret backend contract shared by every
//! storage implementation.

pub mod error;
pub mod events;
pub mod group;
pub mod secret;
pub mod value;

pub use error::{KeeperError, Result};
pub use group::AccountGroup;
pub use value::{Value, ValueKind};
