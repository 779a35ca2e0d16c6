//! Secret backends: where sensitive parameters are kept.

pub mod keyring;
pub mod plaintext;

pub use self::keyring::{KeyringBackend, DEFAULT_TIMEOUT};
pub use plaintext::PlaintextBackend;
