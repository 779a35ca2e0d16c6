//! Concrete storage implementations: the account key-file and its atomic
//! persistence, the attribute store built on it, and the secret backends
//! (inline plaintext, or an external secret service such as the OS keyring).

pub mod attribute_store;
pub mod backend;
pub mod driver;
pub mod keyfile;
pub mod secret_service;

pub use attribute_store::{AttributeStore, Attributes, Groups, PENDING_REMOVAL_KEY};
pub use driver::{PersistenceDriver, ACCOUNTS_FILE};
