//! POPSigner: a point-of-presence signing keyring.
//!
//! Maintains a durable local index of `secp256k1` keys that live in a
//! remote Backing Vault, and exposes a Cosmos-SDK-shaped keyring
//! surface ([`keyring::Keyring`]) that never holds private key material
//! itself. Every signature is produced by the vault against a SHA-256
//! digest computed locally; [`crypto`] validates the compressed public
//! keys the vault hands back.

pub mod armor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod store;
pub mod vault;

pub use config::Configuration;
pub use error::{Error, ErrorKind};
pub use keyring::{CreateOptions, KeyRecord, Keyring, SignMode};
