//! Transport layer to the Backing Vault's HTTP API.

mod client;
mod wire;

pub use client::{Client, CreatedKey};
