//! JSON wire shapes for the Backing Vault's `secp256k1` plugin endpoints.

use serde::{Deserialize, Serialize};

/// Vault response envelope. Every endpoint wraps its payload in one of
/// these; `data` is absent on a 2xx response that nonetheless has
/// nothing to report (treated as a domain error by the caller, never
/// unwrapped blindly).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Root<T> {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct CreateKeyRequest {
    pub exportable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateKeyResponse {
    pub name: String,
    pub public_key: String,
    pub address: String,
    pub exportable: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct SignRequest<'a> {
    pub input: String,
    pub prehashed: bool,
    pub output_format: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SignResponse {
    pub signature: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub key_version: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ImportKeyRequest {
    pub ciphertext: String,
    pub exportable: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExportKeyResponse {
    pub key: String,
    pub key_version: i64,
}
