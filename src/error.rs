//! Closed error taxonomy for the signing keyring.
//!
//! Every fallible operation in this crate returns [`Error`]. The taxonomy
//! itself ([`ErrorKind`]) is closed on purpose: callers match on it to
//! decide retry/compensation policy, so adding a silent new variant would
//! be a breaking change in spirit even where Rust wouldn't enforce it.

use std::fmt;
use thiserror::Error as ThisError;

/// The closed set of error kinds this crate can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum ErrorKind {
    // Domain
    #[error("key_not_found")]
    KeyNotFound,
    #[error("key_exists")]
    KeyExists,
    #[error("key_not_exportable")]
    KeyNotExportable,
    #[error("unsupported_algo")]
    UnsupportedAlgo,
    #[error("invalid_signature")]
    InvalidSignature,
    #[error("signing_failed")]
    SigningFailed,
    // Transport
    #[error("vault_connection")]
    VaultConnection,
    #[error("vault_auth")]
    VaultAuth,
    #[error("vault_sealed")]
    VaultSealed,
    #[error("vault_unavailable")]
    VaultUnavailable,
    // Store
    #[error("store_persist")]
    StorePersist,
    #[error("store_corrupted")]
    StoreCorrupted,
    // Config
    #[error("missing_vault_addr")]
    MissingVaultAddr,
    #[error("missing_vault_token")]
    MissingVaultToken,
    #[error("missing_store_path")]
    MissingStorePath,
    #[error("invalid_vault_addr")]
    InvalidVaultAddr,
}

impl ErrorKind {
    /// Stable string form, suitable for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::KeyExists => "key_exists",
            ErrorKind::KeyNotExportable => "key_not_exportable",
            ErrorKind::UnsupportedAlgo => "unsupported_algo",
            ErrorKind::InvalidSignature => "invalid_signature",
            ErrorKind::SigningFailed => "signing_failed",
            ErrorKind::VaultConnection => "vault_connection",
            ErrorKind::VaultAuth => "vault_auth",
            ErrorKind::VaultSealed => "vault_sealed",
            ErrorKind::VaultUnavailable => "vault_unavailable",
            ErrorKind::StorePersist => "store_persist",
            ErrorKind::StoreCorrupted => "store_corrupted",
            ErrorKind::MissingVaultAddr => "missing_vault_addr",
            ErrorKind::MissingVaultToken => "missing_vault_token",
            ErrorKind::MissingStorePath => "missing_store_path",
            ErrorKind::InvalidVaultAddr => "invalid_vault_addr",
        }
    }
}

/// Transport-level detail preserved from a Backing Vault HTTP response.
#[derive(Debug, Clone, Default)]
pub struct TransportDetail {
    pub status: Option<u16>,
    pub vault_errors: Vec<String>,
    pub request_id: Option<String>,
}

/// Operation-scoped context layered onto an error by `Error::wrap`.
#[derive(Debug, Clone, Default)]
struct Context {
    op: Option<&'static str>,
    key_name: Option<String>,
}

/// The crate-wide error type. Carries a [`ErrorKind`], a human message,
/// optional operation context, and optional transport detail.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Context,
    transport: Option<TransportDetail>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            context: Context::default(),
            transport: None,
        }
    }

    pub fn transport(kind: ErrorKind, message: impl Into<String>, detail: TransportDetail) -> Self {
        Error {
            kind,
            message: message.into(),
            context: Context::default(),
            transport: Some(detail),
        }
    }

    /// Annotate this error with the operation and key name it occurred
    /// under, preserving the original kind for predicate matching.
    pub fn wrap(mut self, op: &'static str, key_name: impl Into<String>) -> Self {
        self.context.op = Some(op);
        self.context.key_name = Some(key_name.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn transport_detail(&self) -> Option<&TransportDetail> {
        self.transport.as_ref()
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn not_found(key_name: impl Into<String>) -> Self {
        let key_name = key_name.into();
        Error::new(ErrorKind::KeyNotFound, format!("key not found: {key_name}"))
    }

    pub fn exists(key_name: impl Into<String>) -> Self {
        let key_name = key_name.into();
        Error::new(ErrorKind::KeyExists, format!("key already exists: {key_name}"))
    }

    pub fn not_exportable(key_name: impl Into<String>) -> Self {
        let key_name = key_name.into();
        Error::new(
            ErrorKind::KeyNotExportable,
            format!("key is not exportable: {key_name}"),
        )
    }

    pub fn unsupported(op: &'static str) -> Self {
        Error::new(
            ErrorKind::UnsupportedAlgo,
            format!("operation \"{op}\" is not supported by the vault-backed secp256k1 keyring"),
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.context.op, &self.context.key_name) {
            (Some(op), Some(key)) => write!(f, "{op} ({key}): {} - {}", self.kind, self.message),
            (Some(op), None) => write!(f, "{op}: {} - {}", self.kind, self.message),
            _ => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

/// Maps a Backing Vault HTTP status code onto the closed taxonomy
/// (403 -> auth, 404 -> not found, 503 -> sealed, else -> unavailable).
pub fn map_status(status: u16, body_errors: Vec<String>, request_id: Option<String>) -> Error {
    let detail = TransportDetail {
        status: Some(status),
        vault_errors: body_errors.clone(),
        request_id,
    };
    let kind = match status {
        403 => ErrorKind::VaultAuth,
        404 => ErrorKind::KeyNotFound,
        503 => ErrorKind::VaultSealed,
        _ => ErrorKind::VaultUnavailable,
    };
    let message = if body_errors.is_empty() {
        format!("vault returned status {status}")
    } else {
        format!("vault returned status {status}: {}", body_errors.join("; "))
    };
    Error::transport(kind, message, detail)
}
