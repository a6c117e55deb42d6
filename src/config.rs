//! Validated configuration for the signing keyring (C1).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, ErrorKind};

const DEFAULT_MOUNT_PATH: &str = "secp256k1";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for opening a [`crate::keyring::Keyring`].
///
/// Required fields are `vault_addr`, `vault_token`, and `store_path`;
/// `mount_path` and `http_timeout` are filled with defaults by
/// [`Configuration::with_defaults`] when left blank/zero.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub vault_addr: String,
    pub vault_token: String,
    pub vault_namespace: Option<String>,
    pub mount_path: String,
    pub store_path: PathBuf,
    pub http_timeout: Duration,
    /// PEM-encoded CA certificate used to verify the vault's TLS
    /// certificate, in place of the system trust store.
    pub tls_ca_cert: Option<PathBuf>,
    pub skip_tls_verify: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            vault_addr: String::new(),
            vault_token: String::new(),
            vault_namespace: None,
            mount_path: String::new(),
            store_path: PathBuf::new(),
            http_timeout: Duration::from_secs(0),
            tls_ca_cert: None,
            skip_tls_verify: false,
        }
    }
}

impl Configuration {
    /// Fills `mount_path` and `http_timeout` with defaults when left blank.
    pub fn with_defaults(mut self) -> Self {
        if self.mount_path.is_empty() {
            self.mount_path = DEFAULT_MOUNT_PATH.to_string();
        }
        if self.http_timeout.is_zero() {
            self.http_timeout = DEFAULT_HTTP_TIMEOUT;
        }
        self
    }

    /// Validates required fields and the shape of `vault_addr`, rejecting
    /// anything that isn't a parseable `http`/`https` URL one failed
    /// connection attempt earlier than a bad address would otherwise
    /// surface.
    pub fn validate(&self) -> Result<(), Error> {
        if self.vault_addr.is_empty() {
            return Err(Error::new(
                ErrorKind::MissingVaultAddr,
                "vault_addr is required",
            ));
        }
        if self.vault_token.is_empty() {
            return Err(Error::new(
                ErrorKind::MissingVaultToken,
                "vault_token is required",
            ));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(Error::new(
                ErrorKind::MissingStorePath,
                "store_path is required",
            ));
        }

        let url = url::Url::parse(&self.vault_addr).map_err(|e| {
            Error::new(
                ErrorKind::InvalidVaultAddr,
                format!("vault_addr \"{}\" is not a valid URL: {e}", self.vault_addr),
            )
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::new(
                ErrorKind::InvalidVaultAddr,
                format!("vault_addr \"{}\" must use http or https", self.vault_addr),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Configuration {
        Configuration {
            vault_addr: "https://vault.internal:8200".into(),
            vault_token: "s.token".into(),
            store_path: PathBuf::from("/tmp/popsigner-store.json"),
            ..Default::default()
        }
    }

    #[test]
    fn missing_vault_addr() {
        let cfg = Configuration {
            vault_addr: String::new(),
            ..base_config()
        };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::MissingVaultAddr);
    }

    #[test]
    fn missing_vault_token() {
        let cfg = Configuration {
            vault_token: String::new(),
            ..base_config()
        };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::MissingVaultToken);
    }

    #[test]
    fn missing_store_path() {
        let cfg = Configuration {
            store_path: PathBuf::new(),
            ..base_config()
        };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::MissingStorePath);
    }

    #[test]
    fn invalid_vault_addr() {
        let cfg = Configuration {
            vault_addr: "not-a-url".into(),
            ..base_config()
        };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::InvalidVaultAddr);
    }

    #[test]
    fn ftp_scheme_rejected() {
        let cfg = Configuration {
            vault_addr: "ftp://vault.internal".into(),
            ..base_config()
        };
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::InvalidVaultAddr);
    }

    #[test]
    fn defaults_fill_blank_fields() {
        let cfg = base_config().with_defaults();
        assert_eq!(cfg.mount_path, DEFAULT_MOUNT_PATH);
        assert_eq!(cfg.http_timeout, DEFAULT_HTTP_TIMEOUT);
    }

    #[test]
    fn defaults_preserve_explicit_fields() {
        let mut cfg = base_config();
        cfg.mount_path = "custom-mount".into();
        cfg.http_timeout = Duration::from_secs(5);
        let cfg = cfg.with_defaults();
        assert_eq!(cfg.mount_path, "custom-mount");
        assert_eq!(cfg.http_timeout, Duration::from_secs(5));
    }
}
