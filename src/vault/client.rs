//! Blocking HTTP transport to the Backing Vault.
//!
//! A single pooled `ureq` agent, a cached custom-CA loader, and a
//! status-code-driven response checker, carrying the `secp256k1`
//! plugin's `keys/`, `sign/`, `import/`, `export/` endpoints instead of
//! a `transit`/ed25519 surface.

use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, OnceLock};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::CertificateDer;
use tracing::debug;
use ureq::{
    config::AutoHeaderValue,
    http::Response,
    tls::{Certificate, RootCerts, TlsConfig},
    Agent, Body,
};
use zeroize::Zeroizing;

use crate::config::Configuration;
use crate::error::{self, Error, ErrorKind};
use crate::vault::wire::{
    CreateKeyRequest, CreateKeyResponse, ExportKeyResponse, ImportKeyRequest, Root, SignRequest,
    SignResponse,
};

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";
const VAULT_NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const SIGNATURE_LEN: usize = 64;

/// The outcome of a successful create or import call.
#[derive(Debug, Clone)]
pub struct CreatedKey {
    pub name: String,
    pub public_key_hex: String,
    pub address: String,
    pub exportable: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Transport to the Backing Vault's `secp256k1` plugin mount.
///
/// Reentrant: holds no per-call state besides timers, so a single
/// `Client` may be shared (via `Arc`) across the batch threads in
/// `keyring::batch`.
#[derive(Debug)]
pub struct Client {
    agent: Agent,
    vault_addr: String,
    base_url: String,
    mount_path: String,
    token: String,
    namespace: Option<String>,
}

impl Client {
    pub fn new(cfg: &Configuration) -> Result<Self, Error> {
        let mut builder = Agent::config_builder()
            .timeout_global(Some(cfg.http_timeout))
            .http_status_as_error(false)
            .user_agent(AutoHeaderValue::Provided(Arc::new(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))));

        if cfg.skip_tls_verify {
            let tls_config = TlsConfig::builder().disable_verification(true).build();
            builder = builder.tls_config(tls_config);
        } else if let Some(ca_cert) = &cfg.tls_ca_cert {
            let der = read_cert(ca_cert)?;
            let certs: Vec<Certificate<'static>> = vec![Certificate::from_der(der)];
            let root_certs = RootCerts::new_with_certs(certs.as_slice());
            let tls_config = TlsConfig::builder().root_certs(root_certs).build();
            builder = builder.tls_config(tls_config);
        }

        let agent: Agent = builder.build().new_agent();

        let vault_addr = cfg.vault_addr.trim_end_matches('/').to_string();
        Ok(Client {
            agent,
            base_url: format!("{vault_addr}/v1/{}", cfg.mount_path),
            mount_path: cfg.mount_path.clone(),
            vault_addr,
            token: cfg.vault_token.clone(),
            namespace: cfg.vault_namespace.clone(),
        })
    }

    /// The vault mount this client's keys live under, e.g. `"secp256k1"`.
    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    /// `GET {vault_addr}/sys/health`: succeeds iff the vault is
    /// initialized and unsealed.
    pub fn health(&self) -> Result<(), Error> {
        let uri = format!("{}/v1/sys/health", self.vault_addr);
        let mut req = self.agent.get(&uri).header(VAULT_TOKEN_HEADER, &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header(VAULT_NAMESPACE_HEADER, ns);
        }
        let response = req
            .call()
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("health check failed: {e}")))?;

        match response.status().as_u16() {
            200 => Ok(()),
            503 => Err(Error::new(ErrorKind::VaultSealed, "vault is sealed")),
            other => Err(error::map_status(other, vec![], None)),
        }
    }

    pub fn create_key(&self, uid: &str, exportable: bool) -> Result<CreatedKey, Error> {
        let uri = format!("{}/keys/{uid}", self.base_url);
        debug!(uid, "vault: create_key");
        let mut req = self.agent.post(&uri).header(VAULT_TOKEN_HEADER, &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header(VAULT_NAMESPACE_HEADER, ns);
        }
        let response = req
            .send_json(&CreateKeyRequest { exportable })
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("create_key request failed: {e}")))?;

        let body: Root<CreateKeyResponse> = self.parse_2xx(&uri, response)?;
        let data = body
            .data
            .ok_or_else(|| Error::new(ErrorKind::KeyNotFound, "create_key response missing data"))?;

        Ok(CreatedKey {
            name: data.name,
            public_key_hex: data.public_key,
            address: data.address,
            exportable: data.exportable,
            created_at: data.created_at,
        })
    }

    pub fn delete_key(&self, uid: &str) -> Result<(), Error> {
        let uri = format!("{}/keys/{uid}", self.base_url);
        debug!(uid, "vault: delete_key");
        let mut req = self.agent.delete(&uri).header(VAULT_TOKEN_HEADER, &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header(VAULT_NAMESPACE_HEADER, ns);
        }
        let response = req
            .call()
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("delete_key request failed: {e}")))?;

        match response.status().as_u16() {
            204 | 404 => Ok(()),
            other => Err(self.status_error(&uri, other, response)),
        }
    }

    /// Signs a 32-byte prehashed digest, requesting the 64-byte R‖S
    /// "cosmos" output format. The core always calls with a SHA-256
    /// digest and `prehashed=true`.
    pub fn sign(&self, uid: &str, digest: &[u8; 32]) -> Result<Vec<u8>, Error> {
        let uri = format!("{}/sign/{uid}", self.base_url);
        debug!(uid, "vault: sign");
        let body = SignRequest {
            input: STANDARD.encode(digest),
            prehashed: true,
            output_format: "cosmos",
        };
        let mut req = self.agent.post(&uri).header(VAULT_TOKEN_HEADER, &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header(VAULT_NAMESPACE_HEADER, ns);
        }
        let response = req
            .send_json(&body)
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("sign request failed: {e}")))?;

        let parsed: Root<SignResponse> = self.parse_2xx(&uri, response)?;
        let data = parsed
            .data
            .ok_or_else(|| Error::new(ErrorKind::InvalidSignature, "sign response missing data"))?;

        let signature = STANDARD.decode(&data.signature).map_err(|e| {
            Error::new(ErrorKind::InvalidSignature, format!("signature is not valid base64: {e}"))
        })?;
        if signature.len() != SIGNATURE_LEN {
            return Err(Error::new(
                ErrorKind::InvalidSignature,
                format!("expected a {SIGNATURE_LEN}-byte signature, got {}", signature.len()),
            ));
        }

        Ok(signature)
    }

    pub fn import_key(
        &self,
        uid: &str,
        private_key_b64: &str,
        exportable: bool,
    ) -> Result<CreatedKey, Error> {
        let uri = format!("{}/import/{uid}", self.base_url);
        debug!(uid, "vault: import_key");
        let body = ImportKeyRequest {
            ciphertext: private_key_b64.to_string(),
            exportable,
        };
        let mut req = self.agent.post(&uri).header(VAULT_TOKEN_HEADER, &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header(VAULT_NAMESPACE_HEADER, ns);
        }
        let response = req
            .send_json(&body)
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("import_key request failed: {e}")))?;

        let parsed: Root<CreateKeyResponse> = self.parse_2xx(&uri, response)?;
        let data = parsed
            .data
            .ok_or_else(|| Error::new(ErrorKind::KeyNotFound, "import_key response missing data"))?;

        Ok(CreatedKey {
            name: data.name,
            public_key_hex: data.public_key,
            address: data.address,
            exportable: data.exportable,
            created_at: data.created_at,
        })
    }

    /// Returns `(base64_private_key, key_version)`. The vault refuses if
    /// its copy of the key is non-exportable. The key material is
    /// wrapped in [`Zeroizing`] so it is wiped from memory once the
    /// caller drops it, rather than lingering in a freed heap allocation.
    pub fn export_key(&self, uid: &str) -> Result<(Zeroizing<String>, i64), Error> {
        let uri = format!("{}/export/{uid}", self.base_url);
        debug!(uid, "vault: export_key");
        let mut req = self.agent.get(&uri).header(VAULT_TOKEN_HEADER, &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header(VAULT_NAMESPACE_HEADER, ns);
        }
        let response = req
            .call()
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("export_key request failed: {e}")))?;

        let parsed: Root<ExportKeyResponse> = self.parse_2xx(&uri, response)?;
        let data = parsed
            .data
            .ok_or_else(|| Error::new(ErrorKind::KeyNotExportable, "export_key response missing data"))?;

        Ok((Zeroizing::new(data.key), data.key_version))
    }

    /// Parses a 2xx response body as `Root<T>`, or builds a mapped
    /// `Error` (with request id and vault error strings preserved) for
    /// anything else.
    fn parse_2xx<T: serde::de::DeserializeOwned>(
        &self,
        uri: &str,
        response: Response<Body>,
    ) -> Result<Root<T>, Error> {
        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            self.read_json(response)
        } else {
            Err(self.status_error(uri, status, response))
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, response: Response<Body>) -> Result<T, Error> {
        response
            .into_body()
            .read_json::<T>()
            .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("failed to parse vault response: {e}")))
    }

    fn status_error(&self, uri: &str, status: u16, response: Response<Body>) -> Error {
        #[derive(serde::Deserialize, Default)]
        struct ErrorBody {
            #[serde(default)]
            errors: Vec<String>,
            #[serde(default)]
            request_id: Option<String>,
        }

        let body: ErrorBody = response
            .into_body()
            .read_json::<ErrorBody>()
            .unwrap_or_default();

        debug!(uri, status, "vault: non-2xx response");
        error::map_status(status, body.errors, body.request_id)
    }
}

/// Caches PEM-decoded CA certificate bytes by file path so repeated
/// `Client::new` calls against the same CA don't re-read the file.
fn read_cert(path: &std::path::Path) -> Result<Vec<u8>, Error> {
    static CERT_CACHE: OnceLock<Mutex<HashMap<std::path::PathBuf, Vec<u8>>>> = OnceLock::new();
    let cache = CERT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = cache.lock().expect("cert cache lock poisoned");
    if let Some(cached) = map.get(path) {
        return Ok(cached.clone());
    }

    let content = fs::read(path)
        .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("failed to read CA cert {}: {e}", path.display())))?;
    let cert_der: CertificateDer<'static> = CertificateDer::from_pem_slice(&content)
        .map_err(|e| Error::new(ErrorKind::VaultConnection, format!("invalid CA cert {}: {e}", path.display())))?;
    let der_bytes = cert_der.to_vec();
    map.insert(path.to_path_buf(), der_bytes.clone());
    Ok(der_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg_for(url: &str) -> Configuration {
        Configuration {
            vault_addr: url.to_string(),
            vault_token: "test-token".into(),
            store_path: std::path::PathBuf::from("/tmp/unused-store.json"),
            mount_path: "secp256k1".into(),
            http_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn health_ok_when_vault_active() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/sys/health").with_status(200).create();
        let client = Client::new(&cfg_for(&server.url())).unwrap();
        assert!(client.health().is_ok());
    }

    #[test]
    fn health_sealed_maps_to_vault_sealed() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/sys/health").with_status(503).create();
        let client = Client::new(&cfg_for(&server.url())).unwrap();
        assert_eq!(client.health().unwrap_err().kind(), ErrorKind::VaultSealed);
    }

    #[test]
    fn create_key_parses_response() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("POST", "/v1/secp256k1/keys/sequencer-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"request_id":"r1","data":{"name":"sequencer-key","public_key":"0201010101010101010101010101010101010101010101010101010101010101","address":"cosmos1abc","exportable":false,"created_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .create();

        let client = Client::new(&cfg_for(&server.url())).unwrap();
        let created = client.create_key("sequencer-key", false).unwrap();
        assert_eq!(created.address, "cosmos1abc");
        assert!(!created.exportable);
    }

    #[test]
    fn create_key_auth_error_maps_to_vault_auth() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("POST", "/v1/secp256k1/keys/sequencer-key")
            .with_status(403)
            .with_body(r#"{"errors":["permission denied"]}"#)
            .create();

        let client = Client::new(&cfg_for(&server.url())).unwrap();
        let err = client.create_key("sequencer-key", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VaultAuth);
    }

    #[test]
    fn sign_enforces_64_byte_signature() {
        let mut server = mockito::Server::new();
        let bad_sig = STANDARD.encode([0u8; 10]);
        let _m = server
            .mock("POST", "/v1/secp256k1/sign/sequencer-key")
            .with_status(200)
            .with_body(format!(r#"{{"request_id":"r1","data":{{"signature":"{bad_sig}","key_version":1}}}}"#))
            .create();

        let client = Client::new(&cfg_for(&server.url())).unwrap();
        let err = client.sign("sequencer-key", &[0u8; 32]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSignature);
    }

    #[test]
    fn sign_returns_exact_signature_bytes() {
        let mut server = mockito::Server::new();
        let sig = STANDARD.encode([0u8; 64]);
        let _m = server
            .mock("POST", "/v1/secp256k1/sign/sequencer-key")
            .with_status(200)
            .with_body(format!(r#"{{"request_id":"r1","data":{{"signature":"{sig}","key_version":1}}}}"#))
            .create();

        let client = Client::new(&cfg_for(&server.url())).unwrap();
        let signature = client.sign("sequencer-key", &[0u8; 32]).unwrap();
        assert_eq!(signature, vec![0u8; 64]);
    }

    #[test]
    fn delete_key_treats_404_as_success() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("DELETE", "/v1/secp256k1/keys/gone")
            .with_status(404)
            .create();
        let client = Client::new(&cfg_for(&server.url())).unwrap();
        assert!(client.delete_key("gone").is_ok());
    }

    #[test]
    fn export_key_parses_response() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/v1/secp256k1/export/sequencer-key")
            .with_status(200)
            .with_body(r#"{"request_id":"r1","data":{"key":"c2VjcmV0","key_version":3}}"#)
            .create();
        let client = Client::new(&cfg_for(&server.url())).unwrap();
        let (key, version) = client.export_key("sequencer-key").unwrap();
        assert_eq!(key.as_str(), "c2VjcmV0");
        assert_eq!(version, 3);
    }
}
