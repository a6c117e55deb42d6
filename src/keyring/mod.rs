//! The public keyring surface (C4): composes the vault client and the
//! metadata store, enforces the per-uid state machine, and exposes the
//! Cosmos-SDK-shaped contract plus the parallel batch APIs.

mod batch;

use std::sync::Arc;

use tracing::warn;
use zeroize::Zeroizing;

use crate::armor::armor_public_key;
use crate::config::Configuration;
use crate::crypto;
use crate::error::{Error, ErrorKind};
use crate::store::{KeyMetadata, KeySource, MetadataStore};
use crate::vault::Client;

pub use batch::{BatchCreateOutcome, SignResult};

/// The fixed backend identifier this keyring reports.
pub const BACKEND: &str = "popsigner-vault";

/// The only algorithm `create_with_options`/`supported_algorithms` accept.
const SECP256K1_ALGO: &str = "secp256k1";

/// Mirrors the Cosmos SDK's sign-mode enum. Accepted and ignored on the
/// signing path — the vault's contract is identical for every mode
/// since the core only ever signs an already-hashed digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    Unspecified,
    Direct,
    Textual,
}

/// A key record as handed back to callers: `name` plus the decoded
/// compressed public key.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub name: String,
    pub address: String,
    pub pub_key_bytes: Vec<u8>,
    pub exportable: bool,
}

/// Options accepted by [`Keyring::create_with_options`].
///
/// `algo` mirrors the Cosmos keyring's explicit-algorithm argument; it
/// only exists so callers coming from that contract can pass one, and
/// any value other than `"secp256k1"` is rejected (`supported_algorithms`
/// reports the single element this keyring actually backs).
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub exportable: bool,
    pub algo: &'static str,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            exportable: false,
            algo: SECP256K1_ALGO,
        }
    }
}

fn record_from_metadata(meta: &KeyMetadata) -> KeyRecord {
    KeyRecord {
        name: meta.name.clone(),
        address: meta.address.clone(),
        pub_key_bytes: meta.pub_key_bytes.clone(),
        exportable: meta.exportable,
    }
}

/// A Cosmos-SDK-shaped `secp256k1` keyring backed by a remote vault.
///
/// Holds the vault client behind an `Arc` so the batch helpers can
/// share one connection-pooled HTTP engine across threads; the store's
/// own internal `RwLock` provides the concurrency safety on the local
/// side (see [`crate::store::MetadataStore`]).
pub struct Keyring {
    client: Arc<Client>,
    store: MetadataStore,
}

impl Keyring {
    /// Validates `cfg`, builds a vault client, checks vault health, then
    /// opens the local store. Any step failing returns the original
    /// error; the store is only opened once `health()` has succeeded, so
    /// a failed open leaves no local file behind that wasn't already
    /// there.
    pub fn open(cfg: Configuration) -> Result<Self, Error> {
        let cfg = cfg.with_defaults();
        cfg.validate()?;

        let client = Client::new(&cfg)?;
        client.health()?;

        let store = MetadataStore::open(cfg.store_path.clone())?;

        Ok(Keyring {
            client: Arc::new(client),
            store,
        })
    }

    pub fn backend(&self) -> &'static str {
        BACKEND
    }

    /// The single supported algorithm, reported as both "supported" and
    /// "default".
    pub fn supported_algorithms(&self) -> Vec<&'static str> {
        vec![SECP256K1_ALGO]
    }

    /// Records built from every metadata entry. A record whose stored
    /// public key fails to re-validate is silently skipped rather than
    /// aborting the whole listing.
    pub fn list(&self) -> Vec<KeyRecord> {
        self.store
            .list()
            .into_iter()
            .filter(|meta| crypto::validate_compressed_pubkey(&meta.pub_key_bytes).is_ok())
            .map(|meta| record_from_metadata(&meta))
            .collect()
    }

    pub fn key(&self, uid: &str) -> Result<KeyRecord, Error> {
        self.store.get(uid).map(|m| record_from_metadata(&m))
    }

    pub fn key_by_address(&self, address: &str) -> Result<KeyRecord, Error> {
        self.store.get_by_address(address).map(|m| record_from_metadata(&m))
    }

    pub fn create(&self, uid: &str) -> Result<KeyRecord, Error> {
        self.create_with_options(uid, CreateOptions::default())
    }

    /// Creates `uid` in the vault, then persists its metadata locally.
    /// If the vault call succeeds but decoding its public key or
    /// persisting locally fails, the vault-side key is deleted
    /// best-effort before the original error is returned.
    pub fn create_with_options(&self, uid: &str, opts: CreateOptions) -> Result<KeyRecord, Error> {
        if opts.algo != SECP256K1_ALGO {
            return Err(Error::new(
                ErrorKind::UnsupportedAlgo,
                format!("unsupported signing algorithm \"{}\", only secp256k1 is supported", opts.algo),
            )
            .wrap("Create", uid));
        }
        if self.store.has(uid) {
            return Err(Error::exists(uid).wrap("Create", uid));
        }

        let created = self
            .client
            .create_key(uid, opts.exportable)
            .map_err(|e| e.wrap("Create", uid))?;

        match self.finish_create(uid, &created, KeySource::Generated, opts.exportable) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.compensate_vault_create(uid);
                Err(e.wrap("Create", uid))
            }
        }
    }

    pub fn delete(&self, uid: &str) -> Result<(), Error> {
        self.client.delete_key(uid).map_err(|e| e.wrap("Delete", uid))?;
        self.store.delete(uid).map_err(|e| e.wrap("Delete", uid))
    }

    pub fn delete_by_address(&self, address: &str) -> Result<(), Error> {
        let meta = self.store.get_by_address(address).map_err(|e| e.wrap("Delete", address))?;
        self.delete(&meta.uid)
    }

    /// Store-only: there is no vault-side rename endpoint.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
        self.store.rename(from, to).map_err(|e| e.wrap("Rename", from))
    }

    /// Signs `msg`. The returned public key always comes from the local
    /// metadata record, never from a vault response — the vault is not
    /// trusted as a source of truth on the signing path.
    pub fn sign(&self, uid: &str, msg: &[u8], _sign_mode: SignMode) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let meta = self.store.get(uid).map_err(|e| e.wrap("Sign", uid))?;
        let digest = crypto::sha256(msg);
        let signature = self.client.sign(uid, &digest).map_err(|e| e.wrap("Sign", uid))?;
        if signature.len() != 64 {
            return Err(Error::new(
                ErrorKind::InvalidSignature,
                format!("vault returned a {}-byte signature, expected 64", signature.len()),
            )
            .wrap("Sign", uid));
        }
        Ok((signature, meta.pub_key_bytes))
    }

    pub fn sign_by_address(
        &self,
        address: &str,
        msg: &[u8],
        sign_mode: SignMode,
    ) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let meta = self.store.get_by_address(address).map_err(|e| e.wrap("Sign", address))?;
        self.sign(&meta.uid, msg, sign_mode)
    }

    pub fn import(&self, uid: &str, private_key_b64: &str, exportable: bool) -> Result<KeyRecord, Error> {
        if self.store.has(uid) {
            return Err(Error::exists(uid).wrap("Import", uid));
        }

        let created = self
            .client
            .import_key(uid, private_key_b64, exportable)
            .map_err(|e| e.wrap("Import", uid))?;

        match self.finish_create(uid, &created, KeySource::Imported, exportable) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.compensate_vault_create(uid);
                Err(e.wrap("Import", uid))
            }
        }
    }

    pub fn export(&self, uid: &str) -> Result<Zeroizing<String>, Error> {
        let meta = self.store.get(uid).map_err(|e| e.wrap("Export", uid))?;
        if !meta.exportable {
            return Err(Error::not_exportable(uid).wrap("Export", uid));
        }
        let (key, _version) = self.client.export_key(uid).map_err(|e| e.wrap("Export", uid))?;
        Ok(key)
    }

    pub fn export_public_armored(&self, uid: &str) -> Result<String, Error> {
        let meta = self.store.get(uid).map_err(|e| e.wrap("ExportPublicArmored", uid))?;
        Ok(armor_public_key(&meta.pub_key_bytes))
    }

    pub fn export_public_armored_by_address(&self, address: &str) -> Result<String, Error> {
        let meta = self
            .store
            .get_by_address(address)
            .map_err(|e| e.wrap("ExportPublicArmored", address))?;
        Ok(armor_public_key(&meta.pub_key_bytes))
    }

    /// Private keys never leave the vault: this always fails.
    pub fn export_private_armored(&self, uid: &str) -> Result<String, Error> {
        Err(Error::not_exportable(uid).wrap("ExportPrivateArmored", uid))
    }

    pub fn export_private_armored_by_address(&self, address: &str) -> Result<String, Error> {
        Err(Error::not_exportable(address).wrap("ExportPrivateArmored", address))
    }

    pub fn import_public_armored(&self, _armor: &str) -> Result<KeyRecord, Error> {
        Err(Error::unsupported("ImportPublicArmored"))
    }

    pub fn import_private_armored(&self, _uid: &str, _armor: &str) -> Result<KeyRecord, Error> {
        Err(Error::unsupported("ImportPrivateArmored"))
    }

    pub fn import_private_hex(&self, _uid: &str, _hex: &str) -> Result<KeyRecord, Error> {
        Err(Error::unsupported("ImportPrivateHex"))
    }

    pub fn new_mnemonic(&self, _uid: &str) -> Result<(KeyRecord, String), Error> {
        Err(Error::unsupported("NewMnemonic"))
    }

    pub fn save_ledger_key(&self, _uid: &str) -> Result<KeyRecord, Error> {
        Err(Error::unsupported("SaveLedgerKey"))
    }

    pub fn save_offline_key(&self, _uid: &str, _pub_key: &[u8]) -> Result<KeyRecord, Error> {
        Err(Error::unsupported("SaveOfflineKey"))
    }

    pub fn save_multisig(&self, _uid: &str, _pub_keys: &[Vec<u8>]) -> Result<KeyRecord, Error> {
        Err(Error::unsupported("SaveMultisig"))
    }

    /// No migration is required when the backend is remote; this is
    /// exactly [`Keyring::list`].
    pub fn migrate_all(&self) -> Vec<KeyRecord> {
        self.list()
    }

    /// Flushes the store. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        self.store.close()
    }

    /// Spawns one thread per slot, each creating `"{prefix}-{i+1}"`.
    /// `count` must be in `1..=100` and `prefix` non-empty.
    pub fn create_batch(&self, prefix: &str, count: usize, exportable: bool) -> BatchCreateOutcome {
        batch::create_batch(self, prefix, count, exportable)
    }

    /// Signs every `(uid, msg)` pair on its own thread; order is
    /// preserved in the returned vector and a per-slot failure does not
    /// affect its siblings.
    pub fn sign_batch(&self, requests: &[(String, Vec<u8>)]) -> Vec<Result<SignResult, Error>> {
        batch::sign_batch(self, requests)
    }

    fn finish_create(
        &self,
        uid: &str,
        created: &crate::vault::CreatedKey,
        source: KeySource,
        exportable: bool,
    ) -> Result<KeyRecord, Error> {
        let pub_key_bytes = crypto::decode_hex_pubkey(&created.public_key_hex)?;
        let meta = KeyMetadata {
            uid: uid.to_string(),
            name: uid.to_string(),
            pub_key_bytes,
            pub_key_type: "secp256k1".to_string(),
            address: created.address.clone(),
            vault_key_path: format!("{}/keys/{uid}", self.client.mount_path()),
            algorithm: "secp256k1".to_string(),
            exportable,
            created_at: created.created_at,
            source,
        };
        self.store.save(meta.clone())?;
        Ok(record_from_metadata(&meta))
    }

    fn compensate_vault_create(&self, uid: &str) {
        if let Err(e) = self.client.delete_key(uid) {
            warn!(uid, error = %e, "failed to roll back vault key after local failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg_for(url: &str, store_path: std::path::PathBuf) -> Configuration {
        Configuration {
            vault_addr: url.to_string(),
            vault_token: "test-token".into(),
            store_path,
            mount_path: "secp256k1".into(),
            http_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[test]
    fn open_fails_fast_when_vault_sealed() {
        let mut server = mockito::Server::new();
        let _m = server.mock("GET", "/sys/health").with_status(503).create();
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg_for(&server.url(), dir.path().join("store.json"));
        let err = Keyring::open(cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VaultSealed);
        assert!(!dir.path().join("store.json").exists());
    }

    #[test]
    fn create_then_get_round_trips_pub_key() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let _create = server
            .mock("POST", "/v1/secp256k1/keys/sequencer-key")
            .with_status(200)
            .with_body(
                r#"{"request_id":"r1","data":{"name":"sequencer-key","public_key":"0201010101010101010101010101010101010101010101010101010101010101","address":"cosmos1abc","exportable":false,"created_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .create();

        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();
        keyring.create("sequencer-key").unwrap();

        let record = keyring.key("sequencer-key").unwrap();
        assert_eq!(record.pub_key_bytes.len(), 33);
        assert_eq!(record.pub_key_bytes[0], 0x02);
        assert!(!record.exportable);
    }

    #[test]
    fn create_twice_is_key_exists() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let _create = server
            .mock("POST", "/v1/secp256k1/keys/sequencer-key")
            .with_status(200)
            .with_body(
                r#"{"request_id":"r1","data":{"name":"sequencer-key","public_key":"0201010101010101010101010101010101010101010101010101010101010101","address":"cosmos1abc","exportable":false,"created_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .create();

        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();
        keyring.create("sequencer-key").unwrap();
        let err = keyring.create("sequencer-key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyExists);
    }

    #[test]
    fn sign_uses_metadata_pub_key_not_vault_response() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let _create = server
            .mock("POST", "/v1/secp256k1/keys/sequencer-key")
            .with_status(200)
            .with_body(
                r#"{"request_id":"r1","data":{"name":"sequencer-key","public_key":"0201010101010101010101010101010101010101010101010101010101010101","address":"cosmos1abc","exportable":false,"created_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .create();
        let _sign = server
            .mock("POST", "/v1/secp256k1/sign/sequencer-key")
            .with_status(200)
            .with_body(r#"{"request_id":"r1","data":{"signature":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA==","key_version":1}}"#)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();
        keyring.create("sequencer-key").unwrap();

        let (signature, pub_key) = keyring.sign("sequencer-key", b"hello", SignMode::Direct).unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(pub_key[0], 0x02);
    }

    #[test]
    fn export_gating_respects_exportable_flag() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let _create = server
            .mock("POST", "/v1/secp256k1/keys/sequencer-key")
            .with_status(200)
            .with_body(
                r#"{"request_id":"r1","data":{"name":"sequencer-key","public_key":"0201010101010101010101010101010101010101010101010101010101010101","address":"cosmos1abc","exportable":false,"created_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .create();

        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();
        keyring.create("sequencer-key").unwrap();
        let err = keyring.export("sequencer-key").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotExportable);
    }

    #[test]
    fn delete_then_list_is_empty() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let _create = server
            .mock("POST", "/v1/secp256k1/keys/k")
            .with_status(200)
            .with_body(
                r#"{"request_id":"r1","data":{"name":"k","public_key":"0201010101010101010101010101010101010101010101010101010101010101","address":"cosmos1abc","exportable":false,"created_at":"2026-01-01T00:00:00Z"}}"#,
            )
            .create();
        let _delete = server.mock("DELETE", "/v1/secp256k1/keys/k").with_status(204).create();

        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();
        keyring.create("k").unwrap();
        keyring.delete("k").unwrap();
        assert!(keyring.list().is_empty());
    }

    #[test]
    fn unsupported_operations_report_unsupported_algo() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();

        assert_eq!(
            keyring.save_ledger_key("x").unwrap_err().kind(),
            ErrorKind::UnsupportedAlgo
        );
        assert_eq!(
            keyring.new_mnemonic("x").unwrap_err().kind(),
            ErrorKind::UnsupportedAlgo
        );
        assert_eq!(
            keyring.export_private_armored("x").unwrap_err().kind(),
            ErrorKind::KeyNotExportable
        );
    }

    #[test]
    fn create_rejects_explicit_non_secp256k1_algo() {
        let mut server = mockito::Server::new();
        let _health = server.mock("GET", "/sys/health").with_status(200).create();
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::open(cfg_for(&server.url(), dir.path().join("store.json"))).unwrap();

        let err = keyring
            .create_with_options("k", CreateOptions { exportable: false, algo: "ed25519" })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgo);
        assert!(!keyring.list().iter().any(|r| r.name == "k"));
    }
}
