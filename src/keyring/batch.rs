//! Parallel batch helpers built on `std::thread::scope`.
//!
//! Each slot writes its own `Mutex<Option<_>>` cell by index — a
//! fixed-size task set bounded by the input length, with results
//! collected through an indexed array rather than a channel. No slot
//! can block on another: the vault is the only serialization point.

use std::sync::Mutex;

use crate::error::{Error, ErrorKind};
use crate::keyring::{KeyRecord, Keyring, SignMode};

const MAX_BATCH_CREATE: usize = 100;

/// A signature produced by [`Keyring::sign_batch`].
#[derive(Debug, Clone)]
pub struct SignResult {
    pub signature: Vec<u8>,
    pub pub_key: Vec<u8>,
}

/// The outcome of [`Keyring::create_batch`]: one slot per requested key,
/// in request order. Successful slots remain usable even when siblings
/// failed.
#[derive(Debug)]
pub struct BatchCreateOutcome {
    pub results: Vec<Result<KeyRecord, Error>>,
}

impl BatchCreateOutcome {
    pub fn successes(&self) -> impl Iterator<Item = &KeyRecord> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    /// `None` if every slot succeeded; otherwise a single aggregate
    /// error naming every failed slot's index, with the original kind
    /// of the first failure for predicate matching.
    pub fn partial_failure(&self) -> Option<Error> {
        let failed: Vec<usize> = self
            .results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| if r.is_err() { Some(i) } else { None })
            .collect();
        if failed.is_empty() {
            return None;
        }
        let first_kind = self.results[failed[0]]
            .as_ref()
            .err()
            .map(Error::kind)
            .unwrap_or(ErrorKind::VaultUnavailable);
        Some(Error::new(
            first_kind,
            format!(
                "{} of {} create_batch slots failed: {:?}",
                failed.len(),
                self.results.len(),
                failed
            ),
        ))
    }
}

pub(super) fn create_batch(
    keyring: &Keyring,
    prefix: &str,
    count: usize,
    exportable: bool,
) -> BatchCreateOutcome {
    if prefix.is_empty() || count == 0 || count > MAX_BATCH_CREATE {
        let err = Error::new(
            ErrorKind::UnsupportedAlgo,
            format!("create_batch requires a non-empty prefix and 1..={MAX_BATCH_CREATE} count, got count={count}"),
        );
        return BatchCreateOutcome {
            results: vec![Err(err)],
        };
    }

    let slots: Vec<Mutex<Option<Result<KeyRecord, Error>>>> =
        (0..count).map(|_| Mutex::new(None)).collect();

    std::thread::scope(|scope| {
        for (i, slot) in slots.iter().enumerate() {
            let uid = format!("{prefix}-{}", i + 1);
            scope.spawn(move || {
                let result = keyring.create_with_options(
                    &uid,
                    super::CreateOptions { exportable, ..Default::default() },
                );
                *slot.lock().expect("batch slot lock poisoned") = Some(result);
            });
        }
    });

    let results = slots
        .into_iter()
        .map(|slot| slot.into_inner().expect("batch slot lock poisoned").expect("slot written"))
        .collect();

    BatchCreateOutcome { results }
}

pub(super) fn sign_batch(keyring: &Keyring, requests: &[(String, Vec<u8>)]) -> Vec<Result<SignResult, Error>> {
    if requests.is_empty() {
        return Vec::new();
    }

    let slots: Vec<Mutex<Option<Result<SignResult, Error>>>> =
        (0..requests.len()).map(|_| Mutex::new(None)).collect();

    std::thread::scope(|scope| {
        for (i, (uid, msg)) in requests.iter().enumerate() {
            let slot = &slots[i];
            scope.spawn(move || {
                let result = keyring
                    .sign(uid, msg, SignMode::Direct)
                    .map(|(signature, pub_key)| SignResult { signature, pub_key });
                *slot.lock().expect("batch slot lock poisoned") = Some(result);
            });
        }
    });

    slots
        .into_iter()
        .map(|slot| slot.into_inner().expect("batch slot lock poisoned").expect("slot written"))
        .collect()
}
