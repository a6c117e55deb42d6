//! ASCII-armored encoding for public key material.
//!
//! A BEGIN/END delimited base64 block, PEM-shaped but not PEM, for
//! public keys only — private keys never leave the vault
//! (`Keyring::export_private_armored*` always fails).

const HEADER: &str = "-----BEGIN COSMOS PUBLIC KEY-----";
const FOOTER: &str = "-----END COSMOS PUBLIC KEY-----";
const LINE_WIDTH: usize = 64;

/// Wraps `pub_key_bytes` in a fixed BEGIN/END armor header with base64
/// body, wrapped at 64 columns like a conventional PEM block.
pub fn armor_public_key(pub_key_bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let encoded = STANDARD.encode(pub_key_bytes);
    let mut body = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH + 2);
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        body.push_str(std::str::from_utf8(chunk).expect("base64 output is ASCII"));
        body.push('\n');
    }

    format!("{HEADER}\n{body}{FOOTER}\n")
}
