//! CryptoJS compatible password-based AES, as used by the portal to wrap the
//! embed url, plus the index-substitution decoder that recovers the
//! decryption passphrase from the obfuscated key table.

use crate::error::{Error, Result};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};
use rand::RngCore;
use serde::{Deserialize, Serialize};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const SALT_SIZE: usize = 8;
const KEY_MATERIAL: usize = KEY_SIZE + IV_SIZE;

/// CryptoJS default JSON output shape. The portal smuggles one extra member
/// (`m`, the packed index string) inside the same envelope.
#[derive(Serialize, Deserialize)]
pub struct Envelope {
    pub ct: String,
    pub iv: String,
    pub s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m: Option<String>,
}

impl Envelope {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Crypto(format!("malformed envelope: {e}")))
    }
}

/// OpenSSL EVP_BytesToKey with MD5: iterate `d = MD5(d || pass || salt)`
/// starting from an empty digest, concatenating until enough material.
fn evp_key_material(passphrase: &[u8], salt: &[u8]) -> [u8; KEY_MATERIAL] {
    let mut material = Vec::with_capacity(KEY_MATERIAL + 16);
    let mut digest = Vec::new();

    while material.len() < KEY_MATERIAL {
        let mut md5 = Md5::new();
        md5.update(&digest);
        md5.update(passphrase);
        md5.update(salt);
        digest = md5.finalize().to_vec();
        material.extend_from_slice(&digest);
    }

    let mut out = [0_u8; KEY_MATERIAL];
    out.copy_from_slice(&material[..KEY_MATERIAL]);
    out
}

/// The decrypt side runs a fixed three-round variant whose first round omits
/// the previous digest. It must stay byte-for-byte aligned with the portal's
/// JS counterpart, so it is deliberately not unified with
/// [`evp_key_material`] even though the rounds coincide for these sizes.
fn fixed_key_material(passphrase: &[u8], salt: &[u8]) -> [u8; KEY_MATERIAL] {
    let mut md5 = Md5::new();
    md5.update(passphrase);
    md5.update(salt);
    let mut digest = md5.finalize().to_vec();

    let mut material = digest.clone();

    for _ in 1..3 {
        let mut md5 = Md5::new();
        md5.update(&digest);
        md5.update(passphrase);
        md5.update(salt);
        digest = md5.finalize().to_vec();
        material.extend_from_slice(&digest);
    }

    let mut out = [0_u8; KEY_MATERIAL];
    out.copy_from_slice(&material[..KEY_MATERIAL]);
    out
}

/// Encrypts a JSON value into a CryptoJS envelope (AES-256-CBC, PKCS#7).
pub fn encrypt(value: &serde_json::Value, passphrase: &str) -> Result<String> {
    let mut salt = [0_u8; SALT_SIZE];
    rand::rng().fill_bytes(&mut salt);

    let material = evp_key_material(passphrase.as_bytes(), &salt);
    let (key, iv) = material.split_at(KEY_SIZE);

    let plaintext = serde_json::to_vec(value)
        .map_err(|e| Error::Crypto(format!("unserializable plaintext: {e}")))?;
    let ciphertext = Aes256CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

    let envelope = Envelope {
        ct: BASE64.encode(ciphertext),
        iv: hex::encode(iv),
        s: hex::encode(salt),
        m: None,
    };

    serde_json::to_string(&envelope).map_err(|e| Error::Crypto(e.to_string()))
}

/// Decrypts a CryptoJS envelope back into the JSON value it carries.
///
/// Returns [`Error::Crypto`] when the envelope is malformed, the padding is
/// wrong, or the unpadded bytes are not JSON; all of these mean a wrong
/// passphrase or a changed upstream scheme and are never worth retrying.
pub fn decrypt(envelope_json: &str, passphrase: &str) -> Result<serde_json::Value> {
    let envelope = Envelope::parse(envelope_json)?;

    let salt = hex::decode(&envelope.s)
        .map_err(|e| Error::Crypto(format!("invalid salt hex: {e}")))?;
    let iv = hex::decode(&envelope.iv)
        .map_err(|e| Error::Crypto(format!("invalid iv hex: {e}")))?;
    let ciphertext = BASE64
        .decode(&envelope.ct)
        .map_err(|e| Error::Crypto(format!("invalid ciphertext base64: {e}")))?;

    if iv.len() != IV_SIZE {
        return Err(Error::Crypto(format!("invalid iv size {}", iv.len())));
    }

    let material = fixed_key_material(passphrase.as_bytes(), &salt);
    let key = &material[..KEY_SIZE];

    let mut buffer = ciphertext;
    let plaintext = Aes256CbcDec::new(key.into(), iv.as_slice().into())
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| Error::Crypto(format!("unpad failed: {e}")))?;

    serde_json::from_slice(plaintext)
        .map_err(|e| Error::Crypto(format!("plaintext is not json: {e}")))
}

/// Recovers the decrypt passphrase from the obfuscated `(table, packed)`
/// pair returned alongside the embed ticket.
///
/// The lookup list is built from 2-character slices of `table` at stride 4
/// starting at offset 2. `packed` is reversed, base64-padded and decoded,
/// then split on `|`; every in-range numeric token selects one entry,
/// emitted with a literal `\x` prefix. Bad tokens are skipped, not errors.
pub fn decode_index_cipher(table: &str, packed: &str) -> Result<String> {
    // Sliced at byte offsets below; reject anything that could straddle a
    // char boundary.
    if !table.is_ascii() {
        return Err(Error::Crypto("key table is not ascii".to_owned()));
    }

    let bytes = table.as_bytes();
    let mut lookup = Vec::new();
    let mut i = 2;

    while i + 2 <= bytes.len() {
        lookup.push(&table[i..i + 2]);
        i += 4;
    }

    let mut reversed = packed.chars().rev().collect::<String>();
    while reversed.len() % 4 != 0 {
        reversed.push('=');
    }

    let decoded = BASE64
        .decode(&reversed)
        .map_err(|e| Error::Crypto(format!("invalid packed index string: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| Error::Crypto(format!("packed index string is not utf-8: {e}")))?;

    let mut passphrase = String::new();

    for token in decoded.split('|') {
        if let Ok(index) = token.parse::<usize>()
            && let Some(entry) = lookup.get(index)
        {
            passphrase.push_str("\\x");
            passphrase.push_str(entry);
        }
    }

    Ok(passphrase)
}
