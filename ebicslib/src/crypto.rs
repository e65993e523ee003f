//! Криптопримитивы EBICS: защита закрытых ключей паролем, хэши открытых
//! ключей, подпись X002, расшифровка E002, zlib.

use crate::error::{EbicsError, Result};
use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, Params};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use rand::RngCore;
use rsa::{
    pkcs1v15::SigningKey,
    signature::{SignatureEncoding, Signer},
    traits::PublicKeyParts,
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use zeroize::Zeroizing;

/// Формат запечатанного ключа: [version][salt][nonce][ciphertext+tag].
const SEAL_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_SIZE: usize = 1 + SALT_LEN + NONCE_LEN;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(19 * 1024, 2, 1, Some(32))
        .map_err(|e| EbicsError::Crypto(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| EbicsError::Crypto(format!("key derivation: {e}")))?;
    Ok(key)
}

/// Шифрует данные паролем (Argon2id + AES-256-GCM), результат в base64.
pub fn seal(plain: &[u8], passphrase: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(EbicsError::crypto)?;
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|e| EbicsError::Crypto(format!("seal: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + ct.len());
    out.push(SEAL_VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(B64.encode(out))
}

pub fn open(sealed: &str, passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let data = B64.decode(sealed).map_err(EbicsError::crypto)?;
    if data.len() < HEADER_SIZE + 16 {
        return Err(EbicsError::Crypto("sealed key truncated".into()));
    }
    if data[0] != SEAL_VERSION {
        return Err(EbicsError::Crypto(format!("unsupported seal version {}", data[0])));
    }
    let salt = &data[1..1 + SALT_LEN];
    let nonce = &data[1 + SALT_LEN..HEADER_SIZE];
    let key = derive_key(passphrase, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(EbicsError::crypto)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), &data[HEADER_SIZE..])
        .map(Zeroizing::new)
        // неверный тег = неверный пароль или испорченный блоб
        .map_err(|_| EbicsError::Crypto("invalid passphrase".into()))
}

fn trimmed_hex(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".into()
    } else {
        trimmed.to_string()
    }
}

/// Строка для хэша ключа: экспонента и модуль в hex без ведущих нулей
/// через пробел.
pub fn key_hash_input(key: &RsaPublicKey) -> String {
    format!(
        "{} {}",
        trimmed_hex(&key.e().to_bytes_be()),
        trimmed_hex(&key.n().to_bytes_be())
    )
}

/// SHA-256 открытого ключа (INI-письмо, `BankPubKeyDigests`).
pub fn key_digest(key: &RsaPublicKey) -> [u8; 32] {
    Sha256::digest(key_hash_input(key).as_bytes()).into()
}

/// Отпечаток для сверки человеком: `AB CD ...`.
pub fn fingerprint(key: &RsaPublicKey) -> String {
    key_digest(key)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// RSA PKCS#1 v1.5 с SHA-256 (X002).
pub fn sign_x002(key: &RsaPrivateKey, data: &[u8]) -> Vec<u8> {
    let signer = SigningKey::<Sha256>::new(key.clone());
    signer.sign(data).to_vec()
}

/// E002: ключ транзакции зашифрован RSA, данные: AES-128-CBC с нулевым
/// IV и дополнением ANSI X9.23.
pub fn decrypt_e002(key: &RsaPrivateKey, transaction_key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let aes_key = Zeroizing::new(
        key.decrypt(Pkcs1v15Encrypt, transaction_key)
            .map_err(|e| EbicsError::Crypto(format!("transaction key: {e}")))?,
    );
    let mut plain = Aes128CbcDec::new_from_slices(&aes_key, &[0u8; 16])
        .map_err(EbicsError::crypto)?
        .decrypt_padded_vec_mut::<NoPadding>(data)
        .map_err(|e| EbicsError::Crypto(format!("order data: {e}")))?;
    let pad = plain.last().copied().unwrap_or(0) as usize;
    if pad == 0 || pad > 16 || pad > plain.len() {
        return Err(EbicsError::Crypto(format!("bad padding length {pad}")));
    }
    plain.truncate(plain.len() - pad);
    Ok(plain)
}

pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Nonce запроса: 16 случайных байт в hex.
pub fn request_nonce() -> String {
    let mut n = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut n);
    hex::encode_upper(n)
}

pub fn b64(data: &[u8]) -> String {
    B64.encode(data)
}

pub fn unb64(data: &str) -> Result<Vec<u8>> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    B64.decode(compact).map_err(|e| EbicsError::Parse(format!("base64: {e}")))
}
