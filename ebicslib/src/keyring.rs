//! Связка ключей EBICS: три пары пользователя (A005, X002, E002) и
//! открытые ключи банков. Сериализуется в JSON-блоб для `KeyringStore`;
//! закрытые ключи внутри блоба запечатаны паролем.

use crate::{
    crypto,
    error::{EbicsError, Result},
    model::Passphrases,
};
use chrono::{DateTime, Utc};
use rsa::{
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
    RsaPrivateKey, RsaPublicKey,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const KEYRING_VERSION: u32 = 1;
pub const DEFAULT_KEY_BITS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyVersion {
    /// Подпись (ES)
    A005,
    /// Аутентификация
    X002,
    /// Шифрование
    E002,
}

impl KeyVersion {
    pub const ALL: [KeyVersion; 3] = [KeyVersion::A005, KeyVersion::X002, KeyVersion::E002];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyVersion::A005 => "A005",
            KeyVersion::X002 => "X002",
            KeyVersion::E002 => "E002",
        }
    }

    fn passphrase(self, p: &Passphrases) -> &str {
        match (self, &p.signature) {
            (KeyVersion::A005, Some(sig)) => sig.expose_secret(),
            _ => p.passphrase.expose_secret(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCreation {
    Created,
    /// Ключи уже есть; повторная генерация ничего не меняет.
    AlreadyPresent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredKeyPair {
    /// SubjectPublicKeyInfo DER, base64
    public: String,
    /// PKCS#8 DER, запечатанный паролем
    private: String,
    created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    certificate: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredBankKeys {
    authentication: String,
    encryption: String,
    downloaded: DateTime<Utc>,
}

impl StoredBankKeys {
    fn decode(&self, activated: bool) -> Result<BankKeyPair> {
        Ok(BankKeyPair {
            authentication: decode_public(&self.authentication)?,
            encryption: decode_public(&self.encryption)?,
            activated,
        })
    }
}

/// Активная пара используется в обмене; новая пара после HPB ждёт в
/// `pending` до сверки с письмом банка.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct BankSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<StoredBankKeys>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending: Option<StoredBankKeys>,
}

/// Открытые ключи банка X002/E002.
#[derive(Debug, Clone, PartialEq)]
pub struct BankKeyPair {
    pub authentication: RsaPublicKey,
    pub encryption: RsaPublicKey,
    pub activated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyring {
    version: u32,
    #[serde(default)]
    user: BTreeMap<KeyVersion, StoredKeyPair>,
    #[serde(default)]
    bank: BTreeMap<String, BankSlot>,
}

impl Default for Keyring {
    fn default() -> Self {
        Self {
            version: KEYRING_VERSION,
            user: BTreeMap::new(),
            bank: BTreeMap::new(),
        }
    }
}

fn encode_public(key: &RsaPublicKey) -> Result<String> {
    let der = key.to_public_key_der().map_err(EbicsError::crypto)?;
    Ok(crypto::b64(der.as_bytes()))
}

fn decode_public(b64: &str) -> Result<RsaPublicKey> {
    let der = crypto::unb64(b64)?;
    RsaPublicKey::from_public_key_der(&der).map_err(EbicsError::crypto)
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Пустой блоб: пустая связка.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        let ring: Keyring = serde_json::from_slice(blob)
            .map_err(|e| EbicsError::Keyring(format!("decode: {e}")))?;
        if ring.version != KEYRING_VERSION {
            return Err(EbicsError::Keyring(format!(
                "unsupported keyring version {}",
                ring.version
            )));
        }
        Ok(ring)
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| EbicsError::Keyring(format!("encode: {e}")))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn has_user_keys(&self) -> bool {
        KeyVersion::ALL.iter().all(|v| self.user.contains_key(v))
    }

    pub fn has_certificates(&self) -> bool {
        self.has_user_keys() && self.user.values().all(|k| k.certificate.is_some())
    }

    /// Генерирует три пары. Если ключи уже есть: `AlreadyPresent`, связка
    /// не меняется.
    pub fn generate(&mut self, bits: usize, passphrases: &Passphrases) -> Result<KeyCreation> {
        if self.has_user_keys() {
            debug!("keys already present");
            return Ok(KeyCreation::AlreadyPresent);
        }
        if !self.user.is_empty() {
            return Err(EbicsError::Keyring(
                "keyring holds an incomplete set of user keys".into(),
            ));
        }

        let mut generated = BTreeMap::new();
        for version in KeyVersion::ALL {
            let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
                .map_err(|e| EbicsError::Crypto(format!("{} keygen: {e}", version.as_str())))?;
            let pkcs8 = key.to_pkcs8_der().map_err(EbicsError::crypto)?;
            generated.insert(
                version,
                StoredKeyPair {
                    public: encode_public(&RsaPublicKey::from(&key))?,
                    private: crypto::seal(pkcs8.as_bytes(), version.passphrase(passphrases))?,
                    created: Utc::now(),
                    certificate: None,
                },
            );
        }
        self.user = generated;
        info!(bits, "generated EBICS user keys");
        Ok(KeyCreation::Created)
    }

    fn stored(&self, version: KeyVersion) -> Result<&StoredKeyPair> {
        self.user
            .get(&version)
            .ok_or_else(|| EbicsError::Keyring(format!("no {} key", version.as_str())))
    }

    pub fn public_key(&self, version: KeyVersion) -> Result<RsaPublicKey> {
        decode_public(&self.stored(version)?.public)
    }

    pub fn private_key(&self, version: KeyVersion, passphrases: &Passphrases) -> Result<RsaPrivateKey> {
        let der = crypto::open(&self.stored(version)?.private, version.passphrase(passphrases))?;
        RsaPrivateKey::from_pkcs8_der(&der).map_err(EbicsError::crypto)
    }

    pub fn created(&self, version: KeyVersion) -> Option<DateTime<Utc>> {
        self.user.get(&version).map(|k| k.created)
    }

    pub fn certificate(&self, version: KeyVersion) -> Result<Option<Vec<u8>>> {
        self.stored(version)?
            .certificate
            .as_deref()
            .map(crypto::unb64)
            .transpose()
    }

    pub fn set_certificate(&mut self, version: KeyVersion, der: &[u8]) -> Result<()> {
        let stored = self
            .user
            .get_mut(&version)
            .ok_or_else(|| EbicsError::Keyring(format!("no {} key", version.as_str())))?;
        stored.certificate = Some(crypto::b64(der));
        Ok(())
    }

    /// Сохраняет скачанные ключи банка как ожидающие. Уже активная пара
    /// остаётся в работе до следующей активации.
    pub fn stage_bank_keys(
        &mut self,
        host_id: &str,
        authentication: &RsaPublicKey,
        encryption: &RsaPublicKey,
    ) -> Result<()> {
        let slot = self.bank.entry(host_id.to_string()).or_default();
        slot.pending = Some(StoredBankKeys {
            authentication: encode_public(authentication)?,
            encryption: encode_public(encryption)?,
            downloaded: Utc::now(),
        });
        Ok(())
    }

    /// Переводит ожидающую пару в активные. Без ожидающей пары повторная
    /// активация ничего не меняет.
    pub fn activate_bank_keys(&mut self, host_id: &str) -> Result<()> {
        let slot = self
            .bank
            .get_mut(host_id)
            .filter(|s| s.active.is_some() || s.pending.is_some())
            .ok_or_else(|| {
                EbicsError::InvalidState(format!(
                    "no downloaded bank keys for host {host_id}; run HPB first"
                ))
            })?;
        if let Some(pending) = slot.pending.take() {
            slot.active = Some(pending);
        }
        Ok(())
    }

    /// Ключи для обмена: активная пара, иначе ожидающая с `activated: false`.
    pub fn bank_keys(&self, host_id: &str) -> Result<Option<BankKeyPair>> {
        match self.bank.get(host_id) {
            Some(BankSlot { active: Some(k), .. }) => k.decode(true).map(Some),
            Some(BankSlot { pending: Some(k), .. }) => k.decode(false).map(Some),
            _ => Ok(None),
        }
    }

    /// Скачанная, но ещё не активированная пара.
    pub fn pending_bank_keys(&self, host_id: &str) -> Result<Option<BankKeyPair>> {
        self.bank
            .get(host_id)
            .and_then(|s| s.pending.as_ref())
            .map(|k| k.decode(false))
            .transpose()
    }
}
