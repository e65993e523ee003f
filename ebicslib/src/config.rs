//! Конфигурация клиента: TOML-файл плюс секреты из окружения.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [storage]
//! keyring_dir = "./keyrings"
//! records_csv = "./records.csv"
//!
//! [[banks]]
//! name = "Testbank"
//! host_id = "EBIXHOST"
//! url = "https://ebics.testbank.example/ebicsweb"
//!
//! [[identities]]
//! name = "acme-main"
//! bank = "Testbank"
//! partner_id = "PARTNER1"
//! user_id = "USER1"
//! company = "ACME GmbH"
//!
//! [[accounts]]
//! iban = "DE02 1203 0000 0000 2020 51"
//! company = "ACME GmbH"
//! bank = "Testbank"
//! account = "1200 Bank"
//! ```
//!
//! Секреты можно не хранить в файле: `EBICS_ADMIN_API_KEY`,
//! `EBICS_ADMIN_API_SECRET`, `EBICS_PASSPHRASE_<ИМЯ>` и
//! `EBICS_SIGNATURE_PASSPHRASE_<ИМЯ>` (имя в верхнем регистре, `-` → `_`).

use crate::{
    error::{EbicsError, Result},
    model::{BankEndpoint, Identity, Passphrases},
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
    #[serde(default)]
    pub banks: Vec<BankEndpoint>,
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Директива `EnvFilter`; `RUST_LOG` важнее.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub keyring_dir: PathBuf,
    /// Файл флагов идентичностей (ключи отправлены, ключи банка активны).
    pub state_file: PathBuf,
    pub records_csv: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            keyring_dir: PathBuf::from("./keyrings"),
            state_file: PathBuf::from("./identities.json"),
            records_csv: PathBuf::from("./records.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub product: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            product: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_secret: Option<String>,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    pub name: String,
    /// Имя записи в `[[banks]]`.
    pub bank: String,
    pub partner_id: String,
    pub user_id: String,
    pub company: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub split_batches: bool,
    #[serde(default)]
    pub intraday_sync: bool,
    #[serde(default)]
    pub needs_certificates: bool,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub signature_passphrase: Option<String>,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("name", &self.name)
            .field("bank", &self.bank)
            .field("partner_id", &self.partner_id)
            .field("user_id", &self.user_id)
            .field("company", &self.company)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    pub iban: String,
    pub company: String,
    pub bank: String,
    /// Идентификатор счёта у хоста.
    pub account: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

fn env_suffix(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EbicsError::Config(e.to_string()))
    }

    /// Читает файл, применяет переменные окружения и проверяет результат.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EbicsError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(admin) = self.admin.as_mut() {
            if let Some(key) = var("EBICS_ADMIN_API_KEY") {
                admin.api_key = Some(key);
            }
            if let Some(secret) = var("EBICS_ADMIN_API_SECRET") {
                admin.api_secret = Some(secret);
            }
        }
        for identity in &mut self.identities {
            let suffix = env_suffix(&identity.name);
            if let Some(p) = var(&format!("EBICS_PASSPHRASE_{suffix}")) {
                identity.passphrase = Some(p);
            }
            if let Some(p) = var(&format!("EBICS_SIGNATURE_PASSPHRASE_{suffix}")) {
                identity.signature_passphrase = Some(p);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut banks = HashSet::new();
        for bank in &self.banks {
            if bank.host_id.trim().is_empty() {
                return Err(EbicsError::Config(format!("bank {}: empty host_id", bank.name)));
            }
            if !(bank.url.starts_with("https://") || bank.url.starts_with("http://")) {
                return Err(EbicsError::Config(format!("bank {}: invalid url {}", bank.name, bank.url)));
            }
            if !banks.insert(bank.name.as_str()) {
                return Err(EbicsError::Config(format!("bank {} defined twice", bank.name)));
            }
        }

        let mut names = HashSet::new();
        let mut users = HashSet::new();
        for identity in &self.identities {
            if !names.insert(identity.name.as_str()) {
                return Err(EbicsError::Config(format!("identity {} defined twice", identity.name)));
            }
            if !banks.contains(identity.bank.as_str()) {
                return Err(EbicsError::Config(format!(
                    "identity {}: unknown bank {}",
                    identity.name, identity.bank
                )));
            }
            let triple = (
                identity.bank.as_str(),
                identity.partner_id.as_str(),
                identity.user_id.as_str(),
            );
            if !users.insert(triple) {
                return Err(EbicsError::Config(format!(
                    "identity {}: user {} of partner {} is already configured for {}",
                    identity.name, identity.user_id, identity.partner_id, identity.bank
                )));
            }
        }

        for account in &self.accounts {
            if !banks.contains(account.bank.as_str()) {
                return Err(EbicsError::Config(format!(
                    "account {}: unknown bank {}",
                    account.account, account.bank
                )));
            }
        }

        if let Some(admin) = &self.admin {
            if admin.url.trim().is_empty() {
                return Err(EbicsError::Config("admin: empty url".into()));
            }
        }
        Ok(())
    }

    pub fn bank(&self, name: &str) -> Result<&BankEndpoint> {
        self.banks
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| EbicsError::Config(format!("unknown bank {name}")))
    }

    fn identity_config(&self, name: &str) -> Result<&IdentityConfig> {
        self.identities
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| EbicsError::Config(format!("unknown identity {name}")))
    }

    /// Идентичность без флагов состояния; их хранит хост.
    pub fn identity(&self, name: &str) -> Result<Identity> {
        let cfg = self.identity_config(name)?;
        Ok(Identity {
            name: cfg.name.clone(),
            partner_id: cfg.partner_id.clone(),
            user_id: cfg.user_id.clone(),
            bank: self.bank(&cfg.bank)?.clone(),
            company: cfg.company.clone(),
            start_date: cfg.start_date,
            split_batches: cfg.split_batches,
            intraday_sync: cfg.intraday_sync,
            needs_certificates: cfg.needs_certificates,
            full_name: cfg.full_name.clone(),
            country_code: cfg.country_code.clone(),
            initialized: false,
            bank_keys_activated: false,
            has_stored_passphrase: cfg.passphrase.is_some(),
        })
    }

    pub fn identities(&self) -> Result<Vec<Identity>> {
        self.identities.iter().map(|i| self.identity(&i.name)).collect()
    }

    pub fn passphrases(&self, name: &str) -> Result<Passphrases> {
        let cfg = self.identity_config(name)?;
        let passphrase = cfg.passphrase.as_deref().ok_or_else(|| {
            EbicsError::Config(format!(
                "identity {name}: no passphrase, set EBICS_PASSPHRASE_{}",
                env_suffix(name)
            ))
        })?;
        let mut passphrases = Passphrases::new(passphrase);
        if let Some(signature) = &cfg.signature_passphrase {
            passphrases = passphrases.with_signature(signature.as_str());
        }
        Ok(passphrases)
    }
}
