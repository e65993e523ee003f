//! Жизненный цикл EBICS-пользователя: ключи, сертификаты, отправка в
//! банк, INI-письмо, ключи банка и регистрация у поставщика.
//!
//! Состояние выводится из содержимого связки ключей и флагов `Identity`;
//! флаги меняются только после успешного шага, и хост сохраняет
//! `identity()` после каждого вызова.

use crate::{
    admin::{AdminClient, Registration, UserRegistration},
    certificate::Subject,
    error::{EbicsError, Result},
    identity::CryptoIdentity,
    ini_letter::{IniLetter, Language},
    keyring::{KeyCreation, DEFAULT_KEY_BITS},
    model::{Identity, IdentityState, Passphrases},
    protocol::Channel,
    session::{BankKeys, ProtocolSession},
    traits::KeyringStore,
};
use chrono::Local;
use std::sync::Arc;
use tracing::info;

pub struct IdentityLifecycleManager {
    identity: Identity,
    store: Arc<dyn KeyringStore>,
    passphrases: Passphrases,
    channel: Arc<dyn Channel>,
    admin: Option<AdminClient>,
    key_bits: usize,
}

impl IdentityLifecycleManager {
    pub fn new(
        identity: Identity,
        store: Arc<dyn KeyringStore>,
        passphrases: Passphrases,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            identity,
            store,
            passphrases,
            channel,
            admin: None,
            key_bits: DEFAULT_KEY_BITS,
        }
    }

    pub fn with_admin(mut self, admin: AdminClient) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Только для тестов: длинные ключи генерируются долго.
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.key_bits = bits;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn into_identity(self) -> Identity {
        self.identity
    }

    fn crypto(&self) -> Result<CryptoIdentity> {
        CryptoIdentity::open(
            self.identity.reference(),
            self.store.clone(),
            self.passphrases.clone(),
        )
    }

    /// Сессия с текущей связкой ключей из хранилища.
    pub fn session(&self) -> Result<ProtocolSession> {
        ProtocolSession::new(
            self.crypto()?,
            self.identity.partner_id.clone(),
            self.identity.user_id.clone(),
            self.identity.bank.clone(),
            self.channel.clone(),
        )
    }

    pub fn state(&self) -> Result<IdentityState> {
        let crypto = self.crypto()?;
        let ring = crypto.keyring();
        let bank = crypto.bank_keys(&self.identity.bank.host_id)?;
        Ok(if self.identity.bank_keys_activated || bank.as_ref().is_some_and(|k| k.activated) {
            IdentityState::BankKeysActivated
        } else if bank.is_some() {
            IdentityState::BankKeysDownloaded
        } else if self.identity.initialized {
            IdentityState::KeysSent
        } else if ring.has_certificates() {
            IdentityState::CertificatesIssued
        } else if ring.has_user_keys() {
            IdentityState::KeysGenerated
        } else {
            IdentityState::Unregistered
        })
    }

    pub fn create_user_keys(&mut self) -> Result<KeyCreation> {
        let outcome = self.crypto()?.create_keys(self.key_bits)?;
        info!(identity = %self.identity.name, ?outcome, "user keys");
        Ok(outcome)
    }

    /// Код страны проверяется до любой криптографии.
    pub fn create_user_certificates(
        &mut self,
        common_name: &str,
        organization: &str,
        country_code: &str,
    ) -> Result<()> {
        let subject = Subject::new(common_name, organization, country_code)?;
        self.crypto()?.create_certificates(&subject)?;
        info!(identity = %self.identity.name, "user certificates issued");
        Ok(())
    }

    /// INI + HIA; `initialized` ставится только при полном успехе.
    pub fn send_keys_to_bank(&mut self) -> Result<()> {
        self.session()?.send_keys()?;
        self.identity.initialized = true;
        Ok(())
    }

    pub fn create_ini_letter(&self, bank_name: &str, language: Language) -> Result<Vec<u8>> {
        let crypto = self.crypto()?;
        IniLetter::new(
            &crypto,
            bank_name,
            &self.identity.user_id,
            &self.identity.partner_id,
            &self.identity.bank.host_id,
            language,
            Local::now(),
        )?
        .to_pdf()
    }

    pub fn download_bank_keys(&mut self) -> Result<BankKeys> {
        self.session()?.download_bank_keys()
    }

    /// Пользователь сверил отпечатки с письмом банка.
    pub fn activate_bank_keys(&mut self) -> Result<()> {
        self.session()?.activate_bank_keys()?;
        self.identity.bank_keys_activated = true;
        Ok(())
    }

    pub fn permitted_order_types(&self, level: &str) -> Result<Vec<String>> {
        self.session()?.permitted_order_types(level)
    }

    /// Ключи (уже существующие не мешают), сертификаты если банк их
    /// требует, INI/HIA и INI-письмо.
    pub fn initialize(&mut self, bank_name: &str, language: Language) -> Result<Vec<u8>> {
        if self.create_user_keys()? == KeyCreation::AlreadyPresent {
            info!(identity = %self.identity.name, "reusing existing user keys");
        }

        if self.identity.needs_certificates {
            let common_name = self
                .identity
                .full_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| {
                    EbicsError::Validation("the bank requires certificates: full name is missing".into())
                })?;
            let country = self
                .identity
                .country_code
                .as_deref()
                .map(|c| c.trim().to_ascii_uppercase())
                .ok_or_else(|| {
                    EbicsError::Validation("the bank requires certificates: country code is missing".into())
                })?;
            let company = self.identity.company.clone();
            self.create_user_certificates(&common_name, &company, &country)?;
        }

        self.send_keys_to_bank()?;
        self.create_ini_letter(bank_name, language)
    }

    fn registration(&self) -> UserRegistration<'_> {
        UserRegistration {
            host_id: &self.identity.bank.host_id,
            partner_id: &self.identity.partner_id,
            user_id: &self.identity.user_id,
        }
    }

    fn admin(&self) -> Result<&AdminClient> {
        self.admin
            .as_ref()
            .ok_or_else(|| EbicsError::Config("admin backend is not configured".into()))
    }

    pub fn register_identity(&self) -> Result<Registration> {
        self.admin()?.register(&self.registration())
    }

    pub fn deregister_identity(&self) -> Result<()> {
        self.admin()?.deregister(&self.registration())
    }
}
