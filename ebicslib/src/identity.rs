//! `CryptoIdentity`: связка ключей одного partner/user с паролями и
//! сквозной записью в `KeyringStore` при каждом изменении.

use crate::{
    certificate::{self, Subject},
    error::Result,
    keyring::{BankKeyPair, KeyCreation, KeyVersion, Keyring},
    model::{IdentityRef, Passphrases},
    traits::KeyringStore,
};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use tracing::debug;

pub struct CryptoIdentity {
    reference: IdentityRef,
    keyring: Keyring,
    store: Arc<dyn KeyringStore>,
    passphrases: Passphrases,
}

impl CryptoIdentity {
    /// Загружает связку из хранилища; нет блоба: пустая связка.
    pub fn open(
        reference: IdentityRef,
        store: Arc<dyn KeyringStore>,
        passphrases: Passphrases,
    ) -> Result<Self> {
        let keyring = match store.load(&reference)? {
            Some(blob) => Keyring::from_blob(&blob)?,
            None => Keyring::new(),
        };
        debug!(identity = %reference, keys = keyring.has_user_keys(), "opened keyring");
        Ok(Self {
            reference,
            keyring,
            store,
            passphrases,
        })
    }

    pub fn reference(&self) -> &IdentityRef {
        &self.reference
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    fn persist(&self) -> Result<()> {
        let blob = self.keyring.to_blob()?;
        self.store.save(&self.reference, &blob)
    }

    pub fn create_keys(&mut self, bits: usize) -> Result<KeyCreation> {
        let outcome = self.keyring.generate(bits, &self.passphrases)?;
        if outcome == KeyCreation::Created {
            self.persist()?;
        }
        Ok(outcome)
    }

    /// Сертификаты для всех трёх ключей.
    pub fn create_certificates(&mut self, subject: &Subject) -> Result<()> {
        let mut ring = self.keyring.clone();
        for (serial, version) in (1u32..).zip(KeyVersion::ALL) {
            let key = ring.private_key(version, &self.passphrases)?;
            let der = certificate::self_signed(&key, subject, serial)?;
            ring.set_certificate(version, &der)?;
        }
        // либо все три, либо ни одного
        self.keyring = ring;
        self.persist()
    }

    pub fn public_key(&self, version: KeyVersion) -> Result<RsaPublicKey> {
        self.keyring.public_key(version)
    }

    pub fn private_key(&self, version: KeyVersion) -> Result<RsaPrivateKey> {
        self.keyring.private_key(version, &self.passphrases)
    }

    pub fn certificate(&self, version: KeyVersion) -> Result<Option<Vec<u8>>> {
        self.keyring.certificate(version)
    }

    pub fn bank_keys(&self, host_id: &str) -> Result<Option<BankKeyPair>> {
        self.keyring.bank_keys(host_id)
    }

    pub fn stage_bank_keys(
        &mut self,
        host_id: &str,
        authentication: &RsaPublicKey,
        encryption: &RsaPublicKey,
    ) -> Result<()> {
        self.keyring
            .stage_bank_keys(host_id, authentication, encryption)?;
        self.persist()
    }

    pub fn activate_bank_keys(&mut self, host_id: &str) -> Result<()> {
        self.keyring.activate_bank_keys(host_id)?;
        self.persist()
    }
}

impl std::fmt::Debug for CryptoIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoIdentity")
            .field("reference", &self.reference)
            .field("has_user_keys", &self.keyring.has_user_keys())
            .finish_non_exhaustive()
    }
}
