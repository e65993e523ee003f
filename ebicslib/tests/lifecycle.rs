mod common;

use common::*;
use ebicslib::{
    admin::{AdminClient, AdminTransport, Registration, UserRegistration},
    error::{EbicsError, Result},
    ini_letter::Language,
    keyring::KeyCreation,
    lifecycle::IdentityLifecycleManager,
    model::{Identity, IdentityRef, IdentityState, Passphrases},
    traits::KeyringStore,
};
use std::sync::{Arc, Mutex};

/// Бэкенд, который помнит зарегистрированных пользователей.
#[derive(Default, Clone)]
struct Backend(Arc<Mutex<Vec<String>>>);

impl AdminTransport for Backend {
    fn register(&self, user: &UserRegistration<'_>) -> Result<u16> {
        let mut users = self.0.lock().unwrap();
        if users.iter().any(|u| u == user.user_id) {
            return Ok(402);
        }
        users.push(user.user_id.to_string());
        Ok(201)
    }

    fn remove(&self, user: &UserRegistration<'_>) -> Result<u16> {
        let mut users = self.0.lock().unwrap();
        let before = users.len();
        users.retain(|u| u != user.user_id);
        Ok(if users.len() < before { 204 } else { 404 })
    }
}

fn identity() -> Identity {
    Identity {
        name: "acme-main".into(),
        partner_id: "PARTNER1".into(),
        user_id: "USER1".into(),
        bank: endpoint(),
        company: COMPANY.into(),
        start_date: None,
        split_batches: false,
        intraday_sync: false,
        needs_certificates: false,
        full_name: None,
        country_code: None,
        initialized: false,
        bank_keys_activated: false,
        has_stored_passphrase: true,
    }
}

#[test]
fn second_key_creation_changes_nothing() {
    let store = store_with_keys("acme-main");
    let before = store.load(&IdentityRef("acme-main".into())).unwrap();
    let mut manager = IdentityLifecycleManager::new(
        identity(),
        store.clone(),
        Passphrases::new("pw"),
        Arc::new(FakeBank::default()),
    );

    assert_eq!(manager.create_user_keys().unwrap(), KeyCreation::AlreadyPresent);
    assert_eq!(store.load(&IdentityRef("acme-main".into())).unwrap(), before);
    assert_eq!(manager.state().unwrap(), IdentityState::KeysGenerated);
}

#[test]
fn onboarding_and_offboarding() {
    let backend = Backend::default();
    let bank = Arc::new(FakeBank::default());
    let mut manager = IdentityLifecycleManager::new(
        identity(),
        store_with_keys("acme-main"),
        Passphrases::new("pw"),
        bank.clone(),
    )
    .with_admin(AdminClient::new(backend.clone()));

    assert_eq!(manager.register_identity().unwrap(), Registration::Registered);
    assert_eq!(manager.register_identity().unwrap(), Registration::AlreadyRegistered);

    let letter = manager.initialize("Testbank AG", Language::En).unwrap();
    assert!(letter.starts_with(b"%PDF"));
    assert!(manager.identity().initialized);
    assert_eq!(manager.state().unwrap(), IdentityState::KeysSent);

    // HPB ещё не пришёл: активировать нечего
    assert!(manager.download_bank_keys().unwrap_err().is_retryable());
    assert!(matches!(manager.activate_bank_keys(), Err(EbicsError::InvalidState(_))));
    assert!(!manager.identity().bank_keys_activated);

    manager.deregister_identity().unwrap();
    assert!(matches!(
        manager.deregister_identity(),
        Err(EbicsError::DeregistrationFailed { status: 404 })
    ));
    assert!(backend.0.lock().unwrap().is_empty());
    assert!(bank.downloads().is_empty());
}
