//! Регистрация EBICS-пользователей в административном бэкенде
//! (лицензирование пользователей на стороне поставщика).

use crate::error::{AdminConflict, EbicsError, Result};
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserRegistration<'a> {
    pub host_id: &'a str,
    pub partner_id: &'a str,
    pub user_id: &'a str,
}

/// Транспорт бэкенда. Возвращает HTTP-статус; сетевые сбои: ошибка.
pub trait AdminTransport: Send + Sync {
    fn register(&self, user: &UserRegistration<'_>) -> Result<u16>;

    fn remove(&self, user: &UserRegistration<'_>) -> Result<u16>;
}

pub struct ReqwestAdmin {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl ReqwestAdmin {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_secret,
        })
    }

    fn users_url(&self) -> String {
        format!("{}/ebics/users", self.base_url)
    }

    fn authorization(&self) -> String {
        format!("token {}:{}", self.api_key, self.api_secret.expose_secret())
    }
}

impl AdminTransport for ReqwestAdmin {
    fn register(&self, user: &UserRegistration<'_>) -> Result<u16> {
        let resp = self
            .client
            .post(self.users_url())
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(user)
            .send()?;
        Ok(resp.status().as_u16())
    }

    fn remove(&self, user: &UserRegistration<'_>) -> Result<u16> {
        let resp = self
            .client
            .delete(self.users_url())
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(user)
            .send()?;
        Ok(resp.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// 402: пользователь уже зарегистрирован за этим клиентом.
    AlreadyRegistered,
}

pub struct AdminClient {
    transport: Box<dyn AdminTransport>,
}

impl AdminClient {
    pub fn new(transport: impl AdminTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Идемпотентна: повторная регистрация: `AlreadyRegistered`.
    pub fn register(&self, user: &UserRegistration<'_>) -> Result<Registration> {
        let status = self.transport.register(user)?;
        let outcome = match status {
            200..=299 => Registration::Registered,
            402 => Registration::AlreadyRegistered,
            403 => return Err(EbicsError::Admin(AdminConflict::UserLimitExceeded)),
            409 => return Err(EbicsError::Admin(AdminConflict::UserIdUnavailable)),
            status => return Err(EbicsError::Http { status }),
        };
        info!(host = user.host_id, partner = user.partner_id, user = user.user_id, ?outcome, "EBICS user registration");
        Ok(outcome)
    }

    /// Любой не-2xx, включая 404, ошибка.
    pub fn deregister(&self, user: &UserRegistration<'_>) -> Result<()> {
        let status = self.transport.remove(user)?;
        if !(200..=299).contains(&status) {
            warn!(host = user.host_id, user = user.user_id, status, "failed to remove EBICS user registration");
            return Err(EbicsError::DeregistrationFailed { status });
        }
        info!(host = user.host_id, partner = user.partner_id, user = user.user_id, "EBICS user registration removed");
        Ok(())
    }
}
