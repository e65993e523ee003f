//! Трэйты чтения форматов и внешних коллабораторов хоста.

use crate::{
    error::Result,
    model::{AccountRef, IdentityRef, NormalizedTransactionRecord, RecordId},
};
use std::io::{BufRead, Write};
use thiserror::Error;

pub trait ReadFormat {
    type Output;

    fn read<R: BufRead>(r: R) -> Result<Self::Output>;
}

pub trait WriteFormat {
    type Input: ?Sized;

    fn write<W: Write>(w: W, data: &Self::Input) -> Result<()>;
}

/// Хранилище сериализованных ключей. Источник истины: `CryptoIdentity`,
/// хранилище только принимает запись при каждом изменении.
pub trait KeyringStore: Send + Sync {
    fn load(&self, identity: &IdentityRef) -> Result<Option<Vec<u8>>>;

    fn save(&self, identity: &IdentityRef, blob: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Гонка с проверкой `exists`: запись уже создана.
    #[error("uniqueness conflict")]
    UniquenessConflict,
    #[error("{0}")]
    Other(String),
}

/// Приёмник нормализованных транзакций. Создание и подтверждение: два шага.
pub trait TransactionSink {
    fn exists(&self, transaction_id: &str, account: &AccountRef) -> Result<bool>;

    fn create(
        &mut self,
        record: &NormalizedTransactionRecord,
    ) -> std::result::Result<RecordId, SinkError>;

    fn confirm(&mut self, id: &RecordId) -> Result<()>;
}

/// IBAN → счёт компании. `None`: нормальный исход, не ошибка.
pub trait AccountResolver {
    /// Только включённые счета, принадлежащие компании, в данном банке.
    fn resolve(&self, iban: &str, company: &str, bank: &str) -> Option<AccountRef>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticContext {
    pub identity: Option<String>,
    pub document: Option<String>,
    pub iban: Option<String>,
}

impl DiagnosticContext {
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            identity: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_document(mut self, key: impl Into<String>) -> Self {
        self.document = Some(key.into());
        self
    }

    pub fn with_iban(mut self, iban: impl Into<String>) -> Self {
        self.iban = Some(iban.into());
        self
    }
}

/// Fire-and-forget: реализация не должна блокировать конвейер.
pub trait Diagnostics {
    fn record(&self, severity: Severity, message: &str, context: &DiagnosticContext);
}
