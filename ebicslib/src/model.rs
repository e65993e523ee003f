//! Доменные модели: идентичность EBICS-пользователя, выписки и
//! нормализованные записи для хоста.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DebitCredit {
    Debit,
    Credit,
}

impl DebitCredit {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "CRDT" => Some(DebitCredit::Credit),
            "DBIT" => Some(DebitCredit::Debit),
            _ => None,
        }
    }
}

/// Сумма со знаком: списания отрицательные.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Amount {
    pub value: Decimal,
    pub currency: String,
}

/// Статус записи (`Ntry/Sts`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxStatus {
    Booked,
    Pending,
    Info,
    Other(String),
}

impl TxStatus {
    pub fn from_code(code: &str) -> Self {
        match code {
            "BOOK" => TxStatus::Booked,
            "PDNG" => TxStatus::Pending,
            "INFO" => TxStatus::Info,
            other => TxStatus::Other(other.to_string()),
        }
    }

    pub fn is_booked(&self) -> bool {
        matches!(self, TxStatus::Booked)
    }
}

/// Имена сторон, собранные из любых вариантов схемы (`Dbtr/Nm`,
/// `Dbtr/Pty/Nm`, ...). Используется только как запасной источник имени
/// для подтранзакций и не гарантирует точность.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartyDetail {
    pub cdt_dbt_ind: Option<DebitCredit>,
    pub debtor_name: Option<String>,
    pub creditor_name: Option<String>,
}

impl PartyDetail {
    /// CRDT → имя плательщика, иначе имя получателя.
    pub fn counterparty_name(&self) -> Option<&str> {
        match self.cdt_dbt_ind {
            Some(DebitCredit::Credit) => self.debtor_name.as_deref(),
            _ => self.creditor_name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub value_date: Option<NaiveDate>,
    pub amount: Amount,
    pub counterparty_iban: Option<String>,
    pub counterparty_name: Option<String>,
    pub purpose: Vec<String>,
    pub end_to_end_reference: Option<String>,
    /// `AcctSvcrRef`
    pub bank_reference: Option<String>,
    /// `Refs/TxId` из сырого документа.
    pub tx_id: Option<String>,
    pub status: Option<TxStatus>,
    pub is_batch: bool,
    pub batch_size: Option<u32>,
    pub is_sub_transaction: bool,
    pub parties: PartyDetail,
    pub sub_transactions: Vec<Transaction>,
}

impl Transaction {
    /// Ключ дедупликации: ссылка банка, иначе `TxId` документа.
    pub fn bank_transaction_id(&self) -> Option<&str> {
        self.bank_reference
            .as_deref()
            .or(self.tx_id.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Пакет можно разбить, только если есть детали больше чем по одной
    /// платёжке.
    pub fn has_split_detail(&self) -> bool {
        self.is_batch && self.batch_size != Some(1) && self.sub_transactions.len() > 1
    }

    pub fn description(&self) -> String {
        self.purpose.join("\n")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentKind {
    /// Внутридневной отчёт (C52).
    Camt052,
    /// Проведённая выписка (C53).
    Camt053,
    /// Детализация пакетов (C54).
    Camt054,
}

/// Один документ CAMT.052/053 по одному IBAN; пакеты уже дополнены
/// деталями из парного camt.054.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDocument {
    pub key: String,
    pub kind: DocumentKind,
    pub iban: String,
    pub statement_id: Option<String>,
    pub transactions: Vec<Transaction>,
}

/// Включительный диапазон дат для C52/C53/C54.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityRef(pub String);

impl std::fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef(pub String);

impl std::fmt::Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

/// Банк: имя записи хоста, EBICS Host ID и URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankEndpoint {
    pub name: String,
    pub host_id: String,
    pub url: String,
    /// Отображаемое имя для INI-письма.
    #[serde(default)]
    pub bank_name: Option<String>,
}

/// Запись EBICS-пользователя у хоста. Связка (bank, partner_id, user_id)
/// уникальна; ключи лежат в `KeyringStore` под `reference()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub partner_id: String,
    pub user_id: String,
    pub bank: BankEndpoint,
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
    /// Ключи отправлены в банк (INI + HIA).
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub bank_keys_activated: bool,
    #[serde(default)]
    pub has_stored_passphrase: bool,
}

impl Identity {
    pub fn reference(&self) -> IdentityRef {
        IdentityRef(self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IdentityState {
    Unregistered,
    KeysGenerated,
    CertificatesIssued,
    KeysSent,
    BankKeysDownloaded,
    BankKeysActivated,
}

/// Пароли ключей; в блоб ключей не попадают.
#[derive(Clone)]
pub struct Passphrases {
    pub passphrase: SecretString,
    /// Пароль подписи A005; без него используется основной.
    pub signature: Option<SecretString>,
}

impl Passphrases {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: SecretString::new(passphrase.into()),
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(SecretString::new(signature.into()));
        self
    }
}

impl std::fmt::Debug for Passphrases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrases")
            .field("signature", &self.signature.is_some())
            .finish_non_exhaustive()
    }
}

/// Запись для хоста: одна на конечную транзакцию.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedTransactionRecord {
    pub date: NaiveDate,
    pub account: AccountRef,
    pub company: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub deposit: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub withdrawal: Decimal,
    pub currency: String,
    pub description: String,
    pub reference_number: Option<String>,
    pub transaction_id: Option<String>,
    pub party_iban: Option<String>,
    pub party_name: Option<String>,
}
