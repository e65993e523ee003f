//! Адаптеры хоста для CLI: записи в CSV-файл и счета из конфигурации.

use crate::{
    config::AccountConfig,
    error::{EbicsError, Result},
    formats::csv::RecordCsv,
    model::{AccountRef, NormalizedTransactionRecord, RecordId},
    traits::{AccountResolver, ReadFormat, SinkError, TransactionSink},
};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// CSV-файл как приёмник: `create` держит запись до `confirm`, и только
/// подтверждённая запись дописывается в файл. Дубликаты ищутся по
/// `(account, transaction_id)` среди уже записанных строк.
#[derive(Debug)]
pub struct CsvTransactionSink {
    path: PathBuf,
    known: HashSet<(AccountRef, String)>,
    drafts: HashMap<RecordId, NormalizedTransactionRecord>,
    next: u64,
}

impl CsvTransactionSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut known = HashSet::new();
        if path.exists() {
            let records = RecordCsv::read(BufReader::new(File::open(&path)?))?;
            for r in records {
                if let Some(id) = r.transaction_id {
                    known.insert((r.account, id));
                }
            }
            debug!(path = %path.display(), known = known.len(), "CSV sink opened");
        }
        Ok(Self {
            path,
            known,
            drafts: HashMap::new(),
            next: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_known(&self, record: &NormalizedTransactionRecord) -> bool {
        match &record.transaction_id {
            Some(id) => {
                self.known.contains(&(record.account.clone(), id.clone()))
                    || self
                        .drafts
                        .values()
                        .any(|d| d.account == record.account && d.transaction_id.as_ref() == Some(id))
            }
            None => false,
        }
    }
}

impl TransactionSink for CsvTransactionSink {
    fn exists(&self, transaction_id: &str, account: &AccountRef) -> Result<bool> {
        Ok(self
            .known
            .contains(&(account.clone(), transaction_id.to_string())))
    }

    fn create(&mut self, record: &NormalizedTransactionRecord) -> std::result::Result<RecordId, SinkError> {
        if self.is_known(record) {
            return Err(SinkError::UniquenessConflict);
        }
        self.next += 1;
        let id = RecordId(format!("csv-{}", self.next));
        self.drafts.insert(id.clone(), record.clone());
        Ok(id)
    }

    fn confirm(&mut self, id: &RecordId) -> Result<()> {
        let Some(record) = self.drafts.remove(id) else {
            return Err(EbicsError::Sink(format!("unknown record {}", id.0)));
        };
        let header = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        RecordCsv::append(file, std::slice::from_ref(&record), header)?;
        if let Some(tx) = record.transaction_id {
            self.known.insert((record.account, tx));
        }
        Ok(())
    }
}

fn normalize_iban(iban: &str) -> String {
    iban.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Счета из `[[accounts]]`; выключенные не находятся.
#[derive(Debug, Clone, Default)]
pub struct AccountTable {
    accounts: Vec<AccountConfig>,
}

impl AccountTable {
    pub fn new(accounts: Vec<AccountConfig>) -> Self {
        Self { accounts }
    }
}

impl AccountResolver for AccountTable {
    fn resolve(&self, iban: &str, company: &str, bank: &str) -> Option<AccountRef> {
        let iban = normalize_iban(iban);
        self.accounts
            .iter()
            .find(|a| a.enabled && a.company == company && a.bank == bank && normalize_iban(&a.iban) == iban)
            .map(|a| AccountRef(a.account.clone()))
    }
}
