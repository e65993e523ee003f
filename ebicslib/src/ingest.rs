//! Разбор выписок в нормализованные записи хоста.
//!
//! Документ без известного счёта или с ошибкой разбора пропускается с
//! диагностикой; дальнейшие документы обрабатываются. Ошибка приёмника,
//! кроме конфликта уникальности, прерывает весь прогон.

use crate::{
    error::{EbicsError, Result},
    model::{AccountRef, Identity, NormalizedTransactionRecord, StatementDocument, Transaction},
    traits::{AccountResolver, DiagnosticContext, Diagnostics, Severity, SinkError, TransactionSink},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Имя идентичности для контекста диагностики.
    pub identity: String,
    pub company: String,
    pub bank: String,
    pub start_date: Option<NaiveDate>,
    pub split_batches: bool,
}

impl PipelineConfig {
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            identity: identity.name.clone(),
            company: identity.company.clone(),
            bank: identity.bank.name.clone(),
            start_date: identity.start_date,
            split_batches: identity.split_batches,
        }
    }
}

/// Счётчики одного прогона.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub skipped_documents: usize,
    pub created: usize,
    pub duplicates: usize,
    pub filtered_status: usize,
    pub filtered_date: usize,
    pub conflicts: usize,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.documents += other.documents;
        self.skipped_documents += other.skipped_documents;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.filtered_status += other.filtered_status;
        self.filtered_date += other.filtered_date;
        self.conflicts += other.conflicts;
    }
}

pub struct StatementIngestionPipeline<'a> {
    config: PipelineConfig,
    resolver: &'a dyn AccountResolver,
    sink: &'a mut dyn TransactionSink,
    diagnostics: &'a dyn Diagnostics,
}

impl<'a> StatementIngestionPipeline<'a> {
    pub fn new(
        config: PipelineConfig,
        resolver: &'a dyn AccountResolver,
        sink: &'a mut dyn TransactionSink,
        diagnostics: &'a dyn Diagnostics,
    ) -> Self {
        Self {
            config,
            resolver,
            sink,
            diagnostics,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &'a dyn Diagnostics {
        self.diagnostics
    }

    /// Выбирает поток до конца, если не случилась фатальная ошибка приёмника.
    pub fn ingest<I>(&mut self, documents: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = Result<StatementDocument>>,
    {
        let mut report = IngestReport::default();
        for document in documents {
            match document {
                Ok(doc) => self.ingest_document(&doc, &mut report)?,
                Err(e) => {
                    report.skipped_documents += 1;
                    self.diagnostics.record(
                        Severity::Error,
                        &format!("could not read statement: {e}"),
                        &DiagnosticContext::identity(&self.config.identity),
                    );
                }
            }
        }
        debug!(identity = %self.config.identity, ?report, "ingestion finished");
        Ok(report)
    }

    fn ingest_document(&mut self, doc: &StatementDocument, report: &mut IngestReport) -> Result<()> {
        let Some(account) = self
            .resolver
            .resolve(&doc.iban, &self.config.company, &self.config.bank)
        else {
            report.skipped_documents += 1;
            self.diagnostics.record(
                Severity::Warning,
                &format!(
                    "no enabled account of {} at {} for IBAN {}",
                    self.config.company, self.config.bank, doc.iban
                ),
                &DiagnosticContext::identity(&self.config.identity)
                    .with_document(&doc.key)
                    .with_iban(&doc.iban),
            );
            return Ok(());
        };
        report.documents += 1;

        for tx in &doc.transactions {
            // запись без статуса считается проведённой
            if tx.status.as_ref().is_some_and(|s| !s.is_booked()) {
                report.filtered_status += 1;
                continue;
            }
            if self.config.split_batches && tx.has_split_detail() {
                for sub in &tx.sub_transactions {
                    self.ingest_transaction(sub, &account, report)?;
                }
            } else {
                self.ingest_transaction(tx, &account, report)?;
            }
        }
        Ok(())
    }

    fn ingest_transaction(
        &mut self,
        tx: &Transaction,
        account: &AccountRef,
        report: &mut IngestReport,
    ) -> Result<()> {
        if let Some(id) = tx.bank_transaction_id() {
            if self.sink.exists(id, account)? {
                report.duplicates += 1;
                return Ok(());
            }
        }
        if self.config.start_date.is_some_and(|start| tx.date < start) {
            report.filtered_date += 1;
            return Ok(());
        }

        let record = normalize(tx, account, &self.config.company);
        match self.sink.create(&record) {
            Ok(id) => {
                self.sink.confirm(&id)?;
                report.created += 1;
            }
            Err(SinkError::UniquenessConflict) => {
                debug!(transaction_id = ?record.transaction_id, "record created concurrently");
                report.conflicts += 1;
            }
            Err(SinkError::Other(msg)) => return Err(EbicsError::Sink(msg)),
        }
        Ok(())
    }
}

/// Положительная сумма идёт в приход, отрицательная в расход по модулю.
pub fn normalize(tx: &Transaction, account: &AccountRef, company: &str) -> NormalizedTransactionRecord {
    let value = tx.amount.value;
    let party_name = tx.counterparty_name.clone().or_else(|| {
        if tx.is_sub_transaction {
            tx.parties.counterparty_name().map(str::to_string)
        } else {
            None
        }
    });
    NormalizedTransactionRecord {
        date: tx.date,
        account: account.clone(),
        company: company.to_string(),
        deposit: value.max(Decimal::ZERO),
        withdrawal: value.min(Decimal::ZERO).abs(),
        currency: tx.amount.currency.clone(),
        description: tx.description(),
        reference_number: tx.end_to_end_reference.clone(),
        transaction_id: tx.bank_transaction_id().map(str::to_string),
        party_iban: tx.counterparty_iban.clone(),
        party_name,
    }
}
