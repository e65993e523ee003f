//! Сборка `StatementDocument` из сырых CAMT-записей и парного camt.054.

use crate::{
    error::{EbicsError, Result},
    formats::{
        camt::{Camt, RawEntry, RawTxDetail},
        camt054::BatchDetails,
    },
    model::{Amount, DebitCredit, PartyDetail, StatementDocument, Transaction, TxStatus},
};
use rust_decimal::Decimal;

const NOT_PROVIDED: &str = "NOTPROVIDED";

/// Один XML может нести несколько `Stmt`; каждый становится отдельным
/// документом с ключом `key#n`.
pub fn build_documents(
    key: &str,
    xml: &[u8],
    batch: Option<&BatchDetails>,
) -> Result<Vec<StatementDocument>> {
    let msg = Camt::from_bytes(xml)?;
    let multi = msg.reports.len() > 1;
    let mut docs = Vec::with_capacity(msg.reports.len());
    for (i, report) in msg.reports.into_iter().enumerate() {
        let transactions = report
            .entries
            .iter()
            .map(|e| entry_to_transaction(e, batch))
            .collect::<Result<Vec<_>>>()?;
        docs.push(StatementDocument {
            key: if multi {
                format!("{key}#{}", i + 1)
            } else {
                key.to_string()
            },
            kind: msg.kind,
            iban: report.iban,
            statement_id: report.id,
            transactions,
        });
    }
    Ok(docs)
}

fn signed(value: Decimal, dc: Option<DebitCredit>) -> Decimal {
    match dc {
        Some(DebitCredit::Debit) => -value.abs(),
        _ => value.abs(),
    }
}

/// Имя берётся из `Dbtr/Nm` (.001.02), затем из `Dbtr/Pty/Nm` (.001.08).
fn counterparty(d: &RawTxDetail, dc: Option<DebitCredit>) -> (Option<String>, Option<String>) {
    match dc {
        Some(DebitCredit::Credit) => (
            d.debtor_iban.clone(),
            d.debtor_name.clone().or_else(|| d.parties.debtor_name.clone()),
        ),
        _ => (
            d.creditor_iban.clone(),
            d.creditor_name.clone().or_else(|| d.parties.creditor_name.clone()),
        ),
    }
}

fn purpose_of(d: Option<&RawTxDetail>, entry: &RawEntry) -> Vec<String> {
    if let Some(d) = d {
        if !d.unstructured.is_empty() {
            return d.unstructured.clone();
        }
        if let Some(info) = &d.additional_info {
            return vec![info.clone()];
        }
    }
    entry.additional_info.iter().cloned().collect()
}

fn end_to_end(d: &RawTxDetail) -> Option<String> {
    d.end_to_end_id.clone().filter(|r| r != NOT_PROVIDED)
}

pub(crate) fn entry_to_transaction(
    entry: &RawEntry,
    batch: Option<&BatchDetails>,
) -> Result<Transaction> {
    let date = entry
        .booking_date
        .or(entry.value_date)
        .ok_or_else(|| EbicsError::Parse("entry without booking date".into()))?;
    let dc = entry.cdt_dbt_ind;
    let is_batch = entry.is_batch();
    // для пакета поля одной платёжки не описывают запись целиком
    let single = if entry.details.len() == 1 {
        entry.details.first()
    } else {
        None
    };

    let (counterparty_iban, counterparty_name) = single
        .map(|d| counterparty(d, dc))
        .unwrap_or((None, None));

    let mut tx = Transaction {
        date,
        value_date: entry.value_date,
        amount: Amount {
            value: signed(entry.amount, dc),
            currency: entry.currency.clone(),
        },
        counterparty_iban,
        counterparty_name,
        purpose: purpose_of(single, entry),
        end_to_end_reference: single.and_then(end_to_end),
        bank_reference: entry
            .account_servicer_ref
            .clone()
            .or_else(|| single.and_then(|d| d.account_servicer_ref.clone())),
        tx_id: entry.details.first().and_then(|d| d.tx_id.clone()),
        status: entry.status.as_deref().map(TxStatus::from_code),
        is_batch,
        batch_size: entry.batch_count,
        is_sub_transaction: false,
        parties: single
            .map(|d| PartyDetail {
                cdt_dbt_ind: dc,
                ..d.parties.clone()
            })
            .unwrap_or_default(),
        sub_transactions: Vec::new(),
    };

    if is_batch {
        let (details, batch_dc) = match batch.and_then(|b| b.lookup(entry)) {
            Some(found) => (found.details.as_slice(), found.cdt_dbt_ind.or(dc)),
            None => (entry.details.as_slice(), dc),
        };
        tx.sub_transactions = split(&tx, details, batch_dc);
    }
    Ok(tx)
}

/// Подтранзакции пакета; пусто, если хоть у одной детали нет суммы.
fn split(parent: &Transaction, details: &[RawTxDetail], dc: Option<DebitCredit>) -> Vec<Transaction> {
    if details.len() < 2 {
        return Vec::new();
    }
    let parent_id = parent.bank_transaction_id().map(str::to_string);
    let mut subs = Vec::with_capacity(details.len());
    for (n, d) in details.iter().enumerate() {
        let Some(value) = d.amount else {
            tracing::debug!(index = n, "batch detail without amount, keeping batch whole");
            return Vec::new();
        };
        let dc = d.cdt_dbt_ind.or(dc);
        let (counterparty_iban, counterparty_name) = counterparty(d, dc);
        let tx_id = d.tx_id.clone().or_else(|| {
            if d.account_servicer_ref.is_some() {
                None
            } else {
                parent_id.as_ref().map(|p| format!("{p}-{}", n + 1))
            }
        });
        subs.push(Transaction {
            date: parent.date,
            value_date: parent.value_date,
            amount: Amount {
                value: signed(value, dc),
                currency: d
                    .currency
                    .clone()
                    .unwrap_or_else(|| parent.amount.currency.clone()),
            },
            counterparty_iban,
            counterparty_name,
            purpose: d.unstructured.clone(),
            end_to_end_reference: end_to_end(d),
            bank_reference: d.account_servicer_ref.clone(),
            tx_id,
            status: parent.status.clone(),
            is_batch: false,
            batch_size: None,
            is_sub_transaction: true,
            parties: PartyDetail {
                cdt_dbt_ind: dc,
                ..d.parties.clone()
            },
            sub_transactions: Vec::new(),
        });
    }
    subs
}
