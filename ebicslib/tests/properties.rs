mod common;

use chrono::{Duration, NaiveDate};
use common::*;
use ebicslib::{
    diagnostics::CollectingDiagnostics,
    ingest::{normalize, PipelineConfig, StatementIngestionPipeline},
    model::{AccountRef, Amount, DocumentKind, PartyDetail, StatementDocument, Transaction, TxStatus},
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn tx(n: usize, cents: i64, offset: i64) -> Transaction {
    Transaction {
        date: base() + Duration::days(offset),
        value_date: None,
        amount: Amount {
            value: Decimal::new(cents, 2),
            currency: "EUR".into(),
        },
        counterparty_iban: None,
        counterparty_name: None,
        purpose: Vec::new(),
        end_to_end_reference: None,
        bank_reference: Some(format!("REF-{n}")),
        tx_id: None,
        status: Some(TxStatus::Booked),
        is_batch: false,
        batch_size: None,
        is_sub_transaction: false,
        parties: PartyDetail::default(),
        sub_transactions: Vec::new(),
    }
}

proptest! {
    #[test]
    fn deposit_and_withdrawal_are_exclusive(cents in -10_000_000i64..10_000_000) {
        let record = normalize(&tx(0, cents, 0), &AccountRef("A".into()), COMPANY);
        prop_assert!(record.deposit >= Decimal::ZERO);
        prop_assert!(record.withdrawal >= Decimal::ZERO);
        prop_assert!(record.deposit.is_zero() || record.withdrawal.is_zero());
        prop_assert_eq!(record.deposit - record.withdrawal, Decimal::new(cents, 2));
    }

    #[test]
    fn nothing_before_start_date_is_created(
        offsets in prop::collection::vec(0i64..60, 1..20),
        start in 0i64..60,
    ) {
        let transactions: Vec<_> = offsets
            .iter()
            .enumerate()
            .map(|(n, &o)| tx(n, 100, o))
            .collect();
        let doc = StatementDocument {
            key: "s.xml".into(),
            kind: DocumentKind::Camt053,
            iban: IBAN.into(),
            statement_id: None,
            transactions,
        };
        let start_date = base() + Duration::days(start);
        let accounts = accounts();
        let diagnostics = CollectingDiagnostics::new();
        let mut sink = MemorySink::default();
        let config = PipelineConfig {
            identity: "acme-main".into(),
            company: COMPANY.into(),
            bank: BANK.into(),
            start_date: Some(start_date),
            split_batches: false,
        };
        let report = StatementIngestionPipeline::new(config, &accounts, &mut sink, &diagnostics)
            .ingest(vec![Ok(doc)])
            .unwrap();

        let expected = offsets.iter().filter(|&&o| o >= start).count();
        prop_assert_eq!(report.created, expected);
        prop_assert_eq!(report.filtered_date, offsets.len() - expected);
        prop_assert!(sink.records.iter().all(|r| r.date >= start_date));
    }
}
