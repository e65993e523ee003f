//! CSV нормализованных записей, заголовки:
//! date,account,company,deposit,withdrawal,currency,description,reference_number,transaction_id,party_iban,party_name

use crate::{
    error::{EbicsError, Result},
    model::{AccountRef, NormalizedTransactionRecord},
    traits::{ReadFormat, WriteFormat},
};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;
use std::io::{BufRead, Write};

#[derive(serde::Deserialize)]
struct CsvRow {
    date: String,
    account: String,
    company: String,
    deposit: String,
    withdrawal: String,
    currency: String,
    description: String,
    reference_number: Option<String>,
    transaction_id: Option<String>,
    party_iban: Option<String>,
    party_name: Option<String>,
}

#[derive(serde::Serialize)]
struct CsvOutRow<'a> {
    date: String,
    account: &'a str,
    company: &'a str,
    deposit: String,
    withdrawal: String,
    currency: &'a str,
    description: &'a str,
    reference_number: &'a Option<String>,
    transaction_id: &'a Option<String>,
    party_iban: &'a Option<String>,
    party_name: &'a Option<String>,
}

impl<'a> From<&'a NormalizedTransactionRecord> for CsvOutRow<'a> {
    fn from(r: &'a NormalizedTransactionRecord) -> Self {
        CsvOutRow {
            date: r.date.format("%Y-%m-%d").to_string(),
            account: &r.account.0,
            company: &r.company,
            deposit: r.deposit.to_string(),
            withdrawal: r.withdrawal.to_string(),
            currency: &r.currency,
            description: &r.description,
            reference_number: &r.reference_number,
            transaction_id: &r.transaction_id,
            party_iban: &r.party_iban,
            party_name: &r.party_name,
        }
    }
}

fn amount(field: &str, value: &str) -> Result<Decimal> {
    value
        .parse()
        .map_err(|e| EbicsError::Parse(format!("{field}: {e}")))
}

pub struct RecordCsv;

impl RecordCsv {
    /// Дописывает записи в уже открытый поток; заголовок только по запросу.
    pub fn append<W: Write>(w: W, records: &[NormalizedTransactionRecord], header: bool) -> Result<()> {
        let mut wrt = WriterBuilder::new().has_headers(header).from_writer(w);
        for r in records {
            wrt.serialize(CsvOutRow::from(r))?;
        }
        wrt.flush()?;
        Ok(())
    }
}

impl ReadFormat for RecordCsv {
    type Output = Vec<NormalizedTransactionRecord>;

    fn read<R: BufRead>(r: R) -> Result<Self::Output> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(r);
        let mut records = Vec::new();
        for rec in rdr.deserialize::<CsvRow>() {
            let row = rec?;
            records.push(NormalizedTransactionRecord {
                date: NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
                    .map_err(|e| EbicsError::Parse(format!("date: {e}")))?,
                account: AccountRef(row.account),
                company: row.company,
                deposit: amount("deposit", &row.deposit)?,
                withdrawal: amount("withdrawal", &row.withdrawal)?,
                currency: row.currency,
                description: row.description,
                reference_number: row.reference_number.filter(|s| !s.is_empty()),
                transaction_id: row.transaction_id.filter(|s| !s.is_empty()),
                party_iban: row.party_iban.filter(|s| !s.is_empty()),
                party_name: row.party_name.filter(|s| !s.is_empty()),
            });
        }
        Ok(records)
    }
}

impl WriteFormat for RecordCsv {
    type Input = [NormalizedTransactionRecord];

    fn write<W: Write>(w: W, records: &Self::Input) -> Result<()> {
        Self::append(w, records, true)
    }
}
