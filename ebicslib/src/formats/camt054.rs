//! Индекс деталей пакетов из camt.054 (C54).

use crate::{
    error::{EbicsError, Result},
    formats::camt::{Camt, RawEntry, RawTxDetail},
    model::{DebitCredit, DocumentKind},
    traits::ReadFormat,
};
use std::collections::HashMap;
use std::io::BufRead;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub cdt_dbt_ind: Option<DebitCredit>,
    pub details: Vec<RawTxDetail>,
}

/// Записи уведомления по ключам пакета: `Btch/PmtInfId`, `Btch/MsgId`,
/// `AcctSvcrRef`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDetails {
    by_key: HashMap<String, BatchEntry>,
}

pub struct Camt054;

impl ReadFormat for Camt054 {
    type Output = BatchDetails;

    fn read<R: BufRead>(r: R) -> Result<BatchDetails> {
        let msg = Camt::read(r)?;
        if msg.kind != DocumentKind::Camt054 {
            return Err(EbicsError::Parse(format!(
                "expected camt.054, got {:?}",
                msg.kind
            )));
        }
        let mut out = BatchDetails::default();
        for entry in msg.reports.into_iter().flat_map(|r| r.entries) {
            out.insert(entry);
        }
        Ok(out)
    }
}

impl BatchDetails {
    pub fn from_bytes(xml: &[u8]) -> Result<Self> {
        Camt054::read(xml)
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    fn insert(&mut self, entry: RawEntry) {
        if entry.details.is_empty() {
            return;
        }
        let keys: Vec<String> = entry.batch_keys().map(str::to_string).collect();
        let batch = BatchEntry {
            cdt_dbt_ind: entry.cdt_dbt_ind,
            details: entry.details,
        };
        for key in keys {
            self.by_key.entry(key).or_insert_with(|| batch.clone());
        }
    }

    /// Детали для записи выписки, если какой-то из её ключей совпал.
    pub fn lookup(&self, entry: &RawEntry) -> Option<&BatchEntry> {
        entry.batch_keys().find_map(|k| self.by_key.get(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_by_payment_info_and_servicer_ref() {
        let xml = r#"<Document><BkToCstmrDbtCdtNtfctn><Ntfctn>
            <Acct><Id><IBAN>DE02120300000000202051</IBAN></Id></Acct>
            <Ntry>
              <Amt Ccy="EUR">3.00</Amt><CdtDbtInd>DBIT</CdtDbtInd>
              <AcctSvcrRef>SVC-9</AcctSvcrRef>
              <NtryDtls><Btch><PmtInfId>P-1</PmtInfId></Btch>
                <TxDtls><Refs><TxId>A</TxId></Refs></TxDtls>
                <TxDtls><Refs><TxId>B</TxId></Refs></TxDtls>
              </NtryDtls>
            </Ntry>
            <Ntry><Amt Ccy="EUR">1.00</Amt><CdtDbtInd>DBIT</CdtDbtInd></Ntry>
        </Ntfctn></BkToCstmrDbtCdtNtfctn></Document>"#;
        let idx = BatchDetails::from_bytes(xml.as_bytes()).unwrap();
        assert_eq!(idx.len(), 2);

        let probe = RawEntry {
            account_servicer_ref: Some("SVC-9".into()),
            ..Default::default()
        };
        let hit = idx.lookup(&probe).expect("match by AcctSvcrRef");
        assert_eq!(hit.details.len(), 2);
        assert_eq!(hit.cdt_dbt_ind, Some(DebitCredit::Debit));

        let miss = RawEntry {
            batch_pmt_inf_id: Some("P-2".into()),
            ..Default::default()
        };
        assert!(idx.lookup(&miss).is_none());
    }

    #[test]
    fn statement_is_not_a_notification() {
        let xml = r#"<Document><BkToCstmrStmt><Stmt/></BkToCstmrStmt></Document>"#;
        assert!(BatchDetails::from_bytes(xml.as_bytes()).is_err());
    }
}
