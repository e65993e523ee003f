//! Чтение CAMT.052/053/054 (ISO 20022) в «сырые» записи.
//!
//! Поддерживаются версии .001.02 и .001.08: статус как `<Sts>BOOK</Sts>`
//! и как `<Sts><Cd>BOOK</Cd></Sts>`, сумма детали как `TxDtls/Amt` и как
//! `AmtDtls/TxAmt/Amt`, стороны как `Dbtr/Nm` и как `Dbtr/Pty/Nm`.

use crate::{
    error::{EbicsError, Result},
    model::{DebitCredit, DocumentKind, PartyDetail},
    traits::ReadFormat,
};
use chrono::NaiveDate;
use quick_xml::{events::Event, Reader};
use rust_decimal::Decimal;
use std::io::BufRead;

/// Детали одной платёжки внутри записи (`NtryDtls/TxDtls`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTxDetail {
    pub account_servicer_ref: Option<String>,
    pub tx_id: Option<String>,
    pub end_to_end_id: Option<String>,
    pub pmt_inf_id: Option<String>,
    pub msg_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub cdt_dbt_ind: Option<DebitCredit>,
    /// `RltdPties/Dbtr/Nm` (.001.02)
    pub debtor_name: Option<String>,
    pub creditor_name: Option<String>,
    pub debtor_iban: Option<String>,
    pub creditor_iban: Option<String>,
    /// Имена из любых вариантов схемы.
    pub parties: PartyDetail,
    pub unstructured: Vec<String>,
    pub additional_info: Option<String>,
}

/// Одна запись `Ntry`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub amount: Decimal,
    pub currency: String,
    pub cdt_dbt_ind: Option<DebitCredit>,
    pub status: Option<String>,
    pub booking_date: Option<NaiveDate>,
    pub value_date: Option<NaiveDate>,
    pub account_servicer_ref: Option<String>,
    pub entry_ref: Option<String>,
    pub additional_info: Option<String>,
    pub batch_count: Option<u32>,
    pub batch_pmt_inf_id: Option<String>,
    pub batch_msg_id: Option<String>,
    pub details: Vec<RawTxDetail>,
}

impl RawEntry {
    /// Ключи для сопоставления пакета с camt.054.
    pub fn batch_keys(&self) -> impl Iterator<Item = &str> {
        [
            self.batch_pmt_inf_id.as_deref(),
            self.batch_msg_id.as_deref(),
            self.account_servicer_ref.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|k| !k.is_empty())
    }

    pub fn is_batch(&self) -> bool {
        self.batch_count.map_or(false, |n| n > 1) || self.details.len() > 1
    }
}

/// `Stmt`, `Rpt` или `Ntfctn`: один счёт.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CamtReport {
    pub id: Option<String>,
    pub iban: String,
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CamtMessage {
    pub kind: DocumentKind,
    pub message_id: Option<String>,
    pub reports: Vec<CamtReport>,
}

pub struct Camt;

impl Camt {
    pub fn from_bytes(xml: &[u8]) -> Result<CamtMessage> {
        Self::read(xml)
    }
}

fn is(rel: &[String], want: &[&str]) -> bool {
    rel.len() == want.len() && rel.iter().zip(want).all(|(a, b)| a == b)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    // DtTm: берём только дату
    let day = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| EbicsError::Parse(format!("date {s}: {e}")))
}

fn parse_amount(s: &str) -> Result<Decimal> {
    Decimal::from_str_exact(s)
        .or_else(|_| s.parse())
        .map_err(|e| EbicsError::Parse(format!("camt amount {s}: {e}")))
}

fn parse_dc(s: &str) -> Result<DebitCredit> {
    DebitCredit::from_code(s).ok_or_else(|| EbicsError::Parse(format!("CdtDbtInd {s}")))
}

fn set_once(slot: &mut Option<String>, text: &str) {
    if slot.is_none() {
        *slot = Some(text.to_string());
    }
}

fn entry_text(rel: &[String], text: &str, ccy: &str, e: &mut RawEntry) -> Result<()> {
    if is(rel, &["Amt"]) {
        e.amount = parse_amount(text)?;
        if !ccy.is_empty() {
            e.currency = ccy.to_string();
        }
    } else if is(rel, &["CdtDbtInd"]) {
        e.cdt_dbt_ind = Some(parse_dc(text)?);
    } else if is(rel, &["Sts"]) || is(rel, &["Sts", "Cd"]) {
        e.status = Some(text.to_string());
    } else if is(rel, &["BookgDt", "Dt"]) || is(rel, &["BookgDt", "DtTm"]) {
        e.booking_date = Some(parse_date(text)?);
    } else if is(rel, &["ValDt", "Dt"]) || is(rel, &["ValDt", "DtTm"]) {
        e.value_date = Some(parse_date(text)?);
    } else if is(rel, &["AcctSvcrRef"]) {
        e.account_servicer_ref = Some(text.to_string());
    } else if is(rel, &["NtryRef"]) {
        e.entry_ref = Some(text.to_string());
    } else if is(rel, &["AddtlNtryInf"]) {
        e.additional_info = Some(text.to_string());
    } else if is(rel, &["NtryDtls", "Btch", "NbOfTxs"]) {
        e.batch_count = Some(
            text.parse()
                .map_err(|err| EbicsError::Parse(format!("NbOfTxs {text}: {err}")))?,
        );
    } else if is(rel, &["NtryDtls", "Btch", "PmtInfId"]) {
        e.batch_pmt_inf_id = Some(text.to_string());
    } else if is(rel, &["NtryDtls", "Btch", "MsgId"]) {
        e.batch_msg_id = Some(text.to_string());
    }
    Ok(())
}

fn detail_text(rel: &[String], text: &str, ccy: &str, d: &mut RawTxDetail) -> Result<()> {
    match rel {
        [r, field] if r == "Refs" => match field.as_str() {
            "AcctSvcrRef" => d.account_servicer_ref = Some(text.to_string()),
            "TxId" => d.tx_id = Some(text.to_string()),
            "EndToEndId" => d.end_to_end_id = Some(text.to_string()),
            "PmtInfId" => d.pmt_inf_id = Some(text.to_string()),
            "MsgId" => d.msg_id = Some(text.to_string()),
            _ => {}
        },
        [a] if a == "Amt" => {
            d.amount = Some(parse_amount(text)?);
            if !ccy.is_empty() {
                d.currency = Some(ccy.to_string());
            }
        }
        [a, t, amt] if a == "AmtDtls" && t == "TxAmt" && amt == "Amt" => {
            if d.amount.is_none() {
                d.amount = Some(parse_amount(text)?);
                if !ccy.is_empty() {
                    d.currency = Some(ccy.to_string());
                }
            }
        }
        [c] if c == "CdtDbtInd" => d.cdt_dbt_ind = Some(parse_dc(text)?),
        [r, u] if r == "RmtInf" && u == "Ustrd" => d.unstructured.push(text.to_string()),
        [a] if a == "AddtlTxInf" => d.additional_info = Some(text.to_string()),
        [r, rest @ ..] if r == "RltdPties" => party_text(rest, text, d),
        _ => {}
    }
    Ok(())
}

fn party_text(rel: &[String], text: &str, d: &mut RawTxDetail) {
    if is(rel, &["Dbtr", "Nm"]) {
        d.debtor_name = Some(text.to_string());
    } else if is(rel, &["Cdtr", "Nm"]) {
        d.creditor_name = Some(text.to_string());
    } else if is(rel, &["DbtrAcct", "Id", "IBAN"]) {
        d.debtor_iban = Some(text.to_string());
    } else if is(rel, &["CdtrAcct", "Id", "IBAN"]) {
        d.creditor_iban = Some(text.to_string());
    }
    // эвристика: любое Nm под Dbtr/Cdtr, независимо от версии схемы
    if rel.last().map(String::as_str) == Some("Nm") && !rel.iter().any(|p| p == "PstlAdr") {
        match rel.first().map(String::as_str) {
            Some("Dbtr") => set_once(&mut d.parties.debtor_name, text),
            Some("Cdtr") => set_once(&mut d.parties.creditor_name, text),
            _ => {}
        }
    }
}

impl ReadFormat for Camt {
    type Output = CamtMessage;

    fn read<R: BufRead>(r: R) -> Result<CamtMessage> {
        let mut reader = Reader::from_reader(r);
        reader.trim_text(true);

        let mut kind: Option<DocumentKind> = None;
        let mut message_id: Option<String> = None;
        let mut reports: Vec<CamtReport> = Vec::new();

        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut ccy = String::new();

        // глубины, на которых открыты Stmt/Ntry/TxDtls
        let mut report_depth: Option<usize> = None;
        let mut entry_depth: Option<usize> = None;
        let mut detail_depth: Option<usize> = None;

        let mut report: Option<CamtReport> = None;
        let mut entry: Option<RawEntry> = None;
        let mut detail: Option<RawTxDetail> = None;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match name.as_str() {
                        "BkToCstmrStmt" => kind = Some(DocumentKind::Camt053),
                        "BkToCstmrAcctRpt" => kind = Some(DocumentKind::Camt052),
                        "BkToCstmrDbtCdtNtfctn" => kind = Some(DocumentKind::Camt054),
                        "Stmt" | "Rpt" | "Ntfctn" if kind.is_some() && report.is_none() => {
                            report = Some(CamtReport::default());
                            report_depth = Some(path.len() + 1);
                        }
                        "Ntry" if report.is_some() && entry.is_none() => {
                            entry = Some(RawEntry {
                                currency: "XXX".into(),
                                ..Default::default()
                            });
                            entry_depth = Some(path.len() + 1);
                        }
                        "TxDtls" if entry.is_some() && detail.is_none() => {
                            detail = Some(RawTxDetail::default());
                            detail_depth = Some(path.len() + 1);
                        }
                        "Amt" => {
                            ccy.clear();
                            for a in e.attributes().flatten() {
                                if a.key.as_ref() == b"Ccy" {
                                    ccy = String::from_utf8_lossy(&a.value).into_owned();
                                }
                            }
                        }
                        _ => {}
                    }
                    path.push(name);
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(EbicsError::xml)?;
                    let text = text.as_ref();

                    if let (Some(d), Some(det)) = (detail_depth, detail.as_mut()) {
                        detail_text(&path[d..], text, &ccy, det)?;
                    } else if let (Some(d), Some(ent)) = (entry_depth, entry.as_mut()) {
                        entry_text(&path[d..], text, &ccy, ent)?;
                    } else if let (Some(d), Some(rep)) = (report_depth, report.as_mut()) {
                        let rel = &path[d..];
                        if is(rel, &["Id"]) {
                            rep.id = Some(text.to_string());
                        } else if is(rel, &["Acct", "Id", "IBAN"]) {
                            rep.iban = text.to_string();
                        }
                    } else if path.ends_with(&["GrpHdr".to_string(), "MsgId".to_string()]) {
                        message_id = Some(text.to_string());
                    }
                }
                Ok(Event::End(_)) => {
                    path.pop();
                    let depth = path.len() + 1;
                    if detail_depth == Some(depth) {
                        detail_depth = None;
                        if let (Some(det), Some(ent)) = (detail.take(), entry.as_mut()) {
                            ent.details.push(det);
                        }
                    } else if entry_depth == Some(depth) {
                        entry_depth = None;
                        if let (Some(ent), Some(rep)) = (entry.take(), report.as_mut()) {
                            rep.entries.push(ent);
                        }
                    } else if report_depth == Some(depth) {
                        report_depth = None;
                        if let Some(rep) = report.take() {
                            reports.push(rep);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(EbicsError::xml(e)),
                _ => {}
            }
            buf.clear();
        }

        let kind = kind.ok_or_else(|| {
            EbicsError::Parse("not a camt.052/053/054 document".into())
        })?;
        Ok(CamtMessage {
            kind,
            message_id,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V08_NOTIFICATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.054.001.08">
  <BkToCstmrDbtCdtNtfctn>
    <GrpHdr><MsgId>N-1</MsgId></GrpHdr>
    <Ntfctn>
      <Id>NTF-1</Id>
      <Acct><Id><IBAN>DE02120300000000202051</IBAN></Id></Acct>
      <Ntry>
        <Amt Ccy="EUR">30.00</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <Sts><Cd>BOOK</Cd></Sts>
        <BookgDt><DtTm>2024-01-10T08:15:00+01:00</DtTm></BookgDt>
        <NtryDtls>
          <Btch><PmtInfId>PMT-7</PmtInfId><NbOfTxs>2</NbOfTxs></Btch>
          <TxDtls>
            <Refs><TxId>T1</TxId></Refs>
            <Amt Ccy="EUR">10.00</Amt>
            <CdtDbtInd>CRDT</CdtDbtInd>
            <RltdPties>
              <Dbtr><Pty><Nm>Anna Schmidt</Nm><PstlAdr><Nm>ignored</Nm></PstlAdr></Pty></Dbtr>
              <DbtrAcct><Id><IBAN>DE89370400440532013000</IBAN></Id></DbtrAcct>
            </RltdPties>
          </TxDtls>
          <TxDtls>
            <Refs><TxId>T2</TxId></Refs>
            <AmtDtls><TxAmt><Amt Ccy="EUR">20.00</Amt></TxAmt></AmtDtls>
          </TxDtls>
        </NtryDtls>
      </Ntry>
    </Ntfctn>
  </BkToCstmrDbtCdtNtfctn>
</Document>"#;

    #[test]
    fn reads_v08_notification() {
        let msg = Camt::from_bytes(V08_NOTIFICATION.as_bytes()).expect("camt.054");
        assert_eq!(msg.kind, DocumentKind::Camt054);
        assert_eq!(msg.message_id.as_deref(), Some("N-1"));
        let rep = &msg.reports[0];
        assert_eq!(rep.iban, "DE02120300000000202051");
        assert_eq!(rep.id.as_deref(), Some("NTF-1"));

        let e = &rep.entries[0];
        assert_eq!(e.status.as_deref(), Some("BOOK"));
        assert_eq!(e.booking_date, NaiveDate::from_ymd_opt(2024, 1, 10));
        assert_eq!(e.batch_count, Some(2));
        assert!(e.is_batch());
        assert_eq!(e.batch_keys().next(), Some("PMT-7"));

        let d1 = &e.details[0];
        assert_eq!(d1.amount, Some(Decimal::new(1000, 2)));
        assert_eq!(d1.debtor_name, None);
        assert_eq!(d1.parties.debtor_name.as_deref(), Some("Anna Schmidt"));
        assert_eq!(d1.debtor_iban.as_deref(), Some("DE89370400440532013000"));

        let d2 = &e.details[1];
        assert_eq!(d2.tx_id.as_deref(), Some("T2"));
        assert_eq!(d2.amount, Some(Decimal::new(2000, 2)));
        assert_eq!(d2.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn rejects_foreign_xml() {
        let err = Camt::from_bytes(b"<Document><Foo/></Document>").unwrap_err();
        assert!(matches!(err, EbicsError::Parse(_)));
    }

    #[test]
    fn bad_indicator_is_a_parse_error() {
        let xml = r#"<Document><BkToCstmrStmt><Stmt><Ntry><CdtDbtInd>XXXX</CdtDbtInd></Ntry></Stmt></BkToCstmrStmt></Document>"#;
        assert!(Camt::from_bytes(xml.as_bytes()).is_err());
    }
}
