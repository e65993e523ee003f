use ebicslib::{
    document::build_documents,
    formats::camt054::BatchDetails,
    model::{DocumentKind, TxStatus},
};
use rust_decimal::Decimal;

const STATEMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.08">
  <BkToCstmrStmt>
    <GrpHdr><MsgId>M-1</MsgId></GrpHdr>
    <Stmt>
      <Id>S-1</Id>
      <Acct><Id><IBAN>DE02120300000000202051</IBAN></Id></Acct>
      <Ntry>
        <Amt Ccy="EUR">30.00</Amt><CdtDbtInd>CRDT</CdtDbtInd>
        <Sts><Cd>BOOK</Cd></Sts>
        <BookgDt><Dt>2024-01-10</Dt></BookgDt>
        <AcctSvcrRef>SVC-1</AcctSvcrRef>
        <NtryDtls><Btch><PmtInfId>PMT-7</PmtInfId><NbOfTxs>2</NbOfTxs></Btch></NtryDtls>
      </Ntry>
      <Ntry>
        <Amt Ccy="EUR">4.99</Amt><CdtDbtInd>DBIT</CdtDbtInd>
        <Sts><Cd>PDNG</Cd></Sts>
        <BookgDt><Dt>2024-01-11</Dt></BookgDt>
      </Ntry>
    </Stmt>
  </BkToCstmrStmt>
</Document>"#;

const NOTIFICATION: &str = r#"<Document><BkToCstmrDbtCdtNtfctn><Ntfctn>
  <Acct><Id><IBAN>DE02120300000000202051</IBAN></Id></Acct>
  <Ntry><Amt Ccy="EUR">30.00</Amt><CdtDbtInd>CRDT</CdtDbtInd>
    <NtryDtls><Btch><PmtInfId>PMT-7</PmtInfId></Btch>
      <TxDtls><Refs><TxId>T1</TxId></Refs><Amt Ccy="EUR">10.00</Amt></TxDtls>
      <TxDtls><Refs><TxId>T2</TxId></Refs><Amt Ccy="EUR">20.00</Amt></TxDtls>
    </NtryDtls></Ntry>
</Ntfctn></BkToCstmrDbtCdtNtfctn></Document>"#;

#[test]
fn statement_with_paired_notification() {
    let batch = BatchDetails::from_bytes(NOTIFICATION.as_bytes()).expect("camt.054");
    let docs = build_documents("stmt.xml", STATEMENT.as_bytes(), Some(&batch)).expect("camt.053");
    assert_eq!(docs.len(), 1);

    let doc = &docs[0];
    assert_eq!(doc.kind, DocumentKind::Camt053);
    assert_eq!(doc.iban, "DE02120300000000202051");
    assert_eq!(doc.statement_id.as_deref(), Some("S-1"));

    let batch_tx = &doc.transactions[0];
    assert!(batch_tx.has_split_detail());
    let amounts: Vec<Decimal> = batch_tx.sub_transactions.iter().map(|t| t.amount.value).collect();
    assert_eq!(amounts, [Decimal::new(1000, 2), Decimal::new(2000, 2)]);
    assert_eq!(doc.transactions[1].status, Some(TxStatus::Pending));
    assert_eq!(doc.transactions[1].amount.value, Decimal::new(-499, 2));
}

#[test]
fn v08_single_payment_carries_counterparty() {
    let xml = r#"<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.08">
  <BkToCstmrStmt><Stmt>
    <Id>S-2</Id>
    <Acct><Id><IBAN>DE02120300000000202051</IBAN></Id></Acct>
    <Ntry>
      <Amt Ccy="EUR">75.00</Amt><CdtDbtInd>CRDT</CdtDbtInd>
      <Sts><Cd>BOOK</Cd></Sts>
      <BookgDt><Dt>2024-02-01</Dt></BookgDt>
      <AcctSvcrRef>SVC-2</AcctSvcrRef>
      <NtryDtls><TxDtls>
        <RltdPties>
          <Dbtr><Pty><Nm>Payer GmbH</Nm><PstlAdr><Nm>Ignored</Nm></PstlAdr></Pty></Dbtr>
          <DbtrAcct><Id><IBAN>DE89370400440532013000</IBAN></Id></DbtrAcct>
          <Cdtr><Pty><Nm>Us AG</Nm></Pty></Cdtr>
        </RltdPties>
      </TxDtls></NtryDtls>
    </Ntry>
  </Stmt></BkToCstmrStmt>
</Document>"#;
    let docs = build_documents("v08.xml", xml.as_bytes(), None).expect("camt.053.001.08");
    let tx = &docs[0].transactions[0];
    assert!(!tx.is_batch);
    assert_eq!(tx.counterparty_name.as_deref(), Some("Payer GmbH"));
    assert_eq!(tx.counterparty_iban.as_deref(), Some("DE89370400440532013000"));
    assert_eq!(tx.amount.value, Decimal::new(7500, 2));
}
