#![allow(dead_code)]

use ebicslib::{
    config::AccountConfig,
    error::{EbicsError, Result},
    formats::archive,
    identity::CryptoIdentity,
    keyring::KeyVersion,
    model::{AccountRef, BankEndpoint, IdentityRef, NormalizedTransactionRecord, Passphrases, RecordId},
    protocol::{Channel, DownloadOutcome, DownloadRequest, OrderType, RequestContext, TransactionId},
    session::ProtocolSession,
    sink::AccountTable,
    store::InMemoryKeyringStore,
    traits::{KeyringStore, SinkError, TransactionSink},
};
use std::sync::{Arc, Mutex, OnceLock};

pub const IBAN: &str = "DE02120300000000202051";
pub const COMPANY: &str = "ACME GmbH";
pub const BANK: &str = "Testbank";

pub fn endpoint() -> BankEndpoint {
    BankEndpoint {
        name: BANK.into(),
        host_id: "EBIXHOST".into(),
        url: "https://bank.invalid/ebicsweb".into(),
        bank_name: Some("Testbank AG".into()),
    }
}

/// Связка ключей генерируется один раз на процесс.
fn keyring_blob() -> &'static [u8] {
    static BLOB: OnceLock<Vec<u8>> = OnceLock::new();
    BLOB.get_or_init(|| {
        let store = Arc::new(InMemoryKeyringStore::new());
        let reference = IdentityRef("template".into());
        let mut id = CryptoIdentity::open(reference.clone(), store.clone(), Passphrases::new("pw")).unwrap();
        id.create_keys(1024).unwrap();
        store.load(&reference).unwrap().unwrap()
    })
}

pub fn store_with_keys(name: &str) -> Arc<InMemoryKeyringStore> {
    let store = Arc::new(InMemoryKeyringStore::new());
    store.save(&IdentityRef(name.into()), keyring_blob()).unwrap();
    store
}

/// Сессия с ключами банка, совпадающими с ключом X002 пользователя.
pub fn activated_session(channel: Arc<dyn Channel>) -> ProtocolSession {
    let store = store_with_keys("acme-main");
    let mut id = CryptoIdentity::open(IdentityRef("acme-main".into()), store, Passphrases::new("pw")).unwrap();
    let key = id.public_key(KeyVersion::X002).unwrap();
    id.stage_bank_keys("EBIXHOST", &key, &key).unwrap();
    id.activate_bank_keys("EBIXHOST").unwrap();
    ProtocolSession::new(id, "PARTNER1", "USER1", endpoint(), channel).unwrap()
}

/// Банк с заранее заданными данными заказов.
#[derive(Default)]
pub struct FakeBank {
    pub permitted: Vec<&'static str>,
    pub c52: Option<Vec<u8>>,
    pub c53: Option<Vec<u8>>,
    pub c54: Option<Vec<u8>>,
    pub downloads: Mutex<Vec<OrderType>>,
    pub confirms: Mutex<Vec<(Vec<TransactionId>, bool)>>,
}

impl FakeBank {
    pub fn permitting(types: &[&'static str]) -> Self {
        Self {
            permitted: types.to_vec(),
            ..Default::default()
        }
    }

    pub fn downloads(&self) -> Vec<OrderType> {
        self.downloads.lock().unwrap().clone()
    }

    /// Квитанции без HTD.
    pub fn statement_confirms(&self) -> Vec<(Vec<TransactionId>, bool)> {
        self.confirms
            .lock()
            .unwrap()
            .iter()
            .filter(|(txs, _)| !txs.iter().any(|t| t.0 == "TX-HTD"))
            .cloned()
            .collect()
    }

    fn htd(&self) -> Vec<u8> {
        format!(
            "<HTDResponseOrderData xmlns=\"urn:org:ebics:H004\"><UserInfo>\
             <UserID Status=\"1\">USER1</UserID>\
             <Permission AuthorisationLevel=\"T\"><OrderTypes>{}</OrderTypes></Permission>\
             </UserInfo></HTDResponseOrderData>",
            self.permitted.join(" ")
        )
        .into_bytes()
    }
}

impl Channel for FakeBank {
    fn upload_keys(&self, _: &RequestContext<'_>, _: OrderType, _: &[u8]) -> Result<()> {
        Ok(())
    }

    fn download_bank_keys(&self, _: &RequestContext<'_>) -> Result<Vec<u8>> {
        Err(EbicsError::Http { status: 503 })
    }

    fn download(&self, _: &RequestContext<'_>, request: &DownloadRequest) -> Result<DownloadOutcome> {
        self.downloads.lock().unwrap().push(request.order_type);
        let data = match request.order_type {
            OrderType::Htd => Some(self.htd()),
            OrderType::C52 => self.c52.clone(),
            OrderType::C53 => self.c53.clone(),
            OrderType::C54 => self.c54.clone(),
            other => return Err(EbicsError::InvalidState(format!("unexpected order {other}"))),
        };
        Ok(match data {
            Some(order_data) => DownloadOutcome::Data {
                transaction: TransactionId(format!("TX-{}", request.order_type)),
                order_data,
            },
            None => DownloadOutcome::Empty,
        })
    }

    fn confirm(&self, _: &RequestContext<'_>, transactions: &[TransactionId], success: bool) -> Result<()> {
        self.confirms
            .lock()
            .unwrap()
            .push((transactions.to_vec(), success));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub records: Vec<NormalizedTransactionRecord>,
    pub broken: bool,
}

impl TransactionSink for MemorySink {
    fn exists(&self, transaction_id: &str, account: &AccountRef) -> Result<bool> {
        Ok(self
            .records
            .iter()
            .any(|r| &r.account == account && r.transaction_id.as_deref() == Some(transaction_id)))
    }

    fn create(&mut self, record: &NormalizedTransactionRecord) -> std::result::Result<RecordId, SinkError> {
        if self.broken {
            return Err(SinkError::Other("sink offline".into()));
        }
        self.records.push(record.clone());
        Ok(RecordId(self.records.len().to_string()))
    }

    fn confirm(&mut self, _: &RecordId) -> Result<()> {
        Ok(())
    }
}

pub fn accounts() -> AccountTable {
    AccountTable::new(vec![AccountConfig {
        iban: IBAN.into(),
        company: COMPANY.into(),
        bank: BANK.into(),
        account: "1200 Bank".into(),
        enabled: true,
    }])
}

pub fn zip(name: &str, xml: &str) -> Vec<u8> {
    archive::pack(&[(name, xml.as_bytes())]).unwrap()
}

/// camt.053.001.02 со заданными записями `Ntry`.
pub fn camt053(iban: &str, entries: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <GrpHdr><MsgId>STMT-MSG-1</MsgId></GrpHdr>
    <Stmt>
      <Id>STMT-1</Id>
      <Acct><Id><IBAN>{iban}</IBAN></Id></Acct>
      {entries}
    </Stmt>
  </BkToCstmrStmt>
</Document>"#
    )
}

pub fn entry(reference: &str, amount: &str, dc: &str, status: &str, date: &str) -> String {
    format!(
        r#"<Ntry>
        <Amt Ccy="EUR">{amount}</Amt>
        <CdtDbtInd>{dc}</CdtDbtInd>
        <Sts>{status}</Sts>
        <BookgDt><Dt>{date}</Dt></BookgDt>
        <ValDt><Dt>{date}</Dt></ValDt>
        <AcctSvcrRef>{reference}</AcctSvcrRef>
        <NtryDtls><TxDtls>
          <Refs><EndToEndId>E2E-{reference}</EndToEndId></Refs>
          <RltdPties><Dbtr><Nm>Customer {reference}</Nm></Dbtr></RltdPties>
          <RmtInf><Ustrd>Invoice {reference}</Ustrd></RmtInf>
        </TxDtls></NtryDtls>
      </Ntry>"#
    )
}
