//! `ProtocolSession`: EBICS-клиент, привязанный к связке ключей,
//! пользователю и банку.
//!
//! Скачивание выписок отдаёт `DocumentStream`; квитанция банку уходит
//! только через `confirm_download` с токеном, который выдаёт полностью
//! прочитанный поток. Брошенный поток ничего не подтверждает, и банк
//! отдаст те же данные снова.

use crate::{
    crypto,
    document,
    error::{EbicsError, Result},
    formats::{archive, camt054::BatchDetails},
    identity::CryptoIdentity,
    keyring::KeyVersion,
    model::{BankEndpoint, DateRange, StatementDocument},
    protocol::{
        xml::{self, PubKeyInfo, DEFAULT_AUTHORISATION_LEVEL},
        Channel, DownloadOutcome, DownloadRequest, OrderType, RequestContext, TransactionId,
    },
};
use chrono::{Local, NaiveDate, Utc};
use rsa::RsaPublicKey;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ключи банка после HPB, ещё не активированные.
#[derive(Debug, Clone, PartialEq)]
pub struct BankKeys {
    /// `HPBResponseOrderData` как пришёл от банка.
    pub raw: Vec<u8>,
    pub authentication: RsaPublicKey,
    pub encryption: RsaPublicKey,
    pub authentication_fingerprint: String,
    pub encryption_fingerprint: String,
}

/// Разрешение на квитанцию для одного скачивания.
#[must_use = "without confirm_download the bank delivers the same data again"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    session: Uuid,
    transactions: Vec<TransactionId>,
}

impl PendingConfirmation {
    pub fn transactions(&self) -> &[TransactionId] {
        &self.transactions
    }
}

/// Однопроходный поток документов, упорядоченный по ключу. Каждый
/// документ разбирается при `next()`; ошибка разбора относится только к
/// своему документу.
#[derive(Debug)]
pub struct DocumentStream {
    session: Uuid,
    transactions: Vec<TransactionId>,
    pending: VecDeque<(String, Vec<u8>)>,
    batch: HashMap<String, Vec<u8>>,
    ready: VecDeque<StatementDocument>,
}

impl DocumentStream {
    fn new(
        session: Uuid,
        transactions: Vec<TransactionId>,
        documents: Vec<(String, Vec<u8>)>,
        batch: HashMap<String, Vec<u8>>,
    ) -> Self {
        Self {
            session,
            transactions,
            pending: documents.into(),
            batch,
            ready: VecDeque::new(),
        }
    }

    /// Ещё не выданные документы (неразобранные файлы считаются по одному).
    pub fn remaining(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    fn parse(&mut self, key: &str, xml: &[u8]) -> Result<Vec<StatementDocument>> {
        let batch = match self.batch.remove(key) {
            Some(data) => match BatchDetails::from_bytes(&data) {
                Ok(details) => Some(details),
                Err(e) => {
                    warn!(document = key, error = %e, "unreadable camt.054, batches stay unsplit");
                    None
                }
            },
            None => None,
        };
        document::build_documents(key, xml, batch.as_ref())
    }

    /// Токен квитанции; только для полностью прочитанного потока.
    pub fn finish(self) -> Result<PendingConfirmation> {
        let remaining = self.remaining();
        if remaining > 0 {
            return Err(EbicsError::StreamNotDrained { remaining });
        }
        if !self.batch.is_empty() {
            debug!(unmatched = self.batch.len(), "camt.054 documents without a statement");
        }
        Ok(PendingConfirmation {
            session: self.session,
            transactions: self.transactions,
        })
    }
}

impl Iterator for DocumentStream {
    type Item = Result<StatementDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(doc) = self.ready.pop_front() {
                return Some(Ok(doc));
            }
            let (key, xml) = self.pending.pop_front()?;
            match self.parse(&key, &xml) {
                Ok(docs) => self.ready.extend(docs),
                Err(e) => return Some(Err(EbicsError::Parse(format!("document {key}: {e}")))),
            }
        }
    }
}

/// Начало без конца означает «по сегодня», конец без начала недопустим.
fn resolve_range(range: DateRange, today: NaiveDate) -> Result<Option<(NaiveDate, NaiveDate)>> {
    match (range.start, range.end) {
        (None, None) => Ok(None),
        (None, Some(end)) => Err(EbicsError::Validation(format!(
            "date range ends at {end} but has no start"
        ))),
        (Some(start), end) => {
            let end = end.unwrap_or(today);
            if start > end {
                return Err(EbicsError::Validation(format!(
                    "date range starts after it ends ({start} > {end})"
                )));
            }
            Ok(Some((start, end)))
        }
    }
}

pub struct ProtocolSession {
    id: Uuid,
    identity: CryptoIdentity,
    partner_id: String,
    user_id: String,
    endpoint: BankEndpoint,
    channel: Arc<dyn Channel>,
}

impl ProtocolSession {
    /// Без сетевых вызовов. Нужны все три ключа пользователя.
    pub fn new(
        identity: CryptoIdentity,
        partner_id: impl Into<String>,
        user_id: impl Into<String>,
        endpoint: BankEndpoint,
        channel: Arc<dyn Channel>,
    ) -> Result<Self> {
        if !identity.keyring().has_user_keys() {
            return Err(EbicsError::InvalidState(format!(
                "keyring of {} holds no user keys",
                identity.reference()
            )));
        }
        let session = Self {
            id: Uuid::new_v4(),
            identity,
            partner_id: partner_id.into(),
            user_id: user_id.into(),
            endpoint,
            channel,
        };
        debug!(session = %session.id, host = %session.endpoint.host_id, "session opened");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &CryptoIdentity {
        &self.identity
    }

    pub fn into_identity(self) -> CryptoIdentity {
        self.identity
    }

    pub fn endpoint(&self) -> &BankEndpoint {
        &self.endpoint
    }

    fn ctx(&self) -> RequestContext<'_> {
        RequestContext {
            endpoint: &self.endpoint,
            partner_id: &self.partner_id,
            user_id: &self.user_id,
            identity: &self.identity,
        }
    }

    /// INI, затем HIA. Сертификаты уходят вместе с ключами, если они есть.
    pub fn send_keys(&self) -> Result<()> {
        let signature = self.identity.public_key(KeyVersion::A005)?;
        let authentication = self.identity.public_key(KeyVersion::X002)?;
        let encryption = self.identity.public_key(KeyVersion::E002)?;
        let certs = [
            self.identity.certificate(KeyVersion::A005)?,
            self.identity.certificate(KeyVersion::X002)?,
            self.identity.certificate(KeyVersion::E002)?,
        ];

        let ini = xml::ini_order_data(
            &self.partner_id,
            &self.user_id,
            &PubKeyInfo {
                key: &signature,
                certificate: certs[0].as_deref(),
            },
            Utc::now(),
        )?;
        let hia = xml::hia_order_data(
            &self.partner_id,
            &self.user_id,
            &PubKeyInfo {
                key: &authentication,
                certificate: certs[1].as_deref(),
            },
            &PubKeyInfo {
                key: &encryption,
                certificate: certs[2].as_deref(),
            },
        )?;

        let ctx = self.ctx();
        self.channel.upload_keys(&ctx, OrderType::Ini, ini.as_bytes())?;
        self.channel.upload_keys(&ctx, OrderType::Hia, hia.as_bytes())?;
        info!(
            identity = %self.identity.reference(),
            host = %self.endpoint.host_id,
            certificates = certs.iter().all(Option::is_some),
            "INI and HIA sent"
        );
        Ok(())
    }

    /// HPB. Новая пара ждёт `activate_bank_keys`; активная остаётся в работе.
    pub fn download_bank_keys(&mut self) -> Result<BankKeys> {
        let raw = self.channel.download_bank_keys(&self.ctx())?;
        let (authentication, encryption) = xml::parse_hpb(&raw)?;
        self.identity
            .stage_bank_keys(&self.endpoint.host_id, &authentication, &encryption)?;
        let keys = BankKeys {
            authentication_fingerprint: crypto::fingerprint(&authentication),
            encryption_fingerprint: crypto::fingerprint(&encryption),
            raw,
            authentication,
            encryption,
        };
        info!(
            host = %self.endpoint.host_id,
            x002 = %keys.authentication_fingerprint,
            e002 = %keys.encryption_fingerprint,
            "bank keys downloaded, awaiting activation"
        );
        Ok(keys)
    }

    pub fn activate_bank_keys(&mut self) -> Result<()> {
        self.identity.activate_bank_keys(&self.endpoint.host_id)?;
        info!(host = %self.endpoint.host_id, "bank keys activated");
        Ok(())
    }

    fn ensure_bank_keys_active(&self) -> Result<()> {
        match self.identity.bank_keys(&self.endpoint.host_id)? {
            Some(keys) if keys.activated => Ok(()),
            _ => Err(EbicsError::InvalidState(format!(
                "bank keys for host {} are not activated",
                self.endpoint.host_id
            ))),
        }
    }

    /// HTD: типы заказов для уровня полномочий. Не кэшируется.
    pub fn permitted_order_types(&self, level: &str) -> Result<Vec<String>> {
        self.ensure_bank_keys_active()?;
        let ctx = self.ctx();
        match self.channel.download(&ctx, &DownloadRequest::new(OrderType::Htd))? {
            DownloadOutcome::Empty => Ok(Vec::new()),
            DownloadOutcome::Data {
                transaction,
                order_data,
            } => {
                let types = xml::parse_permitted_order_types(&order_data, level);
                self.channel.confirm(&ctx, &[transaction], types.is_ok())?;
                let types = types?;
                debug!(level, types = ?types, "permitted order types");
                Ok(types)
            }
        }
    }

    fn pull(
        &self,
        order_type: OrderType,
        range: Option<(NaiveDate, NaiveDate)>,
        transactions: &mut Vec<TransactionId>,
    ) -> Result<Option<Vec<(String, Vec<u8>)>>> {
        let request = DownloadRequest::new(order_type).with_range(range);
        match self.channel.download(&self.ctx(), &request)? {
            DownloadOutcome::Empty => Ok(None),
            DownloadOutcome::Data {
                transaction,
                order_data,
            } => {
                transactions.push(transaction);
                let docs = archive::unpack(&order_data)?;
                debug!(order = %order_type, documents = docs.len(), "order data unpacked");
                Ok(Some(docs))
            }
        }
    }

    /// C53 за период и, по запросу, парный C54 для разбиения пакетов.
    pub fn download_statements(
        &self,
        range: DateRange,
        include_batch_detail: bool,
    ) -> Result<DocumentStream> {
        let range = resolve_range(range, Local::now().date_naive())?;
        self.ensure_bank_keys_active()?;

        let mut transactions = Vec::new();
        let Some(statements) = self.pull(OrderType::C53, range, &mut transactions)? else {
            info!(host = %self.endpoint.host_id, "no statements for the period");
            return Ok(DocumentStream::new(self.id, transactions, Vec::new(), HashMap::new()));
        };

        let mut batch = HashMap::new();
        if include_batch_detail {
            let permitted = self.permitted_order_types(DEFAULT_AUTHORISATION_LEVEL)?;
            if permitted.iter().any(|t| t == OrderType::C54.code()) {
                if let Some(details) = self.pull(OrderType::C54, range, &mut transactions)? {
                    batch = details.into_iter().collect();
                }
            } else {
                debug!(host = %self.endpoint.host_id, "C54 not permitted, batches stay unsplit");
            }
        }

        Ok(DocumentStream::new(self.id, transactions, statements, batch))
    }

    /// C52: внутридневные отчёты, без C54.
    pub fn download_intraday_statements(&self) -> Result<DocumentStream> {
        self.ensure_bank_keys_active()?;
        let mut transactions = Vec::new();
        let reports = self
            .pull(OrderType::C52, None, &mut transactions)?
            .unwrap_or_default();
        Ok(DocumentStream::new(self.id, transactions, reports, HashMap::new()))
    }

    /// Положительная квитанция для всех транзакций скачивания, одним
    /// вызовом канала.
    pub fn confirm_download(&self, token: PendingConfirmation) -> Result<()> {
        if token.session != self.id {
            return Err(EbicsError::InvalidState(
                "confirmation token belongs to another session".into(),
            ));
        }
        self.channel
            .confirm(&self.ctx(), &token.transactions, true)?;
        info!(
            host = %self.endpoint.host_id,
            transactions = token.transactions.len(),
            "download confirmed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("partner_id", &self.partner_id)
            .field("user_id", &self.user_id)
            .field("host_id", &self.endpoint.host_id)
            .finish_non_exhaustive()
    }
}
