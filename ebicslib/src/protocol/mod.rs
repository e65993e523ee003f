//! Протокольный шов между сессией и банком.
//!
//! `Channel` знает, как доставить заказ и вернуть расшифрованные данные;
//! `HttpChannel` делает это по EBICS H004 поверх HTTPS, тесты подставляют
//! собственные реализации.

pub mod http;
pub mod xml;

pub use http::{HttpChannel, HttpTransport, ReqwestTransport};

use crate::{
    error::{EbicsError, Result},
    identity::CryptoIdentity,
    model::BankEndpoint,
};
use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Ini,
    Hia,
    Hpb,
    Htd,
    C52,
    C53,
    C54,
}

impl OrderType {
    pub fn code(self) -> &'static str {
        match self {
            OrderType::Ini => "INI",
            OrderType::Hia => "HIA",
            OrderType::Hpb => "HPB",
            OrderType::Htd => "HTD",
            OrderType::C52 => "C52",
            OrderType::C53 => "C53",
            OrderType::C54 => "C54",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Идентификатор EBICS-транзакции скачивания (32 hex-символа).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(pub String);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Кто и к какому банку обращается.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub endpoint: &'a BankEndpoint,
    pub partner_id: &'a str,
    pub user_id: &'a str,
    pub identity: &'a CryptoIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub order_type: OrderType,
    /// Включительный диапазон; `None`: без ограничения.
    pub range: Option<(NaiveDate, NaiveDate)>,
}

impl DownloadRequest {
    pub fn new(order_type: OrderType) -> Self {
        Self {
            order_type,
            range: None,
        }
    }

    pub fn with_range(mut self, range: Option<(NaiveDate, NaiveDate)>) -> Self {
        self.range = range;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Расшифрованные и распакованные (zlib) данные заказа.
    Data {
        transaction: TransactionId,
        order_data: Vec<u8>,
    },
    /// Банк ответил `090005`: данных за период нет.
    Empty,
}

pub trait Channel: Send + Sync {
    /// INI или HIA; `order_data`: несжатый XML.
    fn upload_keys(
        &self,
        ctx: &RequestContext<'_>,
        order_type: OrderType,
        order_data: &[u8],
    ) -> Result<()>;

    /// HPB: XML `HPBResponseOrderData`.
    fn download_bank_keys(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>>;

    fn download(&self, ctx: &RequestContext<'_>, request: &DownloadRequest)
        -> Result<DownloadOutcome>;

    /// Квитанция для каждой транзакции.
    fn confirm(
        &self,
        ctx: &RequestContext<'_>,
        transactions: &[TransactionId],
        success: bool,
    ) -> Result<()>;
}

pub mod return_codes {
    pub const OK: &str = "000000";
    pub const DOWNLOAD_POSTPROCESS_DONE: &str = "011000";
    pub const DOWNLOAD_POSTPROCESS_SKIPPED: &str = "011001";
    pub const NO_DOWNLOAD_DATA_AVAILABLE: &str = "090005";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnStatus {
    Ok,
    NoData,
}

/// Код возврата EBICS → результат. Всё остальное: ошибка.
pub(crate) fn check_return_code(code: &str, text: &str) -> Result<ReturnStatus> {
    use return_codes::*;
    match code.trim() {
        "" | OK | DOWNLOAD_POSTPROCESS_DONE | DOWNLOAD_POSTPROCESS_SKIPPED => Ok(ReturnStatus::Ok),
        NO_DOWNLOAD_DATA_AVAILABLE => Ok(ReturnStatus::NoData),
        other => Err(EbicsError::Protocol {
            code: other.to_string(),
            text: text.trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_codes_map_to_status() {
        assert_eq!(check_return_code("000000", "[EBICS_OK] OK").unwrap(), ReturnStatus::Ok);
        assert_eq!(check_return_code("011000", "").unwrap(), ReturnStatus::Ok);
        assert_eq!(
            check_return_code("090005", "[EBICS_NO_DOWNLOAD_DATA_AVAILABLE]").unwrap(),
            ReturnStatus::NoData
        );
        match check_return_code("091002", " [EBICS_INVALID_USER_OR_USER_STATE] ") {
            Err(EbicsError::Protocol { code, text }) => {
                assert_eq!(code, "091002");
                assert_eq!(text, "[EBICS_INVALID_USER_OR_USER_STATE]");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
