//! `HttpChannel`: EBICS H004 поверх HTTPS.

use super::{
    check_return_code,
    xml::{self, BankDigests, EbicsResponse},
    Channel, DownloadOutcome, DownloadRequest, OrderType, RequestContext, ReturnStatus,
    TransactionId,
};
use crate::{
    crypto,
    error::{EbicsError, Result},
    keyring::KeyVersion,
};
use chrono::Utc;
use reqwest::{blocking::Client, header::CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, info};

pub const PRODUCT: &str = concat!("ebicslib ", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Отправка XML на URL банка. Не-2xx: ошибка `Http`.
pub trait HttpTransport: Send + Sync {
    fn post(&self, url: &str, body: String) -> Result<Vec<u8>>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(PRODUCT)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(&self, url: &str, body: String) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/xml; charset=UTF-8")
            .body(body)
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EbicsError::Http {
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes()?.to_vec())
    }
}

pub struct HttpChannel<T = ReqwestTransport> {
    transport: T,
    product: String,
}

impl HttpChannel<ReqwestTransport> {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self::with_transport(ReqwestTransport::new(timeout)?))
    }
}

fn expect_ok(resp: &EbicsResponse) -> Result<()> {
    match evaluate(resp)? {
        ReturnStatus::Ok => Ok(()),
        ReturnStatus::NoData => Err(EbicsError::Protocol {
            code: super::return_codes::NO_DOWNLOAD_DATA_AVAILABLE.into(),
            text: resp.technical_text.clone(),
        }),
    }
}

/// Технический код из заголовка, затем бизнес-код из тела.
fn evaluate(resp: &EbicsResponse) -> Result<ReturnStatus> {
    let technical = check_return_code(&resp.technical_code, &resp.technical_text)?;
    let business = check_return_code(&resp.business_code, &resp.technical_text)?;
    if technical == ReturnStatus::NoData || business == ReturnStatus::NoData {
        Ok(ReturnStatus::NoData)
    } else {
        Ok(ReturnStatus::Ok)
    }
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| EbicsError::Xml(format!("response without {what}")))
}

impl<T: HttpTransport> HttpChannel<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            product: PRODUCT.to_string(),
        }
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = product.into();
        self
    }

    fn header<'a>(&'a self, ctx: &RequestContext<'a>) -> xml::Static<'a> {
        xml::Static {
            host_id: &ctx.endpoint.host_id,
            partner_id: ctx.partner_id,
            user_id: ctx.user_id,
            product: &self.product,
        }
    }

    fn exchange(&self, ctx: &RequestContext<'_>, phase: &str, request: String) -> Result<EbicsResponse> {
        debug!(host = %ctx.endpoint.host_id, phase, bytes = request.len(), "EBICS request");
        let raw = self.transport.post(&ctx.endpoint.url, request)?;
        let resp = xml::parse_response(&raw)?;
        debug!(
            host = %ctx.endpoint.host_id,
            phase,
            technical = %resp.technical_code,
            business = %resp.business_code,
            "EBICS response"
        );
        Ok(resp)
    }

    fn decrypt(&self, ctx: &RequestContext<'_>, transaction_key: &str, data: &[u8]) -> Result<Vec<u8>> {
        let key = ctx.identity.private_key(KeyVersion::E002)?;
        let plain = crypto::decrypt_e002(&key, &crypto::unb64(transaction_key)?, data)?;
        crypto::inflate(&plain)
    }

    fn bank_digests(&self, ctx: &RequestContext<'_>) -> Result<BankDigests> {
        let host = &ctx.endpoint.host_id;
        let keys = ctx
            .identity
            .bank_keys(host)?
            .filter(|k| k.activated)
            .ok_or_else(|| {
                EbicsError::InvalidState(format!("bank keys for host {host} are not activated"))
            })?;
        Ok(BankDigests::of(&keys.authentication, &keys.encryption))
    }
}

impl<T: HttpTransport> Channel for HttpChannel<T> {
    fn upload_keys(&self, ctx: &RequestContext<'_>, order_type: OrderType, order_data: &[u8]) -> Result<()> {
        let request = xml::unsecured_request(&self.header(ctx), order_type, order_data)?;
        let resp = self.exchange(ctx, order_type.code(), request)?;
        expect_ok(&resp)?;
        info!(host = %ctx.endpoint.host_id, order = %order_type, "keys uploaded");
        Ok(())
    }

    fn download_bank_keys(&self, ctx: &RequestContext<'_>) -> Result<Vec<u8>> {
        let key = ctx.identity.private_key(KeyVersion::X002)?;
        let request = xml::hpb_request(&self.header(ctx), &key, Utc::now());
        let resp = self.exchange(ctx, "HPB", request)?;
        expect_ok(&resp)?;
        let data = crypto::unb64(required(&resp.order_data, "OrderData")?)?;
        self.decrypt(ctx, required(&resp.transaction_key, "TransactionKey")?, &data)
    }

    fn download(&self, ctx: &RequestContext<'_>, request: &DownloadRequest) -> Result<DownloadOutcome> {
        let digests = self.bank_digests(ctx)?;
        let key = ctx.identity.private_key(KeyVersion::X002)?;
        let init = xml::download_init(
            &self.header(ctx),
            request.order_type,
            request.range,
            &digests,
            &key,
            Utc::now(),
        );
        let resp = self.exchange(ctx, "Initialisation", init)?;
        if evaluate(&resp)? == ReturnStatus::NoData {
            info!(host = %ctx.endpoint.host_id, order = %request.order_type, "no download data available");
            return Ok(DownloadOutcome::Empty);
        }

        let transaction = TransactionId(required(&resp.transaction_id, "TransactionID")?.to_string());
        let transaction_key = required(&resp.transaction_key, "TransactionKey")?.to_string();
        let mut data = crypto::unb64(required(&resp.order_data, "OrderData")?)?;
        let segments = resp.num_segments.unwrap_or(1);

        for segment in 2..=segments {
            let transfer = xml::download_transfer(
                &ctx.endpoint.host_id,
                &transaction,
                segment,
                segment == segments,
                &key,
            );
            let resp = self.exchange(ctx, "Transfer", transfer)?;
            expect_ok(&resp)?;
            data.extend(crypto::unb64(required(&resp.order_data, "OrderData")?)?);
        }

        let order_data = self.decrypt(ctx, &transaction_key, &data)?;
        info!(
            host = %ctx.endpoint.host_id,
            order = %request.order_type,
            %transaction,
            segments,
            bytes = order_data.len(),
            "download complete"
        );
        Ok(DownloadOutcome::Data {
            transaction,
            order_data,
        })
    }

    fn confirm(&self, ctx: &RequestContext<'_>, transactions: &[TransactionId], success: bool) -> Result<()> {
        if transactions.is_empty() {
            debug!(host = %ctx.endpoint.host_id, "nothing to confirm");
            return Ok(());
        }
        let key = ctx.identity.private_key(KeyVersion::X002)?;
        for transaction in transactions {
            let receipt = xml::download_receipt(&ctx.endpoint.host_id, transaction, success, &key);
            let resp = self.exchange(ctx, "Receipt", receipt)?;
            expect_ok(&resp)?;
            info!(host = %ctx.endpoint.host_id, %transaction, success, "download receipt sent");
        }
        Ok(())
    }
}
