//! XML версии H004: данные заказов INI/HIA, конверты запросов с
//! подписью X002 и разбор ответов банка.
//!
//! Подписываемые фрагменты сразу пишутся в канонической форме (C14N
//! 20010315): пустые элементы раскрыты, атрибуты по алфавиту, текст
//! экранирован. Перед хэшированием на вершину фрагмента добавляются
//! декларации пространств имён корня.

use crate::{
    crypto,
    error::{EbicsError, Result},
    protocol::{OrderType, TransactionId},
};
use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::{events::Event, Reader};
use rsa::{traits::PublicKeyParts, BigUint, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use x509_cert::{der::Decode, Certificate};

pub const NS_H004: &str = "urn:org:ebics:H004";
pub const NS_S001: &str = "http://www.ebics.org/S001";
pub const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";

const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const AUTH_XPOINTER: &str = "#xpointer(//*[@authenticate='true'])";
const XML_DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Уровень полномочий по умолчанию в HTD.
pub const DEFAULT_AUTHORISATION_LEVEL: &str = "T";

fn text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
    out
}

fn el(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", text(value))
}

fn with_ns(fragment: &str) -> String {
    let end = fragment
        .find(|c: char| c == ' ' || c == '>')
        .unwrap_or(fragment.len());
    format!(
        "{} xmlns=\"{NS_H004}\" xmlns:ds=\"{NS_DS}\"{}",
        &fragment[..end],
        &fragment[end..]
    )
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Открытый ключ пользователя с необязательным сертификатом (DER).
#[derive(Debug, Clone, Copy)]
pub struct PubKeyInfo<'a> {
    pub key: &'a RsaPublicKey,
    pub certificate: Option<&'a [u8]>,
}

fn rsa_key_value(key: &RsaPublicKey) -> String {
    format!(
        "<ds:RSAKeyValue><ds:Modulus>{}</ds:Modulus><ds:Exponent>{}</ds:Exponent></ds:RSAKeyValue>",
        crypto::b64(&key.n().to_bytes_be()),
        crypto::b64(&key.e().to_bytes_be())
    )
}

fn x509_data(der: &[u8]) -> Result<String> {
    let cert = Certificate::from_der(der).map_err(EbicsError::crypto)?;
    let issuer = cert.tbs_certificate.issuer.to_string();
    let serial = BigUint::from_bytes_be(cert.tbs_certificate.serial_number.as_bytes());
    Ok(format!(
        "<ds:X509Data><ds:X509IssuerSerial><ds:X509IssuerName>{}</ds:X509IssuerName>\
         <ds:X509SerialNumber>{serial}</ds:X509SerialNumber></ds:X509IssuerSerial>\
         <ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data>",
        text(&issuer),
        crypto::b64(der)
    ))
}

fn key_info_body(info: &PubKeyInfo<'_>, timestamp: Option<&str>) -> Result<String> {
    let x509 = info.certificate.map(x509_data).transpose()?.unwrap_or_default();
    let ts = timestamp.map(|t| el("TimeStamp", t)).unwrap_or_default();
    Ok(format!(
        "{x509}<PubKeyValue>{}{ts}</PubKeyValue>",
        rsa_key_value(info.key)
    ))
}

/// `SignaturePubKeyOrderData` для INI (A005).
pub fn ini_order_data(
    partner_id: &str,
    user_id: &str,
    signature: &PubKeyInfo<'_>,
    now: DateTime<Utc>,
) -> Result<String> {
    Ok(format!(
        "{XML_DECL}<SignaturePubKeyOrderData xmlns=\"{NS_S001}\" xmlns:ds=\"{NS_DS}\">\
         <SignaturePubKeyInfo>{}<SignatureVersion>A005</SignatureVersion></SignaturePubKeyInfo>\
         {}{}</SignaturePubKeyOrderData>",
        key_info_body(signature, Some(&timestamp(now)))?,
        el("PartnerID", partner_id),
        el("UserID", user_id)
    ))
}

/// `HIARequestOrderData`: X002 и E002.
pub fn hia_order_data(
    partner_id: &str,
    user_id: &str,
    authentication: &PubKeyInfo<'_>,
    encryption: &PubKeyInfo<'_>,
) -> Result<String> {
    Ok(format!(
        "{XML_DECL}<HIARequestOrderData xmlns=\"{NS_H004}\" xmlns:ds=\"{NS_DS}\">\
         <AuthenticationPubKeyInfo>{}<AuthenticationVersion>X002</AuthenticationVersion></AuthenticationPubKeyInfo>\
         <EncryptionPubKeyInfo>{}<EncryptionVersion>E002</EncryptionVersion></EncryptionPubKeyInfo>\
         {}{}</HIARequestOrderData>",
        key_info_body(authentication, None)?,
        key_info_body(encryption, None)?,
        el("PartnerID", partner_id),
        el("UserID", user_id)
    ))
}

/// Поля `static`, общие для всех запросов пользователя.
#[derive(Debug, Clone, Copy)]
pub struct Static<'a> {
    pub host_id: &'a str,
    pub partner_id: &'a str,
    pub user_id: &'a str,
    pub product: &'a str,
}

impl Static<'_> {
    fn ids(&self) -> String {
        format!(
            "{}{}{}<Product Language=\"en\">{}</Product>",
            el("HostID", self.host_id),
            el("PartnerID", self.partner_id),
            el("UserID", self.user_id),
            text(self.product)
        )
    }

    fn signed_ids(&self, now: DateTime<Utc>) -> String {
        format!(
            "{}{}{}{}{}<Product Language=\"en\">{}</Product>",
            el("HostID", self.host_id),
            el("Nonce", &crypto::request_nonce()),
            el("Timestamp", &timestamp(now)),
            el("PartnerID", self.partner_id),
            el("UserID", self.user_id),
            text(self.product)
        )
    }
}

/// SHA-256 открытых ключей банка для `BankPubKeyDigests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankDigests {
    pub authentication: [u8; 32],
    pub encryption: [u8; 32],
}

impl BankDigests {
    pub fn of(authentication: &RsaPublicKey, encryption: &RsaPublicKey) -> Self {
        Self {
            authentication: crypto::key_digest(authentication),
            encryption: crypto::key_digest(encryption),
        }
    }
}

fn envelope(root: &str, header: &str, auth: &str, body: &str) -> String {
    format!(
        "{XML_DECL}<{root} xmlns=\"{NS_H004}\" xmlns:ds=\"{NS_DS}\" Version=\"H004\" Revision=\"1\">\
         {header}{auth}{body}</{root}>"
    )
}

/// `AuthSignature` над всеми элементами с `authenticate="true"` в порядке
/// документа.
fn auth_signature(authenticated: &[&str], key: &RsaPrivateKey) -> String {
    let canonical: String = authenticated.iter().map(|f| with_ns(f)).collect();
    let digest = crypto::b64(&crypto::sha256(canonical.as_bytes()));
    let signed_info = format!(
        "<ds:SignedInfo>\
         <ds:CanonicalizationMethod Algorithm=\"{C14N}\"></ds:CanonicalizationMethod>\
         <ds:SignatureMethod Algorithm=\"{RSA_SHA256}\"></ds:SignatureMethod>\
         <ds:Reference URI=\"{AUTH_XPOINTER}\"><ds:Transforms>\
         <ds:Transform Algorithm=\"{C14N}\"></ds:Transform></ds:Transforms>\
         <ds:DigestMethod Algorithm=\"{SHA256}\"></ds:DigestMethod>\
         <ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"
    );
    let signature = crypto::sign_x002(key, with_ns(&signed_info).as_bytes());
    format!(
        "<AuthSignature>{signed_info}<ds:SignatureValue>{}</ds:SignatureValue></AuthSignature>",
        crypto::b64(&signature)
    )
}

/// INI/HIA: без подписи, данные заказа сжаты zlib и закодированы base64.
pub fn unsecured_request(h: &Static<'_>, order_type: OrderType, order_data: &[u8]) -> Result<String> {
    let compressed = crypto::deflate(order_data)?;
    let header = format!(
        "<header authenticate=\"true\"><static>{}<OrderDetails>{}\
         <OrderAttribute>DZNNN</OrderAttribute></OrderDetails>\
         <SecurityMedium>0000</SecurityMedium></static><mutable></mutable></header>",
        h.ids(),
        el("OrderType", order_type.code())
    );
    let body = format!(
        "<body><DataTransfer><OrderData>{}</OrderData></DataTransfer></body>",
        crypto::b64(&compressed)
    );
    Ok(envelope("ebicsUnsecuredRequest", &header, "", &body))
}

/// HPB: подписан X002, ключей банка ещё нет.
pub fn hpb_request(h: &Static<'_>, key: &RsaPrivateKey, now: DateTime<Utc>) -> String {
    let header = format!(
        "<header authenticate=\"true\"><static>{}<OrderDetails><OrderType>HPB</OrderType>\
         <OrderAttribute>DZHNN</OrderAttribute></OrderDetails>\
         <SecurityMedium>0000</SecurityMedium></static><mutable></mutable></header>",
        h.signed_ids(now)
    );
    let auth = auth_signature(&[&header], key);
    envelope("ebicsNoPubKeyDigestsRequest", &header, &auth, "<body></body>")
}

/// Фаза Initialisation скачивания.
pub fn download_init(
    h: &Static<'_>,
    order_type: OrderType,
    range: Option<(NaiveDate, NaiveDate)>,
    digests: &BankDigests,
    key: &RsaPrivateKey,
    now: DateTime<Utc>,
) -> String {
    let range = range
        .map(|(start, end)| {
            format!(
                "<DateRange>{}{}</DateRange>",
                el("Start", &start.format("%Y-%m-%d").to_string()),
                el("End", &end.format("%Y-%m-%d").to_string())
            )
        })
        .unwrap_or_default();
    let header = format!(
        "<header authenticate=\"true\"><static>{}<OrderDetails>{}\
         <OrderAttribute>DZHNN</OrderAttribute>\
         <StandardOrderParams>{range}</StandardOrderParams></OrderDetails>\
         <BankPubKeyDigests>\
         <Authentication Algorithm=\"{SHA256}\" Version=\"X002\">{}</Authentication>\
         <Encryption Algorithm=\"{SHA256}\" Version=\"E002\">{}</Encryption>\
         </BankPubKeyDigests><SecurityMedium>0000</SecurityMedium></static>\
         <mutable><TransactionPhase>Initialisation</TransactionPhase></mutable></header>",
        h.signed_ids(now),
        el("OrderType", order_type.code()),
        crypto::b64(&digests.authentication),
        crypto::b64(&digests.encryption)
    );
    let auth = auth_signature(&[&header], key);
    envelope("ebicsRequest", &header, &auth, "<body></body>")
}

/// Фаза Transfer: следующий сегмент (нумерация с 1).
pub fn download_transfer(
    host_id: &str,
    transaction: &TransactionId,
    segment: u32,
    last: bool,
    key: &RsaPrivateKey,
) -> String {
    let header = format!(
        "<header authenticate=\"true\"><static>{}{}</static>\
         <mutable><TransactionPhase>Transfer</TransactionPhase>\
         <SegmentNumber lastSegment=\"{last}\">{segment}</SegmentNumber></mutable></header>",
        el("HostID", host_id),
        el("TransactionID", &transaction.0)
    );
    let auth = auth_signature(&[&header], key);
    envelope("ebicsRequest", &header, &auth, "<body></body>")
}

/// Фаза Receipt: код 0: данные приняты, 1: нет.
pub fn download_receipt(
    host_id: &str,
    transaction: &TransactionId,
    success: bool,
    key: &RsaPrivateKey,
) -> String {
    let header = format!(
        "<header authenticate=\"true\"><static>{}{}</static>\
         <mutable><TransactionPhase>Receipt</TransactionPhase></mutable></header>",
        el("HostID", host_id),
        el("TransactionID", &transaction.0)
    );
    let receipt = format!(
        "<TransferReceipt authenticate=\"true\"><ReceiptCode>{}</ReceiptCode></TransferReceipt>",
        if success { 0 } else { 1 }
    );
    let auth = auth_signature(&[&header, &receipt], key);
    envelope("ebicsRequest", &header, &auth, &format!("<body>{receipt}</body>"))
}

/// Разобранный `ebicsResponse` / `ebicsKeyManagementResponse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EbicsResponse {
    pub transaction_id: Option<String>,
    pub num_segments: Option<u32>,
    pub segment_number: Option<u32>,
    pub last_segment: bool,
    /// `header/mutable/ReturnCode`
    pub technical_code: String,
    pub technical_text: String,
    /// `body/ReturnCode`
    pub business_code: String,
    pub transaction_key: Option<String>,
    pub order_data: Option<String>,
}

fn parse_u32(field: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|e| EbicsError::Xml(format!("{field} {value:?}: {e}")))
}

pub fn parse_response(xml: &[u8]) -> Result<EbicsResponse> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut resp = EbicsResponse::default();
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.is_empty() && !name.starts_with("ebics") {
                    return Err(EbicsError::Xml(format!("unexpected response root <{name}>")));
                }
                if name == "SegmentNumber" {
                    for a in e.attributes().flatten() {
                        if a.key.local_name().as_ref() == b"lastSegment" {
                            resp.last_segment = a.value.as_ref() == b"true";
                        }
                    }
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape().map_err(EbicsError::xml)?.into_owned();
                let rel: Vec<&str> = path.iter().skip(1).map(String::as_str).collect();
                match rel.as_slice() {
                    ["header", "static", "TransactionID"] => resp.transaction_id = Some(value),
                    ["header", "static", "NumSegments"] => {
                        resp.num_segments = Some(parse_u32("NumSegments", &value)?)
                    }
                    ["header", "mutable", "SegmentNumber"] => {
                        resp.segment_number = Some(parse_u32("SegmentNumber", &value)?)
                    }
                    ["header", "mutable", "ReturnCode"] => resp.technical_code = value,
                    ["header", "mutable", "ReportText"] => resp.technical_text = value,
                    ["body", "ReturnCode"] => resp.business_code = value,
                    ["body", "DataTransfer", "DataEncryptionInfo", "TransactionKey"] => {
                        resp.transaction_key = Some(value)
                    }
                    ["body", "DataTransfer", "OrderData"] => resp.order_data = Some(value),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EbicsError::xml(e)),
            _ => {}
        }
        buf.clear();
    }

    if resp.technical_code.is_empty() {
        return Err(EbicsError::Xml("response carries no ReturnCode".into()));
    }
    Ok(resp)
}

fn rsa_key(modulus: &str, exponent: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::new(
        BigUint::from_bytes_be(&crypto::unb64(modulus)?),
        BigUint::from_bytes_be(&crypto::unb64(exponent)?),
    )
    .map_err(EbicsError::crypto)
}

/// `HPBResponseOrderData` → (X002, E002) банка.
pub fn parse_hpb(xml: &[u8]) -> Result<(RsaPublicKey, RsaPublicKey)> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    // [модуль, экспонента] для X002 и E002
    let mut auth: [Option<String>; 2] = [None, None];
    let mut enc: [Option<String>; 2] = [None, None];
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Text(t)) => {
                let value = t.unescape().map_err(EbicsError::xml)?.into_owned();
                let slot = if path.iter().any(|p| p == "AuthenticationPubKeyInfo") {
                    &mut auth
                } else if path.iter().any(|p| p == "EncryptionPubKeyInfo") {
                    &mut enc
                } else {
                    buf.clear();
                    continue;
                };
                match path.last().map(String::as_str) {
                    Some("Modulus") => slot[0] = Some(value),
                    Some("Exponent") => slot[1] = Some(value),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EbicsError::xml(e)),
            _ => {}
        }
        buf.clear();
    }

    match (auth, enc) {
        ([Some(am), Some(ae)], [Some(em), Some(ee)]) => Ok((rsa_key(&am, &ae)?, rsa_key(&em, &ee)?)),
        _ => Err(EbicsError::Xml(
            "HPB response lacks bank authentication or encryption key".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct HtdOrderData {
    #[serde(rename = "UserInfo")]
    user_info: HtdUserInfo,
}

#[derive(Debug, Deserialize)]
struct HtdUserInfo {
    #[serde(rename = "Permission", default)]
    permissions: Vec<HtdPermission>,
}

#[derive(Debug, Deserialize)]
struct HtdPermission {
    #[serde(rename = "@AuthorisationLevel", default)]
    level: Option<String>,
    #[serde(rename = "OrderTypes", default)]
    order_types: Option<String>,
}

/// Типы заказов из `HTDResponseOrderData/UserInfo/Permission` для уровня
/// `level`. Без атрибута уровень считается `T`.
pub fn parse_permitted_order_types(xml: &[u8], level: &str) -> Result<Vec<String>> {
    let xml = std::str::from_utf8(xml).map_err(EbicsError::xml)?;
    let data: HtdOrderData = quick_xml::de::from_str(xml).map_err(EbicsError::xml)?;
    Ok(data
        .user_info
        .permissions
        .into_iter()
        .filter(|p| p.level.as_deref().unwrap_or(DEFAULT_AUTHORISATION_LEVEL) == level)
        .flat_map(|p| {
            p.order_types
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::tests::small_key;
    use rsa::{
        pkcs1v15::{Signature, VerifyingKey},
        signature::Verifier,
    };
    use sha2::Sha256;

    fn between<'a>(xml: &'a str, open: &str, close: &str) -> &'a str {
        let start = xml.find(open).unwrap();
        let end = xml[start..].find(close).unwrap() + start + close.len();
        &xml[start..end]
    }

    /// Ответ HPB в том виде, в каком его шифрует банк.
    pub(crate) fn hpb_order_data(auth: &RsaPublicKey, enc: &RsaPublicKey) -> String {
        format!(
            "<HPBResponseOrderData xmlns=\"{NS_H004}\" xmlns:ds=\"{NS_DS}\">\
             <AuthenticationPubKeyInfo><PubKeyValue>{}</PubKeyValue>\
             <AuthenticationVersion>X002</AuthenticationVersion></AuthenticationPubKeyInfo>\
             <EncryptionPubKeyInfo><PubKeyValue>{}</PubKeyValue>\
             <EncryptionVersion>E002</EncryptionVersion></EncryptionPubKeyInfo>\
             <HostID>HOST</HostID></HPBResponseOrderData>",
            rsa_key_value(auth),
            rsa_key_value(enc)
        )
    }

    fn stat() -> Static<'static> {
        Static {
            host_id: "EBIXHOST",
            partner_id: "PARTNER1",
            user_id: "USER1",
            product: "ebicslib test",
        }
    }

    #[test]
    fn auth_signature_verifies_over_canonical_header() {
        let key = small_key();
        let xml = hpb_request(&stat(), &key, Utc::now());

        let header = between(&xml, "<header ", "</header>");
        let digest = between(&xml, "<ds:DigestValue>", "</ds:DigestValue>");
        let expected = crypto::b64(&crypto::sha256(with_ns(header).as_bytes()));
        assert_eq!(digest, format!("<ds:DigestValue>{expected}</ds:DigestValue>"));

        let signed_info = between(&xml, "<ds:SignedInfo>", "</ds:SignedInfo>");
        let sig = between(&xml, "<ds:SignatureValue>", "</ds:SignatureValue>");
        let sig = &sig["<ds:SignatureValue>".len()..sig.len() - "</ds:SignatureValue>".len()];
        let sig = Signature::try_from(crypto::unb64(sig).unwrap().as_slice()).unwrap();
        VerifyingKey::<Sha256>::new(RsaPublicKey::from(&key))
            .verify(with_ns(signed_info).as_bytes(), &sig)
            .unwrap();

        assert!(xml.contains("<OrderType>HPB</OrderType>"));
        assert!(xml.starts_with(XML_DECL));
    }

    #[test]
    fn receipt_signs_header_and_transfer_receipt() {
        let key = small_key();
        let tx = TransactionId("0123456789ABCDEF0123456789ABCDEF".into());
        let xml = download_receipt("EBIXHOST", &tx, true, &key);
        let header = between(&xml, "<header ", "</header>");
        let receipt = between(&xml, "<TransferReceipt ", "</TransferReceipt>");
        let expected = crypto::b64(&crypto::sha256(
            format!("{}{}", with_ns(header), with_ns(receipt)).as_bytes(),
        ));
        assert!(xml.contains(&expected));
        assert!(receipt.contains("<ReceiptCode>0</ReceiptCode>"));
    }

    #[test]
    fn download_init_carries_range_and_bank_digests() {
        let key = small_key();
        let bank = RsaPublicKey::from(&small_key());
        let digests = BankDigests::of(&bank, &bank);
        let range = (
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        );
        let xml = download_init(&stat(), OrderType::C53, Some(range), &digests, &key, Utc::now());
        assert!(xml.contains("<DateRange><Start>2024-03-01</Start><End>2024-03-31</End></DateRange>"));
        assert!(xml.contains(&crypto::b64(&crypto::key_digest(&bank))));
        assert!(xml.contains("<TransactionPhase>Initialisation</TransactionPhase>"));

        let htd = download_init(&stat(), OrderType::Htd, None, &digests, &key, Utc::now());
        assert!(htd.contains("<StandardOrderParams></StandardOrderParams>"));
    }

    #[test]
    fn unsecured_request_compresses_order_data() {
        let xml = unsecured_request(&stat(), OrderType::Ini, b"<SignaturePubKeyOrderData/>").unwrap();
        let data = between(&xml, "<OrderData>", "</OrderData>");
        let data = &data["<OrderData>".len()..data.len() - "</OrderData>".len()];
        let plain = crypto::inflate(&crypto::unb64(data).unwrap()).unwrap();
        assert_eq!(plain, b"<SignaturePubKeyOrderData/>");
        assert!(xml.contains("<OrderAttribute>DZNNN</OrderAttribute>"));
        assert!(!xml.contains("AuthSignature"));
    }

    #[test]
    fn ini_order_data_embeds_key_and_certificate() {
        let key = small_key();
        let public = RsaPublicKey::from(&key);
        let subject = crate::certificate::Subject::new("Max", "ACME & Co", "DE").unwrap();
        let der = crate::certificate::self_signed(&key, &subject, 3).unwrap();
        let now = Utc::now();

        let bare = ini_order_data("P1", "U1", &PubKeyInfo { key: &public, certificate: None }, now).unwrap();
        assert!(!bare.contains("X509Data"));
        assert!(bare.contains(&crypto::b64(&public.n().to_bytes_be())));
        assert!(bare.contains("<SignatureVersion>A005</SignatureVersion>"));

        let with_cert = ini_order_data(
            "P1",
            "U1",
            &PubKeyInfo { key: &public, certificate: Some(der.as_slice()) },
            now,
        )
        .unwrap();
        assert!(with_cert.contains("<ds:X509SerialNumber>3</ds:X509SerialNumber>"));
        assert!(with_cert.contains("ACME &amp; Co"));

        let hia = hia_order_data(
            "P1",
            "U1",
            &PubKeyInfo { key: &public, certificate: None },
            &PubKeyInfo { key: &public, certificate: None },
        )
        .unwrap();
        assert!(hia.contains("<AuthenticationVersion>X002</AuthenticationVersion>"));
        assert!(hia.contains("<EncryptionVersion>E002</EncryptionVersion>"));
    }

    #[test]
    fn parses_download_response() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ebicsResponse xmlns="urn:org:ebics:H004" Version="H004" Revision="1">
  <header authenticate="true">
    <static>
      <TransactionID>0123456789ABCDEF0123456789ABCDEF</TransactionID>
      <NumSegments>2</NumSegments>
    </static>
    <mutable>
      <TransactionPhase>Initialisation</TransactionPhase>
      <SegmentNumber lastSegment="false">1</SegmentNumber>
      <ReturnCode>000000</ReturnCode>
      <ReportText>[EBICS_OK] OK</ReportText>
    </mutable>
  </header>
  <body>
    <DataTransfer>
      <DataEncryptionInfo authenticate="true">
        <EncryptionPubKeyDigest Version="E002" Algorithm="http://www.w3.org/2001/04/xmlenc#sha256">AAAA</EncryptionPubKeyDigest>
        <TransactionKey>dGs=</TransactionKey>
      </DataEncryptionInfo>
      <OrderData>b3JkZXI=</OrderData>
    </DataTransfer>
    <ReturnCode authenticate="true">000000</ReturnCode>
  </body>
</ebicsResponse>"#;
        let r = parse_response(xml).unwrap();
        assert_eq!(r.transaction_id.as_deref(), Some("0123456789ABCDEF0123456789ABCDEF"));
        assert_eq!(r.num_segments, Some(2));
        assert_eq!(r.segment_number, Some(1));
        assert!(!r.last_segment);
        assert_eq!(r.technical_code, "000000");
        assert_eq!(r.business_code, "000000");
        assert_eq!(r.transaction_key.as_deref(), Some("dGs="));
        assert_eq!(r.order_data.as_deref(), Some("b3JkZXI="));
    }

    #[test]
    fn rejects_html_error_pages() {
        assert!(parse_response(b"<html><body>502</body></html>").is_err());
    }

    #[test]
    fn hpb_keys_round_trip() {
        let auth = RsaPublicKey::from(&small_key());
        let enc = RsaPublicKey::from(&small_key());
        let (a, e) = parse_hpb(hpb_order_data(&auth, &enc).as_bytes()).unwrap();
        assert_eq!(a, auth);
        assert_eq!(e, enc);
        assert!(parse_hpb(b"<HPBResponseOrderData/>").is_err());
    }

    #[test]
    fn htd_filters_by_authorisation_level() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<HTDResponseOrderData xmlns="urn:org:ebics:H004" xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
  <PartnerInfo><AddressInfo><Name>ACME</Name></AddressInfo></PartnerInfo>
  <UserInfo>
    <UserID Status="1">USER1</UserID>
    <Name>Max</Name>
    <Permission AuthorisationLevel="E"><OrderTypes>CCT CDD</OrderTypes></Permission>
    <Permission AuthorisationLevel="T"><OrderTypes>C52 C53
      C54</OrderTypes></Permission>
    <Permission><OrderTypes>HTD</OrderTypes></Permission>
  </UserInfo>
</HTDResponseOrderData>"#;
        assert_eq!(
            parse_permitted_order_types(xml, "T").unwrap(),
            ["C52", "C53", "C54", "HTD"]
        );
        assert_eq!(parse_permitted_order_types(xml, "E").unwrap(), ["CCT", "CDD"]);
        assert!(parse_permitted_order_types(xml, "A").unwrap().is_empty());
    }
}
