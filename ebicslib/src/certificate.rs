//! Самоподписанные X.509-сертификаты для банков, которые требуют
//! регистрацию по сертификатам, а не по «голым» ключам.

use crate::error::{EbicsError, Result};
use regex::Regex;
use rsa::{pkcs1v15::SigningKey, pkcs8::EncodePublicKey, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    der::{Decode, Encode},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
};

const VALIDITY: Duration = Duration::from_secs(5 * 365 * 24 * 60 * 60);

/// Субъект сертификата: CN, O, C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub common_name: String,
    pub organization: String,
    pub country: String,
}

impl Subject {
    /// Код страны: ровно две заглавные буквы, иначе ошибка вызывающего.
    pub fn new(
        common_name: impl Into<String>,
        organization: impl Into<String>,
        country: impl Into<String>,
    ) -> Result<Self> {
        let country = country.into();
        let re = Regex::new(r"^[A-Z]{2}$").map_err(|e| EbicsError::Validation(e.to_string()))?;
        if !re.is_match(&country) {
            return Err(EbicsError::Validation(format!(
                "country code must be two uppercase letters, got {country:?}"
            )));
        }
        let common_name = common_name.into();
        if common_name.trim().is_empty() {
            return Err(EbicsError::Validation("common name is empty".into()));
        }
        Ok(Self {
            common_name,
            organization: organization.into(),
            country,
        })
    }

    fn rdn(&self) -> String {
        format!(
            "CN={},O={},C={}",
            escape(&self.common_name),
            escape(&self.organization),
            self.country
        )
    }
}

/// RFC 4514
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' | ' ' if i == 0 => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Сертификат в DER, подписанный тем же ключом (SHA-256 с RSA).
pub fn self_signed(key: &RsaPrivateKey, subject: &Subject, serial: u32) -> Result<Vec<u8>> {
    let name = Name::from_str(&subject.rdn()).map_err(EbicsError::crypto)?;
    let spki_der = RsaPublicKey::from(key)
        .to_public_key_der()
        .map_err(EbicsError::crypto)?;
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).map_err(EbicsError::crypto)?;
    let validity = Validity::from_now(VALIDITY).map_err(EbicsError::crypto)?;

    let signer = SigningKey::<Sha256>::new(key.clone());
    let builder = CertificateBuilder::new(
        Profile::Root,
        SerialNumber::from(serial),
        validity,
        name,
        spki,
        &signer,
    )
    .map_err(EbicsError::crypto)?;
    let cert = builder
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(EbicsError::crypto)?;
    cert.to_der().map_err(EbicsError::crypto)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tests::small_key;
    use x509_cert::Certificate;

    #[test]
    fn country_code_is_validated_first() {
        for bad in ["de", "DEU", "D", "", "D1"] {
            let err = Subject::new("Max", "ACME", bad).unwrap_err();
            assert!(matches!(err, EbicsError::Validation(_)), "{bad}");
        }
        assert!(Subject::new("Max", "ACME", "DE").is_ok());
    }

    #[test]
    fn escapes_special_characters() {
        assert_eq!(escape("Muster, Max"), "Muster\\, Max");
        assert_eq!(escape("#1 GmbH"), "\\#1 GmbH");
    }

    #[test]
    fn builds_a_parsable_certificate() {
        let key = small_key();
        let subject = Subject::new("Max Muster", "ACME, Inc.", "DE").unwrap();
        let der = self_signed(&key, &subject, 7).unwrap();
        let cert = Certificate::from_der(&der).unwrap();
        let subject = cert.tbs_certificate.subject.to_string();
        assert!(subject.contains("CN=Max Muster"), "{subject}");
        assert!(subject.contains("C=DE"), "{subject}");
    }
}
