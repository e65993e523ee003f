//! INI-письмо: бумажное подтверждение открытых ключей пользователя,
//! которое банк сверяет с полученными INI/HIA.

use crate::{
    crypto,
    error::{EbicsError, Result},
    identity::CryptoIdentity,
    keyring::KeyVersion,
};
use chrono::{DateTime, Local};
use printpdf::*;
use rsa::{traits::PublicKeyParts, RsaPublicKey};

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const LEFT: f32 = 20.0;
const TOP: f32 = 277.0;
const BOTTOM: f32 = 20.0;
/// Байт в строке модуля.
const HEX_BYTES_PER_LINE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    De,
    Fr,
    #[default]
    En,
}

impl Language {
    /// Неизвестный код: английский.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "de" => Language::De,
            "fr" => Language::Fr,
            _ => Language::En,
        }
    }

    fn labels(self) -> &'static Labels {
        match self {
            Language::De => &DE,
            Language::Fr => &FR,
            Language::En => &EN,
        }
    }

    fn date_format(self) -> &'static str {
        match self {
            Language::De => "%d.%m.%Y",
            Language::Fr => "%d/%m/%Y",
            Language::En => "%Y-%m-%d",
        }
    }
}

struct Labels {
    title: &'static str,
    date: &'static str,
    time: &'static str,
    recipient: &'static str,
    user_id: &'static str,
    partner_id: &'static str,
    host_id: &'static str,
    /// A005, X002, E002
    keys: [&'static str; 3],
    exponent: &'static str,
    modulus: &'static str,
    hash: &'static str,
    confirmation: &'static str,
    place_date: &'static str,
    signature: &'static str,
}

static EN: Labels = Labels {
    title: "INI letter",
    date: "Date",
    time: "Time",
    recipient: "Recipient",
    user_id: "User ID",
    partner_id: "Partner ID",
    host_id: "Host ID",
    keys: [
        "Signature key (A005)",
        "Authentication key (X002)",
        "Encryption key (E002)",
    ],
    exponent: "Exponent",
    modulus: "Modulus",
    hash: "SHA-256 hash",
    confirmation: "I hereby confirm the above public keys for my electronic banking access.",
    place_date: "Place/date",
    signature: "Signature",
};

static DE: Labels = Labels {
    title: "INI-Brief",
    date: "Datum",
    time: "Uhrzeit",
    recipient: "Empfänger",
    user_id: "Teilnehmer-ID",
    partner_id: "Kunden-ID",
    host_id: "Host-ID",
    keys: [
        "Signaturschlüssel (A005)",
        "Authentifikationsschlüssel (X002)",
        "Verschlüsselungsschlüssel (E002)",
    ],
    exponent: "Exponent",
    modulus: "Modulus",
    hash: "Hash (SHA-256)",
    confirmation: "Hiermit bestätige ich die oben genannten öffentlichen Schlüssel für meinen elektronischen Bankzugang.",
    place_date: "Ort/Datum",
    signature: "Unterschrift",
};

static FR: Labels = Labels {
    title: "Lettre d'initialisation INI",
    date: "Date",
    time: "Heure",
    recipient: "Destinataire",
    user_id: "ID utilisateur",
    partner_id: "ID client",
    host_id: "ID hôte",
    keys: [
        "Clé de signature (A005)",
        "Clé d'authentification (X002)",
        "Clé de chiffrement (E002)",
    ],
    exponent: "Exposant",
    modulus: "Module",
    hash: "Hash (SHA-256)",
    confirmation: "Je confirme par la présente les clés publiques ci-dessus pour mon accès bancaire électronique.",
    place_date: "Lieu/date",
    signature: "Signature",
};

/// Строка письма; раскладка по страницам делается при рендеринге.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Title(String),
    Field(String, String),
    Heading(String),
    Mono(String),
    Text(String),
    Gap,
    SignatureLine(String),
}

impl Row {
    fn height(&self) -> f32 {
        match self {
            Row::Title(_) => 12.0,
            Row::Heading(_) => 8.0,
            Row::Gap => 4.0,
            Row::SignatureLine(_) => 20.0,
            _ => 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LetterKey {
    exponent: String,
    modulus: Vec<String>,
    hash: String,
}

fn hex_pairs(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(HEX_BYTES_PER_LINE)
        .map(|chunk| {
            chunk
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

impl LetterKey {
    fn new(key: &RsaPublicKey) -> Self {
        Self {
            exponent: hex_pairs(&key.e().to_bytes_be()).join(" "),
            modulus: hex_pairs(&key.n().to_bytes_be()),
            hash: crypto::fingerprint(key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniLetter {
    bank_name: String,
    user_id: String,
    partner_id: String,
    host_id: String,
    created: DateTime<Local>,
    language: Language,
    keys: Vec<LetterKey>,
}

impl IniLetter {
    pub fn new(
        identity: &CryptoIdentity,
        bank_name: &str,
        user_id: &str,
        partner_id: &str,
        host_id: &str,
        language: Language,
        created: DateTime<Local>,
    ) -> Result<Self> {
        let keys = KeyVersion::ALL
            .into_iter()
            .map(|v| Ok(LetterKey::new(&identity.public_key(v)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            bank_name: bank_name.to_string(),
            user_id: user_id.to_string(),
            partner_id: partner_id.to_string(),
            host_id: host_id.to_string(),
            created,
            language,
            keys,
        })
    }

    pub fn rows(&self) -> Vec<Row> {
        let l = self.language.labels();
        let mut rows = vec![
            Row::Title(l.title.to_string()),
            Row::Field(
                l.date.into(),
                self.created.format(self.language.date_format()).to_string(),
            ),
            Row::Field(l.time.into(), self.created.format("%H:%M:%S").to_string()),
            Row::Field(l.recipient.into(), self.bank_name.clone()),
            Row::Field(l.user_id.into(), self.user_id.clone()),
            Row::Field(l.partner_id.into(), self.partner_id.clone()),
            Row::Field(l.host_id.into(), self.host_id.clone()),
        ];
        for (key, label) in self.keys.iter().zip(l.keys) {
            rows.push(Row::Gap);
            rows.push(Row::Heading(label.to_string()));
            rows.push(Row::Field(l.exponent.into(), key.exponent.clone()));
            rows.push(Row::Text(format!("{}:", l.modulus)));
            rows.extend(key.modulus.iter().cloned().map(Row::Mono));
            rows.push(Row::Text(format!("{}:", l.hash)));
            // 32 байта хэша в две строки
            let (first, second) = key.hash.split_at(key.hash.len().min(16 * 3));
            rows.push(Row::Mono(first.trim().to_string()));
            if !second.trim().is_empty() {
                rows.push(Row::Mono(second.trim().to_string()));
            }
        }
        rows.push(Row::Gap);
        rows.push(Row::Text(l.confirmation.to_string()));
        rows.push(Row::SignatureLine(format!("{}                                   {}", l.place_date, l.signature)));
        rows
    }

    pub fn to_pdf(&self) -> Result<Vec<u8>> {
        let title = self.language.labels().title;
        let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
        let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf)?;
        let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf)?;
        let mono = doc.add_builtin_font(BuiltinFont::Courier).map_err(pdf)?;

        let mut current = doc.get_page(page).get_layer(layer);
        let mut y = TOP;
        for row in self.rows() {
            let height = row.height();
            if y - height < BOTTOM {
                let (page, layer) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
                current = doc.get_page(page).get_layer(layer);
                y = TOP;
            }
            match &row {
                Row::Title(text) => current.use_text(text.as_str(), 18.0, Mm(LEFT), Mm(y), &bold),
                Row::Heading(text) => current.use_text(text.as_str(), 12.0, Mm(LEFT), Mm(y), &bold),
                Row::Field(label, value) => {
                    current.use_text(format!("{label}:"), 10.0, Mm(LEFT), Mm(y), &regular);
                    current.use_text(value.as_str(), 10.0, Mm(LEFT + 45.0), Mm(y), &regular);
                }
                Row::Text(text) => current.use_text(text.as_str(), 10.0, Mm(LEFT), Mm(y), &regular),
                Row::Mono(text) => current.use_text(text.as_str(), 9.0, Mm(LEFT + 5.0), Mm(y), &mono),
                Row::Gap => {}
                Row::SignatureLine(text) => {
                    let line_y = y - 10.0;
                    current.add_line(Line {
                        points: vec![
                            (Point::new(Mm(LEFT), Mm(line_y)), false),
                            (Point::new(Mm(PAGE_W - LEFT), Mm(line_y)), false),
                        ],
                        is_closed: false,
                    });
                    current.use_text(text.as_str(), 8.0, Mm(LEFT), Mm(line_y - 4.0), &regular);
                }
            }
            y -= height;
        }
        doc.save_to_bytes().map_err(pdf)
    }
}

fn pdf<E: std::fmt::Display>(e: E) -> EbicsError {
    EbicsError::Pdf(e.to_string())
}
