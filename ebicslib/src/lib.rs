//! EBICS-клиент: ключи и сертификаты пользователя, обмен с
//! банком (INI, HIA, HPB, HTD, C52/C53/C54), разбор CAMT-выписок и их
//! загрузка в приёмник хоста.

pub mod error;
pub mod model;
pub mod traits;
pub mod diagnostics;

pub mod crypto;
pub mod keyring;
pub mod certificate;
pub mod identity;
pub mod store;

pub mod document;
pub mod protocol;
pub mod session;
pub mod admin;
pub mod ini_letter;
pub mod lifecycle;

pub mod ingest;
pub mod sync;
pub mod sink;

pub mod config;
pub mod logging;

pub mod formats {
    pub mod archive;
    pub mod camt;
    pub mod camt054;
    pub mod csv;
}
