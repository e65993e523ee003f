//! Распаковка данных заказа C52/C53/C54: ZIP с XML-файлами либо один XML.

use crate::error::{EbicsError, Result};
use std::io::{Cursor, Read, Write};
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SINGLE_DOCUMENT: &str = "document.xml";
/// Верхняя граница предварительного выделения под один файл архива.
const MAX_SIZE_HINT: u64 = 1 << 20;

/// Размер из заголовка ZIP, ограниченный сверху.
fn capacity_hint(declared: u64) -> usize {
    declared.min(MAX_SIZE_HINT) as usize
}

/// Документы архива, отсортированные по имени.
pub fn unpack(order_data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    if !order_data.starts_with(ZIP_MAGIC) {
        let head = order_data
            .iter()
            .find(|b| !b.is_ascii_whitespace() && **b != 0xEF && **b != 0xBB && **b != 0xBF);
        return match head {
            Some(b'<') => Ok(vec![(SINGLE_DOCUMENT.to_string(), order_data.to_vec())]),
            None => Ok(Vec::new()),
            Some(_) => Err(EbicsError::Parse("order data is neither ZIP nor XML".into())),
        };
    }

    let mut archive = ZipArchive::new(Cursor::new(order_data))?;
    let mut docs = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::with_capacity(capacity_hint(file.size()));
        file.read_to_end(&mut data)?;
        docs.push((name, data));
    }
    docs.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(docs)
}

/// Собирает ZIP в том же виде, в каком его отдаёт банк.
pub fn pack(docs: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in docs {
        zip.start_file(*name, SimpleFileOptions::default())?;
        zip.write_all(data)?;
    }
    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_entries_come_back_sorted() {
        let zip = pack(&[("b.xml", b"<b/>"), ("a.xml", b"<a/>")]).unwrap();
        let docs = unpack(&zip).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.0.as_str()).collect();
        assert_eq!(names, ["a.xml", "b.xml"]);
        assert_eq!(docs[0].1, b"<a/>");
    }

    #[test]
    fn bare_xml_is_one_document() {
        let docs = unpack(b"\xEF\xBB\xBF <Document/>").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "document.xml");
        assert!(unpack(b"").unwrap().is_empty());
        assert!(unpack(b"garbage").is_err());
    }

    #[test]
    fn declared_size_does_not_drive_allocation() {
        assert_eq!(capacity_hint(512), 512);
        assert_eq!(capacity_hint(u64::MAX), MAX_SIZE_HINT as usize);

        let big = vec![b'x'; (MAX_SIZE_HINT + 10) as usize];
        let zip = pack(&[("big.xml", big.as_slice())]).unwrap();
        assert_eq!(unpack(&zip).unwrap()[0].1.len(), big.len());
    }
}
