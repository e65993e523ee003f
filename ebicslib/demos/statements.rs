use ebicslib::{
    document::build_documents,
    formats::csv::RecordCsv,
    ingest::normalize,
    model::AccountRef,
    traits::WriteFormat,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Пример: camt.052/053 из файла -> CSV записей (stdout), без приёмника и дедупликации
    let path = std::env::args().nth(1).ok_or("usage: statements <camt.xml>")?;
    let xml = std::fs::read(&path)?;
    let mut records = Vec::new();
    for doc in build_documents(&path, &xml, None)? {
        let account = AccountRef(doc.iban.clone());
        for tx in &doc.transactions {
            records.push(normalize(tx, &account, "-"));
        }
    }
    RecordCsv::write(std::io::stdout(), records.as_slice())?;
    Ok(())
}
