//! Синхронизация одной идентичности: права, скачивание, разбор, квитанция.

use crate::{
    error::Result,
    ingest::{IngestReport, StatementIngestionPipeline},
    model::{DateRange, Identity},
    protocol::{xml::DEFAULT_AUTHORISATION_LEVEL, OrderType},
    session::ProtocolSession,
    traits::{DiagnosticContext, KeyringStore, Severity},
};
use chrono::NaiveDate;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub range: DateRange,
    /// C52 вместо C53; диапазон тогда не используется.
    pub intraday: bool,
}

impl SyncRequest {
    pub fn booked(range: DateRange) -> Self {
        Self {
            range,
            intraday: false,
        }
    }

    pub fn intraday() -> Self {
        Self {
            range: DateRange::unbounded(),
            intraday: true,
        }
    }

    /// Запрос, начинающийся сегодня, может быть только внутридневным.
    pub fn for_range(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> Self {
        if from == Some(today) {
            Self::intraday()
        } else {
            Self::booked(DateRange::new(from, to))
        }
    }

    fn order_type(&self) -> OrderType {
        if self.intraday {
            OrderType::C52
        } else {
            OrderType::C53
        }
    }
}

/// Любая ошибка до квитанции прерывает синхронизацию без неё, и банк
/// отдаст те же данные при следующей попытке.
pub fn sync_identity(
    session: &ProtocolSession,
    pipeline: &mut StatementIngestionPipeline<'_>,
    request: &SyncRequest,
) -> Result<IngestReport> {
    let identity = pipeline.config().identity.clone();
    let needed = request.order_type();

    let permitted = session.permitted_order_types(DEFAULT_AUTHORISATION_LEVEL)?;
    if !permitted.iter().any(|t| t == needed.code()) {
        // банк всё равно решает сам, поэтому скачивание не отменяется
        pipeline.diagnostics().record(
            Severity::Error,
            &format!(
                "EBICS user {identity} lacks permission {needed}, permitted: {}",
                permitted.join(", ")
            ),
            &DiagnosticContext::identity(&identity),
        );
    }

    let mut stream = if request.intraday {
        session.download_intraday_statements()?
    } else {
        session.download_statements(request.range, pipeline.config().split_batches)?
    };
    let report = pipeline.ingest(&mut stream)?;
    let token = stream.finish()?;
    session.confirm_download(token)?;

    info!(
        identity = %identity,
        order = %needed,
        created = report.created,
        duplicates = report.duplicates,
        skipped = report.skipped_documents,
        "sync finished"
    );
    Ok(report)
}

/// Идентичности, готовые к синхронизации. Для внутридневной нужен
/// ещё флаг `intraday_sync`.
pub fn eligible_for_sync<'i>(
    identities: &'i [Identity],
    intraday: bool,
    store: &dyn KeyringStore,
) -> Result<Vec<&'i Identity>> {
    let mut eligible = Vec::new();
    for identity in identities {
        if !identity.initialized
            || !identity.bank_keys_activated
            || !identity.has_stored_passphrase
            || (intraday && !identity.intraday_sync)
        {
            continue;
        }
        if store.load(&identity.reference())?.is_none() {
            continue;
        }
        eligible.push(identity);
    }
    Ok(eligible)
}
