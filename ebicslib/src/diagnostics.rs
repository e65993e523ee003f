//! Реализации `Diagnostics`: в `tracing` и в память.

use crate::traits::{DiagnosticContext, Diagnostics, Severity};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Пишет диагностику событиями `tracing` с целью `ebics::diagnostics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, severity: Severity, message: &str, ctx: &DiagnosticContext) {
        let identity = ctx.identity.as_deref().unwrap_or("-");
        let document = ctx.document.as_deref().unwrap_or("-");
        let iban = ctx.iban.as_deref().unwrap_or("-");
        match severity {
            Severity::Info => {
                info!(target: "ebics::diagnostics", identity, document, iban, "{message}")
            }
            Severity::Warning => {
                warn!(target: "ebics::diagnostics", identity, document, iban, "{message}")
            }
            Severity::Error => {
                error!(target: "ebics::diagnostics", identity, document, iban, "{message}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRecord {
    pub severity: Severity,
    pub message: String,
    pub context: DiagnosticContext,
}

/// Копит записи в памяти, например для отчёта о синхронизации.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    records: Mutex<Vec<DiagnosticRecord>>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records()
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn record(&self, severity: Severity, message: &str, ctx: &DiagnosticContext) {
        // отравленный мьютекс не должен останавливать конвейер
        if let Ok(mut records) = self.records.lock() {
            records.push(DiagnosticRecord {
                severity,
                message: message.to_string(),
                context: ctx.clone(),
            });
        }
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for &D {
    fn record(&self, severity: Severity, message: &str, ctx: &DiagnosticContext) {
        (**self).record(severity, message, ctx)
    }
}
