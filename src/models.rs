use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// ============ Identity & period helpers ============

/// Millisecond timestamp used as entity id, matching the id scheme of
/// the persisted collections (creation time doubles as identity).
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns a fresh id strictly greater than every id in `existing`.
///
/// Ids are creation timestamps; two entities created within the same
/// millisecond (routine in tests) would otherwise collide.
pub fn fresh_id<I>(existing: I) -> i64
where
    I: IntoIterator<Item = i64>,
{
    let now = now_millis();
    let max = existing.into_iter().max().unwrap_or(0);
    if now > max {
        now
    } else {
        max + 1
    }
}

fn period_regex() -> &'static Regex {
    static PERIOD_RE: OnceLock<Regex> = OnceLock::new();
    PERIOD_RE.get_or_init(|| Regex::new(r"^(0[1-9]|1[0-2])/\d{4}$").expect("static regex"))
}

/// Validates a competence period in `MM/YYYY` form.
pub fn is_valid_period(period: &str) -> bool {
    period_regex().is_match(period)
}

/// The current competence period (`MM/YYYY`), the default for manual
/// processing runs.
pub fn current_period() -> String {
    let now = Utc::now();
    format!("{:02}/{}", now.month(), now.year())
}

/// Human-readable run timestamp stored on history entries.
pub fn timestamp_label(at: DateTime<Utc>) -> String {
    at.format("%d/%m/%Y %H:%M:%S").to_string()
}

// ============ Clients & certificates ============

/// A client of the accounting firm whose NFP documents are queried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    /// Unique identifier (creation-time millisecond timestamp).
    pub id: i64,
    /// Display name.
    pub name: String,
    /// CNPJ, possibly formatted; digits are extracted at query time.
    pub tax_id: String,
    /// Municipal registration ("inscrição municipal").
    pub municipal_registration: String,
    /// Certificate used for this client's queries, if assigned.
    pub certificate_id: Option<i64>,
    /// Inactive clients are skipped by processing runs.
    pub active: bool,
}

impl Client {
    /// All fields a document query needs are present.
    pub fn is_fully_configured(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.tax_id.trim().is_empty()
            && !self.municipal_registration.trim().is_empty()
            && self.certificate_id.is_some()
    }

    /// CNPJ reduced to digits, the form the query endpoint expects.
    pub fn tax_id_digits(&self) -> String {
        self.tax_id.chars().filter(|c| c.is_ascii_digit()).collect()
    }
}

/// Lifecycle of an uploaded certificate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    /// Uploaded, not yet validated.
    Pending,
    /// Validation succeeded.
    Valid,
    /// Backend rejected the certificate.
    Invalid,
    /// Validation attempt failed (network, wrong password, ...).
    Error,
}

/// A digital certificate uploaded by staff.
///
/// The payload is stored as base64 together with its plaintext
/// password. This mirrors the upstream contract, which needs both on
/// every query; it is a known weakness of the persisted format and is
/// deliberately confined to this type and the state store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Certificate {
    /// Unique identifier (creation-time millisecond timestamp).
    pub id: i64,
    /// Original file name.
    pub name: String,
    /// File extension (pfx, p12, pem).
    pub kind: String,
    /// Human-readable size label, e.g. "12.4 KB".
    pub size_label: String,
    /// Upload timestamp.
    pub uploaded_at: DateTime<Utc>,
    /// Certificate file content, base64-encoded.
    pub payload_base64: String,
    /// Certificate password, stored in the clear (see type docs).
    pub password: String,
    /// Set once validation has succeeded; a validated certificate is
    /// only ever replaced wholesale by re-upload.
    pub validated: bool,
    /// CNPJ extracted by the validation backend.
    pub tax_id: String,
    /// Legal name extracted by the validation backend.
    pub legal_name: String,
    /// Expiry date reported by the validation backend (ISO date).
    pub expiry: String,
    pub status: CertificateStatus,
    /// Detail of the last failed validation, if any.
    pub error_message: Option<String>,
}

/// Identity fields the validation backend extracts from a certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateIdentity {
    pub tax_id: String,
    pub legal_name: String,
    pub expiry: String,
}

// ============ Query results & history ============

/// Aggregated figures for one category of documents (issued or
/// received) in one period. Monetary amounts are decimal strings,
/// exactly as the backend reports them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceData {
    pub document_count: u32,
    pub total_value: String,
    pub tax_amount: String,
    pub credits_generated: String,
    /// Issued documents lacking a counterparty tax id; a compliance
    /// risk indicator. Only present on the issued side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_recipient_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Synthetic,
    Real,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Outcome of one document query for one client in one period.
/// Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub client_name: String,
    pub tax_id: String,
    pub municipal_registration: String,
    /// Competence period, `MM/YYYY`.
    pub period: String,
    /// Services the client provided.
    pub issued: ServiceData,
    /// Services the client consumed.
    pub received: ServiceData,
    pub source: ResultSource,
    pub status: ResultStatus,
}

/// One processing run, as retained by the history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryItem {
    /// Unique identifier (creation-time millisecond timestamp).
    pub id: i64,
    /// Human-readable run timestamp.
    pub timestamp_label: String,
    pub processed_count: u32,
    /// Results in processing order.
    pub results: Vec<QueryResult>,
}

impl HistoryItem {
    pub fn from_results(results: Vec<QueryResult>) -> Self {
        Self {
            id: now_millis(),
            timestamp_label: timestamp_label(Utc::now()),
            processed_count: results.len() as u32,
            results,
        }
    }
}

/// Period-over-period delta for one client, produced by
/// `history::compare`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComparisonItem {
    pub client_name: String,
    /// Issued document count in the current run.
    pub current: u32,
    /// Issued document count in the previous run.
    pub previous: u32,
    /// Percentage delta, one decimal, as a string ("12.5", "-3.0").
    pub variance: String,
}

// ============ Scheduled jobs ============

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for its due time. The only non-terminal state.
    Scheduled,
    /// Ran to completion. Terminal.
    Executed,
    /// Execution failed. Terminal.
    Error,
}

/// A deferred single-client query bound to a due time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledJob {
    /// Unique identifier (creation-time millisecond timestamp).
    pub id: i64,
    pub client_id: i64,
    /// Competence period to query, `MM/YYYY`.
    pub period: String,
    pub due_at: DateTime<Utc>,
    pub status: JobStatus,
    pub executed_at: Option<DateTime<Utc>>,
    /// Failure detail when `status == Error`.
    pub error_log: Option<String>,
}

// ============ Backend configuration ============

/// Remote function endpoints, validated at point of use.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Endpoints {
    pub validate_certificate: Option<String>,
    pub query_documents: Option<String>,
    pub health_check: Option<String>,
}

/// Runtime-mutable backend settings, persisted on every change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub project_id: String,
    pub region: String,
    pub use_mock: bool,
    /// Endpoints have been derived from project/region.
    pub configured: bool,
    /// Health check against the real backend has succeeded.
    pub connection_verified: bool,
    pub endpoints: Endpoints,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: "southamerica-east1".to_string(),
            use_mock: true,
            configured: false,
            connection_verified: false,
            endpoints: Endpoints::default(),
        }
    }
}

impl BackendConfig {
    /// Derives the cloud-function endpoint URLs from project and
    /// region, marking the configuration as configured. Any previous
    /// connection verification is invalidated.
    pub fn derive_endpoints(&mut self) {
        let base = format!(
            "https://{}-{}.cloudfunctions.net",
            self.region, self.project_id
        );
        self.endpoints = Endpoints {
            validate_certificate: Some(format!("{}/validarCertificado", base)),
            query_documents: Some(format!("{}/consultarNFP", base)),
            health_check: Some(format!("{}/healthCheck", base)),
        };
        self.configured = true;
        self.connection_verified = false;
    }

    /// Whether real (non-mock) processing runs may proceed.
    pub fn ready_for_real(&self) -> bool {
        self.configured && self.connection_verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_validation() {
        assert!(is_valid_period("01/2025"));
        assert!(is_valid_period("12/1999"));
        assert!(!is_valid_period("13/2025"));
        assert!(!is_valid_period("00/2025"));
        assert!(!is_valid_period("1/2025"));
        assert!(!is_valid_period("01-2025"));
        assert!(!is_valid_period("01/25"));
        assert!(!is_valid_period(""));
    }

    #[test]
    fn current_period_is_valid() {
        assert!(is_valid_period(&current_period()));
    }

    #[test]
    fn fresh_id_never_collides() {
        let a = fresh_id([]);
        let b = fresh_id([a]);
        let c = fresh_id([a, b]);
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn tax_id_digits_strips_formatting() {
        let client = Client {
            id: 1,
            name: "Acme".to_string(),
            tax_id: "12.345.678/0001-90".to_string(),
            municipal_registration: "987654".to_string(),
            certificate_id: Some(1),
            active: true,
        };
        assert_eq!(client.tax_id_digits(), "12345678000190");
    }

    #[test]
    fn fully_configured_requires_every_field() {
        let mut client = Client {
            id: 1,
            name: "Acme".to_string(),
            tax_id: "123".to_string(),
            municipal_registration: "987".to_string(),
            certificate_id: Some(1),
            active: true,
        };
        assert!(client.is_fully_configured());

        client.certificate_id = None;
        assert!(!client.is_fully_configured());

        client.certificate_id = Some(1);
        client.municipal_registration = "  ".to_string();
        assert!(!client.is_fully_configured());
    }

    #[test]
    fn derive_endpoints_builds_function_urls() {
        let mut cfg = BackendConfig {
            project_id: "fiscal-prod".to_string(),
            ..BackendConfig::default()
        };
        cfg.connection_verified = true;
        cfg.derive_endpoints();

        assert!(cfg.configured);
        // Re-deriving endpoints invalidates the previous verification.
        assert!(!cfg.connection_verified);
        assert_eq!(
            cfg.endpoints.query_documents.as_deref(),
            Some("https://southamerica-east1-fiscal-prod.cloudfunctions.net/consultarNFP")
        );
    }
}
