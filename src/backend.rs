use crate::errors::AppError;
use crate::models::{
    BackendConfig, Certificate, CertificateIdentity, CertificateStatus, Client, Endpoints,
    QueryResult, ResultSource, ResultStatus, ServiceData,
};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Contract of the remote NFP backend.
///
/// Implementations must not mutate client or certificate state;
/// callers apply the returned values.
#[async_trait]
pub trait NfpBackend: Send + Sync {
    /// Extracts identity fields from a certificate, checking its
    /// password in the process.
    async fn validate_certificate(
        &self,
        payload_base64: &str,
        password: &str,
    ) -> Result<CertificateIdentity, AppError>;

    /// Fetches the document summary of one client for one period.
    async fn query_documents(
        &self,
        client: &Client,
        period: &str,
        certificate: &Certificate,
    ) -> Result<QueryResult, AppError>;

    /// Probes backend reachability with the session token.
    async fn health_check(&self, token: &str) -> Result<(), AppError>;

    /// Which [`ResultSource`] this implementation stamps on results.
    fn source(&self) -> ResultSource;
}

/// Picks the backend implementation for the current configuration.
/// Synthetic is used while `use_mock` is set or no query endpoint has
/// been derived yet.
pub fn select(config: &BackendConfig, http: &reqwest::Client) -> Box<dyn NfpBackend> {
    if config.use_mock || config.endpoints.query_documents.is_none() {
        Box::new(SyntheticBackend::default())
    } else {
        Box::new(HttpBackend::new(http.clone(), config.endpoints.clone()))
    }
}

// ============ Synthetic implementation ============

/// Deterministic-shape generator used while no real backend is
/// deployed. Magnitudes are pseudo-random; every call succeeds after a
/// simulated network delay.
pub struct SyntheticBackend {
    delay_ms: std::ops::Range<u64>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self { delay_ms: 800..2000 }
    }
}

impl SyntheticBackend {
    /// Shortened delay for tests that exercise timing behavior.
    pub fn with_delay(delay_ms: std::ops::Range<u64>) -> Self {
        Self { delay_ms }
    }

    async fn simulate_latency(&self) {
        let ms = rand::thread_rng().gen_range(self.delay_ms.clone());
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn service_data(issued: bool) -> ServiceData {
        let mut rng = rand::thread_rng();
        let documents: u32 = rng.gen_range(10..60);
        let value: f64 = rng.gen_range(10_000.0..110_000.0);
        let tax = value * 0.05;
        ServiceData {
            document_count: documents,
            total_value: format!("{:.2}", value),
            tax_amount: format!("{:.2}", tax),
            credits_generated: format!("{:.2}", tax * 0.3),
            missing_recipient_count: if issued { Some(rng.gen_range(0..10)) } else { None },
        }
    }
}

#[async_trait]
impl NfpBackend for SyntheticBackend {
    async fn validate_certificate(
        &self,
        _payload_base64: &str,
        _password: &str,
    ) -> Result<CertificateIdentity, AppError> {
        self.simulate_latency().await;
        let mut rng = rand::thread_rng();
        let tax_id: String = (0..14).map(|_| rng.gen_range(0..10).to_string()).collect();
        let expiry = chrono::Utc::now() + chrono::Duration::days(365);
        Ok(CertificateIdentity {
            tax_id,
            legal_name: "Empresa Simulada LTDA".to_string(),
            expiry: expiry.format("%Y-%m-%d").to_string(),
        })
    }

    async fn query_documents(
        &self,
        client: &Client,
        period: &str,
        _certificate: &Certificate,
    ) -> Result<QueryResult, AppError> {
        tracing::info!("Querying NFP for {} (synthetic)", client.name);
        self.simulate_latency().await;
        Ok(QueryResult {
            client_name: client.name.clone(),
            tax_id: client.tax_id.clone(),
            municipal_registration: client.municipal_registration.clone(),
            period: period.to_string(),
            issued: Self::service_data(true),
            received: Self::service_data(false),
            source: ResultSource::Synthetic,
            status: ResultStatus::Success,
        })
    }

    async fn health_check(&self, _token: &str) -> Result<(), AppError> {
        Ok(())
    }

    fn source(&self) -> ResultSource {
        ResultSource::Synthetic
    }
}

// ============ HTTP implementation ============

#[derive(Serialize)]
struct ValidateRequest<'a> {
    #[serde(rename = "certificateBase64")]
    certificate_base64: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    #[serde(rename = "taxId")]
    tax_id: String,
    #[serde(rename = "legalName")]
    legal_name: String,
    expiry: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    #[serde(rename = "taxId")]
    tax_id: String,
    #[serde(rename = "municipalRegistration")]
    municipal_registration: &'a str,
    period: &'a str,
    #[serde(rename = "certificateBase64")]
    certificate_base64: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    issued: ServiceData,
    received: ServiceData,
    status: String,
}

/// Client for the deployed NFP cloud functions.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    /// Builds the shared reqwest client with the bounded query
    /// deadline mandated for the real collaborator.
    pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, AppError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
    }

    fn endpoint<'a>(&'a self, url: &'a Option<String>, name: &str) -> Result<&'a str, AppError> {
        url.as_deref().filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            AppError::Configuration(format!("No {} endpoint configured", name))
        })
    }

    async fn error_from_response(response: reqwest::Response) -> AppError {
        let status = response.status();
        let detail = response
            .text()
            .await
            .ok()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No details".to_string());
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            AppError::Authentication(format!("Backend returned {}: {}", status, detail))
        } else {
            AppError::Upstream(format!("Backend returned {}: {}", status, detail))
        }
    }
}

#[async_trait]
impl NfpBackend for HttpBackend {
    async fn validate_certificate(
        &self,
        payload_base64: &str,
        password: &str,
    ) -> Result<CertificateIdentity, AppError> {
        let url = self.endpoint(&self.endpoints.validate_certificate, "certificate validation")?;
        tracing::info!("Validating certificate via {}", url);

        let response = self
            .client
            .post(url)
            .json(&ValidateRequest {
                certificate_base64: payload_base64,
                password,
            })
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Validation request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let data: ValidateResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Failed to parse validation response: {}", e))
        })?;

        Ok(CertificateIdentity {
            tax_id: data.tax_id,
            legal_name: data.legal_name,
            expiry: data.expiry,
        })
    }

    async fn query_documents(
        &self,
        client: &Client,
        period: &str,
        certificate: &Certificate,
    ) -> Result<QueryResult, AppError> {
        // Guard before any network I/O: callers resolve the
        // certificate, but a stale reference must still not reach the
        // wire.
        if certificate.status != CertificateStatus::Valid {
            return Err(AppError::Configuration(format!(
                "Certificate '{}' is not validated",
                certificate.name
            )));
        }
        let url = self.endpoint(&self.endpoints.query_documents, "document query")?;
        tracing::info!("Querying NFP for {} via {}", client.name, url);

        let response = self
            .client
            .post(url)
            .json(&QueryRequest {
                tax_id: client.tax_id_digits(),
                municipal_registration: &client.municipal_registration,
                period,
                certificate_base64: &certificate.payload_base64,
                password: &certificate.password,
            })
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Document query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let data: QueryResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Failed to parse document query response: {}", e))
        })?;

        Ok(QueryResult {
            client_name: client.name.clone(),
            tax_id: client.tax_id.clone(),
            municipal_registration: client.municipal_registration.clone(),
            period: period.to_string(),
            issued: data.issued,
            received: data.received,
            source: ResultSource::Real,
            status: if data.status == "error" {
                ResultStatus::Error
            } else {
                ResultStatus::Success
            },
        })
    }

    async fn health_check(&self, token: &str) -> Result<(), AppError> {
        let url = self.endpoint(&self.endpoints.health_check, "health check")?;
        tracing::info!("Health check against {}", url);

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Health check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    fn source(&self) -> ResultSource {
        ResultSource::Real
    }
}
