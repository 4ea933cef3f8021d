use crate::errors::AppError;
use crate::models::{
    fresh_id, Certificate, CertificateIdentity, CertificateStatus, Client,
};
use crate::store::{keys, Store};
use base64::Engine;
use chrono::Utc;

/// Accepted certificate file extensions.
const CERTIFICATE_KINDS: &[&str] = &["pfx", "p12", "pem"];

/// In-memory registry of clients and certificates, backed by the
/// state store. The registry is the sole writer of both collections;
/// pipeline and scheduler only read from it by id.
#[derive(Debug, Default)]
pub struct Registry {
    pub clients: Vec<Client>,
    pub certificates: Vec<Certificate>,
}

/// Fields accepted when creating or updating a client.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ClientInput {
    pub name: String,
    pub tax_id: String,
    pub municipal_registration: String,
    pub certificate_id: Option<i64>,
    pub active: bool,
}

/// Fields accepted on certificate upload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CertificateUpload {
    /// Original file name, including extension.
    pub file_name: String,
    pub payload_base64: String,
    pub password: String,
}

impl Registry {
    pub async fn load(store: &Store) -> Self {
        Self {
            clients: store.load(keys::CLIENTS).await,
            certificates: store.load(keys::CERTIFICATES).await,
        }
    }

    pub async fn persist_clients(&self, store: &Store) {
        store.save(keys::CLIENTS, &self.clients).await;
    }

    pub async fn persist_certificates(&self, store: &Store) {
        store.save(keys::CERTIFICATES, &self.certificates).await;
    }

    // ---- clients ----

    pub fn client(&self, id: i64) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn add_client(&mut self, input: ClientInput) -> Result<&Client, AppError> {
        if input.name.trim().is_empty() {
            return Err(AppError::Validation("Client name is required".to_string()));
        }
        let client = Client {
            id: fresh_id(self.clients.iter().map(|c| c.id)),
            name: input.name,
            tax_id: input.tax_id,
            municipal_registration: input.municipal_registration,
            certificate_id: input.certificate_id,
            active: input.active,
        };
        self.clients.push(client);
        Ok(self.clients.last().expect("just pushed"))
    }

    pub fn update_client(&mut self, id: i64, input: ClientInput) -> Result<&Client, AppError> {
        if input.name.trim().is_empty() {
            return Err(AppError::Validation("Client name is required".to_string()));
        }
        let client = self
            .clients
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Client {} not found", id)))?;
        client.name = input.name;
        client.tax_id = input.tax_id;
        client.municipal_registration = input.municipal_registration;
        client.certificate_id = input.certificate_id;
        client.active = input.active;
        Ok(client)
    }

    pub fn remove_client(&mut self, id: i64) -> Result<(), AppError> {
        let before = self.clients.len();
        self.clients.retain(|c| c.id != id);
        if self.clients.len() == before {
            return Err(AppError::NotFound(format!("Client {} not found", id)));
        }
        Ok(())
    }

    /// The processing pipeline's input filter: active, all fields
    /// present, and the referenced certificate validated.
    pub fn eligible_clients(&self) -> Vec<Client> {
        self.clients
            .iter()
            .filter(|c| c.active && c.is_fully_configured())
            .filter(|c| {
                c.certificate_id
                    .and_then(|id| self.certificate(id))
                    .map(|cert| cert.status == CertificateStatus::Valid)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    // ---- certificates ----

    pub fn certificate(&self, id: i64) -> Option<&Certificate> {
        self.certificates.iter().find(|c| c.id == id)
    }

    /// Resolves the certificate a client's queries must use, refusing
    /// anything that is not in `Valid` state. This guard runs before
    /// any network call.
    pub fn valid_certificate_for(&self, client: &Client) -> Result<&Certificate, AppError> {
        let cert_id = client.certificate_id.ok_or_else(|| {
            AppError::Configuration(format!("Client '{}' has no certificate", client.name))
        })?;
        let cert = self.certificate(cert_id).ok_or_else(|| {
            AppError::Configuration(format!(
                "Certificate {} of client '{}' not found",
                cert_id, client.name
            ))
        })?;
        if cert.status != CertificateStatus::Valid {
            return Err(AppError::Configuration(format!(
                "Certificate '{}' of client '{}' is not validated",
                cert.name, client.name
            )));
        }
        Ok(cert)
    }

    /// Registers an upload in `Pending` state. The payload must be
    /// decodable base64 and the file extension one of the accepted
    /// certificate formats.
    pub fn add_certificate(&mut self, upload: CertificateUpload) -> Result<&Certificate, AppError> {
        let kind = upload
            .file_name
            .rsplit('.')
            .next()
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| CERTIFICATE_KINDS.contains(&ext.as_str()))
            .ok_or_else(|| {
                AppError::Validation("Invalid certificate format, use .pfx, .p12 or .pem".to_string())
            })?;

        if upload.password.is_empty() {
            return Err(AppError::Validation(
                "Certificate password is required".to_string(),
            ));
        }

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(upload.payload_base64.as_bytes())
            .map_err(|e| AppError::Validation(format!("Certificate payload is not base64: {}", e)))?;

        let cert = Certificate {
            id: fresh_id(self.certificates.iter().map(|c| c.id)),
            name: upload.file_name,
            kind,
            size_label: human_size(decoded.len()),
            uploaded_at: Utc::now(),
            payload_base64: upload.payload_base64,
            password: upload.password,
            validated: false,
            tax_id: String::new(),
            legal_name: String::new(),
            expiry: String::new(),
            status: CertificateStatus::Pending,
            error_message: None,
        };
        self.certificates.push(cert);
        Ok(self.certificates.last().expect("just pushed"))
    }

    pub fn remove_certificate(&mut self, id: i64) -> Result<(), AppError> {
        let before = self.certificates.len();
        self.certificates.retain(|c| c.id != id);
        if self.certificates.len() == before {
            return Err(AppError::NotFound(format!("Certificate {} not found", id)));
        }
        Ok(())
    }

    /// Applies the validation collaborator's response to a pending
    /// certificate. Only this method moves a certificate out of
    /// `Pending`.
    pub fn apply_validation(
        &mut self,
        id: i64,
        outcome: Result<CertificateIdentity, AppError>,
    ) -> Result<&Certificate, AppError> {
        let cert = self
            .certificates
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Certificate {} not found", id)))?;

        match outcome {
            Ok(identity) => {
                cert.validated = true;
                cert.tax_id = identity.tax_id;
                cert.legal_name = identity.legal_name;
                cert.expiry = identity.expiry;
                cert.status = CertificateStatus::Valid;
                cert.error_message = None;
            }
            Err(AppError::Authentication(msg)) => {
                cert.validated = false;
                cert.status = CertificateStatus::Invalid;
                cert.error_message = Some(msg);
            }
            Err(e) => {
                cert.validated = false;
                cert.status = CertificateStatus::Error;
                cert.error_message = Some(e.to_string());
            }
        }
        Ok(cert)
    }
}

/// Human-readable size label for an uploaded file.
fn human_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
