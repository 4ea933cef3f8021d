/// Contract tests for the HTTP backend against a mocked NFP server.
use nfp_monitor::backend::{HttpBackend, NfpBackend};
use nfp_monitor::errors::AppError;
use nfp_monitor::models::{
    Certificate, CertificateStatus, Client, Endpoints, ResultSource, ResultStatus,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints(base: &str) -> Endpoints {
    Endpoints {
        validate_certificate: Some(format!("{}/validarCertificado", base)),
        query_documents: Some(format!("{}/consultarNFP", base)),
        health_check: Some(format!("{}/healthCheck", base)),
    }
}

fn sample_client() -> Client {
    Client {
        id: 1,
        name: "Acme Serviços".to_string(),
        tax_id: "12.345.678/0001-90".to_string(),
        municipal_registration: "987654".to_string(),
        certificate_id: Some(1),
        active: true,
    }
}

fn valid_certificate() -> Certificate {
    Certificate {
        id: 1,
        name: "acme.pfx".to_string(),
        kind: "pfx".to_string(),
        size_label: "1.0 KB".to_string(),
        uploaded_at: chrono::Utc::now(),
        payload_base64: "QUJD".to_string(),
        password: "secret".to_string(),
        validated: true,
        tax_id: "12345678000190".to_string(),
        legal_name: "Acme Serviços LTDA".to_string(),
        expiry: "2027-01-01".to_string(),
        status: CertificateStatus::Valid,
        error_message: None,
    }
}

#[tokio::test]
async fn validate_certificate_parses_identity() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/validarCertificado"))
        .and(body_partial_json(serde_json::json!({
            "certificateBase64": "QUJD",
            "password": "secret",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "taxId": "12345678000190",
            "legalName": "Acme Serviços LTDA",
            "expiry": "2027-01-01",
        })))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    let identity = backend.validate_certificate("QUJD", "secret").await.unwrap();

    assert_eq!(identity.tax_id, "12345678000190");
    assert_eq!(identity.legal_name, "Acme Serviços LTDA");
    assert_eq!(identity.expiry, "2027-01-01");
}

#[tokio::test]
async fn validate_certificate_wrong_password_is_authentication() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/validarCertificado"))
        .respond_with(ResponseTemplate::new(401).set_body_string("senha incorreta"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    let err = backend.validate_certificate("QUJD", "wrong").await.unwrap_err();

    match err {
        AppError::Authentication(msg) => assert!(msg.contains("senha incorreta")),
        other => panic!("Expected Authentication, got {:?}", other),
    }
}

#[tokio::test]
async fn query_documents_sends_digits_only_tax_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/consultarNFP"))
        .and(body_partial_json(serde_json::json!({
            "taxId": "12345678000190",
            "municipalRegistration": "987654",
            "period": "01/2025",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issued": {
                "document_count": 12,
                "total_value": "5000.00",
                "tax_amount": "250.00",
                "credits_generated": "75.00",
                "missing_recipient_count": 3,
            },
            "received": {
                "document_count": 4,
                "total_value": "900.00",
                "tax_amount": "45.00",
                "credits_generated": "13.50",
            },
            "status": "success",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    let result = backend
        .query_documents(&sample_client(), "01/2025", &valid_certificate())
        .await
        .unwrap();

    assert_eq!(result.source, ResultSource::Real);
    assert_eq!(result.status, ResultStatus::Success);
    assert_eq!(result.issued.document_count, 12);
    assert_eq!(result.issued.missing_recipient_count, Some(3));
    assert_eq!(result.received.document_count, 4);
    assert_eq!(result.received.missing_recipient_count, None);
    // The original formatted tax id is kept on the result.
    assert_eq!(result.tax_id, "12.345.678/0001-90");
}

#[tokio::test]
async fn query_documents_surfaces_server_text_on_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/consultarNFP"))
        .respond_with(ResponseTemplate::new(502).set_body_string("prefeitura indisponível"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    let err = backend
        .query_documents(&sample_client(), "01/2025", &valid_certificate())
        .await
        .unwrap_err();

    match err {
        AppError::Upstream(msg) => {
            assert!(msg.contains("502"));
            assert!(msg.contains("prefeitura indisponível"));
        }
        other => panic!("Expected Upstream, got {:?}", other),
    }
}

#[tokio::test]
async fn unvalidated_certificate_never_reaches_the_network() {
    let server = MockServer::start().await;

    // Zero expected requests: the guard fires before any I/O.
    Mock::given(method("POST"))
        .and(path("/consultarNFP"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut cert = valid_certificate();
    cert.status = CertificateStatus::Error;
    cert.validated = false;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    let err = backend
        .query_documents(&sample_client(), "01/2025", &cert)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
}

#[tokio::test]
async fn health_check_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/healthCheck"))
        .and(header("Authorization", "Bearer token-123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    backend.health_check("token-123").await.unwrap();
}

#[tokio::test]
async fn health_check_failure_is_upstream() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/healthCheck"))
        .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(reqwest::Client::new(), endpoints(&server.uri()));
    let err = backend.health_check("token-123").await.unwrap_err();
    assert!(matches!(err, AppError::Upstream(_)));
}

#[tokio::test]
async fn missing_endpoint_is_configuration() {
    let backend = HttpBackend::new(reqwest::Client::new(), Endpoints::default());
    let err = backend.validate_certificate("QUJD", "secret").await.unwrap_err();
    assert!(matches!(err, AppError::Configuration(_)));
}
