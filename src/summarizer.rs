use crate::errors::AppError;
use crate::models::QueryResult;
use serde_json::json;

const MODEL: &str = "gemini-2.5-flash";

/// Collaborator that turns a run's results into a markdown risk
/// summary via the Gemini API. Failures here never fail a processing
/// run; the pipeline logs and moves on.
#[derive(Clone)]
pub struct Summarizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Summarizer {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Requests a fiscal-analysis summary for a result list.
    pub async fn summarize(
        &self,
        results: &[QueryResult],
        period: &str,
    ) -> Result<String, AppError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            AppError::Configuration("Gemini API key not configured".to_string())
        })?;

        let prompt = build_prompt(results, period)?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, MODEL, api_key
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        tracing::info!("Requesting AI summary for {} result(s)", results.len());
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "No details".to_string());
            return Err(AppError::Upstream(format!(
                "Gemini returned {}: {}",
                status, detail
            )));
        }

        let data: serde_json::Value = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Failed to parse Gemini response: {}", e))
        })?;

        data.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| {
                AppError::Upstream("Gemini response missing candidate text".to_string())
            })
    }
}

/// The fiscal-analysis prompt, emphasizing issued-vs-received
/// distinction and missing-recipient alerts.
fn build_prompt(results: &[QueryResult], period: &str) -> Result<String, AppError> {
    let data = serde_json::to_string_pretty(results)
        .map_err(|e| AppError::Internal(format!("Failed to serialize results: {}", e)))?;

    Ok(format!(
        "Como um assistente fiscal, analise os dados de NFP para múltiplos clientes. \
O período da análise é {period}. Foque na distinção entre 'Serviços Prestados' e 'Serviços Tomados'.\n\n\
**Dados Recebidos:**\n```json\n{data}\n```\n\n\
**Sua Tarefa:**\nGere um relatório conciso em Markdown:\n\n\
### 📊 RESUMO EXECUTIVO\n\
(Destaque os totais de serviços prestados vs. tomados, créditos gerados, e o principal ponto de atenção.)\n\n\
### ⚠️ ALERTAS CRÍTICOS (Serviços Prestados)\n\
(Liste clientes com notas sem tomador, que é o risco fiscal mais imediato.)\n\n\
### ✅ AÇÕES PRIORITÁRIAS\n\
(Liste as 3 principais ações recomendadas, começando pela correção das notas sem tomador.)\n\n\
### 💡 INSIGHTS ADICIONAIS\n\
(Identifique padrões, como um grande volume de serviços tomados vs. prestados para um cliente, ou crescimento notável.)\n\n\
Seja direto e profissional."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultSource, ResultStatus, ServiceData};

    fn result(name: &str) -> QueryResult {
        QueryResult {
            client_name: name.to_string(),
            tax_id: "12345678000190".to_string(),
            municipal_registration: "987654".to_string(),
            period: "01/2025".to_string(),
            issued: ServiceData {
                document_count: 12,
                total_value: "5000.00".to_string(),
                tax_amount: "250.00".to_string(),
                credits_generated: "75.00".to_string(),
                missing_recipient_count: Some(3),
            },
            received: ServiceData::default(),
            source: ResultSource::Synthetic,
            status: ResultStatus::Success,
        }
    }

    #[test]
    fn prompt_embeds_period_and_data() {
        let prompt = build_prompt(&[result("Acme")], "01/2025").unwrap();
        assert!(prompt.contains("01/2025"));
        assert!(prompt.contains("Acme"));
        assert!(prompt.contains("RESUMO EXECUTIVO"));
    }

    #[tokio::test]
    async fn disabled_summarizer_fails_with_configuration() {
        let summarizer = Summarizer::new(
            reqwest::Client::new(),
            "http://localhost:0".to_string(),
            None,
        );
        assert!(!summarizer.is_enabled());
        let err = summarizer.summarize(&[result("Acme")], "01/2025").await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
