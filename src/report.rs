use crate::models::QueryResult;

/// Semicolon-separated export of a run's results, matching the layout
/// the accounting staff import into their spreadsheets.
pub fn export_csv(results: &[QueryResult]) -> String {
    let mut csv = String::from(
        "Cliente;CNPJ;IM;Periodo;Notas Prestadas;Valor Prestado;Creditos Prestados;\
Alertas Prestados;Notas Tomadas;Valor Tomado\n",
    );
    for r in results {
        csv.push_str(&format!(
            "{};{};{};{};{};R$ {};R$ {};{};{};R$ {}\n",
            r.client_name,
            r.tax_id,
            r.municipal_registration,
            r.period,
            r.issued.document_count,
            r.issued.total_value,
            r.issued.credits_generated,
            r.issued.missing_recipient_count.unwrap_or(0),
            r.received.document_count,
            r.received.total_value,
        ));
    }
    csv
}

/// Markdown report over clients with missing-recipient alerts.
/// Returns `None` when no result carries an alert.
pub fn alert_report(results: &[QueryResult]) -> Option<String> {
    let flagged: Vec<&QueryResult> = results
        .iter()
        .filter(|r| r.issued.missing_recipient_count.unwrap_or(0) > 0)
        .collect();
    if flagged.is_empty() {
        return None;
    }

    let period = results
        .first()
        .map(|r| r.period.as_str())
        .unwrap_or("N/A");
    let mut content = format!("**Relatório de Alertas Fiscais - Período: {}**\n\n", period);
    content.push_str(
        "Este relatório detalha os clientes que requerem atenção imediata devido a \
pendências em suas notas fiscais de serviços prestados.\n\n---\n\n",
    );

    let mut total_alerts: u32 = 0;
    for r in &flagged {
        let missing = r.issued.missing_recipient_count.unwrap_or(0);
        total_alerts += missing;
        content.push_str(&format!("### 🚨 {}\n", r.client_name));
        content.push_str(&format!("**CNPJ:** {}\n", r.tax_id));
        content.push_str(&format!("**Total de Alertas:** {}\n", missing));
        content.push_str(&format!(
            "**Problema:** {} nota(s) de serviço prestado foi(ram) emitida(s) sem a \
identificação (CPF/CNPJ) do tomador.\n",
            missing
        ));
        content.push_str(
            "**Ação Recomendada:** Acessar o sistema da prefeitura e corrigir as notas \
pendentes para evitar problemas com a fiscalização.\n\n",
        );
    }

    content.push_str("---\n\n**Resumo Geral:**\n");
    content.push_str(&format!(
        "- **Total de Clientes com Alertas:** {}\n",
        flagged.len()
    ));
    content.push_str(&format!("- **Total de Notas com Alertas:** {}\n", total_alerts));
    Some(content)
}
