//! Extraction contract and response parsing

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ExtractionError;
use crate::db::Analysis;

/// Document kind reported when the service cannot classify the document
pub const UNRECOGNIZED_KIND: &str = "desconocido";

/// Instruction contract shared by the text and vision paths
pub const EXTRACTION_INSTRUCTIONS: &str = r#"Eres un analista de facturas de suministros energéticos en España.
Analiza el documento y responde ÚNICAMENTE con un objeto JSON, sin texto adicional, con exactamente estas claves:

{
  "tipo": "luz" | "gas" | "dual" | "otro",
  "compania": string o null,
  "importe_total": número en euros o null,
  "periodo": string o null,
  "consumo": string con unidades (p. ej. "350 kWh") o null,
  "potencia_contratada": string con unidades (p. ej. "4,6 kW") o null,
  "tarifa": string o null,
  "titular": string o null,
  "direccion": string o null,
  "cups": string o null,
  "resumen": string breve,
  "observaciones_ahorro": [string, ...]
}

No inventes datos: si un campo no aparece en el documento, usa null.
Si el documento no es una factura de luz o gas, responde exactamente con:
{"tipo": "desconocido", "resumen": "<qué es el documento>", "observaciones_ahorro": []}"#;

/// Structured summary of a recognized bill
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillSummary {
    pub kind: String,
    pub company: Option<String>,
    pub total_amount: Option<f64>,
    pub period: Option<String>,
    pub consumption: Option<String>,
    pub contracted_capacity: Option<String>,
    pub rate_plan: Option<String>,
    pub holder_name: Option<String>,
    pub address: Option<String>,
    pub meter_id: Option<String>,
    pub summary: Option<String>,
    pub savings_observations: Vec<String>,
}

/// Outcome of a successful extraction call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// The document was understood as a bill
    Bill(BillSummary),
    /// The service understood the document but found nothing billable
    Unrecognized { summary: Option<String> },
}

impl ExtractionResult {
    /// Short document kind, used for filtering stored files
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Bill(bill) => &bill.kind,
            Self::Unrecognized { .. } => UNRECOGNIZED_KIND,
        }
    }
}

impl From<&ExtractionResult> for Analysis {
    fn from(result: &ExtractionResult) -> Self {
        let payload = serde_json::to_value(result).unwrap_or(Value::Null);
        match result {
            ExtractionResult::Bill(bill) => Self {
                payload,
                doc_kind: Some(bill.kind.clone()),
                company: bill.company.clone(),
                amount: bill.total_amount,
                meter_id: bill.meter_id.clone(),
            },
            ExtractionResult::Unrecognized { .. } => Self {
                payload,
                doc_kind: Some(UNRECOGNIZED_KIND.to_string()),
                ..Self::default()
            },
        }
    }
}

/// Wire shape of the service response; values are loosely typed on purpose
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawExtraction {
    tipo: Value,
    compania: Value,
    importe_total: Value,
    periodo: Value,
    consumo: Value,
    potencia_contratada: Value,
    tarifa: Value,
    titular: Value,
    direccion: Value,
    cups: Value,
    resumen: Value,
    observaciones_ahorro: Value,
}

/// Parse the raw completion text into an [`ExtractionResult`]
///
/// # Errors
///
/// Returns [`ExtractionError::NoJson`] if no balanced object is present and
/// [`ExtractionError::Parse`] if the object is not valid JSON
pub fn parse_response(text: &str) -> Result<ExtractionResult, ExtractionError> {
    let json = first_json_object(text).ok_or(ExtractionError::NoJson)?;
    let raw: RawExtraction =
        serde_json::from_str(json).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let kind = text_field(&raw.tipo).map(|k| k.to_lowercase());
    let summary = text_field(&raw.resumen);

    let Some(kind) = kind.filter(|k| k != UNRECOGNIZED_KIND) else {
        return Ok(ExtractionResult::Unrecognized { summary });
    };

    Ok(ExtractionResult::Bill(BillSummary {
        kind,
        company: text_field(&raw.compania),
        total_amount: amount_field(&raw.importe_total),
        period: text_field(&raw.periodo),
        consumption: text_field(&raw.consumo),
        contracted_capacity: text_field(&raw.potencia_contratada),
        rate_plan: text_field(&raw.tarifa),
        holder_name: text_field(&raw.titular),
        address: text_field(&raw.direccion),
        meter_id: text_field(&raw.cups),
        summary,
        savings_observations: list_field(&raw.observaciones_ahorro),
    }))
}

/// Locate the first balanced `{...}` substring, ignoring braces inside strings
///
/// A `{` that never closes is skipped and the scan restarts at the next one.
fn first_json_object(text: &str) -> Option<&str> {
    text.char_indices()
        .filter(|&(_, ch)| ch == '{')
        .find_map(|(start, _)| balanced_prefix(&text[start..]))
}

/// The balanced object at the head of `text`, which starts with `{`
fn balanced_prefix(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Non-empty trimmed text; `null`, placeholders and non-scalars become `None`
fn text_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            let placeholder = s.is_empty()
                || s.eq_ignore_ascii_case("null")
                || s.eq_ignore_ascii_case("undefined")
                || s.eq_ignore_ascii_case("n/a");
            (!placeholder).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Euro amount from a number or a Spanish-formatted string ("1.234,56 €")
fn amount_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
                .collect();
            let normalized = if cleaned.contains(',') {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned
            };
            normalized.parse::<f64>().ok()
        }
        _ => None,
    }
    .filter(|amount| amount.is_finite())
}

fn list_field(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(text_field).collect(),
        other => text_field(other).into_iter().collect(),
    }
}
