//! Reply templates for received documents and images

use std::fmt::Write as _;

use super::ContentKind;
use crate::attachments::{BillSummary, ExtractionResult};

const CALL_TO_ACTION: &str = "¿Quieres que preparemos un estudio de ahorro personalizado sin \
compromiso? Responde *SÍ* y un asesor te llamará para explicarte las opciones. 💡";

/// Reply for a processed document: bill details, or a generic acknowledgment
#[must_use]
pub fn document_reply(result: Option<&ExtractionResult>, sender_name: Option<&str>) -> String {
    match result {
        Some(ExtractionResult::Bill(bill)) => bill_reply(bill, sender_name),
        Some(ExtractionResult::Unrecognized { .. }) | None => acknowledgment(sender_name),
    }
}

/// Detailed reply for a recognized bill; only fields present are shown
#[must_use]
pub fn bill_reply(bill: &BillSummary, sender_name: Option<&str>) -> String {
    let mut reply = format!(
        "{} Hemos analizado tu {}.\n",
        greeting(sender_name),
        bill_label(&bill.kind)
    );

    let mut details = String::new();
    if let Some(company) = &bill.company {
        let _ = writeln!(details, "🏢 Compañía: {company}");
    }
    if let Some(amount) = bill.total_amount {
        let _ = writeln!(details, "💶 Importe: {}", format_euros(amount));
    }
    if let Some(consumption) = &bill.consumption {
        let _ = writeln!(details, "⚡ Consumo: {consumption}");
    }
    if let Some(capacity) = &bill.contracted_capacity {
        let _ = writeln!(details, "🔌 Potencia contratada: {capacity}");
    }
    if let Some(period) = &bill.period {
        let _ = writeln!(details, "📅 Periodo: {period}");
    }

    if !details.is_empty() {
        reply.push('\n');
        reply.push_str(&details);
    }

    reply.push('\n');
    reply.push_str(CALL_TO_ACTION);
    reply
}

/// Short acknowledgment when a document was not a bill or could not be read
#[must_use]
pub fn acknowledgment(sender_name: Option<&str>) -> String {
    format!(
        "{} Hemos recibido tu documento. 📄 Un asesor lo revisará y te contactará en breve. \
         Si es una factura de luz o gas, asegúrate de que se vea completa y legible.",
        greeting(sender_name)
    )
}

/// Acknowledgment when media content could not be downloaded
#[must_use]
pub fn media_unavailable(kind: ContentKind) -> String {
    let what = match kind {
        ContentKind::Image => "tu imagen 📷",
        ContentKind::Document => "tu documento 📄",
        ContentKind::Audio => "tu audio 🎧",
        ContentKind::Video => "tu vídeo 🎬",
        _ => "tu archivo",
    };
    format!(
        "¡Gracias! Hemos recibido {what}, pero no hemos podido abrirlo ahora mismo. \
         Un asesor lo revisará en breve; si puedes, vuelve a enviarlo."
    )
}

fn greeting(sender_name: Option<&str>) -> String {
    match sender_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("¡Hola, {name}! 👋"),
        None => "¡Hola! 👋".to_string(),
    }
}

fn bill_label(kind: &str) -> &'static str {
    match kind {
        "luz" => "factura de luz",
        "gas" => "factura de gas",
        "dual" => "factura de luz y gas",
        _ => "factura",
    }
}

/// `84.2` -> `84,20 €`
fn format_euros(amount: f64) -> String {
    format!("{amount:.2} €").replace('.', ",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bill() -> BillSummary {
        BillSummary {
            kind: "luz".to_string(),
            company: Some("Iberdrola".to_string()),
            total_amount: Some(84.2),
            period: None,
            consumption: Some("312 kWh".to_string()),
            contracted_capacity: None,
            rate_plan: Some("2.0TD".to_string()),
            holder_name: None,
            address: None,
            meter_id: None,
            summary: None,
            savings_observations: Vec::new(),
        }
    }

    #[test]
    fn bill_reply_shows_present_fields_only() {
        let reply = bill_reply(&bill(), Some("Lucía"));

        assert!(reply.starts_with("¡Hola, Lucía! 👋 Hemos analizado tu factura de luz."));
        assert!(reply.contains("🏢 Compañía: Iberdrola"));
        assert!(reply.contains("💶 Importe: 84,20 €"));
        assert!(reply.contains("⚡ Consumo: 312 kWh"));
        assert!(!reply.contains("Potencia"));
        assert!(!reply.contains("Periodo"));
        assert!(reply.ends_with(CALL_TO_ACTION));
    }

    #[test]
    fn no_placeholder_values_leak() {
        let empty = BillSummary {
            kind: "otro".to_string(),
            company: None,
            total_amount: None,
            consumption: None,
            ..bill()
        };
        let reply = bill_reply(&empty, None);

        for leaked in ["null", "None", "undefined", "NaN"] {
            assert!(!reply.contains(leaked), "{leaked} leaked into {reply}");
        }
        assert!(reply.starts_with("¡Hola! 👋 Hemos analizado tu factura."));
    }

    #[test]
    fn unrecognized_and_failure_share_acknowledgment() {
        let unrecognized = ExtractionResult::Unrecognized {
            summary: Some("Un contrato".to_string()),
        };
        assert_eq!(document_reply(Some(&unrecognized), None), acknowledgment(None));
        assert_eq!(document_reply(None, Some("Ana")), acknowledgment(Some("Ana")));
        assert!(acknowledgment(Some("Ana")).starts_with("¡Hola, Ana!"));
    }

    #[test]
    fn media_unavailable_per_kind() {
        assert!(media_unavailable(ContentKind::Image).contains("tu imagen"));
        assert!(media_unavailable(ContentKind::Document).contains("tu documento"));
        assert_ne!(
            media_unavailable(ContentKind::Image),
            media_unavailable(ContentKind::Document)
        );
    }

    #[test]
    fn euro_formatting() {
        assert_eq!(format_euros(84.2), "84,20 €");
        assert_eq!(format_euros(1234.567), "1234,57 €");
    }
}
