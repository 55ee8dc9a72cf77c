//! Conversational auto-responder

use std::sync::Arc;

use crate::db::{Direction, MessageRecord};
use crate::llm::{CompletionService, Role, Turn};

/// Token budget for a conversational reply
const REPLY_MAX_TOKENS: u32 = 600;

/// Business context and hard constraints for every reply
pub const SYSTEM_PROMPT: &str = "Eres el asistente virtual de WhatsApp de una asesoría energética \
que ayuda a particulares y empresas a ahorrar en sus facturas de luz y gas comparando tarifas y \
gestionando el cambio de compañía.

Tono: cercano, profesional y resolutivo. Tutea al cliente salvo que él use usted.

Reglas obligatorias:
- Responde siempre en español.
- Máximo 300 palabras.
- No inventes precios, tarifas, compañías ni datos del cliente. Si no sabes algo, dilo y ofrece que un asesor lo confirme.
- Termina siempre orientando al siguiente paso: enviar una foto o PDF de la última factura, o agendar una llamada con un asesor.";

/// Sent when the completion service is unavailable
pub const FALLBACK_REPLY: &str = "¡Gracias por escribirnos! 😊 Ahora mismo no podemos responderte \
automáticamente, pero un asesor revisará tu mensaje y te contestará lo antes posible. Si quieres \
adelantar, envíanos una foto o PDF de tu última factura de luz o gas y prepararemos tu estudio de ahorro.";

/// Builds conversation context and asks the completion service for a reply
#[derive(Clone)]
pub struct Responder {
    completion: Arc<dyn CompletionService>,
    history_limit: usize,
}

impl Responder {
    #[must_use]
    pub fn new(completion: Arc<dyn CompletionService>, history_limit: usize) -> Self {
        Self {
            completion,
            history_limit,
        }
    }

    /// Reply text for `message`; falls back to [`FALLBACK_REPLY`] on any failure
    pub async fn respond(
        &self,
        message: &str,
        history: &[MessageRecord],
        sender_name: Option<&str>,
    ) -> String {
        let turns = build_turns(message, history, sender_name, self.history_limit);

        match self
            .completion
            .complete(SYSTEM_PROMPT, &turns, REPLY_MAX_TOKENS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("completion returned empty text, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "completion failed, using fallback reply");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

/// Map stored history plus the current message onto alternating turns
///
/// Consecutive messages from the same side are merged and the sequence always
/// starts and ends with a user turn.
#[must_use]
pub fn build_turns(
    message: &str,
    history: &[MessageRecord],
    sender_name: Option<&str>,
    limit: usize,
) -> Vec<Turn> {
    let start = history.len().saturating_sub(limit);
    let mut turns: Vec<Turn> = Vec::with_capacity(history.len() - start + 1);

    let current = match sender_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name}: {message}"),
        None => message.to_string(),
    };

    let entries = history[start..]
        .iter()
        .filter(|record| !record.content.trim().is_empty())
        .map(|record| {
            let role = match record.direction {
                Direction::Incoming => Role::User,
                Direction::Outgoing => Role::Assistant,
            };
            (role, record.content.as_str())
        })
        .chain(std::iter::once((Role::User, current.as_str())));

    for (role, content) in entries {
        match turns.last_mut() {
            Some(last) if last.role == role => {
                last.content.push('\n');
                last.content.push_str(content);
            }
            None if role == Role::Assistant => {}
            _ => turns.push(Turn {
                role,
                content: content.to_string(),
            }),
        }
    }

    turns
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::db::MessageStatus;
    use crate::pipeline::ContentKind;
    use crate::{Error, Result};

    fn record(direction: Direction, content: &str) -> MessageRecord {
        MessageRecord {
            id: content.to_string(),
            customer_id: None,
            phone: "34612345678".to_string(),
            provider_message_id: None,
            event_id: None,
            kind: ContentKind::Text,
            content: content.to_string(),
            direction,
            status: MessageStatus::Received,
            sender_name: None,
            operator_id: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            error_code: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    struct Scripted {
        reply: Result<String>,
        seen: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, system: &str, turns: &[Turn], _max_tokens: u32) -> Result<String> {
            assert_eq!(system, SYSTEM_PROMPT);
            self.seen.lock().unwrap().push(turns.to_vec());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(Error::Completion(e.to_string())),
            }
        }
    }

    #[test]
    fn first_message_is_single_user_turn() {
        let turns = build_turns("Hola", &[], None, 10);
        assert_eq!(turns, vec![Turn::user("Hola")]);
    }

    #[test]
    fn name_prefix_on_current_message() {
        let turns = build_turns("Hola", &[], Some("Lucía"), 10);
        assert_eq!(turns, vec![Turn::user("Lucía: Hola")]);
    }

    #[test]
    fn history_alternates_and_merges() {
        let history = vec![
            record(Direction::Outgoing, "Mensaje de campaña"),
            record(Direction::Incoming, "Hola"),
            record(Direction::Incoming, "¿Seguís ahí?"),
            record(Direction::Outgoing, "¡Sí! ¿En qué te ayudo?"),
        ];

        let turns = build_turns("Quiero bajar mi factura", &history, None, 10);
        assert_eq!(
            turns,
            vec![
                Turn::user("Hola\n¿Seguís ahí?"),
                Turn::assistant("¡Sí! ¿En qué te ayudo?"),
                Turn::user("Quiero bajar mi factura"),
            ]
        );
    }

    #[test]
    fn history_is_capped_to_most_recent() {
        let history: Vec<_> = (0..15)
            .map(|i| {
                let direction = if i % 2 == 0 {
                    Direction::Incoming
                } else {
                    Direction::Outgoing
                };
                record(direction, &format!("m{i}"))
            })
            .collect();

        let turns = build_turns("ahora", &history, None, 10);
        // m5..m14 kept; m5 is outgoing and dropped as a leading assistant turn
        assert_eq!(turns.first().unwrap().content, "m6");
        assert_eq!(turns.last().unwrap().content, "m14\nahora");
    }

    #[test]
    fn unbounded_limit_keeps_whole_history() {
        let history = vec![
            record(Direction::Incoming, "Hola"),
            record(Direction::Outgoing, "¡Hola!"),
        ];

        let turns = build_turns("¿Precio?", &history, None, usize::MAX);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], Turn::user("Hola"));
    }

    #[tokio::test]
    async fn respond_uses_completion() {
        let service = Arc::new(Scripted {
            reply: Ok("  ¡Hola! Envíanos tu factura.  ".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let responder = Responder::new(service.clone(), 10);

        let reply = responder.respond("Hola", &[], None).await;
        assert_eq!(reply, "¡Hola! Envíanos tu factura.");
        assert_eq!(service.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn respond_falls_back_on_failure() {
        let failing = Responder::new(
            Arc::new(Scripted {
                reply: Err(Error::Completion("timeout".to_string())),
                seen: Mutex::new(Vec::new()),
            }),
            10,
        );
        assert_eq!(failing.respond("Hola", &[], None).await, FALLBACK_REPLY);

        let empty = Responder::new(
            Arc::new(Scripted {
                reply: Ok("   ".to_string()),
                seen: Mutex::new(Vec::new()),
            }),
            10,
        );
        assert_eq!(empty.respond("Hola", &[], None).await, FALLBACK_REPLY);
    }
}
