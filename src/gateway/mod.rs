//! Outbound messaging. The engine talks to [`Messenger`], which wraps any
//! [`OutboundGateway`] with bounded retries and the numbered-text fallback.

pub mod whatsapp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};

pub use whatsapp::WhatsAppGateway;

pub const MAX_BUTTONS: usize = 3;

const NUMBER_EMOJI: [&str; 9] = ["1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractiveMessage {
    pub header_text: Option<String>,
    pub body_text: String,
    pub footer_text: Option<String>,
    pub buttons: Vec<Button>,
}

impl InteractiveMessage {
    /// Extra buttons beyond [`MAX_BUTTONS`] are dropped.
    pub fn new(body: impl Into<String>, mut buttons: Vec<Button>) -> Self {
        buttons.truncate(MAX_BUTTONS);
        Self {
            header_text: None,
            body_text: body.into(),
            footer_text: None,
            buttons,
        }
    }

    pub fn header(mut self, text: impl Into<String>) -> Self {
        self.header_text = Some(text.into());
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer_text = Some(text.into());
        self
    }

    /// Plain-text rendering used when interactive delivery fails.
    pub fn render_numbered(&self) -> String {
        let mut out = String::new();
        if let Some(h) = &self.header_text {
            out.push_str(&format!("*{h}*\n\n"));
        }
        out.push_str(&self.body_text);
        out.push_str("\n\n");
        for (i, b) in self.buttons.iter().enumerate() {
            let n = NUMBER_EMOJI.get(i).copied().unwrap_or("▪️");
            out.push_str(&format!("{n} {}\n", b.title));
        }
        if let Some(f) = &self.footer_text {
            out.push_str(&format!("\n_{f}_\n"));
        }
        out.push_str("\n_Responda com o número da opção_");
        out
    }
}

/// Raw transport. Implementations report failure through the result.
#[async_trait]
pub trait OutboundGateway: Send + Sync {
    async fn send_text(&self, phone: &str, text: &str) -> EngineResult<()>;
    async fn send_interactive(&self, phone: &str, msg: &InteractiveMessage) -> EngineResult<()>;
}

/// Retrying front of the gateway used by every flow.
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<dyn OutboundGateway>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl Messenger {
    pub fn new(inner: Arc<dyn OutboundGateway>, max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    pub async fn text(&self, phone: &str, text: &str) -> EngineResult<()> {
        let mut attempt = 1;
        loop {
            match self.inner.send_text(phone, text).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "send_text failed; retrying");
                    tokio::time::sleep(self.backoff_base * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(EngineError::Delivery {
                        phone: phone.to_owned(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }

    /// Interactive first; on failure the numbered text goes out instead.
    pub async fn interactive(&self, phone: &str, msg: &InteractiveMessage) -> EngineResult<()> {
        match self.inner.send_interactive(phone, msg).await {
            Ok(()) => Ok(()),
            Err(e) => {
                info!(error = %e, "interactive send failed; falling back to numbered text");
                self.text(phone, &msg.render_numbered()).await
            }
        }
    }
}


#[cfg(test)]
mod gateway_tests {
    use super::recording::{RecordingGateway, Sent};
    use super::*;

    fn menu() -> InteractiveMessage {
        InteractiveMessage::new(
            "Confirma?",
            vec![
                Button::new("a", "Confirmar"),
                Button::new("b", "Cancelar"),
                Button::new("c", "Editar"),
                Button::new("d", "Extra"),
            ],
        )
        .header("Refeição")
        .footer("expira em 2h")
    }

    #[test]
    fn buttons_are_capped_at_three() {
        assert_eq!(menu().buttons.len(), MAX_BUTTONS);
    }

    #[test]
    fn numbered_rendering_lists_options() {
        let text = menu().render_numbered();
        assert!(text.starts_with("*Refeição*"));
        assert!(text.contains("1️⃣ Confirmar"));
        assert!(text.contains("3️⃣ Editar"));
        assert!(!text.contains("Extra"));
        assert!(text.contains("_expira em 2h_"));
        assert!(text.ends_with("_Responda com o número da opção_"));
    }

    #[tokio::test]
    async fn interactive_failure_falls_back_to_text() {
        let gw = Arc::new(RecordingGateway {
            reject_interactive: true,
            ..Default::default()
        });
        let m = Messenger::new(gw.clone(), 3, Duration::from_millis(1));
        m.interactive("5511999990000", &menu()).await.unwrap();
        let sent = gw.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Sent::Text { text, .. } if text.contains("2️⃣ Cancelar")));
    }

    #[tokio::test(start_paused = true)]
    async fn text_is_retried_then_reported() {
        let gw = Arc::new(RecordingGateway::default());
        *gw.failing_texts.lock() = 2;
        let m = Messenger::new(gw.clone(), 3, Duration::from_millis(200));
        m.text("1", "oi").await.unwrap();
        assert_eq!(gw.sent().len(), 1);

        *gw.failing_texts.lock() = 5;
        let err = m.text("1", "oi").await.unwrap_err();
        assert!(matches!(err, EngineError::Delivery { .. }));
    }
}
