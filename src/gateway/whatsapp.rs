use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::{InteractiveMessage, OutboundGateway};
use crate::config::WhatsAppConfig;
use crate::error::{EngineError, EngineResult};

/// Evolution-style WhatsApp HTTP API.
#[derive(Clone)]
pub struct WhatsAppGateway {
    client: Client,
    api_url: String,
    api_token: String,
    instance: String,
}

impl WhatsAppGateway {
    pub fn new(cfg: &WhatsAppConfig) -> Self {
        Self {
            client: Client::new(),
            api_url: cfg.api_url.trim_end_matches('/').to_owned(),
            api_token: cfg.api_token.clone(),
            instance: cfg.instance.clone(),
        }
    }

    async fn call(&self, endpoint: &str, body: Value) -> EngineResult<()> {
        let url = format!("{}/message/{}/{}", self.api_url, endpoint, self.instance);
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::external("whatsapp", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::external("whatsapp", format!("status {status}")));
        }
        // Some providers answer 200 with an error body.
        let reply: Value = resp.json().await.unwrap_or(Value::Null);
        if reply.get("error").is_some_and(|e| !e.is_null())
            || reply.get("status").and_then(Value::as_str) == Some("error")
        {
            return Err(EngineError::external("whatsapp", reply.to_string()));
        }
        debug!(endpoint, "message sent");
        Ok(())
    }
}

fn buttons_body(phone: &str, msg: &InteractiveMessage) -> Value {
    let buttons: Vec<Value> = msg
        .buttons
        .iter()
        .map(|b| json!({ "type": "reply", "displayText": b.title, "id": b.id }))
        .collect();
    json!({
        "number": phone,
        "title": msg.header_text.clone().unwrap_or_default(),
        "description": msg.body_text,
        "footer": msg.footer_text.clone().unwrap_or_default(),
        "buttons": buttons,
    })
}

#[async_trait]
impl OutboundGateway for WhatsAppGateway {
    async fn send_text(&self, phone: &str, text: &str) -> EngineResult<()> {
        self.call("sendText", json!({ "number": phone, "text": text }))
            .await
    }

    async fn send_interactive(&self, phone: &str, msg: &InteractiveMessage) -> EngineResult<()> {
        self.call("sendButtons", buttons_body(phone, msg)).await
    }
}
