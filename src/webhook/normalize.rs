//! Provider payloads reduced to one inbound shape.

use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::users::phone::digits;

/// One user message, provider details stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Digits only.
    pub phone: String,
    pub text: String,
    pub has_image: bool,
    pub image_url: Option<String>,
    pub button_id: Option<String>,
}

#[cfg(test)]
impl InboundMessage {
    pub fn text(phone: &str, text: &str) -> Self {
        Self {
            phone: digits(phone),
            text: text.trim().to_owned(),
            ..Self::default()
        }
    }

    pub fn image(phone: &str, url: &str) -> Self {
        Self {
            phone: digits(phone),
            has_image: true,
            image_url: Some(url.to_owned()),
            ..Self::default()
        }
    }

    pub fn button(phone: &str, id: &str) -> Self {
        Self {
            phone: digits(phone),
            button_id: Some(id.to_owned()),
            ..Self::default()
        }
    }
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `Ok(None)` means a delivery that is deliberately ignored.
pub fn normalize(payload: &Value) -> EngineResult<Option<InboundMessage>> {
    if !payload.is_object() {
        return Err(EngineError::Validation("payload is not a JSON object".into()));
    }
    if payload.get("event").is_some() {
        return evolution(payload);
    }
    if payload.get("entry").is_some() {
        return cloud(payload);
    }
    Err(EngineError::Validation("unknown webhook envelope".into()))
}

fn evolution(payload: &Value) -> EngineResult<Option<InboundMessage>> {
    let event = payload["event"].as_str().unwrap_or_default().to_lowercase();
    if event != "messages.upsert" && event != "messages_upsert" {
        return Ok(None);
    }
    let data = payload
        .get("data")
        .ok_or_else(|| EngineError::Validation("messages.upsert without data".into()))?;
    if data.pointer("/key/fromMe").and_then(Value::as_bool) == Some(true) {
        return Ok(None);
    }

    let jid = str_at(data, "/key/remoteJidAlt")
        .or_else(|| str_at(data, "/key/remoteJid"))
        .ok_or_else(|| EngineError::Validation("message without remoteJid".into()))?;
    if jid.contains("@g.us") {
        return Ok(None);
    }
    let phone = digits(jid.split('@').next().unwrap_or(jid));
    if phone.is_empty() {
        return Err(EngineError::Validation(format!("no phone in jid {jid}")));
    }

    let message = data.get("message").unwrap_or(&Value::Null);
    let text = str_at(message, "/conversation")
        .or_else(|| str_at(message, "/extendedTextMessage/text"))
        .or_else(|| str_at(message, "/imageMessage/caption"))
        .or_else(|| str_at(message, "/buttonsResponseMessage/selectedDisplayText"))
        .unwrap_or_default()
        .to_owned();
    let button_id = str_at(message, "/buttonsResponseMessage/selectedButtonId")
        .or_else(|| str_at(message, "/templateButtonReplyMessage/selectedId"))
        .or_else(|| str_at(message, "/listResponseMessage/singleSelectReply/selectedRowId"))
        .map(str::to_owned);
    let has_image = message.get("imageMessage").is_some();
    let image_url = str_at(message, "/imageMessage/url")
        .or_else(|| str_at(data, "/mediaUrl"))
        .map(str::to_owned);

    Ok(finish(InboundMessage {
        phone,
        text,
        has_image,
        image_url,
        button_id,
    }))
}

fn cloud(payload: &Value) -> EngineResult<Option<InboundMessage>> {
    let Some(msg) = payload.pointer("/entry/0/changes/0/value/messages/0") else {
        // Status callbacks and other non-message changes.
        return Ok(None);
    };
    let phone = str_at(msg, "/from")
        .map(digits)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EngineError::Validation("message without sender".into()))?;

    let text = str_at(msg, "/text/body")
        .or_else(|| str_at(msg, "/image/caption"))
        .unwrap_or_default()
        .to_owned();
    let button_id = str_at(msg, "/interactive/button_reply/id")
        .or_else(|| str_at(msg, "/interactive/list_reply/id"))
        .or_else(|| str_at(msg, "/button/payload"))
        .map(str::to_owned);
    let has_image = msg.get("image").is_some();
    let image_url = str_at(msg, "/image/url")
        .or_else(|| str_at(msg, "/image/link"))
        .map(str::to_owned);

    Ok(finish(InboundMessage {
        phone,
        text,
        has_image,
        image_url,
        button_id,
    }))
}

/// Drops messages with nothing the engine can act on (stickers, audio).
fn finish(msg: InboundMessage) -> Option<InboundMessage> {
    let actionable = !msg.text.is_empty() || msg.image_url.is_some() || msg.button_id.is_some();
    actionable.then_some(msg)
}
