use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{Assistant, ExamAnalyzer, FoodDetection, FoodDetector, ImageKind, ImageTypeDetector};
use crate::config::AiConfig;
use crate::error::{EngineError, EngineResult};
use crate::intent::{Classified, FoodRef, Intent, IntentName, IntentQuery, IntentService, IntentSource};
use crate::sessions::DetectedFood;

/// JSON-over-HTTP client for every AI endpoint.
#[derive(Clone)]
pub struct HttpAi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpAi {
    pub fn new(cfg: &AiConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.analysis_timeout_secs.max(cfg.intent_timeout_secs) + 5))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
        })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        service: &'static str,
        path: &str,
        body: &B,
    ) -> EngineResult<R> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| EngineError::external(service, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::external(service, format!("status {status}")));
        }
        resp.json::<R>()
            .await
            .map_err(|e| EngineError::external(service, e))
    }
}

#[derive(Debug, Default, Deserialize)]
struct IntentDetails {
    #[serde(rename = "newFood")]
    new_food: Option<DetectedFood>,
    #[serde(rename = "foodIndex")]
    food_index: Option<usize>,
    #[serde(rename = "foodName")]
    food_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    details: IntentDetails,
}

impl IntentReply {
    /// Edit intents missing the details they need degrade to `Unknown`.
    fn into_classified(self) -> Classified {
        let d = self.details;
        let intent = match self.intent.parse::<IntentName>().unwrap_or(IntentName::Unknown) {
            IntentName::Confirm => Intent::Confirm,
            IntentName::Cancel => Intent::Cancel,
            IntentName::Edit => Intent::Edit,
            IntentName::AddFood => match d.new_food.and_then(DetectedFood::checked) {
                Some(food) => Intent::AddFood { food },
                None => Intent::Unknown,
            },
            IntentName::RemoveFood => match (d.food_index, d.food_name.or(d.new_food.map(|f| f.name))) {
                (Some(i), _) => Intent::RemoveFood { target: FoodRef::Index(i) },
                (None, Some(name)) if !name.trim().is_empty() => Intent::RemoveFood {
                    target: FoodRef::Name(name),
                },
                _ => Intent::Unknown,
            },
            IntentName::ReplaceFood => match (d.food_index, d.new_food.and_then(DetectedFood::checked)) {
                (Some(index), Some(food)) => Intent::ReplaceFood { index, food },
                _ => Intent::Unknown,
            },
            IntentName::Unknown => Intent::Unknown,
        };
        Classified::new(intent, self.confidence, IntentSource::Ai)
    }
}

#[async_trait]
impl IntentService for HttpAi {
    #[instrument(skip(self, query), fields(context = query.context.as_str()))]
    async fn classify(&self, query: &IntentQuery<'_>) -> EngineResult<Classified> {
        let body = json!({
            "text": query.text,
            "context": query.context.as_str(),
            "pendingFoods": query.pending_foods,
        });
        let reply: IntentReply = self.post("intent", "/intent", &body).await?;
        debug!(intent = %reply.intent, confidence = reply.confidence, "intent reply");
        Ok(reply.into_classified())
    }
}

#[derive(Debug, Deserialize)]
struct ImageTypeReply {
    #[serde(rename = "type")]
    kind: ImageKind,
}

#[async_trait]
impl ImageTypeDetector for HttpAi {
    async fn classify_image(&self, image_url: &str) -> EngineResult<ImageKind> {
        let reply: ImageTypeReply = self
            .post("image-type", "/image/type", &json!({ "imageUrl": image_url }))
            .await?;
        Ok(reply.kind)
    }
}

#[derive(Debug, Deserialize)]
struct FoodReply {
    #[serde(default)]
    foods: Vec<DetectedFood>,
}

fn detection(raw: serde_json::Value) -> EngineResult<FoodDetection> {
    let reply: FoodReply = serde_json::from_value(raw.clone())
        .map_err(|e| EngineError::external("food-detector", e))?;
    let foods = reply
        .foods
        .into_iter()
        .filter_map(DetectedFood::checked)
        .collect();
    Ok(FoodDetection {
        foods,
        raw: Some(raw),
    })
}

#[async_trait]
impl FoodDetector for HttpAi {
    async fn detect_from_image(&self, image_url: &str) -> EngineResult<FoodDetection> {
        let raw = self
            .post("food-detector", "/food/image", &json!({ "imageUrl": image_url }))
            .await?;
        detection(raw)
    }

    async fn detect_from_text(&self, text: &str) -> EngineResult<FoodDetection> {
        let raw = self
            .post("food-detector", "/food/text", &json!({ "text": text }))
            .await?;
        detection(raw)
    }
}

#[async_trait]
impl ExamAnalyzer for HttpAi {
    #[instrument(skip(self, image_urls), fields(images = image_urls.len()))]
    async fn analyze(
        &self,
        user_id: Uuid,
        image_urls: &[String],
    ) -> EngineResult<serde_json::Value> {
        self.post(
            "exam-analyzer",
            "/exam/analyze",
            &json!({ "userId": user_id, "imageUrls": image_urls }),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct AssistantReply {
    reply: String,
}

#[async_trait]
impl Assistant for HttpAi {
    async fn reply(&self, user_name: Option<&str>, text: &str) -> EngineResult<String> {
        let r: AssistantReply = self
            .post("assistant", "/assistant", &json!({ "userName": user_name, "text": text }))
            .await?;
        Ok(r.reply)
    }
}
