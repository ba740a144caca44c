//! Opaque AI collaborators. The engine only sees these traits.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::sessions::DetectedFood;

pub use http::HttpAi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageKind {
    Food,
    Medical,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoodDetection {
    pub foods: Vec<DetectedFood>,
    pub raw: Option<serde_json::Value>,
}

#[async_trait]
pub trait ImageTypeDetector: Send + Sync {
    async fn classify_image(&self, image_url: &str) -> EngineResult<ImageKind>;
}

#[async_trait]
pub trait FoodDetector: Send + Sync {
    async fn detect_from_image(&self, image_url: &str) -> EngineResult<FoodDetection>;
    async fn detect_from_text(&self, text: &str) -> EngineResult<FoodDetection>;
}

#[async_trait]
pub trait ExamAnalyzer: Send + Sync {
    /// Analyzes the whole ordered image list of one exam.
    async fn analyze(&self, user_id: Uuid, image_urls: &[String])
        -> EngineResult<serde_json::Value>;
}

/// Free-text companion for messages outside any flow.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, user_name: Option<&str>, text: &str) -> EngineResult<String>;
}

/// One fake behind every AI trait. `None` in a slot means "the service is down".
#[cfg(test)]
pub mod scripted {
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;
    use crate::error::EngineError;
    use crate::intent::{Classified, Intent, IntentQuery, IntentService, IntentSource};

    pub struct ScriptedAi {
        pub image_kind: Mutex<Option<ImageKind>>,
        pub foods: Mutex<Option<Vec<DetectedFood>>>,
        pub intent: Mutex<Option<Intent>>,
        pub analysis: Mutex<Option<Value>>,
        pub assistant: Mutex<Option<String>>,
        pub analyzed: Mutex<Vec<Vec<String>>>,
    }

    impl Default for ScriptedAi {
        fn default() -> Self {
            Self {
                image_kind: Mutex::new(Some(ImageKind::Food)),
                foods: Mutex::new(Some(vec![
                    DetectedFood::new("arroz", 150.0),
                    DetectedFood::new("feijão", 100.0),
                ])),
                intent: Mutex::new(Some(Intent::Unknown)),
                analysis: Mutex::new(Some(serde_json::json!({ "summary": "Tudo dentro da faixa." }))),
                assistant: Mutex::new(Some("Beba água e durma bem!".into())),
                analyzed: Mutex::new(Vec::new()),
            }
        }
    }

    fn down(service: &'static str) -> EngineError {
        EngineError::external(service, "scripted outage")
    }

    #[async_trait]
    impl ImageTypeDetector for ScriptedAi {
        async fn classify_image(&self, _image_url: &str) -> EngineResult<ImageKind> {
            (*self.image_kind.lock()).ok_or_else(|| down("image-type"))
        }
    }

    #[async_trait]
    impl FoodDetector for ScriptedAi {
        async fn detect_from_image(&self, _image_url: &str) -> EngineResult<FoodDetection> {
            let foods = self.foods.lock().clone().ok_or_else(|| down("food-detector"))?;
            Ok(FoodDetection { foods, raw: None })
        }

        async fn detect_from_text(&self, text: &str) -> EngineResult<FoodDetection> {
            self.detect_from_image(text).await
        }
    }

    #[async_trait]
    impl ExamAnalyzer for ScriptedAi {
        async fn analyze(&self, _user_id: Uuid, image_urls: &[String]) -> EngineResult<Value> {
            self.analyzed.lock().push(image_urls.to_vec());
            self.analysis.lock().clone().ok_or_else(|| down("exam-analyzer"))
        }
    }

    #[async_trait]
    impl Assistant for ScriptedAi {
        async fn reply(&self, _user_name: Option<&str>, _text: &str) -> EngineResult<String> {
            self.assistant.lock().clone().ok_or_else(|| down("assistant"))
        }
    }

    #[async_trait]
    impl IntentService for ScriptedAi {
        async fn classify(&self, _query: &IntentQuery<'_>) -> EngineResult<Classified> {
            let intent = self.intent.lock().clone().ok_or_else(|| down("intent"))?;
            Ok(Classified::new(intent, 0.9, IntentSource::Ai))
        }
    }
}
