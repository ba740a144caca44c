use std::fmt;
use std::str::FromStr;

use crate::sessions::DetectedFood;

/// Which item an edit targets. Indexes are 1-based, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum FoodRef {
    Index(usize),
    Name(String),
}

/// A classification result. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Confirm,
    Cancel,
    Edit,
    AddFood { food: DetectedFood },
    RemoveFood { target: FoodRef },
    ReplaceFood { index: usize, food: DetectedFood },
    Unknown,
}

impl Intent {
    pub fn name(&self) -> IntentName {
        match self {
            Intent::Confirm => IntentName::Confirm,
            Intent::Cancel => IntentName::Cancel,
            Intent::Edit => IntentName::Edit,
            Intent::AddFood { .. } => IntentName::AddFood,
            Intent::RemoveFood { .. } => IntentName::RemoveFood,
            Intent::ReplaceFood { .. } => IntentName::ReplaceFood,
            Intent::Unknown => IntentName::Unknown,
        }
    }

    pub fn is_food_edit(&self) -> bool {
        matches!(
            self,
            Intent::AddFood { .. } | Intent::RemoveFood { .. } | Intent::ReplaceFood { .. }
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Intent::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentName {
    Confirm,
    Cancel,
    Edit,
    AddFood,
    RemoveFood,
    ReplaceFood,
    Unknown,
}

impl IntentName {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentName::Confirm => "confirm",
            IntentName::Cancel => "cancel",
            IntentName::Edit => "edit",
            IntentName::AddFood => "add_food",
            IntentName::RemoveFood => "remove_food",
            IntentName::ReplaceFood => "replace_food",
            IntentName::Unknown => "unknown",
        }
    }
}

impl fmt::Display for IntentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => IntentName::Confirm,
            "cancel" => IntentName::Cancel,
            "edit" => IntentName::Edit,
            "add_food" => IntentName::AddFood,
            "remove_food" => IntentName::RemoveFood,
            "replace_food" => IntentName::ReplaceFood,
            "unknown" => IntentName::Unknown,
            other => return Err(format!("unknown intent name: {other}")),
        })
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentSource {
    Ai,
    Parser,
    Keywords,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub intent: Intent,
    pub confidence: f32,
    pub source: IntentSource,
}

impl Classified {
    pub fn new(intent: Intent, confidence: f32, source: IntentSource) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }

    pub fn unknown() -> Self {
        Self::new(Intent::Unknown, 0.0, IntentSource::Keywords)
    }
}
