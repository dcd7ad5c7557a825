//! Record filters for map and list views.
//!
//! Filters compose with AND. The device's own record always passes so the
//! user never loses their own marker to a filter.

use serde::{Deserialize, Serialize};

use crate::record::{PositionedRecord, SourceOrigin};

const WEEK_MS: i64 = 7 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordFilter {
    /// Keep records whose mood contains this text
    pub mood: Option<String>,

    /// Keep records whose reason contains this word (case-insensitive,
    /// whole words only)
    pub reason_word: Option<String>,

    /// Keep records updated at or after this Unix millisecond
    pub recent_since_ms: Option<i64>,

    /// Keep only records their owner marked public
    pub public_only: bool,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    pub fn with_reason_word(mut self, word: impl Into<String>) -> Self {
        self.reason_word = Some(word.into());
        self
    }

    /// Records from the seven days before `now_ms`.
    pub fn recent_week(self, now_ms: i64) -> Self {
        self.since(now_ms.saturating_sub(WEEK_MS))
    }

    pub fn since(mut self, cutoff_ms: i64) -> Self {
        self.recent_since_ms = Some(cutoff_ms);
        self
    }

    pub fn public_only(mut self) -> Self {
        self.public_only = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mood.is_none()
            && self.reason_word.is_none()
            && self.recent_since_ms.is_none()
            && !self.public_only
    }

    pub fn matches(&self, record: &PositionedRecord) -> bool {
        if record.origin == SourceOrigin::SelfDevice {
            return true;
        }
        let attrs = &record.attributes;

        if let Some(wanted) = &self.mood {
            match &attrs.mood {
                Some(m) if m.contains(wanted.as_str()) => {}
                _ => return false,
            }
        }

        if let Some(word) = &self.reason_word {
            let hit = attrs
                .reason
                .as_deref()
                .map(|reason| reason.split_whitespace().any(|w| w.eq_ignore_ascii_case(word)))
                .unwrap_or(false);
            if !hit {
                return false;
            }
        }

        if let Some(cutoff) = self.recent_since_ms {
            if record.last_updated_at < cutoff {
                return false;
            }
        }

        !self.public_only || attrs.public
    }
}
