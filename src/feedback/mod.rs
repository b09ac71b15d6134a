//! リアルタイムのフォーム採点とフィードバック
//!
//! 描画や発話は行わない。イベントを `FeedbackSink` に渡すだけ。

pub mod reps;
pub mod scorer;

use serde::{Deserialize, Serialize};

use crate::events::Publisher;

pub use reps::{FormIssue, RepCounter, RepPhase, RepUpdate};
pub use scorer::{FormAnalysis, FormScorer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechPriority {
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HapticPattern {
    Success,
    Warning,
    Error,
    Impact,
}

/// 外部（UI・触覚・音声）へ渡すイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedbackEvent {
    FormCorrection { message: String, severity: Severity },
    Milestone { reps: u32, message: String },
    Encouragement { message: String },
    RepProgress { reps: u32, phase: RepPhase },
    Haptic { pattern: HapticPattern },
    Speech { message: String, priority: SpeechPriority },
}

pub trait FeedbackSink: Send + Sync {
    fn emit(&self, event: FeedbackEvent);
}

impl FeedbackSink for Publisher<FeedbackEvent> {
    fn emit(&self, event: FeedbackEvent) {
        self.publish(event);
    }
}

/// レップ数ごとの励ましメッセージ
pub fn milestone_message(reps: u32) -> Option<&'static str> {
    let message = match reps {
        5 => "Great start! Keep it up!",
        10 => "Double digits! You're doing great!",
        15 => "Halfway to 30! Stay strong!",
        20 => "20 reps! Outstanding!",
        25 => "25 and counting! Push through!",
        30 => "30 reps! Military standard achieved!",
        40 => "40 reps! You're crushing it!",
        50 => "50 reps! Incredible performance!",
        60 => "60 reps! Elite level!",
        70 => "70 reps! You're a machine!",
        80 => "80 reps! Maximum score territory!",
        90 => "90 reps! Legendary!",
        100 => "100 REPS! CHAMPION!",
        _ => return None,
    };
    Some(message)
}
