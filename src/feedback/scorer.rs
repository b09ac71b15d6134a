//! キャリブレーション済みフォーム採点
//!
//! レップ判定は毎フレーム、採点と触覚・音声は `feedback_interval` ごとに行う。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use super::reps::{elbow_angle, knee_angle, pushup_alignment, torso_from_horizontal, torso_from_vertical};
use super::{milestone_message, FeedbackEvent, FeedbackSink, FormIssue, HapticPattern, RepCounter, RepPhase, Severity, SpeechPriority};
use crate::calibration::{AngleAdjustments, AngleMetric, CalibrationData, ExerciseType};
use crate::config::FeedbackConfig;
use crate::pose::{Joint, PoseSnapshot};

/// キャリブレーションがないときのフォームスコア
pub const NEUTRAL_SCORE: f32 = 0.5;

/// 1回の採点結果
#[derive(Debug, Clone, PartialEq)]
pub struct FormAnalysis {
    pub form_score: f32,
    pub visibility: f32,
    pub angle_accuracy: f32,
    pub stability: f32,
    /// 補正後の角度
    pub angles: Vec<(AngleMetric, f32)>,
    pub reps: u32,
    pub phase: RepPhase,
    pub issues: Vec<FormIssue>,
}

fn critical_joints(exercise: ExerciseType) -> &'static [Joint] {
    use Joint::*;
    match exercise {
        ExerciseType::Pushup => &[LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftWrist, RightWrist, LeftHip, RightHip],
        ExerciseType::Situp => &[LeftShoulder, RightShoulder, LeftHip, RightHip, LeftKnee, RightKnee, LeftAnkle, RightAnkle],
        ExerciseType::Pullup => &[Nose, LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftWrist, RightWrist],
        ExerciseType::Plank | ExerciseType::Run => &[],
    }
}

/// 種目の評価角度（補正前）
pub fn raw_angles(exercise: ExerciseType, pose: &PoseSnapshot, threshold: f32) -> Vec<(AngleMetric, f32)> {
    let candidates = match exercise {
        ExerciseType::Pushup => [
            (AngleMetric::Elbow, elbow_angle(pose, threshold)),
            (AngleMetric::BodyAlignment, pushup_alignment(pose, threshold)),
        ],
        ExerciseType::Situp => [
            (AngleMetric::Torso, torso_from_horizontal(pose, threshold)),
            (AngleMetric::Knee, knee_angle(pose, threshold)),
        ],
        ExerciseType::Pullup => [
            (AngleMetric::Arm, elbow_angle(pose, threshold)),
            (AngleMetric::BodyVertical, torso_from_vertical(pose, threshold)),
        ],
        ExerciseType::Plank | ExerciseType::Run => return Vec::new(),
    };
    candidates
        .into_iter()
        .filter_map(|(metric, angle)| angle.map(|a| (metric, a)))
        .collect()
}

/// 重要関節の見え方。critical 以上で 1、minimum 以上で 0.5、欠損は 0
pub fn visibility_score(exercise: ExerciseType, pose: &PoseSnapshot, calibration: &CalibrationData) -> f32 {
    let joints = critical_joints(exercise);
    if joints.is_empty() {
        return 0.0;
    }
    let thresholds = &calibration.visibility_thresholds;
    let total: f32 = joints
        .iter()
        .map(|j| match pose.get(*j) {
            Some(s) if s.confidence >= thresholds.critical_joints => 1.0,
            Some(s) if s.confidence >= thresholds.minimum_confidence => 0.5,
            _ => 0.0,
        })
        .sum();
    total / joints.len() as f32
}

/// 標準の目標範囲からのはみ出し量
fn deviation(metric: AngleMetric, adjusted: f32) -> f32 {
    let (lo, hi) = AngleAdjustments::BASELINE.target_band(metric);
    if adjusted < lo {
        lo - adjusted
    } else if adjusted > hi {
        adjusted - hi
    } else {
        0.0
    }
}

/// 角度ごとに許容値超過分を減点する（1角度あたり最大 0.5）
pub fn angle_accuracy(angles: &[(AngleMetric, f32)], calibration: &CalibrationData) -> f32 {
    let mut accuracy = 1.0;
    for (metric, angle) in angles {
        let Some(tolerance) = calibration.validation_ranges.angle_tolerance(*metric) else {
            continue;
        };
        let dev = deviation(*metric, *angle);
        if dev > tolerance {
            accuracy -= (dev / (2.0 * tolerance)).min(0.5);
        }
    }
    f32::max(accuracy, 0.0)
}

pub struct FormScorer {
    exercise: ExerciseType,
    calibration: Option<CalibrationData>,
    config: FeedbackConfig,
    sink: Arc<dyn FeedbackSink>,
    counter: RepCounter,
    active: bool,
    last_feedback: Option<Instant>,
    last_audio: Option<Instant>,
    history: VecDeque<f32>,
    consecutive_good: u32,
    consecutive_poor: u32,
    previous_issues: Vec<String>,
    pending_milestone: Option<&'static str>,
    last_phase: RepPhase,
}

impl FormScorer {
    /// 姿勢採点に対応しない種目は None
    pub fn new(
        exercise: ExerciseType,
        calibration: Option<CalibrationData>,
        config: FeedbackConfig,
        sink: Arc<dyn FeedbackSink>,
    ) -> Option<Self> {
        let Some(counter) = RepCounter::new(exercise, calibration.as_ref()) else {
            log::warn!("No form scoring for {}", exercise);
            return None;
        };
        if calibration.is_none() {
            log::info!("Scoring {} without calibration", exercise);
        }
        let last_phase = counter.phase();
        Some(Self {
            exercise,
            calibration,
            config,
            sink,
            counter,
            active: true,
            last_feedback: None,
            last_audio: None,
            history: VecDeque::new(),
            consecutive_good: 0,
            consecutive_poor: 0,
            previous_issues: Vec::new(),
            pending_milestone: None,
            last_phase,
        })
    }

    pub fn reps(&self) -> u32 {
        self.counter.reps()
    }

    pub fn phase(&self) -> RepPhase {
        self.counter.phase()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_bar_height(&mut self, bar_height: f32) {
        self.counter.set_bar_height(bar_height);
    }

    /// 以降のフレームを無視する
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// 状態を初期化して再開する
    pub fn reset(&mut self) {
        self.counter.reset();
        self.active = true;
        self.last_feedback = None;
        self.last_audio = None;
        self.history.clear();
        self.consecutive_good = 0;
        self.consecutive_poor = 0;
        self.previous_issues.clear();
        self.pending_milestone = None;
        self.last_phase = self.counter.phase();
    }

    /// 1フレームを処理する。採点した場合だけ結果を返す
    pub fn process(&mut self, pose: Option<&PoseSnapshot>, now: Instant) -> Option<FormAnalysis> {
        if !self.active {
            return None;
        }
        let pose = pose?;

        let update = self.counter.update(pose);
        if update.completed || update.phase != self.last_phase {
            self.sink.emit(FeedbackEvent::RepProgress {
                reps: update.reps,
                phase: update.phase,
            });
            self.last_phase = update.phase;
        }
        if update.completed {
            if let Some(message) = milestone_message(update.reps) {
                self.sink.emit(FeedbackEvent::Milestone {
                    reps: update.reps,
                    message: message.to_string(),
                });
                self.pending_milestone = Some(message);
            }
        }

        if let Some(last) = self.last_feedback {
            if now.saturating_duration_since(last) < self.config.feedback_interval() {
                return None;
            }
        }
        self.last_feedback = Some(now);

        let analysis = self.score(pose, update.reps, update.phase, update.issues);
        self.deliver(&analysis, now);

        self.history.push_back(analysis.form_score);
        while self.history.len() > self.config.history {
            self.history.pop_front();
        }
        Some(analysis)
    }

    /// 直近3回のスコアの跳びで減点する
    fn stability(&self) -> f32 {
        if self.history.len() < 3 {
            return 1.0;
        }
        let recent: Vec<f32> = self.history.iter().rev().take(3).copied().collect();
        let jumps = recent
            .windows(2)
            .filter(|w| (w[0] - w[1]).abs() > self.config.jump_threshold)
            .count();
        f32::max(1.0 - 0.2 * jumps as f32, 0.0)
    }

    fn score(&self, pose: &PoseSnapshot, reps: u32, phase: RepPhase, issues: Vec<FormIssue>) -> FormAnalysis {
        let Some(calibration) = &self.calibration else {
            return FormAnalysis {
                form_score: NEUTRAL_SCORE,
                visibility: 0.0,
                angle_accuracy: 1.0,
                stability: 1.0,
                angles: raw_angles(self.exercise, pose, 0.3),
                reps,
                phase,
                issues,
            };
        };

        let adjustments = &calibration.angle_adjustments;
        let angles: Vec<(AngleMetric, f32)> =
            raw_angles(self.exercise, pose, calibration.visibility_thresholds.minimum_confidence)
                .into_iter()
                .map(|(metric, raw)| (metric, raw + adjustments.correction(metric)))
                .collect();

        let visibility = visibility_score(self.exercise, pose, calibration);
        let accuracy = angle_accuracy(&angles, calibration);
        let stability = self.stability();
        let form_score = (visibility * accuracy * stability).clamp(0.0, 1.0);
        log::debug!(
            "{} form score {:.2} (visibility {:.2}, angles {:.2}, stability {:.2})",
            self.exercise,
            form_score,
            visibility,
            accuracy,
            stability
        );

        FormAnalysis {
            form_score,
            visibility,
            angle_accuracy: accuracy,
            stability,
            angles,
            reps,
            phase,
            issues,
        }
    }

    fn deliver(&mut self, analysis: &FormAnalysis, now: Instant) {
        let score = analysis.form_score;
        if score > self.config.good_form {
            self.consecutive_good += 1;
            self.consecutive_poor = 0;
        } else if score < self.config.poor_form {
            self.consecutive_poor += 1;
            self.consecutive_good = 0;
        } else {
            self.consecutive_good = 0;
            self.consecutive_poor = 0;
        }

        let corrections: Vec<&FormIssue> = analysis
            .issues
            .iter()
            .filter(|i| i.severity >= Severity::Warning)
            .collect();
        for issue in &corrections {
            if !self.previous_issues.contains(&issue.message) {
                self.sink.emit(FeedbackEvent::FormCorrection {
                    message: issue.message.clone(),
                    severity: issue.severity,
                });
            }
        }
        self.previous_issues = corrections.iter().map(|i| i.message.clone()).collect();

        let stable = self.config.stable_frames;
        if !corrections.is_empty() {
            self.sink.emit(FeedbackEvent::Haptic {
                pattern: HapticPattern::Warning,
            });
        } else if score > self.config.good_form && self.consecutive_good == stable {
            self.sink.emit(FeedbackEvent::Haptic {
                pattern: HapticPattern::Success,
            });
        }
        if self.consecutive_good == stable * 3 {
            self.sink.emit(FeedbackEvent::Encouragement {
                message: "Great form! Keep it up!".to_string(),
            });
        }

        let audio_ready = self
            .last_audio
            .map_or(true, |last| now.saturating_duration_since(last) >= self.config.audio_interval());
        if !audio_ready {
            return;
        }

        let speech = if let Some(critical) = corrections.iter().find(|i| i.severity == Severity::Critical) {
            Some((critical.message.clone(), SpeechPriority::Critical))
        } else if self.consecutive_poor >= self.config.sustained_poor_frames {
            let message = corrections
                .first()
                .map_or_else(|| "Focus on your form".to_string(), |i| i.message.clone());
            Some((message, SpeechPriority::High))
        } else {
            self.pending_milestone
                .take()
                .map(|m| (m.to_string(), SpeechPriority::Normal))
        };

        if let Some((message, priority)) = speech {
            self.sink.emit(FeedbackEvent::Speech { message, priority });
            self.last_audio = Some(now);
        }
    }
}
