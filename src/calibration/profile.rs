use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::QualityConfig;

// --- 種目 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseType {
    Pushup,
    Situp,
    Pullup,
    Plank,
    Run,
}

impl ExerciseType {
    pub const ALL: [ExerciseType; 5] = [
        ExerciseType::Pushup,
        ExerciseType::Situp,
        ExerciseType::Pullup,
        ExerciseType::Plank,
        ExerciseType::Run,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExerciseType::Pushup => "pushup",
            ExerciseType::Situp => "situp",
            ExerciseType::Pullup => "pullup",
            ExerciseType::Plank => "plank",
            ExerciseType::Run => "run",
        }
    }

    /// 姿勢からレップを採点できる種目か
    pub fn is_pose_scored(self) -> bool {
        matches!(self, ExerciseType::Pushup | ExerciseType::Situp | ExerciseType::Pullup)
    }
}

impl fmt::Display for ExerciseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown exercise type: {0}")]
pub struct UnknownExercise(pub String);

impl FromStr for ExerciseType {
    type Err = UnknownExercise;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ExerciseType::ALL
            .into_iter()
            .find(|e| e.as_str() == lower)
            .ok_or_else(|| UnknownExercise(s.to_string()))
    }
}

// --- 角度補正 ---

/// 種目ごとに評価する角度の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleMetric {
    /// 肘角度（腕立て）
    Elbow,
    /// 体幹の一直線からのずれ（腕立て）
    BodyAlignment,
    /// 体幹の水平からの角度（腹筋）
    Torso,
    /// 膝角度（腹筋）
    Knee,
    /// 肘角度（懸垂）
    Arm,
    /// 体幹の鉛直からのずれ（懸垂）
    BodyVertical,
}

/// 種目別の目標関節角度（度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleAdjustments {
    pub pushup_elbow_up: f32,
    pub pushup_elbow_down: f32,
    pub pushup_body_alignment: f32,
    pub situp_torso_up: f32,
    pub situp_torso_down: f32,
    pub situp_knee_angle: f32,
    pub pullup_arm_extended: f32,
    pub pullup_arm_flexed: f32,
    pub pullup_body_vertical: f32,
}

impl AngleAdjustments {
    /// 補正前の基準角度
    pub const BASELINE: AngleAdjustments = AngleAdjustments {
        pushup_elbow_up: 170.0,
        pushup_elbow_down: 90.0,
        pushup_body_alignment: 15.0,
        situp_torso_up: 90.0,
        situp_torso_down: 45.0,
        situp_knee_angle: 90.0,
        pullup_arm_extended: 170.0,
        pullup_arm_flexed: 90.0,
        pullup_body_vertical: 10.0,
    };

    /// 指標の目標範囲 (下限, 上限)。単一目標の指標は (0, 許容上限) または (目標, 目標)
    pub fn target_band(&self, metric: AngleMetric) -> (f32, f32) {
        match metric {
            AngleMetric::Elbow => (self.pushup_elbow_down, self.pushup_elbow_up),
            AngleMetric::BodyAlignment => (0.0, self.pushup_body_alignment),
            AngleMetric::Torso => (self.situp_torso_down, self.situp_torso_up),
            AngleMetric::Knee => (self.situp_knee_angle, self.situp_knee_angle),
            AngleMetric::Arm => (self.pullup_arm_flexed, self.pullup_arm_extended),
            AngleMetric::BodyVertical => (0.0, self.pullup_body_vertical),
        }
    }

    /// 基準からのずれを加算補正として返す: adjusted = raw + correction
    ///
    /// 範囲指標は下限・上限のずれの平均を用いる。
    pub fn correction(&self, metric: AngleMetric) -> f32 {
        let (lo, hi) = self.target_band(metric);
        let (base_lo, base_hi) = Self::BASELINE.target_band(metric);
        match metric {
            AngleMetric::BodyAlignment | AngleMetric::BodyVertical => base_hi - hi,
            _ => ((base_lo - lo) + (base_hi - hi)) / 2.0,
        }
    }
}

impl Default for AngleAdjustments {
    fn default() -> Self {
        Self::BASELINE
    }
}

// --- 可視性しきい値 ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilityThresholds {
    pub minimum_confidence: f32,
    pub critical_joints: f32,
    pub support_joints: f32,
    pub face_joints: f32,
}

impl VisibilityThresholds {
    pub const FLOOR: f32 = 0.2;
    pub const CEILING: f32 = 0.8;

    pub fn new(minimum_confidence: f32, critical_joints: f32, support_joints: f32, face_joints: f32) -> Self {
        Self {
            minimum_confidence,
            critical_joints,
            support_joints,
            face_joints,
        }
    }

    /// minimum ≤ support ≤ critical かつ全て [0.2, 0.8]
    pub fn is_ordered(&self) -> bool {
        let in_range = |v: f32| (Self::FLOOR..=Self::CEILING).contains(&v);
        in_range(self.minimum_confidence)
            && in_range(self.critical_joints)
            && in_range(self.support_joints)
            && in_range(self.face_joints)
            && self.minimum_confidence <= self.support_joints
            && self.support_joints <= self.critical_joints
    }
}

// --- 体格正規化 ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseNormalization {
    pub shoulder_width: f32,
    pub hip_width: f32,
    pub arm_length: f32,
    pub leg_length: f32,
    pub head_size: f32,
}

// --- 許容範囲 ---

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationRanges {
    pub angle_tolerances: BTreeMap<AngleMetric, f32>,
    /// 個別指定のない角度に使う許容値
    #[serde(default)]
    pub default_angle_tolerance: Option<f32>,
    pub position_tolerances: BTreeMap<String, f32>,
    pub movement_thresholds: BTreeMap<String, f32>,
}

impl ValidationRanges {
    pub fn angle_tolerance(&self, metric: AngleMetric) -> Option<f32> {
        self.angle_tolerances
            .get(&metric)
            .copied()
            .or(self.default_angle_tolerance)
    }

    pub fn position_tolerance(&self, key: &str) -> Option<f32> {
        self.position_tolerances.get(key).copied()
    }

    pub fn movement_threshold(&self, key: &str) -> Option<f32> {
        self.movement_thresholds.get(key).copied()
    }
}

// --- 品質 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationQuality {
    Invalid,
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl CalibrationQuality {
    pub fn from_score(score: f32, thresholds: &QualityConfig) -> Self {
        if score >= thresholds.excellent {
            CalibrationQuality::Excellent
        } else if score >= thresholds.good {
            CalibrationQuality::Good
        } else if score >= thresholds.acceptable {
            CalibrationQuality::Acceptable
        } else if score >= thresholds.poor {
            CalibrationQuality::Poor
        } else {
            CalibrationQuality::Invalid
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            CalibrationQuality::Excellent => "Excellent calibration - optimal accuracy expected",
            CalibrationQuality::Good => "Good calibration - high accuracy expected",
            CalibrationQuality::Acceptable => "Acceptable calibration - moderate accuracy expected",
            CalibrationQuality::Poor => "Poor calibration - consider recalibrating",
            CalibrationQuality::Invalid => "Invalid calibration - recalibration required",
        }
    }

    pub fn is_usable(self) -> bool {
        self != CalibrationQuality::Invalid
    }
}

/// プロファイルの信頼度に応じた判定の適応度合い
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AdaptationLevel {
    None,
    Low,
    Medium,
    High,
}

// --- プロファイル本体 ---

/// 1回のキャリブレーション結果。作成後は変更しない
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub exercise: ExerciseType,

    // 端末
    pub device_height: f32,
    pub device_angle: f32,
    pub device_distance: f32,
    pub device_stability: f32,

    // 体格
    pub user_height: f32,
    pub arm_span: f32,
    pub torso_length: f32,
    pub leg_length: f32,

    pub angle_adjustments: AngleAdjustments,
    pub visibility_thresholds: VisibilityThresholds,
    pub pose_normalization: PoseNormalization,

    pub calibration_score: f32,
    pub confidence_level: f32,
    pub frame_count: usize,
    pub validation_ranges: ValidationRanges,
}

impl CalibrationData {
    pub fn quality(&self, thresholds: &QualityConfig) -> CalibrationQuality {
        CalibrationQuality::from_score(self.calibration_score, thresholds)
    }

    pub fn adaptation_level(&self) -> AdaptationLevel {
        let score = self.calibration_score;
        let confidence = self.confidence_level;
        if score >= 90.0 && confidence >= 0.9 {
            AdaptationLevel::High
        } else if score >= 75.0 && confidence >= 0.7 {
            AdaptationLevel::Medium
        } else if score >= 60.0 && confidence >= 0.5 {
            AdaptationLevel::Low
        } else {
            AdaptationLevel::None
        }
    }

    /// 経過時間（日）
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_days()
    }
}
