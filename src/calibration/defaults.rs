use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::profile::{
    AngleAdjustments, AngleMetric, ExerciseType, PoseNormalization, ValidationRanges,
    VisibilityThresholds,
};

/// スコア以外のプロファイル内容
///
/// スコアは集計器だけが決めるため、既定値や手入力からプロファイルを作るときは
/// まずこの形で組み立ててから `Aggregator::synthesize` に渡す。
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileBaseline {
    pub exercise: ExerciseType,
    pub device_height: f32,
    pub device_angle: f32,
    pub device_distance: f32,
    pub device_stability: f32,
    pub user_height: f32,
    pub arm_span: f32,
    pub torso_length: f32,
    pub leg_length: f32,
    pub angle_adjustments: AngleAdjustments,
    pub visibility_thresholds: VisibilityThresholds,
    pub pose_normalization: PoseNormalization,
    pub validation_ranges: ValidationRanges,
}

const DEFAULT_NORMALIZATION: PoseNormalization = PoseNormalization {
    shoulder_width: 0.34,
    hip_width: 0.26,
    arm_length: 0.85,
    leg_length: 0.9,
    head_size: 0.22,
};

fn ranges(
    angles: &[(AngleMetric, f32)],
    horizontal_drift: f32,
    vertical_drift: f32,
    max_speed: f32,
    min_speed: f32,
) -> ValidationRanges {
    ValidationRanges {
        angle_tolerances: angles.iter().copied().collect(),
        default_angle_tolerance: None,
        position_tolerances: BTreeMap::from([
            ("horizontal_drift".to_string(), horizontal_drift),
            ("vertical_drift".to_string(), vertical_drift),
        ]),
        movement_thresholds: BTreeMap::from([
            ("max_speed".to_string(), max_speed),
            ("min_speed".to_string(), min_speed),
        ]),
    }
}

/// 種目ごとの既定ベースライン
pub fn default_baseline(exercise: ExerciseType) -> ProfileBaseline {
    let mut baseline = ProfileBaseline {
        exercise,
        device_height: 0.8,
        device_angle: 30.0,
        device_distance: 1.5,
        device_stability: 0.8,
        user_height: 1.7,
        arm_span: 1.7,
        torso_length: 0.6,
        leg_length: 0.9,
        angle_adjustments: AngleAdjustments {
            pushup_body_alignment: 20.0,
            pullup_body_vertical: 15.0,
            ..AngleAdjustments::BASELINE
        },
        visibility_thresholds: VisibilityThresholds::new(0.5, 0.65, 0.6, 0.4),
        pose_normalization: DEFAULT_NORMALIZATION,
        validation_ranges: ranges(&[], 0.2, 0.2, 30.0, 2.0),
    };

    match exercise {
        ExerciseType::Pushup => {
            baseline.device_height = 0.3;
            baseline.device_angle = 45.0;
            baseline.validation_ranges = ranges(
                &[(AngleMetric::Elbow, 15.0), (AngleMetric::BodyAlignment, 25.0)],
                0.15,
                0.15,
                30.0,
                2.0,
            );
        }
        ExerciseType::Situp => {
            baseline.device_height = 0.3;
            baseline.device_angle = 45.0;
            baseline.device_distance = 1.8;
            baseline.angle_adjustments = AngleAdjustments::BASELINE;
            baseline.validation_ranges = ranges(
                &[(AngleMetric::Torso, 20.0), (AngleMetric::Knee, 15.0)],
                0.2,
                0.15,
                25.0,
                3.0,
            );
        }
        ExerciseType::Pullup => {
            baseline.device_height = 1.0;
            baseline.device_angle = 15.0;
            baseline.device_distance = 2.0;
            baseline.angle_adjustments = AngleAdjustments {
                pullup_body_vertical: 15.0,
                ..AngleAdjustments::BASELINE
            };
            baseline.validation_ranges = ranges(
                &[(AngleMetric::Arm, 15.0), (AngleMetric::BodyVertical, 20.0)],
                0.25,
                0.1,
                35.0,
                2.0,
            );
        }
        ExerciseType::Plank | ExerciseType::Run => {}
    }

    baseline
}

// --- キャリブレーションモード ---

/// 段階的なキャリブレーションモード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// 既定値のみで即開始
    Quick,
    Basic,
    Full,
}

impl CalibrationMode {
    pub fn required_frames(self) -> usize {
        match self {
            CalibrationMode::Quick => 0,
            CalibrationMode::Basic => 30,
            CalibrationMode::Full => 60,
        }
    }

    pub fn minimum_confidence(self) -> f32 {
        match self {
            CalibrationMode::Quick => 0.6,
            CalibrationMode::Basic => 0.55,
            CalibrationMode::Full => 0.5,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            CalibrationMode::Quick => "Quick Start",
            CalibrationMode::Basic => "Basic Setup",
            CalibrationMode::Full => "Full Calibration",
        }
    }
}

/// モードごとの進捗。上位モードへの誘導判定に使う
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub exercise: ExerciseType,
    pub mode: CalibrationMode,
    pub completed_reps: u32,
    pub has_completed_full_calibration: bool,
}

impl CalibrationProgress {
    pub fn should_prompt_for_upgrade(&self) -> bool {
        if self.has_completed_full_calibration {
            return false;
        }
        match self.mode {
            CalibrationMode::Quick => self.completed_reps >= 10,
            CalibrationMode::Basic => self.completed_reps >= 25,
            CalibrationMode::Full => false,
        }
    }
}
