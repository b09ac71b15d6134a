use chrono::Utc;
use uuid::Uuid;

use super::defaults::{default_baseline, ProfileBaseline};
use super::frame::CalibrationFrame;
use super::position::{detect_position, DevicePosition};
use super::profile::{
    AngleAdjustments, AngleMetric, CalibrationData, CalibrationQuality, ExerciseType, PoseNormalization,
    ValidationRanges, VisibilityThresholds,
};
use crate::config::{Config, QualityConfig};
use crate::geometry::{distance, filter_outliers_and_average, mean, midpoint};
use crate::pose::{Joint, MotionSample, PoseSnapshot};

/// 身長の基準値（m）
pub const REFERENCE_HEIGHT: f32 = 1.7;

// --- 体格計測 ---

/// フレーム群から計測した体格。計測できなかった項目は None
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BodyMeasurements {
    pub height: Option<f32>,
    pub arm_span: Option<f32>,
    pub torso_length: Option<f32>,
    pub leg_length: Option<f32>,
}

fn measure(frames: &[CalibrationFrame], f: impl Fn(&PoseSnapshot) -> Option<f32>) -> Option<f32> {
    let values: Vec<f32> = frames.iter().filter_map(|fr| f(&fr.pose)).collect();
    if values.is_empty() {
        None
    } else {
        Some(filter_outliers_and_average(&values))
    }
}

impl BodyMeasurements {
    pub fn from_frames(frames: &[CalibrationFrame]) -> Self {
        Self {
            height: measure(frames, |p| {
                let nose = p.position(Joint::Nose)?;
                let ankles = midpoint(p.position(Joint::LeftAnkle)?, p.position(Joint::RightAnkle)?);
                Some(distance(nose, ankles))
            }),
            arm_span: measure(frames, |p| {
                Some(distance(p.position(Joint::LeftWrist)?, p.position(Joint::RightWrist)?))
            }),
            torso_length: measure(frames, |p| {
                let shoulders = midpoint(p.position(Joint::LeftShoulder)?, p.position(Joint::RightShoulder)?);
                let hips = midpoint(p.position(Joint::LeftHip)?, p.position(Joint::RightHip)?);
                Some(distance(shoulders, hips))
            }),
            leg_length: measure(frames, |p| {
                Some(distance(p.position(Joint::LeftHip)?, p.position(Joint::LeftAnkle)?))
            }),
        }
    }

    /// 計測できた項目だけベースラインを上書きする
    pub fn apply_to(&self, baseline: &mut ProfileBaseline) {
        if let Some(h) = self.height {
            baseline.user_height = h;
        }
        if let Some(a) = self.arm_span {
            baseline.arm_span = a;
        }
        if let Some(t) = self.torso_length {
            baseline.torso_length = t;
        }
        if let Some(l) = self.leg_length {
            baseline.leg_length = l;
        }
    }
}

// --- 端末メトリクス ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceMetrics {
    pub height: f32,
    pub angle: f32,
    pub distance: f32,
    pub stability: f32,
}

impl DeviceMetrics {
    /// 設置状態で補正した端末メトリクス
    pub fn from_frames(frames: &[CalibrationFrame], position: DevicePosition) -> Self {
        let angles: Vec<f32> = frames
            .iter()
            .filter_map(|f| f.motion.as_ref().map(MotionSample::tilt_degrees))
            .collect();
        let stabilities: Vec<f32> = frames.iter().map(|f| f.quality.stability).collect();

        let average_angle = filter_outliers_and_average(&angles);
        let stability = filter_outliers_and_average(&stabilities);

        let (height, angle, distance, stability) = match position {
            DevicePosition::Ground { angle } => (0.1, angle, 1.2, stability),
            DevicePosition::Elevated { height, angle } => (height, angle, 1.5, stability),
            DevicePosition::Tripod { height, angle } => (height, angle, 1.8, (stability + 0.2).min(1.0)),
            DevicePosition::Handheld => (1.0, average_angle, 1.0, (stability - 0.3).max(0.3)),
            DevicePosition::Unknown => (1.0, average_angle, 1.5, stability),
        };
        Self {
            height,
            angle,
            distance,
            stability,
        }
    }
}

// --- 個別の算出 ---

/// 基準角度を設置状態と身長で補正する
pub fn angle_adjustments(position: DevicePosition, user_height: f32) -> AngleAdjustments {
    let mut adj = AngleAdjustments::BASELINE;

    match position {
        DevicePosition::Ground { angle } => {
            // 低い視点では肘の曲がりが浅く見える
            if angle < 30.0 {
                adj.pushup_elbow_down -= 5.0;
                adj.situp_torso_down += 5.0;
            } else if angle > 45.0 {
                adj.pushup_elbow_down += 5.0;
                adj.situp_torso_down -= 5.0;
            }
        }
        DevicePosition::Elevated { height, angle } => {
            if height > 1.5 {
                adj.pushup_elbow_down += 5.0;
                adj.pullup_arm_flexed -= 5.0;
            }
            if angle > 60.0 {
                adj.pushup_elbow_down += 5.0;
                adj.situp_torso_down -= 5.0;
            }
        }
        DevicePosition::Tripod { angle, .. } => {
            if angle > 45.0 {
                adj.pushup_body_alignment += 5.0;
                adj.situp_torso_down -= 3.0;
            }
        }
        DevicePosition::Handheld => {
            adj.pushup_body_alignment += 10.0;
            adj.pullup_body_vertical += 5.0;
        }
        DevicePosition::Unknown => {}
    }

    let height_factor = user_height / REFERENCE_HEIGHT;
    if height_factor > 1.1 {
        adj.pushup_elbow_down += 3.0;
        adj.situp_torso_down += 3.0;
    } else if height_factor < 0.9 {
        adj.pushup_elbow_down -= 3.0;
        adj.situp_torso_down -= 3.0;
    }

    adj
}

/// 安定度と距離から可視性しきい値を決める。常に minimum ≤ support ≤ critical
pub fn visibility_thresholds(device: &DeviceMetrics) -> VisibilityThresholds {
    let distance_adjustment = ((1.5 - device.distance) * 0.1).clamp(-0.1, 0.1);
    let adjusted = 0.5 + device.stability.clamp(0.0, 1.0) * 0.2 + distance_adjustment;
    let clamp = |v: f32| v.clamp(VisibilityThresholds::FLOOR, VisibilityThresholds::CEILING);

    VisibilityThresholds {
        minimum_confidence: clamp((adjusted - 0.2).max(0.3)),
        critical_joints: clamp(adjusted.max(0.4)),
        support_joints: clamp((adjusted - 0.1).max(0.3)),
        face_joints: clamp((adjusted - 0.3).max(0.2)),
    }
}

pub fn pose_normalization(user_height: f32, arm_span: f32, leg_length: f32) -> PoseNormalization {
    PoseNormalization {
        shoulder_width: arm_span * 0.2,
        hip_width: arm_span * 0.15,
        arm_length: arm_span * 0.5,
        leg_length,
        head_size: user_height * 0.13,
    }
}

pub fn validation_ranges() -> ValidationRanges {
    ValidationRanges {
        angle_tolerances: [
            (AngleMetric::Elbow, 10.0),
            (AngleMetric::Torso, 15.0),
            (AngleMetric::Arm, 10.0),
            (AngleMetric::BodyAlignment, 20.0),
        ]
        .into_iter()
        .collect(),
        default_angle_tolerance: Some(15.0),
        position_tolerances: [
            ("horizontal_drift", 0.1),
            ("vertical_drift", 0.1),
            ("distance_variation", 0.2),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect(),
        movement_thresholds: [("max_speed", 30.0), ("min_speed", 2.0), ("stability_window", 5.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    }
}

/// 100·(0.4·信頼度 + 0.3·安定度 + 0.3·完全性) を [0, 100] に丸める
pub fn calibration_score(mean_confidence: f32, mean_stability: f32, mean_completeness: f32) -> f32 {
    (100.0 * (0.4 * mean_confidence + 0.3 * mean_stability + 0.3 * mean_completeness)).clamp(0.0, 100.0)
}

fn frames_score(frames: &[CalibrationFrame]) -> f32 {
    let confidence: Vec<f32> = frames.iter().map(|f| f.quality.overall_confidence).collect();
    let stability: Vec<f32> = frames.iter().map(|f| f.quality.stability).collect();
    let completeness: Vec<f32> = frames.iter().map(|f| f.quality.body_completeness).collect();
    calibration_score(mean(&confidence), mean(&stability), mean(&completeness))
}

// --- 集計器 ---

/// フレームバッチからキャリブレーションプロファイルを作る
#[derive(Debug, Clone)]
pub struct Aggregator {
    required_frames: usize,
    quality: QualityConfig,
}

impl Aggregator {
    pub fn new(required_frames: usize, quality: QualityConfig) -> Self {
        Self {
            required_frames,
            quality,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.collector.required_frames, config.quality.clone())
    }

    pub fn required_frames(&self) -> usize {
        self.required_frames
    }

    pub fn with_required_frames(&self, required_frames: usize) -> Self {
        Self::new(required_frames, self.quality.clone())
    }

    pub fn quality_of(&self, profile: &CalibrationData) -> CalibrationQuality {
        profile.quality(&self.quality)
    }

    /// 必要フレーム数に満たない場合は None
    pub fn aggregate(
        &self,
        exercise: ExerciseType,
        frames: &[CalibrationFrame],
        motion: Option<&MotionSample>,
    ) -> Option<CalibrationData> {
        self.aggregate_capped(exercise, frames, motion, 100.0)
    }

    /// スコア上限つきの集計
    pub fn aggregate_capped(
        &self,
        exercise: ExerciseType,
        frames: &[CalibrationFrame],
        motion: Option<&MotionSample>,
        ceiling: f32,
    ) -> Option<CalibrationData> {
        if frames.len() < self.required_frames || frames.is_empty() {
            log::warn!(
                "Not enough frames for {} calibration (got {}, need >= {})",
                exercise,
                frames.len(),
                self.required_frames.max(1)
            );
            return None;
        }

        let fused = motion.copied().or_else(|| frames.iter().rev().find_map(|f| f.motion));
        let position = detect_position(frames, fused.as_ref());
        let device = DeviceMetrics::from_frames(frames, position);

        let mut baseline = default_baseline(exercise);
        BodyMeasurements::from_frames(frames).apply_to(&mut baseline);

        baseline.device_height = device.height;
        baseline.device_angle = device.angle;
        baseline.device_distance = device.distance;
        baseline.device_stability = device.stability;
        baseline.angle_adjustments = angle_adjustments(position, baseline.user_height);
        baseline.visibility_thresholds = visibility_thresholds(&device);
        baseline.pose_normalization =
            pose_normalization(baseline.user_height, baseline.arm_span, baseline.leg_length);
        baseline.validation_ranges = validation_ranges();

        let profile = self.finish(baseline, frames, ceiling);
        log::info!(
            "{} calibration: position={}, score={:.1} ({:?}), frames={}",
            exercise,
            position,
            profile.calibration_score,
            self.quality_of(&profile),
            profile.frame_count
        );
        Some(profile)
    }

    /// ベースラインからプロファイルを作る。スコアはフレーム品質から求め ceiling で頭打ち、
    /// フレームがなければ ceiling
    pub fn synthesize(&self, baseline: ProfileBaseline, frames: &[CalibrationFrame], ceiling: f32) -> CalibrationData {
        self.finish(baseline, frames, ceiling)
    }

    fn finish(&self, baseline: ProfileBaseline, frames: &[CalibrationFrame], ceiling: f32) -> CalibrationData {
        let ceiling = ceiling.clamp(0.0, 100.0);
        let score = if frames.is_empty() {
            ceiling
        } else {
            frames_score(frames).min(ceiling)
        };

        CalibrationData {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            exercise: baseline.exercise,
            device_height: baseline.device_height,
            device_angle: baseline.device_angle,
            device_distance: baseline.device_distance,
            device_stability: baseline.device_stability,
            user_height: baseline.user_height,
            arm_span: baseline.arm_span,
            torso_length: baseline.torso_length,
            leg_length: baseline.leg_length,
            angle_adjustments: baseline.angle_adjustments,
            visibility_thresholds: baseline.visibility_thresholds,
            pose_normalization: baseline.pose_normalization,
            calibration_score: score,
            confidence_level: score / 100.0,
            frame_count: frames.len(),
            validation_ranges: baseline.validation_ranges,
        }
    }
}
