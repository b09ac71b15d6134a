//! 段階的フォールバック付きのキャリブレーション戦略
//!
//! full body → partial body → key point → manual の順に試す。後ろの戦略ほど
//! 必要な関節とフレームが少なく、スコア上限も低い。

use serde::{Deserialize, Serialize};

use super::aggregator::{Aggregator, BodyMeasurements};
use super::defaults::{default_baseline, ProfileBaseline};
use super::frame::CalibrationFrame;
use super::framing::TargetFraming;
use super::profile::{AngleAdjustments, CalibrationData, ExerciseType, ValidationRanges, VisibilityThresholds};
use crate::config::StrategyConfig;
use crate::geometry::mean;
use crate::pose::{Joint, MotionSample, PoseSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    FullBody,
    PartialBody,
    KeyPoint,
    Manual,
}

impl StrategyKind {
    pub const CHAIN: [StrategyKind; 4] = [
        StrategyKind::FullBody,
        StrategyKind::PartialBody,
        StrategyKind::KeyPoint,
        StrategyKind::Manual,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::FullBody => "Full Body",
            StrategyKind::PartialBody => "Partial Body",
            StrategyKind::KeyPoint => "Key Points",
            StrategyKind::Manual => "Manual",
        }
    }
}

/// 部分戦略で見えているべき必要関節の割合
const PARTIAL_COVERAGE: f32 = 0.75;
const KEY_POINT_COVERAGE: f32 = 0.5;

const FULL_BODY_JOINTS: [Joint; 13] = [
    Joint::Nose,
    Joint::LeftShoulder,
    Joint::RightShoulder,
    Joint::LeftElbow,
    Joint::RightElbow,
    Joint::LeftWrist,
    Joint::RightWrist,
    Joint::LeftHip,
    Joint::RightHip,
    Joint::LeftKnee,
    Joint::RightKnee,
    Joint::LeftAnkle,
    Joint::RightAnkle,
];

fn partial_body_joints(exercise: ExerciseType) -> Vec<Joint> {
    use Joint::*;
    match exercise {
        ExerciseType::Pushup => vec![LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftWrist, RightWrist, LeftHip, RightHip],
        ExerciseType::Situp => vec![LeftShoulder, RightShoulder, LeftHip, RightHip, LeftKnee, RightKnee],
        ExerciseType::Pullup => vec![LeftShoulder, RightShoulder, LeftElbow, RightElbow, LeftWrist, RightWrist],
        ExerciseType::Plank | ExerciseType::Run => vec![LeftShoulder, RightShoulder, LeftHip, RightHip],
    }
}

fn key_point_joints(exercise: ExerciseType) -> Vec<Joint> {
    use Joint::*;
    match exercise {
        ExerciseType::Pushup => vec![LeftShoulder, RightShoulder, LeftElbow, RightElbow],
        ExerciseType::Situp => vec![LeftShoulder, RightShoulder, LeftHip, RightHip],
        ExerciseType::Pullup => vec![LeftWrist, RightWrist, LeftElbow, RightElbow],
        ExerciseType::Plank | ExerciseType::Run => vec![LeftShoulder, RightShoulder],
    }
}

/// 手動キャリブレーションの入力（m）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualInputs {
    pub device_height: f32,
    pub device_distance: f32,
    pub user_height: f32,
}

impl Default for ManualInputs {
    fn default() -> Self {
        Self {
            device_height: 0.8,
            device_distance: 1.5,
            user_height: 1.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationStrategy {
    pub kind: StrategyKind,
    pub exercise: ExerciseType,
    pub required_joints: Vec<Joint>,
    pub required_frames: usize,
    pub minimum_confidence: f32,
    /// この戦略で到達できるスコアの上限
    pub ceiling: f32,
}

impl CalibrationStrategy {
    pub fn new(kind: StrategyKind, exercise: ExerciseType, ceilings: &StrategyConfig) -> Self {
        let (required_joints, required_frames, minimum_confidence, ceiling) = match kind {
            StrategyKind::FullBody => (FULL_BODY_JOINTS.to_vec(), 60, 0.5, ceilings.full_body),
            StrategyKind::PartialBody => (partial_body_joints(exercise), 40, 0.55, ceilings.partial_body),
            StrategyKind::KeyPoint => (key_point_joints(exercise), 20, 0.6, ceilings.key_point),
            StrategyKind::Manual => (Vec::new(), 0, 0.0, ceilings.manual),
        };
        Self {
            kind,
            exercise,
            required_joints,
            required_frames,
            minimum_confidence,
            ceiling,
        }
    }

    fn visible_count(&self, pose: &PoseSnapshot) -> usize {
        self.required_joints
            .iter()
            .filter(|j| pose.visible(**j, self.minimum_confidence).is_some())
            .count()
    }

    /// この戦略で収集するときのフレーミング要件
    pub fn framing(&self) -> TargetFraming {
        let target = TargetFraming::for_exercise(self.exercise);
        match self.kind {
            StrategyKind::PartialBody => target.restricted_to(&self.required_joints, PARTIAL_COVERAGE),
            StrategyKind::KeyPoint => target.restricted_to(&self.required_joints, KEY_POINT_COVERAGE),
            StrategyKind::FullBody | StrategyKind::Manual => target,
        }
    }

    /// 現在の姿勢でこの戦略が実行できるか
    pub fn can_execute(&self, pose: Option<&PoseSnapshot>) -> bool {
        if self.kind == StrategyKind::Manual {
            return true;
        }
        let Some(pose) = pose else {
            return false;
        };
        if self.required_joints.is_empty() {
            return false;
        }
        let visible = self.visible_count(pose);
        let ratio = visible as f32 / self.required_joints.len() as f32;
        match self.kind {
            StrategyKind::FullBody => ratio > 0.85,
            StrategyKind::PartialBody => ratio > PARTIAL_COVERAGE,
            StrategyKind::KeyPoint => visible >= self.required_joints.len() / 2,
            StrategyKind::Manual => true,
        }
    }

    /// フレームからプロファイルを作る。フレーム不足なら None（manual を除く）
    pub fn perform_calibration(
        &self,
        frames: &[CalibrationFrame],
        motion: Option<&MotionSample>,
        aggregator: &Aggregator,
        manual: Option<ManualInputs>,
    ) -> Option<CalibrationData> {
        let aggregator = aggregator.with_required_frames(self.required_frames);
        if self.kind != StrategyKind::Manual && (frames.len() < self.required_frames || frames.is_empty()) {
            log::warn!(
                "{} strategy needs {} frames, got {}",
                self.kind.name(),
                self.required_frames,
                frames.len()
            );
            return None;
        }

        let profile = match self.kind {
            StrategyKind::FullBody => {
                return aggregator.aggregate_capped(self.exercise, frames, motion, self.ceiling);
            }
            StrategyKind::PartialBody => aggregator.synthesize(self.partial_baseline(frames), frames, self.ceiling),
            StrategyKind::KeyPoint => aggregator.synthesize(self.key_point_baseline(frames), frames, self.ceiling),
            StrategyKind::Manual => {
                aggregator.synthesize(manual_baseline(self.exercise, manual.unwrap_or_default()), &[], self.ceiling)
            }
        };
        log::info!(
            "{} calibration via {} strategy: score={:.1}",
            self.exercise,
            self.kind.name(),
            profile.calibration_score
        );
        Some(profile)
    }

    fn partial_baseline(&self, frames: &[CalibrationFrame]) -> ProfileBaseline {
        let mut baseline = default_baseline(self.exercise);
        BodyMeasurements::from_frames(frames).apply_to(&mut baseline);
        let stability: Vec<f32> = frames.iter().map(|f| f.quality.stability).collect();
        baseline.device_stability = mean(&stability);
        baseline.visibility_thresholds = VisibilityThresholds::new(0.5, 0.6, 0.55, 0.4);
        baseline
    }

    fn key_point_baseline(&self, frames: &[CalibrationFrame]) -> ProfileBaseline {
        let mut baseline = default_baseline(self.exercise);
        BodyMeasurements::from_frames(frames).apply_to(&mut baseline);
        baseline.device_stability = 0.7;
        baseline.angle_adjustments = AngleAdjustments {
            pushup_elbow_up: 160.0,
            pushup_elbow_down: 100.0,
            pushup_body_alignment: 25.0,
            situp_torso_up: 85.0,
            situp_torso_down: 50.0,
            situp_knee_angle: 85.0,
            pullup_arm_extended: 160.0,
            pullup_arm_flexed: 100.0,
            pullup_body_vertical: 20.0,
        };
        baseline.visibility_thresholds = VisibilityThresholds::new(0.55, 0.65, 0.6, 0.45);
        baseline.validation_ranges = relaxed_ranges(&baseline.validation_ranges, 20.0, 0.25, 35.0);
        baseline
    }
}

/// 許容値を緩めた範囲
fn relaxed_ranges(base: &ValidationRanges, angle: f32, drift: f32, max_speed: f32) -> ValidationRanges {
    let mut ranges = base.clone();
    ranges.angle_tolerances.clear();
    ranges.default_angle_tolerance = Some(angle);
    for key in ["horizontal_drift", "vertical_drift"] {
        ranges.position_tolerances.insert(key.to_string(), drift);
    }
    ranges.movement_thresholds.insert("max_speed".to_string(), max_speed);
    ranges
}

/// 入力値と保守的な角度からベースラインを作る
pub fn manual_baseline(exercise: ExerciseType, inputs: ManualInputs) -> ProfileBaseline {
    let mut baseline = default_baseline(exercise);
    let h = inputs.user_height;
    baseline.device_height = inputs.device_height;
    baseline.device_distance = inputs.device_distance;
    baseline.device_angle = 30.0;
    baseline.device_stability = 0.5;
    baseline.user_height = h;
    baseline.arm_span = h;
    baseline.torso_length = h * 0.35;
    baseline.leg_length = h * 0.53;
    baseline.angle_adjustments = AngleAdjustments {
        pushup_elbow_up: 160.0,
        pushup_elbow_down: 100.0,
        pushup_body_alignment: 30.0,
        situp_torso_up: 80.0,
        situp_torso_down: 55.0,
        situp_knee_angle: 80.0,
        pullup_arm_extended: 160.0,
        pullup_arm_flexed: 100.0,
        pullup_body_vertical: 25.0,
    };
    baseline.visibility_thresholds = VisibilityThresholds::new(0.6, 0.7, 0.65, 0.5);
    baseline.validation_ranges = relaxed_ranges(&baseline.validation_ranges, 25.0, 0.3, 40.0);
    baseline
}

/// 戦略チェーンの選択状態
#[derive(Debug, Clone)]
pub struct StrategySelector {
    chain: Vec<CalibrationStrategy>,
    current: Option<usize>,
}

impl StrategySelector {
    pub fn new(exercise: ExerciseType, ceilings: &StrategyConfig) -> Self {
        Self {
            chain: StrategyKind::CHAIN
                .iter()
                .map(|kind| CalibrationStrategy::new(*kind, exercise, ceilings))
                .collect(),
            current: None,
        }
    }

    /// 実行可能な最初の戦略を選ぶ。manual は常に実行可能
    pub fn select_strategy(&mut self, pose: Option<&PoseSnapshot>) -> &CalibrationStrategy {
        let last = self.chain.len() - 1;
        let index = self
            .chain
            .iter()
            .position(|s| s.can_execute(pose))
            .unwrap_or(last);
        self.current = Some(index);
        log::info!("Selected calibration strategy: {}", self.chain[index].kind.name());
        &self.chain[index]
    }

    /// 次の戦略へ進む。末尾（manual）ではそのまま
    pub fn fallback_to_next_strategy(&mut self) -> &CalibrationStrategy {
        let last = self.chain.len() - 1;
        let next = match self.current {
            Some(i) => (i + 1).min(last),
            None => 0,
        };
        self.current = Some(next);
        log::info!("Falling back to calibration strategy: {}", self.chain[next].kind.name());
        &self.chain[next]
    }

    pub fn current(&self) -> Option<&CalibrationStrategy> {
        self.current.map(|i| &self.chain[i])
    }

    pub fn strategies(&self) -> &[CalibrationStrategy] {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::pose::JointSample;
    use std::time::Instant;

    fn pose_with(joints: &[Joint], confidence: f32) -> PoseSnapshot {
        PoseSnapshot::from_samples(
            joints
                .iter()
                .enumerate()
                .map(|(i, j)| JointSample::new(*j, 0.3 + 0.02 * i as f32, 0.2 + 0.05 * i as f32, confidence)),
        )
    }

    fn frames(pose: &PoseSnapshot, n: usize) -> Vec<CalibrationFrame> {
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        (0..n)
            .map(|_| CalibrationFrame::new(Instant::now(), pose.clone(), None, &target, 0.7))
            .collect()
    }

    #[test]
    fn test_select_full_body() {
        let mut selector = StrategySelector::new(ExerciseType::Pushup, &StrategyConfig::default());
        let pose = pose_with(&FULL_BODY_JOINTS, 0.9);
        assert_eq!(selector.select_strategy(Some(&pose)).kind, StrategyKind::FullBody);
    }

    #[test]
    fn test_select_partial_when_legs_hidden() {
        let mut selector = StrategySelector::new(ExerciseType::Pushup, &StrategyConfig::default());
        let pose = pose_with(&partial_body_joints(ExerciseType::Pushup), 0.9);
        assert_eq!(selector.select_strategy(Some(&pose)).kind, StrategyKind::PartialBody);
    }

    #[test]
    fn test_select_key_point_with_half_visible() {
        let mut selector = StrategySelector::new(ExerciseType::Pullup, &StrategyConfig::default());
        let pose = pose_with(&[Joint::LeftWrist, Joint::LeftElbow], 0.9);
        assert_eq!(selector.select_strategy(Some(&pose)).kind, StrategyKind::KeyPoint);
    }

    #[test]
    fn test_strategy_confidence_gates_selection() {
        let key_point = CalibrationStrategy::new(StrategyKind::KeyPoint, ExerciseType::Pushup, &StrategyConfig::default());
        let joints = [Joint::LeftShoulder, Joint::RightShoulder, Joint::LeftElbow, Joint::RightElbow];
        let faint = pose_with(&joints, 0.55);
        assert!(!key_point.can_execute(Some(&faint)));
        assert!(key_point.can_execute(Some(&pose_with(&joints, 0.65))));

        let mut selector = StrategySelector::new(ExerciseType::Pushup, &StrategyConfig::default());
        assert_eq!(selector.select_strategy(Some(&faint)).kind, StrategyKind::Manual);
    }

    #[test]
    fn test_lower_strategies_frame_only_their_joints() {
        let config = StrategyConfig::default();
        let full = CalibrationStrategy::new(StrategyKind::FullBody, ExerciseType::Pullup, &config);
        assert_eq!(full.framing(), TargetFraming::for_exercise(ExerciseType::Pullup));

        let partial = CalibrationStrategy::new(StrategyKind::PartialBody, ExerciseType::Pullup, &config);
        let target = partial.framing();
        assert_eq!(target.body_parts, partial.required_joints);
        assert_eq!(target.min_body_coverage, PARTIAL_COVERAGE);

        let key_point = CalibrationStrategy::new(StrategyKind::KeyPoint, ExerciseType::Pullup, &config);
        assert_eq!(key_point.framing().min_body_coverage, KEY_POINT_COVERAGE);
    }

    #[test]
    fn test_select_manual_without_pose() {
        let mut selector = StrategySelector::new(ExerciseType::Situp, &StrategyConfig::default());
        assert_eq!(selector.select_strategy(None).kind, StrategyKind::Manual);
    }

    #[test]
    fn test_fallback_stays_at_manual() {
        let mut selector = StrategySelector::new(ExerciseType::Pushup, &StrategyConfig::default());
        assert!(selector.current().is_none());
        assert_eq!(selector.fallback_to_next_strategy().kind, StrategyKind::FullBody);
        assert_eq!(selector.fallback_to_next_strategy().kind, StrategyKind::PartialBody);
        assert_eq!(selector.fallback_to_next_strategy().kind, StrategyKind::KeyPoint);
        assert_eq!(selector.fallback_to_next_strategy().kind, StrategyKind::Manual);
        assert_eq!(selector.fallback_to_next_strategy().kind, StrategyKind::Manual);
        assert_eq!(selector.current().unwrap().kind, StrategyKind::Manual);
    }

    #[test]
    fn test_manual_profile_scores_ceiling() {
        let strategy = CalibrationStrategy::new(StrategyKind::Manual, ExerciseType::Pushup, &StrategyConfig::default());
        let aggregator = Aggregator::new(60, QualityConfig::default());
        let inputs = ManualInputs {
            user_height: 1.8,
            ..ManualInputs::default()
        };
        let profile = strategy.perform_calibration(&[], None, &aggregator, Some(inputs)).unwrap();
        assert_eq!(profile.calibration_score, 60.0);
        assert_eq!(profile.frame_count, 0);
        assert_eq!(profile.user_height, 1.8);
        assert!((profile.torso_length - 0.63).abs() < 1e-5);
        assert_eq!(profile.angle_adjustments.pushup_elbow_up, 160.0);
        assert!(profile.visibility_thresholds.is_ordered());
        assert_eq!(profile.validation_ranges.angle_tolerance(crate::calibration::profile::AngleMetric::Elbow), Some(25.0));
    }

    #[test]
    fn test_key_point_requires_frames_and_caps_score() {
        let strategy = CalibrationStrategy::new(StrategyKind::KeyPoint, ExerciseType::Pushup, &StrategyConfig::default());
        let aggregator = Aggregator::new(60, QualityConfig::default());
        let pose = pose_with(&FULL_BODY_JOINTS, 1.0);
        assert!(strategy.perform_calibration(&frames(&pose, 10), None, &aggregator, None).is_none());

        let profile = strategy.perform_calibration(&frames(&pose, 20), None, &aggregator, None).unwrap();
        assert!(profile.calibration_score <= 65.0);
        assert_eq!(profile.device_stability, 0.7);
        assert!(profile.visibility_thresholds.is_ordered());
    }

    #[test]
    fn test_ceilings_are_ordered() {
        let config = StrategyConfig::default();
        let ceilings: Vec<f32> = StrategyKind::CHAIN
            .iter()
            .map(|k| CalibrationStrategy::new(*k, ExerciseType::Pushup, &config).ceiling)
            .collect();
        assert!(ceilings.windows(2).all(|w| w[0] > w[1]));
    }
}
