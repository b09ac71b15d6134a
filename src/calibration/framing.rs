use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use super::position::DevicePosition;
use super::profile::ExerciseType;
use crate::geometry::distance;
use crate::pose::{Joint, PoseSnapshot};

// --- 目標フレーミング ---

/// 種目ごとのフレーミング要件
///
/// サイズは正規化座標での体の大きさ (肩幅 + 腰幅 + 体幹高さ) / 3。
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFraming {
    pub exercise: ExerciseType,
    /// 見えている必要がある関節
    pub body_parts: Vec<Joint>,
    pub optimal_size: f32,
    pub size_range: RangeInclusive<f32>,
    pub vertical_range: RangeInclusive<f32>,
    pub horizontal_range: RangeInclusive<f32>,
    /// body_parts のうち見えているべき割合
    pub min_body_coverage: f32,
}

const SIDES: [(Joint, Joint); 7] = [
    (Joint::LeftShoulder, Joint::RightShoulder),
    (Joint::LeftElbow, Joint::RightElbow),
    (Joint::LeftWrist, Joint::RightWrist),
    (Joint::LeftHip, Joint::RightHip),
    (Joint::LeftKnee, Joint::RightKnee),
    (Joint::LeftAnkle, Joint::RightAnkle),
    (Joint::LeftEye, Joint::RightEye),
];

fn both_sides(pairs: &[(Joint, Joint)]) -> Vec<Joint> {
    pairs.iter().flat_map(|(l, r)| [*l, *r]).collect()
}

impl TargetFraming {
    pub fn for_exercise(exercise: ExerciseType) -> Self {
        match exercise {
            ExerciseType::Pushup => Self {
                exercise,
                body_parts: both_sides(&[SIDES[0], SIDES[1], SIDES[2], SIDES[3], SIDES[5]]),
                optimal_size: 0.15,
                size_range: 0.03..=0.45,
                vertical_range: 0.4..=0.6,
                horizontal_range: 0.2..=0.8,
                min_body_coverage: 0.7,
            },
            ExerciseType::Situp => {
                let mut body_parts = both_sides(&[SIDES[0], SIDES[1], SIDES[3], SIDES[4]]);
                body_parts.push(Joint::Nose);
                Self {
                    exercise,
                    body_parts,
                    optimal_size: 0.15,
                    size_range: 0.03..=0.45,
                    vertical_range: 0.25..=0.75,
                    horizontal_range: 0.2..=0.8,
                    min_body_coverage: 0.65,
                }
            }
            ExerciseType::Pullup => {
                let mut body_parts = both_sides(&[SIDES[0], SIDES[1], SIDES[2], SIDES[3], SIDES[4]]);
                body_parts.push(Joint::Nose);
                Self {
                    exercise,
                    body_parts,
                    optimal_size: 0.18,
                    size_range: 0.05..=0.40,
                    vertical_range: 0.15..=0.85,
                    horizontal_range: 0.2..=0.8,
                    min_body_coverage: 0.75,
                }
            }
            ExerciseType::Plank | ExerciseType::Run => Self {
                exercise,
                body_parts: Vec::new(),
                optimal_size: 0.15,
                size_range: 0.03..=0.45,
                vertical_range: 0.2..=0.8,
                horizontal_range: 0.2..=0.8,
                min_body_coverage: 0.5,
            },
        }
    }

    /// body_parts のうち閾値を超えて見えている割合。要件がなければ 1
    pub fn visibility_ratio(&self, pose: &PoseSnapshot, threshold: f32) -> f32 {
        if self.body_parts.is_empty() {
            return 1.0;
        }
        let visible = self
            .body_parts
            .iter()
            .filter(|j| pose.visible(**j, threshold).is_some())
            .count();
        visible as f32 / self.body_parts.len() as f32
    }

    /// 関節要件だけを差し替える。部分的な戦略で収集するとき用
    pub fn restricted_to(mut self, body_parts: &[Joint], min_body_coverage: f32) -> Self {
        self.body_parts = body_parts.to_vec();
        self.min_body_coverage = min_body_coverage;
        self
    }
}

// --- フレーミング判定 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingStatus {
    Unknown,
    TooClose,
    TooFar,
    TooLeft,
    TooRight,
    TooHigh,
    TooLow,
    Acceptable,
    Optimal,
}

impl FramingStatus {
    pub fn is_acceptable(self) -> bool {
        matches!(self, FramingStatus::Acceptable | FramingStatus::Optimal)
    }

    pub fn instruction(self) -> &'static str {
        match self {
            FramingStatus::Unknown => "Position yourself in front of the camera",
            FramingStatus::TooClose => "Step back from the device",
            FramingStatus::TooFar => "Move closer to the device",
            FramingStatus::TooLeft => "Move to the right",
            FramingStatus::TooRight => "Move to the left",
            FramingStatus::TooHigh => "Lower your position or raise the device",
            FramingStatus::TooLow => "Raise your position or lower the device",
            FramingStatus::Acceptable => "Good positioning - ready to start",
            FramingStatus::Optimal => "Perfect positioning!",
        }
    }
}

const TORSO: [Joint; 4] = [
    Joint::LeftShoulder,
    Joint::RightShoulder,
    Joint::LeftHip,
    Joint::RightHip,
];

/// 肩と腰の平均位置。見えていなければ画面中央
pub fn body_center(pose: &PoseSnapshot, threshold: f32) -> [f32; 2] {
    let points: Vec<[f32; 2]> = TORSO
        .iter()
        .filter_map(|j| pose.visible(*j, threshold).map(|s| s.position()))
        .collect();
    if points.is_empty() {
        return [0.5, 0.5];
    }
    let n = points.len() as f32;
    [
        points.iter().map(|p| p[0]).sum::<f32>() / n,
        points.iter().map(|p| p[1]).sum::<f32>() / n,
    ]
}

/// 肩と腰が揃っているときだけ測れる体の大きさ
pub fn measured_body_size(pose: &PoseSnapshot) -> Option<f32> {
    let ls = pose.position(Joint::LeftShoulder)?;
    let rs = pose.position(Joint::RightShoulder)?;
    let lh = pose.position(Joint::LeftHip)?;
    let rh = pose.position(Joint::RightHip)?;
    let shoulder_width = distance(ls, rs);
    let hip_width = distance(lh, rh);
    let torso_height = (ls[1] - lh[1]).abs();
    Some((shoulder_width + hip_width + torso_height) / 3.0)
}

/// 姿勢が種目のフレーミング要件を満たすか判定する。
/// 腰が写っていない姿勢では大きさを判定しない
pub fn evaluate_framing(pose: &PoseSnapshot, target: &TargetFraming, threshold: f32) -> FramingStatus {
    let center = body_center(pose, threshold);
    let size = measured_body_size(pose);

    if target.visibility_ratio(pose, threshold) < target.min_body_coverage {
        return diagnose_framing_issue(center, size, target);
    }

    if let Some(size) = size {
        if size < *target.size_range.start() {
            return FramingStatus::TooFar;
        }
        if size > *target.size_range.end() {
            return FramingStatus::TooClose;
        }
    }

    if center[0] < *target.horizontal_range.start() {
        return FramingStatus::TooLeft;
    }
    if center[0] > *target.horizontal_range.end() {
        return FramingStatus::TooRight;
    }

    if center[1] < *target.vertical_range.start() {
        return FramingStatus::TooHigh;
    }
    if center[1] > *target.vertical_range.end() {
        return FramingStatus::TooLow;
    }

    let centered = (center[0] - 0.5).abs() < 0.1 && (center[1] - 0.5).abs() < 0.1;
    let sized = size.map_or(false, |s| (s - target.optimal_size).abs() < 0.1);
    if sized && centered {
        FramingStatus::Optimal
    } else {
        FramingStatus::Acceptable
    }
}

/// 関節が十分見えないときの原因推定。距離の問題を位置より優先する
fn diagnose_framing_issue(center: [f32; 2], size: Option<f32>, target: &TargetFraming) -> FramingStatus {
    if let Some(size) = size {
        if size < target.size_range.start() * 0.8 {
            return FramingStatus::TooFar;
        }
        if size > target.size_range.end() * 1.2 {
            return FramingStatus::TooClose;
        }
    }
    if center[0] < 0.2 {
        return FramingStatus::TooLeft;
    }
    if center[0] > 0.8 {
        return FramingStatus::TooRight;
    }
    if center[1] < 0.2 {
        return FramingStatus::TooHigh;
    }
    if center[1] > 0.8 {
        return FramingStatus::TooLow;
    }
    FramingStatus::Unknown
}

// --- 改善提案 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    DevicePosition,
    UserPosition,
    Lighting,
    Stability,
    BodyVisibility,
    ExerciseSetup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionPriority {
    Critical,
    Important,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSuggestion {
    pub kind: SuggestionKind,
    pub priority: SuggestionPriority,
    pub message: String,
    pub action_required: bool,
}

impl CalibrationSuggestion {
    fn new(kind: SuggestionKind, priority: SuggestionPriority, message: impl Into<String>, action_required: bool) -> Self {
        Self {
            kind,
            priority,
            message: message.into(),
            action_required,
        }
    }
}

/// 収集中の1フレームから改善提案を作る
pub fn frame_suggestions(
    framing: FramingStatus,
    stability: f32,
    pose: &PoseSnapshot,
    target: &TargetFraming,
    threshold: f32,
) -> Vec<CalibrationSuggestion> {
    let mut suggestions = Vec::new();

    if !framing.is_acceptable() {
        suggestions.push(CalibrationSuggestion::new(
            SuggestionKind::UserPosition,
            SuggestionPriority::Critical,
            framing.instruction(),
            true,
        ));
    }

    if stability < 0.7 {
        suggestions.push(CalibrationSuggestion::new(
            SuggestionKind::Stability,
            SuggestionPriority::Important,
            "Hold device steady during calibration",
            true,
        ));
    }

    if pose.average_confidence() < 0.6 {
        suggestions.push(CalibrationSuggestion::new(
            SuggestionKind::Lighting,
            SuggestionPriority::Important,
            "Improve lighting conditions for better detection",
            false,
        ));
    }

    if target.visibility_ratio(pose, threshold) < 0.8 {
        suggestions.push(CalibrationSuggestion::new(
            SuggestionKind::BodyVisibility,
            SuggestionPriority::Important,
            "Ensure full body is visible in camera frame",
            true,
        ));
    }

    suggestions
}

/// 端末位置に対する改善提案
pub fn position_suggestions(position: DevicePosition) -> Vec<CalibrationSuggestion> {
    match position {
        DevicePosition::Handheld => vec![CalibrationSuggestion::new(
            SuggestionKind::DevicePosition,
            SuggestionPriority::Critical,
            "Place device on stable surface for better calibration",
            true,
        )],
        DevicePosition::Ground { angle } if angle.abs() > 45.0 => vec![CalibrationSuggestion::new(
            SuggestionKind::DevicePosition,
            SuggestionPriority::Important,
            format!("Adjust device angle for better viewing (currently {}°)", angle as i32),
            false,
        )],
        DevicePosition::Elevated { angle, .. } if angle.abs() > 60.0 => vec![CalibrationSuggestion::new(
            SuggestionKind::DevicePosition,
            SuggestionPriority::Important,
            "Reduce device angle for more accurate pose detection",
            false,
        )],
        _ => Vec::new(),
    }
}

/// 行動が必要な提案がなければ開始できる
pub fn ready_to_calibrate(suggestions: &[CalibrationSuggestion]) -> bool {
    !suggestions.iter().any(|s| s.action_required)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::JointSample;

    fn torso_pose(offset_x: f32, scale: f32, confidence: f32) -> PoseSnapshot {
        let mut samples = Vec::new();
        let points = [
            (Joint::LeftShoulder, -0.1, -0.1),
            (Joint::RightShoulder, 0.1, -0.1),
            (Joint::LeftElbow, -0.15, 0.0),
            (Joint::RightElbow, 0.15, 0.0),
            (Joint::LeftWrist, -0.15, 0.1),
            (Joint::RightWrist, 0.15, 0.1),
            (Joint::LeftHip, -0.08, 0.1),
            (Joint::RightHip, 0.08, 0.1),
            (Joint::LeftAnkle, -0.08, 0.4),
            (Joint::RightAnkle, 0.08, 0.4),
        ];
        for (joint, dx, dy) in points {
            samples.push(JointSample::new(joint, 0.5 + offset_x + dx * scale, 0.5 + dy * scale, confidence));
        }
        PoseSnapshot::from_samples(samples)
    }

    #[test]
    fn test_centered_pose_is_acceptable() {
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        let status = evaluate_framing(&torso_pose(0.0, 1.0, 0.9), &target, 0.7);
        assert!(status.is_acceptable());
    }

    #[test]
    fn test_off_center_pose() {
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        assert_eq!(evaluate_framing(&torso_pose(-0.35, 1.0, 0.9), &target, 0.7), FramingStatus::TooLeft);
        assert_eq!(evaluate_framing(&torso_pose(0.35, 1.0, 0.9), &target, 0.7), FramingStatus::TooRight);
    }

    #[test]
    fn test_size_out_of_range() {
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        assert_eq!(evaluate_framing(&torso_pose(0.0, 0.1, 0.9), &target, 0.7), FramingStatus::TooFar);
        assert_eq!(evaluate_framing(&torso_pose(0.0, 4.0, 0.9), &target, 0.7), FramingStatus::TooClose);
    }

    #[test]
    fn test_low_visibility_diagnosis() {
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        // 関節は見えていないが位置は中央
        let status = evaluate_framing(&torso_pose(0.0, 1.0, 0.3), &target, 0.7);
        assert_eq!(status, FramingStatus::Unknown);
        assert!(!status.is_acceptable());
    }

    #[test]
    fn test_restricted_target_accepts_upper_body() {
        let upper = PoseSnapshot::from_samples([
            JointSample::new(Joint::LeftShoulder, 0.42, 0.45, 0.9),
            JointSample::new(Joint::RightShoulder, 0.58, 0.45, 0.9),
            JointSample::new(Joint::LeftElbow, 0.38, 0.35, 0.9),
            JointSample::new(Joint::RightElbow, 0.62, 0.35, 0.9),
            JointSample::new(Joint::LeftWrist, 0.38, 0.22, 0.9),
            JointSample::new(Joint::RightWrist, 0.62, 0.22, 0.9),
        ]);
        let full = TargetFraming::for_exercise(ExerciseType::Pullup);
        assert!(!evaluate_framing(&upper, &full, 0.55).is_acceptable());

        let arms: Vec<Joint> = upper.samples().map(|s| s.joint).collect();
        let restricted = TargetFraming::for_exercise(ExerciseType::Pullup).restricted_to(&arms, 0.75);
        assert_eq!(restricted.visibility_ratio(&upper, 0.55), 1.0);
        assert!(evaluate_framing(&upper, &restricted, 0.55).is_acceptable());
    }

    #[test]
    fn test_body_center_default() {
        assert_eq!(body_center(&PoseSnapshot::new(), 0.7), [0.5, 0.5]);
        assert!(measured_body_size(&PoseSnapshot::new()).is_none());
    }

    #[test]
    fn test_frame_suggestions() {
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        let pose = torso_pose(0.0, 1.0, 0.9);
        let good = frame_suggestions(FramingStatus::Optimal, 0.9, &pose, &target, 0.7);
        assert!(good.is_empty());
        assert!(ready_to_calibrate(&good));

        let dim = torso_pose(0.0, 1.0, 0.5);
        let bad = frame_suggestions(FramingStatus::TooFar, 0.5, &dim, &target, 0.7);
        assert!(bad.iter().any(|s| s.kind == SuggestionKind::UserPosition));
        assert!(bad.iter().any(|s| s.kind == SuggestionKind::Stability));
        assert!(bad.iter().any(|s| s.kind == SuggestionKind::Lighting));
        assert!(bad.iter().any(|s| s.kind == SuggestionKind::BodyVisibility));
        assert!(!ready_to_calibrate(&bad));
    }

    #[test]
    fn test_position_suggestions() {
        let handheld = position_suggestions(DevicePosition::Handheld);
        assert_eq!(handheld[0].priority, SuggestionPriority::Critical);
        assert!(position_suggestions(DevicePosition::Ground { angle: 10.0 }).is_empty());
        assert_eq!(position_suggestions(DevicePosition::Ground { angle: 50.0 }).len(), 1);
        assert!(position_suggestions(DevicePosition::Tripod { height: 1.0, angle: 80.0 }).is_empty());
    }
}
