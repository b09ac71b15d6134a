//! 端末の設置状態の推定
//!
//! モーションの安定度と姿勢から得た体のスケール・位置を組み合わせて分類する。
//! 高さ・角度の推定は線形近似であり、実測値として扱わないこと。

use std::fmt;

use super::frame::CalibrationFrame;
use crate::geometry::{coefficient_of_variation, distance, midpoint};
use crate::pose::{Joint, MotionHistory, MotionSample, PoseSnapshot};

/// 三脚とみなす安定度
pub const TRIPOD_STABILITY: f32 = 0.95;
/// 据え置きとみなす安定度
pub const STABLE_STABILITY: f32 = 0.8;
/// 手持ちとみなす安定度
pub const HANDHELD_STABILITY: f32 = 0.3;
/// 床置きとみなすピッチ上限（度）
pub const GROUND_ANGLE: f32 = 30.0;
/// 高所とみなす推定高さ（m）
pub const ELEVATED_HEIGHT_MIN: f32 = 0.5;
pub const POSE_VARIABILITY: f32 = 0.05;
/// 分析に使う直近フレーム数
pub const ANALYSIS_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DevicePosition {
    Ground { angle: f32 },
    Elevated { height: f32, angle: f32 },
    Tripod { height: f32, angle: f32 },
    Handheld,
    Unknown,
}

impl DevicePosition {
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            DevicePosition::Ground { .. } | DevicePosition::Elevated { .. } | DevicePosition::Tripod { .. }
        )
    }

    pub fn angle(&self) -> Option<f32> {
        match *self {
            DevicePosition::Ground { angle }
            | DevicePosition::Elevated { angle, .. }
            | DevicePosition::Tripod { angle, .. } => Some(angle),
            _ => None,
        }
    }

    pub fn height(&self) -> Option<f32> {
        match *self {
            DevicePosition::Elevated { height, .. } | DevicePosition::Tripod { height, .. } => Some(height),
            _ => None,
        }
    }
}

impl fmt::Display for DevicePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DevicePosition::Ground { angle } => write!(f, "Ground level ({}°)", angle as i32),
            DevicePosition::Elevated { height, angle } => {
                write!(f, "Elevated {:.1}m ({}°)", height, angle as i32)
            }
            DevicePosition::Tripod { height, angle } => {
                write!(f, "Tripod mount {:.1}m ({}°)", height, angle as i32)
            }
            DevicePosition::Handheld => write!(f, "Handheld"),
            DevicePosition::Unknown => write!(f, "Unknown position"),
        }
    }
}

// --- 姿勢メトリクス ---

/// フレーム群から得た体の平均的な見え方
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseMetrics {
    /// (肩幅 + 体幹高さ) / 2
    pub average_scale: f32,
    pub body_center: [f32; 2],
    /// [幅, 高さ]
    pub body_bounds: [f32; 2],
    pub head_y: f32,
    pub average_confidence: f32,
}

impl Default for PoseMetrics {
    fn default() -> Self {
        Self {
            average_scale: 0.5,
            body_center: [0.5, 0.5],
            body_bounds: [0.3, 0.8],
            head_y: 0.2,
            average_confidence: 0.0,
        }
    }
}

impl PoseMetrics {
    /// 肩・腰が揃ったフレームだけで平均を取る。該当なしなら既定値
    pub fn from_poses<'a, I: IntoIterator<Item = &'a PoseSnapshot>>(poses: I) -> Self {
        let mut scale = 0.0;
        let mut center = [0.0, 0.0];
        let mut width = 0.0;
        let mut height = 0.0;
        let mut head_y = 0.0;
        let mut confidence = 0.0;
        let mut valid = 0usize;

        for pose in poses {
            let (Some(ls), Some(rs), Some(lh), Some(rh)) = (
                pose.position(Joint::LeftShoulder),
                pose.position(Joint::RightShoulder),
                pose.position(Joint::LeftHip),
                pose.position(Joint::RightHip),
            ) else {
                continue;
            };

            center[0] += (ls[0] + rs[0] + lh[0] + rh[0]) / 4.0;
            center[1] += (ls[1] + rs[1] + lh[1] + rh[1]) / 4.0;

            let shoulder_width = distance(ls, rs);
            let hip_width = distance(lh, rh);
            let body_height = (ls[1] - lh[1]).abs();
            width += shoulder_width.max(hip_width);
            height += body_height;
            scale += (shoulder_width + body_height) / 2.0;

            if let Some(nose) = pose.get(Joint::Nose) {
                head_y += nose.y;
            }
            confidence += pose.average_confidence();
            valid += 1;
        }

        if valid == 0 {
            return Self::default();
        }
        let n = valid as f32;
        Self {
            average_scale: scale / n,
            body_center: [center[0] / n, center[1] / n],
            body_bounds: [width / n, height / n],
            head_y: head_y / n,
            average_confidence: confidence / n,
        }
    }
}

/// 推定端末高さ（m, 0.3〜2.5）
pub fn estimate_device_height(metrics: &PoseMetrics) -> f32 {
    let height_factor = (1.0 - metrics.head_y) * 2.0 + (1.0 - metrics.average_scale);
    (0.3 + height_factor * 2.2).clamp(0.3, 2.5)
}

/// 推定視野角（度, -60〜60）
pub fn estimate_device_angle(metrics: &PoseMetrics) -> f32 {
    let indicator = (0.5 - metrics.head_y) * 2.0 + (0.8 - metrics.body_bounds[1]) * 0.5;
    (indicator * 60.0).clamp(-60.0, 60.0)
}

// --- 姿勢の安定度 ---

/// 肩幅の変動係数
pub fn scale_variability<'a, I: IntoIterator<Item = &'a PoseSnapshot>>(poses: I) -> f32 {
    let widths: Vec<f32> = poses
        .into_iter()
        .filter_map(|p| {
            let ls = p.position(Joint::LeftShoulder)?;
            let rs = p.position(Joint::RightShoulder)?;
            Some(distance(ls, rs))
        })
        .collect();
    if widths.len() < 2 {
        return 0.0;
    }
    coefficient_of_variation(&widths)
}

/// 肩中点のフレーム間移動量の平均
pub fn position_drift<'a, I: IntoIterator<Item = &'a PoseSnapshot>>(poses: I) -> f32 {
    let centers: Vec<[f32; 2]> = poses
        .into_iter()
        .filter_map(|p| {
            let ls = p.position(Joint::LeftShoulder)?;
            let rs = p.position(Joint::RightShoulder)?;
            Some(midpoint(ls, rs))
        })
        .collect();
    if centers.len() < 2 {
        return 0.0;
    }
    let total: f32 = centers.windows(2).map(|w| distance(w[0], w[1])).sum();
    total / (centers.len() - 1) as f32
}

/// 1 − min(スケール変動 + 位置ドリフト, 1)
pub fn pose_stability(frames: &[CalibrationFrame]) -> f32 {
    if frames.len() < 2 {
        return 1.0;
    }
    let variability = scale_variability(frames.iter().map(|f| &f.pose));
    let drift = position_drift(frames.iter().map(|f| &f.pose));
    1.0 - (variability + drift).min(1.0)
}

/// 加速度・角速度それぞれの安定度の平均
pub fn motion_stability(motion: &MotionSample) -> f32 {
    let acceleration = 1.0 - motion.acceleration_magnitude().min(1.0);
    let rotation = 1.0 - (motion.rotation_magnitude() / 2.0).min(1.0);
    (acceleration + rotation) / 2.0
}

// --- 分類 ---

fn recent(frames: &[CalibrationFrame]) -> &[CalibrationFrame] {
    &frames[frames.len().saturating_sub(ANALYSIS_WINDOW)..]
}

/// 安定度とピッチ（度）による分類
pub fn classify_from_motion(pitch: f32, stability: f32, metrics: &PoseMetrics) -> DevicePosition {
    if stability > TRIPOD_STABILITY {
        return DevicePosition::Tripod {
            height: estimate_device_height(metrics),
            angle: pitch.abs(),
        };
    }

    if stability > STABLE_STABILITY {
        if pitch.abs() < GROUND_ANGLE {
            return DevicePosition::Ground { angle: pitch };
        }
        let height = estimate_device_height(metrics);
        if height > ELEVATED_HEIGHT_MIN {
            return DevicePosition::Elevated { height, angle: pitch };
        }
        return DevicePosition::Ground { angle: pitch };
    }

    if stability < HANDHELD_STABILITY {
        return DevicePosition::Handheld;
    }

    let height = estimate_device_height(metrics);
    if height > ELEVATED_HEIGHT_MIN && pitch.abs() > 20.0 {
        DevicePosition::Elevated { height, angle: pitch }
    } else {
        DevicePosition::Ground { angle: pitch }
    }
}

/// フレームバッチと1つのモーションサンプルから分類する。
/// モーションがなければ姿勢のみで推定する
pub fn detect_position(frames: &[CalibrationFrame], motion: Option<&MotionSample>) -> DevicePosition {
    if frames.is_empty() {
        return DevicePosition::Unknown;
    }
    let frames = recent(frames);
    let metrics = PoseMetrics::from_poses(frames.iter().map(|f| &f.pose));

    match motion {
        Some(m) => classify_from_motion(m.pitch_degrees(), motion_stability(m), &metrics),
        None => classify_from_pose(frames, &metrics),
    }
}

fn classify_from_pose(frames: &[CalibrationFrame], metrics: &PoseMetrics) -> DevicePosition {
    let variability = scale_variability(frames.iter().map(|f| &f.pose));
    let drift = position_drift(frames.iter().map(|f| &f.pose));

    // 体が画面内で揺れ続けるのは端末側が動いているため
    if variability > POSE_VARIABILITY * 3.0 || drift > POSE_VARIABILITY * 2.0 {
        log::debug!("pose-only: handheld (variability={:.3}, drift={:.3})", variability, drift);
        return DevicePosition::Handheld;
    }

    let stability = 1.0 - (variability + drift).min(1.0);
    classify_from_motion(estimate_device_angle(metrics), stability, metrics)
}

/// 直近フレームとモーション履歴による継続推定
pub fn detect_position_continuous(frames: &[CalibrationFrame], history: &MotionHistory) -> DevicePosition {
    if frames.is_empty() {
        return DevicePosition::Unknown;
    }
    let frames = recent(frames);
    let metrics = PoseMetrics::from_poses(frames.iter().map(|f| &f.pose));
    let combined = (history.mean_stability() + pose_stability(frames)) / 2.0;
    let pitch = history.mean_pitch_degrees();

    if combined > TRIPOD_STABILITY {
        DevicePosition::Tripod {
            height: estimate_device_height(&metrics),
            angle: pitch.abs(),
        }
    } else if combined > STABLE_STABILITY {
        if pitch.abs() < GROUND_ANGLE {
            DevicePosition::Ground { angle: pitch }
        } else {
            DevicePosition::Elevated {
                height: estimate_device_height(&metrics),
                angle: pitch,
            }
        }
    } else {
        DevicePosition::Handheld
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::framing::TargetFraming;
    use crate::calibration::profile::ExerciseType;
    use crate::pose::JointSample;
    use std::time::Instant;

    fn frame_at(cx: f32, shoulder_width: f32) -> CalibrationFrame {
        let half = shoulder_width / 2.0;
        let pose = PoseSnapshot::from_samples([
            JointSample::new(Joint::Nose, cx, 0.2, 0.9),
            JointSample::new(Joint::LeftShoulder, cx - half, 0.3, 0.9),
            JointSample::new(Joint::RightShoulder, cx + half, 0.3, 0.9),
            JointSample::new(Joint::LeftHip, cx - half * 0.8, 0.55, 0.9),
            JointSample::new(Joint::RightHip, cx + half * 0.8, 0.55, 0.9),
        ]);
        let target = TargetFraming::for_exercise(ExerciseType::Pushup);
        CalibrationFrame::new(Instant::now(), pose, None, &target, 0.7)
    }

    fn elevated_metrics() -> PoseMetrics {
        PoseMetrics {
            head_y: 0.2,
            average_scale: 0.3,
            ..PoseMetrics::default()
        }
    }

    #[test]
    fn test_tripod() {
        let p = classify_from_motion(10.0, 0.97, &elevated_metrics());
        assert!(matches!(p, DevicePosition::Tripod { angle, .. } if angle == 10.0));
        assert!(p.is_stable());
    }

    #[test]
    fn test_elevated() {
        let metrics = elevated_metrics();
        assert!(estimate_device_height(&metrics) > ELEVATED_HEIGHT_MIN);
        let p = classify_from_motion(50.0, 0.85, &metrics);
        assert!(matches!(p, DevicePosition::Elevated { angle, .. } if angle == 50.0));
    }

    #[test]
    fn test_ground_when_flat() {
        let p = classify_from_motion(10.0, 0.85, &elevated_metrics());
        assert_eq!(p, DevicePosition::Ground { angle: 10.0 });
    }

    #[test]
    fn test_handheld_regardless_of_pitch() {
        for pitch in [-80.0, 0.0, 10.0, 50.0, 89.0] {
            let p = classify_from_motion(pitch, 0.2, &elevated_metrics());
            assert_eq!(p, DevicePosition::Handheld);
            assert!(!p.is_stable());
        }
    }

    #[test]
    fn test_medium_stability_band() {
        let metrics = elevated_metrics();
        assert!(matches!(classify_from_motion(25.0, 0.5, &metrics), DevicePosition::Elevated { .. }));
        assert!(matches!(classify_from_motion(15.0, 0.5, &metrics), DevicePosition::Ground { .. }));
    }

    #[test]
    fn test_estimates_are_clamped() {
        let low = PoseMetrics {
            head_y: 1.0,
            average_scale: 1.0,
            ..PoseMetrics::default()
        };
        assert_eq!(estimate_device_height(&low), 0.3);
        assert_eq!(estimate_device_height(&elevated_metrics()), 2.5);
        let steep = PoseMetrics {
            head_y: -1.0,
            ..PoseMetrics::default()
        };
        assert_eq!(estimate_device_angle(&steep), 60.0);
    }

    #[test]
    fn test_pose_metrics_default_without_torso() {
        let pose = PoseSnapshot::from_samples([JointSample::new(Joint::Nose, 0.5, 0.5, 0.9)]);
        assert_eq!(PoseMetrics::from_poses([&pose]), PoseMetrics::default());
    }

    #[test]
    fn test_pose_only_drift_is_handheld() {
        let frames: Vec<CalibrationFrame> = (0..20)
            .map(|i| frame_at(if i % 2 == 0 { 0.35 } else { 0.5 }, 0.2))
            .collect();
        assert!(scale_variability(frames.iter().map(|f| &f.pose)) < 1e-4);
        assert!(position_drift(frames.iter().map(|f| &f.pose)) > 0.1);
        assert_eq!(detect_position(&frames, None), DevicePosition::Handheld);
    }

    #[test]
    fn test_pose_only_still_is_stable() {
        let frames: Vec<CalibrationFrame> = (0..20).map(|_| frame_at(0.5, 0.2)).collect();
        let p = detect_position(&frames, None);
        assert!(p.is_stable(), "{:?}", p);
    }

    #[test]
    fn test_motion_path() {
        let frames: Vec<CalibrationFrame> = (0..5).map(|_| frame_at(0.5, 0.2)).collect();
        let still = MotionSample::still(5f32.to_radians(), 0.0);
        assert!(matches!(detect_position(&frames, Some(&still)), DevicePosition::Tripod { .. }));
        let shaky = MotionSample {
            user_acceleration: [1.0, 0.5, 0.0],
            rotation_rate: [2.0, 1.0, 0.0],
            ..still
        };
        assert_eq!(detect_position(&frames, Some(&shaky)), DevicePosition::Handheld);
    }

    #[test]
    fn test_empty_is_unknown() {
        assert_eq!(detect_position(&[], None), DevicePosition::Unknown);
        assert_eq!(detect_position_continuous(&[], &MotionHistory::new(30)), DevicePosition::Unknown);
    }

    #[test]
    fn test_continuous_detection() {
        let frames: Vec<CalibrationFrame> = (0..10).map(|_| frame_at(0.5, 0.2)).collect();
        let mut history = MotionHistory::new(30);
        for _ in 0..10 {
            history.push(MotionSample::still(0.0, 0.0));
        }
        assert!(matches!(detect_position_continuous(&frames, &history), DevicePosition::Tripod { .. }));

        // モーション履歴なし: 安定度 0 と姿勢一貫性 1 の平均 0.5
        let empty = MotionHistory::new(30);
        assert_eq!(detect_position_continuous(&frames, &empty), DevicePosition::Handheld);
    }
}
