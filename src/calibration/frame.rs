use std::time::Instant;

use super::framing::TargetFraming;
use crate::pose::{Joint, MotionSample, PoseSnapshot};

/// フレーム単位の品質指標
#[derive(Debug, Clone, PartialEq)]
pub struct FrameQuality {
    /// 必要関節の平均信頼度（欠損は 0 として数える）
    pub overall_confidence: f32,
    /// 関節ごとの信頼度。欠損は 0
    pub joint_visibility: [f32; Joint::COUNT],
    /// 必要関節のうち見えている割合
    pub body_completeness: f32,
    pub stability: f32,
    /// 照明の代替指標
    pub lighting: f32,
}

impl FrameQuality {
    pub fn visibility(&self, joint: Joint) -> f32 {
        self.joint_visibility[joint as usize]
    }
}

/// モーションがない場合の安定度
pub const UNKNOWN_STABILITY: f32 = 0.5;

/// 姿勢と直近のモーションからフレーム品質を算出する
pub fn assess_frame_quality(
    pose: &PoseSnapshot,
    motion: Option<&MotionSample>,
    target: &TargetFraming,
    visible_threshold: f32,
) -> FrameQuality {
    let mut joint_visibility = [0.0f32; Joint::COUNT];
    for sample in pose.samples() {
        joint_visibility[sample.joint as usize] = sample.confidence;
    }

    let parts: Vec<Joint> = if target.body_parts.is_empty() {
        pose.samples().map(|s| s.joint).collect()
    } else {
        target.body_parts.clone()
    };

    let (overall_confidence, body_completeness) = if parts.is_empty() {
        (0.0, 0.0)
    } else {
        let n = parts.len() as f32;
        let total: f32 = parts.iter().map(|j| joint_visibility[*j as usize]).sum();
        let visible = parts
            .iter()
            .filter(|j| joint_visibility[**j as usize] > visible_threshold)
            .count();
        (total / n, visible as f32 / n)
    };

    let stability = motion.map_or(UNKNOWN_STABILITY, MotionSample::rotation_stability);

    FrameQuality {
        overall_confidence,
        joint_visibility,
        body_completeness,
        stability,
        lighting: (overall_confidence * 1.2).min(1.0),
    }
}

/// 収集バッチに含まれる1フレーム
#[derive(Debug, Clone)]
pub struct CalibrationFrame {
    pub timestamp: Instant,
    pub pose: PoseSnapshot,
    pub motion: Option<MotionSample>,
    pub quality: FrameQuality,
}

impl CalibrationFrame {
    pub fn new(timestamp: Instant, pose: PoseSnapshot, motion: Option<MotionSample>, target: &TargetFraming, visible_threshold: f32) -> Self {
        let quality = assess_frame_quality(&pose, motion.as_ref(), target, visible_threshold);
        Self {
            timestamp,
            pose,
            motion,
            quality,
        }
    }
}
