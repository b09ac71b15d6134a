use serde::{Deserialize, Serialize};

/// 姿勢推定が出力する 17 関節
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum Joint {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Joint {
    pub const COUNT: usize = 17;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Nose,
        Joint::LeftEye,
        Joint::RightEye,
        Joint::LeftEar,
        Joint::RightEar,
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

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 顔の関節か（鼻・目・耳）
    pub fn is_face(self) -> bool {
        (self as usize) <= Joint::RightEar as usize
    }
}

/// 単一関節のサンプル
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSample {
    pub joint: Joint,
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f32,
    /// 正規化されたY座標 (0.0〜1.0, 下向き)
    pub y: f32,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f32,
}

impl JointSample {
    pub fn new(joint: Joint, x: f32, y: f32, confidence: f32) -> Self {
        Self {
            joint,
            x,
            y,
            confidence,
        }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }

    pub fn position(&self) -> [f32; 2] {
        [self.x, self.y]
    }
}

/// 1フレーム分の姿勢。検出されなかった関節は None
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseSnapshot {
    joints: [Option<JointSample>; Joint::COUNT],
}

impl PoseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_samples<I: IntoIterator<Item = JointSample>>(samples: I) -> Self {
        let mut pose = Self::default();
        for sample in samples {
            pose.insert(sample);
        }
        pose
    }

    pub fn insert(&mut self, sample: JointSample) {
        self.joints[sample.joint as usize] = Some(sample);
    }

    pub fn get(&self, joint: Joint) -> Option<&JointSample> {
        self.joints[joint as usize].as_ref()
    }

    /// 信頼度が閾値を超える場合のみ返す
    pub fn visible(&self, joint: Joint, threshold: f32) -> Option<&JointSample> {
        self.get(joint).filter(|s| s.confidence > threshold)
    }

    pub fn position(&self, joint: Joint) -> Option<[f32; 2]> {
        self.get(joint).map(JointSample::position)
    }

    /// 検出された関節のみを列挙
    pub fn samples(&self) -> impl Iterator<Item = &JointSample> {
        self.joints.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.samples().count()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.iter().all(Option::is_none)
    }

    /// 検出された関節の平均信頼度。関節がなければ 0
    pub fn average_confidence(&self) -> f32 {
        let (sum, count) = self
            .samples()
            .fold((0.0f32, 0usize), |(s, n), j| (s + j.confidence, n + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }

    /// 2関節の中点。どちらかが閾値以下なら None
    pub fn midpoint(&self, a: Joint, b: Joint, threshold: f32) -> Option<[f32; 2]> {
        let a = self.visible(a, threshold)?;
        let b = self.visible(b, threshold)?;
        Some(crate::geometry::midpoint(a.position(), b.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_count() {
        assert_eq!(Joint::COUNT, 17);
        assert_eq!(Joint::ALL.len(), Joint::COUNT);
    }

    #[test]
    fn test_joint_from_index() {
        assert_eq!(Joint::from_index(0), Some(Joint::Nose));
        assert_eq!(Joint::from_index(16), Some(Joint::RightAnkle));
        assert_eq!(Joint::from_index(17), None);
        for (i, joint) in Joint::ALL.iter().enumerate() {
            assert_eq!(*joint as usize, i);
        }
    }

    #[test]
    fn test_joint_is_face() {
        assert!(Joint::Nose.is_face());
        assert!(Joint::RightEar.is_face());
        assert!(!Joint::LeftShoulder.is_face());
    }

    #[test]
    fn test_sample_is_valid() {
        let s = JointSample::new(Joint::Nose, 0.5, 0.5, 0.7);
        assert!(s.is_valid(0.5));
        assert!(!s.is_valid(0.8));
    }

    #[test]
    fn test_snapshot_missing_joints() {
        let pose = PoseSnapshot::from_samples([JointSample::new(Joint::Nose, 0.5, 0.3, 0.9)]);
        assert_eq!(pose.len(), 1);
        assert!(pose.get(Joint::Nose).is_some());
        assert!(pose.get(Joint::LeftAnkle).is_none());
        assert!(pose.visible(Joint::Nose, 0.95).is_none());
    }

    #[test]
    fn test_average_confidence_ignores_missing() {
        let pose = PoseSnapshot::from_samples([
            JointSample::new(Joint::Nose, 0.5, 0.3, 0.4),
            JointSample::new(Joint::LeftHip, 0.4, 0.6, 0.8),
        ]);
        assert!((pose.average_confidence() - 0.6).abs() < 0.001);
        assert_eq!(PoseSnapshot::new().average_confidence(), 0.0);
        assert!(PoseSnapshot::new().is_empty());
    }

    #[test]
    fn test_midpoint_requires_both() {
        let pose = PoseSnapshot::from_samples([
            JointSample::new(Joint::LeftHip, 0.4, 0.6, 0.9),
            JointSample::new(Joint::RightHip, 0.6, 0.6, 0.9),
        ]);
        let mid = pose.midpoint(Joint::LeftHip, Joint::RightHip, 0.5).unwrap();
        assert!((mid[0] - 0.5).abs() < 1e-6);
        assert!(pose.midpoint(Joint::LeftHip, Joint::LeftAnkle, 0.5).is_none());
    }
}
