//! 種目ごとのレップ判定ステートマシン
//!
//! しきい値はキャリブレーションの目標角度から導く。毎フレーム呼ぶ前提で、
//! 間引きは呼び出し側では行わない。

use serde::{Deserialize, Serialize};

use super::Severity;
use crate::calibration::{AngleAdjustments, CalibrationData, ExerciseType};
use crate::geometry::{angle_at_vertex, angle_from_horizontal, angle_from_vertical};
use crate::pose::{Joint, PoseSnapshot};

/// キャリブレーションがないときの関節信頼度しきい値
const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepPhase {
    Up,
    Descending,
    Ascending,
    Down,
    Pulling,
    Rising,
    Lowering,
}

impl RepPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RepPhase::Up => "up",
            RepPhase::Descending => "descending",
            RepPhase::Ascending => "ascending",
            RepPhase::Down => "down",
            RepPhase::Pulling => "pulling",
            RepPhase::Rising => "rising",
            RepPhase::Lowering => "lowering",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormIssue {
    pub message: String,
    pub severity: Severity,
}

impl FormIssue {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    fn critical(message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, message)
    }
}

/// 1フレーム分の判定結果
#[derive(Debug, Clone, PartialEq)]
pub struct RepUpdate {
    /// このフレームでレップが成立した
    pub completed: bool,
    pub reps: u32,
    pub phase: RepPhase,
    pub issues: Vec<FormIssue>,
}

// --- 腕立て伏せ ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushupThresholds {
    pub extension: f32,
    pub parallel: f32,
    pub alignment_tolerance: f32,
    /// 開始姿勢で許す体幹のずれ
    pub start_alignment_tolerance: f32,
    pub min_descent: f32,
    pub position_tolerance: f32,
}

impl PushupThresholds {
    pub fn from_adjustments(adj: &AngleAdjustments) -> Self {
        let alignment_tolerance = adj.pushup_body_alignment + 10.0;
        Self {
            extension: adj.pushup_elbow_up - 20.0,
            parallel: adj.pushup_elbow_down + 10.0,
            alignment_tolerance,
            start_alignment_tolerance: alignment_tolerance.max(35.0),
            min_descent: 0.015,
            position_tolerance: 0.02,
        }
    }
}

/// 体幹の一直線からのずれ（度）。足首がなければ膝を使う
pub fn pushup_alignment(pose: &PoseSnapshot, threshold: f32) -> Option<f32> {
    let shoulders = pose.midpoint(Joint::LeftShoulder, Joint::RightShoulder, threshold)?;
    let hips = pose.midpoint(Joint::LeftHip, Joint::RightHip, threshold)?;
    let feet = pose
        .midpoint(Joint::LeftAnkle, Joint::RightAnkle, threshold)
        .or_else(|| pose.midpoint(Joint::LeftKnee, Joint::RightKnee, threshold))?;
    Some(180.0 - angle_at_vertex(shoulders, hips, feet))
}

fn average_limb_angle(pose: &PoseSnapshot, threshold: f32, upper: [Joint; 2], mid: [Joint; 2], lower: [Joint; 2]) -> Option<f32> {
    let side = |i: usize| -> Option<f32> {
        Some(angle_at_vertex(
            pose.visible(upper[i], threshold)?.position(),
            pose.visible(mid[i], threshold)?.position(),
            pose.visible(lower[i], threshold)?.position(),
        ))
    };
    Some((side(0)? + side(1)?) / 2.0)
}

/// 左右の肘角度の平均
pub fn elbow_angle(pose: &PoseSnapshot, threshold: f32) -> Option<f32> {
    average_limb_angle(
        pose,
        threshold,
        [Joint::LeftShoulder, Joint::RightShoulder],
        [Joint::LeftElbow, Joint::RightElbow],
        [Joint::LeftWrist, Joint::RightWrist],
    )
}

/// 左右の膝角度の平均
pub fn knee_angle(pose: &PoseSnapshot, threshold: f32) -> Option<f32> {
    average_limb_angle(
        pose,
        threshold,
        [Joint::LeftHip, Joint::RightHip],
        [Joint::LeftKnee, Joint::RightKnee],
        [Joint::LeftAnkle, Joint::RightAnkle],
    )
}

/// 腰→肩ベクトルの水平からの角度
pub fn torso_from_horizontal(pose: &PoseSnapshot, threshold: f32) -> Option<f32> {
    let shoulders = pose.midpoint(Joint::LeftShoulder, Joint::RightShoulder, threshold)?;
    let hips = pose.midpoint(Joint::LeftHip, Joint::RightHip, threshold)?;
    Some(angle_from_horizontal(hips, shoulders))
}

/// 腰→肩ベクトルの鉛直からの角度
pub fn torso_from_vertical(pose: &PoseSnapshot, threshold: f32) -> Option<f32> {
    let shoulders = pose.midpoint(Joint::LeftShoulder, Joint::RightShoulder, threshold)?;
    let hips = pose.midpoint(Joint::LeftHip, Joint::RightHip, threshold)?;
    Some(angle_from_vertical(hips, shoulders))
}

#[derive(Debug, Clone)]
struct PushupCounter {
    thresholds: PushupThresholds,
    phase: RepPhase,
    start_shoulder: Option<[f32; 2]>,
    bottom_reached: bool,
}

impl PushupCounter {
    fn new(thresholds: PushupThresholds) -> Self {
        Self {
            thresholds,
            phase: RepPhase::Up,
            start_shoulder: None,
            bottom_reached: false,
        }
    }

    fn abort(&mut self, issues: &mut Vec<FormIssue>, reason: &str) {
        log::debug!("pushup rep rejected in {} phase: {}", self.phase.as_str(), reason);
        issues.push(FormIssue::critical(reason));
        self.phase = RepPhase::Up;
        self.start_shoulder = None;
        self.bottom_reached = false;
    }

    fn update(&mut self, pose: &PoseSnapshot, threshold: f32, issues: &mut Vec<FormIssue>) -> bool {
        let (Some(arm), Some(shoulder)) = (
            elbow_angle(pose, threshold),
            pose.midpoint(Joint::LeftShoulder, Joint::RightShoulder, threshold),
        ) else {
            issues.push(FormIssue::info("Cannot detect all required body parts"));
            return false;
        };
        let Some(alignment) = pushup_alignment(pose, threshold) else {
            issues.push(FormIssue::info("Cannot calculate body alignment"));
            return false;
        };
        let t = self.thresholds;

        let straight = alignment <= t.alignment_tolerance;
        if !straight {
            issues.push(FormIssue::warning("Keep body straight"));
        }

        match self.phase {
            RepPhase::Up => {
                let extended = arm > t.extension;
                let ready = alignment <= t.start_alignment_tolerance;
                if extended && ready {
                    self.phase = RepPhase::Descending;
                    self.start_shoulder = Some(shoulder);
                } else {
                    if !extended {
                        issues.push(FormIssue::warning("Extend arms fully"));
                    }
                    if !ready {
                        issues.push(FormIssue::warning("Straighten your body to begin"));
                    }
                }
            }
            RepPhase::Descending => {
                let start = self.start_shoulder.unwrap_or(shoulder);
                let parallel = arm <= t.parallel;
                let descent = (shoulder[1] - start[1]).abs().max((shoulder[0] - start[0]).abs());
                let deep_enough = descent > t.min_descent;
                if parallel && straight && deep_enough {
                    self.phase = RepPhase::Ascending;
                    self.bottom_reached = true;
                } else {
                    if !parallel {
                        issues.push(FormIssue::warning("Lower until upper arms are parallel to ground"));
                    }
                    if !deep_enough {
                        issues.push(FormIssue::warning("Go lower"));
                    }
                    if !straight {
                        self.abort(issues, "Rep not counted: body alignment lost during descent");
                    }
                }
            }
            RepPhase::Ascending => {
                let start = self.start_shoulder.unwrap_or(shoulder);
                let extended = arm > t.extension;
                let returned = (shoulder[1] - start[1]).abs() < t.position_tolerance;
                if extended && straight && returned && self.bottom_reached {
                    self.phase = RepPhase::Up;
                    self.start_shoulder = None;
                    self.bottom_reached = false;
                    return true;
                }
                if !extended {
                    issues.push(FormIssue::warning("Extend arms fully"));
                }
                if !straight {
                    self.abort(issues, "Rep not counted: body alignment lost during ascent");
                }
            }
            _ => self.phase = RepPhase::Up,
        }
        false
    }
}

// --- 懸垂 ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullupThresholds {
    pub extension: f32,
    pub flexion: f32,
    pub vertical_tolerance: f32,
    pub chin_clearance: f32,
    pub chin_below_bar: f32,
    /// バーの高さ（正規化 y）
    pub bar_height: f32,
    pub max_swing: f32,
}

impl PullupThresholds {
    pub fn from_adjustments(adj: &AngleAdjustments) -> Self {
        Self {
            extension: adj.pullup_arm_extended - 10.0,
            flexion: adj.pullup_arm_flexed + 30.0,
            vertical_tolerance: adj.pullup_body_vertical + 10.0,
            chin_clearance: 0.02,
            chin_below_bar: 0.05,
            bar_height: 0.2,
            max_swing: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
struct PullupCounter {
    thresholds: PullupThresholds,
    phase: RepPhase,
    start_x: Option<f32>,
    top_reached: bool,
}

impl PullupCounter {
    fn new(thresholds: PullupThresholds) -> Self {
        Self {
            thresholds,
            phase: RepPhase::Down,
            start_x: None,
            top_reached: false,
        }
    }

    fn update(&mut self, pose: &PoseSnapshot, threshold: f32, issues: &mut Vec<FormIssue>) -> bool {
        let (Some(arm), Some(nose), Some(shoulder)) = (
            elbow_angle(pose, threshold),
            pose.visible(Joint::Nose, threshold),
            pose.midpoint(Joint::LeftShoulder, Joint::RightShoulder, threshold),
        ) else {
            issues.push(FormIssue::info("Cannot detect all required body parts"));
            return false;
        };
        let Some(vertical) = torso_from_vertical(pose, threshold) else {
            issues.push(FormIssue::info("Cannot calculate body alignment"));
            return false;
        };
        let t = self.thresholds;
        let chin = nose.y;

        let stable = vertical <= t.vertical_tolerance;
        if !stable {
            issues.push(FormIssue::warning("Minimize body swing"));
        }
        let extended = arm > t.extension;
        let below_bar = chin > t.bar_height + t.chin_below_bar;

        match self.phase {
            RepPhase::Down => {
                if extended && below_bar && stable {
                    self.phase = RepPhase::Pulling;
                    self.start_x = Some(shoulder[0]);
                } else {
                    if !extended {
                        issues.push(FormIssue::warning("Extend arms fully for dead hang"));
                    }
                    if !below_bar {
                        issues.push(FormIssue::warning("Lower to complete dead hang"));
                    }
                }
            }
            RepPhase::Pulling => {
                let over_bar = chin < t.bar_height - t.chin_clearance;
                let flexed = arm < t.flexion;
                let swing = (shoulder[0] - self.start_x.unwrap_or(shoulder[0])).abs() > t.max_swing;
                if over_bar && flexed && stable && !swing {
                    self.phase = RepPhase::Lowering;
                    self.top_reached = true;
                } else {
                    if !over_bar {
                        issues.push(FormIssue::warning("Pull chin over bar"));
                    }
                    if !flexed {
                        issues.push(FormIssue::warning("Pull higher"));
                    }
                    if swing {
                        issues.push(FormIssue::warning("Minimize swinging"));
                    }
                    if swing || !stable {
                        log::debug!("pullup rep rejected while pulling: swing={}, stable={}", swing, stable);
                        issues.push(FormIssue::critical("Rep not counted: too much swing"));
                        self.phase = RepPhase::Down;
                        self.start_x = None;
                    }
                }
            }
            RepPhase::Lowering => {
                if extended && below_bar && self.top_reached {
                    self.phase = RepPhase::Down;
                    self.start_x = None;
                    self.top_reached = false;
                    return true;
                }
                if !extended {
                    issues.push(FormIssue::warning("Lower to complete dead hang"));
                }
                if !below_bar {
                    issues.push(FormIssue::warning("Lower chin below bar"));
                }
            }
            _ => self.phase = RepPhase::Down,
        }
        false
    }
}

// --- 腹筋 ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SitupThresholds {
    pub knee_min: f32,
    pub knee_max: f32,
    pub horizontal_max: f32,
    pub vertical_min: f32,
}

impl SitupThresholds {
    pub fn from_adjustments(adj: &AngleAdjustments) -> Self {
        Self {
            knee_min: adj.situp_knee_angle - 10.0,
            knee_max: adj.situp_knee_angle + 10.0,
            horizontal_max: adj.situp_torso_down - 30.0,
            vertical_min: adj.situp_torso_up - 15.0,
        }
    }
}

#[derive(Debug, Clone)]
struct SitupCounter {
    thresholds: SitupThresholds,
    phase: RepPhase,
    vertical_reached: bool,
}

impl SitupCounter {
    fn new(thresholds: SitupThresholds) -> Self {
        Self {
            thresholds,
            phase: RepPhase::Down,
            vertical_reached: false,
        }
    }

    fn reset_rep(&mut self, issues: &mut Vec<FormIssue>) {
        issues.push(FormIssue::critical("Rep not counted: knee angle not maintained"));
        self.phase = RepPhase::Down;
        self.vertical_reached = false;
    }

    fn update(&mut self, pose: &PoseSnapshot, threshold: f32, issues: &mut Vec<FormIssue>) -> bool {
        let (Some(knee), Some(torso)) = (knee_angle(pose, threshold), torso_from_horizontal(pose, threshold)) else {
            issues.push(FormIssue::info("Cannot detect all required body parts"));
            return false;
        };
        let t = self.thresholds;

        let knees_ok = (t.knee_min..=t.knee_max).contains(&knee);
        if !knees_ok {
            issues.push(FormIssue::warning("Keep knees at 90-degree angle"));
        }
        let shoulders_down = torso < t.horizontal_max;

        match self.phase {
            RepPhase::Down => {
                if shoulders_down && knees_ok {
                    self.phase = RepPhase::Rising;
                } else if !shoulders_down {
                    issues.push(FormIssue::warning("Lower shoulders to ground"));
                }
            }
            RepPhase::Rising => {
                let vertical = torso > t.vertical_min;
                if vertical && knees_ok {
                    self.phase = RepPhase::Lowering;
                    self.vertical_reached = true;
                } else {
                    if !vertical {
                        issues.push(FormIssue::warning("Sit up higher"));
                    }
                    if !knees_ok {
                        self.reset_rep(issues);
                    }
                }
            }
            RepPhase::Lowering => {
                if shoulders_down && knees_ok && self.vertical_reached {
                    self.phase = RepPhase::Down;
                    self.vertical_reached = false;
                    return true;
                }
                if !shoulders_down {
                    issues.push(FormIssue::warning("Lower shoulders to ground"));
                }
                if !knees_ok {
                    self.reset_rep(issues);
                }
            }
            _ => self.phase = RepPhase::Down,
        }
        false
    }
}

// --- 公開インターフェース ---

#[derive(Debug, Clone)]
enum Counter {
    Pushup(PushupCounter),
    Pullup(PullupCounter),
    Situp(SitupCounter),
}

/// 種目別のレップカウンタ
#[derive(Debug, Clone)]
pub struct RepCounter {
    exercise: ExerciseType,
    min_confidence: f32,
    reps: u32,
    counter: Counter,
}

impl RepCounter {
    /// 姿勢で採点しない種目は None
    pub fn new(exercise: ExerciseType, calibration: Option<&CalibrationData>) -> Option<Self> {
        let adjustments = calibration.map_or(AngleAdjustments::BASELINE, |c| c.angle_adjustments);
        let counter = match exercise {
            ExerciseType::Pushup => Counter::Pushup(PushupCounter::new(PushupThresholds::from_adjustments(&adjustments))),
            ExerciseType::Pullup => Counter::Pullup(PullupCounter::new(PullupThresholds::from_adjustments(&adjustments))),
            ExerciseType::Situp => Counter::Situp(SitupCounter::new(SitupThresholds::from_adjustments(&adjustments))),
            ExerciseType::Plank | ExerciseType::Run => return None,
        };
        Some(Self {
            exercise,
            min_confidence: calibration.map_or(DEFAULT_MIN_CONFIDENCE, |c| c.visibility_thresholds.minimum_confidence),
            reps: 0,
            counter,
        })
    }

    pub fn exercise(&self) -> ExerciseType {
        self.exercise
    }

    pub fn reps(&self) -> u32 {
        self.reps
    }

    pub fn phase(&self) -> RepPhase {
        match &self.counter {
            Counter::Pushup(c) => c.phase,
            Counter::Pullup(c) => c.phase,
            Counter::Situp(c) => c.phase,
        }
    }

    /// 懸垂のバー位置を設定する
    pub fn set_bar_height(&mut self, bar_height: f32) {
        if let Counter::Pullup(c) = &mut self.counter {
            c.thresholds.bar_height = bar_height;
        }
    }

    pub fn update(&mut self, pose: &PoseSnapshot) -> RepUpdate {
        let mut issues = Vec::new();
        let threshold = self.min_confidence;
        let completed = match &mut self.counter {
            Counter::Pushup(c) => c.update(pose, threshold, &mut issues),
            Counter::Pullup(c) => c.update(pose, threshold, &mut issues),
            Counter::Situp(c) => c.update(pose, threshold, &mut issues),
        };
        if completed {
            self.reps += 1;
            log::debug!("{} rep {} completed", self.exercise, self.reps);
        }
        RepUpdate {
            completed,
            reps: self.reps,
            phase: self.phase(),
            issues,
        }
    }

    pub fn reset(&mut self) {
        self.reps = 0;
        self.counter = match &self.counter {
            Counter::Pushup(c) => Counter::Pushup(PushupCounter::new(c.thresholds)),
            Counter::Pullup(c) => Counter::Pullup(PullupCounter::new(c.thresholds)),
            Counter::Situp(c) => Counter::Situp(SitupCounter::new(c.thresholds)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::JointSample;

    fn approx_eq_f32(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    /// 横向きの腕立て姿勢。肘角度 theta、体は肘が曲がるほど下がる
    fn pushup_pose(theta: f32) -> PoseSnapshot {
        let drop = (170.0 - theta).max(0.0) / 80.0 * 0.05;
        let rad = theta.to_radians();
        let mut samples = Vec::new();
        for (side, x) in [(0usize, 0.35f32), (1, 0.40)] {
            let shoulder = [x, 0.45 + drop];
            let elbow = [x, shoulder[1] + 0.12];
            let wrist = [elbow[0] + 0.12 * rad.sin(), elbow[1] - 0.12 * rad.cos()];
            let (s, e, w) = if side == 0 {
                (Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist)
            } else {
                (Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist)
            };
            samples.push(JointSample::new(s, shoulder[0], shoulder[1], 0.9));
            samples.push(JointSample::new(e, elbow[0], elbow[1], 0.9));
            samples.push(JointSample::new(w, wrist[0], wrist[1], 0.9));
        }
        samples.push(JointSample::new(Joint::LeftHip, 0.60, 0.50 + drop, 0.9));
        samples.push(JointSample::new(Joint::RightHip, 0.64, 0.50 + drop, 0.9));
        samples.push(JointSample::new(Joint::LeftAnkle, 0.86, 0.553 + drop, 0.9));
        samples.push(JointSample::new(Joint::RightAnkle, 0.90, 0.553 + drop, 0.9));
        PoseSnapshot::from_samples(samples)
    }

    #[test]
    fn test_pushup_fixture_angles() {
        let pose = pushup_pose(170.0);
        assert!(approx_eq_f32(elbow_angle(&pose, 0.3).unwrap(), 170.0, 0.1));
        assert!(pushup_alignment(&pose, 0.3).unwrap() < 5.0);
        assert!(approx_eq_f32(elbow_angle(&pushup_pose(90.0), 0.3).unwrap(), 90.0, 0.1));
    }

    #[test]
    fn test_pushup_counts_full_rep() {
        let mut counter = RepCounter::new(ExerciseType::Pushup, None).unwrap();
        assert_eq!(counter.phase(), RepPhase::Up);

        let mut completed = 0;
        for _ in 0..3 {
            for theta in [170.0, 130.0, 90.0, 90.0, 130.0, 170.0] {
                if counter.update(&pushup_pose(theta)).completed {
                    completed += 1;
                }
            }
        }
        assert_eq!(completed, 3);
        assert_eq!(counter.reps(), 3);
        assert_eq!(counter.phase(), RepPhase::Up);
    }

    #[test]
    fn test_pushup_shallow_rep_not_counted() {
        let mut counter = RepCounter::new(ExerciseType::Pushup, None).unwrap();
        for theta in [170.0, 140.0, 130.0, 140.0, 170.0] {
            counter.update(&pushup_pose(theta));
        }
        assert_eq!(counter.reps(), 0);
        let update = counter.update(&pushup_pose(130.0));
        assert!(update
            .issues
            .iter()
            .any(|i| i.message == "Lower until upper arms are parallel to ground"));
    }

    #[test]
    fn test_pushup_sagging_body_aborts_rep() {
        let mut counter = RepCounter::new(ExerciseType::Pushup, None).unwrap();
        counter.update(&pushup_pose(170.0));
        assert_eq!(counter.phase(), RepPhase::Descending);

        let mut sagging = pushup_pose(120.0);
        sagging.insert(JointSample::new(Joint::LeftHip, 0.60, 0.70, 0.9));
        sagging.insert(JointSample::new(Joint::RightHip, 0.64, 0.70, 0.9));
        let update = counter.update(&sagging);
        assert_eq!(update.phase, RepPhase::Up);
        assert!(update.issues.iter().any(|i| i.severity == Severity::Critical));
        assert!(update.issues.iter().any(|i| i.message == "Keep body straight"));
    }

    #[test]
    fn test_missing_joints_is_info_only() {
        let mut counter = RepCounter::new(ExerciseType::Pushup, None).unwrap();
        let update = counter.update(&PoseSnapshot::new());
        assert!(!update.completed);
        assert_eq!(update.issues.len(), 1);
        assert_eq!(update.issues[0].severity, Severity::Info);
    }

    fn pullup_pose(arm: f32, nose_y: f32) -> PoseSnapshot {
        let rad = arm.to_radians();
        let shoulder_y = nose_y + 0.08;
        let mut samples = vec![JointSample::new(Joint::Nose, 0.5, nose_y, 0.9)];
        for (s, e, w, x, dir) in [
            (Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist, 0.45f32, -1.0f32),
            (Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist, 0.55, 1.0),
        ] {
            let elbow = [x, shoulder_y - 0.1];
            let wrist = [elbow[0] + dir * 0.1 * rad.sin(), elbow[1] + 0.1 * rad.cos()];
            samples.push(JointSample::new(s, x, shoulder_y, 0.9));
            samples.push(JointSample::new(e, elbow[0], elbow[1], 0.9));
            samples.push(JointSample::new(w, wrist[0], wrist[1], 0.9));
        }
        samples.push(JointSample::new(Joint::LeftHip, 0.47, shoulder_y + 0.25, 0.9));
        samples.push(JointSample::new(Joint::RightHip, 0.53, shoulder_y + 0.25, 0.9));
        PoseSnapshot::from_samples(samples)
    }

    #[test]
    fn test_pullup_counts_rep() {
        let mut counter = RepCounter::new(ExerciseType::Pullup, None).unwrap();
        assert!(approx_eq_f32(elbow_angle(&pullup_pose(170.0, 0.4), 0.3).unwrap(), 170.0, 0.1));
        let frames = [(170.0, 0.40), (130.0, 0.25), (100.0, 0.15), (140.0, 0.30), (170.0, 0.40)];
        let mut completed = false;
        for (arm, nose) in frames {
            completed |= counter.update(&pullup_pose(arm, nose)).completed;
        }
        assert!(completed);
        assert_eq!(counter.reps(), 1);
        assert_eq!(counter.phase(), RepPhase::Down);
    }

    fn situp_pose(torso: f32) -> PoseSnapshot {
        let rad = torso.to_radians();
        let hip = [0.5f32, 0.7f32];
        let shoulder = [hip[0] - 0.25 * rad.cos(), hip[1] - 0.25 * rad.sin()];
        let knee = [0.65f32, 0.55f32];
        let ankle = [0.80f32, 0.70f32];
        let mut samples = Vec::new();
        for (s, h, k, a, dx) in [
            (Joint::LeftShoulder, Joint::LeftHip, Joint::LeftKnee, Joint::LeftAnkle, 0.0f32),
            (Joint::RightShoulder, Joint::RightHip, Joint::RightKnee, Joint::RightAnkle, 0.01),
        ] {
            samples.push(JointSample::new(s, shoulder[0] + dx, shoulder[1], 0.9));
            samples.push(JointSample::new(h, hip[0] + dx, hip[1], 0.9));
            samples.push(JointSample::new(k, knee[0] + dx, knee[1], 0.9));
            samples.push(JointSample::new(a, ankle[0] + dx, ankle[1], 0.9));
        }
        PoseSnapshot::from_samples(samples)
    }

    #[test]
    fn test_situp_counts_rep() {
        let mut counter = RepCounter::new(ExerciseType::Situp, None).unwrap();
        assert!(approx_eq_f32(knee_angle(&situp_pose(5.0), 0.3).unwrap(), 90.0, 0.1));
        for torso in [5.0, 40.0, 80.0, 40.0, 5.0] {
            counter.update(&situp_pose(torso));
        }
        assert_eq!(counter.reps(), 1);
        counter.reset();
        assert_eq!(counter.reps(), 0);
        assert_eq!(counter.phase(), RepPhase::Down);
    }

    #[test]
    fn test_unsupported_exercise() {
        assert!(RepCounter::new(ExerciseType::Plank, None).is_none());
        assert!(RepCounter::new(ExerciseType::Run, None).is_none());
    }

    #[test]
    fn test_thresholds_follow_calibration() {
        let adj = AngleAdjustments {
            pushup_elbow_up: 160.0,
            ..AngleAdjustments::BASELINE
        };
        let t = PushupThresholds::from_adjustments(&adj);
        assert_eq!(t.extension, 140.0);
        assert_eq!(t.parallel, 100.0);
        assert_eq!(t.alignment_tolerance, 25.0);
        let p = PullupThresholds::from_adjustments(&AngleAdjustments::BASELINE);
        assert_eq!((p.extension, p.flexion, p.vertical_tolerance), (160.0, 120.0, 20.0));
        let s = SitupThresholds::from_adjustments(&AngleAdjustments::BASELINE);
        assert_eq!((s.knee_min, s.knee_max, s.horizontal_max, s.vertical_min), (80.0, 100.0, 15.0, 75.0));
    }
}
