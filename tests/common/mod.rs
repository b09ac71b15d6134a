#![allow(dead_code)]

use rep_tracker::pose::{Joint, JointSample, MotionSample, PoseSnapshot};
use rep_tracker::recording::SessionRecord;

/// 横から見た腕立て伏せの全身姿勢。肘角度 theta（度）、肘が曲がるほど体が下がる
pub fn pushup_pose(theta: f32, confidence: f32) -> PoseSnapshot {
    let drop = (170.0 - theta).max(0.0) / 80.0 * 0.05;
    let rad = theta.to_radians();
    let mut samples = vec![JointSample::new(Joint::Nose, 0.30, 0.43 + drop, confidence)];
    for (s, e, w, x) in [
        (Joint::LeftShoulder, Joint::LeftElbow, Joint::LeftWrist, 0.35f32),
        (Joint::RightShoulder, Joint::RightElbow, Joint::RightWrist, 0.40),
    ] {
        let shoulder = [x, 0.45 + drop];
        let elbow = [x, shoulder[1] + 0.12];
        samples.push(JointSample::new(s, shoulder[0], shoulder[1], confidence));
        samples.push(JointSample::new(e, elbow[0], elbow[1], confidence));
        samples.push(JointSample::new(
            w,
            elbow[0] + 0.12 * rad.sin(),
            elbow[1] - 0.12 * rad.cos(),
            confidence,
        ));
    }
    samples.push(JointSample::new(Joint::LeftHip, 0.60, 0.50 + drop, confidence));
    samples.push(JointSample::new(Joint::RightHip, 0.64, 0.50 + drop, confidence));
    samples.push(JointSample::new(Joint::LeftKnee, 0.73, 0.527 + drop, confidence));
    samples.push(JointSample::new(Joint::RightKnee, 0.77, 0.527 + drop, confidence));
    samples.push(JointSample::new(Joint::LeftAnkle, 0.86, 0.553 + drop, confidence));
    samples.push(JointSample::new(Joint::RightAnkle, 0.90, 0.553 + drop, confidence));
    PoseSnapshot::from_samples(samples)
}

/// 170° → 90° → 170° を繰り返す肘角度列
pub fn rep_cycle(frames: usize) -> Vec<f32> {
    const CYCLE: [f32; 10] = [170.0, 150.0, 130.0, 110.0, 90.0, 90.0, 110.0, 130.0, 150.0, 170.0];
    (0..frames).map(|i| CYCLE[i % CYCLE.len()]).collect()
}

/// 40ms 間隔の姿勢と、各姿勢の直後に静止したモーションを並べた記録
pub fn pushup_recording(frames: usize, confidence: f32) -> Vec<SessionRecord> {
    let mut records = Vec::new();
    for (i, theta) in rep_cycle(frames).into_iter().enumerate() {
        let t_ms = i as u64 * 40;
        records.push(SessionRecord::pose(t_ms, &pushup_pose(theta, confidence)));
        records.push(SessionRecord::Motion {
            t_ms: t_ms + 1,
            sample: MotionSample::still(0.35, 0.0),
        });
    }
    records
}
