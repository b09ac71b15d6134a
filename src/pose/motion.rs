use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 端末姿勢センサの1サンプル
///
/// 姿勢推定とは独立したクロックで届く。フレームとは時刻の近さでのみ対応付ける。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// ピッチ（ラジアン）
    pub pitch: f32,
    /// ロール（ラジアン）
    pub roll: f32,
    /// 重力を除いた加速度 [x, y, z] (G)
    pub user_acceleration: [f32; 3],
    /// 角速度 [x, y, z] (rad/s)
    pub rotation_rate: [f32; 3],
    /// 重力ベクトル [x, y, z] (G)
    #[serde(default = "default_gravity")]
    pub gravity: [f32; 3],
}

fn default_gravity() -> [f32; 3] {
    [0.0, -1.0, 0.0]
}

fn magnitude(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

impl MotionSample {
    /// 静止状態（加速度・角速度ゼロ）
    pub fn still(pitch: f32, roll: f32) -> Self {
        Self {
            pitch,
            roll,
            user_acceleration: [0.0; 3],
            rotation_rate: [0.0; 3],
            gravity: default_gravity(),
        }
    }

    pub fn acceleration_magnitude(&self) -> f32 {
        magnitude(self.user_acceleration)
    }

    pub fn rotation_magnitude(&self) -> f32 {
        magnitude(self.rotation_rate)
    }

    pub fn pitch_degrees(&self) -> f32 {
        self.pitch.to_degrees()
    }

    /// 重力ベクトルから求めた直立からの傾き（度, 0〜180）
    pub fn tilt_degrees(&self) -> f32 {
        self.gravity[0].atan2(-self.gravity[1]).to_degrees().abs()
    }

    /// 角速度から求めた安定度 (0〜1)
    pub fn rotation_stability(&self) -> f32 {
        (1.0 - self.rotation_magnitude() / 2.0).max(0.0)
    }

    /// 加速度・角速度を合わせた瞬時の安定度 (0〜1)
    pub fn combined_stability(&self) -> f32 {
        1.0 - (self.acceleration_magnitude() + self.rotation_magnitude() / 2.0).min(1.0)
    }
}

/// 直近のモーションサンプルを保持するリングバッファ
#[derive(Debug, Clone)]
pub struct MotionHistory {
    samples: VecDeque<MotionSample>,
    capacity: usize,
}

impl MotionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: MotionSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&MotionSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MotionSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// 履歴全体の平均安定度。空なら 0
    pub fn mean_stability(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(MotionSample::combined_stability).sum();
        sum / self.samples.len() as f32
    }

    /// 平均ピッチ（度）
    pub fn mean_pitch_degrees(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(MotionSample::pitch_degrees).sum();
        sum / self.samples.len() as f32
    }
}
