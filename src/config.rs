use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// 集計に必要なフレーム数
    #[serde(default = "default_required_frames")]
    pub required_frames: usize,
    /// サンプラーの周期（ミリ秒）
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// フレーム受付の最小間隔（ミリ秒, ~30fps）
    #[serde(default = "default_frame_throttle_ms")]
    pub frame_throttle_ms: u64,
    /// 関節を「見えている」とみなす信頼度
    #[serde(default = "default_min_joint_confidence")]
    pub min_joint_confidence: f32,
    /// 保持するモーションサンプル数
    #[serde(default = "default_motion_history")]
    pub motion_history: usize,
}

fn default_required_frames() -> usize { 60 }
fn default_sample_interval_ms() -> u64 { 100 }
fn default_frame_throttle_ms() -> u64 { 33 }
fn default_min_joint_confidence() -> f32 { 0.7 }
fn default_motion_history() -> usize { 30 }

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            required_frames: default_required_frames(),
            sample_interval_ms: default_sample_interval_ms(),
            frame_throttle_ms: default_frame_throttle_ms(),
            min_joint_confidence: default_min_joint_confidence(),
            motion_history: default_motion_history(),
        }
    }
}

impl CollectorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn frame_throttle(&self) -> Duration {
        Duration::from_millis(self.frame_throttle_ms)
    }
}

/// キャリブレーションスコアの段階しきい値
#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_excellent")]
    pub excellent: f32,
    #[serde(default = "default_good")]
    pub good: f32,
    #[serde(default = "default_acceptable")]
    pub acceptable: f32,
    #[serde(default = "default_poor")]
    pub poor: f32,
    /// これを超えるスコアのプロファイルを usable とみなす
    #[serde(default = "default_usable_min_score")]
    pub usable_min_score: f32,
    /// best 検索で優先するスコア
    #[serde(default = "default_best_preferred_score")]
    pub best_preferred_score: f32,
}

fn default_excellent() -> f32 { 90.0 }
fn default_good() -> f32 { 80.0 }
fn default_acceptable() -> f32 { 70.0 }
fn default_poor() -> f32 { 60.0 }
fn default_usable_min_score() -> f32 { 50.0 }
fn default_best_preferred_score() -> f32 { 80.0 }

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            excellent: default_excellent(),
            good: default_good(),
            acceptable: default_acceptable(),
            poor: default_poor(),
            usable_min_score: default_usable_min_score(),
            best_preferred_score: default_best_preferred_score(),
        }
    }
}

/// 戦略ごとのスコア上限
#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default = "default_full_body_ceiling")]
    pub full_body: f32,
    #[serde(default = "default_partial_body_ceiling")]
    pub partial_body: f32,
    #[serde(default = "default_key_point_ceiling")]
    pub key_point: f32,
    #[serde(default = "default_manual_ceiling")]
    pub manual: f32,
}

fn default_full_body_ceiling() -> f32 { 90.0 }
fn default_partial_body_ceiling() -> f32 { 75.0 }
fn default_key_point_ceiling() -> f32 { 65.0 }
fn default_manual_ceiling() -> f32 { 60.0 }

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            full_body: default_full_body_ceiling(),
            partial_body: default_partial_body_ceiling(),
            key_point: default_key_point_ceiling(),
            manual: default_manual_ceiling(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    /// フィードバック計算の最小間隔（ミリ秒, ≤10Hz）
    #[serde(default = "default_feedback_interval_ms")]
    pub feedback_interval_ms: u64,
    /// 音声フィードバックの最小間隔（ミリ秒）
    #[serde(default = "default_audio_interval_ms")]
    pub audio_interval_ms: u64,
    #[serde(default = "default_good_form")]
    pub good_form: f32,
    #[serde(default = "default_poor_form")]
    pub poor_form: f32,
    /// 「良いフォーム」ハプティクスに必要な連続フレーム数
    #[serde(default = "default_stable_frames")]
    pub stable_frames: u32,
    /// 持続的な不良フォームとみなす連続フレーム数
    #[serde(default = "default_sustained_poor_frames")]
    pub sustained_poor_frames: u32,
    #[serde(default = "default_history")]
    pub history: usize,
    /// スコア急変とみなす差分
    #[serde(default = "default_jump_threshold")]
    pub jump_threshold: f32,
}

fn default_feedback_interval_ms() -> u64 { 100 }
fn default_audio_interval_ms() -> u64 { 3000 }
fn default_good_form() -> f32 { 0.8 }
fn default_poor_form() -> f32 { 0.5 }
fn default_stable_frames() -> u32 { 5 }
fn default_sustained_poor_frames() -> u32 { 10 }
fn default_history() -> usize { 30 }
fn default_jump_threshold() -> f32 { 0.3 }

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            feedback_interval_ms: default_feedback_interval_ms(),
            audio_interval_ms: default_audio_interval_ms(),
            good_form: default_good_form(),
            poor_form: default_poor_form(),
            stable_frames: default_stable_frames(),
            sustained_poor_frames: default_sustained_poor_frames(),
            history: default_history(),
            jump_threshold: default_jump_threshold(),
        }
    }
}

impl FeedbackConfig {
    pub fn feedback_interval(&self) -> Duration {
        Duration::from_millis(self.feedback_interval_ms)
    }

    pub fn audio_interval(&self) -> Duration {
        Duration::from_millis(self.audio_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// プロファイル保存先ディレクトリ
    #[serde(default = "default_store_directory")]
    pub directory: String,
}

fn default_store_directory() -> String { "calibrations".to_string() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_directory(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{:#}; using default config", e);
                Self::default()
            }
        }
    }
}
