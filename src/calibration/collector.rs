//! キャリブレーション用フレームの収集
//!
//! idle → collecting → aggregating → done の状態を持つ。フレームは時間ゲートで
//! 間引き、フレーミング要件を満たしたものだけをバッチに加える。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::aggregator::Aggregator;
use super::frame::{CalibrationFrame, UNKNOWN_STABILITY};
use super::framing::{
    evaluate_framing, frame_suggestions, position_suggestions, ready_to_calibrate, CalibrationSuggestion,
    FramingStatus, TargetFraming,
};
use super::position::{detect_position, detect_position_continuous, DevicePosition};
use super::profile::{CalibrationData, ExerciseType};
use super::strategy::{CalibrationStrategy, StrategyKind};
use crate::config::CollectorConfig;
use crate::events::Publisher;
use crate::pose::{MotionHistory, MotionSample, PoseSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Collecting,
    Aggregating,
    Done,
}

/// submit_pose の結果
#[derive(Debug, Clone, PartialEq)]
pub enum PoseOutcome {
    /// 収集中でない、または姿勢なし
    Ignored,
    /// 前回受付から間隔が短い
    Throttled,
    /// フレーミング要件を満たさない
    Rejected(FramingStatus),
    Accepted { collected: usize, required: usize },
    /// 必要数に達しており受け付けない
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorProgress {
    pub exercise: ExerciseType,
    pub collected: usize,
    pub required: usize,
    pub framing: FramingStatus,
    /// 収集済みフレームからの端末設置の推定
    pub position: DevicePosition,
    pub suggestions: Vec<CalibrationSuggestion>,
    pub ready: bool,
}

impl CollectorProgress {
    pub fn fraction(&self) -> f32 {
        if self.required == 0 {
            1.0
        } else {
            (self.collected as f32 / self.required as f32).min(1.0)
        }
    }
}

/// 集計に渡す完了済みバッチ
#[derive(Debug, Clone)]
pub struct CollectionBatch {
    pub exercise: ExerciseType,
    pub frames: Vec<CalibrationFrame>,
    /// 直近のモーションサンプル
    pub motion: Option<MotionSample>,
    pub motion_history: MotionHistory,
    /// 開始ごとに変わる世代番号。停止後の集計結果を捨てるのに使う
    pub generation: u64,
}

#[derive(Debug)]
pub enum Tick {
    Idle,
    Progress(CollectorProgress),
    Complete(CollectionBatch),
}

struct Inner {
    state: CollectorState,
    exercise: Option<ExerciseType>,
    target: Option<TargetFraming>,
    threshold: f32,
    required: usize,
    frames: Vec<CalibrationFrame>,
    last_accepted: Option<Instant>,
    motion: MotionHistory,
    framing: FramingStatus,
    suggestions: Vec<CalibrationSuggestion>,
}

pub struct CalibrationCollector {
    config: CollectorConfig,
    accepting: AtomicBool,
    generation: AtomicU64,
    inner: Mutex<Inner>,
    progress: Publisher<CollectorProgress>,
}

impl CalibrationCollector {
    pub fn new(config: CollectorConfig) -> Self {
        let motion = MotionHistory::new(config.motion_history);
        let threshold = config.min_joint_confidence;
        Self {
            config,
            accepting: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                state: CollectorState::Idle,
                exercise: None,
                target: None,
                threshold,
                required: 0,
                frames: Vec::new(),
                last_accepted: None,
                motion,
                framing: FramingStatus::Unknown,
                suggestions: Vec::new(),
            }),
            progress: Publisher::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CollectorState {
        self.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> &Publisher<CollectorProgress> {
        &self.progress
    }

    pub fn start_calibration(&self, exercise: ExerciseType) {
        self.start_with_frame_count(exercise, self.config.required_frames);
    }

    /// 必要フレーム数を指定して開始する
    pub fn start_with_frame_count(&self, exercise: ExerciseType, required: usize) {
        let target = TargetFraming::for_exercise(exercise);
        self.start_collecting(exercise, target, self.config.min_joint_confidence, required);
    }

    /// 戦略の関節要件・信頼度・フレーム数で開始する。
    /// full body は設定の信頼度を使い、下位の戦略は戦略自身の信頼度を使う
    pub fn start_with_strategy(&self, strategy: &CalibrationStrategy) {
        let threshold = match strategy.kind {
            StrategyKind::FullBody | StrategyKind::Manual => self.config.min_joint_confidence,
            StrategyKind::PartialBody | StrategyKind::KeyPoint => strategy.minimum_confidence,
        };
        log::debug!(
            "{} strategy: {} joints at confidence > {:.2}",
            strategy.kind.name(),
            strategy.required_joints.len(),
            threshold
        );
        self.start_collecting(strategy.exercise, strategy.framing(), threshold, strategy.required_frames);
    }

    fn start_collecting(&self, exercise: ExerciseType, target: TargetFraming, threshold: f32, required: usize) {
        let mut inner = self.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        inner.state = CollectorState::Collecting;
        inner.exercise = Some(exercise);
        inner.target = Some(target);
        inner.threshold = threshold;
        inner.required = required;
        inner.frames = Vec::with_capacity(required);
        inner.last_accepted = None;
        inner.framing = FramingStatus::Unknown;
        inner.suggestions.clear();
        self.progress.clear();
        self.accepting.store(true, Ordering::Release);
        log::info!("Calibration started: {} ({} frames)", exercise, required);
    }

    /// 収集を止めて一時状態を破棄する。何度呼んでもよい
    pub fn stop_calibration(&self) {
        // ロック取得より先に受付を止める
        self.accepting.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut inner = self.lock();
        if inner.state != CollectorState::Idle {
            log::info!("Calibration stopped ({} frames discarded)", inner.frames.len());
        }
        inner.state = CollectorState::Idle;
        inner.exercise = None;
        inner.target = None;
        inner.frames.clear();
        inner.last_accepted = None;
        inner.motion.clear();
        inner.framing = FramingStatus::Unknown;
        inner.suggestions.clear();
        drop(inner);
        self.progress.clear();
    }

    pub fn submit_motion(&self, sample: MotionSample) {
        self.lock().motion.push(sample);
    }

    /// 姿勢サンプルを受け取る。None は「検出なし」
    pub fn submit_pose(&self, pose: Option<&PoseSnapshot>, now: Instant) -> PoseOutcome {
        if !self.accepting.load(Ordering::Acquire) {
            return PoseOutcome::Ignored;
        }
        let Some(pose) = pose else {
            return PoseOutcome::Ignored;
        };

        let mut inner = self.lock();
        // stop がロック待ちの間に割り込んだ場合
        if !self.accepting.load(Ordering::Acquire) || inner.state != CollectorState::Collecting {
            return PoseOutcome::Ignored;
        }
        if inner.frames.len() >= inner.required {
            return PoseOutcome::Full;
        }
        if let Some(last) = inner.last_accepted {
            if now.saturating_duration_since(last) < self.config.frame_throttle() {
                return PoseOutcome::Throttled;
            }
        }
        let Some(target) = inner.target.clone() else {
            return PoseOutcome::Ignored;
        };

        let threshold = inner.threshold;
        let framing = evaluate_framing(pose, &target, threshold);
        let motion = inner.motion.latest().copied();
        let stability = motion.map_or(UNKNOWN_STABILITY, |m| m.rotation_stability());
        inner.framing = framing;
        inner.suggestions = frame_suggestions(framing, stability, pose, &target, threshold);

        if !framing.is_acceptable() {
            log::debug!("frame rejected: {:?}", framing);
            return PoseOutcome::Rejected(framing);
        }

        inner.last_accepted = Some(now);
        inner
            .frames
            .push(CalibrationFrame::new(now, pose.clone(), motion, &target, threshold));

        let collected = inner.frames.len();
        let required = inner.required;
        if collected >= required {
            self.accepting.store(false, Ordering::Release);
        }
        PoseOutcome::Accepted { collected, required }
    }

    /// 周期処理。進捗を発行し、必要数に達していればバッチを取り出す
    pub fn tick(&self) -> Tick {
        let mut inner = self.lock();
        if inner.state != CollectorState::Collecting {
            return Tick::Idle;
        }
        let Some(exercise) = inner.exercise else {
            return Tick::Idle;
        };

        if inner.frames.len() >= inner.required {
            self.accepting.store(false, Ordering::Release);
            inner.state = CollectorState::Aggregating;
            let batch = CollectionBatch {
                exercise,
                frames: std::mem::take(&mut inner.frames),
                motion: inner.motion.latest().copied(),
                motion_history: inner.motion.clone(),
                generation: self.generation(),
            };
            log::info!("Collected {} frames for {}, aggregating", batch.frames.len(), exercise);
            return Tick::Complete(batch);
        }

        let position = if inner.frames.is_empty() {
            DevicePosition::Unknown
        } else if inner.motion.is_empty() {
            detect_position(&inner.frames, None)
        } else {
            detect_position_continuous(&inner.frames, &inner.motion)
        };
        let mut suggestions = inner.suggestions.clone();
        suggestions.extend(position_suggestions(position));
        let progress = CollectorProgress {
            exercise,
            collected: inner.frames.len(),
            required: inner.required,
            framing: inner.framing,
            position,
            ready: ready_to_calibrate(&suggestions),
            suggestions,
        };
        drop(inner);
        self.progress.publish(progress.clone());
        Tick::Progress(progress)
    }

    /// 集計完了を記録する。停止・再開始で世代が変わっていれば false
    pub fn complete_aggregation(&self, generation: u64, succeeded: bool) -> bool {
        let mut inner = self.lock();
        if generation != self.generation() || inner.state != CollectorState::Aggregating {
            return false;
        }
        inner.state = if succeeded {
            CollectorState::Done
        } else {
            CollectorState::Idle
        };
        true
    }

    /// バックグラウンドで周期処理を回す。完了したバッチは集計して on_profile に渡す。
    ///
    /// `gate` は集計の直前に呼ばれ、返した値を on_profile が終わるまで保持する。
    /// None なら同じ種目の集計が進行中とみなしてバッチを捨てる。
    pub fn spawn_sampler<G, T, F>(self: &Arc<Self>, aggregator: Aggregator, mut gate: G, mut on_profile: F) -> SamplerHandle
    where
        G: FnMut(ExerciseType) -> Option<T> + Send + 'static,
        F: FnMut(CalibrationData) + Send + 'static,
    {
        let collector = Arc::clone(self);
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_ref = Arc::clone(&cancel);
        let interval = self.config.sample_interval();

        let handle = thread::spawn(move || {
            while !cancel_ref.load(Ordering::Acquire) {
                thread::sleep(interval);
                if cancel_ref.load(Ordering::Acquire) {
                    break;
                }
                if let Tick::Complete(batch) = collector.tick() {
                    let Some(_guard) = gate(batch.exercise) else {
                        log::warn!("Aggregation for {} already in progress; batch discarded", batch.exercise);
                        collector.complete_aggregation(batch.generation, false);
                        continue;
                    };
                    let aggregator = aggregator.with_required_frames(batch.frames.len().min(aggregator.required_frames()));
                    let profile = aggregator.aggregate(batch.exercise, &batch.frames, batch.motion.as_ref());
                    let current = collector.complete_aggregation(batch.generation, profile.is_some());
                    match profile {
                        Some(profile) if current => on_profile(profile),
                        Some(_) => log::info!("Calibration was stopped during aggregation; result discarded"),
                        None => log::warn!("Aggregation produced no profile"),
                    }
                }
            }
        });

        SamplerHandle {
            cancel,
            handle: Some(handle),
        }
    }
}

/// サンプラースレッドのハンドル。stop か drop で終了を待つ
pub struct SamplerHandle {
    cancel: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SamplerHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("sampler thread panicked");
            }
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// テストやリプレイ用に、経過時間をずらした時刻を作る
pub fn offset(start: Instant, millis: u64) -> Instant {
    start + Duration::from_millis(millis)
}
