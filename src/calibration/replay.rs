//! 記録済みセッションからのキャリブレーション
//!
//! 最初の姿勢で戦略を選び、収集器に記録を流す。必要フレームが集まらなければ
//! 次の戦略へ落とし、最後は manual で必ずプロファイルを作る。

use std::time::Instant;

use super::aggregator::Aggregator;
use super::collector::{CalibrationCollector, CollectionBatch, PoseOutcome, Tick};
use super::defaults::default_baseline;
use super::profile::{CalibrationData, ExerciseType};
use super::strategy::{CalibrationStrategy, ManualInputs, StrategyKind, StrategySelector};
use crate::config::Config;
use crate::pose::PoseSnapshot;
use crate::recording::SessionRecord;

#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub profile: CalibrationData,
    pub strategy: StrategyKind,
    /// 集計に使ったフレーム数
    pub frames_used: usize,
    /// フレーミング不足で捨てたフレーム数（最後に試した戦略）
    pub rejected: usize,
}

fn pose_of(record: &SessionRecord) -> Option<PoseSnapshot> {
    match record {
        SessionRecord::Pose { joints, .. } => Some(PoseSnapshot::from_samples(joints.iter().copied())),
        SessionRecord::Motion { .. } => None,
    }
}

/// 記録を最後まで流し、必要数が集まったらバッチを返す
fn collect(
    collector: &CalibrationCollector,
    strategy: &CalibrationStrategy,
    records: &[SessionRecord],
    start: Instant,
) -> (Option<CollectionBatch>, usize) {
    collector.start_with_strategy(strategy);
    let mut rejected = 0;
    for record in records {
        match record {
            SessionRecord::Motion { sample, .. } => collector.submit_motion(*sample),
            SessionRecord::Pose { .. } => {
                let pose = pose_of(record);
                match collector.submit_pose(pose.as_ref(), record.instant(start)) {
                    PoseOutcome::Rejected(_) => rejected += 1,
                    PoseOutcome::Accepted { .. } | PoseOutcome::Full => {
                        if let Tick::Complete(batch) = collector.tick() {
                            return (Some(batch), rejected);
                        }
                    }
                    PoseOutcome::Ignored | PoseOutcome::Throttled => {}
                }
            }
        }
    }
    (None, rejected)
}

/// 記録からプロファイルを作る。manual の入力は manual 戦略に落ちたときだけ使う
pub fn calibrate_from_records(
    exercise: ExerciseType,
    records: &[SessionRecord],
    config: &Config,
    manual: Option<ManualInputs>,
) -> ReplayOutcome {
    let aggregator = Aggregator::from_config(config);
    let collector = CalibrationCollector::new(config.collector.clone());
    let mut selector = StrategySelector::new(exercise, &config.strategy);
    let first_pose = records.iter().find_map(pose_of);
    let mut strategy = selector.select_strategy(first_pose.as_ref()).clone();
    let start = Instant::now();

    loop {
        if strategy.kind == StrategyKind::Manual {
            collector.stop_calibration();
            if let Some(profile) = strategy.perform_calibration(&[], None, &aggregator, manual) {
                return ReplayOutcome {
                    profile,
                    strategy: strategy.kind,
                    frames_used: 0,
                    rejected: 0,
                };
            }
        }

        let (batch, rejected) = collect(&collector, &strategy, records, start);
        if let Some(batch) = batch {
            let profile = strategy.perform_calibration(&batch.frames, batch.motion.as_ref(), &aggregator, manual);
            collector.complete_aggregation(batch.generation, profile.is_some());
            if let Some(profile) = profile {
                return ReplayOutcome {
                    profile,
                    strategy: strategy.kind,
                    frames_used: batch.frames.len(),
                    rejected,
                };
            }
        } else {
            log::warn!(
                "{} strategy collected too few frames ({} rejected by framing)",
                strategy.kind.name(),
                rejected
            );
        }
        collector.stop_calibration();
        strategy = selector.fallback_to_next_strategy().clone();
    }
}

/// フレームなしで既定値から即座に作るプロファイル（quick モード）
pub fn quick_profile(exercise: ExerciseType, config: &Config) -> CalibrationData {
    Aggregator::from_config(config).synthesize(default_baseline(exercise), &[], config.strategy.manual)
}
