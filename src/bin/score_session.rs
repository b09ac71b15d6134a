use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rep_tracker::calibration::ExerciseType;
use rep_tracker::config::Config;
use rep_tracker::events::Publisher;
use rep_tracker::feedback::{FeedbackEvent, FormScorer};
use rep_tracker::pose::PoseSnapshot;
use rep_tracker::recording::{read_records, SessionRecord};
use rep_tracker::store::CalibrationRepository;

/// 記録済みセッションを採点し、フィードバックイベントを出力する
#[derive(Parser, Debug)]
#[command(version, about = "Replay a recorded session through the form scorer")]
struct Args {
    #[arg(short, long)]
    exercise: ExerciseType,

    #[arg(short, long)]
    recording: PathBuf,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[arg(long)]
    store: Option<PathBuf>,

    /// 保存済みプロファイルを使わない
    #[arg(long)]
    uncalibrated: bool,

    /// 懸垂バーの高さ（正規化Y座標）
    #[arg(long)]
    bar_height: Option<f32>,

    /// 採点結果を毎回表示する
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load_or_default(&args.config);

    println!("=== フォーム採点 ({}) ===", env!("GIT_VERSION"));
    if !args.exercise.is_pose_scored() {
        bail!("{} has no pose-based scoring", args.exercise);
    }

    let calibration = if args.uncalibrated {
        None
    } else {
        let directory = args.store.clone().unwrap_or_else(|| PathBuf::from(&config.store.directory));
        let repository = CalibrationRepository::open(&directory, config.quality.clone());
        repository.best(args.exercise).await
    };
    match &calibration {
        Some(profile) => println!(
            "  プロファイル: {} (スコア {:.1}, {:?})",
            profile.id,
            profile.calibration_score,
            profile.quality(&config.quality)
        ),
        None => println!("  プロファイルなし（中立スコアで採点）"),
    }

    let publisher: Arc<Publisher<FeedbackEvent>> = Arc::new(Publisher::new());
    let events = publisher.subscribe(256);
    let mut scorer = FormScorer::new(args.exercise, calibration, config.feedback.clone(), publisher)
        .context("scorer unavailable for this exercise")?;
    if let Some(bar) = args.bar_height {
        scorer.set_bar_height(bar);
    }

    let records = read_records(&args.recording)?;
    let start = Instant::now();
    let mut scored = 0usize;
    let mut score_sum = 0.0f32;
    for record in &records {
        let SessionRecord::Pose { t_ms, joints } = record else {
            continue;
        };
        let pose = PoseSnapshot::from_samples(joints.iter().copied());
        if let Some(analysis) = scorer.process(Some(&pose), record.instant(start)) {
            scored += 1;
            score_sum += analysis.form_score;
            if args.verbose {
                println!(
                    "[{:>6}ms] score {:.2} (vis {:.2}, angles {:.2}, stab {:.2}) {} reps, {}",
                    t_ms,
                    analysis.form_score,
                    analysis.visibility,
                    analysis.angle_accuracy,
                    analysis.stability,
                    analysis.reps,
                    analysis.phase.as_str()
                );
            }
        }
        for event in events.try_iter() {
            print_event(*t_ms, &event)?;
        }
    }

    println!();
    println!("レップ数: {}", scorer.reps());
    if scored > 0 {
        println!("平均フォームスコア: {:.2} ({} 回採点)", score_sum / scored as f32, scored);
    }
    Ok(())
}

fn print_event(t_ms: u64, event: &FeedbackEvent) -> Result<()> {
    println!("[{:>6}ms] {}", t_ms, serde_json::to_string(event)?);
    Ok(())
}
