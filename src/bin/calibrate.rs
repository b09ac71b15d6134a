use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use rep_tracker::calibration::{
    calibrate_from_records, quick_profile, CalibrationData, CalibrationMode, ExerciseType, ManualInputs,
};
use rep_tracker::config::Config;
use rep_tracker::recording::read_records;
use rep_tracker::store::CalibrationRepository;

/// 記録済みセッションからキャリブレーションプロファイルを作って保存する
#[derive(Parser, Debug)]
#[command(version, about = "Build and store a calibration profile from a recorded session")]
struct Args {
    /// 種目 (pushup, situp, pullup, plank, run)
    #[arg(short, long)]
    exercise: ExerciseType,

    /// JSON Lines の記録ファイル。quick モードでは不要
    #[arg(short, long)]
    recording: Option<PathBuf>,

    /// quick: 既定値のみ, basic/full: 記録から
    #[arg(short, long, default_value = "full", value_parser = parse_mode)]
    mode: CalibrationMode,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// 保存先ディレクトリ（設定ファイルより優先）
    #[arg(long)]
    store: Option<PathBuf>,

    /// 手動入力: 端末の高さ (m)
    #[arg(long)]
    device_height: Option<f32>,

    /// 手動入力: 端末までの距離 (m)
    #[arg(long)]
    device_distance: Option<f32>,

    /// 手動入力: 身長 (m)
    #[arg(long)]
    user_height: Option<f32>,
}

fn parse_mode(s: &str) -> Result<CalibrationMode, String> {
    match s {
        "quick" => Ok(CalibrationMode::Quick),
        "basic" => Ok(CalibrationMode::Basic),
        "full" => Ok(CalibrationMode::Full),
        other => Err(format!("unknown mode '{}' (quick, basic, full)", other)),
    }
}

impl Args {
    fn manual_inputs(&self) -> Option<ManualInputs> {
        if self.device_height.is_none() && self.device_distance.is_none() && self.user_height.is_none() {
            return None;
        }
        let defaults = ManualInputs::default();
        Some(ManualInputs {
            device_height: self.device_height.unwrap_or(defaults.device_height),
            device_distance: self.device_distance.unwrap_or(defaults.device_distance),
            user_height: self.user_height.unwrap_or(defaults.user_height),
        })
    }
}

fn print_summary(profile: &CalibrationData, config: &Config) {
    let quality = profile.quality(&config.quality);
    println!();
    println!("プロファイル {}", profile.id);
    println!("  種目: {}", profile.exercise);
    println!("  スコア: {:.1} ({:?})", profile.calibration_score, quality);
    println!("  {}", quality.description());
    println!("  適応度: {:?}", profile.adaptation_level());
    println!("  フレーム数: {}", profile.frame_count);
    println!(
        "  端末: 高さ {:.2}m, 角度 {:.1}°, 距離 {:.2}m, 安定度 {:.2}",
        profile.device_height, profile.device_angle, profile.device_distance, profile.device_stability
    );
    println!(
        "  体格: 身長 {:.2}m, 腕 {:.2}m, 胴 {:.2}m, 脚 {:.2}m",
        profile.user_height, profile.arm_span, profile.torso_length, profile.leg_length
    );
    let adj = &profile.angle_adjustments;
    match profile.exercise {
        ExerciseType::Pushup => println!(
            "  目標角度: 肘 {:.1}°/{:.1}°, 体幹 {:.1}°",
            adj.pushup_elbow_up, adj.pushup_elbow_down, adj.pushup_body_alignment
        ),
        ExerciseType::Situp => println!(
            "  目標角度: 胴 {:.1}°/{:.1}°, 膝 {:.1}°",
            adj.situp_torso_up, adj.situp_torso_down, adj.situp_knee_angle
        ),
        ExerciseType::Pullup => println!(
            "  目標角度: 腕 {:.1}°/{:.1}°, 体幹 {:.1}°",
            adj.pullup_arm_extended, adj.pullup_arm_flexed, adj.pullup_body_vertical
        ),
        ExerciseType::Plank | ExerciseType::Run => {}
    }
    if !quality.is_usable() {
        println!("  ※ このプロファイルは採点に使われません");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = Config::load_or_default(&args.config);

    println!("=== キャリブレーション ({}) ===", env!("GIT_VERSION"));
    println!("  種目: {}", args.exercise);
    println!("  モード: {}", args.mode.display_name());

    let directory = args.store.clone().unwrap_or_else(|| PathBuf::from(&config.store.directory));
    let repository = CalibrationRepository::open(&directory, config.quality.clone());
    // 集計から保存までの間、同じ種目の別キャリブレーションを締め出す
    let Some(_ticket) = repository.begin_aggregation(args.exercise) else {
        bail!("another calibration for {} is in progress", args.exercise);
    };

    let profile = match (args.mode, &args.recording) {
        (CalibrationMode::Quick, _) => quick_profile(args.exercise, &config),
        (_, Some(path)) => {
            let records = read_records(path)?;
            let outcome = calibrate_from_records(args.exercise, &records, &config, args.manual_inputs());
            println!(
                "  戦略: {} ({} フレーム使用, {} フレーム除外)",
                outcome.strategy.name(),
                outcome.frames_used,
                outcome.rejected
            );
            outcome.profile
        }
        (_, None) => bail!("--recording is required for {} mode", args.mode.display_name()),
    };

    print_summary(&profile, &config);

    match repository.save(profile).await {
        Ok(()) => println!("\n保存しました: {}", directory.display()),
        Err(e) if e.is_degraded() => {
            println!("\n主ストアに保存できなかったためフォールバックに保存しました: {}", e)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
