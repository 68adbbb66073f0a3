/// 实时检测 + 跟踪演示 (edgetrack)
///
/// 系统架构:
/// 1. 采集线程:   合成视频或图片目录 → 内存池
/// 2. 预处理线程: letterbox + 归一化
/// 3. 检测线程:   推理 + 解码 + NMS
/// 4. 跟踪线程:   IOU 贪心关联 → 最新结果
/// 5. 主线程:     每秒打印统计 (ResultSink)
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edgetrack_rs::inference::ThresholdBackend;
use edgetrack_rs::input::{ImageFolderSource, SyntheticObject, SyntheticSource};
use edgetrack_rs::pipeline::StageKind;
use edgetrack_rs::{FrameSource, Pipeline, PipelineConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const SYNTHETIC_WIDTH: u32 = 1280;
const SYNTHETIC_HEIGHT: u32 = 720;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about = "edgetrack - 实时目标检测与跟踪流水线", long_about = None)]
struct Args {
    /// 配置文件 (不存在时自动创建)
    #[arg(short, long, default_value = "edgetrack_config.json")]
    config: PathBuf,

    /// 合成视频帧数
    #[arg(short, long, default_value_t = 300)]
    frames: u64,

    /// 图片目录 (不指定时使用合成视频)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// 视频源帧率
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// 模拟推理耗时 (ms)
    #[arg(long, default_value_t = 0)]
    infer_delay_ms: u64,

    /// 覆盖置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// 覆盖 NMS 阈值
    #[arg(long)]
    nms: Option<f32>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    info!("🚀 edgetrack 启动");

    let mut config = PipelineConfig::load(&args.config);
    if let Some(conf) = args.conf {
        config.confidence_threshold = conf;
    }
    if let Some(nms) = args.nms {
        config.nms_threshold = nms;
    }
    let config = config.sanitized();

    let source: Box<dyn FrameSource> = match &args.source {
        Some(dir) => {
            let folder = ImageFolderSource::open(dir)
                .with_context(|| format!("无法打开图片目录 {}", dir.display()))?;
            Box::new(folder.with_fps(args.fps))
        }
        None => {
            info!("📹 使用合成视频: {}x{}, {} 帧", SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, args.frames);
            Box::new(
                SyntheticSource::new(
                    SYNTHETIC_WIDTH,
                    SYNTHETIC_HEIGHT,
                    vec![
                        SyntheticObject::new(100.0, 120.0, 80.0, 80.0, 6.0, 2.0),
                        SyntheticObject::new(600.0, 400.0, 120.0, 60.0, -4.0, 3.0),
                        SyntheticObject::new(900.0, 150.0, 50.0, 100.0, 2.0, -5.0),
                    ],
                )
                .with_frame_limit(args.frames)
                .with_fps(args.fps),
            )
        }
    };

    let backend = ThresholdBackend::new(0.8, 0, config.num_classes.max(1))
        .with_delay(Duration::from_millis(args.infer_delay_ms));

    let mut pipeline = Pipeline::new(config, source, Box::new(backend));
    pipeline.initialize().context("流水线初始化失败")?;
    pipeline.start().context("流水线启动失败")?;

    let started = Instant::now();
    let mut last_report = Instant::now();
    loop {
        match pipeline.wait_for_result(Duration::from_millis(500)) {
            Some(result) if last_report.elapsed() >= Duration::from_secs(1) => {
                last_report = Instant::now();
                info!("{}", pipeline.stats().summary());
                for track in &result.tracks {
                    info!(
                        "  🎯 #{} {} conf={:.2} bbox=({:.0},{:.0},{:.0},{:.0}) v=({:.1},{:.1}) hits={}",
                        track.id,
                        track.class_name,
                        track.confidence,
                        track.bbox.x,
                        track.bbox.y,
                        track.bbox.w,
                        track.bbox.h,
                        track.velocity.x,
                        track.velocity.y,
                        track.total_hits
                    );
                }
            }
            Some(_) => {}
            None if pipeline.is_source_exhausted() => break,
            None => warn!("⚠️ 500ms 内没有新结果"),
        }
    }

    pipeline.stop();

    let stats = pipeline.stats();
    info!("🏁 处理完成, 用时 {:.1}s", started.elapsed().as_secs_f64());
    info!("{}", stats.summary());
    for kind in StageKind::ALL {
        let timing = stats.stage(kind);
        info!(
            "  {:<12} avg {:.2}ms | peak {:.2}ms",
            kind.name(),
            timing.avg_ms,
            timing.peak_ms
        );
    }
    info!(
        "  丢帧: 采集 {} | 预处理 {} | 检测 {} | 内存池耗尽 {} | 推理错误 {} | 坏帧 {}",
        stats.ingest_drops,
        stats.preprocess_drops,
        stats.detect_drops,
        stats.buffer_exhaustions,
        stats.inference_errors,
        stats.decode_errors
    );
    info!(
        "  内存池: {} 块, 峰值 {:.1} MB",
        stats.pool.total_blocks,
        stats.pool.peak_memory as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}
