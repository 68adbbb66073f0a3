//! 阶段工作线程
//!
//! 每个阶段一个线程, 循环体: 检查停止标志 → 非阻塞取输入 → 处理 → 非阻塞推给下游。
//! 运行期错误只计数和限流日志, 不会让线程退出。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::stats::StatsCollector;
use super::{DetectedFrame, FrameResult, RawFrame, StageQueue, Tensor};
use crate::config::PipelineConfig;
use crate::detection::{postprocess, DecodeParams};
use crate::error::PipelineError;
use crate::inference::InferenceBackend;
use crate::input::{FrameSource, SourcePoll};
use crate::memory::BufferPool;
use crate::preprocess::{tensor_bytes, Preprocessor, TENSOR_CHANNELS};
use crate::tracking::Tracker;

/// 同类日志每 N 次输出一次
const LOG_EVERY: u64 = 100;

#[inline]
fn should_log(count: u64) -> bool {
    count == 1 || count % LOG_EVERY == 0
}

#[inline]
fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

// ========== 共享上下文 ==========

/// 各阶段共享的状态
#[derive(Clone)]
pub(crate) struct StageContext {
    pub config: Arc<RwLock<PipelineConfig>>,
    pub cancel: Arc<AtomicBool>,
    pub pool: BufferPool,
    pub stats: Arc<StatsCollector>,
}

impl StageContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// 每次迭代读取一次配置
    fn config(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 空队列时短暂休眠
    fn idle(&self) {
        let ms = self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .poll_interval_ms
            .max(1);
        thread::sleep(Duration::from_millis(ms));
    }
}

/// 最新结果 (单写多读)
#[derive(Default)]
pub(crate) struct ResultSlot {
    latest: Mutex<Option<FrameResult>>,
    ready: Condvar,
}

impl ResultSlot {
    pub fn publish(&self, result: FrameResult) {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(result);
        self.ready.notify_all();
    }

    pub fn latest(&self) -> Option<FrameResult> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 等待比调用时更新的结果, 超时返回 None
    pub fn wait_newer(&self, timeout: Duration) -> Option<FrameResult> {
        let guard = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = guard.as_ref().map(|r| r.frame_id);
        let is_stale = |r: &mut Option<FrameResult>| match (r.as_ref(), seen) {
            (None, _) => true,
            (Some(r), Some(seen)) => r.frame_id <= seen,
            (Some(_), None) => false,
        };
        let (guard, result) = self
            .ready
            .wait_timeout_while(guard, timeout, is_stale)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            return None;
        }
        guard.clone()
    }

    pub fn clear(&self) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ========== Ingest ==========

/// 视频源 → 内存池 → 原始帧队列; 返回视频源以便重新启动
pub(crate) fn run_ingest(
    ctx: StageContext,
    mut source: Box<dyn FrameSource>,
    next_frame_id: Arc<AtomicU64>,
    output: StageQueue<RawFrame>,
) -> Box<dyn FrameSource> {
    info!("📹 采集线程启动");
    let stats = &ctx.stats;

    while !ctx.cancelled() {
        let raw = match source.next_frame() {
            SourcePoll::Frame(raw) => raw,
            SourcePoll::Pending => {
                ctx.idle();
                continue;
            }
            SourcePoll::Corrupt(reason) => {
                let n = StatsCollector::bump(&stats.decode_errors);
                if should_log(n) {
                    warn!(errors = n, "⚠️ 视频源返回坏帧: {}", reason);
                }
                continue;
            }
            SourcePoll::EndOfStream => {
                stats.source_exhausted.store(true, Ordering::Release);
                info!("🏁 视频源结束, 采集线程退出");
                break;
            }
        };

        let start = Instant::now();
        if let Err(e) = raw.validate() {
            let n = StatsCollector::bump(&stats.decode_errors);
            if should_log(n) {
                warn!(errors = n, "⚠️ 跳过坏帧: {}", e);
            }
            continue;
        }

        let needed = raw.required_bytes();
        let Some(mut buffer) = ctx.pool.acquire(needed) else {
            let n = StatsCollector::bump(&stats.buffer_exhaustions);
            if should_log(n) {
                debug!(requested = needed, exhaustions = n, "内存池耗尽, 丢弃原始帧");
            }
            continue;
        };
        buffer.copy_from(&raw.bytes[..needed]);

        let frame_id = next_frame_id.fetch_add(1, Ordering::Relaxed);
        stats.frames_ingested.fetch_add(1, Ordering::Relaxed);
        let mut frame = RawFrame {
            buffer,
            width: raw.width,
            height: raw.height,
            stride: raw.stride,
            pixel_format: raw.pixel_format,
            timestamp: raw.timestamp,
            frame_id,
            ingested_at: start,
            timings: Default::default(),
        };
        frame.timings.ingest_ms = elapsed_ms(start);

        if !output.push(frame) {
            let n = StatsCollector::bump(&stats.ingest_drops);
            if should_log(n) {
                debug!(frame_id, drops = n, "原始帧队列已满, 丢弃最新帧");
            }
        }
    }

    info!("📹 采集线程退出");
    source
}

// ========== Preprocess ==========

/// 原始帧 → 张量; 原始帧内存在这里归还
pub(crate) fn run_preprocess(
    ctx: StageContext,
    input: StageQueue<RawFrame>,
    output: StageQueue<Tensor>,
) {
    info!("🖼️ 预处理线程启动");
    let stats = &ctx.stats;
    let mut preprocessor = Preprocessor::new();

    while !ctx.cancelled() {
        let Some(frame) = input.pop() else {
            ctx.idle();
            continue;
        };
        let config = ctx.config();
        let start = Instant::now();
        let (tw, th) = (config.target_width, config.target_height);

        let needed = tensor_bytes(tw, th);
        let Some(mut buffer) = ctx.pool.acquire(needed) else {
            let n = StatsCollector::bump(&stats.buffer_exhaustions);
            if should_log(n) {
                debug!(frame_id = frame.frame_id, exhaustions = n, "内存池耗尽, 丢弃帧");
            }
            continue;
        };

        let letterbox = match preprocessor.run(&frame, &mut buffer, &config) {
            Ok(lb) => lb,
            Err(PipelineError::BufferExhausted { requested }) => {
                let n = StatsCollector::bump(&stats.buffer_exhaustions);
                if should_log(n) {
                    warn!(requested, "⚠️ 张量超过内存块容量");
                }
                continue;
            }
            Err(e) => {
                let n = StatsCollector::bump(&stats.decode_errors);
                if should_log(n) {
                    warn!(frame_id = frame.frame_id, errors = n, "⚠️ 预处理失败: {}", e);
                }
                continue;
            }
        };

        let mut timings = frame.timings;
        timings.preprocess_ms = elapsed_ms(start);
        let tensor = Tensor {
            buffer,
            width: tw,
            height: th,
            channels: TENSOR_CHANNELS as u32,
            frame_id: frame.frame_id,
            letterbox,
            timestamp: frame.timestamp,
            ingested_at: frame.ingested_at,
            timings,
        };
        drop(frame);

        if !output.push(tensor) {
            let n = StatsCollector::bump(&stats.preprocess_drops);
            if should_log(n) {
                debug!(drops = n, "张量队列已满, 丢弃最新帧");
            }
        }
    }

    info!("🖼️ 预处理线程退出");
}

// ========== Detect ==========

/// 推理 + 解码 + NMS; 推理失败按零检测处理
pub(crate) fn run_detect(
    ctx: StageContext,
    mut backend: Box<dyn InferenceBackend>,
    input: StageQueue<Tensor>,
    output: StageQueue<DetectedFrame>,
) -> Box<dyn InferenceBackend> {
    info!("🔍 检测线程启动 (后端: {})", backend.name());
    let stats = &ctx.stats;

    while !ctx.cancelled() {
        let Some(tensor) = input.pop() else {
            ctx.idle();
            continue;
        };
        let mut params = DecodeParams::from_config(&ctx.config());
        if params.num_classes.is_none() {
            params.num_classes = backend.num_classes();
        }

        let t_infer = Instant::now();
        let output_tensor = backend.infer(&tensor);
        let inference_ms = elapsed_ms(t_infer);

        let letterbox = tensor.letterbox;
        let mut timings = tensor.timings;
        let (frame_id, timestamp, ingested_at) =
            (tensor.frame_id, tensor.timestamp, tensor.ingested_at);
        drop(tensor);

        let t_post = Instant::now();
        let detections = match output_tensor {
            Ok(raw) => postprocess(&raw, &letterbox, &params),
            Err(e) => {
                let n = StatsCollector::bump(&stats.inference_errors);
                if should_log(n) {
                    warn!(frame_id, errors = n, "❌ 推理失败, 本帧按无检测处理: {}", e);
                }
                Vec::new()
            }
        };
        timings.inference_ms = inference_ms;
        timings.postprocess_ms = elapsed_ms(t_post);

        let detected = DetectedFrame {
            frame_id,
            timestamp,
            frame_width: letterbox.frame_width,
            frame_height: letterbox.frame_height,
            detections,
            ingested_at,
            timings,
        };
        if !output.push(detected) {
            let n = StatsCollector::bump(&stats.detect_drops);
            if should_log(n) {
                debug!(frame_id, drops = n, "检测结果队列已满, 丢弃最新帧");
            }
        }
    }

    info!("🔍 检测线程退出");
    backend
}

// ========== Track ==========

/// 多目标跟踪 → 最新结果; 返回跟踪器以便重新启动时保留轨迹与 ID
pub(crate) fn run_track(
    ctx: StageContext,
    mut tracker: Tracker,
    input: StageQueue<DetectedFrame>,
    results: Arc<ResultSlot>,
) -> Tracker {
    info!("🎯 跟踪线程启动");
    let stats = &ctx.stats;

    while !ctx.cancelled() {
        let Some(frame) = input.pop() else {
            ctx.idle();
            continue;
        };
        let settings = ctx.config().tracker_settings();
        if &settings != tracker.settings() {
            debug!(?settings, "跟踪参数已更新");
            tracker.set_settings(settings);
        }

        let start = Instant::now();
        let tracks = tracker.step(&frame.detections);
        let mut timings = frame.timings;
        timings.tracking_ms = elapsed_ms(start);
        let latency_ms = elapsed_ms(frame.ingested_at);

        stats
            .active_tracks
            .store(tracker.track_count(), Ordering::Relaxed);
        stats.confirmed_tracks.store(tracks.len(), Ordering::Relaxed);
        stats.frames_processed.fetch_add(1, Ordering::Relaxed);
        stats.with_monitor(|m| m.record_frame(latency_ms, &timings));

        results.publish(FrameResult {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            frame_width: frame.frame_width,
            frame_height: frame.frame_height,
            detections: frame.detections,
            tracks,
            timings,
            latency_ms,
        });
    }

    info!("🎯 跟踪线程退出");
    tracker
}
