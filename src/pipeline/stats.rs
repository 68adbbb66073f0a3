//! 性能统计
//!
//! - `PerformanceMonitor`: 端到端延迟历史、每秒刷新的 FPS、各阶段耗时窗口
//! - `StatsCollector`:     各阶段写入的原子计数器
//! - `PipelineStats`:      提供给 ResultSink 的只读快照

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::StageTimings;
use crate::memory::PoolStats;

/// 延迟历史长度
pub const LATENCY_HISTORY: usize = 1000;
/// 阶段耗时窗口长度
pub const STAGE_WINDOW: usize = 100;
/// FPS 刷新间隔
pub const FPS_INTERVAL: Duration = Duration::from_secs(1);

/// 流水线阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Ingest,
    Preprocess,
    Inference,
    Postprocess,
    Tracking,
}

impl StageKind {
    pub const COUNT: usize = 5;
    pub const ALL: [StageKind; Self::COUNT] = [
        StageKind::Ingest,
        StageKind::Preprocess,
        StageKind::Inference,
        StageKind::Postprocess,
        StageKind::Tracking,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Ingest => "ingest",
            StageKind::Preprocess => "preprocess",
            StageKind::Inference => "inference",
            StageKind::Postprocess => "postprocess",
            StageKind::Tracking => "tracking",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn of(timings: &StageTimings, kind: StageKind) -> f64 {
        match kind {
            StageKind::Ingest => timings.ingest_ms,
            StageKind::Preprocess => timings.preprocess_ms,
            StageKind::Inference => timings.inference_ms,
            StageKind::Postprocess => timings.postprocess_ms,
            StageKind::Tracking => timings.tracking_ms,
        }
    }
}

/// 单阶段耗时汇总 (ms)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTiming {
    pub avg_ms: f64,
    pub peak_ms: f64,
    pub samples: usize,
}

/// 固定长度的耗时窗口
#[derive(Clone, Debug)]
pub struct TimingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl TimingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            (self.sum / self.samples.len() as f64).max(0.0)
        }
    }

    pub fn peak(&self) -> f64 {
        self.samples.iter().copied().fold(0.0, f64::max)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn summary(&self) -> StageTiming {
        StageTiming {
            avg_ms: self.average(),
            peak_ms: self.peak(),
            samples: self.len(),
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }
}

// ========== 性能监控 ==========

pub struct PerformanceMonitor {
    latencies: VecDeque<f64>,      // 最近 1000 帧端到端延迟
    recent_latency: TimingWindow,  // 最近 100 帧, 用于平均延迟
    stages: Vec<TimingWindow>,
    peak_latency: f64,
    total_frames: u64,
    started_at: Instant,

    // FPS 统计 (每秒刷新)
    window_frames: u64,
    window_start: Instant,
    current_fps: f64,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            latencies: VecDeque::with_capacity(LATENCY_HISTORY),
            recent_latency: TimingWindow::new(STAGE_WINDOW),
            stages: (0..StageKind::COUNT)
                .map(|_| TimingWindow::new(STAGE_WINDOW))
                .collect(),
            peak_latency: 0.0,
            total_frames: 0,
            started_at: now,
            window_frames: 0,
            window_start: now,
            current_fps: 0.0,
        }
    }

    /// 记录一帧完成
    pub fn record_frame(&mut self, latency_ms: f64, timings: &StageTimings) {
        self.record_frame_at(Instant::now(), latency_ms, timings);
    }

    pub fn record_frame_at(&mut self, now: Instant, latency_ms: f64, timings: &StageTimings) {
        self.total_frames += 1;
        self.peak_latency = self.peak_latency.max(latency_ms);
        if self.latencies.len() == LATENCY_HISTORY {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);
        self.recent_latency.push(latency_ms);
        for kind in StageKind::ALL {
            self.stages[kind.index()].push(StageKind::of(timings, kind));
        }

        self.window_frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= FPS_INTERVAL {
            self.current_fps = self.window_frames as f64 / elapsed.as_secs_f64();
            self.window_frames = 0;
            self.window_start = now;
        }
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    /// 启动以来的平均 FPS
    pub fn average_fps(&self) -> f64 {
        let secs = self.started_at.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.total_frames as f64 / secs
        } else {
            0.0
        }
    }

    /// 最近 100 帧的平均延迟
    pub fn average_latency(&self) -> f64 {
        self.recent_latency.average()
    }

    pub fn peak_latency(&self) -> f64 {
        self.peak_latency
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn latency_history(&self) -> Vec<f64> {
        self.latencies.iter().copied().collect()
    }

    pub fn stage(&self, kind: StageKind) -> StageTiming {
        self.stages[kind.index()].summary()
    }

    /// 是否同时达到帧率和延迟目标
    pub fn check_targets(&self, target_fps: f64, max_latency_ms: f64) -> bool {
        self.current_fps >= target_fps && self.average_latency() <= max_latency_ms
    }

    pub fn summary(&self) -> String {
        format!(
            "FPS: {:.1} (avg {:.1}) | 延迟: {:.2}ms (峰值 {:.2}ms) | 帧数: {}",
            self.current_fps,
            self.average_fps(),
            self.average_latency(),
            self.peak_latency,
            self.total_frames
        )
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

// ========== 计数器 ==========

/// 各阶段共享的计数器, 单写多读
pub struct StatsCollector {
    pub frames_ingested: AtomicU64,
    pub frames_processed: AtomicU64,
    pub ingest_drops: AtomicU64,      // 原始帧队列满
    pub preprocess_drops: AtomicU64,  // 张量队列满
    pub detect_drops: AtomicU64,      // 检测结果队列满
    pub buffer_exhaustions: AtomicU64,
    pub inference_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    pub active_tracks: AtomicUsize,
    pub confirmed_tracks: AtomicUsize,
    pub source_exhausted: AtomicBool,
    monitor: Mutex<PerformanceMonitor>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self {
            frames_ingested: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            ingest_drops: AtomicU64::new(0),
            preprocess_drops: AtomicU64::new(0),
            detect_drops: AtomicU64::new(0),
            buffer_exhaustions: AtomicU64::new(0),
            inference_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            active_tracks: AtomicUsize::new(0),
            confirmed_tracks: AtomicUsize::new(0),
            source_exhausted: AtomicBool::new(false),
            monitor: Mutex::new(PerformanceMonitor::new()),
        }
    }
}

impl StatsCollector {
    /// 计数 +1, 返回新值 (用于日志限流)
    pub fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn with_monitor<R>(&self, f: impl FnOnce(&mut PerformanceMonitor) -> R) -> R {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut monitor)
    }

    pub fn snapshot(&self, pool: PoolStats) -> PipelineStats {
        let (current_fps, average_latency_ms, peak_latency_ms, stages) = self.with_monitor(|m| {
            let stages = StageKind::ALL.map(|k| m.stage(k));
            (m.current_fps(), m.average_latency(), m.peak_latency(), stages)
        });
        PipelineStats {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            ingest_drops: self.ingest_drops.load(Ordering::Relaxed),
            preprocess_drops: self.preprocess_drops.load(Ordering::Relaxed),
            detect_drops: self.detect_drops.load(Ordering::Relaxed),
            buffer_exhaustions: self.buffer_exhaustions.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
            confirmed_tracks: self.confirmed_tracks.load(Ordering::Relaxed),
            source_exhausted: self.source_exhausted.load(Ordering::Acquire),
            current_fps,
            average_latency_ms,
            peak_latency_ms,
            stages,
            pool,
        }
    }
}

/// 统计快照 (最终一致, 不用于控制决策)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub frames_ingested: u64,
    pub frames_processed: u64,
    pub ingest_drops: u64,
    pub preprocess_drops: u64,
    pub detect_drops: u64,
    pub buffer_exhaustions: u64,
    pub inference_errors: u64,
    pub decode_errors: u64,
    pub active_tracks: usize,
    pub confirmed_tracks: usize,
    pub source_exhausted: bool,
    pub current_fps: f64,
    pub average_latency_ms: f64,
    pub peak_latency_ms: f64,
    pub stages: [StageTiming; StageKind::COUNT],
    pub pool: PoolStats,
}

impl PipelineStats {
    pub fn stage(&self, kind: StageKind) -> StageTiming {
        self.stages[kind.index()]
    }

    pub fn total_drops(&self) -> u64 {
        self.ingest_drops + self.preprocess_drops + self.detect_drops
    }

    pub fn summary(&self) -> String {
        format!(
            "📊 FPS {:.1} | 延迟 {:.2}ms (峰值 {:.2}ms) | 帧 {}/{} | 丢帧 {} | 轨迹 {}/{} | 内存池 {:.0}%",
            self.current_fps,
            self.average_latency_ms,
            self.peak_latency_ms,
            self.frames_processed,
            self.frames_ingested,
            self.total_drops(),
            self.confirmed_tracks,
            self.active_tracks,
            self.pool.utilization * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings(ms: f64) -> StageTimings {
        StageTimings {
            ingest_ms: ms,
            preprocess_ms: ms * 2.0,
            inference_ms: ms * 3.0,
            postprocess_ms: ms,
            tracking_ms: ms,
        }
    }

    #[test]
    fn test_timing_window_rolls() {
        let mut w = TimingWindow::new(3);
        for v in [1.0, 2.0, 3.0, 10.0] {
            w.push(v);
        }
        assert_eq!(w.len(), 3);
        assert!((w.average() - 5.0).abs() < 1e-9);
        assert_eq!(w.peak(), 10.0);
    }

    #[test]
    fn test_fps_recomputed_each_second() {
        let mut m = PerformanceMonitor::new();
        let t0 = m.window_start;
        for i in 0..30 {
            m.record_frame_at(t0 + Duration::from_millis(i * 20), 10.0, &timings(1.0));
        }
        assert_eq!(m.current_fps(), 0.0);

        m.record_frame_at(t0 + Duration::from_millis(1000), 10.0, &timings(1.0));
        assert!((m.current_fps() - 31.0).abs() < 1e-6);
        assert_eq!(m.total_frames(), 31);
    }

    #[test]
    fn test_latency_history_and_peak() {
        let mut m = PerformanceMonitor::new();
        for i in 0..1200 {
            m.record_frame(i as f64 % 50.0, &timings(0.5));
        }
        assert_eq!(m.latency_history().len(), LATENCY_HISTORY);
        assert_eq!(m.peak_latency(), 49.0);
        assert_eq!(m.stage(StageKind::Inference).samples, STAGE_WINDOW);
        assert!((m.stage(StageKind::Inference).avg_ms - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_check_targets() {
        let mut m = PerformanceMonitor::new();
        let t0 = m.window_start;
        for i in 0..=50 {
            m.record_frame_at(t0 + Duration::from_millis(i * 20), 12.0, &timings(1.0));
        }
        assert!(m.check_targets(50.0, 20.0));
        assert!(!m.check_targets(60.0, 20.0));
        assert!(!m.check_targets(50.0, 10.0));
        assert!(m.summary().contains("FPS"));
    }

    #[test]
    fn test_snapshot_reads_counters() {
        let stats = StatsCollector::default();
        assert_eq!(StatsCollector::bump(&stats.ingest_drops), 1);
        StatsCollector::bump(&stats.detect_drops);
        stats.with_monitor(|m| m.record_frame(5.0, &timings(1.0)));

        let snap = stats.snapshot(PoolStats::default());
        assert_eq!(snap.total_drops(), 2);
        assert_eq!(snap.peak_latency_ms, 5.0);
        assert_eq!(snap.stage(StageKind::Preprocess).avg_ms, 2.0);
    }
}
