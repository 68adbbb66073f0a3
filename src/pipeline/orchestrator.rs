//! 流水线调度器 (Pipeline Orchestrator)
//!
//! 状态机: Stopped → Running → Stopping → Stopped
//! 拥有全部阶段、级间队列和工作线程; 对外提供启停、配置热更新和最新结果。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use super::stages::{run_detect, run_ingest, run_preprocess, run_track, ResultSlot, StageContext};
use super::stats::{PipelineStats, StatsCollector};
use super::{FrameResult, StageQueue};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::inference::InferenceBackend;
use crate::input::FrameSource;
use crate::memory::BufferPool;
use crate::tracking::Tracker;

/// 流水线状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Running,
    Stopping,
}

/// 运行中的工作线程; 线程退出时交还各自持有的资源
struct Workers {
    ingest: JoinHandle<Box<dyn FrameSource>>,
    preprocess: JoinHandle<()>,
    detect: JoinHandle<Box<dyn InferenceBackend>>,
    track: JoinHandle<Tracker>,
}

pub struct Pipeline {
    config: Arc<RwLock<PipelineConfig>>,
    pool: BufferPool,
    stats: Arc<StatsCollector>,
    results: Arc<ResultSlot>,
    cancel: Arc<AtomicBool>,
    next_frame_id: Arc<AtomicU64>,
    state: PipelineState,
    initialized: bool,

    // 停止时由工作线程交还
    source: Option<Box<dyn FrameSource>>,
    backend: Option<Box<dyn InferenceBackend>>,
    tracker: Option<Tracker>,
    workers: Option<Workers>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        backend: Box<dyn InferenceBackend>,
    ) -> Self {
        let tracker = Tracker::new(config.tracker_settings());
        Self {
            config: Arc::new(RwLock::new(config)),
            pool: BufferPool::new(),
            stats: Arc::new(StatsCollector::default()),
            results: Arc::new(ResultSlot::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            next_frame_id: Arc::new(AtomicU64::new(0)),
            state: PipelineState::Stopped,
            initialized: false,
            source: Some(source),
            backend: Some(backend),
            tracker: Some(tracker),
            workers: None,
        }
    }

    /// 校验配置、预热推理后端、分配内存池
    ///
    /// 失败时流水线保持 Stopped, 错误统一为 `PipelineError::Initialization`。
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != PipelineState::Stopped {
            return Err(PipelineError::InvalidState("initialize() requires a stopped pipeline"));
        }
        if self.initialized {
            info!("流水线已初始化, 跳过");
            return Ok(());
        }

        let config = self.config();
        config
            .validate()
            .map_err(|e| PipelineError::Initialization(e.to_string()))?;
        let tensor_bytes = config.tensor_bytes();
        if tensor_bytes > config.max_buffer_size {
            return Err(PipelineError::Initialization(format!(
                "tensor {}x{} needs {} bytes, max_buffer_size is {}",
                config.target_width, config.target_height, tensor_bytes, config.max_buffer_size
            )));
        }

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| PipelineError::Initialization("inference backend unavailable".into()))?;
        if config.num_classes == 0 && backend.num_classes().is_none() {
            return Err(PipelineError::Initialization(format!(
                "num_classes is 0 and backend {} does not report a class count",
                backend.name()
            )));
        }
        backend
            .warmup((config.target_width, config.target_height))
            .map_err(|e| {
                PipelineError::Initialization(format!("backend {}: {e}", backend.name()))
            })?;

        let pooled = if config.enable_accelerator {
            self.pool
                .initialize_with_accelerator(config.buffer_pool_size, config.max_buffer_size)
        } else {
            self.pool
                .initialize(config.buffer_pool_size, config.max_buffer_size)
        };
        pooled.map_err(|e| match e {
            PipelineError::Initialization(_) => e,
            other => PipelineError::Initialization(other.to_string()),
        })?;

        self.initialized = true;
        info!("✅ 流水线初始化完成");
        config.print_summary();
        Ok(())
    }

    /// 启动四个工作线程; 已在运行时不做任何事
    pub fn start(&mut self) -> Result<()> {
        if self.state == PipelineState::Running {
            return Ok(());
        }
        if !self.initialized {
            return Err(PipelineError::InvalidState("initialize() must succeed before start()"));
        }
        if self.source.is_none() || self.backend.is_none() || self.tracker.is_none() {
            return Err(PipelineError::InvalidState(
                "stage resources were lost by a crashed worker",
            ));
        }
        let (Some(source), Some(backend), Some(tracker)) =
            (self.source.take(), self.backend.take(), self.tracker.take())
        else {
            return Err(PipelineError::InvalidState("stage resources unavailable"));
        };

        self.cancel.store(false, Ordering::Release);
        self.stats.source_exhausted.store(false, Ordering::Release);

        let capacity = self.config().queue_capacity;
        let raw_queue = StageQueue::new(capacity);
        let tensor_queue = StageQueue::new(capacity);
        let detected_queue = StageQueue::new(capacity);
        let ctx = StageContext {
            config: Arc::clone(&self.config),
            cancel: Arc::clone(&self.cancel),
            pool: self.pool.clone(),
            stats: Arc::clone(&self.stats),
        };

        let ingest = {
            let (ctx, out, ids) = (ctx.clone(), raw_queue.clone(), Arc::clone(&self.next_frame_id));
            thread::spawn(move || run_ingest(ctx, source, ids, out))
        };
        let preprocess = {
            let (ctx, out) = (ctx.clone(), tensor_queue.clone());
            thread::spawn(move || run_preprocess(ctx, raw_queue, out))
        };
        let detect = {
            let ctx = ctx.clone();
            let out = detected_queue.clone();
            thread::spawn(move || run_detect(ctx, backend, tensor_queue, out))
        };
        let track = {
            let results = Arc::clone(&self.results);
            thread::spawn(move || run_track(ctx, tracker, detected_queue, results))
        };

        self.workers = Some(Workers {
            ingest,
            preprocess,
            detect,
            track,
        });
        self.state = PipelineState::Running;
        info!(queue_capacity = capacity, "🚀 流水线已启动");
        Ok(())
    }

    /// 通知所有线程退出并等待结束; 可重复调用
    pub fn stop(&mut self) {
        let Some(workers) = self.workers.take() else {
            self.state = PipelineState::Stopped;
            return;
        };
        self.state = PipelineState::Stopping;
        self.cancel.store(true, Ordering::Release);

        match workers.ingest.join() {
            Ok(source) => self.source = Some(source),
            Err(_) => error!("❌ 采集线程异常退出, 视频源已丢失"),
        }
        if workers.preprocess.join().is_err() {
            error!("❌ 预处理线程异常退出");
        }
        match workers.detect.join() {
            Ok(backend) => self.backend = Some(backend),
            Err(_) => error!("❌ 检测线程异常退出, 推理后端已丢失"),
        }
        match workers.track.join() {
            Ok(tracker) => self.tracker = Some(tracker),
            Err(_) => {
                error!("❌ 跟踪线程异常退出, 跟踪器已重建");
                self.tracker = Some(Tracker::new(self.config().tracker_settings()));
            }
        }

        self.state = PipelineState::Stopped;
        info!("🛑 流水线已停止");
    }

    /// 热更新配置; 各阶段在下一次迭代读取
    ///
    /// 队列容量只在下次 `start()` 时生效。
    pub fn update_config(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        if self.initialized && config.tensor_bytes() > self.pool.block_size() {
            return Err(PipelineError::Config(format!(
                "tensor {}x{} does not fit pool block of {} bytes",
                config.target_width,
                config.target_height,
                self.pool.block_size()
            )));
        }
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if current.queue_capacity != config.queue_capacity && self.state == PipelineState::Running {
            warn!("⚠️ 队列容量变更将在重新启动后生效");
        }
        *current = config;
        info!("📝 配置已更新");
        Ok(())
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 最新结果, 不阻塞
    pub fn latest_result(&self) -> Option<FrameResult> {
        self.results.latest()
    }

    /// 等待比当前更新的结果, 超时返回 None
    pub fn wait_for_result(&self, timeout: Duration) -> Option<FrameResult> {
        self.results.wait_newer(timeout)
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot(self.pool.stats())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 视频源是否已播放完毕
    pub fn is_source_exhausted(&self) -> bool {
        self.stats.source_exhausted.load(Ordering::Acquire)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// 清空轨迹; 只在停止状态下可用
    pub fn reset_tracker(&mut self) -> Result<()> {
        match self.tracker.as_mut() {
            Some(tracker) if self.state == PipelineState::Stopped => {
                tracker.reset();
                self.results.clear();
                Ok(())
            }
            _ => Err(PipelineError::InvalidState("reset_tracker() requires a stopped pipeline")),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        self.pool.shutdown();
    }
}
