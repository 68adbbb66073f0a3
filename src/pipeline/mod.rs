/// 实时处理流水线 (Real-time Processing Pipeline)
///
/// 四线程架构, 阶段之间通过有界队列传递消息:
/// - Ingest:     视频源取帧 → 内存池 (独立线程)
/// - Preprocess: letterbox + 归一化 → 张量 (独立线程)
/// - Detect:     推理 + 解码 + NMS (独立线程)
/// - Track:      多目标跟踪 → 最新结果 (独立线程)
///
/// 队列满时丢弃最新消息, 任何阶段都不会阻塞等待下游。
pub mod orchestrator;
pub mod queue;
pub mod stages;
pub mod stats;

pub use orchestrator::{Pipeline, PipelineState};
pub use queue::StageQueue;
pub use stats::{PerformanceMonitor, PipelineStats, StageKind, StageTiming, TimingWindow};

use std::time::{Duration, Instant};

use crate::detection::Detection;
use crate::input::PixelFormat;
use crate::memory::PooledBuffer;
use crate::preprocess::Letterbox;
use crate::tracking::TrackedObject;

// ========== 流水线消息类型定义 ==========

/// 原始帧 (Ingest → Preprocess)
#[derive(Debug)]
pub struct RawFrame {
    pub buffer: PooledBuffer,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixel_format: PixelFormat,
    pub timestamp: Duration,
    pub frame_id: u64, // 帧序号
    pub ingested_at: Instant,
    pub timings: StageTimings,
}

/// 模型输入张量 (Preprocess → Detect)
///
/// NCHW f32, 按本机字节序存放在池化内存中。
#[derive(Debug)]
pub struct Tensor {
    pub buffer: PooledBuffer,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub frame_id: u64,
    pub letterbox: Letterbox,
    pub timestamp: Duration,
    pub ingested_at: Instant,
    pub timings: StageTimings,
}

impl Tensor {
    pub fn new(
        buffer: PooledBuffer,
        width: u32,
        height: u32,
        channels: u32,
        frame_id: u64,
        letterbox: Letterbox,
    ) -> Self {
        Self {
            buffer,
            width,
            height,
            channels,
            frame_id,
            letterbox,
            timestamp: Duration::ZERO,
            ingested_at: Instant::now(),
            timings: StageTimings::default(),
        }
    }

    /// 读取 (c, y, x) 处的值; 越界返回 0
    #[inline]
    pub fn value(&self, c: usize, y: usize, x: usize) -> f32 {
        let (w, h) = (self.width as usize, self.height as usize);
        let offset = ((c * h + y) * w + x) * 4;
        match self.buffer.as_slice().get(offset..offset + 4) {
            Some(b) => f32::from_ne_bytes([b[0], b[1], b[2], b[3]]),
            None => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 检测结果 (Detect → Track); 张量内存已归还
#[derive(Clone, Debug)]
pub struct DetectedFrame {
    pub frame_id: u64,
    pub timestamp: Duration,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<Detection>,
    pub ingested_at: Instant,
    pub timings: StageTimings,
}

/// 各阶段耗时 (ms)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTimings {
    pub ingest_ms: f64,
    pub preprocess_ms: f64,
    pub inference_ms: f64,
    pub postprocess_ms: f64,
    pub tracking_ms: f64,
}

/// 单帧最终结果 (Track → ResultSink)
#[derive(Clone, Debug)]
pub struct FrameResult {
    pub frame_id: u64,
    pub timestamp: Duration,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<Detection>,
    pub tracks: Vec<TrackedObject>,
    pub timings: StageTimings,
    pub latency_ms: f64, // 采集 → 跟踪完成
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BufferPool;

    #[test]
    fn test_tensor_value_layout() {
        let pool = BufferPool::new();
        pool.initialize(1, 2 * 2 * 3 * 4).unwrap();
        let mut buffer = pool.acquire(2 * 2 * 3 * 4).unwrap();
        for (i, chunk) in buffer.as_mut_slice().chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&(i as f32).to_ne_bytes());
        }
        let tensor = Tensor::new(buffer, 2, 2, 3, 7, Letterbox::new(2, 2, 2, 2));
        assert_eq!(tensor.len(), 12);
        assert_eq!(tensor.value(0, 0, 1), 1.0);
        assert_eq!(tensor.value(1, 1, 0), 6.0);
        assert_eq!(tensor.value(2, 1, 1), 11.0);
        assert_eq!(tensor.value(3, 0, 0), 0.0);
    }
}
