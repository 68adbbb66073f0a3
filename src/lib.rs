//! edgetrack: 实时视频检测 + 多目标跟踪流水线
//!
//! 视频源 → 采集 → 预处理 → 检测 (推理 + NMS) → 跟踪 → 最新结果
pub mod config; // 流水线配置参数
pub mod detection; // 检测框解码与 NMS
pub mod error; // 错误类型
pub mod inference; // 推理后端接口
pub mod input; // 视频输入系统
pub mod memory; // 内存池
pub mod pipeline; // 多线程流水线
pub mod preprocess; // letterbox + 归一化
pub mod tracking; // 多目标跟踪

pub use crate::config::PipelineConfig;
pub use crate::detection::{Detection, Rect};
pub use crate::error::{InferenceError, PipelineError, Result};
pub use crate::inference::{InferenceBackend, RawOutputTensor};
pub use crate::input::{FrameSource, PixelFormat, RawPixelData, SourcePoll};
pub use crate::memory::{BufferKind, BufferPool, PoolStats, PooledBuffer};
pub use crate::pipeline::{FrameResult, Pipeline, PipelineState, PipelineStats};
pub use crate::tracking::{TrackedObject, Tracker, TrackerSettings};
