//! 错误类型定义
//! Error taxonomy for the pipeline
//!
//! 只有初始化阶段的错误会返回给调用者;
//! 运行期错误 (缓冲耗尽、推理失败、坏帧) 在各阶段内部吸收并计数。

use thiserror::Error;

/// 流水线错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 初始化失败 (内存池分配、推理后端加载、视频源打开)
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// 内存池没有空闲块
    #[error("buffer pool exhausted (requested {requested} bytes)")]
    BufferExhausted { requested: usize },

    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// 视频帧损坏或为空
    #[error("frame decode error: {0}")]
    FrameDecode(String),

    #[error("invalid config: {0}")]
    Config(String),

    /// 状态机不允许该操作
    #[error("invalid pipeline state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// 推理后端错误
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("backend error: {0}")]
    Backend(String),

    /// 输出张量维度无法识别
    #[error("malformed output tensor: {0}")]
    MalformedOutput(String),

    #[error("input shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
