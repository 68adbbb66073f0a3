/// 推理后端 (Inference Backend)
///
/// 流水线只依赖 `InferenceBackend` 接口; 具体的推理引擎由外部提供。
/// - synthetic: 无模型的后端, 用于演示与测试
pub mod synthetic;

pub use synthetic::{ScriptedBackend, ScriptedBox, ThresholdBackend};

use ndarray::{ArrayD, IxDyn};

use crate::error::InferenceError;
use crate::pipeline::Tensor;

/// 推理输出张量, 形状由后端决定 (如 `[1, N, 85]` 或 `[1, 84, 8400]`)
pub type RawOutputTensor = ArrayD<f32>;

/// 推理后端接口
///
/// 同步调用, 延迟有界; 内部的并行与硬件调度不做假设。
pub trait InferenceBackend: Send {
    /// 后端名称 (日志用)
    fn name(&self) -> &str;

    /// 初始化阶段调用一次, 失败视为初始化错误
    fn warmup(&mut self, _input: (u32, u32)) -> Result<(), InferenceError> {
        Ok(())
    }

    /// 输出张量中的类别数; 配置中 num_classes 为 0 时用于判断布局
    fn num_classes(&self) -> Option<usize> {
        None
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<RawOutputTensor, InferenceError>;
}

/// 按行布局 `[N, 5+C]` 组装输出 (cx, cy, w, h, obj, 类别分数...)
pub fn rows_tensor(boxes: &[ScriptedBox], num_classes: usize) -> RawOutputTensor {
    let cols = 5 + num_classes;
    let mut data = vec![0.0f32; boxes.len() * cols];
    for (row, b) in data.chunks_exact_mut(cols).zip(boxes) {
        row[0] = b.cx;
        row[1] = b.cy;
        row[2] = b.w;
        row[3] = b.h;
        row[4] = b.objectness;
        if let Some(score) = row.get_mut(5 + b.class_id) {
            *score = b.score;
        }
    }
    // 形状与数据长度一致, 不会失败
    ArrayD::from_shape_vec(IxDyn(&[boxes.len(), cols]), data)
        .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0, cols])))
}

/// 转置布局 `[4+C, N]`, 不含 objectness
pub fn transposed_tensor(boxes: &[ScriptedBox], num_classes: usize) -> RawOutputTensor {
    let n = boxes.len();
    let mut out = ArrayD::<f32>::zeros(IxDyn(&[4 + num_classes, n]));
    for (i, b) in boxes.iter().enumerate() {
        out[[0, i]] = b.cx;
        out[[1, i]] = b.cy;
        out[[2, i]] = b.w;
        out[[3, i]] = b.h;
        if b.class_id < num_classes {
            out[[4 + b.class_id, i]] = b.score * b.objectness;
        }
    }
    out
}
