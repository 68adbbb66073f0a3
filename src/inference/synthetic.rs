//! 无模型推理后端
//!
//! - ScriptedBackend:  按脚本逐帧返回预设框
//! - ThresholdBackend: 亮度阈值 + 连通域, 把亮色块当作目标

use std::time::Duration;

use super::{rows_tensor, transposed_tensor, InferenceBackend, RawOutputTensor};
use crate::error::InferenceError;
use crate::pipeline::Tensor;

/// 模型输入坐标系下的一个框
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScriptedBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub objectness: f32,
    pub score: f32,
    pub class_id: usize,
}

impl ScriptedBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32, score: f32, class_id: usize) -> Self {
        Self {
            cx,
            cy,
            w,
            h,
            objectness: 1.0,
            score,
            class_id,
        }
    }
}

// ========== 脚本后端 ==========

/// 按调用次数循环返回脚本中的框
pub struct ScriptedBackend {
    script: Vec<Vec<ScriptedBox>>,
    num_classes: usize,
    transposed: bool,
    delay: Duration,
    fail_every: Option<u64>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<ScriptedBox>>, num_classes: usize) -> Self {
        Self {
            script,
            num_classes: num_classes.max(1),
            transposed: false,
            delay: Duration::ZERO,
            fail_every: None,
            calls: 0,
        }
    }

    /// 输出 `[4+C, N]` 转置布局
    pub fn transposed(mut self, transposed: bool) -> Self {
        self.transposed = transposed;
        self
    }

    /// 人为增加推理耗时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 每 n 次调用失败一次
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }

    fn infer(&mut self, _tensor: &Tensor) -> Result<RawOutputTensor, InferenceError> {
        self.calls += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(n) = self.fail_every {
            if self.calls % n == 0 {
                return Err(InferenceError::Backend(format!("scripted failure #{}", self.calls)));
            }
        }

        let boxes = if self.script.is_empty() {
            &[][..]
        } else {
            let idx = ((self.calls - 1) % self.script.len() as u64) as usize;
            &self.script[idx][..]
        };
        Ok(if self.transposed {
            transposed_tensor(boxes, self.num_classes)
        } else {
            rows_tensor(boxes, self.num_classes)
        })
    }
}

// ========== 阈值后端 ==========

/// 亮色块检测: 三个通道都超过阈值的像素组成连通域, 每个连通域一个框
pub struct ThresholdBackend {
    threshold: f32,
    class_id: usize,
    num_classes: usize,
    min_area: usize,
    delay: Duration,

    // 复用的标记缓冲
    visited: Vec<bool>,
    stack: Vec<usize>,
}

impl ThresholdBackend {
    pub fn new(threshold: f32, class_id: usize, num_classes: usize) -> Self {
        Self {
            threshold,
            class_id,
            num_classes: num_classes.max(class_id + 1),
            min_area: 16,
            delay: Duration::ZERO,
            visited: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn with_min_area(mut self, min_area: usize) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn is_bright(&self, tensor: &Tensor, x: usize, y: usize) -> bool {
        (0..tensor.channels as usize).all(|c| tensor.value(c, y, x) > self.threshold)
    }
}

impl InferenceBackend for ThresholdBackend {
    fn name(&self) -> &str {
        "threshold"
    }

    fn num_classes(&self) -> Option<usize> {
        Some(self.num_classes)
    }

    fn warmup(&mut self, input: (u32, u32)) -> Result<(), InferenceError> {
        let n = input.0 as usize * input.1 as usize;
        self.visited = vec![false; n];
        self.stack.reserve(n.min(1 << 16));
        Ok(())
    }

    fn infer(&mut self, tensor: &Tensor) -> Result<RawOutputTensor, InferenceError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let (w, h) = (tensor.width as usize, tensor.height as usize);
        if tensor.channels == 0 || w == 0 || h == 0 {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![3, h, w],
                actual: vec![tensor.channels as usize, h, w],
            });
        }
        self.visited.clear();
        self.visited.resize(w * h, false);

        let mut boxes = Vec::new();
        for start in 0..w * h {
            if self.visited[start] || !self.is_bright(tensor, start % w, start / w) {
                continue;
            }

            // 4-连通 flood fill
            let (mut x0, mut y0, mut x1, mut y1) = (usize::MAX, usize::MAX, 0, 0);
            let mut area = 0;
            self.visited[start] = true;
            self.stack.clear();
            self.stack.push(start);
            while let Some(p) = self.stack.pop() {
                let (x, y) = (p % w, p / w);
                area += 1;
                x0 = x0.min(x);
                y0 = y0.min(y);
                x1 = x1.max(x);
                y1 = y1.max(y);

                let visit = |q: usize, this: &mut Self| {
                    if !this.visited[q] && this.is_bright(tensor, q % w, q / w) {
                        this.visited[q] = true;
                        this.stack.push(q);
                    }
                };
                if x > 0 {
                    visit(p - 1, self);
                }
                if x + 1 < w {
                    visit(p + 1, self);
                }
                if y > 0 {
                    visit(p - w, self);
                }
                if y + 1 < h {
                    visit(p + w, self);
                }
            }

            if area >= self.min_area {
                let bw = (x1 - x0 + 1) as f32;
                let bh = (y1 - y0 + 1) as f32;
                boxes.push(ScriptedBox::new(
                    x0 as f32 + bw / 2.0,
                    y0 as f32 + bh / 2.0,
                    bw,
                    bh,
                    0.9,
                    self.class_id,
                ));
            }
        }

        Ok(rows_tensor(&boxes, self.num_classes))
    }
}
