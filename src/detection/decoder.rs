//! 检测后处理: 原始输出张量 → 检测框
//!
//! 支持两种输出布局:
//! - 逐框行 `[N, 4+1+C]` (带 objectness)
//! - 转置布局 `[4+C, N]` (仅类别分数)
//!
//! 前置的 batch 维度 (大小为1) 会被剥离。

use ndarray::{ArrayView2, Axis, Ix2};
use tracing::debug;

use super::nms::non_max_suppression;
use super::types::{Detection, Rect};
use crate::config::PipelineConfig;
use crate::inference::RawOutputTensor;
use crate::preprocess::Letterbox;

const CXYWH_OFFSET: usize = 4;

/// 输出坐标所在空间
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoordinateSpace {
    /// 模型输入像素坐标 (YOLOv8 默认)
    #[default]
    ModelPixels,
    /// 相对模型输入归一化到 [0,1]
    Normalized,
}

/// 识别出的张量布局
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputLayout {
    /// 每行一个候选框
    Rows { objectness: bool },
    /// 每列一个候选框
    Transposed { objectness: bool },
}

impl OutputLayout {
    fn objectness(&self) -> bool {
        match *self {
            OutputLayout::Rows { objectness } | OutputLayout::Transposed { objectness } => {
                objectness
            }
        }
    }
}

/// 解码参数
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub max_detections: usize,
    /// 已知类别数时用于精确判断布局
    pub num_classes: Option<usize>,
    pub coordinates: CoordinateSpace,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl DecodeParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            nms_threshold: config.nms_threshold,
            max_detections: config.max_detections,
            num_classes: (config.num_classes > 0).then_some(config.num_classes),
            coordinates: CoordinateSpace::ModelPixels,
        }
    }
}

/// 根据二维形状判断布局
///
/// 按 4+C / 5+C 精确匹配。类别数未知时 `[N, 5+C]` 与 `[4+C, N]`
/// 无法区分, 返回 None。
pub fn detect_layout(
    rows: usize,
    cols: usize,
    num_classes: Option<usize>,
) -> Option<OutputLayout> {
    if rows == 0 || cols == 0 {
        return None;
    }
    match num_classes {
        Some(nc) if nc > 0 => {
            if cols == CXYWH_OFFSET + 1 + nc {
                Some(OutputLayout::Rows { objectness: true })
            } else if cols == CXYWH_OFFSET + nc {
                Some(OutputLayout::Rows { objectness: false })
            } else if rows == CXYWH_OFFSET + nc {
                Some(OutputLayout::Transposed { objectness: false })
            } else if rows == CXYWH_OFFSET + 1 + nc {
                Some(OutputLayout::Transposed { objectness: true })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// 剥离 batch 维度, 得到二维视图
fn as_matrix(output: &RawOutputTensor) -> Option<ArrayView2<'_, f32>> {
    let mut view = output.view();
    while view.ndim() > 2 {
        if view.shape()[0] != 1 {
            return None;
        }
        view = view.index_axis_move(Axis(0), 0);
    }
    view.into_dimensionality::<Ix2>().ok()
}

/// 解码候选框 (不含 NMS)
///
/// 空张量或无法识别的形状返回空列表。
pub fn decode(
    output: &RawOutputTensor,
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Vec<Detection> {
    let Some(matrix) = as_matrix(output) else {
        debug!(shape = ?output.shape(), "无法识别的输出张量维度");
        return Vec::new();
    };
    let (rows, cols) = matrix.dim();
    let Some(layout) = detect_layout(rows, cols, params.num_classes) else {
        debug!(rows, cols, "无法识别的输出张量布局");
        return Vec::new();
    };

    // 统一成每行一个候选框
    let preds = match layout {
        OutputLayout::Rows { .. } => matrix,
        OutputLayout::Transposed { .. } => matrix.reversed_axes(),
    };
    let class_offset = if layout.objectness() {
        CXYWH_OFFSET + 1
    } else {
        CXYWH_OFFSET
    };
    if preds.ncols() <= class_offset {
        return Vec::new();
    }

    let (sx, sy) = match params.coordinates {
        CoordinateSpace::ModelPixels => (1.0, 1.0),
        CoordinateSpace::Normalized => (
            letterbox.target_width as f32,
            letterbox.target_height as f32,
        ),
    };
    let frame_w = letterbox.frame_width as f32;
    let frame_h = letterbox.frame_height as f32;

    let mut ys = Vec::new();
    for pred in preds.axis_iter(Axis(0)) {
        let Some((id, max_score)) = pred
            .iter()
            .skip(class_offset)
            .copied()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };

        let confidence = if layout.objectness() {
            pred[CXYWH_OFFSET] * max_score
        } else {
            max_score
        };
        if !confidence.is_finite() || confidence < params.confidence_threshold {
            continue;
        }

        let cx = pred[0] * sx;
        let cy = pred[1] * sy;
        let w = pred[2] * sx;
        let h = pred[3] * sy;
        let (x1, y1) = letterbox.to_frame(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_frame(cx + w / 2.0, cy + h / 2.0);

        let bbox = Rect::new(x1, y1, x2 - x1, y2 - y1).clip(frame_w, frame_h);
        if bbox.area() <= 0.0 || !bbox.area().is_finite() {
            continue;
        }

        ys.push(Detection::new(bbox, confidence.min(1.0), id as i32));
    }
    ys
}

/// 解码 + 置信度过滤 + NMS
pub fn postprocess(
    output: &RawOutputTensor,
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Vec<Detection> {
    let mut ys = decode(output, letterbox, params);
    non_max_suppression(&mut ys, params.nms_threshold, params.max_detections);
    ys
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3, ArrayD, IxDyn};

    fn params(conf: f32, num_classes: usize) -> DecodeParams {
        DecodeParams {
            confidence_threshold: conf,
            nms_threshold: 0.4,
            max_detections: 100,
            num_classes: Some(num_classes),
            coordinates: CoordinateSpace::ModelPixels,
        }
    }

    fn identity() -> Letterbox {
        Letterbox::new(640, 640, 640, 640)
    }

    /// 构造 [N, 5+C] 行张量
    fn rows(boxes: &[([f32; 4], f32, Vec<f32>)]) -> RawOutputTensor {
        let c = boxes[0].2.len();
        let mut a = Array2::<f32>::zeros((boxes.len(), 5 + c));
        for (i, (b, obj, cls)) in boxes.iter().enumerate() {
            for k in 0..4 {
                a[[i, k]] = b[k];
            }
            a[[i, 4]] = *obj;
            for (j, s) in cls.iter().enumerate() {
                a[[i, 5 + j]] = *s;
            }
        }
        a.into_dyn()
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(
            detect_layout(8400, 85, Some(80)),
            Some(OutputLayout::Rows { objectness: true })
        );
        assert_eq!(
            detect_layout(84, 8400, Some(80)),
            Some(OutputLayout::Transposed { objectness: false })
        );
        assert_eq!(
            detect_layout(10, 84, Some(80)),
            Some(OutputLayout::Rows { objectness: false })
        );
        assert_eq!(detect_layout(10, 7, Some(80)), None);
        assert_eq!(detect_layout(0, 85, Some(80)), None);
        // 类别数未知时不猜测
        assert_eq!(detect_layout(84, 8400, None), None);
        assert_eq!(detect_layout(10, 85, None), None);
        assert_eq!(detect_layout(10, 85, Some(0)), None);
    }

    #[test]
    fn test_few_rows_are_not_read_as_transposed() {
        // 5 个框, C=1: [5, 6], 行数少于列数
        let boxes: Vec<([f32; 4], f32, Vec<f32>)> = (0..5)
            .map(|i| ([40.0 + 120.0 * i as f32, 320.0, 30.0, 30.0], 1.0, vec![0.9]))
            .collect();
        let t = rows(&boxes);
        assert_eq!(t.shape(), &[5, 6]);
        assert_eq!(
            detect_layout(5, 6, Some(1)),
            Some(OutputLayout::Rows { objectness: true })
        );
        let ys = decode(&t, &identity(), &params(0.5, 1));
        assert_eq!(ys.len(), 5);
        assert!(ys.iter().all(|d| d.class_id == 0 && (d.confidence - 0.9).abs() < 1e-6));

        // 10 个框, C=80: [10, 85]
        let boxes: Vec<([f32; 4], f32, Vec<f32>)> = (0..10)
            .map(|i| {
                let mut cls = vec![0.0; 80];
                cls[i * 7] = 0.8;
                ([32.0 + 60.0 * i as f32, 100.0, 20.0, 20.0], 1.0, cls)
            })
            .collect();
        let t = rows(&boxes);
        assert_eq!(t.shape(), &[10, 85]);
        let ys = decode(&t, &identity(), &params(0.5, 80));
        assert_eq!(ys.len(), 10);
        let mut ids: Vec<i32> = ys.iter().map(|d| d.class_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..10).map(|i| i * 7).collect::<Vec<i32>>());

        // 类别数未知: 空结果而不是错误解码
        let mut unknown = params(0.5, 80);
        unknown.num_classes = None;
        assert!(decode(&t, &identity(), &unknown).is_empty());
    }

    #[test]
    fn test_decode_rows_with_objectness() {
        let t = rows(&[
            ([320.0, 320.0, 100.0, 50.0], 0.9, vec![0.1, 0.8]),
            ([100.0, 100.0, 20.0, 20.0], 0.5, vec![0.6, 0.2]), // 0.3 < 0.5
        ]);
        let ys = decode(&t, &identity(), &params(0.5, 2));
        assert_eq!(ys.len(), 1);
        let d = &ys[0];
        assert_eq!(d.class_id, 1);
        assert!((d.confidence - 0.72).abs() < 1e-6);
        assert_eq!(d.bbox, Rect::new(270.0, 295.0, 100.0, 50.0));
        assert_eq!(d.class_name, "bicycle");
    }

    #[test]
    fn test_decode_transposed_layout() {
        // [4+C, N], C=3, N=2
        let mut a = Array2::<f32>::zeros((7, 2));
        let cols = [[320.0, 320.0, 64.0, 64.0, 0.1, 0.2, 0.95], [10.0, 10.0, 4.0, 4.0, 0.2, 0.1, 0.1]];
        for (n, col) in cols.iter().enumerate() {
            for (k, v) in col.iter().enumerate() {
                a[[k, n]] = *v;
            }
        }
        let p = params(0.5, 3);
        let ys = decode(&a.into_dyn(), &identity(), &p);
        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].class_id, 2);
        assert!((ys[0].confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_batch_dimension_is_stripped() {
        let mut a = Array3::<f32>::zeros((1, 2, 6));
        a[[0, 0, 0]] = 320.0;
        a[[0, 0, 1]] = 320.0;
        a[[0, 0, 2]] = 40.0;
        a[[0, 0, 3]] = 40.0;
        a[[0, 0, 4]] = 1.0;
        a[[0, 0, 5]] = 0.9;
        let ys = decode(&a.into_dyn(), &identity(), &params(0.5, 1));
        assert_eq!(ys.len(), 1);
    }

    #[test]
    fn test_letterbox_inverse_and_clip() {
        // 1280x720 → 640x640: scale 0.5, pad_y 140
        let lb = Letterbox::new(1280, 720, 640, 640);
        let t = rows(&[
            ([320.0, 320.0, 100.0, 100.0], 1.0, vec![0.9]),
            ([630.0, 320.0, 40.0, 40.0], 1.0, vec![0.9]), // 右侧越界
        ]);
        let ys = decode(&t, &lb, &params(0.5, 1));
        assert_eq!(ys.len(), 2);
        assert_eq!(ys[0].bbox, Rect::new(540.0, 260.0, 200.0, 200.0));
        assert!((ys[1].bbox.x2() - 1280.0).abs() < 1e-3);
        assert!((ys[1].bbox.w - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_box_in_padding_is_discarded() {
        let lb = Letterbox::new(1280, 720, 640, 640);
        // 完全落在上方填充区域
        let t = rows(&[([320.0, 50.0, 100.0, 40.0], 1.0, vec![0.9])]);
        assert!(decode(&t, &lb, &params(0.5, 1)).is_empty());
    }

    #[test]
    fn test_normalized_coordinates() {
        let mut p = params(0.5, 1);
        p.coordinates = CoordinateSpace::Normalized;
        let t = rows(&[([0.5, 0.5, 0.25, 0.25], 1.0, vec![0.9])]);
        let ys = decode(&t, &identity(), &p);
        assert_eq!(ys[0].bbox, Rect::new(240.0, 240.0, 160.0, 160.0));
    }

    #[test]
    fn test_malformed_returns_empty() {
        let lb = identity();
        let empty = ArrayD::<f32>::zeros(IxDyn(&[0, 85]));
        assert!(decode(&empty, &lb, &params(0.1, 80)).is_empty());
        let batch2 = ArrayD::<f32>::zeros(IxDyn(&[2, 10, 85]));
        assert!(decode(&batch2, &lb, &params(0.1, 80)).is_empty());
        let flat = ArrayD::<f32>::zeros(IxDyn(&[85]));
        assert!(decode(&flat, &lb, &params(0.1, 80)).is_empty());
    }

    #[test]
    fn test_postprocess_applies_nms() {
        let t = rows(&[
            ([320.0, 320.0, 100.0, 100.0], 1.0, vec![0.9, 0.0]),
            ([325.0, 325.0, 100.0, 100.0], 1.0, vec![0.8, 0.0]),
            ([325.0, 325.0, 100.0, 100.0], 1.0, vec![0.0, 0.7]),
        ]);
        let ys = postprocess(&t, &identity(), &params(0.5, 2));
        assert_eq!(ys.len(), 2);
        assert_eq!(ys[0].class_id, 0);
        assert_eq!(ys[1].class_id, 1);
    }
}
