/// 检测系统 (Detection System)
///
/// 推理输出后处理
/// - decoder: 原始张量 → 候选框 (两种布局, letterbox 逆变换)
/// - nms:     同类别非极大值抑制
/// - types:   检测框与类别名
pub mod decoder;
pub mod nms;
pub mod types;

pub use decoder::{decode, detect_layout, postprocess, CoordinateSpace, DecodeParams, OutputLayout};
pub use nms::non_max_suppression;
pub use types::{class_name, Detection, Rect, COCO_CLASSES};
