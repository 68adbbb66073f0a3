/// 检测系统数据结构定义
/// Data structures for the detection stage

// ========== 公共常量 ==========

/// COCO 80 类名称
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// 类别ID → 名称, 越界时返回 "unknown"
pub fn class_name(class_id: i32) -> &'static str {
    usize::try_from(class_id)
        .ok()
        .and_then(|i| COCO_CLASSES.get(i))
        .copied()
        .unwrap_or("unknown")
}

// ========== 数据结构 ==========

/// 像素坐标矩形 (左上角 + 宽高)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// 由中心点和宽高构造
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    pub fn x2(&self) -> f32 {
        self.x + self.w
    }

    pub fn y2(&self) -> f32 {
        self.y + self.h
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let l = self.x.max(other.x);
        let t = self.y.max(other.y);
        let r = self.x2().min(other.x2());
        let b = self.y2().min(other.y2());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    /// 交并比; 不相交时为 0
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = self.intersection_area(other);
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// 裁剪到 [0, width) x [0, height)
    pub fn clip(&self, width: f32, height: f32) -> Rect {
        let x1 = self.x.clamp(0.0, width);
        let y1 = self.y.clamp(0.0, height);
        let x2 = self.x2().clamp(0.0, width);
        let y2 = self.y2().clamp(0.0, height);
        Rect::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }
}

/// 检测结果 (检测阶段 → 跟踪阶段)
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: Rect,
    pub confidence: f32,
    pub class_id: i32,
    pub class_name: String,
}

impl Detection {
    pub fn new(bbox: Rect, confidence: f32, class_id: i32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name(class_id).to_string(),
        }
    }
}
