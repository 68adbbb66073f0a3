//! Letterbox 变换
//! 等比缩放 + 居中填充, 把任意尺寸的帧放进固定大小的模型输入

/// 一帧的 letterbox 参数, 预处理和后处理共用同一份
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub new_width: u32,  // 缩放后内容宽度
    pub new_height: u32, // 缩放后内容高度
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_width: u32,
    pub target_height: u32,
}

impl Letterbox {
    pub fn new(frame_width: u32, frame_height: u32, target_width: u32, target_height: u32) -> Self {
        let fw = frame_width.max(1) as f32;
        let fh = frame_height.max(1) as f32;
        let scale = (target_width as f32 / fw).min(target_height as f32 / fh);

        let new_width = ((fw * scale) as u32).clamp(1, target_width.max(1));
        let new_height = ((fh * scale) as u32).clamp(1, target_height.max(1));
        let pad_x = ((target_width - new_width) / 2) as f32;
        let pad_y = ((target_height - new_height) / 2) as f32;

        Self {
            scale,
            pad_x,
            pad_y,
            new_width,
            new_height,
            frame_width,
            frame_height,
            target_width,
            target_height,
        }
    }

    /// 模型输入坐标 → 原始帧像素坐标
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    /// 原始帧像素坐标 → 模型输入坐标
    pub fn to_model(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.pad_x, y * self.scale + self.pad_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_frame_pads_vertically() {
        let lb = Letterbox::new(1280, 720, 640, 640);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!((lb.new_width, lb.new_height), (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 140.0));
    }

    #[test]
    fn test_tall_frame_pads_horizontally() {
        let lb = Letterbox::new(480, 640, 640, 640);
        assert_eq!((lb.new_width, lb.new_height), (480, 640));
        assert_eq!((lb.pad_x, lb.pad_y), (80.0, 0.0));
    }

    #[test]
    fn test_inverse_mapping() {
        let lb = Letterbox::new(1920, 1080, 640, 640);
        let (mx, my) = lb.to_model(960.0, 540.0);
        let (fx, fy) = lb.to_frame(mx, my);
        assert!((fx - 960.0).abs() < 1e-3);
        assert!((fy - 540.0).abs() < 1e-3);
    }
}
