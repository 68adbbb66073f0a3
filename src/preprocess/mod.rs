/// 预处理 (Preprocess)
///
/// 原始帧 → letterbox 缩放 → 归一化 NCHW f32 张量
/// - 行跨度 (stride) 与像素格式在这里统一成紧密 RGB
/// - 缩放使用 fast_image_resize, 目标图像跨帧复用
/// - 张量直接写入内存池借出的块, 不做额外分配
pub mod letterbox;

pub use letterbox::Letterbox;

use fast_image_resize as fr;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::input::PixelFormat;
use crate::memory::PooledBuffer;
use crate::pipeline::RawFrame;

/// 输出通道数 (RGB)
pub const TENSOR_CHANNELS: usize = 3;

pub struct Preprocessor {
    resizer: fr::Resizer,
    options: fr::ResizeOptions,
    rgb: Vec<u8>,                                // 紧密 RGB 暂存
    resized: Option<fr::images::Image<'static>>, // 缩放结果, 尺寸不变时复用
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            resizer: fr::Resizer::new(),
            options: fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            rgb: Vec::new(),
            resized: None,
        }
    }

    /// 缩放算法 (默认 Bilinear)
    pub fn with_algorithm(mut self, alg: fr::ResizeAlg) -> Self {
        self.options = fr::ResizeOptions::new().resize_alg(alg);
        self
    }

    /// 把一帧写成模型输入张量, 返回本帧的 letterbox 参数
    ///
    /// `out` 的有效长度被设置为 `target_w * target_h * 3 * 4` 字节。
    pub fn run(
        &mut self,
        frame: &RawFrame,
        out: &mut PooledBuffer,
        config: &PipelineConfig,
    ) -> Result<Letterbox> {
        let (tw, th) = (config.target_width, config.target_height);
        let needed = tensor_bytes(tw, th);
        if out.capacity() < needed {
            return Err(PipelineError::BufferExhausted { requested: needed });
        }

        let lb = Letterbox::new(frame.width, frame.height, tw, th);
        self.pack_rgb(frame)?;
        let (nw, nh) = (lb.new_width, lb.new_height);

        // 1. Resize: 原始分辨率 → letterbox 内容尺寸
        let src = fr::images::ImageRef::new(frame.width, frame.height, &self.rgb, fr::PixelType::U8x3)
            .map_err(|e| PipelineError::FrameDecode(format!("source image: {e}")))?;
        let reuse = self
            .resized
            .as_ref()
            .is_some_and(|img| img.width() == nw && img.height() == nh);
        if !reuse {
            self.resized = Some(fr::images::Image::new(nw, nh, fr::PixelType::U8x3));
        }
        let Some(dst) = self.resized.as_mut() else {
            return Err(PipelineError::InvalidState("resize target missing"));
        };
        self.resizer
            .resize(&src, dst, &self.options)
            .map_err(|e| PipelineError::FrameDecode(format!("resize: {e}")))?;

        // 2. 填充 + 归一化 → NCHW
        out.set_len(needed);
        let tensor = out.as_mut_slice();
        let pad = config.pad_value.to_ne_bytes();
        for chunk in tensor.chunks_exact_mut(4) {
            chunk.copy_from_slice(&pad);
        }

        let plane = tw as usize * th as usize;
        let (px, py) = (lb.pad_x as usize, lb.pad_y as usize);
        let pixels = dst.buffer();
        for y in 0..nh as usize {
            let row = &pixels[y * nw as usize * 3..(y + 1) * nw as usize * 3];
            let base = (y + py) * tw as usize + px;
            for (x, rgb) in row.chunks_exact(3).enumerate() {
                for (c, &v) in rgb.iter().enumerate() {
                    let offset = (c * plane + base + x) * 4;
                    tensor[offset..offset + 4].copy_from_slice(&(v as f32 / 255.0).to_ne_bytes());
                }
            }
        }

        Ok(lb)
    }

    /// 按 stride 读取并转换成紧密 RGB
    fn pack_rgb(&mut self, frame: &RawFrame) -> Result<()> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        let bpp = frame.pixel_format.bytes_per_pixel();
        let row_bytes = w * bpp;
        let data = frame.buffer.as_slice();
        if w == 0 || h == 0 || frame.stride < row_bytes {
            return Err(PipelineError::FrameDecode(format!(
                "bad geometry {}x{} stride {}",
                w, h, frame.stride
            )));
        }
        if data.len() < frame.stride * (h - 1) + row_bytes {
            return Err(PipelineError::FrameDecode(format!(
                "truncated frame: {} bytes",
                data.len()
            )));
        }

        self.rgb.clear();
        self.rgb.reserve(w * h * 3);
        if frame.pixel_format == PixelFormat::Rgb8 && frame.stride == row_bytes {
            self.rgb.extend_from_slice(&data[..w * h * 3]);
            return Ok(());
        }
        for y in 0..h {
            let row = &data[y * frame.stride..y * frame.stride + row_bytes];
            for px in row.chunks_exact(bpp) {
                self.rgb.extend_from_slice(&frame.pixel_format.to_rgb(px));
            }
        }
        Ok(())
    }
}

/// 张量字节数 (3 通道 f32)
pub fn tensor_bytes(width: u32, height: u32) -> usize {
    width as usize * height as usize * TENSOR_CHANNELS * std::mem::size_of::<f32>()
}
