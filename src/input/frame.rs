//! 原始像素帧 (视频源 → 采集阶段)

use std::time::Duration;

use crate::error::{PipelineError, Result};

/// 像素格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Bgr8,
    Bgra8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// 读取一个像素为 RGB
    #[inline]
    pub fn to_rgb(&self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => [px[0], px[1], px[2]],
            PixelFormat::Bgr8 | PixelFormat::Bgra8 => [px[2], px[1], px[0]],
            PixelFormat::Gray8 => [px[0], px[0], px[0]],
        }
    }
}

/// 视频源产生的原始帧
#[derive(Clone, Debug)]
pub struct RawPixelData {
    pub width: u32,
    pub height: u32,
    pub stride: usize, // 每行字节数 (可能含对齐填充)
    pub pixel_format: PixelFormat,
    pub bytes: Vec<u8>,
    pub timestamp: Duration, // 相对流起点的时间戳
}

impl RawPixelData {
    /// 紧密排列的帧 (stride = width * bpp)
    pub fn packed(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        bytes: Vec<u8>,
        timestamp: Duration,
    ) -> Self {
        Self {
            width,
            height,
            stride: width as usize * pixel_format.bytes_per_pixel(),
            pixel_format,
            bytes,
            timestamp,
        }
    }

    /// 至少需要的字节数: 最后一行不要求完整 stride
    pub fn required_bytes(&self) -> usize {
        if self.height == 0 {
            return 0;
        }
        self.stride * (self.height as usize - 1)
            + self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// 检查帧是否完整
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::FrameDecode(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let row = self.width as usize * self.pixel_format.bytes_per_pixel();
        if self.stride < row {
            return Err(PipelineError::FrameDecode(format!(
                "stride {} shorter than row {}",
                self.stride, row
            )));
        }
        if self.bytes.len() < self.required_bytes() {
            return Err(PipelineError::FrameDecode(format!(
                "truncated frame: {} bytes, need {}",
                self.bytes.len(),
                self.required_bytes()
            )));
        }
        Ok(())
    }
}
