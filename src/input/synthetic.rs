//! 合成视频源: 深色背景上匀速运动的亮色方块
//! 用于演示和端到端测试, 不依赖摄像头或视频文件

use std::time::Duration;

use super::{FramePacer, FrameSource, PixelFormat, RawPixelData, SourcePoll};

const BACKGROUND: u8 = 24;
const FOREGROUND: u8 = 255;

/// 合成目标 (像素坐标, 像素/帧)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SyntheticObject {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub vx: f32,
    pub vy: f32,
}

impl SyntheticObject {
    pub fn new(x: f32, y: f32, w: f32, h: f32, vx: f32, vy: f32) -> Self {
        Self { x, y, w, h, vx, vy }
    }

    /// 前进一帧, 碰到边界反弹
    fn advance(&mut self, width: f32, height: f32) {
        self.x += self.vx;
        self.y += self.vy;
        if self.x < 0.0 || self.x + self.w > width {
            self.vx = -self.vx;
            self.x = self.x.clamp(0.0, (width - self.w).max(0.0));
        }
        if self.y < 0.0 || self.y + self.h > height {
            self.vy = -self.vy;
            self.y = self.y.clamp(0.0, (height - self.h).max(0.0));
        }
    }
}

pub struct SyntheticSource {
    width: u32,
    height: u32,
    objects: Vec<SyntheticObject>,
    total_frames: Option<u64>,
    produced: u64,
    pacer: FramePacer,
    frame_interval: Duration,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, objects: Vec<SyntheticObject>) -> Self {
        Self {
            width,
            height,
            objects,
            total_frames: None,
            produced: 0,
            pacer: FramePacer::unlimited(),
            frame_interval: Duration::from_millis(20),
        }
    }

    /// 生成 n 帧后结束
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.total_frames = Some(frames);
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.pacer = FramePacer::with_fps(fps);
        if fps > 0 {
            self.frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
        }
        self
    }

    pub fn objects(&self) -> &[SyntheticObject] {
        &self.objects
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut bytes = vec![BACKGROUND; w * h * 3];
        for obj in &self.objects {
            let x0 = obj.x.max(0.0) as usize;
            let y0 = obj.y.max(0.0) as usize;
            let x1 = ((obj.x + obj.w).max(0.0) as usize).min(w);
            let y1 = ((obj.y + obj.h).max(0.0) as usize).min(h);
            // 完全在画面外
            if x0 >= x1 || y0 >= y1 {
                continue;
            }
            for y in y0..y1 {
                bytes[(y * w + x0) * 3..(y * w + x1) * 3].fill(FOREGROUND);
            }
        }
        bytes
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> SourcePoll {
        if self.total_frames.is_some_and(|n| self.produced >= n) {
            return SourcePoll::EndOfStream;
        }
        if !self.pacer.ready() {
            return SourcePoll::Pending;
        }

        let bytes = self.render();
        let timestamp = self.frame_interval * self.produced as u32;
        self.produced += 1;

        let (fw, fh) = (self.width as f32, self.height as f32);
        for obj in &mut self.objects {
            obj.advance(fw, fh);
        }

        SourcePoll::Frame(RawPixelData::packed(
            self.width,
            self.height,
            PixelFormat::Rgb8,
            bytes,
            timestamp,
        ))
    }
}
