//! 图片目录视频源
//!
//! 按文件名顺序读取目录下的图片, 每张图片作为一帧。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use super::{FramePacer, FrameSource, PixelFormat, RawPixelData, SourcePoll};
use crate::error::{PipelineError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub struct ImageFolderSource {
    files: Vec<PathBuf>,
    cursor: usize,
    produced: u64, // 已输出帧数, 循环播放时继续累加
    looping: bool,
    pacer: FramePacer,
    frame_interval: Duration,
}

impl ImageFolderSource {
    /// 打开目录; 目录不存在或没有图片时返回初始化错误
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| {
                PipelineError::Initialization(format!("cannot open {}: {e}", dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(PipelineError::Initialization(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        info!("📂 图片目录: {} ({} 张)", dir.display(), files.len());

        Ok(Self {
            files,
            cursor: 0,
            produced: 0,
            looping: false,
            pacer: FramePacer::unlimited(),
            frame_interval: Duration::from_millis(33),
        })
    }

    /// 播放完毕后从头开始
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// 限制输出帧率
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.pacer = FramePacer::with_fps(fps);
        if fps > 0 {
            self.frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageFolderSource {
    fn next_frame(&mut self) -> SourcePoll {
        if self.cursor >= self.files.len() {
            if !self.looping {
                return SourcePoll::EndOfStream;
            }
            self.cursor = 0;
        }
        if !self.pacer.ready() {
            return SourcePoll::Pending;
        }

        let index = self.cursor;
        self.cursor += 1;
        let path = &self.files[index];
        let timestamp = self.frame_interval * self.produced as u32;
        self.produced += 1;

        match image::open(path) {
            Ok(img) => {
                let rgb = img.into_rgb8();
                let (width, height) = rgb.dimensions();
                SourcePoll::Frame(RawPixelData::packed(
                    width,
                    height,
                    PixelFormat::Rgb8,
                    rgb.into_raw(),
                    timestamp,
                ))
            }
            Err(e) => {
                warn!("❌ 图片读取失败 {}: {}", path.display(), e);
                SourcePoll::Corrupt(format!("{}: {e}", path.display()))
            }
        }
    }
}
