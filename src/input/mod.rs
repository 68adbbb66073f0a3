/// 视频输入系统 (Video Input System)
///
/// 采集阶段只依赖 `FrameSource` 接口, 具体的摄像头/文件解码由外部实现
/// - ChannelFrameSource: 回调式采集 → 有界通道
/// - ImageFolderSource:  图片目录
/// - SyntheticSource:    合成运动目标
pub mod channel;
pub mod folder;
pub mod frame;
pub mod synthetic;

pub use channel::{ChannelFrameSource, FrameSender};
pub use folder::ImageFolderSource;
pub use frame::{PixelFormat, RawPixelData};
pub use synthetic::{SyntheticObject, SyntheticSource};

use std::time::{Duration, Instant};

/// 一次取帧的结果
#[derive(Debug)]
pub enum SourcePoll {
    Frame(RawPixelData),
    /// 暂时没有新帧 (摄像头), 稍后重试
    Pending,
    /// 当前帧损坏, 跳过
    Corrupt(String),
    /// 流结束 (文件播放完毕)
    EndOfStream,
}

/// 视频源接口
pub trait FrameSource: Send {
    /// 非阻塞取帧
    fn next_frame(&mut self) -> SourcePoll;
}

/// 按固定帧率放行, 不阻塞
#[derive(Clone, Debug)]
pub struct FramePacer {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl FramePacer {
    pub fn unlimited() -> Self {
        Self {
            interval: None,
            next_due: None,
        }
    }

    pub fn with_fps(fps: u32) -> Self {
        Self {
            interval: (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64)),
            next_due: None,
        }
    }

    /// 到达下一帧时间时返回 true 并推进计时
    pub fn ready(&mut self) -> bool {
        let Some(interval) = self.interval else {
            return true;
        };
        let now = Instant::now();
        match self.next_due {
            Some(due) if now < due => false,
            Some(due) => {
                // 落后太多时不追帧
                let next = due + interval;
                self.next_due = Some(if next < now { now + interval } else { next });
                true
            }
            None => {
                self.next_due = Some(now + interval);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_unlimited() {
        let mut pacer = FramePacer::unlimited();
        assert!(pacer.ready());
        assert!(pacer.ready());
    }

    #[test]
    fn test_pacer_limits_rate() {
        let mut pacer = FramePacer::with_fps(10);
        assert!(pacer.ready());
        assert!(!pacer.ready());
        std::thread::sleep(Duration::from_millis(110));
        assert!(pacer.ready());
    }
}
