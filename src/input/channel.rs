//! 回调式采集 → 有界通道
//!
//! 采集回调所在线程通过 `FrameSender` 推帧, 采集阶段从 `ChannelFrameSource` 取帧,
//! 两边线程互不阻塞。

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

use super::{FrameSource, RawPixelData, SourcePoll};

/// 采集回调持有的发送端
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<RawPixelData>,
}

impl FrameSender {
    /// 非阻塞推帧; 通道满时丢弃当前帧并返回 false
    pub fn push(&self, frame: RawPixelData) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// 通道视频源; 所有发送端 drop 后视为流结束
pub struct ChannelFrameSource {
    rx: Receiver<RawPixelData>,
}

impl ChannelFrameSource {
    pub fn new(capacity: usize) -> (FrameSender, Self) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (FrameSender { tx }, Self { rx })
    }
}

impl FrameSource for ChannelFrameSource {
    fn next_frame(&mut self) -> SourcePoll {
        match self.rx.try_recv() {
            Ok(frame) => SourcePoll::Frame(frame),
            Err(TryRecvError::Empty) => SourcePoll::Pending,
            Err(TryRecvError::Disconnected) => SourcePoll::EndOfStream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::PixelFormat;
    use std::time::Duration;

    fn frame() -> RawPixelData {
        RawPixelData::packed(2, 2, PixelFormat::Gray8, vec![0; 4], Duration::ZERO)
    }

    #[test]
    fn test_pending_then_frame_then_end() {
        let (tx, mut source) = ChannelFrameSource::new(2);
        assert!(matches!(source.next_frame(), SourcePoll::Pending));
        assert!(tx.push(frame()));
        assert!(matches!(source.next_frame(), SourcePoll::Frame(_)));
        drop(tx);
        assert!(matches!(source.next_frame(), SourcePoll::EndOfStream));
    }

    #[test]
    fn test_full_channel_drops_newest() {
        let (tx, _source) = ChannelFrameSource::new(1);
        assert!(tx.push(frame()));
        assert!(!tx.push(frame()));
    }
}
