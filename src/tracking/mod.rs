/// 目标跟踪 (Tracking)
///
/// - track:   轨迹记录 + 线性运动模型 (predict / update)
/// - tracker: IOU 贪心关联, 轨迹生命周期管理
pub mod track;
pub mod tracker;

pub use track::{predict, update, Track, Vec2, TRAIL_LEN, VELOCITY_ALPHA};
pub use tracker::{TrackedObject, Tracker, TrackerSettings};
