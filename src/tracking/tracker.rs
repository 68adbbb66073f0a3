//! 多目标跟踪器
//! IOU greedy multi-object tracker
//!
//! 每帧流程:
//! 1. 所有轨迹先预测
//! 2. IOU 矩阵 + 贪心匹配 (按轨迹创建顺序)
//! 3. 更新已匹配轨迹
//! 4. 未匹配检测 → 新建轨迹
//! 5. 删除丢失太久的轨迹
//! 6. 输出已确认轨迹的快照

use tracing::debug;

use super::track::{predict, update, Track, Vec2};
use crate::detection::{Detection, Rect};

/// 跟踪器参数
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerSettings {
    pub max_disappeared: u32,
    pub min_hits: u32,
    pub iou_threshold: f32,
    pub max_tracks: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_disappeared: 30,
            min_hits: 3,
            iou_threshold: 0.3,
            max_tracks: 50,
        }
    }
}

/// 已确认轨迹的只读快照 (跟踪模块 → 结果消费者)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedObject {
    pub id: u32,
    pub class_id: i32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: Rect,
    pub center: Vec2,
    pub velocity: Vec2,
    pub age: u32,
    pub total_hits: u32,
    pub time_since_update: u32,
    pub trail: Vec<Vec2>,
}

impl From<&Track> for TrackedObject {
    fn from(t: &Track) -> Self {
        Self {
            id: t.id,
            class_id: t.class_id,
            class_name: t.class_name.clone(),
            confidence: t.confidence,
            bbox: t.bbox,
            center: t.center,
            velocity: t.velocity,
            age: t.age,
            total_hits: t.total_hits,
            time_since_update: t.time_since_update,
            trail: t.trail.iter().copied().collect(),
        }
    }
}

/// IOU 贪心跟踪器
pub struct Tracker {
    /// 活跃轨迹, 按创建顺序排列
    tracks: Vec<Track>,

    /// 下一个分配的ID
    next_id: u32,

    settings: TrackerSettings,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl Tracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// 热更新参数, 已有轨迹保留
    pub fn set_settings(&mut self, settings: TrackerSettings) {
        self.settings = settings;
    }

    /// 处理一帧检测, 返回已确认轨迹
    pub fn step(&mut self, detections: &[Detection]) -> Vec<TrackedObject> {
        // 1. 预测
        for track in &mut self.tracks {
            predict(track);
        }

        // 2. 关联
        let matched = self.associate(detections);

        // 3. 更新已匹配轨迹
        let mut det_assigned = vec![false; detections.len()];
        for (track_idx, det_idx) in matched.iter().enumerate() {
            if let Some(det_idx) = *det_idx {
                update(&mut self.tracks[track_idx], &detections[det_idx]);
                det_assigned[det_idx] = true;
            }
        }

        // 4. 未匹配检测 → 新建轨迹
        for (det_idx, detection) in detections.iter().enumerate() {
            if det_assigned[det_idx] {
                continue;
            }
            if self.tracks.len() >= self.settings.max_tracks {
                debug!(max_tracks = self.settings.max_tracks, "轨迹数量已达上限, 忽略新检测");
                break;
            }
            self.tracks.push(Track::new(self.next_id, detection));
            self.next_id += 1;
        }

        // 5. 删除丢失太久的轨迹
        let max_disappeared = self.settings.max_disappeared;
        self.tracks
            .retain(|t| t.time_since_update <= max_disappeared);

        // 6. 输出
        self.confirmed()
    }

    /// 贪心匹配: 按轨迹顺序, 每条轨迹选取 IOU 最大且超过阈值的未分配检测。
    /// 并列时先出现的检测胜出。返回每条轨迹匹配到的检测下标。
    fn associate(&self, detections: &[Detection]) -> Vec<Option<usize>> {
        let mut matched = vec![None; self.tracks.len()];
        if self.tracks.is_empty() || detections.is_empty() {
            return matched;
        }

        let iou_matrix: Vec<Vec<f32>> = self
            .tracks
            .iter()
            .map(|t| detections.iter().map(|d| t.bbox.iou(&d.bbox)).collect())
            .collect();

        let mut det_assigned = vec![false; detections.len()];
        for (track_idx, row) in iou_matrix.iter().enumerate() {
            let mut max_iou = self.settings.iou_threshold;
            let mut best = None;
            for (det_idx, &iou) in row.iter().enumerate() {
                if !det_assigned[det_idx] && iou > max_iou {
                    max_iou = iou;
                    best = Some(det_idx);
                }
            }
            if let Some(det_idx) = best {
                det_assigned[det_idx] = true;
                matched[track_idx] = Some(det_idx);
            }
        }
        matched
    }

    /// 当前应输出的轨迹快照
    pub fn confirmed(&self) -> Vec<TrackedObject> {
        self.tracks
            .iter()
            .filter(|t| {
                t.time_since_update < self.settings.max_disappeared
                    && t.is_confirmed(self.settings.min_hits)
            })
            .map(TrackedObject::from)
            .collect()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.is_confirmed(self.settings.min_hits))
            .count()
    }

    /// 清空轨迹; ID 计数继续递增
    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32) -> Detection {
        Detection::new(Rect::new(x, y, 50.0, 50.0), 0.9, 0)
    }

    #[test]
    fn test_confirmation_at_min_hits() {
        let mut tracker = Tracker::default();
        assert!(tracker.step(&[det(100.0, 100.0)]).is_empty()); // hits 1
        assert!(tracker.step(&[det(100.0, 100.0)]).is_empty()); // hits 2
        let out = tracker.step(&[det(100.0, 100.0)]); // hits 3
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total_hits, 3);
        assert_eq!(out[0].id, 0);
    }

    #[test]
    fn test_moving_box_scenario() {
        let mut tracker = Tracker::default();
        let mut first_emitted = None;
        for frame in 0..10 {
            let out = tracker.step(&[det(100.0 + 2.0 * frame as f32, 100.0)]);
            if first_emitted.is_none() && !out.is_empty() {
                first_emitted = Some(frame + 1);
            }
        }
        assert_eq!(first_emitted, Some(3));
        assert_eq!(tracker.track_count(), 1);

        let t = &tracker.tracks()[0];
        assert_eq!(t.total_hits, 10);
        assert_eq!(t.time_since_update, 0);
        // 残差基于预测中心: pos += v; v = 0.7v + 0.3(c - pos); pos = c
        let (mut pos, mut expected) = (125.0f32, 0.0f32);
        for frame in 1..10 {
            let c = 125.0 + 2.0 * frame as f32;
            pos += expected;
            expected = 0.7 * expected + 0.3 * (c - pos);
            pos = c;
        }
        assert!((t.velocity.x - expected).abs() < 1e-4, "vx = {}", t.velocity.x);
        assert!((t.velocity.x - 1.0).abs() < 0.01, "vx = {}", t.velocity.x);
        assert!(t.velocity.y.abs() < 1e-6);
    }

    #[test]
    fn test_survives_short_occlusion() {
        let mut tracker = Tracker::default();
        for _ in 0..5 {
            tracker.step(&[det(200.0, 200.0)]);
        }
        let id = tracker.tracks()[0].id;
        for _ in 0..10 {
            let out = tracker.step(&[]);
            assert_eq!(out.len(), 1, "coasting track still emitted");
        }
        let out = tracker.step(&[det(200.0, 200.0)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, id);
        assert_eq!(out[0].time_since_update, 0);
        assert_eq!(tracker.track_count(), 1);
    }

    #[test]
    fn test_long_occlusion_spawns_new_id() {
        let mut tracker = Tracker::new(TrackerSettings {
            max_disappeared: 5,
            ..Default::default()
        });
        for _ in 0..5 {
            tracker.step(&[det(200.0, 200.0)]);
        }
        for _ in 0..7 {
            tracker.step(&[]);
        }
        assert_eq!(tracker.track_count(), 0);
        tracker.step(&[det(200.0, 200.0)]);
        assert_eq!(tracker.tracks()[0].id, 1);
    }

    #[test]
    fn test_pruned_exactly_after_max_disappeared() {
        let mut tracker = Tracker::new(TrackerSettings {
            max_disappeared: 3,
            min_hits: 1,
            ..Default::default()
        });
        tracker.step(&[det(0.0, 0.0)]);
        for expected_tsu in 1..=3 {
            tracker.step(&[]);
            assert_eq!(tracker.tracks()[0].time_since_update, expected_tsu);
        }
        // tsu == max_disappeared: 保留但不输出
        assert!(tracker.confirmed().is_empty());
        tracker.step(&[]);
        assert_eq!(tracker.track_count(), 0);
    }

    #[test]
    fn test_zero_tracks_spawns_all() {
        let mut tracker = Tracker::default();
        tracker.step(&[det(0.0, 0.0), det(300.0, 0.0), det(0.0, 300.0)]);
        let ids: Vec<u32> = tracker.tracks().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_greedy_assignment_follows_creation_order() {
        let mut tracker = Tracker::new(TrackerSettings {
            min_hits: 1,
            ..Default::default()
        });
        // 两条轨迹: A(0,0) 先创建, B(20,0)
        tracker.step(&[det(0.0, 0.0), det(20.0, 0.0)]);
        // 单个检测 (12,0) 与 B 的 IOU 更高, 但 A 先匹配
        let out = tracker.step(&[det(12.0, 0.0)]);
        let a = out.iter().find(|o| o.id == 0).unwrap();
        let b = out.iter().find(|o| o.id == 1).unwrap();
        assert_eq!(a.time_since_update, 0);
        assert_eq!(b.time_since_update, 1);
    }

    #[test]
    fn test_tie_goes_to_first_detection() {
        let mut tracker = Tracker::new(TrackerSettings {
            min_hits: 1,
            ..Default::default()
        });
        tracker.step(&[det(100.0, 100.0)]);
        // 左右对称的两个检测, IOU 相同
        tracker.step(&[det(90.0, 100.0), det(110.0, 100.0)]);
        let t0 = &tracker.tracks()[0];
        assert_eq!(t0.bbox.x, 90.0);
        assert_eq!(tracker.tracks()[1].bbox.x, 110.0);
    }

    #[test]
    fn test_below_threshold_does_not_match() {
        let mut tracker = Tracker::default();
        tracker.step(&[det(0.0, 0.0)]);
        tracker.step(&[det(45.0, 0.0)]); // IOU = 250/4750 < 0.3
        assert_eq!(tracker.track_count(), 2);
    }

    #[test]
    fn test_max_tracks_cap() {
        let mut tracker = Tracker::new(TrackerSettings {
            max_tracks: 2,
            ..Default::default()
        });
        tracker.step(&[det(0.0, 0.0), det(300.0, 0.0), det(600.0, 0.0)]);
        assert_eq!(tracker.track_count(), 2);
    }

    #[test]
    fn test_reset_keeps_ids_monotonic() {
        let mut tracker = Tracker::default();
        tracker.step(&[det(0.0, 0.0)]);
        tracker.reset();
        tracker.step(&[det(0.0, 0.0)]);
        assert_eq!(tracker.tracks()[0].id, 1);
    }
}
