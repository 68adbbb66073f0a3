//! 轨迹记录与运动模型
//!
//! 轨迹只是一份普通数据, 由 `predict` / `update` 两个自由函数推进。

use std::collections::VecDeque;

use crate::detection::{Detection, Rect};

/// 轨迹中保留的历史中心点数量
pub const TRAIL_LEN: usize = 50;

/// 速度平滑系数: v' = (1-α)·v + α·Δ
pub const VELOCITY_ALPHA: f32 = 0.3;

/// 二维向量 (像素/帧)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

/// 跟踪轨迹 (仅由 Tracker 持有)
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID, 单调递增, 永不复用
    pub id: u32,
    pub class_id: i32,
    pub class_name: String,
    pub confidence: f32,

    /// 当前边界框 (预测后随中心点平移)
    pub bbox: Rect,

    /// 当前中心点 (预测位置)
    pub center: Vec2,

    pub velocity: Vec2,

    pub age: u32,
    pub total_hits: u32,
    pub time_since_update: u32,

    /// 历史轨迹 (匹配到的中心点)
    pub trail: VecDeque<Vec2>,
}

impl Track {
    pub fn new(id: u32, detection: &Detection) -> Self {
        let (cx, cy) = detection.bbox.center();
        let center = Vec2::new(cx, cy);
        let mut trail = VecDeque::with_capacity(TRAIL_LEN);
        trail.push_back(center);

        Self {
            id,
            class_id: detection.class_id,
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            center,
            velocity: Vec2::default(),
            age: 0,
            total_hits: 1,
            time_since_update: 0,
            trail,
        }
    }

    pub fn is_confirmed(&self, min_hits: u32) -> bool {
        self.total_hits >= min_hits
    }
}

/// 线性外推一帧
///
/// age 与 time_since_update 各加1, 中心点按速度平移, 宽高保持不变。
pub fn predict(track: &mut Track) {
    track.age += 1;
    track.time_since_update += 1;

    track.center.x += track.velocity.x;
    track.center.y += track.velocity.y;

    track.bbox = Rect::from_center(track.center.x, track.center.y, track.bbox.w, track.bbox.h);
}

/// 用匹配到的检测更新轨迹
pub fn update(track: &mut Track, detection: &Detection) {
    let (cx, cy) = detection.bbox.center();
    let new_center = Vec2::new(cx, cy);

    // 位移取观测与预测中心之差
    let dx = new_center.x - track.center.x;
    let dy = new_center.y - track.center.y;
    track.velocity.x = (1.0 - VELOCITY_ALPHA) * track.velocity.x + VELOCITY_ALPHA * dx;
    track.velocity.y = (1.0 - VELOCITY_ALPHA) * track.velocity.y + VELOCITY_ALPHA * dy;

    track.center = new_center;
    track.bbox = detection.bbox;
    track.confidence = detection.confidence;
    track.total_hits += 1;
    track.time_since_update = 0;

    if track.trail.len() >= TRAIL_LEN {
        track.trail.pop_front();
    }
    track.trail.push_back(new_center);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32) -> Detection {
        Detection::new(Rect::new(x, y, 50.0, 50.0), 0.9, 0)
    }

    #[test]
    fn test_new_track_initial_state() {
        let t = Track::new(7, &det(100.0, 100.0));
        assert_eq!(t.id, 7);
        assert_eq!(t.age, 0);
        assert_eq!(t.total_hits, 1);
        assert_eq!(t.time_since_update, 0);
        assert_eq!(t.velocity, Vec2::default());
        assert_eq!(t.center, Vec2::new(125.0, 125.0));
        assert!(!t.is_confirmed(3));
    }

    #[test]
    fn test_predict_moves_by_velocity() {
        let mut t = Track::new(0, &det(100.0, 100.0));
        t.velocity = Vec2::new(2.0, -1.0);
        predict(&mut t);
        assert_eq!(t.age, 1);
        assert_eq!(t.time_since_update, 1);
        assert_eq!(t.center, Vec2::new(127.0, 124.0));
        assert_eq!(t.bbox, Rect::new(102.0, 99.0, 50.0, 50.0));
    }

    #[test]
    fn test_update_smooths_velocity() {
        let mut t = Track::new(0, &det(100.0, 100.0));
        predict(&mut t);
        update(&mut t, &det(110.0, 100.0));
        assert!((t.velocity.x - 3.0).abs() < 1e-6);
        assert_eq!(t.velocity.y, 0.0);
        assert_eq!(t.total_hits, 2);
        assert_eq!(t.time_since_update, 0);
        assert_eq!(t.bbox, Rect::new(110.0, 100.0, 50.0, 50.0));

        predict(&mut t);
        assert_eq!(t.center.x, 138.0);
        update(&mut t, &det(120.0, 100.0));
        // 0.7 * 3 + 0.3 * (145 - 138)
        assert!((t.velocity.x - 4.2).abs() < 1e-5);
        assert_eq!(t.center.x, 145.0);
    }

    #[test]
    fn test_constant_motion_velocity_follows_prediction_residual() {
        // 每帧 +2px, 残差基于预测位置, 速度收敛到约 1.0
        let mut t = Track::new(0, &det(100.0, 100.0));
        let (mut pos, mut v) = (125.0f32, 0.0f32);
        for i in 1..10 {
            predict(&mut t);
            update(&mut t, &det(100.0 + 2.0 * i as f32, 100.0));
            let c = 125.0 + 2.0 * i as f32;
            pos += v;
            v = 0.7 * v + 0.3 * (c - pos);
            pos = c;
        }
        assert!((t.velocity.x - v).abs() < 1e-4);
        assert!((t.velocity.x - 1.0).abs() < 0.05, "vx {}", t.velocity.x);
        assert_eq!(t.velocity.y, 0.0);
    }

    #[test]
    fn test_trail_is_bounded() {
        let mut t = Track::new(0, &det(0.0, 0.0));
        for i in 1..=(TRAIL_LEN as u32 + 10) {
            predict(&mut t);
            update(&mut t, &det(i as f32, 0.0));
        }
        assert_eq!(t.trail.len(), TRAIL_LEN);
        assert_eq!(t.trail.back().map(|p| p.x), Some(25.0 + (TRAIL_LEN + 10) as f32));
    }
}
