//! 非极大值抑制 (NMS)

use std::cmp::Ordering;

use super::types::Detection;

/// 同类别贪心 NMS
///
/// 按置信度降序, 保留当前最高分框, 抑制与已保留框同类且 IOU 超过
/// `iou_threshold` 的后续框; 保留数达到 `max_detections` 时停止。
pub fn non_max_suppression(
    xs: &mut Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) {
    xs.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut current_index = 0;
    for index in 0..xs.len() {
        if current_index >= max_detections {
            break;
        }
        let mut drop = false;
        for prev_index in 0..current_index {
            let (kept, candidate) = (&xs[prev_index], &xs[index]);
            if kept.class_id == candidate.class_id && kept.bbox.iou(&candidate.bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Rect;

    fn det(x: f32, y: f32, conf: f32, class_id: i32) -> Detection {
        Detection::new(Rect::new(x, y, 100.0, 100.0), conf, class_id)
    }

    #[test]
    fn test_same_class_overlap_collapses() {
        let mut xs = vec![det(0.0, 0.0, 0.6, 0), det(5.0, 5.0, 0.9, 0)];
        non_max_suppression(&mut xs, 0.4, 100);
        assert_eq!(xs.len(), 1);
        assert!((xs[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_different_classes_both_survive() {
        let mut xs = vec![det(0.0, 0.0, 0.9, 0), det(5.0, 5.0, 0.8, 2)];
        non_max_suppression(&mut xs, 0.4, 100);
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn test_sorted_descending_and_disjoint_kept() {
        let mut xs = vec![
            det(0.0, 0.0, 0.5, 1),
            det(500.0, 0.0, 0.95, 1),
            det(0.0, 500.0, 0.7, 1),
        ];
        non_max_suppression(&mut xs, 0.4, 100);
        let confs: Vec<f32> = xs.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.95, 0.7, 0.5]);
    }

    #[test]
    fn test_max_detections_limit() {
        let mut xs: Vec<_> = (0..10)
            .map(|i| det(i as f32 * 200.0, 0.0, 0.5 + i as f32 * 0.01, 0))
            .collect();
        non_max_suppression(&mut xs, 0.4, 3);
        assert_eq!(xs.len(), 3);
        assert!((xs[0].confidence - 0.59).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_strict() {
        // IOU 恰好等于阈值时不抑制
        let a = Detection::new(Rect::new(0.0, 0.0, 10.0, 10.0), 0.9, 0);
        let b = Detection::new(Rect::new(5.0, 5.0, 10.0, 10.0), 0.8, 0);
        let iou = a.bbox.iou(&b.bbox);
        let mut xs = vec![a, b];
        non_max_suppression(&mut xs, iou, 100);
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let mut xs = Vec::new();
        non_max_suppression(&mut xs, 0.5, 10);
        assert!(xs.is_empty());
    }
}
