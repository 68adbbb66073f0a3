//! 流水线配置 - 通过JSON文件调整参数
//! Pipeline configuration, hot-swappable at runtime

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::tracking::TrackerSettings;

/// 默认最大缓冲块大小: 1080p RGBA
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1920 * 1080 * 4;

/// 流水线参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 模型输入 ===
    pub target_width: u32,  // 模型输入宽度
    pub target_height: u32, // 模型输入高度
    pub target_fps: u32,    // 目标帧率

    // === 检测参数 ===
    pub confidence_threshold: f32, // 检测置信度阈值
    pub nms_threshold: f32,        // NMS IOU阈值
    pub max_detections: usize,     // 每帧最大检测数
    pub num_classes: usize,        // 模型类别数, 0 表示使用后端报告的类别数

    // === 跟踪参数 ===
    pub max_disappeared: u32, // 最大丢失帧数
    pub min_hits: u32,        // 确认轨迹所需命中次数
    pub iou_threshold: f32,   // 关联IOU阈值
    pub max_tracks: usize,    // 同时存在的最大轨迹数

    // === 内存池 ===
    pub buffer_pool_size: usize, // 内存块数量上限
    pub max_buffer_size: usize,  // 单块最大字节数
    pub enable_accelerator: bool, // 是否预分配加速器内存块

    // === 调度 ===
    pub queue_capacity: usize, // 级间队列容量
    pub poll_interval_ms: u64, // 空队列轮询间隔
    pub max_latency_ms: f64,   // 端到端延迟目标
    pub pad_value: f32,        // letterbox 填充值 (归一化后)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_width: 640,
            target_height: 640,
            target_fps: 50,

            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            max_detections: 100,
            num_classes: 80,

            max_disappeared: 30,
            min_hits: 3,
            iou_threshold: 0.3,
            max_tracks: 50,

            buffer_pool_size: 32,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            enable_accelerator: false,

            queue_capacity: 8,
            poll_interval_ms: 1,
            max_latency_ms: 20.0,
            pad_value: 0.5,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    ///
    /// 文件不存在时写入默认配置; 解析失败时回退到默认值。
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config.sanitized()
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 严格加载: 任何错误都返回给调用者
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    /// 检查参数范围
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(PipelineError::Config(format!("{name} must be in [0,1], got {v}")))
            }
        };
        unit("confidence_threshold", self.confidence_threshold)?;
        unit("nms_threshold", self.nms_threshold)?;
        unit("iou_threshold", self.iou_threshold)?;

        if self.max_detections == 0 {
            return Err(PipelineError::Config("max_detections must be > 0".into()));
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err(PipelineError::Config("target size must be non-zero".into()));
        }
        if self.buffer_pool_size == 0 || self.max_buffer_size == 0 {
            return Err(PipelineError::Config("buffer pool must be non-empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config("queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// 把越界参数收敛到合法范围
    pub fn sanitized(mut self) -> Self {
        self.confidence_threshold = self.confidence_threshold.clamp(0.0, 1.0);
        self.nms_threshold = self.nms_threshold.clamp(0.0, 1.0);
        self.iou_threshold = self.iou_threshold.clamp(0.0, 1.0);
        self.max_detections = self.max_detections.max(1);
        self.target_width = self.target_width.max(32);
        self.target_height = self.target_height.max(32);
        self.target_fps = self.target_fps.max(1);
        self.buffer_pool_size = self.buffer_pool_size.max(2);
        self.max_buffer_size = self.max_buffer_size.max(1);
        self.queue_capacity = self.queue_capacity.max(1);
        self.max_tracks = self.max_tracks.max(1);
        self
    }

    /// 跟踪器相关的子集
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            max_disappeared: self.max_disappeared,
            min_hits: self.min_hits,
            iou_threshold: self.iou_threshold,
            max_tracks: self.max_tracks,
        }
    }

    /// 模型输入张量字节数 (NCHW f32, 3通道)
    pub fn tensor_bytes(&self) -> usize {
        self.target_width as usize * self.target_height as usize * 3 * std::mem::size_of::<f32>()
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前流水线配置:");
        info!("  模型输入: {}x{} @ {}fps", self.target_width, self.target_height, self.target_fps);
        info!(
            "  置信度: {:.2} | NMS: {:.2} | 最大检测数: {}",
            self.confidence_threshold, self.nms_threshold, self.max_detections
        );
        info!(
            "  跟踪: IOU {:.2} | 确认命中 {} | 最大丢失帧 {}",
            self.iou_threshold, self.min_hits, self.max_disappeared
        );
        info!(
            "  内存池: {} 块 x {} 字节 | 队列容量 {}",
            self.buffer_pool_size, self.max_buffer_size, self.queue_capacity
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_hits, 3);
        assert_eq!(config.max_disappeared, 30);
        assert!((config.iou_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = PipelineConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let config = PipelineConfig {
            max_detections: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitized_clamps() {
        let config = PipelineConfig {
            nms_threshold: -0.2,
            max_detections: 0,
            buffer_pool_size: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.nms_threshold, 0.0);
        assert_eq!(config.max_detections, 1);
        assert_eq!(config.buffer_pool_size, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "confidence_threshold": 0.25, "min_hits": 5 }"#).unwrap();
        assert_eq!(config.min_hits, 5);
        assert_eq!(config.target_width, 640);
        assert!((config.confidence_threshold - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("edgetrack_cfg_{}.json", std::process::id()));
        let config = PipelineConfig {
            target_fps: 30,
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = PipelineConfig::try_load(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_creates_default() {
        let path =
            std::env::temp_dir().join(format!("edgetrack_missing_{}.json", std::process::id()));
        let _ = fs::remove_file(&path);
        let config = PipelineConfig::load(&path);
        assert_eq!(config, PipelineConfig::default());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }
}
