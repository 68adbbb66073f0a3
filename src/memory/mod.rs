/// 内存管理 (Memory)
///
/// 固定容量内存池, 消除热路径上的逐帧堆分配
pub mod buffer_pool;

pub use buffer_pool::{BufferKind, BufferPool, PoolStats, PooledBuffer, DEFAULT_IDLE_TIMEOUT};
