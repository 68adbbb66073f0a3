//! 内存池 (BufferPool)
//! Fixed-capacity pool of reusable memory blocks
//!
//! 每个槽位持有一块固定大小的内存。`acquire` 把槽位内的 `Vec<u8>` 移交给
//! `PooledBuffer` (只移动指针,不分配),`PooledBuffer` 被 drop 或显式
//! `release` 时再移回槽位。整个 arena 只在 `shutdown` 时统一释放。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

/// 空闲多久算"闲置"块
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// ========== 公共数据结构 ==========

/// 内存块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// CPU 可访问内存
    Cpu,
    /// 加速器可访问内存 (共享存储模式)
    Accelerator,
}

/// 内存池统计快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub total_blocks: usize,
    pub active_blocks: usize,
    pub total_memory: usize, // 字节
    pub peak_memory: usize,  // 字节, 单调高水位
    pub utilization: f64,    // active / total
    pub hits: u64,
    pub misses: u64,
    pub oversized: u64, // 超过块容量的请求 (计入 misses)
    pub invalid_releases: u64,
}

/// 超大请求每 N 次打印一次警告
const OVERSIZED_LOG_EVERY: u64 = 100;

// ========== 内部状态 ==========

struct Slot {
    data: Option<Vec<u8>>, // None 表示已借出
    kind: BufferKind,
    in_use: bool,
    size: usize, // 借出时请求的字节数
    last_used_at: Instant,
    generation: u64,
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    max_blocks: usize,
    block_size: usize,
    accelerator: bool,
    initialized: bool,
    shut_down: bool,
}

impl PoolState {
    fn count(&self, kind: BufferKind) -> usize {
        self.slots.iter().filter(|s| s.kind == kind).count()
    }

    fn capacity_for(&self, kind: BufferKind) -> usize {
        match kind {
            BufferKind::Cpu => self.max_blocks,
            BufferKind::Accelerator if self.accelerator => self.max_blocks / 2,
            BufferKind::Accelerator => 0,
        }
    }
}

struct PoolShared {
    state: Mutex<PoolState>,

    // 无锁只读计数器
    active_blocks: AtomicUsize,
    total_blocks: AtomicUsize,
    total_allocated: AtomicUsize,
    peak_allocated: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    oversized: AtomicU64,
    invalid_releases: AtomicU64,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // 释放路径可能运行在错误清理中, 锁中毒时继续使用内部数据
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_growth(&self, bytes: usize) {
        let total = self.total_allocated.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.peak_allocated.fetch_max(total, Ordering::AcqRel);
        self.total_blocks.fetch_add(1, Ordering::AcqRel);
    }

    /// 归还槽位; 不属于本池或已空闲时只告警
    fn give_back(&self, slot: usize, generation: u64, data: Vec<u8>) {
        let mut state = self.lock();
        if state.shut_down {
            debug!(slot, "内存池已关闭, 丢弃归还的内存块");
            return;
        }
        match state.slots.get_mut(slot) {
            Some(s) if s.in_use && s.generation == generation => {
                s.in_use = false;
                s.size = 0;
                s.last_used_at = Instant::now();
                s.data = Some(data);
                self.active_blocks.fetch_sub(1, Ordering::AcqRel);
            }
            _ => {
                self.invalid_releases.fetch_add(1, Ordering::Relaxed);
                warn!(slot, generation, "⚠️ 尝试归还未知或已空闲的内存块");
            }
        }
    }
}

// ========== 内存池 ==========

/// 固定容量内存池
///
/// 克隆代价很低, 所有克隆共享同一个 arena。
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::default()),
                active_blocks: AtomicUsize::new(0),
                total_blocks: AtomicUsize::new(0),
                total_allocated: AtomicUsize::new(0),
                peak_allocated: AtomicUsize::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                oversized: AtomicU64::new(0),
                invalid_releases: AtomicU64::new(0),
            }),
        }
    }

    /// 预分配 CPU 内存块
    ///
    /// 先分配 `max_blocks / 2` 块 (至少1块), 剩余额度在 `acquire` 时按需增长。
    pub fn initialize(&self, max_blocks: usize, block_size: usize) -> Result<()> {
        self.init(max_blocks, block_size, false)
    }

    /// 同时预分配 `max_blocks / 2` 块加速器内存
    pub fn initialize_with_accelerator(&self, max_blocks: usize, block_size: usize) -> Result<()> {
        self.init(max_blocks, block_size, true)
    }

    fn init(&self, max_blocks: usize, block_size: usize, accelerator: bool) -> Result<()> {
        if max_blocks == 0 || block_size == 0 {
            return Err(PipelineError::Initialization(
                "buffer pool needs max_blocks > 0 and block_size > 0".into(),
            ));
        }

        let mut state = self.shared.lock();
        if state.shut_down {
            return Err(PipelineError::InvalidState("buffer pool already shut down"));
        }
        if state.initialized {
            return Err(PipelineError::InvalidState("buffer pool already initialized"));
        }

        state.max_blocks = max_blocks;
        state.block_size = block_size;
        state.accelerator = accelerator;

        let prewarm_cpu = (max_blocks / 2).max(1);
        let prewarm_acc = if accelerator { max_blocks / 2 } else { 0 };
        let plan = std::iter::repeat(BufferKind::Cpu)
            .take(prewarm_cpu)
            .chain(std::iter::repeat(BufferKind::Accelerator).take(prewarm_acc));

        for kind in plan {
            match allocate_block(block_size) {
                Some(data) => {
                    push_slot(&mut state, data, kind);
                    self.shared.record_growth(block_size);
                }
                None => {
                    // 部分分配的状态必须完全回收
                    let allocated = state.slots.len();
                    state.slots.clear();
                    self.shared.total_blocks.store(0, Ordering::Release);
                    self.shared.total_allocated.store(0, Ordering::Release);
                    return Err(PipelineError::Initialization(format!(
                        "failed to allocate block {allocated} ({block_size} bytes)"
                    )));
                }
            }
        }

        state.initialized = true;
        info!(
            cpu_blocks = state.count(BufferKind::Cpu),
            accelerator_blocks = state.count(BufferKind::Accelerator),
            block_size,
            max_blocks,
            "✅ 内存池初始化完成"
        );
        Ok(())
    }

    /// 借出一块 CPU 内存
    ///
    /// 没有空闲块且已达上限时返回 `None`, 调用方应跳过当前帧。
    pub fn acquire(&self, min_size: usize) -> Option<PooledBuffer> {
        self.acquire_kind(BufferKind::Cpu, min_size)
    }

    pub fn acquire_kind(&self, kind: BufferKind, min_size: usize) -> Option<PooledBuffer> {
        let mut state = self.shared.lock();
        if !state.initialized || state.shut_down {
            return None;
        }
        if min_size > state.block_size {
            self.shared.misses.fetch_add(1, Ordering::Relaxed);
            let n = self.shared.oversized.fetch_add(1, Ordering::Relaxed) + 1;
            if n == 1 || n % OVERSIZED_LOG_EVERY == 0 {
                warn!(
                    requested = min_size,
                    block_size = state.block_size,
                    oversized = n,
                    "⚠️ 请求大小超过内存块容量"
                );
            } else {
                debug!(requested = min_size, oversized = n, "请求大小超过内存块容量");
            }
            return None;
        }

        let free = state
            .slots
            .iter()
            .position(|s| s.kind == kind && !s.in_use && s.data.is_some());

        let index = match free {
            Some(index) => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                index
            }
            None if state.count(kind) < state.capacity_for(kind) => {
                let block_size = state.block_size;
                let data = allocate_block(block_size)?;
                self.shared.record_growth(block_size);
                push_slot(&mut state, data, kind)
            }
            None => {
                let misses = self.shared.misses.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(requested = min_size, ?kind, misses, "内存池没有空闲块");
                return None;
            }
        };

        let slot = &mut state.slots[index];
        let data = slot.data.take()?;
        slot.in_use = true;
        slot.size = min_size;
        slot.last_used_at = Instant::now();
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        self.shared.active_blocks.fetch_add(1, Ordering::AcqRel);

        Some(PooledBuffer {
            data: Some(data),
            len: min_size,
            kind,
            slot: index,
            generation,
            pool: Arc::clone(&self.shared),
        })
    }

    /// 显式归还; 与 drop 等价
    ///
    /// 不属于本池的缓冲只告警, 由其所属的池回收。
    pub fn release(&self, buffer: PooledBuffer) {
        if !Arc::ptr_eq(&self.shared, &buffer.pool) {
            self.shared.invalid_releases.fetch_add(1, Ordering::Relaxed);
            warn!(slot = buffer.slot, "⚠️ 归还的内存块不属于该内存池");
        }
        drop(buffer);
    }

    /// 统计快照 (只读计数器, 不持锁)
    pub fn stats(&self) -> PoolStats {
        // 先读 active 再读 total, 保证快照中 active <= total
        let active_blocks = self.shared.active_blocks.load(Ordering::Acquire);
        let total_blocks = self.shared.total_blocks.load(Ordering::Acquire);
        PoolStats {
            total_blocks,
            active_blocks,
            total_memory: self.shared.total_allocated.load(Ordering::Acquire),
            peak_memory: self.shared.peak_allocated.load(Ordering::Acquire),
            utilization: if total_blocks > 0 {
                active_blocks as f64 / total_blocks as f64
            } else {
                0.0
            },
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            oversized: self.shared.oversized.load(Ordering::Relaxed),
            invalid_releases: self.shared.invalid_releases.load(Ordering::Relaxed),
        }
    }

    /// 统计闲置超过 `max_idle` 的空闲块并刷新其时间戳, 返回闲置块数量
    pub fn cleanup(&self, max_idle: Duration) -> usize {
        let mut state = self.shared.lock();
        let now = Instant::now();
        let mut idle = 0;
        for slot in state.slots.iter_mut().filter(|s| !s.in_use) {
            if now.duration_since(slot.last_used_at) > max_idle {
                slot.last_used_at = now;
                idle += 1;
            }
        }
        if idle > 0 {
            debug!(idle, "🧹 内存池闲置块");
        }
        idle
    }

    /// 释放全部内存; 之后内存池不可再用。可重复调用。
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        if state.shut_down {
            return;
        }
        let outstanding = self.shared.active_blocks.load(Ordering::Acquire);
        state.slots.clear();
        state.shut_down = true;
        self.shared.active_blocks.store(0, Ordering::Release);
        self.shared.total_blocks.store(0, Ordering::Release);
        self.shared.total_allocated.store(0, Ordering::Release);
        info!(outstanding, "🛑 内存池已关闭");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shut_down
    }

    pub fn block_size(&self) -> usize {
        self.shared.lock().block_size
    }

    /// 槽位是否处于借出状态
    pub fn is_in_use(&self, slot: usize) -> bool {
        self.shared
            .lock()
            .slots
            .get(slot)
            .map(|s| s.in_use)
            .unwrap_or(false)
    }
}

fn allocate_block(size: usize) -> Option<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size).ok()?;
    data.resize(size, 0);
    Some(data)
}

fn push_slot(state: &mut PoolState, data: Vec<u8>, kind: BufferKind) -> usize {
    state.slots.push(Slot {
        data: Some(data),
        kind,
        in_use: false,
        size: 0,
        last_used_at: Instant::now(),
        generation: 0,
    });
    state.slots.len() - 1
}

// ========== 借出的内存块 ==========

/// 从内存池借出的内存块, drop 时自动归还
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    len: usize,
    kind: BufferKind,
    slot: usize,
    generation: u64,
    pool: Arc<PoolShared>,
}

impl PooledBuffer {
    pub fn capacity(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 设置有效长度, 不超过容量
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.data {
            Some(data) => &data[..self.len],
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        match &mut self.data {
            Some(data) => &mut data[..len],
            None => &mut [],
        }
    }

    /// 拷贝数据并更新有效长度, 返回实际写入字节数
    pub fn copy_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.capacity());
        self.len = n;
        self.as_mut_slice().copy_from_slice(&src[..n]);
        n
    }

    /// 显式归还
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("slot", &self.slot)
            .field("kind", &self.kind)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.give_back(self.slot, self.generation, data);
        }
    }
}
