//! Backend adapter contract and per-OS selection
//!
//! 后端适配器契约与按操作系统选择
//!
//! Every native call the stream makes goes through [`Backend`]. Exactly one
//! implementation is compiled in for the host family and handed out by [`native()`];
//! nothing outside this module branches on the platform.
//!
//! 流发出的所有原生调用都经过 [`Backend`]。针对宿主平台只编译一种实现，
//! 由 [`native()`] 提供；此模块之外不存在按平台的分支。

use super::error::Result;
use super::mode::OpenMode;
use super::range::{ByteSpan, LockRange};
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::time::SystemTime;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use self::unix::UnixBackend as NativeBackend;
    } else if #[cfg(windows)] {
        mod windows;
        use self::windows::WindowsBackend as NativeBackend;
    } else {
        compile_error!("lockstream supports unix and windows targets only");
    }
}

/// Opaque native identity of an open file: a descriptor or a handle
///
/// 已打开文件的不透明原生标识：描述符或句柄
///
/// The value carries no ownership. Only the stream that opened it closes it.
///
/// 该值不携带所有权，只有打开它的流负责关闭。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(isize);

impl RawHandle {
    /// Wrap a raw descriptor/handle value, e.g. one inherited from a parent process
    ///
    /// 包装原始描述符/句柄值，例如从父进程继承的值
    #[inline]
    pub fn from_raw(value: isize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn as_raw(&self) -> isize {
        self.0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the file behind a handle (device/volume + inode/file index)
///
/// 句柄背后文件的标识（设备/卷 + inode/文件索引）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub device: u64,
    pub index: u64,
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.index)
    }
}

impl std::str::FromStr for FileIdentity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (device, index) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <device>:<index>, got {s:?}"))?;
        Ok(Self {
            device: device.parse().map_err(|e| format!("bad device: {e}"))?,
            index: index.parse().map_err(|e| format!("bad index: {e}"))?,
        })
    }
}

/// Result of [`Backend::stat`]
///
/// [`Backend::stat`] 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: SystemTime,
    pub identity: FileIdentity,
}

/// Locking behaviour that differs between native substrates
///
/// 不同原生底层之间存在差异的加锁行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockCapabilities {
    /// Unlocking part of a previously locked range is allowed
    ///
    /// 允许解锁先前加锁范围的一部分
    pub partial_unlock: bool,

    /// Locks on one handle merge into a byte set: overlapping requests do not stack,
    /// and locking over a held range converts its mode in place
    ///
    /// 同一句柄上的锁合并为字节集合：重叠请求不会叠加，
    /// 在已持有范围上加锁会原地转换其模式
    pub coalescing: bool,
}

/// Uniform native file contract
///
/// 统一的原生文件契约
///
/// Semantics are those of the stricter platform: locks are advisory and belong to
/// the handle that took them, never to the process.
///
/// 语义以更严格的平台为准：锁是建议性的，属于获取它的句柄，而不属于进程。
pub trait Backend: Send + Sync {
    /// Short name for logs
    ///
    /// 用于日志的简短名称
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> LockCapabilities;

    /// Create or open `path`, applying the creation policy and inheritability of `mode`
    ///
    /// 创建或打开 `path`，应用 `mode` 的创建策略与可继承性
    fn open(&self, path: &Path, mode: &OpenMode) -> Result<RawHandle>;

    fn close(&self, handle: RawHandle) -> Result<()>;

    /// Read up to `buf.len()` bytes; a short count is not an error
    ///
    /// 读取至多 `buf.len()` 字节；短读不是错误
    fn read(&self, handle: RawHandle, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes; a short count is not an error
    ///
    /// 写入至多 `buf.len()` 字节；短写不是错误
    fn write(&self, handle: RawHandle, buf: &[u8]) -> Result<usize>;

    fn seek(&self, handle: RawHandle, pos: SeekFrom) -> Result<u64>;

    fn truncate(&self, handle: RawHandle, len: u64) -> Result<()>;

    /// Force durable write-back
    ///
    /// 强制持久化写回
    fn flush(&self, handle: RawHandle) -> Result<()>;

    fn stat(&self, handle: RawHandle) -> Result<FileStat>;

    /// Take `range`; `WouldBlock` when contended and `blocking` is false
    ///
    /// 获取 `range`；竞争且 `blocking` 为 false 时返回 `WouldBlock`
    fn lock(&self, handle: RawHandle, range: &LockRange, blocking: bool) -> Result<()>;

    fn unlock(&self, handle: RawHandle, span: ByteSpan) -> Result<()>;

    /// Whether a child spawned now would inherit `handle`
    ///
    /// 现在创建的子进程是否会继承 `handle`
    fn is_inheritable(&self, handle: RawHandle) -> Result<bool>;
}

static NATIVE: NativeBackend = NativeBackend;

/// The backend for the host OS family, fixed for the process lifetime
///
/// 宿主操作系统对应的后端，在进程生命周期内固定
#[inline]
pub fn native() -> &'static dyn Backend {
    &NATIVE
}
