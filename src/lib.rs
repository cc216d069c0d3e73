//! OS-independent file stream with byte-range advisory locking
//!
//! 与操作系统无关、支持字节范围建议锁的文件流
//!
//! This library gives one file stream contract over two incompatible native models:
//! descriptor-based, signal-interruptible I/O (unix, via `fcntl` record locks) and
//! handle-based I/O (Windows, via `LockFileEx`). Differences between them are
//! normalized into one rule set and one error taxonomy.
//!
//! 本库在两种互不兼容的原生模型之上提供统一的文件流契约：
//! 基于描述符、可被信号中断的 I/O（unix，使用 `fcntl` 记录锁）
//! 和基于句柄的 I/O（Windows，使用 `LockFileEx`）。
//! 两者之间的差异被规范化为一套规则和一套错误分类。
//!
//! # Features
//!
//! - **Byte-range locks**: shared/exclusive, blocking, non-blocking or timed, with
//!   in-place upgrade that never loses the original shared lock on failure
//! - **Explicit creation policy**: open-existing, create-if-missing, create-exclusive,
//!   truncate; ambiguous combinations are rejected
//! - **Inheritance control**: each handle is explicitly inheritable or not
//! - **Exactly-once release**: close is idempotent and drains held locks
//! - **Safety proxy**: [`Synchronized`] serializes any target across threads or processes
//!
//! # 特性
//!
//! - **字节范围锁**：共享/独占，阻塞、非阻塞或限时，支持原地升级，失败时不会丢失原有共享锁
//! - **显式创建策略**：打开已有、缺失时创建、独占创建、截断；拒绝含义不明的组合
//! - **继承控制**：每个句柄显式设置是否可继承
//! - **仅一次释放**：close 幂等，并会释放所有持有的锁
//! - **安全代理**：[`Synchronized`] 在线程或进程之间串行化任意目标
//!
//! # Quick Start
//!
//! ```
//! use lockstream::{
//!     Access, Creation, ExclusionScope, FileStream, LockMode, LockRange, OpenMode, Result,
//!     Stream, Synchronized,
//! };
//! use std::io::SeekFrom;
//! # use tempfile::tempdir;
//! # fn main() -> Result<()> {
//! # let dir = tempdir()?;
//! # let path = dir.path().join("journal.bin");
//!
//! let mode = OpenMode::new(Access::ReadWrite).creation(Creation::TruncateExisting);
//! let stream = Synchronized::new(Stream::open(&path, mode)?, ExclusionScope::Thread)?;
//!
//! // Threads share the proxy; each write_all runs as one serialized operation
//! // 线程共享代理；每次 write_all 作为一个串行化操作执行
//! std::thread::scope(|s| {
//!     for i in 0..4u8 {
//!         let mut handle = &stream;
//!         s.spawn(move || handle.write_all(&[i; 8]));
//!     }
//! });
//!
//! let mut handle = &stream;
//! handle.lock(LockRange::new(0, 32, LockMode::Shared)?, lockstream::Wait::Forever)?;
//! handle.seek(SeekFrom::Start(0))?;
//! let mut buf = [0u8; 32];
//! handle.read_exact(&mut buf)?;
//! handle.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Main Types
//!
//! - [`Stream`]: the file stream facade
//! - [`FileStream`]: the operations a stream offers
//! - [`OpenMode`], [`Access`], [`Creation`]: how the file is opened
//! - [`LockRange`], [`ByteSpan`], [`LockMode`], [`Wait`]: lock requests
//! - [`Backend`]: the native capability table, see [`native()`]
//! - [`Synchronized`], [`ThreadLock`], [`NamedLock`]: the safety proxy
//!
//! # 主要类型
//!
//! - [`Stream`]：文件流门面
//! - [`FileStream`]：流提供的操作
//! - [`OpenMode`]、[`Access`]、[`Creation`]：文件的打开方式
//! - [`LockRange`]、[`ByteSpan`]、[`LockMode`]、[`Wait`]：加锁请求
//! - [`Backend`]：原生能力表，见 [`native()`]
//! - [`Synchronized`]、[`ThreadLock`]、[`NamedLock`]：安全代理

mod stream;
mod sync;

pub use stream::{
    native, Access, Backend, ByteSpan, Creation, Error, FileIdentity, FileStat, FileStream,
    LockCapabilities, LockMode, LockPolicy, LockRange, LockTable, OpenMode, RawHandle, Resource,
    Result, Stream, Wait,
};
pub use sync::{
    Entered, Exclusion, ExclusionGuard, ExclusionScope, NamedLock, Synchronized, ThreadLock,
};
