//! File stream with byte-range advisory locking
//!
//! 支持字节范围建议锁的文件流
//!
//! Layers, leaves first:
//! - [`Backend`]: one native implementation per OS family, selected by [`native()`]
//! - [`LockTable`]: what a stream holds, kept in step with native locks
//! - [`Resource`]: creation, inheritance and exactly-once release of the handle
//! - [`Stream`]: the facade applications use, implementing [`FileStream`]
//!
//! 分层（自底向上）：
//! - [`Backend`]：每个操作系统家族一个原生实现，由 [`native()`] 选择
//! - [`LockTable`]：流持有的锁，与原生锁保持一致
//! - [`Resource`]：句柄的创建、继承与仅一次释放
//! - [`Stream`]：应用使用的门面，实现 [`FileStream`]
//!
//! Locks are advisory: they only exclude callers that ask for them, and they belong
//! to the stream that took them, never to the whole process.
//!
//! 锁是建议性的：只对同样请求锁的调用方生效，并且属于获取它的流，而不属于整个进程。
//!
//! ```
//! use lockstream::{Creation, Error, FileStream, LockMode, LockRange, OpenMode, Stream, Result};
//! # use tempfile::tempdir;
//! # fn main() -> Result<()> {
//! # let dir = tempdir()?;
//! # let path = dir.path().join("shared.bin");
//! let mode = OpenMode::read_write().creation(Creation::CreateIfMissing);
//! let mut first = Stream::open(&path, mode)?;
//! let mut second = Stream::open(&path, mode)?;
//!
//! let range = LockRange::new(0, 16, LockMode::Exclusive)?;
//! first.try_lock(range)?;
//! # #[cfg(any(target_os = "linux", target_os = "android", windows))]
//! assert!(matches!(second.try_lock(range), Err(Error::WouldBlock)));
//!
//! first.unlock(range.span())?;
//! second.try_lock(range)?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
mod file_stream;
mod lock_table;
mod mode;
mod range;
mod resource;

#[cfg(test)]
mod tests;

// Re-export public API
// 重新导出公共 API
pub use backend::{native, Backend, FileIdentity, FileStat, LockCapabilities, RawHandle};
pub use error::{Error, Result};
pub use file_stream::{FileStream, Stream};
pub use lock_table::{LockPolicy, LockTable, Wait};
pub use mode::{Access, Creation, OpenMode};
pub use range::{ByteSpan, LockMode, LockRange};
pub use resource::Resource;
