//! Stream facade over a native resource
//!
//! 基于原生资源的流门面

use super::backend::{native, Backend, FileStat, RawHandle};
use super::error::{Error, Result};
use super::lock_table::{LockPolicy, Wait};
use super::mode::OpenMode;
use super::range::{ByteSpan, LockRange};
use super::resource::Resource;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::time::Duration;

/// Operations every stream offers, whether used directly or through
/// [`Synchronized`](crate::Synchronized)
///
/// 每个流提供的操作，无论直接使用还是通过 [`Synchronized`](crate::Synchronized) 使用
///
/// Every operation except [`close`](FileStream::close) fails with
/// [`Error::Closed`] after the stream is closed.
///
/// 流关闭后，除 [`close`](FileStream::close) 外的所有操作都以 [`Error::Closed`] 失败。
pub trait FileStream {
    /// Read up to `buf.len()` bytes at the cursor; 0 means end of file
    ///
    /// 从游标处读取至多 `buf.len()` 字节；0 表示文件末尾
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes at the cursor (or at end of file in append mode)
    ///
    /// 在游标处（追加模式下在文件末尾）写入至多 `buf.len()` 字节
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn truncate(&mut self, len: u64) -> Result<()>;

    /// Force written data to durable storage
    ///
    /// 强制将已写数据持久化
    fn flush(&mut self) -> Result<()>;

    fn stat(&mut self) -> Result<FileStat>;

    /// Lock `range`, waiting as `wait` allows
    ///
    /// 加锁 `range`，按 `wait` 允许的方式等待
    fn lock(&mut self, range: LockRange, wait: Wait) -> Result<()>;

    /// Release a held range or, where the backend allows, part of one
    ///
    /// 释放已持有的范围，或在后端允许时释放其中一部分
    fn unlock(&mut self, span: ByteSpan) -> Result<()>;

    /// Release all locks and the native resource; idempotent
    ///
    /// 释放所有锁和原生资源；幂等
    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    #[inline]
    fn try_lock(&mut self, range: LockRange) -> Result<()> {
        self.lock(range, Wait::Immediate)
    }

    #[inline]
    fn lock_timeout(&mut self, range: LockRange, limit: Duration) -> Result<()> {
        self.lock(range, Wait::Timeout(limit))
    }

    /// Fill `buf` completely, looping over short reads
    ///
    /// 完整填充 `buf`，对短读进行循环
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.read(buf)? {
                0 => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "end of file before buffer was filled",
                    )));
                }
                n => buf = &mut buf[n..],
            }
        }
        Ok(())
    }

    /// Write all of `buf`, looping over short writes
    ///
    /// 写入 `buf` 的全部内容，对短写进行循环
    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "native write accepted no bytes",
                    )));
                }
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }
}

/// OS-independent file stream with byte-range locking
///
/// 与操作系统无关、支持字节范围锁的文件流
///
/// # Examples
///
/// ```
/// use lockstream::{Access, Creation, FileStream, LockMode, LockRange, OpenMode, Stream, Result};
/// # use tempfile::tempdir;
/// # fn main() -> Result<()> {
/// # let dir = tempdir()?;
/// # let path = dir.path().join("data.bin");
/// let mode = OpenMode::new(Access::ReadWrite).creation(Creation::CreateIfMissing);
/// let mut stream = Stream::open(&path, mode)?;
///
/// stream.try_lock(LockRange::new(0, 5, LockMode::Exclusive)?)?;
/// stream.write_all(b"hello")?;
/// stream.flush()?;
///
/// // Closing releases the lock as well
/// // 关闭时同时释放锁
/// stream.close()?;
/// stream.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Stream {
    resource: Resource,
    policy: LockPolicy,
}

impl Stream {
    /// Open `path` on the host backend
    ///
    /// 在宿主后端上打开 `path`
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open_with(native(), path, mode)
    }

    /// Open `path` on a specific backend
    ///
    /// 在指定后端上打开 `path`
    pub fn open_with(backend: &'static dyn Backend, path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Ok(Self {
            resource: Resource::open(backend, path.as_ref(), mode)?,
            policy: LockPolicy::default(),
        })
    }

    #[inline]
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[inline]
    pub fn mode(&self) -> &OpenMode {
        self.resource.mode()
    }

    /// Native descriptor/handle value, e.g. to hand to a child process
    ///
    /// 原生描述符/句柄值，例如传递给子进程
    #[inline]
    pub fn raw_handle(&self) -> Result<RawHandle> {
        self.resource.handle()
    }

    #[inline]
    pub fn is_inheritable(&self) -> Result<bool> {
        self.resource.is_inheritable()
    }

    #[inline]
    pub fn held_locks(&self) -> &[LockRange] {
        self.resource.held_locks()
    }
}

impl FileStream for Stream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.resource.handle()?;
        self.resource.backend().read(handle, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let handle = self.resource.handle()?;
        self.resource.backend().write(handle, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let handle = self.resource.handle()?;
        self.resource.backend().seek(handle, pos)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        let handle = self.resource.handle()?;
        self.resource.backend().truncate(handle, len)
    }

    fn flush(&mut self) -> Result<()> {
        let handle = self.resource.handle()?;
        self.resource.backend().flush(handle)
    }

    fn stat(&mut self) -> Result<FileStat> {
        let handle = self.resource.handle()?;
        self.resource.backend().stat(handle)
    }

    fn lock(&mut self, range: LockRange, wait: Wait) -> Result<()> {
        let policy = self.policy;
        self.resource.lock(range, wait, &policy)
    }

    fn unlock(&mut self, span: ByteSpan) -> Result<()> {
        self.resource.unlock(span)
    }

    fn close(&mut self) -> Result<()> {
        self.resource.close()
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.resource.is_closed()
    }
}
