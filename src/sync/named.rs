//! Inter-process named lock
//!
//! 跨进程命名锁

use super::exclusion::{Exclusion, ThreadLock};
use crate::stream::{
    ByteSpan, Creation, Error, FileStream, LockMode, LockRange, OpenMode, Result, Stream, Wait,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Re-entrant lock shared by every process that uses the same name
///
/// 由所有使用相同名称的进程共享的可重入锁
///
/// Backed by an exclusive lock on the first byte of a lock file in the system
/// temporary directory, taken through the native backend on the outermost
/// `acquire` and dropped on the matching `release`. Threads of one process are
/// ordered by an inner [`ThreadLock`] first, so share one instance (e.g. in an `Arc`)
/// per process.
///
/// 基于系统临时目录中锁文件首字节的独占锁，在最外层 `acquire` 时通过原生后端获取，
/// 在对应的 `release` 时释放。同一进程内的线程先由内部 [`ThreadLock`] 排序，
/// 因此每个进程应共享同一个实例（例如放在 `Arc` 中）。
pub struct NamedLock {
    name: String,
    path: PathBuf,
    local: ThreadLock,
    file: Mutex<Stream>,
}

impl NamedLock {
    /// Open (creating if needed) the lock file for `name`
    ///
    /// 打开（必要时创建）`name` 对应的锁文件
    ///
    /// # Errors
    /// `InvalidArgument` if `name` is empty or holds characters other than
    /// ASCII alphanumerics, `-`, `_` and `.`
    ///
    /// # Errors
    /// `name` 为空或包含 ASCII 字母数字、`-`、`_`、`.` 以外的字符时返回 `InvalidArgument`
    pub fn new(name: &str) -> Result<Self> {
        Self::in_dir(std::env::temp_dir(), name)
    }

    /// Like [`NamedLock::new`], with the lock file placed in `dir`
    ///
    /// 同 [`NamedLock::new`]，但锁文件放在 `dir` 中
    pub fn in_dir(dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(Error::invalid(format!("invalid lock name {name:?}")));
        }

        let path = dir.as_ref().join(format!("lockstream-{name}.lock"));
        let file = Stream::open(&path, OpenMode::read_write().creation(Creation::CreateIfMissing))?;
        Ok(Self {
            name: name.to_owned(),
            path,
            local: ThreadLock::new(),
            file: Mutex::new(file),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn first_byte() -> LockRange {
        LockRange::from_span(ByteSpan::from_bounds_unchecked(0, 1), LockMode::Exclusive)
    }
}

impl Exclusion for NamedLock {
    fn acquire(&self) -> Result<()> {
        if self.local.enter() > 1 {
            return Ok(());
        }
        let locked = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lock(Self::first_byte(), Wait::Forever);
        match locked {
            Ok(()) => {
                tracing::trace!(name = %self.name, "named lock acquired");
                Ok(())
            }
            Err(err) => {
                self.local.leave()?;
                Err(err)
            }
        }
    }

    fn release(&self) -> Result<()> {
        match self.local.depth() {
            0 => Err(Error::invalid("named lock released by a thread that does not hold it")),
            1 => {
                self.file
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .unlock(Self::first_byte().span())?;
                self.local.leave()?;
                tracing::trace!(name = %self.name, "named lock released");
                Ok(())
            }
            _ => self.local.leave().map(drop),
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.local.depth() > 0
    }
}

impl fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedLock")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}
