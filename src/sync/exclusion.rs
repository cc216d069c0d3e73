//! Re-entrant mutual exclusion primitives
//!
//! 可重入互斥原语

use super::named::NamedLock;
use crate::stream::{Error, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Re-entrant mutual exclusion
///
/// 可重入互斥
///
/// A thread that already holds the exclusion may acquire it again; it is released
/// once every `acquire` has been matched by a `release`.
///
/// 已持有互斥的线程可以再次获取；每次 `acquire` 都被 `release` 匹配后才真正释放。
pub trait Exclusion: Send + Sync + fmt::Debug {
    /// Block until the calling thread holds the exclusion
    ///
    /// 阻塞直到调用线程持有互斥
    fn acquire(&self) -> Result<()>;

    /// Undo one `acquire` made by the calling thread
    ///
    /// 撤销调用线程的一次 `acquire`
    fn release(&self) -> Result<()>;

    fn is_held_by_current_thread(&self) -> bool;
}

/// Which primitive a proxy creates when the caller supplies none
///
/// 调用方未提供互斥原语时代理创建的原语类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExclusionScope {
    /// Threads of this process
    ///
    /// 本进程内的线程
    #[default]
    Thread,
    /// Every process using the same name
    ///
    /// 使用相同名称的所有进程
    Process(String),
}

impl ExclusionScope {
    pub fn create(&self) -> Result<Arc<dyn Exclusion>> {
        Ok(match self {
            ExclusionScope::Thread => Arc::new(ThreadLock::new()),
            ExclusionScope::Process(name) => Arc::new(NamedLock::new(name)?),
        })
    }
}

#[derive(Debug, Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// In-process re-entrant lock
///
/// 进程内可重入锁
///
/// # Examples
///
/// ```
/// use lockstream::{Exclusion, ThreadLock};
///
/// let lock = ThreadLock::new();
/// lock.acquire().unwrap();
/// lock.acquire().unwrap(); // re-entrant / 可重入
/// lock.release().unwrap();
/// assert!(lock.is_held_by_current_thread());
/// lock.release().unwrap();
/// assert!(!lock.is_held_by_current_thread());
/// ```
#[derive(Debug, Default)]
pub struct ThreadLock {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl ThreadLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(&self) -> MutexGuard<'_, Owner> {
        // Owner is only mutated in short non-panicking sections
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire and return the calling thread's new depth
    ///
    /// 获取并返回调用线程新的重入深度
    pub(crate) fn enter(&self) -> usize {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    return 1;
                }
                Some(holder) if holder == me => {
                    owner.depth += 1;
                    return owner.depth;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Release once and return the remaining depth
    ///
    /// 释放一次并返回剩余深度
    pub(crate) fn leave(&self) -> Result<usize> {
        let me = thread::current().id();
        let mut owner = self.owner();
        if owner.thread != Some(me) {
            return Err(Error::invalid("exclusion released by a thread that does not hold it"));
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
            return Ok(0);
        }
        Ok(owner.depth)
    }

    /// Depth of the calling thread, 0 if it does not hold the lock
    ///
    /// 调用线程的重入深度，未持有时为 0
    pub(crate) fn depth(&self) -> usize {
        let owner = self.owner();
        if owner.thread == Some(thread::current().id()) {
            owner.depth
        } else {
            0
        }
    }
}

impl Exclusion for ThreadLock {
    fn acquire(&self) -> Result<()> {
        self.enter();
        Ok(())
    }

    fn release(&self) -> Result<()> {
        self.leave().map(drop)
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.depth() > 0
    }
}

/// Scoped hold on an [`Exclusion`], released on drop
///
/// 对 [`Exclusion`] 的作用域持有，drop 时释放
///
/// Ownership is per thread, so the guard is not `Send`: it must be dropped on the
/// thread that acquired it.
///
/// 所有权按线程划分，因此 guard 不是 `Send`：必须在获取它的线程上 drop。
///
/// ```compile_fail
/// use lockstream::{ExclusionScope, Synchronized};
///
/// let proxy = Synchronized::new(0u32, ExclusionScope::Thread).unwrap();
/// let guard = proxy.hold().unwrap();
/// std::thread::scope(|s| {
///     s.spawn(move || drop(guard));
/// });
/// ```
#[must_use = "the exclusion is released as soon as the guard is dropped"]
pub struct ExclusionGuard<'a> {
    exclusion: &'a dyn Exclusion,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ExclusionGuard<'a> {
    pub fn acquire(exclusion: &'a dyn Exclusion) -> Result<Self> {
        exclusion.acquire()?;
        Ok(Self {
            exclusion,
            _not_send: PhantomData,
        })
    }
}

impl Drop for ExclusionGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.exclusion.release() {
            tracing::warn!(exclusion = ?self.exclusion, %err, "failed to release exclusion");
        }
    }
}

impl fmt::Debug for ExclusionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionGuard")
            .field("exclusion", &self.exclusion)
            .finish()
    }
}
