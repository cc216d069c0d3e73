//! Thread/process-safe proxy around an owned target
//!
//! 围绕自有目标的线程/进程安全代理

use super::exclusion::{Exclusion, ExclusionGuard, ExclusionScope};
use crate::stream::{ByteSpan, Error, FileStat, FileStream, LockRange, Result, Wait};
use std::cell::RefCell;
use std::fmt;
use std::io::SeekFrom;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Serializes every operation on `T` under a re-entrant [`Exclusion`]
///
/// 在可重入 [`Exclusion`] 下串行化对 `T` 的每个操作
///
/// Each call acquires the exclusion, forwards to the target and releases on every
/// exit path, returning the target's result unchanged. A thread may hold the
/// exclusion across several calls with [`Synchronized::hold`]; calls made while
/// holding it re-enter instead of deadlocking.
///
/// 每次调用都会获取互斥、转发给目标，并在所有退出路径上释放，原样返回目标的结果。
/// 线程可以通过 [`Synchronized::hold`] 在多次调用之间持有互斥；
/// 持有期间的调用会重入而不是死锁。
///
/// `&Synchronized<S>` implements [`FileStream`] when `S` does, so a shared
/// reference can be handed to many threads.
///
/// 当 `S` 实现 [`FileStream`] 时，`&Synchronized<S>` 也实现它，因此可以把共享引用交给多个线程。
///
/// # Examples
///
/// ```
/// use lockstream::{ExclusionScope, Synchronized};
///
/// let counter = Synchronized::new(0u64, ExclusionScope::Thread).unwrap();
/// std::thread::scope(|s| {
///     for _ in 0..4 {
///         s.spawn(|| {
///             for _ in 0..1000 {
///                 counter.with(|n| *n += 1).unwrap();
///             }
///         });
///     }
/// });
/// assert_eq!(counter.into_inner(), 4000);
/// ```
pub struct Synchronized<T> {
    exclusion: Arc<dyn Exclusion>,
    target: RefCell<T>,
    /// Closed state seen by the last forwarded stream operation
    ///
    /// 最近一次转发的流操作所见的关闭状态
    closed: AtomicBool,
}

// Safety: `target` is only touched while `exclusion` is held, which admits one
// thread at a time, so the RefCell borrow flag is never raced
//
// Safety: `target` 只在持有 `exclusion` 时访问，而互斥每次只允许一个线程进入，
// 因此 RefCell 的借用标志不会被并发访问
unsafe impl<T: Send> Sync for Synchronized<T> {}

impl<T> Synchronized<T> {
    /// Wrap `target` with a new primitive of the given scope
    ///
    /// 使用指定作用域的新原语包装 `target`
    pub fn new(target: T, scope: ExclusionScope) -> Result<Self> {
        Ok(Self::with_exclusion(target, scope.create()?))
    }

    /// Wrap `target` with a caller-supplied primitive
    ///
    /// 使用调用方提供的原语包装 `target`
    pub fn with_exclusion(target: T, exclusion: Arc<dyn Exclusion>) -> Self {
        Self {
            exclusion,
            target: RefCell::new(target),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn exclusion(&self) -> &Arc<dyn Exclusion> {
        &self.exclusion
    }

    /// Hold the exclusion until the guard drops
    ///
    /// 持有互斥直到 guard 被 drop
    ///
    /// Not named `lock` so it never shadows [`FileStream::lock`] on `&Synchronized<S>`.
    ///
    /// 不命名为 `lock`，避免遮蔽 `&Synchronized<S>` 上的 [`FileStream::lock`]。
    pub fn hold(&self) -> Result<ExclusionGuard<'_>> {
        ExclusionGuard::acquire(&*self.exclusion)
    }

    /// Run `f` on the target under the exclusion
    ///
    /// 在互斥保护下对目标执行 `f`
    ///
    /// # Errors
    /// `InvalidArgument` if called from inside another `with` on the same proxy:
    /// the exclusion re-enters, but the target is already mutably borrowed.
    ///
    /// # Errors
    /// 在同一代理的另一个 `with` 内部调用时返回 `InvalidArgument`：
    /// 互斥可以重入，但目标已被可变借用。
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _guard = self.hold()?;
        let mut target = self
            .target
            .try_borrow_mut()
            .map_err(|_| Error::invalid("proxied target is already borrowed by an enclosing call"))?;
        Ok(f(&mut target))
    }

    /// [`Synchronized::with`] for fallible operations, flattening the result
    ///
    /// 用于可失败操作的 [`Synchronized::with`]，会展开结果
    #[inline]
    pub fn call<R>(&self, f: impl FnOnce(&mut T) -> Result<R>) -> Result<R> {
        self.with(f)?
    }

    /// Direct access; `&mut self` already rules out other users in this process
    ///
    /// 直接访问；`&mut self` 已排除本进程内的其他使用者
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.target.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.target.into_inner()
    }
}

impl<S: FileStream> Synchronized<S> {
    /// [`Synchronized::call`] that also records whether the target is now closed
    ///
    /// 同 [`Synchronized::call`]，并记录目标此时是否已关闭
    fn forward<R>(&self, f: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        self.with(|target| {
            let result = f(target);
            self.closed.store(target.is_closed(), Ordering::Release);
            result
        })?
    }

    /// Enter a scope that closes the target when it ends, error or not
    ///
    /// 进入一个作用域，结束时无论是否出错都会关闭目标
    ///
    /// The returned scope derefs to the proxy itself and holds the exclusion for its
    /// whole lifetime.
    ///
    /// 返回的作用域解引用为代理本身，并在整个生命周期内持有互斥。
    pub fn enter(&self) -> Result<Entered<'_, S>> {
        Ok(Entered {
            guard: Some(self.hold()?),
            proxy: self,
        })
    }
}

impl<T: fmt::Debug> fmt::Debug for Synchronized<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Synchronized");
        s.field("exclusion", &self.exclusion);
        // The borrow flag is only touched under the exclusion
        match self.hold() {
            Ok(_guard) => match self.target.try_borrow() {
                Ok(target) => s.field("target", &*target),
                Err(_) => s.field("target", &"<borrowed>"),
            },
            Err(_) => s.field("target", &"<unavailable>"),
        };
        s.finish()
    }
}

/// Scope returned by [`Synchronized::enter`]
///
/// [`Synchronized::enter`] 返回的作用域
///
/// Dropping it closes the target and logs a failure; [`Entered::exit`] returns it instead.
/// Like [`ExclusionGuard`] it stays on the thread that entered.
///
/// drop 时关闭目标并记录失败；[`Entered::exit`] 则返回该错误。
/// 与 [`ExclusionGuard`] 一样，它只能留在进入作用域的线程上。
pub struct Entered<'a, S: FileStream> {
    guard: Option<ExclusionGuard<'a>>,
    proxy: &'a Synchronized<S>,
}

impl<S: FileStream> Entered<'_, S> {
    /// Close the target and leave the scope
    ///
    /// 关闭目标并离开作用域
    pub fn exit(mut self) -> Result<()> {
        let closed = self.proxy.forward(|s| s.close());
        self.guard.take();
        closed
    }
}

impl<S: FileStream> Deref for Entered<'_, S> {
    type Target = Synchronized<S>;

    fn deref(&self) -> &Self::Target {
        self.proxy
    }
}

impl<S: FileStream> Drop for Entered<'_, S> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            if let Err(err) = self.proxy.forward(|s| s.close()) {
                tracing::warn!(%err, "close at scope exit failed");
            }
        }
    }
}

impl<S: FileStream> FileStream for &Synchronized<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.forward(|s| s.read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.forward(|s| s.write(buf))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.forward(|s| s.seek(pos))
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.forward(|s| s.truncate(len))
    }

    fn flush(&mut self) -> Result<()> {
        self.forward(|s| s.flush())
    }

    fn stat(&mut self) -> Result<FileStat> {
        self.forward(|s| s.stat())
    }

    fn lock(&mut self, range: LockRange, wait: Wait) -> Result<()> {
        self.forward(|s| s.lock(range, wait))
    }

    fn unlock(&mut self, span: ByteSpan) -> Result<()> {
        self.forward(|s| s.unlock(span))
    }

    fn close(&mut self) -> Result<()> {
        self.forward(|s| s.close())
    }

    /// Falls back to the last forwarded state when called from inside
    /// [`Synchronized::with`], where the target cannot be borrowed again
    ///
    /// 在 [`Synchronized::with`] 内部调用时目标无法再次借用，此时返回最近一次转发所见的状态
    fn is_closed(&self) -> bool {
        self.with(|s| s.is_closed())
            .unwrap_or_else(|_| self.closed.load(Ordering::Acquire))
    }

    // Whole-buffer loops run under one hold so concurrent callers never interleave
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.forward(|s| s.read_exact(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.forward(|s| s.write_all(buf))
    }
}

impl<S: FileStream> FileStream for Synchronized<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (&*self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (&*self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (&*self).seek(pos)
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        (&*self).truncate(len)
    }

    fn flush(&mut self) -> Result<()> {
        (&*self).flush()
    }

    fn stat(&mut self) -> Result<FileStat> {
        (&*self).stat()
    }

    fn lock(&mut self, range: LockRange, wait: Wait) -> Result<()> {
        (&*self).lock(range, wait)
    }

    fn unlock(&mut self, span: ByteSpan) -> Result<()> {
        (&*self).unlock(span)
    }

    fn close(&mut self) -> Result<()> {
        (&*self).close()
    }

    fn is_closed(&self) -> bool {
        FileStream::is_closed(&self)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (&*self).read_exact(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (&*self).write_all(buf)
    }
}
