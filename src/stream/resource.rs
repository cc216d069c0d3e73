//! Native resource lifecycle: creation, inheritance, release
//!
//! 原生资源生命周期：创建、继承、释放

use super::backend::{Backend, RawHandle};
use super::error::{Error, Result};
use super::lock_table::{LockPolicy, LockTable, Wait};
use super::mode::OpenMode;
use super::range::{ByteSpan, LockRange};
use std::path::Path;

/// Owner of one native handle and the locks taken through it
///
/// 单个原生句柄及通过它获取的锁的所有者
///
/// The handle is created by [`Resource::open`] and invalidated exactly once, by
/// [`Resource::close`] or on drop. Closing drains the lock table first so lock
/// release does not depend on incidental OS behaviour.
///
/// 句柄由 [`Resource::open`] 创建，并且只失效一次：通过 [`Resource::close`] 或在 drop 时。
/// 关闭时先清空锁表，使锁的释放不依赖操作系统的附带行为。
///
/// Inheritability is fixed at creation from [`OpenMode::is_inheritable`]: a
/// non-inheritable handle is invisible to processes spawned afterwards, an
/// inheritable one is visible under the same [`RawHandle`] value.
///
/// 可继承性在创建时由 [`OpenMode::is_inheritable`] 确定：不可继承的句柄对之后创建的进程不可见，
/// 可继承的句柄以相同的 [`RawHandle`] 值可见。
pub struct Resource {
    backend: &'static dyn Backend,
    handle: Option<RawHandle>,
    mode: OpenMode,
    locks: LockTable,
}

impl Resource {
    /// Validate `mode` and create the native resource
    ///
    /// 验证 `mode` 并创建原生资源
    ///
    /// A failed open leaves nothing behind to release.
    ///
    /// 打开失败不会留下任何需要释放的资源。
    pub fn open(backend: &'static dyn Backend, path: &Path, mode: OpenMode) -> Result<Self> {
        mode.validate()?;
        let handle = backend.open(path, &mode).inspect_err(|err| {
            tracing::debug!(backend = backend.name(), path = %path.display(), ?mode, %err, "open failed");
        })?;
        tracing::debug!(backend = backend.name(), %handle, path = %path.display(), ?mode, "opened");
        Ok(Self {
            backend,
            handle: Some(handle),
            mode,
            locks: LockTable::new(),
        })
    }

    /// Live handle, or `Closed`
    ///
    /// 有效句柄，已关闭时返回 `Closed`
    #[inline]
    pub fn handle(&self) -> Result<RawHandle> {
        self.handle.ok_or(Error::Closed)
    }

    #[inline]
    pub fn backend(&self) -> &'static dyn Backend {
        self.backend
    }

    #[inline]
    pub fn mode(&self) -> &OpenMode {
        &self.mode
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    #[inline]
    pub fn held_locks(&self) -> &[LockRange] {
        self.locks.held()
    }

    /// Native inherit flag, as a spawned child would see it
    ///
    /// 原生继承标志，即子进程所见的状态
    pub fn is_inheritable(&self) -> Result<bool> {
        self.backend.is_inheritable(self.handle()?)
    }

    pub fn lock(&mut self, range: LockRange, wait: Wait, policy: &LockPolicy) -> Result<()> {
        let handle = self.handle()?;
        self.locks
            .request(self.backend, handle, self.mode.access(), range, wait, policy)
    }

    pub fn unlock(&mut self, span: ByteSpan) -> Result<()> {
        let handle = self.handle()?;
        self.locks.release(self.backend, handle, span)
    }

    /// Release locks, then the handle; a no-op once closed
    ///
    /// 先释放锁再释放句柄；已关闭时为空操作
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.locks.drain(self.backend, handle);
        self.backend.close(handle)?;
        tracing::debug!(backend = self.backend.name(), %handle, "closed");
        Ok(())
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("backend", &self.backend.name())
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("locks", &self.locks.held())
            .finish()
    }
}
