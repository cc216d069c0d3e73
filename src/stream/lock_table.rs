//! Per-stream byte-range lock bookkeeping
//!
//! 每个流的字节范围锁记录
//!
//! [`LockTable`] records what one stream holds and drives the backend to take and
//! drop native locks so that the table and the OS never disagree. It never shares
//! state with other streams: cross-stream exclusion comes only from the native lock.
//!
//! [`LockTable`] 记录单个流持有的锁，并驱动后端获取和释放原生锁，
//! 保证记录与操作系统状态一致。它不与其他流共享状态：跨流互斥只依赖原生锁。

use super::backend::{Backend, RawHandle};
use super::error::{Error, Result};
use super::mode::Access;
use super::range::{ByteSpan, LockMode, LockRange};
use std::thread;
use std::time::{Duration, Instant};

/// How long a lock request may wait for a contended range
///
/// 加锁请求在范围被占用时可等待的时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Fail with `WouldBlock` at once
    ///
    /// 立即以 `WouldBlock` 失败
    Immediate,
    /// Suspend the calling thread until granted
    ///
    /// 挂起调用线程直到获得锁
    Forever,
    /// Suspend up to the given duration, then fail with `Timeout`
    ///
    /// 最多挂起指定时长，之后以 `Timeout` 失败
    Timeout(Duration),
}

/// Polling bounds for [`Wait::Timeout`]
///
/// [`Wait::Timeout`] 的轮询间隔上下限
///
/// Native lock calls cannot time out, so timed waits retry non-blocking attempts,
/// doubling the pause from `min_poll` up to `max_poll`.
///
/// 原生加锁调用无法设置超时，因此限时等待会重复非阻塞尝试，
/// 间隔从 `min_poll` 翻倍直到 `max_poll`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "PollBounds"))]
pub struct LockPolicy {
    min_poll: Duration,
    max_poll: Duration,
}

/// Unchecked form of [`LockPolicy`] read by serde, validated by [`LockPolicy::new`]
///
/// serde 读取的未验证 [`LockPolicy`]，由 [`LockPolicy::new`] 验证
#[cfg(feature = "serde")]
#[derive(Debug, serde::Deserialize)]
pub(crate) struct PollBounds {
    pub(crate) min_poll: Duration,
    pub(crate) max_poll: Duration,
}

#[cfg(feature = "serde")]
impl TryFrom<PollBounds> for LockPolicy {
    type Error = Error;

    fn try_from(bounds: PollBounds) -> Result<Self> {
        Self::new(bounds.min_poll, bounds.max_poll)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            min_poll: Duration::from_millis(1),
            max_poll: Duration::from_millis(50),
        }
    }
}

impl LockPolicy {
    /// # Errors
    /// `InvalidArgument` if `min_poll` is zero or greater than `max_poll`
    ///
    /// # Errors
    /// `min_poll` 为零或大于 `max_poll` 时返回 `InvalidArgument`
    pub fn new(min_poll: Duration, max_poll: Duration) -> Result<Self> {
        if min_poll.is_zero() || min_poll > max_poll {
            return Err(Error::invalid(format!(
                "poll bounds must satisfy 0 < min ({min_poll:?}) <= max ({max_poll:?})"
            )));
        }
        Ok(Self { min_poll, max_poll })
    }

    #[inline]
    pub fn min_poll(&self) -> Duration {
        self.min_poll
    }

    #[inline]
    pub fn max_poll(&self) -> Duration {
        self.max_poll
    }
}

/// Locks currently held by one stream
///
/// 单个流当前持有的锁
///
/// Invariant: an exclusive entry never overlaps any other entry. Shared entries
/// may overlap each other.
///
/// 不变量：独占条目从不与其他任何条目重叠，共享条目之间可以重叠。
#[derive(Debug, Default)]
pub struct LockTable {
    held: Vec<LockRange>,
}

impl LockTable {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently held ranges, in acquisition order
    ///
    /// 当前持有的范围，按获取顺序排列
    #[inline]
    pub fn held(&self) -> &[LockRange] {
        &self.held
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Take `range`, recording it on success
    ///
    /// 获取 `range`，成功后记录
    ///
    /// An exclusive request over ranges this stream holds shared is an upgrade: the
    /// shared entries are replaced only once the exclusive lock is granted, and a
    /// failed request leaves the table unchanged. Coalescing backends convert the
    /// bytes in one native call. Stacking backends refuse exclusive over the handle's
    /// own shared locks, so those are dropped for the attempt and re-taken on failure.
    ///
    /// 在本流已共享持有的范围上请求独占锁视为升级：独占锁获取成功后才替换共享条目，
    /// 失败的请求不会改变记录。合并型后端通过一次原生调用原地转换；
    /// 叠加型后端不允许在本句柄自己的共享锁上加独占锁，
    /// 因此尝试期间先释放共享锁，失败后重新加回。
    ///
    /// On a stacking backend the upgrade is therefore not atomic: while the exclusive
    /// attempt runs this stream holds nothing on those bytes, and if another stream
    /// takes them in that gap a shared range cannot be put back. Such a range is
    /// dropped from [`LockTable::held`] and logged with `warn!`.
    ///
    /// 因此在叠加型后端上升级不是原子的：独占尝试期间本流在这些字节上不持有任何锁，
    /// 若其他流在此间隙取得这些字节，共享范围将无法加回。
    /// 这样的范围会从 [`LockTable::held`] 中移除，并以 `warn!` 记录。
    pub fn request(
        &mut self,
        backend: &dyn Backend,
        handle: RawHandle,
        access: Access,
        range: LockRange,
        wait: Wait,
        policy: &LockPolicy,
    ) -> Result<()> {
        check_access(access, range.mode())?;
        let span = range.span();

        let overlapping: Vec<usize> = self
            .held
            .iter()
            .enumerate()
            .filter(|(_, held)| held.span().overlaps(&span))
            .map(|(i, _)| i)
            .collect();

        if let Some(&i) = overlapping.iter().find(|&&i| self.held[i].is_exclusive()) {
            return Err(Error::invalid(format!(
                "{range} overlaps held {}",
                self.held[i]
            )));
        }
        let upgrade = range.is_exclusive() && !overlapping.is_empty();
        if upgrade {
            if let Some(&i) = overlapping.iter().find(|&&i| !span.contains(&self.held[i].span())) {
                return Err(Error::invalid(format!(
                    "upgrade to {range} only partially covers held {}",
                    self.held[i]
                )));
            }
        }

        let coalescing = backend.capabilities().coalescing;
        if upgrade && !coalescing {
            // A stacking backend will not grant exclusive over this handle's own shared locks
            self.upgrade_stacked(backend, handle, &range, &overlapping, wait, policy)?;
        } else {
            acquire(backend, handle, &range, wait, policy).inspect_err(|err| {
                tracing::debug!(backend = backend.name(), %range, %err, "lock not granted");
            })?;
        }

        if upgrade {
            for i in overlapping.into_iter().rev() {
                self.held.remove(i);
            }
            tracing::debug!(%range, "lock upgraded");
        } else {
            tracing::debug!(%range, "lock granted");
        }
        self.held.push(range);
        Ok(())
    }

    /// Upgrade on a stacking backend: drop the shared locks natively, take the
    /// exclusive one, and put the shared locks back if that fails
    ///
    /// 在叠加型后端上升级：先在原生层释放共享锁，再获取独占锁，失败时重新加回共享锁
    ///
    /// On success the caller replaces the shared entries. A shared lock that cannot
    /// be put back is dropped from the table so it never claims bytes the handle no
    /// longer holds.
    ///
    /// 成功时由调用方替换共享条目。无法重新加回的共享锁会从记录中移除，
    /// 避免记录声称持有句柄实际已不再持有的字节。
    fn upgrade_stacked(
        &mut self,
        backend: &dyn Backend,
        handle: RawHandle,
        range: &LockRange,
        overlapping: &[usize],
        wait: Wait,
        policy: &LockPolicy,
    ) -> Result<()> {
        let shared: Vec<LockRange> = overlapping.iter().map(|&i| self.held[i]).collect();
        for (n, entry) in shared.iter().enumerate() {
            if let Err(err) = backend.unlock(handle, entry.span()) {
                self.relock(backend, handle, &shared[..n]);
                return Err(err);
            }
        }

        match acquire(backend, handle, range, wait, policy) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::debug!(backend = backend.name(), %range, %err, "upgrade not granted");
                self.relock(backend, handle, &shared);
                Err(err)
            }
        }
    }

    fn relock(&mut self, backend: &dyn Backend, handle: RawHandle, shared: &[LockRange]) {
        for entry in shared {
            if let Err(err) = backend.lock(handle, entry, false) {
                tracing::warn!(%entry, %err, "shared lock lost while restoring a failed upgrade");
                if let Some(i) = self.held.iter().position(|held| held == entry) {
                    self.held.remove(i);
                }
            }
        }
    }

    /// Release `span`, which must equal a held range or lie inside one
    ///
    /// 释放 `span`，它必须等于某个已持有的范围或位于其内部
    ///
    /// # Errors
    /// - `InvalidArgument` if no held range covers `span`
    /// - `Unsupported` for a sub-range on a backend that only releases whole ranges
    ///
    /// # Errors
    /// - 没有已持有的范围覆盖 `span` 时返回 `InvalidArgument`
    /// - 后端只能整段释放时，对子范围返回 `Unsupported`
    pub fn release(&mut self, backend: &dyn Backend, handle: RawHandle, span: ByteSpan) -> Result<()> {
        let caps = backend.capabilities();

        let (index, leftover) = match self.held.iter().position(|held| held.span() == span) {
            Some(i) => (i, Vec::new()),
            None => {
                let i = self
                    .held
                    .iter()
                    .position(|held| held.span().contains(&span))
                    .ok_or_else(|| Error::invalid(format!("no held lock covers {span}")))?;
                if !caps.partial_unlock {
                    return Err(Error::Unsupported(
                        "backend only releases whole previously locked ranges",
                    ));
                }
                let entry = self.held[i];
                let pieces = entry
                    .span()
                    .subtract(&span)
                    .into_iter()
                    .map(|piece| LockRange::from_span(piece, entry.mode()))
                    .collect();
                (i, pieces)
            }
        };

        if caps.coalescing {
            // Bytes still covered by another entry stay locked
            let others = self
                .held
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != index)
                .map(|(_, held)| held.span())
                .chain(leftover.iter().map(LockRange::span));
            for piece in uncovered(span, others) {
                backend.unlock(handle, piece)?;
            }
        } else {
            backend.unlock(handle, span)?;
        }

        let released = self.held.remove(index);
        self.held.extend(leftover);
        tracing::debug!(%released, %span, "lock released");
        Ok(())
    }

    /// Best-effort release of everything held, used when the stream closes
    ///
    /// 尽力释放所有持有的锁，在流关闭时使用
    ///
    /// Failures are logged, not returned: closing the handle drops the native locks anyway.
    ///
    /// 失败只记录日志而不返回：关闭句柄时原生锁无论如何都会被释放。
    pub fn drain(&mut self, backend: &dyn Backend, handle: RawHandle) {
        for range in self.held.drain(..).rev() {
            if let Err(err) = backend.unlock(handle, range.span()) {
                tracing::warn!(%range, %err, "failed to release lock at close");
            }
        }
    }
}

fn check_access(access: Access, mode: LockMode) -> Result<()> {
    match mode {
        LockMode::Shared if !access.readable() => Err(Error::invalid(format!(
            "shared lock requires a readable stream, opened as {access:?}"
        ))),
        LockMode::Exclusive if !access.writable() => Err(Error::invalid(format!(
            "exclusive lock requires a writable stream, opened as {access:?}"
        ))),
        _ => Ok(()),
    }
}

fn acquire(
    backend: &dyn Backend,
    handle: RawHandle,
    range: &LockRange,
    wait: Wait,
    policy: &LockPolicy,
) -> Result<()> {
    match wait {
        Wait::Immediate => backend.lock(handle, range, false),
        Wait::Forever => backend.lock(handle, range, true),
        Wait::Timeout(limit) => {
            // A deadline past what Instant can represent is no deadline at all
            let Some(deadline) = Instant::now().checked_add(limit) else {
                return backend.lock(handle, range, true);
            };
            let mut pause = policy.min_poll;
            loop {
                match backend.lock(handle, range, false) {
                    Err(Error::WouldBlock) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(Error::Timeout(limit));
                        }
                        thread::sleep(pause.min(deadline - now));
                        pause = (pause * 2).min(policy.max_poll);
                    }
                    other => return other,
                }
            }
        }
    }
}

/// Parts of `span` not covered by any of `others`
///
/// `span` 中未被 `others` 覆盖的部分
pub(crate) fn uncovered(span: ByteSpan, others: impl IntoIterator<Item = ByteSpan>) -> Vec<ByteSpan> {
    others.into_iter().fold(vec![span], |pieces, other| {
        pieces.into_iter().flat_map(|piece| piece.subtract(&other)).collect()
    })
}
