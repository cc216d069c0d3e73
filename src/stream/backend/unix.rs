//! Descriptor-based backend built on libc
//!
//! 基于 libc 的描述符后端
//!
//! Locks use open-file-description records (`F_OFD_*`) where the kernel has them, so
//! a lock belongs to the descriptor that took it. Elsewhere classic `F_SETLK` records
//! are used and conflicts are only detected between processes.
//!
//! 在内核支持时使用打开文件描述记录锁（`F_OFD_*`），锁属于获取它的描述符。
//! 其他平台使用传统 `F_SETLK` 记录锁，只能检测进程之间的冲突。

use super::{Backend, FileIdentity, FileStat, LockCapabilities, RawHandle};
use crate::stream::error::{Error, Result};
use crate::stream::mode::{Access, Creation, OpenMode};
use crate::stream::range::{ByteSpan, LockMode, LockRange};
use libc::{c_int, off_t};
use std::ffi::CString;
use std::io::{self, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SET_LOCK: c_int = libc::F_OFD_SETLK;
#[cfg(any(target_os = "linux", target_os = "android"))]
const SET_LOCK_WAIT: c_int = libc::F_OFD_SETLKW;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SET_LOCK: c_int = libc::F_SETLK;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SET_LOCK_WAIT: c_int = libc::F_SETLKW;

/// Permission bits for newly created files, before umask
///
/// 新建文件的权限位（umask 之前）
const CREATE_PERMISSIONS: libc::c_uint = 0o666;

#[derive(Debug)]
pub(crate) struct UnixBackend;

#[inline]
fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[inline]
fn cvt_size(ret: isize) -> io::Result<usize> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Re-issue a call interrupted by a signal
///
/// 重新发起被信号中断的调用
fn retry<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[inline]
fn fd(handle: RawHandle) -> c_int {
    handle.as_raw() as c_int
}

fn to_off(value: u64, what: &str) -> Result<off_t> {
    off_t::try_from(value).map_err(|_| Error::invalid(format!("{what} {value} exceeds off_t")))
}

/// `(l_start, l_len)` for a span; `l_len == 0` covers to end of file
///
/// 区间对应的 `(l_start, l_len)`；`l_len == 0` 表示直到文件末尾
fn span_to_record(span: ByteSpan) -> Result<(off_t, off_t)> {
    let start = to_off(span.start(), "lock offset")?;
    match span.len() {
        None => Ok((start, 0)),
        Some(len) => {
            let len = to_off(len, "lock length")?;
            start
                .checked_add(len)
                .ok_or_else(|| Error::invalid(format!("lock range {span} exceeds off_t")))?;
            Ok((start, len))
        }
    }
}

fn open_flags(mode: &OpenMode) -> c_int {
    let access = match mode.access() {
        Access::Read => libc::O_RDONLY,
        Access::Write => libc::O_WRONLY,
        Access::Append => libc::O_WRONLY | libc::O_APPEND,
        Access::ReadWrite => libc::O_RDWR,
    };
    let creation = match mode.creation_policy() {
        Creation::OpenExisting => 0,
        Creation::CreateIfMissing => libc::O_CREAT,
        Creation::CreateExclusive => libc::O_CREAT | libc::O_EXCL,
        Creation::TruncateExisting => libc::O_CREAT | libc::O_TRUNC,
    };
    let inherit = if mode.is_inheritable() { 0 } else { libc::O_CLOEXEC };
    access | creation | inherit
}

fn set_record(handle: RawHandle, kind: c_int, span: ByteSpan, wait: bool) -> Result<()> {
    let (start, len) = span_to_record(span)?;
    // Safety: all-zero is a valid flock, and l_pid must be 0 for OFD records
    // Safety: 全零是合法的 flock，且 OFD 记录要求 l_pid 为 0
    let mut record: libc::flock = unsafe { std::mem::zeroed() };
    record.l_type = kind as _;
    record.l_whence = libc::SEEK_SET as _;
    record.l_start = start;
    record.l_len = len;

    let cmd = if wait { SET_LOCK_WAIT } else { SET_LOCK };
    retry(|| cvt(unsafe { libc::fcntl(fd(handle), cmd, &record as *const libc::flock) }))
        .map(drop)
        .map_err(|err| match err.raw_os_error() {
            // POSIX allows either errno for a conflicting record
            Some(libc::EAGAIN) | Some(libc::EACCES) => Error::WouldBlock,
            _ => Error::from_lock_failure(err),
        })
}

fn system_time(secs: i64, nanos: i64) -> SystemTime {
    let nanos = nanos.clamp(0, 999_999_999) as u32;
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nanos as u64)
    }
}

impl Backend for UnixBackend {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn capabilities(&self) -> LockCapabilities {
        LockCapabilities {
            partial_unlock: true,
            coalescing: true,
        }
    }

    fn open(&self, path: &Path, mode: &OpenMode) -> Result<RawHandle> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::invalid(format!("path {} contains a NUL byte", path.display())))?;
        let flags = open_flags(mode);

        let raw = retry(|| cvt(unsafe { libc::open(c_path.as_ptr(), flags, CREATE_PERMISSIONS) }))?;
        tracing::trace!(fd = raw, flags, path = %path.display(), "open");
        Ok(RawHandle::from_raw(raw as isize))
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        match cvt(unsafe { libc::close(fd(handle)) }) {
            // The descriptor is released even when close is interrupted
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(Error::Io(e)),
            Ok(_) => Ok(()),
        }
    }

    fn read(&self, handle: RawHandle, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len().min(isize::MAX as usize);
        let n = retry(|| {
            cvt_size(unsafe { libc::read(fd(handle), buf.as_mut_ptr().cast(), len) })
        })?;
        Ok(n)
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> Result<usize> {
        let len = buf.len().min(isize::MAX as usize);
        let n = retry(|| cvt_size(unsafe { libc::write(fd(handle), buf.as_ptr().cast(), len) }))?;
        Ok(n)
    }

    fn seek(&self, handle: RawHandle, pos: SeekFrom) -> Result<u64> {
        let (offset, whence) = match pos {
            SeekFrom::Start(n) => (to_off(n, "seek offset")?, libc::SEEK_SET),
            SeekFrom::Current(n) => (to_off_signed(n)?, libc::SEEK_CUR),
            SeekFrom::End(n) => (to_off_signed(n)?, libc::SEEK_END),
        };
        let ret = unsafe { libc::lseek(fd(handle), offset, whence) };
        if ret == -1 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(ret as u64)
    }

    fn truncate(&self, handle: RawHandle, len: u64) -> Result<()> {
        let len = to_off(len, "length")?;
        retry(|| cvt(unsafe { libc::ftruncate(fd(handle), len) }))?;
        Ok(())
    }

    fn flush(&self, handle: RawHandle) -> Result<()> {
        retry(|| cvt(unsafe { libc::fsync(fd(handle)) })).map_err(Error::Io)?;
        Ok(())
    }

    fn stat(&self, handle: RawHandle) -> Result<FileStat> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        cvt(unsafe { libc::fstat(fd(handle), &mut st) })?;
        Ok(FileStat {
            size: st.st_size as u64,
            modified: system_time(st.st_mtime as i64, st.st_mtime_nsec as i64),
            identity: FileIdentity {
                device: st.st_dev as u64,
                index: st.st_ino as u64,
            },
        })
    }

    fn lock(&self, handle: RawHandle, range: &LockRange, blocking: bool) -> Result<()> {
        let kind = match range.mode() {
            LockMode::Shared => libc::F_RDLCK,
            LockMode::Exclusive => libc::F_WRLCK,
        };
        set_record(handle, kind as c_int, range.span(), blocking)
    }

    fn unlock(&self, handle: RawHandle, span: ByteSpan) -> Result<()> {
        set_record(handle, libc::F_UNLCK as c_int, span, false)
    }

    fn is_inheritable(&self, handle: RawHandle) -> Result<bool> {
        let flags = cvt(unsafe { libc::fcntl(fd(handle), libc::F_GETFD) })?;
        Ok(flags & libc::FD_CLOEXEC == 0)
    }
}

fn to_off_signed(value: i64) -> Result<off_t> {
    off_t::try_from(value).map_err(|_| Error::invalid(format!("seek offset {value} exceeds off_t")))
}
