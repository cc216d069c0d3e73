//! Handle-based backend built on windows-sys
//!
//! 基于 windows-sys 的句柄后端
//!
//! Handles are opened synchronously; `OVERLAPPED` only carries the lock offset.
//! `LockFileEx` locks stack instead of merging and can only be released with the
//! exact offset/length they were taken with.
//!
//! 句柄以同步方式打开；`OVERLAPPED` 只用于携带锁偏移。
//! `LockFileEx` 的锁会叠加而不是合并，且只能用获取时完全相同的偏移/长度释放。

use super::{Backend, FileIdentity, FileStat, LockCapabilities, RawHandle};
use crate::stream::error::{Error, Result};
use crate::stream::mode::{Access, Creation, OpenMode};
use crate::stream::range::{ByteSpan, LockMode, LockRange};
use std::io::{self, SeekFrom};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetHandleInformation, ERROR_IO_PENDING, ERROR_LOCK_VIOLATION, GENERIC_READ,
    GENERIC_WRITE, HANDLE, HANDLE_FLAG_INHERIT, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, GetFileInformationByHandle, LockFileEx, ReadFile,
    SetEndOfFile, SetFilePointerEx, UnlockFileEx, WriteFile, BY_HANDLE_FILE_INFORMATION,
    CREATE_ALWAYS, CREATE_NEW, FILE_ATTRIBUTE_NORMAL, FILE_BEGIN, FILE_CURRENT, FILE_END,
    FILE_GENERIC_WRITE, FILE_READ_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, FILE_WRITE_DATA,
    LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OPEN_ALWAYS, OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::OVERLAPPED;

/// Seconds between 1601-01-01 and 1970-01-01
///
/// 1601-01-01 与 1970-01-01 之间的秒数
const FILETIME_EPOCH_OFFSET_SECS: u64 = 11_644_473_600;

#[derive(Debug)]
pub(crate) struct WindowsBackend;

#[inline]
fn raw(handle: RawHandle) -> HANDLE {
    handle.as_raw() as HANDLE
}

#[inline]
fn cvt(ok: i32) -> io::Result<()> {
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Every handle can stat itself, so `FILE_READ_ATTRIBUTES` is always requested
///
/// 每个句柄都能查询自身信息，因此总是请求 `FILE_READ_ATTRIBUTES`
fn desired_access(access: Access) -> u32 {
    let rights = match access {
        Access::Read => GENERIC_READ,
        Access::Write => GENERIC_WRITE,
        // Write access minus FILE_WRITE_DATA: every write lands at end of file
        Access::Append => FILE_GENERIC_WRITE & !FILE_WRITE_DATA,
        Access::ReadWrite => GENERIC_READ | GENERIC_WRITE,
    };
    rights | FILE_READ_ATTRIBUTES
}

fn disposition(creation: Creation) -> u32 {
    match creation {
        Creation::OpenExisting => OPEN_EXISTING,
        Creation::CreateIfMissing => OPEN_ALWAYS,
        Creation::CreateExclusive => CREATE_NEW,
        Creation::TruncateExisting => CREATE_ALWAYS,
    }
}

/// Offset/length pair for `LockFileEx`; unbounded spans run to the end of the u64 space
///
/// `LockFileEx` 使用的偏移/长度；无界区间延伸到 u64 空间末尾
fn span_to_words(span: ByteSpan) -> (OVERLAPPED, u32, u32) {
    let len = span.len().unwrap_or(u64::MAX - span.start());
    // Safety: OVERLAPPED is plain data, all-zero is valid
    // Safety: OVERLAPPED 是普通数据，全零合法
    let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
    ov.Anonymous.Anonymous.Offset = span.start() as u32;
    ov.Anonymous.Anonymous.OffsetHigh = (span.start() >> 32) as u32;
    (ov, len as u32, (len >> 32) as u32)
}

fn lock_failure(err: io::Error) -> Error {
    match err.raw_os_error() {
        Some(code) if code == ERROR_LOCK_VIOLATION as i32 || code == ERROR_IO_PENDING as i32 => {
            Error::WouldBlock
        }
        _ => Error::from_lock_failure(err),
    }
}

fn system_time(low: u32, high: u32) -> SystemTime {
    let intervals = ((high as u64) << 32) | low as u64;
    let since_1601 = Duration::new(intervals / 10_000_000, ((intervals % 10_000_000) * 100) as u32);
    let offset = Duration::from_secs(FILETIME_EPOCH_OFFSET_SECS);
    match since_1601.checked_sub(offset) {
        Some(after) => UNIX_EPOCH + after,
        None => UNIX_EPOCH - (offset - since_1601),
    }
}

impl Backend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn capabilities(&self) -> LockCapabilities {
        LockCapabilities {
            partial_unlock: false,
            coalescing: false,
        }
    }

    fn open(&self, path: &Path, mode: &OpenMode) -> Result<RawHandle> {
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        if wide[..wide.len() - 1].contains(&0) {
            return Err(Error::invalid(format!("path {} contains a NUL", path.display())));
        }

        let attrs = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: mode.is_inheritable() as i32,
        };

        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                desired_access(mode.access()),
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                &attrs,
                disposition(mode.creation_policy()),
                FILE_ATTRIBUTE_NORMAL,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error().into());
        }
        tracing::trace!(handle = handle as isize, path = %path.display(), "open");
        Ok(RawHandle::from_raw(handle as isize))
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        cvt(unsafe { CloseHandle(raw(handle)) }).map_err(Error::Io)
    }

    fn read(&self, handle: RawHandle, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len().min(u32::MAX as usize) as u32;
        let mut read = 0u32;
        cvt(unsafe { ReadFile(raw(handle), buf.as_mut_ptr(), len, &mut read, std::ptr::null_mut()) })?;
        Ok(read as usize)
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> Result<usize> {
        let len = buf.len().min(u32::MAX as usize) as u32;
        let mut written = 0u32;
        cvt(unsafe { WriteFile(raw(handle), buf.as_ptr(), len, &mut written, std::ptr::null_mut()) })?;
        Ok(written as usize)
    }

    fn seek(&self, handle: RawHandle, pos: SeekFrom) -> Result<u64> {
        let (distance, method) = match pos {
            SeekFrom::Start(n) => (
                i64::try_from(n).map_err(|_| Error::invalid(format!("seek offset {n} too large")))?,
                FILE_BEGIN,
            ),
            SeekFrom::Current(n) => (n, FILE_CURRENT),
            SeekFrom::End(n) => (n, FILE_END),
        };
        let mut new_pos = 0i64;
        cvt(unsafe { SetFilePointerEx(raw(handle), distance, &mut new_pos, method) })?;
        Ok(new_pos as u64)
    }

    fn truncate(&self, handle: RawHandle, len: u64) -> Result<()> {
        let cursor = self.seek(handle, SeekFrom::Current(0))?;
        self.seek(handle, SeekFrom::Start(len))?;
        let truncated = cvt(unsafe { SetEndOfFile(raw(handle)) });
        self.seek(handle, SeekFrom::Start(cursor))?;
        truncated?;
        Ok(())
    }

    fn flush(&self, handle: RawHandle) -> Result<()> {
        cvt(unsafe { FlushFileBuffers(raw(handle)) }).map_err(Error::Io)
    }

    fn stat(&self, handle: RawHandle) -> Result<FileStat> {
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };
        cvt(unsafe { GetFileInformationByHandle(raw(handle), &mut info) })?;
        Ok(FileStat {
            size: ((info.nFileSizeHigh as u64) << 32) | info.nFileSizeLow as u64,
            modified: system_time(
                info.ftLastWriteTime.dwLowDateTime,
                info.ftLastWriteTime.dwHighDateTime,
            ),
            identity: FileIdentity {
                device: info.dwVolumeSerialNumber as u64,
                index: ((info.nFileIndexHigh as u64) << 32) | info.nFileIndexLow as u64,
            },
        })
    }

    fn lock(&self, handle: RawHandle, range: &LockRange, blocking: bool) -> Result<()> {
        let mut flags = 0;
        if range.mode() == LockMode::Exclusive {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        if !blocking {
            flags |= LOCKFILE_FAIL_IMMEDIATELY;
        }
        let (mut ov, low, high) = span_to_words(range.span());
        cvt(unsafe { LockFileEx(raw(handle), flags, 0, low, high, &mut ov) }).map_err(lock_failure)
    }

    fn unlock(&self, handle: RawHandle, span: ByteSpan) -> Result<()> {
        let (mut ov, low, high) = span_to_words(span);
        cvt(unsafe { UnlockFileEx(raw(handle), 0, low, high, &mut ov) }).map_err(Error::from_lock_failure)
    }

    fn is_inheritable(&self, handle: RawHandle) -> Result<bool> {
        let mut flags = 0u32;
        cvt(unsafe { GetHandleInformation(raw(handle), &mut flags) })?;
        Ok(flags & HANDLE_FLAG_INHERIT != 0)
    }
}
