//! Error types for lockstream
//!
//! lockstream 的错误类型

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error type for stream, lock and proxy operations
///
/// 流、锁与代理操作的错误类型
///
/// Variants fall into three classes callers usually treat differently:
/// - contention, worth retrying: [`Error::WouldBlock`], [`Error::Timeout`]
/// - fundamentally invalid requests: [`Error::InvalidArgument`], [`Error::Unsupported`]
/// - underlying failures: everything else
///
/// 变体分为三类，调用方通常区别对待：
/// - 竞争，可重试：[`Error::WouldBlock`]、[`Error::Timeout`]
/// - 本质上无效的请求：[`Error::InvalidArgument`]、[`Error::Unsupported`]
/// - 底层失败：其余所有变体
#[derive(Debug, Error)]
pub enum Error {
    /// Path or resource does not exist
    ///
    /// 路径或资源不存在
    #[error("not found: {0}")]
    NotFound(#[source] io::Error),

    /// Permission denied by the OS
    ///
    /// 操作系统拒绝访问
    #[error("access denied: {0}")]
    AccessDenied(#[source] io::Error),

    /// Exclusive creation hit an existing file
    ///
    /// 独占创建时文件已存在
    #[error("already exists: {0}")]
    AlreadyExists(#[source] io::Error),

    /// Malformed mode, range or request
    ///
    /// 模式、范围或请求格式错误
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Non-blocking lock request could not be granted now
    ///
    /// 非阻塞加锁请求当前无法满足
    #[error("lock is held elsewhere, operation would block")]
    WouldBlock,

    /// Blocking lock request exceeded its deadline
    ///
    /// 阻塞加锁请求超时
    #[error("lock wait timed out after {0:?}")]
    Timeout(Duration),

    /// Native lock call failed for a reason other than contention
    ///
    /// 原生加锁调用因竞争以外的原因失败
    #[error("lock error: {0}")]
    Lock(#[source] io::Error),

    /// The backend cannot perform this operation
    ///
    /// 后端不支持此操作
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Generic native I/O failure
    ///
    /// 通用原生 I/O 错误
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// Operation attempted on a closed stream
    ///
    /// 在已关闭的流上执行操作
    #[error("stream is closed")]
    Closed,
}

impl Error {
    /// Contention errors (`WouldBlock`, `Timeout`) that callers typically retry
    ///
    /// 调用方通常会重试的竞争类错误
    #[inline]
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Timeout(_))
    }

    /// Requests that can never succeed as issued
    ///
    /// 按原样永远无法成功的请求
    #[inline]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::InvalidArgument(_) | Error::Unsupported(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Normalize a failed native lock call
    ///
    /// 规范化失败的原生加锁调用
    pub(crate) fn from_lock_failure(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::InvalidInput => Error::InvalidArgument(err.to_string()),
            _ => Error::Lock(err),
        }
    }
}

/// Convert from io::Error to Error, normalizing by kind
///
/// 从 io::Error 转换到 Error，按错误种类规范化
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(err),
            io::ErrorKind::PermissionDenied => Error::AccessDenied(err),
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(err),
            io::ErrorKind::InvalidInput => Error::InvalidArgument(err.to_string()),
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::TimedOut => Error::Timeout(Duration::ZERO),
            _ => Error::Io(err),
        }
    }
}

/// Convert from Error to io::Error for compatibility
///
/// 从 Error 转换到 io::Error 以保持兼容性
impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(e)
            | Error::AccessDenied(e)
            | Error::AlreadyExists(e)
            | Error::Lock(e)
            | Error::Io(e) => e,
            Error::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
            Error::WouldBlock => io::Error::new(io::ErrorKind::WouldBlock, err.to_string()),
            Error::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, err.to_string()),
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err.to_string()),
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, err.to_string()),
        }
    }
}

/// Result type alias using our custom Error type
///
/// 使用自定义 Error 类型的 Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
