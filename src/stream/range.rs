//! Byte spans and lock range types
//!
//! 字节区间与锁范围类型

use super::error::{Error, Result};
use std::fmt;
use std::ops::Range;

/// Lock mode
///
/// 锁模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LockMode {
    /// Many holders may share the range
    ///
    /// 多个持有者可共享该范围
    Shared,
    /// Single holder, conflicts with every other lock on the range
    ///
    /// 唯一持有者，与该范围上的其他任何锁冲突
    Exclusive,
}

/// Half-open byte interval `[start, end)`
///
/// 左闭右开字节区间 `[start, end)`
///
/// An `end` of `u64::MAX` means "to end of file, including bytes appended later".
///
/// `end` 为 `u64::MAX` 表示"直到文件末尾，包括之后追加的字节"。
///
/// # Examples
///
/// ```
/// use lockstream::ByteSpan;
///
/// let span = ByteSpan::new(10, 20).unwrap();
/// assert_eq!(span.start(), 10);
/// assert_eq!(span.end(), 30);
/// assert_eq!(span.len(), Some(20));
///
/// let tail = ByteSpan::to_end(100);
/// assert!(tail.is_unbounded());
/// assert!(tail.overlaps(&ByteSpan::new(u64::MAX - 2, 1).unwrap()));
///
/// // A bounded span may not end on the sentinel
/// // 有界区间不能以哨兵值结尾
/// assert!(ByteSpan::new(u64::MAX - 1, 1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ByteSpan {
    /// Start position (inclusive)
    ///
    /// 起始位置（包含）
    start: u64,

    /// End position (exclusive), `u64::MAX` when unbounded
    ///
    /// 结束位置（不包含），无界时为 `u64::MAX`
    end: u64,
}

impl ByteSpan {
    /// Span of `len` bytes at `offset`
    ///
    /// 从 `offset` 开始长度为 `len` 的区间
    ///
    /// # Errors
    /// `InvalidArgument` if `len` is 0 or `offset + len` reaches `u64::MAX`, which
    /// is reserved for [`ByteSpan::to_end`]
    ///
    /// # Errors
    /// `len` 为 0 或 `offset + len` 达到 `u64::MAX`（保留给 [`ByteSpan::to_end`]）时
    /// 返回 `InvalidArgument`
    pub fn new(offset: u64, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(Error::invalid("lock range length must be non-zero"));
        }
        match offset.checked_add(len) {
            Some(end) if end < u64::MAX => Ok(Self { start: offset, end }),
            _ => Err(Error::invalid(format!(
                "range {offset}+{len} runs past the last bounded byte, use ByteSpan::to_end"
            ))),
        }
    }

    /// Span from `offset` to end of file
    ///
    /// 从 `offset` 到文件末尾的区间
    ///
    /// `offset` is capped at `u64::MAX - 1` so the span is never empty.
    ///
    /// `offset` 最大取 `u64::MAX - 1`，保证区间非空。
    #[inline]
    pub fn to_end(offset: u64) -> Self {
        Self {
            start: offset.min(u64::MAX - 1),
            end: u64::MAX,
        }
    }

    /// Internal constructor, no validation
    ///
    /// 内部构造函数，不进行验证
    #[inline]
    pub(crate) fn from_bounds_unchecked(start: u64, end: u64) -> Self {
        debug_assert!(start < end);
        Self { start, end }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.end == u64::MAX
    }

    /// Length in bytes, `None` when unbounded
    ///
    /// 字节长度，无界时为 `None`
    #[inline]
    pub fn len(&self) -> Option<u64> {
        (!self.is_unbounded()).then(|| self.end - self.start)
    }

    #[inline]
    pub fn overlaps(&self, other: &ByteSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[inline]
    pub fn contains(&self, other: &ByteSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Remove `other` from `self`, returning the pieces left over
    ///
    /// 从 `self` 中去除 `other`，返回剩余部分
    ///
    /// Yields zero, one or two spans in ascending order.
    ///
    /// 按升序返回零个、一个或两个区间。
    pub fn subtract(&self, other: &ByteSpan) -> Vec<ByteSpan> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(2);
        if self.start < other.start {
            pieces.push(ByteSpan::from_bounds_unchecked(self.start, other.start));
        }
        if other.end < self.end {
            pieces.push(ByteSpan::from_bounds_unchecked(other.end, self.end));
        }
        pieces
    }

    /// Convert to standard Range<u64>
    ///
    /// 转换为标准 Range<u64>
    #[inline]
    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

impl fmt::Display for ByteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "[{}, EOF)", self.start)
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

impl From<ByteSpan> for Range<u64> {
    #[inline]
    fn from(span: ByteSpan) -> Self {
        span.as_range()
    }
}

/// Requested or held byte-range lock
///
/// 请求的或已持有的字节范围锁
///
/// # Examples
///
/// ```
/// use lockstream::{LockMode, LockRange};
///
/// let range = LockRange::new(0, 4096, LockMode::Exclusive).unwrap();
/// assert_eq!(range.span().len(), Some(4096));
///
/// let whole = LockRange::to_end(0, LockMode::Shared);
/// assert!(whole.span().is_unbounded());
///
/// assert!(LockRange::new(0, 0, LockMode::Shared).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LockRange {
    span: ByteSpan,
    mode: LockMode,
}

impl LockRange {
    pub fn new(offset: u64, len: u64, mode: LockMode) -> Result<Self> {
        Ok(Self {
            span: ByteSpan::new(offset, len)?,
            mode,
        })
    }

    #[inline]
    pub fn to_end(offset: u64, mode: LockMode) -> Self {
        Self {
            span: ByteSpan::to_end(offset),
            mode,
        }
    }

    #[inline]
    pub fn from_span(span: ByteSpan, mode: LockMode) -> Self {
        Self { span, mode }
    }

    #[inline]
    pub fn span(&self) -> ByteSpan {
        self.span
    }

    #[inline]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.mode == LockMode::Exclusive
    }
}

impl fmt::Display for LockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.mode, self.span)
    }
}
