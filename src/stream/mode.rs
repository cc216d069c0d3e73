//! Open mode: access, creation policy and inheritability
//!
//! 打开模式：访问方式、创建策略与可继承性

use super::error::{Error, Result};

/// How the stream may access the file
///
/// 流访问文件的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Access {
    /// Read only
    ///
    /// 只读
    Read,
    /// Write only, writes land at the cursor
    ///
    /// 只写，写入位置为当前游标
    Write,
    /// Write only, every write lands at end of file
    ///
    /// 只写，每次写入都追加到文件末尾
    Append,
    /// Read and write
    ///
    /// 读写
    ReadWrite,
}

impl Access {
    #[inline]
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    #[inline]
    pub fn writable(self) -> bool {
        !matches!(self, Access::Read)
    }
}

/// What happens to the path at open time
///
/// 打开时对路径的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Creation {
    /// The file must already exist
    ///
    /// 文件必须已存在
    #[default]
    OpenExisting,
    /// Create the file if it is missing, keep contents otherwise
    ///
    /// 文件不存在时创建，存在时保留内容
    CreateIfMissing,
    /// Create the file, failing with `AlreadyExists` if it is present
    ///
    /// 创建文件，若已存在则以 `AlreadyExists` 失败
    CreateExclusive,
    /// Create the file if missing, truncate it to zero length otherwise
    ///
    /// 文件不存在时创建，存在时截断为零长度
    TruncateExisting,
}

impl Creation {
    /// Map a native-style flag triple to exactly one policy
    ///
    /// 将原生风格的标志组合映射到唯一的策略
    ///
    /// | create | exclusive | truncate | policy |
    /// |---|---|---|---|
    /// | - | - | - | `OpenExisting` |
    /// | ✓ | - | - | `CreateIfMissing` |
    /// | any | ✓ | - | `CreateExclusive` |
    /// | ✓ | - | ✓ | `TruncateExisting` |
    ///
    /// # Errors
    /// `InvalidArgument` for `exclusive + truncate` and for `truncate` without `create`.
    ///
    /// # Errors
    /// `exclusive + truncate` 以及不带 `create` 的 `truncate` 返回 `InvalidArgument`。
    pub fn from_flags(create: bool, exclusive: bool, truncate: bool) -> Result<Self> {
        match (create, exclusive, truncate) {
            (false, false, false) => Ok(Creation::OpenExisting),
            (true, false, false) => Ok(Creation::CreateIfMissing),
            (_, true, false) => Ok(Creation::CreateExclusive),
            (true, false, true) => Ok(Creation::TruncateExisting),
            (_, true, true) => Err(Error::invalid(
                "exclusive creation cannot be combined with truncation",
            )),
            (false, false, true) => Err(Error::invalid(
                "truncation without create is ambiguous, request create as well",
            )),
        }
    }
}

/// Immutable open mode of a stream
///
/// 流的不可变打开模式
///
/// Combines [`Access`], [`Creation`] and whether the native resource is inherited
/// by child processes spawned after it is created.
///
/// 组合了 [`Access`]、[`Creation`] 以及原生资源是否被之后创建的子进程继承。
///
/// # Examples
///
/// ```
/// use lockstream::{Access, Creation, OpenMode};
///
/// let mode = OpenMode::new(Access::ReadWrite)
///     .creation(Creation::CreateIfMissing)
///     .inheritable(true);
/// assert!(mode.validate().is_ok());
///
/// // Truncating a read-only stream makes no sense
/// // 截断只读流没有意义
/// let bad = OpenMode::new(Access::Read).creation(Creation::TruncateExisting);
/// assert!(bad.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpenMode {
    access: Access,
    creation: Creation,
    inheritable: bool,
}

impl OpenMode {
    /// New mode opening an existing file, non-inheritable
    ///
    /// 新模式：打开已存在文件，不可继承
    #[inline]
    pub fn new(access: Access) -> Self {
        Self {
            access,
            creation: Creation::OpenExisting,
            inheritable: false,
        }
    }

    #[inline]
    pub fn read() -> Self {
        Self::new(Access::Read)
    }

    #[inline]
    pub fn read_write() -> Self {
        Self::new(Access::ReadWrite)
    }

    #[inline]
    pub fn creation(mut self, creation: Creation) -> Self {
        self.creation = creation;
        self
    }

    #[inline]
    pub fn inheritable(mut self, inheritable: bool) -> Self {
        self.inheritable = inheritable;
        self
    }

    #[inline]
    pub fn access(&self) -> Access {
        self.access
    }

    #[inline]
    pub fn creation_policy(&self) -> Creation {
        self.creation
    }

    #[inline]
    pub fn is_inheritable(&self) -> bool {
        self.inheritable
    }

    /// Reject access/creation combinations that have no single meaning
    ///
    /// 拒绝没有唯一含义的访问/创建组合
    ///
    /// Truncation needs a plain writable stream: `Read` cannot truncate and
    /// `Append` + truncate is ambiguous across backends.
    ///
    /// 截断需要普通的可写流：`Read` 无法截断，`Append` 加截断在不同后端语义不一致。
    pub fn validate(&self) -> Result<()> {
        if self.creation == Creation::TruncateExisting {
            match self.access {
                Access::Read => return Err(Error::invalid("cannot truncate a read-only stream")),
                Access::Append => {
                    return Err(Error::invalid("append and truncate cannot be combined"));
                }
                Access::Write | Access::ReadWrite => {}
            }
        }
        Ok(())
    }
}
