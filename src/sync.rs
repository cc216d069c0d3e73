//! Thread- and process-safety proxy
//!
//! 线程与进程安全代理
//!
//! [`Synchronized`] wraps a target and runs every operation under an [`Exclusion`]:
//! a [`ThreadLock`] for threads of one process, or a [`NamedLock`] shared by every
//! process using the same name.
//!
//! [`Synchronized`] 包装目标并在 [`Exclusion`] 下执行每个操作：
//! 进程内线程使用 [`ThreadLock`]，跨进程使用按名称共享的 [`NamedLock`]。

mod exclusion;
mod named;
mod proxy;


pub use exclusion::{Exclusion, ExclusionGuard, ExclusionScope, ThreadLock};
pub use named::NamedLock;
pub use proxy::{Entered, Synchronized};
