//! 测试模块

use super::*;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::tempdir;

/// 委托给原生后端，但加锁只做记录的测试后端
#[derive(Debug)]
struct RecordingBackend {
    caps: LockCapabilities,
    locked: Mutex<Vec<LockRange>>,
    unlocked: Mutex<Vec<ByteSpan>>,
    /// 为 true 时独占请求返回 WouldBlock，模拟其他持有者
    refuse_exclusive: AtomicBool,
}

impl RecordingBackend {
    fn leak(partial_unlock: bool, coalescing: bool) -> &'static Self {
        Box::leak(Box::new(Self {
            caps: LockCapabilities {
                partial_unlock,
                coalescing,
            },
            locked: Mutex::new(Vec::new()),
            unlocked: Mutex::new(Vec::new()),
            refuse_exclusive: AtomicBool::new(false),
        }))
    }

    fn locked(&self) -> Vec<LockRange> {
        self.locked.lock().unwrap().clone()
    }

    fn unlocked(&self) -> Vec<ByteSpan> {
        self.unlocked.lock().unwrap().clone()
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn capabilities(&self) -> LockCapabilities {
        self.caps
    }

    fn open(&self, path: &Path, mode: &OpenMode) -> Result<RawHandle> {
        native().open(path, mode)
    }

    fn close(&self, handle: RawHandle) -> Result<()> {
        native().close(handle)
    }

    fn read(&self, handle: RawHandle, buf: &mut [u8]) -> Result<usize> {
        native().read(handle, buf)
    }

    fn write(&self, handle: RawHandle, buf: &[u8]) -> Result<usize> {
        native().write(handle, buf)
    }

    fn seek(&self, handle: RawHandle, pos: SeekFrom) -> Result<u64> {
        native().seek(handle, pos)
    }

    fn truncate(&self, handle: RawHandle, len: u64) -> Result<()> {
        native().truncate(handle, len)
    }

    fn flush(&self, handle: RawHandle) -> Result<()> {
        native().flush(handle)
    }

    fn stat(&self, handle: RawHandle) -> Result<FileStat> {
        native().stat(handle)
    }

    fn lock(&self, _handle: RawHandle, range: &LockRange, _blocking: bool) -> Result<()> {
        if range.is_exclusive() && self.refuse_exclusive.load(Ordering::SeqCst) {
            return Err(Error::WouldBlock);
        }
        self.locked.lock().unwrap().push(*range);
        Ok(())
    }

    fn unlock(&self, _handle: RawHandle, span: ByteSpan) -> Result<()> {
        self.unlocked.lock().unwrap().push(span);
        Ok(())
    }

    fn is_inheritable(&self, handle: RawHandle) -> Result<bool> {
        native().is_inheritable(handle)
    }
}

fn rw_create() -> OpenMode {
    OpenMode::read_write().creation(Creation::CreateIfMissing)
}

fn span(offset: u64, len: u64) -> ByteSpan {
    ByteSpan::new(offset, len).unwrap()
}

fn shared(offset: u64, len: u64) -> LockRange {
    LockRange::new(offset, len, LockMode::Shared).unwrap()
}

fn exclusive(offset: u64, len: u64) -> LockRange {
    LockRange::new(offset, len, LockMode::Exclusive).unwrap()
}

/// OpenMode 与创建策略测试
#[cfg(test)]
mod mode_tests {
    use super::*;

    #[test]
    fn test_creation_from_flags() {
        assert_eq!(Creation::from_flags(false, false, false).unwrap(), Creation::OpenExisting);
        assert_eq!(Creation::from_flags(true, false, false).unwrap(), Creation::CreateIfMissing);
        assert_eq!(Creation::from_flags(false, true, false).unwrap(), Creation::CreateExclusive);
        assert_eq!(Creation::from_flags(true, true, false).unwrap(), Creation::CreateExclusive);
        assert_eq!(Creation::from_flags(true, false, true).unwrap(), Creation::TruncateExisting);

        // 含义不明的组合
        assert!(matches!(
            Creation::from_flags(true, true, true),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Creation::from_flags(false, true, true),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Creation::from_flags(false, false, true),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_rejects_truncating_without_plain_write() {
        let read = OpenMode::new(Access::Read).creation(Creation::TruncateExisting);
        let append = OpenMode::new(Access::Append).creation(Creation::TruncateExisting);
        assert!(read.validate().unwrap_err().is_invalid());
        assert!(append.validate().unwrap_err().is_invalid());

        let dir = tempdir().unwrap();
        let err = Stream::open(dir.path().join("never.bin"), read).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        // 验证失败不会创建文件
        assert!(!dir.path().join("never.bin").exists());
    }

    #[test]
    fn test_every_combination_on_missing_file() {
        let dir = tempdir().unwrap();
        let accesses = [Access::Read, Access::Write, Access::Append, Access::ReadWrite];
        let creations = [
            Creation::OpenExisting,
            Creation::CreateIfMissing,
            Creation::CreateExclusive,
            Creation::TruncateExisting,
        ];

        for (i, access) in accesses.into_iter().enumerate() {
            for (j, creation) in creations.into_iter().enumerate() {
                let path = dir.path().join(format!("missing_{i}_{j}.bin"));
                let mode = OpenMode::new(access).creation(creation);
                let result = Stream::open(&path, mode);

                match (mode.validate(), creation) {
                    (Err(_), _) => assert!(matches!(result, Err(Error::InvalidArgument(_)))),
                    (Ok(()), Creation::OpenExisting) => {
                        assert!(matches!(result, Err(Error::NotFound(_))))
                    }
                    (Ok(()), _) => {
                        let stream = result.unwrap();
                        assert_eq!(stream.mode().access(), access);
                        assert_eq!(stream.mode().creation_policy(), creation);
                        assert!(path.exists());
                    }
                }
            }
        }
    }

    #[test]
    fn test_every_combination_on_existing_file() {
        let dir = tempdir().unwrap();
        let accesses = [Access::Read, Access::Write, Access::Append, Access::ReadWrite];
        let creations = [
            Creation::OpenExisting,
            Creation::CreateIfMissing,
            Creation::CreateExclusive,
            Creation::TruncateExisting,
        ];

        for (i, access) in accesses.into_iter().enumerate() {
            for (j, creation) in creations.into_iter().enumerate() {
                let path = dir.path().join(format!("existing_{i}_{j}.bin"));
                std::fs::write(&path, b"keep").unwrap();
                let mode = OpenMode::new(access).creation(creation);
                let result = Stream::open(&path, mode);

                match (mode.validate(), creation) {
                    (Err(_), _) => assert!(matches!(result, Err(Error::InvalidArgument(_)))),
                    (Ok(()), Creation::CreateExclusive) => {
                        assert!(matches!(result, Err(Error::AlreadyExists(_))))
                    }
                    (Ok(()), Creation::TruncateExisting) => {
                        let mut stream = result.unwrap();
                        assert_eq!(stream.stat().unwrap().size, 0);
                    }
                    (Ok(()), _) => {
                        let mut stream = result.unwrap();
                        assert_eq!(stream.stat().unwrap().size, 4);
                    }
                }
            }
        }
    }

    #[test]
    fn test_lock_range_validation() {
        assert!(matches!(
            LockRange::new(0, 0, LockMode::Shared),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            LockRange::new(u64::MAX, 2, LockMode::Exclusive),
            Err(Error::InvalidArgument(_))
        ));
        let tail = LockRange::to_end(10, LockMode::Shared);
        assert!(tail.span().is_unbounded());
        assert_eq!(tail.span().len(), None);

        // 结尾恰好是 u64::MAX 的有界区间会与"到文件末尾"混淆，被拒绝
        assert!(matches!(ByteSpan::new(u64::MAX - 10, 10), Err(Error::InvalidArgument(_))));
        let last = ByteSpan::new(u64::MAX - 10, 9).unwrap();
        assert!(!last.is_unbounded());
        assert_eq!(last.len(), Some(9));
    }

    #[test]
    fn test_span_subtract() {
        let whole = span(0, 100);
        assert_eq!(whole.subtract(&span(10, 10)), vec![span(0, 10), span(20, 80)]);
        assert_eq!(whole.subtract(&span(0, 10)), vec![span(10, 90)]);
        assert_eq!(whole.subtract(&span(90, 50)), vec![span(0, 90)]);
        assert_eq!(whole.subtract(&span(200, 10)), vec![whole]);
        assert!(whole.subtract(&ByteSpan::to_end(0)).is_empty());

        let tail = ByteSpan::to_end(50);
        assert_eq!(tail.subtract(&span(60, 10)), vec![span(50, 10), ByteSpan::to_end(70)]);
    }
}

/// Stream 读写与生命周期测试
#[cfg(test)]
mod stream_tests {
    use super::*;

    #[test]
    fn test_round_trip_lengths() {
        let dir = tempdir().unwrap();
        // 0、1、一页、一个 8K 缓冲区再多一个字节
        for len in [0usize, 1, 4096, 8193] {
            let path = dir.path().join(format!("round_trip_{len}.bin"));
            let mut stream = Stream::open(&path, rw_create()).unwrap();

            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            stream.write_all(&data).unwrap();
            stream.flush().unwrap();

            assert_eq!(stream.seek(SeekFrom::Start(0)).unwrap(), 0);
            let mut buf = vec![0u8; len];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, data);

            // 文件末尾
            let mut extra = [0u8; 1];
            assert_eq!(stream.read(&mut extra).unwrap(), 0);
        }
    }

    #[test]
    fn test_read_exact_past_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.bin");
        let mut stream = Stream::open(&path, rw_create()).unwrap();
        stream.write_all(b"abc").unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 4];
        let err = stream.read_exact(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("close_twice.bin");
        let mut stream = Stream::open(&path, rw_create()).unwrap();

        assert!(!stream.is_closed());
        stream.close().unwrap();
        assert!(stream.is_closed());
        stream.close().unwrap();
        assert!(stream.is_closed());

        // 关闭后其他操作返回 Closed
        assert!(matches!(stream.write(b"x"), Err(Error::Closed)));
        assert!(matches!(stream.read(&mut [0u8; 1]), Err(Error::Closed)));
        assert!(matches!(stream.seek(SeekFrom::Start(0)), Err(Error::Closed)));
        assert!(matches!(stream.stat(), Err(Error::Closed)));
        assert!(matches!(stream.try_lock(exclusive(0, 1)), Err(Error::Closed)));
        assert!(matches!(stream.raw_handle(), Err(Error::Closed)));
    }

    #[test]
    fn test_append_writes_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.bin");
        std::fs::write(&path, b"abc").unwrap();

        let mut stream = Stream::open(&path, OpenMode::new(Access::Append)).unwrap();
        stream.write_all(b"def").unwrap();
        stream.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_truncate_and_stat() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("truncate.bin");
        let mut stream = Stream::open(&path, rw_create()).unwrap();
        stream.write_all(&[7u8; 100]).unwrap();
        assert_eq!(stream.stat().unwrap().size, 100);

        stream.truncate(10).unwrap();
        assert_eq!(stream.stat().unwrap().size, 10);

        stream.truncate(4096).unwrap();
        assert_eq!(stream.stat().unwrap().size, 4096);
    }

    #[test]
    fn test_stat_identity_matches_across_streams() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.bin");
        let other_path = dir.path().join("other.bin");
        let mut a = Stream::open(&path, rw_create()).unwrap();
        let mut b = Stream::open(&path, OpenMode::read()).unwrap();
        let mut c = Stream::open(&other_path, rw_create()).unwrap();

        assert_eq!(a.stat().unwrap().identity, b.stat().unwrap().identity);
        assert_ne!(a.stat().unwrap().identity, c.stat().unwrap().identity);
    }

    #[test]
    fn test_inheritability_is_applied_at_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inherit.bin");

        let private = Stream::open(&path, rw_create()).unwrap();
        assert!(!private.is_inheritable().unwrap());

        let shared = Stream::open(&path, rw_create().inheritable(true)).unwrap();
        assert!(shared.is_inheritable().unwrap());
        assert!(shared.mode().is_inheritable());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let err = Stream::open(dir.path().join("nope.bin"), OpenMode::read()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!err.is_contention());
        assert!(!err.is_invalid());
    }
}

/// LockTable 逻辑测试（单个流）
#[cfg(test)]
mod lock_tests {
    use super::*;

    #[test]
    fn test_lock_requires_matching_access() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.bin");
        std::fs::write(&path, [0u8; 16]).unwrap();

        let mut reader = Stream::open(&path, OpenMode::read()).unwrap();
        assert!(matches!(reader.try_lock(exclusive(0, 4)), Err(Error::InvalidArgument(_))));
        reader.try_lock(shared(0, 4)).unwrap();

        let mut writer = Stream::open(&path, OpenMode::new(Access::Write)).unwrap();
        assert!(matches!(writer.try_lock(shared(8, 4)), Err(Error::InvalidArgument(_))));
        writer.try_lock(exclusive(8, 4)).unwrap();
        assert_eq!(writer.held_locks(), &[exclusive(8, 4)]);
    }

    #[test]
    fn test_overlapping_shared_allowed_exclusive_rejected() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::open(dir.path().join("overlap.bin"), rw_create()).unwrap();

        stream.try_lock(shared(0, 10)).unwrap();
        stream.try_lock(shared(5, 10)).unwrap();
        assert_eq!(stream.held_locks().len(), 2);

        stream.try_lock(exclusive(100, 10)).unwrap();
        // 与已持有的独占范围重叠
        assert!(matches!(stream.try_lock(shared(105, 1)), Err(Error::InvalidArgument(_))));
        assert!(matches!(stream.try_lock(exclusive(95, 10)), Err(Error::InvalidArgument(_))));
        assert_eq!(stream.held_locks().len(), 3);
    }

    #[test]
    fn test_upgrade_replaces_shared_entries() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::open(dir.path().join("upgrade.bin"), rw_create()).unwrap();

        stream.try_lock(shared(0, 10)).unwrap();
        stream.try_lock(shared(5, 10)).unwrap();

        // 部分覆盖的升级被拒绝，状态不变
        assert!(matches!(stream.try_lock(exclusive(0, 12)), Err(Error::InvalidArgument(_))));
        assert_eq!(stream.held_locks(), &[shared(0, 10), shared(5, 10)]);

        stream.try_lock(exclusive(0, 15)).unwrap();
        assert_eq!(stream.held_locks(), &[exclusive(0, 15)]);
    }

    #[test]
    fn test_upgrade_on_stacking_backend_drops_shared() {
        let backend = RecordingBackend::leak(false, false);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("stack.bin"), rw_create()).unwrap();

        stream.try_lock(shared(0, 10)).unwrap();
        stream.try_lock(exclusive(0, 10)).unwrap();

        // 先释放自己的共享锁，再获取独占锁
        assert_eq!(stream.held_locks(), &[exclusive(0, 10)]);
        assert_eq!(backend.unlocked(), vec![span(0, 10)]);
        assert_eq!(backend.locked(), vec![shared(0, 10), exclusive(0, 10)]);
    }

    #[test]
    fn test_failed_upgrade_on_stacking_backend_restores_shared() {
        let backend = RecordingBackend::leak(false, false);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("restore.bin"), rw_create()).unwrap();

        stream.try_lock(shared(0, 10)).unwrap();
        stream.try_lock(shared(20, 10)).unwrap();
        backend.refuse_exclusive.store(true, Ordering::SeqCst);

        assert!(matches!(stream.try_lock(exclusive(0, 30)), Err(Error::WouldBlock)));

        // 记录不变，共享锁被重新加回
        assert_eq!(stream.held_locks(), &[shared(0, 10), shared(20, 10)]);
        assert_eq!(backend.unlocked(), vec![span(0, 10), span(20, 10)]);
        assert_eq!(
            backend.locked(),
            vec![shared(0, 10), shared(20, 10), shared(0, 10), shared(20, 10)]
        );
    }

    #[test]
    fn test_upgrade_on_coalescing_backend_is_one_call() {
        let backend = RecordingBackend::leak(true, true);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("convert.bin"), rw_create()).unwrap();

        stream.try_lock(shared(0, 10)).unwrap();
        stream.try_lock(exclusive(0, 10)).unwrap();

        assert_eq!(stream.held_locks(), &[exclusive(0, 10)]);
        assert!(backend.unlocked().is_empty());
        assert_eq!(backend.locked(), vec![shared(0, 10), exclusive(0, 10)]);
    }

    #[test]
    fn test_unlock_requires_held_range() {
        let dir = tempdir().unwrap();
        let mut stream = Stream::open(dir.path().join("unheld.bin"), rw_create()).unwrap();
        stream.try_lock(exclusive(0, 10)).unwrap();

        assert!(matches!(stream.unlock(span(20, 5)), Err(Error::InvalidArgument(_))));
        assert!(matches!(stream.unlock(span(5, 10)), Err(Error::InvalidArgument(_))));
        stream.unlock(span(0, 10)).unwrap();
        assert!(stream.held_locks().is_empty());
    }

    #[test]
    fn test_partial_unlock_unsupported_keeps_entry() {
        let backend = RecordingBackend::leak(false, false);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("whole.bin"), rw_create()).unwrap();

        stream.try_lock(exclusive(0, 100)).unwrap();
        let err = stream.unlock(span(10, 10)).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(err.is_invalid());

        assert_eq!(stream.held_locks(), &[exclusive(0, 100)]);
        assert!(backend.unlocked().is_empty());

        // 整段释放仍然可以
        stream.unlock(span(0, 100)).unwrap();
        assert_eq!(backend.unlocked(), vec![span(0, 100)]);
    }

    #[test]
    fn test_partial_unlock_splits_entry() {
        let backend = RecordingBackend::leak(true, true);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("split.bin"), rw_create()).unwrap();

        stream.try_lock(exclusive(0, 100)).unwrap();
        stream.unlock(span(10, 10)).unwrap();

        assert_eq!(stream.held_locks(), &[exclusive(0, 10), exclusive(20, 80)]);
        assert_eq!(backend.unlocked(), vec![span(10, 10)]);
    }

    #[test]
    fn test_coalescing_unlock_keeps_bytes_of_other_entries() {
        let backend = RecordingBackend::leak(true, true);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("coalesce.bin"), rw_create()).unwrap();

        stream.try_lock(shared(0, 10)).unwrap();
        stream.try_lock(shared(5, 10)).unwrap();
        stream.unlock(span(0, 10)).unwrap();

        // [5, 10) 仍由第二个条目持有
        assert_eq!(backend.unlocked(), vec![span(0, 5)]);
        assert_eq!(stream.held_locks(), &[shared(5, 10)]);
    }

    #[test]
    fn test_close_drains_lock_table() {
        let backend = RecordingBackend::leak(false, false);
        let dir = tempdir().unwrap();
        let mut stream = Stream::open_with(backend, dir.path().join("drain.bin"), rw_create()).unwrap();

        stream.try_lock(exclusive(0, 10)).unwrap();
        stream.try_lock(shared(20, 10)).unwrap();
        stream.close().unwrap();

        let mut released = backend.unlocked();
        released.sort_by_key(|s| s.start());
        assert_eq!(released, vec![span(0, 10), span(20, 10)]);
        assert!(stream.held_locks().is_empty());

        // 再次关闭不会重复释放
        stream.close().unwrap();
        assert_eq!(backend.unlocked().len(), 2);
    }

    #[test]
    fn test_drop_releases_locks() {
        let backend = RecordingBackend::leak(true, true);
        let dir = tempdir().unwrap();
        {
            let mut stream =
                Stream::open_with(backend, dir.path().join("drop.bin"), rw_create()).unwrap();
            stream.try_lock(LockRange::to_end(0, LockMode::Exclusive)).unwrap();
        }
        assert_eq!(backend.unlocked(), vec![ByteSpan::to_end(0)]);
    }

    #[test]
    fn test_lock_policy_bounds() {
        use std::time::Duration;

        assert!(LockPolicy::new(Duration::ZERO, Duration::from_millis(1)).is_err());
        assert!(LockPolicy::new(Duration::from_millis(5), Duration::from_millis(1)).is_err());
        let policy = LockPolicy::new(Duration::from_millis(2), Duration::from_millis(20)).unwrap();
        assert_eq!(policy.min_poll(), Duration::from_millis(2));
        assert_eq!(policy.max_poll(), Duration::from_millis(20));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_lock_policy_deserialize_is_validated() {
        use crate::stream::lock_table::PollBounds;
        use std::time::Duration;

        // 反序列化走 LockPolicy::new 的检查
        let spin = PollBounds {
            min_poll: Duration::ZERO,
            max_poll: Duration::from_millis(1),
        };
        assert!(matches!(LockPolicy::try_from(spin), Err(Error::InvalidArgument(_))));

        let inverted = PollBounds {
            min_poll: Duration::from_millis(9),
            max_poll: Duration::from_millis(3),
        };
        assert!(LockPolicy::try_from(inverted).is_err());

        let ok = PollBounds {
            min_poll: Duration::from_millis(1),
            max_poll: Duration::from_millis(8),
        };
        assert_eq!(
            LockPolicy::try_from(ok).unwrap(),
            LockPolicy::new(Duration::from_millis(1), Duration::from_millis(8)).unwrap()
        );
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let mut stream = Stream::open(dir.path().join("long_wait.bin"), rw_create()).unwrap();

        // 截止时间超出 Instant 的表示范围，按无限等待处理
        stream.lock_timeout(exclusive(0, 10), Duration::MAX).unwrap();
        assert_eq!(stream.held_locks(), &[exclusive(0, 10)]);

        stream
            .lock(shared(100, 10), Wait::Timeout(Duration::MAX))
            .unwrap();
        assert_eq!(stream.held_locks().len(), 2);
    }
}
