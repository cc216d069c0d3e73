//! Worker process that tries to use a descriptor/handle inherited from its parent
//!
//! 尝试使用从父进程继承的描述符/句柄的工作进程
//!
//! Usage: `inherit-worker <read 0|1> <write 0|1> <append 0|1> <handle|-> [device:index]`
//!
//! Exit status 0 when the inherited identity was usable for the requested operation,
//! 1 when it was not, 2 on bad arguments. With `device:index` the handle must also
//! refer to that file, so a reused descriptor number is not mistaken for an inherited one.
//!
//! 继承的标识可用于请求的操作时退出码为 0，不可用时为 1，参数错误时为 2。
//! 提供 `device:index` 时句柄还必须指向该文件，避免把被复用的描述符号误认为继承所得。

use lockstream::{native, FileIdentity, RawHandle};
use std::process::ExitCode;

const PAYLOAD: &[u8] = b"def";

struct Request {
    read: bool,
    write: bool,
    append: bool,
    handle: Option<RawHandle>,
    identity: Option<FileIdentity>,
}

fn flag(arg: Option<String>) -> Result<bool, String> {
    match arg.as_deref() {
        Some("0") => Ok(false),
        Some("1") => Ok(true),
        other => Err(format!("expected 0 or 1, got {other:?}")),
    }
}

fn parse(mut args: impl Iterator<Item = String>) -> Result<Request, String> {
    let read = flag(args.next())?;
    let write = flag(args.next())?;
    let append = flag(args.next())?;
    let handle = match args.next().as_deref() {
        Some("-") => None,
        Some(raw) => Some(RawHandle::from_raw(
            raw.parse().map_err(|e| format!("bad handle {raw:?}: {e}"))?,
        )),
        None => return Err("missing handle".into()),
    };
    let identity = args.next().map(|s| s.parse()).transpose()?;
    Ok(Request {
        read,
        write,
        append,
        handle,
        identity,
    })
}

fn run(request: &Request) -> lockstream::Result<bool> {
    let Some(handle) = request.handle else {
        return Ok(false);
    };
    let backend = native();

    if let Some(expected) = request.identity {
        if backend.stat(handle)?.identity != expected {
            return Ok(false);
        }
    }

    if request.read {
        let mut buf = [0u8; 16];
        if backend.read(handle, &mut buf)? == 0 {
            return Ok(false);
        }
    }

    if request.write || request.append {
        let mut rest = PAYLOAD;
        while !rest.is_empty() {
            match backend.write(handle, rest)? {
                0 => return Ok(false),
                n => rest = &rest[n..],
            }
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let request = match parse(std::env::args().skip(1)) {
        Ok(request) => request,
        Err(msg) => {
            eprintln!("inherit-worker: {msg}");
            return ExitCode::from(2);
        }
    };

    match run(&request) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("inherit-worker: {err}");
            ExitCode::from(1)
        }
    }
}
