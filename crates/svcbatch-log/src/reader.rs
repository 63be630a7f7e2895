//! Output pipe reader.
//!
//! Copies everything the child writes to its combined stdout/stderr pipe into
//! the log, byte for byte.

use crate::manager::LogManager;
use std::io::{ErrorKind, Read};
use svcbatch_common::{Error, Result};
use tracing::{debug, warn};

/// Size of a single pipe read.
pub const PIPE_CHUNK: usize = 8192;

/// Consecutive failed appends after which the reader gives up.
const MAX_WRITE_FAILURES: u32 = 8;

/// Drain `source` into `log` until end of stream.
///
/// When `rotate_size` is set, `on_full` is called once per log generation as
/// soon as the primary file grows past that many bytes.
///
/// End of stream (including a broken pipe) is the normal way out and returns
/// the number of bytes copied. A closed log or a sustained write failure
/// stops the reader with an error.
pub fn drain_output<R, F>(
    mut source: R,
    log: &LogManager,
    rotate_size: Option<u64>,
    mut on_full: F,
) -> Result<u64>
where
    R: Read,
    F: FnMut(),
{
    let mut buffer = vec![0u8; PIPE_CHUNK];
    let mut total = 0u64;
    let mut failures = 0u32;
    let mut requested_for: Option<u32> = None;

    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Output pipe closed: {}", e);
                break;
            }
        };

        let mut guard = log.lock();
        if !guard.is_open() {
            return Err(Error::LogClosed);
        }
        match guard.append_raw(&buffer[..n]) {
            Ok(()) => {
                failures = 0;
                total += n as u64;
            }
            Err(e) => {
                failures += 1;
                warn!(failures, "Failed to append child output: {}", e);
                if failures >= MAX_WRITE_FAILURES {
                    return Err(e);
                }
                continue;
            }
        }

        if let (Some(limit), Some(size)) = (rotate_size, guard.size()) {
            let generation = guard.generation();
            if size >= limit && requested_for != Some(generation) {
                requested_for = Some(generation);
                drop(guard);
                debug!(size, limit, "Log size limit reached");
                on_full();
            }
        }
    }

    debug!(bytes = total, "Output pipe drained");
    Ok(total)
}
