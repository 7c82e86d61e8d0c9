// NetSleuth - platform/fs.rs
//
// Capture and definition file reading.
//
// Device captures are decoded lossily: terminal logs routinely carry stray
// non-UTF-8 bytes (telnet negotiation, Latin-1 banners) and one bad byte
// must not cost the whole file.

use crate::util::constants;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Read a capture file as text, replacing invalid UTF-8.
///
/// Files at or above `MMAP_THRESHOLD_BYTES` are memory-mapped; smaller
/// files are read with transient-error retries.
pub fn read_capture(path: &Path) -> io::Result<String> {
    let size = std::fs::metadata(path)?.len();
    if size >= constants::MMAP_THRESHOLD_BYTES {
        read_mapped(path)
    } else {
        read_with_retry(path)
    }
}

/// Read a definition file (template, profile, config) after checking its
/// size against `max_size`. An oversized file yields `Ok(Err(size))`.
pub fn read_limited(path: &Path, max_size: u64) -> io::Result<Result<String, u64>> {
    let size = std::fs::metadata(path)?.len();
    if size > max_size {
        return Ok(Err(size));
    }
    std::fs::read_to_string(path).map(Ok)
}

fn read_mapped(path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    // SAFETY: the map is read-only and dropped before returning. A capture
    // truncated by another process while mapped can fault; captures are
    // finished files.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    tracing::debug!(
        file = %path.display(),
        size_mb = mmap.len() / (1024 * 1024),
        "Memory-mapped large capture"
    );
    Ok(String::from_utf8_lossy(&mmap).into_owned())
}

fn read_with_retry(path: &Path) -> io::Result<String> {
    let mut last_err: Option<io::Error> = None;

    for (attempt, delay) in constants::READ_RETRY_DELAYS_MS.iter().enumerate() {
        match std::fs::read(path) {
            Ok(bytes) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if is_transient_error(&e) => {
                tracing::debug!(
                    file = %path.display(),
                    attempt = attempt + 1,
                    error = %e,
                    "Transient I/O error, retrying"
                );
                std::thread::sleep(Duration::from_millis(*delay));
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| io::Error::other("read retries exhausted")))
}

fn is_transient_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
    )
}
