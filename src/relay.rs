use log::{debug, info, warn};
use std::{
    ffi::CString,
    fs::{File, OpenOptions, Permissions},
    io::{ErrorKind, Write},
    os::unix::{
        ffi::OsStrExt,
        fs::{OpenOptionsExt, PermissionsExt},
    },
    path::{Path, PathBuf},
};

use crate::RelayError;

/// Default FIFO the raw sentences are relayed to
pub const DEFAULT_FIFO_PATH: &str = "/tmp/gnssai_smart";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Transport counters, reset only at process start
pub struct RelayStats {
    /// Lines handed to the relay
    pub relayed: u64,
    /// Lines written to a reader
    pub written: u64,
    /// Lines lost because no reader was attached or the pipe was full
    pub dropped: u64,
    /// Successful opens of the transport
    pub reconnects: u64,
}

#[derive(Debug)]
/// Connection state of the relay
pub enum Connection {
    /// No reader attached (or never opened); reopened before the next write
    Disconnected,
    /// Open for non-blocking writes
    Connected(File),
}

impl Connection {
    /// True when a handle is open
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

#[derive(Debug)]
/// Line writer to a FIFO that never blocks and never fails.
///
/// Opening without a reader fails immediately with `ENXIO`; the relay then
/// stays disconnected and retries the open on the next write.
pub struct OutputRelay {
    path: PathBuf,
    conn: Connection,
    stats: RelayStats,
}

impl OutputRelay {
    /// Relay to the FIFO at `path`; nothing is opened yet
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Connection::Disconnected,
            stats: RelayStats::default(),
        }
    }

    /// Create the FIFO if missing (reusing an existing one) and try a first open
    pub fn setup(&mut self) -> Result<(), RelayError> {
        ensure_fifo(&self.path)?;
        self.try_open();
        if !self.is_connected() {
            info!("FIFO {:?} has no reader yet, will retry", self.path);
        }
        Ok(())
    }

    /// FIFO path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counters
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Current connection state
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// True when a reader is attached
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    fn try_open(&mut self) {
        if self.is_connected() {
            return;
        }
        match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
        {
            Ok(file) => {
                self.stats.reconnects += 1;
                info!("FIFO {:?} open for writing", self.path);
                self.conn = Connection::Connected(file);
            }
            Err(e) => match e.raw_os_error() {
                Some(libc::ENXIO) | Some(libc::ENOENT) => {
                    debug!("FIFO {:?} not ready: {}", self.path, e);
                }
                _ => warn!("Error opening FIFO {:?}: {}", self.path, e),
            },
        }
    }

    /// Relay one sentence, CRLF terminated. Returns whether it reached a reader.
    pub fn write_line(&mut self, line: &str) -> bool {
        self.stats.relayed += 1;
        self.try_open();
        let Connection::Connected(file) = &mut self.conn else {
            self.stats.dropped += 1;
            return false;
        };
        let mut buf = Vec::with_capacity(line.len() + 2);
        buf.extend_from_slice(line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        // pipe writes up to PIPE_BUF are all or nothing
        if buf.len() > libc::PIPE_BUF {
            debug!("Dropping {} byte line, longer than PIPE_BUF", buf.len());
            self.stats.dropped += 1;
            return false;
        }
        match file.write(&buf) {
            Ok(n) if n == buf.len() => {
                self.stats.written += 1;
                true
            }
            Ok(n) => {
                warn!("Short write of {}/{} bytes to FIFO {:?}", n, buf.len(), self.path);
                self.stats.dropped += 1;
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                debug!("FIFO {:?} full, dropping line", self.path);
                self.stats.dropped += 1;
                false
            }
            Err(e) => {
                match e.raw_os_error() {
                    Some(libc::EPIPE) | Some(libc::ENXIO) => {
                        warn!("FIFO reader on {:?} went away, will reopen", self.path)
                    }
                    _ => warn!("Error writing FIFO {:?}: {}", self.path, e),
                }
                self.stats.dropped += 1;
                self.close();
                false
            }
        }
    }

    /// Drop the handle; the next write reopens
    pub fn close(&mut self) {
        if let Connection::Connected(file) = std::mem::replace(&mut self.conn, Connection::Disconnected) {
            drop(file);
            debug!("FIFO {:?} closed", self.path);
        }
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        self.close();
    }
}

/// Create a FIFO at `path` unless something already exists there
pub fn ensure_fifo(path: &Path) -> Result<(), RelayError> {
    if path.exists() {
        debug!("FIFO {:?} exists, reusing", path);
    } else {
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| RelayError::Io(std::io::Error::new(ErrorKind::InvalidInput, e)))?;
        // SAFETY: `cpath` is a valid NUL terminated string for the duration of the call
        let res = unsafe { libc::mkfifo(cpath.as_ptr(), 0o666) };
        if res != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(RelayError::Io(err));
            }
        } else {
            info!("Created FIFO {:?}", path);
        }
    }
    // umask may have narrowed the mode; the reader is usually another user
    let _ = std::fs::set_permissions(path, Permissions::from_mode(0o666));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    fn drain(reader: &mut File) -> String {
        let mut buf = [0u8; 1024];
        let n = reader.read(&mut buf).unwrap_or(0);
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    fn open_reader(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .expect("open reader")
    }

    #[test]
    fn no_reader_never_blocks_or_fails() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("relay");
        let mut relay = OutputRelay::new(&path);
        relay.setup().expect("setup");
        assert!(!relay.is_connected());
        for _ in 0..100 {
            assert!(!relay.write_line("$GPGGA,1"));
        }
        assert_eq!(relay.stats().relayed, 100);
        assert_eq!(relay.stats().dropped, 100);
        assert_eq!(relay.stats().reconnects, 0);
    }

    #[test]
    fn connects_once_a_reader_attaches() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("relay");
        let mut relay = OutputRelay::new(&path);
        relay.setup().expect("setup");
        assert!(!relay.write_line("$GPGGA,lost"));

        let mut reader = open_reader(&path);
        assert!(relay.write_line("$GPGGA,1"));
        assert!(relay.write_line("$GPGSV,2"));
        assert!(relay.is_connected());
        assert_eq!(drain(&mut reader), "$GPGGA,1\r\n$GPGSV,2\r\n");
        assert_eq!(relay.stats().written, 2);
        assert_eq!(relay.stats().reconnects, 1);
    }

    #[test]
    fn reader_loss_disconnects_then_reconnects() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("relay");
        let mut relay = OutputRelay::new(&path);
        relay.setup().expect("setup");

        let reader = open_reader(&path);
        assert!(relay.write_line("$GPGGA,1"));
        drop(reader);
        assert!(!relay.write_line("$GPGGA,2"));
        assert!(!relay.is_connected());
        assert!(!relay.write_line("$GPGGA,3"));

        let mut reader = open_reader(&path);
        assert!(relay.write_line("$GPGGA,4"));
        assert_eq!(drain(&mut reader), "$GPGGA,4\r\n");
        assert_eq!(relay.stats().reconnects, 2);
    }

    #[test]
    fn full_pipe_drops_whole_lines() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("relay");
        let mut relay = OutputRelay::new(&path);
        relay.setup().expect("setup");
        let mut reader = open_reader(&path);

        let line = format!("$GPGSV,{}", "9".repeat(100));
        let mut written = 0;
        for _ in 0..10_000 {
            if relay.write_line(&line) {
                written += 1;
            }
        }
        assert!(relay.stats().dropped > 0);
        assert!(relay.is_connected());
        assert_eq!(relay.connection().is_connected(), relay.is_connected());

        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        let expected = format!("{}\r\n", line);
        assert_eq!(received.len(), written * expected.len());
        assert!(String::from_utf8_lossy(&received)
            .split_terminator("\r\n")
            .all(|l| l == line));
    }

    #[test]
    fn oversized_line_is_dropped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("relay");
        let mut relay = OutputRelay::new(&path);
        relay.setup().expect("setup");
        let mut reader = open_reader(&path);
        assert_eq!(relay.path(), path.as_path());

        assert!(!relay.write_line(&"x".repeat(libc::PIPE_BUF)));
        assert!(relay.is_connected());
        assert!(relay.write_line("$GPGGA,1"));
        assert_eq!(drain(&mut reader), "$GPGGA,1\r\n");
    }

    #[test]
    fn existing_fifo_is_reused() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("relay");
        ensure_fifo(&path).expect("create");
        ensure_fifo(&path).expect("reuse");
        let _reader = open_reader(&path);
        let mut relay = OutputRelay::new(&path);
        relay.setup().expect("setup");
        assert!(relay.is_connected());
    }

    #[test]
    fn missing_fifo_is_not_ready() {
        let dir = tempdir().expect("tempdir");
        let mut relay = OutputRelay::new(dir.path().join("absent"));
        assert!(!relay.write_line("$GPGGA,1"));
        assert!(!relay.is_connected());
    }
}
