use std::{
    io::{ErrorKind, Read},
    time::Duration,
};

use serialport::SerialPort;

use crate::RelayError;

/// Longest partial line kept while waiting for its terminator
pub const MAX_LINE_LEN: usize = 4096;

/// Splits a byte source into text lines.
///
/// Reads never fail on timeouts: a timed out, interrupted or would-block
/// read just means no complete line is available yet.
pub struct FrameReader<R: ?Sized> {
    buf: Vec<u8>,
    read: usize,
    reader: Box<R>,
}

impl<R: Read + ?Sized> FrameReader<R> {
    /// Frame lines read from `reader`
    pub fn new(reader: Box<R>) -> Self {
        Self {
            buf: Vec::with_capacity(MAX_LINE_LEN),
            read: 0,
            reader,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let pos = self.buf[self.read..].iter().position(|&b| b == b'\n')?;
        let end = self.read + pos;
        let line: String = self.buf[self.read..end]
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| b as char)
            .collect();
        self.read = end + 1;
        if self.read == self.buf.len() {
            self.buf.clear();
            self.read = 0;
        }
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Next complete line, without its terminator, if one is available
    pub fn poll_line(&mut self) -> Result<Option<String>, RelayError> {
        if let Some(line) = self.take_line() {
            return Ok(Some(line));
        }
        if self.read > 0 {
            self.buf.drain(..self.read);
            self.read = 0;
        }
        let mut tmp = [0; 1024];
        let n = match self.reader.read(&mut tmp) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(RelayError::Source(e)),
        };
        if n == 0 {
            return Ok(None);
        }
        self.buf.extend_from_slice(&tmp[..n]);
        match self.take_line() {
            Some(line) => Ok(Some(line)),
            None => {
                if self.buf.len() > MAX_LINE_LEN {
                    log::debug!("Discarding {} bytes without line terminator", self.buf.len());
                    self.buf.clear();
                    self.read = 0;
                }
                Ok(None)
            }
        }
    }
}

/// Open the receiver's serial device
pub fn open_serial(
    path: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, RelayError> {
    serialport::new(path, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|e| RelayError::Source(e.into()))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    struct Chunks(Vec<std::io::Result<Vec<u8>>>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0)?;
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn splits_lines_across_reads() {
        let mut frames = FrameReader::new(Box::new(Chunks(vec![
            Ok(b"$GPGGA,1*".to_vec()),
            Err(ErrorKind::TimedOut.into()),
            Ok(b"00\r\n$GPGSV,2\r\n$PSTI".to_vec()),
            Ok(b",030\n".to_vec()),
        ])));
        assert_eq!(frames.poll_line().expect("read"), None);
        assert_eq!(frames.poll_line().expect("read"), None);
        assert_eq!(frames.poll_line().expect("read").as_deref(), Some("$GPGGA,1*00"));
        assert_eq!(frames.poll_line().expect("read").as_deref(), Some("$GPGSV,2"));
        assert_eq!(frames.poll_line().expect("read").as_deref(), Some("$PSTI,030"));
        assert_eq!(frames.poll_line().expect("read"), None);
    }

    #[test]
    fn drops_non_ascii_bytes() {
        let mut frames = FrameReader::new(Box::new(Cursor::new(b"$GP\xffGGA\xc3\xa9\n".to_vec())));
        assert_eq!(frames.poll_line().expect("read").as_deref(), Some("$GPGGA"));
    }

    #[test]
    fn device_errors_are_fatal() {
        let mut frames = FrameReader::new(Box::new(Chunks(vec![Err(
            ErrorKind::BrokenPipe.into(),
        )])));
        assert!(matches!(frames.poll_line(), Err(RelayError::Source(_))));
    }

    #[test]
    fn bounds_unterminated_input() {
        let mut frames = FrameReader::new(Box::new(Cursor::new(vec![b'x'; 3 * MAX_LINE_LEN])));
        for _ in 0..20 {
            assert_eq!(frames.poll_line().expect("read"), None);
            assert!(frames.buf.len() <= MAX_LINE_LEN + 1024);
        }
    }
}
