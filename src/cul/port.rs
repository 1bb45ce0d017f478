//! Serial line access to the CUL stick.
//!
//! The stick speaks CRLF-terminated ASCII lines over USB/UART. The
//! [`CulPort`] trait is the seam between the transceiver loop and the
//! physical port: production code talks to a [`SerialCulPort`], tests feed
//! the loop scripted ports and failure sequences through a [`PortOpener`].

use std::io::{self, Read, Write};
use std::time::Duration;

/// One opened serial line to the stick.
pub trait CulPort: Send {
    /// Read one line, without its terminator. `Ok(None)` means the read
    /// timed out with no complete line available.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Write one command line; the terminator is appended here.
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Opens (or reopens) the port. Boxed so the reconnect path and tests can
/// share one code path.
pub type PortOpener = Box<dyn FnMut() -> io::Result<Box<dyn CulPort>> + Send>;

/// Default read timeout for one `read_line` call.
pub const READLINE_TIMEOUT: Duration = Duration::from_millis(500);

/// `CulPort` backed by a real serial device.
pub struct SerialCulPort {
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

impl SerialCulPort {
    pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
        let mut builder = serialport::new(path, baud_rate).timeout(READLINE_TIMEOUT);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let port = builder
            .open()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(SerialCulPort {
            port,
            pending: Vec::new(),
        })
    }
}

impl CulPort for SerialCulPort {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    if byte[0] == b'\n' {
                        if self.pending.last() == Some(&b'\r') {
                            self.pending.pop();
                        }
                        let line = String::from_utf8_lossy(&self.pending).into_owned();
                        self.pending.clear();
                        if line.is_empty() {
                            continue;
                        }
                        return Ok(Some(line));
                    }
                    self.pending.push(byte[0]);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        self.port.flush()
    }
}

/// Opener for a real serial device.
pub fn serial_opener(path: String, baud_rate: u32) -> PortOpener {
    Box::new(move || SerialCulPort::open(&path, baud_rate).map(|p| Box::new(p) as Box<dyn CulPort>))
}
