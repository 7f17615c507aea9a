//! UART transport over a tty device node.
//!
//! The port is opened non-blocking and switched to raw 8N1 at the requested
//! baud rate through termios. A write that would block is reported as
//! dropped; the control loop never waits on the link.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};

use anyhow::{anyhow, Context, Result};

use super::transport::{Transport, WriteStatus};

/// Baud rates the transport can configure.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [
    1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200,
];

pub struct SerialTransport {
    port: String,
    baud_rate: u32,
    file: Option<File>,
}

impl SerialTransport {
    /// Open `port` at `baud_rate`.
    pub fn open(port: &str, baud_rate: u32) -> Result<Self> {
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(anyhow!("unsupported baud rate {}", baud_rate));
        }
        let file = open_raw(port, baud_rate)?;
        log::info!("SerialTransport: opened {} at {} baud", port, baud_rate);
        Ok(Self {
            port: port.to_string(),
            baud_rate,
            file: Some(file),
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.port
    }

    fn is_ready(&self) -> bool {
        self.file.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<WriteStatus> {
        let Some(file) = self.file.as_mut() else {
            return Ok(WriteStatus::Dropped);
        };
        match file.write(bytes) {
            // A short write would tear the record; count it as dropped.
            Ok(n) if n == bytes.len() => Ok(WriteStatus::Written(n)),
            Ok(n) => {
                log::warn!(
                    "SerialTransport: short write on {} ({} of {} bytes)",
                    self.port,
                    n,
                    bytes.len()
                );
                Ok(WriteStatus::Dropped)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(WriteStatus::Dropped),
            Err(err) => Err(err).with_context(|| format!("write to {}", self.port)),
        }
    }

    fn read(&mut self) -> Result<Vec<u8>> {
        let Some(file) = self.file.as_mut() else {
            return Ok(Vec::new());
        };
        let mut received = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("read from {}", self.port));
                }
            }
        }
        Ok(received)
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            log::info!("SerialTransport: closed {}", self.port);
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(target_os = "linux")]
fn open_raw(port: &str, baud_rate: u32) -> Result<File> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(port)
        .with_context(|| format!("open serial port {}", port))?;

    let speed = baud_constant(baud_rate)?;
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid open descriptor owned by `file` for the duration
    // of these calls, and `termios` is a plain C struct initialised by tcgetattr.
    let mut termios: libc::termios = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::tcgetattr(fd, &mut termios) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("{} is not a terminal device", port));
    }
    unsafe {
        libc::cfmakeraw(&mut termios);
    }
    termios.c_cflag |= libc::CLOCAL | libc::CREAD;
    termios.c_cflag &= !(libc::CSTOPB | libc::PARENB);
    let rc = unsafe { libc::cfsetspeed(&mut termios, speed) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("set {} baud on {}", baud_rate, port));
    }
    let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("configure serial port {}", port));
    }
    Ok(file)
}

#[cfg(not(target_os = "linux"))]
fn open_raw(port: &str, _baud_rate: u32) -> Result<File> {
    Err(anyhow!("serial transport unavailable on this platform ({})", port))
}

#[cfg(target_os = "linux")]
fn baud_constant(baud_rate: u32) -> Result<libc::speed_t> {
    let speed = match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        other => return Err(anyhow!("unsupported baud rate {}", other)),
    };
    Ok(speed)
}
