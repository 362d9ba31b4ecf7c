use std::io::{self, Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use serialport::SerialPort;

use crate::error::{SerialIoError, SerialUnavailableError};
use crate::serial::discover_port;

/// How long the microcontroller needs to come back up after the auto-reset
/// that opening the port triggers.
const BOOT_SETTLE: Duration = Duration::from_secs(2);

/// A line-oriented connection to the robot controller. Production links wrap
/// a serial port; tests substitute an in-memory peer.
pub trait CommandLink: Send {
    /// Write one command line (the newline is appended here).
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Read one line, trimmed. `Ok(None)` means the read timed out with
    /// nothing buffered.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Whether unread reply bytes are waiting.
    fn pending(&mut self) -> bool;

    /// Drop everything currently buffered on the input side.
    fn discard_input(&mut self) -> io::Result<()>;
}

struct PortLink {
    port: Box<dyn SerialPort>,
}

impl CommandLink for PortLink {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'\n' {
                        return Ok(Some(trimmed(&line)));
                    }
                    line.push(byte[0]);
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        if line.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed(&line)))
        }
    }

    fn pending(&mut self) -> bool {
        self.port.bytes_to_read().map(|n| n > 0).unwrap_or(false)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Explicit port name; auto-discovered when absent.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Overall budget for one command exchange.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            timeout: Duration::from_secs(45),
        }
    }
}

/// Synchronized request/response gateway to the robot controller. At most one
/// command is in flight at any time: the connection lock is held for the
/// entire write → read-until-`%` exchange. The connection itself is opened
/// lazily on first use and reopened after an I/O failure.
pub struct SerialGateway {
    config: SerialConfig,
    link: Mutex<Option<Box<dyn CommandLink>>>,
}

impl SerialGateway {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
        }
    }

    /// A gateway over an already-established link. Used by tests and by
    /// callers that manage the connection themselves.
    pub fn with_link(link: Box<dyn CommandLink>) -> Self {
        Self {
            config: SerialConfig::default(),
            link: Mutex::new(Some(link)),
        }
    }

    /// Send one command and collect its reply. The reply ends at the literal
    /// `%` line; an early read timeout with nothing pending ends it too, and
    /// whatever was gathered so far is returned. An empty reply becomes
    /// `"Success"`.
    pub fn send_command(&self, command: &str) -> Result<String, Box<dyn std::error::Error>> {
        let mut guard = self.link.lock().unwrap();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let link = guard.as_mut().unwrap();
        match exchange(link.as_mut(), command) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                // drop the connection so the next command reconnects cleanly
                *guard = None;
                Err(SerialIoError::new(e).into())
            }
        }
    }

    fn connect(&self) -> Result<Box<dyn CommandLink>, SerialUnavailableError> {
        let name = match &self.config.port {
            Some(name) => name.clone(),
            None => discover_port(),
        };
        let port = serialport::new(&name, self.config.baud_rate)
            .timeout(self.config.timeout)
            .open()
            .map_err(|e| SerialUnavailableError::new(format!("{}: {}", name, e)))?;
        log::info!("Robot connected at {} ({} baud)", name, self.config.baud_rate);

        let mut link = PortLink { port };
        // the controller resets when the port opens; wait it out and drop
        // the boot banner
        std::thread::sleep(BOOT_SETTLE);
        link.discard_input()
            .map_err(|e| SerialUnavailableError::new(e.to_string()))?;
        Ok(Box::new(link))
    }
}

fn exchange(link: &mut dyn CommandLink, command: &str) -> io::Result<String> {
    link.send_line(command.trim())?;
    let mut reply: Vec<String> = Vec::new();
    loop {
        match link.read_line()? {
            Some(line) if line == "%" => break,
            Some(line) => {
                if !line.is_empty() {
                    reply.push(line);
                }
            }
            None => {
                if !link.pending() {
                    break;
                }
            }
        }
    }
    if reply.is_empty() {
        Ok("Success".to_string())
    } else {
        Ok(reply.join("\n"))
    }
}
