use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use super::ActuationSink;
use crate::motion::MotionState;

/// Literal sent to the downstream controller on shutdown.
pub const STOP_RECORD: &str = "stop";

/// Outcome of a best-effort transport write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    Written(usize),
    /// The transport could not take the bytes right now; they were discarded.
    Dropped,
}

/// Byte-stream transport collaborator.
pub trait Transport {
    fn name(&self) -> &str;

    /// Whether the transport is open and able to take writes.
    fn is_ready(&self) -> bool;

    /// Best-effort write. Must not block on a full buffer.
    fn write(&mut self, bytes: &[u8]) -> Result<WriteStatus>;

    /// Drain whatever the peer has sent since the last call. Never blocks;
    /// an empty vector means nothing was waiting.
    fn read(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Close the transport. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Sends `"<speed>,<angle>\n"` every tick, changed or not.
pub struct TransportSink<T: Transport> {
    transport: T,
    sent: u64,
    dropped: u64,
}

impl<T: Transport> TransportSink<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            sent: 0,
            dropped: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn write_record(&mut self, record: &str) -> Result<()> {
        if !self.transport.is_ready() {
            self.dropped += 1;
            log::trace!("{}: not ready, dropped {:?}", self.transport.name(), record);
            return Ok(());
        }
        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');
        match self.transport.write(line.as_bytes()) {
            Ok(WriteStatus::Written(_)) => self.sent += 1,
            Ok(WriteStatus::Dropped) => {
                self.dropped += 1;
                log::debug!("{}: buffer full, dropped {:?}", self.transport.name(), record);
            }
            Err(err) => {
                self.dropped += 1;
                log::warn!(
                    "{}: write failed, dropped {:?}: {:#}",
                    self.transport.name(),
                    record,
                    err
                );
            }
        }
        Ok(())
    }
}

/// Send `message` and wait up to `wait` for one newline-terminated reply.
///
/// Returns `None` when the peer stays silent. Used to check the link before
/// the control loop starts driving it.
pub fn link_check<T: Transport>(
    transport: &mut T,
    message: &str,
    wait: Duration,
) -> Result<Option<String>> {
    let mut line = String::with_capacity(message.len() + 1);
    line.push_str(message);
    line.push('\n');
    if transport.write(line.as_bytes())? == WriteStatus::Dropped {
        return Err(anyhow!("{}: link check message was not accepted", transport.name()));
    }

    let deadline = Instant::now() + wait;
    let mut received = Vec::new();
    loop {
        received.extend(transport.read()?);
        if let Some(end) = received.iter().position(|&b| b == b'\n') {
            let reply = String::from_utf8_lossy(&received[..end]);
            return Ok(Some(reply.trim_end_matches('\r').to_string()));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(LINK_CHECK_POLL);
    }
}

const LINK_CHECK_POLL: Duration = Duration::from_millis(10);

/// Format a motion state the way the downstream controller parses it.
pub fn format_record(state: MotionState) -> String {
    format!("{},{}", state.speed, state.angle)
}

impl<T: Transport> ActuationSink for TransportSink<T> {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn send(&mut self, state: MotionState) -> Result<()> {
        self.write_record(&format_record(state))
    }

    fn stop(&mut self) -> Result<()> {
        self.write_record(STOP_RECORD)
    }

    fn release(&mut self) -> Result<()> {
        self.transport.close();
        Ok(())
    }
}

/// In-memory transport for tests and dry runs.
#[derive(Debug)]
pub struct MemoryTransport {
    name: String,
    ready: bool,
    accept: bool,
    fail_writes: u32,
    written: Vec<u8>,
    inbound: Vec<u8>,
}

impl MemoryTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: true,
            accept: true,
            fail_writes: 0,
            written: Vec::new(),
            inbound: Vec::new(),
        }
    }

    /// Simulate a link that is up but whose buffer is full.
    pub fn set_accepting(&mut self, accept: bool) {
        self.accept = accept;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Make the next `count` writes fail with an I/O error.
    pub fn fail_next_writes(&mut self, count: u32) {
        self.fail_writes = count;
    }

    /// Queue bytes for the next `read`, as if the peer had sent them.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Everything written so far, one record per line.
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn write(&mut self, bytes: &[u8]) -> Result<WriteStatus> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(anyhow!("{}: input/output error", self.name));
        }
        if !self.accept {
            return Ok(WriteStatus::Dropped);
        }
        self.written.extend_from_slice(bytes);
        Ok(WriteStatus::Written(bytes.len()))
    }

    fn read(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.inbound))
    }

    fn close(&mut self) {
        self.ready = false;
    }
}
