//! One handler thread per connected client.
//!
//! Every message on the wire is a frame of exactly `message_size` bytes: a
//! JSON document padded with `#`. The socket carries a short read timeout so
//! the handler notices shutdown; a frame split across timeouts is kept and
//! completed on the next read.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::protocol::{self, ProtocolError};
use common::{Command, Response, SharedDiagnostics};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SimError};
use crate::processor::MessageProcessor;

/// Accumulates bytes until a whole frame has arrived.
#[derive(Debug)]
pub struct FrameReader {
    buffer: Vec<u8>,
    filled: usize,
}

impl FrameReader {
    pub fn new(frame_len: usize) -> Self {
        Self {
            buffer: vec![0; frame_len],
            filled: 0,
        }
    }

    /// Reads what is available. Returns a frame once complete, `None` when
    /// the read timed out first. A closed peer is `UnexpectedEof`.
    pub fn read_frame(&mut self, reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
        while self.filled < self.buffer.len() {
            match reader.read(&mut self.buffer[self.filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed the connection",
                    ))
                }
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            }
        }
        self.filled = 0;
        Ok(Some(self.buffer.clone()))
    }
}

pub struct ConnectionHandler {
    processor: MessageProcessor,
    diagnostics: Arc<SharedDiagnostics>,
    running: Arc<AtomicBool>,
    message_size: usize,
    poll_interval: Duration,
}

impl ConnectionHandler {
    pub fn new(
        processor: MessageProcessor,
        diagnostics: Arc<SharedDiagnostics>,
        running: Arc<AtomicBool>,
        message_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            processor,
            diagnostics,
            running,
            message_size,
            poll_interval,
        }
    }

    /// Serves `stream` until the client leaves or the simulator stops. The
    /// brick's pending jobs are dropped on the way out either way.
    pub fn run(&mut self, mut stream: TcpStream) -> Result<()> {
        let brick = self.processor.brick();
        let peer = stream.peer_addr().ok();
        info!(%brick, ?peer, "client connected");
        self.diagnostics.record_connection_opened();

        if let Err(e) = stream.set_read_timeout(Some(self.poll_interval)) {
            warn!(%brick, "failed to set read timeout: {}", e);
        }

        let result = self.serve(&mut stream);

        self.processor.robot().clear_brick_jobs(brick);
        self.diagnostics.record_connection_closed();
        let _ = stream.shutdown(Shutdown::Both);

        match result {
            Ok(()) => {
                info!(%brick, ?peer, "connection closed");
                Ok(())
            }
            Err(SimError::Io(e))
                if matches!(
                    e.kind(),
                    ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
                ) =>
            {
                info!(%brick, ?peer, "client disconnected");
                Ok(())
            }
            Err(e) => {
                error!(%brick, ?peer, "connection failed: {}", e);
                Err(e)
            }
        }
    }

    fn serve(&mut self, stream: &mut TcpStream) -> Result<()> {
        let mut reader = FrameReader::new(self.message_size);
        while self.running.load(Ordering::Relaxed) {
            let frame = match reader.read_frame(stream)? {
                Some(frame) => frame,
                None => continue,
            };
            if let Some(reply) = self.handle_frame(&frame) {
                stream.write_all(&reply)?;
            }
        }
        debug!(brick = %self.processor.brick(), "shutdown requested");
        Ok(())
    }

    /// Decodes and executes one frame. Returns the framed reply to send, if
    /// any. Frames that fail to decode get no reply.
    pub fn handle_frame(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let brick = self.processor.brick();
        let command = match protocol::decode(frame) {
            Ok(command) => command,
            Err(ProtocolError::UnknownType(kind)) => {
                self.diagnostics.record_unknown_command();
                warn!(%brick, kind = %kind, "unknown command type");
                return None;
            }
            Err(e) => {
                self.diagnostics.record_decode_failure();
                warn!(%brick, "undecodable frame: {}", e);
                return None;
            }
        };
        debug!(%brick, kind = command.kind(), "command received");

        let value = match self.processor.process(&command) {
            Ok(value) => value,
            Err(e) => {
                self.record_failure(&command, &e);
                command.expects_reply().then_some(Value::Null)
            }
        };
        value.map(|value| self.encode(value))
    }

    fn record_failure(&self, command: &Command, e: &SimError) {
        let brick = self.processor.brick();
        match e {
            SimError::SensorTimeout { .. } => {
                self.diagnostics.record_sensor_timeout();
                warn!(%brick, kind = command.kind(), "{}", e);
            }
            SimError::GateClosed => debug!(%brick, "read aborted by shutdown"),
            _ => {
                self.diagnostics.record_rejected_command();
                warn!(%brick, kind = command.kind(), "command rejected: {}", e);
            }
        }
    }

    fn encode(&self, value: Value) -> Vec<u8> {
        let framed = protocol::encode_response(&Response::new(value))
            .and_then(|bytes| protocol::frame(&bytes, self.message_size));
        match framed {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(brick = %self.processor.brick(), "reply does not fit a frame: {}", e);
                null_frame(self.message_size)
            }
        }
    }
}

fn null_frame(size: usize) -> Vec<u8> {
    let mut bytes = br#"{"value": null}"#.to_vec();
    bytes.resize(size.max(bytes.len()), protocol::FRAME_PAD);
    bytes
}
