use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use common::{BrickId, SharedDiagnostics};
use tracing::{error, info, warn};

use crate::connection::ConnectionHandler;
use crate::error::Result;
use crate::processor::MessageProcessor;
use crate::world::WorldSimulator;

/// Longest pause between accept attempts.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(20);

/// Listening socket of one simulated brick.
pub struct BrickServer {
    brick: BrickId,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BrickServer {
    /// Binds `host:port`; port 0 picks a free port.
    pub fn bind(host: &str, port: u16, brick: BrickId) -> Result<Self> {
        let listener = TcpListener::bind((host, port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!(%brick, %local_addr, "brick listening");
        Ok(Self {
            brick,
            listener,
            local_addr,
        })
    }

    pub fn brick(&self) -> BrickId {
        self.brick
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the accept loop. Each client gets its own handler thread; the
    /// loop joins them before returning once `running` is cleared.
    pub fn spawn(
        self,
        world: Arc<WorldSimulator>,
        diagnostics: Arc<SharedDiagnostics>,
        running: Arc<AtomicBool>,
    ) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("{}-accept", self.brick))
            .spawn(move || self.accept_loop(world, diagnostics, running))?;
        Ok(handle)
    }

    fn accept_loop(
        self,
        world: Arc<WorldSimulator>,
        diagnostics: Arc<SharedDiagnostics>,
        running: Arc<AtomicBool>,
    ) {
        let settings = world.settings().clone();
        let backoff = settings.poll_interval.min(ACCEPT_BACKOFF);
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();

        while running.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(brick = %self.brick, %peer, "failed to configure socket: {}", e);
                        continue;
                    }
                    let processor = match MessageProcessor::new(Arc::clone(&world), self.brick) {
                        Ok(processor) => processor,
                        Err(e) => {
                            error!(brick = %self.brick, "cannot serve brick: {}", e);
                            break;
                        }
                    };
                    let mut handler = ConnectionHandler::new(
                        processor,
                        Arc::clone(&diagnostics),
                        Arc::clone(&running),
                        settings.message_size,
                        settings.poll_interval,
                    );
                    let spawned = thread::Builder::new()
                        .name(format!("{}-conn", self.brick))
                        .spawn(move || {
                            // Failures are already logged by the handler.
                            let _ = handler.run(stream);
                        });
                    match spawned {
                        Ok(handle) => handlers.push(handle),
                        Err(e) => error!(brick = %self.brick, "failed to spawn handler: {}", e),
                    }
                    handlers.retain(|h| !h.is_finished());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(backoff),
                Err(e) => {
                    warn!(brick = %self.brick, "accept failed: {}", e);
                    thread::sleep(backoff);
                }
            }
        }

        for handle in handlers {
            let _ = handle.join();
        }
        info!(brick = %self.brick, "brick stopped listening");
    }
}
