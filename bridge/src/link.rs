/*!
Serial link worker.

A [`SerialLink`] owns one background thread that finds its device, opens
it, and hands the open port to a [`LinkProtocol`] until the port fails or
the link is stopped. Faults release the port and retry after a pause:

```text
Idle -> Discovering -> Connecting -> Connected -> (fault) Backoff -> Discovering ...
                                                        stop / give up -> Stopped
```

Discovery gives up for good after `discovery_attempts` consecutive misses;
the link then sits in `Stopped` and reports disconnected.
*/

use crate::serial::{find_device, PortIo, PortSettings, SerialBackend};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use regex::Regex;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Open port as seen by a protocol
pub type Port = BufReader<Box<dyn PortIo>>;

/// Lifecycle of a link worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Discovering,
    Connecting,
    Connected,
    Backoff,
    Stopped,
}

/// How a link finds and opens its device
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Name used in logs and the worker thread name
    pub name: String,
    /// Fixed device path; skips discovery when set
    pub device: Option<String>,
    /// Matched against device descriptions during discovery
    pub device_pattern: Regex,
    pub port: PortSettings,
    /// Pause after a discovery miss or an I/O fault
    pub retry_interval: Duration,
    /// Consecutive discovery misses before giving up
    pub discovery_attempts: u32,
}

/// What a link does with an open port
pub trait LinkProtocol: Send + 'static {
    /// Serve one connection until `running` clears (`Ok`) or the port fails (`Err`)
    fn run_session(&mut self, port: &mut Port, running: &AtomicBool) -> io::Result<()>;

    /// Called whenever a connection ends, and once more when the worker exits
    fn on_disconnect(&mut self) {}
}

/// Handle to one link worker
pub struct SerialLink {
    settings: LinkSettings,
    backend: Arc<dyn SerialBackend>,
    state: Arc<Mutex<LinkState>>,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SerialLink {
    pub fn new(settings: LinkSettings, backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            settings,
            backend,
            state: Arc::new(Mutex::new(LinkState::Idle)),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            handle: None,
        }
    }

    /// Spawn the worker thread serving `protocol`
    pub fn start<P: LinkProtocol>(&mut self, protocol: P) -> io::Result<()> {
        if self.handle.is_some() {
            warn!("{} link already started", self.settings.name);
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.running.store(true, Ordering::SeqCst);
        *self.state.lock() = LinkState::Idle;

        let worker = Worker {
            settings: self.settings.clone(),
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            running: Arc::clone(&self.running),
            stop_rx,
            protocol,
        };

        let handle = thread::Builder::new()
            .name(format!("{}-link", self.settings.name))
            .spawn(move || worker.run())?;

        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        info!("🚀 {} link started", self.settings.name);
        Ok(())
    }

    /// Stop the worker and wait for it; bounded by the port read timeout
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // disconnecting the channel wakes any retry pause
        self.stop_tx.take();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("{} link thread panicked", self.settings.name);
            }
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<P> {
    settings: LinkSettings,
    backend: Arc<dyn SerialBackend>,
    state: Arc<Mutex<LinkState>>,
    running: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    protocol: P,
}

impl<P: LinkProtocol> Worker<P> {
    fn run(mut self) {
        let name = self.settings.name.clone();
        let mut misses = 0u32;

        while self.running.load(Ordering::SeqCst) {
            let path = match self.settings.device.clone() {
                Some(path) => path,
                None => {
                    self.set_state(LinkState::Discovering);
                    match self.discover() {
                        Some(path) => {
                            misses = 0;
                            path
                        }
                        None => {
                            misses += 1;
                            if misses >= self.settings.discovery_attempts.max(1) {
                                error!("❌ No {} device found after {} attempts, giving up", name, misses);
                                break;
                            }
                            warn!("No {} device detected (attempt {})", name, misses);
                            if !self.pause() {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            self.set_state(LinkState::Connecting);
            info!("🔌 Connecting {} link to {}", name, path);

            match self.backend.open(&path, &self.settings.port) {
                Ok(port) => {
                    self.set_state(LinkState::Connected);
                    info!("✅ {} link connected on {}", name, path);

                    let mut port = BufReader::new(port);
                    let result = self.protocol.run_session(&mut port, &self.running);
                    drop(port);
                    self.protocol.on_disconnect();

                    if let Err(e) = result {
                        warn!("{} link lost on {}: {}", name, path, e);
                        self.set_state(LinkState::Backoff);
                        if !self.pause() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!("Could not connect {} link to {}: {}", name, path, e);
                    self.set_state(LinkState::Backoff);
                    if !self.pause() {
                        break;
                    }
                }
            }
        }

        self.protocol.on_disconnect();
        self.set_state(LinkState::Stopped);
        info!("🛑 {} link thread stopped", name);
    }

    fn discover(&self) -> Option<String> {
        match self.backend.list_devices() {
            Ok(devices) => find_device(&devices, &self.settings.device_pattern).map(|d| d.path.clone()),
            Err(e) => {
                warn!("Could not enumerate serial devices: {}", e);
                None
            }
        }
    }

    /// Sleep for the retry interval; false when the link was stopped meanwhile
    fn pause(&self) -> bool {
        match self.stop_rx.recv_timeout(self.settings.retry_interval) {
            Err(RecvTimeoutError::Timeout) => self.running.load(Ordering::SeqCst),
            _ => false,
        }
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock() = state;
    }
}

/// Whether an I/O error only means "nothing arrived before the read timeout"
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
