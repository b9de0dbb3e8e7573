//! Per-connection session coordinator.
//!
//! One coordinator runs per WebSocket connection and owns the fan-out
//! between the PTY and the remote client. Terminal bytes never wait on
//! capture work: the raw byte path goes straight to the outbound queue,
//! while vision and capture each get their own lossy queue and worker.
//! Exactly one writer task owns the WebSocket sink, so frame ordering is a
//! consequence of queue order rather than locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::capture::{CaptureObserver, ConversationCapture};
use crate::detect::CommandDetector;
use crate::domain::ConversationTurn;
use crate::logger::ConversationLog;
use crate::provider::ProviderRegistry;
use crate::vision::Detector;

use super::connection::{ClientMessage, CloseReason, ControlMessage, Outbound};
use super::pty::PtyHandle;

/// Outbound queue depth. Terminal bytes block the PTY reader here rather
/// than being dropped: output loss corrupts the client's screen state.
const OUTBOUND_QUEUE: usize = 1024;
/// Vision queue depth; overflow drops chunks (vision is best-effort)
const VISION_QUEUE: usize = 64;
/// Capture queue depth; overflow drops chunks (snapshots recover the screen)
const CAPTURE_QUEUE: usize = 256;
/// Poll cadence for response completion and lifecycle checks
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// A single WebSocket send slower than this gets logged
const SLOW_WRITE: Duration = Duration::from_millis(100);
/// How long the child gets to exit on its own at teardown
const CHILD_GRACE: Duration = Duration::from_secs(2);

/// Tunables handed down from the orchestrator
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Quiet period after which a streaming response counts as finished
    pub response_timeout: Duration,
    /// Hard ceiling on session lifetime
    pub session_ceiling: Duration,
    /// Whether vision detection starts enabled
    pub vision_enabled: bool,
    /// Whether auto-respond (low-confidence alerting) starts enabled
    pub auto_respond: bool,
}

/// Idempotent shutdown latch shared by all session tasks
pub struct Shutdown {
    flag: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Trip the latch; safe to call from any task, any number of times
    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve when the latch trips (immediately if it already has). The
    /// waiter is registered before the flag is re-read, so a trigger between
    /// the two cannot be missed.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards low-confidence parses to the outbound queue as JSON text frames.
/// Turn record-keeping stays with the conversation log, so `on_turn` is not
/// wired to anything here.
struct LowConfidenceForwarder {
    outbound: mpsc::Sender<Outbound>,
}

impl CaptureObserver for LowConfidenceForwarder {
    fn on_turn(&self, _tab_id: &str, _turn: &ConversationTurn) {}

    fn on_low_confidence(&self, tab_id: &str, raw: &str, confidence: f64) {
        debug!(tab = %tab_id, confidence, "forwarding low-confidence parse");
        let _ = self.outbound.try_send(Outbound::Message(ClientMessage::LowConfidence {
            raw: raw.to_string(),
            confidence,
        }));
    }
}

/// Coordinates one PTY session against one remote client
pub struct SessionCoordinator {
    tab_id: String,
    pty: Arc<PtyHandle>,
    reader: Mutex<Option<Box<dyn std::io::Read + Send>>>,
    log: Arc<ConversationLog>,
    providers: ProviderRegistry,
    detector: Arc<dyn CommandDetector>,
    vision: Arc<dyn Detector>,
    settings: SessionSettings,
    vision_enabled: Arc<AtomicBool>,
    auto_respond: Arc<AtomicBool>,
    tui_mode: Arc<AtomicBool>,
    capture: Arc<Mutex<Option<Arc<ConversationCapture>>>>,
    observer_outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    shutdown: Arc<Shutdown>,
}

impl SessionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tab_id: impl Into<String>,
        pty: PtyHandle,
        reader: Box<dyn std::io::Read + Send>,
        log: Arc<ConversationLog>,
        providers: ProviderRegistry,
        detector: Arc<dyn CommandDetector>,
        vision: Arc<dyn Detector>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            tab_id: tab_id.into(),
            pty: Arc::new(pty),
            reader: Mutex::new(Some(reader)),
            log,
            providers,
            detector,
            vision,
            settings,
            vision_enabled: Arc::new(AtomicBool::new(settings.vision_enabled)),
            auto_respond: Arc::new(AtomicBool::new(settings.auto_respond)),
            tui_mode: Arc::new(AtomicBool::new(false)),
            capture: Arc::new(Mutex::new(None)),
            observer_outbound: Mutex::new(None),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Run the session to completion: spawns the worker tasks, consumes the
    /// remote stream inline, and tears everything down when either side ends.
    pub async fn run(&self, ws: WebSocketStream<TcpStream>) -> Result<()> {
        info!(tab = %self.tab_id, pid = self.pty.pid().unwrap_or(0), "session started");
        let (sink, mut remote) = ws.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
        let (vision_tx, vision_rx) = mpsc::channel::<Vec<u8>>(VISION_QUEUE);
        let (capture_tx, capture_rx) = mpsc::channel::<Vec<u8>>(CAPTURE_QUEUE);
        *self.observer_outbound.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(outbound_tx.clone());

        let writer = tokio::spawn(writer_task(
            self.tab_id.clone(),
            sink,
            outbound_rx,
            self.shutdown.clone(),
        ));
        let vision_worker = tokio::spawn(vision_task(
            self.vision.clone(),
            self.vision_enabled.clone(),
            vision_rx,
            outbound_tx.clone(),
            self.shutdown.clone(),
        ));
        let capture_worker = tokio::spawn(capture_task(
            self.log.clone(),
            self.capture.clone(),
            capture_rx,
            self.shutdown.clone(),
        ));
        let heartbeat = tokio::spawn(heartbeat_task(
            self.log.clone(),
            self.capture.clone(),
            self.pty.clone(),
            self.tui_mode.clone(),
            self.settings,
            outbound_tx.clone(),
            self.shutdown.clone(),
        ));
        let pty_reader = self.spawn_pty_reader(outbound_tx.clone(), vision_tx, capture_tx);

        // Remote reader runs inline: binary frames are keystrokes, text
        // frames are control messages.
        let mut line_buffer = String::new();
        loop {
            let message = tokio::select! {
                message = remote.next() => message,
                _ = self.shutdown.wait() => None,
            };
            let Some(message) = message else { break };
            match message {
                Ok(Message::Binary(bytes)) => {
                    if let Err(err) = self.handle_keystrokes(&bytes, &mut line_buffer) {
                        warn!(tab = %self.tab_id, error = %err, "pty write failed");
                        let _ = outbound_tx.send(Outbound::Close(CloseReason::IoError)).await;
                        break;
                    }
                }
                Ok(Message::Text(text)) => self.handle_control(&text),
                Ok(Message::Close(_)) => {
                    debug!(tab = %self.tab_id, "client closed connection");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(tab = %self.tab_id, error = %err, "websocket error");
                    break;
                }
            }
        }

        self.shutdown.trigger();
        self.pty.shutdown(CHILD_GRACE);
        self.capture.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.log.close().await;

        let _ = pty_reader.await;
        let _ = writer.await;
        let _ = vision_worker.await;
        let _ = capture_worker.await;
        let _ = heartbeat.await;

        info!(tab = %self.tab_id, "session ended");
        Ok(())
    }

    /// Keystrokes go to the PTY first; capture is downstream of delivery.
    /// When no conversation is active, completed lines run through command
    /// detection to catch an AI-tool launch.
    fn handle_keystrokes(&self, bytes: &[u8], line_buffer: &mut String) -> Result<()> {
        self.pty.write(bytes)?;

        if self.log.has_active() {
            self.log.add_user_input(bytes);
            let capture = self
                .capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Some(capture) = capture {
                capture.capture_input(bytes);
            }
            return Ok(());
        }

        line_buffer.push_str(&String::from_utf8_lossy(bytes));
        if !line_buffer.contains('\n') && !line_buffer.contains('\r') {
            return Ok(());
        }
        let line = std::mem::take(line_buffer);
        self.maybe_start_conversation(line.trim_end_matches(['\n', '\r']));
        Ok(())
    }

    fn maybe_start_conversation(&self, line: &str) {
        let Some(detected) = self.detector.detect(line) else {
            return;
        };
        let cwd = std::env::current_dir().unwrap_or_else(|_| "/".into());
        let id = self.log.start_conversation(&detected, &cwd);
        self.log.set_auto_respond(self.auto_respond.load(Ordering::SeqCst));
        self.tui_mode.store(detected.tui_mode, Ordering::SeqCst);
        info!(
            tab = %self.tab_id,
            conversation = %id,
            provider = %detected.provider,
            tui = detected.tui_mode,
            "ai command detected"
        );

        let capture = ConversationCapture::new(&self.tab_id, self.providers.get(&detected.provider));
        let capture = match self.low_confidence_observer() {
            Some(observer) => capture.with_observer(observer),
            None => capture,
        };
        capture.set_auto_respond(self.auto_respond.load(Ordering::SeqCst));
        *self.capture.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(capture));
    }

    fn low_confidence_observer(&self) -> Option<Arc<dyn CaptureObserver>> {
        let outbound = self.observer_outbound.lock().unwrap_or_else(|e| e.into_inner());
        outbound
            .as_ref()
            .map(|tx| Arc::new(LowConfidenceForwarder { outbound: tx.clone() }) as Arc<dyn CaptureObserver>)
    }

    fn handle_control(&self, text: &str) {
        let message: ControlMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(tab = %self.tab_id, error = %err, "unrecognized control message");
                return;
            }
        };
        match message {
            ControlMessage::Resize { cols, rows } => {
                if let Err(err) = self.pty.resize(cols, rows) {
                    warn!(tab = %self.tab_id, error = %err, "resize failed");
                }
            }
            ControlMessage::VisionEnable => {
                self.vision_enabled.store(true, Ordering::SeqCst);
            }
            ControlMessage::VisionDisable => {
                self.vision_enabled.store(false, Ordering::SeqCst);
            }
            ControlMessage::InjectCommand { command } => {
                debug!(tab = %self.tab_id, command = %command, "injecting command");
                if let Err(err) = self.pty.write(format!("{}\r", command).as_bytes()) {
                    warn!(tab = %self.tab_id, error = %err, "inject write failed");
                    return;
                }
                // injected commands run through the same detection path as
                // typed ones
                if !self.log.has_active() {
                    self.maybe_start_conversation(&command);
                }
            }
            ControlMessage::AutoRespond { auto_respond } => {
                self.auto_respond.store(auto_respond, Ordering::SeqCst);
                self.log.set_auto_respond(auto_respond);
                let capture = self
                    .capture
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if let Some(capture) = capture {
                    capture.set_auto_respond(auto_respond);
                }
            }
        }
    }

    /// Blocking PTY read loop on the blocking pool. Terminal bytes use a
    /// blocking send (backpressure, never loss); vision and capture use
    /// try_send and tolerate drops.
    fn spawn_pty_reader(
        &self,
        outbound: mpsc::Sender<Outbound>,
        vision: mpsc::Sender<Vec<u8>>,
        capture: mpsc::Sender<Vec<u8>>,
    ) -> tokio::task::JoinHandle<()> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut reader) = reader else {
            // run() was called twice; nothing left to read from
            return tokio::spawn(async {});
        };
        let shutdown = self.shutdown.clone();
        let tab_id = self.tab_id.clone();

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                if shutdown.is_triggered() {
                    break;
                }
                match reader.read(&mut buf) {
                    Ok(0) => {
                        debug!(tab = %tab_id, "pty stream ended");
                        let _ = outbound.blocking_send(Outbound::Close(CloseReason::ProcessExited));
                        break;
                    }
                    Ok(n) => {
                        let chunk = buf[..n].to_vec();
                        if outbound.blocking_send(Outbound::Data(chunk.clone())).is_err() {
                            break;
                        }
                        let _ = vision.try_send(chunk.clone());
                        let _ = capture.try_send(chunk);
                    }
                    Err(err) => {
                        if !shutdown.is_triggered() {
                            warn!(tab = %tab_id, error = %err, "pty read failed");
                            let _ = outbound.blocking_send(Outbound::Close(CloseReason::IoError));
                        }
                        break;
                    }
                }
            }
        })
    }
}

/// Sole owner of the WebSocket sink. Drains the outbound queue in order;
/// a `Close` item sends the close frame and ends the session.
async fn writer_task(
    tab_id: String,
    mut sink: futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    shutdown: Arc<Shutdown>,
) {
    loop {
        let item = tokio::select! {
            item = outbound.recv() => item,
            _ = shutdown.wait() => None,
        };
        let Some(item) = item else { break };

        let started = Instant::now();
        let result = match item {
            Outbound::Data(bytes) => sink.send(Message::Binary(bytes)).await,
            Outbound::Message(message) => match serde_json::to_string(&message) {
                Ok(json) => sink.send(Message::Text(json)).await,
                Err(_) => continue,
            },
            Outbound::Close(reason) => {
                info!(tab = %tab_id, code = reason.code(), reason = reason.reason(), "closing session");
                let _ = sink.send(Message::Close(Some(reason.close_frame()))).await;
                shutdown.trigger();
                break;
            }
        };
        if started.elapsed() > SLOW_WRITE {
            warn!(tab = %tab_id, elapsed_ms = started.elapsed().as_millis() as u64, "slow websocket write");
        }
        if result.is_err() {
            debug!(tab = %tab_id, "websocket sink closed");
            shutdown.trigger();
            break;
        }
    }
    let _ = sink.close().await;
}

/// Runs the vision detector over PTY chunks when enabled; matches become
/// overlay messages on the outbound queue.
async fn vision_task(
    detector: Arc<dyn Detector>,
    enabled: Arc<AtomicBool>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Outbound>,
    shutdown: Arc<Shutdown>,
) {
    loop {
        let chunk = tokio::select! {
            chunk = chunks.recv() => chunk,
            _ = shutdown.wait() => None,
        };
        let Some(chunk) = chunk else { break };
        if !enabled.load(Ordering::SeqCst) {
            continue;
        }
        if let Some(hit) = detector.detect(&chunk) {
            let _ = outbound
                .send(Outbound::Message(ClientMessage::VisionOverlay {
                    overlay_type: hit.overlay_type,
                    payload: hit.payload,
                }))
                .await;
        }
    }
}

/// Feeds PTY output chunks into the conversation log and the capture
/// machine, off the latency-critical byte path.
async fn capture_task(
    log: Arc<ConversationLog>,
    capture: Arc<Mutex<Option<Arc<ConversationCapture>>>>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    shutdown: Arc<Shutdown>,
) {
    loop {
        let chunk = tokio::select! {
            chunk = chunks.recv() => chunk,
            _ = shutdown.wait() => None,
        };
        let Some(chunk) = chunk else { break };
        log.add_output(&chunk);
        let current = capture.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(current) = current {
            current.capture_output(&chunk);
        }
    }
}

/// Periodic lifecycle checks: response-completion polling, child exit, and
/// the session lifetime ceiling.
async fn heartbeat_task(
    log: Arc<ConversationLog>,
    capture: Arc<Mutex<Option<Arc<ConversationCapture>>>>,
    pty: Arc<PtyHandle>,
    tui_mode: Arc<AtomicBool>,
    settings: SessionSettings,
    outbound: mpsc::Sender<Outbound>,
    shutdown: Arc<Shutdown>,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut close_sent = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => break,
        }

        let current = capture.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(current) = current {
            if current.check_response_end(settings.response_timeout)
                && !tui_mode.load(Ordering::SeqCst)
            {
                log.flush_output();
            }
            // the log can auto-end (prompt return, turn bound); retire the
            // capture machine with it
            if !log.has_active() {
                capture.lock().unwrap_or_else(|e| e.into_inner()).take();
            }
        }

        if close_sent {
            continue;
        }
        if pty.has_exited() {
            close_sent = true;
            let _ = outbound.send(Outbound::Close(CloseReason::ProcessExited)).await;
        } else if started.elapsed() >= settings.session_ceiling {
            close_sent = true;
            let _ = outbound.send(Outbound::Close(CloseReason::SessionTimeout)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_latch_is_idempotent_and_wakes_waiters() {
        let shutdown = Arc::new(Shutdown::new());
        assert!(!shutdown.is_triggered());

        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        shutdown.trigger();
        shutdown.trigger();
        waiter.await.unwrap();
        assert!(shutdown.is_triggered());

        // waiting after the trip resolves immediately
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn low_confidence_forwarder_queues_json_message() {
        let (tx, mut rx) = mpsc::channel::<Outbound>(4);
        let forwarder = LowConfidenceForwarder { outbound: tx };
        forwarder.on_low_confidence("tab-1", "\x1b[2Jgarbled", 0.45);

        match rx.recv().await.unwrap() {
            Outbound::Message(ClientMessage::LowConfidence { raw, confidence }) => {
                assert_eq!(raw, "\x1b[2Jgarbled");
                assert!((confidence - 0.45).abs() < f64::EPSILON);
            }
            other => panic!("unexpected outbound item: {:?}", other),
        }
    }
}
