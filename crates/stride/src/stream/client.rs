use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use stride_body::Frame;
use tokio::{
    sync::{mpsc, watch, Notify},
    time::{self, Instant, MissedTickBehavior},
};

use super::{
    limiter::RateLimiter,
    protocol::{FrameData, Outbound},
    state::{Event, SessionState},
    transport::{self, Transport},
    SessionId, StreamOptions,
};

#[derive(Debug)]
enum Command {
    Start { patient_id: String, user_id: String },
    Stop,
    Close,
}

/// Holds the newest frame not yet picked up by the actor.
#[derive(Default)]
struct FrameSlot {
    frame: Mutex<Option<Frame>>,
    ready: Notify,
}

impl FrameSlot {
    /// Stores `frame`, returning the pending frame it replaces.
    fn put(&self, frame: Frame) -> Option<Frame> {
        let stale = self.frame.lock().replace(frame);
        self.ready.notify_one();
        stale
    }

    fn take(&self) -> Option<Frame> {
        self.frame.lock().take()
    }
}

/// Cheaply [`Clone`]able handle to a connection actor.
///
/// The actor exits when the connection is lost, when [`StreamHandle::close`] is called, or when
/// every handle has been dropped.
#[derive(Clone)]
pub struct StreamHandle {
    id: SessionId,
    commands: mpsc::Sender<Command>,
    frames: Arc<FrameSlot>,
    state: watch::Receiver<SessionState>,
    dropped: Arc<AtomicU64>,
}

impl StreamHandle {
    /// Opens a WebSocket connection and spawns its actor.
    pub async fn connect(options: StreamOptions) -> anyhow::Result<Self> {
        let transport = Transport::websocket(options.url()).await?;
        Ok(Self::spawn(SessionId::new(), transport, options))
    }

    /// Spawns the actor for an already established `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(id: SessionId, transport: Transport, options: StreamOptions) -> Self {
        let (commands, rx) = mpsc::channel(options.queue_depth);
        let (state_tx, state) = watch::channel(SessionState::default());
        let dropped = Arc::new(AtomicU64::new(0));
        let frames = Arc::new(FrameSlot::default());

        let actor = Actor {
            id,
            limiter: RateLimiter::new(options.max_send_rate),
            options,
            transport,
            commands: rx,
            frames: frames.clone(),
            state: state_tx,
            dropped: dropped.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            id,
            commands,
            frames,
            state,
            dropped,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns a snapshot of the current session state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Subscribes to session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Clears local phase and result state, then sends `start_test`.
    pub async fn start_test(&self, patient_id: &str, user_id: &str) -> anyhow::Result<()> {
        self.command(Command::Start {
            patient_id: patient_id.into(),
            user_id: user_id.into(),
        })
        .await
    }

    /// Offers a frame for sending. Never blocks.
    ///
    /// Only the newest offered frame is kept. It replaces any frame the actor has not picked up
    /// yet, and it is dropped when no test is running or when sending it would exceed the
    /// configured send rate. Returns whether the frame was accepted for sending.
    pub fn send_frame(&self, frame: Frame) -> bool {
        if self.is_closed() {
            log::trace!("dropping frame at {:.3}s, connection closed", frame.time);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if let Some(stale) = self.frames.put(frame) {
            log::trace!("dropping frame at {:.3}s, superseded", stale.time);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Sends `stop_test` and freezes the phase state.
    pub async fn stop_test(&self) -> anyhow::Result<()> {
        self.command(Command::Stop).await
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.command(Command::Close).await.ok();
    }

    /// Requests closing the connection without waiting for queue capacity.
    pub fn close_now(&self) {
        self.commands.try_send(Command::Close).ok();
    }

    /// Number of frames dropped so far, for any reason.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns whether the actor has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn command(&self, command: Command) -> anyhow::Result<()> {
        if self.commands.send(command).await.is_err() {
            anyhow::bail!("connection of session {} is closed", self.id);
        }
        Ok(())
    }
}

struct Actor {
    id: SessionId,
    options: StreamOptions,
    transport: Transport,
    commands: mpsc::Receiver<Command>,
    frames: Arc<FrameSlot>,
    state: watch::Sender<SessionState>,
    limiter: RateLimiter,
    dropped: Arc<AtomicU64>,
}

impl Actor {
    async fn run(mut self) {
        let period = self.options.ping_interval;
        let mut ping = time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!("session {}: connection open", self.id);
        self.apply(Event::Connected);

        let reason = loop {
            // Commands go first so a frame offered right after `start_test` or `stop_test` is
            // judged against the state those produce.
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => break "closed locally".to_string(),
                    Some(command) => {
                        if let Err(e) = self.handle(command).await {
                            break format!("{e:#}");
                        }
                    }
                },
                _ = self.frames.ready.notified() => {
                    if let Err(e) = self.send_latest_frame().await {
                        break format!("{e:#}");
                    }
                }
                msg = self.transport.stream.next() => match msg {
                    Some(Ok(text)) => {
                        if let Some(msg) = transport::parse(&text) {
                            self.apply(Event::Inbound(msg));
                        }
                    }
                    Some(Err(e)) => break format!("{e:#}"),
                    None => break "closed by peer".to_string(),
                },
                _ = ping.tick() => {
                    if let Err(e) = self.send(Outbound::Ping).await {
                        break format!("{e:#}");
                    }
                }
            }
        };

        log::warn!("session {}: disconnected ({reason})", self.id);
        self.transport.sink.close().await.ok();
        self.apply(Event::Disconnected(reason));
    }

    async fn handle(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Start {
                patient_id,
                user_id,
            } => {
                self.apply(Event::Reset);
                self.limiter.reset();
                self.send(Outbound::StartTest {
                    patient_id,
                    user_id,
                })
                .await
            }
            Command::Stop => {
                self.send(Outbound::StopTest).await?;
                self.apply(Event::Stopped);
                Ok(())
            }
            Command::Close => Ok(()),
        }
    }

    async fn send_latest_frame(&mut self) -> anyhow::Result<()> {
        let Some(frame) = self.frames.take() else {
            return Ok(());
        };
        if !self.state.borrow().accepts_frames() {
            log::trace!("dropping frame at {:.3}s, no test running", frame.time);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if !self.limiter.try_acquire(Instant::now()) {
            log::trace!("dropping frame at {:.3}s, send rate exceeded", frame.time);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.send(Outbound::FrameData(FrameData::from_frame(&frame)))
            .await
    }

    async fn send(&mut self, msg: Outbound) -> anyhow::Result<()> {
        log::trace!("session {}: sending {}", self.id, msg.kind());
        self.transport.sink.send(msg.to_json()?).await
    }

    fn apply(&self, event: Event) {
        self.state.send_modify(|state| state.apply(event));
    }
}
