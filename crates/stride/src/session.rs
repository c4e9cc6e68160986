//! A single bounded assessment run.
//!
//! A [`CaptureSession`] owns the camera, the inference engine and the streaming connection for
//! the duration of one test. The camera and engine are released when the test completes, fails,
//! is stopped or the session is dropped, whichever happens first.

use std::time::Duration;

use stride_body::{Frame, SkeletonOptions};
use thiserror::Error;

use crate::{
    image::{Image, Resolution},
    overlay::draw_overlay,
    playback::PlaybackController,
    pose::InferenceEngine,
    stream::{ConnectionStatus, SessionState, StreamHandle},
};

/// Session-fatal errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("camera access failed")]
    Camera(#[source] anyhow::Error),
    #[error("failed to initialize pose model")]
    ModelInit(#[source] anyhow::Error),
    #[error("connection to the phase service failed")]
    Connection(#[source] anyhow::Error),
    #[error("phase service reported an error: {0}")]
    Protocol(String),
}

/// A camera, or anything else producing video frames.
pub trait FrameSource: Send {
    /// Starts capturing. Returns the capture resolution.
    fn open(&mut self) -> anyhow::Result<Resolution>;

    /// Returns the current video frame.
    fn read(&mut self) -> anyhow::Result<Image>;

    /// Stops capturing and releases the device.
    fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    patient_id: String,
    user_id: String,
    skeleton: SkeletonOptions,
    overlay: bool,
}

impl SessionOptions {
    pub fn new<P: Into<String>, U: Into<String>>(patient_id: P, user_id: U) -> Self {
        Self {
            patient_id: patient_id.into(),
            user_id: user_id.into(),
            skeleton: SkeletonOptions::default(),
            overlay: true,
        }
    }

    pub fn skeleton(self, skeleton: SkeletonOptions) -> Self {
        Self { skeleton, ..self }
    }

    /// Whether to draw the 2D skeleton onto captured images. Enabled by default.
    pub fn overlay(self, overlay: bool) -> Self {
        Self { overlay, ..self }
    }
}

/// Lifecycle of a [`CaptureSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    /// The phase service delivered the final result.
    Completed,
    Stopped,
    /// A session-fatal error occurred. Holds its description.
    Failed(String),
}

/// Result of one [`CaptureSession::tick`].
#[derive(Debug)]
pub struct Tick {
    /// The captured image, with the overlay drawn if a pose was detected.
    pub image: Image,
    /// The frame produced by inference, if inference ran and found a subject.
    pub frame: Option<Frame>,
}

pub struct CaptureSession {
    camera: Box<dyn FrameSource>,
    engine: InferenceEngine,
    stream: StreamHandle,
    playback: PlaybackController,
    overlay: bool,
    status: SessionStatus,
    released: bool,
}

impl CaptureSession {
    /// Loads the model, opens the camera and sends `start_test`.
    ///
    /// On failure, everything acquired so far is released again.
    pub async fn start(
        camera: Box<dyn FrameSource>,
        engine: InferenceEngine,
        stream: StreamHandle,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            camera,
            engine,
            stream,
            playback: PlaybackController::live(options.skeleton),
            overlay: options.overlay,
            status: SessionStatus::Running,
            released: false,
        };

        session
            .engine
            .initialize()
            .await
            .map_err(SessionError::ModelInit)?;
        let res = session.camera.open().map_err(SessionError::Camera)?;
        log::info!("camera open at {res}");
        session
            .stream
            .start_test(&options.patient_id, &options.user_id)
            .await
            .map_err(SessionError::Connection)?;

        log::info!("session {} started", session.stream.id());
        Ok(session)
    }

    /// Captures one image and drives it through inference, overlay, streaming and live playback.
    ///
    /// Meant to be called once per display refresh with a monotonic `timestamp`. Inference only
    /// runs as often as the engine's target rate permits. Returns [`None`] once the session is no
    /// longer running.
    ///
    /// Once the test result has arrived, the session moves to [`SessionStatus::Completed`] and
    /// releases the camera and engine. A returned error ends the session the same way, with
    /// status [`SessionStatus::Failed`].
    pub fn tick(&mut self, timestamp: Duration) -> Result<Option<Tick>, SessionError> {
        if self.status != SessionStatus::Running {
            return Ok(None);
        }
        let state = self.stream.state();
        if state.result.is_some() {
            log::info!("session {}: test completed", self.stream.id());
            self.playback.apply_phase_state(&state.phase);
            self.status = SessionStatus::Completed;
            self.playback.stop();
            self.release();
            return Ok(None);
        }
        match self.capture(&state, timestamp) {
            Ok(tick) => Ok(Some(tick)),
            Err(e) => {
                log::error!("session {} failed: {e}", self.stream.id());
                self.status = SessionStatus::Failed(e.to_string());
                self.playback.stop();
                self.release();
                Err(e)
            }
        }
    }

    fn capture(&mut self, state: &SessionState, timestamp: Duration) -> Result<Tick, SessionError> {
        if let ConnectionStatus::Disconnected(reason) = &state.connection {
            return Err(SessionError::Connection(anyhow::anyhow!("{reason}")));
        }
        if let Some(message) = &state.error {
            return Err(SessionError::Protocol(message.clone()));
        }
        self.playback.apply_phase_state(&state.phase);

        let mut image = self.camera.read().map_err(SessionError::Camera)?;
        let frame = self.engine.detect(&image, timestamp).map(|pose| {
            if self.overlay {
                draw_overlay(&mut image, pose.landmarks());
            }
            pose.to_frame(timestamp.as_secs_f64())
        });

        if let Some(frame) = &frame {
            if state.is_test_running {
                self.stream.send_frame(frame.clone());
            }
            self.playback.push_live(frame.clone());
        }

        Ok(Tick { image, frame })
    }

    /// Sends `stop_test`, freezes the phase state and releases the camera and the engine.
    ///
    /// The connection stays open so the final result can still arrive. A completed test is not
    /// stopped again.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        self.playback.stop();
        self.release();
        match self.status {
            SessionStatus::Completed => return Ok(()),
            SessionStatus::Running => self.status = SessionStatus::Stopped,
            SessionStatus::Stopped | SessionStatus::Failed(_) => {}
        }
        self.stream
            .stop_test()
            .await
            .map_err(SessionError::Connection)
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn playback(&mut self) -> &mut PlaybackController {
        &mut self.playback
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.camera.close();
        self.engine.close();
        log::debug!("session {}: camera and pose model released", self.stream.id());
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.playback.stop();
        self.release();
        self.stream.close_now();
    }
}
