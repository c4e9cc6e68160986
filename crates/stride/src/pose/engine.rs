use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::sync::watch;

use crate::{
    image::Image,
    nn::{self, Backend, Network, NetworkLoader, OnnxLoader},
    timer::{FpsCounter, Timer},
};

use super::{decode, preprocess, ModelSource, PoseResult, OUTPUT_SELECTION};

/// Ticks arriving this much earlier than the minimum interval are still accepted.
const TICK_TOLERANCE: Duration = Duration::from_micros(500);

/// Configuration of an [`InferenceEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    target_fps: f32,
    model: ModelSource,
    presence_threshold: f32,
    backend: Backend,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            model: ModelSource::default(),
            presence_threshold: 0.5,
            backend: nn::forced_backend().unwrap_or(Backend::Accelerated),
        }
    }
}

impl EngineOptions {
    /// Sets the maximum number of inference passes per second.
    ///
    /// # Panics
    ///
    /// Panics if `fps` is not a positive, finite number.
    pub fn target_fps(self, fps: f32) -> Self {
        assert!(fps > 0.0 && fps.is_finite(), "invalid target FPS {fps}");
        Self {
            target_fps: fps,
            ..self
        }
    }

    pub fn model(self, model: ModelSource) -> Self {
        Self { model, ..self }
    }

    /// Sets the minimum pose presence for a subject to be reported.
    pub fn presence_threshold(self, presence_threshold: f32) -> Self {
        Self {
            presence_threshold,
            ..self
        }
    }

    /// Sets the backend tried first.
    pub fn backend(self, backend: Backend) -> Self {
        Self { backend, ..self }
    }

    pub fn get_target_fps(&self) -> f32 {
        self.target_fps
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.target_fps).saturating_sub(TICK_TOLERANCE)
    }
}

/// Observable lifecycle of an [`InferenceEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready(Backend),
    /// Model loading failed. Not retried automatically.
    Error(String),
}

/// Rate-limited pose inference.
///
/// [`InferenceEngine::detect`] is meant to be called from a per-refresh callback. Calls arriving
/// faster than the configured target rate return immediately without running the network.
pub struct InferenceEngine {
    options: EngineOptions,
    loader: Arc<dyn NetworkLoader>,
    network: Option<Box<dyn Network>>,
    state: watch::Sender<EngineState>,
    last_run: Option<Duration>,
    fps: FpsCounter,
    t_infer: Timer,
}

impl InferenceEngine {
    /// Creates an engine that loads ONNX models.
    pub fn new(options: EngineOptions) -> Self {
        let loader = OnnxLoader::new().with_output_selection(OUTPUT_SELECTION);
        Self::with_loader(options, Arc::new(loader))
    }

    pub fn with_loader(options: EngineOptions, loader: Arc<dyn NetworkLoader>) -> Self {
        let (state, _) = watch::channel(EngineState::Uninitialized);
        Self {
            options,
            loader,
            network: None,
            state,
            last_run: None,
            fps: FpsCounter::new("pose inference"),
            t_infer: Timer::new("infer"),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Subscribes to engine state changes.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.network.is_some()
    }

    /// Fetches the model weights and loads the network.
    ///
    /// The configured backend is tried first; if it fails, the scalar backend is tried once.
    /// Returns the backend in use. Errors are terminal and also published as
    /// [`EngineState::Error`].
    pub async fn initialize(&mut self) -> anyhow::Result<Backend> {
        if let Some(network) = &self.network {
            return Ok(network.backend());
        }
        self.state.send_replace(EngineState::Loading);

        let source = self.options.model.clone();
        match load(source, self.loader.clone(), self.options.backend).await {
            Ok(network) => {
                let backend = network.backend();
                log::info!("pose model ready on {backend} backend");
                self.network = Some(network);
                self.state.send_replace(EngineState::Ready(backend));
                Ok(backend)
            }
            Err(e) => {
                log::error!("failed to initialize pose model: {e:#}");
                self.state.send_replace(EngineState::Error(format!("{e:#}")));
                Err(e)
            }
        }
    }

    /// Runs inference on `image` if enough time has passed since the last run.
    ///
    /// `timestamp` is the caller's monotonic clock. Ticks before the minimum interval elapsed are
    /// no-ops. Returns [`None`] when throttled, when the engine is not ready, when no subject is in
    /// view, or when inference fails (the failure is logged).
    pub fn detect(&mut self, image: &Image, timestamp: Duration) -> Option<PoseResult> {
        if !self.should_run(timestamp) {
            return None;
        }
        let network = self.network.as_deref()?;
        self.last_run = Some(timestamp);

        let result = self.t_infer.time(|| infer(network, image));
        self.fps.tick_with(timestamp, format_args!(" ({})", self.t_infer));

        match result {
            Ok(pose) if pose.presence() >= self.options.presence_threshold => Some(pose),
            Ok(_) => None,
            Err(e) => {
                log::warn!("pose inference failed: {e:#}");
                None
            }
        }
    }

    /// Returns whether a tick at `timestamp` would run inference.
    ///
    /// A timestamp earlier than the last run restarts the clock.
    pub fn should_run(&self, timestamp: Duration) -> bool {
        match self.last_run {
            None => true,
            Some(last) if timestamp < last => true,
            Some(last) => timestamp - last >= self.options.min_interval(),
        }
    }

    /// Inference passes per second measured over the last full second.
    pub fn measured_fps(&self) -> f32 {
        self.fps.fps()
    }

    /// Releases the network. The engine can be initialized again afterwards.
    pub fn close(&mut self) {
        if self.network.take().is_some() {
            log::debug!("pose model released");
        }
        self.last_run = None;
        self.fps.reset();
        self.state.send_replace(EngineState::Uninitialized);
    }
}

async fn load(
    source: ModelSource,
    loader: Arc<dyn NetworkLoader>,
    backend: Backend,
) -> anyhow::Result<Box<dyn Network>> {
    let weights = source.fetch().await?;
    tokio::task::spawn_blocking(move || nn::load_with_fallback(&*loader, &weights, backend))
        .await
        .context("model loading task panicked")?
}

fn infer(network: &dyn Network, image: &Image) -> anyhow::Result<PoseResult> {
    let input = preprocess(image, network.input_shape())?;
    let outputs = network.run(&input)?;
    decode(&outputs, network.input_shape())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{nn::Tensor, pose::tests::*};

    use super::*;

    struct FakeNetwork {
        backend: Backend,
        presence: f32,
        runs: Arc<AtomicUsize>,
        fail_every: Option<usize>,
    }

    impl Network for FakeNetwork {
        fn backend(&self) -> Backend {
            self.backend
        }

        fn input_shape(&self) -> &[usize] {
            &INPUT_SHAPE
        }

        fn run(&self, _: &Tensor) -> anyhow::Result<Vec<Tensor>> {
            let n = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
            if self.fail_every.map_or(false, |k| n % k == 0) {
                anyhow::bail!("decoder glitch");
            }
            Ok(fake_outputs(self.presence, 128.0, 128.0))
        }
    }

    struct FakeLoader {
        accelerated: bool,
        presence: f32,
        runs: Arc<AtomicUsize>,
        fail_every: Option<usize>,
    }

    impl NetworkLoader for FakeLoader {
        fn load(&self, weights: &[u8], backend: Backend) -> anyhow::Result<Box<dyn Network>> {
            assert_eq!(weights, b"weights");
            if backend == Backend::Accelerated && !self.accelerated {
                anyhow::bail!("no GPU");
            }
            Ok(Box::new(FakeNetwork {
                backend,
                presence: self.presence,
                runs: self.runs.clone(),
                fail_every: self.fail_every,
            }))
        }
    }

    fn engine(accelerated: bool, presence: f32) -> (InferenceEngine, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let loader = FakeLoader {
            accelerated,
            presence,
            runs: runs.clone(),
            fail_every: None,
        };
        let options = EngineOptions::default()
            .model(ModelSource::Memory(Arc::from(&b"weights"[..])))
            .backend(Backend::Accelerated);
        (
            InferenceEngine::with_loader(options, Arc::new(loader)),
            runs,
        )
    }

    #[tokio::test]
    async fn initialize_publishes_state() {
        let (mut engine, _) = engine(false, 1.0);
        let state = engine.subscribe();
        assert_eq!(*state.borrow(), EngineState::Uninitialized);

        assert_eq!(engine.initialize().await.unwrap(), Backend::Scalar);
        assert_eq!(*state.borrow(), EngineState::Ready(Backend::Scalar));

        engine.close();
        assert_eq!(*state.borrow(), EngineState::Uninitialized);
        assert!(!engine.is_ready());
    }

    #[tokio::test]
    async fn load_failure_is_terminal() {
        let (mut engine, _) = engine(true, 1.0);
        engine.options = engine
            .options
            .clone()
            .model(ModelSource::Path("missing.onnx".into()));
        assert!(engine.initialize().await.is_err());
        match engine.state() {
            EngineState::Error(msg) => assert!(msg.contains("missing.onnx"), "{msg}"),
            state => panic!("unexpected state {state:?}"),
        }
        assert_eq!(engine.detect(&Image::new(8, 8), Duration::ZERO), None);
    }

    #[tokio::test]
    async fn throttles_to_target_rate() {
        let (mut engine, runs) = engine(true, 1.0);
        engine.options = engine.options.clone().target_fps(30.0);
        engine.initialize().await.unwrap();

        let image = Image::new(8, 8);
        // 120 Hz refresh for two seconds.
        let mut detections = 0;
        for i in 0..240u32 {
            let ts = Duration::from_nanos(8_333_333) * i;
            detections += engine.detect(&image, ts).is_some() as usize;
        }
        let runs = runs.load(Ordering::Relaxed);
        assert_eq!(runs, detections);
        assert!((59..=61).contains(&runs), "{runs} runs");
        assert!(engine.measured_fps() <= 30.5, "{}", engine.measured_fps());
    }

    #[tokio::test]
    async fn absent_subject_is_not_reported() {
        let (mut engine, runs) = engine(true, 0.2);
        engine.initialize().await.unwrap();
        assert_eq!(engine.detect(&Image::new(8, 8), Duration::ZERO), None);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn inference_errors_do_not_stop_the_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let loader = FakeLoader {
            accelerated: true,
            presence: 1.0,
            runs: runs.clone(),
            fail_every: Some(2),
        };
        let options = EngineOptions::default()
            .model(ModelSource::Memory(Arc::from(&b"weights"[..])))
            .target_fps(10.0);
        let mut engine = InferenceEngine::with_loader(options, Arc::new(loader));
        engine.initialize().await.unwrap();

        let image = Image::new(8, 8);
        let results = (0..4u64)
            .map(|i| engine.detect(&image, Duration::from_millis(100 * i)))
            .collect::<Vec<_>>();
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
        assert_eq!(runs.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn clock_restart_runs_immediately() {
        let (mut engine, _) = engine(true, 1.0);
        engine.last_run = Some(Duration::from_secs(10));
        assert!(!engine.should_run(Duration::from_millis(10_010)));
        assert!(engine.should_run(Duration::from_secs(1)));
    }
}
