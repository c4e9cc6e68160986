#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use serde_json::Value;
use stride::{
    body::{Frame, Landmark, NUM_LANDMARKS},
    image::{Image, Resolution},
    nn::{Backend, Network, NetworkLoader, Tensor},
    pose::{EngineOptions, InferenceEngine, ModelSource},
    session::FrameSource,
    stream::{in_memory, MemoryPeer, SessionId, StreamHandle, StreamOptions},
};

/// Landmarks the fake pose network reports, including auxiliary ones.
const NETWORK_LANDMARKS: usize = NUM_LANDMARKS + 6;
const INPUT_SHAPE: [usize; 4] = [1, 3, 16, 16];

pub fn connect(options: StreamOptions) -> (StreamHandle, MemoryPeer) {
    let (transport, peer) = in_memory();
    let handle = StreamHandle::spawn(SessionId::new(), transport, options);
    (handle, peer)
}

pub fn frame(time: f64) -> Frame {
    let landmarks = (0..NUM_LANDMARKS)
        .map(|i| Landmark::new([i as f32 / 40.0, 0.5, 0.0]).with_visibility(0.9))
        .collect();
    Frame::new(time, landmarks)
}

pub fn parse(msg: &str) -> Value {
    serde_json::from_str(msg).unwrap()
}

/// Returns the `type` of every message.
pub fn kinds(msgs: &[String]) -> Vec<String> {
    msgs.iter()
        .map(|m| parse(m)["type"].as_str().unwrap().to_string())
        .collect()
}

pub fn count_kind(msgs: &[String], kind: &str) -> usize {
    kinds(msgs).iter().filter(|k| *k == kind).count()
}

/// Pose network stand-in that reports the same subject for every input.
pub struct FakeNetwork {
    runs: Arc<AtomicUsize>,
}

impl Network for FakeNetwork {
    fn backend(&self) -> Backend {
        Backend::Scalar
    }

    fn input_shape(&self) -> &[usize] {
        &INPUT_SHAPE
    }

    fn run(&self, _: &Tensor) -> anyhow::Result<Vec<Tensor>> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let screen = (0..NETWORK_LANDMARKS)
            .flat_map(|i| [i as f32 * 0.4, 8.0, 0.0, 4.0, 4.0])
            .collect();
        let world = (0..NETWORK_LANDMARKS)
            .flat_map(|i| [(i % 2) as f32 * 0.2 - 0.1, i as f32 * 0.03 - 0.5, 0.0])
            .collect();
        Ok(vec![
            Tensor::from_vec(&[1, NETWORK_LANDMARKS * 5], screen)?,
            Tensor::from_vec(&[1, 1], vec![1.0])?,
            Tensor::from_vec(&[1, NETWORK_LANDMARKS * 3], world)?,
        ])
    }
}

#[derive(Default)]
pub struct FakeLoader {
    pub runs: Arc<AtomicUsize>,
    pub fail: bool,
}

impl NetworkLoader for FakeLoader {
    fn load(&self, _: &[u8], _: Backend) -> anyhow::Result<Box<dyn Network>> {
        if self.fail {
            anyhow::bail!("corrupt model");
        }
        Ok(Box::new(FakeNetwork {
            runs: self.runs.clone(),
        }))
    }
}

/// Creates an engine backed by [`FakeLoader`]. Returns the engine and its inference counter.
pub fn fake_engine(target_fps: f32) -> (InferenceEngine, Arc<AtomicUsize>) {
    let loader = FakeLoader::default();
    let runs = loader.runs.clone();
    let options = EngineOptions::default()
        .target_fps(target_fps)
        .model(ModelSource::Memory(Arc::from(&b"weights"[..])));
    (InferenceEngine::with_loader(options, Arc::new(loader)), runs)
}

/// Camera stand-in producing blank images. Records whether it is currently open.
#[derive(Clone, Default)]
pub struct FakeCamera {
    pub open: Arc<AtomicBool>,
    pub broken: Arc<AtomicBool>,
}

impl FrameSource for FakeCamera {
    fn open(&mut self) -> anyhow::Result<Resolution> {
        if self.broken.load(Ordering::Relaxed) {
            anyhow::bail!("permission denied");
        }
        self.open.store(true, Ordering::Relaxed);
        Ok(Resolution::new(64, 48))
    }

    fn read(&mut self) -> anyhow::Result<Image> {
        if self.broken.load(Ordering::Relaxed) {
            anyhow::bail!("device unplugged");
        }
        Ok(Image::new(64, 48))
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
    }
}
