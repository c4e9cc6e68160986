//! Neural network inference backends.
//!
//! Networks are loaded through a [`NetworkLoader`], which turns raw ONNX weights into a runnable
//! [`Network`] for a given [`Backend`]. [`load_with_fallback`] implements the one-shot fallback from
//! the accelerated to the scalar backend.

mod backend;
pub mod tensor;

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, Tensor as TractTensor,
    TypedFact, TypedModel, TypedOp,
};
use wonnx::utils::{InputTensor, OutputTensor};

pub use backend::{forced as forced_backend, Backend};
pub use tensor::Tensor;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A loaded network, ready for inference.
pub trait Network: Send {
    /// The backend this network executes on.
    fn backend(&self) -> Backend;

    /// Shape of the single input tensor.
    fn input_shape(&self) -> &[usize];

    /// Runs one inference pass.
    fn run(&self, input: &Tensor) -> anyhow::Result<Vec<Tensor>>;
}

/// Turns raw model weights into a [`Network`].
pub trait NetworkLoader: Send + Sync {
    fn load(&self, weights: &[u8], backend: Backend) -> anyhow::Result<Box<dyn Network>>;
}

/// Loads `weights` with `backend`, falling back once if that fails.
///
/// The fallback is silent apart from a warning in the log. If the fallback fails as well, the
/// returned error describes both failures.
pub fn load_with_fallback(
    loader: &dyn NetworkLoader,
    weights: &[u8],
    backend: Backend,
) -> anyhow::Result<Box<dyn Network>> {
    let first = match loader.load(weights, backend) {
        Ok(net) => return Ok(net),
        Err(e) => e,
    };
    let Some(fallback) = backend.fallback() else {
        return Err(first.context(format!("failed to load network on {backend} backend")));
    };

    log::warn!("{backend} backend unavailable ({first:#}), falling back to {fallback}");
    loader.load(weights, fallback).with_context(|| {
        format!("failed to load network on {fallback} backend after {backend} failed: {first:#}")
    })
}

/// [`NetworkLoader`] for ONNX models.
///
/// The scalar backend is implemented with [`tract_onnx`], the accelerated backend with [`wonnx`].
#[derive(Debug, Clone, Default)]
pub struct OnnxLoader {
    outputs: Option<Vec<usize>>,
}

impl OnnxLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only compute the specified outputs during inference.
    ///
    /// The returned tensors of [`Network::run`] correspond to the chosen output indices, in order.
    pub fn with_output_selection<O>(mut self, outputs: O) -> Self
    where
        O: Into<Vec<usize>>,
    {
        self.outputs = Some(outputs.into());
        self
    }
}

impl NetworkLoader for OnnxLoader {
    fn load(&self, weights: &[u8], backend: Backend) -> anyhow::Result<Box<dyn Network>> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*weights)?
            .into_optimized()?;
        let info = GraphInfo::new(&graph, self.outputs.as_deref())?;

        match backend {
            Backend::Scalar => {
                let outlets = info.outlets.clone();
                let plan = SimplePlan::new_for_outputs(graph, &outlets)?;
                Ok(Box::new(ScalarNetwork {
                    plan: Arc::new(plan),
                    info,
                }))
            }
            Backend::Accelerated => {
                let session = pollster::block_on(wonnx::Session::from_bytes(weights))?;
                Ok(Box::new(AcceleratedNetwork { session, info }))
            }
        }
    }
}

struct GraphInfo {
    input_name: String,
    input_shape: Vec<usize>,
    outlets: Vec<tract_onnx::prelude::OutletId>,
    outputs: Vec<(String, Vec<usize>)>,
}

impl GraphInfo {
    fn new(graph: &TypedModel, selection: Option<&[usize]>) -> anyhow::Result<Self> {
        let inputs = graph.input_outlets()?;
        if inputs.len() != 1 {
            anyhow::bail!(
                "network has to take exactly 1 input, this one takes {}",
                inputs.len()
            );
        }
        let input_shape = concrete_shape(graph.outlet_fact(inputs[0])?)?;
        let input_name = graph.node(inputs[0].node).name.clone();

        let all = graph.output_outlets()?;
        let outlets = match selection {
            Some(indices) => indices
                .iter()
                .map(|&i| {
                    all.get(i)
                        .copied()
                        .with_context(|| format!("network has no output #{i}"))
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
            None => all.to_vec(),
        };
        let outputs = outlets
            .iter()
            .map(|&outlet| {
                let shape = concrete_shape(graph.outlet_fact(outlet)?)?;
                Ok((graph.node(outlet.node).name.clone(), shape))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            input_name,
            input_shape,
            outlets,
            outputs,
        })
    }
}

fn concrete_shape(fact: &TypedFact) -> anyhow::Result<Vec<usize>> {
    match fact.shape.as_concrete() {
        Some(shape) => Ok(shape.to_vec()),
        None => anyhow::bail!("network uses symbolic tensor shape {:?}", fact.shape),
    }
}

struct ScalarNetwork {
    plan: Arc<Model>,
    info: GraphInfo,
}

impl Network for ScalarNetwork {
    fn backend(&self) -> Backend {
        Backend::Scalar
    }

    fn input_shape(&self) -> &[usize] {
        &self.info.input_shape
    }

    fn run(&self, input: &Tensor) -> anyhow::Result<Vec<Tensor>> {
        let tensor = TractTensor::from_shape(input.shape(), input.as_slice())?;
        let outputs = self.plan.run(tvec![TValue::from_const(Arc::new(tensor))])?;
        outputs
            .iter()
            .map(|t| Tensor::from_vec(t.shape(), t.as_slice::<f32>()?.to_vec()))
            .collect()
    }
}

struct AcceleratedNetwork {
    session: wonnx::Session,
    info: GraphInfo,
}

impl Network for AcceleratedNetwork {
    fn backend(&self) -> Backend {
        Backend::Accelerated
    }

    fn input_shape(&self) -> &[usize] {
        &self.info.input_shape
    }

    fn run(&self, input: &Tensor) -> anyhow::Result<Vec<Tensor>> {
        let mut inputs = HashMap::new();
        inputs.insert(
            self.info.input_name.clone(),
            InputTensor::F32(input.as_slice().into()),
        );

        let mut output_map = pollster::block_on(self.session.run(&inputs))?;
        self.info
            .outputs
            .iter()
            .map(|(name, shape)| match output_map.remove(name) {
                Some(OutputTensor::F32(data)) => Tensor::from_vec(shape, data),
                Some(_) => anyhow::bail!("output '{name}' is not an f32 tensor"),
                None => anyhow::bail!("accelerated backend produced no output '{name}'"),
            })
            .collect()
    }
}
