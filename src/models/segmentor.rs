//! Segmentor seam and the reference per-pixel linear head
//!
//! Backbones and decoder layers are external collaborators; the crate only
//! needs the contract below: forward to logits, backward from a logit
//! gradient, and named-parameter access for the optimizer, the precision
//! strategy and the checkpoint store.

use std::collections::BTreeMap;

use ndarray::{Array1, Array4};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Param;
use crate::{Error, Result};

/// Serialized form of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Logical shape
    pub shape: Vec<usize>,
    /// Flat row-major data
    pub data: Vec<f32>,
}

/// Named parameter collection, the checkpointable view of a segmentor
pub type StateDict = BTreeMap<String, TensorData>;

/// How a state dict is applied to a segmentor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Exact name and shape match; resuming an interrupted run of the same task
    Strict,
    /// The enlarged current-task classifier may grow its leading dimension;
    /// previous rows are copied, newly added rows keep their initialization.
    /// Bootstrapping task N from task N-1.
    Bootstrap,
}

/// A trainable segmentation model
pub trait Segmentor: Send {
    /// Number of output classes (classifier channels)
    fn num_classes(&self) -> usize;

    /// Alignment flag used when upsampling this model's logits
    fn align_corners(&self) -> bool;

    /// Forward pass: images `[B, C, H, W]` to logits `[B, K, H, W]`
    fn forward(&self, images: &Array4<f32>) -> Array4<f32>;

    /// Accumulate parameter gradients from a logit gradient
    fn backward(&mut self, images: &Array4<f32>, grad_logits: &Array4<f32>);

    /// Parameter access
    fn params(&self) -> &[Param];

    /// Mutable parameter access
    fn params_mut(&mut self) -> &mut [Param];

    /// Switch between train and inference mode
    fn set_train(&mut self, train: bool);

    /// Whether the model is in train mode
    fn is_train(&self) -> bool;

    /// Freeze all parameters; frozen models accumulate no gradients
    fn freeze(&mut self) {
        for p in self.params_mut() {
            p.set_requires_grad(false);
        }
    }
}

/// Export a segmentor's parameters as a state dict
pub fn state_dict(segmentor: &dyn Segmentor) -> StateDict {
    segmentor
        .params()
        .iter()
        .map(|p| {
            (
                p.name().to_string(),
                TensorData {
                    shape: p.shape().to_vec(),
                    data: p.data().to_vec(),
                },
            )
        })
        .collect()
}

/// Apply a state dict to a segmentor under the given load mode
pub fn load_state_dict(
    segmentor: &mut dyn Segmentor,
    state: &StateDict,
    mode: LoadMode,
) -> Result<()> {
    if mode == LoadMode::Strict && state.len() != segmentor.params().len() {
        return Err(Error::Resume(format!(
            "strict load: checkpoint has {} parameters, model has {}",
            state.len(),
            segmentor.params().len()
        )));
    }
    for param in segmentor.params_mut() {
        let entry = state.get(param.name()).ok_or_else(|| {
            Error::Resume(format!("parameter `{}` missing from checkpoint", param.name()))
        })?;
        if entry.shape == param.shape() {
            param
                .data_mut()
                .assign(&Array1::from_vec(entry.data.clone()));
            continue;
        }
        match mode {
            LoadMode::Strict => {
                return Err(Error::Resume(format!(
                    "strict load: shape mismatch for `{}`: checkpoint {:?}, model {:?}",
                    param.name(),
                    entry.shape,
                    param.shape()
                )));
            }
            LoadMode::Bootstrap => load_prefix_rows(param, entry)?,
        }
    }
    Ok(())
}

/// Copy the leading-dimension prefix of a smaller source into a grown
/// parameter. Only the classifier head legitimately grows between tasks,
/// and only along its first axis.
fn load_prefix_rows(param: &mut Param, entry: &TensorData) -> Result<()> {
    let grown = param.shape().len() == entry.shape.len()
        && !entry.shape.is_empty()
        && entry.shape[0] <= param.shape()[0]
        && entry.shape[1..] == param.shape()[1..];
    if !grown {
        return Err(Error::Resume(format!(
            "bootstrap load: `{}` cannot grow from {:?} to {:?}",
            param.name(),
            entry.shape,
            param.shape()
        )));
    }
    let row: usize = entry.shape[1..].iter().product();
    let prefix = entry.shape[0] * row;
    let dst = param.data_mut();
    for (i, v) in entry.data.iter().take(prefix).enumerate() {
        dst[i] = *v;
    }
    Ok(())
}

/// Per-pixel linear classifier head: `logits[k] = W[k, :] . features + b[k]`
///
/// The reference segmentor used by the CLI demo and the test suite. Its
/// weight rows are classifier rows, so bootstrap loading between tasks
/// exercises the same prefix-copy path a full network's head would.
pub struct LinearSegmentor {
    num_classes: usize,
    in_channels: usize,
    align_corners: bool,
    params: Vec<Param>,
    train_mode: bool,
}

impl LinearSegmentor {
    /// Create a head with deterministic seeded initialization
    pub fn new(num_classes: usize, in_channels: usize, align_corners: bool, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (in_channels as f32).sqrt();
        let weight: Vec<f32> = (0..num_classes * in_channels)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let bias = vec![0.0; num_classes];
        let params = vec![
            Param::new(
                "classifier.weight",
                vec![num_classes, in_channels],
                Array1::from_vec(weight),
            ),
            Param::new("classifier.bias", vec![num_classes], Array1::from_vec(bias)),
        ];
        Self {
            num_classes,
            in_channels,
            align_corners,
            params,
            train_mode: true,
        }
    }

    fn weight(&self) -> &Array1<f32> {
        self.params[0].data()
    }

    fn bias(&self) -> &Array1<f32> {
        self.params[1].data()
    }
}

impl Segmentor for LinearSegmentor {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn align_corners(&self) -> bool {
        self.align_corners
    }

    fn forward(&self, images: &Array4<f32>) -> Array4<f32> {
        let (b, c, h, w) = images.dim();
        assert_eq!(c, self.in_channels, "input channel mismatch");
        let weight = self.weight();
        let bias = self.bias();
        let mut logits = Array4::<f32>::zeros((b, self.num_classes, h, w));
        for bi in 0..b {
            for k in 0..self.num_classes {
                for y in 0..h {
                    for x in 0..w {
                        let mut acc = bias[k];
                        for ci in 0..c {
                            acc += weight[k * c + ci] * images[[bi, ci, y, x]];
                        }
                        logits[[bi, k, y, x]] = acc;
                    }
                }
            }
        }
        logits
    }

    fn backward(&mut self, images: &Array4<f32>, grad_logits: &Array4<f32>) {
        let (b, c, h, w) = images.dim();
        let k_total = self.num_classes;
        let mut grad_w = Array1::<f32>::zeros(k_total * c);
        let mut grad_b = Array1::<f32>::zeros(k_total);
        for bi in 0..b {
            for k in 0..k_total {
                for y in 0..h {
                    for x in 0..w {
                        let g = grad_logits[[bi, k, y, x]];
                        if g == 0.0 {
                            continue;
                        }
                        grad_b[k] += g;
                        for ci in 0..c {
                            grad_w[k * c + ci] += g * images[[bi, ci, y, x]];
                        }
                    }
                }
            }
        }
        self.params[0].accumulate_grad(&grad_w);
        self.params[1].accumulate_grad(&grad_b);
    }

    fn params(&self) -> &[Param] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Param] {
        &mut self.params
    }

    fn set_train(&mut self, train: bool) {
        self.train_mode = train;
    }

    fn is_train(&self) -> bool {
        self.train_mode
    }
}
