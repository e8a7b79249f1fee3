//! Pretrained EfficientNet weights
//!
//! Weights are looked up in a local directory holding the published PyTorch
//! checkpoints (`efficientnet-b3-5fb5a3c3.pth` and friends); nothing is
//! downloaded at runtime.

use std::path::{Path, PathBuf};

use burn::nn::{Linear, LinearConfig};
use burn::store::{ModuleSnapshot, PytorchStore};
use burn::tensor::backend::Backend;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::efficientnet::{EfficientNet, EfficientNetConfig};
use crate::utils::error::{GradingError, Result};

const WEIGHTS_BASE_URL: &str = "https://github.com/lukemelas/EfficientNet-PyTorch/releases/download/1.0";

/// A published checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PretrainedDescriptor {
    pub name: &'static str,
    pub file_name: &'static str,
}

impl PretrainedDescriptor {
    pub fn config(&self) -> EfficientNetConfig {
        match self.name {
            "efficientnet-b0" => EfficientNetConfig::b0(),
            "efficientnet-b1" => EfficientNetConfig::b1(),
            "efficientnet-b2" => EfficientNetConfig::b2(),
            _ => EfficientNetConfig::b3(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}/{}", WEIGHTS_BASE_URL, self.file_name)
    }
}

pub const DESCRIPTORS: [PretrainedDescriptor; 4] = [
    PretrainedDescriptor {
        name: "efficientnet-b0",
        file_name: "efficientnet-b0-355c32eb.pth",
    },
    PretrainedDescriptor {
        name: "efficientnet-b1",
        file_name: "efficientnet-b1-f1951068.pth",
    },
    PretrainedDescriptor {
        name: "efficientnet-b2",
        file_name: "efficientnet-b2-8bb594d6.pth",
    },
    PretrainedDescriptor {
        name: "efficientnet-b3",
        file_name: "efficientnet-b3-5fb5a3c3.pth",
    },
];

/// Local directory of pretrained checkpoints
#[derive(Debug, Clone)]
pub struct PretrainedRegistry {
    dir: PathBuf,
}

impl PretrainedRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn descriptor(name: &str) -> Result<&'static PretrainedDescriptor> {
        DESCRIPTORS.iter().find(|d| d.name == name).ok_or_else(|| {
            let known: Vec<&str> = DESCRIPTORS.iter().map(|d| d.name).collect();
            GradingError::Config(format!(
                "Unknown model variant '{}', expected one of {:?}",
                name, known
            ))
        })
    }

    /// Locate the checkpoint file for `name`
    ///
    /// The exact published file name wins; otherwise any `<name>*.pth` in
    /// the directory is accepted.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let descriptor = Self::descriptor(name)?;

        let exact = self.dir.join(descriptor.file_name);
        if exact.is_file() {
            return Ok(exact);
        }

        let mut candidates: Vec<PathBuf> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().to_path_buf())
            .filter(|p| {
                p.extension().map_or(false, |ext| ext == "pth")
                    && p.file_name()
                        .and_then(|f| f.to_str())
                        .map_or(false, |f| f.starts_with(name))
            })
            .collect();
        candidates.sort();

        if let Some(found) = candidates.into_iter().next() {
            warn!("Using {:?} for {}", found, name);
            return Ok(found);
        }

        Err(GradingError::PathNotFound(
            exact,
            format!("download it from {}", descriptor.url()),
        ))
    }

    /// Build `name` and load its ImageNet weights
    pub fn load<B: Backend>(&self, name: &str, device: &B::Device) -> Result<EfficientNet<B>> {
        let descriptor = Self::descriptor(name)?;
        let path = self.resolve(name)?;
        load_pretrained(&descriptor.config(), &path, device)
    }
}

/// Initialize a network from `config` and import a PyTorch checkpoint into it
pub fn load_pretrained<B: Backend>(
    config: &EfficientNetConfig,
    path: &Path,
    device: &B::Device,
) -> Result<EfficientNet<B>> {
    let mut model = config.init::<B>(device);

    let mut store = PytorchStore::from_file(path)
        .with_key_remapping(r"(^|\.)_", "$1")
        .allow_partial(false);

    let result = model
        .load_from(&mut store)
        .map_err(|e| GradingError::Model(format!("Failed to load {:?}: {}", path, e)))?;

    if !result.errors.is_empty() {
        let details: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
        return Err(GradingError::Model(format!(
            "Checkpoint {:?} does not match the network: {}",
            path,
            details.join("; ")
        )));
    }
    if !result.unused.is_empty() {
        debug!("Unused checkpoint tensors: {:?}", result.unused);
    }

    info!(
        "Loaded {} tensors from {:?}",
        result.applied.len(),
        path
    );

    Ok(model)
}

/// Replace the classifier with a fresh single-output regression head
pub fn with_regression_head<B: Backend>(model: EfficientNet<B>) -> EfficientNet<B> {
    let in_features = model.head_in_features();
    let device = model.fc.weight.device();

    EfficientNet {
        fc: LinearConfig::new(in_features, 1).init(&device),
        ..model
    }
}

/// Toggle gradient flow through the head weight and bias only
pub fn set_head_trainable<B: Backend>(model: EfficientNet<B>, trainable: bool) -> EfficientNet<B> {
    let Linear { weight, bias } = model.fc;

    EfficientNet {
        fc: Linear {
            weight: weight.set_require_grad(trainable),
            bias: bias.map(|b| b.set_require_grad(trainable)),
        },
        ..model
    }
}

pub fn head_is_trainable<B: Backend>(model: &EfficientNet<B>) -> bool {
    model.fc.weight.is_require_grad()
}
