//! Model module for the grading network
//!
//! This module contains:
//! - The EfficientNet B0-B3 architecture
//! - Pretrained checkpoint lookup and import
//! - Head replacement and freezing helpers

pub mod efficientnet;
pub mod pretrained;

pub use efficientnet::{BlockArgs, EfficientNet, EfficientNetConfig, MBConvBlock};
pub use pretrained::{
    head_is_trainable, load_pretrained, set_head_trainable, with_regression_head,
    PretrainedDescriptor, PretrainedRegistry,
};
