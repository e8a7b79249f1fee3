//! EfficientNet backbone (variants B0-B3)
//!
//! Mobile inverted bottleneck blocks with squeeze-and-excitation and SiLU,
//! TensorFlow-style "same" padding and stochastic depth. Field names follow
//! the widely published PyTorch parameter layout with the leading underscore
//! removed (`_conv_stem` -> `conv_stem`, `_blocks.N._bn1` -> `blocks.N.bn1`)
//! so pretrained checkpoints map onto the module tree directly.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{
        activation::{sigmoid, silu},
        backend::Backend,
        Distribution, Tensor,
    },
};

/// Channel rounding divisor
const DEPTH_DIVISOR: usize = 8;

/// Stem and head widths before width scaling
const STEM_FILTERS: usize = 32;
const HEAD_FILTERS: usize = 1280;

/// Arguments of one MBConv stage: (repeats, kernel, stride, expand, in, out)
const BASE_STAGES: [(usize, usize, usize, usize, usize, usize); 7] = [
    (1, 3, 1, 1, 32, 16),
    (2, 3, 2, 6, 16, 24),
    (2, 5, 2, 6, 24, 40),
    (3, 3, 2, 6, 40, 80),
    (3, 5, 1, 6, 80, 112),
    (4, 5, 2, 6, 112, 192),
    (1, 3, 1, 6, 192, 320),
];

const SE_RATIO: f64 = 0.25;

/// Configuration of an EfficientNet variant
#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    /// Channel multiplier
    pub width_coefficient: f64,
    /// Block-repeat multiplier
    pub depth_coefficient: f64,
    /// Native input resolution
    pub image_size: usize,
    /// Dropout before the classifier
    #[config(default = "0.2")]
    pub dropout_rate: f64,
    /// Maximum stochastic-depth rate (scaled linearly over the blocks)
    #[config(default = "0.2")]
    pub drop_connect_rate: f64,
    /// Output units of `fc`
    #[config(default = "1000")]
    pub num_classes: usize,
    #[config(default = "0.01")]
    pub batch_norm_momentum: f64,
    #[config(default = "1e-3")]
    pub batch_norm_epsilon: f64,
}

/// Per-block arguments after width/depth scaling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockArgs {
    pub kernel_size: usize,
    pub stride: usize,
    pub expand_ratio: usize,
    pub input_filters: usize,
    pub output_filters: usize,
}

impl EfficientNetConfig {
    pub fn b0() -> Self {
        Self::new(1.0, 1.0, 224).with_dropout_rate(0.2)
    }

    pub fn b1() -> Self {
        Self::new(1.0, 1.1, 240).with_dropout_rate(0.2)
    }

    pub fn b2() -> Self {
        Self::new(1.1, 1.2, 260).with_dropout_rate(0.3)
    }

    pub fn b3() -> Self {
        Self::new(1.2, 1.4, 300).with_dropout_rate(0.3)
    }

    /// Scale a channel count by the width coefficient, rounded to a multiple of 8
    pub fn round_filters(&self, filters: usize) -> usize {
        let scaled = filters as f64 * self.width_coefficient;
        let divisor = DEPTH_DIVISOR as f64;
        let rounded = ((scaled + divisor / 2.0) as usize / DEPTH_DIVISOR * DEPTH_DIVISOR)
            .max(DEPTH_DIVISOR);

        // never round down by more than 10%
        if (rounded as f64) < 0.9 * scaled {
            rounded + DEPTH_DIVISOR
        } else {
            rounded
        }
    }

    /// Scale a repeat count by the depth coefficient
    pub fn round_repeats(&self, repeats: usize) -> usize {
        (self.depth_coefficient * repeats as f64).ceil() as usize
    }

    pub fn stem_filters(&self) -> usize {
        self.round_filters(STEM_FILTERS)
    }

    pub fn head_filters(&self) -> usize {
        self.round_filters(HEAD_FILTERS)
    }

    /// Expanded list of every block in forward order
    pub fn block_args(&self) -> Vec<BlockArgs> {
        let mut blocks = Vec::new();

        for (repeats, kernel_size, stride, expand_ratio, input, output) in BASE_STAGES {
            let input_filters = self.round_filters(input);
            let output_filters = self.round_filters(output);

            blocks.push(BlockArgs {
                kernel_size,
                stride,
                expand_ratio,
                input_filters,
                output_filters,
            });
            for _ in 1..self.round_repeats(repeats) {
                blocks.push(BlockArgs {
                    kernel_size,
                    stride: 1,
                    expand_ratio,
                    input_filters: output_filters,
                    output_filters,
                });
            }
        }

        blocks
    }

    /// Initialize a randomly weighted network
    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientNet<B> {
        let stem = self.stem_filters();
        let head = self.head_filters();
        let block_args = self.block_args();
        let num_blocks = block_args.len();

        let conv_stem = Conv2dConfig::new([3, stem], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .init(device);
        let bn0 = self.batch_norm(stem, device);

        let blocks = block_args
            .iter()
            .enumerate()
            .map(|(idx, args)| {
                let rate = self.drop_connect_rate * idx as f64 / num_blocks as f64;
                MBConvBlock::new(args, rate, self, device)
            })
            .collect();

        let last = block_args.last().map_or(stem, |args| args.output_filters);
        let conv_head = Conv2dConfig::new([last, head], [1, 1])
            .with_bias(false)
            .init(device);
        let bn1 = self.batch_norm(head, device);

        EfficientNet {
            conv_stem,
            bn0,
            blocks,
            conv_head,
            bn1,
            avg_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout_rate).init(),
            fc: LinearConfig::new(head, self.num_classes).init(device),
        }
    }

    fn batch_norm<B: Backend>(&self, channels: usize, device: &B::Device) -> BatchNorm<B> {
        BatchNormConfig::new(channels)
            .with_momentum(self.batch_norm_momentum)
            .with_epsilon(self.batch_norm_epsilon)
            .init(device)
    }
}

/// (before, after) padding reproducing TensorFlow "same" for one axis
pub fn same_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let out = size.div_ceil(stride);
    let total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(size);
    (total / 2, total - total / 2)
}

/// Convolution with asymmetric "same" padding computed from the input size
fn conv_same<B: Backend>(conv: &Conv2d<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    let (top, bottom) = same_padding(height, conv.kernel_size[0], conv.stride[0]);
    let (left, right) = same_padding(width, conv.kernel_size[1], conv.stride[1]);

    let x = if top + bottom + left + right > 0 {
        x.pad((left, right, top, bottom), 0.0f32)
    } else {
        x
    };
    conv.forward(x)
}

/// Mobile inverted bottleneck block with squeeze-and-excitation
#[derive(Module, Debug)]
pub struct MBConvBlock<B: Backend> {
    pub expand_conv: Option<Conv2d<B>>,
    pub bn0: Option<BatchNorm<B>>,
    pub depthwise_conv: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub se_reduce: Conv2d<B>,
    pub se_expand: Conv2d<B>,
    pub project_conv: Conv2d<B>,
    pub bn2: BatchNorm<B>,
    has_skip: bool,
    drop_connect_rate: f64,
}

impl<B: Backend> MBConvBlock<B> {
    fn new(args: &BlockArgs, drop_connect_rate: f64, config: &EfficientNetConfig, device: &B::Device) -> Self {
        let input = args.input_filters;
        let expanded = input * args.expand_ratio;
        let squeezed = ((input as f64 * SE_RATIO) as usize).max(1);

        let (expand_conv, bn0) = if args.expand_ratio != 1 {
            (
                Some(
                    Conv2dConfig::new([input, expanded], [1, 1])
                        .with_bias(false)
                        .init(device),
                ),
                Some(config.batch_norm(expanded, device)),
            )
        } else {
            (None, None)
        };

        let depthwise_conv = Conv2dConfig::new([expanded, expanded], [args.kernel_size, args.kernel_size])
            .with_stride([args.stride, args.stride])
            .with_groups(expanded)
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(false)
            .init(device);

        Self {
            expand_conv,
            bn0,
            depthwise_conv,
            bn1: config.batch_norm(expanded, device),
            se_reduce: Conv2dConfig::new([expanded, squeezed], [1, 1]).init(device),
            se_expand: Conv2dConfig::new([squeezed, expanded], [1, 1]).init(device),
            project_conv: Conv2dConfig::new([expanded, args.output_filters], [1, 1])
                .with_bias(false)
                .init(device),
            bn2: config.batch_norm(args.output_filters, device),
            has_skip: args.stride == 1 && input == args.output_filters,
            drop_connect_rate,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();

        if let (Some(conv), Some(bn)) = (&self.expand_conv, &self.bn0) {
            x = silu(bn.forward(conv.forward(x)));
        }

        x = silu(self.bn1.forward(conv_same(&self.depthwise_conv, x)));

        // squeeze and excitation
        let squeezed = x.clone().mean_dim(2).mean_dim(3);
        let squeezed = self.se_expand.forward(silu(self.se_reduce.forward(squeezed)));
        x = x * sigmoid(squeezed);

        x = self.bn2.forward(self.project_conv.forward(x));

        if self.has_skip {
            x = self.drop_connect(x) + input;
        }
        x
    }

    /// Drop the whole residual branch per sample (training only)
    fn drop_connect(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if !B::ad_enabled() || self.drop_connect_rate <= 0.0 {
            return x;
        }

        let keep = 1.0 - self.drop_connect_rate;
        let [batch, _, _, _] = x.dims();
        let mask = Tensor::<B, 4>::random([batch, 1, 1, 1], Distribution::Bernoulli(keep), &x.device());
        x * mask / keep
    }
}

/// EfficientNet image model
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    pub conv_stem: Conv2d<B>,
    pub bn0: BatchNorm<B>,
    pub blocks: Vec<MBConvBlock<B>>,
    pub conv_head: Conv2d<B>,
    pub bn1: BatchNorm<B>,
    pub avg_pool: AdaptiveAvgPool2d,
    pub dropout: Dropout,
    pub fc: Linear<B>,
}

impl<B: Backend> EfficientNet<B> {
    /// Pooled features of shape [batch_size, head_filters]
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = silu(self.bn0.forward(conv_same(&self.conv_stem, x)));

        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = silu(self.bn1.forward(self.conv_head.forward(x)));
        let x = self.avg_pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Normalized images of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Output of shape [batch_size, num_outputs]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        let x = self.dropout.forward(x);
        self.fc.forward(x)
    }

    /// Input width of the classifier
    pub fn head_in_features(&self) -> usize {
        self.fc.weight.dims()[0]
    }

    pub fn num_outputs(&self) -> usize {
        self.fc.weight.dims()[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_b3_channel_rounding() {
        let config = EfficientNetConfig::b3();
        assert_eq!(config.stem_filters(), 40);
        assert_eq!(config.head_filters(), 1536);
        assert_eq!(config.round_filters(16), 24);
        assert_eq!(config.round_filters(320), 384);
    }

    #[test]
    fn test_block_counts() {
        assert_eq!(EfficientNetConfig::b0().block_args().len(), 16);
        assert_eq!(EfficientNetConfig::b3().block_args().len(), 26);

        let args = EfficientNetConfig::b0().block_args();
        assert_eq!(args[0].expand_ratio, 1);
        assert_eq!(args[1].stride, 2);
        assert_eq!(args[2].stride, 1);
        assert_eq!(args[2].input_filters, args[2].output_filters);
    }

    #[test]
    fn test_same_padding() {
        // stride 2, kernel 3 on 300 pixels: TensorFlow pads only the far side
        assert_eq!(same_padding(300, 3, 2), (0, 1));
        assert_eq!(same_padding(150, 3, 1), (1, 1));
        assert_eq!(same_padding(38, 5, 2), (1, 2));
        assert_eq!(same_padding(10, 1, 1), (0, 0));
    }

    #[test]
    fn test_forward_shape() {
        let device = default_device();
        let model = EfficientNetConfig::b0()
            .with_num_classes(1)
            .init::<DefaultBackend>(&device);

        let input = Tensor::<DefaultBackend, 4>::zeros([2, 3, 64, 64], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 1]);
        assert_eq!(model.head_in_features(), 1280);
        assert_eq!(model.num_outputs(), 1);
    }

    #[test]
    fn test_block_names_follow_checkpoint_layout() {
        let device = default_device();
        let model = EfficientNetConfig::b0().init::<DefaultBackend>(&device);

        assert!(model.blocks[0].expand_conv.is_none());
        assert!(model.blocks[1].expand_conv.is_some());
        assert_eq!(model.blocks.len(), 16);
    }
}
