//! Classifier architectures with a confidence branch.
//!
//! Implements:
//! - VGG-13 with batch norm
//! - Wide residual networks (WRN-d-k)
//! - DenseNet-BC
//!
//! Every network ends in two heads sharing the pooled features: a linear
//! class head producing `[N, C]` logits and a linear confidence head
//! producing one pre-confidence logit `[N, 1]`.

use std::ops::{Deref, DerefMut};

use burn::{
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use confnet_core::{ArchitectureSpec, ModelMode};

/// Output of a classifier with a confidence branch
#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    /// Class logits `[N, C]`
    pub logits: Tensor<B, 2>,
    /// Confidence logits before the sigmoid `[N, 1]`
    pub pre_confidence: Tensor<B, 2>,
}

/// Anything that maps images to class logits plus a pre-confidence logit
pub trait ConfidenceClassifier<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> ClassifierOutput<B>;

    fn num_classes(&self) -> usize;
}

/// Train/eval mode flag of a model
pub trait ModeSwitch {
    fn mode(&self) -> ModelMode;

    fn set_mode(&mut self, mode: ModelMode);
}

/// Switches a model into a mode and restores the previous mode on drop
pub struct ModeGuard<'a, M: ModeSwitch> {
    model: &'a mut M,
    previous: ModelMode,
}

impl<'a, M: ModeSwitch> ModeGuard<'a, M> {
    pub fn new(model: &'a mut M, mode: ModelMode) -> Self {
        let previous = model.mode();
        model.set_mode(mode);
        Self { model, previous }
    }
}

impl<M: ModeSwitch> Deref for ModeGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: ModeSwitch> DerefMut for ModeGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

impl<M: ModeSwitch> Drop for ModeGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_mode(self.previous);
    }
}

/// Classifier with a shared backbone and class/confidence heads
#[derive(Module, Debug)]
pub struct ConfidenceNet<B: Backend> {
    backbone: Backbone<B>,
    class_head: Linear<B>,
    confidence_head: Linear<B>,
    num_classes: usize,
    mode: Ignored<ModelMode>,
}

impl<B: Backend> ConfidenceNet<B> {
    /// Create a new network for the given architecture
    pub fn new(arch: ArchitectureSpec, num_classes: usize, device: &B::Device) -> Self {
        let backbone = match arch {
            ArchitectureSpec::Vgg13 => Backbone::Vgg(Vgg13::new(device)),
            ArchitectureSpec::WideResNet {
                depth,
                widen_factor,
            } => Backbone::WideResNet(WideResNet::new(depth, widen_factor, 0.0, device)),
            ArchitectureSpec::DenseNet {
                depth,
                growth_rate,
                reduction,
            } => Backbone::DenseNet(DenseNet::new(depth, growth_rate, reduction, device)),
        };
        let features = backbone.num_features();

        Self {
            backbone,
            class_head: LinearConfig::new(features, num_classes).init(device),
            confidence_head: LinearConfig::new(features, 1).init(device),
            num_classes,
            mode: Ignored(ModelMode::Train),
        }
    }

    /// Forward pass through backbone and both heads
    pub fn forward(&self, images: Tensor<B, 4>) -> ClassifierOutput<B> {
        let train = matches!(*self.mode, ModelMode::Train);
        let features = self.backbone.forward(images, train);

        ClassifierOutput {
            logits: self.class_head.forward(features.clone()),
            pre_confidence: self.confidence_head.forward(features),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> ConfidenceClassifier<B> for ConfidenceNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> ClassifierOutput<B> {
        ConfidenceNet::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<B: Backend> ModeSwitch for ConfidenceNet<B> {
    fn mode(&self) -> ModelMode {
        *self.mode
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.mode = Ignored(mode);
    }
}

/// Feature extractor variants
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    Vgg(Vgg13<B>),
    WideResNet(WideResNet<B>),
    DenseNet(DenseNet<B>),
}

impl<B: Backend> Backbone<B> {
    /// Pooled features `[N, F]`
    pub fn forward(&self, input: Tensor<B, 4>, train: bool) -> Tensor<B, 2> {
        match self {
            Backbone::Vgg(model) => model.forward(input),
            Backbone::WideResNet(model) => model.forward(input, train),
            Backbone::DenseNet(model) => model.forward(input),
        }
    }

    /// Width of the pooled feature vector
    pub fn num_features(&self) -> usize {
        match self {
            Backbone::Vgg(model) => model.num_features,
            Backbone::WideResNet(model) => model.num_features,
            Backbone::DenseNet(model) => model.num_features,
        }
    }
}

/// Flatten `[N, C, 1, 1]` to `[N, C]`
fn flatten<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 2> {
    let [batch, channels, _, _] = x.dims();
    x.reshape([batch, channels])
}

fn conv3x3<B: Backend>(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, out_ch], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

fn conv1x1<B: Backend>(in_ch: usize, out_ch: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_ch, out_ch], [1, 1])
        .with_stride([stride, stride])
        .with_bias(false)
        .init(device)
}

/// Conv 3x3, BatchNorm, ReLU, optional 2x2 max-pool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_ch: usize, out_ch: usize, with_pool: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_ch, out_ch], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = with_pool.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        Self {
            conv,
            bn: BatchNormConfig::new(out_ch).init(device),
            activation: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.activation.forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// VGG-13 feature extractor for 32x32 inputs
///
/// Five stages of two 3x3 convolutions (64, 128, 256, 512, 512 channels),
/// each stage closed by a 2x2 max-pool, leaving a 512x1x1 map.
#[derive(Module, Debug)]
pub struct Vgg13<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    num_features: usize,
}

impl<B: Backend> Vgg13<B> {
    const STAGES: [usize; 5] = [64, 128, 256, 512, 512];

    pub fn new(device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(Self::STAGES.len() * 2);
        let mut in_ch = 3;
        for out_ch in Self::STAGES {
            blocks.push(ConvBlock::new(in_ch, out_ch, false, device));
            blocks.push(ConvBlock::new(out_ch, out_ch, true, device));
            in_ch = out_ch;
        }

        Self {
            blocks,
            num_features: in_ch,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));
        flatten(x)
    }
}

/// Pre-activation residual block of a wide ResNet
#[derive(Module, Debug)]
pub struct WideBasicBlock<B: Backend> {
    bn1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    shortcut: Option<Conv2d<B>>,
    dropout: Dropout,
    activation: Relu,
}

impl<B: Backend> WideBasicBlock<B> {
    pub fn new(
        in_ch: usize,
        out_ch: usize,
        stride: usize,
        drop_rate: f64,
        device: &B::Device,
    ) -> Self {
        let shortcut = (in_ch != out_ch).then(|| conv1x1(in_ch, out_ch, stride, device));

        Self {
            bn1: BatchNormConfig::new(in_ch).init(device),
            conv1: conv3x3(in_ch, out_ch, stride, device),
            bn2: BatchNormConfig::new(out_ch).init(device),
            conv2: conv3x3(out_ch, out_ch, 1, device),
            shortcut,
            dropout: DropoutConfig::new(drop_rate).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, train: bool) -> Tensor<B, 4> {
        let pre = self.activation.forward(self.bn1.forward(x.clone()));

        // A projected shortcut starts from the pre-activated input
        let identity = match &self.shortcut {
            Some(conv) => conv.forward(pre.clone()),
            None => x,
        };

        let out = self.conv1.forward(pre);
        let out = self.activation.forward(self.bn2.forward(out));
        let out = if train { self.dropout.forward(out) } else { out };
        let out = self.conv2.forward(out);

        out.add(identity)
    }
}

/// Wide residual network WRN-depth-widen_factor
#[derive(Module, Debug)]
pub struct WideResNet<B: Backend> {
    stem: Conv2d<B>,
    blocks: Vec<WideBasicBlock<B>>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
    pool: AdaptiveAvgPool2d,
    num_features: usize,
}

impl<B: Backend> WideResNet<B> {
    /// `depth` must satisfy `(depth - 4) % 6 == 0`; other depths round down
    pub fn new(depth: usize, widen_factor: usize, drop_rate: f64, device: &B::Device) -> Self {
        let per_group = depth.saturating_sub(4) / 6;
        let widths = [16, 16 * widen_factor, 32 * widen_factor, 64 * widen_factor];

        let mut blocks = Vec::with_capacity(per_group * 3);
        for group in 0..3 {
            let stride = if group == 0 { 1 } else { 2 };
            for i in 0..per_group {
                let in_ch = if i == 0 { widths[group] } else { widths[group + 1] };
                let block_stride = if i == 0 { stride } else { 1 };
                blocks.push(WideBasicBlock::new(
                    in_ch,
                    widths[group + 1],
                    block_stride,
                    drop_rate,
                    device,
                ));
            }
        }

        Self {
            stem: conv3x3(3, widths[0], 1, device),
            blocks,
            bn: BatchNormConfig::new(widths[3]).init(device),
            activation: Relu::new(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            num_features: widths[3],
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>, train: bool) -> Tensor<B, 2> {
        let x = self.stem.forward(input);
        let x = self
            .blocks
            .iter()
            .fold(x, |x, block| block.forward(x, train));
        let x = self.activation.forward(self.bn.forward(x));
        flatten(self.pool.forward(x))
    }
}

/// DenseNet-BC bottleneck layer: BN-ReLU-Conv1x1-BN-ReLU-Conv3x3, concatenated
#[derive(Module, Debug)]
pub struct BottleneckLayer<B: Backend> {
    bn1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> BottleneckLayer<B> {
    pub fn new(in_ch: usize, growth_rate: usize, device: &B::Device) -> Self {
        let inter = 4 * growth_rate;
        Self {
            bn1: BatchNormConfig::new(in_ch).init(device),
            conv1: conv1x1(in_ch, inter, 1, device),
            bn2: BatchNormConfig::new(inter).init(device),
            conv2: conv3x3(inter, growth_rate, 1, device),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv1.forward(self.activation.forward(self.bn1.forward(x.clone())));
        let out = self.conv2.forward(self.activation.forward(self.bn2.forward(out)));
        Tensor::cat(vec![x, out], 1)
    }
}

/// DenseNet transition: BN-ReLU-Conv1x1 followed by 2x2 average pooling
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    bn: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
    activation: Relu,
}

impl<B: Backend> Transition<B> {
    pub fn new(in_ch: usize, out_ch: usize, device: &B::Device) -> Self {
        Self {
            bn: BatchNormConfig::new(in_ch).init(device),
            conv: conv1x1(in_ch, out_ch, 1, device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(self.activation.forward(self.bn.forward(x)));
        self.pool.forward(x)
    }
}

/// Three dense blocks separated by two transitions
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    stem: Conv2d<B>,
    block1: Vec<BottleneckLayer<B>>,
    trans1: Transition<B>,
    block2: Vec<BottleneckLayer<B>>,
    trans2: Transition<B>,
    block3: Vec<BottleneckLayer<B>>,
    bn: BatchNorm<B, 2>,
    activation: Relu,
    pool: AdaptiveAvgPool2d,
    num_features: usize,
}

impl<B: Backend> DenseNet<B> {
    pub fn new(depth: usize, growth_rate: usize, reduction: f64, device: &B::Device) -> Self {
        let layers = depth.saturating_sub(4) / 6;
        let mut channels = 2 * growth_rate;
        let stem = conv3x3(3, channels, 1, device);

        let dense_block = |channels: &mut usize| -> Vec<BottleneckLayer<B>> {
            (0..layers)
                .map(|_| {
                    let layer = BottleneckLayer::new(*channels, growth_rate, device);
                    *channels += growth_rate;
                    layer
                })
                .collect()
        };

        let block1 = dense_block(&mut channels);
        let reduced = (channels as f64 * reduction).floor() as usize;
        let trans1 = Transition::new(channels, reduced, device);
        channels = reduced;

        let block2 = dense_block(&mut channels);
        let reduced = (channels as f64 * reduction).floor() as usize;
        let trans2 = Transition::new(channels, reduced, device);
        channels = reduced;

        let block3 = dense_block(&mut channels);

        Self {
            stem,
            block1,
            trans1,
            block2,
            trans2,
            block3,
            bn: BatchNormConfig::new(channels).init(device),
            activation: Relu::new(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            num_features: channels,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let run = |x: Tensor<B, 4>, block: &[BottleneckLayer<B>]| {
            block.iter().fold(x, |x, layer| layer.forward(x))
        };

        let x = self.stem.forward(input);
        let x = self.trans1.forward(run(x, &self.block1));
        let x = self.trans2.forward(run(x, &self.block2));
        let x = run(x, &self.block3);
        let x = self.activation.forward(self.bn.forward(x));
        flatten(self.pool.forward(x))
    }
}
