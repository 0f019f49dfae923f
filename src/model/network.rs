//! Gesture classification network.
//!
//! EfficientNet-B0 feature extractor, a combined channel + spatial attention
//! block and a three-layer classification head. Tensor names follow the
//! PyTorch training checkpoint (`backbone.*` uses timm naming), so weights
//! load without any key remapping.

use candle_core::{D, Module, ModuleT, Result, Tensor};
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Linear, VarBuilder, batch_norm, conv2d, conv2d_no_bias, linear, ops::sigmoid};

/// Channels of the backbone's final feature map.
pub const BACKBONE_FEATURES: usize = 1280;

const BN_EPS: f64 = 1e-5;
const STEM_CHANNELS: usize = 32;
const SE_RATIO: f64 = 0.25;
const ATTENTION_REDUCTION: usize = 16;
const SPATIAL_KERNEL: usize = 7;

/// One EfficientNet stage: (expansion, kernel, stride, output channels, repeats).
#[derive(Debug, Clone, Copy)]
struct StageConfig {
    expand: usize,
    kernel: usize,
    stride: usize,
    out: usize,
    repeats: usize,
}

const fn stage(expand: usize, kernel: usize, stride: usize, out: usize, repeats: usize) -> StageConfig {
    StageConfig { expand, kernel, stride, out, repeats }
}

/// EfficientNet-B0 stage layout.
const B0_STAGES: [StageConfig; 7] = [
    stage(1, 3, 1, 16, 1),
    stage(6, 3, 2, 24, 2),
    stage(6, 5, 2, 40, 2),
    stage(6, 3, 2, 80, 3),
    stage(6, 5, 1, 112, 3),
    stage(6, 5, 2, 192, 4),
    stage(6, 3, 1, 320, 1),
];

fn conv_bn_free(vb: &VarBuilder, name: &str, cin: usize, cout: usize, kernel: usize, stride: usize, groups: usize) -> Result<Conv2d> {
    let cfg = Conv2dConfig { padding: kernel / 2, stride, groups, ..Default::default() };
    conv2d_no_bias(cin, cout, kernel, cfg, vb.pp(name))
}

fn bn(vb: &VarBuilder, name: &str, channels: usize) -> Result<BatchNorm> {
    batch_norm(channels, BN_EPS, vb.pp(name))
}

/// Squeeze-and-excitation gate inside each MBConv block.
#[derive(Debug, Clone)]
struct SqueezeExcite {
    reduce: Conv2d,
    expand: Conv2d,
}

impl SqueezeExcite {
    fn new(vb: VarBuilder, channels: usize, reduced: usize) -> Result<Self> {
        let reduce = conv2d(channels, reduced, 1, Default::default(), vb.pp("conv_reduce"))?;
        let expand = conv2d(reduced, channels, 1, Default::default(), vb.pp("conv_expand"))?;
        Ok(Self { reduce, expand })
    }
}

impl Module for SqueezeExcite {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let s = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
        let s = self.reduce.forward(&s)?.silu()?;
        let s = sigmoid(&self.expand.forward(&s)?)?;
        xs.broadcast_mul(&s)
    }
}

#[derive(Debug, Clone)]
enum Block {
    /// First stage: depthwise conv, SE, pointwise projection.
    DepthwiseSeparable { conv_dw: Conv2d, bn1: BatchNorm, se: SqueezeExcite, conv_pw: Conv2d, bn2: BatchNorm, skip: bool },
    /// Remaining stages: expansion, depthwise conv, SE, linear projection.
    InvertedResidual {
        conv_pw: Conv2d,
        bn1: BatchNorm,
        conv_dw: Conv2d,
        bn2: BatchNorm,
        se: SqueezeExcite,
        conv_pwl: Conv2d,
        bn3: BatchNorm,
        skip: bool,
    },
}

impl Block {
    fn new(vb: VarBuilder, cin: usize, cfg: &StageConfig, stride: usize) -> Result<Self> {
        let reduced = ((cin as f64 * SE_RATIO).round() as usize).max(1);
        let skip = stride == 1 && cin == cfg.out;

        if cfg.expand == 1 {
            return Ok(Block::DepthwiseSeparable {
                conv_dw: conv_bn_free(&vb, "conv_dw", cin, cin, cfg.kernel, stride, cin)?,
                bn1: bn(&vb, "bn1", cin)?,
                se: SqueezeExcite::new(vb.pp("se"), cin, reduced)?,
                conv_pw: conv_bn_free(&vb, "conv_pw", cin, cfg.out, 1, 1, 1)?,
                bn2: bn(&vb, "bn2", cfg.out)?,
                skip,
            });
        }

        let mid = cin * cfg.expand;
        Ok(Block::InvertedResidual {
            conv_pw: conv_bn_free(&vb, "conv_pw", cin, mid, 1, 1, 1)?,
            bn1: bn(&vb, "bn1", mid)?,
            conv_dw: conv_bn_free(&vb, "conv_dw", mid, mid, cfg.kernel, stride, mid)?,
            bn2: bn(&vb, "bn2", mid)?,
            se: SqueezeExcite::new(vb.pp("se"), mid, reduced)?,
            conv_pwl: conv_bn_free(&vb, "conv_pwl", mid, cfg.out, 1, 1, 1)?,
            bn3: bn(&vb, "bn3", cfg.out)?,
            skip,
        })
    }
}

impl Module for Block {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Block::DepthwiseSeparable { conv_dw, bn1, se, conv_pw, bn2, skip } => {
                let ys = bn1.forward_t(&conv_dw.forward(xs)?, false)?.silu()?;
                let ys = se.forward(&ys)?;
                let ys = bn2.forward_t(&conv_pw.forward(&ys)?, false)?;
                if *skip { ys + xs } else { Ok(ys) }
            }
            Block::InvertedResidual { conv_pw, bn1, conv_dw, bn2, se, conv_pwl, bn3, skip } => {
                let ys = bn1.forward_t(&conv_pw.forward(xs)?, false)?.silu()?;
                let ys = bn2.forward_t(&conv_dw.forward(&ys)?, false)?.silu()?;
                let ys = se.forward(&ys)?;
                let ys = bn3.forward_t(&conv_pwl.forward(&ys)?, false)?;
                if *skip { ys + xs } else { Ok(ys) }
            }
        }
    }
}

/// EfficientNet-B0 without pooling or classifier: image -> 1280-channel map.
#[derive(Debug, Clone)]
pub struct Backbone {
    conv_stem: Conv2d,
    bn1: BatchNorm,
    blocks: Vec<Block>,
    conv_head: Conv2d,
    bn2: BatchNorm,
}

impl Backbone {
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let conv_stem = conv_bn_free(&vb, "conv_stem", 3, STEM_CHANNELS, 3, 2, 1)?;
        let bn1 = bn(&vb, "bn1", STEM_CHANNELS)?;

        let mut blocks = Vec::new();
        let mut cin = STEM_CHANNELS;
        let vb_blocks = vb.pp("blocks");
        for (stage_idx, cfg) in B0_STAGES.iter().enumerate() {
            let vb_stage = vb_blocks.pp(stage_idx.to_string());
            for repeat in 0..cfg.repeats {
                let stride = if repeat == 0 { cfg.stride } else { 1 };
                blocks.push(Block::new(vb_stage.pp(repeat.to_string()), cin, cfg, stride)?);
                cin = cfg.out;
            }
        }

        let conv_head = conv_bn_free(&vb, "conv_head", cin, BACKBONE_FEATURES, 1, 1, 1)?;
        let bn2 = bn(&vb, "bn2", BACKBONE_FEATURES)?;

        Ok(Self { conv_stem, bn1, blocks, conv_head, bn2 })
    }
}

impl Module for Backbone {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut ys = self.bn1.forward_t(&self.conv_stem.forward(xs)?, false)?.silu()?;
        for block in &self.blocks {
            ys = block.forward(&ys)?;
        }
        self.bn2.forward_t(&self.conv_head.forward(&ys)?, false)?.silu()
    }
}

/// Channel attention followed by spatial attention, both multiplicative.
#[derive(Debug, Clone)]
pub struct Attention {
    channel_reduce: Conv2d,
    channel_expand: Conv2d,
    spatial: Conv2d,
}

impl Attention {
    pub fn new(vb: VarBuilder, channels: usize) -> Result<Self> {
        let reduced = channels / ATTENTION_REDUCTION;
        let vb_ca = vb.pp("channel_attention");
        let channel_reduce = conv2d(channels, reduced, 1, Default::default(), vb_ca.pp("1"))?;
        let channel_expand = conv2d(reduced, channels, 1, Default::default(), vb_ca.pp("3"))?;
        let spatial_cfg = Conv2dConfig { padding: SPATIAL_KERNEL / 2, ..Default::default() };
        let spatial = conv2d(2, 1, SPATIAL_KERNEL, spatial_cfg, vb.pp("spatial_attention").pp("0"))?;
        Ok(Self { channel_reduce, channel_expand, spatial })
    }
}

impl Module for Attention {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ca = xs.mean_keepdim(D::Minus1)?.mean_keepdim(D::Minus2)?;
        let ca = self.channel_reduce.forward(&ca)?.relu()?;
        let ca = sigmoid(&self.channel_expand.forward(&ca)?)?;
        let xs = xs.broadcast_mul(&ca)?;

        let avg = xs.mean_keepdim(1)?;
        let max = xs.max_keepdim(1)?;
        let sa = sigmoid(&self.spatial.forward(&Tensor::cat(&[&avg, &max], 1)?)?)?;
        xs.broadcast_mul(&sa)
    }
}

/// Full classifier: backbone -> attention -> global average pool -> head.
/// Dropout layers of the training head are identity at inference and keep
/// their slots in the checkpoint numbering (0, 4, 8).
#[derive(Debug, Clone)]
pub struct GestureNet {
    backbone: Backbone,
    attention: Attention,
    fc1: Linear,
    bn1: BatchNorm,
    fc2: Linear,
    bn2: BatchNorm,
    out: Linear,
}

impl GestureNet {
    pub fn new(vb: VarBuilder, num_classes: usize) -> Result<Self> {
        let backbone = Backbone::new(vb.pp("backbone"))?;
        let attention = Attention::new(vb.pp("attention"), BACKBONE_FEATURES)?;
        let head = vb.pp("classifier");
        Ok(Self {
            backbone,
            attention,
            fc1: linear(BACKBONE_FEATURES, 512, head.pp("1"))?,
            bn1: bn(&head, "2", 512)?,
            fc2: linear(512, 256, head.pp("5"))?,
            bn2: bn(&head, "6", 256)?,
            out: linear(256, num_classes, head.pp("9"))?,
        })
    }
}

impl Module for GestureNet {
    /// `(batch, 3, H, W)` normalized image -> `(batch, num_classes)` logits.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let features = self.attention.forward(&self.backbone.forward(xs)?)?;
        let pooled = features.mean(D::Minus1)?.mean(D::Minus1)?;
        let ys = self.bn1.forward_t(&self.fc1.forward(&pooled)?, false)?.relu()?;
        let ys = self.bn2.forward_t(&self.fc2.forward(&ys)?, false)?.relu()?;
        self.out.forward(&ys)
    }
}
