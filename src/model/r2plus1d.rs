//! (2+1)D convolutional video ResNet (R(2+1)D-18 layout)
//!
//! Every 3D convolution is factored into a spatial `1×k×k` convolution
//! followed by a temporal `k×1×1` convolution. The network consumes clips in
//! the ingestion layout `[B, T, H, W, C]` and moves channels onto the
//! convolution axis itself.

use burn::{
    module::Module,
    nn::{
        conv::{Conv3d, Conv3dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig3d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

use crate::model::config::R2Plus1Config;

fn conv3d<B: Backend>(
    channels: [usize; 2],
    kernel: [usize; 3],
    stride: [usize; 3],
    padding: [usize; 3],
    device: &B::Device,
) -> Conv3d<B> {
    Conv3dConfig::new(channels, kernel)
        .with_stride(stride)
        .with_padding(PaddingConfig3d::Explicit(padding[0], padding[1], padding[2]))
        .with_bias(false)
        .init(device)
}

/// Width of the intermediate layer that keeps parameter count equal to a full 3×3×3 conv
pub fn midplanes(in_planes: usize, out_planes: usize) -> usize {
    ((in_planes * out_planes * 27) / (in_planes * 9 + 3 * out_planes)).max(1)
}

/// Spatial conv, batch norm, ReLU, temporal conv
#[derive(Module, Debug)]
pub struct Conv2Plus1d<B: Backend> {
    pub spatial: Conv3d<B>,
    pub bn: BatchNorm<B>,
    pub temporal: Conv3d<B>,
}

impl<B: Backend> Conv2Plus1d<B> {
    pub fn new(in_planes: usize, out_planes: usize, stride: usize, device: &B::Device) -> Self {
        let mid = midplanes(in_planes, out_planes);
        Self {
            spatial: conv3d([in_planes, mid], [1, 3, 3], [1, stride, stride], [0, 1, 1], device),
            bn: BatchNormConfig::new(mid).init(device),
            temporal: conv3d([mid, out_planes], [3, 1, 1], [stride, 1, 1], [1, 0, 0], device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = relu(self.bn.forward(self.spatial.forward(x)));
        self.temporal.forward(x)
    }
}

/// 1×1×1 projection used when a block changes width or resolution
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv3d<B>,
    pub bn: BatchNorm<B>,
}

/// Residual block of two factored convolutions
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1: Conv2Plus1d<B>,
    pub bn1: BatchNorm<B>,
    pub conv2: Conv2Plus1d<B>,
    pub bn2: BatchNorm<B>,
    pub downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(in_planes: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = if stride != 1 || in_planes != planes {
            Some(Downsample {
                conv: conv3d(
                    [in_planes, planes],
                    [1, 1, 1],
                    [stride, stride, stride],
                    [0, 0, 0],
                    device,
                ),
                bn: BatchNormConfig::new(planes).init(device),
            })
        } else {
            None
        };

        Self {
            conv1: Conv2Plus1d::new(in_planes, planes, stride, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: Conv2Plus1d::new(planes, planes, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            downsample,
        }
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let identity = match &self.downsample {
            Some(down) => down.bn.forward(down.conv.forward(x.clone())),
            None => x.clone(),
        };

        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));
        relu(out + identity)
    }
}

/// Factored stem: 1×7×7 spatial conv (stride 2 in space) then 3×1×1 temporal conv
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    pub spatial: Conv3d<B>,
    pub bn1: BatchNorm<B>,
    pub temporal: Conv3d<B>,
    pub bn2: BatchNorm<B>,
}

impl<B: Backend> Stem<B> {
    pub fn new(in_channels: usize, width: usize, device: &B::Device) -> Self {
        // 45 intermediate channels at the standard width of 64
        let mid = (width * 45 / 64).max(1);
        Self {
            spatial: conv3d([in_channels, mid], [1, 7, 7], [1, 2, 2], [0, 3, 3], device),
            bn1: BatchNormConfig::new(mid).init(device),
            temporal: conv3d([mid, width], [3, 1, 1], [1, 1, 1], [1, 0, 0], device),
            bn2: BatchNormConfig::new(width).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = relu(self.bn1.forward(self.spatial.forward(x)));
        relu(self.bn2.forward(self.temporal.forward(x)))
    }
}

/// R(2+1)D network with a single-logit linear classifier
#[derive(Module, Debug)]
pub struct R2Plus1d<B: Backend> {
    pub stem: Stem<B>,
    pub blocks: Vec<BasicBlock<B>>,
    pub fc: Linear<B>,
}

impl<B: Backend> R2Plus1d<B> {
    pub fn new(config: &R2Plus1Config, in_channels: usize, device: &B::Device) -> Self {
        let widths = [1, 2, 4, 8].map(|m| config.base_width * m);
        let strides = [1, 2, 2, 2];

        let mut blocks = Vec::new();
        let mut in_planes = config.base_width;
        for ((&planes, &stride), &count) in widths
            .iter()
            .zip(strides.iter())
            .zip(config.blocks_per_layer.iter())
        {
            blocks.push(BasicBlock::new(in_planes, planes, stride, device));
            for _ in 1..count {
                blocks.push(BasicBlock::new(planes, planes, 1, device));
            }
            in_planes = planes;
        }

        Self {
            stem: Stem::new(in_channels, config.base_width, device),
            blocks,
            fc: LinearConfig::new(config.feature_dim(), 1).init(device),
        }
    }

    /// `[B, T, H, W, C]` -> logits `[B, 1]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(x.permute([0, 4, 1, 2, 3]));
        for block in &self.blocks {
            x = block.forward(x);
        }

        // Global average pool over time and space
        let [batch, channels, _, _, _] = x.dims();
        let pooled = x.mean_dim(4).mean_dim(3).mean_dim(2).reshape([batch, channels]);
        self.fc.forward(pooled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_midplanes_matches_standard_widths() {
        assert_eq!(midplanes(64, 64), 144);
        assert_eq!(midplanes(64, 128), 230);
        assert_eq!(midplanes(256, 512), 921);
    }

    #[test]
    fn test_default_feature_dim() {
        assert_eq!(R2Plus1Config::default().feature_dim(), 512);
    }

    #[test]
    fn test_r2plus1d_output_shape() {
        let device = Default::default();
        let config = R2Plus1Config {
            base_width: 4,
            blocks_per_layer: [1, 1, 1, 1],
        };
        let model = R2Plus1d::<TestBackend>::new(&config, 3, &device);
        let x = Tensor::<TestBackend, 5>::random([2, 4, 16, 16, 3], Distribution::Default, &device);
        assert_eq!(model.forward(x).dims(), [2, 1]);
    }

    #[test]
    fn test_block_count_follows_config() {
        let device = Default::default();
        let config = R2Plus1Config {
            base_width: 2,
            blocks_per_layer: [2, 1, 1, 3],
        };
        let model = R2Plus1d::<TestBackend>::new(&config, 1, &device);
        assert_eq!(model.blocks.len(), 7);
        assert!(model.blocks[0].downsample.is_none());
        assert!(model.blocks[2].downsample.is_some());
    }
}
