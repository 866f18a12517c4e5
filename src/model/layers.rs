//! Transformer building blocks shared by the video transformers

use burn::{
    module::Module,
    nn::{Linear, LinearConfig},
    tensor::{
        activation::{gelu, softmax},
        backend::Backend,
        Tensor, TensorData,
    },
};

/// Multi-head self-attention with a fused query/key/value projection
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub qkv: Linear<B>,
    pub proj: Linear<B>,
    num_heads: usize,
}

impl<B: Backend> Attention<B> {
    pub fn new(dim: usize, num_heads: usize, qkv_bias: bool, device: &B::Device) -> Self {
        Self {
            qkv: LinearConfig::new(dim, dim * 3).with_bias(qkv_bias).init(device),
            proj: LinearConfig::new(dim, dim).init(device),
            num_heads,
        }
    }

    /// `[batch, tokens, dim]` -> `[batch, tokens, dim]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, tokens, dim] = x.dims();
        let head_dim = dim / self.num_heads;

        // [B, N, 3D] -> [3, B, H, N, Dh]
        let qkv = self
            .qkv
            .forward(x)
            .reshape([batch, tokens, 3, self.num_heads, head_dim])
            .permute([2, 0, 3, 1, 4]);

        let take = |i: usize| -> Tensor<B, 4> {
            qkv.clone()
                .slice([i..i + 1, 0..batch, 0..self.num_heads, 0..tokens, 0..head_dim])
                .reshape([batch, self.num_heads, tokens, head_dim])
        };
        let (q, k, v) = (take(0), take(1), take(2));

        let scale = (head_dim as f64).powf(-0.5);
        let attn = q.matmul(k.swap_dims(2, 3)) * scale;
        let attn = softmax(attn, 3);

        let out = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, tokens, dim]);
        self.proj.forward(out)
    }
}

/// Two-layer feed-forward block with GELU
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
}

impl<B: Backend> Mlp<B> {
    pub fn new(dim: usize, hidden: usize, device: &B::Device) -> Self {
        Self {
            fc1: LinearConfig::new(dim, hidden).init(device),
            fc2: LinearConfig::new(hidden, dim).init(device),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        self.fc2.forward(gelu(self.fc1.forward(x)))
    }
}

/// Fixed sinusoidal position table of shape `[1, positions, dim]`
pub fn sinusoid_table<B: Backend>(
    positions: usize,
    dim: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut values = Vec::with_capacity(positions * dim);
    for pos in 0..positions {
        for j in 0..dim {
            let angle = pos as f64 / 10000f64.powf(2.0 * (j / 2) as f64 / dim as f64);
            let value = if j % 2 == 0 { angle.sin() } else { angle.cos() };
            values.push(value as f32);
        }
    }
    Tensor::from_data(TensorData::new(values, [1, positions, dim]), device)
}

/// Fit a pretrained stem weight `[out, in, ...]` to `in_channels` input channels.
///
/// A single-channel stem takes the sum of the pretrained filters over their
/// input channels. Any other mismatch has no pretrained counterpart and gives `None`.
pub fn fit_stem_channels<B: Backend, const D: usize>(
    weight: Tensor<B, D>,
    in_channels: usize,
) -> Option<Tensor<B, D>> {
    let pretrained = weight.dims()[1];
    if pretrained == in_channels {
        Some(weight)
    } else if in_channels == 1 {
        Some(weight.sum_dim(1))
    } else {
        None
    }
}
