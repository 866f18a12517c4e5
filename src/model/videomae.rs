//! Masked-autoencoder video transformer (VideoMAE) encoder with a classifier
//!
//! Clips are cut into tubelets of `tubelet_size` frames by `patch_size` pixels,
//! embedded with a strided 3D convolution and tagged with fixed sinusoidal
//! positions. The forward pass returns a structured output rather than a bare
//! logit tensor.

use std::path::Path;

use burn::{
    module::{Ignored, Module, Param},
    nn::{
        conv::{Conv3d, Conv3dConfig},
        LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use tracing::{info, warn};

use crate::model::config::VideoMaeConfig;
use crate::model::layers::{fit_stem_channels, sinusoid_table, Attention, Mlp};
use crate::utils::error::{GestureError, Result, ResultExt};

/// Pre-norm transformer layer
#[derive(Module, Debug)]
pub struct VideoMaeLayer<B: Backend> {
    pub layernorm_before: LayerNorm<B>,
    pub attention: Attention<B>,
    pub layernorm_after: LayerNorm<B>,
    pub mlp: Mlp<B>,
}

impl<B: Backend> VideoMaeLayer<B> {
    pub fn new(config: &VideoMaeConfig, device: &B::Device) -> Self {
        let dim = config.hidden_size;
        let norm = || LayerNormConfig::new(dim).with_epsilon(config.layer_norm_eps).init(device);
        Self {
            layernorm_before: norm(),
            attention: Attention::new(dim, config.num_attention_heads, config.qkv_bias, device),
            layernorm_after: norm(),
            mlp: Mlp::new(dim, config.intermediate_size, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attention.forward(self.layernorm_before.forward(x));
        x.clone() + self.mlp.forward(self.layernorm_after.forward(x))
    }
}

/// Tubelet embedding, transformer layers and pooling
#[derive(Module, Debug)]
pub struct VideoMaeEncoder<B: Backend> {
    pub patch_embed: Conv3d<B>,
    pub layers: Vec<VideoMaeLayer<B>>,
    /// Applied to the mean-pooled tokens, or to the sequence before taking token 0
    pub norm: LayerNorm<B>,
    use_mean_pooling: Ignored<bool>,
}

impl<B: Backend> VideoMaeEncoder<B> {
    pub fn new(config: &VideoMaeConfig, in_channels: usize, device: &B::Device) -> Self {
        let (t, p) = (config.tubelet_size, config.patch_size);
        Self {
            patch_embed: Conv3dConfig::new([in_channels, config.hidden_size], [t, p, p])
                .with_stride([t, p, p])
                .init(device),
            layers: (0..config.num_hidden_layers)
                .map(|_| VideoMaeLayer::new(config, device))
                .collect(),
            norm: LayerNormConfig::new(config.hidden_size)
                .with_epsilon(config.layer_norm_eps)
                .init(device),
            use_mean_pooling: Ignored(config.use_mean_pooling),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.patch_embed.weight.val().dims()[1]
    }

    /// `[B, T, C, H, W]` -> pooled features `[B, D]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let device = x.device();
        let x = self.patch_embed.forward(x.permute([0, 2, 1, 3, 4]));
        let [batch, dim, tt, th, tw] = x.dims();
        let tokens = tt * th * tw;

        let mut x = x.reshape([batch, dim, tokens]).swap_dims(1, 2)
            + sinusoid_table::<B>(tokens, dim, &device);
        for layer in &self.layers {
            x = layer.forward(x);
        }

        if self.use_mean_pooling.0 {
            self.norm.forward(x.mean_dim(1).reshape([batch, dim]))
        } else {
            self.norm
                .forward(x)
                .slice([0..batch, 0..1, 0..dim])
                .reshape([batch, dim])
        }
    }
}

/// Result of a VideoMAE forward pass
#[derive(Debug, Clone)]
pub struct VideoMaeOutput<B: Backend> {
    /// `[B, 1]`
    pub logits: Tensor<B, 2>,
    /// `[B, D]`
    pub pooled: Tensor<B, 2>,
}

/// VideoMAE encoder with a single-logit classifier
#[derive(Module, Debug)]
pub struct VideoMae<B: Backend> {
    pub encoder: VideoMaeEncoder<B>,
    pub classifier: Linear<B>,
}

impl<B: Backend> VideoMae<B> {
    pub fn new(config: &VideoMaeConfig, in_channels: usize, device: &B::Device) -> Self {
        Self {
            encoder: VideoMaeEncoder::new(config, in_channels, device),
            classifier: LinearConfig::new(config.hidden_size, 1).init(device),
        }
    }

    /// Load encoder weights from a checkpoint record; the classifier stays freshly initialized.
    ///
    /// The tubelet embedding is fitted to this model's channel count the same
    /// way as the TimeSformer patch embedding.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> Result<Self> {
        let file = path.with_extension("mpk");
        if !file.exists() {
            return Err(GestureError::WeightsNotFound(file));
        }

        let fresh_stem = self.encoder.patch_embed.clone();
        let in_channels = self.encoder.in_channels();
        let mut encoder = self
            .encoder
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .with_context(|| format!("Failed to load VideoMAE weights from {}", file.display()))?;
        info!("Loaded VideoMAE encoder weights from {}", file.display());

        let pretrained = encoder.in_channels();
        if pretrained != in_channels {
            match fit_stem_channels(encoder.patch_embed.weight.val(), in_channels) {
                Some(weight) => {
                    info!(
                        "Summed {}-channel tubelet embedding into {} input channel",
                        pretrained, in_channels
                    );
                    encoder.patch_embed.weight = Param::from_tensor(weight.detach());
                }
                None => {
                    warn!(
                        "Pretrained stem has {} input channels, keeping a fresh {}-channel stem",
                        pretrained, in_channels
                    );
                    encoder.patch_embed = fresh_stem;
                }
            }
        }

        Ok(Self {
            encoder,
            classifier: self.classifier,
        })
    }

    /// `[B, T, C, H, W]` -> structured output
    pub fn forward(&self, x: Tensor<B, 5>) -> VideoMaeOutput<B> {
        let pooled = self.encoder.forward(x);
        VideoMaeOutput {
            logits: self.classifier.forward(pooled.clone()),
            pooled,
        }
    }
}
