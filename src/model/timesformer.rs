//! Divided space-time video transformer (TimeSformer)
//!
//! Each block attends over time for every patch position, then over space
//! for every frame, then applies the feed-forward layer. The classification
//! token is shared across frames and averaged back after spatial attention.

use std::path::Path;

use burn::{
    module::{Module, Param},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer, LayerNorm, LayerNormConfig, Linear, LinearConfig,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use tracing::{info, warn};

use crate::model::config::TimeSformerConfig;
use crate::model::layers::{fit_stem_channels, Attention, Mlp};
use crate::utils::error::{GestureError, Result, ResultExt};

/// One divided space-time attention block
#[derive(Module, Debug)]
pub struct DividedBlock<B: Backend> {
    pub temporal_norm1: LayerNorm<B>,
    pub temporal_attn: Attention<B>,
    pub temporal_fc: Linear<B>,
    pub norm1: LayerNorm<B>,
    pub attn: Attention<B>,
    pub norm2: LayerNorm<B>,
    pub mlp: Mlp<B>,
}

impl<B: Backend> DividedBlock<B> {
    pub fn new(config: &TimeSformerConfig, device: &B::Device) -> Self {
        let dim = config.embed_dim;
        let norm = || LayerNormConfig::new(dim).with_epsilon(config.layer_norm_eps).init(device);
        Self {
            temporal_norm1: norm(),
            temporal_attn: Attention::new(dim, config.num_heads, config.qkv_bias, device),
            temporal_fc: LinearConfig::new(dim, dim).init(device),
            norm1: norm(),
            attn: Attention::new(dim, config.num_heads, config.qkv_bias, device),
            norm2: norm(),
            mlp: Mlp::new(dim, config.mlp_hidden(), device),
        }
    }

    /// `x`: `[B, 1 + P*T, D]` with patch tokens ordered patch-major, frame-minor
    pub fn forward(&self, x: Tensor<B, 3>, frames: usize, patches: usize) -> Tensor<B, 3> {
        let [batch, _, dim] = x.dims();
        let tokens = patches * frames;

        // Temporal attention: one sequence of T frames per patch position
        let xt = x.clone().slice([0..batch, 1..1 + tokens, 0..dim]);
        let per_patch = xt.clone().reshape([batch * patches, frames, dim]);
        let res_temporal = self
            .temporal_attn
            .forward(self.temporal_norm1.forward(per_patch))
            .reshape([batch, tokens, dim]);
        let xt = xt + self.temporal_fc.forward(res_temporal);

        // Spatial attention: one sequence of P patches per frame, each with the class token
        let init_cls = x.slice([0..batch, 0..1, 0..dim]);
        let cls_per_frame = init_cls
            .clone()
            .repeat_dim(1, frames)
            .reshape([batch * frames, 1, dim]);
        let xs = xt
            .clone()
            .reshape([batch, patches, frames, dim])
            .swap_dims(1, 2)
            .reshape([batch * frames, patches, dim]);
        let xs = Tensor::cat(vec![cls_per_frame, xs], 1);
        let res_spatial = self.attn.forward(self.norm1.forward(xs));

        let cls_out = res_spatial
            .clone()
            .slice([0..batch * frames, 0..1, 0..dim])
            .reshape([batch, frames, dim])
            .mean_dim(1);
        let res_spatial = res_spatial
            .slice([0..batch * frames, 1..1 + patches, 0..dim])
            .reshape([batch, frames, patches, dim])
            .swap_dims(1, 2)
            .reshape([batch, tokens, dim]);

        let x = Tensor::cat(vec![init_cls, xt], 1) + Tensor::cat(vec![cls_out, res_spatial], 1);
        x.clone() + self.mlp.forward(self.norm2.forward(x))
    }
}

/// Patch embedding, position/time embeddings and the attention blocks
#[derive(Module, Debug)]
pub struct TimeSformerEncoder<B: Backend> {
    pub patch_embed: Conv2d<B>,
    pub cls_token: Param<Tensor<B, 3>>,
    pub pos_embed: Param<Tensor<B, 3>>,
    pub time_embed: Param<Tensor<B, 3>>,
    pub blocks: Vec<DividedBlock<B>>,
    pub norm: LayerNorm<B>,
    img_size: usize,
    patch_size: usize,
}

impl<B: Backend> TimeSformerEncoder<B> {
    pub fn new(
        config: &TimeSformerConfig,
        in_channels: usize,
        num_frames: usize,
        device: &B::Device,
    ) -> Self {
        let dim = config.embed_dim;
        let ps = config.patch_size;
        let trunc = Initializer::Normal {
            mean: 0.0,
            std: 0.02,
        };

        Self {
            patch_embed: Conv2dConfig::new([in_channels, dim], [ps, ps])
                .with_stride([ps, ps])
                .init(device),
            cls_token: trunc.init([1, 1, dim], device),
            pos_embed: trunc.init([1, config.num_patches() + 1, dim], device),
            time_embed: Initializer::Zeros.init([1, num_frames, dim], device),
            blocks: (0..config.depth)
                .map(|_| DividedBlock::new(config, device))
                .collect(),
            norm: LayerNormConfig::new(dim)
                .with_epsilon(config.layer_norm_eps)
                .init(device),
            img_size: config.img_size,
            patch_size: ps,
        }
    }

    /// Height and width the position embedding was sized for
    pub fn img_size(&self) -> usize {
        self.img_size
    }

    pub fn in_channels(&self) -> usize {
        self.patch_embed.weight.val().dims()[1]
    }

    /// `[B, C, T, H, W]` -> class token features `[B, D]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        let [batch, channels, frames, height, width] = x.dims();

        // Embed every frame independently: [B*T, P, D]
        let x = x
            .swap_dims(1, 2)
            .reshape([batch * frames, channels, height, width]);
        let x = self.patch_embed.forward(x);
        let [_, dim, ph, pw] = x.dims();
        let patches = ph * pw;
        debug_assert_eq!(ph, height / self.patch_size);
        let x = x.reshape([batch * frames, dim, patches]).swap_dims(1, 2);

        let cls = self.cls_token.val().repeat_dim(0, batch * frames);
        let x = Tensor::cat(vec![cls, x], 1) + self.pos_embed.val();

        // Time embedding is added per patch position
        let cls_tokens = x.clone().slice([0..batch, 0..1, 0..dim]);
        let x = x
            .slice([0..batch * frames, 1..1 + patches, 0..dim])
            .reshape([batch, frames, patches, dim])
            .swap_dims(1, 2)
            .reshape([batch * patches, frames, dim]);
        let x = x + self.time_embed.val();
        let x = x.reshape([batch, patches * frames, dim]);

        let mut x = Tensor::cat(vec![cls_tokens, x], 1);
        for block in &self.blocks {
            x = block.forward(x, frames, patches);
        }

        self.norm
            .forward(x)
            .slice([0..batch, 0..1, 0..dim])
            .reshape([batch, dim])
    }
}

/// TimeSformer with a single-logit classification head
#[derive(Module, Debug)]
pub struct TimeSformer<B: Backend> {
    pub encoder: TimeSformerEncoder<B>,
    pub head: Linear<B>,
}

impl<B: Backend> TimeSformer<B> {
    pub fn new(
        config: &TimeSformerConfig,
        in_channels: usize,
        num_frames: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            encoder: TimeSformerEncoder::new(config, in_channels, num_frames, device),
            head: LinearConfig::new(config.embed_dim, 1).init(device),
        }
    }

    /// Replace the encoder weights with a pretrained record.
    ///
    /// The head keeps its fresh single-logit initialization. A record whose
    /// patch embedding expects a different channel count is fitted to this
    /// model's stem: RGB filters are summed for single-channel input, and any
    /// other count keeps the freshly initialized stem.
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
            .with_context(|| {
                format!("Failed to load TimeSformer weights from {}", file.display())
            })?;
        info!("Loaded TimeSformer encoder weights from {}", file.display());

        let pretrained = encoder.in_channels();
        if pretrained != in_channels {
            match fit_stem_channels(encoder.patch_embed.weight.val(), in_channels) {
                Some(weight) => {
                    info!(
                        "Summed {}-channel patch embedding into {} input channel",
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
            head: self.head,
        })
    }

    /// `[B, C, T, H, W]` -> logits `[B, 1]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        self.head.forward(self.encoder.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny() -> TimeSformerConfig {
        TimeSformerConfig {
            img_size: 16,
            patch_size: 8,
            embed_dim: 16,
            depth: 2,
            num_heads: 2,
            mlp_ratio: 2.0,
            qkv_bias: true,
            layer_norm_eps: 1e-6,
        }
    }

    #[test]
    fn test_timesformer_output_shape() {
        let device = Default::default();
        let model = TimeSformer::<TestBackend>::new(&tiny(), 3, 4, &device);
        let x = Tensor::<TestBackend, 5>::random([2, 3, 4, 16, 16], Distribution::Default, &device);
        assert_eq!(model.forward(x).dims(), [2, 1]);
    }

    #[test]
    fn test_block_preserves_token_count() {
        let device = Default::default();
        let block = DividedBlock::<TestBackend>::new(&tiny(), &device);
        // 4 patches, 3 frames, plus the class token
        let x = Tensor::<TestBackend, 3>::random([2, 13, 16], Distribution::Default, &device);
        assert_eq!(block.forward(x, 3, 4).dims(), [2, 13, 16]);
    }

    #[test]
    fn test_load_pretrained_restores_encoder() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timesformer_encoder");

        let source = TimeSformer::<TestBackend>::new(&tiny(), 3, 4, &device);
        source
            .encoder
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        let fresh = TimeSformer::<TestBackend>::new(&tiny(), 3, 4, &device);
        let loaded = fresh.load_pretrained(&path, &device).unwrap();

        let expected = source.encoder.cls_token.val().into_data().to_vec::<f32>().unwrap();
        let actual = loaded.encoder.cls_token.val().into_data().to_vec::<f32>().unwrap();
        for (a, b) in actual.iter().zip(expected.iter()) {
            // CompactRecorder stores half precision
            assert!((a - b).abs() < 1e-3);
        }
    }

    fn save_rgb_encoder(path: &Path) -> TimeSformer<TestBackend> {
        let source = TimeSformer::<TestBackend>::new(&tiny(), 3, 4, &Default::default());
        source
            .encoder
            .clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())
            .unwrap();
        source
    }

    #[test]
    fn test_rgb_record_into_four_channel_model_keeps_fresh_stem() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timesformer_rgb");
        let source = save_rgb_encoder(&path);

        let model = TimeSformer::<TestBackend>::new(&tiny(), 4, 4, &device)
            .load_pretrained(&path, &device)
            .unwrap();
        assert_eq!(model.encoder.in_channels(), 4);

        // Everything past the stem still comes from the record
        let expected = source.encoder.cls_token.val().into_data().to_vec::<f32>().unwrap();
        let actual = model.encoder.cls_token.val().into_data().to_vec::<f32>().unwrap();
        for (a, b) in actual.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-3);
        }

        let x = Tensor::<TestBackend, 5>::random([1, 4, 4, 16, 16], Distribution::Default, &device);
        assert_eq!(model.forward(x).dims(), [1, 1]);
    }

    #[test]
    fn test_rgb_record_into_single_channel_model_sums_filters() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timesformer_rgb");
        let source = save_rgb_encoder(&path);

        let model = TimeSformer::<TestBackend>::new(&tiny(), 1, 4, &device)
            .load_pretrained(&path, &device)
            .unwrap();
        assert_eq!(model.encoder.patch_embed.weight.val().dims(), [16, 1, 8, 8]);

        let expected = source
            .encoder
            .patch_embed
            .weight
            .val()
            .sum_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let actual = model.encoder.patch_embed.weight.val().into_data().to_vec::<f32>().unwrap();
        for (a, b) in actual.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-2);
        }

        let x = Tensor::<TestBackend, 5>::random([1, 1, 4, 16, 16], Distribution::Default, &device);
        assert_eq!(model.forward(x).dims(), [1, 1]);
    }

    #[test]
    fn test_missing_weights_are_reported() {
        let device = Default::default();
        let model = TimeSformer::<TestBackend>::new(&tiny(), 3, 4, &device);
        let err = model
            .load_pretrained(Path::new("/nonexistent/timesformer"), &device)
            .unwrap_err();
        assert!(matches!(err, GestureError::WeightsNotFound(_)));
    }
}
