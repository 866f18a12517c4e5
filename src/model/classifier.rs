//! Gesture classifier: one backbone behind the per-backbone input adapter

use burn::{
    module::{Ignored, Module},
    tensor::{backend::Backend, Tensor},
};
use tracing::{info, warn};

use crate::model::config::{BackboneKind, BackboneSpec, KeypointMode, ModelSpec};
use crate::model::input::{self, InputLayout};
use crate::model::r2plus1d::R2Plus1d;
use crate::model::timesformer::TimeSformer;
use crate::model::videomae::VideoMae;
use crate::utils::error::{GestureError, Result};

/// The backbone selected at construction
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    TimeSformer(TimeSformer<B>),
    R2Plus1(R2Plus1d<B>),
    VideoMae(VideoMae<B>),
}

impl<B: Backend> Backbone<B> {
    /// Build the backbone described by `spec`, loading pretrained weights where required
    pub fn new(spec: &ModelSpec, device: &B::Device) -> Result<Self> {
        let channels = spec.in_channels();
        let backbone = match &spec.backbone {
            BackboneSpec::TimeSformer { config, weights } => Backbone::TimeSformer(
                TimeSformer::new(config, channels, spec.num_frames, device)
                    .load_pretrained(weights, device)?,
            ),
            BackboneSpec::R2Plus1(config) => {
                Backbone::R2Plus1(R2Plus1d::new(config, channels, device))
            }
            BackboneSpec::VideoMae { config, weights } => {
                let model = VideoMae::new(config, channels, device);
                match weights {
                    Some(path) => Backbone::VideoMae(model.load_pretrained(path, device)?),
                    None => {
                        warn!(
                            "No pretrained cache configured, {} starts from random weights",
                            config.checkpoint
                        );
                        Backbone::VideoMae(model)
                    }
                }
            }
        };
        Ok(backbone)
    }

    pub fn kind(&self) -> BackboneKind {
        match self {
            Backbone::TimeSformer(_) => BackboneKind::TimeSformer,
            Backbone::R2Plus1(_) => BackboneKind::R2Plus1,
            Backbone::VideoMae(_) => BackboneKind::VideoMae,
        }
    }

    /// Axis order this backbone consumes
    pub fn layout(&self) -> InputLayout {
        match self {
            Backbone::TimeSformer(_) => InputLayout::ChannelsFirst,
            Backbone::R2Plus1(_) => InputLayout::ChannelsLast,
            Backbone::VideoMae(_) => InputLayout::FrameChannels,
        }
    }

    /// Spatial size a square clip must have, for backbones with learned positions
    pub fn input_size(&self) -> Option<usize> {
        match self {
            Backbone::TimeSformer(model) => Some(model.encoder.img_size()),
            Backbone::R2Plus1(_) | Backbone::VideoMae(_) => None,
        }
    }

    /// Logits `[B, 1]` for a clip already in [`Self::layout`]
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 2> {
        match self {
            Backbone::TimeSformer(model) => model.forward(x),
            Backbone::R2Plus1(model) => model.forward(x),
            Backbone::VideoMae(model) => model.forward(x).logits,
        }
    }
}

/// Binary gesture classifier over `[B, T, H, W, C]` clips
#[derive(Module, Debug)]
pub struct GestureClassifier<B: Backend> {
    pub backbone: Backbone<B>,
    keypoints: Ignored<KeypointMode>,
    num_frames: usize,
}

impl<B: Backend> GestureClassifier<B> {
    pub fn new(spec: &ModelSpec, device: &B::Device) -> Result<Self> {
        let backbone = Backbone::new(spec, device)?;
        info!(
            "Built {} backbone ({} input channels, {} frames, keypoints {})",
            backbone.kind(),
            spec.in_channels(),
            spec.num_frames,
            spec.keypoints
        );

        Ok(Self {
            backbone,
            keypoints: Ignored(spec.keypoints),
            num_frames: spec.num_frames,
        })
    }

    pub fn keypoints(&self) -> KeypointMode {
        self.keypoints.0
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// Reshape a clip for the backbone, then center its RGB channels
    pub fn adapt_input(&self, x: Tensor<B, 5>) -> Result<Tensor<B, 5>> {
        let [_, frames, height, width, channels] = x.dims();
        let expected = self.keypoints.0.in_channels();
        if channels != expected {
            return Err(GestureError::Training(format!(
                "clip has {} channels, keypoint mode {} expects {}",
                channels, self.keypoints.0, expected
            )));
        }
        if frames != self.num_frames {
            return Err(GestureError::Training(format!(
                "clip has {} frames, model was built for {}",
                frames, self.num_frames
            )));
        }
        if let Some(size) = self.backbone.input_size() {
            if height != size || width != size {
                return Err(GestureError::Training(format!(
                    "clip is {}x{}, {} expects {}x{}",
                    height,
                    width,
                    self.backbone.kind(),
                    size,
                    size
                )));
            }
        }

        let layout = self.backbone.layout();
        Ok(input::normalize(input::reshape(x, layout), layout, self.keypoints.0))
    }

    /// `[B, T, H, W, C]` -> logits `[B, 1]`
    pub fn forward(&self, x: Tensor<B, 5>) -> Result<Tensor<B, 2>> {
        Ok(self.backbone.forward(self.adapt_input(x)?))
    }

    /// One logit per sample, `[B]`
    pub fn logits(&self, x: Tensor<B, 5>) -> Result<Tensor<B, 1>> {
        let out = self.forward(x)?;
        let [batch, _] = out.dims();
        Ok(out.reshape([batch]))
    }
}
