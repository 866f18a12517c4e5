//! Model Module
//!
//! Video backbones and the binary gesture classifier built on them.

pub mod classifier;
pub mod config;
pub mod input;
pub mod layers;
pub mod r2plus1d;
pub mod timesformer;
pub mod videomae;

pub use classifier::{Backbone, GestureClassifier};
pub use config::{
    ArchitectureConfig, BackboneKind, BackboneSpec, ClassifierConfig, KeypointMode, KeypointSetting,
    ModelSpec, R2Plus1Config, TimeSformerConfig, VideoMaeConfig, VIDEOMAE_CHECKPOINT,
};
pub use input::InputLayout;
pub use r2plus1d::R2Plus1d;
pub use timesformer::TimeSformer;
pub use videomae::{VideoMae, VideoMaeOutput};
