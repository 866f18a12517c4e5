//! Model Configuration Module
//!
//! Defines the construction parameters of the classifier, the keypoint mode,
//! the backbone tags, and the per-architecture configuration structures.
//! Every name-based choice is resolved here, at construction time, so an
//! unsupported value fails before any weights are touched.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::training::loss::LossFunction;
use crate::training::scheduler::SchedulerKind;
use crate::utils::error::{invalid_choice, GestureError, Result};

/// Checkpoint identifier the VideoMAE backbone is initialized from
pub const VIDEOMAE_CHECKPOINT: &str = "MCG-NJU/videomae-base-finetuned-ssv2";

/// Whether pose keypoints augment, replace, or are excluded from the RGB channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeypointMode {
    /// RGB only (3 channels)
    Disabled,
    /// RGB plus one keypoint channel (4 channels)
    Enabled,
    /// Keypoint channel only (1 channel)
    Only,
}

impl KeypointMode {
    /// Spellings accepted for the keypoint setting
    pub const ACCEPTED: [&'static str; 7] = ["0", "false", "False", "1", "true", "True", "only"];

    /// Number of input channels the backbone stem is built for
    pub fn in_channels(&self) -> usize {
        match self {
            KeypointMode::Disabled => 3,
            KeypointMode::Enabled => 4,
            KeypointMode::Only => 1,
        }
    }

    /// Whether the leading RGB channels are centered before the forward pass
    pub fn normalizes_rgb(&self) -> bool {
        match self {
            KeypointMode::Disabled | KeypointMode::Enabled => true,
            KeypointMode::Only => false,
        }
    }
}

impl FromStr for KeypointMode {
    type Err = GestureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" | "false" | "False" => Ok(KeypointMode::Disabled),
            "1" | "true" | "True" => Ok(KeypointMode::Enabled),
            "only" => Ok(KeypointMode::Only),
            other => Err(invalid_choice("keypoint mode", other, &Self::ACCEPTED)),
        }
    }
}

impl fmt::Display for KeypointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeypointMode::Disabled => write!(f, "disabled"),
            KeypointMode::Enabled => write!(f, "enabled"),
            KeypointMode::Only => write!(f, "only"),
        }
    }
}

/// Raw keypoint setting as written in an experiment config.
///
/// Config files write this as a boolean, an integer, or a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeypointSetting {
    Flag(bool),
    Number(i64),
    Name(String),
}

impl KeypointSetting {
    pub fn resolve(&self) -> Result<KeypointMode> {
        match self {
            KeypointSetting::Flag(false) => Ok(KeypointMode::Disabled),
            KeypointSetting::Flag(true) => Ok(KeypointMode::Enabled),
            KeypointSetting::Number(n) => n.to_string().parse(),
            KeypointSetting::Name(name) => name.parse(),
        }
    }
}

impl Default for KeypointSetting {
    fn default() -> Self {
        KeypointSetting::Flag(false)
    }
}

/// Supported backbone tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackboneKind {
    TimeSformer,
    R2Plus1,
    VideoMae,
}

impl BackboneKind {
    pub const ACCEPTED: [&'static str; 3] = ["timesformer", "r2plus1", "videomae"];

    pub fn tag(&self) -> &'static str {
        match self {
            BackboneKind::TimeSformer => "timesformer",
            BackboneKind::R2Plus1 => "r2plus1",
            BackboneKind::VideoMae => "videomae",
        }
    }
}

impl FromStr for BackboneKind {
    type Err = GestureError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timesformer" => Ok(BackboneKind::TimeSformer),
            "r2plus1" => Ok(BackboneKind::R2Plus1),
            "videomae" => Ok(BackboneKind::VideoMae),
            other => Err(invalid_choice("backbone", other, &Self::ACCEPTED)),
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Divided space-time transformer sizes (defaults: ViT-Base/16 at 224px)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSformerConfig {
    pub img_size: usize,
    pub patch_size: usize,
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f64,
    pub qkv_bias: bool,
    pub layer_norm_eps: f64,
}

impl Default for TimeSformerConfig {
    fn default() -> Self {
        Self {
            img_size: 224,
            patch_size: 16,
            embed_dim: 768,
            depth: 12,
            num_heads: 12,
            mlp_ratio: 4.0,
            qkv_bias: true,
            layer_norm_eps: 1e-6,
        }
    }
}

impl TimeSformerConfig {
    pub fn num_patches(&self) -> usize {
        let side = self.img_size / self.patch_size;
        side * side
    }

    pub fn mlp_hidden(&self) -> usize {
        (self.embed_dim as f64 * self.mlp_ratio) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 || self.img_size % self.patch_size != 0 {
            return Err(GestureError::InvalidConfiguration(format!(
                "timesformer patch_size {} must divide img_size {}",
                self.patch_size, self.img_size
            )));
        }
        check_heads("timesformer", self.embed_dim, self.num_heads)?;
        if self.mlp_hidden() == 0 {
            return Err(GestureError::InvalidConfiguration(
                "timesformer mlp_ratio must give a non-empty hidden layer".to_string(),
            ));
        }
        Ok(())
    }
}

/// (2+1)D ResNet sizes (defaults: R(2+1)D-18)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct R2Plus1Config {
    /// Channels of the first residual stage; stages use 1x, 2x, 4x, 8x
    pub base_width: usize,
    /// Residual blocks in each of the four stages
    pub blocks_per_layer: [usize; 4],
}

impl Default for R2Plus1Config {
    fn default() -> Self {
        Self {
            base_width: 64,
            blocks_per_layer: [2, 2, 2, 2],
        }
    }
}

impl R2Plus1Config {
    /// Width of the features entering the classification layer
    pub fn feature_dim(&self) -> usize {
        self.base_width * 8
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_width == 0 {
            return Err(GestureError::InvalidConfiguration(
                "r2plus1 base_width must be positive".to_string(),
            ));
        }
        if self.blocks_per_layer.iter().any(|&n| n == 0) {
            return Err(GestureError::InvalidConfiguration(
                "r2plus1 needs at least one block per stage".to_string(),
            ));
        }
        Ok(())
    }
}

/// Masked-autoencoder video transformer sizes (defaults: VideoMAE-Base)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoMaeConfig {
    /// Pretrained checkpoint identifier resolved inside the pretrained cache
    pub checkpoint: String,
    pub image_size: usize,
    pub patch_size: usize,
    pub tubelet_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub qkv_bias: bool,
    pub layer_norm_eps: f64,
    pub use_mean_pooling: bool,
}

impl Default for VideoMaeConfig {
    fn default() -> Self {
        Self {
            checkpoint: VIDEOMAE_CHECKPOINT.to_string(),
            image_size: 224,
            patch_size: 16,
            tubelet_size: 2,
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            qkv_bias: false,
            layer_norm_eps: 1e-12,
            use_mean_pooling: true,
        }
    }
}

impl VideoMaeConfig {
    /// Number of tubelet tokens for a clip of `num_frames`
    pub fn num_tokens(&self, num_frames: usize) -> usize {
        let side = self.image_size / self.patch_size;
        (num_frames / self.tubelet_size) * side * side
    }

    pub fn validate(&self, num_frames: usize) -> Result<()> {
        if self.patch_size == 0 || self.image_size % self.patch_size != 0 {
            return Err(GestureError::InvalidConfiguration(format!(
                "videomae patch_size {} must divide image_size {}",
                self.patch_size, self.image_size
            )));
        }
        if self.tubelet_size == 0 || num_frames % self.tubelet_size != 0 {
            return Err(GestureError::InvalidConfiguration(format!(
                "videomae tubelet_size {} must divide num_frames {}",
                self.tubelet_size, num_frames
            )));
        }
        check_heads("videomae", self.hidden_size, self.num_attention_heads)
    }

    /// File stem the checkpoint is stored under inside the pretrained cache
    pub fn cache_stem(&self) -> String {
        self.checkpoint.replace('/', "__")
    }
}

fn check_heads(name: &str, dim: usize, heads: usize) -> Result<()> {
    if heads == 0 || dim == 0 || dim % heads != 0 {
        return Err(GestureError::InvalidConfiguration(format!(
            "{} hidden size {} must be a positive multiple of the head count {}",
            name, dim, heads
        )));
    }
    Ok(())
}

/// Per-architecture sizes and where pretrained checkpoints are cached
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureConfig {
    pub timesformer: TimeSformerConfig,
    pub r2plus1: R2Plus1Config,
    pub videomae: VideoMaeConfig,
    /// Directory holding pretrained checkpoints addressed by identifier
    pub pretrained_cache: Option<PathBuf>,
}

/// A backbone tag resolved together with the configuration it is built from
#[derive(Debug, Clone, PartialEq)]
pub enum BackboneSpec {
    TimeSformer {
        config: TimeSformerConfig,
        weights: PathBuf,
    },
    R2Plus1(R2Plus1Config),
    VideoMae {
        config: VideoMaeConfig,
        weights: Option<PathBuf>,
    },
}

impl BackboneSpec {
    pub fn kind(&self) -> BackboneKind {
        match self {
            BackboneSpec::TimeSformer { .. } => BackboneKind::TimeSformer,
            BackboneSpec::R2Plus1(_) => BackboneKind::R2Plus1,
            BackboneSpec::VideoMae { .. } => BackboneKind::VideoMae,
        }
    }
}

/// Everything needed to build the model, with every choice resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub backbone: BackboneSpec,
    pub keypoints: KeypointMode,
    pub num_frames: usize,
}

impl ModelSpec {
    pub fn in_channels(&self) -> usize {
        self.keypoints.in_channels()
    }
}

/// Construction parameters of the classifier, as read from an experiment config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Backbone tag: "timesformer", "r2plus1" or "videomae"
    pub model_name: String,

    /// Pretrained TimeSformer encoder weights (required for "timesformer")
    #[serde(default)]
    pub pretrained_model: Option<PathBuf>,

    /// Frames per clip
    pub num_frames: usize,

    /// Adam step size
    pub learning_rate: f64,

    /// Adam weight decay (0 disables the decay term)
    #[serde(default)]
    pub weight_decay: f64,

    /// Loss function name: "bce" or "focal"
    pub loss_function_name: String,

    /// Focusing parameter of the focal loss
    #[serde(default = "default_focal_gamma")]
    pub focal_gamma: f64,

    /// Learning rate schedule name; only "multi-step-lr" is supported
    pub scheduler_name: String,

    /// Epochs at which the learning rate is decayed
    #[serde(default)]
    pub scheduler_milestones: Vec<usize>,

    /// Multiplicative decay applied at each milestone
    pub scheduler_gamma: f64,

    /// Keypoint mode: false/0, true/1, or "only"
    #[serde(default)]
    pub use_keypoints: KeypointSetting,

    /// Backbone sizes and pretrained cache location
    #[serde(default)]
    pub architecture: ArchitectureConfig,
}

fn default_focal_gamma() -> f64 {
    2.0
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_name: "r2plus1".to_string(),
            pretrained_model: None,
            num_frames: 16,
            learning_rate: 1e-4,
            weight_decay: 0.0,
            loss_function_name: "bce".to_string(),
            focal_gamma: default_focal_gamma(),
            scheduler_name: "multi-step-lr".to_string(),
            scheduler_milestones: vec![5, 10],
            scheduler_gamma: 0.1,
            use_keypoints: KeypointSetting::default(),
            architecture: ArchitectureConfig::default(),
        }
    }
}

impl ClassifierConfig {
    /// Default configuration for the given backbone tag
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            ..Default::default()
        }
    }

    /// Resolve the keypoint setting
    pub fn keypoint_mode(&self) -> Result<KeypointMode> {
        self.use_keypoints.resolve()
    }

    /// Resolve the backbone tag and its configuration
    pub fn model_spec(&self) -> Result<ModelSpec> {
        let kind: BackboneKind = self.model_name.parse()?;
        let keypoints = self.keypoint_mode()?;

        if self.num_frames == 0 {
            return Err(GestureError::InvalidConfiguration(
                "num_frames must be positive".to_string(),
            ));
        }

        let backbone = match kind {
            BackboneKind::TimeSformer => {
                let config = self.architecture.timesformer.clone();
                config.validate()?;
                let weights = self.pretrained_model.clone().ok_or_else(|| {
                    GestureError::InvalidConfiguration(
                        "timesformer requires pretrained_model".to_string(),
                    )
                })?;
                BackboneSpec::TimeSformer { config, weights }
            }
            BackboneKind::R2Plus1 => {
                let config = self.architecture.r2plus1.clone();
                config.validate()?;
                BackboneSpec::R2Plus1(config)
            }
            BackboneKind::VideoMae => {
                let config = self.architecture.videomae.clone();
                config.validate(self.num_frames)?;
                let weights = self
                    .architecture
                    .pretrained_cache
                    .as_ref()
                    .map(|dir| dir.join(config.cache_stem()));
                BackboneSpec::VideoMae { config, weights }
            }
        };

        Ok(ModelSpec {
            backbone,
            keypoints,
            num_frames: self.num_frames,
        })
    }

    /// Resolve the learning rate schedule name
    pub fn scheduler_kind(&self) -> Result<SchedulerKind> {
        self.scheduler_name.parse()
    }

    /// Resolve the loss function
    pub fn loss_function(&self) -> Result<LossFunction> {
        LossFunction::from_name(&self.loss_function_name, self.focal_gamma)
    }

    /// Validate every construction parameter without building a model
    pub fn validate(&self) -> Result<()> {
        self.model_spec()?;
        self.scheduler_kind()?;
        self.loss_function()?;

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(GestureError::InvalidConfiguration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(GestureError::InvalidConfiguration(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        if !(self.scheduler_gamma.is_finite() && self.scheduler_gamma > 0.0) {
            return Err(GestureError::InvalidConfiguration(format!(
                "scheduler_gamma must be positive, got {}",
                self.scheduler_gamma
            )));
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_channels() {
        assert_eq!("false".parse::<KeypointMode>().unwrap().in_channels(), 3);
        assert_eq!("0".parse::<KeypointMode>().unwrap().in_channels(), 3);
        assert_eq!("True".parse::<KeypointMode>().unwrap().in_channels(), 4);
        assert_eq!("1".parse::<KeypointMode>().unwrap().in_channels(), 4);
        assert_eq!("only".parse::<KeypointMode>().unwrap().in_channels(), 1);
    }

    #[test]
    fn test_keypoint_mode_rejects_unknown() {
        for bad in ["2", "yes", "ONLY", ""] {
            let err = bad.parse::<KeypointMode>().unwrap_err();
            assert!(matches!(err, GestureError::InvalidConfiguration(_)));
        }
        let err = KeypointSetting::Number(2).resolve().unwrap_err();
        assert!(matches!(err, GestureError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_keypoint_setting_from_json() {
        let flag: KeypointSetting = serde_json::from_str("true").unwrap();
        assert_eq!(flag.resolve().unwrap(), KeypointMode::Enabled);
        let number: KeypointSetting = serde_json::from_str("0").unwrap();
        assert_eq!(number.resolve().unwrap(), KeypointMode::Disabled);
        let name: KeypointSetting = serde_json::from_str("\"only\"").unwrap();
        assert_eq!(name.resolve().unwrap(), KeypointMode::Only);
    }

    #[test]
    fn test_unknown_backbone_lists_accepted_tags() {
        let config = ClassifierConfig::new("resnet50");
        let err = config.model_spec().unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, GestureError::InvalidConfiguration(_)));
        for tag in BackboneKind::ACCEPTED {
            assert!(msg.contains(tag));
        }
    }

    #[test]
    fn test_timesformer_requires_weights() {
        let config = ClassifierConfig::new("timesformer");
        assert!(matches!(
            config.model_spec(),
            Err(GestureError::InvalidConfiguration(_))
        ));

        let config = ClassifierConfig {
            pretrained_model: Some(PathBuf::from("weights/timesformer")),
            ..ClassifierConfig::new("timesformer")
        };
        let spec = config.model_spec().unwrap();
        assert_eq!(spec.backbone.kind(), BackboneKind::TimeSformer);
    }

    #[test]
    fn test_videomae_resolves_checkpoint_in_cache() {
        let mut config = ClassifierConfig::new("videomae");
        config.architecture.pretrained_cache = Some(PathBuf::from("/models"));
        match config.model_spec().unwrap().backbone {
            BackboneSpec::VideoMae { weights, config } => {
                assert!(!config.qkv_bias);
                assert_eq!(
                    weights.unwrap(),
                    PathBuf::from("/models/MCG-NJU__videomae-base-finetuned-ssv2")
                );
            }
            other => panic!("unexpected backbone {:?}", other),
        }
    }

    #[test]
    fn test_videomae_frames_must_fill_tubelets() {
        let config = ClassifierConfig {
            num_frames: 15,
            ..ClassifierConfig::new("videomae")
        };
        assert!(matches!(
            config.model_spec(),
            Err(GestureError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unsupported_scheduler_fails_validation() {
        let config = ClassifierConfig {
            scheduler_name: "cosine".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("multi-step-lr"));
    }

    #[test]
    fn test_numeric_validation() {
        let config = ClassifierConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClassifierConfig {
            weight_decay: -1e-4,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(ClassifierConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_json_roundtrip_with_defaults() {
        let json = r#"{
            "model_name": "r2plus1",
            "num_frames": 16,
            "learning_rate": 0.0001,
            "loss_function_name": "focal",
            "scheduler_name": "multi-step-lr",
            "scheduler_milestones": [5, 10],
            "scheduler_gamma": 0.1,
            "use_keypoints": "only"
        }"#;
        let config: ClassifierConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.focal_gamma, 2.0);
        assert_eq!(config.architecture.r2plus1.base_width, 64);
        assert_eq!(config.keypoint_mode().unwrap(), KeypointMode::Only);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        config.save(&path).unwrap();
        assert_eq!(ClassifierConfig::load(&path).unwrap(), config);
    }
}
