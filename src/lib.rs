//! # Gesture Classifier
//!
//! Binary gesture classification on video clips using the Burn framework.
//!
//! ## Features
//!
//! - **Three video backbones**: divided space-time transformer (TimeSformer),
//!   (2+1)D ResNet-18 and VideoMAE, each ending in a single logit
//! - **Keypoint channels**: RGB, RGB plus a pose keypoint channel, or keypoints only
//! - **Per-phase metric bookkeeping** for accuracy, precision, recall, F1 and IoU
//! - **Adam with multi-milestone step decay**, stepped once per epoch
//!
//! ## Modules
//!
//! - `backend`: Backend aliases (NdArray on CPU, CUDA behind a feature)
//! - `model`: Backbones, input adaptation and the classifier wrapper
//! - `training`: Loss functions, schedule, classification task and epoch driver
//! - `utils`: Logging, metrics, and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gesture_classifier::{ClassificationTask, ClassifierConfig, Trainer};
//! use gesture_classifier::backend::{default_device, TrainingBackend};
//!
//! let config = ClassifierConfig::load("experiment.json".as_ref())?;
//! let mut task = ClassificationTask::<TrainingBackend>::new(&config, &default_device())?;
//! let history = Trainer::new(15).fit(&mut task, &train_batches, &val_batches)?;
//! ```

pub mod backend;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use model::{BackboneKind, ClassifierConfig, GestureClassifier, KeypointMode};
pub use training::{ClassificationTask, LossFunction, Trainer, TrainingState, VideoBatch};
pub use utils::error::{GestureError, Result};
pub use utils::metrics::{BinaryScores, PhaseMetrics};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
