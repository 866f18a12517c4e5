//! Training Module
//!
//! Loss functions, the learning rate schedule, the per-step classification
//! task and a small epoch driver.

pub mod loss;
pub mod scheduler;
pub mod task;
pub mod trainer;

pub use loss::LossFunction;
pub use scheduler::{EpochScheduler, LRScheduler, ScheduleInterval, SchedulerKind};
pub use task::{ClassificationTask, OptimizerSetup, VideoBatch};
pub use trainer::{Trainer, TrainingState};
