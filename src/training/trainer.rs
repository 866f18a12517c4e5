//! Epoch driver for the classification task
//!
//! Runs the lifecycle hooks in order for each epoch:
//! - training steps, each followed by backward and an optimizer step
//! - training epoch end
//! - validation steps
//! - validation epoch end
//! - scheduler step

use burn::tensor::{backend::AutodiffBackend, ElementConversion};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::training::task::{ClassificationTask, VideoBatch};
use crate::utils::error::{GestureError, Result};
use crate::utils::logging::{EpochLogger, MetricSink};
use crate::utils::metrics::BinaryScores;

/// Per-epoch history of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epochs completed
    pub epoch: usize,
    /// Optimizer steps taken
    pub iteration: usize,
    /// Mean training loss per epoch
    pub train_losses: Vec<f64>,
    /// Validation metrics per epoch
    pub val_scores: Vec<BinaryScores>,
    /// Learning rate used during each epoch
    pub learning_rates: Vec<f64>,
    /// Best validation F1 seen so far
    pub best_val_f1: f64,
    /// Epoch (0-indexed) that reached `best_val_f1`
    pub best_epoch: Option<usize>,
}

impl TrainingState {
    fn record_epoch(&mut self, train_loss: f64, val: BinaryScores, learning_rate: f64) {
        if self.best_epoch.is_none() || val.f1 > self.best_val_f1 {
            if self.best_epoch.is_some() {
                info!(
                    "New best model! Val F1 improved: {:.4} -> {:.4}",
                    self.best_val_f1, val.f1
                );
            }
            self.best_val_f1 = val.f1;
            self.best_epoch = Some(self.epoch);
        }

        self.train_losses.push(train_loss);
        self.val_scores.push(val);
        self.learning_rates.push(learning_rate);
        self.epoch += 1;
    }
}

/// Minimal epoch loop over pre-built batches
#[derive(Debug, Clone)]
pub struct Trainer {
    /// Number of epochs to run
    pub epochs: usize,
    /// Shuffle the training batch order each epoch with this seed
    pub shuffle_seed: Option<u64>,
}

impl Trainer {
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            shuffle_seed: None,
        }
    }

    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Train and validate for `self.epochs` epochs
    pub fn fit<B: AutodiffBackend, S: MetricSink>(
        &self,
        task: &mut ClassificationTask<B, S>,
        train_batches: &[VideoBatch<B>],
        val_batches: &[VideoBatch<B::InnerBackend>],
    ) -> Result<TrainingState> {
        if self.epochs == 0 {
            return Err(GestureError::Training("epochs must be positive".to_string()));
        }

        let mut setup = task.configure_optimizers();
        let mut state = TrainingState::default();
        let mut logger = EpochLogger::new(self.epochs);
        let mut rng = self.shuffle_seed.map(ChaCha8Rng::seed_from_u64);

        info!(
            "Training for {} epochs: {} train batches, {} val batches",
            self.epochs,
            train_batches.len(),
            val_batches.len()
        );

        for epoch in 0..self.epochs {
            logger.start_epoch(epoch);
            let lr = setup.scheduler.current_lr();

            let mut order: Vec<usize> = (0..train_batches.len()).collect();
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }

            let mut total_loss = 0.0;
            for (batch_idx, &i) in order.iter().enumerate() {
                let loss = task.training_step(&train_batches[i], batch_idx)?;
                let loss_value: f64 = loss.clone().into_scalar().elem();
                total_loss += loss_value;

                task.optimizer_step(&mut setup.optimizer, lr, loss);
                state.iteration += 1;
            }
            task.on_train_epoch_end();

            let avg_loss = if order.is_empty() {
                0.0
            } else {
                total_loss / order.len() as f64
            };

            for (batch_idx, batch) in val_batches.iter().enumerate() {
                task.validation_step(batch, batch_idx)?;
            }
            let val = task.on_validation_epoch_end();

            logger.end_epoch(avg_loss, &val, lr);
            state.record_epoch(avg_loss, val, lr);

            if epoch % setup.frequency == 0 {
                let next = setup.scheduler.step();
                if (next - lr).abs() > f64::EPSILON * lr.abs() {
                    debug!("Learning rate updated: {:.2e} -> {:.2e}", lr, next);
                }
            }
        }

        logger.log_complete(state.best_val_f1);
        Ok(state)
    }
}
