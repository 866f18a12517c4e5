//! Classification task: per-step bookkeeping and the optimizer factory
//!
//! Both phases run the same pipeline: adapt the clip, forward, loss against
//! the float-cast labels, sigmoid, then feed the phase accumulators. The
//! training step hands its loss back for the backward pass; the validation
//! step works on the inner (non-autodiff) model and returns named values.

use std::collections::BTreeMap;

use burn::{
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::sigmoid,
        backend::{AutodiffBackend, Backend},
        Element, ElementConversion, Int, Tensor, TensorData,
    },
};
use tracing::{debug, info};

use crate::model::{ClassifierConfig, GestureClassifier};
use crate::training::loss::LossFunction;
use crate::training::scheduler::{EpochScheduler, LRScheduler, ScheduleInterval, SchedulerKind};
use crate::utils::error::{GestureError, Result};
use crate::utils::logging::{MetricSink, TracingSink};
use crate::utils::metrics::{BinaryMetricKind, BinaryScores, Phase, PhaseMetrics};

/// A batch of clips `[B, T, H, W, C]` with binary labels `[B]`
#[derive(Debug, Clone)]
pub struct VideoBatch<B: Backend> {
    pub videos: Tensor<B, 5>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> VideoBatch<B> {
    pub fn new(videos: Tensor<B, 5>, labels: Tensor<B, 1, Int>) -> Self {
        Self { videos, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Optimizer together with its learning rate schedule
pub struct OptimizerSetup<O> {
    pub optimizer: O,
    pub scheduler: EpochScheduler,
    pub interval: ScheduleInterval,
    pub frequency: usize,
}

/// What one step produced, read back to host values
struct StepOutcome<B: Backend> {
    loss: Tensor<B, 1>,
    loss_value: f64,
    scores: BinaryScores,
}

/// Binary gesture classification task
pub struct ClassificationTask<B: AutodiffBackend, S: MetricSink = TracingSink> {
    pub model: GestureClassifier<B>,
    loss: LossFunction,
    train_metrics: PhaseMetrics,
    val_metrics: PhaseMetrics,
    learning_rate: f64,
    weight_decay: f64,
    scheduler: SchedulerKind,
    milestones: Vec<usize>,
    scheduler_gamma: f64,
    sink: S,
    /// Inner model shared by the validation steps of one epoch
    valid_model: Option<GestureClassifier<B::InnerBackend>>,
}

impl<B: AutodiffBackend> ClassificationTask<B> {
    /// Build the task, emitting step values as tracing events
    pub fn new(config: &ClassifierConfig, device: &B::Device) -> Result<Self> {
        Self::with_sink(config, device, TracingSink)
    }
}

impl<B: AutodiffBackend, S: MetricSink> ClassificationTask<B, S> {
    /// Build the task with a custom metric sink.
    ///
    /// Every name in the config is resolved before the backbone is built.
    pub fn with_sink(config: &ClassifierConfig, device: &B::Device, sink: S) -> Result<Self> {
        let scheduler = config.scheduler_kind()?;
        let loss = config.loss_function()?;
        config.validate()?;

        let spec = config.model_spec()?;
        let model = GestureClassifier::new(&spec, device)?;
        info!(
            "Classification task ready: loss {}, lr {:.2e}, weight decay {}, scheduler {} {:?} x{}",
            loss,
            config.learning_rate,
            config.weight_decay,
            scheduler,
            config.scheduler_milestones,
            config.scheduler_gamma
        );

        Ok(Self {
            model,
            loss,
            train_metrics: PhaseMetrics::new(Phase::Train),
            val_metrics: PhaseMetrics::new(Phase::Validation),
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            scheduler,
            milestones: config.scheduler_milestones.clone(),
            scheduler_gamma: config.scheduler_gamma,
            sink,
            valid_model: None,
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn loss_function(&self) -> &LossFunction {
        &self.loss
    }

    pub fn train_metrics(&self) -> &PhaseMetrics {
        &self.train_metrics
    }

    pub fn val_metrics(&self) -> &PhaseMetrics {
        &self.val_metrics
    }

    /// Forward and loss on the autodiff model; returns the loss for `backward`
    pub fn training_step(
        &mut self,
        batch: &VideoBatch<B>,
        batch_idx: usize,
    ) -> Result<Tensor<B, 1>> {
        let outcome = run_step(&self.model, &self.loss, &mut self.train_metrics, batch)?;

        let prefix = self.train_metrics.phase().prefix();
        self.sink.log(&format!("{}_loss_step", prefix), outcome.loss_value);
        for kind in BinaryMetricKind::ALL {
            let name = format!("{}_{}_step", prefix, kind.short_name());
            self.sink.log(&name, outcome.scores.get(kind));
        }
        debug!(
            "train batch {}: loss = {:.4}, acc = {:.4}, f1 = {:.4}",
            batch_idx, outcome.loss_value, outcome.scores.accuracy, outcome.scores.f1
        );

        Ok(outcome.loss)
    }

    /// Clear the training accumulators
    pub fn on_train_epoch_end(&mut self) {
        debug!("Resetting training metrics after {} updates", self.train_metrics.updates());
        self.train_metrics.reset();
    }

    /// Forward and loss on the inner model; no parameters change.
    ///
    /// The inner model is taken once and reused until the validation epoch
    /// ends or the next optimizer step.
    pub fn validation_step(
        &mut self,
        batch: &VideoBatch<B::InnerBackend>,
        batch_idx: usize,
    ) -> Result<BTreeMap<String, f64>> {
        let model = self.valid_model.get_or_insert_with(|| self.model.valid());
        let outcome = run_step(model, &self.loss, &mut self.val_metrics, batch)?;

        let prefix = self.val_metrics.phase().prefix();
        self.sink.log(&format!("{}_loss", prefix), outcome.loss_value);
        debug!("val batch {}: loss = {:.4}", batch_idx, outcome.loss_value);

        let mut values = outcome.scores.to_map();
        values.insert("loss".to_string(), outcome.loss_value);
        Ok(values)
    }

    /// Emit the epoch value of every validation metric, then clear them
    pub fn on_validation_epoch_end(&mut self) -> BinaryScores {
        self.valid_model = None;
        let scores = self.val_metrics.finish_epoch();
        let prefix = self.val_metrics.phase().prefix();
        for kind in BinaryMetricKind::ALL {
            let name = format!("{}_{}", prefix, kind.short_name());
            self.sink.log(&name, scores.get(kind));
        }
        scores
    }

    /// Adam with the configured weight decay and the step-decay schedule
    pub fn configure_optimizers(
        &self,
    ) -> OptimizerSetup<impl Optimizer<GestureClassifier<B>, B>> {
        let decay =
            (self.weight_decay > 0.0).then(|| WeightDecayConfig::new(self.weight_decay as f32));
        let optimizer = AdamConfig::new()
            .with_weight_decay(decay)
            .init::<B, GestureClassifier<B>>();

        let schedule = LRScheduler::from_kind(
            self.scheduler,
            self.learning_rate,
            &self.milestones,
            self.scheduler_gamma,
        );

        OptimizerSetup {
            optimizer,
            scheduler: EpochScheduler::new(schedule),
            interval: ScheduleInterval::Epoch,
            frequency: 1,
        }
    }

    /// Backpropagate `loss` and apply one optimizer step at `learning_rate`
    pub fn optimizer_step<O: Optimizer<GestureClassifier<B>, B>>(
        &mut self,
        optimizer: &mut O,
        learning_rate: f64,
        loss: Tensor<B, 1>,
    ) {
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = optimizer.step(learning_rate, self.model.clone(), grads);
        self.valid_model = None;
    }
}

fn run_step<B: Backend>(
    model: &GestureClassifier<B>,
    loss_fn: &LossFunction,
    metrics: &mut PhaseMetrics,
    batch: &VideoBatch<B>,
) -> Result<StepOutcome<B>> {
    let logits = model.logits(batch.videos.clone())?;
    let loss = loss_fn.forward(logits.clone(), batch.labels.clone().float());
    let loss_value: f64 = loss.clone().into_scalar().elem();

    let probs = host_values::<f32>(sigmoid(logits).into_data())?;
    let labels = host_values::<i64>(batch.labels.clone().into_data())?;
    let scores = metrics.step(&probs, &labels);

    Ok(StepOutcome {
        loss,
        loss_value,
        scores,
    })
}

fn host_values<E: Element>(data: TensorData) -> Result<Vec<E>> {
    data.convert::<E>()
        .to_vec::<E>()
        .map_err(|e| GestureError::Metrics(format!("Failed to read tensor values: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::R2Plus1Config;
    use crate::utils::logging::MemorySink;
    use burn::backend::Autodiff;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray<f32>>;
    type InnerBackend = NdArray<f32>;

    fn tiny_config() -> ClassifierConfig {
        let mut config = ClassifierConfig::new("r2plus1");
        config.num_frames = 4;
        config.architecture.r2plus1 = R2Plus1Config {
            base_width: 4,
            blocks_per_layer: [1, 1, 1, 1],
        };
        config
    }

    fn batch<B: Backend>(labels: Vec<i64>) -> VideoBatch<B> {
        let device = Default::default();
        let n = labels.len();
        let videos = Tensor::random([n, 4, 16, 16, 3], Distribution::Uniform(0.0, 1.0), &device);
        let labels = Tensor::from_data(TensorData::new(labels, [n]), &device);
        VideoBatch::new(videos, labels)
    }

    fn task() -> ClassificationTask<TestBackend, MemorySink> {
        ClassificationTask::with_sink(&tiny_config(), &Default::default(), MemorySink::new())
            .unwrap()
    }

    #[test]
    fn test_training_step_emits_step_values() {
        let mut task = task();
        let loss = task.training_step(&batch(vec![0, 1]), 0).unwrap();
        let value: f64 = loss.into_scalar().elem();
        assert!(value.is_finite());

        let sink = task.sink();
        assert_eq!(sink.last("train_loss_step"), Some(value));
        for name in ["acc", "prec", "rec", "f1", "iou"] {
            let v = sink.last(&format!("train_{}_step", name)).unwrap();
            assert!((0.0..=1.0).contains(&v));
        }
        assert_eq!(task.train_metrics().updates(), 1);
    }

    #[test]
    fn test_train_epoch_end_clears_accumulators() {
        let mut task = task();
        task.training_step(&batch(vec![1, 0]), 0).unwrap();
        task.training_step(&batch(vec![1, 1]), 1).unwrap();
        assert_eq!(task.train_metrics().updates(), 2);
        task.on_train_epoch_end();
        assert_eq!(task.train_metrics().updates(), 0);
    }

    #[test]
    fn test_validation_step_returns_named_values() {
        let mut task = task();
        let values = task.validation_step(&batch::<InnerBackend>(vec![0, 1, 1]), 0).unwrap();
        let keys: Vec<&str> = values.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["acc", "f1", "iou", "loss", "prec", "rec"]);
        assert_eq!(task.sink().last("val_loss"), values.get("loss").copied());
        assert!(task.sink().last("train_loss_step").is_none());
    }

    #[test]
    fn test_validation_epoch_end_reads_then_resets() {
        let mut task = task();
        task.validation_step(&batch::<InnerBackend>(vec![0, 1]), 0).unwrap();
        task.validation_step(&batch::<InnerBackend>(vec![1, 1]), 1).unwrap();

        let running = task.val_metrics().compute();
        let emitted = task.on_validation_epoch_end();
        assert_eq!(running, emitted);
        assert_eq!(task.sink().last("val_acc"), Some(emitted.accuracy));
        assert_eq!(task.sink().last("val_iou"), Some(emitted.iou));

        assert_eq!(task.val_metrics().updates(), 0);
        assert_eq!(task.val_metrics().compute(), BinaryScores::default());
    }

    #[test]
    fn test_optimizer_setup_follows_config() {
        let task = task();
        let setup = task.configure_optimizers();
        assert_eq!(setup.interval, ScheduleInterval::Epoch);
        assert_eq!(setup.frequency, 1);
        assert_eq!(setup.scheduler.current_lr(), 1e-4);
    }

    #[test]
    fn test_optimizer_step_changes_parameters() {
        let mut task = task();
        let before = task.model.backbone.clone();
        let mut setup = task.configure_optimizers();

        let loss = task.training_step(&batch(vec![0, 1]), 0).unwrap();
        let lr = setup.scheduler.current_lr();
        task.optimizer_step(&mut setup.optimizer, lr, loss);

        let fc = |b: &crate::model::Backbone<TestBackend>| match b {
            crate::model::Backbone::R2Plus1(m) => {
                m.fc.weight.val().into_data().to_vec::<f32>().unwrap()
            }
            _ => unreachable!(),
        };
        assert_ne!(fc(&before), fc(&task.model.backbone));
    }

    #[test]
    fn test_inner_model_is_reused_within_a_validation_epoch() {
        let fc = |m: &GestureClassifier<InnerBackend>| match &m.backbone {
            crate::model::Backbone::R2Plus1(m) => {
                m.fc.weight.val().into_data().to_vec::<f32>().unwrap()
            }
            _ => unreachable!(),
        };

        let mut task = task();
        let mut setup = task.configure_optimizers();
        task.validation_step(&batch::<InnerBackend>(vec![0, 1]), 0).unwrap();
        let first = fc(task.valid_model.as_ref().unwrap());
        task.validation_step(&batch::<InnerBackend>(vec![1, 0]), 1).unwrap();
        assert_eq!(fc(task.valid_model.as_ref().unwrap()), first);

        task.on_validation_epoch_end();
        assert!(task.valid_model.is_none());

        // An optimizer step between validation batches must not leave stale weights behind
        task.validation_step(&batch::<InnerBackend>(vec![0, 1]), 0).unwrap();
        let loss = task.training_step(&batch(vec![0, 1]), 0).unwrap();
        let lr = setup.scheduler.current_lr();
        task.optimizer_step(&mut setup.optimizer, lr, loss);
        assert!(task.valid_model.is_none());

        task.validation_step(&batch::<InnerBackend>(vec![0, 1]), 1).unwrap();
        assert_eq!(fc(task.valid_model.as_ref().unwrap()), fc(&task.model.valid()));
        assert_ne!(fc(task.valid_model.as_ref().unwrap()), first);
    }

    #[test]
    fn test_unknown_scheduler_fails_before_building() {
        let config = ClassifierConfig {
            scheduler_name: "cosine".to_string(),
            ..tiny_config()
        };
        let err = ClassificationTask::<TestBackend>::new(&config, &Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, GestureError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_unknown_loss_is_rejected() {
        let config = ClassifierConfig {
            loss_function_name: "hinge".to_string(),
            ..tiny_config()
        };
        let err = ClassificationTask::<TestBackend>::new(&config, &Default::default())
            .err()
            .unwrap();
        assert!(matches!(err, GestureError::InvalidConfiguration(_)));
    }
}
