//! Full step pipeline on the public API with full-size 224px clips

use burn::backend::Autodiff;
use burn::tensor::{Distribution, ElementConversion, Tensor, TensorData};
use burn_ndarray::NdArray;

use gesture_classifier::model::R2Plus1Config;
use gesture_classifier::training::scheduler::ScheduleInterval;
use gesture_classifier::utils::MemorySink;
use gesture_classifier::{ClassificationTask, ClassifierConfig, GestureError, VideoBatch};

type TestBackend = Autodiff<NdArray<f32>>;
type InnerBackend = NdArray<f32>;

/// r2plus1, keypoints off, 16 frames, lr 1e-4, no decay, multi-step-lr [5, 10] x0.1
fn experiment_config() -> ClassifierConfig {
    let json = r#"{
        "model_name": "r2plus1",
        "num_frames": 16,
        "learning_rate": 0.0001,
        "weight_decay": 0.0,
        "loss_function_name": "bce",
        "scheduler_name": "multi-step-lr",
        "scheduler_milestones": [5, 10],
        "scheduler_gamma": 0.1,
        "use_keypoints": false
    }"#;
    let mut config: ClassifierConfig = serde_json::from_str(json).unwrap();
    // Narrow residual stages keep the CPU backward pass quick at full resolution
    config.architecture.r2plus1 = R2Plus1Config {
        base_width: 2,
        blocks_per_layer: [1, 1, 1, 1],
    };
    config
}

fn gesture_batch<B: burn::tensor::backend::Backend>() -> VideoBatch<B> {
    let device = Default::default();
    VideoBatch::new(
        Tensor::random([2, 16, 224, 224, 3], Distribution::Uniform(0.0, 1.0), &device),
        Tensor::from_data(TensorData::new(vec![0i64, 1], [2]), &device),
    )
}

#[test]
fn training_step_on_full_size_clip() {
    let device = Default::default();
    let mut task = ClassificationTask::<TestBackend, MemorySink>::with_sink(
        &experiment_config(),
        &device,
        MemorySink::new(),
    )
    .unwrap();

    let loss = task.training_step(&gesture_batch(), 0).unwrap();
    assert_eq!(loss.dims(), [1]);
    let value: f64 = loss.into_scalar().elem();
    assert!(value.is_finite());

    for name in ["acc", "prec", "rec", "f1", "iou"] {
        let v = task.sink().last(&format!("train_{}_step", name)).unwrap();
        assert!(v.is_finite());
        assert!((0.0..=1.0).contains(&v), "{} = {}", name, v);
    }

    let setup = task.configure_optimizers();
    assert_eq!(setup.interval, ScheduleInterval::Epoch);
    assert_eq!(setup.scheduler.schedule().get_lr(5), 1e-4 * 0.1);
}

#[test]
fn validation_epoch_on_full_size_clip() {
    let device = Default::default();
    let mut task = ClassificationTask::<TestBackend, MemorySink>::with_sink(
        &experiment_config(),
        &device,
        MemorySink::new(),
    )
    .unwrap();

    let values = task.validation_step(&gesture_batch::<InnerBackend>(), 0).unwrap();
    assert!(values["loss"].is_finite());

    let scores = task.on_validation_epoch_end();
    for name in ["val_acc", "val_prec", "val_rec", "val_f1", "val_iou"] {
        let v = task.sink().last(name).unwrap();
        assert!((0.0..=1.0).contains(&v), "{} = {}", name, v);
    }
    assert_eq!(task.sink().last("val_acc"), Some(scores.accuracy));
    assert_eq!(task.val_metrics().updates(), 0);
}

#[test]
fn cosine_scheduler_is_rejected_at_construction() {
    let config = ClassifierConfig {
        scheduler_name: "cosine".to_string(),
        ..experiment_config()
    };
    let err = ClassificationTask::<TestBackend>::new(&config, &Default::default())
        .err()
        .unwrap();
    assert!(matches!(err, GestureError::InvalidConfiguration(_)));
    assert!(err.to_string().contains("multi-step-lr"));
}

#[test]
fn keypoint_only_clips_run_without_normalization() {
    let mut config = experiment_config();
    config.num_frames = 4;
    config.use_keypoints = serde_json::from_str("\"only\"").unwrap();

    let device = Default::default();
    let mut task = ClassificationTask::<TestBackend, MemorySink>::with_sink(
        &config,
        &device,
        MemorySink::new(),
    )
    .unwrap();
    let batch = VideoBatch::new(
        Tensor::random([2, 4, 32, 32, 1], Distribution::Uniform(0.0, 1.0), &device),
        Tensor::from_data(TensorData::new(vec![1i64, 0], [2]), &device),
    );
    let loss: f64 = task.training_step(&batch, 0).unwrap().into_scalar().elem();
    assert!(loss.is_finite());

    let rgb_batch = VideoBatch::new(
        Tensor::random([2, 4, 32, 32, 3], Distribution::Uniform(0.0, 1.0), &device),
        batch.labels.clone(),
    );
    assert!(matches!(
        task.training_step(&rgb_batch, 1),
        Err(GestureError::Training(_))
    ));
}
