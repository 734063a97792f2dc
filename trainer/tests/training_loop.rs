use std::{
    env, fs, io,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use machine_learning::{
    GradientSet, Result as MlResult, Tensor,
    arch::{Model, Replica, ReplicaOutput},
    dataset::Split,
    optimization::GlobalStep,
    params::{Initializer, ParamRef, ParameterStore, VariableScope},
};
use ndarray::{ArrayD, IxDyn};
use trainer::{
    TrainConfig, TrainErr, TrainerBuilder,
    checkpoint::{CheckpointStore, SafetensorsCheckpoints},
    config::{DatasetConfig, OptimizerConfig},
    summary::SummarySink,
};

fn temp_dir(name: &str) -> PathBuf {
    let dir = env::temp_dir().join(format!("{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn small_config(train_dir: PathBuf) -> TrainConfig {
    TrainConfig {
        train_dir,
        max_steps: 3,
        batch_size: 8,
        num_sub_batches_per_batch: 2,
        num_devices: 2,
        initial_learning_rate: 0.01,
        optimizer: OptimizerConfig::GradientDescent,
        log_every: 1,
        summary_every: 2,
        checkpoint_every: 2,
        seed: Some(7),
        dataset: DatasetConfig::Synthetic {
            num_examples: 64,
            input_dim: 4,
            num_classes: 3,
        },
        ..Default::default()
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    scalars: Arc<Mutex<Vec<(String, u64)>>>,
    histograms: Arc<Mutex<Vec<(String, u64)>>>,
}

impl SummarySink for RecordingSink {
    fn scalar(&mut self, tag: &str, step: u64, _value: f32) -> io::Result<()> {
        self.scalars.lock().unwrap().push((tag.to_string(), step));
        Ok(())
    }

    fn histogram(&mut self, tag: &str, step: u64, _values: &Tensor) -> io::Result<()> {
        self.histograms.lock().unwrap().push((tag.to_string(), step));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sets the stop flag of a trainer the first time summaries are flushed.
#[derive(Clone, Default)]
struct StoppingSink {
    stop: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl SummarySink for StoppingSink {
    fn scalar(&mut self, _tag: &str, _step: u64, _value: f32) -> io::Result<()> {
        Ok(())
    }

    fn histogram(&mut self, _tag: &str, _step: u64, _values: &Tensor) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(stop) = self.stop.lock().unwrap().as_ref() {
            stop.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// A model whose loss is never a number.
struct Diverging;

struct DivergingReplica {
    trainable: Vec<ParamRef>,
}

impl Model for Diverging {
    fn build(&self, scope: &mut VariableScope<'_>) -> MlResult<Box<dyn Replica>> {
        let w = scope.trainable("w", &[1], Initializer::zeros())?;
        Ok(Box::new(DivergingReplica { trainable: vec![w] }))
    }
}

impl Replica for DivergingReplica {
    fn trainable(&self) -> &[ParamRef] {
        &self.trainable
    }

    fn forward_backward(
        &mut self,
        _store: &ParameterStore,
        _split: &Split,
    ) -> MlResult<ReplicaOutput> {
        let grads = GradientSet::from_pairs(vec![(
            ArrayD::zeros(IxDyn(&[1])),
            self.trainable[0].clone(),
        )]);

        Ok(ReplicaOutput {
            loss: f32::NAN,
            grads,
            statistic_updates: Vec::new(),
        })
    }

    fn summaries(&self) -> Vec<(String, f32)> {
        Vec::new()
    }
}

#[test]
fn runs_every_step_and_follows_the_cadence() {
    let dir = temp_dir("trainer-cadence");
    let sink = RecordingSink::default();

    let mut trainer = TrainerBuilder::new(small_config(dir.clone()))
        .with_summary_sink(Box::new(sink.clone()))
        .build()
        .unwrap();

    let metrics = trainer.run().unwrap();

    assert_eq!(metrics.steps, 3);
    assert_eq!(metrics.sub_batches, 6);
    assert_eq!(metrics.examples, 24);
    assert_eq!(trainer.global_step(), GlobalStep::new(3));
    assert!(!trainer.averages().is_empty());

    let scalars = sink.scalars.lock().unwrap();
    let steps: Vec<u64> = scalars
        .iter()
        .filter(|(tag, _)| tag == "total_loss")
        .map(|&(_, step)| step)
        .collect();
    assert_eq!(steps, [0, 2]);
    assert!(scalars.iter().any(|(tag, _)| tag == "learning_rate"));
    assert!(!sink.histograms.lock().unwrap().is_empty());

    assert!(dir.join(SafetensorsCheckpoints::file_name(0)).exists());
    assert!(!dir.join(SafetensorsCheckpoints::file_name(1)).exists());
    assert!(dir.join(SafetensorsCheckpoints::file_name(2)).exists());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn resumes_from_the_latest_checkpoint() {
    let dir = temp_dir("trainer-resume");

    let mut first = TrainerBuilder::new(small_config(dir.clone()))
        .with_summary_sink(Box::new(RecordingSink::default()))
        .build()
        .unwrap();
    first.run().unwrap();

    let latest = SafetensorsCheckpoints::new(&dir).latest().unwrap().unwrap();

    let config = TrainConfig {
        max_steps: 5,
        ..small_config(dir.clone())
    };
    let mut second = TrainerBuilder::new(config)
        .with_summary_sink(Box::new(RecordingSink::default()))
        .build()
        .unwrap();
    second.restore(&latest).unwrap();

    assert_eq!(second.global_step(), GlobalStep::new(3));
    for var in first.store().variables() {
        let param = second.store().lookup(var.name()).unwrap();
        assert_eq!(second.store().get(&param).unwrap(), var.value());
    }

    let metrics = second.run().unwrap();
    assert_eq!(metrics.steps, 2);
    assert_eq!(second.global_step(), GlobalStep::new(5));

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn a_set_stop_flag_prevents_any_step() {
    let dir = temp_dir("trainer-stopped");
    let mut trainer = TrainerBuilder::new(small_config(dir.clone()))
        .with_summary_sink(Box::new(RecordingSink::default()))
        .build()
        .unwrap();

    trainer.stop_handle().store(true, Ordering::Relaxed);
    let metrics = trainer.run().unwrap();

    assert_eq!(metrics.steps, 0);
    assert_eq!(trainer.global_step(), GlobalStep::new(0));
    assert_eq!(SafetensorsCheckpoints::new(&dir).latest().unwrap(), None);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn stopping_mid_run_finishes_the_current_step() {
    let dir = temp_dir("trainer-interrupted");
    let sink = StoppingSink::default();

    let mut trainer = TrainerBuilder::new(small_config(dir.clone()))
        .with_summary_sink(Box::new(sink.clone()))
        .build()
        .unwrap();
    *sink.stop.lock().unwrap() = Some(trainer.stop_handle());

    let metrics = trainer.run().unwrap();

    assert_eq!(metrics.steps, 1);
    assert_eq!(trainer.global_step(), GlobalStep::new(1));
    assert_eq!(
        SafetensorsCheckpoints::new(&dir).latest().unwrap(),
        Some(dir.join(SafetensorsCheckpoints::file_name(0)))
    );

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn a_nan_loss_stops_training_before_checkpointing() {
    let dir = temp_dir("trainer-divergence");
    let config = TrainConfig {
        checkpoint_every: 1,
        ..small_config(dir.clone())
    };

    let mut trainer = TrainerBuilder::new(config)
        .with_model(Box::new(Diverging))
        .with_summary_sink(Box::new(RecordingSink::default()))
        .build()
        .unwrap();

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainErr::Divergence { step: 0, .. }));

    let checkpoints = SafetensorsCheckpoints::new(&dir);
    assert_eq!(checkpoints.latest().unwrap(), None);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn invalid_configurations_surface_as_invalid_input() {
    let dir = temp_dir("trainer-invalid");
    let config = TrainConfig {
        num_sub_batches_per_batch: 3,
        ..small_config(dir)
    };

    let err: io::Error = TrainerBuilder::new(config).build().err().unwrap().into();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}
