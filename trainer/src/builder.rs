use std::{io, num::NonZeroU64};

use bridge::Structure;
use log::info;
use machine_learning::{
    arch::{Model, Sequential},
    averaging::{ExponentialMovingAverage, ScalarAverage},
    dataset::{DataSource, InMemoryDataset},
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer, RmsProp},
    params::ParameterStore,
    schedule::LearningRate,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::ThreadPoolBuilder;

use crate::{
    Result, Trainer,
    averager::AverageGradients,
    cadence::Cadence,
    checkpoint::{CheckpointStore, SafetensorsCheckpoints},
    config::{ConfigErr, DatasetConfig, OptimizerConfig, TrainConfig},
    driver::TrainerParts,
    summary::{JsonLinesSink, SummarySink},
    tower::TowerBuilder,
};

/// Builds `Trainer`s given a configuration.
///
/// Every collaborator is resolved from the configuration unless it's provided explicitly.
pub struct TrainerBuilder {
    config: TrainConfig,
    model: Option<Box<dyn Model>>,
    data: Option<Box<dyn DataSource>>,
    optimizer: Option<Box<dyn Optimizer>>,
    checkpoints: Option<Box<dyn CheckpointStore>>,
    summaries: Option<Box<dyn SummarySink>>,
}

impl TrainerBuilder {
    /// Creates a new `TrainerBuilder`.
    ///
    /// # Arguments
    /// * `config` - The configuration of the training.
    pub fn new(config: TrainConfig) -> Self {
        Self {
            config,
            model: None,
            data: None,
            optimizer: None,
            checkpoints: None,
            summaries: None,
        }
    }

    pub fn with_model(mut self, model: Box<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_data_source(mut self, data: Box<dyn DataSource>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_checkpoint_store(mut self, checkpoints: Box<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_summary_sink(mut self, summaries: Box<dyn SummarySink>) -> Self {
        self.summaries = Some(summaries);
        self
    }

    /// Builds a new `Trainer`.
    ///
    /// The configuration is validated before anything else, so an invalid one never gets to
    /// build a tower.
    ///
    /// # Returns
    /// The trainer, ready to run its first step.
    pub fn build(self) -> Result<Trainer> {
        let config = self.config;
        config.validate()?;

        let mut rng = Self::generate_rng(config.seed);

        let data = match self.data {
            Some(data) => data,
            None => Self::resolve_dataset(&config.dataset, rng.random())?,
        };

        let model = match self.model {
            Some(model) => model,
            None => Box::new(
                Sequential::new(
                    data.input_dim(),
                    config.model.layer_specs(),
                    data.num_classes(),
                )
                .fine_tune(config.fine_tune)
                .with_loss(config.model.loss.build())
                .with_logits_weight_decay(config.model.weight_decay),
            ),
        };

        let optimizer = self
            .optimizer
            .unwrap_or_else(|| Self::resolve_optimizer(config.optimizer));

        let checkpoints = match self.checkpoints {
            Some(checkpoints) => checkpoints,
            None => Box::new(SafetensorsCheckpoints::new(&config.train_dir)),
        };

        let summaries = match self.summaries {
            Some(summaries) => summaries,
            None => Box::new(JsonLinesSink::create(&config.train_dir)?),
        };

        let mut store = ParameterStore::new();
        let mut tower_builder = TowerBuilder::new();
        let towers = (0..config.num_devices)
            .map(|_| tower_builder.build(model.as_ref(), &mut store, &mut rng))
            .collect::<machine_learning::Result<Vec<_>>>()?;

        let template = Structure::Seq(
            towers
                .iter()
                .map(|tower| tower.output_template(&store))
                .collect::<machine_learning::Result<_>>()?,
        );
        let update = AverageGradients::build(&template, config.num_sub_batches_per_batch);

        if let Some(path) = &config.pretrained_checkpoint {
            let restored = checkpoints.load(path)?.warm_start(&mut store)?;
            info!(path:? = path, restored = restored; "pre-trained model restored");
        }

        let learning_rate = LearningRate::epoch_staircase(
            config.initial_learning_rate,
            data.num_examples_per_epoch(),
            config.batch_size,
            config.num_epochs_per_decay,
            config.learning_rate_decay_factor,
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_devices)
            .thread_name(|i| format!("device-{i}"))
            .build()
            .map_err(io::Error::other)?;

        let cadence = Cadence::new(
            non_zero(config.log_every, "log_every")?,
            non_zero(config.summary_every, "summary_every")?,
            non_zero(config.checkpoint_every, "checkpoint_every")?,
            config.max_steps,
        );

        info!(
            devices = config.num_devices,
            batch_size = config.batch_size,
            sub_batches = config.num_sub_batches_per_batch,
            variables = store.len(),
            scalars = store.num_scalars(),
            train_dir:? = config.train_dir;
            "built trainer"
        );

        Ok(Trainer::new(TrainerParts {
            towers,
            store,
            update,
            data,
            optimizer,
            checkpoints,
            summaries,
            learning_rate,
            averages: ExponentialMovingAverage::new(config.moving_average_decay),
            averaging_policy: config.averaging_policy(),
            loss_average: ScalarAverage::new(config.loss_average_decay),
            cadence,
            pool,
            num_sub_batches: config.num_sub_batches_per_batch,
            sub_batch_size: config.sub_batch_size(),
        }))
    }

    fn resolve_dataset(spec: &DatasetConfig, seed: u64) -> Result<Box<dyn DataSource>> {
        let dataset = match spec {
            DatasetConfig::Synthetic {
                num_examples,
                input_dim,
                num_classes,
            } => InMemoryDataset::synthetic(*num_examples, *input_dim, *num_classes, seed)?,
            DatasetConfig::Csv { path, num_classes } => {
                InMemoryDataset::from_csv(path, *num_classes, seed)?
            }
        };

        info!(examples = dataset.len(), input_dim = dataset.input_dim(); "loaded dataset");
        Ok(Box::new(dataset))
    }

    fn resolve_optimizer(spec: OptimizerConfig) -> Box<dyn Optimizer> {
        match spec {
            OptimizerConfig::GradientDescent => Box::new(GradientDescent::new()),
            OptimizerConfig::Momentum { momentum } => {
                Box::new(GradientDescentWithMomentum::new(momentum))
            }
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(beta1, beta2, epsilon)),
            OptimizerConfig::RmsProp {
                decay,
                momentum,
                epsilon,
            } => Box::new(RmsProp::new(decay, momentum, epsilon)),
        }
    }

    fn generate_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

fn non_zero(value: u64, field: &'static str) -> std::result::Result<NonZeroU64, ConfigErr> {
    NonZeroU64::new(value).ok_or(ConfigErr::ZeroSize { field })
}
