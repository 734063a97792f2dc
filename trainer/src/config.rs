use std::{
    error::Error,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use machine_learning::{
    arch::{
        activations::ActFn,
        layers::LayerSpec,
        loss::{Loss, Mse, SoftmaxCrossEntropy},
    },
    averaging::AveragingPolicy,
};
use serde::{Deserialize, Serialize};

/// Everything a training run is parameterized by, defaulted to the reference values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Where checkpoints and summaries are written.
    pub train_dir: PathBuf,
    pub max_steps: u64,
    /// How many sequential sub-batches make up one logical batch.
    pub num_sub_batches_per_batch: usize,
    pub num_devices: usize,
    pub batch_size: usize,
    pub initial_learning_rate: f32,
    pub num_epochs_per_decay: f32,
    pub learning_rate_decay_factor: f32,
    pub optimizer: OptimizerConfig,
    pub moving_average_decay: f32,
    pub loss_average_decay: f32,
    /// Restorable variables are loaded from this checkpoint before the first step.
    pub pretrained_checkpoint: Option<PathBuf>,
    /// Trains the logits from scratch when warm starting.
    pub fine_tune: bool,
    pub averaging_policy: AveragingConfig,
    pub log_every: u64,
    pub summary_every: u64,
    pub checkpoint_every: u64,
    pub seed: Option<u64>,
    pub model: ModelConfig,
    pub dataset: DatasetConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("/tmp/imagenet_train"),
            max_steps: 10_000_000,
            num_sub_batches_per_batch: 1,
            num_devices: 1,
            batch_size: 32,
            initial_learning_rate: 0.1,
            num_epochs_per_decay: 30.,
            learning_rate_decay_factor: 0.16,
            optimizer: OptimizerConfig::default(),
            moving_average_decay: 0.9999,
            loss_average_decay: 0.9,
            pretrained_checkpoint: None,
            fine_tune: false,
            averaging_policy: AveragingConfig::default(),
            log_every: 10,
            summary_every: 100,
            checkpoint_every: 500,
            seed: None,
            model: ModelConfig::default(),
            dataset: DatasetConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Reads a configuration from a json file, absent fields take their default value.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigErr> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Returns the amount of examples every sub-batch is made of.
    pub fn sub_batch_size(&self) -> usize {
        self.batch_size / self.num_sub_batches_per_batch.max(1)
    }

    /// Returns the amount of examples every device gets per sub-batch.
    pub fn split_size(&self) -> usize {
        self.sub_batch_size() / self.num_devices.max(1)
    }

    /// Checks that the configuration describes a runnable training.
    ///
    /// # Returns
    /// The first problem found, if any.
    pub fn validate(&self) -> Result<(), ConfigErr> {
        let sizes = [
            ("max_steps", self.max_steps as usize),
            ("num_sub_batches_per_batch", self.num_sub_batches_per_batch),
            ("num_devices", self.num_devices),
            ("batch_size", self.batch_size),
            ("log_every", self.log_every as usize),
            ("summary_every", self.summary_every as usize),
            ("checkpoint_every", self.checkpoint_every as usize),
        ];

        if let Some(&(field, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(ConfigErr::ZeroSize { field });
        }

        if self.batch_size % self.num_sub_batches_per_batch != 0 {
            return Err(ConfigErr::SubBatchDivisibility {
                batch_size: self.batch_size,
                num_sub_batches: self.num_sub_batches_per_batch,
            });
        }

        if self.sub_batch_size() % self.num_devices != 0 {
            return Err(ConfigErr::DeviceDivisibility {
                sub_batch_size: self.sub_batch_size(),
                num_devices: self.num_devices,
            });
        }

        let decays = [
            ("moving_average_decay", self.moving_average_decay),
            ("loss_average_decay", self.loss_average_decay),
            ("learning_rate_decay_factor", self.learning_rate_decay_factor),
        ];

        if let Some(&(field, value)) = decays.iter().find(|(_, d)| !(0. ..=1.).contains(d)) {
            return Err(ConfigErr::OutOfRange { field, value });
        }

        self.optimizer.validate()?;
        self.model.validate()?;
        self.dataset.validate()
    }

    pub fn averaging_policy(&self) -> AveragingPolicy {
        match self.averaging_policy {
            AveragingConfig::TrainableOnly => AveragingPolicy::TrainableOnly,
            AveragingConfig::WithBatchNormStatistics => AveragingPolicy::WithBatchNormStatistics,
        }
    }
}

/// The update rule and its hyper parameters, the learning rate comes from the schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerConfig {
    GradientDescent,
    Momentum { momentum: f32 },
    Adam { beta1: f32, beta2: f32, epsilon: f32 },
    RmsProp { decay: f32, momentum: f32, epsilon: f32 },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::RmsProp {
            decay: 0.9,
            momentum: 0.9,
            epsilon: 1.,
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<(), ConfigErr> {
        let (field, value) = match *self {
            Self::GradientDescent => return Ok(()),
            Self::Momentum { momentum } => ("momentum", momentum),
            Self::Adam { epsilon, .. } => ("epsilon", epsilon),
            Self::RmsProp { epsilon, .. } => ("epsilon", epsilon),
        };

        if !value.is_finite() || value < 0. {
            return Err(ConfigErr::OutOfRange { field, value });
        }

        Ok(())
    }
}

/// Which variables get a moving average.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AveragingConfig {
    TrainableOnly,
    #[default]
    WithBatchNormStatistics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFnConfig {
    Sigmoid { amp: f32 },
    Relu,
}

impl ActFnConfig {
    fn build(self) -> ActFn {
        match self {
            Self::Sigmoid { amp } => ActFn::sigmoid(amp),
            Self::Relu => ActFn::relu(),
        }
    }
}

/// The loss the logits are trained against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossConfig {
    #[default]
    SoftmaxCrossEntropy,
    Mse,
}

impl LossConfig {
    pub fn build(self) -> Loss {
        match self {
            Self::SoftmaxCrossEntropy => Loss::SoftmaxCrossEntropy(SoftmaxCrossEntropy),
            Self::Mse => Loss::Mse(Mse::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerConfig {
    Dense {
        units: usize,
        act_fn: Option<ActFnConfig>,
    },
    BatchNorm,
}

/// The hidden layers of the classifier, its logits layer is always added on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub layers: Vec<LayerConfig>,
    /// The L2 penalty of every dense kernel.
    pub weight_decay: f32,
    pub loss: LossConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let relu = Some(ActFnConfig::Relu);

        Self {
            layers: vec![
                LayerConfig::Dense {
                    units: 64,
                    act_fn: relu,
                },
                LayerConfig::BatchNorm,
                LayerConfig::Dense {
                    units: 32,
                    act_fn: relu,
                },
            ],
            weight_decay: 4e-5,
            loss: LossConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Returns the specs of the hidden layers.
    pub fn layer_specs(&self) -> Vec<LayerSpec> {
        self.layers
            .iter()
            .map(|layer| match *layer {
                LayerConfig::Dense { units, act_fn } => LayerSpec::Dense {
                    units,
                    act_fn: act_fn.map(ActFnConfig::build),
                    weight_decay: self.weight_decay,
                },
                LayerConfig::BatchNorm => LayerSpec::batch_norm(),
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigErr> {
        let empty = self
            .layers
            .iter()
            .any(|l| matches!(l, LayerConfig::Dense { units: 0, .. }));

        if empty {
            return Err(ConfigErr::ZeroSize {
                field: "model.layers.units",
            });
        }

        if self.weight_decay < 0. {
            return Err(ConfigErr::OutOfRange {
                field: "model.weight_decay",
                value: self.weight_decay,
            });
        }

        Ok(())
    }
}

/// Where the examples come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetConfig {
    Synthetic {
        num_examples: usize,
        input_dim: usize,
        num_classes: usize,
    },
    Csv {
        path: PathBuf,
        num_classes: usize,
    },
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::Synthetic {
            num_examples: 1024,
            input_dim: 16,
            num_classes: 10,
        }
    }
}

impl DatasetConfig {
    fn validate(&self) -> Result<(), ConfigErr> {
        let sizes = match self {
            Self::Synthetic {
                num_examples,
                input_dim,
                num_classes,
            } => vec![
                ("dataset.num_examples", *num_examples),
                ("dataset.input_dim", *input_dim),
                ("dataset.num_classes", *num_classes),
            ],
            Self::Csv { num_classes, .. } => vec![("dataset.num_classes", *num_classes)],
        };

        match sizes.into_iter().find(|(_, size)| *size == 0) {
            Some((field, _)) => Err(ConfigErr::ZeroSize { field }),
            None => Ok(()),
        }
    }
}

/// An invalid configuration, always detected before any tower is built.
#[derive(Debug)]
pub enum ConfigErr {
    ZeroSize {
        field: &'static str,
    },
    SubBatchDivisibility {
        batch_size: usize,
        num_sub_batches: usize,
    },
    DeviceDivisibility {
        sub_batch_size: usize,
        num_devices: usize,
    },
    OutOfRange {
        field: &'static str,
        value: f32,
    },
    Parse(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::ZeroSize { field } => write!(f, "{field} must be greater than zero"),
            ConfigErr::SubBatchDivisibility {
                batch_size,
                num_sub_batches,
            } => write!(
                f,
                "batch size {batch_size} can't be split into {num_sub_batches} equal sub-batches"
            ),
            ConfigErr::DeviceDivisibility {
                sub_batch_size,
                num_devices,
            } => write!(
                f,
                "sub-batch size {sub_batch_size} must be a multiple of the {num_devices} devices"
            ),
            ConfigErr::OutOfRange { field, value } => {
                write!(f, "{field} = {value} is out of range")
            }
            ConfigErr::Parse(e) => write!(f, "malformed configuration: {e}"),
            ConfigErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Parse(e) => Some(e),
            ConfigErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}
