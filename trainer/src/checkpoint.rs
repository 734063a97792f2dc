use std::{
    collections::HashMap,
    fs::{self, File},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use machine_learning::{
    MlErr, Tensor,
    averaging::ExponentialMovingAverage,
    optimization::GlobalStep,
    params::ParameterStore,
};
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};
use serde::{Deserialize, Serialize};

use crate::error::CheckpointErr;

/// The name of the file naming the checkpoints of a training directory.
pub const CHECKPOINT_INDEX: &str = "checkpoint";
/// The metadata key the global step is saved under.
pub const GLOBAL_STEP_KEY: &str = "global_step";

const DEFAULT_MAX_TO_KEEP: usize = 5;

type Result<T> = std::result::Result<T, CheckpointErr>;

/// Where the state of a training is saved to and read from.
pub trait CheckpointStore: Send {
    /// Saves every variable and moving average shadow.
    ///
    /// # Arguments
    /// * `step` - The loop step the checkpoint is named after.
    /// * `global_step` - The amount of updates applied so far.
    /// * `store` - The variables.
    /// * `averages` - The moving average shadows.
    ///
    /// # Returns
    /// The path of the new checkpoint.
    fn save(
        &mut self,
        step: u64,
        global_step: GlobalStep,
        store: &ParameterStore,
        averages: &ExponentialMovingAverage,
    ) -> Result<PathBuf>;

    /// Reads a checkpoint.
    fn load(&self, path: &Path) -> Result<Checkpoint>;

    /// Returns the path of the last saved checkpoint, if any.
    fn latest(&self) -> Result<Option<PathBuf>>;
}

/// A saved training state: named tensors and the global step they were saved at.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub global_step: GlobalStep,
    pub tensors: Vec<(String, Tensor)>,
}

impl Checkpoint {
    /// Restores every variable and shadow saved in the checkpoint.
    ///
    /// # Returns
    /// The global step to resume from, or an error if an entry doesn't belong to the model.
    pub fn restore(
        self,
        store: &mut ParameterStore,
        averages: &mut ExponentialMovingAverage,
    ) -> Result<GlobalStep> {
        for (name, value) in self.tensors {
            match store.lookup(&name) {
                Some(param) => store.assign(&param, value)?,
                None => {
                    if !averages.restore(store, &name, value)? {
                        return Err(CheckpointErr::Ml(MlErr::VariableNotDefined { name }));
                    }
                }
            }
        }

        Ok(self.global_step)
    }

    /// Initializes the restorable variables of `store` from the checkpoint.
    ///
    /// Entries that aren't restorable variables of the model are skipped, so are restorable
    /// variables missing from the checkpoint.
    ///
    /// # Returns
    /// The amount of variables restored.
    pub fn warm_start(self, store: &mut ParameterStore) -> Result<usize> {
        let mut restored = 0;
        let mut saved: HashMap<String, Tensor> = self.tensors.into_iter().collect();

        let restorable: Vec<_> = store
            .variables()
            .filter(|v| v.restore())
            .map(|v| v.param().clone())
            .collect();

        for param in restorable {
            match saved.remove(param.name()) {
                Some(value) => {
                    store.assign(&param, value)?;
                    restored += 1;
                }
                None => warn!(variable = param.name(); "missing from the pretrained checkpoint"),
            }
        }

        for name in saved.keys() {
            debug!(entry = name.as_str(); "skipped pretrained entry");
        }

        if !saved.is_empty() {
            warn!(skipped = saved.len(); "pretrained checkpoint entries not restored");
        }

        Ok(restored)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    latest: Option<String>,
    all: Vec<String>,
}

/// Saves checkpoints as `model.ckpt-{step}.safetensors` files in a training directory, keeping
/// the most recent ones listed in a json `checkpoint` index.
#[derive(Debug, Clone)]
pub struct SafetensorsCheckpoints {
    dir: PathBuf,
    max_to_keep: usize,
}

impl SafetensorsCheckpoints {
    /// Creates a new `SafetensorsCheckpoints`.
    ///
    /// # Arguments
    /// * `dir` - The training directory, created on the first save.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            max_to_keep: DEFAULT_MAX_TO_KEEP,
        }
    }

    /// Sets how many checkpoints are kept before the oldest ones are deleted.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    pub fn file_name(step: u64) -> String {
        format!("model.ckpt-{step}.safetensors")
    }

    fn read_index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(CHECKPOINT_INDEX);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }

        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        let file = File::create(self.dir.join(CHECKPOINT_INDEX))?;
        serde_json::to_writer_pretty(file, index)?;
        Ok(())
    }
}

fn to_bytes(tensor: &Tensor) -> Vec<u8> {
    let standard = tensor.as_standard_layout();
    match standard.as_slice() {
        Some(values) => bytemuck::cast_slice(values).to_vec(),
        None => standard.iter().flat_map(|v| v.to_ne_bytes()).collect(),
    }
}

fn from_bytes(name: &str, shape: &[usize], bytes: &[u8]) -> Result<Tensor> {
    let values = bytes
        .chunks_exact(size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect();

    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| CheckpointErr::Corrupt {
        name: name.to_string(),
    })
}

impl CheckpointStore for SafetensorsCheckpoints {
    fn save(
        &mut self,
        step: u64,
        global_step: GlobalStep,
        store: &ParameterStore,
        averages: &ExponentialMovingAverage,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let mut entries: Vec<(&str, Vec<usize>, Vec<u8>)> = store
            .variables()
            .map(|v| (v.name(), v.value().shape().to_vec(), to_bytes(v.value())))
            .collect();

        entries.extend(
            averages
                .shadows()
                .map(|(name, value)| (name, value.shape().to_vec(), to_bytes(value))),
        );

        let views = entries
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (*name, view))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let metadata = Some(HashMap::from([(
            GLOBAL_STEP_KEY.to_string(),
            global_step.get().to_string(),
        )]));

        let file_name = Self::file_name(step);
        let path = self.dir.join(&file_name);
        safetensors::serialize_to_file(views, &metadata, &path)?;

        let mut index = self.read_index()?;
        index.all.retain(|f| *f != file_name);
        index.all.push(file_name.clone());
        index.latest = Some(file_name);

        while index.all.len() > self.max_to_keep {
            let oldest = index.all.remove(0);
            if let Err(e) = fs::remove_file(self.dir.join(&oldest)) {
                warn!(file = oldest.as_str(), error:% = e; "couldn't delete old checkpoint");
            }
        }

        self.write_index(&index)?;

        info!(step = step, path:? = path; "saved checkpoint");
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<Checkpoint> {
        let bytes = fs::read(path)?;

        let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
        let global_step = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(GLOBAL_STEP_KEY))
            .and_then(|s| s.parse().ok())
            .map(GlobalStep::new)
            .ok_or_else(|| CheckpointErr::MissingStep {
                path: path.to_path_buf(),
            })?;

        let tensors = SafeTensors::deserialize(&bytes)?
            .tensors()
            .into_iter()
            .map(|(name, view)| {
                if view.dtype() != Dtype::F32 {
                    return Err(CheckpointErr::UnsupportedDtype { name });
                }

                let tensor = from_bytes(&name, view.shape(), view.data())?;
                Ok((name, tensor))
            })
            .collect::<Result<_>>()?;

        Ok(Checkpoint {
            global_step,
            tensors,
        })
    }

    fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.read_index()?.latest.map(|f| self.dir.join(f)))
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use machine_learning::{
        optimization::GlobalStep,
        params::{Initializer, ScopeMode, VariableScope},
    };
    use ndarray::arr1;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn model(store: &mut ParameterStore) {
        let mut rng = StdRng::seed_from_u64(0);
        let mut scope = VariableScope::new(store, &mut rng, ScopeMode::Define);

        scope.trainable("w", &[3], Initializer::ones()).unwrap();
        scope.statistic("mean", &[3], Initializer::zeros()).unwrap();
        scope
            .nested("logits")
            .restorable(false)
            .trainable("kernel", &[2], Initializer::ones())
            .unwrap();
    }

    #[test]
    fn saving_and_restoring_gives_back_the_state() {
        let dir = temp_dir("checkpoints-round-trip");
        let mut checkpoints = SafetensorsCheckpoints::new(&dir);

        let mut store = ParameterStore::new();
        model(&mut store);
        let w = store.lookup("w").unwrap();
        store.assign(&w, arr1(&[1., -2., 3.5]).into_dyn()).unwrap();

        let mut averages = ExponentialMovingAverage::new(0.9);
        averages
            .apply(&store, &store.trainable(), GlobalStep::new(0))
            .unwrap();

        let path = checkpoints
            .save(7, GlobalStep::new(8), &store, &averages)
            .unwrap();
        assert_eq!(checkpoints.latest().unwrap(), Some(path.clone()));
        assert!(path.ends_with("model.ckpt-7.safetensors"));

        let mut fresh = ParameterStore::new();
        model(&mut fresh);
        let mut fresh_averages = ExponentialMovingAverage::new(0.9);

        let checkpoint = checkpoints.load(&path).unwrap();
        let step = checkpoint.restore(&mut fresh, &mut fresh_averages).unwrap();

        assert_eq!(step, GlobalStep::new(8));
        assert_eq!(fresh.get(&w).unwrap(), store.get(&w).unwrap());
        assert_eq!(fresh_averages.len(), averages.len());
        assert_eq!(fresh_averages.average(&w), averages.average(&w));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn warm_start_skips_what_isnt_restorable() {
        let dir = temp_dir("checkpoints-warm-start");
        let mut checkpoints = SafetensorsCheckpoints::new(&dir);

        let mut store = ParameterStore::new();
        model(&mut store);
        for var in store.variables().map(|v| v.param().clone()).collect::<Vec<_>>() {
            let shape = store.get(&var).unwrap().shape().to_vec();
            store.assign(&var, ArrayD::from_elem(IxDyn(&shape), 5.)).unwrap();
        }

        let averages = ExponentialMovingAverage::new(0.9);
        let path = checkpoints
            .save(0, GlobalStep::new(1), &store, &averages)
            .unwrap();

        let mut fresh = ParameterStore::new();
        model(&mut fresh);
        let restored = checkpoints.load(&path).unwrap().warm_start(&mut fresh).unwrap();

        assert_eq!(restored, 2);
        let kernel = fresh.lookup("logits/kernel").unwrap();
        assert!(fresh.get(&kernel).unwrap().iter().all(|&v| v == 1.));
        let mean = fresh.lookup("mean").unwrap();
        assert!(fresh.get(&mean).unwrap().iter().all(|&v| v == 5.));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn only_the_latest_checkpoints_are_kept() {
        let dir = temp_dir("checkpoints-max-to-keep");
        let mut checkpoints = SafetensorsCheckpoints::new(&dir).with_max_to_keep(2);

        let mut store = ParameterStore::new();
        model(&mut store);
        let averages = ExponentialMovingAverage::new(0.9);

        for step in [0, 500, 1000] {
            checkpoints
                .save(step, GlobalStep::new(step + 1), &store, &averages)
                .unwrap();
        }

        assert!(!dir.join(SafetensorsCheckpoints::file_name(0)).exists());
        assert!(dir.join(SafetensorsCheckpoints::file_name(500)).exists());
        assert_eq!(
            checkpoints.latest().unwrap(),
            Some(dir.join(SafetensorsCheckpoints::file_name(1000)))
        );

        fs::remove_dir_all(&dir).unwrap();
    }
}
