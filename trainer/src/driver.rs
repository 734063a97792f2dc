use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bridge::{Leaf, Structure};
use log::{debug, info};
use machine_learning::{
    Tensor,
    averaging::{AveragingPolicy, ExponentialMovingAverage, ScalarAverage},
    dataset::DataSource,
    optimization::{GlobalStep, Optimizer},
    params::ParameterStore,
    schedule::LearningRate,
};
use rayon::{ThreadPool, prelude::*};

use crate::{
    Result, TrainErr,
    averager::AverageGradients,
    cadence::Cadence,
    checkpoint::CheckpointStore,
    metrics::{Throughput, TrainMetrics},
    summary::SummarySink,
    tower::{Tower, TowerOutput},
};

/// What a single step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: u64,
    /// The mean loss over every tower of every sub-batch.
    pub loss: f32,
    pub learning_rate: f32,
    pub duration: Duration,
}

/// The pieces a `Trainer` drives, assembled by the `TrainerBuilder`.
pub struct TrainerParts {
    pub towers: Vec<Tower>,
    pub store: ParameterStore,
    pub update: AverageGradients,
    pub data: Box<dyn DataSource>,
    pub optimizer: Box<dyn Optimizer>,
    pub checkpoints: Box<dyn CheckpointStore>,
    pub summaries: Box<dyn SummarySink>,
    pub learning_rate: LearningRate,
    pub averages: ExponentialMovingAverage,
    pub averaging_policy: AveragingPolicy,
    pub loss_average: ScalarAverage,
    pub cadence: Cadence,
    pub pool: ThreadPool,
    pub num_sub_batches: usize,
    pub sub_batch_size: usize,
}

/// Drives the synchronous training loop.
///
/// Every step runs the towers over `num_sub_batches` sub-batches, averages all of their
/// gradients in a single update, refreshes the moving averages and reports the loss. The
/// variables only change between sub-batches through the batch norm statistics, and through the
/// update once per step.
pub struct Trainer {
    towers: Vec<Tower>,
    store: ParameterStore,
    update: AverageGradients,
    data: Box<dyn DataSource>,
    optimizer: Box<dyn Optimizer>,
    checkpoints: Box<dyn CheckpointStore>,
    summaries: Box<dyn SummarySink>,
    learning_rate: LearningRate,
    global_step: GlobalStep,
    averages: ExponentialMovingAverage,
    averaging_policy: AveragingPolicy,
    loss_average: ScalarAverage,
    cadence: Cadence,
    pool: ThreadPool,
    num_sub_batches: usize,
    sub_batch_size: usize,
    start_step: u64,
    metrics: TrainMetrics,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(parts: TrainerParts) -> Self {
        Self {
            towers: parts.towers,
            store: parts.store,
            update: parts.update,
            data: parts.data,
            optimizer: parts.optimizer,
            checkpoints: parts.checkpoints,
            summaries: parts.summaries,
            learning_rate: parts.learning_rate,
            global_step: GlobalStep::default(),
            averages: parts.averages,
            averaging_policy: parts.averaging_policy,
            loss_average: parts.loss_average,
            cadence: parts.cadence,
            pool: parts.pool,
            num_sub_batches: parts.num_sub_batches,
            sub_batch_size: parts.sub_batch_size,
            start_step: 0,
            metrics: TrainMetrics::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn global_step(&self) -> GlobalStep {
        self.global_step
    }

    pub fn averages(&self) -> &ExponentialMovingAverage {
        &self.averages
    }

    pub fn metrics(&self) -> &TrainMetrics {
        &self.metrics
    }

    /// Returns the flag that makes `run` return before its next step once it's set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Resumes from a checkpoint written by this trainer's checkpoint store.
    ///
    /// Every variable and moving average is restored, the loop continues after the last
    /// update the checkpoint saw.
    pub fn restore(&mut self, path: &Path) -> Result<()> {
        let checkpoint = self.checkpoints.load(path)?;
        self.global_step = checkpoint.restore(&mut self.store, &mut self.averages)?;
        self.start_step = self.global_step.get();

        info!(step = self.start_step, path:? = path; "restored checkpoint");
        Ok(())
    }

    /// Runs every remaining step, or until the stop flag is set.
    ///
    /// The flag is checked between steps, a step that already started always completes.
    ///
    /// # Returns
    /// The metrics of the run, or the error that stopped it.
    pub fn run(&mut self) -> Result<TrainMetrics> {
        info!(
            from = self.start_step,
            to = self.cadence.max_steps,
            devices = self.towers.len(),
            sub_batches = self.num_sub_batches;
            "starting training"
        );

        for step in self.start_step..self.cadence.max_steps {
            if self.stop.load(Ordering::Relaxed) {
                info!(step = step; "stopping before step {step}");
                break;
            }

            self.step(step)?;
        }

        Ok(self.metrics.clone())
    }

    /// Runs a single step.
    pub fn step(&mut self, step: u64) -> Result<StepReport> {
        let start = Instant::now();

        let sub_batches = self.accumulate(step)?;
        let accumulated = Instant::now();

        let learning_rate = self.learning_rate.at(self.global_step);
        let feed = self.update.feed(&sub_batches)?;
        debug!(step = step, fed = feed.len(); "applying averaged gradients");

        let losses = self.update.run(
            feed,
            self.optimizer.as_mut(),
            &mut self.store,
            learning_rate,
            &mut self.global_step,
        )?;

        let vars = self.averaging_policy.select(&self.store);
        self.averages.apply(&self.store, &vars, self.global_step)?;

        let loss = losses.iter().sum::<f32>() / losses.len().max(1) as f32;
        if loss.is_nan() {
            return Err(TrainErr::Divergence { step, loss });
        }
        self.loss_average.update(loss);

        let duration = start.elapsed();
        self.metrics.accumulate_time += accumulated - start;
        self.metrics.update_time += duration - (accumulated - start);
        self.metrics.bump_step();

        let batch_size = self.sub_batch_size * self.num_sub_batches;
        self.metrics.add_examples(batch_size);

        if self.cadence.should_log(step) {
            let t = Throughput::new(batch_size, duration);
            info!(
                step = step,
                loss = loss,
                examples_per_sec = t.examples_per_sec,
                sec_per_batch = t.sec_per_batch;
                "step {step}, loss = {loss:.2} ({:.1} examples/sec; {:.3} sec/batch)",
                t.examples_per_sec,
                t.sec_per_batch
            );
        }

        if self.cadence.should_summarize(step) {
            self.summarize(step, learning_rate, loss)?;
        }

        if self.cadence.should_checkpoint(step) {
            self.checkpoints
                .save(step, self.global_step, &self.store, &self.averages)?;
        }

        Ok(StepReport {
            step,
            loss,
            learning_rate,
            duration,
        })
    }

    /// Runs every tower over every sub-batch of a step.
    ///
    /// Towers run in parallel, one per device, and only read the variables. The batch norm
    /// updates they produce are applied once all of them are done.
    ///
    /// # Returns
    /// The outputs of every sub-batch, each a sequence with the output of every tower.
    fn accumulate(&mut self, step: u64) -> Result<Vec<Structure<Leaf<Tensor>>>> {
        let mut sub_batches = Vec::with_capacity(self.num_sub_batches);

        for sub_batch in 0..self.num_sub_batches {
            let splits = self
                .data
                .next_splits(self.sub_batch_size, self.towers.len())?;

            let store = &self.store;
            let towers = &mut self.towers;
            let outputs = self.pool.install(|| {
                towers
                    .par_iter_mut()
                    .zip(splits.par_iter())
                    .map(|(tower, split)| tower.run(store, split))
                    .collect::<machine_learning::Result<Vec<TowerOutput>>>()
            })?;

            for output in &outputs {
                for update in &output.statistic_updates {
                    self.store.apply_statistic_update(update)?;
                }
            }

            debug!(step = step, sub_batch = sub_batch, towers = outputs.len(); "ran towers");
            sub_batches.push(Structure::Seq(
                outputs.iter().map(TowerOutput::to_values).collect(),
            ));
        }

        self.metrics.add_sub_batches(self.num_sub_batches);
        Ok(sub_batches)
    }

    fn summarize(&mut self, step: u64, learning_rate: f32, loss: f32) -> Result<()> {
        let sink = &mut self.summaries;

        sink.scalar("learning_rate", step, learning_rate)?;
        sink.scalar("total_loss (raw)", step, loss)?;
        sink.scalar("total_loss", step, self.loss_average.value())?;

        let last = self.towers.last().map(Tower::summaries).unwrap_or_default();
        for (tag, value) in last {
            sink.scalar(&tag, step, value)?;
        }

        for param in self.store.trainable() {
            sink.histogram(param.name(), step, self.store.get(&param)?)?;
        }

        sink.flush()?;
        debug!(step = step; "wrote summaries");
        Ok(())
    }
}
