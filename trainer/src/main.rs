use std::{env, io, sync::atomic::Ordering};

use log::{info, warn};
use tokio::{signal, task};

use trainer::{TrainConfig, TrainerBuilder, metrics::TrainMetrics};

const CONFIG_VAR: &str = "TRAIN_CONFIG";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1).or_else(|| env::var(CONFIG_VAR).ok()) {
        Some(path) => {
            info!("reading configuration from {path}");
            TrainConfig::from_path(&path).map_err(trainer::TrainErr::from)?
        }
        None => {
            warn!("no configuration given, training with the defaults");
            TrainConfig::default()
        }
    };

    info!(
        train_dir:? = config.train_dir,
        max_steps = config.max_steps,
        batch_size = config.batch_size,
        sub_batches = config.num_sub_batches_per_batch,
        devices = config.num_devices;
        "configured training"
    );

    let mut trainer = TrainerBuilder::new(config).build()?;
    let stop = trainer.stop_handle();
    let mut training = task::spawn_blocking(move || trainer.run());

    let metrics = tokio::select! {
        ret = &mut training => ret.map_err(io::Error::other)??,
        _ = signal::ctrl_c() => {
            info!("received interrupt, stopping after the current step");
            stop.store(true, Ordering::Relaxed);
            training.await.map_err(io::Error::other)??
        }
    };

    report(&metrics);
    Ok(())
}

fn report(metrics: &TrainMetrics) {
    info!(
        steps = metrics.steps,
        examples = metrics.examples,
        accumulate_time:? = metrics.accumulate_time,
        update_time:? = metrics.update_time;
        "training done"
    );
}
