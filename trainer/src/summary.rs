use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use machine_learning::Tensor;
use serde::Serialize;

/// The file summaries are appended to inside the training directory.
pub const SUMMARY_FILE: &str = "summaries.jsonl";

const NUM_BUCKETS: usize = 10;

/// Where the periodic summaries of a training go.
pub trait SummarySink: Send {
    /// Records a scalar.
    fn scalar(&mut self, tag: &str, step: u64, value: f32) -> io::Result<()>;

    /// Records the distribution of the values of a tensor.
    fn histogram(&mut self, tag: &str, step: u64, values: &Tensor) -> io::Result<()>;

    /// Makes sure everything recorded so far has been written.
    fn flush(&mut self) -> io::Result<()>;
}

/// The distribution of a tensor in equally wide buckets between its extremes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub count: usize,
    pub buckets: Vec<usize>,
}

impl Histogram {
    pub fn of(values: &Tensor) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                min: 0.,
                max: 0.,
                mean: 0.,
                count,
                buckets: vec![0; NUM_BUCKETS],
            };
        }

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let width = (max - min) / NUM_BUCKETS as f32;

        let mut buckets = vec![0; NUM_BUCKETS];
        for &v in values {
            let i = if width > 0. {
                ((v - min) / width) as usize
            } else {
                0
            };
            buckets[i.min(NUM_BUCKETS - 1)] += 1;
        }

        Self {
            min,
            max,
            mean: values.sum() / count as f32,
            count,
            buckets,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Scalar {
        tag: &'a str,
        step: u64,
        value: f32,
    },
    Histogram {
        tag: &'a str,
        step: u64,
        #[serde(flatten)]
        histogram: Histogram,
    },
}

/// Appends one json object per summary to `summaries.jsonl`.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Opens the summary file of a training directory, creating the directory if needed.
    pub fn create<P: AsRef<Path>>(train_dir: P) -> io::Result<Self> {
        fs::create_dir_all(&train_dir)?;

        let path = train_dir.as_ref().join(SUMMARY_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, record: &Record<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")
    }
}

impl SummarySink for JsonLinesSink {
    fn scalar(&mut self, tag: &str, step: u64, value: f32) -> io::Result<()> {
        self.write(&Record::Scalar { tag, step, value })
    }

    fn histogram(&mut self, tag: &str, step: u64, values: &Tensor) -> io::Result<()> {
        let histogram = Histogram::of(values);
        self.write(&Record::Histogram {
            tag,
            step,
            histogram,
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
