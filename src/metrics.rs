//! Loss smoothing and per-image timing records.
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Mean of the last `window` batch losses.
#[derive(Debug, Clone)]
pub struct RunningLoss {
    values: Vec<f64>,
    window: usize,
    pos: usize,
}

impl RunningLoss {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        RunningLoss { values: Vec::with_capacity(window), window, pos: 0 }
    }

    pub fn push(&mut self, loss: f64) {
        if self.values.len() < self.window {
            self.values.push(loss);
        } else {
            self.values[self.pos] = loss;
            self.pos = (self.pos + 1) % self.window;
        }
    }

    /// Returns NaN when no loss was recorded yet.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// `timeRecords.txt` writer: a header line then `filename elapsed_ms` per image.
pub struct TimingLog {
    out: BufWriter<File>,
}

impl TimingLog {
    pub const FILE_NAME: &'static str = "timeRecords.txt";

    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "# filename time[ms]")?;
        Ok(TimingLog { out })
    }

    pub fn record(&mut self, filename: &str, elapsed: std::time::Duration) -> Result<()> {
        writeln!(self.out, "{} {:.6}", filename, elapsed.as_secs_f64() * 1000.)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RunningLoss;

    #[test]
    fn window_replaces_oldest() {
        let mut l = RunningLoss::new(3);
        assert!(l.mean().is_nan());
        l.push(1.);
        l.push(2.);
        assert_eq!(l.mean(), 1.5);
        l.push(3.);
        l.push(7.);
        assert_eq!(l.len(), 3);
        assert_eq!(l.mean(), 4.);
        l.push(8.);
        assert_eq!(l.mean(), 6.);
    }
}
