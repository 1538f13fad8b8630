/// Memory-bounded run writer.
///
/// Buffers incoming points until the estimated footprint reaches the memory
/// cap, then sorts the same batch once per axis and flushes each copy as a
/// run file. Every new run is handed to that axis's merge scheduler.
use crate::error::{BuildError, Result};
use crate::point::{Axis, Point3, PointRecord};
use crate::progress::ProgressObserver;
use crate::run_file::{RunFile, write_run};
use constants::build_settings::BYTES_PER_BUFFERED_POINT;
use crossbeam_channel::Sender;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Message on a per-axis run queue. `Sealed` is sent once the input is
/// exhausted; a queue that disconnects without it belongs to a failed split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunQueueMessage {
    Run(RunFile),
    Sealed,
}

/// Summary of the split phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSummary {
    pub points: u32,
    pub runs_per_axis: u32,
}

pub struct RunWriter<'a> {
    work_dir: PathBuf,
    memory_cap_bytes: u64,
    buffer: Vec<PointRecord>,
    next_id: u32,
    runs_written: u32,
    queues: [Sender<RunQueueMessage>; 3],
    observer: &'a dyn ProgressObserver,
}

impl<'a> RunWriter<'a> {
    pub fn new(
        work_dir: &Path,
        memory_cap_bytes: u64,
        queues: [Sender<RunQueueMessage>; 3],
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
            memory_cap_bytes,
            buffer: Vec::new(),
            next_id: 0,
            runs_written: 0,
            queues,
            observer,
        }
    }

    /// Bytes the buffered batch is expected to occupy once flushed.
    pub fn estimated_footprint(&self) -> u64 {
        self.buffer.len() as u64 * BYTES_PER_BUFFERED_POINT
    }

    /// Assigns the next id to `point` and buffers it, flushing when the
    /// memory cap is reached.
    pub fn push(&mut self, point: Point3) -> Result<u32> {
        let id = self.next_id;
        if !point.is_finite() {
            return Err(BuildError::InvalidPoint { id });
        }
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| BuildError::config("point count exceeds u32 ids"))?;

        self.buffer.push(PointRecord::new(id, point));
        if self.estimated_footprint() >= self.memory_cap_bytes {
            log::debug!(
                "memory cap reached with {} buffered points",
                self.buffer.len()
            );
            self.flush()?;
        }
        Ok(id)
    }

    fn run_path(&self, axis: Axis) -> PathBuf {
        self.work_dir
            .join(format!("{}_run{}.bin", axis.name(), self.runs_written))
    }

    /// Sorts the buffered batch along each axis in parallel and writes one
    /// run per axis. All three runs cover the same ids.
    fn flush(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.buffer);
        let paths = Axis::ALL.map(|axis| self.run_path(axis));

        let runs = Axis::ALL
            .par_iter()
            .map(|&axis| {
                let mut sorted = batch.clone();
                sorted.sort_by(|a, b| a.cmp_on(b, axis));
                write_run(&paths[axis.index()], axis, &sorted)
            })
            .collect::<Result<Vec<RunFile>>>()?;

        self.runs_written += 1;
        for run in runs {
            let axis = run.axis;
            let records = run.count;
            self.send(axis, RunQueueMessage::Run(run))?;
            self.observer.run_flushed(axis, records);
        }
        Ok(())
    }

    fn send(&self, axis: Axis, message: RunQueueMessage) -> Result<()> {
        self.queues[axis.index()]
            .send(message)
            .map_err(|_| BuildError::WorkerLost(format!("merge scheduler for {axis} stopped")))
    }

    /// Flushes the remainder and seals the run queues. An empty input still
    /// yields one (empty) run per axis so every axis gets a stream.
    pub fn finish(mut self) -> Result<SplitSummary> {
        if !self.buffer.is_empty() || self.runs_written == 0 {
            self.flush()?;
        }
        for axis in Axis::ALL {
            self.send(axis, RunQueueMessage::Sealed)?;
        }
        log::info!(
            "split {} points into {} runs per axis",
            self.next_id,
            self.runs_written
        );
        Ok(SplitSummary {
            points: self.next_id,
            runs_per_axis: self.runs_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::run_file::RunReader;
    use crossbeam_channel::{Receiver, unbounded};

    fn channels() -> ([Sender<RunQueueMessage>; 3], [Receiver<RunQueueMessage>; 3]) {
        let (tx_x, rx_x) = unbounded();
        let (tx_y, rx_y) = unbounded();
        let (tx_z, rx_z) = unbounded();
        ([tx_x, tx_y, tx_z], [rx_x, rx_y, rx_z])
    }

    fn runs(receiver: &Receiver<RunQueueMessage>) -> Vec<RunFile> {
        let messages: Vec<RunQueueMessage> = receiver.try_iter().collect();
        assert_eq!(messages.last(), Some(&RunQueueMessage::Sealed));
        messages
            .into_iter()
            .filter_map(|message| match message {
                RunQueueMessage::Run(run) => Some(run),
                RunQueueMessage::Sealed => None,
            })
            .collect()
    }

    fn ids_of(run: &RunFile) -> Vec<u32> {
        let mut reader = RunReader::open(&run.path).unwrap();
        let mut ids = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            ids.push(record.id);
        }
        ids
    }

    #[test]
    fn flushes_when_footprint_reaches_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (queues, receivers) = channels();
        let cap = 2 * BYTES_PER_BUFFERED_POINT;
        let mut writer = RunWriter::new(dir.path(), cap, queues, &NoProgress);

        writer.push(Point3::new(3.0, 0.0, 1.0)).unwrap();
        writer.push(Point3::new(1.0, 2.0, 0.0)).unwrap();
        writer.push(Point3::new(2.0, 1.0, 2.0)).unwrap();
        let summary = writer.finish().unwrap();

        assert_eq!(summary, SplitSummary { points: 3, runs_per_axis: 2 });

        let x_runs = runs(&receivers[0]);
        assert_eq!(x_runs.len(), 2);
        assert_eq!(ids_of(&x_runs[0]), vec![1, 0]);
        assert_eq!(ids_of(&x_runs[1]), vec![2]);

        let y_runs = runs(&receivers[1]);
        assert_eq!(ids_of(&y_runs[0]), vec![0, 1]);

        let z_runs = runs(&receivers[2]);
        assert_eq!(ids_of(&z_runs[0]), vec![1, 0]);

        // Queues close once the writer is gone.
        assert!(receivers[0].recv().is_err());
    }

    #[test]
    fn empty_input_still_produces_one_run_per_axis() {
        let dir = tempfile::tempdir().unwrap();
        let (queues, receivers) = channels();
        let writer = RunWriter::new(dir.path(), 1024, queues, &NoProgress);

        let summary = writer.finish().unwrap();
        assert_eq!(summary.points, 0);
        for receiver in &receivers {
            let axis_runs = runs(receiver);
            assert_eq!(axis_runs.len(), 1);
            assert_eq!(axis_runs[0].count, 0);
        }
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (queues, _receivers) = channels();
        let mut writer = RunWriter::new(dir.path(), 1024, queues, &NoProgress);

        writer.push(Point3::new(0.0, 0.0, 0.0)).unwrap();
        let err = writer.push(Point3::new(f32::NAN, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, BuildError::InvalidPoint { id: 1 }));
    }
}
