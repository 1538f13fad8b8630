/// Per-axis merge scheduler.
///
/// Owns a FIFO of pending runs for one axis. While more than two runs are
/// queued it pairs the two oldest and hands them to a bounded pool of merge
/// workers; finished merges rejoin the back of the queue. When the run
/// writer has sealed the queue and no worker is in flight, the one or two
/// remaining runs become the id-only axis stream.
use crate::error::{BuildError, Result};
use crate::merge::{MergeJob, merge_to_run, merge_to_stream, reencode_to_stream};
use crate::point::Axis;
use crate::progress::ProgressObserver;
use crate::run_file::RunFile;
use crate::run_writer::RunQueueMessage;
use crossbeam_channel::{Receiver, never, select, unbounded};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

pub struct MergeScheduler<'a> {
    axis: Axis,
    work_dir: PathBuf,
    queue: VecDeque<RunFile>,
    incoming: Receiver<RunQueueMessage>,
    max_workers: usize,
    merges_started: u32,
    observer: &'a dyn ProgressObserver,
}

impl<'a> MergeScheduler<'a> {
    pub fn new(
        axis: Axis,
        work_dir: &Path,
        incoming: Receiver<RunQueueMessage>,
        max_workers: usize,
        observer: &'a dyn ProgressObserver,
    ) -> Self {
        Self {
            axis,
            work_dir: work_dir.to_path_buf(),
            queue: VecDeque::new(),
            incoming,
            max_workers: max_workers.max(1),
            merges_started: 0,
            observer,
        }
    }

    fn next_job(&mut self) -> Option<MergeJob> {
        if self.queue.len() <= 2 {
            return None;
        }
        let left = self.queue.pop_front()?;
        let right = self.queue.pop_front()?;
        let output = self.work_dir.join(format!(
            "{}_merge{}.bin",
            self.axis.name(),
            self.merges_started
        ));
        self.merges_started += 1;
        Some(MergeJob {
            left,
            right,
            output,
        })
    }

    /// Drives the queue down to the final axis stream at `output`.
    ///
    /// Blocks while waiting for new runs or finished merges. The first worker
    /// error stops dispatching; in-flight workers are drained before it is
    /// returned so no merge outlives the scheduler.
    pub fn run(mut self, output: &Path) -> Result<PathBuf> {
        let axis = self.axis;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .thread_name(move |i| format!("merge-{axis}-{i}"))
            .build()
            .map_err(|e| BuildError::WorkerLost(e.to_string()))?;

        let (done_tx, done_rx) = unbounded::<Result<RunFile>>();
        let closed = never();
        let mut active = 0usize;
        let mut input_open = true;
        let mut failure: Option<BuildError> = None;

        loop {
            if failure.is_none() {
                while active < self.max_workers {
                    let Some(job) = self.next_job() else { break };
                    let done = done_tx.clone();
                    pool.spawn(move || {
                        // The scheduler outlives every job it dispatched.
                        let _ = done.send(merge_to_run(job));
                    });
                    active += 1;
                }
            }

            // Only stop once nothing can still grow or shrink the queue.
            if active == 0 && (!input_open || failure.is_some()) {
                break;
            }

            let incoming = if input_open && failure.is_none() {
                &self.incoming
            } else {
                &closed
            };
            select! {
                recv(incoming) -> msg => match msg {
                    Ok(RunQueueMessage::Run(run)) => {
                        log::debug!("{} run queued: {}", axis, run.path.display());
                        self.queue.push_back(run);
                    }
                    Ok(RunQueueMessage::Sealed) => input_open = false,
                    Err(_) => {
                        input_open = false;
                        failure.get_or_insert(BuildError::WorkerLost(format!(
                            "{axis} run queue closed before it was sealed"
                        )));
                    }
                },
                recv(done_rx) -> msg => {
                    active -= 1;
                    match msg {
                        Ok(Ok(run)) => {
                            let records = run.count;
                            self.queue.push_back(run);
                            self.observer.merge_finished(axis, records, self.queue.len());
                        }
                        Ok(Err(err)) => {
                            log::error!("{axis} merge failed: {err}");
                            failure.get_or_insert(err);
                        }
                        Err(_) => {
                            failure.get_or_insert(BuildError::WorkerLost(format!(
                                "{axis} merge results channel closed"
                            )));
                        }
                    }
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        self.finish(output)
    }

    fn finish(mut self, output: &Path) -> Result<PathBuf> {
        let stream = match (self.queue.pop_front(), self.queue.pop_front()) {
            (Some(left), Some(right)) => merge_to_stream(left, right, output)?,
            (Some(single), None) => reencode_to_stream(single, output)?,
            _ => {
                return Err(BuildError::WorkerLost(format!(
                    "no {} runs reached the scheduler",
                    self.axis
                )));
            }
        };
        debug_assert!(self.queue.is_empty());

        log::info!(
            "{} axis sorted after {} intermediate merges -> {}",
            self.axis,
            self.merges_started,
            stream.display()
        );
        self.observer.axis_finished(self.axis);
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{Point3, PointRecord};
    use crate::progress::NoProgress;
    use crate::run_file::{read_axis_stream, write_run};

    fn run_of(dir: &Path, n: usize, values: &[(u32, f32)]) -> RunFile {
        let mut records: Vec<PointRecord> = values
            .iter()
            .map(|&(id, x)| PointRecord::new(id, Point3::new(x, 0.0, 0.0)))
            .collect();
        records.sort_by(|a, b| a.cmp_on(b, Axis::X));
        write_run(&dir.join(format!("X_run{n}.bin")), Axis::X, &records).unwrap()
    }

    #[test]
    fn merges_many_runs_into_one_sorted_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        let batches: Vec<Vec<(u32, f32)>> = vec![
            vec![(0, 9.0), (1, 2.0)],
            vec![(2, 5.0), (3, -1.0)],
            vec![(4, 7.5)],
            vec![(5, 0.0), (6, 3.0), (7, 3.0)],
            vec![(8, 4.0)],
        ];
        for (n, batch) in batches.iter().enumerate() {
            tx.send(RunQueueMessage::Run(run_of(dir.path(), n, batch)))
                .unwrap();
        }
        tx.send(RunQueueMessage::Sealed).unwrap();

        let output = dir.path().join("cloud_X.bin");
        let scheduler = MergeScheduler::new(Axis::X, dir.path(), rx, 2, &NoProgress);
        let stream = scheduler.run(&output).unwrap();

        assert_eq!(stream, output);
        assert_eq!(
            read_axis_stream(&stream).unwrap(),
            vec![3, 5, 1, 6, 7, 8, 2, 4, 0]
        );

        // Only the terminal stream survives.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("cloud_X.bin")]);
    }

    #[test]
    fn runs_arriving_while_merging_are_included() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        let output = dir.path().join("cloud_X.bin");

        let stream = std::thread::scope(|scope| {
            let dir_path = dir.path();
            let handle = scope.spawn(|| {
                MergeScheduler::new(Axis::X, dir_path, rx, 1, &NoProgress).run(&output)
            });
            for n in 0..6u32 {
                let run = run_of(dir_path, n as usize, &[(n, 6.0 - n as f32)]);
                tx.send(RunQueueMessage::Run(run)).unwrap();
            }
            tx.send(RunQueueMessage::Sealed).unwrap();
            handle.join().unwrap()
        })
        .unwrap();

        assert_eq!(read_axis_stream(&stream).unwrap(), vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn single_run_becomes_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        tx.send(RunQueueMessage::Run(run_of(dir.path(), 0, &[(0, 1.0), (1, 0.5)])))
            .unwrap();
        tx.send(RunQueueMessage::Sealed).unwrap();

        let output = dir.path().join("cloud_X.bin");
        let stream = MergeScheduler::new(Axis::X, dir.path(), rx, 4, &NoProgress)
            .run(&output)
            .unwrap();
        assert_eq!(read_axis_stream(&stream).unwrap(), vec![1, 0]);
    }

    #[test]
    fn sealed_queue_without_runs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        tx.send(RunQueueMessage::Sealed).unwrap();

        let result = MergeScheduler::new(Axis::X, dir.path(), rx, 1, &NoProgress)
            .run(&dir.path().join("cloud_X.bin"));
        assert!(matches!(result, Err(BuildError::WorkerLost(_))));
    }

    #[test]
    fn unsealed_queue_produces_no_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = unbounded();
        tx.send(RunQueueMessage::Run(run_of(dir.path(), 0, &[(0, 1.0)])))
            .unwrap();
        tx.send(RunQueueMessage::Run(run_of(dir.path(), 1, &[(1, 2.0)])))
            .unwrap();
        drop(tx);

        let output = dir.path().join("cloud_X.bin");
        let result = MergeScheduler::new(Axis::X, dir.path(), rx, 1, &NoProgress).run(&output);
        assert!(matches!(result, Err(BuildError::WorkerLost(_))));
        assert!(!output.exists());
    }
}
