/// Out-of-core sort stage: source points -> position buffer + three axis
/// index streams.
///
/// The run writer works on the calling thread while one merge scheduler per
/// axis runs on its own scoped thread, so merging starts as soon as the
/// first runs appear.
use crate::config::{BuildInputs, SortConfig};
use crate::error::{BuildError, Result};
use crate::manifest::SortManifest;
use crate::point::Axis;
use crate::positions::PositionBufferWriter;
use crate::progress::ProgressObserver;
use crate::run_writer::{RunQueueMessage, RunWriter, SplitSummary};
use crate::scheduler::MergeScheduler;
use crate::source::PointSource;
use crate::work_dir::WorkDir;
use constants::build_settings::{PROGRESS_REPORT_INTERVAL, SORT_WORK_PREFIX};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

/// Result of a completed sort stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SortOutput {
    /// Axis streams and position buffer, ready for the tree builder.
    pub inputs: BuildInputs,
    pub points: u32,
    pub runs_per_axis: u32,
    /// World position subtracted from every point by the source.
    pub origin: [f64; 3],
}

/// Sorts every point of `source` along all three axes.
pub fn sort_points(
    source: &mut dyn PointSource,
    config: &SortConfig,
    observer: &dyn ProgressObserver,
) -> Result<SortOutput> {
    config.validate()?;
    let declared = source.point_count();
    if declared > u32::MAX as u64 {
        return Err(BuildError::config(format!(
            "{declared} points exceed the u32 id space"
        )));
    }

    let started = Instant::now();
    log::info!(
        "sorting {} points (memory cap {} MB, {} merge workers per axis)",
        declared,
        config.memory_cap_bytes / 1_000_000,
        config.max_merge_workers
    );

    fs::create_dir_all(&config.output_dir)?;
    let work_dir = WorkDir::create(&config.work_dir, SORT_WORK_PREFIX)?;

    let (senders, receivers) = run_queues();
    let (split, streams) = thread::scope(|scope| {
        let handles = Axis::ALL.map(|axis| {
            let incoming = receivers[axis.index()].clone();
            let output = config.axis_stream_path(axis);
            let work = work_dir.path();
            let workers = config.max_merge_workers;
            thread::Builder::new()
                .name(format!("scheduler-{axis}"))
                .spawn_scoped(scope, move || {
                    MergeScheduler::new(axis, work, incoming, workers, observer).run(&output)
                })
        });
        // Only the schedulers may hold the receiving ends.
        drop(receivers);

        let split = split_source(source, declared, config, &work_dir, senders, observer);

        let streams = handles.map(|handle| match handle {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                Err(BuildError::WorkerLost("merge scheduler panicked".to_string()))
            }),
            Err(err) => Err(BuildError::Io(err)),
        });
        (split, streams)
    });

    let split = match split {
        // A scheduler that stopped early explains a failed hand-off better.
        Err(BuildError::WorkerLost(lost)) => {
            for stream in streams {
                stream?;
            }
            return Err(BuildError::WorkerLost(lost));
        }
        other => other?,
    };
    for stream in streams {
        stream?;
    }

    let leftovers = work_dir.cleanup()?;
    if leftovers > 0 {
        log::warn!("{leftovers} temporary files were left behind by the merge");
    }

    let origin = source.origin();
    SortManifest {
        element_count: split.points,
        runs_per_axis: split.runs_per_axis,
        origin,
    }
    .write(&config.sort_manifest_path())?;

    log::info!(
        "sort finished in {:.3} min",
        started.elapsed().as_secs_f64() / 60.0
    );
    Ok(SortOutput {
        inputs: BuildInputs::from_sort_config(config),
        points: split.points,
        runs_per_axis: split.runs_per_axis,
        origin,
    })
}

fn run_queues() -> (
    [Sender<RunQueueMessage>; 3],
    [Receiver<RunQueueMessage>; 3],
) {
    let (tx_x, rx_x) = unbounded();
    let (tx_y, rx_y) = unbounded();
    let (tx_z, rx_z) = unbounded();
    ([tx_x, tx_y, tx_z], [rx_x, rx_y, rx_z])
}

/// Reads the source once, writing the position buffer and feeding the run
/// writer in the same pass.
fn split_source(
    source: &mut dyn PointSource,
    declared: u64,
    config: &SortConfig,
    work_dir: &WorkDir,
    senders: [Sender<RunQueueMessage>; 3],
    observer: &dyn ProgressObserver,
) -> Result<SplitSummary> {
    let position_path: PathBuf = config.position_path();
    let mut positions = PositionBufferWriter::create(&position_path)?;
    let mut runs = RunWriter::new(work_dir.path(), config.memory_cap_bytes, senders, observer);

    let mut read = 0u64;
    for point in source.points() {
        let point = point?;
        positions.push(point)?;
        runs.push(point)?;
        read += 1;

        if read % PROGRESS_REPORT_INTERVAL == 0 {
            observer.points_read(read, declared);
        }
        if read > declared {
            break;
        }
    }

    if read != declared {
        return Err(BuildError::counts("point source", declared, read));
    }
    observer.points_read(read, declared);

    let (_, written) = positions.finish()?;
    debug_assert_eq!(written, read);
    runs.finish()
}
