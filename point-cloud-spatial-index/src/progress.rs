/// Optional progress reporting for the sort and build stages.
use crate::point::Axis;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Observer notified as the pipeline advances. Every callback defaults to a
/// no-op so implementations only pick the events they care about.
pub trait ProgressObserver: Send + Sync {
    /// `read` of `total` source points have been buffered.
    fn points_read(&self, _read: u64, _total: u64) {}

    /// A run of `records` points was flushed for `axis`.
    fn run_flushed(&self, _axis: Axis, _records: u32) {}

    /// A merge for `axis` produced a run of `records` points; `pending` runs
    /// remain queued.
    fn merge_finished(&self, _axis: Axis, _records: u32, _pending: usize) {}

    /// The terminal stream for `axis` is written.
    fn axis_finished(&self, _axis: Axis) {}

    /// `points` more ids have been placed in the tree (leaf members or a
    /// node's median).
    fn points_placed(&self, _points: u64) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("▉▊▋▌▍▎▏ ")
}

/// Terminal progress bars drawn with indicatif.
pub struct ConsoleProgress {
    _multi: MultiProgress,
    ingest: Option<ProgressBar>,
    axes: Option<[ProgressBar; 3]>,
    build: Option<ProgressBar>,
}

impl ConsoleProgress {
    /// Bars for the split and merge phases.
    pub fn sorting(total_points: u64) -> Self {
        let multi = MultiProgress::new();

        let ingest = multi.add(ProgressBar::new(total_points));
        ingest.set_style(bar_style(
            "[{bar:40.cyan/blue}] {pos}/{len} points ({percent}%) {msg}",
        ));
        ingest.set_message("Splitting into sorted runs");

        let axes = Axis::ALL.map(|axis| {
            let spinner = multi.add(ProgressBar::new_spinner());
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {prefix} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_prefix(format!("{axis}"));
            spinner.set_message("waiting for runs");
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner
        });

        Self {
            _multi: multi,
            ingest: Some(ingest),
            axes: Some(axes),
            build: None,
        }
    }

    /// Bar for the tree build.
    pub fn building(total_points: u64) -> Self {
        let multi = MultiProgress::new();
        let build = multi.add(ProgressBar::new(total_points));
        build.set_style(bar_style(
            "[{bar:40.green/blue}] {pos}/{len} points ({percent}%) {msg}",
        ));
        build.set_message("Building spatial index");

        Self {
            _multi: multi,
            ingest: None,
            axes: None,
            build: Some(build),
        }
    }

    fn axis_bar(&self, axis: Axis) -> Option<&ProgressBar> {
        self.axes.as_ref().map(|bars| &bars[axis.index()])
    }
}

impl ProgressObserver for ConsoleProgress {
    fn points_read(&self, read: u64, total: u64) {
        if let Some(bar) = &self.ingest {
            bar.set_length(total);
            bar.set_position(read);
            if read == total {
                bar.finish_with_message("Runs written");
            }
        }
    }

    fn run_flushed(&self, axis: Axis, records: u32) {
        if let Some(bar) = self.axis_bar(axis) {
            bar.set_message(format!("run of {records} points queued"));
        }
    }

    fn merge_finished(&self, axis: Axis, records: u32, pending: usize) {
        if let Some(bar) = self.axis_bar(axis) {
            bar.set_message(format!("merged {records} points, {pending} runs queued"));
        }
    }

    fn axis_finished(&self, axis: Axis) {
        if let Some(bar) = self.axis_bar(axis) {
            bar.finish_with_message("sorted");
        }
    }

    fn points_placed(&self, points: u64) {
        if let Some(bar) = &self.build {
            bar.inc(points);
            if bar.position() >= bar.length().unwrap_or(0) {
                bar.finish_with_message("Spatial index written");
            }
        }
    }
}
