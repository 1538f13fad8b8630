/// Structural checks for finished axis streams and trees.
use crate::bounding_volume::BoundingVolume;
use crate::error::Result;
use crate::manifest::TreeManifest;
use crate::point::{Axis, Point3};
use crate::positions::{MappedPositions, PositionLookup};
use crate::run_file::read_axis_stream;
use crate::tree_reader::{TreeNode, TreeView, read_tree_file};
use std::fmt;
use std::path::Path;

/// Violations beyond this many are only counted.
const MAX_REPORTED_VIOLATIONS: usize = 32;

/// Outcome of one verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: u64,
    pub violations: Vec<String>,
    pub suppressed: usize,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    fn fail(&mut self, violation: String) {
        if self.violations.len() < MAX_REPORTED_VIOLATIONS {
            self.violations.push(violation);
        } else {
            self.suppressed += 1;
        }
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "ok ({} checked)", self.checked);
        }
        writeln!(
            f,
            "{} violations ({} checked)",
            self.violations.len() + self.suppressed,
            self.checked
        )?;
        for violation in &self.violations {
            writeln!(f, "  {violation}")?;
        }
        if self.suppressed > 0 {
            writeln!(f, "  ... and {} more", self.suppressed)?;
        }
        Ok(())
    }
}

/// Marks ids as seen, reporting strays and repeats.
struct IdCoverage {
    seen: Vec<bool>,
}

impl IdCoverage {
    fn new(count: u64) -> Self {
        Self {
            seen: vec![false; count as usize],
        }
    }

    fn mark(&mut self, id: u32, report: &mut VerifyReport, what: &str) -> bool {
        match self.seen.get_mut(id as usize) {
            None => {
                report.fail(format!("{what}: id {id} is outside 0..{}", self.seen.len()));
                false
            }
            Some(true) => {
                report.fail(format!("{what}: id {id} appears more than once"));
                false
            }
            Some(seen) => {
                *seen = true;
                true
            }
        }
    }

    fn missing(&self) -> usize {
        self.seen.iter().filter(|seen| !**seen).count()
    }
}

/// Checks that the stream at `path` lists every id once, ordered by the
/// `axis` coordinate with ties in id order.
pub fn verify_axis_stream(
    path: &Path,
    axis: Axis,
    positions: &dyn PositionLookup,
) -> Result<VerifyReport> {
    let ids = read_axis_stream(path)?;
    let mut report = VerifyReport {
        checked: ids.len() as u64,
        ..VerifyReport::default()
    };
    let what = format!("{axis} stream");

    if ids.len() as u64 != positions.len() {
        report.fail(format!(
            "{what} holds {} ids for {} positions",
            ids.len(),
            positions.len()
        ));
    }

    let mut coverage = IdCoverage::new(positions.len());
    let mut previous: Option<(f32, u32)> = None;
    for &id in &ids {
        if !coverage.mark(id, &mut report, &what) {
            continue;
        }
        let key = positions.position(id).coord(axis);
        if let Some((prev_key, prev_id)) = previous {
            if prev_key.total_cmp(&key).then(prev_id.cmp(&id)).is_gt() {
                report.fail(format!("{what}: id {id} is out of order after {prev_id}"));
            }
        }
        previous = Some((key, id));
    }

    let missing = coverage.missing();
    if missing > 0 {
        report.fail(format!("{what}: {missing} ids missing"));
    }
    Ok(report)
}

/// Checks partitioning, median exclusion, bucket limits, id coverage,
/// bounding volumes and the recorded depth of a decoded tree.
pub fn verify_tree(
    tree: &TreeView,
    positions: &dyn PositionLookup,
    bucket_size: u32,
) -> VerifyReport {
    let mut report = VerifyReport {
        checked: tree.nodes.len() as u64,
        ..VerifyReport::default()
    };
    let bucket = bucket_size as usize;

    if tree.header.element_count as u64 != positions.len() {
        report.fail(format!(
            "header counts {} points, position buffer holds {}",
            tree.header.element_count,
            positions.len()
        ));
    }
    if tree.header.depth != tree.max_leaf_depth() {
        report.fail(format!(
            "header depth {} but deepest leaf is at {}",
            tree.header.depth,
            tree.max_leaf_depth()
        ));
    }

    // Id coverage first: geometry checks index positions by id.
    let mut coverage = IdCoverage::new(positions.len());
    for view in &tree.nodes {
        let owned: &[u32] = match &view.node {
            TreeNode::Leaf { ids } => ids,
            TreeNode::Internal { median_id, .. } => std::slice::from_ref(median_id),
        };
        for &id in owned {
            coverage.mark(id, &mut report, &format!("node at word {}", view.word_offset));
        }
    }
    let missing = coverage.missing();
    if missing > 0 {
        report.fail(format!("{missing} ids are not in the tree"));
    }
    if !report.is_ok() {
        return report;
    }

    // Children follow their parents, so walking backwards sees every
    // subtree before the node that owns it.
    let mut subtrees: Vec<Option<Extent>> = vec![None; tree.nodes.len()];
    for (index, view) in tree.nodes.iter().enumerate().rev() {
        let at = view.word_offset;
        let extent = match &view.node {
            TreeNode::Leaf { ids } => {
                if ids.len() > bucket {
                    report.fail(format!(
                        "leaf at word {at} holds {} ids, bucket is {bucket}",
                        ids.len()
                    ));
                }
                ids.iter().fold(Extent::default(), |extent, &id| {
                    extent.with(positions.position(id))
                })
            }
            TreeNode::Internal {
                volume,
                median_id,
                left,
                right,
            } => {
                let mut take = |child: &Option<usize>| {
                    child
                        .and_then(|child| subtrees[child].take())
                        .unwrap_or_default()
                };
                let left = take(left);
                let right = take(right);
                let center = positions.position(*median_id);
                let extent = left.merge(&right).with(center);

                if extent.count <= bucket {
                    report.fail(format!(
                        "internal node at word {at} splits only {} ids",
                        extent.count
                    ));
                }

                // `with(center)` guarantees bounds.
                let (min, max) = extent.bounds.unwrap_or((center, center));
                let cut_axis = widest_axis(min, max);
                if let Some(BoundingVolume::SplitPlane { axis }) = volume {
                    if *axis != cut_axis {
                        report.fail(format!(
                            "node at word {at} records cut axis {axis}, widest is {cut_axis}"
                        ));
                    }
                }
                let split = center.coord(cut_axis);

                if let Some((_, left_max)) = left.bounds {
                    let reach = left_max.coord(cut_axis);
                    if reach >= split {
                        report.fail(format!(
                            "left of node at word {at} reaches {reach}, not below {split}"
                        ));
                    }
                }
                if let Some((right_min, _)) = right.bounds {
                    let reach = right_min.coord(cut_axis);
                    if reach < split {
                        report.fail(format!(
                            "right of node at word {at} reaches {reach}, below {split}"
                        ));
                    }
                }

                if let Some(volume) = volume {
                    check_volume(volume, center, min, max, at, &mut report);
                }
                extent
            }
        };
        subtrees[index] = Some(extent);
    }

    report
}

/// Point count and per-axis extremes of one subtree.
#[derive(Debug, Clone, Copy, Default)]
struct Extent {
    count: usize,
    bounds: Option<(Point3, Point3)>,
}

impl Extent {
    fn with(self, p: Point3) -> Self {
        self.merge(&Extent {
            count: 1,
            bounds: Some((p, p)),
        })
    }

    fn merge(&self, other: &Extent) -> Self {
        let bounds = match (self.bounds, other.bounds) {
            (Some((a_min, a_max)), Some((b_min, b_max))) => Some((
                Point3::new(a_min.x.min(b_min.x), a_min.y.min(b_min.y), a_min.z.min(b_min.z)),
                Point3::new(a_max.x.max(b_max.x), a_max.y.max(b_max.y), a_max.z.max(b_max.z)),
            )),
            (bounds, None) | (None, bounds) => bounds,
        };
        Extent {
            count: self.count + other.count,
            bounds,
        }
    }
}

fn widest_axis(min: Point3, max: Point3) -> Axis {
    let mut widest = Axis::X;
    for axis in [Axis::Y, Axis::Z] {
        if (max.coord(axis) - min.coord(axis)).abs()
            > (max.coord(widest) - min.coord(widest)).abs()
        {
            widest = axis;
        }
    }
    widest
}

/// Checks that the subtree extremes `min..=max` lie inside `volume`.
fn check_volume(
    volume: &BoundingVolume,
    center: Point3,
    min: Point3,
    max: Point3,
    at: u32,
    report: &mut VerifyReport,
) {
    let inside = match *volume {
        BoundingVolume::Sphere { radius } => Axis::ALL.iter().all(|&axis| {
            (max.coord(axis) - center.coord(axis)).abs() <= radius
                && (center.coord(axis) - min.coord(axis)).abs() <= radius
        }),
        BoundingVolume::Aabb { min: corner, size } => Axis::ALL.iter().all(|&axis| {
            min.coord(axis) - corner.coord(axis) >= 0.0
                && max.coord(axis) - corner.coord(axis) <= size.coord(axis)
        }),
        BoundingVolume::SplitPlane { .. } => true,
    };
    if !inside {
        report.fail(format!(
            "subtree of node at word {at} extends outside its {}",
            volume.kind()
        ));
    }
}

/// Verifies the three axis streams and the tree named by a manifest.
/// Returns one labelled report per file.
pub fn verify_manifest(manifest_path: &Path) -> Result<Vec<(String, VerifyReport)>> {
    let manifest = TreeManifest::read(manifest_path)?;
    let dir = manifest_path.parent().unwrap_or(Path::new("."));
    let positions = MappedPositions::open(&dir.join(&manifest.files.positions))?;

    let mut reports = Vec::new();
    for (axis, name) in Axis::ALL
        .into_iter()
        .zip([&manifest.files.x, &manifest.files.y, &manifest.files.z])
    {
        let report = verify_axis_stream(&dir.join(name), axis, &positions)?;
        reports.push((name.clone(), report));
    }

    let tree = read_tree_file(&dir.join(&manifest.files.tree))?;
    let mut report = verify_tree(&tree, &positions, manifest.bucket_size);
    if tree.header.kind != manifest.bounding_volume {
        report.fail(format!(
            "tree holds {} volumes, manifest says {}",
            tree.header.kind, manifest.bounding_volume
        ));
    }
    reports.push((manifest.files.tree.clone(), report));
    Ok(reports)
}
