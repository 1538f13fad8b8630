//! End-to-end runs of the sort and build stages.
use point_cloud_spatial_index::tree_reader::TreeNode;
use point_cloud_spatial_index::{
    Axis, BoundingVolumeKind, BuildConfig, BuildError, BuildInputs, LasSource, MappedPositions,
    MemorySource, NoProgress, Point3, PositionFileSource, PositionLookup, SortConfig,
    SortOutput, StorageMode, TreeManifest, build_tree, read_tree_file, sort_points,
    verify_axis_stream, verify_manifest, verify_tree,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;

const BYTES_PER_POINT: u64 = 64;

fn random_cloud(seed: u64, count: usize) -> Vec<Point3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Point3::new(
                rng.gen_range(-500.0..500.0),
                rng.gen_range(-50.0..50.0),
                // Coarse heights give plenty of equal coordinates.
                rng.gen_range(0..20) as f32 * 0.5,
            )
        })
        .collect()
}

fn sort(dir: &Path, points: Vec<Point3>, points_per_run: u64, workers: usize) -> SortOutput {
    let config = SortConfig::new(dir, "cloud")
        .with_memory_cap(points_per_run * BYTES_PER_POINT)
        .with_merge_workers(workers);
    sort_points(&mut MemorySource::new(points), &config, &NoProgress).unwrap()
}

fn build_config(
    dir: &Path,
    kind: BoundingVolumeKind,
    bucket: u32,
    storage: StorageMode,
) -> BuildConfig {
    BuildConfig::new(&dir.join("tmp"))
        .with_bounding_volume(kind)
        .with_bucket_size(bucket)
        .with_storage(storage)
}

#[test]
fn sorted_streams_cover_every_point_in_axis_order() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(1, 5_000), 300, 2);

    assert_eq!(output.points, 5_000);
    assert_eq!(output.runs_per_axis, 17);
    assert_eq!(fs::metadata(&output.inputs.positions).unwrap().len(), 5_000 * 12);
    assert!(!dir.path().join("tmp").exists());

    let positions = MappedPositions::open(&output.inputs.positions).unwrap();
    for axis in Axis::ALL {
        let report = verify_axis_stream(output.inputs.axis(axis), axis, &positions).unwrap();
        assert!(report.is_ok(), "{axis}: {report}");
        assert_eq!(report.checked, 5_000);
    }
}

#[test]
fn streams_do_not_depend_on_run_size_or_worker_count() {
    let points = random_cloud(2, 3_000);
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    let a = sort(first.path(), points.clone(), 97, 1);
    let b = sort(second.path(), points, 1_000, 4);

    for axis in Axis::ALL {
        assert_eq!(
            fs::read(a.inputs.axis(axis)).unwrap(),
            fs::read(b.inputs.axis(axis)).unwrap(),
            "{axis} stream differs"
        );
    }
    assert_eq!(
        fs::read(&a.inputs.positions).unwrap(),
        fs::read(&b.inputs.positions).unwrap()
    );
}

#[test]
fn every_kind_builds_a_valid_tree_in_both_storage_modes() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(3, 4_000), 500, 2);
    let positions = MappedPositions::open(&output.inputs.positions).unwrap();

    for kind in [
        BoundingVolumeKind::Sphere,
        BoundingVolumeKind::Aabb,
        BoundingVolumeKind::SplitPlane,
    ] {
        let in_memory = build_tree(
            &output.inputs,
            &build_config(dir.path(), kind, 8, StorageMode::InMemory),
            &NoProgress,
        )
        .unwrap();
        let memory_bytes = fs::read(&in_memory.tree).unwrap();

        let disk = build_tree(
            &output.inputs,
            &build_config(dir.path(), kind, 8, StorageMode::DiskBacked),
            &NoProgress,
        )
        .unwrap();
        assert_eq!(disk.storage, StorageMode::DiskBacked);
        assert_eq!(fs::read(&disk.tree).unwrap(), memory_bytes, "{kind}");
        assert!(!dir.path().join("tmp").exists());

        let tree = read_tree_file(&disk.tree).unwrap();
        assert_eq!(tree.header.kind, kind);
        assert_eq!(tree.header.depth, disk.summary.depth);
        let report = verify_tree(&tree, &positions, 8);
        assert!(report.is_ok(), "{kind}: {report}");
        assert!(tree.leaves().all(|leaf| match &leaf.node {
            TreeNode::Leaf { ids } => ids.len() <= 8,
            TreeNode::Internal { .. } => false,
        }));
    }
}

#[test]
fn rebuilding_is_byte_identical_and_manifest_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(4, 2_000), 2_000, 2);
    let config = build_config(dir.path(), BoundingVolumeKind::Aabb, 4, StorageMode::Auto);

    let first = build_tree(&output.inputs, &config, &NoProgress).unwrap();
    let first_bytes = fs::read(&first.tree).unwrap();
    let second = build_tree(&output.inputs, &config, &NoProgress).unwrap();
    assert_eq!(first.tree, second.tree);
    assert_eq!(fs::read(&second.tree).unwrap(), first_bytes);

    let manifest = TreeManifest::read(&second.manifest).unwrap();
    assert_eq!(manifest.element_count, 2_000);
    assert_eq!(manifest.bucket_size, 4);
    assert_eq!(manifest.files.tree, "cloud_AABB_B4.bin");
    assert_eq!(manifest.tree_bytes, first_bytes.len() as u64);

    for (file, report) in verify_manifest(&second.manifest).unwrap() {
        assert!(report.is_ok(), "{file}: {report}");
    }
}

#[test]
fn two_clusters_split_into_a_deeper_tree() {
    let dir = tempfile::tempdir().unwrap();
    let points = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.1, 0.2, 0.0),
        Point3::new(0.2, 0.1, 0.1),
        Point3::new(0.3, 0.3, 0.2),
        Point3::new(10.0, 0.0, 0.0),
        Point3::new(10.1, 0.2, 0.1),
        Point3::new(10.2, 0.1, 0.0),
        Point3::new(10.3, 0.3, 0.2),
    ];
    let output = sort(dir.path(), points, 3, 2);
    let built = build_tree(
        &output.inputs,
        &build_config(dir.path(), BoundingVolumeKind::SplitPlane, 2, StorageMode::InMemory),
        &NoProgress,
    )
    .unwrap();

    let tree = read_tree_file(&built.tree).unwrap();
    assert!(tree.header.depth >= 2);

    // X is the widest axis; the median is the fifth point along it.
    match &tree.root().unwrap().node {
        TreeNode::Internal { median_id, .. } => assert_eq!(*median_id, 4),
        other => panic!("root should split, got {other:?}"),
    }

    let mut ids: Vec<u32> = tree
        .nodes
        .iter()
        .flat_map(|view| match &view.node {
            TreeNode::Leaf { ids } => ids.clone(),
            TreeNode::Internal { median_id, .. } => vec![*median_id],
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());

    let positions = MappedPositions::open(&output.inputs.positions).unwrap();
    assert!(verify_tree(&tree, &positions, 2).is_ok());
}

#[test]
fn empty_cloud_gives_a_single_empty_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), Vec::new(), 10, 1);
    assert_eq!(output.points, 0);

    let built = build_tree(
        &output.inputs,
        &build_config(dir.path(), BoundingVolumeKind::Sphere, 2, StorageMode::InMemory),
        &NoProgress,
    )
    .unwrap();
    let bytes = fs::read(&built.tree).unwrap();
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    assert_eq!(words, vec![0, 0, 0, 0, 0]);
}

#[test]
fn position_buffer_can_be_sorted_again() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(5, 1_000), 200, 2);

    let resorted = tempfile::tempdir().unwrap();
    let config = SortConfig::new(resorted.path(), "cloud").with_memory_cap(250 * BYTES_PER_POINT);
    let mut source = PositionFileSource::open(&output.inputs.positions).unwrap();
    let again = sort_points(&mut source, &config, &NoProgress).unwrap();

    for axis in Axis::ALL {
        assert_eq!(
            fs::read(output.inputs.axis(axis)).unwrap(),
            fs::read(again.inputs.axis(axis)).unwrap()
        );
    }
}

#[test]
fn non_finite_points_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut points = random_cloud(6, 10);
    points[7] = Point3::new(1.0, f32::NAN, 0.0);
    let config = SortConfig::new(dir.path(), "cloud");

    let err = sort_points(&mut MemorySource::new(points), &config, &NoProgress).unwrap_err();
    assert!(matches!(err, BuildError::InvalidPoint { id: 7 }), "{err}");
    assert!(!dir.path().join("cloud_X.bin").exists());
}

#[test]
fn mismatched_inputs_fail_before_the_tree_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(7, 100), 100, 1);

    let short = BuildInputs {
        y: dir.path().join("short_Y.bin"),
        ..output.inputs.clone()
    };
    let mut stream = 50u32.to_le_bytes().to_vec();
    for id in 0..50u32 {
        stream.extend_from_slice(&id.to_le_bytes());
    }
    fs::write(&short.y, stream).unwrap();

    let config = build_config(dir.path(), BoundingVolumeKind::Sphere, 2, StorageMode::InMemory);
    let err = build_tree(&short, &config, &NoProgress).unwrap_err();
    assert!(matches!(err, BuildError::InconsistentCounts { expected: 100, found: 50, .. }));
    assert!(!short.tree_path(&config).exists());

    let none = build_config(dir.path(), BoundingVolumeKind::None, 2, StorageMode::InMemory);
    assert!(matches!(
        build_tree(&output.inputs, &none, &NoProgress),
        Err(BuildError::Config(_))
    ));
}

#[test]
fn disk_backed_build_can_work_inside_the_data_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(8, 600), 100, 2);
    let config = BuildConfig::new(dir.path())
        .with_bucket_size(4)
        .with_storage(StorageMode::DiskBacked);

    let first = build_tree(&output.inputs, &config, &NoProgress).unwrap();
    for axis in Axis::ALL {
        assert!(output.inputs.axis(axis).exists(), "{axis} stream was removed");
    }
    assert!(output.inputs.positions.exists());

    let second = build_tree(&output.inputs, &config, &NoProgress).unwrap();
    assert_eq!(fs::read(&first.tree).unwrap(), fs::read(&second.tree).unwrap());

    let mut names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        [
            "cloud_DATA.bin",
            "cloud_SORT.json",
            "cloud_SPHERE_B4.bin",
            "cloud_SPHERE_B4.json",
            "cloud_X.bin",
            "cloud_Y.bin",
            "cloud_Z.bin",
        ]
    );
}

#[test]
fn sort_work_dir_beside_the_input_leaves_it_alone() {
    let input_dir = tempfile::tempdir().unwrap();
    let survey = input_dir.path().join("survey.las");
    fs::write(&survey, b"user data").unwrap();

    let out = tempfile::tempdir().unwrap();
    let config = SortConfig::new(out.path(), "cloud")
        .with_memory_cap(50 * BYTES_PER_POINT)
        .with_work_dir(input_dir.path());
    sort_points(&mut MemorySource::new(random_cloud(9, 400)), &config, &NoProgress).unwrap();

    assert_eq!(fs::read(&survey).unwrap(), b"user data");
    assert_eq!(fs::read_dir(input_dir.path()).unwrap().count(), 1);
}

#[test]
fn georeferenced_las_keeps_centimetre_detail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("survey.las");
    let millimetres = |offset| las::Transform {
        scale: 0.001,
        offset,
    };
    let mut builder = las::Builder::from((1, 2));
    builder.transforms = las::Vector {
        x: millimetres(400_000.0),
        y: millimetres(5_800_000.0),
        z: millimetres(0.0),
    };
    let mut writer = las::Writer::from_path(&path, builder.into_header().unwrap()).unwrap();
    // A 20 x 20 grid with 1 cm spacing around a UTM position.
    for i in 0..400 {
        writer
            .write_point(las::Point {
                x: 412_345.67 + (i % 20) as f64 * 0.01,
                y: 5_812_345.67 + (i / 20) as f64 * 0.01,
                z: 88.0,
                ..Default::default()
            })
            .unwrap();
    }
    writer.close().unwrap();

    let config = SortConfig::new(dir.path(), "survey");
    let mut source = LasSource::open(&path).unwrap();
    let output = sort_points(&mut source, &config, &NoProgress).unwrap();
    assert!((output.origin[0] - 412_345.67).abs() < 1e-3);
    assert!((output.origin[1] - 5_812_345.67).abs() < 1e-3);

    let positions = MappedPositions::open(&output.inputs.positions).unwrap();
    let mut distinct: Vec<(u32, u32)> = (0..400)
        .map(|id| {
            let p = positions.position(id);
            (p.x.to_bits(), p.y.to_bits())
        })
        .collect();
    distinct.sort_unstable();
    distinct.dedup();
    assert_eq!(distinct.len(), 400);

    let built = build_tree(
        &output.inputs,
        &build_config(dir.path(), BoundingVolumeKind::Aabb, 4, StorageMode::InMemory),
        &NoProgress,
    )
    .unwrap();
    let manifest = TreeManifest::read(&built.manifest).unwrap();
    assert_eq!(manifest.origin, output.origin);
    for (file, report) in verify_manifest(&built.manifest).unwrap() {
        assert!(report.is_ok(), "{file}: {report}");
    }
}

#[test]
fn stale_sort_manifest_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = sort(dir.path(), random_cloud(10, 50), 50, 1);
    let sort_manifest = output.inputs.sort_manifest_path();
    let text = fs::read_to_string(&sort_manifest).unwrap();
    fs::write(&sort_manifest, text.replace("\"element_count\": 50", "\"element_count\": 49"))
        .unwrap();

    let config = build_config(dir.path(), BoundingVolumeKind::Sphere, 2, StorageMode::InMemory);
    let err = build_tree(&output.inputs, &config, &NoProgress).unwrap_err();
    assert!(matches!(err, BuildError::InconsistentCounts { expected: 50, found: 49, .. }));
    assert!(!output.inputs.tree_path(&config).exists());
}
