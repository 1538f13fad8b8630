/// Point cloud spatial index builder entry point.
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use constants::build_settings::{
    DEFAULT_BUCKET_SIZE, DEFAULT_MEMORY_CAP_BYTES, DEFAULT_WORK_DIR_NAME,
};
use constants::file_format::{POSITION_FILE_SUFFIX, POSITION_RECORD_BYTES};
use env_logger::Builder;
use log::LevelFilter;
use point_cloud_spatial_index::config::default_merge_workers;
use point_cloud_spatial_index::{
    BoundingVolumeKind, BuildConfig, BuildInputs, ConsoleProgress, LasSource, PlySource,
    PointSource, PositionFileSource, SortConfig, StorageMode, TreeManifest, build_tree,
    sort_points, verify_manifest,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "point-cloud-spatial-index",
    about = "Sorts a point cloud along each axis and builds a disk-resident spatial index",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sort a point cloud into a position buffer and three axis streams.
    Sort(SortArgs),
    /// Build a tree from previously sorted streams.
    Build(BuildArgs),
    /// Sort, then build.
    Run {
        #[command(flatten)]
        sort: SortArgs,
        #[command(flatten)]
        tree: TreeArgs,
    },
    /// Check the streams and tree named by a manifest.
    Verify {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SortArgs {
    /// LAS/LAZ or PLY file, or a raw `_DATA.bin` position buffer.
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output directory (defaults to the input's directory).
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Output file name prefix (defaults to the input's file stem).
    #[arg(long)]
    stem: Option<String>,

    /// Memory cap for buffered points, in bytes.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CAP_BYTES)]
    memory_cap: u64,

    /// Concurrent merge workers per axis.
    #[arg(long, default_value_t = default_merge_workers())]
    merge_workers: usize,

    /// Directory for temporary files.
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Position buffer written by `sort`; the axis streams are found beside it.
    #[arg(value_name = "DATA_FILE")]
    positions: PathBuf,

    #[command(flatten)]
    tree: TreeArgs,

    /// Directory for temporary files.
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TreeArgs {
    /// Maximum ids per leaf.
    #[arg(short, long, default_value_t = DEFAULT_BUCKET_SIZE)]
    bucket: u32,

    #[arg(long, value_enum, default_value_t = BoundingVolumeKind::Sphere)]
    volume: BoundingVolumeKind,

    #[arg(long, value_enum, default_value_t = StorageMode::Auto)]
    storage: StorageMode,
}

impl TreeArgs {
    fn config(&self, work_dir: &Path) -> BuildConfig {
        BuildConfig::new(work_dir)
            .with_bucket_size(self.bucket)
            .with_bounding_volume(self.volume)
            .with_storage(self.storage)
    }
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Sort(args) => run_sort(&args).map(|_| ()),
        Command::Build(args) => run_build(&args),
        Command::Run { sort, tree } => run_sort(&sort).and_then(|config| {
            let inputs = BuildInputs::from_sort_config(&config);
            build(&inputs, &tree.config(&config.work_dir))
        }),
        Command::Verify { manifest } => run_verify(&manifest),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn sort_config(args: &SortArgs) -> SortConfig {
    let output_dir = args
        .output
        .clone()
        .or_else(|| args.input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let stem = args.stem.clone().unwrap_or_else(|| {
        let name = args
            .input
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        name.trim_end_matches("_DATA").to_string()
    });

    let config = SortConfig::new(&output_dir, &stem)
        .with_memory_cap(args.memory_cap)
        .with_merge_workers(args.merge_workers);
    match &args.work_dir {
        Some(work_dir) => config.with_work_dir(work_dir),
        None => config,
    }
}

fn open_source(path: &Path) -> CliResult<Box<dyn PointSource>> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "las" | "laz" => Ok(Box::new(LasSource::open(path)?)),
        "ply" => Ok(Box::new(PlySource::open(path)?)),
        "bin" => Ok(Box::new(PositionFileSource::open(path)?)),
        other => Err(format!("unsupported input format '{other}'").into()),
    }
}

/// True when `a` and `b` name the same existing file, or the same path.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn run_sort(args: &SortArgs) -> CliResult<SortConfig> {
    let config = sort_config(args);
    if same_file(&config.position_path(), &args.input) {
        return Err(format!(
            "sorting {} would overwrite it; pass --stem or --output",
            args.input.display()
        )
        .into());
    }
    let mut source = open_source(&args.input)?;
    let progress = ConsoleProgress::sorting(source.point_count());

    let output = sort_points(source.as_mut(), &config, &progress)?;

    println!("Sort Summary:");
    println!("  Points: {}", output.points);
    println!("  Runs per axis: {}", output.runs_per_axis);
    println!("  X stream: {}", output.inputs.x.display());
    println!("  Y stream: {}", output.inputs.y.display());
    println!("  Z stream: {}", output.inputs.z.display());
    println!("  Positions: {}", output.inputs.positions.display());
    println!(
        "  Origin: X={}, Y={}, Z={}",
        output.origin[0], output.origin[1], output.origin[2]
    );
    Ok(config)
}

fn run_build(args: &BuildArgs) -> CliResult<()> {
    let positions = &args.positions;
    let name = positions
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(POSITION_FILE_SUFFIX)
        .ok_or_else(|| {
            format!(
                "{} does not end in {POSITION_FILE_SUFFIX}",
                positions.display()
            )
        })?;
    let dir = positions.parent().unwrap_or(Path::new("."));

    let inputs = BuildInputs {
        x: dir.join(format!("{stem}_X.bin")),
        y: dir.join(format!("{stem}_Y.bin")),
        z: dir.join(format!("{stem}_Z.bin")),
        positions: positions.clone(),
    };
    let work_dir = args
        .work_dir
        .clone()
        .unwrap_or_else(|| dir.join(DEFAULT_WORK_DIR_NAME));
    build(&inputs, &args.tree.config(&work_dir))
}

fn build(inputs: &BuildInputs, config: &BuildConfig) -> CliResult<()> {
    let points = std::fs::metadata(&inputs.positions)?.len() / POSITION_RECORD_BYTES;
    let progress = ConsoleProgress::building(points);
    let output = build_tree(inputs, config, &progress)?;
    TreeManifest::read(&output.manifest)?.print_summary();
    Ok(())
}

fn run_verify(manifest: &Path) -> CliResult<()> {
    let mut failures = 0;
    for (file, report) in verify_manifest(manifest)? {
        println!("{file}: {report}");
        if !report.is_ok() {
            failures += 1;
        }
    }
    if failures > 0 {
        return Err(format!("{failures} files failed verification").into());
    }
    Ok(())
}
