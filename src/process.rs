use crate::external::{Invocation, ToolRunner};
use crate::parse::{
    build_roi_index, parse_cluster_result, parse_seedmap_config, resolve_roi_pair,
    validate_session_files, RoiIndex, RoiPair, SeedmapConfig, SessionFiles,
};
use crate::results::{ResultRow, ResultTable};
use crate::sampler::Sampler;

use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Name the input ROI is copied to before mirroring.
pub const ORIGINAL_ROI: &str = "original_roi.dscalar.nii";
/// Name of the mirrored (right hemisphere) ROI written by the mirror script.
pub const MIRRORED_ROI: &str = "flipped_roi.dscalar.nii";

const MIRROR_SCRIPT: &str = "rois_create_mirror.sh";
const PERMUTE_SCRIPT: &str = "rois_permute_ROI.R";
const SURFACE_SCRIPT: &str = "rois_dscalar_to_surface.sh";
const SEEDMAP_SCRIPT: &str = "run_seedmap.sh";
const CLUSTER_SCRIPT: &str = "analysis-cluster.sh";

// Define command-line arguments using clap
#[derive(Parser, Debug)]
#[command(
    name = "crossotope",
    author,
    version,
    about = "Create mixed left/right ROI variants and run seed-based connectivity over them",
    after_help = "Run roi --help or analysis --help for more details"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding the bin/ helper scripts
    #[arg(long = "cwd", value_name = "DIR", default_value = "/home", global = true)]
    pub cwd: PathBuf,

    /// Kill any external program that runs longer than this many seconds
    #[arg(long = "timeout", value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Log debug output, including captured output of external programs
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create ROIs.
    Roi(RoiArgs),
    /// Analyze session.
    Analysis(AnalysisArgs),
}

#[derive(ClapArgs, Debug)]
pub struct RoiArgs {
    /// CIFTI file containing LEFT hemisphere ROI to work with. Does not currently support R->L.
    #[arg(short = 'i', long = "input_roi", value_name = "FILE")]
    pub input_roi: PathBuf,

    /// How many alternative versions at each mixing ratio L/R to create.
    #[arg(short = 'n', long = "n_repeats", value_name = "N", default_value_t = 10)]
    pub repeats: usize,

    /// Prefix to output: PFX_nrh-X_ix-Y.dlabel.nii
    #[arg(short = 'p', long = "prefix", value_name = "STR", default_value = "crossotope")]
    pub prefix: String,

    /// Where generated label files are written
    #[arg(long = "roi_output_dir", value_name = "DIR", default_value = "/roi_outputs")]
    pub output_dir: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct AnalysisArgs {
    /// Files to analyze: dtseries, L/R midthickness, motion (or NONE)
    #[arg(short = 's', long = "session", value_name = "FILE", num_args = 4, required = true)]
    pub session: Vec<PathBuf>,

    /// Directory containing label files to use
    #[arg(short = 'r', long = "roi_dir", value_name = "DIR", default_value = "/input_rois/")]
    pub roi_dir: PathBuf,

    /// JSON file containing configuration for seedmapper
    #[arg(short = 'j', long = "json_config", value_name = "FILE", default_value = "/config.json")]
    pub config_file: PathBuf,

    /// Prefix for output CSV
    #[arg(short = 'l', long = "label", value_name = "STR", default_value = "crossotope")]
    pub label: String,

    /// How many mixing values to use.
    #[arg(short = 'n', long = "n_samples", value_name = "N", default_value_t = 100)]
    pub samples: usize,

    /// MATLAB runtime directory; R2019a recommended
    #[arg(short = 'm', long = "MRE", value_name = "DIR")]
    pub mre_dir: PathBuf,

    /// Path to MATLAB binary.
    #[arg(short = 'M', long = "matlab", value_name = "FILE")]
    pub matlab: PathBuf,

    /// Seed for the ratio/replicate draw; a random seed is chosen and logged when absent
    #[arg(long = "seed", value_name = "N")]
    pub seed: Option<u64>,

    /// Scratch root for seed-map outputs, also the seed mapper's working directory
    #[arg(long = "scratch_dir", value_name = "DIR", default_value = "/tmp")]
    pub scratch_dir: PathBuf,

    /// Directory the results CSV is written to
    #[arg(long = "output_dir", value_name = "DIR", default_value = "/output")]
    pub output_dir: PathBuf,
}

// Custom error types
#[derive(Debug, thiserror::Error)]
pub enum CrossotopeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(PathBuf),
    #[error("Invalid input: {0}")]
    InputValidation(String),
    #[error("{0} not found on PATH")]
    MissingDependency(String),
    #[error("Missing '{token}' token: {context}")]
    MissingToken { token: &'static str, context: String },
    #[error("Inconsistent input: {0}")]
    Consistency(String),
    #[error("Cannot sample {requested} ratio bucket(s) without replacement from {available} (need 1 <= n < {available})")]
    SampleSize { requested: usize, available: usize },
    #[error("Could not resolve ROI pair nrh={nrh} ix={ix}: {reason}")]
    Resolution { nrh: String, ix: String, reason: String },
    #[error("{program} failed with {status}")]
    ExternalTool { program: String, status: String },
    #[error("{program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },
    #[error("No 'RESULT: [<int> <int>]' found in cluster output:\n{0}")]
    Parse(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Everything the ROI flow needs, resolved once from the command line.
#[derive(Debug, Clone)]
pub struct RoiOptions {
    pub input_roi: PathBuf,
    pub repeats: usize,
    pub prefix: String,
    pub cwd: PathBuf,
    pub output_dir: PathBuf,
}

impl RoiOptions {
    pub fn from_args(args: &RoiArgs, cwd: &Path) -> Self {
        RoiOptions {
            input_roi: args.input_roi.clone(),
            repeats: args.repeats,
            prefix: args.prefix.clone(),
            cwd: cwd.to_path_buf(),
            output_dir: args.output_dir.clone(),
        }
    }

    fn script(&self, name: &str) -> PathBuf {
        self.cwd.join("bin").join(name)
    }
}

/// Everything the analysis flow needs, resolved once from the command line.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub session: Vec<PathBuf>,
    pub roi_dir: PathBuf,
    pub config_file: PathBuf,
    pub label: String,
    pub samples: usize,
    pub mre_dir: PathBuf,
    pub matlab: PathBuf,
    pub cwd: PathBuf,
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl AnalysisOptions {
    pub fn from_args(args: &AnalysisArgs, cwd: &Path) -> Self {
        AnalysisOptions {
            session: args.session.clone(),
            roi_dir: args.roi_dir.clone(),
            config_file: args.config_file.clone(),
            label: args.label.clone(),
            samples: args.samples,
            mre_dir: args.mre_dir.clone(),
            matlab: args.matlab.clone(),
            cwd: cwd.to_path_buf(),
            scratch_dir: args.scratch_dir.clone(),
            output_dir: args.output_dir.clone(),
        }
    }

    fn script(&self, name: &str) -> PathBuf {
        self.cwd.join("bin").join(name)
    }

    /// Where the seed mapper writes its output for one zero-padded bucket id.
    pub fn seedmap_dir(&self, bucket_id: &str) -> PathBuf {
        self.scratch_dir.join(format!("seedmap_dir_{}", bucket_id))
    }

    pub fn results_path(&self) -> PathBuf {
        ResultTable::output_path(&self.output_dir, &self.label)
    }
}

/// File counts found in the ROI output directory after conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedFileCounts {
    pub dscalar: usize,
    pub dlabel: usize,
    pub label_gii: usize,
}

impl GeneratedFileCounts {
    pub fn collect(output_dir: &Path) -> Result<Self, CrossotopeError> {
        Ok(GeneratedFileCounts {
            dscalar: glob_in(output_dir, "*.dscalar.nii")?.len(),
            dlabel: glob_in(output_dir, "*.dlabel.nii")?.len(),
            label_gii: glob_in(output_dir, "*.label.gii")?.len(),
        })
    }

    /// One dlabel per dscalar, two label files (L and R) per dlabel.
    pub fn validate(&self) -> Result<(), CrossotopeError> {
        if self.dscalar != self.dlabel {
            return Err(CrossotopeError::Consistency(format!(
                "Number of dscalars ({}) and dlabels ({}) does not match",
                self.dscalar, self.dlabel
            )));
        }
        if 2 * self.dlabel != self.label_gii {
            return Err(CrossotopeError::Consistency(format!(
                "Number of 2 * dlabels ({}) and label files ({}) does not match",
                2 * self.dlabel,
                self.label_gii
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiGenerationSummary {
    pub output_dir: PathBuf,
    pub label_files: usize,
    pub removed_intermediates: usize,
}

/// Lists files in `dir` matching a shell-style `pattern`.
pub(crate) fn glob_in(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, CrossotopeError> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let entries = glob::glob(&full)
        .map_err(|e| CrossotopeError::InputValidation(format!("Bad file pattern {}: {}", full, e)))?;
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|e| CrossotopeError::Io(e.into_error()))?);
    }
    paths.sort();
    Ok(paths)
}

/// Runs the ROI generation flow: mirror, permute, convert, then verify and clean up.
pub fn create_rois(
    options: &RoiOptions,
    runner: &dyn ToolRunner,
) -> Result<RoiGenerationSummary, CrossotopeError> {
    println!("\n{}", "=== Running ROI flow ... ===".green().bold());

    let input_name = options.input_roi.to_string_lossy();
    if !input_name.contains(".dscalar.nii") {
        return Err(CrossotopeError::InputValidation(format!(
            "Input ROI {} should be a .dscalar.nii file",
            input_name
        )));
    }
    if !options.input_roi.is_file() {
        return Err(CrossotopeError::InputValidation(format!(
            "Input ROI {} does not exist",
            input_name
        )));
    }

    let wb_command = runner.locate("wb_command")?;
    info!("wb_command path is: {}", wb_command.display());
    let rscript = runner.locate("Rscript")?;
    debug!("Rscript path is: {}", rscript.display());

    // Work on a copy under a fixed name so the helper scripts see stable inputs
    let input_roi = options.cwd.join(ORIGINAL_ROI);
    let already_in_place = fs::canonicalize(&input_roi)
        .map(|existing| Some(existing) == fs::canonicalize(&options.input_roi).ok())
        .unwrap_or(false);
    if !already_in_place {
        fs::copy(&options.input_roi, &input_roi)?;
    }
    let mirrored_roi = options.cwd.join(MIRRORED_ROI);

    println!("\n{}", "== Creating mirrored ROI ==".cyan());
    runner.run(
        &Invocation::new(options.script(MIRROR_SCRIPT))
            .arg(&wb_command)
            .arg(&input_roi)
            .arg(&mirrored_roi)
            .current_dir(&options.cwd),
    )?;

    println!("\n{}", format!("== Creating permutations ({}) ==", options.repeats).cyan());
    fs::create_dir_all(&options.output_dir)?;
    runner.run(
        &Invocation::new(&rscript)
            .arg(options.script(PERMUTE_SCRIPT))
            .arg(&wb_command)
            .arg(&input_roi)
            .arg(&mirrored_roi)
            .arg(options.repeats.to_string())
            .arg(&options.output_dir)
            .arg(&options.prefix)
            .current_dir(&options.cwd),
    )?;

    println!("\n{}", "== Converting to label files ==".cyan());
    runner.run(
        &Invocation::new(options.script(SURFACE_SCRIPT))
            .arg(&wb_command)
            .arg(&options.output_dir)
            .current_dir(&options.cwd),
    )?;

    let counts = GeneratedFileCounts::collect(&options.output_dir)?;
    info!(
        "Generated {} dscalar, {} dlabel and {} label files",
        counts.dscalar, counts.dlabel, counts.label_gii
    );
    counts.validate()?;

    println!("\n{}", "== Removing old dscalar/dlabels ==".cyan());
    let mut removed = 0;
    for pattern in ["*.dscalar.nii", "*.dlabel.nii"] {
        for path in glob_in(&options.output_dir, pattern)? {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }

    Ok(RoiGenerationSummary {
        output_dir: options.output_dir.clone(),
        label_files: counts.label_gii,
        removed_intermediates: removed,
    })
}

/// Runs the analysis flow and returns the filled result table. Nothing is
/// written to disk here; any failure discards the rows collected so far.
pub fn analyze_session<R: Rng>(
    options: &AnalysisOptions,
    runner: &dyn ToolRunner,
    sampler: &mut Sampler<R>,
) -> Result<ResultTable, CrossotopeError> {
    println!("\n{}", "=== Running analysis flow ... ===".green().bold());

    let session = validate_session_files(&options.session)?;
    info!("dtseries is: {}", session.dtseries.display());
    info!("L midthick is: {}", session.left_midthickness.display());
    info!("R midthick is: {}", session.right_midthickness.display());
    info!("Motion file is: {}", session.motion);

    let wb_command = runner.locate("wb_command")?;
    info!("wb_command path is: {}", wb_command.display());

    let index = build_roi_index(&options.roi_dir)?;
    debug!("ROI index: {}", describe_index(&index));
    println!(
        "Found {} ROIs with {} copies each.",
        index.bucket_count(),
        index.replicate_count()
    );

    let config = parse_seedmap_config(&options.config_file)?;
    info!("Seedmap configuration: {:#?}", config);

    let draws = sampler.draw(&index, options.samples)?;
    fs::create_dir_all(&options.scratch_dir)?;
    let mut table = ResultTable::zeros(draws.len());

    let progress = ProgressBar::new(draws.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    for (row, draw) in draws.iter().enumerate() {
        let pair = resolve_roi_pair(&index, draw.nrh, draw.ix)?;
        progress.set_message(format!("nrh-{} ix-{}", pair.nrh_id, pair.ix_id));

        let (left, right) = run_sample(options, runner, &session, &config, &pair)?;
        debug!("nrh={} ix={} -> L={} R={}", draw.nrh, draw.ix, left, right);

        table.set_row(
            row,
            &ResultRow {
                nrh: u64::from(draw.nrh),
                ix: u64::from(draw.ix),
                left,
                right,
            },
        );
        progress.inc(1);
    }
    progress.finish_with_message("all samples analyzed");

    Ok(table)
}

/// Runs the seed mapper and then the cluster analyzer for one resolved pair.
fn run_sample(
    options: &AnalysisOptions,
    runner: &dyn ToolRunner,
    session: &SessionFiles,
    config: &SeedmapConfig,
    pair: &RoiPair,
) -> Result<(u64, u64), CrossotopeError> {
    // The seed mapper writes conversion temporaries into its working
    // directory, so it runs from the scratch root.
    let seedmap = Invocation::new(options.script(SEEDMAP_SCRIPT))
        .arg(&pair.nrh_id)
        .arg(&options.matlab)
        .arg(&options.mre_dir)
        .arg(&pair.left)
        .arg(&pair.right)
        .arg(&session.dtseries)
        .arg(&session.left_midthickness)
        .arg(&session.right_midthickness)
        .arg(session.motion.to_string())
        .arg(config.fd_threshold.to_string())
        .arg(config.smoothing_kernel.to_string())
        .arg(config.remove_outliers_yn.to_string())
        .arg(config.max_minutes.to_string())
        .arg(config.z_transform_yn.to_string())
        .current_dir(&options.scratch_dir);
    let seedmap_log = runner.run(&seedmap)?;
    for line in seedmap_log.lines() {
        debug!("[{}] {}", SEEDMAP_SCRIPT, line);
    }

    let cluster = Invocation::new(options.script(CLUSTER_SCRIPT))
        .arg(options.seedmap_dir(&pair.nrh_id))
        .arg(config.cluster_value_min.to_string())
        .arg(config.cluster_surf_area_min.to_string())
        .current_dir(&options.scratch_dir);
    let cluster_output = runner.run(&cluster)?;
    for line in cluster_output.lines() {
        debug!("[{}] {}", CLUSTER_SCRIPT, line);
    }

    parse_cluster_result(&cluster_output)
}

/// Analyzes the session, prints the table and writes `<label>_results.csv`.
pub fn run_analysis<R: Rng>(
    options: &AnalysisOptions,
    runner: &dyn ToolRunner,
    sampler: &mut Sampler<R>,
) -> Result<PathBuf, CrossotopeError> {
    let table = analyze_session(options, runner, sampler)?;
    table.display(20)?;

    fs::create_dir_all(&options.output_dir)?;
    let output = options.results_path();
    table.write_csv(&output)?;
    info!("Wrote {} result rows to {}", table.len(), output.display());
    Ok(output)
}

fn describe_index(index: &RoiIndex) -> String {
    format!(
        "{} buckets x {} replicates in {}",
        index.bucket_count(),
        index.replicate_count(),
        index.root.display()
    )
}
