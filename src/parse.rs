use crate::process::{glob_in, CrossotopeError};

use itertools::Itertools;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of the per-hemisphere label files produced by the ROI flow.
pub const LABEL_SUFFIX: &str = ".label.gii";

/// Sentinel accepted in place of a motion file.
pub const NO_MOTION: &str = "NONE";

static NRH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_nrh-([0-9]+)").expect("valid nrh pattern"));
static IX_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_ix-([0-9]+)").expect("valid ix pattern"));
static HEMISPHERE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([LR])\.label\.gii$").expect("valid hemisphere pattern"));
static CLUSTER_RESULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"RESULT: \[([0-9]+) ([0-9]+)\]").expect("valid result pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hemisphere {
    Left,
    Right,
}

impl Hemisphere {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "L" => Some(Hemisphere::Left),
            "R" => Some(Hemisphere::Right),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Hemisphere::Left => "L",
            Hemisphere::Right => "R",
        }
    }
}

/// One label file on disk, decoded from its name.
///
/// Grammar: `<prefix>_nrh-<digits>_ix-<digits>_<L|R>.label.gii`. The digit
/// widths are kept because downstream tools expect the zero-padded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiFile {
    pub path: PathBuf,
    pub nrh: u32,
    pub ix: u32,
    pub nrh_width: usize,
    pub ix_width: usize,
    pub hemisphere: Hemisphere,
}

fn numeric_token(
    pattern: &Regex,
    token: &'static str,
    name: &str,
) -> Result<(u32, usize), CrossotopeError> {
    let digits = pattern
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| CrossotopeError::MissingToken {
            token,
            context: name.to_string(),
        })?;
    let value = digits.parse::<u32>().map_err(|_| {
        CrossotopeError::InputValidation(format!("{} token '{}' out of range in {}", token, digits, name))
    })?;
    Ok((value, digits.len()))
}

/// Decodes a label file name into its bucket, replicate and hemisphere.
pub fn parse_roi_filename(path: &Path) -> Result<RoiFile, CrossotopeError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CrossotopeError::InputValidation(format!("Unreadable file name: {}", path.display())))?;

    let (nrh, nrh_width) = numeric_token(&NRH_TOKEN, "nrh", name)?;
    let (ix, ix_width) = numeric_token(&IX_TOKEN, "ix", name)?;
    let hemisphere = HEMISPHERE_TOKEN
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Hemisphere::from_tag(m.as_str()))
        .ok_or_else(|| CrossotopeError::MissingToken {
            token: "hemisphere",
            context: name.to_string(),
        })?;

    Ok(RoiFile {
        path: path.to_path_buf(),
        nrh,
        ix,
        nrh_width,
        ix_width,
        hemisphere,
    })
}

/// All label files of one ROI directory, indexed by ratio bucket and replicate.
#[derive(Debug, Clone)]
pub struct RoiIndex {
    pub root: PathBuf,
    pub files: Vec<RoiFile>,
    pub buckets: BTreeSet<u32>,
    pub replicates: BTreeSet<u32>,
    pub nrh_width: usize,
    pub ix_width: usize,
}

impl RoiIndex {
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn replicate_count(&self) -> usize {
        self.replicates.len()
    }

    /// Zero-pads a bucket number the way the generated file names do.
    pub fn format_bucket(&self, nrh: u32) -> String {
        format!("{:0width$}", nrh, width = self.nrh_width)
    }

    pub fn format_replicate(&self, ix: u32) -> String {
        format!("{:0width$}", ix, width = self.ix_width)
    }
}

/// Scans `dir` for label files and builds a validated [`RoiIndex`].
///
/// Files are read in name order, so the zero-pad widths come from the first
/// file by name. Every other file must use the same widths, every bucket must
/// carry the same replicate set, and each (bucket, replicate) needs exactly
/// one left and one right file.
pub fn build_roi_index(dir: &Path) -> Result<RoiIndex, CrossotopeError> {
    if !dir.is_dir() {
        return Err(CrossotopeError::NotFound(dir.to_path_buf()));
    }

    let mut label_paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(LABEL_SUFFIX))
        })
        .collect();
    label_paths.sort();

    if label_paths.is_empty() {
        return Err(CrossotopeError::MissingToken {
            token: "nrh",
            context: format!("no *{} files in {}", LABEL_SUFFIX, dir.display()),
        });
    }

    let files = label_paths
        .iter()
        .map(|path| parse_roi_filename(path))
        .collect::<Result<Vec<_>, _>>()?;

    let nrh_width = files[0].nrh_width;
    let ix_width = files[0].ix_width;
    if let Some(odd) = files.iter().find(|f| f.nrh_width != nrh_width || f.ix_width != ix_width) {
        return Err(CrossotopeError::Consistency(format!(
            "{} is zero-padded differently from {} (expected nrh width {}, ix width {})",
            odd.path.display(),
            files[0].path.display(),
            nrh_width,
            ix_width
        )));
    }

    let mut sides: BTreeMap<(u32, u32), Vec<Hemisphere>> = BTreeMap::new();
    for file in &files {
        sides.entry((file.nrh, file.ix)).or_default().push(file.hemisphere);
    }
    for (&(nrh, ix), found) in &sides {
        let left = found.iter().filter(|h| **h == Hemisphere::Left).count();
        let right = found.len() - left;
        if left != 1 || right != 1 {
            return Err(CrossotopeError::Consistency(format!(
                "nrh-{} ix-{} has {} left and {} right label files, expected one of each",
                nrh, ix, left, right
            )));
        }
    }

    let buckets: BTreeSet<u32> = files.iter().map(|f| f.nrh).collect();
    let replicates: BTreeSet<u32> = files.iter().map(|f| f.ix).collect();

    let mut per_bucket: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for &(nrh, ix) in sides.keys() {
        per_bucket.entry(nrh).or_default().insert(ix);
    }
    for (nrh, present) in &per_bucket {
        if *present != replicates {
            return Err(CrossotopeError::Consistency(format!(
                "nrh-{} is missing replicate(s) {}",
                nrh,
                replicates.difference(present).join(", ")
            )));
        }
    }

    info!(
        "Indexed {} label files: {} ratio buckets, {} replicates each",
        files.len(),
        buckets.len(),
        replicates.len()
    );

    Ok(RoiIndex {
        root: dir.to_path_buf(),
        files,
        buckets,
        replicates,
        nrh_width,
        ix_width,
    })
}

/// The two label files selected for one sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoiPair {
    pub nrh: u32,
    pub ix: u32,
    pub nrh_id: String,
    pub ix_id: String,
    pub left: PathBuf,
    pub right: PathBuf,
}

/// Finds the left and right label files for a bucket/replicate pair in the
/// index's directory. Anything but exactly one file per hemisphere fails.
pub fn resolve_roi_pair(index: &RoiIndex, nrh: u32, ix: u32) -> Result<RoiPair, CrossotopeError> {
    let nrh_id = index.format_bucket(nrh);
    let ix_id = index.format_replicate(ix);
    let resolution_error = |reason: String| CrossotopeError::Resolution {
        nrh: nrh_id.clone(),
        ix: ix_id.clone(),
        reason,
    };

    let matches = glob_in(&index.root, &format!("*_nrh-{}_ix-{}_?{}", nrh_id, ix_id, LABEL_SUFFIX))?;
    if matches.len() != 2 {
        return Err(resolution_error(format!(
            "expected 2 label files in {}, found {}",
            index.root.display(),
            matches.len()
        )));
    }

    let mut left = None;
    let mut right = None;
    for path in &matches {
        let file = parse_roi_filename(path)?;
        let slot = match file.hemisphere {
            Hemisphere::Left => &mut left,
            Hemisphere::Right => &mut right,
        };
        if slot.is_some() {
            return Err(resolution_error(format!(
                "found two {} hemisphere files",
                file.hemisphere.tag()
            )));
        }
        *slot = Some(fs::canonicalize(path)?);
    }

    let (left, right) = match (left, right) {
        (Some(left), Some(right)) => (left, right),
        _ => return Err(resolution_error("missing one hemisphere".to_string())),
    };
    debug!("Resolved nrh-{} ix-{}: {} | {}", nrh_id, ix_id, left.display(), right.display());
    Ok(RoiPair {
        nrh,
        ix,
        nrh_id,
        ix_id,
        left,
        right,
    })
}

/// Extracts the `(L, R)` cluster metrics from the cluster analyzer's output.
pub fn parse_cluster_result(output: &str) -> Result<(u64, u64), CrossotopeError> {
    let caps = CLUSTER_RESULT
        .captures(output)
        .ok_or_else(|| CrossotopeError::Parse(output.to_string()))?;
    let left = caps[1]
        .parse::<u64>()
        .map_err(|_| CrossotopeError::Parse(output.to_string()))?;
    let right = caps[2]
        .parse::<u64>()
        .map_err(|_| CrossotopeError::Parse(output.to_string()))?;
    Ok((left, right))
}

/// A scalar from the seed-map configuration, handed on in its textual form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigValue::Flag(b) => write!(f, "{}", b),
            ConfigValue::Number(n) => write!(f, "{}", n),
            ConfigValue::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedmapConfig {
    pub fd_threshold: ConfigValue,
    pub smoothing_kernel: ConfigValue,
    pub remove_outliers_yn: ConfigValue,
    pub max_minutes: ConfigValue,
    pub z_transform_yn: ConfigValue,
    pub cluster_value_min: ConfigValue,
    pub cluster_surf_area_min: ConfigValue,
}

pub fn parse_seedmap_config(path: &Path) -> Result<SeedmapConfig, CrossotopeError> {
    if !path.is_file() {
        return Err(CrossotopeError::InputValidation(format!(
            "Config file {} does not exist",
            path.display()
        )));
    }
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        if e.is_data() {
            // Well-formed JSON with a missing key or a value of the wrong type
            CrossotopeError::Config(format!("{}: {}", path.display(), e))
        } else {
            warn!("{} is not valid JSON", path.display());
            CrossotopeError::Json(e)
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionFile {
    File(PathBuf),
    None,
}

impl fmt::Display for MotionFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MotionFile::File(path) => write!(f, "{}", path.display()),
            MotionFile::None => write!(f, "{}", NO_MOTION),
        }
    }
}

/// The four session inputs, checked and made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    pub dtseries: PathBuf,
    pub left_midthickness: PathBuf,
    pub right_midthickness: PathBuf,
    pub motion: MotionFile,
}

fn session_file(path: &Path, position: usize, extension: &str) -> Result<PathBuf, CrossotopeError> {
    if !path.to_string_lossy().contains(extension) {
        return Err(CrossotopeError::InputValidation(format!(
            "Input session file {} should be a {} file, got {}",
            position,
            extension,
            path.display()
        )));
    }
    fs::canonicalize(path).map_err(|_| {
        CrossotopeError::InputValidation(format!(
            "Input session file {} ({}) does not exist",
            position,
            path.display()
        ))
    })
}

/// Checks dtseries, L/R midthickness and motion inputs in that order.
pub fn validate_session_files(files: &[PathBuf]) -> Result<SessionFiles, CrossotopeError> {
    if files.len() != 4 {
        return Err(CrossotopeError::InputValidation(format!(
            "Expected 4 session files (dtseries, L/R midthickness, motion), got {}",
            files.len()
        )));
    }

    let dtseries = session_file(&files[0], 1, ".dtseries.nii")?;
    let left_midthickness = session_file(&files[1], 2, ".surf.gii")?;
    let right_midthickness = session_file(&files[2], 3, ".surf.gii")?;
    let motion = if files[3].as_os_str() == NO_MOTION {
        MotionFile::None
    } else if files[3].to_string_lossy().contains(".mat") {
        MotionFile::File(session_file(&files[3], 4, ".mat")?)
    } else {
        return Err(CrossotopeError::InputValidation(format!(
            "Input session file 4 should be a .mat file or {}, got {}",
            NO_MOTION,
            files[3].display()
        )));
    };

    Ok(SessionFiles {
        dtseries,
        left_midthickness,
        right_midthickness,
        motion,
    })
}
