mod external_tests;
mod results_tests;

use std::fs;
use std::path::Path;

/// Writes empty `<prefix>_nrh-<b>_ix-<r>_<L|R>.label.gii` files for buckets
/// `1..=buckets` and replicates `1..=replicates`, padded to 3 and 2 digits.
pub(crate) fn write_label_files(dir: &Path, prefix: &str, buckets: u32, replicates: u32) {
    for nrh in 1..=buckets {
        for ix in 1..=replicates {
            for hemi in ["L", "R"] {
                let name = format!("{}_nrh-{:03}_ix-{:02}_{}.label.gii", prefix, nrh, ix, hemi);
                fs::write(dir.join(name), b"").unwrap();
            }
        }
    }
}

pub(crate) const FULL_CONFIG: &str = r#"{
    "fd_threshold": 0.2,
    "smoothing_kernel": 2.55,
    "remove_outliers_yn": 1,
    "max_minutes": 10,
    "z_transform_yn": "Y",
    "cluster_value_min": 0.5,
    "cluster_surf_area_min": 30
}"#;
