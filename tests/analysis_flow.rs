// Runs the binary against stub helper scripts. Everything is written before
// the first process is spawned, and the file holds a single test, so no
// script is ever open for writing while a child is forked.
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::tempdir;

fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn analysis_with_stub_tools() {
    let dir = tempdir().unwrap();
    let root = dir.path();

    // wb_command only has to exist on PATH
    let fake_bin = root.join("fakebin");
    write_script(&fake_bin.join("wb_command"), "exit 0");

    // The seed mapper must run inside the scratch directory and leave its
    // output under seedmap_dir_<nrh>
    let app = root.join("app");
    write_script(
        &app.join("bin/run_seedmap.sh"),
        "mkdir -p \"$PWD/seedmap_dir_$1\"\necho \"seedmap $1 $4\"",
    );
    write_script(
        &app.join("bin/analysis-cluster.sh"),
        "[ -d \"$1\" ] || exit 4\necho \"clusters above $2 / $3\"\necho \"RESULT: [100 200]\"",
    );

    let slow = root.join("slow");
    write_script(&slow.join("bin/run_seedmap.sh"), "exec sleep 30");

    let broken = root.join("broken");
    write_script(&broken.join("bin/run_seedmap.sh"), "echo 'license check failed'\nexit 3");
    write_script(&broken.join("bin/analysis-cluster.sh"), "echo \"RESULT: [1 1]\"");

    let empty_bin = root.join("emptybin");
    fs::create_dir(&empty_bin).unwrap();

    let rois = root.join("rois");
    fs::create_dir(&rois).unwrap();
    for nrh in 1..=10 {
        for ix in 1..=5 {
            for hemi in ["L", "R"] {
                fs::write(rois.join(format!("crossotope_nrh-{:03}_ix-{:02}_{}.label.gii", nrh, ix, hemi)), b"").unwrap();
            }
        }
    }

    let session = ["sub.dtseries.nii", "sub.L.surf.gii", "sub.R.surf.gii"];
    for name in session {
        fs::write(root.join(name), b"").unwrap();
    }
    let config = root.join("config.json");
    fs::write(
        &config,
        r#"{"fd_threshold": 0.2, "smoothing_kernel": 2.55, "remove_outliers_yn": 1, "max_minutes": 10,
            "z_transform_yn": 1, "cluster_value_min": 0.5, "cluster_surf_area_min": 30}"#,
    )
    .unwrap();
    let scratch = root.join("scratch");
    fs::create_dir(&scratch).unwrap();
    let output = root.join("output");

    let path_var = format!(
        "{}:{}",
        fake_bin.display(),
        std::env::var("PATH").unwrap_or_default()
    );

    let analysis = |cwd: &Path| {
        let mut cmd = Command::cargo_bin("crossotope").unwrap();
        cmd.env("PATH", &path_var)
            .arg("--cwd")
            .arg(cwd)
            .arg("analysis")
            .arg("--session")
            .args(session.iter().map(|n| root.join(n)))
            .arg("NONE")
            .arg("--roi_dir")
            .arg(&rois)
            .arg("--json_config")
            .arg(&config)
            .args(["--label", "sub-01", "--n_samples", "3", "--seed", "7"])
            .args(["--MRE", "/opt/mcr", "--matlab", "/opt/matlab"])
            .arg("--scratch_dir")
            .arg(&scratch)
            .arg("--output_dir")
            .arg(&output);
        cmd
    };

    analysis(&app).assert().success();

    let mut reader = csv::Reader::from_path(output.join("sub-01_results.csv")).unwrap();
    assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), vec!["nrh", "ix", "L", "R"]);
    let rows: Vec<Vec<u64>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 3);
    let buckets: HashSet<u64> = rows.iter().map(|r| r[0]).collect();
    assert_eq!(buckets.len(), 3);
    for row in &rows {
        assert!((1..=9).contains(&row[0]));
        assert!((1..=5).contains(&row[1]));
        assert_eq!(&row[2..], &[100, 200]);
        assert!(scratch.join(format!("seedmap_dir_{:03}", row[0])).is_dir());
    }

    fs::remove_file(output.join("sub-01_results.csv")).unwrap();

    // Without wb_command on PATH nothing runs
    analysis(&app)
        .env("PATH", &empty_bin)
        .assert()
        .failure()
        .stderr(predicate::str::contains("wb_command not found on PATH"));
    assert!(!output.join("sub-01_results.csv").exists());

    // A seed mapper exiting non-zero fails the whole run
    analysis(&broken)
        .assert()
        .failure()
        .stderr(predicate::str::contains("run_seedmap.sh failed with exit code 3"));
    assert!(!output.join("sub-01_results.csv").exists());

    // A hung seed mapper is killed and fails the run
    analysis(&slow)
        .arg("--timeout")
        .arg("1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("did not finish within 1s"));
    assert!(!output.join("sub-01_results.csv").exists());
}
