#[cfg(test)]
mod external_tests {
    use crate::external::*;
    use crate::process::CrossotopeError;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn shell(script: &str) -> Invocation {
        Invocation::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_captures_stdout() {
        for timeout in [None, Some(Duration::from_secs(20))] {
            let out = ProcessRunner::new(timeout)
                .run(&shell("echo clusters; echo 'RESULT: [3 4]'"))
                .unwrap();
            assert_eq!(out, "clusters\nRESULT: [3 4]\n");
        }
    }

    #[test]
    fn test_nonzero_exit_is_external_tool_error() {
        let err = ProcessRunner::default()
            .run(&shell("echo partial; exit 3"))
            .unwrap_err();
        match &err {
            CrossotopeError::ExternalTool { program, status } => {
                assert_eq!(program, "sh");
                assert_eq!(status, "exit code 3");
            }
            other => panic!("expected external tool error, got {:?}", other),
        }
        assert_eq!(err.to_string(), "sh failed with exit code 3");
    }

    #[test]
    fn test_missing_program() {
        let err = ProcessRunner::default()
            .run(&Invocation::new("/nonexistent/crossotope/run_seedmap.sh"))
            .unwrap_err();
        assert!(matches!(err, CrossotopeError::MissingDependency(ref p) if p.ends_with("run_seedmap.sh")), "{}", err);
    }

    #[test]
    fn test_locate_tool_missing_from_path() {
        let runner = ProcessRunner::default();
        let err = runner.locate("crossotope-no-such-tool").unwrap_err();
        assert!(matches!(err, CrossotopeError::MissingDependency(_)));
        assert_eq!(err.to_string(), "crossotope-no-such-tool not found on PATH");

        assert!(find_on_path("crossotope-no-such-tool").is_none());
        assert!(find_on_path("sh").is_some());
    }

    #[test]
    fn test_missing_working_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("scratch");
        let err = ProcessRunner::default()
            .run(&shell("pwd").current_dir(&missing))
            .unwrap_err();
        assert!(matches!(err, CrossotopeError::NotFound(ref p) if *p == missing), "{}", err);
    }

    #[test]
    fn test_child_runs_in_working_dir() {
        let dir = tempdir().unwrap();
        let before = std::env::current_dir().unwrap();
        let out = ProcessRunner::default()
            .run(&shell("pwd -P").current_dir(dir.path()))
            .unwrap();
        assert_eq!(out.trim(), dir.path().canonicalize().unwrap().display().to_string());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_whole_process_group() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("late_write");
        let runner = ProcessRunner::new(Some(Duration::from_secs(1)));

        // The background subshell stands in for a tool started by the script
        let invocation = shell("(sleep 2; touch \"$1\") & sleep 30")
            .arg("sh")
            .arg(&marker);
        let started = Instant::now();
        let err = runner.run(&invocation).unwrap_err();
        assert!(matches!(err, CrossotopeError::Timeout { seconds: 1, .. }), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(10));

        std::thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "background process outlived the timeout");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_covers_processes_holding_stdout() {
        // The script exits at once, but its background sleep keeps stdout open
        let runner = ProcessRunner::new(Some(Duration::from_secs(1)));
        let started = Instant::now();
        let err = runner.run(&shell("sleep 30 & echo started")).unwrap_err();
        assert!(matches!(err, CrossotopeError::Timeout { .. }), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
