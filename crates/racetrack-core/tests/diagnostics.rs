use std::fs;

use racetrack_core::{Detector, DetectorConfig, Error, ThreadId};
use tempfile::tempdir;

#[test]
fn test_warnings_and_summary_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("racetrack.log");
    let config = DetectorConfig::from_options([
        "detector-name=diag".to_string(),
        format!("output-path={}", path.display()),
        "--stats".to_string(),
    ])
    .unwrap();

    let detector = Detector::new();
    detector.init(config, |_| {}).unwrap();
    let t2 = detector.fork(ThreadId(1), ThreadId(2)).unwrap();
    let t3 = detector.fork(ThreadId(1), ThreadId(3)).unwrap();
    assert!(detector.func_exit(&t2).is_err());
    detector.write(&t2, 0x10, 0, 4).unwrap();
    detector.write(&t3, 0x10, 0, 4).unwrap();
    detector.finalize().unwrap();

    let log = fs::read_to_string(&path).unwrap();
    assert!(log.contains("[diag] warning: func_exit on empty call stack of thread 2"));
    assert!(log.contains("without any lock or sync events"));
    assert!(log.contains("summary:"));
    assert!(log.contains("races: 1 (write-write 1"));
}

#[test]
fn test_no_summary_without_stats() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("quiet.log");
    let detector = Detector::new();
    detector
        .init(DetectorConfig::default().with_output_path(&path), |_| {})
        .unwrap();
    detector.register(ThreadId(1)).unwrap();
    detector.finalize().unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "");
}

#[test]
fn test_unwritable_output_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing").join("out.log");
    let detector = Detector::new();
    let err = detector
        .init(DetectorConfig::default().with_output_path(path), |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    // A failed init leaves the detector usable.
    detector.init(DetectorConfig::default(), |_| {}).unwrap();
}
