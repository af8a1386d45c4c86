use std::ffi::OsString;

use powersuite_core::elevation::ElevationPlatform;
use powersuite_windows::elevation::{join_windows_args, quote_windows_arg, OsElevation};
use powersuite_windows::system::{collect_summary, is_process_running};

#[test]
fn windows_args_are_quoted_for_argv_parsing() {
    assert_eq!(quote_windows_arg("plain"), "plain");
    assert_eq!(quote_windows_arg(""), "\"\"");
    assert_eq!(quote_windows_arg(r"C:\Program Files\x"), r#""C:\Program Files\x""#);
    assert_eq!(quote_windows_arg(r#"say "hi""#), r#""say \"hi\"""#);
    assert_eq!(quote_windows_arg(r"C:\dir with space\"), r#""C:\dir with space\\""#);

    let joined = join_windows_args(&[
        OsString::from("--request"),
        OsString::from(r"C:\Temp\a b\req.json"),
    ]);
    assert_eq!(joined, r#"--request "C:\Temp\a b\req.json""#);
}

#[test]
fn elevation_query_does_not_fail() {
    let platform = OsElevation::new();
    assert!(platform.is_elevated().is_ok());
}

#[test]
fn summary_reports_this_machine() {
    let summary = collect_summary();
    assert!(summary.cpu_count > 0);
    assert!(summary.total_memory > 0);
    assert!(summary.process_count > 0);
}

#[test]
fn empty_process_name_is_never_running() {
    assert!(!is_process_running(""));
    assert!(!is_process_running("definitely-not-a-real-process-name.exe"));
}
