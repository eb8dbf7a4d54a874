//! Tests for shared types and utilities

use oddjob::core::LaunchSpec;
use oddjob::util::clock::now_ms;
use oddjob::{JobId, JobStatus, SubmitRequest};

#[test]
fn test_job_status_terminal() {
    assert!(!JobStatus::Waiting.is_terminal());
    assert!(!JobStatus::Running.is_terminal());
    assert!(JobStatus::Failed.is_terminal());
    assert!(JobStatus::Ended.is_terminal());
}

#[test]
fn test_job_status_serde() {
    assert_eq!(serde_json::to_string(&JobStatus::Waiting).unwrap(), "\"waiting\"");
    let parsed: JobStatus = serde_json::from_str("\"ended\"").unwrap();
    assert_eq!(parsed, JobStatus::Ended);
}

#[test]
fn test_job_id_is_transparent() {
    assert_eq!(serde_json::to_string(&JobId(42)).unwrap(), "42");
    let ids: Vec<JobId> = serde_json::from_str("[1, 2, 3]").unwrap();
    assert_eq!(ids, vec![JobId(1), JobId(2), JobId(3)]);
}

#[test]
fn test_submit_request_builder() {
    let req = SubmitRequest::new("align", "bwa")
        .with_cores(4)
        .with_args(["mem", "ref.fa"])
        .arg("reads.fq")
        .with_working_dir("/data/run1")
        .depends_on(JobId(3))
        .depends_on(JobId(5));
    assert_eq!(req.requested_cores, 4);
    assert_eq!(req.args, vec!["mem", "ref.fa", "reads.fq"]);
    assert_eq!(req.working_dir, std::path::PathBuf::from("/data/run1"));
    assert_eq!(req.dependencies, vec![JobId(3), JobId(5)]);
}

#[test]
fn test_submit_request_defaults() {
    let req = SubmitRequest::new("noop", "true");
    assert_eq!(req.requested_cores, 1);
    assert!(req.args.is_empty());
    assert!(req.dependencies.is_empty());
}

#[test]
fn test_launch_spec_roundtrip_fields() {
    let spec = LaunchSpec {
        command: "echo".into(),
        args: vec!["hi".into()],
        working_dir: "/tmp".into(),
    };
    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["command"], "echo");
    assert_eq!(json["args"][0], "hi");
}

#[test]
fn test_now_ms_is_recent() {
    // 2020-01-01T00:00:00Z
    assert!(now_ms() > 1_577_836_800_000);
}
