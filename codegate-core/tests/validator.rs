mod support;

use std::sync::Arc;

use codegate_core::{
    Advisory, AdvisoryDatabase, Artifact, DependencyRef, FindingKind, Language, Severity,
    TestHarness,
};
use pretty_assertions::assert_eq;
use support::{ScriptedRuntime, StaticSource, Step, validator, validator_with};

#[tokio::test]
async fn unparseable_source_is_never_executed() {
    let runtime = ScriptedRuntime::passing();
    let validator = validator(runtime.clone());

    for (source, language) in [
        ("def broken(:\n    pass\n", Language::Python),
        ("function f( {\n  return 1;\n", Language::JavaScript),
        ("print 'hello'\n", Language::Python),
        ("exec \"import os; os.system('id')\"\n", Language::Python),
        ("const x = <div/>;\n", Language::JavaScript),
    ] {
        let report = validator.validate(&Artifact::new(source, language)).await;
        assert_eq!(report.findings.len(), 1, "{source}");
        assert_eq!(report.findings[0].kind, FindingKind::Syntax);
        assert_eq!(report.findings[0].severity, Severity::Critical);
        assert!(report.execution_outcome.is_none());
        assert!(!report.valid);
    }
    assert_eq!(runtime.calls(), 0);
}

#[tokio::test]
async fn every_occurrence_of_a_repeatable_rule_is_reported() {
    let source = "import os\nos.system('a')\nos.system('b')\nos.system('c')\n";
    let report = validator(ScriptedRuntime::passing())
        .validate(&Artifact::new(source, Language::Python))
        .await;

    let shell: Vec<_> = report
        .findings
        .iter()
        .filter(|finding| finding.code.as_deref() == Some("python.shell-exec"))
        .collect();
    assert_eq!(shell.len(), 3);
    let lines: Vec<usize> = shell
        .iter()
        .filter_map(|finding| finding.location.map(|location| location.line))
        .collect();
    assert_eq!(lines, vec![2, 3, 4]);
    assert!(!report.valid);
    assert!((report.security_score - 0.7f64.powi(3)).abs() < 1e-9);
}

#[tokio::test]
async fn clean_artifact_with_passing_run_is_valid() {
    let runtime = ScriptedRuntime::passing();
    let report = validator(runtime.clone())
        .validate(&Artifact::new("print('hello')", Language::Python))
        .await;

    assert!(report.valid);
    assert!(report.findings.is_empty());
    assert!((report.security_score - 1.0).abs() < f64::EPSILON);
    let outcome = report.execution_outcome.expect("sandbox ran");
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(runtime.calls(), 1);
    assert_eq!(
        runtime.commands()[0],
        vec!["python3".to_string(), "main.py".to_string()]
    );
}

#[tokio::test]
async fn failing_or_hanging_runs_are_invalid() {
    let runtime = ScriptedRuntime::new([Step::Exit(1), Step::Hang]);
    let validator = validator(runtime.clone());
    let artifact = Artifact::new("print('hello')", Language::Python);

    let failed = validator.validate(&artifact).await;
    assert!(!failed.valid);
    assert!(failed.findings.is_empty());
    assert_eq!(
        failed.execution_outcome.as_ref().and_then(|o| o.exit_code),
        Some(1)
    );

    let hung = validator.validate(&artifact).await;
    assert!(!hung.valid);
    assert!(hung.timed_out());
    assert_eq!(hung.execution_outcome.and_then(|o| o.exit_code), None);
}

#[tokio::test]
async fn dependency_findings_follow_declaration_order() {
    let source = StaticSource::new().with_package(
        "requests",
        vec![Advisory {
            id: "CVE-2018-18074".to_string(),
            severity: Severity::Critical,
            summary: None,
        }],
    );
    let artifact = Artifact::new("print('hello')", Language::Python).with_dependencies([
        DependencyRef::new("requests", "==2.19.0"),
        DependencyRef::new("leftpad-py", "==1.0"),
    ]);

    let report = validator_with(ScriptedRuntime::passing(), source)
        .validate(&artifact)
        .await;

    let codes: Vec<_> = report
        .findings_of(FindingKind::VulnerableDependency)
        .map(|finding| (finding.code.clone(), finding.severity))
        .collect();
    assert_eq!(
        codes,
        vec![
            (Some("CVE-2018-18074".to_string()), Severity::Critical),
            (Some("audit.unresolvable".to_string()), Severity::Warning),
        ]
    );
    assert!(!report.valid);
}

#[tokio::test]
async fn unavailable_audit_degrades_to_one_warning() {
    let runtime = ScriptedRuntime::passing();
    let artifact = Artifact::new("print('hello')", Language::Python).with_dependencies([
        DependencyRef::new("requests", ">=2.0"),
        DependencyRef::new("numpy", ""),
    ]);

    let report = validator_with(runtime.clone(), StaticSource::unavailable())
        .validate(&artifact)
        .await;

    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].message, "audit unavailable");
    assert_eq!(report.findings[0].severity, Severity::Warning);
    assert_eq!(runtime.calls(), 1);
    assert!(report.valid, "a warning alone does not invalidate");
    assert!((report.security_score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn bundled_database_flags_known_vulnerable_pins() {
    let database = AdvisoryDatabase::bundled().expect("bundled advisories");
    let artifact = Artifact::new("import yaml\n", Language::Python)
        .with_dependencies([DependencyRef::new("PyYAML", "==5.3")]);

    let report = validator_with(ScriptedRuntime::passing(), database)
        .validate(&artifact)
        .await;

    let finding = report
        .findings_of(FindingKind::VulnerableDependency)
        .next()
        .expect("advisory finding");
    assert_eq!(finding.code.as_deref(), Some("CVE-2020-14343"));
    assert_eq!(finding.severity, Severity::Critical);
}

#[tokio::test]
async fn transient_sandbox_failure_is_retried_in_place() {
    let runtime = ScriptedRuntime::new([Step::Fail("daemon restarting".to_string())]);
    let report = validator(runtime.clone())
        .with_infrastructure_retries(1)
        .validate(&Artifact::new("print('hello')", Language::Python))
        .await;

    assert!(report.valid);
    assert!(report.sandbox_failure.is_none());
    assert_eq!(runtime.calls(), 2);
}

#[tokio::test]
async fn persistent_sandbox_failure_is_distinct_from_a_test_failure() {
    let runtime = ScriptedRuntime::new([
        Step::Fail("daemon down".to_string()),
        Step::Fail("daemon down".to_string()),
    ]);
    let report = validator(runtime.clone())
        .with_infrastructure_retries(1)
        .validate(&Artifact::new("print('hello')", Language::Python))
        .await;

    assert!(!report.valid);
    assert!(report.execution_outcome.is_none());
    let failure = report.sandbox_failure.expect("sandbox failure recorded");
    assert!(failure.contains("daemon down"), "{failure}");
    assert!(report.findings.is_empty());
    assert_eq!(runtime.calls(), 2);
}

#[tokio::test]
async fn configured_harness_replaces_the_smoke_run() {
    let runtime = ScriptedRuntime::passing();
    let harness = TestHarness::pytest().with_file(
        "test_main.py",
        "from main import add\n\ndef test_add():\n    assert add(2, 2) == 4\n",
    );
    let report = validator(runtime.clone())
        .with_harness(Language::Python, harness)
        .validate(&Artifact::new(
            "def add(a, b):\n    return a + b\n",
            Language::Python,
        ))
        .await;

    assert!(report.valid);
    assert_eq!(runtime.commands()[0][..3], ["python3", "-m", "pytest"]);
}

#[tokio::test]
async fn concurrent_validations_share_no_state() {
    let runtime = ScriptedRuntime::passing();
    let validator = Arc::new(validator(runtime.clone()));

    let tasks: Vec<_> = (0..4)
        .map(|n| {
            let validator = Arc::clone(&validator);
            tokio::spawn(async move {
                let artifact = Artifact::new(format!("print({n})"), Language::Python);
                validator.validate(&artifact).await
            })
        })
        .collect();

    for task in tasks {
        let report = task.await.expect("join");
        assert!(report.valid);
    }
    assert_eq!(runtime.calls(), 4);
}
