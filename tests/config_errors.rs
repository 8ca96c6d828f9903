// tests/config_errors.rs

use std::io::Write;
use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use buildgraph::config::{load_and_validate, load_graph};
use buildgraph::engine::{BuildOptions, BuildService};
use buildgraph::errors::BuildGraphError;
use buildgraph::exec::{Dispatcher, DriverRegistry};
use buildgraph::types::CascadeDepth;
use buildgraph_test_utils::{init_tracing, with_timeout};

fn file(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    write!(f, "{contents}").unwrap();
    f
}

#[test]
fn cycle_across_files_returns_structured_error() {
    let a = file(
        r#"
[images.a.v1]
parents = { b = ["v1"] }
"#,
    );
    let b = file(
        r#"
[images.b.v1]
parents = { a = ["v1"] }
"#,
    );

    match load_graph(&[a.path(), b.path()]) {
        Err(BuildGraphError::CycleDetected(msg)) => {
            assert!(msg.contains("a:v1") || msg.contains("b:v1"), "{msg}");
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

#[test]
fn self_reference_is_a_cycle() {
    let a = file(
        r#"
[images.a.v1]
children = { a = ["v1"] }
"#,
    );
    assert!(matches!(
        load_graph(&[a.path()]),
        Err(BuildGraphError::CycleDetected(_))
    ));
}

#[test]
fn every_orphan_is_reported_with_its_referrers() {
    let a = file(
        r#"
[images.app.v1]
parents = { base = ["v1"] }

[images.app.v2]
parents = { base = ["v1"] }

[images.tool.v1]
children = { plugin = ["v3"] }
"#,
    );

    match load_graph(&[a.path()]) {
        Err(BuildGraphError::OrphanReference(orphans)) => {
            assert_eq!(orphans.len(), 2);
            assert_eq!(orphans[0].image, "base:v1");
            assert_eq!(orphans[0].referenced_by, vec!["app:v1", "app:v2"]);
            assert_eq!(orphans[1].image, "plugin:v3");
            assert_eq!(orphans[1].referenced_by, vec!["tool:v1"]);
        }
        other => panic!("expected OrphanReference, got {other:?}"),
    }
}

#[test]
fn invalid_image_name_is_rejected() {
    let a = file(
        r#"
[images.app.v1]
parents = { "bad:name" = ["v1"] }
"#,
    );
    assert!(matches!(
        load_graph(&[a.path()]),
        Err(BuildGraphError::InvalidDefinition(_))
    ));
}

#[test]
fn empty_builder_is_a_config_error() {
    let a = file(
        r#"
[images.app.v1]
builder = "  "
"#,
    );
    match load_and_validate(a.path()) {
        Err(BuildGraphError::ConfigError(msg)) => assert!(msg.contains("app:v1")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(matches!(
        load_graph(&["/definitely/not/here/Buildgraph.toml"]),
        Err(BuildGraphError::IoError(_))
    ));
}

#[test]
fn unknown_version_is_image_not_found() {
    let a = file("[images.base.v1]\n");
    let loaded = load_graph(&[a.path()]).unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let dispatcher = Arc::new(Dispatcher::new(1, 1).unwrap());
        let service = BuildService::new(
            Arc::new(loaded.graph),
            DriverRegistry::with_defaults(),
            Arc::clone(&dispatcher),
        );

        match service.plan("base", &["v9".to_string()], &BuildOptions::default()) {
            Err(BuildGraphError::ImageNotFound(msg)) => assert!(msg.contains("v9")),
            other => panic!("expected ImageNotFound, got {other:?}"),
        }
        assert!(matches!(
            service.plan("nothing", &[], &BuildOptions::default()),
            Err(BuildGraphError::ImageNotFound(_))
        ));

        dispatcher.shutdown().await;
    });
}

#[cfg(unix)]
#[tokio::test]
async fn shell_builds_run_in_dependency_order() {
    init_tracing();

    let out = NamedTempFile::new().unwrap();
    let log = out.path().display().to_string();

    let images = file(&format!(
        r#"
[images.leaf.v1]
cmd = "echo $BUILDGRAPH_IMAGE_ID $BUILDGRAPH_PARENT_NAME >> {log}"
parents = {{ base = ["v1"] }}

[images.base.v1]
cmd = "echo $BUILDGRAPH_IMAGE_ID >> {log}"
"#
    ));
    let engine = file("[engine]\nworkers = 2\n");

    let loaded = load_graph(&[engine.path(), images.path()]).unwrap();
    assert_eq!(loaded.engine.workers, 2);

    let dispatcher = Arc::new(
        Dispatcher::new(loaded.engine.workers, loaded.engine.queue_capacity).unwrap(),
    );
    let service = BuildService::new(
        Arc::new(loaded.graph),
        DriverRegistry::with_defaults(),
        Arc::clone(&dispatcher),
    );

    let options = BuildOptions {
        cascade: Some(CascadeDepth::Unlimited),
        ..Default::default()
    };
    let report = with_timeout(service.build(&CancellationToken::new(), "base", &[], &options))
        .await
        .unwrap();
    assert_eq!(report.len(), 2);

    let written = std::fs::read_to_string(out.path()).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines, vec!["base:v1", "leaf:v1 base"]);

    dispatcher.shutdown().await;
}
