
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use local_emr::config::{EngineConfig, ExecBackendKind, ForkBackendKind, MockS3Config};
use local_emr::error::EmrError;
use local_emr::exec::SubprocessExec;
use local_emr::model::{ClusterSpec, ClusterState, StepSpec, StepState};
use local_emr::Engine;
use test_harness::{
    scripted_engine, step, test_config, wait_for_cluster, wait_for_state, FakeFork,
};

fn fake_spark_submit() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/bin/spark-submit")
        .to_string_lossy()
        .into_owned()
}

fn submit_step(name: &str, jar: &str) -> StepSpec {
    StepSpec::command(
        name,
        vec![
            fake_spark_submit(),
            "--master".to_string(),
            "yarn".to_string(),
            "--conf".to_string(),
            "spark.executor.memory=4g".to_string(),
            "--class".to_string(),
            "Main".to_string(),
            jar.to_string(),
            "input".to_string(),
        ],
    )
}

#[tokio::test]
async fn test_missing_artifact_fails_step_and_kept_cluster_waits() {
    let logs = tempfile::tempdir().unwrap();
    let config = test_config(logs.path());
    let engine = Engine::with_backends(
        config,
        Arc::new(FakeFork::default()),
        Arc::new(SubprocessExec::new(logs.path())),
    );

    let cluster = engine
        .create_cluster(ClusterSpec::new("analytics", "emr-5.27.0").keep_alive(true))
        .await
        .unwrap();
    wait_for_state(&engine, &cluster.id, ClusterState::Waiting).await;

    let added = engine
        .add_steps(&cluster.id, vec![submit_step("word-count", "/does/not/exist.jar")])
        .await
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].state, StepState::Pending);
    let step_id = added[0].id.clone();

    let (cluster_now, steps) = wait_for_cluster(
        &engine,
        &cluster.id,
        |_, steps| steps.iter().any(|s| s.state.is_terminal()),
        Duration::from_secs(10),
    )
    .await;

    let step = &steps[0];
    assert_eq!(step.id, step_id);
    assert_eq!(step.state, StepState::Failed);
    assert!(step.started_at.is_some());
    assert!(step.ended_at.is_some());
    let failure = step.failure.clone().unwrap();
    assert!(failure
        .message
        .as_deref()
        .unwrap()
        .contains("ClassNotFoundException"));
    assert!(failure.log_file.unwrap().contains("does not exist"));

    // Kept-alive cluster goes back to waiting
    assert_ne!(cluster_now.state, ClusterState::Terminating);
    wait_for_state(&engine, &cluster.id, ClusterState::Waiting).await;

    // Sizing options were stripped before the local run
    let stdout = std::fs::read_to_string(
        logs.path()
            .join("analytics")
            .join(&cluster.id)
            .join("steps")
            .join(&step_id)
            .join("stdout.log"),
    )
    .unwrap();
    assert!(stdout.contains("--class Main /does/not/exist.jar input"));
    assert!(!stdout.contains("--master"));
    assert!(!stdout.contains("spark.executor.memory"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_existing_artifact_completes() {
    let logs = tempfile::tempdir().unwrap();
    let jar = logs.path().join("app.jar");
    std::fs::write(&jar, b"jar").unwrap();
    let engine = Engine::with_backends(
        test_config(logs.path()),
        Arc::new(FakeFork::default()),
        Arc::new(SubprocessExec::new(logs.path())),
    );

    let cluster = engine
        .create_cluster(
            ClusterSpec::new("batch", "emr-6.0.0")
                .with_step(submit_step("run", &jar.to_string_lossy())),
        )
        .await
        .unwrap();

    let (cluster_now, steps) = wait_for_state(&engine, &cluster.id, ClusterState::Terminated).await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].state, StepState::Completed);
    assert!(steps[0].failure.is_none());
    assert!(cluster_now.ended_at.is_some());
}

#[tokio::test]
async fn test_cluster_without_steps_auto_terminates() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, fork, exec) = scripted_engine(test_config(logs.path()));

    let cluster = engine
        .create_cluster(ClusterSpec::new("short-lived", "emr-5.26.0"))
        .await
        .unwrap();
    assert_eq!(cluster.state, ClusterState::Starting);
    assert!(cluster.id.starts_with("j-"));

    let (done, steps) = wait_for_state(&engine, &cluster.id, ClusterState::Terminated).await;
    assert!(steps.is_empty());
    assert!(exec.runs().is_empty());
    assert!(done.started_at.is_some());
    assert!(done.ready_at.is_some());
    assert!(done.ended_at.is_some());
    assert!(done.state_change_reason.is_none());
    assert_eq!(fork.calls(), vec!["create:short-lived", "terminate:short-lived"]);
}

#[tokio::test]
async fn test_initial_steps_run_in_order() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, _fork, exec) = scripted_engine(test_config(logs.path()));

    let cluster = engine
        .create_cluster(
            ClusterSpec::new("pipeline", "emr-5.27.0")
                .with_step(step("extract", &["slow"]))
                .with_step(step("transform", &["fail"]))
                .with_step(step("load", &["ok"])),
        )
        .await
        .unwrap();

    let (_, steps) = wait_for_state(&engine, &cluster.id, ClusterState::Terminated).await;
    let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["extract", "transform", "load"]);
    let states: Vec<StepState> = steps.iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![StepState::Completed, StepState::Failed, StepState::Completed]
    );

    let ran: Vec<String> = exec.runs().iter().map(|s| s.name.clone()).collect();
    assert_eq!(ran, vec!["extract", "transform", "load"]);
    // Steps never overlap
    assert!(steps[0].ended_at.unwrap() <= steps[1].started_at.unwrap());
    assert!(steps[1].ended_at.unwrap() <= steps[2].started_at.unwrap());
}

#[tokio::test]
async fn test_invalid_step_rejects_whole_request() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, _fork, exec) = scripted_engine(test_config(logs.path()));
    let cluster = engine
        .create_cluster(ClusterSpec::new("strict", "emr-5.27.0").keep_alive(true))
        .await
        .unwrap();

    let result = engine
        .add_steps(
            &cluster.id,
            vec![step("good", &["ok"]), step("bad", &["invalid"])],
        )
        .await;
    assert!(matches!(result, Err(EmrError::Validation(_))));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, steps) = engine.describe_cluster(&cluster.id).await.unwrap();
    assert!(steps.is_empty());
    assert!(exec.runs().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_bad_release_label_is_rejected() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, fork, _exec) = scripted_engine(test_config(logs.path()));

    let result = engine
        .create_cluster(ClusterSpec::new("nope", "release-five"))
        .await;

    match result {
        Err(EmrError::Validation(message)) => assert!(message.contains("release-five")),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(engine.list_clusters().await.is_empty());
    assert!(fork.calls().is_empty());
}

#[tokio::test]
async fn test_steps_rejected_once_terminating() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, _fork, _exec) = scripted_engine(test_config(logs.path()));
    let cluster = engine
        .create_cluster(ClusterSpec::new("closing", "emr-5.27.0").keep_alive(true))
        .await
        .unwrap();
    wait_for_state(&engine, &cluster.id, ClusterState::Waiting).await;

    engine.terminate_cluster(&cluster.id).await.unwrap();
    let result = engine
        .add_steps(&cluster.id, vec![step("late", &["ok"])])
        .await;
    assert!(matches!(result, Err(EmrError::Validation(_))));

    wait_for_state(&engine, &cluster.id, ClusterState::Terminated).await;
    // Terminating again is a no-op
    engine.terminate_cluster(&cluster.id).await.unwrap();
    let (cluster_now, _) = engine.describe_cluster(&cluster.id).await.unwrap();
    assert_eq!(cluster_now.state, ClusterState::Terminated);
}

#[tokio::test]
async fn test_terminate_cancels_queued_steps() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, _fork, exec) = scripted_engine(test_config(logs.path()));
    let cluster = engine
        .create_cluster(ClusterSpec::new("busy", "emr-5.27.0").keep_alive(true))
        .await
        .unwrap();
    wait_for_state(&engine, &cluster.id, ClusterState::Waiting).await;

    engine
        .add_steps(
            &cluster.id,
            vec![step("running", &["slow"]), step("queued", &["ok"])],
        )
        .await
        .unwrap();
    wait_for_cluster(
        &engine,
        &cluster.id,
        |_, steps| steps[0].state == StepState::Running,
        Duration::from_secs(5),
    )
    .await;
    engine.terminate_cluster(&cluster.id).await.unwrap();

    let (_, steps) = wait_for_state(&engine, &cluster.id, ClusterState::Terminated).await;
    // The running step is never interrupted
    assert_eq!(steps[0].state, StepState::Completed);
    assert_eq!(steps[1].state, StepState::Cancelled);
    assert_eq!(exec.runs().len(), 1);
}

#[tokio::test]
async fn test_unknown_cluster() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, _fork, _exec) = scripted_engine(test_config(logs.path()));

    assert!(matches!(
        engine.describe_cluster("j-MISSING").await,
        Err(EmrError::ClusterNotFound(_))
    ));
    assert!(matches!(
        engine.terminate_cluster("j-MISSING").await,
        Err(EmrError::ClusterNotFound(_))
    ));
    assert!(matches!(
        engine.add_steps("j-MISSING", vec![step("s", &["ok"])]).await,
        Err(EmrError::ClusterNotFound(_))
    ));
}

#[tokio::test]
async fn test_step_host_defaults_to_cluster_name() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, _fork, _exec) = scripted_engine(test_config(logs.path()));
    let cluster = engine
        .create_cluster(
            ClusterSpec::new("named", "emr-5.27.0")
                .keep_alive(true)
                .with_step(step("s", &["ok"])),
        )
        .await
        .unwrap();
    let (_, steps) = engine.describe_cluster(&cluster.id).await.unwrap();
    assert_eq!(steps[0].host, "named");
    engine.shutdown().await;

    let (engine, _fork, _exec) =
        scripted_engine(test_config(logs.path()).with_emr_host("livy.internal"));
    let cluster = engine
        .create_cluster(
            ClusterSpec::new("named", "emr-5.27.0")
                .keep_alive(true)
                .with_step(step("s", &["ok"])),
        )
        .await
        .unwrap();
    let (_, steps) = engine.describe_cluster(&cluster.id).await.unwrap();
    assert_eq!(steps[0].host, "livy.internal");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_terminates_every_cluster() {
    let logs = tempfile::tempdir().unwrap();
    let (engine, fork, _exec) = scripted_engine(test_config(logs.path()));
    let first = engine
        .create_cluster(ClusterSpec::new("first", "emr-5.27.0").keep_alive(true))
        .await
        .unwrap();
    let second = engine
        .create_cluster(ClusterSpec::new("second", "emr-5.27.0").keep_alive(true))
        .await
        .unwrap();
    wait_for_state(&engine, &first.id, ClusterState::Waiting).await;
    wait_for_state(&engine, &second.id, ClusterState::Waiting).await;

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .unwrap();

    let clusters = engine.list_clusters().await;
    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].id, first.id);
    assert!(clusters.iter().all(|c| c.state == ClusterState::Terminated));
    let mut calls = fork.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec!["create:first", "create:second", "terminate:first", "terminate:second"]
    );

    let result = engine
        .create_cluster(ClusterSpec::new("late", "emr-5.27.0"))
        .await;
    assert!(matches!(result, Err(EmrError::Validation(_))));
}

#[tokio::test]
async fn test_engine_builds_backends_from_config() {
    let logs = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_log_root(logs.path())
        .with_mock_s3(MockS3Config {
            endpoint: "http://s3:2000".to_string(),
            access_key_id: "TESTING".to_string(),
            secret_access_key: "TESTING".to_string(),
        });
    let engine = Engine::new(config).unwrap();
    assert!(engine.config().mock_s3.is_some());
    assert!(engine.list_clusters().await.is_empty());

    let engine = Engine::new(
        EngineConfig::new(ExecBackendKind::Subprocess, ForkBackendKind::LocalFetch)
            .with_log_root(logs.path()),
    )
    .unwrap();
    assert_eq!(engine.config().exec, ExecBackendKind::Subprocess);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_local_runtime_is_chosen_per_cluster() {
    let logs = tempfile::tempdir().unwrap();
    let install = tempfile::tempdir().unwrap();
    for dist in ["spark-2.4.4-bin-without-hadoop", "spark-2.3.1-bin-without-hadoop"] {
        std::fs::create_dir_all(install.path().join(dist).join("bin")).unwrap();
    }
    let mut config = EngineConfig::new(ExecBackendKind::Subprocess, ForkBackendKind::LocalFetch)
        .with_log_root(logs.path())
        .with_idle_interval_ms(20);
    config.fetch.install_root = install.path().to_path_buf();
    config.fetch.mirror_url = "http://127.0.0.1:1".to_string();
    let engine = Engine::new(config).unwrap();

    let show_runtime = || {
        StepSpec::command(
            "runtime",
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo $SPARK_HOME; echo ${PATH%%:*}".to_string(),
            ],
        )
    };
    let newer = engine
        .create_cluster(ClusterSpec::new("newer", "emr-5.27.0").with_step(show_runtime()))
        .await
        .unwrap();
    let older = engine
        .create_cluster(ClusterSpec::new("older", "emr-5.16.0").with_step(show_runtime()))
        .await
        .unwrap();

    for (cluster, dist) in [
        (&newer, "spark-2.4.4-bin-without-hadoop"),
        (&older, "spark-2.3.1-bin-without-hadoop"),
    ] {
        let (_, steps) = wait_for_state(&engine, &cluster.id, ClusterState::Terminated).await;
        assert_eq!(steps[0].state, StepState::Completed);
        let stdout = std::fs::read_to_string(
            logs.path()
                .join(&cluster.name)
                .join(&cluster.id)
                .join("steps")
                .join(&steps[0].id)
                .join("stdout.log"),
        )
        .unwrap();
        let home = install.path().join(dist);
        assert_eq!(
            stdout,
            format!("{}\n{}\n", home.display(), home.join("bin").display())
        );
    }
    assert!(std::env::var("SPARK_HOME").map_or(true, |home| !home.contains("without-hadoop")));
}
