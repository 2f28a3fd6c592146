use super::*;
use std::time::Duration;
use tenderbot::models::FailurePolicy;
use tenderbot::{PassScheduler, RunMode, SchedulerState};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_loop_repeats_passes_until_stopped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);

    let store = create_test_store().await?;
    let pipeline = build_pipeline(&get_test_config(), vec![html_file_source("a", &listing)], store.clone());
    let scheduler = Arc::new(PassScheduler::new(
        pipeline,
        RunMode::Loop(Duration::from_millis(50)),
        FailurePolicy::AllSources,
    ));

    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        let token = token.clone();
        async move { scheduler.run(token).await }
    });

    tokio::time::timeout(Duration::from_secs(10), async {
        while scheduler.stats().completed_passes < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    token.cancel();
    let last = tokio::time::timeout(Duration::from_secs(5), handle).await??;

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert!(scheduler.is_success(last.as_ref()));

    // Later passes see everything as already stored.
    let stats = scheduler.stats();
    assert!(stats.completed_passes >= 3);
    assert_eq!(stats.total_persisted, 3);
    assert_eq!(stats.failed_passes, 0);
    assert_eq!(store.count().await?, 3);

    Ok(())
}

#[tokio::test]
async fn test_stop_request_is_honoured_while_sleeping() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);

    let store = create_test_store().await?;
    let pipeline = build_pipeline(&get_test_config(), vec![html_file_source("a", &listing)], store);
    let scheduler = Arc::new(PassScheduler::new(
        pipeline,
        RunMode::Loop(Duration::from_secs(3600)),
        FailurePolicy::AllSources,
    ));
    let mut state = scheduler.subscribe();

    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        let token = token.clone();
        async move { scheduler.run(token).await }
    });

    state.wait_for(|s| *s == SchedulerState::Sleeping).await?;
    token.cancel();

    let last = tokio::time::timeout(Duration::from_secs(2), handle).await??;
    assert_eq!(last.map(|r| r.persisted), Some(3));
    assert_eq!(scheduler.stats().completed_passes, 1);

    Ok(())
}

#[tokio::test]
async fn test_single_pass_exit_status_follows_policy() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listing = write_fixture(dir.path(), "a.html", LISTING_A);
    let missing = dir.path().join("missing.html");

    for (policy, expect_success) in [(FailurePolicy::AllSources, true), (FailurePolicy::AnySource, false)] {
        let store = create_test_store().await?;
        let pipeline = build_pipeline(
            &get_test_config(),
            vec![html_file_source("a", &listing), html_file_source("b", &missing)],
            store,
        );
        let scheduler = PassScheduler::new(pipeline, RunMode::Once, policy);

        let last = scheduler.run(CancellationToken::new()).await;
        assert_eq!(scheduler.is_success(last.as_ref()), expect_success, "{:?}", policy);
    }

    let store = create_test_store().await?;
    let pipeline = build_pipeline(&get_test_config(), vec![html_file_source("b", &missing)], store);
    let scheduler = PassScheduler::new(pipeline, RunMode::Once, FailurePolicy::AllSources);
    let last = scheduler.run(CancellationToken::new()).await;
    assert!(!scheduler.is_success(last.as_ref()));

    Ok(())
}
