//! Per-account isolation of a dispatch
//!
//! One account failing, panicking or being cancelled must never change what
//! happens to its siblings, and every selected account ends with exactly one
//! result.

use anyhow::Result;
use libgalefling::dispatcher::Dispatcher;
use libgalefling::error::ErrorCode;
use libgalefling::events::{Event, EventBus};
use libgalefling::platforms::mock::{MockConfig, MockFactory};
use libgalefling::specs::{PlatformId, SpecTable};
use libgalefling::types::{AccountConfig, PostRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn silent_accounts() -> Vec<AccountConfig> {
    vec![
        AccountConfig::new(PlatformId::Twitter, "twitter_1", "main"),
        AccountConfig::new(PlatformId::Twitter, "twitter_2", "art"),
        AccountConfig::new(PlatformId::Bluesky, "bluesky_1", "rin"),
        AccountConfig::new(PlatformId::Bluesky, "bluesky_2", "kit"),
    ]
}

fn request_all() -> PostRequest {
    PostRequest::new("New drop is live").with_accounts(["twitter_1", "twitter_2", "bluesky_1", "bluesky_2"])
}

#[tokio::test]
async fn test_expired_credentials_do_not_affect_sibling() -> Result<()> {
    let factory = MockFactory::new()
        .with_account("bluesky_1", MockConfig::auth_failure(ErrorCode::AuthExpired))
        .with_account(
            "bluesky_2",
            MockConfig::success_with_url("https://bsky.app/profile/kit/post/3k"),
        );
    let dispatcher = Dispatcher::new(SpecTable::builtin(), Arc::new(factory));
    let request = PostRequest::new("hello").with_accounts(["bluesky_1", "bluesky_2"]);

    let dispatch = dispatcher.dispatch(&request, &silent_accounts()).await?;
    let report = dispatch.wait_complete().await;

    assert_eq!(report.len(), 2);
    let expired = &report[0];
    assert!(!expired.success);
    assert_eq!(expired.qualified_code.as_deref(), Some("BS-AUTH-EXPIRED"));
    assert!(expired.error_message.is_some());

    let sibling = &report[1];
    assert!(sibling.success);
    assert!(sibling.error_code.is_none());
    assert_eq!(
        sibling.post_url.as_deref(),
        Some("https://bsky.app/profile/kit/post/3k")
    );
    Ok(())
}

#[tokio::test]
async fn test_exactly_one_result_per_account() -> Result<()> {
    let factory = MockFactory::new()
        .with_default(MockConfig::success().with_delay(Duration::from_millis(20)))
        .with_account("twitter_2", MockConfig::post_failure(ErrorCode::PostDuplicate))
        .with_account("bluesky_2", MockConfig::post_failure(ErrorCode::RateLimit));
    let dispatcher = Dispatcher::new(SpecTable::builtin(), Arc::new(factory));

    let mut dispatch = dispatcher.dispatch(&request_all(), &silent_accounts()).await?;
    let streamed = dispatch.silent_results().await;

    let ids: HashSet<_> = streamed.iter().map(|r| r.account_id.clone()).collect();
    assert_eq!(streamed.len(), 4);
    assert_eq!(ids.len(), 4);

    for result in &streamed {
        assert_eq!(
            result.success,
            result.error_code.is_none(),
            "success and an error code never coexist"
        );
    }

    let report = dispatch.wait_complete().await;
    let ordered: Vec<_> = report.iter().map(|r| r.account_id.as_str()).collect();
    assert_eq!(ordered, vec!["twitter_1", "twitter_2", "bluesky_1", "bluesky_2"]);

    let summary = dispatch.summary();
    assert_eq!((summary.succeeded, summary.failed, summary.pending), (2, 2, 0));
    Ok(())
}

#[tokio::test]
async fn test_panicking_backend_becomes_sys_unknown() -> Result<()> {
    let factory = MockFactory::new().with_account("twitter_2", MockConfig::panicking());
    let dispatcher = Dispatcher::new(SpecTable::builtin(), Arc::new(factory));

    let dispatch = dispatcher.dispatch(&request_all(), &silent_accounts()).await?;
    let report = dispatch.wait_complete().await;

    let panicked = report.iter().find(|r| r.account_id == "twitter_2").unwrap();
    assert_eq!(panicked.error_code, Some(ErrorCode::SysUnknown));
    assert_eq!(report.iter().filter(|r| r.success).count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_cancel_becomes_post_failed() -> Result<()> {
    let slow = MockConfig::success().with_delay(Duration::from_secs(30));
    let factory = MockFactory::new().with_account("twitter_1", slow.clone());
    let dispatcher = Dispatcher::new(SpecTable::builtin(), Arc::new(factory));

    let dispatch = dispatcher.dispatch(&request_all(), &silent_accounts()).await?;
    assert!(dispatch.cancel("twitter_1"));
    assert!(!dispatch.cancel("nobody"));

    let report = tokio::time::timeout(Duration::from_secs(5), dispatch.wait_complete()).await?;

    let cancelled = report.iter().find(|r| r.account_id == "twitter_1").unwrap();
    assert!(!cancelled.success);
    assert_eq!(cancelled.error_code, Some(ErrorCode::PostFailed));
    assert!(slow.posted().is_empty());
    assert_eq!(report.iter().filter(|r| r.success).count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_events() -> Result<()> {
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let factory = MockFactory::new().with_account("twitter_2", MockConfig::post_failure(ErrorCode::PostFailed));
    let dispatcher = Dispatcher::new(SpecTable::builtin(), Arc::new(factory)).with_events(bus);

    let dispatch = dispatcher.dispatch(&request_all(), &silent_accounts()).await?;
    dispatch.wait_complete().await;

    let mut started = 0;
    let mut completed_accounts = 0;
    let mut finished = Vec::new();
    // events from different account tasks may interleave; drain until quiet
    while let Ok(event) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
        match event? {
            Event::DispatchStarted { account_ids, .. } => {
                started += 1;
                assert_eq!(account_ids.len(), 4);
            }
            Event::AccountCompleted { dispatch_id, .. } => {
                assert_eq!(dispatch_id, dispatch.id());
                completed_accounts += 1;
            }
            Event::DispatchCompleted { succeeded, failed, .. } => finished.push((succeeded, failed)),
            Event::SessionStateChanged { .. } => {}
        }
    }

    assert_eq!(started, 1);
    assert_eq!(completed_accounts, 4);
    assert_eq!(finished, vec![(3, 1)], "completion is announced once");
    Ok(())
}
