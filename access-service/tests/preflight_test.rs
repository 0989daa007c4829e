mod common;

use access_service::services::{ServiceError, Store};
use common::{user, TestApp};

#[tokio::test]
async fn preflight_groups_targets_by_access_rule() {
    let app = TestApp::spawn();
    app.seed_target("acct-1", "rule-admin", &["engineering"]).await;
    app.seed_target("acct-2", "rule-readonly", &["engineering"]).await;
    app.seed_target("acct-3", "rule-admin", &["engineering"]).await;
    let alice = user("alice", &["engineering"]);

    let preflight = app
        .state
        .preflights
        .create_preflight(
            &alice,
            vec!["acct-1".into(), "acct-2".into(), "acct-3".into()],
        )
        .await
        .unwrap();

    assert_eq!(preflight.user_id, "alice");
    assert_eq!(preflight.requested_targets, vec!["acct-1", "acct-2", "acct-3"]);
    assert_eq!(preflight.created_at, app.clock_now());
    assert!(!preflight.is_consumed());

    assert_eq!(preflight.access_groups.len(), 2);
    let admin_group = &preflight.access_groups[0];
    assert_eq!(admin_group.access_rule, "rule-admin");
    let ids: Vec<&str> = admin_group.targets.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["acct-1", "acct-3"]);
    assert_eq!(preflight.access_groups[1].access_rule, "rule-readonly");

    let stored = app
        .store
        .get_preflight(&preflight.id, "alice")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, preflight);
}

#[tokio::test]
async fn duplicate_targets_are_rejected_before_anything_is_written() {
    let app = TestApp::spawn();
    app.seed_target("acct-1", "rule-admin", &["engineering"]).await;
    let alice = user("alice", &["engineering"]);

    let err = app
        .state
        .preflights
        .create_preflight(&alice, vec!["acct-1".into(), "acct-1".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DuplicateTargetsRequested));
    assert_eq!(app.store.preflight_count(), 0);
}

#[tokio::test]
async fn duplicates_win_over_authorization_failures() {
    let app = TestApp::spawn();
    let mallory = user("mallory", &["contractors"]);

    let err = app
        .state
        .preflights
        .create_preflight(&mallory, vec!["secret".into(), "secret".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DuplicateTargetsRequested));
}

#[tokio::test]
async fn unauthorized_target_fails_the_whole_preflight() {
    let app = TestApp::spawn();
    app.seed_target("acct-1", "rule-admin", &["engineering"]).await;
    app.seed_target("acct-prod", "rule-admin", &["sre"]).await;
    let alice = user("alice", &["engineering"]);

    let err = app
        .state
        .preflights
        .create_preflight(&alice, vec!["acct-1".into(), "acct-prod".into()])
        .await
        .unwrap_err();
    match err {
        ServiceError::UserNotAuthorisedForRequestedTarget { target_id } => {
            assert_eq!(target_id, "acct-prod")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(app.store.preflight_count(), 0);
}

#[tokio::test]
async fn unknown_targets_are_not_authorised() {
    let app = TestApp::spawn();
    let alice = user("alice", &["engineering"]);

    let err = app
        .state
        .preflights
        .create_preflight(&alice, vec!["does-not-exist".into()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::UserNotAuthorisedForRequestedTarget { .. }
    ));
}

#[tokio::test]
async fn empty_preflight_is_invalid() {
    let app = TestApp::spawn();
    let alice = user("alice", &["engineering"]);

    let err = app
        .state
        .preflights
        .create_preflight(&alice, vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRequest(_)));
}

#[tokio::test]
async fn preflights_are_private_to_their_owner() {
    let app = TestApp::spawn();
    app.seed_target("acct-1", "rule-admin", &["engineering"]).await;
    let alice = user("alice", &["engineering"]);
    let bob = user("bob", &["engineering"]);

    let preflight = app
        .state
        .preflights
        .create_preflight(&alice, vec!["acct-1".into()])
        .await
        .unwrap();

    let fetched = app
        .state
        .preflights
        .get_preflight(&alice, &preflight.id)
        .await
        .unwrap();
    assert_eq!(fetched.id, preflight.id);

    assert!(matches!(
        app.state.preflights.get_preflight(&bob, &preflight.id).await,
        Err(ServiceError::NotFound(_))
    ));
}
