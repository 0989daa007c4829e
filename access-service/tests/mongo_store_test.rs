//! MongoDB store tests. They run against `TEST_MONGODB_URI` and are skipped
//! when it is unset.

use access_service::models::{
    AccessRequest, Deployment, Preflight, Provider, RequestedBy, TargetGroup,
    TargetGroupAssignment, TargetSchema,
};
use access_service::services::{AssignmentGuard, MongoStore, Store, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::BTreeSet;

struct TestDb {
    store: MongoStore,
    uri: String,
    db_name: String,
}

impl TestDb {
    async fn spawn() -> Option<Self> {
        let Ok(uri) = std::env::var("TEST_MONGODB_URI") else {
            eprintln!("TEST_MONGODB_URI not set, skipping MongoDB store test");
            return None;
        };
        let db_name = format!("access_test_{}", uuid::Uuid::new_v4());
        let store = MongoStore::connect(&uri, &db_name, 2)
            .await
            .expect("Failed to connect to MongoDB");
        store
            .initialize_indexes()
            .await
            .expect("Failed to create indexes");
        Some(Self {
            store,
            uri,
            db_name,
        })
    }

    async fn cleanup(&self) {
        let client = mongodb::Client::with_uri_str(&self.uri)
            .await
            .expect("Failed to connect to MongoDB");
        client
            .database(&self.db_name)
            .drop(None)
            .await
            .expect("Failed to drop test database");
    }
}

/// BSON datetimes keep milliseconds, so test timestamps stay on whole millis.
fn at_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

fn ec2(version: &str) -> Provider {
    Provider::new("acme", "ec2", version)
}

fn deployment(id: &str, provider: Provider) -> Deployment {
    Deployment {
        id: id.to_string(),
        provider,
        function_url: Some(format!("https://{}.example.com", id)),
        diagnostics: vec![],
        target_group_assignment: None,
    }
}

fn assignment(target_group_id: &str, priority: i32) -> TargetGroupAssignment {
    TargetGroupAssignment {
        target_group_id: target_group_id.to_string(),
        priority,
        diagnostics: vec![],
    }
}

fn request(id: &str, user_id: &str, created_at: DateTime<Utc>) -> AccessRequest {
    AccessRequest {
        id: id.to_string(),
        preflight_id: format!("pf-{}", id),
        requested_by: RequestedBy {
            id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
        },
        reason: None,
        groups: vec![],
        reviewers: BTreeSet::new(),
        created_at,
        updated_at: created_at,
    }
}

#[tokio::test]
async fn duplicate_target_group_is_a_condition_failure() {
    let Some(db) = TestDb::spawn().await else {
        return;
    };
    let now = at_millis(1_700_000_000_123);
    let group = TargetGroup::new(
        "aws-accounts".to_string(),
        TargetSchema {
            from: "acme/ec2@1.0.0".to_string(),
            schema: json!({ "accountId": { "type": "string" } }),
        },
        now,
    );

    db.store.insert_target_group(&group).await.unwrap();
    assert!(matches!(
        db.store.insert_target_group(&group).await,
        Err(StoreError::ConditionFailed)
    ));

    let stored = db.store.get_target_group("aws-accounts").await.unwrap().unwrap();
    assert_eq!(stored, group);

    db.cleanup().await;
}

#[tokio::test]
async fn one_deployment_per_target_group() {
    let Some(db) = TestDb::spawn().await else {
        return;
    };
    for id in ["d1", "d2"] {
        db.store
            .upsert_deployment(&deployment(id, ec2("1.0.0")), &AssignmentGuard::Any)
            .await
            .unwrap();
    }

    let linked = db
        .store
        .assign_deployment("d1", &ec2("1.0.0"), &assignment("aws", 1))
        .await
        .unwrap();
    assert!(linked.assigned_to("aws"));

    // Rejected by the partial unique index on the assignment.
    assert!(matches!(
        db.store
            .assign_deployment("d2", &ec2("1.0.0"), &assignment("aws", 2))
            .await,
        Err(StoreError::ConditionFailed)
    ));
    // Rejected by the filter: d1 is already bound.
    assert!(matches!(
        db.store
            .assign_deployment("d1", &ec2("1.0.0"), &assignment("okta", 1))
            .await,
        Err(StoreError::ConditionFailed)
    ));

    let found = db
        .store
        .find_deployment_for_target_group("aws")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, "d1");

    db.store.clear_deployment_assignment("d1", "aws").await.unwrap();
    db.store
        .assign_deployment("d2", &ec2("1.0.0"), &assignment("aws", 2))
        .await
        .unwrap();

    db.cleanup().await;
}

#[tokio::test]
async fn assignment_fails_when_provider_changed() {
    let Some(db) = TestDb::spawn().await else {
        return;
    };
    db.store
        .upsert_deployment(&deployment("d1", ec2("1.0.0")), &AssignmentGuard::Any)
        .await
        .unwrap();
    db.store
        .upsert_deployment(&deployment("d1", ec2("2.0.0")), &AssignmentGuard::Any)
        .await
        .unwrap();

    assert!(matches!(
        db.store
            .assign_deployment("d1", &ec2("1.0.0"), &assignment("aws", 1))
            .await,
        Err(StoreError::ConditionFailed)
    ));
    let stored = db.store.get_deployment("d1").await.unwrap().unwrap();
    assert!(!stored.is_assigned());

    db.cleanup().await;
}

#[tokio::test]
async fn deployment_upsert_keeps_the_assignment() {
    let Some(db) = TestDb::spawn().await else {
        return;
    };
    db.store
        .upsert_deployment(&deployment("d1", ec2("1.0.0")), &AssignmentGuard::Any)
        .await
        .unwrap();
    db.store
        .assign_deployment("d1", &ec2("1.0.0"), &assignment("aws", 7))
        .await
        .unwrap();

    let mut update = deployment("d1", ec2("1.1.0"));
    update.function_url = None;
    let stored = db
        .store
        .upsert_deployment(&update, &AssignmentGuard::Any)
        .await
        .unwrap();
    assert_eq!(stored.provider, ec2("1.1.0"));
    assert!(stored.function_url.is_none());
    assert_eq!(stored.target_group_assignment, Some(assignment("aws", 7)));

    // The id index turns a missed guard into a duplicate-key upsert.
    assert!(matches!(
        db.store
            .upsert_deployment(&update, &AssignmentGuard::Unassigned)
            .await,
        Err(StoreError::ConditionFailed)
    ));
    assert!(matches!(
        db.store
            .upsert_deployment(&update, &AssignmentGuard::AssignedTo("okta".to_string()))
            .await,
        Err(StoreError::ConditionFailed)
    ));
    db.store
        .upsert_deployment(&update, &AssignmentGuard::AssignedTo("aws".to_string()))
        .await
        .unwrap();

    // A guarded update never creates the deployment.
    assert!(matches!(
        db.store
            .upsert_deployment(
                &deployment("d2", ec2("1.0.0")),
                &AssignmentGuard::AssignedTo("aws".to_string())
            )
            .await,
        Err(StoreError::ConditionFailed)
    ));
    let created = db
        .store
        .upsert_deployment(&deployment("d3", ec2("1.0.0")), &AssignmentGuard::Unassigned)
        .await
        .unwrap();
    assert!(!created.is_assigned());

    db.cleanup().await;
}

#[tokio::test]
async fn preflight_is_claimed_once() {
    let Some(db) = TestDb::spawn().await else {
        return;
    };
    let now = at_millis(1_700_000_000_000);
    let preflight = Preflight::new("alice", vec![], now);
    db.store.put_preflight(&preflight).await.unwrap();

    assert!(db
        .store
        .get_preflight(&preflight.id, "eve")
        .await
        .unwrap()
        .is_none());

    let claimed_at = at_millis(1_700_000_001_500);
    let claimed = db
        .store
        .claim_preflight(&preflight.id, "alice", claimed_at)
        .await
        .unwrap()
        .expect("first claim should succeed");
    assert_eq!(claimed.consumed_at, Some(claimed_at));
    assert_eq!(claimed.created_at, now);

    assert!(db
        .store
        .claim_preflight(&preflight.id, "alice", claimed_at)
        .await
        .unwrap()
        .is_none());
    assert!(db
        .store
        .get_preflight(&preflight.id, "alice")
        .await
        .unwrap()
        .is_none());

    db.cleanup().await;
}

#[tokio::test]
async fn requests_list_newest_first_across_fractional_seconds() {
    let Some(db) = TestDb::spawn().await else {
        return;
    };
    // RFC 3339 strings would order "...:01Z" after "...:01.500Z".
    let whole = at_millis(1_700_000_001_000);
    let later = at_millis(1_700_000_001_500);
    let earlier = at_millis(1_700_000_000_250);

    db.store.put_request(&request("r-whole", "alice", whole)).await.unwrap();
    db.store.put_request(&request("r-later", "alice", later)).await.unwrap();
    db.store.put_request(&request("r-earlier", "alice", earlier)).await.unwrap();
    db.store
        .put_request(&request("r-bob", "bob", later))
        .await
        .unwrap();

    let first = db.store.list_requests_for_user("alice", None).await.unwrap();
    let ids: Vec<&str> = first.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r-later", "r-whole"]);
    let token = first.next.expect("expected another page");

    let second = db
        .store
        .list_requests_for_user("alice", Some(&token))
        .await
        .unwrap();
    let ids: Vec<&str> = second.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["r-earlier"]);
    assert!(second.next.is_none());

    let stored = db.store.get_request("r-later").await.unwrap().unwrap();
    assert_eq!(stored.created_at, later);

    db.cleanup().await;
}
