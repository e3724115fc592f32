mod helpers;

use chrono::{Duration, Utc};
use helpers::{TestDb, UserBuilder};
use std::sync::Arc;
use tokenward::entities::user::UserState;
use tokenward::errors::{IdentityError, StoreError, TokenError};
use tokenward::identity::{DbIdentityResolver, IdentityResolver};
use tokenward::storage::{SqlTokenStore, TokenRecord, TokenStore};
use tokenward::tokens::{hash_token, RefreshTokenManager};

fn manager(test_db: &TestDb) -> (RefreshTokenManager, Arc<SqlTokenStore>) {
    let store = Arc::new(SqlTokenStore::new(test_db.connection().clone()));
    (
        RefreshTokenManager::new(store.clone(), Duration::days(7)),
        store,
    )
}

#[tokio::test]
async fn test_issue_then_validate_returns_owner() {
    let test_db = TestDb::new().await;
    let user = UserBuilder::new("alice@example.com")
        .create(test_db.connection())
        .await;
    let (mgr, _) = manager(&test_db);

    let plaintext = mgr.issue(&user.id).await.expect("Failed to issue");
    let record = mgr.validate(&plaintext).await.expect("Failed to validate");

    assert_eq!(record.user_id, user.id);
    assert_eq!(record.token_hash, hash_token(&plaintext));
    assert_eq!(record.expires_at - record.issued_at, Duration::days(7));
}

#[tokio::test]
async fn test_never_issued_token_is_not_found() {
    let test_db = TestDb::new().await;
    let (mgr, _) = manager(&test_db);

    let err = mgr
        .validate("c29tZXRoaW5nLXRoYXQtd2FzLW5ldmVyLWlzc3VlZA")
        .await
        .unwrap_err();
    assert!(matches!(err, TokenError::NotFound));
}

#[tokio::test]
async fn test_issue_for_unknown_user_is_rejected_not_outage() {
    let test_db = TestDb::new().await;
    let (mgr, store) = manager(&test_db);

    let err = store
        .insert(&TokenRecord::new(
            "no-such-user",
            "some-digest".to_string(),
            Utc::now(),
            Duration::days(1),
            None,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingReference(_)));

    let err = mgr.issue("no-such-user").await.unwrap_err();
    assert!(matches!(err, TokenError::UnknownUser));
    assert!(err.is_rejection());
}

#[tokio::test]
async fn test_end_to_end_rotation_chain() {
    let test_db = TestDb::new().await;
    let user = UserBuilder::new("u@example.com")
        .create(test_db.connection())
        .await;
    let (mgr, store) = manager(&test_db);

    let p1 = mgr.issue(&user.id).await.unwrap();
    let r1 = mgr.validate(&p1).await.unwrap();
    assert_eq!(r1.user_id, user.id);

    let p2 = mgr.rotate(&r1).await.unwrap();
    assert!(matches!(
        mgr.validate(&p1).await.unwrap_err(),
        TokenError::ExpiredOrRevoked
    ));

    let r2 = mgr.validate(&p2).await.unwrap();
    assert_eq!(r2.user_id, user.id);
    assert_eq!(r2.parent_id.as_deref(), Some(r1.id.as_str()));

    // The retired record is kept, marked as rotated
    let retired = store.find_by_hash(&r1.token_hash).await.unwrap().unwrap();
    assert!(retired.revoked);
    assert!(retired.rotated_at.is_some());

    assert_eq!(mgr.active_sessions(&user.id).await.unwrap().len(), 1);

    mgr.revoke_all(&user.id).await.unwrap();
    assert!(matches!(
        mgr.validate(&p2).await.unwrap_err(),
        TokenError::ExpiredOrRevoked
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_one_winner() {
    let test_db = TestDb::new().await;
    let user = UserBuilder::new("race@example.com")
        .create(test_db.connection())
        .await;
    let (mgr, _) = manager(&test_db);
    let mgr = Arc::new(mgr);

    let plaintext = mgr.issue(&user.id).await.unwrap();
    let record = mgr.validate(&plaintext).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mgr = mgr.clone();
        let record = record.clone();
        handles.push(tokio::spawn(async move { mgr.rotate(&record).await }));
    }

    let results = futures::future::join_all(handles).await;
    let mut winners = 0;
    for result in results {
        match result.expect("task panicked") {
            Ok(_) => winners += 1,
            Err(TokenError::ExpiredOrRevoked) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(mgr.active_sessions(&user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_revoke_all_is_idempotent_and_scoped() {
    let test_db = TestDb::new().await;
    let alice = UserBuilder::new("alice@example.com")
        .create(test_db.connection())
        .await;
    let bob = UserBuilder::new("bob@example.com")
        .create(test_db.connection())
        .await;
    let (mgr, _) = manager(&test_db);

    for _ in 0..3 {
        mgr.issue(&alice.id).await.unwrap();
    }
    let bobs = mgr.issue(&bob.id).await.unwrap();

    assert_eq!(mgr.revoke_all(&alice.id).await.unwrap(), 3);
    assert_eq!(mgr.revoke_all(&alice.id).await.unwrap(), 0);
    assert!(mgr.active_sessions(&alice.id).await.unwrap().is_empty());
    assert!(mgr.validate(&bobs).await.is_ok());
}

#[tokio::test]
async fn test_explicit_revoke_on_sql_store() {
    let test_db = TestDb::new().await;
    let user = UserBuilder::new("carol@example.com")
        .create(test_db.connection())
        .await;
    let (mgr, store) = manager(&test_db);

    let plaintext = mgr.issue(&user.id).await.unwrap();
    mgr.revoke(&plaintext).await.unwrap();

    let record = store
        .find_by_hash(&hash_token(&plaintext))
        .await
        .unwrap()
        .unwrap();
    assert!(record.revoked);
    assert!(record.rotated_at.is_none());

    assert!(matches!(
        mgr.revoke("unknown").await.unwrap_err(),
        TokenError::NotFound
    ));
}

#[tokio::test]
async fn test_reuse_detection_on_sql_store() {
    let test_db = TestDb::new().await;
    let user = UserBuilder::new("dave@example.com")
        .create(test_db.connection())
        .await;
    let (mgr, _) = manager(&test_db);
    let mgr = mgr.with_reuse_detection(true);

    let p1 = mgr.issue(&user.id).await.unwrap();
    let r1 = mgr.validate(&p1).await.unwrap();
    let p2 = mgr.rotate(&r1).await.unwrap();

    assert!(mgr.validate(&p1).await.is_err());
    assert!(matches!(
        mgr.validate(&p2).await.unwrap_err(),
        TokenError::ExpiredOrRevoked
    ));
}

// ============================================================================
// Identity resolution
// ============================================================================

#[tokio::test]
async fn test_resolver_maps_roles_to_authorities() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let user = UserBuilder::new("user@example.com").create(db).await;
    let admin = UserBuilder::new("admin@example.com")
        .admin()
        .create(db)
        .await;
    let resolver = DbIdentityResolver::new(db.clone());

    let principal = resolver.load_principal(&user.id).await.unwrap();
    assert_eq!(principal.email, "user@example.com");
    assert_eq!(principal.authorities, vec!["ROLE_USER"]);

    let principal = resolver.load_principal(&admin.id).await.unwrap();
    assert!(principal.has_authority("ROLE_ADMIN"));
}

#[tokio::test]
async fn test_resolver_rejects_missing_and_suspended_users() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let suspended = UserBuilder::new("gone@example.com")
        .suspended()
        .create(db)
        .await;
    let resolver = DbIdentityResolver::new(db.clone());

    assert!(matches!(
        resolver.load_principal("no-such-user").await.unwrap_err(),
        IdentityError::UserNotFound
    ));
    assert!(matches!(
        resolver.load_principal(&suspended.id).await.unwrap_err(),
        IdentityError::Disabled
    ));
}

#[tokio::test]
async fn test_resolver_accepts_onboarding_users() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let user = UserBuilder::new("new@example.com")
        .in_state(UserState::OnboardingSkills)
        .create(db)
        .await;
    let resolver = DbIdentityResolver::new(db.clone());

    assert!(resolver.load_principal(&user.id).await.is_ok());
}
