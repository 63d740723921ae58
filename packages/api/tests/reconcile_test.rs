//! End-to-end purchase reconciliation against an in-memory database.

use course_hub_api::{
    accounts::{self, AccountError, NewAccount},
    entity::{
        invite_code, invite_code_course, purchase,
        sea_orm_active_enums::{AccessMethod, InviteCodeStatus, PurchaseStatus},
        user_course,
    },
    payment::PaymentError,
    purchase::{
        Caller, checkout, grants, ledger,
        reconcile::{self, ConfirmationStatus, ReconcileError},
    },
    state::AppState,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, PaginatorTrait};

mod common;
use common::{FakeProvider, seed_course, seed_mapping, seed_user, test_state};

async fn purchase_count(state: &AppState) -> u64 {
    purchase::Entity::find().count(&state.db).await.unwrap()
}

async fn grant_count(state: &AppState) -> u64 {
    user_course::Entity::find().count(&state.db).await.unwrap()
}

fn account(email: &str) -> NewAccount {
    NewAccount {
        name: "Buyer".to_string(),
        email: email.to_string(),
        password: common::PASSWORD.to_string(),
        invite_code: None,
    }
}

#[tokio::test]
async fn test_guest_purchase_is_claimed_after_registration() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_rust", "Rust in Practice").await;
    seed_mapping(&state, "prod_rust", &course.id).await;
    provider.paid_session("cs_guest", "Buyer@Example.com", "prod_rust");

    let confirmation = reconcile::confirm_checkout(&state, "cs_guest", None)
        .await
        .unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::NeedsRegistration);
    assert_eq!(confirmation.purchase.status, PurchaseStatus::PendingClaim);
    assert_eq!(confirmation.purchase.user_id, None);
    assert_eq!(confirmation.purchase.customer_email, "buyer@example.com");
    assert_eq!(confirmation.purchase.amount, 49.99);
    assert_eq!(confirmation.purchase.currency, "USD");
    assert_eq!(grant_count(&state).await, 0);

    let registered = accounts::register(&state.db, account("buyer@example.com"), 4)
        .await
        .unwrap();
    let caller = Caller::from(&registered.user);

    let pending = reconcile::pending_claims(&state, &caller).await.unwrap();
    assert!(pending.has_pending_claims);
    assert_eq!(pending.pending_count, 1);

    let summary = reconcile::claim_pending_purchases(&state, &caller)
        .await
        .unwrap();
    assert_eq!(summary.attempted_count, 1);
    assert_eq!(summary.claimed_count, 1);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.courses_granted.len(), 1);
    assert_eq!(summary.courses_granted[0].course_id, course.id);
    assert_eq!(summary.courses_granted[0].course_title, "Rust in Practice");

    let purchase = ledger::find_by_session_id(&state.db, "cs_guest")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(purchase.user_id.as_deref(), Some(registered.user.id.as_str()));
    assert!(purchase.completed_at.is_some());

    let grant = grants::find_grant(&state.db, &registered.user.id, &course.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.access_method, AccessMethod::Purchased);
    assert_eq!(grant.purchase_id.as_deref(), Some(purchase.id.as_str()));

    // Nothing left to claim, and returning to the success page changes nothing.
    let again = reconcile::claim_pending_purchases(&state, &caller)
        .await
        .unwrap();
    assert_eq!(again.attempted_count, 0);
    let confirmation = reconcile::confirm_checkout(&state, "cs_guest", Some(&caller))
        .await
        .unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Completed { claimed: false });
    assert_eq!(grant_count(&state).await, 1);
}

#[tokio::test]
async fn test_guest_purchase_for_existing_account_asks_for_login() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_sql", "SQL Basics").await;
    seed_mapping(&state, "prod_sql", &course.id).await;
    seed_user(&state, "Existing", "existing@example.com").await;
    provider.paid_session("cs_existing", "existing@example.com", "prod_sql");

    let confirmation = reconcile::confirm_checkout(&state, "cs_existing", None)
        .await
        .unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::NeedsLogin);
    assert_eq!(confirmation.purchase.user_id, None);
}

#[tokio::test]
async fn test_logged_in_checkout_completes_once_from_webhook_and_client() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_async", "Async Rust").await;
    seed_mapping(&state, "prod_async", &course.id).await;
    provider.add_price("price_async", "prod_async", 7900);
    let user = seed_user(&state, "Ada", "ada@example.com").await;
    let caller = Caller::from(&user);

    let started = checkout::start_checkout(&state, Some(&caller), "price_async", None, None)
        .await
        .unwrap();
    let eager = started.purchase.unwrap();
    assert_eq!(eager.status, PurchaseStatus::Pending);
    assert_eq!(eager.user_id.as_deref(), Some(user.id.as_str()));
    assert_eq!(eager.amount, 79.0);

    let request = &provider.created_sessions()[0];
    assert_eq!(request.customer_email.as_deref(), Some("ada@example.com"));
    assert_eq!(request.metadata.get("userId"), Some(&user.id));

    // Confirming before payment settles writes nothing new.
    let err = reconcile::confirm_checkout(&state, &started.session_id, Some(&caller))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotPaid { .. }));

    provider.mark_paid(&started.session_id);

    // Webhook path: no caller, the recorded owner is used.
    let from_webhook = reconcile::confirm_checkout(&state, &started.session_id, None)
        .await
        .unwrap();
    assert_eq!(from_webhook.status, ConfirmationStatus::Completed { claimed: false });
    assert_eq!(from_webhook.purchase.id, eager.id);

    let from_client = reconcile::confirm_checkout(&state, &started.session_id, Some(&caller))
        .await
        .unwrap();
    assert_eq!(from_client.status, ConfirmationStatus::Completed { claimed: false });
    assert_eq!(from_client.purchase.completed_at, from_webhook.purchase.completed_at);

    assert_eq!(purchase_count(&state).await, 1);
    assert_eq!(grant_count(&state).await, 1);
}

#[tokio::test]
async fn test_purchase_with_other_email_is_not_attached() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_web", "Web Services").await;
    seed_mapping(&state, "prod_web", &course.id).await;
    let user = seed_user(&state, "Grace", "grace@example.com").await;
    provider.paid_session("cs_gift", "friend@example.com", "prod_web");

    let confirmation =
        reconcile::confirm_checkout(&state, "cs_gift", Some(&Caller::from(&user)))
            .await
            .unwrap();
    assert_eq!(
        confirmation.status,
        ConfirmationStatus::EmailMismatch {
            purchase_email: "friend@example.com".to_string()
        }
    );
    assert_eq!(confirmation.purchase.status, PurchaseStatus::PendingClaim);
    assert_eq!(confirmation.purchase.user_id, None);
    assert_eq!(grant_count(&state).await, 0);

    // The rightful owner can still claim it.
    let friend = seed_user(&state, "Friend", "FRIEND@example.com").await;
    let summary = reconcile::claim_pending_purchases(&state, &Caller::from(&friend))
        .await
        .unwrap();
    assert_eq!(summary.claimed_count, 1);

    // Now owned by the friend, the original caller still sees a mismatch.
    let confirmation =
        reconcile::confirm_checkout(&state, "cs_gift", Some(&Caller::from(&user)))
            .await
            .unwrap();
    assert!(matches!(
        confirmation.status,
        ConfirmationStatus::EmailMismatch { .. }
    ));
    assert_eq!(grant_count(&state).await, 1);
}

#[tokio::test]
async fn test_logged_in_buyer_claims_guest_row_with_matching_email() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_cli", "CLI Tools").await;
    seed_mapping(&state, "prod_cli", &course.id).await;
    provider.paid_session("cs_cli", "linus@example.com", "prod_cli");

    reconcile::confirm_checkout(&state, "cs_cli", None)
        .await
        .unwrap();

    let user = seed_user(&state, "Linus", "linus@example.com").await;
    let confirmation = reconcile::confirm_checkout(&state, "cs_cli", Some(&Caller::from(&user)))
        .await
        .unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Completed { claimed: true });
    assert_eq!(confirmation.purchase.status, PurchaseStatus::Completed);
    assert_eq!(confirmation.purchase.user_id.as_deref(), Some(user.id.as_str()));
}

#[tokio::test]
async fn test_concurrent_confirmations_record_one_purchase() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_conc", "Concurrency").await;
    seed_mapping(&state, "prod_conc", &course.id).await;
    let user = seed_user(&state, "Barbara", "barbara@example.com").await;
    let caller = Caller::from(&user);
    provider.paid_session("cs_race", "barbara@example.com", "prod_conc");

    let (first, second, guest) = tokio::join!(
        reconcile::confirm_checkout(&state, "cs_race", Some(&caller)),
        reconcile::confirm_checkout(&state, "cs_race", Some(&caller)),
        reconcile::confirm_checkout(&state, "cs_race", None),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    guest.unwrap();

    assert_eq!(first.purchase.id, second.purchase.id);
    assert_eq!(purchase_count(&state).await, 1);
    assert_eq!(grant_count(&state).await, 1);

    let purchase = ledger::find_by_session_id(&state.db, "cs_race")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(purchase.user_id.as_deref(), Some(user.id.as_str()));
}

#[tokio::test]
async fn test_provider_failures_write_nothing() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_net", "Networking").await;
    seed_mapping(&state, "prod_net", &course.id).await;
    provider.paid_session("cs_down", "ops@example.com", "prod_net");
    provider.unpaid_session("cs_unpaid", "ops@example.com", "prod_net");

    provider.set_unavailable(true);
    let err = reconcile::confirm_checkout(&state, "cs_down", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Payment(PaymentError::Upstream(_))
    ));
    provider.set_unavailable(false);

    let err = reconcile::confirm_checkout(&state, "cs_unpaid", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotPaid { .. }));

    let err = reconcile::confirm_checkout(&state, "cs_unknown", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Payment(PaymentError::InvalidId(_))
    ));

    assert_eq!(purchase_count(&state).await, 0);

    // Recovers once the provider answers again.
    let confirmation = reconcile::confirm_checkout(&state, "cs_down", None)
        .await
        .unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::NeedsRegistration);
}

#[tokio::test]
async fn test_unmapped_product_is_reported_and_claimable_later() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_new", "Brand New").await;
    provider.paid_session("cs_unmapped", "early@example.com", "prod_new");

    let confirmation = reconcile::confirm_checkout(&state, "cs_unmapped", None)
        .await
        .unwrap();
    assert_eq!(
        confirmation.status,
        ConfirmationStatus::UnmappedProduct {
            product_id: "prod_new".to_string()
        }
    );
    assert!(confirmation.course.is_none());
    assert_eq!(confirmation.purchase.status, PurchaseStatus::PendingClaim);

    // The negative lookup is cached; upsert invalidates it.
    seed_mapping(&state, "prod_new", &course.id).await;

    let user = seed_user(&state, "Early", "early@example.com").await;
    let summary = reconcile::claim_pending_purchases(&state, &Caller::from(&user))
        .await
        .unwrap();
    assert_eq!(summary.claimed_count, 1);
    assert_eq!(summary.courses_granted[0].course_id, course.id);
}

#[tokio::test]
async fn test_claim_failures_are_isolated_per_purchase() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let first = seed_course(&state, "course_one", "One").await;
    let second = seed_course(&state, "course_two", "Two").await;
    seed_mapping(&state, "prod_one", &first.id).await;
    seed_mapping(&state, "prod_two", &second.id).await;

    for (session, product) in [
        ("cs_one", "prod_one"),
        ("cs_two", "prod_two"),
        ("cs_orphan", "prod_orphan"),
    ] {
        provider.paid_session(session, "collector@example.com", product);
        reconcile::confirm_checkout(&state, session, None)
            .await
            .unwrap();
    }

    let registered = accounts::register(&state.db, account("collector@example.com"), 4)
        .await
        .unwrap();
    let caller = Caller::from(&registered.user);

    let summary = reconcile::claim_pending_purchases(&state, &caller)
        .await
        .unwrap();
    assert_eq!(summary.attempted_count, 3);
    assert_eq!(summary.claimed_count, 2);
    assert_eq!(summary.courses_granted.len(), 2);
    assert_eq!(summary.failures.len(), 1);

    let orphan = ledger::find_by_session_id(&state.db, "cs_orphan")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.failures[0].purchase_id, orphan.id);
    assert!(summary.failures[0].reason.contains("prod_orphan"));
    assert_eq!(orphan.status, PurchaseStatus::PendingClaim);
    assert_eq!(orphan.user_id, None);

    let pending = reconcile::pending_claims(&state, &caller).await.unwrap();
    assert_eq!(pending.pending_count, 1);
}

#[tokio::test]
async fn test_refunded_purchase_is_closed_but_access_is_kept() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_ref", "Refundable").await;
    seed_mapping(&state, "prod_ref", &course.id).await;
    let user = seed_user(&state, "Ken", "ken@example.com").await;
    let caller = Caller::from(&user);
    provider.paid_session("cs_ref", "ken@example.com", "prod_ref");

    reconcile::confirm_checkout(&state, "cs_ref", Some(&caller))
        .await
        .unwrap();

    let transition = reconcile::record_refund(&state, "pi_cs_ref")
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(transition, ledger::Transition::Applied(_)));
    assert_eq!(transition.model().status, PurchaseStatus::Refunded);
    assert!(transition.model().refunded_at.is_some());

    let err = reconcile::confirm_checkout(&state, "cs_ref", Some(&caller))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Closed {
            status: PurchaseStatus::Refunded,
            ..
        }
    ));

    assert!(
        grants::find_grant(&state.db, &user.id, &course.id)
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        reconcile::record_refund(&state, "pi_unknown")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_expired_checkout_is_marked_failed() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_exp", "Expiring").await;
    seed_mapping(&state, "prod_exp", &course.id).await;
    provider.add_price("price_exp", "prod_exp", 1500);
    let user = seed_user(&state, "Margaret", "margaret@example.com").await;
    let caller = Caller::from(&user);

    let started = checkout::start_checkout(&state, Some(&caller), "price_exp", None, None)
        .await
        .unwrap();

    let transition = reconcile::record_checkout_failure(&state, &started.session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transition.model().status, PurchaseStatus::Failed);

    // A late payment for a failed purchase is refused.
    provider.mark_paid(&started.session_id);
    let err = reconcile::confirm_checkout(&state, &started.session_id, Some(&caller))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Closed { .. }));
    assert_eq!(grant_count(&state).await, 0);

    assert!(
        reconcile::record_checkout_failure(&state, "cs_never_seen")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_completed_purchase_cannot_fail() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_done", "Done").await;
    seed_mapping(&state, "prod_done", &course.id).await;
    let user = seed_user(&state, "Dennis", "dennis@example.com").await;
    provider.paid_session("cs_done", "dennis@example.com", "prod_done");

    reconcile::confirm_checkout(&state, "cs_done", Some(&Caller::from(&user)))
        .await
        .unwrap();

    let transition = reconcile::record_checkout_failure(&state, "cs_done")
        .await
        .unwrap()
        .unwrap();
    assert!(transition.is_refused());
    assert_eq!(transition.model().status, PurchaseStatus::Completed);
}

#[tokio::test]
async fn test_inactive_mapping_behaves_like_missing() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_old", "Retired").await;
    seed_mapping(&state, "prod_old", &course.id).await;

    assert!(
        state
            .mappings
            .resolve_active(&state.db, "prod_old")
            .await
            .unwrap()
            .is_some()
    );

    assert!(
        state
            .mappings
            .set_active(&state.db, "prod_old", false)
            .await
            .unwrap()
    );
    let resolved = state
        .mappings
        .resolve(&state.db, "prod_old")
        .await
        .unwrap()
        .unwrap();
    assert!(!resolved.is_active);
    assert!(
        state
            .mappings
            .resolve_active(&state.db, "prod_old")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        !state
            .mappings
            .set_active(&state.db, "prod_missing", true)
            .await
            .unwrap()
    );

    // Reactivated behind the cache's back, visible after a full invalidation.
    sea_orm::ConnectionTrait::execute_unprepared(
        &state.db,
        r#"UPDATE "ProductCourseMapping" SET "isActive" = true WHERE "stripeProductId" = 'prod_old'"#,
    )
    .await
    .unwrap();
    assert!(
        state
            .mappings
            .resolve_active(&state.db, "prod_old")
            .await
            .unwrap()
            .is_none()
    );
    state.mappings.invalidate_all();
    assert!(
        state
            .mappings
            .resolve_active(&state.db, "prod_old")
            .await
            .unwrap()
            .is_some()
    );
    state
        .mappings
        .set_active(&state.db, "prod_old", false)
        .await
        .unwrap();

    provider.paid_session("cs_old", "late@example.com", "prod_old");
    let confirmation = reconcile::confirm_checkout(&state, "cs_old", None)
        .await
        .unwrap();
    assert!(matches!(
        confirmation.status,
        ConfirmationStatus::UnmappedProduct { .. }
    ));
}

#[tokio::test]
async fn test_checkout_for_unmapped_price_is_refused() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    provider.add_price("price_orphan", "prod_orphan", 999);

    let err = checkout::start_checkout(&state, None, "price_orphan", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Unmapped { .. }));
    assert!(provider.created_sessions().is_empty());
}

#[tokio::test]
async fn test_guest_checkout_defers_purchase_creation() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_guest", "Guest Course").await;
    seed_mapping(&state, "prod_guest", &course.id).await;
    provider.add_price("price_guest", "prod_guest", 2500);

    let started = checkout::start_checkout(&state, None, "price_guest", None, None)
        .await
        .unwrap();
    assert!(started.purchase.is_none());
    assert!(started.url.is_some());
    assert_eq!(purchase_count(&state).await, 0);

    let request = &provider.created_sessions()[0];
    assert_eq!(request.customer_email, None);
    assert_eq!(request.metadata.get("userId").map(String::as_str), Some("guest"));
    assert_eq!(
        request.success_url,
        "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}"
    );
    assert_eq!(request.cancel_url, "http://localhost:3000/courses");
}

async fn seed_invite(
    state: &AppState,
    code: &str,
    course_id: &str,
    expires_at: Option<chrono::NaiveDateTime>,
) -> invite_code::Model {
    let invite = invite_code::ActiveModel {
        id: Set(format!("invite_{code}")),
        code: Set(code.to_string()),
        status: Set(InviteCodeStatus::Active),
        expires_at: Set(expires_at),
        used_at: Set(None),
        used_by: Set(None),
        created_at: Set(chrono::Utc::now().naive_utc()),
    }
    .insert(&state.db)
    .await
    .unwrap();

    invite_code_course::ActiveModel {
        id: Set(format!("invite_course_{code}")),
        invite_code_id: Set(invite.id.clone()),
        course_id: Set(course_id.to_string()),
    }
    .insert(&state.db)
    .await
    .unwrap();

    invite
}

#[tokio::test]
async fn test_invite_code_grants_access_once() {
    let provider = FakeProvider::new();
    let state = test_state(provider).await;
    let course = seed_course(&state, "course_invite", "Invite Only").await;
    seed_invite(&state, "WELCOME", &course.id, None).await;

    let mut first = account("first@example.com");
    first.invite_code = Some(" welcome ".to_string());
    let registered = accounts::register(&state.db, first, 4).await.unwrap();
    assert_eq!(registered.invite_grants.len(), 1);
    assert_eq!(registered.invite_grants[0].course_id, course.id);
    assert_eq!(registered.invite_grants[0].access_method, AccessMethod::InviteCode);

    let invite = invite_code::Entity::find_by_id("invite_WELCOME")
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invite.status, InviteCodeStatus::Used);
    assert_eq!(invite.used_by.as_deref(), Some(registered.user.id.as_str()));

    let mut second = account("second@example.com");
    second.invite_code = Some("WELCOME".to_string());
    let err = accounts::register(&state.db, second, 4).await.unwrap_err();
    assert!(matches!(err, AccountError::InviteUsed));
    assert!(
        accounts::find_user_by_email(&state.db, "second@example.com")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_expired_and_unknown_invite_codes_are_rejected() {
    let provider = FakeProvider::new();
    let state = test_state(provider).await;
    let course = seed_course(&state, "course_late", "Too Late").await;
    let yesterday = chrono::Utc::now().naive_utc() - chrono::Duration::days(1);
    seed_invite(&state, "LATE", &course.id, Some(yesterday)).await;

    let mut late = account("late@example.com");
    late.invite_code = Some("LATE".to_string());
    let err = accounts::register(&state.db, late, 4).await.unwrap_err();
    assert!(matches!(err, AccountError::InviteExpired));

    let invite = invite_code::Entity::find_by_id("invite_LATE")
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invite.status, InviteCodeStatus::Expired);

    let mut unknown = account("unknown@example.com");
    unknown.invite_code = Some("NOPE".to_string());
    let err = accounts::register(&state.db, unknown, 4).await.unwrap_err();
    assert!(matches!(err, AccountError::InviteNotFound));
}

#[tokio::test]
async fn test_registration_validates_fields_and_email() {
    let provider = FakeProvider::new();
    let state = test_state(provider).await;

    let mut blank = account("blank@example.com");
    blank.password = String::new();
    let err = accounts::register(&state.db, blank, 4).await.unwrap_err();
    assert!(matches!(err, AccountError::MissingFields));

    accounts::register(&state.db, account("taken@example.com"), 4)
        .await
        .unwrap();
    let err = accounts::register(&state.db, account("  TAKEN@example.com "), 4)
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::EmailTaken));

    let user = accounts::authenticate(&state.db, "Taken@Example.com", common::PASSWORD)
        .await
        .unwrap();
    assert_eq!(user.email, "taken@example.com");
    let err = accounts::authenticate(&state.db, "taken@example.com", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::InvalidCredentials));
}

#[tokio::test]
async fn test_existing_grant_keeps_its_access_method() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let course = seed_course(&state, "course_dup", "Duplicate").await;
    seed_mapping(&state, "prod_dup", &course.id).await;
    let user = seed_user(&state, "Alan", "alan@example.com").await;

    let first = grants::ensure_access(&state.db, &user.id, &course.id, AccessMethod::InviteCode, None)
        .await
        .unwrap();
    assert!(first.created);

    provider.paid_session("cs_dup", "alan@example.com", "prod_dup");
    let confirmation = reconcile::confirm_checkout(&state, "cs_dup", Some(&Caller::from(&user)))
        .await
        .unwrap();
    assert_eq!(confirmation.status, ConfirmationStatus::Completed { claimed: false });

    let second = grants::ensure_access(
        &state.db,
        &user.id,
        &course.id,
        AccessMethod::Purchased,
        Some(&confirmation.purchase.id),
    )
    .await
    .unwrap();
    assert!(!second.created);
    assert_eq!(second.grant.id, first.grant.id);
    assert_eq!(second.grant.access_method, AccessMethod::InviteCode);
    assert_eq!(second.grant.purchase_id, None);

    let all = grants::grants_for_user(&state.db, &user.id).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_failed_invite_grant_rolls_back_registration() {
    let provider = FakeProvider::new();
    let state = test_state(provider).await;
    let course = seed_course(&state, "course_atomic", "All Or Nothing").await;
    seed_invite(&state, "ATOMIC", &course.id, None).await;

    sea_orm::ConnectionTrait::execute_unprepared(&state.db, r#"DROP TABLE "UserCourse""#)
        .await
        .unwrap();

    let mut invited = account("atomic@example.com");
    invited.invite_code = Some("ATOMIC".to_string());
    let err = accounts::register(&state.db, invited, 4).await.unwrap_err();
    assert!(matches!(err, AccountError::Database(_)));

    assert!(
        accounts::find_user_by_email(&state.db, "atomic@example.com")
            .await
            .unwrap()
            .is_none()
    );
    let invite = invite_code::Entity::find_by_id("invite_ATOMIC")
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invite.status, InviteCodeStatus::Active);
    assert_eq!(invite.used_by, None);
}

#[tokio::test]
async fn test_logged_in_unmapped_purchase_stays_claimable() {
    let provider = FakeProvider::new();
    let state = test_state(provider.clone()).await;
    let user = seed_user(&state, "Buyer", "buyer@example.com").await;
    let caller = Caller::from(&user);
    provider.paid_session("cs_nowhere", "buyer@example.com", "prod_nowhere");

    let confirmation = reconcile::confirm_checkout(&state, "cs_nowhere", Some(&caller))
        .await
        .unwrap();
    assert_eq!(
        confirmation.status,
        ConfirmationStatus::UnmappedProduct {
            product_id: "prod_nowhere".to_string()
        }
    );
    assert_eq!(confirmation.purchase.status, PurchaseStatus::PendingClaim);
    assert_eq!(confirmation.purchase.user_id, None);
    assert_eq!(confirmation.purchase.completed_at, None);
    assert_eq!(grant_count(&state).await, 0);

    // Once the product is mapped, the buyer's claim completes it.
    let course = seed_course(&state, "course_nowhere", "Found At Last").await;
    seed_mapping(&state, "prod_nowhere", &course.id).await;
    let summary = reconcile::claim_pending_purchases(&state, &caller)
        .await
        .unwrap();
    assert_eq!(summary.claimed_count, 1);

    let purchase = ledger::find_by_session_id(&state.db, "cs_nowhere")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Completed);
    assert_eq!(purchase.user_id.as_deref(), Some(user.id.as_str()));
    assert_eq!(grant_count(&state).await, 1);
}
