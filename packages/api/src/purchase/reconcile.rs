use course_hub_types::utils::emails_match;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    grants,
    identity::{Caller, Classification, classify},
    ledger::{self, LedgerError, Transition},
};
use crate::{
    accounts,
    entity::{
        course, purchase,
        sea_orm_active_enums::{AccessMethod, PurchaseStatus},
    },
    error::ApiError,
    payment::PaymentError,
    state::State,
};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("checkout session {session_id} is not paid")]
    NotPaid { session_id: String },
    #[error("purchase {purchase_id} is {status:?} and can no longer be completed")]
    Closed {
        purchase_id: String,
        status: PurchaseStatus,
    },
    #[error("no active course mapping for product {product_id}")]
    Unmapped { product_id: String },
    #[error("redirect url {url} is outside the storefront")]
    InvalidRedirect { url: String },
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<LedgerError> for ReconcileError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Payment(err) => ReconcileError::Payment(err),
            LedgerError::Database(err) => ReconcileError::Database(err),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotPaid { .. } => {
                ApiError::bad_request("Payment not completed").with_code("PAYMENT_NOT_COMPLETED")
            }
            ReconcileError::Closed { .. } => ApiError::conflict(err.to_string()),
            ReconcileError::Unmapped { .. } => {
                ApiError::not_found(err.to_string()).with_code("UNMAPPED_PRODUCT")
            }
            ReconcileError::InvalidRedirect { .. } => {
                ApiError::bad_request(err.to_string()).with_code("INVALID_REDIRECT")
            }
            ReconcileError::Payment(err) => err.into(),
            ReconcileError::Database(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Access granted. `claimed` when the purchase was attached to the caller in this run.
    Completed { claimed: bool },
    NeedsLogin,
    NeedsRegistration,
    EmailMismatch { purchase_email: String },
    UnmappedProduct { product_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub purchase: purchase::Model,
    pub course: Option<course::Model>,
    pub status: ConfirmationStatus,
}

/// Status shown to the buyer after checkout. Values this build does not know
/// decode as `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    LoggedInCompleted,
    LoggedInDifferentEmail,
    ClaimedAndCompleted,
    NeedsClaim,
    #[serde(other)]
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Login,
    Register,
}

impl ConfirmationStatus {
    /// `None` for outcomes that are reported as errors instead.
    pub fn user_status(&self) -> Option<(UserStatus, Option<NextStep>)> {
        match self {
            ConfirmationStatus::Completed { claimed: false } => {
                Some((UserStatus::LoggedInCompleted, None))
            }
            ConfirmationStatus::Completed { claimed: true } => {
                Some((UserStatus::ClaimedAndCompleted, None))
            }
            ConfirmationStatus::EmailMismatch { .. } => {
                Some((UserStatus::LoggedInDifferentEmail, None))
            }
            ConfirmationStatus::NeedsLogin => Some((UserStatus::NeedsClaim, Some(NextStep::Login))),
            ConfirmationStatus::NeedsRegistration => {
                Some((UserStatus::NeedsClaim, Some(NextStep::Register)))
            }
            ConfirmationStatus::UnmappedProduct { .. } => None,
        }
    }
}

/// Confirms a checkout session against the provider and derives purchase,
/// access and buyer status from it. Safe to run any number of times, from the
/// client and from webhooks, in any order.
#[tracing::instrument(
    name = "reconcile::confirm_checkout",
    skip(state, caller),
    fields(caller_id = caller.map(|c| c.id.as_str()).unwrap_or("guest"))
)]
pub async fn confirm_checkout(
    state: &State,
    session_id: &str,
    caller: Option<&Caller>,
) -> Result<Confirmation, ReconcileError> {
    // Provider first: nothing is written when it is unreachable.
    let session = state
        .payments()?
        .retrieve_checkout_session(session_id)
        .await?;
    if !session.is_settled() {
        tracing::info!(payment_status = ?session.payment_status, "Checkout session not paid");
        return Err(ReconcileError::NotPaid {
            session_id: session_id.to_string(),
        });
    }

    let product_id = &session.primary_item()?.product_id;
    let course = state.mappings.resolve_active(&state.db, product_id).await?;

    let mut purchase = match ledger::find_by_session_id(&state.db, &session.id).await? {
        Some(purchase) => purchase,
        None => {
            // Unmapped rows stay unowned so a later claim can pick them up.
            let customer_email = session.customer_email()?;
            let attached = caller
                .filter(|_| course.is_some())
                .filter(|caller| emails_match(&caller.email, customer_email))
                .map(|caller| caller.id.as_str());
            ledger::create_from_provider_session(&state.db, &session, attached).await?
        }
    };

    if purchase.status.is_terminal() {
        return Err(ReconcileError::Closed {
            purchase_id: purchase.id,
            status: purchase.status,
        });
    }

    if purchase.stripe_payment_intent_id.is_none() {
        if let Some(payment_intent_id) = session.payment_intent_id.as_deref() {
            purchase =
                ledger::record_payment_intent(&state.db, &purchase.id, payment_intent_id).await?;
        }
    }

    let Some(course) = course else {
        tracing::warn!(
            product_id = %product_id,
            purchase_id = %purchase.id,
            "No active course mapping for product"
        );
        return Ok(Confirmation {
            purchase,
            course: None,
            status: ConfirmationStatus::UnmappedProduct {
                product_id: product_id.clone(),
            },
        });
    };

    // Without a caller, a purchase that already names its buyer (eager
    // checkout, webhook path) is completed on behalf of that buyer.
    let recorded_owner = match (caller, purchase.user_id.as_deref()) {
        (None, Some(owner_id)) => accounts::find_user_by_id(&state.db, owner_id)
            .await?
            .map(|user| Caller::from(&user)),
        _ => None,
    };
    let identity = caller.or(recorded_owner.as_ref());

    let (purchase, status) = match identity {
        None => await_identity(state, purchase).await?,
        Some(identity) => match classify(Some(identity), &purchase) {
            Classification::Owned => complete(state, purchase, &course, identity, false).await?,
            Classification::Claimable => {
                match ledger::attach_user(&state.db, &purchase.id, &identity.id).await? {
                    Transition::Applied(purchase) | Transition::Unchanged(purchase) => {
                        complete(state, purchase, &course, identity, true).await?
                    }
                    Transition::Refused(purchase) => mismatch(purchase),
                }
            }
            Classification::EmailMismatch => mismatch(purchase),
            Classification::NeedsIdentity => await_identity(state, purchase).await?,
        },
    };

    Ok(Confirmation {
        purchase,
        course: Some(course),
        status,
    })
}

async fn complete(
    state: &State,
    purchase: purchase::Model,
    course: &course::Model,
    owner: &Caller,
    claimed: bool,
) -> Result<(purchase::Model, ConfirmationStatus), ReconcileError> {
    let purchase = match ledger::mark_completed(&state.db, &purchase.id).await? {
        Transition::Applied(purchase) | Transition::Unchanged(purchase) => purchase,
        Transition::Refused(purchase) => {
            return Err(ReconcileError::Closed {
                purchase_id: purchase.id,
                status: purchase.status,
            });
        }
    };

    grants::ensure_access(
        &state.db,
        &owner.id,
        &course.id,
        AccessMethod::Purchased,
        Some(&purchase.id),
    )
    .await?;

    tracing::info!(
        purchase_id = %purchase.id,
        user_id = %owner.id,
        course_id = %course.id,
        claimed,
        "Purchase completed"
    );
    Ok((purchase, ConfirmationStatus::Completed { claimed }))
}

fn mismatch(purchase: purchase::Model) -> (purchase::Model, ConfirmationStatus) {
    tracing::info!(purchase_id = %purchase.id, "Purchase belongs to a different email");
    let purchase_email = purchase.customer_email.clone();
    (purchase, ConfirmationStatus::EmailMismatch { purchase_email })
}

async fn await_identity(
    state: &State,
    purchase: purchase::Model,
) -> Result<(purchase::Model, ConfirmationStatus), ReconcileError> {
    let purchase = ledger::mark_pending_claim(&state.db, &purchase.id)
        .await?
        .into_model();

    let status = match accounts::find_user_by_email(&state.db, &purchase.customer_email).await? {
        Some(_) => ConfirmationStatus::NeedsLogin,
        None => ConfirmationStatus::NeedsRegistration,
    };

    tracing::info!(purchase_id = %purchase.id, ?status, "Purchase awaiting claim");
    Ok((purchase, status))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GrantedCourse {
    pub course_id: String,
    pub course_title: String,
    pub purchase_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimFailure {
    pub purchase_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSummary {
    pub attempted_count: usize,
    pub claimed_count: usize,
    /// Only access created by this run
    pub courses_granted: Vec<GrantedCourse>,
    pub failures: Vec<ClaimFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingClaims {
    pub has_pending_claims: bool,
    pub pending_count: u64,
}

#[derive(Debug, thiserror::Error)]
enum ClaimError {
    #[error("no active course mapping for product {0}")]
    Unmapped(String),
    #[error("purchase was claimed by another account")]
    ClaimedByAnother,
    #[error("purchase is {0:?}")]
    Closed(PurchaseStatus),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Attaches every unowned purchase made with the caller's email. Each purchase
/// succeeds or fails on its own; failures are collected, not raised.
#[tracing::instrument(name = "reconcile::claim_pending_purchases", skip(state, caller), fields(user_id = %caller.id))]
pub async fn claim_pending_purchases(
    state: &State,
    caller: &Caller,
) -> Result<ClaimSummary, ReconcileError> {
    let pending = ledger::pending_claims_for_email(&state.db, &caller.email).await?;
    let mut summary = ClaimSummary {
        attempted_count: pending.len(),
        ..Default::default()
    };

    for purchase in pending {
        match claim_one(state, caller, &purchase).await {
            Ok(granted) => {
                summary.claimed_count += 1;
                summary.courses_granted.extend(granted);
            }
            Err(err) => {
                tracing::warn!(purchase_id = %purchase.id, error = %err, "Failed to claim purchase");
                summary.failures.push(ClaimFailure {
                    purchase_id: purchase.id,
                    reason: err.to_string(),
                });
            }
        }
    }

    if summary.attempted_count > 0 {
        tracing::info!(
            attempted = summary.attempted_count,
            claimed = summary.claimed_count,
            failed = summary.failures.len(),
            "Claimed pending purchases"
        );
    }
    Ok(summary)
}

async fn claim_one(
    state: &State,
    caller: &Caller,
    purchase: &purchase::Model,
) -> Result<Option<GrantedCourse>, ClaimError> {
    // Unmapped purchases stay claimable for when a mapping appears.
    let course = state
        .mappings
        .resolve_active(&state.db, &purchase.product_id)
        .await?
        .ok_or_else(|| ClaimError::Unmapped(purchase.product_id.clone()))?;

    if ledger::attach_user(&state.db, &purchase.id, &caller.id)
        .await?
        .is_refused()
    {
        return Err(ClaimError::ClaimedByAnother);
    }

    let completed = match ledger::mark_completed(&state.db, &purchase.id).await? {
        Transition::Applied(purchase) | Transition::Unchanged(purchase) => purchase,
        Transition::Refused(purchase) => return Err(ClaimError::Closed(purchase.status)),
    };

    let grant = grants::ensure_access(
        &state.db,
        &caller.id,
        &course.id,
        AccessMethod::Purchased,
        Some(&completed.id),
    )
    .await?;

    Ok(grant.created.then(|| GrantedCourse {
        course_id: course.id,
        course_title: course.title,
        purchase_id: completed.id,
    }))
}

pub async fn pending_claims(state: &State, caller: &Caller) -> Result<PendingClaims, DbErr> {
    let pending_count = ledger::count_pending_claims(&state.db, &caller.email).await?;
    Ok(PendingClaims {
        has_pending_claims: pending_count > 0,
        pending_count,
    })
}

/// Session expired or its asynchronous payment failed.
#[tracing::instrument(name = "reconcile::record_checkout_failure", skip(state))]
pub async fn record_checkout_failure(
    state: &State,
    session_id: &str,
) -> Result<Option<Transition>, DbErr> {
    let Some(purchase) = ledger::find_by_session_id(&state.db, session_id).await? else {
        tracing::debug!("No purchase recorded for failed session");
        return Ok(None);
    };
    ledger::mark_failed(&state.db, &purchase.id).await.map(Some)
}

#[tracing::instrument(name = "reconcile::record_refund", skip(state))]
pub async fn record_refund(
    state: &State,
    payment_intent_id: &str,
) -> Result<Option<Transition>, DbErr> {
    let Some(purchase) = ledger::find_by_payment_intent(&state.db, payment_intent_id).await? else {
        tracing::warn!("No purchase recorded for refunded payment intent");
        return Ok(None);
    };
    ledger::mark_refunded(&state.db, &purchase.id).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_outcomes_map_to_buyer_status() {
        assert_eq!(
            ConfirmationStatus::Completed { claimed: false }.user_status(),
            Some((UserStatus::LoggedInCompleted, None))
        );
        assert_eq!(
            ConfirmationStatus::Completed { claimed: true }.user_status(),
            Some((UserStatus::ClaimedAndCompleted, None))
        );
        assert_eq!(
            ConfirmationStatus::NeedsLogin.user_status(),
            Some((UserStatus::NeedsClaim, Some(NextStep::Login)))
        );
        assert_eq!(
            ConfirmationStatus::NeedsRegistration.user_status(),
            Some((UserStatus::NeedsClaim, Some(NextStep::Register)))
        );
        assert_eq!(
            ConfirmationStatus::EmailMismatch {
                purchase_email: "a@b.io".into()
            }
            .user_status(),
            Some((UserStatus::LoggedInDifferentEmail, None))
        );
        assert_eq!(
            ConfirmationStatus::UnmappedProduct {
                product_id: "prod_1".into()
            }
            .user_status(),
            None
        );
    }

    #[test]
    fn unknown_user_status_decodes_as_processing() {
        let status: UserStatus = serde_json::from_str("\"refund_pending\"").unwrap();
        assert_eq!(status, UserStatus::Processing);

        let status: UserStatus = serde_json::from_str("\"needs_claim\"").unwrap();
        assert_eq!(status, UserStatus::NeedsClaim);
        assert_eq!(
            serde_json::to_string(&UserStatus::ClaimedAndCompleted).unwrap(),
            "\"claimed_and_completed\""
        );
    }

    #[test]
    fn reconcile_errors_map_to_http_status() {
        let err: ApiError = ReconcileError::NotPaid {
            session_id: "cs_1".into(),
        }
        .into();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        let err: ApiError = ReconcileError::Closed {
            purchase_id: "p1".into(),
            status: PurchaseStatus::Refunded,
        }
        .into();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);

        let err: ApiError = ReconcileError::Unmapped {
            product_id: "prod_1".into(),
        }
        .into();
        assert_eq!(err.code(), "UNMAPPED_PRODUCT");

        let err: ApiError = ReconcileError::InvalidRedirect {
            url: "https://evil.example".into(),
        }
        .into();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_REDIRECT");
    }
}
