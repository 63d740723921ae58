//! Durable record of checkout sessions. Every write is idempotent: creation is
//! keyed by the session id and every status change is one conditional update.

use course_hub_types::{create_id, utils::normalize_email};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, TryInsertResult, sea_query::OnConflict,
};

use crate::{
    entity::{purchase, sea_orm_active_enums::PurchaseStatus},
    payment::{CheckoutSessionData, PaymentError, PriceData, to_major_units},
};

/// Outcome of a status change. All variants carry the row as it is now.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(purchase::Model),
    /// The purchase was already in the requested state.
    Unchanged(purchase::Model),
    /// The change is not a legal step from the current state.
    Refused(purchase::Model),
}

impl Transition {
    pub fn model(&self) -> &purchase::Model {
        match self {
            Transition::Applied(model) | Transition::Unchanged(model) | Transition::Refused(model) => {
                model
            }
        }
    }

    pub fn into_model(self) -> purchase::Model {
        match self {
            Transition::Applied(model) | Transition::Unchanged(model) | Transition::Refused(model) => {
                model
            }
        }
    }

    pub fn is_refused(&self) -> bool {
        matches!(self, Transition::Refused(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

pub async fn find_by_id<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<Option<purchase::Model>, DbErr> {
    purchase::Entity::find_by_id(id).one(db).await
}

pub async fn find_by_session_id<C: ConnectionTrait>(
    db: &C,
    session_id: &str,
) -> Result<Option<purchase::Model>, DbErr> {
    purchase::Entity::find()
        .filter(purchase::Column::StripeSessionId.eq(session_id))
        .one(db)
        .await
}

pub async fn find_by_payment_intent<C: ConnectionTrait>(
    db: &C,
    payment_intent_id: &str,
) -> Result<Option<purchase::Model>, DbErr> {
    purchase::Entity::find()
        .filter(purchase::Column::StripePaymentIntentId.eq(payment_intent_id))
        .one(db)
        .await
}

/// Builds the purchase from the provider's view of a paid session. `COMPLETED`
/// when a user is attached, `PENDING_CLAIM` otherwise. When another request
/// created the row first, that row is returned untouched.
pub async fn create_from_provider_session<C: ConnectionTrait>(
    db: &C,
    session: &CheckoutSessionData,
    attached_user: Option<&str>,
) -> Result<purchase::Model, LedgerError> {
    let item = session.primary_item()?;
    let customer_email = session.customer_email()?;
    let now = chrono::Utc::now().naive_utc();

    let (status, completed_at) = match attached_user {
        Some(_) => (PurchaseStatus::Completed, Some(now)),
        None => (PurchaseStatus::PendingClaim, None),
    };

    let candidate = purchase::ActiveModel {
        id: Set(create_id()),
        user_id: Set(attached_user.map(str::to_string)),
        customer_email: Set(normalize_email(customer_email)),
        product_id: Set(item.product_id.clone()),
        stripe_session_id: Set(session.id.clone()),
        stripe_price_id: Set(item.price_id.clone()),
        stripe_payment_intent_id: Set(session.payment_intent_id.clone()),
        amount: Set(to_major_units(item.unit_amount)),
        currency: Set(item.currency.to_uppercase()),
        status: Set(status),
        completed_at: Set(completed_at),
        refunded_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    Ok(insert_once(db, candidate, &session.id).await?)
}

/// Eager record for a logged-in user who is about to be redirected to checkout.
pub async fn create_pending<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    customer_email: &str,
    session_id: &str,
    price: &PriceData,
) -> Result<purchase::Model, DbErr> {
    let now = chrono::Utc::now().naive_utc();
    let candidate = purchase::ActiveModel {
        id: Set(create_id()),
        user_id: Set(Some(user_id.to_string())),
        customer_email: Set(normalize_email(customer_email)),
        product_id: Set(price.product_id.clone()),
        stripe_session_id: Set(session_id.to_string()),
        stripe_price_id: Set(price.price_id.clone()),
        stripe_payment_intent_id: Set(None),
        amount: Set(to_major_units(price.unit_amount)),
        currency: Set(price.currency.to_uppercase()),
        status: Set(PurchaseStatus::Pending),
        completed_at: Set(None),
        refunded_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    insert_once(db, candidate, session_id).await
}

async fn insert_once<C: ConnectionTrait>(
    db: &C,
    candidate: purchase::ActiveModel,
    session_id: &str,
) -> Result<purchase::Model, DbErr> {
    let result = purchase::Entity::insert(candidate)
        .on_conflict(
            OnConflict::column(purchase::Column::StripeSessionId)
                .do_nothing()
                .to_owned(),
        )
        .do_nothing()
        .exec(db)
        .await?;

    if let TryInsertResult::Conflicted = result {
        tracing::debug!(session_id, "Purchase already recorded, reading back");
    }

    find_by_session_id(db, session_id)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("Purchase for session {session_id}")))
}

/// Requires an owner, so `COMPLETED` never exists without `user_id`.
pub async fn mark_completed<C: ConnectionTrait>(db: &C, id: &str) -> Result<Transition, DbErr> {
    transition(db, id, PurchaseStatus::Completed).await
}

pub async fn mark_pending_claim<C: ConnectionTrait>(db: &C, id: &str) -> Result<Transition, DbErr> {
    transition(db, id, PurchaseStatus::PendingClaim).await
}

pub async fn mark_failed<C: ConnectionTrait>(db: &C, id: &str) -> Result<Transition, DbErr> {
    transition(db, id, PurchaseStatus::Failed).await
}

pub async fn mark_refunded<C: ConnectionTrait>(db: &C, id: &str) -> Result<Transition, DbErr> {
    transition(db, id, PurchaseStatus::Refunded).await
}

/// Sets the owner of an unowned purchase. Attaching the current owner again is
/// `Unchanged`; a purchase owned by someone else is `Refused`.
pub async fn attach_user<C: ConnectionTrait>(
    db: &C,
    id: &str,
    user_id: &str,
) -> Result<Transition, DbErr> {
    let result = purchase::Entity::update_many()
        .set(purchase::ActiveModel {
            user_id: Set(Some(user_id.to_string())),
            updated_at: Set(chrono::Utc::now().naive_utc()),
            ..Default::default()
        })
        .filter(purchase::Column::Id.eq(id))
        .filter(purchase::Column::UserId.is_null())
        .exec(db)
        .await?;

    let current = current(db, id).await?;
    Ok(if result.rows_affected > 0 {
        Transition::Applied(current)
    } else if current.user_id.as_deref() == Some(user_id) {
        Transition::Unchanged(current)
    } else {
        Transition::Refused(current)
    })
}

async fn transition<C: ConnectionTrait>(
    db: &C,
    id: &str,
    target: PurchaseStatus,
) -> Result<Transition, DbErr> {
    let now = chrono::Utc::now().naive_utc();
    let mut changes = purchase::ActiveModel {
        status: Set(target),
        updated_at: Set(now),
        ..Default::default()
    };
    match target {
        PurchaseStatus::Completed => changes.completed_at = Set(Some(now)),
        PurchaseStatus::Refunded => changes.refunded_at = Set(Some(now)),
        PurchaseStatus::Pending | PurchaseStatus::PendingClaim | PurchaseStatus::Failed => {}
    }

    let mut update = purchase::Entity::update_many()
        .set(changes)
        .filter(purchase::Column::Id.eq(id))
        .filter(purchase::Column::Status.is_in(PurchaseStatus::sources_of(target)));
    if target == PurchaseStatus::Completed {
        update = update.filter(purchase::Column::UserId.is_not_null());
    }
    let result = update.exec(db).await?;

    let current = current(db, id).await?;
    let outcome = if result.rows_affected > 0 {
        Transition::Applied(current)
    } else if current.status == target {
        Transition::Unchanged(current)
    } else {
        Transition::Refused(current)
    };

    if let Transition::Refused(model) = &outcome {
        tracing::warn!(
            purchase_id = %id,
            from = ?model.status,
            to = ?target,
            "Refused purchase status change"
        );
    }
    Ok(outcome)
}

async fn current<C: ConnectionTrait>(db: &C, id: &str) -> Result<purchase::Model, DbErr> {
    find_by_id(db, id)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("Purchase {id}")))
}

/// Unowned purchases waiting for the account behind `email`, oldest first.
pub async fn pending_claims_for_email<C: ConnectionTrait>(
    db: &C,
    email: &str,
) -> Result<Vec<purchase::Model>, DbErr> {
    pending_claims_query(email)
        .order_by_asc(purchase::Column::CreatedAt)
        .all(db)
        .await
}

pub async fn count_pending_claims<C: ConnectionTrait>(db: &C, email: &str) -> Result<u64, DbErr> {
    pending_claims_query(email).count(db).await
}

fn pending_claims_query(email: &str) -> sea_orm::Select<purchase::Entity> {
    purchase::Entity::find()
        .filter(purchase::Column::Status.eq(PurchaseStatus::PendingClaim))
        .filter(purchase::Column::CustomerEmail.eq(normalize_email(email)))
        .filter(purchase::Column::UserId.is_null())
}

pub async fn list_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> Result<Vec<purchase::Model>, DbErr> {
    purchase::Entity::find()
        .filter(purchase::Column::UserId.eq(user_id))
        .order_by_desc(purchase::Column::CreatedAt)
        .all(db)
        .await
}

/// Eager purchases are created before the provider assigns a payment intent.
/// Fills it in once, so refunds can be routed back.
pub async fn record_payment_intent<C: ConnectionTrait>(
    db: &C,
    id: &str,
    payment_intent_id: &str,
) -> Result<purchase::Model, DbErr> {
    purchase::Entity::update_many()
        .set(purchase::ActiveModel {
            stripe_payment_intent_id: Set(Some(payment_intent_id.to_string())),
            updated_at: Set(chrono::Utc::now().naive_utc()),
            ..Default::default()
        })
        .filter(purchase::Column::Id.eq(id))
        .filter(purchase::Column::StripePaymentIntentId.is_null())
        .exec(db)
        .await?;

    current(db, id).await
}
