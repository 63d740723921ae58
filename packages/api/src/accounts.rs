//! Local accounts: lookup, registration with optional invite code, and
//! password verification.

use course_hub_types::{create_id, utils::normalize_email};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, SqlErr, TransactionTrait,
};

use crate::{
    entity::{
        invite_code, invite_code_course,
        sea_orm_active_enums::{AccessMethod, InviteCodeStatus},
        user, user_course,
    },
    error::ApiError,
    purchase::grants,
};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("name, email and password are required")]
    MissingFields,
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invite code not found")]
    InviteNotFound,
    #[error("invite code has already been used")]
    InviteUsed,
    #[error("invite code has expired")]
    InviteExpired,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error(transparent)]
    Hash(#[from] bcrypt::BcryptError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::MissingFields
            | AccountError::EmailTaken
            | AccountError::InviteNotFound
            | AccountError::InviteUsed
            | AccountError::InviteExpired => ApiError::bad_request(err.to_string()),
            AccountError::InvalidCredentials => ApiError::unauthorized(err.to_string()),
            AccountError::Hash(err) => err.into(),
            AccountError::Database(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: String,
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub user: user::Model,
    /// Access unlocked by the invite code, if one was redeemed
    pub invite_grants: Vec<user_course::Model>,
}

pub async fn find_user_by_email<C: ConnectionTrait>(
    db: &C,
    email: &str,
) -> Result<Option<user::Model>, DbErr> {
    user::Entity::find()
        .filter(user::Column::Email.eq(normalize_email(email)))
        .one(db)
        .await
}

pub async fn find_user_by_id<C: ConnectionTrait>(
    db: &C,
    id: &str,
) -> Result<Option<user::Model>, DbErr> {
    user::Entity::find_by_id(id).one(db).await
}

/// Inserts the user row. The unique email index decides races.
pub async fn create_user<C: ConnectionTrait>(
    db: &C,
    name: &str,
    email: &str,
    hashed_password: String,
) -> Result<user::Model, AccountError> {
    let now = chrono::Utc::now().naive_utc();
    let user = user::ActiveModel {
        id: Set(create_id()),
        name: Set(name.trim().to_string()),
        email: Set(normalize_email(email)),
        hashed_password: Set(hashed_password),
        created_at: Set(now),
        updated_at: Set(now),
    };

    user.insert(db).await.map_err(|err| match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AccountError::EmailTaken,
        _ => AccountError::Database(err),
    })
}

#[tracing::instrument(name = "accounts::register", skip(db, account, bcrypt_cost), fields(email = %normalize_email(&account.email)))]
pub async fn register<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    account: NewAccount,
    bcrypt_cost: u32,
) -> Result<Registered, AccountError> {
    let email = normalize_email(&account.email);
    if account.name.trim().is_empty() || email.is_empty() || account.password.is_empty() {
        return Err(AccountError::MissingFields);
    }

    if find_user_by_email(db, &email).await?.is_some() {
        return Err(AccountError::EmailTaken);
    }

    let invite = match account.invite_code.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => Some(usable_invite(db, code).await?),
        _ => None,
    };

    let hashed_password = bcrypt::hash(&account.password, bcrypt_cost)?;

    // Account, redemption and invite grants land together or not at all.
    let txn = db.begin().await?;
    let created = async {
        let user = create_user(&txn, &account.name, &email, hashed_password).await?;
        let invite_grants = match &invite {
            Some(invite) => redeem_invite(&txn, invite, &user.id).await?,
            None => Vec::new(),
        };
        Ok::<_, AccountError>((user, invite_grants))
    }
    .await;

    let (user, invite_grants) = match created {
        Ok(created) => {
            txn.commit().await?;
            created
        }
        Err(err) => {
            txn.rollback().await?;
            return Err(err);
        }
    };

    tracing::info!(user_id = %user.id, invite_courses = invite_grants.len(), "Registered account");
    Ok(Registered {
        user,
        invite_grants,
    })
}

/// Codes past their expiry are flipped to `EXPIRED` on first sight.
async fn usable_invite<C: ConnectionTrait>(
    db: &C,
    code: &str,
) -> Result<invite_code::Model, AccountError> {
    let invite = invite_code::Entity::find()
        .filter(invite_code::Column::Code.eq(code.to_uppercase()))
        .one(db)
        .await?
        .ok_or(AccountError::InviteNotFound)?;

    match invite.status {
        InviteCodeStatus::Used => return Err(AccountError::InviteUsed),
        InviteCodeStatus::Expired => return Err(AccountError::InviteExpired),
        InviteCodeStatus::Active => {}
    }

    let now = chrono::Utc::now().naive_utc();
    if invite.expires_at.is_some_and(|expires_at| expires_at < now) {
        invite_code::Entity::update_many()
            .set(invite_code::ActiveModel {
                status: Set(InviteCodeStatus::Expired),
                ..Default::default()
            })
            .filter(invite_code::Column::Id.eq(invite.id.as_str()))
            .filter(invite_code::Column::Status.eq(InviteCodeStatus::Active))
            .exec(db)
            .await?;
        return Err(AccountError::InviteExpired);
    }

    Ok(invite)
}

/// Only an `ACTIVE` code can be consumed; a concurrent redemption loses.
/// Grants the code's courses to `user_id`.
async fn redeem_invite<C: ConnectionTrait>(
    db: &C,
    invite: &invite_code::Model,
    user_id: &str,
) -> Result<Vec<user_course::Model>, AccountError> {
    let result = invite_code::Entity::update_many()
        .set(invite_code::ActiveModel {
            status: Set(InviteCodeStatus::Used),
            used_at: Set(Some(chrono::Utc::now().naive_utc())),
            used_by: Set(Some(user_id.to_string())),
            ..Default::default()
        })
        .filter(invite_code::Column::Id.eq(invite.id.as_str()))
        .filter(invite_code::Column::Status.eq(InviteCodeStatus::Active))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(AccountError::InviteUsed);
    }

    let courses = invite_code_course::Entity::find()
        .filter(invite_code_course::Column::InviteCodeId.eq(invite.id.as_str()))
        .all(db)
        .await?;

    let mut granted = Vec::with_capacity(courses.len());
    for course in courses {
        let grant =
            grants::ensure_access(db, user_id, &course.course_id, AccessMethod::InviteCode, None)
                .await?;
        granted.push(grant.grant);
    }
    Ok(granted)
}

pub async fn authenticate<C: ConnectionTrait>(
    db: &C,
    email: &str,
    password: &str,
) -> Result<user::Model, AccountError> {
    let user = find_user_by_email(db, email)
        .await?
        .ok_or(AccountError::InvalidCredentials)?;

    if !bcrypt::verify(password, &user.hashed_password)? {
        return Err(AccountError::InvalidCredentials);
    }
    Ok(user)
}
