//! Course access grants, at most one per (user, course).

use course_hub_types::create_id;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    QueryOrder, TryInsertResult, sea_query::OnConflict,
};

use crate::entity::{sea_orm_active_enums::AccessMethod, user_course};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub grant: user_course::Model,
    /// `false` when access already existed; the existing row is left as is.
    pub created: bool,
}

pub async fn ensure_access<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    course_id: &str,
    method: AccessMethod,
    purchase_id: Option<&str>,
) -> Result<Grant, DbErr> {
    let candidate = user_course::ActiveModel {
        id: Set(create_id()),
        user_id: Set(user_id.to_string()),
        course_id: Set(course_id.to_string()),
        access_method: Set(method),
        purchase_id: Set(purchase_id.map(str::to_string)),
        granted_at: Set(chrono::Utc::now().naive_utc()),
    };

    let inserted = user_course::Entity::insert(candidate)
        .on_conflict(
            OnConflict::columns([user_course::Column::UserId, user_course::Column::CourseId])
                .do_nothing()
                .to_owned(),
        )
        .do_nothing()
        .exec(db)
        .await?;
    let created = matches!(inserted, TryInsertResult::Inserted(_));

    let grant = find_grant(db, user_id, course_id)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("UserCourse {user_id}/{course_id}")))?;

    if created {
        tracing::info!(
            user_id,
            course_id,
            access_method = ?method,
            purchase_id = purchase_id.unwrap_or(""),
            "Granted course access"
        );
    }

    Ok(Grant { grant, created })
}

pub async fn find_grant<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
    course_id: &str,
) -> Result<Option<user_course::Model>, DbErr> {
    user_course::Entity::find()
        .filter(user_course::Column::UserId.eq(user_id))
        .filter(user_course::Column::CourseId.eq(course_id))
        .one(db)
        .await
}

pub async fn grants_for_user<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> Result<Vec<user_course::Model>, DbErr> {
    user_course::Entity::find()
        .filter(user_course::Column::UserId.eq(user_id))
        .order_by_asc(user_course::Column::GrantedAt)
        .all(db)
        .await
}
