//! Creates the tables and composite indexes this service relies on.

use sea_orm::{
    ConnectionTrait, DbErr, EntityTrait, Schema,
    sea_query::{Index, IndexCreateStatement},
};

use crate::entity::{
    course, invite_code, invite_code_course, product_course_mapping, purchase, stripe_event, user,
    user_course,
};

/// Idempotent; safe to run on every start.
#[tracing::instrument(name = "schema::bootstrap", skip(db))]
pub async fn bootstrap<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    // Referenced tables first, foreign keys are created inline.
    create_table(db, user::Entity).await?;
    create_table(db, course::Entity).await?;
    create_table(db, product_course_mapping::Entity).await?;
    create_table(db, purchase::Entity).await?;
    create_table(db, user_course::Entity).await?;
    create_table(db, invite_code::Entity).await?;
    create_table(db, invite_code_course::Entity).await?;
    create_table(db, stripe_event::Entity).await?;

    create_index(
        db,
        Index::create()
            .name("UserCourse_userId_courseId_key")
            .table(user_course::Entity)
            .col(user_course::Column::UserId)
            .col(user_course::Column::CourseId)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    create_index(
        db,
        Index::create()
            .name("InviteCodeCourse_inviteCodeId_courseId_key")
            .table(invite_code_course::Entity)
            .col(invite_code_course::Column::InviteCodeId)
            .col(invite_code_course::Column::CourseId)
            .unique()
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    create_index(
        db,
        Index::create()
            .name("Purchase_customerEmail_status_idx")
            .table(purchase::Entity)
            .col(purchase::Column::CustomerEmail)
            .col(purchase::Column::Status)
            .if_not_exists()
            .to_owned(),
    )
    .await?;

    tracing::info!("Schema ready");
    Ok(())
}

async fn create_table<C: ConnectionTrait, E: EntityTrait>(db: &C, entity: E) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut statement = Schema::new(backend).create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

async fn create_index<C: ConnectionTrait>(db: &C, index: IndexCreateStatement) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    db.execute(backend.build(&index)).await?;
    Ok(())
}
