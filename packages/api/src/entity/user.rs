//! `SeaORM` Entity for local accounts

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "User")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(column_type = "Text")]
    pub name: String,
    /// Normalized, see `course_hub_types::utils::normalize_email`
    #[sea_orm(column_type = "Text", unique)]
    pub email: String,
    #[serde(skip_serializing)]
    #[sea_orm(column_name = "hashedPassword", column_type = "Text")]
    pub hashed_password: String,
    #[sea_orm(column_name = "createdAt")]
    pub created_at: DateTime,
    #[sea_orm(column_name = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase::Entity")]
    Purchase,
    #[sea_orm(has_many = "super::user_course::Entity")]
    UserCourse,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl Related<super::user_course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserCourse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
