//! `SeaORM` Entity for single-use registration codes

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::InviteCodeStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "InviteCode")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    /// Upper-case
    #[sea_orm(column_type = "Text", unique)]
    pub code: String,
    pub status: InviteCodeStatus,
    #[sea_orm(column_name = "expiresAt", nullable)]
    pub expires_at: Option<DateTime>,
    #[sea_orm(column_name = "usedAt", nullable)]
    pub used_at: Option<DateTime>,
    #[sea_orm(column_name = "usedBy", column_type = "Text", nullable)]
    pub used_by: Option<String>,
    #[sea_orm(column_name = "createdAt")]
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::invite_code_course::Entity")]
    InviteCodeCourse,
}

impl Related<super::invite_code_course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InviteCodeCourse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
