//! `SeaORM` Entity, courses unlocked by an invite code

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "InviteCodeCourse")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(column_name = "inviteCodeId", column_type = "Text")]
    pub invite_code_id: String,
    #[sea_orm(column_name = "courseId", column_type = "Text")]
    pub course_id: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::invite_code::Entity",
        from = "Column::InviteCodeId",
        to = "super::invite_code::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    InviteCode,
    #[sea_orm(
        belongs_to = "super::course::Entity",
        from = "Column::CourseId",
        to = "super::course::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Course,
}

impl Related<super::invite_code::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InviteCode.def()
    }
}

impl Related<super::course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Course.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
