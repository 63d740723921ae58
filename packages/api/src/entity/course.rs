//! `SeaORM` Entity, read-only catalog of courses

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::CourseStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "Course")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    #[sea_orm(column_type = "Text")]
    pub title: String,
    pub status: CourseStatus,
    #[sea_orm(column_name = "createdAt")]
    pub created_at: DateTime,
    #[sea_orm(column_name = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_course_mapping::Entity")]
    ProductCourseMapping,
    #[sea_orm(has_many = "super::user_course::Entity")]
    UserCourse,
    #[sea_orm(has_many = "super::invite_code_course::Entity")]
    InviteCodeCourse,
}

impl Related<super::product_course_mapping::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductCourseMapping.def()
    }
}

impl Related<super::user_course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserCourse.def()
    }
}

impl Related<super::invite_code_course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InviteCodeCourse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
