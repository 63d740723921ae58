//! `SeaORM` Entities

pub mod prelude;

pub mod course;
pub mod invite_code;
pub mod invite_code_course;
pub mod product_course_mapping;
pub mod purchase;
pub mod sea_orm_active_enums;
pub mod stripe_event;
pub mod user;
pub mod user_course;
