//! `SeaORM` Entity prelude

pub use super::course::Entity as Course;
pub use super::invite_code::Entity as InviteCode;
pub use super::invite_code_course::Entity as InviteCodeCourse;
pub use super::product_course_mapping::Entity as ProductCourseMapping;
pub use super::purchase::Entity as Purchase;
pub use super::stripe_event::Entity as StripeEvent;
pub use super::user::Entity as User;
pub use super::user_course::Entity as UserCourse;
