//! `SeaORM` Entity for checkout sessions and their lifecycle

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::PurchaseStatus;

/// One row per provider checkout session
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "Purchase")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub id: String,
    /// Owner, unknown until the purchase is claimed
    #[sea_orm(column_name = "userId", column_type = "Text", nullable)]
    pub user_id: Option<String>,
    /// Normalized email the provider collected at checkout
    #[sea_orm(column_name = "customerEmail", column_type = "Text")]
    pub customer_email: String,
    /// External product id of the purchased line item
    #[sea_orm(column_name = "productId", column_type = "Text")]
    pub product_id: String,
    #[sea_orm(column_name = "stripeSessionId", column_type = "Text", unique)]
    pub stripe_session_id: String,
    #[sea_orm(column_name = "stripePriceId", column_type = "Text")]
    pub stripe_price_id: String,
    /// Routes refund events back to the purchase
    #[sea_orm(column_name = "stripePaymentIntentId", column_type = "Text", nullable)]
    pub stripe_payment_intent_id: Option<String>,
    /// Whole currency units
    #[sea_orm(column_type = "Double")]
    pub amount: f64,
    /// Upper-case ISO code (e.g., "EUR", "USD")
    #[sea_orm(column_type = "Text")]
    pub currency: String,
    pub status: PurchaseStatus,
    #[sea_orm(column_name = "completedAt", nullable)]
    pub completed_at: Option<DateTime>,
    #[sea_orm(column_name = "refundedAt", nullable)]
    pub refunded_at: Option<DateTime>,
    #[sea_orm(column_name = "createdAt")]
    pub created_at: DateTime,
    #[sea_orm(column_name = "updatedAt")]
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    User,
    #[sea_orm(has_many = "super::user_course::Entity")]
    UserCourse,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::user_course::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserCourse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
