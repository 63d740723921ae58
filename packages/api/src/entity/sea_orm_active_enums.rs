//! `SeaORM` active enums. Stored as text so the same schema runs on every backend.

use sea_orm::Iterable;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "PENDING_CLAIM")]
    PendingClaim,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
}

impl PurchaseStatus {
    /// Edges of the purchase lifecycle. Anything not listed here is refused.
    pub fn can_transition_to(self, next: PurchaseStatus) -> bool {
        use PurchaseStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, PendingClaim)
                | (PendingClaim, Completed)
                | (Pending, Failed)
                | (Completed, Refunded)
        )
    }

    /// States a purchase may be in for `target` to be reachable in one step.
    pub fn sources_of(target: PurchaseStatus) -> Vec<PurchaseStatus> {
        PurchaseStatus::iter()
            .filter(|source| source.can_transition_to(target))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseStatus::Failed | PurchaseStatus::Refunded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMethod {
    #[sea_orm(string_value = "PURCHASED")]
    Purchased,
    #[sea_orm(string_value = "GRANTED")]
    Granted,
    #[sea_orm(string_value = "INVITE_CODE")]
    InviteCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CourseStatus {
    #[sea_orm(string_value = "DRAFT")]
    Draft,
    #[sea_orm(string_value = "PUBLISHED")]
    Published,
    #[sea_orm(string_value = "ARCHIVED")]
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteCodeStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "USED")]
    Used,
    #[sea_orm(string_value = "EXPIRED")]
    Expired,
}
