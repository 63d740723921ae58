//! Relationship between the current caller and the buyer recorded on a purchase.

use course_hub_types::utils::emails_match;
use serde::{Deserialize, Serialize};

use crate::entity::{purchase, user};

/// Authenticated identity of a request. Absent for guests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub email: String,
}

impl From<&user::Model> for Caller {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The purchase already belongs to the caller.
    Owned,
    /// Bought with another email, or already owned by someone else.
    EmailMismatch,
    /// Unowned and bought with the caller's email.
    Claimable,
    /// No caller to match against.
    NeedsIdentity,
}

pub fn classify(caller: Option<&Caller>, purchase: &purchase::Model) -> Classification {
    let Some(caller) = caller else {
        return Classification::NeedsIdentity;
    };

    let same_email = emails_match(&purchase.customer_email, &caller.email);
    match (purchase.user_id.as_deref(), same_email) {
        (Some(owner), _) if owner == caller.id => Classification::Owned,
        (Some(_), _) => Classification::EmailMismatch,
        (None, true) => Classification::Claimable,
        (None, false) => Classification::EmailMismatch,
    }
}
