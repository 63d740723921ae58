//! Purchase-to-access reconciliation.
//!
//! [`reconcile`] drives two protocols over the leaf modules: confirming a paid
//! checkout session (from the client or from a webhook) and claiming purchases
//! that were paid before the buyer had an account.

pub mod checkout;
pub mod grants;
pub mod identity;
pub mod ledger;
pub mod mapping;
pub mod reconcile;

pub use identity::Caller;
