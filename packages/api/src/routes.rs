pub mod auth;
pub mod checkout;
pub mod health;
pub mod user;
pub mod webhook;
