//! Starting a checkout. Logged-in buyers get an eager `PENDING` purchase so the
//! webhook can complete it without a caller.

use std::collections::HashMap;

use super::{identity::Caller, ledger, reconcile::ReconcileError};
use crate::{entity::purchase, payment::NewCheckoutSession, state::State};

#[derive(Debug, Clone)]
pub struct StartedCheckout {
    pub session_id: String,
    pub url: Option<String>,
    pub purchase: Option<purchase::Model>,
}

#[tracing::instrument(
    name = "checkout::start",
    skip(state, caller, success_url, cancel_url),
    fields(caller_id = caller.map(|c| c.id.as_str()).unwrap_or("guest"))
)]
pub async fn start_checkout(
    state: &State,
    caller: Option<&Caller>,
    price_id: &str,
    success_url: Option<String>,
    cancel_url: Option<String>,
) -> Result<StartedCheckout, ReconcileError> {
    let frontend = &state.config.frontend_url;
    let success_url = redirect_url(
        frontend,
        success_url,
        format!("{frontend}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
    )?;
    let cancel_url = redirect_url(frontend, cancel_url, format!("{frontend}/courses"))?;

    let provider = state.payments()?;
    let price = provider.retrieve_price(price_id).await?;

    if state
        .mappings
        .resolve_active(&state.db, &price.product_id)
        .await?
        .is_none()
    {
        return Err(ReconcileError::Unmapped {
            product_id: price.product_id,
        });
    }

    let mut metadata = HashMap::new();
    metadata.insert("priceId".to_string(), price.price_id.clone());
    metadata.insert(
        "userId".to_string(),
        caller
            .map(|caller| caller.id.clone())
            .unwrap_or_else(|| "guest".to_string()),
    );

    let created = provider
        .create_checkout_session(NewCheckoutSession {
            price_id: price.price_id.clone(),
            customer_email: caller.map(|caller| caller.email.clone()),
            success_url,
            cancel_url,
            metadata,
        })
        .await?;

    let purchase = match caller {
        Some(caller) => Some(
            ledger::create_pending(&state.db, &caller.id, &caller.email, &created.id, &price)
                .await?,
        ),
        None => None,
    };

    tracing::info!(session_id = %created.id, product_id = %price.product_id, "Created checkout session");
    Ok(StartedCheckout {
        session_id: created.id,
        url: created.url,
        purchase,
    })
}

/// Redirects must stay on the storefront: the frontend url itself or a path,
/// query or fragment below it.
fn redirect_url(
    frontend: &str,
    requested: Option<String>,
    default: String,
) -> Result<String, ReconcileError> {
    let Some(url) = requested.map(|url| url.trim().to_string()) else {
        return Ok(default);
    };

    let within = url
        .strip_prefix(frontend)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']));
    if !within {
        return Err(ReconcileError::InvalidRedirect { url });
    }
    Ok(url)
}
