use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        // Session token from /auth/login or /auth/register
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                Http::builder()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("Session token issued by /auth/login"))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "Course Hub API",
        version = "1.0.0",
        description = "Course storefront backend: checkout, purchase reconciliation and course access.\n\n## Authentication\n\nRoutes marked with `bearer_auth` accept `Authorization: Bearer <token>`. Checkout routes also serve guests.",
        license(name = "MIT")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Registration and login"),
        (name = "checkout", description = "Checkout sessions and payment confirmation"),
        (name = "user", description = "Purchases and claims of the current user"),
        (name = "webhook", description = "Payment provider callbacks")
    ),
    paths(
        crate::routes::health::health,
        crate::routes::health::db_health,
        crate::routes::auth::register::register,
        crate::routes::auth::login::login,
        crate::routes::checkout::process::process_checkout,
        crate::routes::checkout::session::create_checkout_session,
        crate::routes::user::claim_purchases::claim_purchases,
        crate::routes::user::claim_purchases::get_pending_claims,
        crate::routes::user::purchases::get_purchases,
        crate::routes::webhook::stripe_webhook,
    ),
    components(schemas(
        crate::routes::health::HealthResponse,
        crate::routes::health::DbHealthResponse,
        crate::routes::auth::AccountInfo,
        crate::routes::auth::SessionResponse,
        crate::routes::auth::register::RegisterRequest,
        crate::routes::auth::login::LoginRequest,
        crate::routes::checkout::process::ProcessCheckoutRequest,
        crate::routes::checkout::process::ProcessCheckoutResponse,
        crate::routes::checkout::session::CheckoutSessionRequest,
        crate::routes::checkout::session::CheckoutSessionResponse,
        crate::routes::user::purchases::PurchasesResponse,
        crate::routes::webhook::WebhookAck,
        crate::purchase::reconcile::UserStatus,
        crate::purchase::reconcile::NextStep,
        crate::purchase::reconcile::ClaimSummary,
        crate::purchase::reconcile::GrantedCourse,
        crate::purchase::reconcile::ClaimFailure,
        crate::purchase::reconcile::PendingClaims,
    ))
)]
pub struct ApiDoc;
