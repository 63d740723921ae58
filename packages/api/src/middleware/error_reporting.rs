use axum::{extract::Request, middleware::Next, response::Response};

use crate::{error::ErrorReport, middleware::jwt::AppUser};

const MAX_LEN: usize = 32 * 1024;
const SECRET_KEYS: [&str; 6] = [
    "password",
    "secret",
    "token",
    "api_key",
    "sk_live_",
    "sk_test_",
];

/// Replaces the value after `key=` (or the remainder of a `sk_` key) up to the
/// next separator.
fn redact_after(input: &str, key: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find(key) {
        let value_start = pos + key.len();
        let value_start = if rest[value_start..].starts_with('=') {
            value_start + 1
        } else {
            value_start
        };
        out.push_str(&rest[..value_start]);
        out.push_str("[REDACTED]");
        let value_end = rest[value_start..]
            .find(|c: char| c == '&' || c == ';' || c == ',' || c.is_whitespace())
            .map(|p| value_start + p)
            .unwrap_or(rest.len());
        rest = &rest[value_end..];
    }
    out.push_str(rest);
    out
}

/// Connection strings carry credentials in their userinfo.
fn redact_connection_url(input: &str) -> String {
    let Some(scheme_idx) = input.find("://") else {
        return input.to_string();
    };
    let rest = &input[scheme_idx + 3..];
    let Some(at_idx) = rest.find('@') else {
        return input.to_string();
    };
    format!(
        "{}[REDACTED]@{}",
        &input[..scheme_idx + 3],
        &rest[at_idx + 1..]
    )
}

pub(crate) fn sanitize_text(input: &str) -> String {
    let mut out = redact_connection_url(input);
    for key in SECRET_KEYS {
        out = redact_after(&out, key);
    }
    if out.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}

/// Logs reported errors with their id so a support request quoting
/// `x-error-id` can be traced.
pub async fn error_reporting_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let user_id = req.extensions().get::<AppUser>().and_then(|user| match user {
        AppUser::Session(user) => Some(user.sub.clone()),
        AppUser::Unauthorized => None,
    });

    let mut response = next.run(req).await;

    let Some(report) = response.extensions_mut().remove::<ErrorReport>() else {
        return response;
    };

    tracing::error!(
        error_id = %report.id,
        status_code = report.status_code,
        public_code = %report.public_code,
        method = %method,
        path = %path,
        user_id = user_id.as_deref().unwrap_or(""),
        "{}", sanitize_text(&report.summary)
    );
    if let Some(details) = report.details.as_deref() {
        tracing::error!(error_id = %report.id, "details: {}", sanitize_text(details));
    }

    response
}
