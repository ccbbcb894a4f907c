use axum::http::{header, HeaderMap};

pub const REFRESH_COOKIE: &str = "refresh_token";

fn attributes(production: bool) -> &'static str {
    if production {
        "HttpOnly; Secure; SameSite=Strict; Path=/"
    } else {
        "HttpOnly; SameSite=Lax; Path=/"
    }
}

/// `Set-Cookie` value carrying a refresh token.
pub fn refresh_cookie(token: &str, max_age_secs: i64, production: bool) -> String {
    format!(
        "{REFRESH_COOKIE}={token}; {}; Max-Age={max_age_secs}",
        attributes(production)
    )
}

/// `Set-Cookie` value that removes the refresh token.
pub fn clear_refresh_cookie(production: bool) -> String {
    format!("{REFRESH_COOKIE}=; {}; Max-Age=0", attributes(production))
}

/// Reads the refresh token from the `Cookie` header, if present and non-empty.
pub fn read_refresh_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(REFRESH_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
