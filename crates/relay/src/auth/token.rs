use axum::http::header::{HeaderMap, AUTHORIZATION, COOKIE};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Locate the caller's access token on a handshake request.
///
/// Looks at the `Authorization: Bearer` header first, then the
/// `access_token` query parameter (browsers cannot set headers on a
/// WebSocket upgrade), then the `access_token` cookie.
pub fn extract_access_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        return Some(token.to_owned());
    }

    if let Some(token) = query_token.map(str::trim).filter(|token| !token.is_empty()) {
        return Some(token.to_owned());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(token_from_cookie_header)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn token_from_cookie_header(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"').to_owned())
        .filter(|value| !value.is_empty())
}
