//! Bearer-token registry authentication.
//!
//! Registries answer unauthenticated requests with a 401 carrying a
//! `WWW-Authenticate: Bearer realm="..", service="..", scope=".."` challenge.
//! The challenge is parsed as a structured header (quoted key/value tokens,
//! escapes honored), exchanged at the realm for a short-lived token, and the
//! original request is retried once with `Authorization: Bearer <token>`.

use reqwest::Url;
use serde::Deserialize;
use stout_common::{StoutError, StoutResult};

/// A parsed Bearer challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Token realm URL.
    pub realm: String,
    /// Service parameter to pass through to the realm.
    pub service: String,
    /// Scope parameter to pass through to the realm.
    pub scope: String,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> StoutResult<Self> {
        let malformed = || StoutError::MalformedChallenge {
            header: header.to_string(),
        };

        let rest = header.trim_start();
        let scheme_ok = rest
            .get(.."Bearer".len())
            .is_some_and(|s| s.eq_ignore_ascii_case("bearer"));
        if !scheme_ok {
            return Err(malformed());
        }
        let params = &rest["Bearer".len()..];
        if !params.starts_with([' ', '\t']) {
            return Err(malformed());
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        for (key, value) in parse_params(params).ok_or_else(malformed)? {
            match key.as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                // Unknown parameters are tolerated.
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(malformed)?,
            service: service.unwrap_or_default(),
            scope: scope.unwrap_or_default(),
        })
    }
}

/// Split `key="value"` parameters, honoring `\"` escapes inside quotes and
/// whitespace around separators.
fn parse_params(input: &str) -> Option<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_ascii_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() {
            return None;
        }

        while matches!(chars.peek(), Some(c) if c.is_ascii_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        match chars.peek() {
            Some('"') => {
                chars.next();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => value.push(chars.next()?),
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => value.push(c),
                    }
                }
                if !closed {
                    return None;
                }
            }
            _ => {
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    value.push(c);
                }
                value = value.trim_end().to_string();
            }
        }

        params.push((key, value));
    }

    if params.is_empty() {
        return None;
    }
    Some(params)
}

/// A short-lived bearer token for one pull operation.
#[derive(Debug, Clone)]
pub struct AuthToken(String);

impl AuthToken {
    /// The raw token value for the `Authorization` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    // Some token services use the OAuth2 field name.
    access_token: Option<String>,
}

/// Exchange a challenge for a token at the realm.
///
/// The request carries no prior `Authorization`; `service` and `scope` are
/// passed through url-encoded.
pub async fn exchange(
    http: &reqwest::Client,
    challenge: &AuthChallenge,
) -> StoutResult<AuthToken> {
    let url = Url::parse_with_params(
        &challenge.realm,
        [
            ("service", challenge.service.as_str()),
            ("scope", challenge.scope.as_str()),
        ],
    )
    .map_err(|e| StoutError::AuthHttp {
        message: format!("invalid realm URL {:?}: {e}", challenge.realm),
    })?;

    tracing::debug!(realm = %challenge.realm, scope = %challenge.scope, "Requesting token");

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| StoutError::AuthHttp {
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(StoutError::AuthHttp {
            message: format!("realm returned HTTP {}", response.status()),
        });
    }

    let body: TokenResponse = response.json().await.map_err(|e| StoutError::AuthDecode {
        message: e.to_string(),
    })?;

    body.token
        .or(body.access_token)
        .map(AuthToken)
        .ok_or_else(|| StoutError::AuthDecode {
            message: "token response missing 'token' field".to_string(),
        })
}
