//! Caller identity and operator authorization.
//!
//! Every request passes through [`caller_identity_middleware`]. Anonymous
//! requests are allowed and carry an empty [`CallerContext`]; a bearer token,
//! when present, must be valid. Whether a caller may use operator-only
//! operations is decided separately by an [`OperatorAuthorizer`].

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::api::error_response;
use crate::config::AuthConfig;
use crate::logging::TraceId;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub iat: u64,
    pub exp: u64,
}

pub fn create_token(
    secret: &str,
    subject: &str,
    email: &str,
    email_verified: bool,
    expire_secs: u64,
) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: subject.to_string(),
        email: email.to_string(),
        email_verified,
        iat: now,
        exp: now + expire_secs,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn validate_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// A random 256-bit signing secret, base64url encoded.
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
        }
    }
}

/// Request extension holding the caller, `None` for anonymous requests.
#[derive(Debug, Clone, Default)]
pub struct CallerContext(pub Option<Caller>);

/// Resolves the optional bearer token into a [`CallerContext`].
pub async fn caller_identity_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let caller = match auth_header {
        None => None,
        Some(header) => {
            let Some(token) = header.strip_prefix("Bearer ").filter(|t| !t.is_empty()) else {
                return error_response(
                    StatusCode::UNAUTHORIZED,
                    &trace_id,
                    "unauthorized",
                    "invalid authorization header",
                );
            };
            match validate_token(&state.jwt_secret, token) {
                Ok(claims) => Some(Caller::from(claims)),
                Err(e) => {
                    if matches!(
                        e.kind(),
                        jsonwebtoken::errors::ErrorKind::ExpiredSignature
                    ) {
                        return error_response(
                            StatusCode::UNAUTHORIZED,
                            &trace_id,
                            "token_expired",
                            "token expired",
                        );
                    }
                    tracing::debug!(error = %e, "Rejected caller token");
                    return error_response(
                        StatusCode::UNAUTHORIZED,
                        &trace_id,
                        "unauthorized",
                        "invalid token",
                    );
                }
            }
        }
    };

    req.extensions_mut().insert(CallerContext(caller));
    next.run(req).await
}

/// Decides whether a caller may use operator-only operations.
pub trait OperatorAuthorizer: Send + Sync {
    fn is_authorized_operator(&self, caller: Option<&Caller>) -> bool;
}

/// Allows verified accounts listed by address or by email domain.
///
/// # Examples
///
/// ```
/// use perfdash_server::auth::{Caller, OperatorAuthorizer, OperatorPolicy};
///
/// let policy = OperatorPolicy::new(["chromium.org"], Vec::<String>::new());
/// let caller = Caller {
///     subject: "1".into(),
///     email: "sheriff@Chromium.org".into(),
///     email_verified: true,
/// };
/// assert!(policy.is_authorized_operator(Some(&caller)));
/// assert!(!policy.is_authorized_operator(None));
/// ```
#[derive(Debug, Clone)]
pub struct OperatorPolicy {
    allowed_domains: Vec<String>,
    allowed_emails: Vec<String>,
}

impl OperatorPolicy {
    pub fn new<D, E>(domains: D, emails: E) -> Self
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            allowed_domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim_start_matches('@').to_ascii_lowercase())
                .collect(),
            allowed_emails: emails
                .into_iter()
                .map(|e| e.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.allowed_domains, &config.allowed_emails)
    }
}

impl OperatorAuthorizer for OperatorPolicy {
    fn is_authorized_operator(&self, caller: Option<&Caller>) -> bool {
        let Some(caller) = caller else {
            return false;
        };
        if !caller.email_verified {
            return false;
        }
        let email = caller.email.to_ascii_lowercase();
        if self.allowed_emails.iter().any(|e| *e == email) {
            return true;
        }
        match email.rsplit_once('@') {
            Some((local, domain)) if !local.is_empty() => {
                self.allowed_domains.iter().any(|d| d == domain)
            }
            _ => false,
        }
    }
}
