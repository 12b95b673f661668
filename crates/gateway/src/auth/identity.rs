//! Per-request caller identity

use std::fmt;

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Where the caller's credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Trusted identity proxy headers (`X-Forwarded-User` and friends)
    ForwardedHeader,
    /// `Authorization` header
    AuthorizationHeader,
    /// `X-Forwarded-Access-Token` header
    ForwardedAccessToken,
    /// `?token=` query parameter (websocket clients cannot set headers)
    QueryParameter,
    /// Nothing presented
    None,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ForwardedHeader => "forwarded-header",
            Self::AuthorizationHeader => "authorization-header",
            Self::ForwardedAccessToken => "forwarded-access-token",
            Self::QueryParameter => "query-parameter",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// An opaque bearer credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// `None` for blank input
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken([REDACTED]; len={})", self.0.len())
    }
}

/// Who the credential belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User { username: String },
    ServiceAccount { namespace: String, name: String },
}

impl Principal {
    /// Classify a username as reported by a token review.
    ///
    /// `system:serviceaccount:<namespace>:<name>` is a machine identity; any
    /// other shape, including a malformed service-account string, is a human
    /// username.
    #[must_use]
    pub fn from_username(username: &str) -> Self {
        if let Some(rest) = username.strip_prefix(SERVICE_ACCOUNT_PREFIX) {
            if let Some((namespace, name)) = rest.split_once(':') {
                if !namespace.is_empty() && !name.is_empty() && !name.contains(':') {
                    return Self::ServiceAccount {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                    };
                }
            }
        }
        Self::User {
            username: username.to_string(),
        }
    }

    #[must_use]
    pub fn is_service_account(&self) -> bool {
        matches!(self, Self::ServiceAccount { .. })
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { username } => f.write_str(username),
            Self::ServiceAccount { namespace, name } => write!(f, "{namespace}/{name}"),
        }
    }
}

/// The resolved caller of one request. Never persisted.
#[derive(Debug, Clone)]
pub struct Identity {
    pub source: CredentialSource,
    pub token: Option<BearerToken>,
    pub principal: Option<Principal>,
    /// Stable user key (credential-store key, audit trail)
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

impl Identity {
    /// Nothing presented
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            source: CredentialSource::None,
            token: None,
            principal: None,
            user_id: String::new(),
            display_name: String::new(),
            email: None,
            groups: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }

    /// The credential to mint a scoped client from
    pub fn bearer(&self) -> crate::Result<&BearerToken> {
        self.token.as_ref().ok_or_else(|| {
            crate::Error::Unauthenticated("no bearer credential presented".to_string())
        })
    }
}
