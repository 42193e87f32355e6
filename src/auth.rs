use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderValue};

/// Authentication scheme stamped onto outgoing requests as an
/// `Authorization` header. A request-level auth overrides the client's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer { token: String },
    /// Verbatim `Authorization` header value for schemes the other two
    /// variants do not cover.
    Custom { header: String },
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    pub fn custom(header: impl Into<String>) -> Self {
        Self::Custom {
            header: header.into(),
        }
    }

    /// Whether the credentials are present. Empty credential sets are
    /// ignored at apply time, matching the setter contract.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Basic { username, password } => !username.is_empty() && !password.is_empty(),
            Self::Bearer { token } => !token.is_empty(),
            Self::Custom { header } => !header.is_empty(),
        }
    }

    pub(crate) fn apply(&self, headers: &mut HeaderMap) {
        if !self.is_valid() {
            return;
        }
        let value = match self {
            Self::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                HeaderValue::from_str(&format!("Basic {encoded}"))
            }
            Self::Bearer { token } => HeaderValue::from_str(&format!("Bearer {token}")),
            Self::Custom { header } => HeaderValue::from_str(header),
        };
        match value {
            Ok(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("dropping authorization header with invalid characters"),
        }
    }
}
