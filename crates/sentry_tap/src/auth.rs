//! Bearer-token authentication.

use crate::http::HttpRequest;

/// Attaches a bearer credential to outbound requests.
///
/// The token is assumed valid for the process lifetime; a bad token surfaces
/// as HTTP 401/403 from the remote service, not from here.
#[derive(Clone)]
pub struct Authenticator {
    token: String,
}

impl Authenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Attach the `Authorization` header, leaving the request otherwise
    /// unchanged.
    #[must_use]
    pub fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        request
            .headers
            .push(("Authorization".to_string(), format!("Bearer {}", self.token)));
        request
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the credential.
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::header_get;

    #[test]
    fn apply_adds_bearer_header_and_nothing_else() {
        let auth = Authenticator::new("s3cr3t");
        let req = auth.apply(HttpRequest::get("https://sentry.io/api/0/"));

        assert_eq!(
            header_get(&req.headers, "authorization"),
            Some("Bearer s3cr3t")
        );
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.url, "https://sentry.io/api/0/");
    }

    #[test]
    fn debug_does_not_leak_the_token() {
        let auth = Authenticator::new("s3cr3t");
        assert!(!format!("{auth:?}").contains("s3cr3t"));
    }
}
