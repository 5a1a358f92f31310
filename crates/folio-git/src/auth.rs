use std::fmt;

/// Username/password pair handed to a network primitive.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Upper bound on how often a primitive asks for credentials in one operation.
pub const MAX_AUTH_ATTEMPTS: u32 = 3;

/// Supplies credentials to network primitives, once per attempt.
///
/// `attempt` starts at 1. Returning `None` gives up, and the primitive fails
/// with an authentication error.
pub trait AuthProvider: Send + Sync {
    fn credentials(&self, url: &str, attempt: u32) -> Option<Credentials>;
}

impl<F> AuthProvider for F
where
    F: Fn(&str, u32) -> Option<Credentials> + Send + Sync,
{
    fn credentials(&self, url: &str, attempt: u32) -> Option<Credentials> {
        self(url, attempt)
    }
}

/// Never offers credentials. Suitable for public remotes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl AuthProvider for Anonymous {
    fn credentials(&self, _url: &str, _attempt: u32) -> Option<Credentials> {
        None
    }
}

/// Access-token authentication in the form hosting providers accept over
/// HTTPS: the token as username with a fixed placeholder password.
///
/// The token is offered once; a rejected token is not retried.
#[derive(Clone)]
pub struct TokenAuth {
    token: String,
}

impl TokenAuth {
    pub const PASSWORD: &'static str = "x-oauth-basic";

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for TokenAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenAuth(<redacted>)")
    }
}

impl AuthProvider for TokenAuth {
    fn credentials(&self, _url: &str, attempt: u32) -> Option<Credentials> {
        (attempt == 1).then(|| Credentials::new(self.token.clone(), Self::PASSWORD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_offered_once() {
        let auth = TokenAuth::new("abc");
        let creds = auth.credentials("https://example.com/r.git", 1).unwrap();
        assert_eq!(creds.username, "abc");
        assert_eq!(creds.password, TokenAuth::PASSWORD);
        assert!(auth.credentials("https://example.com/r.git", 2).is_none());
    }

    #[test]
    fn closures_are_providers() {
        let auth = |_: &str, attempt: u32| (attempt < 3).then(|| Credentials::new("u", "p"));
        assert!(auth.credentials("x", 2).is_some());
        assert!(auth.credentials("x", 3).is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", Credentials::new("user", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", TokenAuth::new("secret")).contains("secret"));
    }
}
