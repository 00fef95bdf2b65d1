use std::fmt;

/// A `Set-Cookie` header value.
#[derive(Clone, Debug, PartialEq)]
pub struct SetCookie {
    name: &'static str,
    value: String,
    path: &'static str,
    max_age: Option<i64>,
    http_only: bool,
    secure: bool,
}

impl SetCookie {
    pub fn new(name: &'static str, value: impl Into<String>, path: &'static str) -> Self {
        Self {
            name,
            value: value.into(),
            path,
            max_age: None,
            http_only: true,
            secure: false,
        }
    }

    /// A cookie instructing the user agent to drop `name` immediately.
    pub fn expired(name: &'static str, path: &'static str) -> Self {
        Self::new(name, "", path).with_max_age(0)
    }

    #[must_use]
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds.max(0));
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn max_age(&self) -> Option<i64> {
        self.max_age
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        if self.secure {
            write!(f, "; Secure")?;
        }
        write!(f, "; SameSite=Lax")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_cookie() {
        let cookie = SetCookie::new("coordinator_ui_token", "abc", "/ui/")
            .with_max_age(299)
            .with_secure(true);

        assert_eq!(
            cookie.to_string(),
            "coordinator_ui_token=abc; Path=/ui/; Max-Age=299; HttpOnly; Secure; SameSite=Lax"
        );
    }

    #[test]
    fn test_session_cookie() {
        let cookie = SetCookie::new("coordinator_ui_token", "abc", "/ui/");
        assert_eq!(
            cookie.to_string(),
            "coordinator_ui_token=abc; Path=/ui/; HttpOnly; SameSite=Lax"
        );
        assert_eq!(cookie.max_age(), None);
    }

    #[test]
    fn test_expired_cookie() {
        let cookie = SetCookie::expired("coordinator_oauth2_nonce", "/oauth2");
        assert_eq!(cookie.value(), "");
        assert_eq!(
            cookie.to_string(),
            "coordinator_oauth2_nonce=; Path=/oauth2; Max-Age=0; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn test_negative_max_age_is_clamped() {
        let cookie = SetCookie::new("a", "b", "/").with_max_age(-10);
        assert_eq!(cookie.max_age(), Some(0));
    }
}
