//! Caller identity selection.

use std::fmt;

/// The category of identity a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitClass {
    /// Caller-supplied API token
    Token,
    /// Connection-derived IP address
    Ip,
}

impl LimitClass {
    /// Get a stable lowercase name for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Token => "token",
            LimitClass::Ip => "ip",
        }
    }
}

impl fmt::Display for LimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key a single request is rate limited under.
///
/// Exactly one of token or IP is considered per request, and the token wins when
/// both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity<'a> {
    /// Limited under the token class
    Token(&'a str),
    /// Limited under the IP class
    Ip(&'a str),
}

impl<'a> Identity<'a> {
    /// Select the identity for a request.
    ///
    /// Empty strings count as absent. Returns `None` when neither a token nor an
    /// IP is available.
    pub fn select(token: Option<&'a str>, ip: Option<&'a str>) -> Option<Self> {
        let present = |value: Option<&'a str>| value.filter(|v| !v.is_empty());

        present(token)
            .map(Identity::Token)
            .or_else(|| present(ip).map(Identity::Ip))
    }

    /// The limit class this identity is evaluated under.
    pub fn class(&self) -> LimitClass {
        match self {
            Identity::Token(_) => LimitClass::Token,
            Identity::Ip(_) => LimitClass::Ip,
        }
    }

    /// The raw store key for this identity.
    pub fn key(&self) -> &'a str {
        match self {
            Identity::Token(key) | Identity::Ip(key) => key,
        }
    }
}

/// Tokens are shown by their first four characters only.
impl fmt::Display for Identity<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Token(token) => {
                let prefix: String = token.chars().take(4).collect();
                write!(f, "token:{}…", prefix)
            }
            Identity::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}
