//! Real-time endpoint derivation from the hosting page's origin.

use crate::error::{Result, SessionError};
use url::Url;

/// Query parameter carrying the credential on the upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Origin of the page hosting the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    secure: bool,
    authority: String,
}

impl PageOrigin {
    /// Parse an `http://` or `https://` origin (any path is ignored).
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed = Url::parse(raw.trim())?;
        let secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(SessionError::InvalidOrigin(format!(
                    "origin must use http:// or https://, got: {other}"
                )));
            }
        };
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| SessionError::InvalidOrigin("origin has no host".to_string()))?;
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self { secure, authority })
    }

    /// Whether the page was served over a secure scheme.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `host[:port]` of the origin.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Real-time endpoint for `path` with the credential attached.
    ///
    /// `wss` when the page is secure, `ws` otherwise.
    pub fn websocket_url(&self, path: &str, credential: &str) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}", self.authority))?;
        url.set_path(path);
        url.query_pairs_mut()
            .append_pair(TOKEN_QUERY_PARAM, credential);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_page_upgrades_to_wss() -> Result<()> {
        let origin = PageOrigin::parse("https://chat.example.com")?;
        let url = origin.websocket_url("/ws", "abc")?;
        assert_eq!(url.as_str(), "wss://chat.example.com/ws?token=abc");
        Ok(())
    }

    #[test]
    fn plain_page_keeps_port_and_uses_ws() -> Result<()> {
        let origin = PageOrigin::parse("http://localhost:3000/chat/room?x=1")?;
        assert!(!origin.is_secure());
        assert_eq!(origin.authority(), "localhost:3000");
        let url = origin.websocket_url("/ws", "abc")?;
        assert_eq!(url.as_str(), "ws://localhost:3000/ws?token=abc");
        Ok(())
    }

    #[test]
    fn credential_is_percent_encoded() -> Result<()> {
        let origin = PageOrigin::parse("https://chat.example.com")?;
        let url = origin.websocket_url("/ws", "a b&c=d")?;
        let token = url
            .query_pairs()
            .find(|(key, _)| key == TOKEN_QUERY_PARAM)
            .map(|(_, value)| value.into_owned());
        assert_eq!(token.as_deref(), Some("a b&c=d"));
        assert!(!url.as_str().contains("a b"));
        Ok(())
    }

    #[test]
    fn rejects_non_http_origins() {
        let err = PageOrigin::parse("ftp://files.example.com");
        assert!(matches!(err, Err(SessionError::InvalidOrigin(_))));
        let err = PageOrigin::parse("not a url");
        assert!(matches!(err, Err(SessionError::UrlParse(_))));
    }
}
