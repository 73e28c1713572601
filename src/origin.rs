use crate::error::Result;
use reqwest::{
    Url,
    blocking::Client,
    header::{self, HeaderMap, HeaderValue},
};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

const DEFAULT_PORTAL: &str = "https://vip.idlixofficialx.net/";
const DEFAULT_PLAYER: &str = "https://jeniusplay.com/";

/// Origins for one resolution run, resolved once by the caller and passed
/// into every resolver call. Portals rotate domains frequently, so nothing
/// here is process-global; a probe/rotation layer can hand in a different
/// portal per job.
#[derive(Clone)]
pub struct OriginConfig {
    /// The DooPlay portal serving pages and the ajax embed endpoint.
    pub portal: Url,
    /// The downstream player backend resolving hashes to video sources.
    pub player: Url,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            portal: DEFAULT_PORTAL.parse().unwrap(),
            player: DEFAULT_PLAYER.parse().unwrap(),
        }
    }
}

impl OriginConfig {
    pub fn new(portal: Url, player: Url) -> Self {
        Self { portal, player }
    }

    /// Referer value sent on every request, `https://portal/`.
    pub fn referer(&self) -> String {
        self.portal.to_string()
    }
}

/// Builds the shared blocking client with browser-like headers. Every
/// request carries the timeout, which also bounds cancellation latency for
/// an in-flight round trip.
pub fn build_client(origin: &OriginConfig, user_agent: &str, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,id;q=0.8"),
    );
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(&origin.referer()).unwrap_or(HeaderValue::from_static("")),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static("Windows"));
    headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));

    let client = Client::builder()
        .cookie_store(true)
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .build()?;

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referer_is_the_portal_origin() {
        let origin = OriginConfig::default();
        assert_eq!(origin.referer(), DEFAULT_PORTAL);
    }

    #[test]
    fn client_builds_with_defaults() {
        let origin = OriginConfig::default();
        assert!(build_client(&origin, DEFAULT_USER_AGENT, Duration::from_secs(30)).is_ok());
    }
}
