//! Narrow interface over the page-scraping collaborator.
//!
//! Site markup is inherently unstable, so the core only ever consumes the
//! typed facts below. Supporting a different portal skin means writing a new
//! [`PageFacts`] adapter, not touching the resolver.

use crate::{
    error::{Error, Result},
    origin::OriginConfig,
    token::CancelToken,
};
use regex::Regex;
use reqwest::blocking::Client;
use std::fmt::Display;
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Movie,
    Episode,
}

impl ContentKind {
    /// Wire value for the embed-request `type` field.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Episode => "tv",
        }
    }
}

impl Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Identifies one content item to the portal's ajax endpoint.
#[derive(Clone, Debug)]
pub struct ContentRef {
    pub id: String,
    pub kind: ContentKind,
}

/// Season/episode placement used for the episodic output layout.
#[derive(Clone, Debug)]
pub struct EpisodeMeta {
    pub series: String,
    pub year: String,
    pub season: u32,
    pub episode: u32,
}

/// One method per fact the core needs from a scraped page.
pub trait PageFacts {
    fn content_ref(&self) -> Result<ContentRef>;
    fn title(&self) -> Result<String>;
    fn poster(&self) -> Option<String>;
}

/// The shipped adapter for stock DooPlay markup.
pub struct DooPlayPage {
    body: String,
    kind_hint: ContentKind,
}

impl DooPlayPage {
    /// Fetches `page_url` and wraps the body. Episode pages live under
    /// `/episode/`, everything else is treated as a movie.
    pub fn fetch(
        client: &Client,
        _origin: &OriginConfig,
        page_url: &str,
        token: &CancelToken,
    ) -> Result<Self> {
        token.check()?;

        let response = client.get(page_url).send()?.error_for_status()?;
        let kind_hint = if page_url.contains("/episode/") {
            ContentKind::Episode
        } else {
            ContentKind::Movie
        };

        Ok(Self {
            body: response.text()?,
            kind_hint,
        })
    }

    pub fn from_body(body: impl Into<String>, kind_hint: ContentKind) -> Self {
        Self {
            body: body.into(),
            kind_hint,
        }
    }
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

static POST_ID: OnceLock<Regex> = OnceLock::new();
static DATA_TYPE: OnceLock<Regex> = OnceLock::new();
static NAME: OnceLock<Regex> = OnceLock::new();
static POSTER: OnceLock<Regex> = OnceLock::new();

impl PageFacts for DooPlayPage {
    fn content_ref(&self) -> Result<ContentRef> {
        let post_id = POST_ID
            .get_or_init(|| Regex::new(r#"data-postid=["']([0-9]+)["']"#).unwrap());
        let data_type = DATA_TYPE
            .get_or_init(|| Regex::new(r#"dooplay_player_option[^>]*data-type=["'](\w+)["']"#).unwrap());

        let id = capture(post_id, &self.body)
            .ok_or_else(|| Error::Parse("data-postid not found in page".to_owned()))?;

        let kind = match capture(data_type, &self.body).as_deref() {
            Some("tv") => ContentKind::Episode,
            Some(_) => ContentKind::Movie,
            None => self.kind_hint,
        };

        Ok(ContentRef { id, kind })
    }

    fn title(&self) -> Result<String> {
        let name = NAME.get_or_init(|| {
            Regex::new(r#"itemprop=["']name["'][^>]*content=["']([^"']+)["']"#).unwrap()
        });

        capture(name, &self.body)
            .ok_or_else(|| Error::Parse("itemprop name not found in page".to_owned()))
    }

    fn poster(&self) -> Option<String> {
        let poster = POSTER.get_or_init(|| {
            Regex::new(r#"itemprop=["']image["'][^>]*src=["']([^"']+)["']"#).unwrap()
        });

        capture(poster, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <meta id="dooplay-ajax-counter" data-postid="12345">
        <meta itemprop="name" content="Test Movie">
        <img itemprop="image" src="http://img.url/poster.jpg">
        <li class="dooplay_player_option" data-type="movie" data-post="12345">
    "#;

    #[test]
    fn extracts_all_facts() {
        let page = DooPlayPage::from_body(PAGE, ContentKind::Movie);
        let content = page.content_ref().unwrap();
        assert_eq!(content.id, "12345");
        assert_eq!(content.kind, ContentKind::Movie);
        assert_eq!(page.title().unwrap(), "Test Movie");
        assert_eq!(page.poster().as_deref(), Some("http://img.url/poster.jpg"));
    }

    #[test]
    fn missing_post_id_is_parse_error() {
        let page = DooPlayPage::from_body("<html></html>", ContentKind::Movie);
        assert!(matches!(page.content_ref(), Err(Error::Parse(_))));
    }

    #[test]
    fn tv_data_type_maps_to_episode() {
        let body = r#"
            <meta data-postid="9">
            <li class="dooplay_player_option" data-type="tv">
        "#;
        let page = DooPlayPage::from_body(body, ContentKind::Movie);
        assert_eq!(page.content_ref().unwrap().kind, ContentKind::Episode);
    }

    #[test]
    fn wire_values() {
        assert_eq!(ContentKind::Movie.as_wire(), "movie");
        assert_eq!(ContentKind::Episode.as_wire(), "tv");
    }
}
