//! Multi-hop resolution: page identifier -> encrypted embed ticket ->
//! plaintext embed url -> player hash -> manifest url + variants.
//!
//! `Start -> ContentIdentified -> EmbedTicketFetched -> EmbedURLDecrypted
//!  -> PlayerHashExtracted -> Resolved | Failed`
//!
//! Every network hop runs under the bounded retry policy; the crypto steps
//! never retry (their failures are deterministic).

use crate::{
    crypto,
    error::{Error, Result},
    facts::ContentRef,
    origin::OriginConfig,
    playlist::{self, StreamManifest},
    retry::retry,
    token::CancelToken,
};
use log::{debug, info};
use reqwest::{Url, blocking::Client};
use serde::Deserialize;

/// Portal response to the `doo_player_ajax` embed request.
#[derive(Deserialize)]
struct EmbedResponse {
    embed_url: Option<String>,
    key: Option<String>,
}

/// Player response to the `getVideo` request. The raw body is kept so the
/// subtitle catalog can scan it without re-issuing the POST.
#[derive(Deserialize)]
struct VideoResponse {
    #[serde(rename = "videoSource")]
    video_source: Option<String>,
}

pub struct ResolvedStream {
    pub manifest: StreamManifest,
    pub player_body: String,
}

pub struct StreamResolver<'a> {
    client: &'a Client,
    origin: &'a OriginConfig,
}

impl<'a> StreamResolver<'a> {
    pub fn new(client: &'a Client, origin: &'a OriginConfig) -> Self {
        Self { client, origin }
    }

    /// Runs the full hop sequence for one content item.
    pub fn resolve(&self, content: &ContentRef, token: &CancelToken) -> Result<ResolvedStream> {
        let embed_url = self.resolve_embed(content, token)?;
        info!("Embed url resolved");

        let hash = extract_player_hash(&embed_url)?;
        debug!("player hash {hash}");

        self.resolve_manifest(&hash, token)
    }

    /// Fetches the encrypted embed ticket and decrypts it into the embed url.
    pub fn resolve_embed(&self, content: &ContentRef, token: &CancelToken) -> Result<Url> {
        let endpoint = self
            .origin
            .portal
            .join("wp-admin/admin-ajax.php")
            .map_err(|e| Error::Parse(e.to_string()))?;

        let response: EmbedResponse = retry(token, || {
            Ok(self
                .client
                .post(endpoint.clone())
                .header("X-Requested-With", "XMLHttpRequest")
                .form(&[
                    ("action", "doo_player_ajax"),
                    ("post", content.id.as_str()),
                    ("nume", "1"),
                    ("type", content.kind.as_wire()),
                ])
                .send()?
                .error_for_status()?
                .json()?)
        })?;

        let embed_url = response
            .embed_url
            .ok_or_else(|| Error::Parse("embed response has no embed_url".to_owned()))?;

        // Some portal skins skip encryption and return the url directly.
        if crypto::Envelope::parse(&embed_url).is_err() {
            return embed_url
                .parse()
                .map_err(|e| Error::Parse(format!("bad embed url: {e}")));
        }

        let key = response
            .key
            .ok_or_else(|| Error::Parse("embed response has no key table".to_owned()))?;

        decrypt_embed(&embed_url, &key)
    }

    /// POSTs the player hash to the video-resolution endpoint, swaps the
    /// reported source's extension for `m3u8`, fetches the manifest and
    /// enumerates its variants.
    pub fn resolve_manifest(&self, hash: &str, token: &CancelToken) -> Result<ResolvedStream> {
        let (video_source, player_body) = self.player_video(hash, token)?;

        let url = manifest_url(&video_source, &self.origin.player)?;
        info!("Manifest url {url}");

        let text = retry(token, || {
            Ok(self
                .client
                .get(url.clone())
                .send()?
                .error_for_status()?
                .text()?)
        })?;

        let manifest = playlist::parse_manifest(&url, &text)?;

        Ok(ResolvedStream {
            manifest,
            player_body,
        })
    }

    fn player_video(&self, hash: &str, token: &CancelToken) -> Result<(String, String)> {
        let endpoint = self
            .origin
            .player
            .join("player/index.php")
            .map_err(|e| Error::Parse(e.to_string()))?;

        let body = retry(token, || {
            Ok(self
                .client
                .post(endpoint.clone())
                .query(&[("data", hash), ("do", "getVideo")])
                .header("X-Requested-With", "XMLHttpRequest")
                .form(&[("hash", hash), ("r", self.origin.referer().as_str())])
                .send()?
                .error_for_status()?
                .text()?)
        })?;

        let response: VideoResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Parse(format!("player response is not json: {e}")))?;
        let video_source = response
            .video_source
            .ok_or_else(|| Error::Parse("player response has no videoSource".to_owned()))?;

        Ok((video_source, body))
    }
}

/// Decrypts an embed ticket envelope. The passphrase is recovered from the
/// response's key table and the `m` member smuggled inside the envelope.
fn decrypt_embed(embed_url: &str, key_table: &str) -> Result<Url> {
    let envelope = crypto::Envelope::parse(embed_url)?;
    let packed = envelope
        .m
        .ok_or_else(|| Error::Parse("embed envelope has no packed index string".to_owned()))?;

    let passphrase = crypto::decode_index_cipher(key_table, &packed)?;
    let plaintext = crypto::decrypt(embed_url, &passphrase)?;

    plaintext
        .as_str()
        .ok_or_else(|| Error::Crypto("decrypted embed url is not a string".to_owned()))?
        .parse()
        .map_err(|e| Error::Parse(format!("bad embed url: {e}")))
}

/// Extracts the opaque player hash from an embed url: the last path segment
/// under `/video/`, otherwise the first query value.
pub fn extract_player_hash(embed_url: &Url) -> Result<String> {
    if embed_url.path().contains("/video/") {
        let segment = embed_url
            .path_segments()
            .and_then(|s| s.filter(|p| !p.is_empty()).next_back());

        if let Some(hash) = segment {
            return Ok(hash.to_owned());
        }
    }

    if let Some((_, value)) = embed_url.query_pairs().next()
        && !value.is_empty()
    {
        return Ok(value.into_owned());
    }

    Err(Error::Parse(format!(
        "no player hash in embed url {embed_url}"
    )))
}

/// Builds the manifest url from the player's reported source: resolve
/// relative sources against the player origin, then replace (or append)
/// the extension with `m3u8`.
pub fn manifest_url(video_source: &str, player: &Url) -> Result<Url> {
    let absolute = player
        .join(video_source)
        .map_err(|e| Error::Parse(format!("bad videoSource: {e}")))?;

    let path = absolute.path();
    let new_path = match path.rsplit_once('/') {
        Some((dir, file)) if file.contains('.') => {
            let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
            format!("{dir}/{stem}.m3u8")
        }
        _ => format!("{}.m3u8", path.trim_end_matches('/')),
    };

    let mut url = absolute.clone();
    url.set_path(&new_path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_from_video_path() {
        let url = "https://jeniusplay.com/video/abc123hash".parse().unwrap();
        assert_eq!(extract_player_hash(&url).unwrap(), "abc123hash");

        let url = "https://jeniusplay.com/video/abc123hash/".parse().unwrap();
        assert_eq!(extract_player_hash(&url).unwrap(), "abc123hash");
    }

    #[test]
    fn hash_from_query_value() {
        let url = "https://jeniusplay.com/player/index.php?data=hash123&do=getVideo"
            .parse()
            .unwrap();
        assert_eq!(extract_player_hash(&url).unwrap(), "hash123");
    }

    #[test]
    fn no_hash_is_parse_error() {
        let url = "https://jeniusplay.com/player/index.php".parse().unwrap();
        assert!(matches!(extract_player_hash(&url), Err(Error::Parse(_))));
    }

    #[test]
    fn manifest_url_swaps_extension() {
        let player = "https://jeniusplay.com/".parse().unwrap();
        let url = manifest_url("https://cdn.example/stream/video.txt", &player).unwrap();
        assert_eq!(url.as_str(), "https://cdn.example/stream/video.m3u8");
    }

    #[test]
    fn manifest_url_appends_when_no_extension() {
        let player = "https://jeniusplay.com/".parse().unwrap();
        let url = manifest_url("https://cdn.example/stream/video", &player).unwrap();
        assert_eq!(url.as_str(), "https://cdn.example/stream/video.m3u8");
    }

    #[test]
    fn manifest_url_resolves_relative_sources() {
        let player = "https://jeniusplay.com/".parse().unwrap();
        let url = manifest_url("/stream.m3u8", &player).unwrap();
        assert_eq!(url.as_str(), "https://jeniusplay.com/stream.m3u8");
    }

    #[test]
    fn embed_ticket_round_trip() {
        // table "AB12CD34" indexes to "12"/"34"; packed is reverse(base64("0|1")).
        let table = "AB12CD34";
        let packed: String = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .encode("0|1")
                .chars()
                .rev()
                .collect()
        };
        let passphrase = crypto::decode_index_cipher(table, &packed).unwrap();
        assert_eq!(passphrase, "\\x12\\x34");

        let envelope = crypto::encrypt(&json!("https://jeniusplay.com/video/h4sh"), &passphrase)
            .unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&envelope).unwrap();
        value["m"] = json!(packed);
        let ticket = value.to_string();

        let url = decrypt_embed(&ticket, table).unwrap();
        assert_eq!(url.as_str(), "https://jeniusplay.com/video/h4sh");
    }

    #[test]
    fn tampered_ticket_is_crypto_error() {
        let ticket = r#"{"ct":"AAAAAAAAAAAAAAAAAAAAAA==","iv":"00000000000000000000000000000000","s":"0000000000000000","m":"xwHM"}"#;
        assert!(matches!(
            decrypt_embed(ticket, "AB12CD34"),
            Err(Error::Crypto(_))
        ));
    }
}
