use crate::error::{Error, Result};
use reqwest::Url;
use serde::Serialize;

/// One rendition of the content. `id` is the ordinal position within the
/// master playlist, in file order.
#[derive(Clone, Debug, Serialize)]
pub struct Variant {
    pub id: String,
    pub resolution: Option<(u64, u64)>,
    pub bandwidth: Option<u64>,
    pub uri: String,
}

impl Variant {
    pub fn resolution_label(&self) -> String {
        match self.resolution {
            Some((w, h)) => format!("{}x{}", w, h),
            None => "?".to_owned(),
        }
    }

    pub fn display(&self) -> String {
        let bandwidth = self
            .bandwidth
            .map(|b| crate::utils::format_bytes(b as usize))
            .unwrap_or_else(|| "?".to_owned());
        format!("{:>9} {:>10}/s", self.resolution_label(), bandwidth)
    }
}

#[derive(Debug, Serialize)]
pub struct StreamManifest {
    pub url: String,
    pub variants: Vec<Variant>,
}

impl StreamManifest {
    pub fn is_multi_variant(&self) -> bool {
        self.variants.len() > 1
    }

    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Highest pixel count, bandwidth as the tie breaker. Used when the
    /// caller does not pick a rendition explicitly.
    pub fn best_variant(&self) -> Result<&Variant> {
        self.variants
            .iter()
            .max_by_key(|v| {
                (
                    v.resolution.map(|(w, h)| w * h).unwrap_or(0),
                    v.bandwidth.unwrap_or(0),
                )
            })
            .ok_or(Error::NoVariant)
    }

    /// Absolute url for a variant's media playlist.
    pub fn variant_url(&self, variant: &Variant) -> Result<Url> {
        let base = self
            .url
            .parse::<Url>()
            .map_err(|e| Error::Parse(format!("bad manifest url: {e}")))?;
        base.join(&variant.uri)
            .map_err(|e| Error::Parse(format!("bad variant uri: {e}")))
    }
}

/// Parses a fetched manifest into ordered variants. A media (non-master)
/// playlist yields a single variant pointing back at the manifest itself.
pub fn parse_manifest(url: &Url, text: &str) -> Result<StreamManifest> {
    let playlist = m3u8_rs::parse_playlist_res(text.as_bytes())
        .map_err(|_| Error::Parse("input is not an m3u8 playlist".to_owned()))?;

    let variants = match playlist {
        m3u8_rs::Playlist::MasterPlaylist(master) => master
            .variants
            .iter()
            .enumerate()
            .map(|(i, v)| Variant {
                id: i.to_string(),
                resolution: v.resolution.map(|r| (r.width, r.height)),
                bandwidth: Some(v.bandwidth),
                uri: v.uri.clone(),
            })
            .collect(),
        m3u8_rs::Playlist::MediaPlaylist(_) => vec![Variant {
            id: "0".to_owned(),
            resolution: None,
            bandwidth: None,
            uri: url.to_string(),
        }],
    };

    if variants.is_empty() {
        return Err(Error::NoVariant);
    }

    Ok(StreamManifest {
        url: url.to_string(),
        variants,
    })
}

/// AES-128 encryption applied to a run of segments. Other key methods are
/// rejected at parse time; the portal's player only serves clear or
/// AES-128 streams.
#[derive(Clone, Debug)]
pub struct SegmentKey {
    pub uri: String,
    pub iv: Option<String>,
}

impl SegmentKey {
    pub fn key_bytes(bytes: &[u8]) -> Result<[u8; 16]> {
        if bytes.len() != 16 {
            return Err(Error::Parse(format!("invalid key size {}", bytes.len())));
        }

        let mut key = [0_u8; 16];
        key.copy_from_slice(bytes);
        Ok(key)
    }

    /// Explicit iv when present, otherwise the segment's media sequence
    /// number big-endian, per the HLS spec.
    pub fn iv_bytes(&self, sequence: u64) -> Result<[u8; 16]> {
        Ok(if let Some(iv) = &self.iv {
            let iv = iv.strip_prefix("0x").unwrap_or(iv);
            u128::from_str_radix(iv, 16)
                .map_err(|_| Error::Parse("invalid iv".to_owned()))?
                .to_be_bytes()
        } else {
            u128::from(sequence).to_be_bytes()
        })
    }
}

#[derive(Clone, Debug)]
pub struct Segment {
    pub uri: String,
    pub duration: f32,
    pub key: Option<SegmentKey>,
}

pub struct MediaManifest {
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
}

impl MediaManifest {
    pub fn total_duration(&self) -> f32 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Parses a variant's media playlist into its segment list, carrying key
/// state forward the way `EXT-X-KEY` applies to all following segments.
pub fn parse_media(text: &str) -> Result<MediaManifest> {
    let playlist = m3u8_rs::parse_media_playlist_res(text.as_bytes())
        .map_err(|_| Error::Parse("input is not a media playlist".to_owned()))?;

    let mut key: Option<SegmentKey> = None;
    let mut segments = Vec::with_capacity(playlist.segments.len());

    for segment in &playlist.segments {
        if let Some(k) = &segment.key {
            key = match &k.method {
                m3u8_rs::KeyMethod::None => None,
                m3u8_rs::KeyMethod::AES128 => Some(SegmentKey {
                    uri: k
                        .uri
                        .clone()
                        .ok_or_else(|| Error::Parse("aes-128 key without uri".to_owned()))?,
                    iv: k.iv.clone(),
                }),
                other => {
                    return Err(Error::Parse(format!(
                        "unsupported segment encryption {other:?}"
                    )));
                }
            };
        }

        segments.push(Segment {
            uri: segment.uri.clone(),
            duration: segment.duration,
            key: key.clone(),
        });
    }

    Ok(MediaManifest {
        media_sequence: playlist.media_sequence,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=720x480\n\
        /720p.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
        /1080p.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
        #EXT-X-VERSION:3\n\
        #EXT-X-TARGETDURATION:10\n\
        #EXT-X-MEDIA-SEQUENCE:7\n\
        #EXTINF:9.5,\n\
        seg0.ts\n\
        #EXTINF:10.0,\n\
        seg1.ts\n\
        #EXT-X-ENDLIST\n";

    fn url() -> Url {
        "https://server.com/playlist.m3u8".parse().unwrap()
    }

    #[test]
    fn master_variants_are_ordinal_and_in_file_order() {
        let manifest = parse_manifest(&url(), MASTER).unwrap();
        assert!(manifest.is_multi_variant());
        assert_eq!(manifest.variants.len(), 2);
        assert_eq!(manifest.variants[0].id, "0");
        assert_eq!(manifest.variants[0].resolution_label(), "720x480");
        assert_eq!(manifest.variants[0].bandwidth, Some(1_000_000));
        assert_eq!(manifest.variants[1].id, "1");
        assert_eq!(manifest.variants[1].resolution_label(), "1280x720");
    }

    #[test]
    fn media_playlist_is_single_variant() {
        let manifest = parse_manifest(&url(), MEDIA).unwrap();
        assert!(!manifest.is_multi_variant());
        assert_eq!(manifest.variants[0].id, "0");
        assert_eq!(manifest.variants[0].uri, url().to_string());
    }

    #[test]
    fn best_variant_prefers_pixels() {
        let manifest = parse_manifest(&url(), MASTER).unwrap();
        assert_eq!(manifest.best_variant().unwrap().id, "1");
    }

    #[test]
    fn media_segments_carry_sequence_and_duration() {
        let media = parse_media(MEDIA).unwrap();
        assert_eq!(media.media_sequence, 7);
        assert_eq!(media.segments.len(), 2);
        assert!(media.segments[0].key.is_none());
        assert!((media.total_duration() - 19.5).abs() < 0.01);
    }

    #[test]
    fn aes128_key_applies_to_following_segments() {
        let text = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:10\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00000000000000000000000000000001\n\
            #EXTINF:10.0,\n\
            seg0.ts\n\
            #EXTINF:10.0,\n\
            seg1.ts\n\
            #EXT-X-ENDLIST\n";
        let media = parse_media(text).unwrap();
        let key = media.segments[1].key.as_ref().unwrap();
        assert_eq!(key.uri, "key.bin");
        assert_eq!(key.iv_bytes(0).unwrap()[15], 1);
    }

    #[test]
    fn default_iv_is_media_sequence() {
        let key = SegmentKey {
            uri: "k".to_owned(),
            iv: None,
        };
        assert_eq!(key.iv_bytes(9).unwrap(), 9_u128.to_be_bytes());
    }

    #[test]
    fn variant_url_joins_relative_uris() {
        let manifest = parse_manifest(&url(), MASTER).unwrap();
        let joined = manifest.variant_url(&manifest.variants[0]).unwrap();
        assert_eq!(joined.as_str(), "https://server.com/720p.m3u8");
    }
}
