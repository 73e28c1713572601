//! Subtitle catalog: discovery of labeled tracks from the player's packed
//! descriptor, download of one track, and conversion of the segment-offset
//! WebVTT payload into a clean SRT file.

use crate::{
    error::{Error, Result},
    token::CancelToken,
};
use log::info;
use regex::Regex;
use reqwest::blocking::Client;
use std::{fmt::Write as _, fs, path::Path, sync::OnceLock};

#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleTrack {
    pub id: String,
    pub label: String,
    pub url: String,
}

/// A downloaded, converted track ready for sidecar/mux/burn delivery.
#[derive(Clone, Debug)]
pub struct SelectedSubtitle {
    pub label: String,
    pub path: std::path::PathBuf,
}

static DESCRIPTOR: OnceLock<Regex> = OnceLock::new();
static LABELED: OnceLock<Regex> = OnceLock::new();
static TIMESTAMP_MAP: OnceLock<Regex> = OnceLock::new();
static TAG: OnceLock<Regex> = OnceLock::new();

/// Scans a player response body for the packed subtitle descriptor.
/// Subtitles are optional content: absence yields an empty catalog.
pub fn discover(player_body: &str) -> Vec<SubtitleTrack> {
    let re = DESCRIPTOR
        .get_or_init(|| Regex::new(r#"playerjsSubtitle\s*=\s*["']([^"']*)["']"#).unwrap());

    match re.captures(player_body).and_then(|c| c.get(1)) {
        Some(m) if !m.as_str().trim().is_empty() => parse_descriptor(m.as_str()),
        _ => Vec::new(),
    }
}

/// Parses the packed `[Label]URL,[Label]URL,…` descriptor. Priority order:
/// multi-track when both `,` and `[` appear, single labeled track when only
/// `[` appears, otherwise one unlabeled track.
pub fn parse_descriptor(raw: &str) -> Vec<SubtitleTrack> {
    let mut tracks = Vec::new();

    if raw.contains(',') && raw.contains('[') {
        for part in raw.split(',') {
            if let Some((label, url)) = split_labeled(part) {
                tracks.push(SubtitleTrack {
                    id: tracks.len().to_string(),
                    label,
                    url,
                });
            }
        }
    } else if raw.contains('[') {
        if let Some((label, url)) = split_labeled(raw) {
            tracks.push(SubtitleTrack {
                id: "0".to_owned(),
                label,
                url,
            });
        }
    } else if !raw.trim().is_empty() {
        tracks.push(SubtitleTrack {
            id: "0".to_owned(),
            label: "Default".to_owned(),
            url: normalize_url(raw),
        });
    }

    tracks
}

fn split_labeled(part: &str) -> Option<(String, String)> {
    let re = LABELED.get_or_init(|| Regex::new(r"\[([^\]]*)\](.*)").unwrap());
    let caps = re.captures(part.trim())?;
    let label = caps.get(1)?.as_str().trim().to_owned();
    let url = normalize_url(caps.get(2)?.as_str());

    if url.is_empty() {
        return None;
    }

    Some((label, url))
}

/// Descriptor fragments sometimes carry junk before the scheme; anchor on
/// the first `https://` occurrence.
fn normalize_url(fragment: &str) -> String {
    match fragment.find("https://") {
        Some(pos) => fragment[pos..].trim().to_owned(),
        None => fragment.trim().to_owned(),
    }
}

/// Fetches a track and writes the converted SRT to `dest`.
pub fn download(
    client: &Client,
    track: &SubtitleTrack,
    dest: &Path,
    token: &CancelToken,
) -> Result<SelectedSubtitle> {
    token.check()?;

    let raw = client.get(&track.url).send()?.error_for_status()?.text()?;
    let srt = vtt_to_srt(&raw)?;

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    fs::write(dest, srt).map_err(|e| Error::io(dest, e))?;
    info!("Subtitle saved {} ({})", dest.to_string_lossy(), track.label);

    Ok(SelectedSubtitle {
        label: track.label.clone(),
        path: dest.to_owned(),
    })
}

/// Converts WebVTT captions into numbered SRT cues.
///
/// Player subtitles are cut per media segment, so cue timestamps are offset
/// by the segment's `X-TIMESTAMP-MAP` directive (`MPEGTS` in 90 kHz units
/// against a `LOCAL` zero point). The offset is subtracted from every cue,
/// clamped at zero; without the directive cues pass through unshifted.
pub fn vtt_to_srt(raw: &str) -> Result<String> {
    let map_re = TIMESTAMP_MAP.get_or_init(|| {
        Regex::new(r"X-TIMESTAMP-MAP=.*?(?:MPEGTS:(\d+)).*?(?:LOCAL:([0-9:.]+))|X-TIMESTAMP-MAP=.*?(?:LOCAL:([0-9:.]+)).*?(?:MPEGTS:(\d+))").unwrap()
    });

    let mut offset_ms: i64 = 0;

    if let Some(caps) = map_re.captures(raw) {
        let (clock, local) = match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
            (Some(c), Some(l), _, _) => (c.as_str(), l.as_str()),
            (_, _, Some(l), Some(c)) => (c.as_str(), l.as_str()),
            _ => ("0", "0"),
        };

        let clock = clock.parse::<i64>().unwrap_or(0);
        let local_ms = parse_timestamp(local).unwrap_or(0);
        offset_ms = clock / 90 - local_ms;
    }

    let mut out = String::new();
    let mut number = 0_u32;
    let mut lines = raw.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((start, end)) = parse_cue_times(line) else {
            continue;
        };

        let mut text = String::new();

        for text_line in lines.by_ref() {
            if text_line.trim().is_empty() {
                break;
            }

            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&strip_tags(text_line));
        }

        if text.trim().is_empty() {
            continue;
        }

        number += 1;
        let start = (start - offset_ms).max(0);
        let end = (end - offset_ms).max(0);

        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            number,
            format_srt_timestamp(start),
            format_srt_timestamp(end),
            text
        );
    }

    if number == 0 {
        return Err(Error::Parse("no cues found in subtitle payload".to_owned()));
    }

    Ok(out)
}

/// `start --> end [settings]` with `HH:MM:SS.mmm` or `MM:SS.mmm` times.
fn parse_cue_times(line: &str) -> Option<(i64, i64)> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.trim().split_whitespace().next()?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

fn parse_timestamp(ts: &str) -> Option<i64> {
    let (clock, millis) = match ts.split_once(['.', ',']) {
        Some((c, m)) => (c, m.parse::<i64>().ok()?),
        None => (ts, 0),
    };

    let parts = clock.split(':').collect::<Vec<_>>();
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        [m, s] => (0, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        _ => return None,
    };

    Some(((h * 60 + m) * 60 + s) * 1000 + millis)
}

fn format_srt_timestamp(ms: i64) -> String {
    let millis = ms % 1000;
    let seconds = (ms / 1000) % 60;
    let minutes = (ms / 60_000) % 60;
    let hours = ms / 3_600_000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

fn strip_tags(line: &str) -> String {
    let re = TAG.get_or_init(|| Regex::new(r"<[^>]*>").unwrap());
    re.replace_all(line, "").trim().to_owned()
}

/// Best-effort ISO 639-2 code for a track label, used to tag the muxed
/// subtitle stream.
pub fn language_code(label: &str) -> Option<&'static str> {
    match label.to_lowercase() {
        l if l.contains("indones") => Some("ind"),
        l if l.contains("english") => Some("eng"),
        l if l.contains("malay") => Some("may"),
        l if l.contains("arab") => Some("ara"),
        l if l.contains("spanish") => Some("spa"),
        l if l.contains("french") => Some("fra"),
        l if l.contains("german") => Some("deu"),
        l if l.contains("japan") => Some("jpn"),
        l if l.contains("korea") => Some("kor"),
        l if l.contains("chin") => Some("zho"),
        l if l.contains("thai") => Some("tha"),
        l if l.contains("viet") => Some("vie"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_labeled_tracks_in_order() {
        let tracks = parse_descriptor(
            "[Indonesian]https://a/sub.vtt,[English]https://b/sub.vtt",
        );
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, "0");
        assert_eq!(tracks[0].label, "Indonesian");
        assert_eq!(tracks[0].url, "https://a/sub.vtt");
        assert_eq!(tracks[1].id, "1");
        assert_eq!(tracks[1].label, "English");
        assert_eq!(tracks[1].url, "https://b/sub.vtt");
    }

    #[test]
    fn single_labeled_track() {
        let tracks = parse_descriptor("[Indonesian]https://a/sub.vtt");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].label, "Indonesian");
    }

    #[test]
    fn bare_url_gets_default_label() {
        let tracks = parse_descriptor("https://a/sub.vtt");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].label, "Default");
        assert_eq!(tracks[0].url, "https://a/sub.vtt");
    }

    #[test]
    fn url_junk_prefix_is_dropped() {
        let tracks = parse_descriptor("[Id]junk\\/https://a/sub.vtt");
        assert_eq!(tracks[0].url, "https://a/sub.vtt");
    }

    #[test]
    fn discover_finds_the_descriptor_variable() {
        let body = r#"var player = {}; playerjsSubtitle = "[English]https://b/sub.vtt";"#;
        let tracks = discover(body);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].label, "English");
    }

    #[test]
    fn discover_without_variable_is_empty() {
        assert!(discover("var player = {};").is_empty());
        assert!(discover(r#"playerjsSubtitle = "";"#).is_empty());
    }

    #[test]
    fn timestamp_map_offset_is_applied() {
        let vtt = "WEBVTT\n\
            X-TIMESTAMP-MAP=MPEGTS:900000,LOCAL:00:00:00.000\n\
            \n\
            00:00:12.000 --> 00:00:14.000\n\
            Hello\n";
        let srt = vtt_to_srt(vtt).unwrap();
        assert!(srt.contains("00:00:02,000 --> 00:00:04,000"), "{srt}");
    }

    #[test]
    fn missing_directive_means_zero_offset() {
        let vtt = "WEBVTT\n\n00:00:12.000 --> 00:00:14.000\nHello\n";
        let srt = vtt_to_srt(vtt).unwrap();
        assert!(srt.contains("00:00:12,000 --> 00:00:14,000"));
    }

    #[test]
    fn offset_clamps_at_zero() {
        let vtt = "WEBVTT\n\
            X-TIMESTAMP-MAP=MPEGTS:900000,LOCAL:00:00:00.000\n\
            \n\
            00:00:05.000 --> 00:00:12.000\n\
            Early\n";
        let srt = vtt_to_srt(vtt).unwrap();
        assert!(srt.contains("00:00:00,000 --> 00:00:02,000"));
    }

    #[test]
    fn cues_renumber_from_one_and_tags_are_stripped() {
        let vtt = "WEBVTT\n\
            \n\
            cue-7\n\
            00:01:00.000 --> 00:01:02.000\n\
            <i>First</i> line\n\
            \n\
            00:01:05.000 --> 00:01:07.000 align:middle\n\
            <b>Second</b>\n";
        let srt = vtt_to_srt(vtt).unwrap();
        let expected = "1\n00:01:00,000 --> 00:01:02,000\nFirst line\n\n\
                        2\n00:01:05,000 --> 00:01:07,000\nSecond\n\n";
        assert_eq!(srt, expected);
    }

    #[test]
    fn short_vtt_timestamps_parse() {
        assert_eq!(parse_timestamp("01:02.500"), Some(62_500));
        assert_eq!(parse_timestamp("01:02:03.004"), Some(3_723_004));
        assert_eq!(parse_timestamp("bogus"), None);
    }

    #[test]
    fn payload_without_cues_is_parse_error() {
        assert!(matches!(vtt_to_srt("WEBVTT\n"), Err(Error::Parse(_))));
    }

    #[test]
    fn language_codes_are_best_effort() {
        assert_eq!(language_code("Indonesian"), Some("ind"));
        assert_eq!(language_code("English (CC)"), Some("eng"));
        assert_eq!(language_code("Klingon"), None);
    }
}
