use crate::facts::EpisodeMeta;
use std::{env, path::Path, path::PathBuf};

/// Sanitizes a scraped title into a filename: reserved characters are
/// removed outright, spaces become underscores.
pub fn safe_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' | '&'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

/// Strips reserved characters but keeps spaces, for the human-readable
/// episodic directory layout.
fn clean_component(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect()
}

/// `{series} ({year})/Season {NN}/{series} - s{NN}e{NN}` relative path,
/// extension left to the delivery mode.
pub fn episode_path(meta: &EpisodeMeta) -> PathBuf {
    let series = clean_component(&meta.series);

    PathBuf::from(format!("{} ({})", series, meta.year))
        .join(format!("Season {:02}", meta.season))
        .join(format!(
            "{} - s{:02}e{:02}",
            series, meta.season, meta.episode
        ))
}

pub fn format_bytes(bytes: usize) -> String {
    let mut val = bytes as f32;

    for unit in ["bytes", "KiB", "MiB", "GiB", "TiB"] {
        if val < 1024.0 {
            return format!("{val:.2} {unit}");
        }

        val /= 1024.0;
    }

    format!("{bytes} bytes")
}

/// Locates the ffmpeg binary in the working directory or on PATH.
pub fn find_ffmpeg() -> Option<PathBuf> {
    let bin = if cfg!(target_os = "windows") {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    };

    if Path::new(bin).exists() {
        return Some(PathBuf::from(bin));
    }

    let separator = if cfg!(target_os = "windows") { ';' } else { ':' };

    env::var("PATH").ok()?.split(separator).find_map(|dir| {
        let candidate = Path::new(dir).join(bin);
        candidate.exists().then_some(candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_title_removes_reserved_and_underscores_spaces() {
        assert_eq!(
            safe_title("Test Movie: Subtitle & More!"),
            "Test_Movie_Subtitle__More!"
        );
        assert_eq!(safe_title("a/b\\c"), "abc");
    }

    #[test]
    fn episode_layout() {
        let meta = EpisodeMeta {
            series: "Some Show".to_owned(),
            year: "2024".to_owned(),
            season: 1,
            episode: 5,
        };
        assert_eq!(
            episode_path(&meta),
            PathBuf::from("Some Show (2024)/Season 01/Some Show - s01e05")
        );
    }

    #[test]
    fn byte_units() {
        assert_eq!(format_bytes(512), "512.00 bytes");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.00 MiB");
    }
}
