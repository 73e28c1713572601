//! External transcoder invocations for the soft-mux and hard-burn subtitle
//! delivery modes, with a monitored child process so cancellation stays
//! responsive during long encodes.

use crate::{
    error::{Error, Result},
    progress::{Phase, ProgressEvent, ProgressSink},
    subtitle::{self, SelectedSubtitle},
    token::CancelToken,
    utils,
};
use log::{debug, info};
use std::{
    collections::VecDeque,
    io::Read,
    path::Path,
    process::{Command, Stdio},
    sync::mpsc,
    thread,
    time::Duration,
};

/// Re-wraps an already downloaded video into a matroska container with the
/// caption attached as a discrete default subtitle stream. Video and audio
/// are stream-copied.
pub fn soft_mux(
    video: &Path,
    caption: &SelectedSubtitle,
    output: &Path,
    token: &CancelToken,
) -> Result<()> {
    let mut args = vec![
        "-y".to_owned(),
        "-i".to_owned(),
        video.to_string_lossy().into_owned(),
        "-i".to_owned(),
        caption.path.to_string_lossy().into_owned(),
        "-map".to_owned(),
        "0".to_owned(),
        "-map".to_owned(),
        "1".to_owned(),
        "-c:v".to_owned(),
        "copy".to_owned(),
        "-c:a".to_owned(),
        "copy".to_owned(),
        "-c:s".to_owned(),
        "srt".to_owned(),
    ];

    if let Some(lang) = subtitle::language_code(&caption.label) {
        args.push("-metadata:s:s:0".to_owned());
        args.push(format!("language={lang}"));
    }

    args.push("-disposition:s:0".to_owned());
    args.push("default".to_owned());
    args.push(output.to_string_lossy().into_owned());

    info!("Muxing subtitle stream into {}", output.to_string_lossy());
    run_ffmpeg(&args, token, |_| {})
}

/// Burns the caption into the decoded frames while transcoding straight
/// from the manifest. No stream copy is possible here, so this is the slow
/// path; progress comes from the transcoder's own elapsed-time reporting
/// against the total duration parsed from its preamble.
pub fn hard_burn(
    input: &str,
    caption: &SelectedSubtitle,
    output: &Path,
    token: &CancelToken,
    sink: &dyn ProgressSink,
) -> Result<()> {
    let args = vec![
        "-y".to_owned(),
        "-i".to_owned(),
        input.to_owned(),
        "-vf".to_owned(),
        format!("subtitles={}", escape_filter_path(&caption.path)),
        "-c:a".to_owned(),
        "aac".to_owned(),
        output.to_string_lossy().into_owned(),
    ];

    info!("Burning subtitles into {}", output.to_string_lossy());

    let mut total_secs: Option<f64> = None;

    run_ffmpeg(&args, token, |line| {
        if total_secs.is_none() {
            total_secs = parse_duration_line(line);
        }

        if let (Some(total), Some(elapsed)) = (total_secs, parse_time_line(line))
            && total > 0.0
        {
            sink.update(ProgressEvent {
                phase: Phase::Transcode,
                percent: (elapsed / total * 100.0).min(100.0),
                detail: format!("{:.0}s / {:.0}s", elapsed, total),
            });
        }
    })
}

/// Spawns ffmpeg and pumps its stderr through `on_line` while polling the
/// cancel token. Lines are split on both `\n` and `\r` because the
/// transcoder rewrites its progress line in place. On cancellation the
/// child is killed; the caller removes the partial output.
fn run_ffmpeg(
    args: &[String],
    token: &CancelToken,
    mut on_line: impl FnMut(&str),
) -> Result<()> {
    let ffmpeg = utils::find_ffmpeg()
        .ok_or_else(|| Error::Transcode("ffmpeg not found in PATH".to_owned()))?;

    debug!("ffmpeg {}", args.join(" "));

    let mut child = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Transcode(format!("failed to spawn ffmpeg: {e}")))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Transcode("ffmpeg stderr unavailable".to_owned()))?;

    let (tx, rx) = mpsc::channel::<String>();

    let reader = thread::spawn(move || {
        let mut stderr = stderr;
        let mut buffer = [0_u8; 4096];
        let mut line = Vec::new();

        while let Ok(n) = stderr.read(&mut buffer) {
            if n == 0 {
                break;
            }

            for &byte in &buffer[..n] {
                if byte == b'\n' || byte == b'\r' {
                    if !line.is_empty() {
                        let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
                        line.clear();
                    }
                } else {
                    line.push(byte);
                }
            }
        }

        if !line.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
        }
    });

    let mut tail: VecDeque<String> = VecDeque::with_capacity(16);
    let mut cancelled = false;

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                if tail.len() == 16 {
                    tail.pop_front();
                }
                tail.push_back(line.clone());
                on_line(&line);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if token.is_cancelled() {
            cancelled = true;
            let _ = child.kill();
            break;
        }
    }

    let status = child
        .wait()
        .map_err(|e| Error::Transcode(format!("failed to wait on ffmpeg: {e}")))?;
    let _ = reader.join();

    if cancelled {
        return Err(Error::Cancelled);
    }

    if !status.success() {
        return Err(Error::Transcode(
            tail.iter().cloned().collect::<Vec<_>>().join("\n"),
        ));
    }

    Ok(())
}

/// The subtitles filter parses `:` and `\` specially; quote the path the
/// way ffmpeg's filter grammar expects.
fn escape_filter_path(path: &Path) -> String {
    let escaped = path
        .to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'");
    format!("'{escaped}'")
}

/// `  Duration: 00:02:00.00, start: 0.000000, bitrate: ...`
fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    parse_clock(rest.trim_start().split([',', ' ']).next()?)
}

/// `frame= 100 fps= 25 ... time=00:01:00.00 bitrate= ...`
fn parse_time_line(line: &str) -> Option<f64> {
    let pos = line.find("time=")?;
    parse_clock(line[pos + 5..].split_whitespace().next()?)
}

fn parse_clock(clock: &str) -> Option<f64> {
    let mut parts = clock.split(':');
    let hours = parts.next()?.parse::<f64>().ok()?;
    let minutes = parts.next()?.parse::<f64>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    Some((hours * 60.0 + minutes) * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_preamble_parses() {
        let line = "  Duration: 00:02:00.00, start: 0.000000, bitrate: 1371 kb/s";
        assert_eq!(parse_duration_line(line), Some(120.0));
        assert_eq!(parse_duration_line("frame= 10"), None);
    }

    #[test]
    fn elapsed_time_parses() {
        let line = "frame=  250 fps= 25 q=28.0 size=1024KiB time=00:01:30.50 bitrate= 92.8kbits/s";
        assert_eq!(parse_time_line(line), Some(90.5));
        assert_eq!(parse_time_line("no progress here"), None);
    }

    #[test]
    fn filter_path_is_quoted() {
        let escaped = escape_filter_path(Path::new("/tmp/a:b's.srt"));
        assert_eq!(escaped, "'/tmp/a\\:b\\'s.srt'");
    }
}
