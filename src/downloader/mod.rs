//! Download orchestration: one [`DownloadJob`] per invocation, moving
//! exactly once through pending -> running -> (succeeded | failed |
//! cancelled). Temporary artifacts never outlive the job.

mod merger;
mod transcode;

use crate::{
    error::{Error, Result},
    playlist::{self, SegmentKey},
    progress::{Phase, ProgressEvent, ProgressSink},
    retry::retry,
    subtitle::{self, SelectedSubtitle, SubtitleTrack},
    token::CancelToken,
};
use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use log::{info, warn};
use merger::Merger;
use reqwest::{Url, blocking::Client};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// How the selected caption reaches the viewer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtitleMode {
    /// No caption handling at all.
    None,
    /// Sidecar `.srt` next to the media file.
    Separate,
    /// Discrete subtitle stream muxed into a matroska container.
    SoftMux,
    /// Burned into the video frames while re-encoding.
    HardBurn,
}

impl SubtitleMode {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "separate" => Some(Self::Separate),
            "softcode" => Some(Self::SoftMux),
            "hardcode" => Some(Self::HardBurn),
            _ => None,
        }
    }

    /// Container extension for the final artifact.
    fn extension(&self) -> &'static str {
        match self {
            Self::SoftMux => "mkv",
            _ => "mp4",
        }
    }
}

/// Caller's subtitle decision, resolved by [`Orchestrator::prepare`].
#[derive(Clone, Debug)]
pub enum SubtitleChoice {
    /// Pick the first discovered track, silently proceed without one.
    Auto,
    /// Explicitly no subtitle.
    Skip,
    /// A specific track id from the catalog.
    Track(String),
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed(PathBuf),
    Cancelled,
}

pub struct DownloadJob {
    /// Media playlist of the chosen variant.
    pub playlist_url: Url,
    pub output_dir: PathBuf,
    /// Flat name for a movie, episodic subpath for an episode; no extension.
    pub relative_base: PathBuf,
    pub mode: SubtitleMode,
    pub subtitle: Option<SelectedSubtitle>,
    /// Worker pool width; 1 (the default) keeps the transfer strictly
    /// sequential, which origin servers tolerate best.
    pub threads: usize,
}

impl DownloadJob {
    /// Final artifact path for this job's delivery mode.
    pub fn output_path(&self) -> PathBuf {
        self.base_path().with_extension(self.mode.extension())
    }

    fn base_path(&self) -> PathBuf {
        self.output_dir.join(&self.relative_base)
    }

    /// Where the segmented transfer lands; for soft-mux this is an
    /// intermediate consumed by the mux step.
    fn video_path(&self) -> PathBuf {
        self.base_path().with_extension("mp4")
    }

    /// Sidecar path used when preparing the caption file.
    pub fn subtitle_path(&self) -> PathBuf {
        self.base_path().with_extension("srt")
    }
}

pub struct Orchestrator<'a> {
    client: &'a Client,
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Resolves the subtitle decision into a local caption file. Transient
    /// fetch failures retry under the bounded policy; a missing or broken
    /// catalog downgrades to "no subtitle" with a warning, it never fails
    /// the job. Only an explicitly requested track id turns failures into
    /// hard errors.
    pub fn prepare(
        &self,
        tracks: &[SubtitleTrack],
        choice: &SubtitleChoice,
        dest: &Path,
        token: &CancelToken,
    ) -> Result<Option<SelectedSubtitle>> {
        let track = match choice {
            SubtitleChoice::Skip => return Ok(None),
            SubtitleChoice::Auto => match tracks.first() {
                Some(track) => track,
                None => {
                    info!("No subtitles available");
                    return Ok(None);
                }
            },
            SubtitleChoice::Track(id) => tracks
                .iter()
                .find(|t| &t.id == id)
                .ok_or(Error::NoSubtitle)?,
        };

        match retry(token, || subtitle::download(self.client, track, dest, token)) {
            Ok(selected) => Ok(Some(selected)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) if matches!(choice, SubtitleChoice::Track(_)) => Err(e),
            Err(e) => {
                warn!("Subtitle unavailable ({e}), continuing without captions");
                Ok(None)
            }
        }
    }

    /// Executes the transfer. Terminal states clean up after themselves:
    /// a failed or cancelled run leaves no partial media, and modes that
    /// consume the caption delete it on success.
    pub fn run(
        &self,
        job: &DownloadJob,
        token: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<JobOutcome> {
        if token.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        // A consuming mode without a prepared caption falls back to a plain
        // transfer; the output path follows the fallback, not the request.
        let mode = match (job.mode, &job.subtitle) {
            (SubtitleMode::SoftMux | SubtitleMode::HardBurn, None) => {
                warn!("No caption file prepared, downloading without subtitles");
                SubtitleMode::None
            }
            (mode, _) => mode,
        };
        let output = job.base_path().with_extension(mode.extension());

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        match self.execute(job, mode, &output, token, sink) {
            Ok(()) => {
                self.cleanup_consumed_caption(job);
                info!("Downloaded {}", output.to_string_lossy());
                Ok(JobOutcome::Completed(output))
            }
            Err(e) if e.is_cancelled() => {
                self.cleanup_partial(job);
                Ok(JobOutcome::Cancelled)
            }
            Err(e) => {
                self.cleanup_partial(job);
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        job: &DownloadJob,
        mode: SubtitleMode,
        output: &Path,
        token: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        match mode {
            SubtitleMode::HardBurn => {
                let caption = job.subtitle.as_ref().ok_or(Error::NoSubtitle)?;
                transcode::hard_burn(job.playlist_url.as_str(), caption, output, token, sink)
            }
            SubtitleMode::SoftMux => {
                let caption = job.subtitle.as_ref().ok_or(Error::NoSubtitle)?;
                let video = job.video_path();

                self.transfer_segments(job, &video, token, sink)?;
                transcode::soft_mux(&video, caption, output, token)?;

                let _ = fs::remove_file(&video);
                Ok(())
            }
            SubtitleMode::None | SubtitleMode::Separate => {
                self.transfer_segments(job, output, token, sink)
            }
        }
    }

    /// Segmented transfer through the ordered merger, sequential by
    /// default, worker pool when the caller opted into `threads > 1`.
    fn transfer_segments(
        &self,
        job: &DownloadJob,
        dest: &Path,
        token: &CancelToken,
        sink: &dyn ProgressSink,
    ) -> Result<()> {
        let text = retry(token, || {
            Ok(self
                .client
                .get(job.playlist_url.clone())
                .send()?
                .error_for_status()?
                .text()?)
        })?;

        let media = playlist::parse_media(&text)?;

        if media.segments.is_empty() {
            return Err(Error::Parse("media playlist has no segments".to_owned()));
        }

        let keys = self.fetch_keys(&job.playlist_url, &media.segments, token)?;
        let total = media.segments.len();

        info!(
            "Downloading {} segments ({:.0}s) to {}",
            total,
            media.total_duration(),
            dest.to_string_lossy()
        );

        let merger = Mutex::new(Merger::create(dest, total)?);
        let done = AtomicUsize::new(0);

        let report = |count: usize| {
            sink.update(ProgressEvent {
                phase: Phase::Segments,
                percent: count as f64 / total as f64 * 100.0,
                detail: format!("{count}/{total} segments"),
            });
        };

        let fetch_one = |index: usize, segment: &playlist::Segment| -> Result<()> {
            let data = self.fetch_segment(job, &media, index, segment, &keys, token)?;
            merger
                .lock()
                .expect("merger lock poisoned")
                .write(index, data)?;
            report(done.fetch_add(1, Ordering::SeqCst) + 1);
            Ok(())
        };

        if job.threads <= 1 {
            for (index, segment) in media.segments.iter().enumerate() {
                token.check()?;
                fetch_one(index, segment)?;
            }
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(job.threads)
                .build()
                .expect("failed to build worker pool");
            let failure: Mutex<Option<Error>> = Mutex::new(None);

            pool.scope(|scope| {
                for (index, segment) in media.segments.iter().enumerate() {
                    let failure = &failure;
                    let fetch_one = &fetch_one;

                    scope.spawn(move |_| {
                        if token.is_cancelled()
                            || failure.lock().expect("failure lock poisoned").is_some()
                        {
                            return;
                        }

                        if let Err(e) = fetch_one(index, segment) {
                            failure
                                .lock()
                                .expect("failure lock poisoned")
                                .get_or_insert(e);
                        }
                    });
                }
            });

            if let Some(e) = failure.into_inner().expect("failure lock poisoned") {
                return Err(e);
            }

            token.check()?;
        }

        let merger = merger.into_inner().expect("merger lock poisoned");

        if !merger.is_complete() {
            return Err(Error::Parse("segment transfer incomplete".to_owned()));
        }

        info!("Fetched {}", crate::utils::format_bytes(merger.stored_bytes()));
        Ok(())
    }

    /// Prefetches every distinct AES-128 key uri before the pool starts.
    fn fetch_keys(
        &self,
        base: &Url,
        segments: &[playlist::Segment],
        token: &CancelToken,
    ) -> Result<HashMap<String, [u8; 16]>> {
        let mut keys = HashMap::new();

        for segment in segments {
            if let Some(key) = &segment.key
                && !keys.contains_key(&key.uri)
            {
                let url = base
                    .join(&key.uri)
                    .map_err(|e| Error::Parse(format!("bad key uri: {e}")))?;

                let bytes = retry(token, || {
                    Ok(self
                        .client
                        .get(url.clone())
                        .send()?
                        .error_for_status()?
                        .bytes()?)
                })?;

                keys.insert(key.uri.clone(), SegmentKey::key_bytes(&bytes)?);
            }
        }

        Ok(keys)
    }

    fn fetch_segment(
        &self,
        job: &DownloadJob,
        media: &playlist::MediaManifest,
        index: usize,
        segment: &playlist::Segment,
        keys: &HashMap<String, [u8; 16]>,
        token: &CancelToken,
    ) -> Result<Vec<u8>> {
        let url = job
            .playlist_url
            .join(&segment.uri)
            .map_err(|e| Error::Parse(format!("bad segment uri: {e}")))?;

        let data = retry(token, || {
            Ok(self
                .client
                .get(url.clone())
                .send()?
                .error_for_status()?
                .bytes()?
                .to_vec())
        })?;

        let Some(key) = &segment.key else {
            return Ok(data);
        };

        let key_bytes = keys
            .get(&key.uri)
            .ok_or_else(|| Error::Parse("segment key was not prefetched".to_owned()))?;
        let iv = key.iv_bytes(media.media_sequence + index as u64)?;

        let mut buffer = data;
        Aes128CbcDec::new(key_bytes.into(), (&iv).into())
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map(|plain| plain.to_vec())
            .map_err(|e| Error::Crypto(format!("segment decrypt failed: {e}")))
    }

    /// Soft-mux and hard-burn consume the caption; once it is embedded the
    /// sidecar must not remain.
    fn cleanup_consumed_caption(&self, job: &DownloadJob) {
        if matches!(job.mode, SubtitleMode::SoftMux | SubtitleMode::HardBurn)
            && let Some(caption) = &job.subtitle
        {
            let _ = fs::remove_file(&caption.path);
        }
    }

    /// A failed or cancelled run leaves nothing behind: partial media,
    /// intermediates and the prepared caption are all removed.
    fn cleanup_partial(&self, job: &DownloadJob) {
        let _ = fs::remove_file(job.video_path());
        let _ = fs::remove_file(job.output_path());

        if let Some(caption) = &job.subtitle {
            let _ = fs::remove_file(&caption.path);
        }
    }
}
