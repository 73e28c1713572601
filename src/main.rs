use anyhow::{Context, Result, bail};
use clap::Parser;
use doodl::{
    downloader::{DownloadJob, JobOutcome, Orchestrator, SubtitleChoice, SubtitleMode},
    error::Error,
    facts::{ContentKind, DooPlayPage, EpisodeMeta, PageFacts},
    logger, origin,
    origin::OriginConfig,
    progress::BarSink,
    resolver::StreamResolver,
    subtitle, token::CancelToken, utils,
};
use kdam::term::Colorizer;
use log::{LevelFilter, debug, info, warn};
use reqwest::Url;
use std::{
    io::{IsTerminal, stderr},
    path::PathBuf,
    process,
    time::Duration,
};

/// Download movies and episodes from a DooPlay streaming portal.
#[derive(Debug, Parser)]
#[command(name = "doodl", version)]
struct Args {
    /// Portal page url of the movie or episode.
    #[arg(required = true)]
    url: String,

    /// Directory the final artifact is written into.
    #[arg(short, long, default_value = ".")]
    directory: PathBuf,

    /// Stream variant to download: an id from the listed variants, or `best`
    /// for the highest resolution.
    #[arg(short, long, default_value = "best", value_name = "ID|best", value_parser = quality_parser)]
    quality: Quality,

    /// Subtitle track id to use instead of the first discovered one.
    #[arg(long, value_name = "ID", conflicts_with = "no_subtitle")]
    subtitle: Option<String>,

    /// Skip subtitle discovery entirely.
    #[arg(long)]
    no_subtitle: bool,

    /// How the caption is delivered.
    #[arg(
        long,
        default_value = "separate",
        value_name = "none|separate|softcode|hardcode",
        value_parser = mode_parser
    )]
    subtitle_mode: SubtitleMode,

    /// Parallel segment downloads. Sequential by default; portals throttle
    /// aggressive clients.
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=16))]
    threads: u8,

    /// Series title for the episodic output layout.
    /// By default the scraped page title is used.
    #[arg(long, help_heading = "Episode Options")]
    series: Option<String>,

    /// Release year for the episodic output layout.
    #[arg(long, help_heading = "Episode Options")]
    year: Option<String>,

    /// Season number for the episodic output layout.
    #[arg(long, help_heading = "Episode Options")]
    season: Option<u32>,

    /// Episode number for the episodic output layout.
    #[arg(long, help_heading = "Episode Options")]
    episode: Option<u32>,

    /// Portal base url, for when the default domain has rotated.
    #[arg(long, help_heading = "Client Options")]
    portal: Option<Url>,

    /// Player base url.
    #[arg(long, help_heading = "Client Options")]
    player: Option<Url>,

    /// Custom user agent for all requests.
    #[arg(long, help_heading = "Client Options", default_value = origin::DEFAULT_USER_AGENT, hide_default_value = true)]
    user_agent: String,

    /// Per-request timeout in seconds.
    #[arg(long, help_heading = "Client Options", default_value_t = 30)]
    timeout: u64,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Debug)]
enum Quality {
    Best,
    Id(String),
}

fn quality_parser(s: &str) -> Result<Quality, String> {
    match s {
        "best" | "max" | "highest" => Ok(Quality::Best),
        id if id.chars().all(|c| c.is_ascii_digit()) => Ok(Quality::Id(id.to_owned())),
        _ => Err("should be `best` or a variant id".to_owned()),
    }
}

fn mode_parser(s: &str) -> Result<SubtitleMode, String> {
    SubtitleMode::from_wire(s)
        .ok_or_else(|| "should be one of none, separate, softcode, hardcode".to_owned())
}

fn run() -> Result<()> {
    let args = Args::parse();

    logger::init(if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            process::exit(130);
        }

        eprintln!("\nCancelling, press ctrl+c again to force quit");
        handler_token.cancel();
    })
    .context("failed to install interrupt handler")?;

    let mut default_origin = OriginConfig::default();

    if let Some(portal) = args.portal {
        default_origin.portal = portal;
    }

    if let Some(player) = args.player {
        default_origin.player = player;
    }

    let origin = default_origin;
    let client = origin::build_client(&origin, &args.user_agent, Duration::from_secs(args.timeout))?;

    if matches!(
        args.subtitle_mode,
        SubtitleMode::SoftMux | SubtitleMode::HardBurn
    ) && utils::find_ffmpeg().is_none()
    {
        bail!("ffmpeg could not be located, required by this --subtitle-mode");
    }

    let page = DooPlayPage::fetch(&client, &origin, &args.url, &token)?;
    let content = page.content_ref()?;
    let title = page.title()?;
    info!("Found {} ({})", title, content.kind);

    if let Some(poster) = page.poster() {
        debug!("poster {poster}");
    }

    let resolved = StreamResolver::new(&client, &origin).resolve(&content, &token)?;

    if resolved.manifest.is_multi_variant() {
        for variant in &resolved.manifest.variants {
            info!("{:>3}) {}", variant.id, variant.display());
        }
    }

    let variant = match &args.quality {
        Quality::Best => resolved.manifest.best_variant()?,
        Quality::Id(id) => resolved
            .manifest
            .variant(id)
            .ok_or(Error::NoVariant)
            .with_context(|| format!("no variant with id {id}"))?,
    };
    info!("Selected variant {}", variant.display());

    let playlist_url = resolved.manifest.variant_url(variant)?;

    let relative_base = match (content.kind, args.season, args.episode, &args.year) {
        (ContentKind::Episode, Some(season), Some(episode), Some(year)) => {
            utils::episode_path(&EpisodeMeta {
                series: args.series.clone().unwrap_or_else(|| title.clone()),
                year: year.clone(),
                season,
                episode,
            })
        }
        (ContentKind::Episode, ..) => {
            warn!("Season/episode/year not given, using a flat output name");
            PathBuf::from(utils::safe_title(&title))
        }
        _ => PathBuf::from(utils::safe_title(&title)),
    };

    let mut job = DownloadJob {
        playlist_url,
        output_dir: args.directory,
        relative_base,
        mode: args.subtitle_mode,
        subtitle: None,
        threads: usize::from(args.threads),
    };

    let choice = if args.no_subtitle || args.subtitle_mode == SubtitleMode::None {
        SubtitleChoice::Skip
    } else if let Some(id) = &args.subtitle {
        SubtitleChoice::Track(id.clone())
    } else {
        SubtitleChoice::Auto
    };

    let tracks = subtitle::discover(&resolved.player_body);
    let orchestrator = Orchestrator::new(&client);
    job.subtitle = orchestrator.prepare(&tracks, &choice, &job.subtitle_path(), &token)?;

    let sink = BarSink::new();

    match orchestrator.run(&job, &token, &sink)? {
        JobOutcome::Completed(path) => {
            eprintln!();
            info!("Saved {}", path.to_string_lossy());
        }
        JobOutcome::Cancelled => {
            eprintln!();
            warn!("Download cancelled");
        }
    }

    Ok(())
}

fn main() {
    kdam::term::init(stderr().is_terminal());

    if let Err(e) = run() {
        eprintln!("{}: {:#}", "error".colorize("bold red"), e);
        process::exit(1);
    }
}
