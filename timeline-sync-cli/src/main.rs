use std::path::PathBuf;

use clap::{Parser, Subcommand};
use schemars::JsonSchema;
use serde::Serialize;
use timeline_sync::track::Key;

#[derive(Parser)]
#[command(name = "timeline-sync-cli", about = "Inspect and play back compact timeline files (CTF)")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Print JSON schema for the inspection output format and exit
    #[arg(long, global = true)]
    schema: bool,

    /// Display version and quit
    #[arg(long, global = true)]
    version: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a CTF file and print its track names and keyframe counts
    Inspect {
        file: PathBuf,

        /// Output the full structure as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a headless playback loop over a CTF file, printing sampled
    /// values once per simulated tick
    Play {
        file: PathBuf,

        /// Playback rate in ticks per second
        #[arg(long, default_value_t = 50.0)]
        fps: f32,

        /// Total number of ticks to simulate
        #[arg(long, default_value_t = 100)]
        ticks: u32,
    },
}

/// A single track's decoded contents, as reported by `inspect --json` and
/// by `--schema`.
#[derive(Serialize, JsonSchema)]
struct TrackSummary {
    name: String,
    keys: Vec<Key>,
}

/// The full summary of a decoded CTF file.
#[derive(Serialize, JsonSchema)]
struct CtfSummary {
    tracks: Vec<TrackSummary>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.schema {
        let schema = schemars::schema_for!(CtfSummary);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let Some(command) = args.command else {
        eprintln!("a subcommand is required (inspect, play) unless --schema or --version is given");
        std::process::exit(2);
    };

    match command {
        Command::Inspect { file, json } => inspect(&file, json),
        Command::Play { file, fps, ticks } => play(&file, fps, ticks),
    }
}

fn inspect(file: &std::path::Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(file)?;
    let tracks = timeline_sync::ctf::scan(&bytes)?;

    if json {
        let summary =
            CtfSummary { tracks: tracks.into_iter().map(|(name, keys)| TrackSummary { name, keys }).collect() };
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    println!("{:<24} {:>8}", "track", "keys");
    for (name, keys) in &tracks {
        println!("{:<24} {:>8}", name, keys.len());
    }
    Ok(())
}

fn play(file: &std::path::Path, fps: f32, ticks: u32) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(file)?;
    let scanned = timeline_sync::ctf::scan(&bytes)?;
    let names: Vec<&str> = scanned.iter().map(|(name, _)| name.as_str()).collect();

    // rpm = fps * 60 gives rows_per_second == fps, so each simulated tick
    // (1/fps seconds of host time) advances the timeline by exactly one row.
    let mut session = timeline_sync::Session::init(names, None, Some(&bytes), fps * 60.0);

    let dt = 1.0 / fps;
    let mut time = 0.0f32;
    for tick in 0..ticks {
        let bits = session.update(&mut time);
        let row = fps * time;
        let values: Vec<String> = session.values().iter().map(|v| format!("{v:.4}")).collect();
        println!("tick={tick:>5} row={row:.2} playing={} values=[{}]", bits.is_playing(), values.join(", "));
        time += dt;
    }
    Ok(())
}

fn print_version() {
    println!("timeline-sync-cli");
    println!();

    let release = env!("RELEASE_VERSION");
    let commit = env!("GIT_COMMIT");
    if !release.is_empty() {
        println!("\tVersion:     {release}");
    } else {
        println!("\tGit commit:  {commit}");
    }
}
