use anyhow::{Context, Result};
use beatprobe::analyzer::{AnalysisSettings, Analyzer};
use beatprobe::models::AnalysisResult;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beatprobe", version, about = "Offline BPM and musical key estimation")]
struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate tempo and key of audio files (directories are walked recursively)
    Analyze {
        /// Files or directories to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Pretty-print each JSON result
        #[arg(long)]
        pretty: bool,

        /// Always analyze the audio, even when the filename names BPM and key
        #[arg(long)]
        no_fast_path: bool,
    },

    /// Show what the filename alone suggests
    Parse {
        /// Filename to parse (e.g. "Track_128bpm_Amin.wav")
        filename: String,
    },

    /// List harmonically compatible keys (e.g. "A Minor")
    Compatible {
        /// Key name: sharp pitch class followed by Major or Minor
        key: String,
    },

    /// Answer JSON-lines analysis requests on stdin/stdout
    Serve,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = beatprobe::config::AppConfig::load();

    match cli.command {
        Commands::Analyze {
            paths,
            jobs,
            pretty,
            no_fast_path,
        } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let settings = AnalysisSettings {
                filename_fast_path: config.analysis.filename_fast_path && !no_fast_path,
                ..config.analysis
            };

            let files = beatprobe::scanner::collect_audio_files(&paths);
            if files.is_empty() {
                anyhow::bail!("No audio files found under the given paths");
            }

            let analyzer = Analyzer::new(settings);
            let batch = analyzer.analyze_paths(&files, workers);

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for outcome in &batch.outcomes {
                if let Ok(result) = &outcome.result {
                    print_result(&mut out, outcome.path.display().to_string(), result, pretty)?;
                }
            }

            eprintln!(
                "Analysis complete: {} analyzed, {} fallback, {} failed",
                batch.analyzed, batch.fallbacks, batch.failed
            );
        }

        Commands::Parse { filename } => {
            let estimate = beatprobe::scanner::filename::parse_filename(&filename);
            println!("{}", serde_json::to_string_pretty(&estimate)?);
        }

        Commands::Compatible { key } => {
            let names = beatprobe::key::compatible_key_names(&key);
            if names.is_empty() {
                anyhow::bail!("Not a key name: {key:?} (expected e.g. \"A Minor\")");
            }
            for name in names {
                println!("{name}");
            }
        }

        Commands::Serve => {
            let analyzer = Arc::new(Analyzer::new(config.analysis));
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start tokio runtime")?;
            runtime
                .block_on(async {
                    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                    let mut stdout = tokio::io::stdout();
                    beatprobe::worker::serve_lines(analyzer, stdin, &mut stdout).await
                })
                .context("Worker loop failed")?;
        }
    }

    Ok(())
}

/// Print one result as a JSON object tagged with its path.
fn print_result(
    out: &mut impl Write,
    path: String,
    result: &AnalysisResult,
    pretty: bool,
) -> Result<()> {
    let value = serde_json::json!({ "path": path, "result": result });
    let text = if pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    writeln!(out, "{text}")?;
    Ok(())
}
