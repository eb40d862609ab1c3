//! FaceGate Terminal - CLI
//!
//! Operator tool for pairing, the encrypted channel, dataset import and
//! offline recognition checks. It does no networking: pairing is split into
//! a request step and a completion step around the operator's HTTP client.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use facegate_terminal::{PairingOutcome, TerminalApi, TerminalConfig, Verdict};

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version = facegate_terminal::VERSION)]
#[command(about = "FaceGate Terminal - paired encrypted channel and offline face matching")]
struct Cli {
    /// Config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the config file
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pairing and dataset state
    Status,

    /// Print the pairing request body for a scanned credential
    PairRequest {
        /// Out-of-band pairing credential
        credential: String,
    },

    /// Finish pairing from the server's response body
    PairComplete {
        /// File holding the response body
        response: PathBuf,

        /// HTTP status the server answered with
        #[arg(long, default_value_t = 200)]
        status: u16,
    },

    /// Forget the paired server (keeps the device key)
    Unpair,

    /// Encrypt a JSON payload for the paired server
    Encrypt {
        /// JSON payload
        json: String,
    },

    /// Decrypt an envelope from the paired server
    Decrypt {
        /// Base64 envelope
        envelope: String,
    },

    /// Replace the dataset from a sync payload file
    Sync {
        /// Payload file
        file: PathBuf,

        /// File is an {"ENC": ...} body from the server
        #[arg(long)]
        encrypted: bool,
    },

    /// Recognize a comma-separated embedding
    Recognize {
        /// e.g. 0.99,0.14
        vector: String,
    },

    /// Show recognition statistics
    Stats,

    /// Run threshold calibration on the current dataset
    Calibrate {
        /// Target false match rate
        #[arg(long)]
        fmr: Option<f64>,

        /// Max impostor pairs
        #[arg(long)]
        samples: Option<usize>,
    },

    /// Write a config file with defaults
    InitConfig {
        /// Output path
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<TerminalConfig> {
    let mut config = match &cli.config {
        Some(path) => TerminalConfig::load_or_default(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TerminalConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

fn parse_vector(input: &str) -> Result<Vec<f32>> {
    input
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("not a number: {:?}", v.trim()))
        })
        .collect()
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    if let Commands::InitConfig { path } = &cli.command {
        config.save(path)?;
        println!("✅ Config written to: {}", path.display());
        return Ok(());
    }

    let api = TerminalApi::open(config).context("opening terminal state")?;

    match cli.command {
        Commands::Status => {
            let status = api.status();
            println!("📟 FaceGate Terminal {}", facegate_terminal::VERSION);
            println!("{:-<40}", "");
            println!("Data dir:     {}", api.config().data_dir.display());
            println!("Paired:       {}", if status.paired { "yes" } else { "no" });
            if let Some(client_id) = &status.client_id {
                println!("Client ID:    {}", client_id);
            }
            if let Some(device_id) = &status.device_id {
                println!("Device ID:    {}", device_id);
            }
            if let Some(url) = &status.server_url {
                println!("Server:       {}", url);
            }
            if let Some(at) = status.paired_at {
                println!("Paired at:    {}", at.to_rfc3339());
            }
            println!("Known people: {}", status.recognition.known_people);
            match status.recognition.last_sync {
                Some(at) => println!("Last sync:    {}", at.to_rfc3339()),
                None => println!("Last sync:    never"),
            }
        }

        Commands::PairRequest { credential } => {
            let request = api.pairing_request(&credential)?;
            println!("{}", serde_json::to_string_pretty(&request)?);
            eprintln!("POST this body to {}", api.config().pairing_path);
        }

        Commands::PairComplete { response, status } => {
            let body = std::fs::read(&response)
                .with_context(|| format!("reading {}", response.display()))?;
            match api.complete_pairing(status, &body) {
                PairingOutcome::Paired {
                    device_id,
                    server_url,
                    ..
                } => {
                    println!("✅ Paired as {} with {}", device_id, server_url);
                }
                PairingOutcome::Failed { reason } => bail!("pairing failed: {reason}"),
            }
        }

        Commands::Unpair => {
            api.unpair()?;
            println!("✅ Pairing cleared (device key kept)");
        }

        Commands::Encrypt { json } => {
            let payload: serde_json::Value =
                serde_json::from_str(&json).context("payload is not valid JSON")?;
            println!("{}", api.encrypt(&payload)?);
        }

        Commands::Decrypt { envelope } => {
            println!("{}", api.decrypt(envelope.trim())?);
        }

        Commands::Sync { file, encrypted } => {
            let body = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let result = if encrypted {
                api.apply_encrypted_sync(&body, Utc::now())?
            } else {
                api.apply_sync_bytes(&body, Utc::now())?
            };
            println!(
                "✅ Dataset applied: {} people, dimension {}, generation {}",
                result.people_count, result.dimension, result.generation
            );
        }

        Commands::Recognize { vector } => {
            let query = parse_vector(&vector)?;
            match api.recognize_detailed(&query) {
                Verdict::Match(hit) => {
                    let name = hit.display_name.as_deref().unwrap_or(&hit.id);
                    println!(
                        "✅ {} (id {}, distance {:.4}, confidence {:.3})",
                        name, hit.id, hit.distance, hit.confidence
                    );
                }
                Verdict::Unknown {
                    nearest_distance,
                    threshold,
                } => match nearest_distance {
                    Some(d) => println!("❓ Unknown (nearest {:.4}, threshold {:.4})", d, threshold),
                    None => println!(
                        "❓ Unknown (query dimension {} does not fit the dataset)",
                        query.len()
                    ),
                },
                Verdict::NotReady => println!("📭 No dataset loaded"),
            }
        }

        Commands::Stats => {
            let stats = api.stats();
            println!("📊 FaceGate Recognition Statistics");
            println!("{:-<40}", "");
            println!("Known people:     {}", stats.known_people);
            println!("Embeddings:       {}", stats.embeddings);
            println!("Dimension:        {}", stats.dimension);
            println!("Generation:       {}", stats.generation);
            println!("Threshold:        {:.4} ({:?})", stats.threshold, stats.threshold_source);
        }

        Commands::Calibrate { fmr, samples } => {
            let matching = &api.config().matching;
            let fmr = fmr.unwrap_or(matching.target_false_match_rate);
            let samples = samples.unwrap_or(matching.sample_limit);
            if !(fmr > 0.0 && fmr <= 1.0) {
                bail!("--fmr must be in (0, 1]");
            }

            let estimate = api.calibrate(fmr, samples);
            println!("Target FMR:       {}", fmr);
            println!("Impostor pairs:   {}", estimate.impostor_pairs);
            println!("Threshold:        {:.4} ({:?})", estimate.threshold, estimate.source);
        }

        // Written before the terminal state was opened
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}
