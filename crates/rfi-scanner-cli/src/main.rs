use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rfi_scanner_core::config::duration_serde;
use rfi_scanner_core::report::{ai_analysis_path, save_ai_analysis, save_results};
use rfi_scanner_core::{
    load_targets, render_report, BuiltinPayloads, Detector, FilePayloadRepository, HttpScanner,
    OllamaAnalyst, OllamaClient, OllamaSettings, OutputFormat, PayloadRepository, ScanAnalyst,
    ScanResult, ScanType, Scanner, ScannerConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const AUTHORIZED_USE: &str = "WARNING: only scan systems you own or have explicit written permission to test. \
Unauthorized scanning is illegal in many jurisdictions.

Examples:
  rfi-scanner scan --targets targets.txt --type rfi
  rfi-scanner scan --url \"http://example.com/page.php?id=\" --type lfi";

#[derive(Parser, Debug)]
#[command(
    name = "rfi-scanner",
    author,
    version,
    about = "Educational RFI/LFI scanner with optional local-LLM analysis",
    after_help = AUTHORIZED_USE
)]
struct Cli {
    /// Settings file (TOML or YAML) with [scan], [detection] and [ollama] sections
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe targets with inclusion payloads
    Scan(ScanArgs),
    /// List the payloads a scan would use
    Payloads {
        #[arg(long = "type", default_value = "rfi")]
        scan_type: ScanType,

        /// Directory holding rfi.txt / lfi.txt payload packs
        #[arg(long, value_name = "DIR")]
        payloads_dir: Option<PathBuf>,

        /// Emit payloads as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// List models available on the generation server
    Models,
    /// Check that the generation server is reachable
    Health,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Single target URL; payloads are appended verbatim
    #[arg(long, conflicts_with = "targets", required_unless_present = "targets")]
    url: Option<String>,

    /// File containing target URLs, one per line
    #[arg(long, value_name = "FILE")]
    targets: Option<PathBuf>,

    #[arg(long = "type", default_value = "rfi")]
    scan_type: ScanType,

    /// Directory holding rfi.txt / lfi.txt payload packs
    #[arg(long, value_name = "DIR")]
    payloads_dir: Option<PathBuf>,

    /// Maximum concurrent requests
    #[arg(long)]
    concurrent: Option<usize>,

    /// Request timeout (seconds or a duration such as "1m 30s")
    #[arg(long, value_parser = duration_serde::parse)]
    timeout: Option<Duration>,

    /// Output file for results
    #[arg(long, default_value = "scan_results.json")]
    output: PathBuf,

    /// Report format printed to stdout
    #[arg(long, value_enum, default_value_t = ReportFormat::Human)]
    format: ReportFormat,

    /// Summarize results with the local generation server
    #[arg(long)]
    ai_analysis: bool,

    /// Model used for AI analysis
    #[arg(long)]
    ollama_model: Option<String>,

    /// Print the AI analysis as it is generated
    #[arg(long, requires = "ai_analysis")]
    stream: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    Human,
    Json,
}

impl From<ReportFormat> for OutputFormat {
    fn from(value: ReportFormat) -> Self {
        match value {
            ReportFormat::Human => OutputFormat::Human,
            ReportFormat::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Scan(args) => {
            tokio::select! {
                code = scan(config, args) => code,
                _ = tokio::signal::ctrl_c() => {
                    info!("Scan interrupted by user");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Payloads {
            scan_type,
            payloads_dir,
            json,
        } => {
            list_payloads(scan_type, payloads_dir.as_deref(), json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Models => {
            list_models(&config.ollama).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => health(&config.ollama).await,
    }
}

/// Defaults, then `OLLAMA_*` variables, then the settings file, then `RFI_SCANNER__*` variables.
fn load_config(path: Option<&Path>) -> Result<ScannerConfig> {
    let base = ScannerConfig {
        ollama: OllamaSettings::from_env(),
        ..ScannerConfig::default()
    };
    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&base).context("failed to seed default settings")?);
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("RFI_SCANNER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );
    let config: ScannerConfig = builder
        .build()
        .and_then(|settings| settings.try_deserialize())
        .with_context(|| match path {
            Some(path) => format!("failed to load settings from {}", path.display()),
            None => "failed to load settings from environment".to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

fn payload_repository(payloads_dir: Option<&Path>) -> Box<dyn PayloadRepository> {
    match payloads_dir {
        Some(dir) => Box::new(FilePayloadRepository::new(dir)),
        None => Box::new(BuiltinPayloads),
    }
}

async fn scan(mut config: ScannerConfig, args: ScanArgs) -> Result<ExitCode> {
    if let Some(concurrent) = args.concurrent {
        config.scan.max_concurrent = concurrent;
    }
    if let Some(timeout) = args.timeout {
        config.scan.timeout = timeout;
    }
    if let Some(model) = args.ollama_model.clone() {
        config.ollama.model = model;
    }
    config.validate()?;

    let targets = match (&args.url, &args.targets) {
        (Some(url), _) => vec![url.trim().to_string()],
        (None, Some(path)) => load_targets(path)?,
        (None, None) => bail!("Must specify either --targets or --url"),
    };
    if targets.is_empty() {
        bail!("No valid targets found");
    }

    let payloads = payload_repository(args.payloads_dir.as_deref())
        .load_payloads(args.scan_type)
        .await
        .with_context(|| format!("failed to load {} payloads", args.scan_type))?;
    let detector = Detector::new(config.detection.clone())?;
    let scanner = HttpScanner::new(config.scan.clone(), detector)?;

    info!(
        "Starting {} scan of {} target(s) with {} payload(s)",
        args.scan_type.as_str().to_ascii_uppercase(),
        targets.len(),
        payloads.len()
    );
    let results = scanner.scan_targets(&targets, &payloads).await;

    save_results(&args.output, &results, args.scan_type)?;
    println!(
        "{}",
        render_report(&results, args.scan_type, args.format.into())?
    );

    if args.ai_analysis {
        let mut out = analysis_writer(args.format);
        let outcome = ai_analysis(&config.ollama, &results, &args, out.as_mut()).await;
        if let Err(err) = outcome {
            warn!("AI analysis failed: {err:#}");
            writeln!(out, "AI analysis failed: {err:#}")?;
        }
    }

    let vulnerable = results.iter().filter(|r| r.vulnerable).count();
    info!("Scan completed. Found {vulnerable} vulnerable target(s).");
    Ok(if vulnerable == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Human reports share stdout with the analysis; JSON reports keep stdout parseable.
fn analysis_writer(format: ReportFormat) -> Box<dyn Write + Send> {
    match format {
        ReportFormat::Human => Box::new(io::stdout()),
        ReportFormat::Json => Box::new(io::stderr()),
    }
}

async fn ai_analysis(
    settings: &OllamaSettings,
    results: &[ScanResult],
    args: &ScanArgs,
    out: &mut (dyn Write + Send),
) -> Result<()> {
    let separator = "=".repeat(60);
    writeln!(out, "\n{separator}\nAI ANALYSIS WITH OLLAMA\n{separator}")?;

    let client = OllamaClient::new(settings)?;
    if !client.check_connection().await {
        writeln!(out, "Ollama is not running or not accessible at {}", settings.base_url())?;
        writeln!(
            out,
            "Start it with `ollama serve` or pull a model with `ollama pull {}`",
            settings.model
        )?;
        return Ok(());
    }
    writeln!(out, "Ollama is running, using model: {}", settings.model)?;

    let analyst = OllamaAnalyst::new(client);
    writeln!(out, "\nAI ANALYSIS REPORT:\n{}", "-".repeat(40))?;
    let analysis = if args.stream {
        let mut write_error: Option<io::Error> = None;
        let text = analyst
            .analyze_streaming(results, |fragment| {
                if write_error.is_none() {
                    if let Err(err) = out.write_all(fragment.as_bytes()).and_then(|_| out.flush()) {
                        write_error = Some(err);
                    }
                }
            })
            .await?;
        if let Some(err) = write_error {
            return Err(err).context("failed to write streamed analysis");
        }
        writeln!(out)?;
        text
    } else {
        let text = analyst.analyze(results).await?;
        writeln!(out, "{text}")?;
        text
    };

    let path = ai_analysis_path(&args.output);
    save_ai_analysis(&path, &settings.model, &analysis)?;
    writeln!(out, "\nAI analysis saved to: {}", path.display())?;
    Ok(())
}

async fn list_payloads(scan_type: ScanType, payloads_dir: Option<&Path>, json: bool) -> Result<()> {
    let payloads = payload_repository(payloads_dir)
        .load_payloads(scan_type)
        .await
        .with_context(|| format!("failed to load {scan_type} payloads"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&payloads)?);
        return Ok(());
    }
    println!(
        "{} {} payload(s){}",
        payloads.len(),
        scan_type.as_str().to_ascii_uppercase(),
        payloads_dir
            .map(|dir| format!(" loaded from {}", dir.display()))
            .unwrap_or_default()
    );
    for payload in payloads {
        println!("- {}", payload.value);
    }
    Ok(())
}

async fn list_models(settings: &OllamaSettings) -> Result<()> {
    let client = OllamaClient::new(settings)?;
    let models = client
        .list_models()
        .await
        .with_context(|| format!("failed to list models from {}", settings.base_url()))?;
    if models.is_empty() {
        println!("No models found. Pull one with `ollama pull {}`", settings.model);
        return Ok(());
    }
    println!("{} model(s) available at {}", models.len(), settings.base_url());
    for model in models {
        println!("- {:<32} {:>12} bytes", model.name, model.size);
    }
    Ok(())
}

async fn health(settings: &OllamaSettings) -> Result<ExitCode> {
    print!("Checking Ollama at {} ... ", settings.base_url());
    let client = OllamaClient::new(settings)?;
    if client.check_connection().await {
        println!("ok");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("unreachable");
        Ok(ExitCode::FAILURE)
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tokio=warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
