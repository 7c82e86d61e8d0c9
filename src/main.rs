// NetSleuth - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. config.toml loading and logging initialisation (debug mode support)
// 3. Platform profile and template store loading (built-in + user-defined)
// 4. Dispatch to parse / batch / detect / templates

use clap::{Parser as ClapParser, Subcommand, ValueEnum};
use netsleuth::app::batch::{self, BatchOptions};
use netsleuth::app::parser::{Parser, ParserOptions};
use netsleuth::app::sink::{JsonFileSink, ResultSink};
use netsleuth::app::{profile_mgr, template_mgr};
use netsleuth::core::aggregate::ViewKind;
use netsleuth::core::discovery::DiscoveryConfig;
use netsleuth::core::export;
use netsleuth::core::model::{DeviceReport, ParseHint, ParseResult};
use netsleuth::core::selector::TieBreak;
use netsleuth::core::store::TemplateStore;
use netsleuth::platform::config::{self, AppConfig, PlatformPaths};
use netsleuth::util::error::{ExportError, NetSleuthError, Result};
use netsleuth::util::{constants, logging};
use std::io::Write;
use std::path::{Path, PathBuf};

/// NetSleuth - parse network device command captures into structured records.
///
/// Detects the device platform and command from the capture, runs the
/// matching TextFSM-style template and aggregates the results into CPU and
/// memory, inventory, interface and summary views.
#[derive(ClapParser, Debug)]
#[command(name = "netsleuth", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration directory (default: platform config directory).
    #[arg(long = "config-dir", global = true)]
    config_dir: Option<PathBuf>,

    /// Additional directory of user templates (overrides config).
    #[arg(short = 't', long = "template-dir", global = true)]
    template_dir: Option<PathBuf>,

    /// Additional directory of user platform profiles (overrides config).
    #[arg(short = 'p', long = "platform-dir", global = true)]
    platform_dir: Option<PathBuf>,

    /// Lines inspected for platform signatures and the command line.
    #[arg(long = "scan-lines", global = true)]
    scan_lines: Option<usize>,

    /// How competing platform matches are resolved.
    #[arg(long = "tie-break", global = true)]
    tie_break: Option<TieBreak>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse one capture file.
    Parse {
        file: PathBuf,

        /// Platform id; skips signature detection.
        #[arg(long)]
        platform: Option<String>,

        /// Command; restricts parsing to that command's section.
        #[arg(long)]
        command: Option<String>,

        /// Print only one aggregated view.
        #[arg(long)]
        view: Option<ViewKind>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse every capture under a directory.
    Batch {
        dir: PathBuf,

        /// Platform id applied to every capture.
        #[arg(long)]
        platform: Option<String>,

        /// Worker threads (0 = number of CPUs).
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        #[arg(long = "max-files")]
        max_files: Option<usize>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show which platform and command a capture resolves to.
    Detect { file: PathBuf },

    /// List the available templates and check that each compiles.
    Templates,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() {
    let cli = Cli::parse();

    let paths = match &cli.config_dir {
        Some(dir) => PlatformPaths::under(dir.clone()),
        None => PlatformPaths::resolve(),
    };
    let (mut app_config, config_warnings) = config::load_config(&paths.config_file());

    logging::init(
        cli.debug,
        app_config.log_level.as_deref(),
        app_config.log_file.as_deref(),
    );
    for warning in &config_warnings {
        tracing::warn!(warning = %warning, "Config warning");
    }

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "NetSleuth starting"
    );

    apply_overrides(&cli, &mut app_config);

    let code = match run(&cli, &paths, &app_config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            1
        }
    };
    std::process::exit(code);
}

/// CLI flags take precedence over config.toml.
fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if let Some(lines) = cli.scan_lines {
        config.scan_lines = lines.clamp(
            constants::MIN_DETECTION_SCAN_LINES,
            constants::MAX_DETECTION_SCAN_LINES,
        );
    }
    if let Some(tie_break) = cli.tie_break {
        config.tie_break = tie_break.to_string();
    }
    if let Command::Batch {
        concurrency,
        max_files,
        ..
    } = &cli.command
    {
        if let Some(n) = concurrency {
            config.max_concurrency = (*n).min(constants::ABSOLUTE_MAX_CONCURRENCY);
        }
        if let Some(n) = max_files {
            config.max_files = (*n).clamp(constants::MIN_MAX_FILES, constants::ABSOLUTE_MAX_FILES);
        }
    }
}

fn build_parser(cli: &Cli, paths: &PlatformPaths, config: &AppConfig) -> Parser {
    let platform_dir = cli
        .platform_dir
        .as_deref()
        .or(config.user_platform_dir.as_deref())
        .unwrap_or(paths.user_platforms_dir.as_path());
    let (profiles, profile_errors) = profile_mgr::load_all_profiles(Some(platform_dir));
    if !profile_errors.is_empty() {
        eprintln!(
            "Warning: {} platform profile(s) skipped; run with --debug for details",
            profile_errors.len()
        );
    }

    let template_dir = cli
        .template_dir
        .as_deref()
        .or(config.user_template_dir.as_deref())
        .unwrap_or(paths.user_templates_dir.as_path());
    let store = template_mgr::build_template_store(Some(template_dir), &profiles);

    Parser::new(profiles, Box::new(store), ParserOptions::from_config(config))
}

fn run(cli: &Cli, paths: &PlatformPaths, config: &AppConfig) -> Result<i32> {
    let parser = build_parser(cli, paths, config);

    match &cli.command {
        Command::Parse {
            file,
            platform,
            command,
            view,
            format,
            output,
        } => {
            let hint = ParseHint {
                platform: platform.clone(),
                command: command.clone(),
            };
            let report = batch::parse_file(&parser, file, &hint)?;
            for warning in &report.warnings {
                eprintln!("Warning: {warning}");
            }
            match (view, format) {
                (Some(kind), _) => {
                    let view = parser.aggregator().aggregate(&report.results, *kind);
                    write_output(output.as_deref(), |w| {
                        serde_json::to_writer_pretty(&mut *w, &view).map_err(|e| {
                            NetSleuthError::Export(ExportError::Json {
                                path: output_label(output.as_deref()),
                                source: e,
                            })
                        })?;
                        writeln!(w).map_err(|e| io_error(output.as_deref(), e))
                    })?;
                }
                (None, OutputFormat::Csv) => write_csv(&[&report], output.as_deref())?,
                (None, OutputFormat::Json) => write_reports(&[report], output.as_deref())?,
            }
            Ok(0)
        }

        Command::Batch {
            dir,
            platform,
            format,
            output,
            ..
        } => {
            let options = BatchOptions {
                discovery: DiscoveryConfig {
                    max_depth: config.max_depth,
                    max_files: config.max_files,
                    include_patterns: config.include_patterns.clone(),
                    exclude_patterns: config.exclude_patterns.clone(),
                },
                max_concurrency: config.max_concurrency,
                hint: ParseHint {
                    platform: platform.clone(),
                    command: None,
                },
            };
            let outcome = batch::run_batch(&parser, dir, &options)?;
            for warning in &outcome.warnings {
                eprintln!("Warning: {warning}");
            }
            for failure in &outcome.failures {
                eprintln!("Failed: {}: {}", failure.path.display(), failure.error);
            }
            match format {
                OutputFormat::Csv => {
                    let refs: Vec<&DeviceReport> = outcome.reports.iter().collect();
                    write_csv(&refs, output.as_deref())?;
                }
                OutputFormat::Json => write_reports(&outcome.reports, output.as_deref())?,
            }
            eprintln!(
                "Parsed {} of {} capture(s)",
                outcome.reports.len(),
                outcome.total_found
            );
            Ok(if outcome.failures.is_empty() { 0 } else { 2 })
        }

        Command::Detect { file } => {
            let text =
                netsleuth::platform::fs::read_capture(file).map_err(|source| NetSleuthError::Io {
                    path: file.clone(),
                    operation: "read capture",
                    source,
                })?;
            let candidates = parser.selector().candidates(&text);
            if candidates.is_empty() {
                println!("no platform signature matched");
            }
            for m in &candidates {
                println!(
                    "candidate {:<16} anchored={} matched_len={}",
                    m.profile.id, m.specificity.anchored, m.specificity.matched_len
                );
            }
            let selection = parser.selector().select(&text, &ParseHint::none())?;
            println!("platform  {}", selection.platform);
            println!("command   {}", selection.command);
            println!("template  {}", selection.key);
            Ok(0)
        }

        Command::Templates => {
            for key in parser.store().keys() {
                println!("{key}");
            }
            let failures = parser.warm_cache();
            for (key, error) in &failures {
                eprintln!("Broken template {key}: {error}");
            }
            Ok(if failures.is_empty() { 0 } else { 2 })
        }
    }
}

fn output_label(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("<stdout>"))
}

fn io_error(path: Option<&Path>, source: std::io::Error) -> NetSleuthError {
    NetSleuthError::Io {
        path: output_label(path),
        operation: "write output",
        source,
    }
}

/// Run `body` against the output file or locked stdout.
fn write_output(
    path: Option<&Path>,
    body: impl FnOnce(&mut dyn Write) -> Result<()>,
) -> Result<()> {
    match path {
        Some(p) => {
            let file = std::fs::File::create(p).map_err(|e| io_error(Some(p), e))?;
            let mut writer = std::io::BufWriter::new(file);
            body(&mut writer)?;
            writer.flush().map_err(|e| io_error(Some(p), e))
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            body(&mut lock)?;
            lock.flush().map_err(|e| io_error(None, e))
        }
    }
}

fn write_reports(reports: &[DeviceReport], path: Option<&Path>) -> Result<()> {
    if let Some(p) = path {
        let handle = JsonFileSink::new(p).persist(reports)?;
        eprintln!("Wrote {} report(s) to {}", handle.reports, handle.location);
        return Ok(());
    }
    let label = output_label(None);
    write_output(None, |w| {
        export::export_json(reports, &mut *w, &label)?;
        writeln!(w).map_err(|e| io_error(None, e))
    })
}

fn write_csv(reports: &[&DeviceReport], path: Option<&Path>) -> Result<()> {
    let results: Vec<&ParseResult> = reports.iter().flat_map(|r| r.results.iter()).collect();
    let label = output_label(path);
    write_output(path, |w| {
        export::export_csv(&results, w, &label)?;
        Ok(())
    })
}
