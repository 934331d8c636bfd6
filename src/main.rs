mod install;
mod relay;

use clap::Parser;
use dialoguer::console::style;
use dirs::home_dir;
use serde::Serialize;
use std::env;
use std::fs;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use install::{InstallEnv, InstallLocation, InstallOptions, InstallReport, TerminalPrompt};
use relay::{RendererCommand, RENDERER_FILE_NAME};

const BUNDLE_DIR_ENV: &str = "STATUSLINE_BUNDLE_DIR";
const RENDERER_ENV: &str = "STATUSLINE_RENDERER";
const LOG_ENV: &str = "STATUSLINE_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

const AFTER_HELP: &str = "\
Without a terminal on stdin the status payload is relayed to the renderer.

Examples:
  statusline --install              Interactive installation
  statusline --install --yes        Install with defaults (local)
  statusline --install --location global";

#[derive(Parser, Debug)]
#[command(
    name = "statusline",
    version,
    about = "Status line relay and installer",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Install the status line into the host settings
    #[arg(long)]
    install: bool,
    /// Skip prompts and install to the default (local) location
    #[arg(short = 'y', long)]
    yes: bool,
    /// Install location; skips the prompt
    #[arg(long, value_enum)]
    location: Option<InstallLocation>,
    /// Print the install result as JSON
    #[arg(long)]
    json: bool,
    /// Renderer executed in relay mode
    #[arg(long)]
    renderer: Option<PathBuf>,
    #[arg(long, hide = true)]
    bundle_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum StatuslineError {
    #[error("failed to launch renderer `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to forward renderer streams: {0}")]
    Forward(#[source] io::Error),
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to {action} {}: {source}", path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bundled renderer not found: {}", .0.display())]
    MissingRenderer(PathBuf),
    #[error("config error: {0}")]
    Config(String),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct ErrorDetails {
    error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl StatuslineError {
    fn details(&self) -> ErrorDetails {
        let (error_code, hint) = match self {
            Self::Spawn { source, .. } => match source.kind() {
                io::ErrorKind::NotFound => (
                    "renderer_not_found",
                    Some(format!(
                        "Verify the renderer is installed (pass --renderer or set {RENDERER_ENV}); .py renderers also need python3 on PATH (python3 --version)."
                    )),
                ),
                io::ErrorKind::PermissionDenied => (
                    "renderer_not_executable",
                    Some("Make sure the renderer file is executable (chmod +x).".to_string()),
                ),
                _ => (
                    "renderer_spawn_failed",
                    Some("Verify the renderer can be launched from this shell.".to_string()),
                ),
            },
            Self::Forward(_) => (
                "stream_forward_failed",
                Some("The host stopped reading the status line; re-run the command.".to_string()),
            ),
            Self::ConfigParse { .. } => (
                "settings_invalid_json",
                Some("Fix or remove the settings file and re-run the installer; it was left unchanged.".to_string()),
            ),
            Self::Filesystem { source, .. } => (
                "filesystem_error",
                Some(if source.kind() == io::ErrorKind::PermissionDenied {
                    "Make sure you have write permissions; for a global install, ensure ~/.claude/ is accessible.".to_string()
                } else {
                    "Check that the path is accessible and re-run the installer.".to_string()
                }),
            ),
            Self::MissingRenderer(_) => (
                "renderer_not_found",
                Some(format!(
                    "Reinstall the package, or point --bundle-dir / {BUNDLE_DIR_ENV} at the directory holding scripts/{RENDERER_FILE_NAME}."
                )),
            ),
            Self::Config(_) => ("config_error", None),
            Self::Prompt(_) => (
                "prompt_failed",
                Some("Re-run with --yes or --location to skip the prompt.".to_string()),
            ),
            Self::Json(_) => ("json_error", None),
            Self::Io(_) => ("io_error", None),
        };
        ErrorDetails {
            error_code: error_code.to_string(),
            hint,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ErrorDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Relay,
    Install,
    QuickStart,
}

fn select_mode(install: bool, stdin_is_terminal: bool) -> Mode {
    if install {
        Mode::Install
    } else if !stdin_is_terminal {
        Mode::Relay
    } else {
        Mode::QuickStart
    }
}

#[derive(Debug)]
struct Context {
    bundle_dir: PathBuf,
    renderer: PathBuf,
    json: bool,
}

fn main() -> Result<(), StatuslineError> {
    let cli = Cli::parse();
    init_tracing();
    let ctx = build_context(&cli);
    let mode = select_mode(cli.install, io::stdin().is_terminal());
    debug!(?mode, bundle_dir = %ctx.bundle_dir.display(), "starting");

    let result = match mode {
        Mode::Relay => handle_relay(&ctx),
        Mode::Install => handle_install(&ctx, &cli),
        Mode::QuickStart => {
            print_quick_start();
            Ok(0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if ctx.json && mode == Mode::Install {
                let payload = JsonResult::<serde_json::Value> {
                    ok: false,
                    result: None,
                    error: Some(err.to_string()),
                    error_details: Some(err.details()),
                };
                print_json(&payload)?;
            } else {
                eprintln!("{err}");
                if let Some(hint) = err.details().hint {
                    eprintln!("Hint: {hint}");
                }
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = match env::var(LOG_ENV) {
        Ok(value) if !value.trim().is_empty() => {
            EnvFilter::try_new(value.trim()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
        _ => EnvFilter::new(DEFAULT_LOG_FILTER),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

fn build_context(cli: &Cli) -> Context {
    let bundle_dir = resolve_bundle_dir(cli.bundle_dir.as_ref());
    let renderer = resolve_renderer(cli.renderer.as_ref(), &bundle_dir);
    Context {
        bundle_dir,
        renderer,
        json: cli.json,
    }
}

fn bundled_renderer_path(bundle_dir: &Path) -> PathBuf {
    bundle_dir
        .join(install::SCRIPTS_DIR_NAME)
        .join(RENDERER_FILE_NAME)
}

fn resolve_renderer(override_path: Option<&PathBuf>, bundle_dir: &Path) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var(RENDERER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    bundled_renderer_path(bundle_dir)
}

/// Looks for the bundled renderer next to the binary, next to the file a
/// symlinked binary points at, and next to the fully resolved binary.
fn bundle_dir_from_exe_path(exe: &Path) -> Option<PathBuf> {
    let exe_dir = exe.parent().unwrap_or_else(|| Path::new("."));
    let link_dir = fs::read_link(exe)
        .ok()
        .map(|target| exe_dir.join(target))
        .and_then(|target| target.parent().map(Path::to_path_buf));
    let real_dir = fs::canonicalize(exe)
        .ok()
        .and_then(|real| real.parent().map(Path::to_path_buf));

    [Some(exe_dir.to_path_buf()), link_dir, real_dir]
        .into_iter()
        .flatten()
        .find(|dir| bundled_renderer_path(dir).is_file())
}

fn resolve_bundle_dir(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var(BUNDLE_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(candidate) = bundle_dir_from_exe_path(&exe) {
            return candidate;
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn handle_relay(ctx: &Context) -> Result<i32, StatuslineError> {
    let renderer = RendererCommand::for_script(&ctx.renderer);
    relay::run(&renderer, io::stdin(), io::stdout(), io::stderr(), true)
}

fn handle_install(ctx: &Context, cli: &Cli) -> Result<i32, StatuslineError> {
    let interactive = !cli.yes && cli.location.is_none();
    if interactive && ctx.json {
        return Err(StatuslineError::Config(
            "--json requires `--yes` or `--location`".to_string(),
        ));
    }
    if interactive && !io::stdin().is_terminal() {
        return Err(StatuslineError::Config(
            "interactive install requires a TTY; re-run with `--yes` (local) or `--location <global|project|local>`"
                .to_string(),
        ));
    }

    let cwd = env::current_dir().map_err(|source| StatuslineError::Filesystem {
        action: "resolve working directory",
        path: PathBuf::from("."),
        source,
    })?;
    let install_env = InstallEnv {
        home: home_dir(),
        cwd,
        bundled_renderer: bundled_renderer_path(&ctx.bundle_dir),
    };
    let options = InstallOptions {
        location: cli.location,
        interactive,
    };

    if !ctx.json {
        println!("{}", style("Status line installer").bold().cyan());
        println!();
    }
    let report = install::install(&options, &install_env, &TerminalPrompt)?;

    if ctx.json {
        let payload = JsonResult {
            ok: true,
            result: Some(&report),
            error: None,
            error_details: None,
        };
        print_json(&payload)?;
    } else {
        print_install_report(&report, install_env.home.as_deref());
    }
    Ok(0)
}

fn display_path_with_home(path: &Path, home: Option<&Path>) -> String {
    if let Some(home_path) = home {
        if let Ok(relative) = path.strip_prefix(home_path) {
            if relative.as_os_str().is_empty() {
                return "~".to_string();
            }
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

fn print_install_report(report: &InstallReport, home: Option<&Path>) {
    println!("{}", style("Installation complete").bold().green());
    println!();
    println!(
        "  Location: {} ({})",
        report.location,
        report.location.description()
    );
    println!(
        "  Settings: {}{}",
        display_path_with_home(&report.settings_path, home),
        if report.created_settings { " (created)" } else { "" }
    );
    println!("  Script:   {}", display_path_with_home(&report.script_path, home));
    println!("  Command:  {}", style(&report.command).dim());
    println!();
    println!(
        "{}",
        style("Next step: restart your session so the host picks up the new status line.").yellow()
    );
}

fn print_quick_start() {
    println!("{}", style("Status line relay").bold().cyan());
    println!();
    println!("To install, run:");
    println!("  {}", style("statusline --install").bold());
    println!("Quick install with defaults (local):");
    println!("  {}", style("statusline --install --yes").bold());
    println!("For help:");
    println!("  {}", style("statusline --help").bold());
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), StatuslineError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
