//! Install mode: copy the renderer into a `.claude` directory and point the
//! host's `statusLine` setting at it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::relay::{RendererCommand, RENDERER_FILE_NAME};
use crate::StatuslineError;

pub const CONFIG_DIR_NAME: &str = ".claude";
pub const SCRIPTS_DIR_NAME: &str = "scripts";
const SETTINGS_FILE_NAME: &str = "settings.json";
const LOCAL_SETTINGS_FILE_NAME: &str = "settings.local.json";
const STATUS_LINE_KEY: &str = "statusLine";
#[cfg(unix)]
const SCRIPT_MODE: u32 = 0o755;
#[cfg(unix)]
const SETTINGS_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallLocation {
    Global,
    Project,
    #[default]
    Local,
}

impl InstallLocation {
    pub const ALL: [InstallLocation; 3] = [Self::Global, Self::Project, Self::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Local => "local",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Global => "all projects",
            Self::Project => "shared with collaborators",
            Self::Local => "personal, this project only",
        }
    }

    pub fn settings_file_name(&self) -> &'static str {
        match self {
            Self::Global | Self::Project => SETTINGS_FILE_NAME,
            Self::Local => LOCAL_SETTINGS_FILE_NAME,
        }
    }

    fn display_hint(&self) -> String {
        let dir = match self {
            Self::Global => format!("~/{CONFIG_DIR_NAME}"),
            Self::Project | Self::Local => CONFIG_DIR_NAME.to_string(),
        };
        format!("{dir}/{}", self.settings_file_name())
    }
}

impl fmt::Display for InstallLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration directory and settings file name for `location`.
pub fn config_location(location: InstallLocation, home: &Path, cwd: &Path) -> (PathBuf, &'static str) {
    let base = match location {
        InstallLocation::Global => home,
        InstallLocation::Project | InstallLocation::Local => cwd,
    };
    (base.join(CONFIG_DIR_NAME), location.settings_file_name())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub config_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub settings_path: PathBuf,
    pub script_path: PathBuf,
    /// Script path as written into the settings command: absolute for global
    /// installs, relative to the project root otherwise.
    pub command_script_path: PathBuf,
}

impl InstallPaths {
    pub fn resolve(location: InstallLocation, home: &Path, cwd: &Path) -> Self {
        let (config_dir, settings_file) = config_location(location, home, cwd);
        let scripts_dir = config_dir.join(SCRIPTS_DIR_NAME);
        let command_root = match location {
            InstallLocation::Global => config_dir.clone(),
            InstallLocation::Project | InstallLocation::Local => PathBuf::from(CONFIG_DIR_NAME),
        };
        Self {
            settings_path: config_dir.join(settings_file),
            script_path: scripts_dir.join(RENDERER_FILE_NAME),
            command_script_path: command_root.join(SCRIPTS_DIR_NAME).join(RENDERER_FILE_NAME),
            config_dir,
            scripts_dir,
        }
    }
}

/// Asks the operator where to install. Swapped for a fixed answer in tests.
pub trait LocationPrompt {
    fn select_location(&self, default: InstallLocation) -> Result<InstallLocation, StatuslineError>;
}

pub struct TerminalPrompt;

impl LocationPrompt for TerminalPrompt {
    fn select_location(&self, default: InstallLocation) -> Result<InstallLocation, StatuslineError> {
        let theme = ColorfulTheme::default();
        let items: Vec<String> = InstallLocation::ALL
            .iter()
            .map(|location| {
                format!(
                    "{:<8} {} ({})",
                    location.as_str(),
                    location.display_hint(),
                    location.description()
                )
            })
            .collect();
        let default_idx = InstallLocation::ALL
            .iter()
            .position(|location| *location == default)
            .unwrap_or(InstallLocation::ALL.len() - 1);
        let selection = Select::with_theme(&theme)
            .with_prompt("Where should the status line be installed?")
            .items(&items)
            .default(default_idx)
            .interact()?;
        Ok(InstallLocation::ALL[selection])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub location: Option<InstallLocation>,
    pub interactive: bool,
}

/// Host-dependent inputs of an install run.
#[derive(Debug, Clone)]
pub struct InstallEnv {
    pub home: Option<PathBuf>,
    pub cwd: PathBuf,
    pub bundled_renderer: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub location: InstallLocation,
    pub settings_path: PathBuf,
    pub script_path: PathBuf,
    pub command: String,
    pub created_settings: bool,
}

pub fn resolve_location<P: LocationPrompt>(
    options: &InstallOptions,
    prompt: &P,
) -> Result<InstallLocation, StatuslineError> {
    if let Some(location) = options.location {
        return Ok(location);
    }
    if options.interactive {
        return prompt.select_location(InstallLocation::default());
    }
    Ok(InstallLocation::default())
}

pub fn status_line_entry(command: &str) -> Value {
    json!({
        "type": "command",
        "command": command,
    })
}

/// Sets `statusLine` and leaves every other key untouched. An existing
/// `statusLine` keeps its position but its value is replaced as a whole.
pub fn merge_status_line(mut settings: Map<String, Value>, command: &str) -> Map<String, Value> {
    settings.insert(STATUS_LINE_KEY.to_string(), status_line_entry(command));
    settings
}

pub fn parse_settings(path: &Path, content: &[u8]) -> Result<Map<String, Value>, StatuslineError> {
    match serde_json::from_slice::<Value>(content) {
        Ok(Value::Object(settings)) => Ok(settings),
        Ok(other) => Err(StatuslineError::Config(format!(
            "settings file {} must contain a JSON object, found {}",
            path.display(),
            json_kind(&other)
        ))),
        Err(source) => Err(StatuslineError::ConfigParse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `None` when the file does not exist yet.
pub fn load_settings(path: &Path) -> Result<Option<Map<String, Value>>, StatuslineError> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StatuslineError::Filesystem {
                action: "read",
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_settings(path, &content).map(Some)
}

pub fn render_settings(settings: &Map<String, Value>) -> Result<String, StatuslineError> {
    let mut text = serde_json::to_string_pretty(settings)?;
    text.push('\n');
    Ok(text)
}

fn create_dir(path: &Path) -> Result<(), StatuslineError> {
    fs::create_dir_all(path).map_err(|source| StatuslineError::Filesystem {
        action: "create directory",
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces the settings file through a sibling temp file. A symlinked
/// settings file is written through: the link stays and its target changes.
fn write_atomic(path: &Path, content: &str) -> Result<(), StatuslineError> {
    let filesystem = |source: io::Error| StatuslineError::Filesystem {
        action: "write",
        path: path.to_path_buf(),
        source,
    };
    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(err) => return Err(filesystem(err)),
    };
    let tmp_path = temp_sibling(&target);

    fs::write(&tmp_path, content).map_err(filesystem)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&target)
            .map(|m| m.permissions().mode() & 0o7777)
            .unwrap_or(SETTINGS_MODE);
        if let Err(err) = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(filesystem(err));
        }
    }
    if let Err(err) = fs::rename(&tmp_path, &target) {
        let _ = fs::remove_file(&tmp_path);
        return Err(filesystem(err));
    }
    debug!(path = %target.display(), "settings written");
    Ok(())
}

fn temp_sibling(target: &Path) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| SETTINGS_FILE_NAME.to_string());
    target.with_file_name(format!(".{name}.{}.{millis}.tmp", std::process::id()))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn install_script(source: &Path, target: &Path) -> Result<(), StatuslineError> {
    if same_file(source, target) {
        debug!(path = %target.display(), "renderer already in place");
    } else {
        fs::copy(source, target).map_err(|source| StatuslineError::Filesystem {
            action: "copy renderer to",
            path: target.to_path_buf(),
            source,
        })?;
    }
    mark_executable(target);
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(SCRIPT_MODE)) {
        warn!(
            path = %path.display(),
            error = %err,
            "could not mark renderer executable; continuing"
        );
    }
}

#[cfg(not(unix))]
fn mark_executable(path: &Path) {
    debug!(path = %path.display(), "no executable bit on this platform");
}

fn required_home(home: Option<&Path>) -> Result<&Path, StatuslineError> {
    let home = home.ok_or_else(|| {
        StatuslineError::Config(
            "unable to resolve $HOME for a global install; set HOME to an existing directory"
                .to_string(),
        )
    })?;
    if !home.is_absolute() {
        return Err(StatuslineError::Config(format!(
            "resolved HOME path is not absolute: {}",
            home.display()
        )));
    }
    Ok(home)
}

/// Installs the renderer and points the selected settings file at it.
///
/// The existing settings file is parsed before anything is written, so a
/// malformed file aborts the run with the disk untouched. Later failures do
/// not roll back directories or the copied script.
pub fn install<P: LocationPrompt>(
    options: &InstallOptions,
    env: &InstallEnv,
    prompt: &P,
) -> Result<InstallReport, StatuslineError> {
    let location = resolve_location(options, prompt)?;
    let home = match location {
        InstallLocation::Global => required_home(env.home.as_deref())?.to_path_buf(),
        InstallLocation::Project | InstallLocation::Local => {
            env.home.clone().unwrap_or_default()
        }
    };
    let paths = InstallPaths::resolve(location, &home, &env.cwd);
    info!(%location, settings = %paths.settings_path.display(), "installing status line");

    let existing = load_settings(&paths.settings_path)?;
    if !env.bundled_renderer.is_file() {
        return Err(StatuslineError::MissingRenderer(env.bundled_renderer.clone()));
    }

    create_dir(&paths.config_dir)?;
    create_dir(&paths.scripts_dir)?;
    install_script(&env.bundled_renderer, &paths.script_path)?;

    let command = RendererCommand::for_script(&paths.command_script_path).render();
    let created_settings = existing.is_none();
    let settings = merge_status_line(existing.unwrap_or_default(), &command);
    write_atomic(&paths.settings_path, &render_settings(&settings)?)?;
    debug!(command = %command, created_settings, "settings updated");

    Ok(InstallReport {
        location,
        settings_path: paths.settings_path,
        script_path: paths.script_path,
        command,
        created_settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    struct FixedPrompt {
        answer: InstallLocation,
        calls: Cell<usize>,
    }

    impl FixedPrompt {
        fn new(answer: InstallLocation) -> Self {
            Self {
                answer,
                calls: Cell::new(0),
            }
        }
    }

    impl LocationPrompt for FixedPrompt {
        fn select_location(
            &self,
            default: InstallLocation,
        ) -> Result<InstallLocation, StatuslineError> {
            assert_eq!(default, InstallLocation::Local);
            self.calls.set(self.calls.get() + 1);
            Ok(self.answer)
        }
    }

    fn make_env(root: &Path) -> InstallEnv {
        let home = root.join("home");
        let cwd = root.join("project");
        let bundle_scripts = root.join("bundle").join(SCRIPTS_DIR_NAME);
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(&cwd).unwrap();
        fs::create_dir_all(&bundle_scripts).unwrap();
        let bundled_renderer = bundle_scripts.join(RENDERER_FILE_NAME);
        fs::write(&bundled_renderer, "#!/usr/bin/env python3\nprint('ok')\n").unwrap();
        InstallEnv {
            home: Some(home),
            cwd,
            bundled_renderer,
        }
    }

    fn non_interactive(location: InstallLocation) -> InstallOptions {
        InstallOptions {
            location: Some(location),
            interactive: false,
        }
    }

    #[test]
    fn config_location_maps_each_variant() {
        let home = Path::new("/home/dev");
        let cwd = Path::new("/work/app");
        assert_eq!(
            config_location(InstallLocation::Global, home, cwd),
            (PathBuf::from("/home/dev/.claude"), "settings.json")
        );
        assert_eq!(
            config_location(InstallLocation::Project, home, cwd),
            (PathBuf::from("/work/app/.claude"), "settings.json")
        );
        assert_eq!(
            config_location(InstallLocation::Local, home, cwd),
            (PathBuf::from("/work/app/.claude"), "settings.local.json")
        );
    }

    #[test]
    fn global_paths_use_absolute_command_path() {
        let paths = InstallPaths::resolve(
            InstallLocation::Global,
            Path::new("/home/dev"),
            Path::new("/work/app"),
        );
        assert_eq!(paths.settings_path, PathBuf::from("/home/dev/.claude/settings.json"));
        assert_eq!(
            paths.command_script_path,
            PathBuf::from("/home/dev/.claude/scripts/context-monitor.py")
        );
        assert_eq!(paths.script_path, paths.command_script_path);
    }

    #[test]
    fn project_and_local_paths_use_relative_command_path() {
        for location in [InstallLocation::Project, InstallLocation::Local] {
            let paths = InstallPaths::resolve(location, Path::new("/home/dev"), Path::new("/work/app"));
            assert!(paths.settings_path.starts_with("/work/app/.claude"));
            assert_eq!(
                paths.script_path,
                PathBuf::from("/work/app/.claude/scripts/context-monitor.py")
            );
            assert_eq!(
                paths.command_script_path,
                PathBuf::from(".claude/scripts/context-monitor.py")
            );
        }
    }

    #[test]
    fn preselected_location_skips_prompt() {
        let prompt = FixedPrompt::new(InstallLocation::Global);
        let options = InstallOptions {
            location: Some(InstallLocation::Project),
            interactive: true,
        };
        assert_eq!(resolve_location(&options, &prompt).unwrap(), InstallLocation::Project);
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn interactive_run_uses_prompt_answer() {
        let prompt = FixedPrompt::new(InstallLocation::Global);
        let options = InstallOptions {
            location: None,
            interactive: true,
        };
        assert_eq!(resolve_location(&options, &prompt).unwrap(), InstallLocation::Global);
        assert_eq!(prompt.calls.get(), 1);
    }

    #[test]
    fn non_interactive_run_defaults_to_local() {
        let prompt = FixedPrompt::new(InstallLocation::Global);
        let options = InstallOptions::default();
        assert_eq!(resolve_location(&options, &prompt).unwrap(), InstallLocation::Local);
        assert_eq!(prompt.calls.get(), 0);
    }

    #[test]
    fn merge_preserves_other_keys_and_replaces_status_line() {
        let existing = parse_settings(
            Path::new("settings.json"),
            br#"{"foo":1,"statusLine":{"type":"command","command":"old","padding":2},"permissions":{"allow":["Bash(ls)"]}}"#,
        )
        .unwrap();
        let merged = merge_status_line(existing, "python3 new.py");

        let keys: Vec<&str> = merged.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["foo", "statusLine", "permissions"]);
        assert_eq!(merged["foo"], json!(1));
        assert_eq!(merged["permissions"], json!({"allow": ["Bash(ls)"]}));
        assert_eq!(
            merged["statusLine"],
            json!({"type": "command", "command": "python3 new.py"})
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = parse_settings(Path::new("s.json"), br#"{"model":"opus"}"#).unwrap();
        let once = merge_status_line(existing, "python3 a.py");
        let twice = merge_status_line(once.clone(), "python3 a.py");
        assert_eq!(once, twice);
        assert_eq!(render_settings(&once).unwrap(), render_settings(&twice).unwrap());
    }

    #[test]
    fn render_settings_is_pretty_with_trailing_newline() {
        let settings = merge_status_line(Map::new(), "python3 a.py");
        let text = render_settings(&settings).unwrap();
        assert_eq!(
            text,
            "{\n  \"statusLine\": {\n    \"type\": \"command\",\n    \"command\": \"python3 a.py\"\n  }\n}\n"
        );
    }

    #[test]
    fn parse_settings_rejects_invalid_json() {
        let err = parse_settings(Path::new("bad.json"), b"{ not json").unwrap_err();
        assert!(matches!(err, StatuslineError::ConfigParse { .. }));
    }

    #[test]
    fn parse_settings_rejects_non_object_root() {
        let err = parse_settings(Path::new("list.json"), b"[1, 2]").unwrap_err();
        match err {
            StatuslineError::Config(message) => assert!(message.contains("an array")),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn load_settings_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(load_settings(&dir.path().join("settings.json")).unwrap().is_none());
    }

    #[test]
    fn install_local_writes_settings_and_script() {
        let dir = tempdir().unwrap();
        let env = make_env(dir.path());
        let report = install(
            &non_interactive(InstallLocation::Local),
            &env,
            &FixedPrompt::new(InstallLocation::Global),
        )
        .unwrap();

        assert_eq!(report.location, InstallLocation::Local);
        assert!(report.created_settings);
        assert_eq!(
            report.settings_path,
            env.cwd.join(".claude").join("settings.local.json")
        );
        assert_eq!(report.command, "python3 .claude/scripts/context-monitor.py");

        let settings = load_settings(&report.settings_path).unwrap().unwrap();
        assert_eq!(settings["statusLine"]["type"], json!("command"));
        assert_eq!(
            fs::read(&report.script_path).unwrap(),
            fs::read(&env.bundled_renderer).unwrap()
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&report.script_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn install_uses_prompt_when_interactive() {
        let dir = tempdir().unwrap();
        let env = make_env(dir.path());
        let prompt = FixedPrompt::new(InstallLocation::Project);
        let options = InstallOptions {
            location: None,
            interactive: true,
        };
        let report = install(&options, &env, &prompt).unwrap();
        assert_eq!(report.location, InstallLocation::Project);
        assert_eq!(report.settings_path, env.cwd.join(".claude").join("settings.json"));
        assert_eq!(prompt.calls.get(), 1);
    }

    #[test]
    fn install_global_records_absolute_script_path() {
        let dir = tempdir().unwrap();
        let env = make_env(dir.path());
        let home = env.home.clone().unwrap();
        let report = install(
            &non_interactive(InstallLocation::Global),
            &env,
            &FixedPrompt::new(InstallLocation::Local),
        )
        .unwrap();
        assert!(report.settings_path.starts_with(&home));
        assert!(report.script_path.starts_with(&home));
        assert!(report
            .command
            .contains(&report.script_path.to_string_lossy().to_string()));
    }

    #[test]
    fn install_global_without_home_fails() {
        let dir = tempdir().unwrap();
        let mut env = make_env(dir.path());
        env.home = None;
        let err = install(
            &non_interactive(InstallLocation::Global),
            &env,
            &FixedPrompt::new(InstallLocation::Local),
        )
        .unwrap_err();
        assert!(err.to_string().contains("HOME"));
    }

    #[test]
    fn install_twice_yields_identical_file() {
        let dir = tempdir().unwrap();
        let env = make_env(dir.path());
        let settings_dir = env.cwd.join(".claude");
        fs::create_dir_all(&settings_dir).unwrap();
        fs::write(
            settings_dir.join("settings.json"),
            "{\"foo\": 1, \"statusLine\": {\"type\": \"command\", \"command\": \"old\"}}",
        )
        .unwrap();

        let prompt = FixedPrompt::new(InstallLocation::Local);
        let first = install(&non_interactive(InstallLocation::Project), &env, &prompt).unwrap();
        assert!(!first.created_settings);
        let after_first = fs::read_to_string(&first.settings_path).unwrap();
        install(&non_interactive(InstallLocation::Project), &env, &prompt).unwrap();
        let after_second = fs::read_to_string(&first.settings_path).unwrap();

        assert_eq!(after_first, after_second);
        let value: Value = serde_json::from_str(&after_second).unwrap();
        assert_eq!(
            value,
            json!({
                "foo": 1,
                "statusLine": {"type": "command", "command": "python3 .claude/scripts/context-monitor.py"}
            })
        );
    }

    #[test]
    fn invalid_settings_abort_before_touching_disk() {
        let dir = tempdir().unwrap();
        let env = make_env(dir.path());
        let settings_dir = env.cwd.join(".claude");
        fs::create_dir_all(&settings_dir).unwrap();
        let settings_path = settings_dir.join("settings.local.json");
        fs::write(&settings_path, "{ \"foo\": ").unwrap();

        let err = install(
            &non_interactive(InstallLocation::Local),
            &env,
            &FixedPrompt::new(InstallLocation::Local),
        )
        .unwrap_err();
        assert!(matches!(err, StatuslineError::ConfigParse { .. }));
        assert_eq!(fs::read_to_string(&settings_path).unwrap(), "{ \"foo\": ");
        assert!(!settings_dir.join(SCRIPTS_DIR_NAME).exists());
    }

    #[test]
    fn missing_bundled_renderer_is_reported() {
        let dir = tempdir().unwrap();
        let mut env = make_env(dir.path());
        env.bundled_renderer = dir.path().join("nowhere").join(RENDERER_FILE_NAME);
        let err = install(
            &non_interactive(InstallLocation::Local),
            &env,
            &FixedPrompt::new(InstallLocation::Local),
        )
        .unwrap_err();
        assert!(matches!(err, StatuslineError::MissingRenderer(_)));
        assert!(!env.cwd.join(".claude").exists());
    }

    #[test]
    fn reinstalling_from_installed_copy_keeps_script_intact() {
        let dir = tempdir().unwrap();
        let mut env = make_env(dir.path());
        let first = install(
            &non_interactive(InstallLocation::Local),
            &env,
            &FixedPrompt::new(InstallLocation::Local),
        )
        .unwrap();
        let original = fs::read(&first.script_path).unwrap();

        env.bundled_renderer = first.script_path.clone();
        install(
            &non_interactive(InstallLocation::Local),
            &env,
            &FixedPrompt::new(InstallLocation::Local),
        )
        .unwrap();
        assert_eq!(fs::read(&first.script_path).unwrap(), original);
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_keeps_existing_settings_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{}\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        write_atomic(&path, "{\"a\": 1}\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\": 1}\n");
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o600);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_goes_through_symlinked_settings() {
        use std::os::unix::fs::symlink;
        let dir = tempdir().unwrap();
        let dotfiles = dir.path().join("dotfiles");
        fs::create_dir_all(&dotfiles).unwrap();
        let real = dotfiles.join("claude-settings.json");
        fs::write(&real, "{\"foo\": 1}\n").unwrap();
        let link = dir.path().join("settings.json");
        symlink(&real, &link).unwrap();

        write_atomic(&link, "{\"foo\": 2}\n").unwrap();
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real).unwrap(), "{\"foo\": 2}\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        assert_eq!(fs::read_dir(&dotfiles).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn install_keeps_symlinked_settings_file() {
        use std::os::unix::fs::symlink;
        let dir = tempdir().unwrap();
        let env = make_env(dir.path());
        let real = dir.path().join("shared-settings.json");
        fs::write(&real, "{\"theme\": \"dark\"}").unwrap();
        let config_dir = env.cwd.join(CONFIG_DIR_NAME);
        fs::create_dir_all(&config_dir).unwrap();
        let link = config_dir.join(SETTINGS_FILE_NAME);
        symlink(&real, &link).unwrap();

        let prompt = FixedPrompt::new(InstallLocation::Local);
        install(&non_interactive(InstallLocation::Project), &env, &prompt).unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let settings: Value = serde_json::from_str(&fs::read_to_string(&real).unwrap()).unwrap();
        assert_eq!(settings["theme"], "dark");
        assert_eq!(
            settings["statusLine"]["command"],
            "python3 .claude/scripts/context-monitor.py"
        );
    }
}
