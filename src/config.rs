//! User and project settings.
//!
//! Settings live in `~/.agent-sandbox.toml` and in an `agent-sandbox.toml`
//! (or `.agent-sandbox.toml`) found at or above the working directory. The
//! project file replaces user tables key by key at the top level.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::sandbox::BindMount;

/// User settings file name, in the home directory.
const USER_CONFIG_FILE: &str = ".agent-sandbox.toml";

/// Project settings file names, in order of preference.
const PROJECT_CONFIG_FILES: &[&str] = &["agent-sandbox.toml", ".agent-sandbox.toml"];

/// Shell used when nothing is configured.
pub(crate) const DEFAULT_SHELL: &str = "/bin/bash";

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Settings {
    /// Lowest-priority default shell.
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub sandbox: SandboxSettings,

    #[serde(default)]
    pub defaults: DefaultsSettings,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub files: FileSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SandboxSettings {
    /// Shell for `connect` when none is given.
    #[serde(default)]
    pub default_shell: Option<String>,

    /// Commands run before the shell starts, chained with `&&`
    #[serde(default)]
    pub shell_init: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DefaultsSettings {
    #[serde(default)]
    pub shell: Option<String>,
}

/// Commit identity set in every new sandbox clone.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GitSettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct FileSettings {
    /// Extra bind mounts as `source:dest[:ro|rw]`.
    #[serde(default)]
    pub mounts: Vec<String>,
}

impl Settings {
    /// Load user settings and the nearest project settings above `start`.
    pub fn load(start: &Path) -> Result<Self> {
        let user = dirs::home_dir().map(|home| home.join(USER_CONFIG_FILE));
        Self::load_from(user.as_deref(), start)
    }

    /// Load with an explicit user settings path.
    pub fn load_from(user: Option<&Path>, start: &Path) -> Result<Self> {
        let mut merged = toml::Table::new();

        if let Some(path) = user.filter(|p| p.is_file()) {
            merged = read_table(path)?;
        }
        if let Some(path) = find_project_config(start) {
            merged.extend(read_table(&path)?);
        }

        toml::Value::Table(merged)
            .try_into()
            .context("Invalid agent-sandbox settings")
    }

    /// Configured shell: `[sandbox].default_shell`, then `[defaults].shell`,
    /// then top-level `shell`.
    pub fn default_shell(&self) -> Option<&str> {
        self.sandbox
            .default_shell
            .as_deref()
            .or(self.defaults.shell.as_deref())
            .or(self.shell.as_deref())
    }

    /// Configured bind mounts with sources resolved against `project_root`.
    ///
    /// Malformed entries are skipped with a warning.
    pub fn mounts(&self, project_root: &Path) -> Vec<BindMount> {
        self.files
            .mounts
            .iter()
            .filter_map(|entry| match parse_mount(entry, project_root) {
                Ok(mount) => Some(mount),
                Err(e) => {
                    warn!("Ignoring mount '{}': {e:#}", entry);
                    None
                }
            })
            .collect()
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    debug!("Loading settings from {}", path.display());
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn find_project_config(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start.ancestors().find_map(|dir| {
        PROJECT_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Parse `source:dest[:ro|rw]`.
fn parse_mount(entry: &str, project_root: &Path) -> Result<BindMount> {
    let (source, rest) = entry
        .split_once(':')
        .context("expected source:dest")?;

    let (target, readonly) = match rest.rsplit_once(':') {
        Some((target, "ro")) => (target, true),
        Some((target, "rw")) => (target, false),
        _ => (rest, false),
    };

    anyhow::ensure!(!source.is_empty(), "empty source");
    anyhow::ensure!(
        target.starts_with('/'),
        "destination must be an absolute container path"
    );

    let source = expand_home(source)?;
    let source = if source.is_absolute() {
        source
    } else {
        project_root.join(source)
    };
    let source = source.canonicalize().unwrap_or(source);

    Ok(BindMount {
        source,
        target: target.to_string(),
        readonly,
    })
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return dirs::home_dir().context("Could not determine home directory");
    }
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir().context("Could not determine home directory")?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.default_shell(), None);
        assert!(settings.sandbox.shell_init.is_empty());
        assert!(settings.files.mounts.is_empty());
    }

    #[test]
    fn test_shell_priority() {
        let settings: Settings = toml::from_str(
            r#"
shell = "/bin/sh"

[defaults]
shell = "/bin/zsh"

[sandbox]
default_shell = "/usr/bin/fish"
"#,
        )
        .unwrap();
        assert_eq!(settings.default_shell(), Some("/usr/bin/fish"));

        let settings: Settings = toml::from_str(
            r#"
shell = "/bin/sh"

[defaults]
shell = "/bin/zsh"
"#,
        )
        .unwrap();
        assert_eq!(settings.default_shell(), Some("/bin/zsh"));

        let settings: Settings = toml::from_str(r#"shell = "/bin/sh""#).unwrap();
        assert_eq!(settings.default_shell(), Some("/bin/sh"));
    }

    #[test]
    fn test_project_overrides_user_per_table() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        fs::write(
            &user,
            r#"
[git]
name = "User Name"
email = "user@example.com"

[sandbox]
default_shell = "/bin/zsh"
"#,
        )
        .unwrap();

        let project = dir.path().join("project");
        let nested = project.join("src");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            project.join("agent-sandbox.toml"),
            r#"
[git]
name = "Project Bot"
"#,
        )
        .unwrap();

        let settings = Settings::load_from(Some(user.as_path()), &nested).unwrap();

        assert_eq!(settings.git.name.as_deref(), Some("Project Bot"));
        // Top-level merge: the project [git] table replaces the user one.
        assert_eq!(settings.git.email, None);
        assert_eq!(settings.default_shell(), Some("/bin/zsh"));
    }

    #[test]
    fn test_hidden_project_file() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".agent-sandbox.toml"),
            "[sandbox]\nshell_init = [\"source ~/.profile\"]\n",
        )
        .unwrap();

        let settings = Settings::load_from(None, dir.path()).unwrap();
        assert_eq!(settings.sandbox.shell_init, ["source ~/.profile"]);
    }

    #[test]
    fn test_invalid_settings_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("agent-sandbox.toml"), "[git\nname = ").unwrap();

        let err = Settings::load_from(None, dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_wrong_type_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("agent-sandbox.toml"), "[files]\nmounts = 3\n").unwrap();

        assert!(Settings::load_from(None, dir.path()).is_err());
    }

    #[test]
    fn test_parse_mount_modes() {
        let root = Path::new("/nonexistent-project");

        let mount = parse_mount("/etc/hosts:/etc/hosts:ro", root).unwrap();
        assert!(mount.readonly);
        assert_eq!(mount.target, "/etc/hosts");

        let mount = parse_mount("data:/data", root).unwrap();
        assert!(!mount.readonly);
        assert_eq!(mount.source, root.join("data"));
        assert_eq!(mount.target, "/data");

        let mount = parse_mount("/srv/x:/x:rw", root).unwrap();
        assert!(!mount.readonly);
        assert_eq!(mount.target, "/x");
    }

    #[test]
    fn test_parse_mount_expands_home() {
        let Some(home) = dirs::home_dir() else { return };
        let mount = parse_mount("~/.nonexistent-agent-sandbox:/cfg", Path::new("/p")).unwrap();
        assert_eq!(mount.source, home.join(".nonexistent-agent-sandbox"));
    }

    #[test]
    fn test_malformed_mounts_are_skipped() {
        let settings = Settings {
            files: FileSettings {
                mounts: vec![
                    "no-colon".to_string(),
                    ":/empty-source".to_string(),
                    "src:relative-dest".to_string(),
                    "/a:/b".to_string(),
                ],
            },
            ..Settings::default()
        };
        let mounts = settings.mounts(Path::new("/p"));
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].target, "/b");
    }
}
