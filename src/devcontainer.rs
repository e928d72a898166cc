//! Build descriptor (`devcontainer.json`) discovery and parsing.
//!
//! The descriptor is JSON with comments. Only the keys that shape a sandbox
//! container are read: forwarded ports, the image source and the workspace
//! folder.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sandbox::{ConfigError, ImageSource};

/// Descriptor locations relative to a project root, in order of preference.
pub(crate) const DESCRIPTOR_PATHS: &[&str] =
    &[".devcontainer/devcontainer.json", ".devcontainer.json"];

/// Workspace folder when the descriptor does not name one.
pub(crate) const DEFAULT_WORKSPACE_FOLDER: &str = "/workspaces/project";

/// Agent instructions looked up next to the descriptor.
const AGENTS_FILE: &str = "AGENTS.md";

/// Find the nearest directory at or above `start` that has a descriptor.
///
/// Returns the project root and the descriptor path.
pub(crate) fn find_project_root(start: &Path) -> Option<(PathBuf, PathBuf)> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start.ancestors().find_map(|dir| {
        DESCRIPTOR_PATHS
            .iter()
            .map(|relative| dir.join(relative))
            .find(|candidate| candidate.is_file())
            .map(|descriptor| (dir.to_path_buf(), descriptor))
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    #[serde(default)]
    forward_ports: Vec<serde_json::Value>,
    #[serde(default)]
    build: Option<RawBuild>,
    #[serde(default)]
    docker_file: Option<String>,
    #[serde(default, rename = "dockerfile")]
    dockerfile_lower: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    workspace_folder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBuild {
    #[serde(default)]
    context: Option<String>,
    #[serde(default)]
    dockerfile: Option<String>,
}

/// A parsed build descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Descriptor {
    /// Path of the descriptor file.
    pub path: PathBuf,
    /// Container ports to publish, in declaration order.
    pub forward_ports: Vec<u16>,
    /// Image to build or use, if the descriptor names one.
    pub image_source: Option<ImageSource>,
    /// Working directory inside the container.
    pub workspace_folder: String,
}

impl Descriptor {
    /// Read and parse a descriptor file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::InvalidDescriptor {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(path, &content)
    }

    /// Parse descriptor content; relative paths resolve against `path`'s directory.
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let raw: RawDescriptor = serde_json::from_str(&strip_jsonc(content)).map_err(|e| {
            ConfigError::InvalidDescriptor {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let forward_ports = raw.forward_ports.iter().filter_map(parse_port).collect();
        let image_source = resolve_image_source(dir, &raw);
        let workspace_folder = raw
            .workspace_folder
            .filter(|folder| !folder.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKSPACE_FOLDER.to_string());

        Ok(Self {
            path: path.to_path_buf(),
            forward_ports,
            image_source,
            workspace_folder,
        })
    }

    /// Directory holding the descriptor.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// `AGENTS.md` next to the descriptor.
    pub fn agents_file(&self) -> PathBuf {
        self.dir().join(AGENTS_FILE)
    }
}

/// A forwarded port: an integer or a numeric string.
fn parse_port(value: &serde_json::Value) -> Option<u16> {
    let port = match value {
        serde_json::Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        serde_json::Value::String(s) => s.trim().parse::<u16>().ok()?,
        _ => return None,
    };
    (port != 0).then_some(port)
}

fn resolve_image_source(dir: &Path, raw: &RawDescriptor) -> Option<ImageSource> {
    if let Some(build) = raw
        .build
        .as_ref()
        .filter(|b| b.context.is_some() || b.dockerfile.is_some())
    {
        let context = build.context.as_deref().unwrap_or(".");
        let dockerfile = build.dockerfile.as_deref().unwrap_or("Dockerfile");
        return Some(ImageSource::Build {
            context: resolve(dir, context),
            dockerfile: resolve(dir, dockerfile),
        });
    }

    if let Some(dockerfile) = raw.docker_file.as_ref().or(raw.dockerfile_lower.as_ref()) {
        return Some(ImageSource::Build {
            context: resolve(dir, "."),
            dockerfile: resolve(dir, dockerfile),
        });
    }

    if let Some(image) = raw.image.as_ref().filter(|i| !i.is_empty()) {
        return Some(ImageSource::Image(image.clone()));
    }

    let fallback = dir.join("Dockerfile");
    fallback.is_file().then(|| ImageSource::Build {
        context: resolve(dir, "."),
        dockerfile: resolve(dir, "Dockerfile"),
    })
}

/// Join `relative` onto `dir`, canonicalizing when the path exists.
fn resolve(dir: &Path, relative: &str) -> PathBuf {
    let joined = dir.join(relative);
    joined.canonicalize().unwrap_or(joined)
}

/// Remove `//` and `/* */` comments and trailing commas outside strings.
///
/// Newlines inside comments are kept so parse errors report the right line.
fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }

    remove_trailing_commas(&out)
}

fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if !matches!(next, Some('}' | ']')) {
                out.push(c);
            }
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}
