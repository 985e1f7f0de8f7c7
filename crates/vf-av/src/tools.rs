//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of ffmpeg and
//! ffprobe and provides lookup methods for the rest of the crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Known tool names that the registry manages.
pub const KNOWN_TOOLS: &[&str] = &["ffmpeg", "ffprobe"];

/// Resolved location of a single external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of `-version` output, if available.
    pub version: Option<String>,
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// A configured path is used when it exists; otherwise [`which::which`]
    /// locates the tool. Tools that are not found are omitted.
    pub fn discover(tools_config: &vf_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                "ffmpeg" => tools_config.ffmpeg_path.as_deref(),
                "ffprobe" => tools_config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(tool = name, path = %p.display(), "configured tool path does not exist; searching PATH");
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = name, path = %path.display(), "tool discovered");
                    tools.insert(
                        name.to_string(),
                        ToolConfig {
                            name: name.to_string(),
                            path,
                        },
                    );
                }
                None => tracing::debug!(tool = name, "tool not found"),
            }
        }

        Self { tools }
    }

    /// Build a registry from explicit paths, bypassing discovery.
    pub fn with_paths(paths: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        let tools = paths
            .into_iter()
            .map(|(name, path)| (name.clone(), ToolConfig { name, path }))
            .collect();
        Self { tools }
    }

    /// Return the [`ToolConfig`] for the given tool, or a
    /// [`vf_core::Error::Tool`] if the tool was not found during discovery.
    pub fn require(&self, name: &str) -> vf_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            vf_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(cfg) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(&cfg.path),
                    path: Some(cfg.path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}
