//! Locating external tool binaries.
//!
//! Resolution order: environment variable, then the `[tools]` config entry,
//! then a `PATH` search. An explicit path that does not exist is an error
//! rather than a silent fallback to `PATH`.

use std::path::{Path, PathBuf};

use crate::config::env_var;
use crate::error::{Error, Result};
use crate::paths::expand_user;

/// A tool the pipeline depends on.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    /// Executable name searched on `PATH`.
    pub exe: &'static str,
    pub env_var: &'static str,
    /// Key under `[tools]` in the config file.
    pub config_key: &'static str,
}

pub const YTDLP: ToolSpec = ToolSpec {
    exe: "yt-dlp",
    env_var: "ONDL_YTDLP",
    config_key: "ytdlp",
};

pub const FFMPEG: ToolSpec = ToolSpec {
    exe: "ffmpeg",
    env_var: "ONDL_FFMPEG",
    config_key: "ffmpeg",
};

pub const FFPROBE: ToolSpec = ToolSpec {
    exe: "ffprobe",
    env_var: "ONDL_FFPROBE",
    config_key: "ffprobe",
};

/// Find `spec`, consulting its env var, then `config_value`, then `PATH`.
pub fn resolve_tool(spec: ToolSpec, config_value: &str) -> Result<PathBuf> {
    if let Some(override_path) = env_var(spec.env_var) {
        return existing(spec, &override_path, spec.env_var);
    }

    let config_value = config_value.trim();
    if !config_value.is_empty() {
        return existing(spec, config_value, &format!("[tools].{}", spec.config_key));
    }

    std::env::var_os("PATH")
        .and_then(|path| find_on_path(spec.exe, &path))
        .ok_or_else(|| {
            Error::Config(format!(
                "required tool '{}' not found on PATH; set {} or [tools].{}",
                spec.exe, spec.env_var, spec.config_key
            ))
        })
}

fn existing(spec: ToolSpec, raw: &str, source: &str) -> Result<PathBuf> {
    let path = expand_user(raw);
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!(
            "configured tool path for '{}' not found via {source}: {}",
            spec.exe,
            path.display()
        )))
    }
}

/// First executable file named `exe` in a `PATH`-style list.
pub fn find_on_path(exe: &str, path: &std::ffi::OsStr) -> Option<PathBuf> {
    let names: Vec<String> = if cfg!(windows) {
        vec![format!("{exe}.exe"), exe.to_string()]
    } else {
        vec![exe.to_string()]
    };

    std::env::split_paths(path)
        .flat_map(|dir| names.iter().map(move |n| dir.join(n)))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
