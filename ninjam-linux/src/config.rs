//! Load config from file, environment and command line.

use serde::Deserialize;
use std::path::PathBuf;

/// Client configuration. File: ~/.config/ninjam/config.toml or /etc/ninjam/config.toml.
/// Env overrides: NINJAM_HOST, NINJAM_USER, NINJAM_PASSWORD, NINJAM_ANONYMOUS,
/// NINJAM_AUTOSUBSCRIBE, NINJAM_ACCEPT_LICENSE, NINJAM_CAPTURE_DIR.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server as `hostname:port`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Log in as `anonymous:<username>` (default true).
    #[serde(default = "default_true")]
    pub anonymous: bool,
    /// Subscribe to every new remote channel (default true).
    #[serde(default = "default_true")]
    pub autosubscribe: bool,
    /// Agree to the server license without asking (default false).
    #[serde(default)]
    pub accept_license: bool,
    /// Local channel names announced to the server.
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    /// If set, every received interval is written here as an .ogg file.
    #[serde(default)]
    pub capture_dir: Option<PathBuf>,
}

fn default_username() -> String {
    "listener".to_string()
}
fn default_true() -> bool {
    true
}
fn default_channels() -> Vec<String> {
    vec!["default".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: None,
            username: default_username(),
            password: String::new(),
            anonymous: true,
            autosubscribe: true,
            accept_license: false,
            channels: default_channels(),
            capture_dir: None,
        }
    }
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Load config: merge default, then config file (if present), then env vars, then CLI flags.
pub fn load(cli: &CliOverrides) -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |name| std::env::var(name).ok());
    apply_cli(&mut c, cli);
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("NINJAM_HOST") {
        c.host = Some(s);
    }
    if let Some(s) = var("NINJAM_USER") {
        c.username = s;
    }
    if let Some(s) = var("NINJAM_PASSWORD") {
        c.password = s;
    }
    if let Some(b) = var("NINJAM_ANONYMOUS").and_then(|s| parse_bool(&s)) {
        c.anonymous = b;
    }
    if let Some(b) = var("NINJAM_AUTOSUBSCRIBE").and_then(|s| parse_bool(&s)) {
        c.autosubscribe = b;
    }
    if let Some(b) = var("NINJAM_ACCEPT_LICENSE").and_then(|s| parse_bool(&s)) {
        c.accept_license = b;
    }
    if let Some(s) = var("NINJAM_CAPTURE_DIR") {
        c.capture_dir = Some(PathBuf::from(s));
    }
}

fn apply_cli(c: &mut Config, cli: &CliOverrides) {
    if let Some(h) = &cli.host {
        c.host = Some(h.clone());
    }
    if let Some(u) = &cli.username {
        c.username = u.clone();
    }
    if let Some(p) = &cli.password {
        c.password = p.clone();
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/ninjam/config.toml"));
    }
    out.push(PathBuf::from("/etc/ninjam/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!("ignoring {}: {}", p.display(), e),
                },
                Err(e) => tracing::warn!("cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}
