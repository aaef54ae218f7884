use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::RelayConfig;

/// Standard config file name.
const CONFIG_FILENAME: &str = "relay.toml";

/// Load config from the given path.
pub fn load_config(path: &Path) -> std::io::Result<RelayConfig> {
    let raw = std::fs::read_to_string(path)?;
    let raw = expand_env(&raw);
    toml::from_str(&raw).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to parse {}: {e}", path.display()),
        )
    })
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./relay.toml` (project-local)
/// 2. `~/.config/relay/relay.toml` (user-global)
///
/// Returns `RelayConfig::default()` if no config file is found or the file
/// fails to parse.
pub fn discover_and_load(config_dir: Option<&Path>) -> RelayConfig {
    if let Some(path) = find_config_file(config_dir) {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    RelayConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file(config_dir: Option<&Path>) -> Option<PathBuf> {
    // Explicit directory override.
    if let Some(dir) = config_dir {
        let p = dir.join(CONFIG_FILENAME);
        return p.exists().then_some(p);
    }

    // Project-local.
    let p = PathBuf::from(CONFIG_FILENAME);
    if p.exists() {
        return Some(p);
    }

    // User-global: ~/.config/relay/
    if let Some(dirs) = directories::ProjectDirs::from("", "", "relay") {
        let p = dirs.config_dir().join(CONFIG_FILENAME);
        if p.exists() {
            return Some(p);
        }
    }

    None
}

// ── Env expansion ────────────────────────────────────────────────────────────

/// Expand `${VAR}` references against the process environment before the
/// file is parsed, so values like `[auth] hs256_secret` can point at a
/// secret instead of embedding it. Unset or malformed references stay
/// literal.
fn expand_env(raw: &str) -> String {
    expand_with(raw, |name| std::env::var(name).ok())
}

/// Expansion against an arbitrary lookup, so tests need not touch the
/// process environment.
fn expand_with(raw: &str, env: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        match tail.find('}') {
            Some(end) if end > 0 => {
                let name = &tail[..end];
                match env(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                rest = &tail[end + 1..];
            },
            // No closing brace, or an empty name: keep the text as written.
            _ => {
                out.push_str("${");
                rest = tail;
            },
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn loads_partial_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[lanes]\nfast_workers = 8\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.lanes.fast_workers, 8);
        assert_eq!(cfg.lanes.fast_batch, 10);
        assert_eq!(cfg.history.retention_days, 30);
        assert_eq!(cfg.ack.timeout_ms, 5_000);
    }

    #[test]
    fn missing_dir_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = discover_and_load(Some(dir.path()));
        assert_eq!(cfg.server.port, 8787);
        assert_eq!(cfg.lanes.max_receives, 3);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        let cfg = discover_and_load(Some(dir.path()));
        assert_eq!(cfg.server.port, 8787);
    }

    #[test]
    fn expands_known_references() {
        let env = |name: &str| (name == "RELAY_SECRET").then(|| "hunter2".to_string());
        assert_eq!(
            expand_with("hs256_secret = \"${RELAY_SECRET}\"", env),
            "hs256_secret = \"hunter2\""
        );
        assert_eq!(
            expand_with("${RELAY_SECRET}${RELAY_SECRET}", env),
            "hunter2hunter2"
        );
    }

    #[test]
    fn unset_references_stay_literal() {
        let none = |_: &str| None;
        assert_eq!(expand_with("${RELAY_UNSET}", none), "${RELAY_UNSET}");
        assert_eq!(expand_with("plain text", none), "plain text");
    }

    #[test]
    fn malformed_references_stay_literal() {
        let env = |_: &str| Some("x".to_string());
        assert_eq!(expand_with("${UNCLOSED", env), "${UNCLOSED");
        assert_eq!(expand_with("${}after", env), "${}after");
        assert_eq!(expand_with("$NOT_A_REF", env), "$NOT_A_REF");
    }
}
