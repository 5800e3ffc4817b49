//! Container environment computation
//!
//! Plain and config-backed variables are passed inline (`--env NAME=value`).
//! Secret-backed variables only put their name in argv (`--env NAME`); the
//! value travels through the engine process environment so it never shows up
//! in process listings or logs.
//!
//! Secret and config declarations are `NAME=<object>/<key>`, or
//! `<object>/*` to import every key of the object under its own name.

use crate::args::Arg;
use crate::errors::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, warn};

static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Valid regex pattern"));

/// Kind of key-value object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Secret,
    Config,
}

impl KeyKind {
    /// Store subdirectory
    pub fn dir(&self) -> &'static str {
        match self {
            Self::Secret => "sec",
            Self::Config => "cfg",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret => f.write_str("secret"),
            Self::Config => f.write_str("config"),
        }
    }
}

/// Read access to secret and config objects
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    fn decode(&self, kind: KeyKind, name: &str, key: &str) -> Result<Vec<u8>, ConfigError>;

    /// Keys of an object, sorted
    fn keys(&self, kind: KeyKind, name: &str) -> Result<Vec<String>, ConfigError>;
}

/// Objects stored as `<root>/{sec,cfg}/<name>/<key>` files
#[derive(Debug, Clone)]
pub struct DirKeyStore {
    root: PathBuf,
}

impl DirKeyStore {
    /// Store of one namespace
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_dir(&self, kind: KeyKind, name: &str) -> PathBuf {
        self.root.join(kind.dir()).join(name)
    }
}

impl KeyStore for DirKeyStore {
    fn decode(&self, kind: KeyKind, name: &str, key: &str) -> Result<Vec<u8>, ConfigError> {
        if key.contains('/') || key.starts_with('.') {
            return Err(ConfigError::KeyDecode {
                kind: kind.to_string(),
                name: name.to_string(),
                key: key.to_string(),
                message: "invalid key name".to_string(),
            });
        }
        let path = self.object_dir(kind, name).join(key);
        std::fs::read(&path).map_err(|e| ConfigError::KeyDecode {
            kind: kind.to_string(),
            name: name.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn keys(&self, kind: KeyKind, name: &str) -> Result<Vec<String>, ConfigError> {
        let dir = self.object_dir(kind, name);
        let entries = std::fs::read_dir(&dir).map_err(|e| ConfigError::KeyDecode {
            kind: kind.to_string(),
            name: name.to_string(),
            key: "*".to_string(),
            message: e.to_string(),
        })?;
        let mut keys: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|key| !key.starts_with('.'))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Environment flags plus the values to pass out of band
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvArgs {
    pub args: Vec<Arg>,
    pub side_channel: Vec<(String, String)>,
}

/// Environment declarations of a container
#[derive(Debug, Clone, Copy)]
pub struct EnvDecl<'a> {
    pub env: &'a [String],
    pub secrets: &'a [String],
    pub configs: &'a [String],
}

/// Compute `--env` flags for all declarations
pub fn compute(decl: EnvDecl<'_>, store: &dyn KeyStore) -> Result<EnvArgs, ConfigError> {
    let mut out = EnvArgs::default();

    for entry in decl.env {
        out.args.push(Arg::with_value("--env", entry.clone()).multi());
    }

    for (name, value) in resolve_keys(KeyKind::Config, decl.configs, store)? {
        out.args
            .push(Arg::with_value("--env", format!("{}={}", name, value)).multi());
    }

    for (name, value) in resolve_keys(KeyKind::Secret, decl.secrets, store)? {
        out.args.push(Arg::with_value("--env", name.clone()).multi());
        out.side_channel.push((name, value));
    }

    debug!(
        flags = out.args.len(),
        side_channel = out.side_channel.len(),
        "Computed container environment"
    );
    Ok(out)
}

fn resolve_keys(
    kind: KeyKind,
    entries: &[String],
    store: &dyn KeyStore,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut resolved = Vec::new();
    for entry in entries {
        match entry.split_once('=') {
            Some((var, reference)) => {
                let (name, key) = split_reference(kind, reference)?;
                if !ENV_NAME.is_match(var) {
                    return Err(invalid_declaration(kind, entry, "invalid variable name"));
                }
                resolved.push((var.to_string(), decode_utf8(kind, name, key, store)?));
            }
            None => {
                let (name, key) = split_reference(kind, entry)?;
                if key != "*" {
                    return Err(invalid_declaration(
                        kind,
                        entry,
                        "expected NAME=<object>/<key> or <object>/*",
                    ));
                }
                for key in store.keys(kind, name)? {
                    if !ENV_NAME.is_match(&key) {
                        warn!(%kind, object = name, key, "Key is not a valid variable name; skipping");
                        continue;
                    }
                    let value = decode_utf8(kind, name, &key, store)?;
                    resolved.push((key, value));
                }
            }
        }
    }
    Ok(resolved)
}

fn split_reference(kind: KeyKind, reference: &str) -> Result<(&str, &str), ConfigError> {
    match reference.split_once('/') {
        Some((name, key)) if !name.is_empty() && !key.is_empty() => Ok((name, key)),
        _ => Err(invalid_declaration(kind, reference, "expected <object>/<key>")),
    }
}

fn invalid_declaration(kind: KeyKind, entry: &str, message: &str) -> ConfigError {
    ConfigError::Validation {
        message: format!("{} environment declaration '{}': {}", kind, entry, message),
    }
}

fn decode_utf8(
    kind: KeyKind,
    name: &str,
    key: &str,
    store: &dyn KeyStore,
) -> Result<String, ConfigError> {
    let bytes = store.decode(kind, name, key)?;
    String::from_utf8(bytes).map_err(|_| ConfigError::KeyDecode {
        kind: kind.to_string(),
        name: name.to_string(),
        key: key.to_string(),
        message: "value is not valid UTF-8".to_string(),
    })
}
