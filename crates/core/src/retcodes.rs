//! Exit code to status mapping
//!
//! A mapping string is a whitespace separated list of `<code>:<status>`
//! entries, e.g. `"0:up 1:down 3:n/a"`. Malformed entries are dropped and
//! reported as collected, non-fatal errors; only a non-empty string without a
//! single valid entry is fatal.

use crate::errors::ConfigError;
use crate::status::Status;
use std::collections::BTreeMap;

/// Code to status table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetcodeMap {
    codes: BTreeMap<i32, Status>,
}

impl Default for RetcodeMap {
    fn default() -> Self {
        Self {
            codes: BTreeMap::from([(0, Status::Up), (1, Status::Down)]),
        }
    }
}

/// Parsed mapping together with the entries that were dropped
#[derive(Debug)]
pub struct ParsedRetcodes {
    pub map: RetcodeMap,
    pub errors: Vec<ConfigError>,
}

impl RetcodeMap {
    /// Parse a mapping string; empty means the default `0:up 1:down` table
    pub fn parse(mapping: &str) -> Result<ParsedRetcodes, ConfigError> {
        if mapping.trim().is_empty() {
            return Ok(ParsedRetcodes {
                map: Self::default(),
                errors: Vec::new(),
            });
        }

        let mut codes = BTreeMap::new();
        let mut errors = Vec::new();
        for entry in mapping.split_whitespace() {
            match parse_entry(entry) {
                Ok((code, status)) => {
                    codes.insert(code, status);
                }
                Err(message) => errors.push(ConfigError::RetcodeEntry {
                    entry: entry.to_string(),
                    message,
                }),
            }
        }

        if codes.is_empty() {
            return Err(ConfigError::EmptyRetcodes {
                mapping: mapping.to_string(),
            });
        }
        Ok(ParsedRetcodes {
            map: Self { codes },
            errors,
        })
    }

    /// Status of an exit code; unmapped codes are `warn`
    pub fn status(&self, code: i32) -> Status {
        self.codes.get(&code).copied().unwrap_or(Status::Warn)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn parse_entry(entry: &str) -> Result<(i32, Status), String> {
    let (code, status) = entry
        .split_once(':')
        .ok_or_else(|| "expected <code>:<status>".to_string())?;
    let code = code
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("invalid code: {}", e))?;
    let status = status.parse::<Status>()?;
    Ok((code, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mapping_is_default() {
        let parsed = RetcodeMap::parse("  ").unwrap();
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.map.status(0), Status::Up);
        assert_eq!(parsed.map.status(1), Status::Down);
        assert_eq!(parsed.map.status(2), Status::Warn);
        assert_eq!(parsed.map.status(-1), Status::Warn);
    }

    #[test]
    fn test_malformed_entry_is_collected() {
        let parsed = RetcodeMap::parse("0:up 1:bogus 2:down x:up 3").unwrap();
        assert_eq!(parsed.map.len(), 2);
        assert_eq!(parsed.map.status(0), Status::Up);
        assert_eq!(parsed.map.status(2), Status::Down);
        assert_eq!(parsed.map.status(1), Status::Warn);
        assert_eq!(parsed.errors.len(), 3);
        assert!(parsed.errors[0].to_string().contains("1:bogus"));
    }

    #[test]
    fn test_configured_mapping_replaces_default() {
        let map = RetcodeMap::parse("0:up 3:n/a").unwrap().map;
        assert_eq!(map.status(1), Status::Warn);
        assert_eq!(map.status(3), Status::NotApplicable);
    }

    #[test]
    fn test_all_invalid_is_fatal() {
        let err = RetcodeMap::parse("a:b c").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyRetcodes { .. }));
    }
}
