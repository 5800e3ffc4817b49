//! Engine command-line arguments
//!
//! [`Args`] is the ordered argument list of one engine invocation. Each entry
//! remembers whether it may repeat and whether its value must be hidden from
//! logs. [`RunArgsBuilder`] assembles `container run` arguments in a fixed phase
//! order and merges the user's free-form `run_args` with the resource-computed
//! flags according to per-flag [`FlagPolicy`] rules.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Replacement text for obfuscated values
pub const OBFUSCATED: &str = "xxx";

/// Flags that never take a value, used when splitting user-supplied arguments
const BOOLEAN_FLAGS: &[&str] = &[
    "--detach",
    "--init",
    "--interactive",
    "--no-healthcheck",
    "--oom-kill-disable",
    "--privileged",
    "--read-only",
    "--rm",
    "--tty",
    "-d",
    "-i",
    "-t",
];

/// One argument: an option with an optional value, or a positional word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub option: String,
    pub value: Option<String>,
    /// The option may legitimately appear more than once
    pub multi: bool,
    /// The value must not appear in logs
    pub obfuscate: bool,
    /// Resource-computed default the user may override
    pub default: bool,
}

impl Arg {
    /// Option without value (`--privileged`) or positional word
    pub fn flag(option: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            value: None,
            multi: false,
            obfuscate: false,
            default: false,
        }
    }

    /// Option with a value
    pub fn with_value(option: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::flag(option)
        }
    }

    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn obfuscated(mut self) -> Self {
        self.obfuscate = true;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    fn push_words(&self, out: &mut Vec<String>, obfuscate: bool) {
        out.push(self.option.clone());
        if let Some(ref value) = self.value {
            if obfuscate && self.obfuscate {
                out.push(OBFUSCATED.to_string());
            } else {
                out.push(value.clone());
            }
        }
    }
}

/// Ordered argument list of one engine invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    items: Vec<Arg>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plain words (`["container", "stop"]`)
    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: words.into_iter().map(|w| Arg::flag(w)).collect(),
        }
    }

    pub fn push(&mut self, arg: Arg) -> &mut Self {
        self.items.push(arg);
        self
    }

    pub fn word(&mut self, word: impl Into<String>) -> &mut Self {
        self.push(Arg::flag(word))
    }

    pub fn option_value(&mut self, option: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Arg::with_value(option, value))
    }

    pub fn extend(&mut self, other: Args) -> &mut Self {
        self.items.extend(other.items);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.items.iter().any(|a| a.option == option)
    }

    /// Values given to an option, in order
    pub fn values_of(&self, option: &str) -> Vec<&str> {
        self.items
            .iter()
            .filter(|a| a.option == option)
            .filter_map(|a| a.value.as_deref())
            .collect()
    }

    /// Number of occurrences of an option
    pub fn count_of(&self, option: &str) -> usize {
        self.items.iter().filter(|a| a.option == option).count()
    }

    /// Words to hand to the engine process
    pub fn to_argv(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.items.len() * 2);
        for arg in &self.items {
            arg.push_words(&mut out, false);
        }
        out
    }

    /// Words safe to log
    pub fn obfuscated(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.items.len() * 2);
        for arg in &self.items {
            arg.push_words(&mut out, true);
        }
        out
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_words::join(self.obfuscated()))
    }
}

/// Construction phases of a `container run` command line, in emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgPhase {
    Name,
    Runtime,
    Namespace,
    Mount,
    Env,
    Label,
    Dns,
    Device,
    Extra,
    Image,
    Command,
}

/// How a resource-computed flag and a user-supplied duplicate are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagPolicy {
    /// Emit both; the computed flag comes first so first-match-wins engines
    /// keep it and last-match-wins engines take the user's
    Ordered,
    /// Drop the user's flag when the resource computed the same option
    PreferResource,
    /// Drop the computed flag when the user supplied the same option
    PreferUser,
    /// Drop user entries identical (option and value) to a computed entry
    Dedup,
}

/// Per-option reconciliation policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagPolicies {
    policies: HashMap<String, FlagPolicy>,
}

impl Default for FlagPolicies {
    fn default() -> Self {
        let mut policies = HashMap::new();
        for option in ["--name", "--network", "--pid", "--ipc", "--uts", "--userns"] {
            policies.insert(option.to_string(), FlagPolicy::PreferResource);
        }
        for option in ["--label", "--env", "--volume", "--device"] {
            policies.insert(option.to_string(), FlagPolicy::Dedup);
        }
        policies.insert("--hostname".to_string(), FlagPolicy::PreferUser);
        Self { policies }
    }
}

impl FlagPolicies {
    /// Override the policy of one option
    pub fn with(mut self, option: impl Into<String>, policy: FlagPolicy) -> Self {
        self.policies.insert(option.into(), policy);
        self
    }

    pub fn policy(&self, option: &str) -> FlagPolicy {
        self.policies
            .get(option)
            .copied()
            .unwrap_or(FlagPolicy::Ordered)
    }
}

/// Split user-supplied `run_args` words into arguments, rewriting aliases to
/// their canonical long form
pub fn normalize_user_args(words: &[String], aliases: &[(&str, &str)]) -> Vec<Arg> {
    let canonical = |option: &str| -> String {
        aliases
            .iter()
            .find(|(from, _)| *from == option)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| option.to_string())
    };

    let mut out = Vec::new();
    let mut iter = words.iter().peekable();
    while let Some(word) = iter.next() {
        if !word.starts_with('-') || word == "-" || word == "--" {
            out.push(Arg::flag(word.clone()));
            continue;
        }
        if word.starts_with("--") {
            if let Some((option, value)) = word.split_once('=') {
                out.push(Arg::with_value(canonical(option), value).multi());
                continue;
            }
        } else if word.len() > 2 && word.is_char_boundary(2) {
            // Glued short option: `-eFOO=bar` or a bundle like `-it`
            let (short, rest) = word.split_at(2);
            let option = canonical(short);
            if option != short {
                out.push(Arg::with_value(option, rest).multi());
            } else {
                out.push(Arg::flag(word.clone()));
            }
            continue;
        }
        let option = canonical(word);
        let takes_value = !BOOLEAN_FLAGS.contains(&option.as_str())
            && !BOOLEAN_FLAGS.contains(&word.as_str())
            && iter.peek().is_some_and(|next| !next.starts_with('-'));
        if takes_value {
            let value = iter.next().cloned().unwrap_or_default();
            out.push(Arg::with_value(option, value).multi());
        } else {
            out.push(Arg::flag(option));
        }
    }
    out
}

/// Phase-ordered builder for `container run` arguments
#[derive(Debug, Default)]
pub struct RunArgsBuilder {
    phases: BTreeMap<ArgPhase, Vec<Arg>>,
}

impl RunArgsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, phase: ArgPhase, arg: Arg) -> &mut Self {
        self.phases.entry(phase).or_default().push(arg);
        self
    }

    pub fn extend(&mut self, phase: ArgPhase, args: impl IntoIterator<Item = Arg>) -> &mut Self {
        self.phases.entry(phase).or_default().extend(args);
        self
    }

    /// Concatenate phases in order, reconciling the [`ArgPhase::Extra`] user
    /// arguments with the computed ones
    pub fn build(mut self, policies: &FlagPolicies) -> Args {
        let extra = self.phases.remove(&ArgPhase::Extra).unwrap_or_default();
        let (mut computed, tail): (Vec<Arg>, Vec<Arg>) = {
            let mut computed = Vec::new();
            let mut tail = Vec::new();
            for (phase, args) in self.phases {
                if phase < ArgPhase::Extra {
                    computed.extend(args);
                } else {
                    tail.extend(args);
                }
            }
            (computed, tail)
        };

        let user_options: HashSet<String> = extra.iter().map(|a| a.option.clone()).collect();
        computed.retain(|a| {
            let overridden = user_options.contains(&a.option);
            !(overridden && (a.default || policies.policy(&a.option) == FlagPolicy::PreferUser))
        });
        let computed_options: HashSet<String> =
            computed.iter().map(|a| a.option.clone()).collect();

        let extra: Vec<Arg> = extra
            .into_iter()
            .filter(|a| match policies.policy(&a.option) {
                FlagPolicy::PreferResource => !computed_options.contains(&a.option),
                FlagPolicy::Dedup => !computed
                    .iter()
                    .any(|c| c.option == a.option && c.value == a.value),
                FlagPolicy::Ordered | FlagPolicy::PreferUser => true,
            })
            .collect();

        let mut args = Args::new();
        for arg in computed.into_iter().chain(extra).chain(tail) {
            args.push(arg);
        }
        args
    }
}
