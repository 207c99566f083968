//! Key space layout
//!
//! Every key in the store carries a domain prefix:
//! - `input:<name>`  - sensor readings written by collectors
//! - `output:<name>` - values produced by rules
//! - `state:<name>`  - state variables kept between cycles
//! - `buffer:<name>` - exported buffer snapshots

pub const INPUT_PREFIX: &str = "input:";
pub const OUTPUT_PREFIX: &str = "output:";
pub const STATE_PREFIX: &str = "state:";
pub const BUFFER_PREFIX: &str = "buffer:";

/// Key domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyDomain {
    Input,
    Output,
    State,
    Buffer,
}

impl KeyDomain {
    pub fn prefix(self) -> &'static str {
        match self {
            KeyDomain::Input => INPUT_PREFIX,
            KeyDomain::Output => OUTPUT_PREFIX,
            KeyDomain::State => STATE_PREFIX,
            KeyDomain::Buffer => BUFFER_PREFIX,
        }
    }

    /// Build a full key for `name` in this domain
    pub fn key(self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    /// Split a full key into its domain and bare name
    pub fn parse(key: &str) -> Option<(KeyDomain, &str)> {
        [
            KeyDomain::Input,
            KeyDomain::Output,
            KeyDomain::State,
            KeyDomain::Buffer,
        ]
        .into_iter()
        .find_map(|domain| key.strip_prefix(domain.prefix()).map(|name| (domain, name)))
    }
}

pub fn input_key(name: &str) -> String {
    KeyDomain::Input.key(name)
}

pub fn output_key(name: &str) -> String {
    KeyDomain::Output.key(name)
}

/// Bare name of a key in `domain`, `None` for keys of other domains
pub fn strip_prefix(domain: KeyDomain, key: &str) -> Option<&str> {
    key.strip_prefix(domain.prefix())
}
