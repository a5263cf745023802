//! Cache key derivation
//!
//! Keys have the shape `{prefix}:{class}:{partition}:{params}`. Each component
//! is percent-encoded, so neither `:` nor the glob metacharacters used by
//! pattern invalidation can appear inside one. The global (unpartitioned)
//! partition is the empty component. Parameters are sorted by name and value,
//! which makes the key independent of the order the request listed them in.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::application::errors::SelectorError;

/// Encoded parameter strings longer than this are replaced by their digest
const MAX_INLINE_PARAMS_LEN: usize = 128;

/// A named category of cacheable data, e.g. `post-list` or `post-detail`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceClass(String);

impl ResourceClass {
    pub fn new(name: impl Into<String>) -> Result<Self, SelectorError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SelectorError::EmptyResourceClass);
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(SelectorError::InvalidResourceClass(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The request parameters that pick out one entry within a resource class.
///
/// The partition is the scoping dimension (a college, a tenant) that write
/// invalidation sweeps over; everything else that affects the response goes
/// into the parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    partition: Option<String>,
    params: BTreeMap<String, Vec<String>>,
}

impl Selector {
    /// An unpartitioned selector with no parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// A selector scoped to one partition
    pub fn partitioned(partition: impl Into<String>) -> Self {
        Self {
            partition: Some(partition.into()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Add one value for `name`; repeated names accumulate
    pub fn insert(&mut self, name: impl Into<String>, value: impl ToString) {
        self.params
            .entry(name.into())
            .or_default()
            .push(value.to_string());
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    /// Canonical `name=value&...` encoding, sorted by name then value
    fn canonical_params(&self) -> Result<String, SelectorError> {
        let mut pairs = Vec::new();
        for (name, values) in &self.params {
            if name.is_empty() {
                return Err(SelectorError::EmptyParameterName);
            }
            let mut values: Vec<&String> = values.iter().collect();
            values.sort();
            for value in values {
                pairs.push(format!(
                    "{}={}",
                    urlencoding::encode(name),
                    urlencoding::encode(value)
                ));
            }
        }
        Ok(pairs.join("&"))
    }
}

fn encode_partition(partition: Option<&str>) -> Result<String, SelectorError> {
    match partition {
        None => Ok(String::new()),
        Some("") => Err(SelectorError::EmptyPartition),
        Some(p) => Ok(urlencoding::encode(p).into_owned()),
    }
}

/// A fully derived cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(
        prefix: &str,
        class: &ResourceClass,
        selector: &Selector,
    ) -> Result<Self, SelectorError> {
        let partition = encode_partition(selector.partition())?;
        let mut params = selector.canonical_params()?;
        if params.len() > MAX_INLINE_PARAMS_LEN {
            // Inline encodings always contain '=', so a digest can never collide with one
            let digest = Sha256::digest(params.as_bytes());
            params = format!("h-{}", hex::encode(digest));
        }
        Ok(Self(format!("{}:{}:{}:{}", prefix, class, partition, params)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which entries of a resource class an invalidation sweep covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSelector {
    /// Every entry of the class, in every partition
    All,
    /// Every entry of the class within one partition
    Partition(String),
    /// Every unpartitioned entry of the class
    Global,
}

/// Glob expression over cache keys, evaluated by the store at invalidation time.
///
/// Uses the Redis `MATCH` dialect; only `*` is ever emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern(String);

impl KeyPattern {
    pub fn for_selector(
        prefix: &str,
        class: &ResourceClass,
        selector: &PatternSelector,
    ) -> Result<Self, SelectorError> {
        let pattern = match selector {
            PatternSelector::All => format!("{}:{}:*", prefix, class),
            PatternSelector::Partition(p) => {
                format!("{}:{}:{}:*", prefix, class, encode_partition(Some(p))?)
            }
            PatternSelector::Global => format!("{}:{}::*", prefix, class),
        };
        Ok(Self(pattern))
    }

    /// A raw glob; callers are responsible for escaping literal metacharacters
    pub fn raw(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compile into an anchored regex for stores without native pattern support
    pub fn to_regex(&self) -> Result<Regex, regex::Error> {
        let mut source = String::with_capacity(self.0.len() + 8);
        source.push('^');
        let mut literal = String::new();
        for c in self.0.chars() {
            match c {
                '*' | '?' => {
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(if c == '*' { ".*" } else { "." });
                }
                _ => literal.push(c),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');
        Regex::new(&source)
    }

    pub fn matches(&self, key: &str) -> bool {
        self.to_regex().is_ok_and(|re| re.is_match(key))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
