//! Layered application configuration.
//!
//! A [`ConfigurationBuilder`] collects sources in order; building it merges
//! them into one immutable [`Configuration`] of flattened, dotted keys.
//! Later sources override earlier ones key by key:
//!
//! ```text
//! {"server": {"port": 80}}   →  server.port = 80
//! ["a", "b"] under "hosts"   →  hosts.0 = "a", hosts.1 = "b"
//! ```
//!
//! Keys are case-insensitive. Values keep the type their source gave them
//! (JSON and YAML are typed); in-memory pairs and command line values stay
//! text. [`Configuration::bind`] converts text only where the target field
//! asks for a boolean or number, so `"123"` still binds to a `String`.
//!
//! The extension registers the builder on a command node. Each extension
//! that calls [`register`] adds sources; they are applied in registration
//! order when the command first needs the configuration.

mod de;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use strand_dispatch::{get_instance, CommandNode, Composer, ParseResult, Registration};
use thiserror::Error;

/// Errors raised while loading or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {origin}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML in {origin}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration root in {origin} must be a mapping")]
    NotAMapping { origin: String },

    #[error("configuration key missing: {0}")]
    Missing(String),

    #[error("configuration key {key} has invalid value {value:?}: {message}")]
    Invalid {
        key: String,
        value: String,
        message: String,
    },

    #[error("configuration key {key} is both a value and a section")]
    Shape { key: String },

    #[error("failed to bind configuration")]
    Bind(#[source] serde_json::Error),
}

#[derive(Debug, Clone)]
enum Source {
    Memory(Vec<(String, String)>),
    JsonFile { path: PathBuf, optional: bool },
    YamlFile { path: PathBuf, optional: bool },
    Json(String),
    Yaml(String),
    CommandLine,
}

/// Ordered list of configuration sources.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    sources: Vec<Source>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds key/value pairs. Keys may be dotted.
    pub fn add_in_memory<I, K, V>(&mut self, pairs: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.sources.push(Source::Memory(pairs));
        self
    }

    /// Adds a JSON file that must exist.
    pub fn add_json_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.sources.push(Source::JsonFile {
            path: path.as_ref().to_path_buf(),
            optional: false,
        });
        self
    }

    /// Adds a JSON file that is skipped when it does not exist.
    pub fn add_optional_json_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.sources.push(Source::JsonFile {
            path: path.as_ref().to_path_buf(),
            optional: true,
        });
        self
    }

    /// Adds a YAML file that must exist.
    pub fn add_yaml_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.sources.push(Source::YamlFile {
            path: path.as_ref().to_path_buf(),
            optional: false,
        });
        self
    }

    /// Adds a YAML file that is skipped when it does not exist.
    pub fn add_optional_yaml_file(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.sources.push(Source::YamlFile {
            path: path.as_ref().to_path_buf(),
            optional: true,
        });
        self
    }

    pub fn add_json_str(&mut self, json: impl Into<String>) -> &mut Self {
        self.sources.push(Source::Json(json.into()));
        self
    }

    pub fn add_yaml_str(&mut self, yaml: impl Into<String>) -> &mut Self {
        self.sources.push(Source::Yaml(yaml.into()));
        self
    }

    /// Adds the invoked command's argument values, keyed by argument id.
    ///
    /// Only values given on the command line or through an environment
    /// variable are added; clap defaults never override other sources.
    /// An argument with several values yields `id.0`, `id.1`, ...
    pub fn add_command_line(&mut self) -> &mut Self {
        self.sources.push(Source::CommandLine);
        self
    }

    /// Number of sources added so far.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Loads every source in order and merges them.
    pub fn build(&self, pr: &ParseResult) -> Result<Configuration, ConfigError> {
        let mut config = Configuration::default();
        for source in &self.sources {
            match source {
                Source::Memory(pairs) => {
                    for (key, value) in pairs {
                        config.set(normalize(key), Value::String(value.clone()));
                    }
                }
                Source::JsonFile { path, optional } => {
                    if let Some(text) = read_source(path, *optional)? {
                        config.merge(parse_json(&text, &path.display().to_string())?);
                    }
                }
                Source::YamlFile { path, optional } => {
                    if let Some(text) = read_source(path, *optional)? {
                        config.merge(parse_yaml(&text, &path.display().to_string())?);
                    }
                }
                Source::Json(text) => config.merge(parse_json(text, "inline JSON")?),
                Source::Yaml(text) => config.merge(parse_yaml(text, "inline YAML")?),
                Source::CommandLine => command_line_into(&mut config, pr),
            }
        }
        tracing::debug!(
            keys = config.len(),
            sources = self.sources.len(),
            "configuration built"
        );
        Ok(config)
    }
}

/// Merged, immutable configuration.
#[derive(Clone, Default, PartialEq)]
pub struct Configuration {
    values: BTreeMap<String, Value>,
}

impl Configuration {
    /// Returns the raw value of a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&normalize(key))
    }

    /// Returns a key's value rendered as text.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(render)
    }

    /// Returns a key's value as text, or an error naming the missing key.
    pub fn require_str(&self, key: &str) -> Result<String, ConfigError> {
        self.get_str(key)
            .ok_or_else(|| ConfigError::Missing(normalize(key)))
    }

    /// Parses a key's value with [`FromStr`].
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(text) = self.get_str(key) else {
            return Ok(None);
        };
        text.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
            key: normalize(key),
            value: text.clone(),
            message: e.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(&normalize(key))
    }

    /// The sub-configuration under `prefix`, with the prefix stripped.
    pub fn section(&self, prefix: &str) -> Configuration {
        let prefix = format!("{}.", normalize(prefix));
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&prefix).map(|rest| (rest.to_string(), v.clone())))
            .collect();
        Configuration { values }
    }

    /// Immediate child names of the root, in key order.
    pub fn children(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .values
            .keys()
            .map(|k| k.split('.').next().unwrap_or(k))
            .collect();
        names.into_iter().map(str::to_string).collect()
    }

    /// Deserializes the whole configuration into `T`.
    ///
    /// Sections become maps, sections whose children are `0..n` become
    /// sequences. Text is parsed only for boolean and numeric fields. Use
    /// [`section`](Self::section) first to bind a subtree.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        T::deserialize(de::TextDeserializer(self.to_value()?)).map_err(ConfigError::Bind)
    }

    /// Rebuilds the nested value tree. Values keep their stored type.
    pub fn to_value(&self) -> Result<Value, ConfigError> {
        let mut root = Map::new();
        for (key, value) in &self.values {
            insert_path(&mut root, key, value.clone())?;
        }
        Ok(arrays_from_indices(Value::Object(root)))
    }

    /// Iterates over flattened keys and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn set(&mut self, key: String, value: Value) {
        self.values.insert(key, value);
    }

    fn merge(&mut self, map: Map<String, Value>) {
        for (key, value) in map {
            self.flatten(normalize(&key), value);
        }
    }

    fn flatten(&mut self, prefix: String, value: Value) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    self.flatten(format!("{prefix}.{}", normalize(&key)), child);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.into_iter().enumerate() {
                    self.flatten(format!("{prefix}.{index}"), child);
                }
            }
            scalar => self.set(prefix, scalar),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.iter().map(|(k, v)| (k, render(v))))
            .finish()
    }
}

/// Registers a configure callback for the node's configuration.
pub fn register<F>(composer: &Composer, node: &CommandNode, configure: F) -> Registration
where
    F: Fn(&mut ConfigurationBuilder, &ParseResult) -> anyhow::Result<()> + Send + Sync + 'static,
{
    composer.register_default::<ConfigurationBuilder, Configuration, _, _>(
        node,
        |builder, pr| Ok(builder.build(pr)?),
        configure,
    )
}

/// The configuration of the invoked command, if one is registered.
pub fn configuration(pr: &ParseResult) -> anyhow::Result<Option<Arc<Configuration>>> {
    get_instance::<Configuration>(pr)
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn read_source(path: &Path, optional: bool) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::trace!(path = %path.display(), "optional configuration file not found");
            Ok(None)
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_json(text: &str, origin: &str) -> Result<Map<String, Value>, ConfigError> {
    let value: Value = serde_json::from_str(text).map_err(|source| ConfigError::Json {
        origin: origin.to_string(),
        source,
    })?;
    into_mapping(value, origin)
}

fn parse_yaml(text: &str, origin: &str) -> Result<Map<String, Value>, ConfigError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    let value: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
        origin: origin.to_string(),
        source,
    })?;
    into_mapping(value, origin)
}

fn into_mapping(value: Value, origin: &str) -> Result<Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(ConfigError::NotAMapping {
            origin: origin.to_string(),
        }),
    }
}

fn command_line_into(config: &mut Configuration, pr: &ParseResult) {
    use clap::parser::ValueSource;

    let matches = pr.command_matches();
    for id in matches.ids() {
        let id = id.as_str();
        match matches.value_source(id) {
            Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable) => {}
            _ => continue,
        }
        let Ok(Some(raw)) = matches.try_get_raw(id) else {
            continue;
        };
        let raw: Vec<String> = raw.map(|v| v.to_string_lossy().into_owned()).collect();
        match raw.as_slice() {
            [] => {}
            [single] => config.set(normalize(id), Value::String(single.clone())),
            many => {
                for (index, value) in many.iter().enumerate() {
                    let key = format!("{}.{index}", normalize(id));
                    config.set(key, Value::String(value.clone()));
                }
            }
        }
    }
}

fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) -> Result<(), ConfigError> {
    let shape = || ConfigError::Shape {
        key: key.to_string(),
    };
    let mut parts = key.split('.').peekable();
    let mut current = root;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            if current.get(part).is_some_and(Value::is_object) {
                return Err(shape());
            }
            current.insert(part.to_string(), value);
            return Ok(());
        }
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(shape)?;
    }
    Ok(())
}

fn arrays_from_indices(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let is_sequence = !map.is_empty()
                && (0..map.len()).all(|i| map.contains_key(&i.to_string()));
            if is_sequence {
                let mut map = map;
                let items = (0..map.len())
                    .filter_map(|i| map.remove(&i.to_string()))
                    .map(arrays_from_indices)
                    .collect();
                Value::Array(items)
            } else {
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, arrays_from_indices(v)))
                        .collect(),
                )
            }
        }
        other => other,
    }
}
