//! Devices file loading and change detection.
//!
//! The devices file is row oriented with no header. Each row is
//!
//! ```text
//! access_token, mqtt_topic, raw_key1:Display Name 1, raw_key2:Display Name 2, ...
//! ```
//!
//! Rows that cannot produce a device are skipped with a warning. A load only
//! fails when the source is missing, unreadable, or has no usable row at all.

use crate::device::{token_prefix, ConfigSnapshot, DeviceConfig, Fingerprint, ParameterMap};
use crate::error::{ConfigLoadError, RowError};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Where device configuration comes from.
pub trait ConfigSource: Send + Sync {
    /// Human-readable name for logs.
    fn describe(&self) -> String;

    /// Cheap change marker; `None` when the source does not exist.
    fn fingerprint(&self) -> Option<Fingerprint>;

    /// Full contents of the source.
    fn read(&self) -> Result<String, ConfigLoadError>;
}

/// Devices file on local disk.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        let metadata = std::fs::metadata(&self.path).ok()?;
        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        Some(Fingerprint::from_file(modified, metadata.len()))
    }

    fn read(&self) -> Result<String, ConfigLoadError> {
        std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigLoadError::Missing(self.describe()),
            _ => ConfigLoadError::Unreadable {
                source_name: self.describe(),
                reason: e.to_string(),
            },
        })
    }
}

/// In-memory source whose fingerprint is bumped on every change.
#[derive(Debug, Default)]
pub struct MemoryConfigSource {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    content: Option<String>,
    revision: u64,
}

impl MemoryConfigSource {
    /// Source that does not exist yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_content(content: impl Into<String>) -> Self {
        let source = Self::default();
        source.replace(content);
        source
    }

    /// Replace the contents, producing a new fingerprint.
    pub fn replace(&self, content: impl Into<String>) {
        let mut state = self.inner.lock();
        state.content = Some(content.into());
        state.revision += 1;
    }

    /// Make the source disappear.
    pub fn remove(&self) {
        let mut state = self.inner.lock();
        state.content = None;
        state.revision += 1;
    }
}

impl ConfigSource for MemoryConfigSource {
    fn describe(&self) -> String {
        "<memory>".to_string()
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        let state = self.inner.lock();
        state
            .content
            .as_ref()
            .map(|_| Fingerprint::from_revision(state.revision))
    }

    fn read(&self) -> Result<String, ConfigLoadError> {
        self.inner
            .lock()
            .content
            .clone()
            .ok_or_else(|| ConfigLoadError::Missing(self.describe()))
    }
}

impl<T: ConfigSource + ?Sized> ConfigSource for std::sync::Arc<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn fingerprint(&self) -> Option<Fingerprint> {
        (**self).fingerprint()
    }

    fn read(&self) -> Result<String, ConfigLoadError> {
        (**self).read()
    }
}

/// Loads [`ConfigSnapshot`]s from a [`ConfigSource`].
pub struct ConfigStore<S> {
    source: S,
}

impl<S: ConfigSource> ConfigStore<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current fingerprint of the source, without parsing it.
    pub fn current_fingerprint(&self) -> Option<Fingerprint> {
        self.source.fingerprint()
    }

    /// Read and parse the whole source.
    ///
    /// The fingerprint is taken before reading, so a change that lands while
    /// reading is picked up on the next check.
    pub fn load(&self) -> Result<ConfigSnapshot, ConfigLoadError> {
        let name = self.source.describe();
        let fingerprint = self
            .source
            .fingerprint()
            .ok_or_else(|| ConfigLoadError::Missing(name.clone()))?;
        let content = self.source.read()?;

        let devices = parse_devices(&content);
        if devices.is_empty() {
            return Err(ConfigLoadError::NoValidRows(name));
        }

        info!(
            category = "config",
            source = %name,
            devices = devices.len(),
            "Loaded device configurations"
        );
        Ok(ConfigSnapshot::new(devices, fingerprint))
    }
}

/// Parse every row of a devices file, skipping the ones that are unusable.
pub fn parse_devices(content: &str) -> Vec<DeviceConfig> {
    let mut devices = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let fields = split_row(line);
        match parse_row(&fields) {
            Ok(device) => {
                debug!(
                    line = line_no,
                    device = %device.token_prefix(),
                    topic = %device.mqtt_topic,
                    parameters = device.parameter_map.len(),
                    "Parsed device row"
                );
                devices.push(device);
            }
            Err(e) => {
                let token = fields.first().map(|t| token_prefix(t.trim())).unwrap_or_default();
                warn!(
                    category = "config",
                    line = line_no,
                    device = %token,
                    "Skipping device row: {}",
                    e
                );
            }
        }
    }

    devices
}

/// Build a device from the columns of one row.
///
/// Individual mapping tokens without a colon, or with an empty key or name,
/// are skipped with a warning; the row only fails when none remain.
pub fn parse_row(fields: &[String]) -> Result<DeviceConfig, RowError> {
    if fields.len() < 2 {
        return Err(RowError::TooFewFields(fields.len()));
    }

    let access_token = fields[0].trim();
    let mqtt_topic = fields[1].trim();

    let mut parameter_map = ParameterMap::new();
    for mapping in &fields[2..] {
        match parse_mapping(mapping) {
            Some((raw_key, display_name)) => parameter_map.insert(raw_key, display_name),
            None => warn!(
                category = "config",
                device = %token_prefix(access_token),
                mapping = %mapping,
                "Malformed parameter mapping, skipping"
            ),
        }
    }

    if access_token.is_empty() {
        return Err(RowError::EmptyToken);
    }
    if mqtt_topic.is_empty() {
        return Err(RowError::EmptyTopic);
    }
    if parameter_map.is_empty() {
        return Err(RowError::NoMappings);
    }

    Ok(DeviceConfig::new(access_token, mqtt_topic, parameter_map))
}

/// Split a `key:name` token on its first colon.
fn parse_mapping(token: &str) -> Option<(&str, &str)> {
    let (raw_key, display_name) = token.split_once(':')?;
    let raw_key = raw_key.trim();
    let display_name = display_name.trim();
    if raw_key.is_empty() || display_name.is_empty() {
        return None;
    }
    Some((raw_key, display_name))
}

/// Split one row into columns. A column that starts with `"` is quoted and
/// may contain commas; `""` inside quotes is a literal quote. A quote
/// anywhere else is kept as is.
fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if at_field_start => {
                in_quotes = true;
                at_field_start = false;
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                at_field_start = true;
            }
            _ => {
                current.push(c);
                at_field_start = false;
            }
        }
    }
    fields.push(current);

    fields
}
