//! Declarative JSON reshaping.
//!
//! A [`MapperConfig`] maps client attribute names to source JSON paths.
//! Paths are dot-separated, may index arrays (`items[0]`) and may quote keys
//! that contain dots (`metrics['dfs.namenode'].x`).

pub mod mpack;
pub mod stack_version;
pub mod store;

use serde_json::{Map, Value};
use std::cmp::Ordering;
use wizard_error::{WizardError, WizardResult};

pub use store::{Record, RecordStore, SharedRecordStore};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Path(String),
    Constant(Value),
    /// One scalar per array element, sorted.
    Pluck { path: String, item: String },
    /// One nested record per array element, in source order.
    Nested { path: String, config: MapperConfig },
    /// A nested record read from the same source object.
    Object(MapperConfig),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapperConfig {
    fields: Vec<(String, FieldSpec)>,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, attr: &str, path: &str) -> Self {
        self.fields
            .push((attr.to_string(), FieldSpec::Path(path.to_string())));
        self
    }

    pub fn constant(mut self, attr: &str, value: impl Into<Value>) -> Self {
        self.fields
            .push((attr.to_string(), FieldSpec::Constant(value.into())));
        self
    }

    pub fn pluck(mut self, attr: &str, path: &str, item: &str) -> Self {
        self.fields.push((
            attr.to_string(),
            FieldSpec::Pluck {
                path: path.to_string(),
                item: item.to_string(),
            },
        ));
        self
    }

    pub fn nested(mut self, attr: &str, path: &str, config: MapperConfig) -> Self {
        self.fields.push((
            attr.to_string(),
            FieldSpec::Nested {
                path: path.to_string(),
                config,
            },
        ));
        self
    }

    pub fn object(mut self, attr: &str, config: MapperConfig) -> Self {
        self.fields.push((attr.to_string(), FieldSpec::Object(config)));
        self
    }

    pub fn fields(&self) -> &[(String, FieldSpec)] {
        &self.fields
    }

    /// Builds a config from the console's object notation.
    ///
    /// `"attr": "a.b"` reads a path, `"attr": "$text"` is a constant, and an
    /// object value paired with `attr_key` plus `attr_type: "array"` fans out
    /// over an array (plucking `item` when present).
    pub fn from_json(config: &Value) -> WizardResult<Self> {
        let obj = config.as_object().ok_or_else(|| {
            WizardError::Other("mapper config must be a JSON object".to_string())
        })?;
        let mut out = MapperConfig::new();
        for (attr, spec) in obj {
            if attr.ends_with("_key") || attr.ends_with("_type") {
                continue;
            }
            match spec {
                Value::String(path) => match path.strip_prefix('$') {
                    Some(constant) => out = out.constant(attr, constant),
                    None => out = out.field(attr, path),
                },
                Value::Number(_) | Value::Bool(_) => {
                    out = out.constant(attr, spec.clone());
                }
                Value::Object(inner) => {
                    let is_array = obj.get(&format!("{}_type", attr)).and_then(Value::as_str)
                        == Some("array");
                    if is_array {
                        let path = obj
                            .get(&format!("{}_key", attr))
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                WizardError::Other(format!("array field {} has no {}_key", attr, attr))
                            })?;
                        match inner.get("item").and_then(Value::as_str) {
                            Some(item) => out = out.pluck(attr, path, item),
                            None => out = out.nested(attr, path, MapperConfig::from_json(spec)?),
                        }
                    } else {
                        out = out.object(attr, MapperConfig::from_json(spec)?);
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    /// Applies the config to one source object.
    ///
    /// Attributes whose path resolves to nothing are left out.
    pub fn parse(&self, source: &Value) -> Map<String, Value> {
        let mut out = Map::new();
        for (attr, spec) in &self.fields {
            let value = match spec {
                FieldSpec::Path(path) => get_json_property(source, path).cloned(),
                FieldSpec::Constant(value) => Some(value.clone()),
                FieldSpec::Pluck { path, item } => {
                    get_json_property(source, path)
                        .and_then(Value::as_array)
                        .map(|elems| {
                            let mut plucked: Vec<Value> = elems
                                .iter()
                                .filter_map(|elem| get_json_property(elem, item).cloned())
                                .collect();
                            plucked.sort_by(compare_scalars);
                            Value::Array(plucked)
                        })
                }
                FieldSpec::Nested { path, config } => get_json_property(source, path)
                    .and_then(Value::as_array)
                    .map(|elems| {
                        Value::Array(
                            elems
                                .iter()
                                .map(|elem| Value::Object(config.parse(elem)))
                                .collect(),
                        )
                    }),
                FieldSpec::Object(config) => Some(Value::Object(config.parse(source))),
            };
            if let Some(value) = value {
                out.insert(attr.clone(), value);
            }
        }
        out
    }
}

fn compare_scalars(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                match chars.peek() {
                    Some('\'') | Some('"') => {
                        let quote = chars.next()?;
                        let mut literal = String::new();
                        loop {
                            let next = chars.next()?;
                            if next == quote {
                                break;
                            }
                            literal.push(next);
                        }
                        if chars.next()? != ']' {
                            return None;
                        }
                        segments.push(Segment::Key(literal));
                    }
                    _ => {
                        let mut digits = String::new();
                        loop {
                            let next = chars.next()?;
                            if next == ']' {
                                break;
                            }
                            digits.push(next);
                        }
                        segments.push(Segment::Index(digits.trim().parse().ok()?));
                    }
                }
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    Some(segments)
}

/// Resolves `path` inside `json`. An empty path returns `json` itself.
pub fn get_json_property<'a>(json: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path)?;
    let mut current = json;
    for segment in &segments {
        current = match segment {
            Segment::Key(key) => current.get(key.as_str())?,
            Segment::Index(index) => current.get(*index)?,
        };
    }
    Some(current)
}

/// A mapper loads one REST payload into the record store.
pub trait Mapper {
    /// Returns how many records were upserted.
    fn map(&self, json: &Value, store: &mut RecordStore) -> WizardResult<usize>;
}
