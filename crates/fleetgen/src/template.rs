//! Template rendering.
//!
//! Templates are Tera files rendered against a [`TemplateContext`] of
//! `containers`, `env` and `docker`. A pipeline may list several template
//! files; they are registered in order under their file name, so a later
//! file with the same name overrides an earlier one, and the first file
//! is the one rendered.
//!
//! The registered filters mirror the container-selection helpers
//! templates need: `where`, `where_not`, `where_exist`, `where_not_exist`,
//! `where_any`, `group_by`, `group_by_keys`, `group_by_label`, `keys`,
//! `closest` and `coalesce`. All of them resolve dotted paths with
//! [`deep_get`] and treat an unresolvable path as "exclude", never as an
//! error.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tera::Tera;

use crate::context::{DockerInfo, RuntimeContainer};
use crate::error::FleetgenError;
use crate::path::deep_get;

/// Everything a template can see.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateContext {
    /// Filtered container records, the main input.
    pub containers: Vec<RuntimeContainer>,
    /// Process environment of the generator itself.
    pub env: HashMap<String, String>,
    /// Last known daemon identity.
    pub docker: DockerInfo,
}

impl TemplateContext {
    /// Builds a context over `containers`, capturing the current process
    /// environment.
    pub fn new(containers: Vec<RuntimeContainer>, docker: DockerInfo) -> Self {
        Self {
            containers,
            env: std::env::vars().collect(),
            docker,
        }
    }
}

/// Rendering seam. Production uses [`TeraRenderer`]; tests substitute
/// fixed output.
pub trait Renderer: Send + Sync + 'static {
    /// Renders the full output for one pipeline.
    fn render(&self, context: &TemplateContext) -> Result<String, FleetgenError>;
}

/// [`Renderer`] backed by Tera templates loaded from disk.
pub struct TeraRenderer {
    tera: Tera,
    entry: String,
}

impl TeraRenderer {
    /// Loads and parses the template files of one pipeline.
    ///
    /// Parse failures are configuration bugs and reported as
    /// [`FleetgenError::Template`].
    pub fn load(paths: &[PathBuf]) -> Result<Self, FleetgenError> {
        if paths.is_empty() {
            return Err(FleetgenError::Template(
                "no template files configured".to_owned(),
            ));
        }

        let mut tera = Tera::default();
        register_filters(&mut tera);

        let mut entry = String::new();
        for (index, path) in paths.iter().enumerate() {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    FleetgenError::Template(format!(
                        "invalid template path: {}",
                        path.display()
                    ))
                })?;
            let source = std::fs::read_to_string(path).map_err(|e| {
                FleetgenError::Template(format!(
                    "failed to read template {}: {e}",
                    path.display()
                ))
            })?;
            tera.add_raw_template(name, &source).map_err(|e| {
                FleetgenError::Template(format!(
                    "failed to parse template {}: {e}",
                    path.display()
                ))
            })?;
            if index == 0 {
                entry = name.to_owned();
            }
        }

        Ok(Self { tera, entry })
    }
}

impl Renderer for TeraRenderer {
    fn render(&self, context: &TemplateContext) -> Result<String, FleetgenError> {
        let ctx = tera::Context::from_serialize(context)
            .map_err(|e| FleetgenError::Template(format!("context build failed: {e}")))?;
        self.tera
            .render(&self.entry, &ctx)
            .map_err(|e| FleetgenError::Template(format!("render of {} failed: {e}", self.entry)))
    }
}

/// Removes whitespace-only lines, keeping a trailing newline if the
/// input had one.
pub fn strip_blank_lines(input: &str) -> String {
    let trailing = input.ends_with('\n');
    let mut output = input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if trailing && !output.is_empty() {
        output.push('\n');
    }
    output
}

fn register_filters(tera: &mut Tera) {
    tera.register_filter("where", where_filter);
    tera.register_filter("where_not", where_not_filter);
    tera.register_filter("where_exist", where_exist_filter);
    tera.register_filter("where_not_exist", where_not_exist_filter);
    tera.register_filter("where_any", where_any_filter);
    tera.register_filter("group_by", group_by_filter);
    tera.register_filter("group_by_keys", group_by_keys_filter);
    tera.register_filter("group_by_label", group_by_label_filter);
    tera.register_filter("keys", keys_filter);
    tera.register_filter("closest", closest_filter);
    tera.register_filter("coalesce", coalesce_filter);
}

fn entries<'a>(value: &'a Value, filter: &str) -> tera::Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| tera::Error::msg(format!("`{filter}` expects an array")))
}

fn required_str<'a>(
    args: &'a HashMap<String, Value>,
    name: &str,
    filter: &str,
) -> tera::Result<&'a str> {
    args.get(name).and_then(Value::as_str).ok_or_else(|| {
        tera::Error::msg(format!("`{filter}` requires a string `{name}` argument"))
    })
}

/// Stringifies a scalar for use as a group key; compound values cannot
/// group and resolve to no key.
fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn select<F>(value: &Value, filter: &str, keep: F) -> tera::Result<Value>
where
    F: Fn(&Value) -> bool,
{
    let selected = entries(value, filter)?
        .iter()
        .filter(|entry| keep(entry))
        .cloned()
        .collect();
    Ok(Value::Array(selected))
}

fn where_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "where")?;
    let cmp = args.get("value").cloned().unwrap_or(Value::Null);
    select(value, "where", |entry| deep_get(entry, key) == Some(&cmp))
}

fn where_not_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "where_not")?;
    let cmp = args.get("value").cloned().unwrap_or(Value::Null);
    select(value, "where_not", |entry| deep_get(entry, key) != Some(&cmp))
}

fn where_exist_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "where_exist")?;
    select(value, "where_exist", |entry| deep_get(entry, key).is_some())
}

fn where_not_exist_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "where_not_exist")?;
    select(value, "where_not_exist", |entry| {
        deep_get(entry, key).is_none()
    })
}

/// Keeps entries whose value at `key`, split on `sep` (default `,`),
/// shares at least one element with `values`.
fn where_any_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "where_any")?;
    let sep = args.get("sep").and_then(Value::as_str).unwrap_or(",");
    let wanted: HashSet<&str> = args
        .get("values")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    select(value, "where_any", |entry| {
        deep_get(entry, key)
            .and_then(Value::as_str)
            .is_some_and(|raw| raw.split(sep).any(|item| wanted.contains(item)))
    })
}

fn group_entries(
    value: &Value,
    filter: &str,
    key_of: impl Fn(&Value) -> Option<String>,
) -> tera::Result<BTreeMap<String, Vec<Value>>> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for entry in entries(value, filter)? {
        if let Some(group) = key_of(entry) {
            groups.entry(group).or_default().push(entry.clone());
        }
    }
    Ok(groups)
}

fn group_by_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "group_by")?;
    let groups = group_entries(value, "group_by", |entry| {
        deep_get(entry, key).and_then(scalar_key)
    })?;
    serde_json::to_value(groups).map_err(|e| tera::Error::msg(e.to_string()))
}

fn group_by_keys_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let key = required_str(args, "key", "group_by_keys")?;
    let mut keys = BTreeSet::new();
    for entry in entries(value, "group_by_keys")? {
        if let Some(group) = deep_get(entry, key).and_then(scalar_key) {
            keys.insert(group);
        }
    }
    serde_json::to_value(keys).map_err(|e| tera::Error::msg(e.to_string()))
}

fn group_by_label_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let label = required_str(args, "label", "group_by_label")?;
    let path = format!("Labels.{label}");
    let groups = group_entries(value, "group_by_label", |entry| {
        deep_get(entry, &path).and_then(scalar_key)
    })?;
    serde_json::to_value(groups).map_err(|e| tera::Error::msg(e.to_string()))
}

fn keys_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let object = value
        .as_object()
        .ok_or_else(|| tera::Error::msg("`keys` expects a map"))?;
    let mut keys: Vec<String> = object.keys().cloned().collect();
    keys.sort();
    serde_json::to_value(keys).map_err(|e| tera::Error::msg(e.to_string()))
}

/// Longest candidate that is a substring of `name`; empty string when
/// nothing matches.
fn closest_filter(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let name = required_str(args, "name", "closest")?;
    let mut best = "";
    for candidate in entries(value, "closest")?.iter().filter_map(Value::as_str) {
        if name.contains(candidate) && candidate.len() > best.len() {
            best = candidate;
        }
    }
    Ok(Value::String(best.to_owned()))
}

fn coalesce_filter(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    for entry in entries(value, "coalesce")? {
        if !entry.is_null() {
            return Ok(entry.clone());
        }
    }
    Ok(Value::Null)
}
