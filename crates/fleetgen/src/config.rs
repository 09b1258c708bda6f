//! Pipeline configuration.
//!
//! A [`FleetgenConfig`] is loaded once at startup from a TOML file
//! (`[[pipeline]]` tables) or assembled from CLI flags, validated, and never
//! mutated afterwards. Each [`PipelineConfig`] describes one (template set,
//! destination) generation task together with its triggers and filters.
//!
//! ```toml
//! [[pipeline]]
//! template = "/etc/fleetgen/nginx.tmpl"
//! dest = "/etc/nginx/conf.d/default.conf"
//! watch = true
//! wait = "500ms:2s"
//! notify_cmd = "nginx -s reload"
//! only_published = true
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::FleetgenError;

/// Restart instead of signalling when used as a signal number.
pub const RESTART_SIGNAL: i32 = -1;

const MAX_INTERVAL_SECS: u64 = 86_400;

/// Debounce window for event-driven pipelines.
///
/// `min` is the quiet period after the last event; `max` bounds the total
/// latency from the first event of a burst. `min == 0` disables debouncing.
/// Invariant: `max >= min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub struct Wait {
    /// Quiet period required before a trigger fires.
    pub min: Duration,
    /// Upper bound on trigger latency for a burst.
    pub max: Duration,
}

impl Wait {
    /// Builds a wait window, rejecting `max < min`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, FleetgenError> {
        if max < min {
            return Err(FleetgenError::Config {
                field: "wait".to_owned(),
                reason: "max must not be less than min".to_owned(),
            });
        }
        Ok(Self { min, max })
    }

    /// Parses the `"min[:max]"` form, e.g. `"500ms:2s"`.
    ///
    /// A missing max defaults to four times min. Blank input yields the
    /// disabled window `{0, 0}`.
    pub fn parse(s: &str) -> Result<Self, FleetgenError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }

        let (min_str, max_str) = match s.split_once(':') {
            Some((min, max)) => (min, Some(max)),
            None => (s, None),
        };

        let min = parse_duration(min_str.trim())?;
        let max = match max_str {
            Some(max) => parse_duration(max.trim())?,
            None => min * 4,
        };
        Self::new(min, max)
    }

    /// Whether debouncing is disabled for this window.
    pub fn is_disabled(&self) -> bool {
        self.min.is_zero()
    }
}

impl TryFrom<String> for Wait {
    type Error = FleetgenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Parses a duration like `"500ms"`, `"2s"`, `"5m"` or `"1m30s"`.
fn parse_duration(s: &str) -> Result<Duration, FleetgenError> {
    let invalid = |reason: &str| FleetgenError::Config {
        field: "wait".to_owned(),
        reason: format!("invalid duration '{s}': {reason}"),
    };

    if s.is_empty() {
        return Err(invalid("empty"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid("missing unit"))?;
        if digits_end == 0 {
            return Err(invalid("expected a number"));
        }
        let (num, tail) = rest.split_at(digits_end);
        let value: u64 = num.parse().map_err(|_| invalid("number out of range"))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(invalid("unknown unit")),
        };
        rest = tail;
    }
    Ok(total)
}

/// Template path list, accepted as either a single `;`-separated string or a
/// TOML array. Order matters: later files override same-named templates.
fn deserialize_templates<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s
            .split(';')
            .filter(|p| !p.trim().is_empty())
            .map(|p| PathBuf::from(p.trim()))
            .collect(),
        OneOrMany::Many(paths) => paths,
    })
}

/// One configured generation task.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Ordered template sources. Later files override same-named templates.
    #[serde(deserialize_with = "deserialize_templates")]
    pub template: Vec<PathBuf>,
    /// Destination file. `None` writes rendered output to stdout.
    #[serde(default)]
    pub dest: Option<PathBuf>,
    /// Regenerate on container events.
    #[serde(default)]
    pub watch: bool,
    /// Debounce window applied to the event trigger.
    #[serde(default)]
    pub wait: Wait,
    /// Shell command run after a changed regeneration.
    #[serde(default)]
    pub notify_cmd: Option<String>,
    /// Log the notify command's combined output line by line.
    #[serde(default)]
    pub notify_output: bool,
    /// Containers to signal after a changed regeneration (name/id to signal
    /// number; [`RESTART_SIGNAL`] restarts instead).
    #[serde(default)]
    pub notify_containers: BTreeMap<String, i32>,
    /// Docker list filter selecting additional signal targets.
    #[serde(default)]
    pub notify_containers_filter: HashMap<String, Vec<String>>,
    /// Signal delivered to filter-matched containers.
    #[serde(default)]
    pub notify_containers_signal: i32,
    /// Docker list filter restricting which containers enter the template
    /// context (`label`, `status`, `name` predicates).
    #[serde(default)]
    pub container_filter: HashMap<String, Vec<String>>,
    /// Keep only containers with at least one address.
    #[serde(default)]
    pub only_exposed: bool,
    /// Keep only containers with at least one host-published address.
    #[serde(default)]
    pub only_published: bool,
    /// Include stopped containers in the template context.
    #[serde(default)]
    pub include_stopped: bool,
    /// Keep whitespace-only lines in the rendered output.
    #[serde(default)]
    pub keep_blank_lines: bool,
    /// Periodic regeneration interval in seconds; 0 disables the timer.
    #[serde(default)]
    pub interval_secs: u64,
}

impl PipelineConfig {
    /// Validates a single pipeline entry.
    pub fn validate(&self) -> Result<(), FleetgenError> {
        if self.template.is_empty() {
            return Err(FleetgenError::Config {
                field: "template".to_owned(),
                reason: "at least one template path is required".to_owned(),
            });
        }
        if self.interval_secs > MAX_INTERVAL_SECS {
            return Err(FleetgenError::Config {
                field: "interval_secs".to_owned(),
                reason: format!("must be 0-{MAX_INTERVAL_SECS}"),
            });
        }
        if self.wait.max < self.wait.min {
            return Err(FleetgenError::Config {
                field: "wait".to_owned(),
                reason: "max must not be less than min".to_owned(),
            });
        }
        if !self.notify_containers_filter.is_empty() && self.notify_containers_signal == 0 {
            return Err(FleetgenError::Config {
                field: "notify_containers_signal".to_owned(),
                reason: "required when notify_containers_filter is set".to_owned(),
            });
        }
        Ok(())
    }

    /// Name used in log lines; the destination or `"<stdout>"`.
    pub fn display_dest(&self) -> String {
        match &self.dest {
            Some(path) => path.display().to_string(),
            None => "<stdout>".to_owned(),
        }
    }
}

/// Top-level configuration: the Docker endpoint plus all pipelines.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetgenConfig {
    /// Docker endpoint override, e.g. `unix:///var/run/docker.sock`.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Pipeline definitions.
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<PipelineConfig>,
}

impl FleetgenConfig {
    /// Loads and validates a TOML config file.
    pub async fn load(path: &Path) -> Result<Self, FleetgenError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FleetgenError::ConfigIo {
                path: path.display().to_string(),
                source: e,
            })?;
        let config: Self = toml::from_str(&raw).map_err(|e| FleetgenError::ConfigParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every pipeline.
    pub fn validate(&self) -> Result<(), FleetgenError> {
        if self.pipelines.is_empty() {
            return Err(FleetgenError::Config {
                field: "pipeline".to_owned(),
                reason: "at least one pipeline is required".to_owned(),
            });
        }
        for pipeline in &self.pipelines {
            pipeline.validate()?;
        }
        Ok(())
    }

    /// Whether any pipeline subscribes to container events.
    pub fn has_watchers(&self) -> bool {
        self.pipelines.iter().any(|p| p.watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_parse_min_and_max() {
        let wait = Wait::parse("500ms:2s").unwrap();
        assert_eq!(wait.min, Duration::from_millis(500));
        assert_eq!(wait.max, Duration::from_secs(2));
    }

    #[test]
    fn wait_parse_min_only_defaults_max() {
        let wait = Wait::parse("500ms").unwrap();
        assert_eq!(wait.min, Duration::from_millis(500));
        assert_eq!(wait.max, Duration::from_secs(2));
    }

    #[test]
    fn wait_parse_blank_disables_debounce() {
        let wait = Wait::parse("  ").unwrap();
        assert_eq!(wait, Wait::default());
        assert!(wait.is_disabled());
    }

    #[test]
    fn wait_parse_rejects_max_below_min() {
        assert!(Wait::parse("2s:500ms").is_err());
    }

    #[test]
    fn wait_parse_rejects_garbage() {
        assert!(Wait::parse("fast").is_err());
        assert!(Wait::parse("10").is_err());
        assert!(Wait::parse("10parsecs").is_err());
    }

    #[test]
    fn duration_compound_segments() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn config_parses_pipeline_table() {
        let config: FleetgenConfig = toml::from_str(
            r#"
            endpoint = "unix:///var/run/docker.sock"

            [[pipeline]]
            template = "/etc/fleetgen/nginx.tmpl"
            dest = "/etc/nginx/conf.d/default.conf"
            watch = true
            wait = "500ms:2s"
            notify_cmd = "nginx -s reload"
            only_published = true

            [[pipeline]]
            template = ["/etc/fleetgen/base.tmpl", "/etc/fleetgen/site.tmpl"]
            interval_secs = 30
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.pipelines.len(), 2);
        assert!(config.pipelines[0].watch);
        assert_eq!(
            config.pipelines[0].wait.min,
            Duration::from_millis(500)
        );
        assert_eq!(config.pipelines[1].template.len(), 2);
        assert_eq!(config.pipelines[1].interval_secs, 30);
        assert!(config.pipelines[1].dest.is_none());
        assert!(config.has_watchers());
    }

    #[test]
    fn config_template_string_splits_on_semicolon() {
        let config: FleetgenConfig = toml::from_str(
            r#"
            [[pipeline]]
            template = "a.tmpl;b.tmpl"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.pipelines[0].template,
            vec![PathBuf::from("a.tmpl"), PathBuf::from("b.tmpl")]
        );
    }

    #[test]
    fn config_rejects_unknown_field() {
        let result: Result<FleetgenConfig, _> = toml::from_str(
            r#"
            [[pipeline]]
            template = "a.tmpl"
            watchh = true
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_empty_template_list() {
        let config: FleetgenConfig = toml::from_str(
            r#"
            [[pipeline]]
            template = ""
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_filter_without_signal() {
        let config: FleetgenConfig = toml::from_str(
            r#"
            [[pipeline]]
            template = "a.tmpl"

            [pipeline.notify_containers_filter]
            label = ["role=proxy"]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_pipelines() {
        let config = FleetgenConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn notify_containers_signal_map() {
        let config: FleetgenConfig = toml::from_str(
            r#"
            [[pipeline]]
            template = "a.tmpl"

            [pipeline.notify_containers]
            nginx = 1
            haproxy = -1
            "#,
        )
        .unwrap();
        let pipeline = &config.pipelines[0];
        assert_eq!(pipeline.notify_containers["nginx"], 1);
        assert_eq!(pipeline.notify_containers["haproxy"], RESTART_SIGNAL);
    }

    #[test]
    fn container_filter_map() {
        let config: FleetgenConfig = toml::from_str(
            r#"
            [[pipeline]]
            template = "a.tmpl"

            [pipeline.container_filter]
            label = ["com.example.role=web"]
            status = ["running"]
            "#,
        )
        .unwrap();
        let filter = &config.pipelines[0].container_filter;
        assert_eq!(filter["label"], vec!["com.example.role=web"]);
        assert_eq!(filter["status"], vec!["running"]);
    }

    #[tokio::test]
    async fn load_missing_file_reports_path() {
        let err = FleetgenConfig::load(Path::new("/nonexistent/fleetgen.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/fleetgen.toml"));
    }
}
