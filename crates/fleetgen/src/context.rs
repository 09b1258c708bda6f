//! Template-facing container model.
//!
//! [`RuntimeContainer`] is the normalized snapshot of one container that
//! templates see. Records are rebuilt from scratch on every tick from the
//! raw inspect data and never mutated. Serialized field names are the
//! capitalized forms templates address through the deep path accessor
//! (`ID`, `State.Running`, `Env.VIRTUAL_HOST`, ...).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bollard::models::ContainerInspectResponse;
use serde::Serialize;
use tokio::sync::RwLock;

/// Image reference split into its addressable parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DockerImage {
    /// Registry host, empty for Docker Hub images.
    pub registry: String,
    /// Repository path.
    pub repository: String,
    /// Tag, empty when unspecified.
    pub tag: String,
}

impl DockerImage {
    /// Splits `registry/repository:tag`. The first path segment is a
    /// registry only when it contains a `.` or `:`; the tag is everything
    /// after the last `:` outside the registry segment.
    pub fn parse(image: &str) -> Self {
        let mut registry = String::new();
        let mut start = 0;
        if let Some(separator) = image.find('/') {
            let candidate = &image[..separator];
            if candidate.contains('.') || candidate.contains(':') {
                registry = candidate.to_owned();
                start = separator + 1;
            }
        }

        let remainder = &image[start..];
        match remainder.rfind(':') {
            Some(separator) => Self {
                registry,
                repository: remainder[..separator].to_owned(),
                tag: remainder[separator + 1..].to_owned(),
            },
            None => Self {
                registry,
                repository: remainder.to_owned(),
                tag: String::new(),
            },
        }
    }
}

impl fmt::Display for DockerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.registry.is_empty() {
            write!(f, "{}/", self.registry)?;
        }
        write!(f, "{}", self.repository)?;
        if !self.tag.is_empty() {
            write!(f, ":{}", self.tag)?;
        }
        Ok(())
    }
}

/// Health information of a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Health {
    /// Daemon health status string (`healthy`, `unhealthy`, ...).
    pub status: String,
}

/// Run state of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct State {
    /// Whether the container is currently running.
    pub running: bool,
    /// Health check result, if a health check is configured.
    pub health: Health,
}

/// One exposed or published port of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Address {
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "IP6LinkLocal")]
    pub ip6_link_local: String,
    #[serde(rename = "IP6Global")]
    pub ip6_global: String,
    /// Container-side port number.
    pub port: String,
    /// Host-side port if the port is published, empty otherwise.
    pub host_port: String,
    /// Host address the port is bound to, empty when unpublished.
    #[serde(rename = "HostIP")]
    pub host_ip: String,
    /// Protocol, `tcp` or `udp`.
    pub proto: String,
}

/// Per-network endpoint details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    #[serde(rename = "IP")]
    pub ip: String,
    pub name: String,
    pub gateway: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "IPv6Gateway")]
    pub ipv6_gateway: String,
    #[serde(rename = "GlobalIPv6Address")]
    pub global_ipv6_address: String,
    pub mac_address: String,
    #[serde(rename = "GlobalIPv6PrefixLen")]
    pub global_ipv6_prefix_len: i64,
    #[serde(rename = "IPPrefixLen")]
    pub ip_prefix_len: i64,
    /// Whether the network is marked internal (no external gateway).
    pub internal: bool,
}

/// One mount of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    pub name: String,
    pub source: String,
    pub destination: String,
    pub driver: String,
    pub mode: String,
    #[serde(rename = "RW")]
    pub rw: bool,
}

/// Normalized, template-facing snapshot of one container.
///
/// Equality is identity only: two records are equal when `(id, image)`
/// match, regardless of the rest of the snapshot.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeContainer {
    #[serde(rename = "ID")]
    pub id: String,
    /// Creation timestamp as reported by the daemon (RFC 3339).
    pub created: String,
    pub name: String,
    pub hostname: String,
    pub image: DockerImage,
    pub state: State,
    pub addresses: Vec<Address>,
    pub networks: Vec<Network>,
    pub gateway: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "IP6LinkLocal")]
    pub ip6_link_local: String,
    #[serde(rename = "IP6Global")]
    pub ip6_global: String,
    pub network_mode: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<Mount>,
}

impl PartialEq for RuntimeContainer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.image == other.image
    }
}

impl Eq for RuntimeContainer {}

impl RuntimeContainer {
    /// Builds a record from raw inspect data.
    ///
    /// `internal_networks` maps network names to their `internal` flag,
    /// looked up from the separately-listed networks.
    pub fn from_inspect(
        inspect: &ContainerInspectResponse,
        internal_networks: &HashMap<String, bool>,
    ) -> Self {
        let config = inspect.config.as_ref();
        let settings = inspect.network_settings.as_ref();
        let state = inspect.state.as_ref();

        let image = DockerImage::parse(
            config
                .and_then(|c| c.image.as_deref())
                .unwrap_or_default(),
        );

        let ip = settings
            .and_then(|s| s.ip_address.clone())
            .unwrap_or_default();
        let ip6_link_local = settings
            .and_then(|s| s.link_local_ipv6_address.clone())
            .unwrap_or_default();
        let ip6_global = settings
            .and_then(|s| s.global_ipv6_address.clone())
            .unwrap_or_default();

        let mut networks = Vec::new();
        if let Some(endpoints) = settings.and_then(|s| s.networks.as_ref()) {
            for (name, endpoint) in endpoints {
                networks.push(Network {
                    ip: endpoint.ip_address.clone().unwrap_or_default(),
                    name: name.clone(),
                    gateway: endpoint.gateway.clone().unwrap_or_default(),
                    endpoint_id: endpoint.endpoint_id.clone().unwrap_or_default(),
                    ipv6_gateway: endpoint.ipv6_gateway.clone().unwrap_or_default(),
                    global_ipv6_address: endpoint
                        .global_ipv6_address
                        .clone()
                        .unwrap_or_default(),
                    mac_address: endpoint.mac_address.clone().unwrap_or_default(),
                    global_ipv6_prefix_len: endpoint.global_ipv6_prefix_len.unwrap_or_default(),
                    ip_prefix_len: endpoint.ip_prefix_len.unwrap_or_default(),
                    internal: internal_networks.get(name).copied().unwrap_or(false),
                });
            }
        }
        networks.sort_by(|a, b| a.name.cmp(&b.name));

        let mut mounts = Vec::new();
        if let Some(points) = inspect.mounts.as_ref() {
            for point in points {
                mounts.push(Mount {
                    name: point.name.clone().unwrap_or_default(),
                    source: point.source.clone().unwrap_or_default(),
                    destination: point.destination.clone().unwrap_or_default(),
                    driver: point.driver.clone().unwrap_or_default(),
                    mode: point.mode.clone().unwrap_or_default(),
                    rw: point.rw.unwrap_or(false),
                });
            }
        }

        Self {
            id: inspect.id.clone().unwrap_or_default(),
            created: inspect.created.clone().unwrap_or_default(),
            name: inspect
                .name
                .as_deref()
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_owned(),
            hostname: config
                .and_then(|c| c.hostname.clone())
                .unwrap_or_default(),
            image,
            state: State {
                running: state.and_then(|s| s.running).unwrap_or(false),
                health: Health {
                    status: state
                        .and_then(|s| s.health.as_ref())
                        .and_then(|h| h.status.as_ref())
                        .map(|s| s.to_string())
                        .unwrap_or_default(),
                },
            },
            addresses: container_addresses(inspect),
            networks,
            gateway: settings
                .and_then(|s| s.gateway.clone())
                .unwrap_or_default(),
            ip,
            ip6_link_local,
            ip6_global,
            network_mode: inspect
                .host_config
                .as_ref()
                .and_then(|h| h.network_mode.clone())
                .unwrap_or_default(),
            env: split_key_value_pairs(
                config.and_then(|c| c.env.as_deref()).unwrap_or_default(),
            ),
            labels: config
                .and_then(|c| c.labels.clone())
                .unwrap_or_default(),
            mounts,
        }
    }

    /// Addresses with a host-mapped port binding.
    pub fn published_addresses(&self) -> Vec<&Address> {
        self.addresses
            .iter()
            .filter(|a| !a.host_port.is_empty())
            .collect()
    }
}

/// Builds the address list from `NetworkSettings.Ports`, falling back to
/// `Config.ExposedPorts` when the port map is empty (internal-only
/// networks report no port map at all).
fn container_addresses(inspect: &ContainerInspectResponse) -> Vec<Address> {
    let settings = inspect.network_settings.as_ref();
    let base = Address {
        ip: settings
            .and_then(|s| s.ip_address.clone())
            .unwrap_or_default(),
        ip6_link_local: settings
            .and_then(|s| s.link_local_ipv6_address.clone())
            .unwrap_or_default(),
        ip6_global: settings
            .and_then(|s| s.global_ipv6_address.clone())
            .unwrap_or_default(),
        ..Address::default()
    };

    let mut addresses = Vec::new();
    if let Some(ports) = settings.and_then(|s| s.ports.as_ref()) {
        for (spec, bindings) in ports {
            let mut address = base.clone();
            let (port, proto) = split_port_spec(spec);
            address.port = port;
            address.proto = proto;
            if let Some(binding) = bindings.as_ref().and_then(|b| b.first()) {
                address.host_port = binding.host_port.clone().unwrap_or_default();
                address.host_ip = binding.host_ip.clone().unwrap_or_default();
            }
            addresses.push(address);
        }
    }

    if addresses.is_empty() {
        if let Some(exposed) = inspect
            .config
            .as_ref()
            .and_then(|c| c.exposed_ports.as_ref())
        {
            for spec in exposed.keys() {
                let mut address = base.clone();
                let (port, proto) = split_port_spec(spec);
                address.port = port;
                address.proto = proto;
                addresses.push(address);
            }
        }
    }

    addresses.sort_by(|a, b| (&a.port, &a.proto).cmp(&(&b.port, &b.proto)));
    addresses
}

/// Splits a `"80/tcp"` port spec into port and protocol.
fn split_port_spec(spec: &str) -> (String, String) {
    match spec.split_once('/') {
        Some((port, proto)) => (port.to_owned(), proto.to_owned()),
        None => (spec.to_owned(), "tcp".to_owned()),
    }
}

/// Splits `KEY=VALUE` entries at the first `=`. Entries without `=` map to
/// an empty value; later duplicate keys win.
pub fn split_key_value_pairs(entries: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(entries.len());
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) => map.insert(key.to_owned(), value.to_owned()),
            None => map.insert(entry.clone(), String::new()),
        };
    }
    map
}

/// Daemon identity and version snapshot exposed to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DockerInfo {
    pub name: String,
    pub num_containers: i64,
    pub num_images: i64,
    pub version: String,
    pub api_version: String,
    pub operating_system: String,
    pub architecture: String,
}

/// Process-wide cache of the last known daemon info.
///
/// Refreshed opportunistically on every container fetch and read when a
/// template context is assembled. The lock only matters because a refresh
/// can run concurrently with renders of other pipelines.
#[derive(Debug, Clone, Default)]
pub struct DockerInfoCache {
    inner: Arc<RwLock<DockerInfo>>,
}

impl DockerInfoCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached snapshot.
    pub async fn update(&self, info: DockerInfo) {
        *self.inner.write().await = info;
    }

    /// Returns a copy of the cached snapshot.
    pub async fn snapshot(&self) -> DockerInfo {
        self.inner.read().await.clone()
    }
}
