//! Docker API abstraction.
//!
//! The [`DockerClient`] trait is the engine's only view of the container
//! runtime: listings, inspections, networks, the event stream, signal
//! delivery and daemon identity. Production code uses
//! [`BollardDockerClient`]; tests script a mock. Every operation is
//! fallible and treated as retryable by the callers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bollard::models::ContainerInspectResponse;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::context::DockerInfo;
use crate::error::FleetgenError;
use crate::event::{ContainerEvent, EventKind};

/// Abstraction over the container runtime API.
pub trait DockerClient: Send + Sync + 'static {
    /// Lists container ids. `all` includes stopped containers; `filters`
    /// is the daemon-side list filter (label/status/name predicates).
    fn list_containers(
        &self,
        all: bool,
        filters: HashMap<String, Vec<String>>,
    ) -> impl Future<Output = Result<Vec<String>, FleetgenError>> + Send;

    /// Inspects one container.
    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerInspectResponse, FleetgenError>> + Send;

    /// Lists networks as a name to `internal`-flag map.
    fn list_networks(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, bool>, FleetgenError>> + Send;

    /// Opens the daemon event stream.
    ///
    /// The stream yields every container/network event; allow-list
    /// filtering happens at the watcher. Stream errors indicate a broken
    /// subscription and are handled by reconnecting.
    fn events(&self) -> BoxStream<'static, Result<ContainerEvent, FleetgenError>>;

    /// Sends a signal (name or number, e.g. `"SIGHUP"` or `"1"`) to a
    /// container addressed by name or id.
    fn kill_container(
        &self,
        id: &str,
        signal: &str,
    ) -> impl Future<Output = Result<(), FleetgenError>> + Send;

    /// Restarts a container with a 10 second stop grace period.
    fn restart_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<(), FleetgenError>> + Send;

    /// Checks daemon liveness.
    fn ping(&self) -> impl Future<Output = Result<(), FleetgenError>> + Send;

    /// Fetches daemon identity and version info.
    fn server_info(&self) -> impl Future<Output = Result<DockerInfo, FleetgenError>> + Send;
}

/// Production client backed by `bollard`.
pub struct BollardDockerClient {
    docker: Arc<bollard::Docker>,
}

impl BollardDockerClient {
    /// Connects using the platform default local socket.
    pub fn connect_local() -> Result<Self, FleetgenError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            FleetgenError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to an explicit endpoint (`unix://...` or `tcp://...`).
    pub fn connect(endpoint: &str) -> Result<Self, FleetgenError> {
        let docker = if let Some(path) = endpoint.strip_prefix("unix://") {
            bollard::Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
        } else {
            bollard::Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| {
            FleetgenError::DockerConnection(format!(
                "failed to connect to docker at {endpoint}: {e}"
            ))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

impl DockerClient for BollardDockerClient {
    async fn list_containers(
        &self,
        all: bool,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, FleetgenError> {
        use bollard::container::ListContainersOptions;

        let options = ListContainersOptions::<String> {
            all,
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("list containers failed: {e}")))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .collect())
    }

    async fn inspect_container(
        &self,
        id: &str,
    ) -> Result<ContainerInspectResponse, FleetgenError> {
        self.docker
            .inspect_container(id, None)
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("inspect {id} failed: {e}")))
    }

    async fn list_networks(&self) -> Result<HashMap<String, bool>, FleetgenError> {
        let networks = self
            .docker
            .list_networks::<String>(None)
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("list networks failed: {e}")))?;

        Ok(networks
            .into_iter()
            .filter_map(|n| n.name.map(|name| (name, n.internal.unwrap_or(false))))
            .collect())
    }

    fn events(&self) -> BoxStream<'static, Result<ContainerEvent, FleetgenError>> {
        use bollard::models::EventMessageTypeEnum;
        use bollard::system::EventsOptions;

        self.docker
            .events(Some(EventsOptions::<String>::default()))
            .filter_map(|item| async move {
                match item {
                    Ok(message) => {
                        let kind = match message.typ {
                            Some(EventMessageTypeEnum::CONTAINER) => EventKind::Container,
                            Some(EventMessageTypeEnum::NETWORK) => EventKind::Network,
                            _ => return None,
                        };
                        let action = message.action.unwrap_or_default();
                        let id = message
                            .actor
                            .and_then(|a| a.id)
                            .unwrap_or_default();
                        Some(Ok(ContainerEvent::new(kind, action, id)))
                    }
                    Err(e) => Some(Err(FleetgenError::DockerApi(format!(
                        "event stream failed: {e}"
                    )))),
                }
            })
            .boxed()
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), FleetgenError> {
        use bollard::container::KillContainerOptions;

        self.docker
            .kill_container(id, Some(KillContainerOptions { signal }))
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("kill {id} failed: {e}")))
    }

    async fn restart_container(&self, id: &str) -> Result<(), FleetgenError> {
        use bollard::container::RestartContainerOptions;

        self.docker
            .restart_container(id, Some(RestartContainerOptions { t: 10 }))
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("restart {id} failed: {e}")))
    }

    async fn ping(&self) -> Result<(), FleetgenError> {
        self.docker
            .ping()
            .await
            .map_err(|e| FleetgenError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }

    async fn server_info(&self) -> Result<DockerInfo, FleetgenError> {
        let info = self
            .docker
            .info()
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("daemon info failed: {e}")))?;
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| FleetgenError::DockerApi(format!("daemon version failed: {e}")))?;

        Ok(DockerInfo {
            name: info.name.unwrap_or_default(),
            num_containers: info.containers.unwrap_or_default(),
            num_images: info.images.unwrap_or_default(),
            version: version.version.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
            operating_system: version.os.unwrap_or_default(),
            architecture: version.arch.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scriptable in-process client for unit tests.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    pub struct MockDockerClient {
        pub containers: Vec<ContainerInspectResponse>,
        pub networks: HashMap<String, bool>,
        pub info: DockerInfo,
        pub fail_api: AtomicBool,
        pub fail_actions: AtomicBool,
        pub fail_ping: AtomicBool,
        pub kills: Mutex<Vec<(String, String)>>,
        pub restarts: Mutex<Vec<String>>,
        pub list_calls: AtomicUsize,
        pub list_filters: Mutex<Vec<HashMap<String, Vec<String>>>>,
        event_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<ContainerEvent, FleetgenError>>>>,
    }

    impl MockDockerClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_containers(mut self, containers: Vec<ContainerInspectResponse>) -> Self {
            self.containers = containers;
            self
        }

        pub fn with_failing_actions(self) -> Self {
            self.fail_actions.store(true, Ordering::SeqCst);
            self
        }

        /// Arms the event stream. Events sent on the returned sender are
        /// yielded by the next `events()` call; dropping the sender ends
        /// the stream.
        pub fn with_event_feed(
            self,
        ) -> (
            Self,
            mpsc::UnboundedSender<Result<ContainerEvent, FleetgenError>>,
        ) {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.event_rx.lock().unwrap() = Some(rx);
            (self, tx)
        }
    }

    impl DockerClient for MockDockerClient {
        async fn list_containers(
            &self,
            _all: bool,
            filters: HashMap<String, Vec<String>>,
        ) -> Result<Vec<String>, FleetgenError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.list_filters.lock().unwrap().push(filters);
            if self.fail_api.load(Ordering::SeqCst) {
                return Err(FleetgenError::DockerApi("mock list failure".to_owned()));
            }
            Ok(self
                .containers
                .iter()
                .filter_map(|c| c.id.clone())
                .collect())
        }

        async fn inspect_container(
            &self,
            id: &str,
        ) -> Result<ContainerInspectResponse, FleetgenError> {
            if self.fail_api.load(Ordering::SeqCst) {
                return Err(FleetgenError::DockerApi("mock inspect failure".to_owned()));
            }
            self.containers
                .iter()
                .find(|c| c.id.as_deref() == Some(id))
                .cloned()
                .ok_or_else(|| FleetgenError::DockerApi(format!("no such container: {id}")))
        }

        async fn list_networks(&self) -> Result<HashMap<String, bool>, FleetgenError> {
            Ok(self.networks.clone())
        }

        fn events(&self) -> BoxStream<'static, Result<ContainerEvent, FleetgenError>> {
            match self.event_rx.lock().unwrap().take() {
                Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                })
                .boxed(),
                None => futures::stream::empty().boxed(),
            }
        }

        async fn kill_container(&self, id: &str, signal: &str) -> Result<(), FleetgenError> {
            if self.fail_actions.load(Ordering::SeqCst) {
                return Err(FleetgenError::DockerApi("mock kill failure".to_owned()));
            }
            self.kills
                .lock()
                .unwrap()
                .push((id.to_owned(), signal.to_owned()));
            Ok(())
        }

        async fn restart_container(&self, id: &str) -> Result<(), FleetgenError> {
            if self.fail_actions.load(Ordering::SeqCst) {
                return Err(FleetgenError::DockerApi("mock restart failure".to_owned()));
            }
            self.restarts.lock().unwrap().push(id.to_owned());
            Ok(())
        }

        async fn ping(&self) -> Result<(), FleetgenError> {
            if self.fail_ping.load(Ordering::SeqCst) {
                return Err(FleetgenError::DockerConnection("mock ping failure".to_owned()));
            }
            Ok(())
        }

        async fn server_info(&self) -> Result<DockerInfo, FleetgenError> {
            if self.fail_api.load(Ordering::SeqCst) {
                return Err(FleetgenError::DockerApi("mock info failure".to_owned()));
            }
            Ok(self.info.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDockerClient;
    use super::*;

    fn inspect(id: &str) -> ContainerInspectResponse {
        ContainerInspectResponse {
            id: Some(id.to_owned()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_lists_container_ids() {
        let client =
            MockDockerClient::new().with_containers(vec![inspect("aaa"), inspect("bbb")]);
        let ids = client.list_containers(false, HashMap::new()).await.unwrap();
        assert_eq!(ids, vec!["aaa", "bbb"]);
    }

    #[tokio::test]
    async fn mock_inspect_unknown_is_error() {
        let client = MockDockerClient::new();
        assert!(client.inspect_container("missing").await.is_err());
    }

    #[tokio::test]
    async fn mock_records_signal_deliveries() {
        let client = MockDockerClient::new();
        client.kill_container("web", "SIGHUP").await.unwrap();
        client.restart_container("proxy").await.unwrap();

        assert_eq!(
            client.kills.lock().unwrap().clone(),
            vec![("web".to_owned(), "SIGHUP".to_owned())]
        );
        assert_eq!(client.restarts.lock().unwrap().clone(), vec!["proxy"]);
    }

    #[tokio::test]
    async fn mock_failing_actions() {
        let client = MockDockerClient::new().with_failing_actions();
        assert!(client.kill_container("web", "SIGHUP").await.is_err());
        assert!(client.restart_container("web").await.is_err());
    }

    #[tokio::test]
    async fn mock_event_feed_yields_and_closes() {
        let (client, tx) = MockDockerClient::new().with_event_feed();
        let mut events = client.events();

        tx.send(Ok(ContainerEvent::new(EventKind::Container, "start", "abc")))
            .unwrap();
        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.action, "start");

        drop(tx);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn mock_events_without_feed_is_empty() {
        let client = MockDockerClient::new();
        let mut events = client.events();
        assert!(events.next().await.is_none());
    }

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn clients_are_shareable() {
        assert_send_sync::<MockDockerClient>();
        assert_send_sync::<BollardDockerClient>();
    }
}
