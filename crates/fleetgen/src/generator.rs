//! Pipeline orchestration.
//!
//! [`Generator`] wires every configured pipeline to its triggers: one
//! unconditional pass at startup, an independent ticker per pipeline
//! with an interval, a debounced event consumer per watching pipeline
//! fed by a shared [`EventWatcher`], SIGHUP for a forced full pass and
//! SIGTERM/SIGINT for shutdown. With no watchers and no intervals the
//! startup pass is the whole run.
//!
//! Failure handling follows a strict split: runtime fetch errors are
//! logged and the tick skipped, while render and filesystem errors are
//! configuration bugs that stop the generator with an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{FleetgenConfig, PipelineConfig};
use crate::context::{DockerInfoCache, RuntimeContainer};
use crate::debounce::spawn_debounce;
use crate::docker::DockerClient;
use crate::error::FleetgenError;
use crate::notify::execute_actions;
use crate::template::{strip_blank_lines, Renderer, TemplateContext, TeraRenderer};
use crate::watcher::EventWatcher;
use crate::writer::write_output;

const EVENT_CHANNEL_CAPACITY: usize = 100;

struct PipelineRuntime {
    config: PipelineConfig,
    renderer: Arc<dyn Renderer>,
}

struct Engine<C> {
    client: Arc<C>,
    pipelines: Vec<PipelineRuntime>,
    info: DockerInfoCache,
}

/// Drives all configured pipelines against one Docker client.
pub struct Generator<C> {
    engine: Arc<Engine<C>>,
}

impl<C: DockerClient> Generator<C> {
    /// Builds the generator, loading and parsing every pipeline's
    /// templates. Template problems surface here, before any trigger
    /// runs.
    pub fn new(client: Arc<C>, config: FleetgenConfig) -> Result<Self, FleetgenError> {
        let mut pipelines = Vec::with_capacity(config.pipelines.len());
        for pipeline in config.pipelines {
            let renderer: Arc<dyn Renderer> = Arc::new(TeraRenderer::load(&pipeline.template)?);
            pipelines.push(PipelineRuntime {
                config: pipeline,
                renderer,
            });
        }

        Ok(Self {
            engine: Arc::new(Engine {
                client,
                pipelines,
                info: DockerInfoCache::new(),
            }),
        })
    }

    /// Runs until a termination signal arrives or a fatal error occurs.
    pub async fn run(&self) -> Result<(), FleetgenError> {
        self.run_with_shutdown(CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), with an externally controlled shutdown
    /// token.
    pub async fn run_with_shutdown(
        &self,
        cancel: CancellationToken,
    ) -> Result<(), FleetgenError> {
        let engine = &self.engine;

        engine.regenerate_all().await?;

        // Capacity 1: the first fatal wins, later failures drop theirs
        // via try_send so losing tasks never block shutdown.
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<FleetgenError>(1);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        for (index, runtime) in engine.pipelines.iter().enumerate() {
            if runtime.config.interval_secs == 0 {
                continue;
            }
            info!(
                interval_secs = runtime.config.interval_secs,
                dest = %runtime.config.display_dest(),
                "regenerating on interval"
            );
            tasks.push(spawn_interval(
                Arc::clone(engine),
                index,
                cancel.clone(),
                fatal_tx.clone(),
            ));
        }

        if engine.pipelines.iter().any(|p| p.config.watch) {
            let (resync_tx, resync_rx) = mpsc::channel(1);
            let mut sinks = Vec::new();

            for (index, runtime) in engine.pipelines.iter().enumerate() {
                if !runtime.config.watch {
                    continue;
                }
                let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
                sinks.push(event_tx);
                tasks.push(spawn_event_consumer(
                    Arc::clone(engine),
                    index,
                    spawn_debounce(event_rx, runtime.config.wait),
                    fatal_tx.clone(),
                ));
            }

            let watcher = EventWatcher::new(
                Arc::clone(&engine.client),
                sinks,
                resync_tx,
                cancel.clone(),
            );
            tasks.push(tokio::spawn(watcher.run()));
            tasks.push(spawn_resync_consumer(
                Arc::clone(engine),
                resync_rx,
                fatal_tx.clone(),
            ));
        }

        if tasks.is_empty() {
            // One-shot mode: nothing to trigger beyond the startup pass.
            return Ok(());
        }

        tasks.push(spawn_signal_listener(
            Arc::clone(engine),
            cancel.clone(),
            fatal_tx,
        )?);

        let result = tokio::select! {
            fatal = fatal_rx.recv() => {
                cancel.cancel();
                match fatal {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            _ = cancel.cancelled() => Ok(()),
        };

        // Let in-flight regenerations finish before returning.
        for task in tasks {
            let _ = task.await;
        }
        result
    }
}

fn spawn_interval<C: DockerClient>(
    engine: Arc<Engine<C>>,
    index: usize,
    cancel: CancellationToken,
    fatal_tx: mpsc::Sender<FleetgenError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let secs = engine.pipelines[index].config.interval_secs;
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        // The first tick completes immediately; the startup pass
        // already covered it.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(e) = engine.regenerate(index).await {
                        let _ = fatal_tx.try_send(e);
                        return;
                    }
                }
            }
        }
    })
}

fn spawn_event_consumer<C: DockerClient>(
    engine: Arc<Engine<C>>,
    index: usize,
    mut debounced: mpsc::Receiver<crate::event::ContainerEvent>,
    fatal_tx: mpsc::Sender<FleetgenError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = debounced.recv().await {
            debug!(
                dest = %engine.pipelines[index].config.display_dest(),
                action = %event.action,
                "regenerating after event"
            );
            if let Err(e) = engine.regenerate(index).await {
                let _ = fatal_tx.try_send(e);
                return;
            }
        }
    })
}

fn spawn_resync_consumer<C: DockerClient>(
    engine: Arc<Engine<C>>,
    mut resync_rx: mpsc::Receiver<()>,
    fatal_tx: mpsc::Sender<FleetgenError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while resync_rx.recv().await.is_some() {
            if let Err(e) = engine.regenerate_all().await {
                let _ = fatal_tx.try_send(e);
                return;
            }
        }
    })
}

fn spawn_signal_listener<C: DockerClient>(
    engine: Arc<Engine<C>>,
    cancel: CancellationToken,
    fatal_tx: mpsc::Sender<FleetgenError>,
) -> Result<JoinHandle<()>, FleetgenError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = hangup.recv() => {
                    info!("received SIGHUP, regenerating all pipelines");
                    // Render and filesystem problems are fatal here just
                    // as on any other trigger.
                    if let Err(e) = engine.regenerate_all().await {
                        let _ = fatal_tx.try_send(e);
                        return;
                    }
                }
                _ = terminate.recv() => {
                    info!("received SIGTERM, shutting down");
                    cancel.cancel();
                    return;
                }
                _ = interrupt.recv() => {
                    info!("received SIGINT, shutting down");
                    cancel.cancel();
                    return;
                }
            }
        }
    }))
}

impl<C: DockerClient> Engine<C> {
    async fn regenerate_all(&self) -> Result<(), FleetgenError> {
        for index in 0..self.pipelines.len() {
            self.regenerate(index).await?;
        }
        Ok(())
    }

    /// Regenerates one pipeline. `Err` means a fatal render or
    /// filesystem problem; a failed container fetch skips the tick and
    /// returns `Ok`.
    async fn regenerate(&self, index: usize) -> Result<(), FleetgenError> {
        let runtime = &self.pipelines[index];

        let containers = match self.fetch_containers(&runtime.config).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "failed to list containers, skipping tick");
                return Ok(());
            }
        };

        let context = TemplateContext::new(containers, self.info.snapshot().await);
        let mut output = runtime.renderer.render(&context)?;
        if !runtime.config.keep_blank_lines {
            output = strip_blank_lines(&output);
        }

        let changed = write_output(runtime.config.dest.as_deref(), &output)?;
        if changed {
            info!(dest = %runtime.config.display_dest(), "contents changed");
            execute_actions(self.client.as_ref(), &runtime.config).await;
        } else {
            debug!(dest = %runtime.config.display_dest(), "contents unchanged, skipping actions");
        }
        Ok(())
    }

    /// Fetches, normalizes and filters the container set for one
    /// pipeline. Also refreshes the daemon info cache opportunistically.
    async fn fetch_containers(
        &self,
        config: &PipelineConfig,
    ) -> Result<Vec<RuntimeContainer>, FleetgenError> {
        match self.client.server_info().await {
            Ok(info) => self.info.update(info).await,
            Err(e) => debug!(error = %e, "daemon info refresh failed, keeping cached"),
        }

        let networks = self.client.list_networks().await?;
        let ids = self
            .client
            .list_containers(config.include_stopped, config.container_filter.clone())
            .await?;

        let mut containers = Vec::with_capacity(ids.len());
        for id in ids {
            match self.client.inspect_container(&id).await {
                Ok(inspect) => {
                    containers.push(RuntimeContainer::from_inspect(&inspect, &networks));
                }
                Err(e) => {
                    // The container may have exited between list and
                    // inspect.
                    debug!(id, error = %e, "inspect failed, skipping container");
                }
            }
        }

        containers.retain(|c| {
            if !config.include_stopped && !c.state.running {
                return false;
            }
            if config.only_published && c.published_addresses().is_empty() {
                return false;
            }
            if config.only_exposed && c.addresses.is_empty() {
                return false;
            }
            true
        });

        Ok(containers)
    }
}
