//! Post-change actions.
//!
//! Runs only after a regeneration reported a content change: the notify
//! shell command, then signal delivery to the configured container
//! targets. Every action failure is logged and isolated; a failing
//! notify command or an unreachable signal target never aborts the
//! remaining targets or the tick.

use tracing::{info, warn};

use crate::config::{PipelineConfig, RESTART_SIGNAL};
use crate::docker::DockerClient;

/// Runs all configured actions of one pipeline.
pub async fn execute_actions<C: DockerClient>(client: &C, pipeline: &PipelineConfig) {
    if let Some(cmd) = pipeline.notify_cmd.as_deref() {
        run_notify_command(cmd, pipeline.notify_output, &pipeline.display_dest()).await;
    }

    for (target, signal) in &pipeline.notify_containers {
        deliver_signal(client, target, *signal).await;
    }

    if !pipeline.notify_containers_filter.is_empty() {
        match client
            .list_containers(false, pipeline.notify_containers_filter.clone())
            .await
        {
            Ok(ids) => {
                for id in ids {
                    deliver_signal(client, &id, pipeline.notify_containers_signal).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to list signal targets");
            }
        }
    }
}

/// Runs the notify command through `/bin/sh -c`, capturing combined
/// output.
async fn run_notify_command(cmd: &str, log_output: bool, dest: &str) {
    info!(command = cmd, dest, "running notify command");

    let output = match tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(command = cmd, error = %e, "notify command failed to start");
            return;
        }
    };

    let mut combined = Vec::with_capacity(output.stdout.len() + output.stderr.len());
    combined.extend_from_slice(&output.stdout);
    combined.extend_from_slice(&output.stderr);

    if !output.status.success() {
        warn!(
            command = cmd,
            status = %output.status,
            output = %String::from_utf8_lossy(&combined),
            "notify command exited with an error"
        );
        return;
    }

    if log_output {
        for line in String::from_utf8_lossy(&combined).lines() {
            info!(command = cmd, "{line}");
        }
    }
}

/// Delivers one signal; [`RESTART_SIGNAL`] restarts the target instead.
async fn deliver_signal<C: DockerClient>(client: &C, target: &str, signal: i32) {
    let result = if signal == RESTART_SIGNAL {
        info!(container = target, "restarting container");
        client.restart_container(target).await
    } else {
        info!(container = target, signal, "sending signal to container");
        client.kill_container(target, &signal.to_string()).await
    };

    if let Err(e) = result {
        warn!(container = target, signal, error = %e, "signal delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::docker::mock::MockDockerClient;

    fn pipeline() -> PipelineConfig {
        toml::from_str(r#"template = "a.tmpl""#).unwrap()
    }

    #[tokio::test]
    async fn delivers_signals_to_named_targets() {
        let client = MockDockerClient::new();
        let mut config = pipeline();
        config.notify_containers.insert("proxy".to_owned(), 1);

        execute_actions(&client, &config).await;

        assert_eq!(
            client.kills.lock().unwrap().clone(),
            vec![("proxy".to_owned(), "1".to_owned())]
        );
    }

    #[tokio::test]
    async fn restart_sentinel_restarts_instead_of_signaling() {
        let client = MockDockerClient::new();
        let mut config = pipeline();
        config
            .notify_containers
            .insert("web".to_owned(), RESTART_SIGNAL);

        execute_actions(&client, &config).await;

        assert!(client.kills.lock().unwrap().is_empty());
        assert_eq!(client.restarts.lock().unwrap().clone(), vec!["web"]);
    }

    #[tokio::test]
    async fn delivers_to_every_named_target() {
        let client = MockDockerClient::new();
        let mut config = pipeline();
        config.notify_containers.insert("a".to_owned(), 1);
        config.notify_containers.insert("b".to_owned(), 2);

        execute_actions(&client, &config).await;

        let kills = client.kills.lock().unwrap().clone();
        assert_eq!(kills.len(), 2);
    }

    #[tokio::test]
    async fn filter_matched_targets_get_the_filter_signal() {
        use bollard::models::ContainerInspectResponse;

        let client = MockDockerClient::new().with_containers(vec![
            ContainerInspectResponse {
                id: Some("aaa".to_owned()),
                ..Default::default()
            },
            ContainerInspectResponse {
                id: Some("bbb".to_owned()),
                ..Default::default()
            },
        ]);
        let mut config = pipeline();
        config
            .notify_containers_filter
            .insert("label".to_owned(), vec!["role=proxy".to_owned()]);
        config.notify_containers_signal = 1;

        execute_actions(&client, &config).await;

        assert_eq!(
            client.kills.lock().unwrap().clone(),
            vec![
                ("aaa".to_owned(), "1".to_owned()),
                ("bbb".to_owned(), "1".to_owned())
            ]
        );
    }

    #[tokio::test]
    async fn failing_deliveries_are_isolated() {
        let client = MockDockerClient::new().with_failing_actions();
        let mut config = pipeline();
        config.notify_containers.insert("web".to_owned(), 1);
        config.notify_containers.insert("db".to_owned(), RESTART_SIGNAL);

        // Must not panic or propagate.
        execute_actions(&client, &config).await;

        assert!(client.kills.lock().unwrap().is_empty());
        assert!(client.restarts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notify_command_failure_is_not_fatal() {
        let client = MockDockerClient::new();
        let mut config = pipeline();
        config.notify_cmd = Some("exit 3".to_owned());

        execute_actions(&client, &config).await;
    }

    #[tokio::test]
    async fn notify_command_runs_through_shell() {
        let client = MockDockerClient::new();
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");

        let mut config = pipeline();
        config.notify_cmd = Some(format!("touch {}", marker.display()));

        execute_actions(&client, &config).await;

        assert!(marker.exists());
    }
}
