//! Event debouncing.
//!
//! Sits between the watcher fan-out and a pipeline's regeneration loop.
//! A quiet period of `min` must pass after the last event before the
//! latest event of the burst is emitted; `max`, armed once per burst,
//! caps how long a steady stream of events can postpone emission.
//! Whichever timer fires first wins and both are cleared. A disabled
//! window (`min == 0`) passes events through unchanged.

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::Wait;
use crate::event::ContainerEvent;

/// Wires a debounce window onto `input`, returning the debounced
/// receiver. The spawned task ends, closing the output, when `input`
/// closes; a pending unemitted event is dropped at that point.
pub fn spawn_debounce(
    input: mpsc::Receiver<ContainerEvent>,
    wait: Wait,
) -> mpsc::Receiver<ContainerEvent> {
    if wait.is_disabled() {
        return input;
    }

    let (tx, rx) = mpsc::channel(100);
    tokio::spawn(debounce_loop(input, tx, wait));
    rx
}

async fn debounce_loop(
    mut input: mpsc::Receiver<ContainerEvent>,
    output: mpsc::Sender<ContainerEvent>,
    wait: Wait,
) {
    let mut pending: Option<ContainerEvent> = None;
    let mut min_deadline: Option<Instant> = None;
    let mut max_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            received = input.recv() => {
                match received {
                    Some(event) => {
                        let now = Instant::now();
                        pending = Some(event);
                        min_deadline = Some(now + wait.min);
                        if max_deadline.is_none() {
                            max_deadline = Some(now + wait.max);
                        }
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep_until(min_deadline.unwrap_or_else(Instant::now)),
                if min_deadline.is_some() =>
            {
                min_deadline = None;
                max_deadline = None;
                if let Some(event) = pending.take() {
                    if output.send(event).await.is_err() {
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(max_deadline.unwrap_or_else(Instant::now)),
                if max_deadline.is_some() =>
            {
                min_deadline = None;
                max_deadline = None;
                if let Some(event) = pending.take() {
                    if output.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
