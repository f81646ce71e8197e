//! Application orchestrator: wires the listener or client to the host and
//! renders notifications.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use codesocket_client::{Client, ClientConfig};
use codesocket_controllers::ExecutionContext;
use codesocket_protocol::{Event, EventSink};
use codesocket_server::Listener;

use crate::config::Config;
use crate::host::{LogConsole, ProcessExecutor};

/// Log target for rendered notifications.
const UI_TARGET: &str = "codesocket::ui";

/// Serves requests until Ctrl-C, or until idle when `stop_on_idle` is set.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let (events, mut rx) = EventSink::channel();

    let ctx = ExecutionContext::new(
        Arc::new(ProcessExecutor::from(&config.host)),
        config.transfer_file_path.clone(),
    )
    .with_settings(config.output.clone())
    .with_console(Arc::new(LogConsole));

    let listener = Listener::start(config.listener_config(), ctx, events).await?;
    tracing::info!(
        port = listener.port(),
        kind = %listener.transport(),
        program = %config.host.program,
        "agent ready"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("SIGINT received, shutting down");
                break;
            }

            event = rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                render_event(&event);
                if config.stop_on_idle && event == Event::ServerTimeout(0) {
                    tracing::info!("idle timeout reached, stopping listener");
                    break;
                }
            }
        }
    }

    listener.close().await;
    drain(&mut rx);
    Ok(())
}

/// Sends `file`, or the self-test request when `None`, and returns the
/// response text.
pub async fn send(config: ClientConfig, file: Option<PathBuf>) -> anyhow::Result<String> {
    let (events, mut rx) = EventSink::channel();
    let client = Client::new(config, events);

    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render_event(&event);
        }
    });

    let result = match file {
        Some(path) => client.send_file(path).await,
        None => client.test().await,
    };

    drop(client);
    if let Err(e) = renderer.await {
        tracing::debug!("event renderer ended abnormally: {e}");
    }
    Ok(result?)
}

fn drain(rx: &mut mpsc::Receiver<Event>) {
    while let Ok(event) = rx.try_recv() {
        render_event(&event);
    }
}

/// Writes one notification to the log.
fn render_event(event: &Event) {
    match event {
        Event::StateChanged(text) => {
            tracing::info!(target: UI_TARGET, "{text}");
        }
        Event::MessageReceived(text) => {
            tracing::debug!(target: UI_TARGET, bytes = text.len(), "message received:\n{text}");
        }
        Event::OutputProduced(text) => {
            tracing::debug!(target: UI_TARGET, bytes = text.len(), "output produced:\n{text}");
        }
        Event::ClientTimeout(0) | Event::ServerTimeout(0) | Event::SocketTimeout(0) => {
            tracing::warn!(target: UI_TARGET, event = event.name(), "timeout expired");
        }
        Event::ClientTimeout(remaining)
        | Event::ServerTimeout(remaining)
        | Event::SocketTimeout(remaining) => {
            tracing::trace!(target: UI_TARGET, event = event.name(), remaining, "countdown");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use codesocket_transport::TransportKind;

    use super::*;
    use crate::config::HostConfig;

    #[tokio::test]
    async fn serve_stops_on_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            port: 0,
            server_timeout: 1,
            transfer_file_path: tmp.path().join("transfer.nk"),
            ..Config::default()
        };

        tokio::time::timeout(Duration::from_secs(5), serve(config))
            .await
            .expect("idle listener should stop itself")
            .unwrap();
    }

    #[tokio::test]
    async fn send_round_trips_through_a_served_host() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            port: 0,
            host: HostConfig {
                program: "cat".into(),
                args: vec![],
            },
            transfer_file_path: tmp.path().join("transfer.nk"),
            ..Config::default()
        };

        let ctx = ExecutionContext::new(
            Arc::new(ProcessExecutor::from(&config.host)),
            config.transfer_file_path.clone(),
        );
        let listener = Listener::start(config.listener_config(), ctx, EventSink::disabled())
            .await
            .unwrap();

        let script = tmp.path().join("hello.py");
        std::fs::write(&script, "print('HELLO')").unwrap();

        let client_config = ClientConfig {
            transport: TransportKind::Tcp,
            ..config.client_config("127.0.0.1", Some(listener.port()))
        };
        let response = send(client_config, Some(script)).await.unwrap();
        assert_eq!(response, "print('HELLO')");

        listener.close().await;
    }
}
