//! Websocket log subscription for one program.
//!
//! Subscribes to `logsSubscribe` with a `mentions` filter on the program
//! address and hands every successful transaction's logs to a `LogSink`.

use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_client::rpc_response::RpcLogsResponse;
use solana_sdk::commitment_config::CommitmentConfig;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::program::LogSink;
use crate::{ClientError, Result};

/// Feed one `logsNotification` into `sink`. Failed transactions are
/// dropped, even if their logs carry events. Returns the callbacks run.
pub fn handle_notification(sink: &LogSink, logs: &RpcLogsResponse) -> usize {
    if let Some(err) = &logs.err {
        debug!("Skipping failed tx {}: {:?}", logs.signature, err);
        return 0;
    }
    let fired = sink.deliver(&logs.logs);
    debug!("tx {}: {} listener callback(s)", logs.signature, fired);
    fired
}

pub struct LogSubscriber {
    ws_url: String,
    commitment: CommitmentConfig,
    sink: LogSink,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LogSubscriber {
    pub fn new(ws_url: &str, commitment: CommitmentConfig, sink: LogSink) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            commitment,
            sink,
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Open the subscription. Returns once the node has acknowledged it, so
    /// transactions sent after `start` returns are covered.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let ws_url = self.ws_url.clone();
        let commitment = self.commitment;
        let sink = self.sink.clone();

        let handle = tokio::spawn(async move {
            let addr = sink.program_id().to_string();
            let client = match PubsubClient::new(&ws_url).await {
                Ok(client) => client,
                Err(e) => {
                    let _ = ready_tx.send(Err(ClientError::Subscription(format!(
                        "connect {}: {}",
                        ws_url, e
                    ))));
                    return;
                }
            };

            let filter = RpcTransactionLogsFilter::Mentions(vec![addr.clone()]);
            let config = RpcTransactionLogsConfig {
                commitment: Some(commitment),
            };
            let (mut stream, unsubscribe) = match client.logs_subscribe(filter, config).await {
                Ok(sub) => sub,
                Err(e) => {
                    let _ = ready_tx.send(Err(ClientError::Subscription(format!(
                        "logs subscribe {}: {}",
                        addr, e
                    ))));
                    return;
                }
            };
            info!("Subscribed to logs for {}", addr);
            let _ = ready_tx.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    next = stream.next() => {
                        let Some(response) = next else {
                            warn!("Log stream for {} closed by the node", addr);
                            break;
                        };
                        handle_notification(&sink, &response.value);
                    }
                }
            }

            unsubscribe().await;
            info!("Unsubscribed from logs for {}", addr);
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);

        ready_rx
            .await
            .map_err(|_| ClientError::Subscription("subscriber task exited".into()))?
    }

    /// Stop the subscription and wait for the task to finish.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::await_event_for_call;
    use crate::program::{ListenerRegistry, Program};
    use crate::simulator::SimulatedTransport;
    use helloworld_core::{CountChangeEvent, ProgramEvent, COUNT_CHANGE_EVENT, PROGRAM_ID};
    use solana_sdk::transaction::TransactionError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn notification(err: Option<TransactionError>, label: &str) -> RpcLogsResponse {
        let event: ProgramEvent = CountChangeEvent {
            data: 0,
            label: label.into(),
        }
        .into();
        RpcLogsResponse {
            signature: format!("{}-tx", label),
            err,
            logs: vec![
                format!("Program {} invoke [1]", PROGRAM_ID),
                event.to_log_line().unwrap(),
                format!("Program {} success", PROGRAM_ID),
            ],
        }
    }

    #[test]
    fn test_failed_notification_skipped() {
        let registry = Arc::new(ListenerRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = hits.clone();
        registry.add(
            COUNT_CHANGE_EVENT,
            Arc::new(move |_: &ProgramEvent| {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let sink = LogSink::new(PROGRAM_ID, registry);

        let failed = notification(Some(TransactionError::AccountNotFound), "create");
        assert_eq!(handle_notification(&sink, &failed), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let ok = notification(None, "create");
        assert_eq!(handle_notification(&sink, &ok), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_notification_does_not_resolve_call() {
        let program = Arc::new(Program::new(
            PROGRAM_ID,
            Box::new(SimulatedTransport::without_event_delivery(PROGRAM_ID)),
        ));
        let sink = program.log_sink();

        let waiting = {
            let program = program.clone();
            tokio::spawn(async move {
                await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", Duration::from_millis(300))
                    .await
            })
        };
        while program.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        handle_notification(&sink, &notification(Some(TransactionError::AccountNotFound), "failed"));

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::EventTimeout { .. }));
        assert_eq!(program.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_successful_notification_resolves_call() {
        let program = Arc::new(Program::new(
            PROGRAM_ID,
            Box::new(SimulatedTransport::without_event_delivery(PROGRAM_ID)),
        ));
        let sink = program.log_sink();

        let waiting = {
            let program = program.clone();
            tokio::spawn(async move {
                await_event_for_call(&program, COUNT_CHANGE_EVENT, "create", Duration::from_secs(5))
                    .await
            })
        };
        while program.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(handle_notification(&sink, &notification(None, "create")), 1);

        let event = waiting.await.unwrap().unwrap();
        assert_eq!(event.as_count_change().unwrap().label, "create");
        assert_eq!(program.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_without_node() {
        let sink = LogSink::new(PROGRAM_ID, Arc::new(ListenerRegistry::new()));
        let mut sub = LogSubscriber::new("ws://127.0.0.1:1", CommitmentConfig::confirmed(), sink);
        let err = sub.start().await.unwrap_err();
        assert!(matches!(err, ClientError::Subscription(_)));
        sub.close().await;
        assert!(!sub.is_running());
    }
}
