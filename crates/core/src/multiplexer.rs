use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reconciler::{Applied, StatusUpdate};
use crate::service::{PushEvent, PushSource};

/// Where decoded push events go. The workbench implements this by looking up
/// the tab whose current execution id matches.
pub trait EventRouter: Send + Sync + 'static {
    fn route(&self, update: StatusUpdate) -> RouteOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// No tab currently tracks the execution.
    Unmatched,
    Applied(Applied),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Malformed,
    Unmatched,
    Routed(Applied),
}

/// Decodes one raw payload and hands it to the router. Nothing here can fail
/// loudly: bad payloads and foreign executions are dropped.
pub fn dispatch(router: &dyn EventRouter, payload: &str) -> Dispatch {
    let event = match PushEvent::decode(payload) {
        Ok(event) => event,
        Err(err) => {
            debug!(error = %err, "dropping malformed push payload");
            return Dispatch::Malformed;
        }
    };

    let execution_id = event.execution_id.clone();
    match router.route(StatusUpdate::from_push(event)) {
        RouteOutcome::Unmatched => {
            debug!(%execution_id, "dropping push event for untracked execution");
            Dispatch::Unmatched
        }
        RouteOutcome::Applied(applied) => Dispatch::Routed(applied),
    }
}

/// Owner of the single shared push connection.
#[derive(Debug)]
pub struct EventMultiplexer {
    task: JoinHandle<()>,
}

impl EventMultiplexer {
    /// Opens the connection on a background task and keeps it open, waiting
    /// `reconnect_delay` after every drop, until [`close`](Self::close).
    pub fn spawn(
        source: Arc<dyn PushSource>,
        router: Arc<dyn EventRouter>,
        reconnect_delay: Duration,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match source.subscribe().await {
                    Ok(mut stream) => {
                        info!("push connection opened");
                        while let Some(item) = stream.next().await {
                            match item {
                                Ok(payload) => {
                                    dispatch(router.as_ref(), &payload);
                                }
                                Err(err) => {
                                    warn!(error = %err, "push stream error");
                                    break;
                                }
                            }
                        }
                        warn!("push connection closed");
                    }
                    Err(err) => warn!(error = %err, "push connection failed"),
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        });
        Self { task }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for EventMultiplexer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::{stream, StreamExt as _};

    use super::{dispatch, Dispatch, EventMultiplexer, EventRouter, RouteOutcome};
    use crate::execution::{ExecutionId, ExecutionPhase};
    use crate::reconciler::{Applied, StatusUpdate, UpdateSource};
    use crate::service::{PushError, PushSource, PushStream};

    #[derive(Default)]
    struct RecordingRouter {
        tracked: Option<ExecutionId>,
        routed: Mutex<Vec<StatusUpdate>>,
    }

    impl EventRouter for RecordingRouter {
        fn route(&self, update: StatusUpdate) -> RouteOutcome {
            if self.tracked.as_ref() != Some(&update.execution_id) {
                return RouteOutcome::Unmatched;
            }
            let phase = ExecutionPhase::from_server_status(&update.status);
            self.routed
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(update);
            RouteOutcome::Applied(Applied::Progressed(phase))
        }
    }

    struct ScriptedSource {
        subscriptions: AtomicUsize,
        payloads: Vec<&'static str>,
    }

    #[async_trait]
    impl PushSource for ScriptedSource {
        async fn subscribe(&self) -> Result<PushStream, PushError> {
            let attempt = self.subscriptions.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                return Err(PushError::Connect("refused".to_string()));
            }
            let items: Vec<Result<String, PushError>> = self
                .payloads
                .iter()
                .map(|payload| Ok((*payload).to_string()))
                .collect();
            Ok(Box::pin(stream::iter(items).chain(stream::pending())))
        }
    }

    #[test]
    fn malformed_and_unmatched_payloads_are_dropped() {
        let router = RecordingRouter {
            tracked: Some(ExecutionId::new("exec-a")),
            ..RecordingRouter::default()
        };
        assert_eq!(dispatch(&router, "{not json"), Dispatch::Malformed);
        assert_eq!(
            dispatch(&router, r#"{"executionId":"exec-z","status":"SUCCEEDED"}"#),
            Dispatch::Unmatched
        );
        assert!(router.routed.lock().expect("lock").is_empty());

        let routed = dispatch(&router, r#"{"executionId":"exec-a","status":"RUNNING"}"#);
        assert_eq!(routed, Dispatch::Routed(Applied::Progressed(ExecutionPhase::Running)));
        let updates = router.routed.lock().expect("lock");
        assert_eq!(updates[0].source, UpdateSource::Push);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_failed_subscription_and_routes_events() {
        let source = Arc::new(ScriptedSource {
            subscriptions: AtomicUsize::new(0),
            payloads: vec![
                "garbage",
                r#"{"executionId":"exec-a","status":"RUNNING","message":"warming up"}"#,
            ],
        });
        let router = Arc::new(RecordingRouter {
            tracked: Some(ExecutionId::new("exec-a")),
            ..RecordingRouter::default()
        });

        let multiplexer =
            EventMultiplexer::spawn(source.clone(), router.clone(), Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(source.subscriptions.load(Ordering::SeqCst), 2);
        assert!(multiplexer.is_open());
        {
            let routed = router.routed.lock().expect("lock");
            assert_eq!(routed.len(), 1);
            assert_eq!(routed[0].message.as_deref(), Some("warming up"));
        }

        multiplexer.close();
        for _ in 0..8 {
            if !multiplexer.is_open() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!multiplexer.is_open());
    }
}
