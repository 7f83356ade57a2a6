//! Simulated participant: polls the link state for its node and runs a
//! [`ClientApp`] on every instruction.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use fedlink_core::{ClientApp, Context};
use fedlink_types::{
    Message, MessageError, NodeId, RecordSet, RunId, UserConfig, error_code,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::driver::{DEFAULT_POLL_INTERVAL, DriverError};
use crate::link::LinkState;

pub struct NodeRunner {
    state: LinkState,
    node_id: NodeId,
    app: Arc<ClientApp>,
    node_config: UserConfig,
    poll_interval: Duration,
}

/// Running node task. Dropping the handle also stops the task, but only
/// [`NodeHandle::shutdown`] waits for it to finish.
pub struct NodeHandle {
    node_id: NodeId,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NodeRunner {
    #[must_use]
    pub fn new(state: LinkState, node_id: NodeId, app: ClientApp) -> Self {
        Self {
            state,
            node_id,
            app: Arc::new(app),
            node_config: UserConfig::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_node_config(mut self, node_config: UserConfig) -> Self {
        self.node_config = node_config;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn spawn(self) -> NodeHandle {
        let (stop, stop_rx) = watch::channel(false);
        let node_id = self.node_id;
        let task = tokio::spawn(self.run(stop_rx));
        NodeHandle {
            node_id,
            stop,
            task,
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        tracing::debug!(node_id = %self.node_id, "node started");
        let mut contexts: HashMap<RunId, Context> = HashMap::new();
        loop {
            if *stop.borrow() {
                break;
            }
            for message in self.state.take_instructions(self.node_id, None) {
                let run_id = message.metadata().run_id();
                let ctx = contexts
                    .remove(&run_id)
                    .unwrap_or_else(|| self.new_context(run_id));
                let (reply, ctx) = self.handle(message, ctx).await;
                if let Some(ctx) = ctx {
                    contexts.insert(run_id, ctx);
                }
                if let Err(err) = self.state.store_reply(reply) {
                    tracing::warn!(node_id = %self.node_id, "reply dropped: {err}");
                }
            }

            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        tracing::debug!(node_id = %self.node_id, "node stopped");
    }

    fn new_context(&self, run_id: RunId) -> Context {
        let run_config = self
            .state
            .run(run_id)
            .map(|run| run.override_config)
            .unwrap_or_default();
        Context::new(
            run_id,
            self.node_id,
            self.node_config.clone(),
            RecordSet::new(),
            run_config,
        )
    }

    /// Run the app on a blocking thread. App errors and panics become
    /// `CLIENT_APP_RAISED_EXCEPTION` error replies. The context is lost only
    /// if the blocking task itself could not be joined.
    async fn handle(&self, message: Message, mut ctx: Context) -> (Message, Option<Context>) {
        let app = Arc::clone(&self.app);
        let node_id = self.node_id;
        let envelope = Message::from_error(
            message.metadata().clone(),
            MessageError::new(error_code::UNKNOWN, None),
        );
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| app.call(message, &mut ctx)));
            (outcome, ctx)
        })
        .await;

        let (reason, ctx) = match joined {
            Ok((Ok(Ok(reply)), ctx)) => return (reply, Some(ctx)),
            Ok((Ok(Err(err)), ctx)) => (err.to_string(), Some(ctx)),
            Ok((Err(payload), ctx)) => (panic_message(payload.as_ref()), Some(ctx)),
            Err(err) => (err.to_string(), None),
        };
        tracing::warn!(node_id = %node_id, "client app failed: {reason}");
        let reply = envelope.create_error_reply(MessageError::new(
            error_code::CLIENT_APP_RAISED_EXCEPTION,
            Some(reason),
        ));
        (reply, ctx)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("client app panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("client app panicked: {message}")
    } else {
        "client app panicked".to_string()
    }
}

impl NodeHandle {
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Signal the node to stop and wait for its task to finish.
    pub async fn shutdown(self) -> Result<(), DriverError> {
        self.stop.send_replace(true);
        self.task.await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fedlink_core::handler_fn;
    use fedlink_types::{ConfigsRecord, message_type};

    use super::*;
    use crate::driver::Driver;
    use crate::memory::InMemoryDriver;

    async fn setup(app: ClientApp) -> (InMemoryDriver, NodeHandle, NodeId) {
        let state = LinkState::new();
        let run_id = state.create_run("app", "1.0.0", "", UserConfig::new());
        let node_id = state.create_node();
        let mut driver =
            InMemoryDriver::new(state.clone()).with_poll_interval(Duration::from_millis(5));
        driver.set_run(run_id).await.unwrap();
        let handle = NodeRunner::new(state, node_id, app)
            .with_poll_interval(Duration::from_millis(5))
            .spawn();
        (driver, handle, node_id)
    }

    #[tokio::test]
    async fn node_answers_and_keeps_context_between_messages() {
        let app = ClientApp::new()
            .query(handler_fn(|message, ctx| {
                let calls = ctx.state.configs_records.len();
                ctx.state
                    .configs_records
                    .insert(format!("call-{calls}"), ConfigsRecord::new());
                let content = RecordSet::new()
                    .with_configs("calls", ConfigsRecord::new().with("n", i64::try_from(calls + 1)?)?);
                Ok(message.create_reply(content))
            }))
            .unwrap();
        let (driver, handle, node_id) = setup(app).await;

        for expected in 1..=2_i64 {
            let message = driver
                .create_message(RecordSet::new(), message_type::QUERY, node_id, "", None)
                .unwrap();
            let replies = driver
                .send_and_receive(vec![message], Some(Duration::from_secs(5)))
                .await
                .unwrap();
            assert_eq!(replies.len(), 1);
            let calls = &replies[0].content().unwrap().configs_records["calls"];
            assert_eq!(calls.get("n"), Some(&fedlink_types::Value::Int(expected)));
        }

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_app_produces_error_reply() {
        let app = ClientApp::new()
            .train(handler_fn(|_message, _ctx| anyhow::bail!("diverged")))
            .unwrap();
        let (driver, handle, node_id) = setup(app).await;

        let message = driver
            .create_message(RecordSet::new(), message_type::TRAIN, node_id, "", None)
            .unwrap();
        let replies = driver
            .send_and_receive(vec![message], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let error = replies[0].error().unwrap();
        assert_eq!(error.code(), error_code::CLIENT_APP_RAISED_EXCEPTION);
        assert_eq!(error.reason(), Some("diverged"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_app_produces_error_reply_and_keeps_serving() {
        let app = ClientApp::new()
            .train(handler_fn(|_message, _ctx| panic!("index out of range")))
            .unwrap()
            .query(handler_fn(|message, _ctx| Ok(message.create_reply(RecordSet::new()))))
            .unwrap();
        let (driver, handle, node_id) = setup(app).await;

        let message = driver
            .create_message(RecordSet::new(), message_type::TRAIN, node_id, "", None)
            .unwrap();
        let replies = driver
            .send_and_receive(vec![message], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        let error = replies[0].error().unwrap();
        assert_eq!(error.code(), error_code::CLIENT_APP_RAISED_EXCEPTION);
        assert_eq!(
            error.reason(),
            Some("client app panicked: index out of range")
        );

        let message = driver
            .create_message(RecordSet::new(), message_type::QUERY, node_id, "", None)
            .unwrap();
        let replies = driver
            .send_and_receive(vec![message], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].has_content());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_handle_stops_node() {
        let app = ClientApp::new()
            .query(handler_fn(|message, _ctx| Ok(message.create_reply(RecordSet::new()))))
            .unwrap();
        let (_driver, handle, _node_id) = setup(app).await;
        let NodeHandle { stop, task, .. } = handle;
        drop(stop);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
