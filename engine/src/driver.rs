//! Orchestrator-side exchange with participant nodes.
//!
//! A `Driver` pushes instruction messages to nodes and pulls their replies.
//! `send_and_receive` combines the two in a bounded polling loop. The bound
//! only limits how long the caller waits; each message keeps its own TTL and
//! may still be answered after the call returns.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use fedlink_core::CompatError;
use fedlink_types::{Message, MessageId, NodeId, RecordSet, Run, RunId};
use thiserror::Error;
use tokio::time::Instant;

/// Boxed future returned by driver and proxy operations.
pub type DriverFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Sleep between pulls when the driver does not configure one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no run set on the driver")]
    RunNotSet,
    #[error("unknown run {0}")]
    UnknownRun(RunId),
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("reply rejected: {0}")]
    ReplyRejected(String),
    #[error("no reply from node {0}")]
    NoReply(NodeId),
    #[error("node {node} replied with error code {code}: {reason}")]
    ErrorReply {
        node: NodeId,
        code: i64,
        reason: String,
    },
    #[error("`{0}` is not supported by this transport")]
    Unsupported(&'static str),
    #[error(transparent)]
    Compat(#[from] CompatError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub trait Driver: Send + Sync {
    /// Bind the driver to an existing run.
    fn set_run(&mut self, run_id: RunId) -> DriverFut<'_, ()>;

    /// Current snapshot of the bound run.
    fn run(&self) -> DriverFut<'_, Run>;

    /// Build an instruction for `dst_node_id`, stamped with the bound run and
    /// this driver as source. `ttl = None` uses the driver's default TTL.
    fn create_message(
        &self,
        content: RecordSet,
        message_type: &str,
        dst_node_id: NodeId,
        group_id: &str,
        ttl: Option<Duration>,
    ) -> Result<Message, DriverError>;

    fn get_node_ids(&self) -> DriverFut<'_, Vec<NodeId>>;

    /// Push instructions; returns one id per message, in order.
    fn push_messages(&self, messages: Vec<Message>) -> DriverFut<'_, Vec<MessageId>>;

    /// Replies available right now for `message_ids`. Absent replies are
    /// omitted; this never waits.
    fn pull_messages(&self, message_ids: Vec<MessageId>) -> DriverFut<'_, Vec<Message>>;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Push `messages` and collect replies until all arrived or `timeout`
    /// elapsed. `None` waits until every reply is in.
    fn send_and_receive(
        &self,
        messages: Vec<Message>,
        timeout: Option<Duration>,
    ) -> DriverFut<'_, Vec<Message>> {
        Box::pin(send_and_receive(self, messages, timeout))
    }
}

/// Push, then pull at least once, sleeping `poll_interval` (capped by the
/// remaining time) between pulls. A partial result is not an error.
pub async fn send_and_receive<D: Driver + ?Sized>(
    driver: &D,
    messages: Vec<Message>,
    timeout: Option<Duration>,
) -> Result<Vec<Message>, DriverError> {
    let message_ids = driver.push_messages(messages).await?;
    let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
    let poll_interval = driver.poll_interval();

    let mut outstanding: HashSet<MessageId> = message_ids.iter().cloned().collect();
    let mut replies = Vec::with_capacity(message_ids.len());
    loop {
        let pending: Vec<MessageId> = message_ids
            .iter()
            .filter(|id| outstanding.contains(*id))
            .cloned()
            .collect();
        for reply in driver.pull_messages(pending).await? {
            if let Some(id) = reply.metadata().reply_to_message_id() {
                outstanding.remove(id);
            }
            replies.push(reply);
        }
        if outstanding.is_empty() {
            break;
        }

        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                (deadline - now).min(poll_interval)
            }
            None => poll_interval,
        };
        tokio::time::sleep(wait).await;
    }

    if !outstanding.is_empty() {
        tracing::debug!(
            received = replies.len(),
            missing = outstanding.len(),
            "send_and_receive returned before all replies arrived"
        );
    }
    Ok(replies)
}
