use std::time::Duration;

use fedlink_types::{
    DEFAULT_TTL, Message, MessageId, Metadata, NodeId, RecordSet, Run, RunId, SUPERLINK_NODE_ID,
};

use crate::driver::{DEFAULT_POLL_INTERVAL, Driver, DriverError, DriverFut};
use crate::link::LinkState;

/// Driver backed by a [`LinkState`] in the same process.
#[derive(Debug, Clone)]
pub struct InMemoryDriver {
    state: LinkState,
    run_id: Option<RunId>,
    default_ttl: Duration,
    poll_interval: Duration,
}

impl InMemoryDriver {
    #[must_use]
    pub fn new(state: LinkState) -> Self {
        Self {
            state,
            run_id: None,
            default_ttl: DEFAULT_TTL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn run_id(&self) -> Result<RunId, DriverError> {
        self.run_id.ok_or(DriverError::RunNotSet)
    }

    fn check_outgoing(&self, message: &Message, run_id: RunId) -> Result<(), DriverError> {
        let metadata = message.metadata();
        if metadata.run_id() != run_id {
            return Err(DriverError::InvalidMessage(format!(
                "message belongs to run {} but the driver is bound to run {run_id}",
                metadata.run_id()
            )));
        }
        if metadata.src_node_id() != SUPERLINK_NODE_ID {
            return Err(DriverError::InvalidMessage(format!(
                "message source {} is not the orchestrator",
                metadata.src_node_id()
            )));
        }
        Ok(())
    }
}

impl Driver for InMemoryDriver {
    fn set_run(&mut self, run_id: RunId) -> DriverFut<'_, ()> {
        Box::pin(async move {
            if self.state.run(run_id).is_none() {
                return Err(DriverError::UnknownRun(run_id));
            }
            self.run_id = Some(run_id);
            tracing::debug!(run_id = %run_id, "driver bound to run");
            Ok(())
        })
    }

    fn run(&self) -> DriverFut<'_, Run> {
        Box::pin(async move {
            let run_id = self.run_id()?;
            self.state.run(run_id).ok_or(DriverError::UnknownRun(run_id))
        })
    }

    fn create_message(
        &self,
        content: RecordSet,
        message_type: &str,
        dst_node_id: NodeId,
        group_id: &str,
        ttl: Option<Duration>,
    ) -> Result<Message, DriverError> {
        let metadata = Metadata::new(
            self.run_id()?,
            SUPERLINK_NODE_ID,
            dst_node_id,
            group_id,
            ttl.unwrap_or(self.default_ttl),
            message_type,
        );
        Ok(Message::new(metadata, content))
    }

    fn get_node_ids(&self) -> DriverFut<'_, Vec<NodeId>> {
        Box::pin(async move { self.state.node_ids(self.run_id()?) })
    }

    fn push_messages(&self, messages: Vec<Message>) -> DriverFut<'_, Vec<MessageId>> {
        Box::pin(async move {
            let run_id = self.run_id()?;
            for message in &messages {
                self.check_outgoing(message, run_id)?;
            }
            let ids = messages
                .into_iter()
                .map(|message| self.state.store_instruction(message))
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(count = ids.len(), "pushed messages");
            Ok(ids)
        })
    }

    fn pull_messages(&self, message_ids: Vec<MessageId>) -> DriverFut<'_, Vec<Message>> {
        Box::pin(async move {
            self.run_id()?;
            let replies = self.state.take_replies(&message_ids);
            if !replies.is_empty() {
                tracing::debug!(count = replies.len(), "pulled replies");
            }
            Ok(replies)
        })
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use fedlink_types::{UserConfig, message_type};

    use super::*;

    async fn bound_driver() -> (InMemoryDriver, LinkState, NodeId) {
        let state = LinkState::new();
        let run_id = state.create_run("app", "1.0.0", "", UserConfig::new());
        let node_id = state.create_node();
        let mut driver =
            InMemoryDriver::new(state.clone()).with_poll_interval(Duration::from_millis(5));
        driver.set_run(run_id).await.unwrap();
        (driver, state, node_id)
    }

    /// Answer every queued instruction for `node_id` with an empty reply.
    fn answer_all(state: &LinkState, node_id: NodeId) {
        for instruction in state.take_instructions(node_id, None) {
            state
                .store_reply(instruction.create_reply(RecordSet::new()))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_message_stamps_run_and_default_ttl() {
        let (driver, _state, node_id) = bound_driver().await;
        let message = driver
            .create_message(RecordSet::new(), message_type::TRAIN, node_id, "7", None)
            .unwrap();
        let meta = message.metadata();
        assert_eq!(meta.src_node_id(), SUPERLINK_NODE_ID);
        assert_eq!(meta.dst_node_id(), node_id);
        assert_eq!(meta.ttl(), DEFAULT_TTL);
        assert_eq!(meta.group_id(), "7");
        assert_eq!(meta.run_id(), driver.run().await.unwrap().run_id);
    }

    #[tokio::test]
    async fn unbound_driver_rejects_operations() {
        let driver = InMemoryDriver::new(LinkState::new());
        let err = driver
            .create_message(RecordSet::new(), message_type::QUERY, NodeId::new(2), "", None)
            .unwrap_err();
        assert!(matches!(err, DriverError::RunNotSet));
        assert!(matches!(
            driver.get_node_ids().await.unwrap_err(),
            DriverError::RunNotSet
        ));
    }

    #[tokio::test]
    async fn unknown_run_cannot_be_bound() {
        let mut driver = InMemoryDriver::new(LinkState::new());
        let err = driver.set_run(RunId::new(5)).await.unwrap_err();
        assert!(matches!(err, DriverError::UnknownRun(_)));
    }

    #[tokio::test]
    async fn push_preserves_order_and_pull_omits_missing() {
        let (driver, state, node_id) = bound_driver().await;
        let messages = (0..3)
            .map(|i| {
                driver
                    .create_message(RecordSet::new(), message_type::QUERY, node_id, &i.to_string(), None)
                    .unwrap()
            })
            .collect();
        let ids = driver.push_messages(messages).await.unwrap();
        assert_eq!(ids.len(), 3);

        let delivered = state.take_instructions(node_id, None);
        let delivered_ids: Vec<_> = delivered
            .iter()
            .map(|m| m.metadata().message_id().unwrap().clone())
            .collect();
        assert_eq!(delivered_ids, ids);

        state
            .store_reply(delivered[1].create_reply(RecordSet::new()))
            .unwrap();
        let replies = driver.pull_messages(ids.clone()).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].metadata().reply_to_message_id(), Some(&ids[1]));
    }

    #[tokio::test]
    async fn push_rejects_foreign_run() {
        let (driver, state, node_id) = bound_driver().await;
        let other_run = state.create_run("other", "1.0.0", "", UserConfig::new());
        let metadata = Metadata::new(
            other_run,
            SUPERLINK_NODE_ID,
            node_id,
            "",
            Duration::from_secs(10),
            message_type::QUERY,
        );
        let err = driver
            .push_messages(vec![Message::new(metadata, RecordSet::new())])
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn send_and_receive_zero_timeout_returns_immediately() {
        let (driver, _state, node_id) = bound_driver().await;
        let message = driver
            .create_message(RecordSet::new(), message_type::QUERY, node_id, "", None)
            .unwrap();

        let started = Instant::now();
        let replies = driver
            .send_and_receive(vec![message], Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(replies.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn send_and_receive_collects_replies_arriving_later() {
        let (driver, state, node_id) = bound_driver().await;
        let messages = (0..2)
            .map(|_| {
                driver
                    .create_message(RecordSet::new(), message_type::QUERY, node_id, "", None)
                    .unwrap()
            })
            .collect();

        let responder = tokio::spawn({
            let state = state.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                answer_all(&state, node_id);
            }
        });
        let replies = driver
            .send_and_receive(messages, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(replies.len(), 2);
    }

    #[tokio::test]
    async fn send_and_receive_returns_partial_result_on_timeout() {
        let (driver, state, node_id) = bound_driver().await;
        let other = state.create_node();
        let messages = vec![
            driver
                .create_message(RecordSet::new(), message_type::QUERY, node_id, "", None)
                .unwrap(),
            driver
                .create_message(RecordSet::new(), message_type::QUERY, other, "", None)
                .unwrap(),
        ];

        let responder = tokio::spawn({
            let state = state.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                answer_all(&state, node_id);
            }
        });
        let replies = driver
            .send_and_receive(messages, Some(Duration::from_millis(200)))
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].metadata().src_node_id(), node_id);
    }
}
