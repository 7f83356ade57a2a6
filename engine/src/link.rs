//! In-memory link state shared by the driver and simulated nodes.
//!
//! Holds runs, registered nodes, instructions waiting for delivery and replies
//! waiting to be pulled. All access goes through one mutex; operations are
//! short and never await while holding it.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use chrono::Utc;
use fedlink_types::{
    Message, MessageError, MessageId, NodeId, Run, RunId, RunStatus, SUPERLINK_NODE_ID,
    UserConfig, error_code,
};

use crate::driver::DriverError;

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<RunId, Run>,
    nodes: BTreeSet<NodeId>,
    next_run_id: u64,
    next_node_id: u64,
    /// Every instruction not yet answered and pulled, by id.
    instructions: HashMap<MessageId, Message>,
    /// Instruction ids per node that have not been handed out yet.
    queued: HashMap<NodeId, VecDeque<MessageId>>,
    /// Replies keyed by the instruction they answer.
    replies: HashMap<MessageId, Message>,
}

impl Inner {
    /// Forget instructions whose TTL has passed together with any reply they
    /// got, and replies that expired before being pulled.
    fn sweep_expired(&mut self, now: SystemTime) {
        let before = self.instructions.len() + self.replies.len();
        self.instructions
            .retain(|_, message| !message.metadata().is_expired_at(now));
        let instructions = &self.instructions;
        self.replies.retain(|reply_to, reply| {
            instructions.contains_key(reply_to) && !reply.metadata().is_expired_at(now)
        });
        for queue in self.queued.values_mut() {
            queue.retain(|message_id| instructions.contains_key(message_id));
        }
        let dropped = before - self.instructions.len() - self.replies.len();
        if dropped > 0 {
            tracing::debug!(dropped, "released expired messages");
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkState {
    inner: Arc<Mutex<Inner>>,
}

impl LinkState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_run(
        &self,
        fab_id: &str,
        fab_version: &str,
        fab_hash: &str,
        override_config: UserConfig,
    ) -> RunId {
        let mut inner = self.lock();
        inner.next_run_id += 1;
        let run_id = RunId::new(inner.next_run_id);
        let run = Run::pending(run_id, fab_id, fab_version, fab_hash, override_config, Utc::now());
        inner.runs.insert(run_id, run);
        tracing::info!(run_id = %run_id, fab_id, "created run");
        run_id
    }

    #[must_use]
    pub fn run(&self, run_id: RunId) -> Option<Run> {
        self.lock().runs.get(&run_id).cloned()
    }

    pub fn update_run_status(&self, run_id: RunId, status: RunStatus) -> Result<(), DriverError> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(DriverError::UnknownRun(run_id))?;
        tracing::info!(run_id = %run_id, status = %status.status, "run status changed");
        run.transition(status, Utc::now());
        Ok(())
    }

    pub fn create_node(&self) -> NodeId {
        let mut inner = self.lock();
        inner.next_node_id += 1;
        // Node ids never collide with the orchestrator's own id.
        let node_id = NodeId::new(SUPERLINK_NODE_ID.value() + inner.next_node_id);
        inner.nodes.insert(node_id);
        inner.queued.entry(node_id).or_default();
        tracing::debug!(node_id = %node_id, "registered node");
        node_id
    }

    pub fn delete_node(&self, node_id: NodeId) -> Result<(), DriverError> {
        let mut inner = self.lock();
        if !inner.nodes.remove(&node_id) {
            return Err(DriverError::UnknownNode(node_id));
        }
        inner.queued.remove(&node_id);
        tracing::debug!(node_id = %node_id, "deleted node");
        Ok(())
    }

    pub fn node_ids(&self, run_id: RunId) -> Result<Vec<NodeId>, DriverError> {
        let mut inner = self.lock();
        inner.sweep_expired(SystemTime::now());
        if !inner.runs.contains_key(&run_id) {
            return Err(DriverError::UnknownRun(run_id));
        }
        Ok(inner.nodes.iter().copied().collect())
    }

    /// Accept an instruction from the orchestrator and assign its id.
    pub fn store_instruction(&self, mut message: Message) -> Result<MessageId, DriverError> {
        let mut inner = self.lock();
        inner.sweep_expired(SystemTime::now());
        let metadata = message.metadata();
        if metadata.reply_to_message_id().is_some() {
            return Err(DriverError::InvalidMessage(
                "instruction must not reply to another message".to_string(),
            ));
        }
        if metadata.message_id().is_some() {
            return Err(DriverError::InvalidMessage(
                "instruction already has a message id".to_string(),
            ));
        }
        if !inner.runs.contains_key(&metadata.run_id()) {
            return Err(DriverError::UnknownRun(metadata.run_id()));
        }
        let dst = metadata.dst_node_id();
        if !inner.nodes.contains(&dst) {
            return Err(DriverError::UnknownNode(dst));
        }

        let message_id = MessageId::new(uuid::Uuid::new_v4().to_string());
        message.assign_message_id(message_id.clone());
        inner
            .queued
            .entry(dst)
            .or_default()
            .push_back(message_id.clone());
        inner.instructions.insert(message_id.clone(), message);
        Ok(message_id)
    }

    /// Hand out queued instructions for `node_id`, at most `limit` of them.
    /// Expired messages of every node are released first.
    pub fn take_instructions(&self, node_id: NodeId, limit: Option<usize>) -> Vec<Message> {
        let mut inner = self.lock();
        let now = SystemTime::now();
        inner.sweep_expired(now);
        let Some(mut queue) = inner.queued.remove(&node_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        while limit.is_none_or(|limit| out.len() < limit) {
            let Some(message_id) = queue.pop_front() else {
                break;
            };
            let Some(message) = inner.instructions.get(&message_id) else {
                continue;
            };
            out.push(message.clone());
        }
        inner.queued.insert(node_id, queue);
        out
    }

    /// Accept a reply from a node. It must answer a known instruction sent to
    /// that node in the same run and must not outlive the instruction's TTL.
    pub fn store_reply(&self, mut message: Message) -> Result<MessageId, DriverError> {
        let mut inner = self.lock();
        let metadata = message.metadata();
        let Some(reply_to) = metadata.reply_to_message_id().cloned() else {
            return Err(DriverError::ReplyRejected(
                "reply does not reference an instruction".to_string(),
            ));
        };
        let Some(original) = inner.instructions.get(&reply_to) else {
            return Err(DriverError::ReplyRejected(format!(
                "instruction {reply_to} is unknown or already answered"
            )));
        };
        let original_meta = original.metadata();
        if metadata.run_id() != original_meta.run_id() {
            return Err(DriverError::ReplyRejected(format!(
                "reply belongs to run {} but instruction to run {}",
                metadata.run_id(),
                original_meta.run_id()
            )));
        }
        if metadata.src_node_id() != original_meta.dst_node_id() {
            return Err(DriverError::ReplyRejected(format!(
                "node {} cannot answer an instruction sent to node {}",
                metadata.src_node_id(),
                original_meta.dst_node_id()
            )));
        }
        if !message.is_valid_reply_to(original) {
            return Err(DriverError::ReplyRejected(
                "reply outlives the instruction's TTL".to_string(),
            ));
        }
        if inner.replies.contains_key(&reply_to) {
            return Err(DriverError::ReplyRejected(format!(
                "instruction {reply_to} already has a reply"
            )));
        }

        let message_id = MessageId::new(uuid::Uuid::new_v4().to_string());
        message.assign_message_id(message_id.clone());
        inner.replies.insert(reply_to, message);
        Ok(message_id)
    }

    /// Release replies for `message_ids`. Instructions whose node is gone get
    /// a `NODE_UNAVAILABLE` error reply; expired messages are released without
    /// being returned.
    pub fn take_replies(&self, message_ids: &[MessageId]) -> Vec<Message> {
        let mut inner = self.lock();
        let now = SystemTime::now();
        inner.sweep_expired(now);
        let mut out = Vec::new();
        for message_id in message_ids {
            if let Some(reply) = inner.replies.remove(message_id) {
                inner.instructions.remove(message_id);
                out.push(reply);
                continue;
            }

            let Some(original) = inner.instructions.get(message_id) else {
                continue;
            };
            let dst = original.metadata().dst_node_id();
            if !inner.nodes.contains(&dst) {
                let error = MessageError::new(
                    error_code::NODE_UNAVAILABLE,
                    Some(format!("node {dst} is no longer available")),
                );
                out.push(original.create_error_reply_at(error, now));
                inner.instructions.remove(message_id);
            }
        }
        out
    }
}
