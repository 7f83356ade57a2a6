//! Message envelope exchanged between the orchestrator and participants.
//!
//! A `Message` is metadata plus either a `RecordSet` or a `MessageError`.
//! The `_at` constructors take `SystemTime` explicitly; the plain forms read
//! the clock.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, NodeId, RunId};
use crate::record::RecordSet;

/// Clock-skew allowance when checking a reply's TTL against its instruction.
pub const MESSAGE_TTL_TOLERANCE: Duration = Duration::from_millis(100);

/// TTL applied when the caller does not provide one (12 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(43_200);

/// Reserved `message_type` tags.
pub mod message_type {
    pub const TRAIN: &str = "train";
    pub const EVALUATE: &str = "evaluate";
    pub const QUERY: &str = "query";

    pub const GET_PROPERTIES: &str = "get_properties";
    pub const GET_PARAMETERS: &str = "get_parameters";

    #[must_use]
    pub fn is_reserved(tag: &str) -> bool {
        matches!(
            tag,
            TRAIN | EVALUATE | QUERY | GET_PROPERTIES | GET_PARAMETERS
        )
    }
}

/// Codes carried by [`MessageError`].
pub mod error_code {
    pub const UNKNOWN: i64 = 0;
    pub const LOAD_CLIENT_APP_EXCEPTION: i64 = 1;
    pub const CLIENT_APP_RAISED_EXCEPTION: i64 = 2;
    pub const NODE_UNAVAILABLE: i64 = 3;
}

/// Error payload sent back instead of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    code: i64,
    reason: Option<String>,
}

impl MessageError {
    #[must_use]
    pub fn new(code: i64, reason: Option<String>) -> Self {
        Self { code, reason }
    }

    #[must_use]
    pub fn code(&self) -> i64 {
        self.code
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    run_id: RunId,
    message_id: Option<MessageId>,
    src_node_id: NodeId,
    dst_node_id: NodeId,
    reply_to_message_id: Option<MessageId>,
    group_id: String,
    ttl: Duration,
    message_type: String,
    created_at: SystemTime,
}

impl Metadata {
    /// Metadata for an original (non-reply) message created now.
    #[must_use]
    pub fn new(
        run_id: RunId,
        src_node_id: NodeId,
        dst_node_id: NodeId,
        group_id: impl Into<String>,
        ttl: Duration,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            message_id: None,
            src_node_id,
            dst_node_id,
            reply_to_message_id: None,
            group_id: group_id.into(),
            ttl,
            message_type: message_type.into(),
            created_at: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = created_at;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// `None` until the transport assigns an id on push.
    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    #[must_use]
    pub fn src_node_id(&self) -> NodeId {
        self.src_node_id
    }

    #[must_use]
    pub fn dst_node_id(&self) -> NodeId {
        self.dst_node_id
    }

    /// `None` for original messages.
    #[must_use]
    pub fn reply_to_message_id(&self) -> Option<&MessageId> {
        self.reply_to_message_id.as_ref()
    }

    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Expired once more than `ttl` has elapsed since creation.
    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now.duration_since(self.created_at)
            .is_ok_and(|elapsed| elapsed > self.ttl)
    }

    /// TTL budget left at `now`; zero once expired.
    #[must_use]
    pub fn remaining_ttl_at(&self, now: SystemTime) -> Duration {
        let elapsed = now.duration_since(self.created_at).unwrap_or_default();
        self.ttl.saturating_sub(elapsed)
    }

    /// Metadata for a reply: same run, group and type, src/dst swapped,
    /// `reply_to` set to this message, TTL capped to what is left.
    #[must_use]
    pub fn reply_metadata_at(&self, now: SystemTime) -> Metadata {
        Metadata {
            run_id: self.run_id,
            message_id: None,
            src_node_id: self.dst_node_id,
            dst_node_id: self.src_node_id,
            reply_to_message_id: self.message_id.clone(),
            group_id: self.group_id.clone(),
            ttl: self.remaining_ttl_at(now),
            message_type: self.message_type.clone(),
            created_at: now,
        }
    }

    /// Called by the transport when it accepts the message.
    pub fn assign_message_id(&mut self, id: MessageId) {
        self.message_id = Some(id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Content(RecordSet),
    Error(MessageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    metadata: Metadata,
    payload: Payload,
}

impl Message {
    #[must_use]
    pub fn new(metadata: Metadata, content: RecordSet) -> Self {
        Self {
            metadata,
            payload: Payload::Content(content),
        }
    }

    #[must_use]
    pub fn from_error(metadata: Metadata, error: MessageError) -> Self {
        Self {
            metadata,
            payload: Payload::Error(error),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn assign_message_id(&mut self, id: MessageId) {
        self.metadata.assign_message_id(id);
    }

    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    #[must_use]
    pub fn content(&self) -> Option<&RecordSet> {
        match &self.payload {
            Payload::Content(content) => Some(content),
            Payload::Error(_) => None,
        }
    }

    pub fn content_mut(&mut self) -> Option<&mut RecordSet> {
        match &mut self.payload {
            Payload::Content(content) => Some(content),
            Payload::Error(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&MessageError> {
        match &self.payload {
            Payload::Error(error) => Some(error),
            Payload::Content(_) => None,
        }
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        matches!(self.payload, Payload::Content(_))
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    #[must_use]
    pub fn into_parts(self) -> (Metadata, Payload) {
        (self.metadata, self.payload)
    }

    #[must_use]
    pub fn create_reply(&self, content: RecordSet) -> Message {
        self.create_reply_at(content, SystemTime::now())
    }

    #[must_use]
    pub fn create_reply_at(&self, content: RecordSet, now: SystemTime) -> Message {
        Message::new(self.metadata.reply_metadata_at(now), content)
    }

    #[must_use]
    pub fn create_error_reply(&self, error: MessageError) -> Message {
        self.create_error_reply_at(error, SystemTime::now())
    }

    #[must_use]
    pub fn create_error_reply_at(&self, error: MessageError, now: SystemTime) -> Message {
        Message::from_error(self.metadata.reply_metadata_at(now), error)
    }

    /// Whether `self` is an acceptable reply to `original`: it must point
    /// at the original and must not outlive the original's TTL window
    /// (plus [`MESSAGE_TTL_TOLERANCE`]).
    #[must_use]
    pub fn is_valid_reply_to(&self, original: &Message) -> bool {
        let points_back = original.metadata.message_id.is_some()
            && self.metadata.reply_to_message_id == original.metadata.message_id;
        let offset = self
            .metadata
            .created_at
            .duration_since(original.metadata.created_at)
            .unwrap_or_default();
        let reply_end = offset.saturating_add(self.metadata.ttl);
        let budget = original.metadata.ttl.saturating_add(MESSAGE_TTL_TOLERANCE);
        points_back && reply_end <= budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SUPERLINK_NODE_ID;

    fn instruction(ttl: Duration, created_at: SystemTime) -> Message {
        let metadata = Metadata::new(
            RunId::new(7),
            SUPERLINK_NODE_ID,
            NodeId::new(42),
            "round-1",
            ttl,
            message_type::TRAIN,
        )
        .with_created_at(created_at);
        let mut message = Message::new(metadata, RecordSet::new());
        message.assign_message_id(MessageId::new("m-1"));
        message
    }

    #[test]
    fn reply_swaps_endpoints_and_links_back() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let original = instruction(Duration::from_secs(60), start);
        let reply = original.create_reply_at(RecordSet::new(), start + Duration::from_secs(10));

        let meta = reply.metadata();
        assert_eq!(meta.run_id(), RunId::new(7));
        assert_eq!(meta.src_node_id(), NodeId::new(42));
        assert_eq!(meta.dst_node_id(), SUPERLINK_NODE_ID);
        assert_eq!(meta.reply_to_message_id(), Some(&MessageId::new("m-1")));
        assert_eq!(meta.group_id(), "round-1");
        assert_eq!(meta.message_type(), message_type::TRAIN);
        assert_eq!(meta.message_id(), None);
        assert_eq!(meta.ttl(), Duration::from_secs(50));
        assert!(reply.is_valid_reply_to(&original));
    }

    #[test]
    fn reply_after_expiry_has_zero_ttl() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let original = instruction(Duration::from_secs(5), start);
        let reply = original.create_reply_at(RecordSet::new(), start + Duration::from_secs(30));
        assert_eq!(reply.metadata().ttl(), Duration::ZERO);
        assert!(original.metadata().is_expired_at(start + Duration::from_secs(30)));
        // Created after the deadline, so it cannot be valid even with zero TTL.
        assert!(!reply.is_valid_reply_to(&original));
    }

    #[test]
    fn reply_outliving_instruction_is_rejected() {
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let original = instruction(Duration::from_secs(10), start);
        let metadata = Metadata::new(
            RunId::new(7),
            NodeId::new(42),
            SUPERLINK_NODE_ID,
            "round-1",
            Duration::from_secs(60),
            message_type::TRAIN,
        )
        .with_created_at(start);
        let forged = Message::new(metadata, RecordSet::new());
        assert!(!forged.is_valid_reply_to(&original));
    }

    #[test]
    fn error_reply_carries_no_content() {
        let original = instruction(Duration::from_secs(60), SystemTime::now());
        let reply = original.create_error_reply(MessageError::new(
            error_code::CLIENT_APP_RAISED_EXCEPTION,
            Some("boom".to_string()),
        ));
        assert!(reply.has_error());
        assert!(reply.content().is_none());
        assert_eq!(reply.error().map(MessageError::code), Some(2));
    }

    #[test]
    fn reserved_tags() {
        assert!(message_type::is_reserved("query"));
        assert!(message_type::is_reserved("get_parameters"));
        assert!(!message_type::is_reserved("reconnect"));
    }
}
