//! Per-run state handed to every handler invocation.

use fedlink_types::{NodeId, RecordSet, RunId, UserConfig};
use tracing::Span;

/// State bag for one run on one node.
///
/// The dispatcher passes it through unchanged; handlers and mods may keep
/// anything they need across rounds in `state`.
#[derive(Debug, Clone)]
pub struct Context {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub node_config: UserConfig,
    pub state: RecordSet,
    pub run_config: UserConfig,
    span: Span,
}

impl Context {
    #[must_use]
    pub fn new(
        run_id: RunId,
        node_id: NodeId,
        node_config: UserConfig,
        state: RecordSet,
        run_config: UserConfig,
    ) -> Self {
        let span = tracing::info_span!("run", run_id = %run_id, node_id = %node_id);
        Self {
            run_id,
            node_id,
            node_config,
            state,
            run_config,
            span,
        }
    }

    /// Span every event for this run/node is recorded under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_starts_with_empty_state() {
        let ctx = Context::new(
            RunId::new(3),
            NodeId::new(9),
            UserConfig::new(),
            RecordSet::new(),
            UserConfig::new(),
        );
        assert!(ctx.state.is_empty());
        assert_eq!(ctx.run_id, RunId::new(3));
        assert_eq!(ctx.node_id, NodeId::new(9));
    }
}
