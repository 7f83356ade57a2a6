//! Handler middleware.
//!
//! A [`Mod`] wraps the rest of the pipeline: it sees the inbound message and
//! context, decides whether to call [`Next::run`], and may rewrite the reply.
//! `Next` is consumed by `run`, so a mod reaches the downstream handler at
//! most once. Not calling it short-circuits the pipeline.

use std::sync::Arc;

use fedlink_types::Message;

use crate::context::Context;

pub type Handler = Arc<dyn Fn(Message, &mut Context) -> anyhow::Result<Message> + Send + Sync>;

pub type Mod = Arc<dyn Fn(Message, &mut Context, Next<'_>) -> anyhow::Result<Message> + Send + Sync>;

/// The downstream part of the pipeline as seen from one mod.
pub struct Next<'a> {
    handler: &'a Handler,
}

impl Next<'_> {
    pub fn run(self, message: Message, ctx: &mut Context) -> anyhow::Result<Message> {
        (self.handler)(message, ctx)
    }
}

pub fn handler_fn<F>(f: F) -> Handler
where
    F: Fn(Message, &mut Context) -> anyhow::Result<Message> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn mod_fn<F>(f: F) -> Mod
where
    F: Fn(Message, &mut Context, Next<'_>) -> anyhow::Result<Message> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap `handler` in `mods`. The first mod is the outermost layer, so
/// invocation order follows list order.
#[must_use]
pub fn make_ffn(handler: Handler, mods: &[Mod]) -> Handler {
    mods.iter().rev().fold(handler, |next, layer| {
        let layer = Arc::clone(layer);
        let wrapped: Handler = Arc::new(move |message: Message, ctx: &mut Context| {
            layer(message, ctx, Next { handler: &next })
        });
        wrapped
    })
}
