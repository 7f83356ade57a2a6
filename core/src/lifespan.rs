//! Scope bracketing each dispatch.
//!
//! A lifespan function runs setup, calls [`LifespanScope::proceed`] exactly
//! once to let the app handle the message, then runs teardown. `proceed`
//! swallows the handler outcome (the dispatcher reports it), so teardown is
//! reached on every path where the lifespan itself does not bail.

use std::sync::Arc;

use crate::context::Context;

pub type LifespanFn =
    Arc<dyn Fn(&mut Context, &mut LifespanScope<'_>) -> anyhow::Result<()> + Send + Sync>;

pub struct LifespanScope<'a> {
    body: &'a mut dyn FnMut(&mut Context),
    proceeded: usize,
}

impl<'a> LifespanScope<'a> {
    pub(crate) fn new(body: &'a mut dyn FnMut(&mut Context)) -> Self {
        Self { body, proceeded: 0 }
    }

    /// Hand control to the app. Only the first call runs the handler; extra
    /// calls are counted and reported once the lifespan returns.
    pub fn proceed(&mut self, ctx: &mut Context) {
        self.proceeded += 1;
        if self.proceeded == 1 {
            (self.body)(ctx);
        } else {
            tracing::warn!(calls = self.proceeded, "lifespan proceeded more than once");
        }
    }

    pub(crate) fn proceeded(&self) -> usize {
        self.proceeded
    }
}

pub fn lifespan_fn<F>(f: F) -> LifespanFn
where
    F: Fn(&mut Context, &mut LifespanScope<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Proceeds straight away with no setup or teardown.
#[must_use]
pub fn default_lifespan() -> LifespanFn {
    lifespan_fn(|ctx, scope| {
        scope.proceed(ctx);
        Ok(())
    })
}
