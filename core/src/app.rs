//! Participant-side application: routes each message to a handler.
//!
//! An app is built in one of two exclusive styles:
//!
//! * from a legacy [`ClientFn`], which serves `train`, `evaluate`,
//!   `get_properties` and `get_parameters` through the [`Client`](crate::Client)
//!   trait;
//! * from per-type handlers registered with [`ClientApp::train`],
//!   [`ClientApp::evaluate`] and [`ClientApp::query`].
//!
//! Mixing the two is rejected when the second registration is made.

use std::fmt;

use fedlink_types::{Message, message_type};
use thiserror::Error;

use crate::client::ClientFn;
use crate::compat::CompatError;
use crate::context::Context;
use crate::lifespan::{LifespanFn, LifespanScope, default_lifespan};
use crate::message_handler::handle_legacy_message;
use crate::mods::{Handler, Mod, handler_fn, make_ffn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("cannot register a `{0}` handler on an app built from a client function")]
    HandlerOnLegacyApp(&'static str),
    #[error("cannot use a client function on an app with registered handlers")]
    ClientFnOnHandlerApp,
    #[error("a `{0}` handler is already registered")]
    DuplicateHandler(&'static str),
    #[error("no `{0}` handler registered")]
    MissingHandler(&'static str),
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),
    #[error("lifespan returned without proceeding")]
    LifespanNeverProceeded,
    #[error("lifespan proceeded {0} times, expected exactly once")]
    LifespanProceededMoreThanOnce(usize),
    #[error("lifespan failed: {0:#}")]
    Lifespan(anyhow::Error),
    #[error("failed to construct client: {0:#}")]
    ClientConstruction(anyhow::Error),
    #[error("message carries an error instead of content")]
    NoContent,
    #[error(transparent)]
    Compat(#[from] CompatError),
    #[error(transparent)]
    Handler(anyhow::Error),
}

impl AppError {
    /// Wiring mistakes, as opposed to failures while handling a message.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            AppError::HandlerOnLegacyApp(_)
                | AppError::ClientFnOnHandlerApp
                | AppError::DuplicateHandler(_)
                | AppError::MissingHandler(_)
                | AppError::UnknownMessageType(_)
                | AppError::LifespanNeverProceeded
                | AppError::LifespanProceededMoreThanOnce(_)
        )
    }

    /// Recover an `AppError` that travelled through the pipeline as
    /// `anyhow::Error`.
    fn from_pipeline(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app) => app,
            Err(other) => AppError::Handler(other),
        }
    }
}

#[derive(Clone)]
struct Registered {
    handler: Handler,
    mods: Vec<Mod>,
}

#[derive(Clone, Default)]
enum Registration {
    #[default]
    Empty,
    Legacy(ClientFn),
    Handlers {
        train: Option<Registered>,
        evaluate: Option<Registered>,
        query: Option<Registered>,
    },
}

#[derive(Clone)]
pub struct ClientApp {
    registration: Registration,
    mods: Vec<Mod>,
    lifespan: LifespanFn,
}

impl Default for ClientApp {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = match &self.registration {
            Registration::Empty => "empty",
            Registration::Legacy(_) => "legacy",
            Registration::Handlers { .. } => "handlers",
        };
        f.debug_struct("ClientApp")
            .field("registration", &style)
            .field("mods", &self.mods.len())
            .finish_non_exhaustive()
    }
}

impl ClientApp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registration: Registration::Empty,
            mods: Vec::new(),
            lifespan: default_lifespan(),
        }
    }

    #[must_use]
    pub fn from_client_fn(client_fn: ClientFn) -> Self {
        Self {
            registration: Registration::Legacy(client_fn),
            ..Self::new()
        }
    }

    /// Serve legacy operations through `client_fn`.
    pub fn client_fn(mut self, client_fn: ClientFn) -> Result<Self, AppError> {
        match self.registration {
            Registration::Handlers { .. } => Err(AppError::ClientFnOnHandlerApp),
            Registration::Empty | Registration::Legacy(_) => {
                self.registration = Registration::Legacy(client_fn);
                Ok(self)
            }
        }
    }

    /// Mods wrapping every handler. Per-handler mods run inside these.
    #[must_use]
    pub fn with_mods(mut self, mods: Vec<Mod>) -> Self {
        self.mods = mods;
        self
    }

    /// Preview feature; logs a warning when set.
    #[must_use]
    pub fn lifespan(mut self, lifespan: LifespanFn) -> Self {
        warn_preview_feature("lifespan");
        self.lifespan = lifespan;
        self
    }

    pub fn train(self, handler: Handler) -> Result<Self, AppError> {
        self.register(message_type::TRAIN, handler, Vec::new())
    }

    pub fn train_with_mods(self, mods: Vec<Mod>, handler: Handler) -> Result<Self, AppError> {
        self.register(message_type::TRAIN, handler, mods)
    }

    pub fn evaluate(self, handler: Handler) -> Result<Self, AppError> {
        self.register(message_type::EVALUATE, handler, Vec::new())
    }

    pub fn evaluate_with_mods(self, mods: Vec<Mod>, handler: Handler) -> Result<Self, AppError> {
        self.register(message_type::EVALUATE, handler, mods)
    }

    pub fn query(self, handler: Handler) -> Result<Self, AppError> {
        self.register(message_type::QUERY, handler, Vec::new())
    }

    pub fn query_with_mods(self, mods: Vec<Mod>, handler: Handler) -> Result<Self, AppError> {
        self.register(message_type::QUERY, handler, mods)
    }

    fn register(
        mut self,
        kind: &'static str,
        handler: Handler,
        mods: Vec<Mod>,
    ) -> Result<Self, AppError> {
        if matches!(self.registration, Registration::Legacy(_)) {
            return Err(AppError::HandlerOnLegacyApp(kind));
        }
        if matches!(self.registration, Registration::Empty) {
            self.registration = Registration::Handlers {
                train: None,
                evaluate: None,
                query: None,
            };
        }
        let Registration::Handlers {
            train,
            evaluate,
            query,
        } = &mut self.registration
        else {
            return Err(AppError::HandlerOnLegacyApp(kind));
        };

        let slot = match kind {
            message_type::TRAIN => train,
            message_type::EVALUATE => evaluate,
            _ => query,
        };
        if slot.is_some() {
            return Err(AppError::DuplicateHandler(kind));
        }
        *slot = Some(Registered { handler, mods });
        warn_preview_feature(kind);
        tracing::debug!(handler = kind, "registered handler");
        Ok(self)
    }

    /// Handle one message inside the lifespan scope.
    pub fn call(&self, message: Message, ctx: &mut Context) -> Result<Message, AppError> {
        let span = ctx.span().clone();
        let _entered = span.enter();
        tracing::debug!(
            message_type = message.metadata().message_type(),
            "dispatching message"
        );

        let mut pending = Some(message);
        let mut outcome = None;
        let mut body = |ctx: &mut Context| {
            if let Some(message) = pending.take() {
                outcome = Some(self.dispatch(message, ctx));
            }
        };

        let mut scope = LifespanScope::new(&mut body);
        let lifespan_result = (self.lifespan)(ctx, &mut scope);
        let proceeded = scope.proceeded();

        lifespan_result.map_err(AppError::Lifespan)?;
        match proceeded {
            0 => Err(AppError::LifespanNeverProceeded),
            1 => outcome.unwrap_or(Err(AppError::LifespanNeverProceeded)),
            n => Err(AppError::LifespanProceededMoreThanOnce(n)),
        }
    }

    fn dispatch(&self, message: Message, ctx: &mut Context) -> Result<Message, AppError> {
        let kind = message.metadata().message_type();

        if let Registration::Legacy(client_fn) = &self.registration {
            let client_fn = client_fn.clone();
            let handler = handler_fn(move |message, ctx| {
                Ok(handle_legacy_message(&client_fn, message, ctx)?)
            });
            return make_ffn(handler, &self.mods)(message, ctx).map_err(AppError::from_pipeline);
        }

        let (name, slot) = match kind {
            message_type::TRAIN => (message_type::TRAIN, self.slot(message_type::TRAIN)),
            message_type::EVALUATE => (message_type::EVALUATE, self.slot(message_type::EVALUATE)),
            message_type::QUERY => (message_type::QUERY, self.slot(message_type::QUERY)),
            other => return Err(AppError::UnknownMessageType(other.to_string())),
        };
        let registered = slot.ok_or(AppError::MissingHandler(name))?;

        let mods: Vec<Mod> = self
            .mods
            .iter()
            .chain(registered.mods.iter())
            .cloned()
            .collect();
        make_ffn(registered.handler.clone(), &mods)(message, ctx).map_err(AppError::from_pipeline)
    }

    fn slot(&self, kind: &str) -> Option<&Registered> {
        match &self.registration {
            Registration::Handlers {
                train,
                evaluate,
                query,
            } => match kind {
                message_type::TRAIN => train.as_ref(),
                message_type::EVALUATE => evaluate.as_ref(),
                _ => query.as_ref(),
            },
            Registration::Empty | Registration::Legacy(_) => None,
        }
    }
}

fn warn_preview_feature(feature: &str) {
    tracing::warn!(feature, "preview feature in use, its API may change");
}
