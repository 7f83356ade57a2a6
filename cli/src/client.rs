//! Participant used by the simulation: a toy client whose "model" is a byte
//! vector, plus the mods and lifespan it runs with.

use std::time::Instant;

use fedlink_core::{
    AppError, Client, ClientApp, Context, LifespanFn, Mod, client_fn, lifespan_fn, mod_fn,
};
use fedlink_types::{
    EvaluateIns, EvaluateRes, FitIns, FitRes, NodeId, Parameters, Scalar, Status,
};

pub struct SimClient {
    node_id: NodeId,
}

impl SimClient {
    #[must_use]
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }

    fn num_examples(&self) -> u64 {
        10 * self.node_id.value()
    }
}

impl Client for SimClient {
    fn fit(&mut self, ins: FitIns, _ctx: &mut Context) -> anyhow::Result<FitRes> {
        let step = u8::try_from(self.node_id.value() % 8).unwrap_or(1);
        let tensors: Vec<Vec<u8>> = ins
            .parameters
            .tensors
            .into_iter()
            .map(|tensor| tensor.into_iter().map(|b| b.wrapping_add(step)).collect())
            .collect();
        let round = ins.config.get("round").cloned().unwrap_or(Scalar::Int(0));
        Ok(FitRes {
            status: Status::ok(),
            parameters: Parameters::new(tensors, ins.parameters.tensor_type),
            num_examples: self.num_examples(),
            metrics: [("round".to_string(), round)].into(),
        })
    }

    fn evaluate(&mut self, ins: EvaluateIns, _ctx: &mut Context) -> anyhow::Result<EvaluateRes> {
        let bytes: Vec<u8> = ins.parameters.tensors.into_iter().flatten().collect();
        let total: u64 = bytes.iter().map(|b| u64::from(*b)).sum();
        #[allow(clippy::cast_precision_loss)]
        let loss = if bytes.is_empty() {
            0.0
        } else {
            total as f64 / bytes.len() as f64 / 255.0
        };
        Ok(EvaluateRes {
            status: Status::ok(),
            loss,
            num_examples: self.num_examples(),
            metrics: [("accuracy".to_string(), Scalar::Float(1.0 - loss))].into(),
        })
    }
}

/// Logs how long each message took to handle.
fn timing_mod() -> Mod {
    mod_fn(|message, ctx, next| {
        let message_type = message.metadata().message_type().to_string();
        let started = Instant::now();
        let reply = next.run(message, ctx);
        tracing::debug!(
            message_type = %message_type,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = reply.is_ok(),
            "handled message"
        );
        reply
    })
}

fn logging_lifespan() -> LifespanFn {
    lifespan_fn(|ctx, scope| {
        tracing::trace!(node_id = %ctx.node_id, "app entering");
        scope.proceed(ctx);
        tracing::trace!(node_id = %ctx.node_id, "app exiting");
        Ok(())
    })
}

pub fn sim_app() -> Result<ClientApp, AppError> {
    Ok(ClientApp::new()
        .client_fn(client_fn(|ctx: &Context| Ok(SimClient::new(ctx.node_id))))?
        .with_mods(vec![timing_mod()])
        .lifespan(logging_lifespan()))
}
