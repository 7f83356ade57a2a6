//! Per-operation client API.
//!
//! Every method has a default that reports the operation as not implemented,
//! so a client only overrides what it supports.

use std::sync::Arc;

use fedlink_types::{
    Code, EvaluateIns, EvaluateRes, FitIns, FitRes, GetParametersIns, GetParametersRes,
    GetPropertiesIns, GetPropertiesRes, Metrics, Parameters, Properties, Status,
};

use crate::context::Context;

pub trait Client: Send {
    fn get_properties(
        &mut self,
        _ins: GetPropertiesIns,
        _ctx: &mut Context,
    ) -> anyhow::Result<GetPropertiesRes> {
        Ok(GetPropertiesRes {
            status: Status::new(
                Code::GetPropertiesNotImplemented,
                "Client does not implement `get_properties`",
            ),
            properties: Properties::new(),
        })
    }

    fn get_parameters(
        &mut self,
        _ins: GetParametersIns,
        _ctx: &mut Context,
    ) -> anyhow::Result<GetParametersRes> {
        Ok(GetParametersRes {
            status: Status::new(
                Code::GetParametersNotImplemented,
                "Client does not implement `get_parameters`",
            ),
            parameters: Parameters::default(),
        })
    }

    fn fit(&mut self, _ins: FitIns, _ctx: &mut Context) -> anyhow::Result<FitRes> {
        Ok(FitRes {
            status: Status::new(Code::FitNotImplemented, "Client does not implement `fit`"),
            parameters: Parameters::default(),
            num_examples: 0,
            metrics: Metrics::new(),
        })
    }

    fn evaluate(&mut self, _ins: EvaluateIns, _ctx: &mut Context) -> anyhow::Result<EvaluateRes> {
        Ok(EvaluateRes {
            status: Status::new(
                Code::EvaluateNotImplemented,
                "Client does not implement `evaluate`",
            ),
            loss: 0.0,
            num_examples: 0,
            metrics: Metrics::new(),
        })
    }
}

/// Builds a fresh client for each message.
pub type ClientFn = Arc<dyn Fn(&Context) -> anyhow::Result<Box<dyn Client>> + Send + Sync>;

pub fn client_fn<F, C>(f: F) -> ClientFn
where
    F: Fn(&Context) -> anyhow::Result<C> + Send + Sync + 'static,
    C: Client + 'static,
{
    Arc::new(move |ctx: &Context| {
        let client: Box<dyn Client> = Box::new(f(ctx)?);
        Ok(client)
    })
}
