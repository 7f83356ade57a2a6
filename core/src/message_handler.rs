//! Runs a legacy [`Client`](crate::Client) against a record-set message.

use fedlink_types::{Message, message_type};

use crate::app::AppError;
use crate::client::ClientFn;
use crate::compat::{
    evaluateres_to_recordset, fitres_to_recordset, getparametersres_to_recordset,
    getpropertiesres_to_recordset, recordset_to_evaluateins, recordset_to_fitins,
    recordset_to_getparametersins, recordset_to_getpropertiesins,
};
use crate::context::Context;

/// Build a client, convert the content for the operation named by
/// `message_type`, call the client and wrap the result in a reply.
///
/// Instructions are read without consuming the message; parameter results
/// are moved into the reply.
pub fn handle_legacy_message(
    client_fn: &ClientFn,
    mut message: Message,
    ctx: &mut Context,
) -> Result<Message, AppError> {
    let op = message.metadata().message_type().to_string();
    if !matches!(
        op.as_str(),
        message_type::TRAIN
            | message_type::EVALUATE
            | message_type::GET_PROPERTIES
            | message_type::GET_PARAMETERS
    ) {
        return Err(AppError::UnknownMessageType(op));
    }

    let mut client = client_fn(&*ctx).map_err(AppError::ClientConstruction)?;
    let content = message.content_mut().ok_or(AppError::NoContent)?;
    tracing::debug!(message_type = %op, "handling legacy message");

    let out = match op.as_str() {
        message_type::GET_PROPERTIES => {
            let ins = recordset_to_getpropertiesins(content)?;
            let res = client
                .get_properties(ins, ctx)
                .map_err(AppError::Handler)?;
            getpropertiesres_to_recordset(&res)?
        }
        message_type::GET_PARAMETERS => {
            let ins = recordset_to_getparametersins(content)?;
            let mut res = client
                .get_parameters(ins, ctx)
                .map_err(AppError::Handler)?;
            getparametersres_to_recordset(&mut res, false)?
        }
        message_type::TRAIN => {
            let ins = recordset_to_fitins(content, true)?;
            let mut res = client.fit(ins, ctx).map_err(AppError::Handler)?;
            fitres_to_recordset(&mut res, false)?
        }
        _ => {
            let ins = recordset_to_evaluateins(content, true)?;
            let res = client.evaluate(ins, ctx).map_err(AppError::Handler)?;
            evaluateres_to_recordset(&res)?
        }
    };
    Ok(message.create_reply(out))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fedlink_types::{
        Code, FitIns, FitRes, Metadata, MetricsRecord, NodeId, Parameters, RecordSet, RunId,
        SUPERLINK_NODE_ID, Scalar, Status, UserConfig, Value,
    };

    use super::*;
    use crate::client::{Client, client_fn};
    use crate::compat::{fitins_to_recordset, recordset_to_fitres};

    struct Doubler;

    impl Client for Doubler {
        fn fit(&mut self, ins: FitIns, ctx: &mut Context) -> anyhow::Result<FitRes> {
            let rounds = ctx
                .state
                .metrics_records
                .entry("rounds".to_string())
                .or_default();
            let seen = rounds.get("count").and_then(Value::as_int).unwrap_or(0);
            rounds.set("count", seen + 1)?;

            let tensors: Vec<Vec<u8>> = ins
                .parameters
                .tensors
                .iter()
                .map(|t| t.iter().map(|b| b.wrapping_mul(2)).collect())
                .collect();
            Ok(FitRes {
                status: Status::ok(),
                parameters: Parameters::new(tensors, ins.parameters.tensor_type),
                num_examples: 4,
                metrics: [("lr".to_string(), ins.config["lr"].clone())].into(),
            })
        }
    }

    fn context() -> Context {
        Context::new(
            RunId::new(1),
            NodeId::new(5),
            UserConfig::new(),
            RecordSet::new(),
            UserConfig::new(),
        )
    }

    fn instruction(kind: &str, content: RecordSet) -> Message {
        let metadata = Metadata::new(
            RunId::new(1),
            SUPERLINK_NODE_ID,
            NodeId::new(5),
            "1",
            Duration::from_secs(60),
            kind,
        );
        let mut message = Message::new(metadata, content);
        message.assign_message_id(fedlink_types::MessageId::new("ins-1"));
        message
    }

    fn fit_message() -> Message {
        let mut ins = FitIns {
            parameters: Parameters::new(vec![vec![1, 2], vec![3]], "bytes"),
            config: [("lr".to_string(), Scalar::Float(0.5))].into(),
        };
        instruction(message_type::TRAIN, fitins_to_recordset(&mut ins, false).unwrap())
    }

    #[test]
    fn fit_round_trips_through_client() {
        let factory = client_fn(|_ctx: &Context| Ok(Doubler));
        let mut ctx = context();

        let mut reply = handle_legacy_message(&factory, fit_message(), &mut ctx).unwrap();
        assert_eq!(
            reply.metadata().reply_to_message_id().map(fedlink_types::MessageId::as_str),
            Some("ins-1")
        );

        let res = recordset_to_fitres(reply.content_mut().unwrap(), false).unwrap();
        assert!(res.status.is_ok());
        assert_eq!(res.parameters.tensors, vec![vec![2, 4], vec![6]]);
        assert_eq!(res.num_examples, 4);
        assert_eq!(res.metrics["lr"], Scalar::Float(0.5));

        handle_legacy_message(&factory, fit_message(), &mut ctx).unwrap();
        let rounds: &MetricsRecord = &ctx.state.metrics_records["rounds"];
        assert_eq!(rounds.get("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn unimplemented_operation_reports_status() {
        let factory = client_fn(|_ctx: &Context| Ok(Doubler));
        let content = fedlink_types::RecordSet::new().with_configs(
            "getpropertiesins.config",
            fedlink_types::ConfigsRecord::new(),
        );
        let reply = handle_legacy_message(
            &factory,
            instruction(message_type::GET_PROPERTIES, content),
            &mut context(),
        )
        .unwrap();

        let status = &reply.content().unwrap().configs_records["getpropertiesres.status"];
        assert_eq!(
            status.get("code"),
            Some(&Value::Int(Code::GetPropertiesNotImplemented.as_i64()))
        );
    }

    #[test]
    fn query_is_not_a_legacy_operation() {
        let factory = client_fn(|_ctx: &Context| Ok(Doubler));
        let err = handle_legacy_message(
            &factory,
            instruction(message_type::QUERY, RecordSet::new()),
            &mut context(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::UnknownMessageType(ref t) if t == "query"));
    }

    #[test]
    fn failing_client_factory_is_reported() {
        let factory = client_fn(|_ctx: &Context| -> anyhow::Result<Doubler> {
            anyhow::bail!("no dataset")
        });
        let err = handle_legacy_message(&factory, fit_message(), &mut context()).unwrap_err();
        assert!(matches!(err, AppError::ClientConstruction(_)));
    }
}
