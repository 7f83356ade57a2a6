//! Orchestrator-side handle on one participant, speaking the legacy
//! instruction/result API.

use std::sync::Arc;
use std::time::Duration;

use fedlink_core::compat::{
    evaluateins_to_recordset, fitins_to_recordset, getparametersins_to_recordset,
    getpropertiesins_to_recordset, recordset_to_evaluateres, recordset_to_fitres,
    recordset_to_getparametersres, recordset_to_getpropertiesres,
};
use fedlink_types::{
    DisconnectRes, EvaluateIns, EvaluateRes, FitIns, FitRes, GetParametersIns, GetParametersRes,
    GetPropertiesIns, GetPropertiesRes, NodeId, Payload, RecordSet, ReconnectIns, message_type,
};

use crate::driver::{Driver, DriverError, DriverFut};

pub trait ClientProxy: Send + Sync {
    fn node_id(&self) -> NodeId;

    fn get_properties(
        &self,
        ins: GetPropertiesIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, GetPropertiesRes>;

    fn get_parameters(
        &self,
        ins: GetParametersIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, GetParametersRes>;

    fn fit(
        &self,
        ins: FitIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, FitRes>;

    fn evaluate(
        &self,
        ins: EvaluateIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, EvaluateRes>;

    fn reconnect(
        &self,
        ins: ReconnectIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, DisconnectRes>;
}

/// [`ClientProxy`] that exchanges messages through a [`Driver`].
#[derive(Clone)]
pub struct DriverClientProxy {
    driver: Arc<dyn Driver>,
    node_id: NodeId,
}

impl DriverClientProxy {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, node_id: NodeId) -> Self {
        Self { driver, node_id }
    }

    /// Send one instruction and wait for its reply. The timeout doubles as
    /// the message TTL.
    async fn exchange(
        &self,
        content: RecordSet,
        kind: &str,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> Result<RecordSet, DriverError> {
        let group_id = group_id.map(|id| id.to_string()).unwrap_or_default();
        let message = self
            .driver
            .create_message(content, kind, self.node_id, &group_id, timeout)?;
        let mut replies = self.driver.send_and_receive(vec![message], timeout).await?;
        let reply = replies.pop().ok_or(DriverError::NoReply(self.node_id))?;

        match reply.into_parts().1 {
            Payload::Content(content) => Ok(content),
            Payload::Error(error) => Err(DriverError::ErrorReply {
                node: self.node_id,
                code: error.code(),
                reason: error.reason().unwrap_or_default().to_string(),
            }),
        }
    }
}

impl ClientProxy for DriverClientProxy {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn get_properties(
        &self,
        ins: GetPropertiesIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, GetPropertiesRes> {
        Box::pin(async move {
            let content = getpropertiesins_to_recordset(&ins)?;
            let out = self
                .exchange(content, message_type::GET_PROPERTIES, timeout, group_id)
                .await?;
            Ok(recordset_to_getpropertiesres(&out)?)
        })
    }

    fn get_parameters(
        &self,
        ins: GetParametersIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, GetParametersRes> {
        Box::pin(async move {
            let content = getparametersins_to_recordset(&ins)?;
            let mut out = self
                .exchange(content, message_type::GET_PARAMETERS, timeout, group_id)
                .await?;
            Ok(recordset_to_getparametersres(&mut out, false)?)
        })
    }

    fn fit(
        &self,
        mut ins: FitIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, FitRes> {
        Box::pin(async move {
            let content = fitins_to_recordset(&mut ins, false)?;
            let mut out = self
                .exchange(content, message_type::TRAIN, timeout, group_id)
                .await?;
            Ok(recordset_to_fitres(&mut out, false)?)
        })
    }

    fn evaluate(
        &self,
        mut ins: EvaluateIns,
        timeout: Option<Duration>,
        group_id: Option<u64>,
    ) -> DriverFut<'_, EvaluateRes> {
        Box::pin(async move {
            let content = evaluateins_to_recordset(&mut ins, false)?;
            let out = self
                .exchange(content, message_type::EVALUATE, timeout, group_id)
                .await?;
            Ok(recordset_to_evaluateres(&out)?)
        })
    }

    fn reconnect(
        &self,
        _ins: ReconnectIns,
        _timeout: Option<Duration>,
        _group_id: Option<u64>,
    ) -> DriverFut<'_, DisconnectRes> {
        Box::pin(async { Err(DriverError::Unsupported("reconnect")) })
    }
}
