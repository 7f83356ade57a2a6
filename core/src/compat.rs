//! Mapping between legacy instruction/result structures and `RecordSet`
//! sections.
//!
//! Sections are named `"{operation}.{field}"` (`"fitins.parameters"`,
//! `"evaluateres.status"`, ...). The names are part of the wire contract with
//! any handler that reads record sets directly.
//!
//! Parameter conversions take a `keep_input` flag. With `keep_input = false`
//! the source tensors are moved out as they are converted, so large payloads
//! are never held twice. With `keep_input = true` the source is left intact.
//!
//! Known limitation: `Parameters` carries one `tensor_type` for all tensors.
//! Going from a `ParametersRecord` back to `Parameters` takes the `stype` of
//! the first array and ignores the `stype` of the others.

use std::collections::HashMap;

use fedlink_types::{
    Array, Code, ConfigsRecord, EvaluateIns, EvaluateRes, FitIns, FitRes, GetParametersIns,
    GetParametersRes, GetPropertiesIns, GetPropertiesRes, MetricsRecord, Parameters,
    ParametersRecord, RecordError, RecordSet, Scalar, Status, Value, ValueKind,
};
use thiserror::Error;

/// Key of the placeholder array stored for a `Parameters` with no tensors.
pub const EMPTY_TENSOR_KEY: &str = "_empty";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompatError {
    #[error("record set has no {kind} record named '{key}'")]
    MissingRecord { kind: &'static str, key: String },
    #[error("record '{record}' has no entry '{key}'")]
    MissingEntry { record: String, key: String },
    #[error("entry '{key}' of record '{record}' has unexpected type {found}")]
    UnexpectedValue {
        record: String,
        key: String,
        found: ValueKind,
    },
    #[error("unknown status code {0}")]
    UnknownStatusCode(i64),
    #[error("entry '{key}' of record '{record}' must be non-negative, got {value}")]
    Negative {
        record: String,
        key: String,
        value: i64,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

// ============================================================================
// Parameters
// ============================================================================

/// Convert `Parameters` into a `ParametersRecord`, one array per tensor keyed
/// by its position.
///
/// Zero tensors produce a single empty array under [`EMPTY_TENSOR_KEY`] so
/// the tensor type survives the trip.
pub fn parameters_to_parametersrecord(
    parameters: &mut Parameters,
    keep_input: bool,
) -> ParametersRecord {
    let tensor_type = parameters.tensor_type.clone();
    let tensors = if keep_input {
        parameters.tensors.clone()
    } else {
        std::mem::take(&mut parameters.tensors)
    };

    let mut record = ParametersRecord::new();
    if tensors.is_empty() {
        record.insert(
            EMPTY_TENSOR_KEY,
            Array::new("", Vec::new(), &tensor_type, Vec::new()),
        );
        return record;
    }
    for (idx, tensor) in tensors.into_iter().enumerate() {
        record.insert(
            idx.to_string(),
            Array::new("", Vec::new(), &tensor_type, tensor),
        );
    }
    record
}

/// Rebuild `Parameters` from a `ParametersRecord`, walking keys in insertion
/// order and skipping the empty-parameters placeholder.
pub fn parametersrecord_to_parameters(
    record: &mut ParametersRecord,
    keep_input: bool,
) -> Parameters {
    let mut parameters = Parameters::default();
    let mut absorb = |key: &str, data: Vec<u8>, stype: &str| {
        if key != EMPTY_TENSOR_KEY {
            parameters.tensors.push(data);
        }
        if parameters.tensor_type.is_empty() {
            parameters.tensor_type = stype.to_string();
        }
    };

    if keep_input {
        for (key, array) in record.iter() {
            absorb(key, array.data.clone(), &array.stype);
        }
    } else {
        for (key, array) in record.drain() {
            absorb(&key, array.data, &array.stype);
        }
    }
    parameters
}

// ============================================================================
// Scalar mappings and status
// ============================================================================

fn scalar_map_to_configsrecord(map: &HashMap<String, Scalar>) -> Result<ConfigsRecord, CompatError> {
    let mut record = ConfigsRecord::new();
    for (key, value) in map {
        record.set(key.clone(), Value::from(value.clone()))?;
    }
    Ok(record)
}

/// Every value must already be a legacy scalar; lists are rejected.
fn configsrecord_to_scalar_map(
    record: &ConfigsRecord,
) -> Result<HashMap<String, Scalar>, CompatError> {
    record
        .iter()
        .map(|(key, value)| {
            let scalar = Scalar::from_value(key, value.clone())?;
            Ok((key.to_string(), scalar))
        })
        .collect()
}

fn embed_status(res_str: &str, status: &Status, recordset: &mut RecordSet) -> Result<(), CompatError> {
    let record = ConfigsRecord::new()
        .with("code", status.code.as_i64())?
        .with("message", status.message.as_str())?;
    recordset
        .configs_records
        .insert(format!("{res_str}.status"), record);
    Ok(())
}

fn extract_status(res_str: &str, recordset: &RecordSet) -> Result<Status, CompatError> {
    let name = format!("{res_str}.status");
    let record = configs_record(recordset, &name)?;
    let code = int_entry(record.get("code"), &name, "code")?;
    let code = Code::from_i64(code).ok_or(CompatError::UnknownStatusCode(code))?;
    let message = match record.get("message") {
        Some(Value::Str(message)) => message.clone(),
        Some(other) => {
            return Err(CompatError::UnexpectedValue {
                record: name,
                key: "message".to_string(),
                found: other.kind(),
            });
        }
        None => {
            return Err(CompatError::MissingEntry {
                record: name,
                key: "message".to_string(),
            });
        }
    };
    Ok(Status { code, message })
}

// ============================================================================
// Section access
// ============================================================================

fn configs_record<'a>(recordset: &'a RecordSet, key: &str) -> Result<&'a ConfigsRecord, CompatError> {
    recordset
        .configs_records
        .get(key)
        .ok_or_else(|| CompatError::MissingRecord {
            kind: "configs",
            key: key.to_string(),
        })
}

fn metrics_record<'a>(recordset: &'a RecordSet, key: &str) -> Result<&'a MetricsRecord, CompatError> {
    recordset
        .metrics_records
        .get(key)
        .ok_or_else(|| CompatError::MissingRecord {
            kind: "metrics",
            key: key.to_string(),
        })
}

fn parameters_record<'a>(
    recordset: &'a mut RecordSet,
    key: &str,
) -> Result<&'a mut ParametersRecord, CompatError> {
    recordset
        .parameters_records
        .get_mut(key)
        .ok_or_else(|| CompatError::MissingRecord {
            kind: "parameters",
            key: key.to_string(),
        })
}

fn int_entry(value: Option<&Value>, record: &str, key: &str) -> Result<i64, CompatError> {
    match value {
        Some(Value::Int(v)) => Ok(*v),
        Some(other) => Err(CompatError::UnexpectedValue {
            record: record.to_string(),
            key: key.to_string(),
            found: other.kind(),
        }),
        None => Err(CompatError::MissingEntry {
            record: record.to_string(),
            key: key.to_string(),
        }),
    }
}

fn num_examples_record(num_examples: u64) -> Result<MetricsRecord, CompatError> {
    let value = i64::try_from(num_examples).unwrap_or(i64::MAX);
    Ok(MetricsRecord::new().with("num_examples", value)?)
}

fn extract_num_examples(res_str: &str, recordset: &RecordSet) -> Result<u64, CompatError> {
    let name = format!("{res_str}.num_examples");
    let record = metrics_record(recordset, &name)?;
    let value = int_entry(record.get("num_examples"), &name, "num_examples")?;
    u64::try_from(value).map_err(|_| CompatError::Negative {
        record: name,
        key: "num_examples".to_string(),
        value,
    })
}

// ============================================================================
// Instructions
// ============================================================================

fn recordset_to_fit_or_evaluate_ins_components(
    recordset: &mut RecordSet,
    ins_str: &str,
    keep_input: bool,
) -> Result<(Parameters, HashMap<String, Scalar>), CompatError> {
    let record = parameters_record(recordset, &format!("{ins_str}.parameters"))?;
    let parameters = parametersrecord_to_parameters(record, keep_input);
    let config = configsrecord_to_scalar_map(configs_record(recordset, &format!("{ins_str}.config"))?)?;
    Ok((parameters, config))
}

fn fit_or_evaluate_ins_to_recordset(
    parameters: &mut Parameters,
    config: &HashMap<String, Scalar>,
    ins_str: &str,
    keep_input: bool,
) -> Result<RecordSet, CompatError> {
    let record = parameters_to_parametersrecord(parameters, keep_input);
    Ok(RecordSet::new()
        .with_parameters(format!("{ins_str}.parameters"), record)
        .with_configs(format!("{ins_str}.config"), scalar_map_to_configsrecord(config)?))
}

pub fn recordset_to_fitins(recordset: &mut RecordSet, keep_input: bool) -> Result<FitIns, CompatError> {
    let (parameters, config) =
        recordset_to_fit_or_evaluate_ins_components(recordset, "fitins", keep_input)?;
    Ok(FitIns { parameters, config })
}

pub fn fitins_to_recordset(fitins: &mut FitIns, keep_input: bool) -> Result<RecordSet, CompatError> {
    fit_or_evaluate_ins_to_recordset(&mut fitins.parameters, &fitins.config, "fitins", keep_input)
}

pub fn recordset_to_evaluateins(
    recordset: &mut RecordSet,
    keep_input: bool,
) -> Result<EvaluateIns, CompatError> {
    let (parameters, config) =
        recordset_to_fit_or_evaluate_ins_components(recordset, "evaluateins", keep_input)?;
    Ok(EvaluateIns { parameters, config })
}

pub fn evaluateins_to_recordset(
    evaluateins: &mut EvaluateIns,
    keep_input: bool,
) -> Result<RecordSet, CompatError> {
    fit_or_evaluate_ins_to_recordset(
        &mut evaluateins.parameters,
        &evaluateins.config,
        "evaluateins",
        keep_input,
    )
}

pub fn recordset_to_getparametersins(recordset: &RecordSet) -> Result<GetParametersIns, CompatError> {
    let config = configsrecord_to_scalar_map(configs_record(recordset, "getparametersins.config")?)?;
    Ok(GetParametersIns { config })
}

pub fn getparametersins_to_recordset(ins: &GetParametersIns) -> Result<RecordSet, CompatError> {
    Ok(RecordSet::new().with_configs(
        "getparametersins.config",
        scalar_map_to_configsrecord(&ins.config)?,
    ))
}

pub fn recordset_to_getpropertiesins(recordset: &RecordSet) -> Result<GetPropertiesIns, CompatError> {
    let config = configsrecord_to_scalar_map(configs_record(recordset, "getpropertiesins.config")?)?;
    Ok(GetPropertiesIns { config })
}

pub fn getpropertiesins_to_recordset(ins: &GetPropertiesIns) -> Result<RecordSet, CompatError> {
    Ok(RecordSet::new().with_configs(
        "getpropertiesins.config",
        scalar_map_to_configsrecord(&ins.config)?,
    ))
}

// ============================================================================
// Results
// ============================================================================

pub fn fitres_to_recordset(fitres: &mut FitRes, keep_input: bool) -> Result<RecordSet, CompatError> {
    let res_str = "fitres";
    let mut recordset = RecordSet::new()
        .with_configs(
            format!("{res_str}.metrics"),
            scalar_map_to_configsrecord(&fitres.metrics)?,
        )
        .with_metrics(
            format!("{res_str}.num_examples"),
            num_examples_record(fitres.num_examples)?,
        )
        .with_parameters(
            format!("{res_str}.parameters"),
            parameters_to_parametersrecord(&mut fitres.parameters, keep_input),
        );
    embed_status(res_str, &fitres.status, &mut recordset)?;
    Ok(recordset)
}

pub fn recordset_to_fitres(recordset: &mut RecordSet, keep_input: bool) -> Result<FitRes, CompatError> {
    let res_str = "fitres";
    let record = parameters_record(recordset, &format!("{res_str}.parameters"))?;
    let parameters = parametersrecord_to_parameters(record, keep_input);
    let metrics = configsrecord_to_scalar_map(configs_record(recordset, &format!("{res_str}.metrics"))?)?;
    Ok(FitRes {
        status: extract_status(res_str, recordset)?,
        parameters,
        num_examples: extract_num_examples(res_str, recordset)?,
        metrics,
    })
}

pub fn evaluateres_to_recordset(evaluateres: &EvaluateRes) -> Result<RecordSet, CompatError> {
    let res_str = "evaluateres";
    let mut recordset = RecordSet::new()
        .with_metrics(
            format!("{res_str}.loss"),
            MetricsRecord::new().with("loss", evaluateres.loss)?,
        )
        .with_metrics(
            format!("{res_str}.num_examples"),
            num_examples_record(evaluateres.num_examples)?,
        )
        .with_configs(
            format!("{res_str}.metrics"),
            scalar_map_to_configsrecord(&evaluateres.metrics)?,
        );
    embed_status(res_str, &evaluateres.status, &mut recordset)?;
    Ok(recordset)
}

pub fn recordset_to_evaluateres(recordset: &RecordSet) -> Result<EvaluateRes, CompatError> {
    let res_str = "evaluateres";
    let loss_name = format!("{res_str}.loss");
    let loss = match metrics_record(recordset, &loss_name)?.get("loss") {
        Some(value) => value.as_float().ok_or_else(|| CompatError::UnexpectedValue {
            record: loss_name.clone(),
            key: "loss".to_string(),
            found: value.kind(),
        })?,
        None => {
            return Err(CompatError::MissingEntry {
                record: loss_name,
                key: "loss".to_string(),
            });
        }
    };
    Ok(EvaluateRes {
        status: extract_status(res_str, recordset)?,
        loss,
        num_examples: extract_num_examples(res_str, recordset)?,
        metrics: configsrecord_to_scalar_map(configs_record(recordset, &format!("{res_str}.metrics"))?)?,
    })
}

pub fn getparametersres_to_recordset(
    res: &mut GetParametersRes,
    keep_input: bool,
) -> Result<RecordSet, CompatError> {
    let res_str = "getparametersres";
    let mut recordset = RecordSet::new().with_parameters(
        format!("{res_str}.parameters"),
        parameters_to_parametersrecord(&mut res.parameters, keep_input),
    );
    embed_status(res_str, &res.status, &mut recordset)?;
    Ok(recordset)
}

pub fn recordset_to_getparametersres(
    recordset: &mut RecordSet,
    keep_input: bool,
) -> Result<GetParametersRes, CompatError> {
    let res_str = "getparametersres";
    let record = parameters_record(recordset, &format!("{res_str}.parameters"))?;
    let parameters = parametersrecord_to_parameters(record, keep_input);
    Ok(GetParametersRes {
        status: extract_status(res_str, recordset)?,
        parameters,
    })
}

pub fn getpropertiesres_to_recordset(res: &GetPropertiesRes) -> Result<RecordSet, CompatError> {
    let res_str = "getpropertiesres";
    let mut recordset = RecordSet::new().with_configs(
        format!("{res_str}.properties"),
        scalar_map_to_configsrecord(&res.properties)?,
    );
    embed_status(res_str, &res.status, &mut recordset)?;
    Ok(recordset)
}

pub fn recordset_to_getpropertiesres(recordset: &RecordSet) -> Result<GetPropertiesRes, CompatError> {
    let res_str = "getpropertiesres";
    let properties =
        configsrecord_to_scalar_map(configs_record(recordset, &format!("{res_str}.properties"))?)?;
    Ok(GetPropertiesRes {
        status: extract_status(res_str, recordset)?,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensors(n: usize) -> Parameters {
        Parameters::new(
            (0..n).map(|i| vec![i as u8; i + 1]).collect(),
            "numpy.ndarray",
        )
    }

    fn config(pairs: &[(&str, Scalar)]) -> HashMap<String, Scalar> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn parameters_round_trip_keeping_input() {
        for n in [0, 1, 5] {
            let original = tensors(n);
            let mut source = original.clone();
            let mut record = parameters_to_parametersrecord(&mut source, true);
            assert_eq!(source, original, "source untouched for n={n}");

            let restored = parametersrecord_to_parameters(&mut record, true);
            assert_eq!(restored, original, "round trip for n={n}");
        }
    }

    #[test]
    fn empty_parameters_use_placeholder() {
        let mut empty = Parameters::new(Vec::new(), "numpy.ndarray");
        let mut record = parameters_to_parametersrecord(&mut empty, true);
        assert_eq!(record.keys().collect::<Vec<_>>(), vec![EMPTY_TENSOR_KEY]);

        let restored = parametersrecord_to_parameters(&mut record, false);
        assert!(restored.tensors.is_empty());
        assert_eq!(restored.tensor_type, "numpy.ndarray");
        assert!(record.is_empty());
    }

    #[test]
    fn moving_conversion_consumes_source() {
        let mut source = tensors(3);
        let mut record = parameters_to_parametersrecord(&mut source, false);
        assert!(source.tensors.is_empty());
        assert_eq!(record.keys().collect::<Vec<_>>(), vec!["0", "1", "2"]);

        let restored = parametersrecord_to_parameters(&mut record, false);
        assert_eq!(restored, tensors(3));
        assert!(record.is_empty());
    }

    #[test]
    fn shared_tensor_type_comes_from_first_array() {
        let mut record = ParametersRecord::new();
        record.insert("a", Array::new("", Vec::new(), "first", vec![1]));
        record.insert("b", Array::new("", Vec::new(), "second", vec![2]));
        let parameters = parametersrecord_to_parameters(&mut record, true);
        assert_eq!(parameters.tensor_type, "first");
        assert_eq!(parameters.tensors, vec![vec![1], vec![2]]);
    }

    #[test]
    fn fitins_round_trip() {
        let original = FitIns {
            parameters: tensors(2),
            config: config(&[("lr", Scalar::Float(0.1)), ("epochs", Scalar::Int(3))]),
        };
        let mut ins = original.clone();
        let mut recordset = fitins_to_recordset(&mut ins, true).unwrap();
        assert!(recordset.parameters_records.contains_key("fitins.parameters"));
        assert!(recordset.configs_records.contains_key("fitins.config"));

        let restored = recordset_to_fitins(&mut recordset, true).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn fitres_round_trip_with_status() {
        let original = FitRes {
            status: Status::ok(),
            parameters: tensors(1),
            num_examples: 128,
            metrics: config(&[("acc", Scalar::Float(0.9)), ("tag", Scalar::from("x"))]),
        };
        let mut res = original.clone();
        let mut recordset = fitres_to_recordset(&mut res, false).unwrap();
        assert!(res.parameters.tensors.is_empty());

        let status = &recordset.configs_records["fitres.status"];
        assert_eq!(status.get("code"), Some(&Value::Int(0)));
        assert_eq!(status.get("message"), Some(&Value::Str("Success".into())));

        let restored = recordset_to_fitres(&mut recordset, false).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn evaluateres_round_trip() {
        let original = EvaluateRes {
            status: Status::new(Code::EvaluateNotImplemented, "nope"),
            loss: 0.5,
            num_examples: 10,
            metrics: HashMap::new(),
        };
        let recordset = evaluateres_to_recordset(&original).unwrap();
        assert_eq!(
            recordset.metrics_records["evaluateres.loss"].get("loss"),
            Some(&Value::Float(0.5))
        );
        assert_eq!(recordset_to_evaluateres(&recordset).unwrap(), original);
    }

    #[test]
    fn properties_and_parameters_requests_round_trip() {
        let props = GetPropertiesIns {
            config: config(&[("want", Scalar::Bool(true))]),
        };
        let recordset = getpropertiesins_to_recordset(&props).unwrap();
        assert_eq!(recordset_to_getpropertiesins(&recordset).unwrap(), props);

        let params = GetParametersIns::default();
        let recordset = getparametersins_to_recordset(&params).unwrap();
        assert_eq!(recordset_to_getparametersins(&recordset).unwrap(), params);

        let res = GetPropertiesRes {
            status: Status::ok(),
            properties: config(&[("cores", Scalar::Int(8))]),
        };
        let recordset = getpropertiesres_to_recordset(&res).unwrap();
        assert_eq!(recordset_to_getpropertiesres(&recordset).unwrap(), res);

        let mut res = GetParametersRes {
            status: Status::ok(),
            parameters: tensors(0),
        };
        let expected = res.clone();
        let mut recordset = getparametersres_to_recordset(&mut res, true).unwrap();
        assert_eq!(
            recordset_to_getparametersres(&mut recordset, true).unwrap(),
            expected
        );
    }

    #[test]
    fn list_value_fails_scalar_conversion() {
        let mut recordset = RecordSet::new().with_configs(
            "getpropertiesins.config",
            ConfigsRecord::new().with("sizes", vec![1_i64, 2, 3]).unwrap(),
        );
        let err = recordset_to_getpropertiesins(&recordset).unwrap_err();
        assert!(matches!(
            err,
            CompatError::Record(RecordError::NotAScalar {
                found: ValueKind::List,
                ..
            })
        ));

        recordset.configs_records.clear();
        let err = recordset_to_getpropertiesins(&recordset).unwrap_err();
        assert!(matches!(err, CompatError::MissingRecord { kind: "configs", .. }));
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let mut recordset = getpropertiesres_to_recordset(&GetPropertiesRes::default()).unwrap();
        recordset
            .configs_records
            .get_mut("getpropertiesres.status")
            .unwrap()
            .set("code", 99_i64)
            .unwrap();
        assert_eq!(
            recordset_to_getpropertiesres(&recordset).unwrap_err(),
            CompatError::UnknownStatusCode(99)
        );
    }
}
