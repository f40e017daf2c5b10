//  ASSETS.rs
//
//  Created:
//    24 Feb 2025, 10:31:02
//  Last edited:
//    31 Jul 2025, 19:09:44
//
//  Description:
//!   Defines assets: the data sets and compute steps stored and exchanged
//!   by sites.
//!
//!   Every asset carries provenance metadata: the minimal job that produces
//!   it, which is what the store evaluates policies against. Primary assets
//!   get a zero-step nil job.
//

use std::collections::HashMap;
use std::path::PathBuf;

use enum_debug::EnumDebug;
use ident::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use workflow::Job;


/***** ERRORS *****/
/// Describes failures of built-in compute asset execution.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error("Asset '{id}' is not a known compute asset")]
    UnknownComputeAsset { id: Identifier },
    #[error("Compute asset '{id}' is missing input '{input}'")]
    MissingInput { id: Identifier, input: String },
    #[error("Input '{input}' of compute asset '{id}' has an unsupported value")]
    IllegalInput { id: Identifier, input: String },
}





/***** LIBRARY *****/
/// Whether an asset carries data or software.
#[derive(Clone, Copy, Debug, Deserialize, EnumDebug, Eq, PartialEq, Serialize)]
pub enum AssetKind {
    /// A data set.
    Data,
    /// A runnable compute step.
    Compute,
}

/// Provenance metadata attached to every stored asset.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AssetMetadata {
    /// A minimal job that produces this asset.
    pub job:  Job,
    /// The item in that job's workflow corresponding to this asset.
    pub item: String,
}

/// A data set or compute step, as stored at and exchanged between sites.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Asset {
    /// The asset's identifier (`asset:...` for primary assets,
    /// `result:...` for workflow results).
    pub id: Identifier,
    /// Whether this is data or software.
    pub kind: AssetKind,
    /// Structured data carried directly in the asset, if any.
    pub data: Option<Value>,
    /// Local path of the asset's container image, if it has one. Never
    /// leaves the owning site; peers fetch the image bytes instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_location: Option<PathBuf>,
    /// The asset's provenance.
    pub metadata: AssetMetadata,
}
impl Asset {
    /// Creates a new primary data asset carrying the given value.
    ///
    /// The provenance is a nil job, marking this asset as not being the
    /// product of any workflow.
    pub fn new_data(id: Identifier, data: Value) -> Self {
        let metadata: AssetMetadata = AssetMetadata { job: Job::niljob(id.clone()), item: "dataset".into() };
        Self { id, kind: AssetKind::Data, data: Some(data), image_location: None, metadata }
    }

    /// Creates a new compute asset without a container image; it will be
    /// executed through the built-in step library.
    pub fn new_compute(id: Identifier) -> Self {
        let metadata: AssetMetadata = AssetMetadata { job: Job::niljob(id.clone()), item: "dataset".into() };
        Self { id, kind: AssetKind::Compute, data: None, image_location: None, metadata }
    }

    /// Creates a data asset produced by a workflow step.
    ///
    /// # Arguments
    /// - `id`: The result's content-derived `result:...` identifier.
    /// - `data`: The produced value, if carried inline.
    /// - `image_location`: The produced image file, if any.
    /// - `job`: The step's subjob, as provenance.
    /// - `item`: The produced `step.output` item in that subjob.
    pub fn new_result(id: Identifier, data: Option<Value>, image_location: Option<PathBuf>, job: Job, item: impl Into<String>) -> Self {
        Self { id, kind: AssetKind::Data, data, image_location, metadata: AssetMetadata { job, item: item.into() } }
    }

    /// Runs this compute asset on the given inputs, in-process.
    ///
    /// This is the execution path for compute assets without a container
    /// image: a small library of built-in steps, selected by the final
    /// dot-separated component of the asset's name (e.g.
    /// `software.addition` runs `addition`).
    ///
    /// # Returns
    /// The computed outputs, by output parameter name.
    ///
    /// # Errors
    /// This function errors if the asset names no known built-in step or
    /// the inputs do not fit it.
    pub fn run(&self, inputs: &HashMap<String, Value>) -> Result<HashMap<String, Value>, ComputeError> {
        let step: &str = self.id.name().map(|name| name.rsplit('.').next().unwrap_or(name)).unwrap_or("");

        let mut outputs: HashMap<String, Value> = HashMap::new();
        match step {
            // y = [x1, x2]
            "combine" => {
                let x1: &Value = self.input(inputs, "x1")?;
                let x2: &Value = self.input(inputs, "x2")?;
                outputs.insert("y".into(), Value::Array(vec![x1.clone(), x2.clone()]));
            },

            // y = [x - 10 for x in x1]
            "anonymise" => {
                let xs: &Vec<Value> = match self.input(inputs, "x1")? {
                    Value::Array(xs) => xs,
                    _ => return Err(ComputeError::IllegalInput { id: self.id.clone(), input: "x1".into() }),
                };
                let ys: Vec<Value> = xs.iter().map(|x| self.number(x, "x1").map(|x| Value::from(x - 10.0))).collect::<Result<_, _>>()?;
                outputs.insert("y".into(), Value::Array(ys));
            },

            // y = sum(x1) / len(x1)
            "aggregate" => {
                let xs: &Vec<Value> = match self.input(inputs, "x1")? {
                    Value::Array(xs) => xs,
                    _ => return Err(ComputeError::IllegalInput { id: self.id.clone(), input: "x1".into() }),
                };
                let sum: f64 = xs.iter().map(|x| self.number(x, "x1")).sum::<Result<f64, _>>()?;
                outputs.insert("y".into(), Value::from(sum / xs.len() as f64));
            },

            // y = x1 + x2
            "addition" => {
                let x1: &Value = self.input(inputs, "x1")?;
                let x2: &Value = self.input(inputs, "x2")?;
                let y: Value = match (x1.as_i64(), x2.as_i64()) {
                    (Some(x1), Some(x2)) => Value::from(x1 + x2),
                    _ => Value::from(self.number(x1, "x1")? + self.number(x2, "x2")?),
                };
                outputs.insert("y".into(), y);
            },

            _ => return Err(ComputeError::UnknownComputeAsset { id: self.id.clone() }),
        }
        Ok(outputs)
    }

    /// Fetches a required input value.
    fn input<'i>(&self, inputs: &'i HashMap<String, Value>, name: &str) -> Result<&'i Value, ComputeError> {
        inputs.get(name).ok_or_else(|| ComputeError::MissingInput { id: self.id.clone(), input: name.into() })
    }

    /// Interprets a value as a number.
    fn number(&self, value: &Value, input: &str) -> Result<f64, ComputeError> {
        value.as_f64().ok_or_else(|| ComputeError::IllegalInput { id: self.id.clone(), input: input.into() })
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn compute(name: &str) -> Asset { Asset::new_compute(Identifier::new(format!("asset:ns3:software.{name}:ns3:site3")).unwrap()) }

    fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> { pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect() }

    #[test]
    fn builtin_steps() {
        let out = compute("combine").run(&inputs(&[("x1", json!(42)), ("x2", json!(3))])).unwrap();
        assert_eq!(out["y"], json!([42, 3]));

        let out = compute("anonymise").run(&inputs(&[("x1", json!([42, 3]))])).unwrap();
        assert_eq!(out["y"], json!([32.0, -7.0]));

        let out = compute("aggregate").run(&inputs(&[("x1", json!([32.0, -7.0]))])).unwrap();
        assert_eq!(out["y"], json!(12.5));

        let out = compute("addition").run(&inputs(&[("x1", json!(42)), ("x2", json!(3))])).unwrap();
        assert_eq!(out["y"], json!(45));
    }

    #[test]
    fn builtin_step_errors() {
        assert!(matches!(compute("frobnicate").run(&inputs(&[])), Err(ComputeError::UnknownComputeAsset { .. })));
        assert!(matches!(compute("addition").run(&inputs(&[("x1", json!(42))])), Err(ComputeError::MissingInput { .. })));
        assert!(matches!(compute("anonymise").run(&inputs(&[("x1", json!("nope"))])), Err(ComputeError::IllegalInput { .. })));
    }

    #[test]
    fn primary_assets_have_nil_provenance() {
        let asset: Asset = Asset::new_data(Identifier::new("asset:ns1:data1:ns1:site1").unwrap(), json!(42));
        assert_eq!(asset.metadata.item, "dataset");
        assert!(asset.metadata.job.workflow.steps.is_empty());
        assert_eq!(asset.metadata.job.inputs["dataset"], asset.id);
    }
}
