//! Built-in stored procedures, resolved by name into the process-local
//! procedure table (design notes §9).
//!
//! Grounded on `original_source/procs/stats.py` (`stats`) and
//! `original_source/procs/corr.py` (`corr`); both are `proc_main(pk, row,
//! arg)` functions in the original, wrapped here in `async fn main` shims
//! that simply await the synchronous computation, matching `corr.py`'s own
//! `async def main` delegating to `proc_main`.

use async_trait::async_trait;
use serde::Deserialize;

use super::{Procedure, Row};
use crate::error::TriggerError;
use crate::similarity::distance;
use crate::types::{TimeSeries, Value};

/// Mean and standard deviation of a row's time series.
pub struct Stats;

#[async_trait]
impl Procedure for Stats {
    async fn call(&self, _pk: &str, row: Row<'_>, _arg: &serde_json::Value) -> Result<Vec<Value>, TriggerError> {
        Ok(vec![Value::Float(row.ts.mean()), Value::Float(row.ts.std())])
    }
}

/// Kernelized cross-correlation distance between a row's series and the
/// query series carried in `arg`. Used both as an `insert_ts` trigger (by
/// the VP subsystem) and directly via augmented-select.
pub struct Corr;

#[derive(Deserialize)]
struct CorrArg {
    timestamps: Vec<f64>,
    values: Vec<f64>,
}

#[async_trait]
impl Procedure for Corr {
    async fn call(&self, _pk: &str, row: Row<'_>, arg: &serde_json::Value) -> Result<Vec<Value>, TriggerError> {
        let decoded: CorrArg = serde_json::from_value(arg.clone())
            .map_err(|_| TriggerError::ProcedureFailed {
                proc: "corr".to_string(),
                reason: "argument is not a time series".to_string(),
            })?;
        let query = TimeSeries::new(decoded.timestamps, decoded.values);
        let d = distance::distance(row.ts, &query);
        Ok(vec![Value::Float(d)])
    }
}
