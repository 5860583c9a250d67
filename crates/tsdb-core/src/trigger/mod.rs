//! Trigger / stored-procedure subsystem (spec 4.6).
//!
//! Grounded on `original_source/tsdb/persistent_db.py`'s trigger
//! bookkeeping (a registry keyed by event name, storing procedure name +
//! argument + target-field list) and on design notes §9: "the persistent
//! registry stores only procedure names; a process-local table maps names
//! to callables at startup." The registry itself reuses the same
//! [`crate::persist::Durable`] harness every index uses.

pub mod procs;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, TriggerError};
use crate::persist::Durable;
use crate::types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Event {
    InsertTs,
    UpsertMeta,
    Select,
}

impl Event {
    pub fn parse(name: &str) -> Result<Self, TriggerError> {
        match name {
            "insert_ts" => Ok(Event::InsertTs),
            "upsert_meta" => Ok(Event::UpsertMeta),
            "select" => Ok(Event::Select),
            other => Err(TriggerError::UnknownEvent(other.to_string())),
        }
    }
}

/// A single registered (procedure, argument, target fields) tuple for one
/// event, per spec 3's trigger registry entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registration {
    pub proc: String,
    pub arg: serde_json::Value,
    pub target: Vec<String>,
}

/// The row a procedure receives: the pk, its full metadata plus `ts`.
pub struct Row<'a> {
    pub pk: &'a str,
    pub ts: &'a crate::types::TimeSeries,
    pub meta: &'a std::collections::HashMap<String, Value>,
}

/// A stored procedure: `(pk, row, arg) -> list<value>`, per design notes §9.
/// Implementations may be asynchronous; the engine awaits completion inline
/// (spec 5: "awaiting trigger procedure completion" is the only suspension
/// point besides socket I/O).
#[async_trait]
pub trait Procedure: Send + Sync {
    async fn call(&self, pk: &str, row: Row<'_>, arg: &serde_json::Value) -> Result<Vec<Value>, TriggerError>;
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct RegistryState {
    events: BTreeMap<Event, Vec<Registration>>,
}

/// Persistent event -> registrations mapping, plus the process-local
/// procedure-name -> callable table (not persisted; rebuilt at startup from
/// the fixed set of built-ins, per design notes §9).
pub struct TriggerRegistry {
    durable: Durable<RegistryState>,
    procedures: BTreeMap<String, Arc<dyn Procedure>>,
}

impl TriggerRegistry {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, IndexError> {
        let mut procedures: BTreeMap<String, Arc<dyn Procedure>> = BTreeMap::new();
        procedures.insert("stats".to_string(), Arc::new(procs::Stats));
        procedures.insert("corr".to_string(), Arc::new(procs::Corr));
        Ok(Self {
            durable: Durable::open(dir, "triggers")?,
            procedures,
        })
    }

    pub fn register_procedure(&mut self, name: impl Into<String>, proc: Arc<dyn Procedure>) {
        self.procedures.insert(name.into(), proc);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Procedure>, TriggerError> {
        self.procedures.get(name).cloned().ok_or_else(|| TriggerError::UnknownProcedure(name.to_string()))
    }

    pub fn add_trigger(&mut self, event: Event, reg: Registration) -> Result<(), IndexError> {
        self.durable.mutate(|s| s.events.entry(event).or_default().push(reg))
    }

    /// Removes every registration for `proc` under `event`, optionally
    /// restricted to those whose target list exactly matches `target`.
    pub fn remove_trigger(&mut self, event: Event, proc: &str, target: Option<&[String]>) -> Result<(), IndexError> {
        self.durable.mutate(|s| {
            if let Some(regs) = s.events.get_mut(&event) {
                regs.retain(|r| !(r.proc == proc && target.map(|t| t == r.target.as_slice()).unwrap_or(true)));
            }
        })
    }

    pub fn registrations(&self, event: Event) -> Vec<Registration> {
        self.durable.state().events.get(&event).cloned().unwrap_or_default()
    }

    pub fn commit(&mut self) -> Result<(), IndexError> {
        self.durable.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_resolve_remove_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut registry = TriggerRegistry::open(dir.path()).unwrap();
        registry
            .add_trigger(
                Event::InsertTs,
                Registration {
                    proc: "stats".to_string(),
                    arg: serde_json::Value::Null,
                    target: vec!["mean".to_string(), "std".to_string()],
                },
            )
            .unwrap();
        assert_eq!(registry.registrations(Event::InsertTs).len(), 1);
        assert!(registry.resolve("stats").is_ok());
        assert!(matches!(registry.resolve("nope"), Err(TriggerError::UnknownProcedure(_))));

        registry.remove_trigger(Event::InsertTs, "stats", None).unwrap();
        assert!(registry.registrations(Event::InsertTs).is_empty());
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        assert!(matches!(Event::parse("bogus"), Err(TriggerError::UnknownEvent(_))));
    }
}
