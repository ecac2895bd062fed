//! Named handles to the latest value of every running pipeline.
//!
//! Entries are a closed set of variants, one per value type, so lookups say up front
//! which type they expect and a mismatch is an ordinary error.

use std::{collections::HashMap, sync::Arc, sync::RwLock};

use iodev_core::{sensor::BoxSensor, slot};
use iodev_stream::LastValue;
use thiserror::Error;

pub type Last<T> = Arc<LastValue<T, BoxSensor<T>>>;

#[derive(Clone)]
pub enum Entry {
    Float(Last<f64>),
    Bool(Last<bool>),
}

impl Entry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Entry::Float(_) => "float",
            Entry::Bool(_) => "bool",
        }
    }

    ///The latest value rendered for display, `None` before the first sample.
    pub fn status(&self) -> Option<String> {
        match self {
            Entry::Float(last) => last.last().map(|v| format!("{v:.3}")),
            Entry::Bool(last) => last.last().map(|v| v.to_string()),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device {0} is already registered")]
    Exists(String),

    #[error("device {0} not found")]
    NotFound(String),

    #[error("device {name} holds {actual} values, not {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, entry: Entry) -> Result<(), RegistryError> {
        let mut entries = slot::write(&self.entries);
        if entries.contains_key(name) {
            return Err(RegistryError::Exists(name.to_string()));
        }
        entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Entry, RegistryError> {
        slot::read(&self.entries)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn float(&self, name: &str) -> Result<Last<f64>, RegistryError> {
        match self.get(name)? {
            Entry::Float(last) => Ok(last),
            other => Err(mismatch(name, "float", &other)),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<Last<bool>, RegistryError> {
        match self.get(name)? {
            Entry::Bool(last) => Ok(last),
            other => Err(mismatch(name, "bool", &other)),
        }
    }

    pub fn status(&self, name: &str) -> Result<Option<String>, RegistryError> {
        Ok(self.get(name)?.status())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = slot::read(&self.entries).keys().cloned().collect();
        names.sort();
        names
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &Entry) -> RegistryError {
    RegistryError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iodev_core::sensor::{ChannelSensor, Sensor};
    use tokio_util::sync::CancellationToken;

    fn float_entry() -> (Last<f64>, tokio::sync::mpsc::Sender<f64>) {
        let (src, tx) = ChannelSensor::new(4);
        let boxed: BoxSensor<f64> = Box::new(src);
        (Arc::new(LastValue::new(boxed)), tx)
    }

    #[test]
    fn lookups_are_typed() {
        let registry = Registry::new();
        let (last, _tx) = float_entry();
        registry.insert("temp", Entry::Float(last.clone())).unwrap();

        assert!(registry.float("temp").is_ok());
        assert_eq!(
            registry.boolean("temp").err(),
            Some(RegistryError::TypeMismatch {
                name: "temp".to_string(),
                expected: "bool",
                actual: "float",
            })
        );
        assert_eq!(
            registry.insert("temp", Entry::Float(last)).err(),
            Some(RegistryError::Exists("temp".to_string()))
        );
        assert_eq!(
            registry.status("pump").err(),
            Some(RegistryError::NotFound("pump".to_string()))
        );
        assert_eq!(registry.names(), vec!["temp"]);
    }

    #[tokio::test]
    async fn status_follows_the_stream() {
        let registry = Registry::new();
        let (last, tx) = float_entry();
        registry.insert("temp", Entry::Float(last.clone())).unwrap();
        assert_eq!(registry.status("temp"), Ok(None));

        let mut out = last.read().unwrap();
        let handle = {
            let last = last.clone();
            tokio::spawn(async move { last.run(CancellationToken::new()).await })
        };
        tx.send(21.5).await.unwrap();
        assert_eq!(out.recv().await, Some(21.5));
        assert_eq!(registry.status("temp"), Ok(Some("21.500".to_string())));

        drop(tx);
        handle.await.unwrap().unwrap();
    }
}
