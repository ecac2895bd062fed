//! Diagnostic events published by devices on their `events()` stream.

use std::{
    collections::HashMap,
    error::Error,
    fmt,
    str::FromStr,
    sync::Arc,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

///Optional key/value context attached to an event.
pub type Meta = HashMap<String, String>;

///Error attached to an `Error` event. Shared so events stay `Clone`.
pub type EventError = Arc<dyn Error + Send + Sync + 'static>;

///The type of a device event. Set once, when the event is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    ///The device started running.
    Open,
    ///The device stopped running. Always the last event a device emits.
    Close,
    ///A device error; `Event::err` carries the cause.
    Error,
    ///A change of device state (buttons, switches, gpio lines).
    Edge,
    ///Informational message, e.g. one per published sample.
    Info,
    Read,
    Write,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Open => "open",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::Edge => "edge",
            EventKind::Info => "info",
            EventKind::Read => "read",
            EventKind::Write => "write",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown event kind {0:?}")]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(EventKind::Open),
            "close" => Ok(EventKind::Close),
            "error" => Ok(EventKind::Error),
            "edge" => Ok(EventKind::Edge),
            "info" => Ok(EventKind::Info),
            "read" => Ok(EventKind::Read),
            "write" => Ok(EventKind::Write),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

///A device notification. Immutable once constructed.
///
/// `device`, `kind` and `time` are always set. `msg`, `err` and `meta` are optional
/// context; an empty message or a missing meta map are both valid.
#[derive(Debug, Clone)]
pub struct Event {
    pub device: String,
    pub kind: EventKind,
    pub time: SystemTime,
    pub msg: String,
    pub err: Option<EventError>,
    pub meta: Option<Meta>,
}

impl Event {
    pub fn new(device: &str, kind: EventKind, msg: &str) -> Self {
        Event {
            device: device.to_string(),
            kind,
            time: SystemTime::now(),
            msg: msg.to_string(),
            err: None,
            meta: None,
        }
    }

    pub fn with_err(mut self, err: Option<EventError>) -> Self {
        self.err = err;
        self
    }

    pub fn with_meta(mut self, meta: Option<Meta>) -> Self {
        self.meta = meta;
        self
    }

    ///Looks up a metadata value.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.get(key))
            .map(String::as_str)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.device, self.kind)?;
        if !self.msg.is_empty() {
            write!(f, ": {}", self.msg)?;
        }
        if let Some(err) = &self.err {
            write!(f, " ({err})")?;
        }
        if let Some(meta) = &self.meta {
            let mut pairs: Vec<_> = meta.iter().collect();
            pairs.sort();
            for (key, value) in pairs {
                write!(f, " {key}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            EventKind::Open,
            EventKind::Close,
            EventKind::Error,
            EventKind::Edge,
            EventKind::Info,
            EventKind::Read,
            EventKind::Write,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("blink".parse::<EventKind>().is_err());
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&EventKind::Edge).unwrap();
        assert_eq!(json, "\"edge\"");
    }

    #[test]
    fn display_includes_context() {
        let err: EventError = Arc::new(UnknownEventKind("x".into()));
        let ev = Event::new("relay", EventKind::Error, "write failed")
            .with_err(Some(err))
            .with_meta(Some(Meta::from([("pin".to_string(), "17".to_string())])));
        assert_eq!(
            ev.to_string(),
            "[relay] error: write failed (unknown event kind \"x\") pin=17"
        );
        assert_eq!(ev.meta_value("pin"), Some("17"));
        assert_eq!(ev.meta_value("bus"), None);
    }
}
