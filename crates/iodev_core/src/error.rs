//!A mod for the error types
use std::error::Error;
use thiserror::Error;

///Boxed error returned by driver read functions.
pub type DynError = Box<dyn Error + Send + Sync + 'static>;

///Errors returned from `run` and from device construction.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("poll interval must be > 0")]
    PollInterval,

    #[error("poll read function is missing")]
    PollReadMissing,

    #[error("invalid configuration: {0}")]
    Config(String),

    ///`run` was called a second time, or a stream this device needs was already taken.
    #[error("{0} already taken; a device may only be run once")]
    AlreadyRunning(&'static str),

    #[error("upstream failed: {0}")]
    Upstream(#[source] DynError),
}

impl DeviceError {
    pub fn config(msg: impl Into<String>) -> Self {
        DeviceError::Config(msg.into())
    }
}

///Why `Base::emit_with_context` gave up without delivering.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

///Common error type when building devices from configuration.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("BuildError: {0}")]
    Message(String),

    #[error("BuildError (multiple): \n{}", .0.join("\n"))]
    Messages(Vec<String>),
}

impl BuildError {
    pub fn message(msg: &str) -> Self {
        BuildError::Message(msg.to_string())
    }

    pub fn from_errs(errs: Vec<BuildError>) -> Self {
        let mut messages = Vec::with_capacity(errs.len());
        for err in errs {
            match err {
                Self::Message(msg) => messages.push(msg),
                Self::Messages(mut msgs) => messages.append(&mut msgs),
            }
        }
        Self::Messages(messages)
    }
}

impl From<DeviceError> for BuildError {
    fn from(err: DeviceError) -> Self {
        BuildError::Message(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_errors_flatten() {
        let err = BuildError::from_errs(vec![
            BuildError::message("a"),
            BuildError::Messages(vec!["b".to_string(), "c".to_string()]),
            DeviceError::PollInterval.into(),
        ]);
        match err {
            BuildError::Messages(msgs) => {
                assert_eq!(msgs, vec!["a", "b", "c", "poll interval must be > 0"])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn upstream_keeps_source() {
        let inner: DynError = "i2c nack".into();
        let err = DeviceError::Upstream(inner);
        assert_eq!(err.to_string(), "upstream failed: i2c nack");
        assert!(err.source().is_some());
    }
}
