//!Simulated devices for running and testing pipelines without hardware.

pub mod contract;
pub mod jitter;
pub mod mock_sensor;
pub mod scripted;
pub mod switch;

pub use contract::{check_source, ContractError, ContractReport};
pub use jitter::{ramp, Jitter};
pub use mock_sensor::{MockSensor, MockSensorConfig};
pub use scripted::{ScriptedSensor, ScriptedSensorConfig};
pub use switch::{Switch, SwitchConfig};
