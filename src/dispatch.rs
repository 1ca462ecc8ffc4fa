use tracing::info;

use crate::error::ActuationWarning;
use crate::protocol::{ControlType, DataSend, OutboundMessage};
use crate::registry::DeviceRegistry;

/// Result of applying one command.
#[derive(Debug)]
pub enum Outcome {
    /// The actuator was driven; `reply` reports the new state back.
    Actuated { reply: OutboundMessage },
    /// Nothing was driven and nothing should be sent.
    Ignored(ActuationWarning),
}

/// Apply a `datasend` command to the bound actuator.
///
/// Only switches are actionable. The controller's switch convention is
/// inverted: `"0"` energises the output and `"1"` releases it. The reply is a
/// `Bind` carrying the opposite literal, i.e. the state the output is now in.
pub fn dispatch(cmd: &DataSend, registry: &DeviceRegistry) -> Outcome {
    let Some(actuator) = registry.actuator(cmd.device_id) else {
        return Outcome::Ignored(ActuationWarning::UnknownDevice {
            device_id: cmd.device_id,
        });
    };

    if cmd.control_type != ControlType::Switch {
        return Outcome::Ignored(ActuationWarning::UnsupportedControl {
            device_id: cmd.device_id,
            control_type: cmd.control_type,
        });
    }

    let (on, ack) = match cmd.value.as_str() {
        "0" => (true, "1"),
        "1" => (false, "0"),
        other => {
            return Outcome::Ignored(ActuationWarning::InvalidSwitchValue {
                device_id: cmd.device_id,
                value: other.to_string(),
            });
        }
    };

    if let Err(source) = actuator.set_state(on) {
        return Outcome::Ignored(ActuationWarning::ActuatorFailed {
            device_id: cmd.device_id,
            source,
        });
    }

    info!(
        "Device {} switched {}",
        cmd.device_id,
        if on { "on" } else { "off" }
    );
    Outcome::Actuated {
        reply: OutboundMessage::bind(cmd.device_id, ack),
    }
}
