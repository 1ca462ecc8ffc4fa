pub mod codec;

pub use codec::{DecodeError, MAX_FRAME_LEN, decode, encode, parse_device_id};

/// Category of command a device id is expected to honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Switch,
    Slider,
    RgbPicker,
    ButtonGroup,
    NumericInput,
    TextDisplay,
    Dropdown,
    Schedule,
    Unknown,
}

const CONTROL_TAGS: [(&str, ControlType); 8] = [
    ("SWITCH", ControlType::Switch),
    ("SLIDER", ControlType::Slider),
    ("RGB_PICKER", ControlType::RgbPicker),
    ("BUTTON_GROUP", ControlType::ButtonGroup),
    ("NUMERIC_INPUT", ControlType::NumericInput),
    ("TEXT_DISPLAY", ControlType::TextDisplay),
    ("DROPDOWN", ControlType::Dropdown),
    ("SCHEDULE", ControlType::Schedule),
];

impl ControlType {
    /// Resolve a wire tag. Matching is exact and case-sensitive; anything
    /// unrecognised is `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        CONTROL_TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, ct)| *ct)
            .unwrap_or(ControlType::Unknown)
    }

    /// Wire tag for this control type, `None` for `Unknown`.
    pub fn tag(self) -> Option<&'static str> {
        CONTROL_TAGS
            .iter()
            .find(|(_, ct)| *ct == self)
            .map(|(t, _)| *t)
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// The controller accepted our auth token.
    Handshake,
    /// A device command.
    DataSend(DataSend),
}

/// Body of a `datasend:<id>:<tag>:<value>` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSend {
    pub device_id: i32,
    pub control_type: ControlType,
    /// Taken verbatim from the frame, not trimmed.
    pub value: String,
    /// Set when the id field held no digits and was defaulted to 0.
    pub id_defaulted: bool,
}

/// A frame the device sends to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Status { device_id: i32, value: String },
    Bind { device_id: i32, value: String },
    SensorData { temperature: i32, humidity: i32 },
    /// Sent unframed during the handshake.
    AuthToken { token: String },
}

impl OutboundMessage {
    pub fn status(device_id: i32, value: impl Into<String>) -> Self {
        Self::Status {
            device_id,
            value: value.into(),
        }
    }

    pub fn bind(device_id: i32, value: impl Into<String>) -> Self {
        Self::Bind {
            device_id,
            value: value.into(),
        }
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Bind { .. } => "bind",
            Self::SensorData { .. } => "sensor_data",
            Self::AuthToken { .. } => "auth_token",
        }
    }
}
