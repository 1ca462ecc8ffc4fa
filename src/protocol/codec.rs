//! Colon-delimited text framing used between the device and the controller.
//!
//! # Inbound
//!
//! - `Successfully connected`: the controller accepted the auth token.
//! - `datasend:<device_id>:<CONTROL_TYPE>:<value>`: a device command.
//!
//! # Outbound
//!
//! - `status:<device_id>:<value>`
//! - `bind:<device_id>:<value>`
//! - `sensor_data:<temperature>:<humidity>`
//! - the raw auth token, unframed
//!
//! Each frame is decoded on its own; nothing carries over between frames.

use thiserror::Error;

use super::{ControlType, DataSend, Message, OutboundMessage};

/// Upper bound on an encoded framed message, in bytes.
///
/// The whole 64 bytes carry payload. A C-string buffer of the same size
/// would hold 63 plus the terminator; frames here have no terminator, so
/// the extra byte stays within the 64-byte limit the controller accepts.
pub const MAX_FRAME_LEN: usize = 64;

/// Literal the controller sends once the auth token is accepted.
pub const HANDSHAKE_LITERAL: &[u8] = b"Successfully connected";

const DATASEND_PREFIX: &[u8] = b"datasend:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A `datasend` frame with fewer than three fields after the prefix.
    #[error("datasend frame has {fields} of 3 required fields")]
    Malformed { fields: usize },

    /// Neither the handshake literal nor a `datasend` frame.
    #[error("unrecognised frame format")]
    UnknownFormat,
}

/// Decode one inbound frame.
pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
    if frame == HANDSHAKE_LITERAL {
        return Ok(Message::Handshake);
    }

    let Some(body) = frame.strip_prefix(DATASEND_PREFIX) else {
        return Err(DecodeError::UnknownFormat);
    };
    let body = String::from_utf8_lossy(body);

    // Runs of ':' count as one separator; fields past the third are ignored.
    let fields: Vec<&str> = body.split(':').filter(|f| !f.is_empty()).take(3).collect();
    let [id, tag, value] = fields.as_slice() else {
        return Err(DecodeError::Malformed {
            fields: fields.len(),
        });
    };

    let (device_id, id_defaulted) = parse_device_id(id);
    Ok(Message::DataSend(DataSend {
        device_id,
        control_type: ControlType::from_tag(tag),
        value: (*value).to_string(),
        id_defaulted,
    }))
}

/// Permissive device-id parsing.
///
/// Skips leading whitespace, accepts one sign, then reads decimal digits up to
/// the first non-digit. A field with no digits at all yields `(0, true)`;
/// the flag is how callers tell "id 0" from "no id". Values beyond the `i32`
/// range saturate.
pub fn parse_device_id(field: &str) -> (i32, bool) {
    let s = field.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return (0, true);
    }

    let magnitude = rest[..len].bytes().fold(0i64, |acc, d| {
        acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
    });
    let value = if negative { -magnitude } else { magnitude };
    let clamped = value.clamp(i64::from(i32::MIN), i64::from(i32::MAX));
    (i32::try_from(clamped).unwrap_or_default(), false)
}

/// Encode an outbound message. Framed messages are cut to [`MAX_FRAME_LEN`];
/// the auth token is passed through as-is.
pub fn encode(message: &OutboundMessage) -> Vec<u8> {
    let text = match message {
        OutboundMessage::Status { device_id, value } => format!("status:{device_id}:{value}"),
        OutboundMessage::Bind { device_id, value } => format!("bind:{device_id}:{value}"),
        OutboundMessage::SensorData {
            temperature,
            humidity,
        } => format!("sensor_data:{temperature}:{humidity}"),
        OutboundMessage::AuthToken { token } => return token.as_bytes().to_vec(),
    };
    truncate_frame(text).into_bytes()
}

fn truncate_frame(mut text: String) -> String {
    if text.len() > MAX_FRAME_LEN {
        let mut end = MAX_FRAME_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datasend(frame: &str) -> DataSend {
        match decode(frame.as_bytes()) {
            Ok(Message::DataSend(cmd)) => cmd,
            other => panic!("expected datasend for {frame:?}, got {other:?}"),
        }
    }

    #[test]
    fn handshake_requires_exact_literal() {
        assert_eq!(decode(b"Successfully connected"), Ok(Message::Handshake));
        assert_eq!(
            decode(b"successfully connected"),
            Err(DecodeError::UnknownFormat)
        );
        assert_eq!(
            decode(b"Successfully connected\n"),
            Err(DecodeError::UnknownFormat)
        );
        assert_eq!(decode(b"Successfully"), Err(DecodeError::UnknownFormat));
        assert_eq!(decode(b""), Err(DecodeError::UnknownFormat));
    }

    #[test]
    fn decodes_switch_command() {
        let cmd = datasend("datasend:102:SWITCH:0");
        assert_eq!(cmd.device_id, 102);
        assert_eq!(cmd.control_type, ControlType::Switch);
        assert_eq!(cmd.value, "0");
        assert!(!cmd.id_defaulted);
    }

    #[test]
    fn missing_value_is_malformed() {
        assert_eq!(
            decode(b"datasend:102:SWITCH"),
            Err(DecodeError::Malformed { fields: 2 })
        );
        assert_eq!(
            decode(b"datasend:"),
            Err(DecodeError::Malformed { fields: 0 })
        );
        assert_eq!(
            decode(b"datasend:102::SWITCH:"),
            Err(DecodeError::Malformed { fields: 2 })
        );
    }

    #[test]
    fn prefix_must_be_exact() {
        assert_eq!(
            decode(b"DATASEND:102:SWITCH:0"),
            Err(DecodeError::UnknownFormat)
        );
        assert_eq!(
            decode(b"datasend102:SWITCH:0"),
            Err(DecodeError::UnknownFormat)
        );
    }

    #[test]
    fn empty_fields_are_skipped() {
        let cmd = datasend("datasend:102::SWITCH:1");
        assert_eq!(cmd.device_id, 102);
        assert_eq!(cmd.control_type, ControlType::Switch);
        assert_eq!(cmd.value, "1");
    }

    #[test]
    fn fields_past_the_third_are_ignored() {
        let cmd = datasend("datasend:7:SLIDER:40:extra");
        assert_eq!(cmd.value, "40");
    }

    #[test]
    fn value_is_not_trimmed() {
        let cmd = datasend("datasend:7:TEXT_DISPLAY: hello ");
        assert_eq!(cmd.control_type, ControlType::TextDisplay);
        assert_eq!(cmd.value, " hello ");
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let cmd = datasend("datasend:7:THERMOSTAT:21");
        assert_eq!(cmd.control_type, ControlType::Unknown);
    }

    #[test]
    fn non_numeric_id_defaults_to_zero() {
        let cmd = datasend("datasend:lamp:SWITCH:0");
        assert_eq!(cmd.device_id, 0);
        assert!(cmd.id_defaulted);
    }

    #[test]
    fn id_parsing_is_permissive() {
        assert_eq!(parse_device_id("102"), (102, false));
        assert_eq!(parse_device_id("  42"), (42, false));
        assert_eq!(parse_device_id("12abc"), (12, false));
        assert_eq!(parse_device_id("-5"), (-5, false));
        assert_eq!(parse_device_id("+9"), (9, false));
        assert_eq!(parse_device_id("-"), (0, true));
        assert_eq!(parse_device_id("x1"), (0, true));
        assert_eq!(parse_device_id("99999999999"), (i32::MAX, false));
        assert_eq!(parse_device_id("-99999999999"), (i32::MIN, false));
    }

    #[test]
    fn encodes_framed_messages() {
        assert_eq!(encode(&OutboundMessage::bind(102, "1")), b"bind:102:1");
        assert_eq!(encode(&OutboundMessage::status(3, "on")), b"status:3:on");
        assert_eq!(
            encode(&OutboundMessage::SensorData {
                temperature: -4,
                humidity: 55
            }),
            b"sensor_data:-4:55"
        );
    }

    #[test]
    fn auth_token_is_unframed() {
        let token = "auth:".to_string() + &"x".repeat(100);
        let encoded = encode(&OutboundMessage::AuthToken {
            token: token.clone(),
        });
        assert_eq!(encoded, token.into_bytes());
    }

    #[test]
    fn long_frames_are_truncated() {
        let encoded = encode(&OutboundMessage::status(1, "v".repeat(200)));
        assert_eq!(encoded.len(), MAX_FRAME_LEN);
        assert!(encoded.starts_with(b"status:1:vvv"));
    }

    #[test]
    fn truncation_keeps_utf8_intact() {
        // "status:1:" is 9 bytes; 'é' is 2 bytes, so byte 64 splits a char.
        let value = "é".repeat(40);
        let encoded = encode(&OutboundMessage::status(1, value));
        assert_eq!(encoded.len(), MAX_FRAME_LEN - 1);
        assert!(String::from_utf8(encoded).is_ok());
    }

    #[test]
    fn decoded_id_survives_reencoding() {
        let cmd = datasend("datasend:155:NUMERIC_INPUT:40");
        let frame = encode(&OutboundMessage::status(cmd.device_id, cmd.value));
        assert_eq!(frame, b"status:155:40");
    }
}
