//! Wire protocol (spec.md §6): the closed set of text control frames and the
//! binary frame discriminator. Pure (de)serialization, no I/O — kept
//! transport-agnostic so both the server crate and tests can share it.

use serde::{Deserialize, Serialize};

/// Text control frames, tagged by `type` (spec.md §6 table).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Ping { data: TimestampPayload },
    Pong { data: TimestampPayload },
    Chat { #[serde(rename = "userName")] user_name: Option<String>, text: String, #[serde(skip_serializing_if = "Option::is_none")] timestamp: Option<i64> },
    Status {
        viewers: usize,
        cols: u16,
        rows: u16,
        assistant: String,
        #[serde(rename = "yoloMode")]
        yolo_mode: bool,
        #[serde(rename = "yoloSupported")]
        yolo_supported: bool,
    },
    FileUpload { success: bool, filename: String, #[serde(skip_serializing_if = "Option::is_none")] error: Option<String> },
    ToggleYolo {},
    SetName { #[serde(rename = "userName")] user_name: String },
    Exit { #[serde(rename = "exitCode")] exit_code: u32, #[serde(skip_serializing_if = "Option::is_none")] worktree: Option<ExitWorktree> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimestampPayload {
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExitWorktree {
    pub path: String,
    pub branch: String,
}

impl ControlFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ControlFrame always serializes")
    }

    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Binary frame discriminator (spec.md §4.4): first byte `0x00` is a resize
/// request, `0x01` is a file-upload chunk, anything else is raw terminal
/// input.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientBinaryFrame<'a> {
    Resize { rows: u16, cols: u16 },
    Upload { name: &'a str, data: &'a [u8] },
    Input(&'a [u8]),
}

pub fn parse_client_binary_frame(bytes: &[u8]) -> ClientBinaryFrame<'_> {
    match bytes.first() {
        Some(0x00) if bytes.len() >= 5 => {
            let rows = u16::from_be_bytes([bytes[1], bytes[2]]);
            let cols = u16::from_be_bytes([bytes[3], bytes[4]]);
            ClientBinaryFrame::Resize { rows, cols }
        }
        Some(0x01) if bytes.len() >= 3 => {
            let name_len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
            let name_start = 3;
            let name_end = name_start + name_len;
            if bytes.len() >= name_end {
                let name = std::str::from_utf8(&bytes[name_start..name_end]).unwrap_or("");
                let data = &bytes[name_end..];
                ClientBinaryFrame::Upload { name, data }
            } else {
                ClientBinaryFrame::Input(bytes)
            }
        }
        _ => ClientBinaryFrame::Input(bytes),
    }
}

pub fn encode_resize_frame(rows: u16, cols: u16) -> Vec<u8> {
    let mut out = vec![0x00];
    out.extend_from_slice(&rows.to_be_bytes());
    out.extend_from_slice(&cols.to_be_bytes());
    out
}

pub fn encode_upload_frame(name: &str, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0x01];
    out.extend_from_slice(&(name.len() as u16).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_frame_roundtrips() {
        let frame = encode_resize_frame(24, 80);
        assert_eq!(parse_client_binary_frame(&frame), ClientBinaryFrame::Resize { rows: 24, cols: 80 });
    }

    #[test]
    fn upload_frame_roundtrips() {
        let frame = encode_upload_frame("foo.bin", b"hello");
        assert_eq!(parse_client_binary_frame(&frame), ClientBinaryFrame::Upload { name: "foo.bin", data: b"hello" });
    }

    #[test]
    fn anything_else_is_raw_input() {
        assert_eq!(parse_client_binary_frame(b"ls\n"), ClientBinaryFrame::Input(b"ls\n"));
    }

    #[test]
    fn truncated_resize_frame_falls_back_to_input() {
        let bytes = [0x00, 0x01];
        assert_eq!(parse_client_binary_frame(&bytes), ClientBinaryFrame::Input(&bytes));
    }

    #[test]
    fn control_frame_tag_matches_wire_format() {
        let frame = ControlFrame::SetName { user_name: "alice".into() };
        let json = frame.to_json();
        assert!(json.contains("\"type\":\"set_name\""));
        assert_eq!(ControlFrame::from_json(&json), Some(frame));
    }
}
