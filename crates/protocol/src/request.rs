//! Request codec.
//!
//! An inbound message is either a JSON object carrying `text` and an
//! optional `file`, or a bare string that is taken as `text` verbatim.

use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_SIZE;

/// Rejection reasons for inbound payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidData {
    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("empty or invalid text")]
    EmptyText,

    #[error("invalid encoding: {0}")]
    Encoding(String),

    #[error("message too large: {size} bytes (max {limit})")]
    TooLarge { size: usize, limit: usize },
}

impl InvalidData {
    /// Short machine-readable reason, without the detail.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Deserialization(_) => "deserialization error",
            Self::EmptyText => "empty or invalid text",
            Self::Encoding(_) => "invalid encoding",
            Self::TooLarge { .. } => "message too large",
        }
    }
}

/// One unit of work: code to run plus a path-like hint.
///
/// Only constructible with non-blank `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    text: String,
    file: String,
}

impl Request {
    /// Builds a request, rejecting empty or whitespace-only text.
    pub fn new(text: impl Into<String>, file: impl Into<String>) -> Result<Self, InvalidData> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(InvalidData::EmptyText);
        }
        Ok(Self {
            text,
            file: file.into(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// Serializes to the JSON wire form.
    pub fn to_wire(&self) -> String {
        // Two string fields: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Loosely-typed view of a structured payload; field types are checked
/// after parsing so a wrong type reports as empty text, not a parse error.
#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    text: Option<serde_json::Value>,
    #[serde(default)]
    file: Option<serde_json::Value>,
}

/// Decodes raw message bytes into a [`Request`].
pub fn decode(raw: &[u8]) -> Result<Request, InvalidData> {
    if raw.len() > MAX_MESSAGE_SIZE {
        return Err(InvalidData::TooLarge {
            size: raw.len(),
            limit: MAX_MESSAGE_SIZE,
        });
    }

    let payload = std::str::from_utf8(raw).map_err(|e| InvalidData::Encoding(e.to_string()))?;

    if !is_structured(payload) {
        return Request::new(payload, "");
    }

    let parsed: RawRequest = serde_json::from_str(payload.trim())
        .map_err(|e| InvalidData::Deserialization(e.to_string()))?;

    let text = match parsed.text {
        Some(serde_json::Value::String(text)) => text,
        _ => return Err(InvalidData::EmptyText),
    };
    let file = match parsed.file {
        Some(serde_json::Value::String(file)) => file,
        _ => String::new(),
    };

    Request::new(text, file)
}

/// Returns `true` if the payload should be parsed as a JSON object.
pub fn is_structured(payload: &str) -> bool {
    payload.trim_start().starts_with('{')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_json_request() {
        let req = decode(br#"{"text": "print('HELLO')", "file": "x.py"}"#).unwrap();
        assert_eq!(req.text(), "print('HELLO')");
        assert_eq!(req.file(), "x.py");
    }

    #[test]
    fn decode_json_without_file() {
        let req = decode(br#"{"text": "nuke.allNodes()"}"#).unwrap();
        assert_eq!(req.text(), "nuke.allNodes()");
        assert_eq!(req.file(), "");
    }

    #[test]
    fn decode_preserves_text_exactly() {
        for text in ["x", "  padded  ", "multi\nline\ttext", "unicode ➥ ok"] {
            let raw = serde_json::json!({ "text": text }).to_string();
            assert_eq!(decode(raw.as_bytes()).unwrap().text(), text);
        }
    }

    #[test]
    fn decode_bare_string() {
        let req = decode(b"print('bare')").unwrap();
        assert_eq!(req.text(), "print('bare')");
        assert_eq!(req.file(), "");
    }

    #[test]
    fn decode_leading_whitespace_json() {
        let req = decode(b"\n  {\"text\": \"a\", \"file\": \"b.cpp\"}  ").unwrap();
        assert_eq!(req.file(), "b.cpp");
    }

    #[test]
    fn decode_rejects_blank_text() {
        for raw in [
            r#"{"text": ""}"#,
            r#"{"text": "   "}"#,
            r#"{"text": null}"#,
            r#"{"file": "a.py"}"#,
            r#"{"text": 42}"#,
            "",
            "   \n\t",
        ] {
            let err = decode(raw.as_bytes()).unwrap_err();
            assert_eq!(err, InvalidData::EmptyText, "payload {raw:?}");
            assert_eq!(err.reason(), "empty or invalid text");
        }
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = decode(br#"{"text": "unterminated"#).unwrap_err();
        assert!(matches!(err, InvalidData::Deserialization(_)));
        assert_eq!(err.reason(), "deserialization error");
        assert!(err.to_string().starts_with("deserialization error: "));
    }

    #[test]
    fn decode_non_string_file_defaults_to_empty() {
        let req = decode(br#"{"text": "a", "file": 3}"#).unwrap();
        assert_eq!(req.file(), "");
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let req = decode(br#"{"text": "a", "file": "b", "extra": [1, 2]}"#).unwrap();
        assert_eq!(req.text(), "a");
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let err = decode(&[0xff, 0xfe, b'a']).unwrap_err();
        assert_eq!(err.reason(), "invalid encoding");
    }

    #[test]
    fn decode_rejects_oversized() {
        let raw = vec![b'a'; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&raw),
            Err(InvalidData::TooLarge { size, .. }) if size == MAX_MESSAGE_SIZE + 1
        ));
    }

    #[test]
    fn wire_form_decodes_back() {
        let req = Request::new("print(\"q\")\n", "dir/file.py").unwrap();
        assert_eq!(decode(req.to_wire().as_bytes()).unwrap(), req);
    }

    #[test]
    fn new_rejects_blank() {
        assert_eq!(Request::new(" ", "a.py"), Err(InvalidData::EmptyText));
    }
}
