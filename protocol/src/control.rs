use serde::Deserialize;
use serde::Serialize;

/// Messages delivered from the control surface (popup) to the content side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    Toggle { enabled: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn toggle_wire_format() {
        let parsed: ControlMessage =
            serde_json::from_str(r#"{"type":"toggle","enabled":false}"#).expect("parse");
        assert_eq!(parsed, ControlMessage::Toggle { enabled: false });
    }
}
