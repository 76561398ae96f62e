use serde::{Deserialize, Serialize};

use crate::models::{Permission, SessionView};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenMessage {
    pub doc_id: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EditMessage {
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RenameMessage {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FocusMessage {
    pub focused: bool,
}

/// An image pasted or dropped into the editor, base64-encoded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachMessage {
    pub file_name: String,
    pub mime_type: String,
    pub data: String,
}

/// Messages a websocket client sends to its hosted session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ReceivedMessage {
    #[serde(rename = "open")]
    Open(OpenMessage),
    #[serde(rename = "edit")]
    Edit(EditMessage),
    #[serde(rename = "rename")]
    Rename(RenameMessage),
    #[serde(rename = "focus")]
    Focus(FocusMessage),
    #[serde(rename = "attach")]
    Attach(AttachMessage),
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "close")]
    Close,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenedMessage {
    pub doc_id: String,
    pub permission: Permission,
    pub presence_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AttachedMessage {
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub code: u16,
    pub error: String,
}

/// Messages pushed from the hosted session to the websocket client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum SendMessage {
    #[serde(rename = "opened")]
    Opened(OpenedMessage),
    #[serde(rename = "view")]
    View(SessionView),
    #[serde(rename = "saved")]
    Saved,
    #[serde(rename = "attached")]
    Attached(AttachedMessage),
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_are_tagged_by_type() {
        let open: ReceivedMessage =
            serde_json::from_str(r#"{"type":"open","docId":"d1","token":"abc123"}"#).unwrap();
        assert_eq!(
            open,
            ReceivedMessage::Open(OpenMessage {
                doc_id: "d1".to_string(),
                token: Some("abc123".to_string()),
            })
        );

        let save: ReceivedMessage = serde_json::from_str(r#"{"type":"save"}"#).unwrap();
        assert_eq!(save, ReceivedMessage::Save);

        let focus: ReceivedMessage = serde_json::from_str(r#"{"type":"focus","focused":true}"#).unwrap();
        assert_eq!(focus, ReceivedMessage::Focus(FocusMessage { focused: true }));
    }

    #[test]
    fn open_without_token_defaults_to_none() {
        let open: ReceivedMessage = serde_json::from_str(r#"{"type":"open","docId":"d1"}"#).unwrap();
        assert!(matches!(open, ReceivedMessage::Open(OpenMessage { token: None, .. })));
    }

    #[test]
    fn attach_carries_base64_data() {
        let attach: ReceivedMessage = serde_json::from_str(
            r#"{"type":"attach","fileName":"a.png","mimeType":"image/png","data":"iVBORw=="}"#,
        )
        .unwrap();
        assert!(matches!(attach, ReceivedMessage::Attach(AttachMessage { ref mime_type, .. }) if mime_type == "image/png"));
    }

    #[test]
    fn server_error_message_shape() {
        let json = serde_json::to_value(SendMessage::Error(ErrorMessage {
            code: 403,
            error: "denied".to_string(),
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "code": 403, "error": "denied"}));
    }
}
