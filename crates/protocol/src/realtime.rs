//! Frames exchanged over the transactions WebSocket.

use serde::{Deserialize, Serialize};

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start importing a previously uploaded statement file.
    StartImport { file_id: String, broker_id: i64 },
    /// Answer to a `security_mapping` prompt during an import.
    SecurityMapped { security_id: i64 },
}

/// Messages received from the server.
///
/// Frames are `{"type": ..., "data": ...}`. Types this client does not know
/// decode to [`ServerMessage::Unknown`] instead of failing, so a newer server
/// can add frames without breaking the channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawFrame")]
pub enum ServerMessage {
    ImportUpdate(ImportUpdate),
    ImportError(ImportError),
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl TryFrom<RawFrame> for ServerMessage {
    type Error = serde_json::Error;

    fn try_from(raw: RawFrame) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "import_update" => serde_json::from_value(raw.data).map(Self::ImportUpdate),
            "import_error" => serde_json::from_value(raw.data).map(Self::ImportError),
            _ => Ok(Self::Unknown { kind: raw.kind }),
        }
    }
}

/// One step of a running import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportUpdate {
    /// `progress`, `add_transaction`, `security_mapping`, `complete`, ...
    pub status: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ImportUpdate {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }

    /// Percentage reported by `progress` updates.
    pub fn progress(&self) -> Option<f64> {
        self.details.get("progress").and_then(|v| v.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportError {
    pub error: String,
}
