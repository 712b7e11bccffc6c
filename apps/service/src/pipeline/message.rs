use crate::monitoring::types::CheckResult;

/// A message ready to be appended to the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// JSON payload keyed by the decimal site id
    pub fn encode(result: &CheckResult) -> Result<Self, serde_json::Error> {
        Ok(Self { key: result.message_key(), payload: serde_json::to_vec(result)? })
    }
}

/// A message handed to a reader by the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn decode(&self) -> Result<CheckResult, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Key as text, for logging
    pub fn key_lossy(&self) -> String {
        self.key.as_deref().map(|k| String::from_utf8_lossy(k).into_owned()).unwrap_or_default()
    }
}
