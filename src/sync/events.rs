use serde::Serialize;

/// Lifecycle event emitted while a sync invocation runs.
///
/// Serialized as one JSON object per line for the consumer. `complete` and
/// `error` are terminal: exactly one of them ends every invocation, and the
/// caller must not infer completion from anything else.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    Progress {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<ProgressData>,
    },
    Complete {
        message: String,
        data: SyncSummary,
    },
    Error {
        message: String,
    },
}

impl SyncEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        Self::Progress {
            message: message.into(),
            data: None,
        }
    }

    pub fn progress_with(message: impl Into<String>, data: ProgressData) -> Self {
        Self::Progress {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Partial counters attached to informational progress events.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_supply: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_minted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_id: Option<u64>,
}

/// Final counters carried by the terminal `complete` event.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub total_supply: u64,
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub not_minted: u64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_without_data_omits_the_field() {
        let json = serde_json::to_value(SyncEvent::progress("Starting sync")).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["message"], "Starting sync");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn progress_data_uses_camel_case_keys() {
        let event = SyncEvent::progress_with(
            "Processed token 15",
            ProgressData {
                total_supply: Some(100),
                processed: Some(15),
                not_minted: Some(2),
                current_id: Some(15),
                percentage: Some(15.0),
                ..Default::default()
            },
        );

        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["data"]["totalSupply"], 100);
        assert_eq!(json["data"]["notMinted"], 2);
        assert_eq!(json["data"]["currentId"], 15);
        // Unset counters are omitted entirely
        assert!(json["data"].get("updated").is_none());
    }

    #[test]
    fn complete_carries_full_summary() {
        let event = SyncEvent::Complete {
            message: "Fully synchronized".to_string(),
            data: SyncSummary {
                total_supply: 50,
                processed: 50,
                updated: 48,
                skipped: 0,
                not_minted: 2,
                errors: vec![],
            },
        };

        assert!(event.is_terminal());
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["data"]["totalSupply"], 50);
        assert_eq!(json["data"]["errors"], serde_json::json!([]));
    }

    #[test]
    fn error_is_terminal() {
        let event = SyncEvent::error("Failed to read total supply");
        assert!(event.is_terminal());
        assert!(!SyncEvent::progress("still going").is_terminal());
    }
}
