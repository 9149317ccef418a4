use serde::Serialize;
use uuid::Uuid;

use crate::db::CompletionSummary;
use crate::services::ReceivedBatch;

/// Stock-affecting events pushed to dashboard subscribers of the same company.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    BatchReceived {
        #[serde(skip)]
        company_id: Uuid,
        #[serde(flatten)]
        batch: ReceivedBatch,
    },
    SessionCompleted {
        #[serde(skip)]
        company_id: Uuid,
        #[serde(flatten)]
        summary: CompletionSummary,
    },
}

impl InventoryEvent {
    pub fn company_id(&self) -> Uuid {
        match self {
            InventoryEvent::BatchReceived { company_id, .. } | InventoryEvent::SessionCompleted { company_id, .. } => {
                *company_id
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_and_hide_the_company() {
        let event = InventoryEvent::BatchReceived {
            company_id: Uuid::now_v7(),
            batch: ReceivedBatch {
                batch_id: Uuid::nil(),
                session_type: "CBT".into(),
                start_number: 100,
                end_number: 124,
                total_certificates: 25,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "batch_received");
        assert_eq!(json["end_number"], 124);
        assert!(json.get("company_id").is_none());
    }
}
