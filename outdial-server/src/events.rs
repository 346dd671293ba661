use crate::model::{CallStatus, CampaignStats, CampaignStatus, TerminatedBy};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

const BUS_CAPACITY: usize = 256;

/// State-change notifications fanned out to subscribers.
///
/// For a given call, events arrive in the order the call store committed
/// them; across calls there is no ordering. Slow subscribers lag and observe
/// a gap rather than blocking publishers.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    NewCall {
        call_sid: String,
        campaign_id: Option<String>,
        to: String,
    },
    CallUpdate {
        call_sid: String,
        status: CallStatus,
        campaign_id: Option<String>,
    },
    CallEnded {
        call_sid: String,
        status: CallStatus,
        terminated_by: Option<TerminatedBy>,
        duration_secs: Option<u64>,
    },
    CampaignStatus {
        campaign_id: String,
        status: CampaignStatus,
    },
    CampaignStats {
        campaign_id: String,
        stats: CampaignStats,
    },
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        EventBus { tx }
    }

    /// Publishing without subscribers is fine; the event is dropped.
    pub fn publish(&self, event: ServerEvent) {
        trace!(?event, "publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(ServerEvent::CampaignStatus {
            campaign_id: "c1".to_string(),
            status: CampaignStatus::Active,
        });
        match rx.recv().await.unwrap() {
            ServerEvent::CampaignStatus { campaign_id, status } => {
                assert_eq!(campaign_id, "c1");
                assert_eq!(status, CampaignStatus::Active);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        EventBus::new().publish(ServerEvent::NewCall {
            call_sid: "CA1".to_string(),
            campaign_id: None,
            to: "+15551234567".to_string(),
        });
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(ServerEvent::CallEnded {
            call_sid: "CA1".to_string(),
            status: CallStatus::Completed,
            terminated_by: Some(TerminatedBy::Timeout),
            duration_secs: Some(12),
        })
        .unwrap();
        assert_eq!(json["type"], "call_ended");
        assert_eq!(json["terminated_by"], "timeout");
    }
}
