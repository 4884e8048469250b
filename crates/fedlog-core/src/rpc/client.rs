//! Outbound delivery client (the RPC adapter)

use crate::rpc::transport::RecordTransport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Three-way outcome of delivering one record to one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The zone accepted and applied the record
    Applied,
    /// The zone cannot take this index; `zone_last` is its authoritative
    /// last applied index, so the sender rewinds to `zone_last + 1`
    Rejected { zone_last: u64 },
    /// No endpoint could be reached within the timeout; retry later
    Network(String),
}

/// Performs one bounded-timeout "apply record" call against a zone.
///
/// Tries the zone's endpoints in ascending server id order until one
/// responds or all are exhausted. Stateless between calls.
pub struct DeliveryClient {
    transport: Arc<dyn RecordTransport>,
    rpc_timeout: Duration,
}

impl DeliveryClient {
    /// Create a client over the given transport
    pub fn new(transport: Arc<dyn RecordTransport>, rpc_timeout: Duration) -> Self {
        Self {
            transport,
            rpc_timeout,
        }
    }

    /// Deliver the record at `index` to `zone_id`
    pub async fn deliver(
        &self,
        zone_id: u32,
        endpoints: &BTreeMap<u32, String>,
        index: u64,
        command: &str,
    ) -> DeliveryOutcome {
        if endpoints.is_empty() {
            return DeliveryOutcome::Network(format!("zone {} has no endpoints", zone_id));
        }

        let mut last_failure = String::new();

        for (server_id, addr) in endpoints {
            let attempt = tokio::time::timeout(
                self.rpc_timeout,
                self.transport.apply_record(addr, index, command),
            )
            .await;

            match attempt {
                Ok(Ok(ack)) => {
                    // A last_index at or past the sent record means the zone
                    // already holds it (duplicate retransmission).
                    if ack.applied || ack.last_index >= index {
                        return DeliveryOutcome::Applied;
                    }

                    tracing::debug!(
                        "Zone {} rejected record {} (zone last index: {})",
                        zone_id,
                        index,
                        ack.last_index
                    );
                    return DeliveryOutcome::Rejected {
                        zone_last: ack.last_index,
                    };
                }
                Ok(Err(e)) => {
                    tracing::debug!(
                        "Delivery of record {} to zone {} server {} failed: {}",
                        index,
                        zone_id,
                        server_id,
                        e
                    );
                    last_failure = e.to_string();
                }
                Err(_) => {
                    tracing::debug!(
                        "Delivery of record {} to zone {} server {} timed out",
                        index,
                        zone_id,
                        server_id
                    );
                    last_failure = format!("timeout after {:?}", self.rpc_timeout);
                }
            }
        }

        DeliveryOutcome::Network(format!(
            "all {} endpoints of zone {} failed, last: {}",
            endpoints.len(),
            zone_id,
            last_failure
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::transport::ApplyAck;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Transport that replays a scripted response per address
    struct ScriptedTransport {
        responses: Mutex<std::collections::HashMap<String, Result<ApplyAck>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                responses: Mutex::new(std::collections::HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, addr: &str, response: Result<ApplyAck>) {
            self.responses.lock().insert(addr.to_string(), response);
        }
    }

    #[async_trait]
    impl RecordTransport for ScriptedTransport {
        async fn apply_record(&self, addr: &str, _index: u64, _command: &str) -> Result<ApplyAck> {
            self.calls.lock().push(addr.to_string());
            match self.responses.lock().remove(addr) {
                Some(response) => response,
                None => Err(Error::network(format!("unreachable: {addr}"))),
            }
        }
    }

    fn endpoints(addrs: &[(u32, &str)]) -> BTreeMap<u32, String> {
        addrs.iter().map(|(id, a)| (*id, a.to_string())).collect()
    }

    #[tokio::test]
    async fn test_applied_on_first_endpoint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(
            "zone-a:1",
            Ok(ApplyAck {
                applied: true,
                last_index: 5,
            }),
        );

        let client = DeliveryClient::new(transport.clone(), Duration::from_secs(1));
        let outcome = client
            .deliver(100, &endpoints(&[(0, "zone-a:1"), (1, "zone-a:2")]), 5, "cmd")
            .await;

        assert_eq!(outcome, DeliveryOutcome::Applied);
        assert_eq!(transport.calls.lock().as_slice(), ["zone-a:1"]);
    }

    #[tokio::test]
    async fn test_falls_through_to_second_endpoint() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script("zone-a:1", Err(Error::network("refused")));
        transport.script(
            "zone-a:2",
            Ok(ApplyAck {
                applied: true,
                last_index: 5,
            }),
        );

        let client = DeliveryClient::new(transport.clone(), Duration::from_secs(1));
        let outcome = client
            .deliver(100, &endpoints(&[(0, "zone-a:1"), (1, "zone-a:2")]), 5, "cmd")
            .await;

        assert_eq!(outcome, DeliveryOutcome::Applied);
        assert_eq!(transport.calls.lock().as_slice(), ["zone-a:1", "zone-a:2"]);
    }

    #[tokio::test]
    async fn test_rejection_reports_zone_last() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(
            "zone-a:1",
            Ok(ApplyAck {
                applied: false,
                last_index: 2,
            }),
        );

        let client = DeliveryClient::new(transport, Duration::from_secs(1));
        let outcome = client
            .deliver(100, &endpoints(&[(0, "zone-a:1")]), 5, "cmd")
            .await;

        assert_eq!(outcome, DeliveryOutcome::Rejected { zone_last: 2 });
    }

    #[tokio::test]
    async fn test_duplicate_counts_as_applied() {
        let transport = Arc::new(ScriptedTransport::new());
        // Zone is already past index 5: not applied now, but held.
        transport.script(
            "zone-a:1",
            Ok(ApplyAck {
                applied: false,
                last_index: 9,
            }),
        );

        let client = DeliveryClient::new(transport, Duration::from_secs(1));
        let outcome = client
            .deliver(100, &endpoints(&[(0, "zone-a:1")]), 5, "cmd")
            .await;

        assert_eq!(outcome, DeliveryOutcome::Applied);
    }

    #[tokio::test]
    async fn test_all_endpoints_down() {
        let transport = Arc::new(ScriptedTransport::new());

        let client = DeliveryClient::new(transport, Duration::from_secs(1));
        let outcome = client
            .deliver(100, &endpoints(&[(0, "a:1"), (1, "a:2")]), 5, "cmd")
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Network(_)));
    }

    #[tokio::test]
    async fn test_no_endpoints() {
        let transport = Arc::new(ScriptedTransport::new());

        let client = DeliveryClient::new(transport, Duration::from_secs(1));
        let outcome = client.deliver(100, &BTreeMap::new(), 1, "cmd").await;

        assert!(matches!(outcome, DeliveryOutcome::Network(_)));
    }
}
