use fareprobe_common::persistence::DirectionSink;
use fareprobe_common::{DirectionRecord, Route};
use fareprobe_drivers::browser::{ObservedResponse, ResponseStream};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Persists the directions payload seen on a page, off the acquisition path.
#[derive(Clone)]
pub struct ResponseInterceptor {
    endpoint: String,
    sink: Arc<dyn DirectionSink>,
}

impl ResponseInterceptor {
    pub fn new(endpoint: impl Into<String>, sink: Arc<dyn DirectionSink>) -> Self {
        Self {
            endpoint: endpoint.into(),
            sink,
        }
    }

    /// Watch `responses` for the directions endpoint on behalf of `route`.
    ///
    /// The task ends when the stream does, i.e. when the page closes. Callers
    /// are free to drop the handle.
    pub fn attach(&self, mut responses: ResponseStream, route: &Route) -> JoinHandle<()> {
        let endpoint = self.endpoint.clone();
        let sink = self.sink.clone();
        let pickup_id = route.pickup.id.clone();
        let destination_id = route.destination.id.clone();

        tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                if response.url != endpoint {
                    continue;
                }
                let Some(payload) = parse_payload(&response) else {
                    continue;
                };
                let record = DirectionRecord {
                    pickup_id: pickup_id.clone(),
                    destination_id: destination_id.clone(),
                    payload,
                };
                match sink.insert_direction(record).await {
                    Ok(()) => info!(pickup = %pickup_id, destination = %destination_id, "interceptor.direction_queued"),
                    Err(err) => warn!(error = %err, pickup = %pickup_id, "interceptor.direction_dropped"),
                }
            }
            debug!(pickup = %pickup_id, destination = %destination_id, "interceptor.stream_closed");
        })
    }
}

fn parse_payload(response: &ObservedResponse) -> Option<serde_json::Value> {
    match serde_json::from_str(&response.body) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(url = %response.url, status = ?response.status, error = %err, "interceptor.malformed_payload");
            None
        }
    }
}
