//! Server-Sent Events (SSE) feed of ledger settlements.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};
use ledger_core::{LedgerError, Settlement};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::types::SettlementEvent;

/// SSE event name carrying a settlement.
const SETTLEMENT_EVENT: &str = "settlement";

/// A single connection to the ledger's settlement feed.
///
/// The feed does not reconnect on its own: the first transport error is
/// yielded and the stream then ends, leaving reconnection policy to the
/// consumer.
pub struct SettlementFeed {
    event_source: EventSource,
    finished: bool,
}

impl SettlementFeed {
    /// Wait for the connection to open and return the feed.
    pub async fn open(mut event_source: EventSource) -> Result<Self, ClientError> {
        match event_source.next().await {
            Some(Ok(Event::Open)) => {
                debug!("Settlement feed opened");
                Ok(Self {
                    event_source,
                    finished: false,
                })
            }
            Some(Ok(Event::Message(msg))) => {
                event_source.close();
                Err(ClientError::Sse(format!(
                    "unexpected event before open: {}",
                    msg.event
                )))
            }
            Some(Err(e)) => {
                event_source.close();
                Err(map_event_source_error(e))
            }
            None => Err(ClientError::Sse("feed closed before opening".to_string())),
        }
    }
}

fn map_event_source_error(err: EventSourceError) -> ClientError {
    match err {
        EventSourceError::InvalidStatusCode(status, _) => ClientError::Status {
            status: status.as_u16(),
            message: "settlement feed rejected".to_string(),
        },
        EventSourceError::StreamEnded => ClientError::Sse("stream ended".to_string()),
        other => ClientError::Sse(other.to_string()),
    }
}

impl Stream for SettlementFeed {
    type Item = Result<Settlement, LedgerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.event_source).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => match event {
                    Event::Open => {
                        debug!("Settlement feed reopened");
                        continue;
                    }
                    Event::Message(msg) => {
                        if msg.event != SETTLEMENT_EVENT {
                            debug!("Ignoring SSE event type: {}", msg.event);
                            continue;
                        }
                        match serde_json::from_str::<SettlementEvent>(&msg.data) {
                            Ok(event) => return Poll::Ready(Some(Ok(event.into()))),
                            Err(e) => {
                                warn!("Failed to parse settlement event: {}", e);
                                debug!("Raw data: {}", msg.data);
                                continue;
                            }
                        }
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    error!("Settlement feed error: {}", e);
                    self.event_source.close();
                    self.finished = true;
                    let err: LedgerError = map_event_source_error(e).into();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    info!("Settlement feed ended");
                    self.finished = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
