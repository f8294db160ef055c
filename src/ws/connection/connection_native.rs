//! Native realtime socket using tokio-tungstenite.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatsync_shared::{ChatError, RealtimeEnvelope};
use futures_channel::mpsc::UnboundedSender;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::client::ClientEvent;
use crate::ws::{Transport, TransportEvent};

/// Receive-only WebSocket session (native implementation).
///
/// Each `open()` starts a new generation; events from older generations are
/// dropped so a closed socket can't disturb the state machine.
pub struct WsTransport {
    url: String,
    events: UnboundedSender<ClientEvent>,
    generation: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, events: UnboundedSender<ClientEvent>) -> Self {
        Self {
            url: url.into(),
            events,
            generation: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    fn stop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self) {
        self.stop();
        let generation = self.generation.load(Ordering::SeqCst);
        let current = self.generation.clone();
        let events = self.events.clone();
        let url = self.url.clone();

        let emit = move |event: TransportEvent| {
            if current.load(Ordering::SeqCst) == generation {
                let _ = events.unbounded_send(ClientEvent::Transport(event));
            }
        };

        self.task = Some(tokio::spawn(async move {
            let mut stream = match connect_async(url.as_str()).await {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    crate::log_error!("WebSocket error for {}: {}", url, e);
                    emit(TransportEvent::Failed(ChatError::network(format!(
                        "WebSocket connection failed: {}",
                        e
                    ))));
                    return;
                }
            };
            crate::log_info!("WebSocket connected to {}", url);
            emit(TransportEvent::Opened);

            let mut close = TransportEvent::Closed {
                code: None,
                reason: None,
            };
            while let Some(msg_result) = stream.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        crate::log_debug!("WebSocket received: {}", text.as_str());
                        match RealtimeEnvelope::from_json(text.as_str()) {
                            Ok(envelope) => emit(TransportEvent::Frame(envelope)),
                            Err(e) => crate::log_error!("Failed to parse message: {}", e),
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        crate::log_info!("WebSocket to {} received close frame", url);
                        if let Some(frame) = frame {
                            close = TransportEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: Some(frame.reason.as_str().to_string()),
                            };
                        }
                        break;
                    }
                    Ok(_) => {
                        // Ping/pong is handled by tungstenite; binary frames are not used
                    }
                    Err(e) => {
                        crate::log_error!("WebSocket read error: {}", e);
                        close = TransportEvent::Failed(ChatError::network(format!(
                            "WebSocket read error: {}",
                            e
                        )));
                        break;
                    }
                }
            }
            emit(close);
        }));
    }

    fn close(&mut self) {
        self.stop();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
