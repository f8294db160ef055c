//! Web realtime socket using `web_sys::WebSocket`.

use std::cell::Cell;
use std::rc::Rc;

use chatsync_shared::{ChatError, RealtimeEnvelope};
use futures_channel::mpsc::UnboundedSender;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

use crate::client::ClientEvent;
use crate::ws::{Transport, TransportEvent};

type Handler = Closure<dyn FnMut(Event)>;

/// Receive-only WebSocket session (web implementation).
pub struct WsTransport {
    url: String,
    events: UnboundedSender<ClientEvent>,
    generation: Rc<Cell<u64>>,
    socket: Option<WebSocket>,
    handlers: Vec<Handler>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, events: UnboundedSender<ClientEvent>) -> Self {
        Self {
            url: url.into(),
            events,
            generation: Rc::new(Cell::new(0)),
            socket: None,
            handlers: Vec::new(),
        }
    }

    fn emitter(&self) -> impl Fn(TransportEvent) + Clone + 'static {
        let generation = self.generation.get();
        let current = self.generation.clone();
        let events = self.events.clone();
        move |event| {
            if current.get() == generation {
                let _ = events.unbounded_send(ClientEvent::Transport(event));
            }
        }
    }

    fn stop(&mut self) {
        self.generation.set(self.generation.get() + 1);
        if let Some(ws) = self.socket.take() {
            ws.set_onopen(None);
            ws.set_onmessage(None);
            ws.set_onclose(None);
            ws.set_onerror(None);
            let _ = ws.close();
        }
        self.handlers.clear();
    }
}

impl Transport for WsTransport {
    fn open(&mut self) {
        self.stop();
        let emit = self.emitter();

        let ws = match WebSocket::new(&self.url) {
            Ok(ws) => ws,
            Err(e) => {
                crate::log_error!("Failed to create WebSocket: {:?}", e);
                emit(TransportEvent::Failed(ChatError::network(format!(
                    "Failed to create WebSocket: {:?}",
                    e
                ))));
                return;
            }
        };

        let on_open = emit.clone();
        let onopen: Handler = Closure::wrap(Box::new(move |_: Event| {
            crate::log_info!("WebSocket onopen fired");
            on_open(TransportEvent::Opened);
        }) as Box<dyn FnMut(Event)>);
        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));

        let on_message = emit.clone();
        let onmessage: Handler = Closure::wrap(Box::new(move |e: Event| {
            let Some(text) = e.dyn_ref::<MessageEvent>().and_then(|m| m.data().as_string()) else {
                return;
            };
            match RealtimeEnvelope::from_json(&text) {
                Ok(envelope) => on_message(TransportEvent::Frame(envelope)),
                Err(err) => crate::log_error!("Failed to parse message: {}", err),
            }
        }) as Box<dyn FnMut(Event)>);
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));

        let on_close = emit.clone();
        let onclose: Handler = Closure::wrap(Box::new(move |e: Event| {
            let (code, reason) = match e.dyn_ref::<CloseEvent>() {
                Some(close) => (Some(close.code()), Some(close.reason())),
                None => (None, None),
            };
            crate::log_info!("WebSocket onclose: {:?} {:?}", code, reason);
            on_close(TransportEvent::Closed { code, reason });
        }) as Box<dyn FnMut(Event)>);
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));

        let on_error = emit;
        let onerror: Handler = Closure::wrap(Box::new(move |_: Event| {
            crate::log_error!("WebSocket onerror fired");
            on_error(TransportEvent::Failed(ChatError::network("WebSocket error")));
        }) as Box<dyn FnMut(Event)>);
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));

        self.handlers = vec![onopen, onmessage, onclose, onerror];
        self.socket = Some(ws);
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
