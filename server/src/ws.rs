//! `/ws/{uuid}` (spec.md §6): upgrades to a WebSocket, attaches a Session,
//! and pumps frames in both directions. Implements `ClientTransport` over an
//! axum WebSocket split sink so the core crate never depends on axum.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use swe_core::client::{ClientTransport, TransportError};
use swe_core::protocol::{parse_client_binary_frame, ClientBinaryFrame, ControlFrame};
use swe_core::session::Session;
use swe_core::size::Size;

pub struct AxumTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ClientTransport for AxumTransport {
    async fn send_binary(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        self.sink.send(Message::Binary(bytes)).await.map_err(|e| TransportError(e.to_string()))
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(text.into())).await.map_err(|e| TransportError(e.to_string()))
    }
}

/// Drive one client's WebSocket for the lifetime of the connection
/// (spec.md §4.2 "Public operations", §4.4 frame taxonomy).
pub async fn run_client(socket: WebSocket, session: Arc<Session>) {
    let (sink, mut stream) = socket.split();
    let client = session.attach(Box::new(AxumTransport { sink })).await;

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Binary(bytes) => match parse_client_binary_frame(&bytes) {
                ClientBinaryFrame::Resize { rows, cols } => {
                    session.resize(client.id, Size { rows, cols }).await;
                }
                ClientBinaryFrame::Upload { name, data } => {
                    session.upload_file(&client, name, data).await;
                }
                ClientBinaryFrame::Input(bytes) => {
                    let _ = session.write_input(bytes);
                }
            },
            Message::Text(text) => {
                if let Some(frame) = ControlFrame::from_json(&text) {
                    handle_control_frame(&session, &client, frame).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.detach(client.id).await;
}

async fn handle_control_frame(session: &Arc<Session>, client: &Arc<swe_core::client::ClientConnection>, frame: ControlFrame) {
    match frame {
        ControlFrame::Ping { data } => {
            let _ = client.send_text(ControlFrame::Pong { data }.to_json()).await;
        }
        ControlFrame::Chat { user_name, text, timestamp } => {
            session.broadcast_chat(user_name, text, timestamp).await;
        }
        ControlFrame::ToggleYolo {} => {
            session.toggle_permissive();
        }
        ControlFrame::SetName { user_name } => {
            session.set_client_name(client.id, user_name);
        }
        // Server-originated frames received from a client are ignored.
        ControlFrame::Pong { .. } | ControlFrame::Status { .. } | ControlFrame::FileUpload { .. } | ControlFrame::Exit { .. } => {}
    }
}
