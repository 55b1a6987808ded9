use std::net::UdpSocket as StdUdpSocket;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::control::{ControlMessage, EventSink, Value};
use crate::state::AppState;

/// Largest control datagram we accept. Scene JSON payloads
/// (`load_scene_data`) can be sizable, so this is generous.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Outbound event client: one JSON document per UDP datagram, sent to the
/// configured reply destination. Sends are best-effort; failures are logged
/// and dropped, never surfaced to the dispatcher.
pub struct UdpEventClient {
    socket: StdUdpSocket,
    destination: (String, u16),
}

impl UdpEventClient {
    pub fn new(ip: &str, port: u16) -> std::io::Result<Self> {
        Ok(UdpEventClient {
            socket: StdUdpSocket::bind("0.0.0.0:0")?,
            destination: (ip.to_owned(), port),
        })
    }
}

impl EventSink for UdpEventClient {
    fn send(&self, addr: &str, args: Vec<Value>) {
        let msg = ControlMessage::new(addr, args);
        let payload = match serde_json::to_vec(&msg) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(addr, error = %e, "failed to encode event");
                return;
            }
        };
        let dest = (self.destination.0.as_str(), self.destination.1);
        if let Err(e) = self.socket.send_to(&payload, dest) {
            warn!(addr, error = %e, "event send failed");
        }
    }
}

/// An event sink that throws events away, for `--simulator-only` runs
/// with no control plane to reply to.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _addr: &str, _args: Vec<Value>) {}
}

/// Receive loop for the control plane: one JSON-encoded [`ControlMessage`]
/// per datagram, dispatched under the model lock. Undecodable datagrams are
/// logged and dropped; the loop itself never exits on a bad message.
pub async fn run_control_server(
    state: Arc<AppState>,
    events: Arc<dyn EventSink>,
    socket: UdpSocket,
) {
    let mut buf = vec![0_u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "control socket receive failed");
                continue;
            }
        };
        let Some(data) = buf.get(..len) else {
            continue;
        };
        match serde_json::from_slice::<ControlMessage>(data) {
            Ok(msg) => {
                debug!(addr = %msg.addr, %peer, "control message");
                state.with_manager_mut(|manager| {
                    state
                        .dispatcher
                        .dispatch(manager, &state.emitter, events.as_ref(), &msg);
                });
            }
            Err(e) => {
                warn!(%peer, error = %e, "undecodable control datagram");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::control::Dispatcher;
    use crate::model::manager::SceneManager;
    use crate::output::{BinaryEmitter, EmitterConfig};
    use std::time::Duration;

    #[test]
    fn event_client_emits_json_datagrams() {
        let receiver = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let client = UdpEventClient::new("127.0.0.1", port).unwrap();
        client.send("/scene/1/effect_added", vec![Value::Int(2)]);

        let mut buf = [0_u8; 1024];
        let len = receiver.recv(&mut buf).unwrap();
        let msg: ControlMessage = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(msg.addr, "/scene/1/effect_added");
        assert_eq!(msg.args, vec![Value::Int(2)]);
    }

    #[tokio::test]
    async fn control_server_applies_messages_to_the_model() {
        let emitter = Arc::new(BinaryEmitter::new(EmitterConfig::default()).unwrap());
        let state = Arc::new(AppState::new(
            SceneManager::with_default_scene(10, 30.0),
            emitter,
            Dispatcher::new(10, 30.0),
        ));

        let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();
        let server = tokio::spawn(run_control_server(
            state.clone(),
            Arc::new(NullEventSink),
            server_socket,
        ));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = serde_json::json!({"addr": "/scene/1/set_palette", "args": ["C"]});
        client
            .send_to(msg.to_string().as_bytes(), server_addr)
            .await
            .unwrap();

        // poll until the mutation lands (the server task races the assert)
        let mut palette = String::new();
        for _ in 0..50 {
            palette = state.with_manager(|m| m.scene(1).unwrap().current_palette.clone());
            if palette == "C" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(palette, "C");

        // garbage must not kill the loop
        client.send_to(b"not json", server_addr).await.unwrap();
        let msg = serde_json::json!({"addr": "/scene/1/set_palette", "args": ["E"]});
        client
            .send_to(msg.to_string().as_bytes(), server_addr)
            .await
            .unwrap();
        for _ in 0..50 {
            palette = state.with_manager(|m| m.scene(1).unwrap().current_palette.clone());
            if palette == "E" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(palette, "E");

        server.abort();
    }
}
