use std::net::UdpSocket;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config;
use crate::model::color::Rgb;
use crate::model::manager::FrameSink;

/// Runtime-tunable emitter settings, adjusted by `/update_serial_output`.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub enabled: bool,
    pub ip: String,
    pub port: u16,
    /// Minimum seconds between datagrams (`1 / fps`).
    pub interval: f64,
    /// Address string tagging each frame datagram.
    pub address: String,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            enabled: true,
            ip: config::LED_BINARY_OUT_IP.to_owned(),
            port: config::LED_BINARY_OUT_PORT,
            interval: 1.0 / config::DEFAULT_FPS,
            address: config::LED_BINARY_ADDRESS.to_owned(),
        }
    }
}

struct EmitterState {
    config: EmitterConfig,
    last_send: Option<Instant>,
}

/// Rate-limited UDP sender of packed pixel frames.
///
/// Each frame goes out as one datagram: the configured address in OSC
/// message framing, carrying a blob of `4 * led_count` bytes in `R G B 0`
/// groups, the binding contract with downstream hardware. Sends are
/// fire-and-forget; failures are logged and swallowed so the render actor
/// never stalls.
pub struct BinaryEmitter {
    socket: UdpSocket,
    state: Mutex<EmitterState>,
}

impl BinaryEmitter {
    pub fn new(config: EmitterConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(BinaryEmitter {
            socket,
            state: Mutex::new(EmitterState {
                config,
                last_send: None,
            }),
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().config.enabled = enabled;
    }

    pub fn set_destination(&self, ip: &str, port: u16) {
        let mut state = self.state.lock();
        state.config.ip = ip.to_owned();
        state.config.port = port;
    }

    /// Re-rate the emitter. Non-positive fps is ignored.
    pub fn set_rate(&self, fps: f64) {
        if fps > 0.0 {
            self.state.lock().config.interval = 1.0 / fps;
        }
    }

    #[must_use]
    pub fn config(&self) -> EmitterConfig {
        self.state.lock().config.clone()
    }

    /// Send the frame if the emitter is enabled and the rate limit allows.
    pub fn maybe_send(&self, frame: &[Rgb]) {
        if frame.is_empty() {
            return;
        }
        let (destination, address) = {
            let mut state = self.state.lock();
            if !state.config.enabled {
                return;
            }
            let now = Instant::now();
            if let Some(last) = state.last_send {
                if now.duration_since(last).as_secs_f64() < state.config.interval {
                    return;
                }
            }
            state.last_send = Some(now);
            (
                (state.config.ip.clone(), state.config.port),
                state.config.address.clone(),
            )
        };

        let datagram = frame_datagram(&address, frame);
        match self.socket.send_to(&datagram, destination) {
            Ok(sent) => debug!(bytes = sent, leds = frame.len(), "sent binary frame"),
            Err(e) => warn!(error = %e, "binary frame send failed"),
        }
    }
}

impl FrameSink for BinaryEmitter {
    fn push_frame(&self, frame: &[Rgb]) {
        self.maybe_send(frame);
    }
}

/// Pack a frame into its wire payload: four bytes per pixel, `R G B 0`,
/// the trailing byte reserved.
#[must_use]
pub fn pack_frame(frame: &[Rgb]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(frame.len() * 4);
    for led in frame {
        payload.extend_from_slice(&[led.r, led.g, led.b, 0]);
    }
    payload
}

/// Wrap the payload in OSC message framing: null-padded address, a `,b`
/// type tag, then the length-prefixed blob.
fn frame_datagram(address: &str, frame: &[Rgb]) -> Vec<u8> {
    let payload = pack_frame(frame);
    let mut datagram = Vec::with_capacity(address.len() + payload.len() + 16);
    push_padded_str(&mut datagram, address);
    push_padded_str(&mut datagram, ",b");
    datagram.extend_from_slice(&(u32::try_from(payload.len()).unwrap_or(u32::MAX)).to_be_bytes());
    datagram.extend_from_slice(&payload);
    // blob contents are padded to a 4-byte boundary (always aligned here)
    datagram
}

/// Append a string plus its null terminator, padded to a 4-byte boundary.
fn push_padded_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    let pad = 4 - (s.len() % 4);
    buf.resize(buf.len() + pad, 0);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn payload_packs_rgb0_groups() {
        let frame = [Rgb::new(1, 2, 3), Rgb::new(255, 0, 128)];
        assert_eq!(pack_frame(&frame), vec![1, 2, 3, 0, 255, 0, 128, 0]);
    }

    #[test]
    fn datagram_carries_address_typetag_and_blob() {
        let frame = [Rgb::new(9, 8, 7)];
        let datagram = frame_datagram("/light/serial", &frame);
        // "/light/serial" is 13 bytes → padded to 16
        assert_eq!(&datagram[..13], b"/light/serial");
        assert_eq!(&datagram[13..16], &[0, 0, 0]);
        assert_eq!(&datagram[16..20], &[b',', b'b', 0, 0]);
        assert_eq!(&datagram[20..24], &4u32.to_be_bytes());
        assert_eq!(&datagram[24..], &[9, 8, 7, 0]);
    }

    #[test]
    fn frames_arrive_at_the_destination() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let emitter = BinaryEmitter::new(EmitterConfig {
            ip: "127.0.0.1".to_owned(),
            port,
            ..EmitterConfig::default()
        })
        .unwrap();

        emitter.maybe_send(&[Rgb::new(10, 20, 30)]);
        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[n - 4..n], &[10, 20, 30, 0]);
    }

    #[test]
    fn rate_limit_drops_back_to_back_frames() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let emitter = BinaryEmitter::new(EmitterConfig {
            ip: "127.0.0.1".to_owned(),
            port,
            interval: 10.0,
            ..EmitterConfig::default()
        })
        .unwrap();

        emitter.maybe_send(&[Rgb::BLACK]);
        emitter.maybe_send(&[Rgb::BLACK]);

        let mut buf = [0u8; 64];
        assert!(receiver.recv(&mut buf).is_ok());
        assert!(receiver.recv(&mut buf).is_err(), "second frame rate-limited");
    }

    #[test]
    fn disabled_emitter_sends_nothing() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let emitter = BinaryEmitter::new(EmitterConfig {
            ip: "127.0.0.1".to_owned(),
            port,
            ..EmitterConfig::default()
        })
        .unwrap();
        emitter.set_enabled(false);
        emitter.maybe_send(&[Rgb::BLACK]);

        let mut buf = [0u8; 64];
        assert!(receiver.recv(&mut buf).is_err());
    }
}
