//! Modbus RTU framing carried over a TCP socket.
//!
//! The shower relay controllers sit behind a serial-to-Ethernet gateway that
//! forwards raw RTU frames (address, PDU, CRC) unchanged, so the client
//! speaks RTU framing on a plain TCP stream.  Only the function this
//! installation needs is implemented: `0x06` write single register.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rainroom_hal::modbus::RtuOverTcpClient;
//! use rainroom_hal::relay::RelayBus;
//!
//! let mut client = RtuOverTcpClient::new("192.168.0.191", 9761, Duration::from_millis(500));
//! client.write_register(1, 1, 255).expect("relay write");
//! ```

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use rainroom_types::RainError;
use tracing::{debug, warn};

use crate::relay::RelayBus;

/// Modbus function code: write single holding register.
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;

const EXCEPTION_FLAG: u8 = 0x80;
const WRITE_FRAME_LEN: usize = 8;
const EXCEPTION_FRAME_LEN: usize = 5;

/// CRC-16/MODBUS (reflected polynomial 0xA001, initial value 0xFFFF).
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build the RTU frame for a write-single-register request.  The CRC is
/// appended low byte first.
pub fn encode_write_single(unit: u8, register: u16, value: u16) -> [u8; WRITE_FRAME_LEN] {
    let [reg_hi, reg_lo] = register.to_be_bytes();
    let [val_hi, val_lo] = value.to_be_bytes();
    let mut frame = [unit, WRITE_SINGLE_REGISTER, reg_hi, reg_lo, val_hi, val_lo, 0, 0];
    let [crc_lo, crc_hi] = crc16(&frame[..6]).to_le_bytes();
    frame[6] = crc_lo;
    frame[7] = crc_hi;
    frame
}

fn crc_matches(frame: &[u8]) -> bool {
    frame.len() >= 2 && crc16(frame) == 0
}

/// Blocking Modbus RTU-over-TCP master.
///
/// The TCP connection is opened lazily on the first write and dropped after
/// any transport error, so the next write reconnects.  Connect, read and
/// write all share the same timeout.
pub struct RtuOverTcpClient {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl RtuOverTcpClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            stream: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn connect(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            let addr = (self.host.as_str(), self.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "relay host did not resolve"))?;
            let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            stream.set_nodelay(true)?;
            debug!(host = %self.host, port = self.port, "connected to relay gateway");
            self.stream = Some(stream);
        }
        // The branch above guarantees the stream is present.
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "relay gateway not connected"))
    }

    fn exchange(&mut self, request: &[u8; WRITE_FRAME_LEN]) -> io::Result<Vec<u8>> {
        let stream = self.connect()?;
        stream.write_all(request)?;

        let mut header = [0u8; 2];
        stream.read_exact(&mut header)?;
        let total = if header[1] & EXCEPTION_FLAG != 0 {
            EXCEPTION_FRAME_LEN
        } else {
            WRITE_FRAME_LEN
        };
        let mut response = vec![0u8; total];
        response[..2].copy_from_slice(&header);
        stream.read_exact(&mut response[2..])?;
        Ok(response)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

impl RelayBus for RtuOverTcpClient {
    fn write_register(&mut self, unit: u8, register: u16, value: u16) -> Result<(), RainError> {
        let request = encode_write_single(unit, register, value);
        let response = match self.exchange(&request) {
            Ok(response) => response,
            Err(e) => {
                // Whatever is left in the socket belongs to a dead exchange.
                self.stream = None;
                if is_timeout(&e) {
                    warn!(unit, register, "relay write timed out");
                    return Err(RainError::TransportTimeout { unit, register });
                }
                warn!(unit, register, error = %e, "relay write failed");
                return Err(RainError::Transport(e.to_string()));
            }
        };

        if !crc_matches(&response) {
            self.stream = None;
            return Err(RainError::Transport(format!(
                "CRC mismatch in response from unit {unit}"
            )));
        }
        if response[1] & EXCEPTION_FLAG != 0 {
            return Err(RainError::RelayException {
                unit,
                code: response[2],
            });
        }
        if response[..6] != request[..6] {
            self.stream = None;
            return Err(RainError::Transport(format!(
                "unexpected echo from unit {unit}: {response:02x?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn crc_matches_reference_check_value() {
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn encoded_frame_layout() {
        let frame = encode_write_single(2, 4, 255);
        assert_eq!(&frame[..6], &[2, 0x06, 0x00, 0x04, 0x00, 0xFF]);
        // A frame with its CRC appended checks out to zero.
        assert!(crc_matches(&frame));
    }

    fn spawn_gateway<F>(respond: F) -> u16
    where
        F: FnOnce([u8; WRITE_FRAME_LEN]) -> Option<Vec<u8>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut request = [0u8; WRITE_FRAME_LEN];
            sock.read_exact(&mut request).unwrap();
            match respond(request) {
                Some(reply) => sock.write_all(&reply).unwrap(),
                // Hold the socket open without answering.
                None => thread::sleep(Duration::from_millis(500)),
            }
        });
        port
    }

    #[test]
    fn echoed_write_succeeds() {
        let port = spawn_gateway(|req| Some(req.to_vec()));
        let mut client = RtuOverTcpClient::new("127.0.0.1", port, Duration::from_millis(300));
        client.write_register(1, 3, 255).unwrap();
    }

    #[test]
    fn silent_gateway_times_out() {
        let port = spawn_gateway(|_| None);
        let mut client = RtuOverTcpClient::new("127.0.0.1", port, Duration::from_millis(100));
        let err = client.write_register(1, 2, 0).unwrap_err();
        assert_eq!(err, RainError::TransportTimeout { unit: 1, register: 2 });
    }

    #[test]
    fn exception_response_is_surfaced() {
        let port = spawn_gateway(|req| {
            let mut reply = vec![req[0], WRITE_SINGLE_REGISTER | EXCEPTION_FLAG, 0x02];
            let [lo, hi] = crc16(&reply).to_le_bytes();
            reply.extend_from_slice(&[lo, hi]);
            Some(reply)
        });
        let mut client = RtuOverTcpClient::new("127.0.0.1", port, Duration::from_millis(300));
        let err = client.write_register(7, 1, 255).unwrap_err();
        assert_eq!(err, RainError::RelayException { unit: 7, code: 0x02 });
    }

    #[test]
    fn corrupted_response_is_a_transport_error() {
        let port = spawn_gateway(|req| {
            let mut reply = req.to_vec();
            reply[7] ^= 0xFF;
            Some(reply)
        });
        let mut client = RtuOverTcpClient::new("127.0.0.1", port, Duration::from_millis(300));
        let err = client.write_register(1, 1, 0).unwrap_err();
        assert!(matches!(err, RainError::Transport(_)));
    }

    #[test]
    fn unreachable_gateway_is_a_relay_fault() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = RtuOverTcpClient::new("127.0.0.1", port, Duration::from_millis(100));
        let err = client.write_register(1, 1, 0).unwrap_err();
        assert!(err.is_relay_fault());
    }
}
