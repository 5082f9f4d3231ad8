// mbpool collector - Modbus TCP register source
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Modbus TCP client reading holding registers (function 0x03).
//!
//! The connection is opened on the first read and dropped on any I/O or
//! framing error, so the next read starts from a fresh connection.

use mbpool::{RegisterSource, TransportError};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// MBAP header length (transaction, protocol, length, unit)
pub const MBAP_HEADER_LEN: usize = 7;

/// Read holding registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Max registers in one read request
pub const MAX_READ_REGISTERS: u16 = 125;

/// Holding-register reader over Modbus TCP
#[derive(Debug)]
pub struct ModbusTcpSource {
    address: String,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl ModbusTcpSource {
    /// Create a source for `address` (`host:port`); nothing is opened yet
    pub fn new(address: impl Into<String>, unit_id: u8, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            unit_id,
            timeout,
            stream: None,
            transaction_id: 0,
        }
    }

    /// Whether a connection is currently open
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn timeout_error(&self) -> TransportError {
        TransportError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn io_error(&self, e: io::Error) -> TransportError {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => self.timeout_error(),
            io::ErrorKind::UnexpectedEof => TransportError::Io("connection closed by device".into()),
            _ => TransportError::Io(e.to_string()),
        }
    }

    fn connect(&mut self) -> Result<&mut TcpStream, TransportError> {
        if self.stream.is_none() {
            let connect_error = |reason: String| TransportError::Connect {
                address: self.address.clone(),
                reason,
            };

            let addr = self
                .address
                .to_socket_addrs()
                .map_err(|e| connect_error(e.to_string()))?
                .next()
                .ok_or_else(|| connect_error("address did not resolve".into()))?;

            let stream = TcpStream::connect_timeout(&addr, self.timeout)
                .map_err(|e| connect_error(e.to_string()))?;
            stream
                .set_read_timeout(Some(self.timeout))
                .and_then(|_| stream.set_write_timeout(Some(self.timeout)))
                .and_then(|_| stream.set_nodelay(true))
                .map_err(|e| connect_error(e.to_string()))?;

            info!("connected to modbus device {}", self.address);
            self.stream = Some(stream);
        }

        self.stream.as_mut().ok_or(TransportError::Closed)
    }

    fn exchange(&mut self, address: u16, word_count: u16) -> Result<Vec<u8>, TransportError> {
        if word_count == 0 || word_count > MAX_READ_REGISTERS {
            return Err(TransportError::Malformed(format!(
                "cannot read {} registers",
                word_count
            )));
        }

        self.transaction_id = self.transaction_id.wrapping_add(1);
        let tid = self.transaction_id;
        let request = encode_request(tid, self.unit_id, address, word_count);

        let stream = self.connect()?;
        let mut header = [0u8; MBAP_HEADER_LEN];
        let io_result = stream
            .write_all(&request)
            .and_then(|_| stream.read_exact(&mut header));
        io_result.map_err(|e| self.io_error(e))?;

        let length = parse_header(&header, tid, self.unit_id)?;
        let mut pdu = vec![0u8; length - 1];
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let io_result = stream.read_exact(&mut pdu);
        io_result.map_err(|e| self.io_error(e))?;

        parse_response(&pdu, address, word_count)
    }
}

/// Build a read-holding-registers request frame
pub fn encode_request(tid: u16, unit_id: u8, address: u16, word_count: u16) -> [u8; 12] {
    let [t0, t1] = tid.to_be_bytes();
    let [a0, a1] = address.to_be_bytes();
    let [c0, c1] = word_count.to_be_bytes();
    [t0, t1, 0, 0, 0, 6, unit_id, FC_READ_HOLDING_REGISTERS, a0, a1, c0, c1]
}

/// Validate an MBAP header, returning the length field (unit + PDU)
fn parse_header(header: &[u8; MBAP_HEADER_LEN], tid: u16, unit_id: u8) -> Result<usize, TransportError> {
    let got_tid = u16::from_be_bytes([header[0], header[1]]);
    if got_tid != tid {
        return Err(TransportError::Malformed(format!(
            "transaction id {} does not match request {}",
            got_tid, tid
        )));
    }
    if header[2] != 0 || header[3] != 0 {
        return Err(TransportError::Malformed("unknown protocol id".into()));
    }
    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    if !(3..=254).contains(&length) {
        return Err(TransportError::Malformed(format!("bad length {}", length)));
    }
    if header[6] != unit_id {
        return Err(TransportError::Malformed(format!(
            "reply from unit {} instead of {}",
            header[6], unit_id
        )));
    }
    Ok(length)
}

/// Extract register bytes from a response PDU
fn parse_response(pdu: &[u8], address: u16, word_count: u16) -> Result<Vec<u8>, TransportError> {
    match pdu {
        [fc, code, ..] if *fc == FC_READ_HOLDING_REGISTERS | 0x80 => {
            Err(TransportError::Exception { address, code: *code })
        }
        [fc, count, data @ ..] if *fc == FC_READ_HOLDING_REGISTERS => {
            let expected = usize::from(word_count) * 2;
            if usize::from(*count) != expected || data.len() != expected {
                return Err(TransportError::Malformed(format!(
                    "expected {} bytes, got {}",
                    expected,
                    data.len()
                )));
            }
            Ok(data.to_vec())
        }
        [fc, ..] => Err(TransportError::Malformed(format!(
            "unexpected function code 0x{:02x}",
            fc
        ))),
        [] => Err(TransportError::Malformed("empty reply".into())),
    }
}

impl RegisterSource for ModbusTcpSource {
    fn read(&mut self, address: u16, word_count: u16) -> Result<Vec<u8>, TransportError> {
        let result = self.exchange(address, word_count);
        if let Err(ref e) = result {
            // Exceptions are well-framed replies; keep the connection
            if !matches!(e, TransportError::Exception { .. }) && self.stream.take().is_some() {
                debug!("dropping modbus connection after error: {}", e);
            }
        }
        result
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            info!("closed modbus connection to {}", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Serve `replies` connections; each reply function maps a request to a
    /// response frame (None closes the connection)
    fn serve<F>(connections: usize, reply: F) -> (String, thread::JoinHandle<()>)
    where
        F: Fn([u8; 12]) -> Option<Vec<u8>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            for _ in 0..connections {
                let (mut stream, _) = listener.accept().unwrap();
                loop {
                    let mut request = [0u8; 12];
                    if stream.read_exact(&mut request).is_err() {
                        break;
                    }
                    match reply(request) {
                        Some(frame) => stream.write_all(&frame).unwrap(),
                        None => break,
                    }
                }
            }
        });
        (addr, handle)
    }

    fn frame(request: &[u8; 12], pdu: &[u8]) -> Vec<u8> {
        let len = (pdu.len() + 1) as u16;
        let mut out = vec![request[0], request[1], 0, 0];
        out.extend_from_slice(&len.to_be_bytes());
        out.push(request[6]);
        out.extend_from_slice(pdu);
        out
    }

    #[test]
    fn test_encode_request() {
        assert_eq!(
            encode_request(0x0102, 15, 32290, 2),
            [0x01, 0x02, 0, 0, 0, 6, 15, 0x03, 0x7E, 0x22, 0x00, 0x02]
        );
    }

    #[test]
    fn test_read_holding_registers() {
        let (addr, server) = serve(1, |req| {
            assert_eq!(req[7], FC_READ_HOLDING_REGISTERS);
            Some(frame(&req, &[0x03, 0x04, 0x00, 0x00, 0x27, 0x10]))
        });

        let mut source = ModbusTcpSource::new(addr, 15, Duration::from_secs(2));
        assert_eq!(source.read(32290, 2).unwrap(), vec![0x00, 0x00, 0x27, 0x10]);
        assert!(source.is_connected());
        source.close();
        assert!(!source.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_exception_keeps_connection() {
        let (addr, server) = serve(1, |req| Some(frame(&req, &[0x83, 0x02])));

        let mut source = ModbusTcpSource::new(addr, 1, Duration::from_secs(2));
        assert_eq!(
            source.read(40000, 1).unwrap_err(),
            TransportError::Exception {
                address: 40000,
                code: 0x02
            }
        );
        assert!(source.is_connected());
        source.close();
        server.join().unwrap();
    }

    #[test]
    fn test_reconnects_after_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (addr, server) = serve(2, move |req| {
            // First request: hang up without answering
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                None
            } else {
                Some(frame(&req, &[0x03, 0x02, 0x13, 0x88]))
            }
        });

        let mut source = ModbusTcpSource::new(addr, 1, Duration::from_secs(2));
        assert!(source.read(32283, 1).is_err());
        assert!(!source.is_connected());

        assert_eq!(source.read(32283, 1).unwrap(), vec![0x13, 0x88]);
        source.close();
        server.join().unwrap();
    }

    #[test]
    fn test_short_reply_is_malformed() {
        let (addr, server) = serve(1, |req| Some(frame(&req, &[0x03, 0x04, 0x00, 0x01])));

        let mut source = ModbusTcpSource::new(addr, 1, Duration::from_secs(2));
        assert!(matches!(
            source.read(1, 2),
            Err(TransportError::Malformed(_))
        ));
        assert!(!source.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut source =
            ModbusTcpSource::new(format!("127.0.0.1:{}", port), 1, Duration::from_secs(1));
        assert!(matches!(
            source.read(1, 1),
            Err(TransportError::Connect { .. })
        ));
    }
}
