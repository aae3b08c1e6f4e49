use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// owserver network protocol: 24-byte big-endian header, six i32 fields
// (version, payload length, type / return code, control flags, size, offset).
const HEADER_LEN: usize = 24;
const MSG_READ: i32 = 2;
// Request and response payloads in OWNET presentation format.
const FLAG_OWNET: i32 = 0x0000_0100;
// Upper bound advertised for a single scalar reading.
const MAX_READ_SIZE: i32 = 8192;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("i/o error talking to owserver: {0}")]
    Io(#[from] std::io::Error),
    #[error("owserver read timed out")]
    Timeout,
    #[error("owserver returned error code {code}")]
    Protocol { code: i32 },
    #[error("owserver response truncated")]
    Truncated,
}

/// Capability that resolves a sensor address to a raw scalar reading. No
/// ordering or session state is assumed between calls.
pub trait Gateway {
    fn read(&self, address: &str) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

/// owserver client. Each read opens its own connection so in-flight reads stay
/// independent of one another.
#[derive(Debug, Clone)]
pub struct OwGateway {
    host: String,
    port: u16,
    timeout: Duration,
}

impl OwGateway {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    async fn read_inner(&self, address: &str) -> Result<String, GatewayError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let mut path = address.as_bytes().to_vec();
        path.push(0);
        let request = encode_request(path.len() as i32, MAX_READ_SIZE);
        stream.write_all(&request).await?;
        stream.write_all(&path).await?;

        loop {
            let mut header = [0u8; HEADER_LEN];
            stream.read_exact(&mut header).await?;
            let response = ResponseHeader::parse(&header);

            // payload -1 is a keepalive ping while the server works on the read
            if response.payload_len < 0 {
                continue;
            }

            let mut payload = vec![0u8; response.payload_len as usize];
            stream.read_exact(&mut payload).await?;

            if response.ret < 0 {
                return Err(GatewayError::Protocol { code: response.ret });
            }
            if response.size < 0 || response.size > response.payload_len {
                return Err(GatewayError::Truncated);
            }
            let value = String::from_utf8_lossy(&payload[..response.size as usize]);
            return Ok(value.trim().to_string());
        }
    }
}

impl Gateway for OwGateway {
    async fn read(&self, address: &str) -> Result<String, GatewayError> {
        match tokio::time::timeout(self.timeout, self.read_inner(address)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }
}

struct ResponseHeader {
    payload_len: i32,
    ret: i32,
    size: i32,
}

impl ResponseHeader {
    fn parse(header: &[u8; HEADER_LEN]) -> Self {
        Self {
            payload_len: read_i32(header, 4),
            ret: read_i32(header, 8),
            size: read_i32(header, 16),
        }
    }
}

fn encode_request(payload_len: i32, size: i32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    write_i32(&mut header, 4, payload_len);
    write_i32(&mut header, 8, MSG_READ);
    write_i32(&mut header, 12, FLAG_OWNET);
    write_i32(&mut header, 16, size);
    header
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
