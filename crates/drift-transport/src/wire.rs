//! LAN framing.
//!
//! # Beacons
//!
//! Discovery beacons are single UDP datagrams holding a JSON [`Beacon`].
//!
//! # Streams
//!
//! ```text
//! +----------------+---------------------------+------------------------+
//! | header_len u32 | header (JSON, header_len) | content (until EOF)    |
//! | big-endian     | StreamHeader              |                        |
//! +----------------+---------------------------+------------------------+
//! ```

use crate::transport::{EndpointId, PayloadHeader, TransportError, TransportResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted stream header
pub const MAX_HEADER_LEN: u32 = 1024 * 1024;

/// Largest beacon datagram
pub const MAX_BEACON_LEN: usize = 2048;

/// Beacon kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    /// Periodic presence announcement
    Hello,
    /// Sent once when advertising stops
    Bye,
}

/// Discovery beacon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Beacon kind
    pub kind: BeaconKind,
    /// Sender identity
    pub id: EndpointId,
    /// Sender display name
    pub display_name: String,
    /// TCP port accepting streams
    pub port: u16,
}

impl Beacon {
    /// Encode as a datagram
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] if serialization fails.
    pub fn encode(&self) -> TransportResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    /// Decode a datagram
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] on oversized or malformed input.
    pub fn decode(buf: &[u8]) -> TransportResult<Self> {
        if buf.len() > MAX_BEACON_LEN {
            return Err(TransportError::Protocol(format!(
                "beacon too large: {} bytes",
                buf.len()
            )));
        }
        serde_json::from_slice(buf).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// Header opening every stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    /// Sender identity
    pub sender: EndpointId,
    /// Item header
    pub payload: PayloadHeader,
}

/// Write a length-prefixed stream header
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub async fn write_header<W>(writer: &mut W, header: &StreamHeader) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(header).map_err(|e| TransportError::Protocol(e.to_string()))?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_HEADER_LEN)
        .ok_or_else(|| TransportError::Protocol(format!("header too large: {}", body.len())))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    Ok(())
}

/// Read a length-prefixed stream header
///
/// # Errors
///
/// Returns an error if the stream ends early, the length exceeds
/// [`MAX_HEADER_LEN`], or the JSON does not parse.
pub async fn read_header<R>(reader: &mut R) -> TransportResult<StreamHeader>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_HEADER_LEN {
        return Err(TransportError::Protocol(format!("header too large: {len}")));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    serde_json::from_slice(&body).map_err(|e| TransportError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_header() -> StreamHeader {
        let mut metadata = BTreeMap::new();
        metadata.insert("MvrTitle".to_string(), "Notes".to_string());
        StreamHeader {
            sender: EndpointId::new("deadbeef"),
            payload: PayloadHeader {
                metadata,
                length: Some(42),
            },
        }
    }

    #[test]
    fn test_beacon_decode_rejects_garbage() {
        assert!(matches!(
            Beacon::decode(b"not json"),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            Beacon::decode(&vec![b' '; MAX_BEACON_LEN + 1]),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_beacon_kind_is_lowercase() {
        let beacon = Beacon {
            kind: BeaconKind::Bye,
            id: EndpointId::new("x"),
            display_name: "X".to_string(),
            port: 1,
        };
        let text = String::from_utf8(beacon.encode().unwrap()).unwrap();
        assert!(text.contains("\"bye\""));
        assert_eq!(Beacon::decode(text.as_bytes()).unwrap(), beacon);
    }

    #[tokio::test]
    async fn test_header_framing() {
        let header = sample_header();
        let mut buf = Vec::new();
        write_header(&mut buf, &header).await.unwrap();

        let len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(len, buf.len() - 4);

        let mut reader = &buf[..];
        assert_eq!(read_header(&mut reader).await.unwrap(), header);
    }

    #[tokio::test]
    async fn test_read_header_rejects_oversized_length() {
        let mut buf = (MAX_HEADER_LEN + 1).to_be_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let mut reader = &buf[..];
        assert!(matches!(
            read_header(&mut reader).await,
            Err(TransportError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_read_header_short_input() {
        let buf = [0u8, 0, 0, 10, b'{'];
        let mut reader = &buf[..];
        assert!(matches!(
            read_header(&mut reader).await,
            Err(TransportError::Io(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn beacon_decode_never_panics(bytes in proptest::collection::vec(proptest::num::u8::ANY, 0..512)) {
            let _ = Beacon::decode(&bytes);
        }
    }
}
