//! Wire protocol: length-prefixed JSON framing
//!
//! Wire format:  [4-byte big-endian length][JSON payload]

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Upper bound on a single frame. Test payloads are a handful of floats;
/// anything larger means the peers are not speaking the same protocol.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// The collective operation a payload frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveOp {
    SendRecv,
    AllReduce,
    Broadcast,
    Gather,
}

impl std::fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CollectiveOp::SendRecv => "send_recv",
            CollectiveOp::AllReduce => "all_reduce",
            CollectiveOp::Broadcast => "broadcast",
            CollectiveOp::Gather => "gather",
        };
        f.write_str(name)
    }
}

/// All frames exchanged between the two ranks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// Handshake opener, sent by rank 1 after connecting
    Hello {
        rank: u32,
        world_size: u32,
        session: Uuid,
    },

    /// Handshake acknowledgment, sent by rank 0
    HelloAck { rank: u32, session: Uuid },

    /// Data for one collective operation
    Payload {
        op: CollectiveOp,
        seq: u64,
        data: Vec<f32>,
    },

    /// Barrier marker
    Barrier { seq: u64 },

    /// Orderly shutdown
    Bye,
}

impl Frame {
    /// Get the frame type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "HELLO",
            Frame::HelloAck { .. } => "HELLO_ACK",
            Frame::Payload { .. } => "PAYLOAD",
            Frame::Barrier { .. } => "BARRIER",
            Frame::Bye => "BYE",
        }
    }
}

/// Read a length-prefixed JSON frame from a stream
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Frame> {
    // Read 4-byte big-endian length
    let len = reader.read_u32().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionLost {
                message: "peer closed the connection".to_string(),
            }
        } else {
            Error::Io(e)
        }
    })?;

    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_SIZE,
        });
    }

    // Read the JSON payload
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionLost {
                message: "peer closed the connection mid-frame".to_string(),
            }
        } else {
            Error::Io(e)
        }
    })?;

    let frame: Frame = serde_json::from_slice(&buf)?;
    Ok(frame)
}

/// Write a length-prefixed JSON frame to a stream
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let json = serde_json::to_vec(frame)?;
    let len = json.len() as u32;

    writer.write_u32(len).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}
