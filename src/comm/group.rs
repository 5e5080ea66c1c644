//! Two-node process group over TCP
//!
//! Rank 0 listens on the master address, rank 1 dials it with
//! exponential backoff. Once the handshake completes, collective
//! operations run as paired frame exchanges: with a world size of
//! two every collective reduces to one send and one receive per rank.

use std::net::SocketAddr;
use std::time::Duration;

use backoff::ExponentialBackoff;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CheckConfig, WORLD_SIZE};
use crate::error::{Error, Result};

use super::wire::{read_frame, write_frame, CollectiveOp, Frame};

/// Reduction applied element-wise during all_reduce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Max => a.max(b),
        }
    }
}

/// Connection parameters for one rank of the group
#[derive(Debug, Clone)]
pub struct GroupConfig {
    pub rank: u32,
    pub master_addr: SocketAddr,
    pub init_timeout: Duration,
    pub op_timeout: Duration,
}

impl GroupConfig {
    /// Build group parameters from the loaded configuration
    pub fn from_config(config: &CheckConfig, rank: u32) -> Result<Self> {
        if rank >= WORLD_SIZE {
            return Err(Error::RankInvalid {
                message: format!("rank {} out of range for world size {}", rank, WORLD_SIZE),
            });
        }

        Ok(Self {
            rank,
            master_addr: config.master_socket_addr()?,
            init_timeout: config.init_timeout(),
            op_timeout: config.op_timeout(),
        })
    }
}

/// An established two-node communication group
#[derive(Debug)]
pub struct ProcessGroup {
    rank: u32,
    peer_rank: u32,
    session: Uuid,
    stream: TcpStream,
    op_timeout: Duration,
    seq: u64,
}

impl ProcessGroup {
    /// Establish the group: bind-and-accept on rank 0, dial on rank 1
    pub async fn init(config: GroupConfig) -> Result<Self> {
        let stream = match config.rank {
            0 => Self::accept_peer(&config).await?,
            _ => Self::dial_master(&config).await?,
        };

        stream.set_nodelay(true)?;

        let mut group = Self {
            rank: config.rank,
            peer_rank: WORLD_SIZE - 1 - config.rank,
            session: Uuid::new_v4(),
            stream,
            op_timeout: config.op_timeout,
            seq: 0,
        };

        group.handshake().await?;
        info!(rank = group.rank, session = %group.session, "process group initialized");

        Ok(group)
    }

    async fn accept_peer(config: &GroupConfig) -> Result<TcpStream> {
        let listener = Self::bind_listener(config.master_addr).map_err(|e| {
            Error::ConnectionFailed {
                addr: config.master_addr.to_string(),
                message: format!("failed to bind listener: {}", e),
            }
        })?;

        info!(addr = %config.master_addr, "rank 0 listening for peer");

        let accept = tokio::time::timeout(config.init_timeout, listener.accept()).await;
        match accept {
            Ok(Ok((stream, peer))) => {
                debug!(peer = %peer, "peer connected");
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                addr: config.master_addr.to_string(),
                message: format!("accept failed: {}", e),
            }),
            Err(_) => Err(Error::ConnectionTimeout {
                addr: config.master_addr.to_string(),
                timeout_secs: config.init_timeout.as_secs(),
            }),
        }
    }

    // SO_REUSEADDR lets back-to-back suite runs re-bind the master port
    // while the previous run's connection is still in TIME_WAIT.
    fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(1)
    }

    async fn dial_master(config: &GroupConfig) -> Result<TcpStream> {
        let addr = config.master_addr;
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(config.init_timeout),
            ..Default::default()
        };

        info!(addr = %addr, "rank 1 connecting to master");

        let stream = backoff::future::retry(backoff, || async {
            match TcpStream::connect(addr).await {
                Ok(stream) => Ok(stream),
                Err(e) => {
                    debug!(addr = %addr, error = %e, "connect attempt failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| {
            warn!(addr = %addr, error = %e, "gave up connecting to master");
            Error::ConnectionTimeout {
                addr: addr.to_string(),
                timeout_secs: config.init_timeout.as_secs(),
            }
        })?;

        Ok(stream)
    }

    /// Exchange and validate HELLO / HELLO_ACK
    async fn handshake(&mut self) -> Result<()> {
        if self.rank == 0 {
            let frame = self.read_timed("handshake").await?;
            match frame {
                Frame::Hello {
                    rank,
                    world_size,
                    session,
                } => {
                    if world_size != WORLD_SIZE {
                        return Err(Error::PeerMismatch {
                            message: format!(
                                "peer expects world size {}, this group is {}",
                                world_size, WORLD_SIZE
                            ),
                        });
                    }
                    if rank != self.peer_rank {
                        return Err(Error::PeerMismatch {
                            message: format!("peer claims rank {}, expected {}", rank, self.peer_rank),
                        });
                    }
                    // Adopt the session id proposed by the connecting rank
                    self.session = session;
                }
                other => {
                    return Err(Error::ProtocolUnexpected {
                        expected: "HELLO".to_string(),
                        got: other.type_name().to_string(),
                    })
                }
            }

            let ack = Frame::HelloAck {
                rank: self.rank,
                session: self.session,
            };
            write_frame(&mut self.stream, &ack).await?;
        } else {
            let hello = Frame::Hello {
                rank: self.rank,
                world_size: WORLD_SIZE,
                session: self.session,
            };
            write_frame(&mut self.stream, &hello).await?;

            let frame = self.read_timed("handshake").await?;
            match frame {
                Frame::HelloAck { rank, session } => {
                    if rank != self.peer_rank {
                        return Err(Error::PeerMismatch {
                            message: format!("ack from rank {}, expected {}", rank, self.peer_rank),
                        });
                    }
                    if session != self.session {
                        return Err(Error::PeerMismatch {
                            message: "ack carries a different session id".to_string(),
                        });
                    }
                }
                other => {
                    return Err(Error::ProtocolUnexpected {
                        expected: "HELLO_ACK".to_string(),
                        got: other.type_name().to_string(),
                    })
                }
            }
        }

        debug!(rank = self.rank, "handshake complete");
        Ok(())
    }

    /// This rank's position in the group
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// The other rank in the group
    pub fn peer_rank(&self) -> u32 {
        self.peer_rank
    }

    /// Session id agreed during the handshake
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Send a tensor to the peer
    pub async fn send(&mut self, data: &[f32]) -> Result<()> {
        self.seq += 1;
        let frame = Frame::Payload {
            op: CollectiveOp::SendRecv,
            seq: self.seq,
            data: data.to_vec(),
        };
        self.write_timed("send", &frame).await
    }

    /// Receive a tensor from the peer
    pub async fn recv(&mut self) -> Result<Vec<f32>> {
        self.seq += 1;
        self.read_payload("recv", CollectiveOp::SendRecv).await
    }

    /// Combine this rank's tensor with the peer's, element-wise
    pub async fn all_reduce(&mut self, data: &[f32], op: ReduceOp) -> Result<Vec<f32>> {
        self.seq += 1;
        let frame = Frame::Payload {
            op: CollectiveOp::AllReduce,
            seq: self.seq,
            data: data.to_vec(),
        };

        // Both ranks send, then both receive. Writing first keeps the
        // exchange deadlock-free for the small tensors carried here.
        self.write_timed("all_reduce", &frame).await?;
        let peer_data = self.read_payload("all_reduce", CollectiveOp::AllReduce).await?;

        if peer_data.len() != data.len() {
            return Err(Error::CollectiveFailed {
                operation: "all_reduce",
                rank: self.peer_rank,
                reason: format!(
                    "tensor length mismatch: local {}, peer {}",
                    data.len(),
                    peer_data.len()
                ),
            });
        }

        Ok(data
            .iter()
            .zip(peer_data.iter())
            .map(|(&a, &b)| op.combine(a, b))
            .collect())
    }

    /// Distribute the root's tensor to both ranks. `data` is read on the
    /// root rank and ignored elsewhere.
    pub async fn broadcast(&mut self, data: &[f32], root: u32) -> Result<Vec<f32>> {
        self.seq += 1;

        if self.rank == root {
            let frame = Frame::Payload {
                op: CollectiveOp::Broadcast,
                seq: self.seq,
                data: data.to_vec(),
            };
            self.write_timed("broadcast", &frame).await?;
            Ok(data.to_vec())
        } else {
            self.read_payload("broadcast", CollectiveOp::Broadcast).await
        }
    }

    /// Collect both ranks' tensors on the destination rank, ordered by
    /// rank. Returns `Some` on the destination, `None` elsewhere.
    pub async fn gather(&mut self, data: &[f32], dst: u32) -> Result<Option<Vec<Vec<f32>>>> {
        self.seq += 1;

        if self.rank == dst {
            let peer_data = self.read_payload("gather", CollectiveOp::Gather).await?;

            let mut ranks = vec![Vec::new(); WORLD_SIZE as usize];
            ranks[self.rank as usize] = data.to_vec();
            ranks[self.peer_rank as usize] = peer_data;
            Ok(Some(ranks))
        } else {
            let frame = Frame::Payload {
                op: CollectiveOp::Gather,
                seq: self.seq,
                data: data.to_vec(),
            };
            self.write_timed("gather", &frame).await?;
            Ok(None)
        }
    }

    /// Block until both ranks have reached this point
    pub async fn barrier(&mut self) -> Result<()> {
        self.seq += 1;
        let seq = self.seq;

        self.write_timed("barrier", &Frame::Barrier { seq }).await?;
        let frame = self.read_timed("barrier").await?;

        match frame {
            Frame::Barrier { seq: peer_seq } if peer_seq == seq => Ok(()),
            Frame::Barrier { seq: peer_seq } => Err(Error::ProtocolUnexpected {
                expected: format!("BARRIER seq {}", seq),
                got: format!("BARRIER seq {}", peer_seq),
            }),
            other => Err(Error::ProtocolUnexpected {
                expected: "BARRIER".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    /// Tear the group down, notifying the peer. Consumes the group so
    /// shutdown can only happen once.
    pub async fn shutdown(mut self) -> Result<()> {
        // Best effort: the peer may already be gone
        if let Err(e) = write_frame(&mut self.stream, &Frame::Bye).await {
            debug!("peer unreachable during shutdown: {}", e);
        }
        info!(rank = self.rank, session = %self.session, "process group shut down");
        Ok(())
    }

    async fn read_payload(&mut self, operation: &'static str, expect: CollectiveOp) -> Result<Vec<f32>> {
        let frame = self.read_timed(operation).await?;
        let expected_seq = self.seq;

        match frame {
            Frame::Payload { op, seq, data } => {
                if op != expect {
                    return Err(Error::ProtocolUnexpected {
                        expected: format!("PAYLOAD {}", expect),
                        got: format!("PAYLOAD {}", op),
                    });
                }
                if seq != expected_seq {
                    return Err(Error::ProtocolUnexpected {
                        expected: format!("PAYLOAD seq {}", expected_seq),
                        got: format!("PAYLOAD seq {}", seq),
                    });
                }
                Ok(data)
            }
            other => Err(Error::ProtocolUnexpected {
                expected: "PAYLOAD".to_string(),
                got: other.type_name().to_string(),
            }),
        }
    }

    async fn read_timed(&mut self, operation: &'static str) -> Result<Frame> {
        match tokio::time::timeout(self.op_timeout, read_frame(&mut self.stream)).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(Error::ConnectionLost { message })) => Err(Error::CollectiveFailed {
                operation,
                rank: self.peer_rank,
                reason: message,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::CollectiveTimeout {
                operation,
                timeout_secs: self.op_timeout.as_secs(),
            }),
        }
    }

    async fn write_timed(&mut self, operation: &'static str, frame: &Frame) -> Result<()> {
        match tokio::time::timeout(self.op_timeout, write_frame(&mut self.stream, frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(Error::Io(e))) => Err(Error::CollectiveFailed {
                operation,
                rank: self.peer_rank,
                reason: e.to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::CollectiveTimeout {
                operation,
                timeout_secs: self.op_timeout.as_secs(),
            }),
        }
    }
}
