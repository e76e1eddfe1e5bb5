//! Framing: a ULEB128 length prefix, then one encoded command per frame.
//!
//! Each stream runs a reader task and a writer task joined to the owner by
//! bounded queues, so a slow peer exerts backpressure on its own connection
//! without blocking anyone else. The first byte on a fresh connection is the
//! protocol version: the client writes it, the server reads it before any
//! framing starts.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cadenza_protocol::{decode, encode, ClientCommand, ServerCommand, Wire};

use crate::TransportError;

/// The protocol version this build speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hard cap on a single frame's payload.
pub const MAX_FRAME_LEN: u32 = 2 * 1024 * 1024;

/// Capacity of the per-direction frame queues.
const QUEUE_CAPACITY: usize = 1024;

async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        if shift > 32 {
            return Err(TransportError::InvalidLength);
        }
        let byte = reader.read_u8().await?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let len = u32::try_from(value).map_err(|_| TransportError::InvalidLength)?;
    if len > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut head = [0u8; 5];
    let mut n = 0;
    let mut len = payload.len() as u32;
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len != 0 {
            byte |= 0x80;
        }
        head[n] = byte;
        n += 1;
        if len == 0 {
            break;
        }
    }
    writer.write_all(&head[..n]).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Shared plumbing behind both stream directions: a reader task decoding
/// inbound frames into a channel, and a writer task draining an outbound
/// channel onto the socket.
struct Pipes<Out> {
    outbound: mpsc::Sender<Out>,
    last_received: Arc<Mutex<Instant>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<Out> Clone for Pipes<Out> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
            last_received: Arc::clone(&self.last_received),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

fn spawn_pipes<S, Out, In>(io: S) -> (Pipes<Out>, mpsc::Receiver<In>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    Out: Wire + Send + 'static,
    In: Wire + Send + 'static,
{
    let (mut read_half, mut write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(io);

    let last_received = Arc::new(Mutex::new(Instant::now()));
    let (in_tx, in_rx) = mpsc::channel::<In>(QUEUE_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<Out>(QUEUE_CAPACITY);

    let last = Arc::clone(&last_received);
    let reader = tokio::spawn(async move {
        loop {
            let payload = match read_frame(&mut read_half).await {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::trace!(error = %e, "inbound stream ended");
                    break;
                }
            };
            *last.lock() = Instant::now();
            match decode::<In>(&payload) {
                Ok(cmd) => {
                    if in_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "closing stream on undecodable frame");
                    break;
                }
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(cmd) = out_rx.recv().await {
            let payload = encode(&cmd);
            if let Err(e) = write_frame(&mut write_half, &payload).await {
                tracing::trace!(error = %e, "outbound stream ended");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let pipes = Pipes {
        outbound: out_tx,
        last_received,
        tasks: Arc::new(Mutex::new(vec![reader, writer])),
    };
    (pipes, in_rx)
}

impl<Out> Pipes<Out> {
    async fn send(&self, cmd: Out) -> Result<(), TransportError> {
        self.outbound
            .send(cmd)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn try_send(&self, cmd: Out) -> Result<(), TransportError> {
        self.outbound.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// The server's half of one client connection.
///
/// Cheap to clone; every clone shares the outbound queue, so room broadcasts
/// can hold a stream handle without owning the connection. Inbound commands
/// arrive on the receiver returned by [`accept`](Self::accept); the channel
/// closing means the connection is gone (EOF, I/O error, or an undecodable
/// frame, all equally fatal).
pub struct ServerStream {
    version: u8,
    pipes: Pipes<ServerCommand>,
}

impl Clone for ServerStream {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            pipes: self.pipes.clone(),
        }
    }
}

impl ServerStream {
    /// Performs the server side of the handshake: reads the client's
    /// protocol-version byte, then starts the framing tasks.
    pub async fn accept<S>(mut io: S) -> Result<(Self, mpsc::Receiver<ClientCommand>), TransportError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let version = io.read_u8().await?;
        let (pipes, incoming) = spawn_pipes::<S, ServerCommand, ClientCommand>(io);
        Ok((Self { version, pipes }, incoming))
    }

    /// The protocol version the client announced.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Instant of the most recently received byte, for idle detection.
    pub fn last_received(&self) -> Instant {
        *self.pipes.last_received.lock()
    }

    /// Queues a command, waiting for queue capacity. Used for direct
    /// replies so a session's responses keep their order.
    pub async fn send(&self, cmd: ServerCommand) -> Result<(), TransportError> {
        self.pipes.send(cmd).await
    }

    /// Queues a command without waiting; a full queue drops the frame.
    /// Used for broadcasts, which are best-effort per recipient.
    pub fn try_send(&self, cmd: ServerCommand) -> Result<(), TransportError> {
        self.pipes.try_send(cmd)
    }

    /// Tears both directions down. Queued outbound frames may be lost.
    pub fn shutdown(&self) {
        self.pipes.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// The client's end of a connection: sends [`ClientCommand`]s, receives
/// [`ServerCommand`]s. Powers the integration suites and client tooling.
pub struct ClientStream {
    version: u8,
    pipes: Pipes<ClientCommand>,
}

impl ClientStream {
    /// Performs the client side of the handshake: writes the version byte,
    /// then starts the framing tasks.
    pub async fn connect<S>(
        mut io: S,
        version: u8,
    ) -> Result<(Self, mpsc::Receiver<ServerCommand>), TransportError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        io.write_u8(version).await?;
        io.flush().await?;
        let (pipes, incoming) = spawn_pipes::<S, ClientCommand, ServerCommand>(io);
        Ok((Self { version, pipes }, incoming))
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub async fn send(&self, cmd: ClientCommand) -> Result<(), TransportError> {
        self.pipes.send(cmd).await
    }

    pub fn shutdown(&self) {
        self.pipes.shutdown();
    }
}
