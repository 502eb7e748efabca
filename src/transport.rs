//! Socket transport: TCP or Unix domain socket, split into owned
//! read/write halves so the channel runtime's receive loop and the
//! outbound API's send path can operate independently (spec.md §5).

use tokio::io::AsyncWriteExt;
use tokio::net::{tcp, unix, TcpStream, UnixStream};

use crate::config::Endpoint;
use crate::error::Result;

/// Owned read half of either transport kind.
pub enum ReadHalf {
    Tcp(tcp::OwnedReadHalf),
    Unix(unix::OwnedReadHalf),
}

/// Owned write half of either transport kind.
pub enum WriteHalf {
    Tcp(tcp::OwnedWriteHalf),
    Unix(unix::OwnedWriteHalf),
}

impl ReadHalf {
    /// Waits until the socket has data (or EOF/error) to read, without
    /// consuming anything — the non-blocking "bytes available" query used
    /// by the top-level poller (spec.md §4.6 `process`).
    pub async fn readable(&self) -> std::io::Result<()> {
        match self {
            ReadHalf::Tcp(r) => r.readable().await,
            ReadHalf::Unix(r) => r.readable().await,
        }
    }

    /// Non-blocking read; `Ok(0)` means the peer closed its write half.
    pub fn try_read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ReadHalf::Tcp(r) => r.try_read(buf),
            ReadHalf::Unix(r) => r.try_read(buf),
        }
    }
}

impl WriteHalf {
    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            WriteHalf::Tcp(w) => w.write_all(data).await,
            WriteHalf::Unix(w) => w.write_all(data).await,
        }
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            WriteHalf::Tcp(w) => w.shutdown().await,
            WriteHalf::Unix(w) => w.shutdown().await,
        }
    }

    /// Toggles Nagle's algorithm; a no-op on Unix sockets, which have no
    /// equivalent. Used by the graceful-disconnect sequence (spec.md §4.3)
    /// to force a flush of the disconnecting packet.
    pub fn set_nodelay(&self, enabled: bool) -> std::io::Result<()> {
        match self {
            WriteHalf::Tcp(w) => w.as_ref().set_nodelay(enabled),
            WriteHalf::Unix(_) => Ok(()),
        }
    }
}

/// Opens a fresh socket to `endpoint` and enables `TCP_NODELAY` +
/// `TCP_QUICKACK` on TCP transports once connected (spec.md §4.2: "TCP
/// sockets receive `TCP_NODELAY` and `TCP_QUICKACK`").
pub async fn connect(endpoint: &Endpoint) -> Result<(ReadHalf, WriteHalf)> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let ip: std::net::Ipv4Addr = host.parse().map_err(|_| {
                crate::error::SpiceError::Configuration(format!("invalid IPv4 host {host:?}"))
            })?;
            let stream = TcpStream::connect((ip, *port)).await?;
            tune_tcp(&stream)?;
            let (r, w) = stream.into_split();
            Ok((ReadHalf::Tcp(r), WriteHalf::Tcp(w)))
        }
        Endpoint::Unix { path } => {
            let stream = UnixStream::connect(path).await?;
            let (r, w) = stream.into_split();
            Ok((ReadHalf::Unix(r), WriteHalf::Unix(w)))
        }
    }
}

fn tune_tcp(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    #[cfg(target_os = "linux")]
    {
        sock_ref.set_quickack(true)?;
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = sock_ref;
    }
    Ok(())
}
