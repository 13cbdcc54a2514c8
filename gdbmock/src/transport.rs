/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::UnixListener;
use tokio::net::UnixStream;

use crate::error::Error;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where a mock server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Bind to and listen on the given socket address. Port `0` picks an
    /// ephemeral port.
    Addr(SocketAddr),

    /// Bind to and listen on the given unix domain socket. This path must not
    /// exist, otherwise the bind will fail with `EADDRINUSE`.
    Path(PathBuf),
}

impl Endpoint {
    /// Loopback with an ephemeral port.
    pub fn loopback() -> Self {
        Self::from(0u16)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::Addr(addr)
    }
}

impl From<PathBuf> for Endpoint {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<u16> for Endpoint {
    fn from(port: u16) -> Self {
        Self::Addr(([127, 0, 0, 1], port).into())
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// `host:port` for TCP, `unix:<path>` for a unix domain socket.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Self::Path(PathBuf::from(path)));
        }
        s.parse::<SocketAddr>()
            .map(Self::Addr)
            .map_err(|_| Error::InvalidUrl(s.to_owned()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Addr(addr) => write!(f, "{}", addr),
            Self::Path(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Address a client connects to, as found in a connect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectUrl {
    /// `connect://<host>:<port>`
    Tcp { host: String, port: u16 },
    /// `unix-connect://<path>`
    Unix(PathBuf),
}

impl ConnectUrl {
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Tcp { host, .. } => Some(host),
            Self::Unix(_) => None,
        }
    }
}

impl FromStr for ConnectUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidUrl(s.to_owned());
        if let Some(path) = s.strip_prefix("unix-connect://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let rest = s.strip_prefix("connect://").ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self::Tcp {
            host: host.to_owned(),
            port: port.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for ConnectUrl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => {
                write!(f, "connect://[{}]:{}", host, port)
            }
            Self::Tcp { host, port } => write!(f, "connect://{}:{}", host, port),
            Self::Unix(path) => write!(f, "unix-connect://{}", path.display()),
        }
    }
}

/// One accepted (or established) byte stream, split in halves.
pub struct Connection {
    pub reader: BoxReader,
    pub writer: BoxWriter,
    pub peer: String,
}

impl Connection {
    fn from_tcp(stream: TcpStream, peer: String) -> Self {
        let (reader, writer) = stream.into_split();
        Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        }
    }

    fn from_unix(stream: UnixStream, peer: String) -> Self {
        let (reader, writer) = stream.into_split();
        Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer,
        }
    }

    /// Connects to a server given its connect URL.
    pub async fn connect(url: &ConnectUrl) -> Result<Self, Error> {
        let connect_err = |source| Error::Connect {
            url: url.to_string(),
            source,
        };
        match url {
            ConnectUrl::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(connect_err)?;
                stream.set_nodelay(true).map_err(connect_err)?;
                Ok(Self::from_tcp(stream, url.to_string()))
            }
            ConnectUrl::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(connect_err)?;
                Ok(Self::from_unix(stream, url.to_string()))
            }
        }
    }
}

enum Socket {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

/// A bound listening socket that hands out exactly one connection.
pub struct Listener {
    socket: Option<Socket>,
    url: ConnectUrl,
    local_addr: Option<SocketAddr>,
}

fn bind_tcp(addr: SocketAddr) -> io::Result<TcpListener> {
    // NOTE: `tokio::net::TcpListener::bind` is async; binding through std keeps
    // the bound port known by the time `bind` returns.
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    let listener = std::os::unix::net::UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    UnixListener::from_std(listener)
}

impl Listener {
    /// Binds to `endpoint`. Must be called from within a tokio runtime.
    pub fn bind(endpoint: &Endpoint) -> Result<Self, Error> {
        let bind_err = |source| Error::Bind {
            endpoint: endpoint.to_string(),
            source,
        };
        match endpoint {
            Endpoint::Addr(addr) => {
                let listener = bind_tcp(*addr).map_err(bind_err)?;
                let local_addr = listener.local_addr().map_err(bind_err)?;
                let host = if local_addr.ip().is_unspecified() {
                    "localhost".to_owned()
                } else {
                    local_addr.ip().to_string()
                };
                Ok(Listener {
                    socket: Some(Socket::Tcp(listener)),
                    url: ConnectUrl::Tcp {
                        host,
                        port: local_addr.port(),
                    },
                    local_addr: Some(local_addr),
                })
            }
            Endpoint::Path(path) => {
                let listener = bind_unix(path).map_err(bind_err)?;
                Ok(Listener {
                    socket: Some(Socket::Unix(listener, path.clone())),
                    url: ConnectUrl::Unix(path.clone()),
                    local_addr: None,
                })
            }
        }
    }

    /// The bound port, `None` for unix domain sockets.
    pub fn port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connect_url(&self) -> &ConnectUrl {
        &self.url
    }

    /// Waits for the one client this listener serves. The listening socket is
    /// released once a client is accepted.
    pub async fn accept(&mut self) -> Result<Connection, Error> {
        let conn = match self.socket.as_ref().ok_or(Error::ServerNotStarted)? {
            Socket::Tcp(listener) => {
                let (stream, client_addr) = listener
                    .accept()
                    .await
                    .map_err(|source| Error::Accept { source })?;
                let _ = stream.set_nodelay(true);
                Connection::from_tcp(stream, client_addr.to_string())
            }
            Socket::Unix(listener, path) => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(|source| Error::Accept { source })?;
                Connection::from_unix(stream, path.display().to_string())
            }
        };
        tracing::info!("Accepting client connection: {}", conn.peer);
        self.close();
        Ok(conn)
    }

    /// Releases the listening socket. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(Socket::Unix(_, path)) = self.socket.take() {
            let _ = std::fs::remove_file(path);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_none()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}
