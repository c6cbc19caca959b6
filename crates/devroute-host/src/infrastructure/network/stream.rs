//! Opens a client stream to the guest over TCP or vsock.

use std::io;

use devroute_core::{split_stream, MessageReader, MessageWriter, StreamAddress};
use tokio::net::TcpStream;

/// Connects to `address` and splits the stream into channel halves.
///
/// # Errors
///
/// Returns the underlying I/O error if the connection cannot be opened.  On
/// platforms without vsock support a vsock address fails with
/// [`io::ErrorKind::Unsupported`].
pub async fn connect(address: &StreamAddress) -> io::Result<(MessageReader, MessageWriter)> {
    match *address {
        StreamAddress::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(split_stream(stream))
        }
        StreamAddress::Vsock { cid, port } => connect_vsock(cid, port).await,
    }
}

#[cfg(target_os = "linux")]
async fn connect_vsock(cid: u32, port: u32) -> io::Result<(MessageReader, MessageWriter)> {
    let stream = tokio_vsock::VsockStream::connect(tokio_vsock::VsockAddr::new(cid, port)).await?;
    Ok(split_stream(stream))
}

#[cfg(not(target_os = "linux"))]
async fn connect_vsock(_cid: u32, _port: u32) -> io::Result<(MessageReader, MessageWriter)> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "vsock is only available on Linux",
    ))
}
