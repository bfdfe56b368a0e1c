//! Byte stream transport and the pluggable security layer.
//!
//! Connections run over any `AsyncRead + AsyncWrite` stream. A
//! [`TransportSecurity`] provider wraps freshly connected or accepted TCP
//! streams, typically with TLS (IEC 62351-3). No provider is built in.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Type-erased byte stream.
pub type BoxedStream = Box<dyn ByteStream>;

/// Security provider that secures TCP streams before protocol traffic starts.
#[async_trait]
pub trait TransportSecurity: Send + Sync {
    /// Secure an outgoing stream. `server_name` is the host the master dialed.
    async fn connect(&self, stream: TcpStream, server_name: &str) -> io::Result<BoxedStream>;

    /// Secure an accepted stream.
    async fn accept(&self, stream: TcpStream) -> io::Result<BoxedStream>;
}

/// Apply the optional security provider to an outgoing stream.
pub(crate) async fn secure_connect(
    security: Option<&dyn TransportSecurity>,
    stream: TcpStream,
    server_name: &str,
) -> io::Result<BoxedStream> {
    match security {
        Some(provider) => provider.connect(stream, server_name).await,
        None => Ok(Box::new(stream)),
    }
}

/// Apply the optional security provider to an accepted stream.
pub(crate) async fn secure_accept(
    security: Option<&dyn TransportSecurity>,
    stream: TcpStream,
) -> io::Result<BoxedStream> {
    match security {
        Some(provider) => provider.accept(stream).await,
        None => Ok(Box::new(stream)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct CountingSecurity {
        connects: AtomicUsize,
        accepts: AtomicUsize,
    }

    #[async_trait]
    impl TransportSecurity for CountingSecurity {
        async fn connect(&self, stream: TcpStream, _server_name: &str) -> io::Result<BoxedStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(stream))
        }

        async fn accept(&self, stream: TcpStream) -> io::Result<BoxedStream> {
            self.accepts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(stream))
        }
    }

    #[tokio::test]
    async fn test_security_wraps_both_sides() {
        let security = Arc::new(CountingSecurity::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_security = security.clone();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = secure_accept(Some(server_security.as_ref()), stream)
                .await
                .unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut stream = secure_connect(Some(security.as_ref()), stream, "localhost")
            .await
            .unwrap();
        stream.write_all(&[1, 2, 3, 4]).await.unwrap();

        assert_eq!(server.await.unwrap(), [1, 2, 3, 4]);
        assert_eq!(security.connects.load(Ordering::SeqCst), 1);
        assert_eq!(security.accepts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plain_stream_without_provider() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });

        let stream = TcpStream::connect(addr).await.unwrap();
        assert!(secure_connect(None, stream, "localhost").await.is_ok());
        assert!(secure_accept(None, accept.await.unwrap()).await.is_ok());
    }
}
