//! Persistent TCP connections to the configured SIP edge.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{split, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use super::{Packet, SipTransport, StreamingDecoder, Transport, TransportEvent, TransportKind, TransportPacket, TransportTx};
use crate::error::{Error, Result};

type TcpWrite = Arc<Mutex<WriteHalf<TcpStream>>>;

#[derive(Clone)]
/// TCP transport implementation.
pub struct TcpTransport {
    /// The transport local addr.
    addr: SocketAddr,
    /// The transport remote addr.
    remote_addr: SocketAddr,

    /// The tcp writer.
    write: TcpWrite,

    /// How long a blocked write may stall before the link counts as dead.
    write_timeout: Duration,
}

#[async_trait::async_trait]
impl SipTransport for TcpTransport {
    async fn send(&self, buf: &[u8]) -> Result<usize> {
        let mut writer = time::timeout(self.write_timeout, self.write.lock())
            .await
            .map_err(|_| Error::TransportDown(self.remote_addr))?;

        let write = async {
            writer.write_all(buf).await?;
            writer.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| Error::TransportDown(self.remote_addr))??;

        Ok(buf.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.addr.to_string())
    }

    fn reliable(&self) -> bool {
        true
    }

    fn secure(&self) -> bool {
        false
    }
}

/// Opens persistent TCP connections towards a SIP edge.
#[derive(Clone, Copy)]
pub struct TcpConnector {
    write_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector with the given write timeout.
    pub fn new(write_timeout: Duration) -> Self {
        Self { write_timeout }
    }

    /// Connects to the given remote address and spawns the read task.
    ///
    /// The returned transport is full duplex: writes go through
    /// [`Transport::send`], everything read from the socket is framed by
    /// [`StreamingDecoder`] and handed to `sender` as packet events. When the
    /// peer closes the stream a [`TransportEvent::Closed`] is emitted and the
    /// read task ends.
    pub async fn connect(&self, addr: SocketAddr, sender: TransportTx) -> Result<Transport> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;

        let (read, write) = split(stream);
        let write = Arc::new(Mutex::new(write));

        let transport = Transport::new(TcpTransport {
            addr: local_addr,
            remote_addr,
            write,
            write_timeout: self.write_timeout,
        });

        log::debug!("SIP TCP transport connected to {}", remote_addr);
        sender.send(TransportEvent::Created(transport.clone())).await?;

        let reader = FramedRead::new(read, StreamingDecoder);
        tokio::spawn(Self::stream_read(reader, transport.clone(), sender));

        Ok(transport)
    }

    async fn stream_read(
        mut reader: FramedRead<tokio::io::ReadHalf<TcpStream>, StreamingDecoder>,
        transport: Transport,
        sender: TransportTx,
    ) -> Result<()> {
        let addr = transport.remote_addr();
        let key = transport.key();

        loop {
            match reader.next().await {
                Some(Ok(payload)) => {
                    let packet = Packet {
                        payload,
                        addr,
                        time: SystemTime::now(),
                    };
                    let msg = TransportPacket {
                        transport: transport.clone(),
                        packet,
                    };

                    sender.send(TransportEvent::Packet(msg)).await?;
                }
                Some(Err(err)) => {
                    log::warn!("Read error on transport to {}: {:#}", addr, err);
                    sender.send(TransportEvent::Closed(key)).await?;
                    return Err(Error::Io(err));
                }
                None => {
                    log::debug!("Transport to {} closed by peer", addr);
                    sender.send(TransportEvent::Closed(key)).await?;
                    return Ok(());
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    const MSG_TEST: &[u8] = b"REGISTER sip:registrar.biloxi.com SIP/2.0\r\n\
    Via: SIP/2.0/TCP bobspc.biloxi.com:5060;branch=z9hG4bKnashds7\r\n\
    Max-Forwards: 70\r\n\
    To: Bob <sip:bob@biloxi.com>\r\n\
    From: Bob <sip:bob@biloxi.com>;tag=456248\r\n\
    Call-ID: 843817637684230@998sdasdh09\r\n\
    CSeq: 1826 REGISTER\r\n\
    Contact: <sip:bob@192.0.2.4>\r\n\
    Expires: 7200\r\n\
    Content-Length: 0\r\n\r\n";

    #[tokio::test]
    async fn smoke() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);

        let connector = TcpConnector::new(Duration::from_secs(10));
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let transport = connector.connect(server_addr, tx).await.unwrap();

        assert_matches!(rx.recv().await.unwrap(), TransportEvent::Created(_));

        let (mut server_stream, _) = accept.await.unwrap();
        server_stream.write_all(MSG_TEST).await.unwrap();
        server_stream.flush().await.unwrap();

        let TransportEvent::Packet(TransportPacket { packet, .. }) = rx.recv().await.unwrap() else {
            unreachable!();
        };
        assert_eq!(packet.payload.as_ref(), MSG_TEST);

        // Writes from our side land on the server socket.
        transport.send(b"\r\n\r\n").await.unwrap();

        drop(server_stream);
        assert_matches!(rx.recv().await.unwrap(), TransportEvent::Closed(_));
    }
}
