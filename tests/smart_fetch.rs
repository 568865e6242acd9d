//! End-to-end fetch against a scripted git daemon over an in-memory socket:
//! dispatch by scheme, discovery with capability parsing, full want/have
//! negotiation, and a side-band pack stream with progress routing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use bytes::Bytes;
use git_transport::platform::{ByteChannel, Platform, TcpConnector};
use git_transport::protocol::pktline::{PktDecoder, encode_data, encode_flush};
use git_transport::protocol::types::Pkt;
use git_transport::{FetchOptions, RefStore, Transport, TransportError, open};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex, split};
use tokio::sync::Mutex;

const HEAD_SHA: &str = "8a4f3e0c2b1d5a6978695a4b3c2d1e0f9a8b7c6d";
const MAIN_SHA: &str = "2b1d5a6978695a4b3c2d1e0f9a8b7c6d8a4f3e0c";
const LOCAL_SHA: &str = "1111111111111111111111111111111111111111";

struct OneShotConnector {
    channel: Mutex<Option<ByteChannel>>,
}

#[async_trait]
impl TcpConnector for OneShotConnector {
    async fn connect(&self, _hostname: &str, _port: u16) -> Result<ByteChannel, TransportError> {
        self.channel
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::transport("already connected"))
    }
}

struct LocalRefs;

#[async_trait]
impl RefStore for LocalRefs {
    async fn list_refs(&self, _prefix: &str) -> Result<Vec<(String, String)>, TransportError> {
        Ok(vec![("refs/heads/main".to_string(), LOCAL_SHA.to_string())])
    }

    async fn create_ref(&self, _name: &str, _hash: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

async fn read_frames(stream: &mut DuplexStream, want: usize) -> Vec<Pkt> {
    let mut decoder = PktDecoder::new();
    let mut frames = VecDeque::new();
    let mut buf = [0u8; 4096];
    while frames.len() < want {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed early");
        decoder.push(&buf[..n], &mut frames).unwrap();
    }
    frames.into_iter().collect()
}

fn data_frame(text: &str) -> Vec<u8> {
    encode_data(text.as_bytes()).unwrap().to_vec()
}

/// The scripted remote: answers the preamble with an advertisement, the
/// negotiation with NAK, then a side-band pack stream.
async fn serve(mut socket: DuplexStream) {
    let preamble = read_frames(&mut socket, 1).await;
    assert_eq!(
        preamble,
        vec![Pkt::Data(Bytes::from_static(
            b"git-upload-pack /srv/repo.git\0host=daemon.example.com\0"
        ))]
    );

    let mut advertisement = Vec::new();
    advertisement.extend_from_slice(&data_frame(&format!(
        "{HEAD_SHA} HEAD\0multi_ack thin-pack side-band-64k agent=git/2.40\n"
    )));
    advertisement.extend_from_slice(&data_frame(&format!("{MAIN_SHA} refs/heads/main\n")));
    advertisement.extend_from_slice(&encode_flush());
    socket.write_all(&advertisement).await.unwrap();

    // want line, flush, have line, done
    let negotiation = read_frames(&mut socket, 4).await;
    assert_eq!(
        negotiation,
        vec![
            Pkt::Data(Bytes::from(format!(
                "want {MAIN_SHA} side-band-64k thin-pack\n"
            ))),
            Pkt::Flush,
            Pkt::Data(Bytes::from(format!("have {LOCAL_SHA}\n"))),
            Pkt::Data(Bytes::from_static(b"done\n")),
        ]
    );

    let mut response = Vec::new();
    response.extend_from_slice(&data_frame("NAK\n"));
    response.extend_from_slice(&encode_data(b"\x02Counting objects: 2, done.\n").unwrap());
    response.extend_from_slice(&encode_data(b"\x01PACK....first").unwrap());
    response.extend_from_slice(&encode_data(b"\x01second....").unwrap());
    response.extend_from_slice(&encode_flush());
    socket.write_all(&response).await.unwrap();
}

#[tokio::test]
async fn discover_then_fetch_over_the_git_scheme() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let (client_end, server_end) = duplex(64 * 1024);
    let (reader, writer) = split(client_end);
    let platform = Platform::new().with_tcp(OneShotConnector {
        channel: Mutex::new(Some(ByteChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })),
    });
    let server = tokio::spawn(serve(server_end));

    let mut transport = open(&platform, "git://daemon.example.com/srv/repo.git").unwrap();

    let advertisement = transport.discover().await.unwrap();
    assert_eq!(advertisement.refs.len(), 2);
    assert_eq!(advertisement.refs["HEAD"], HEAD_SHA);
    assert_eq!(advertisement.refs["refs/heads/main"], MAIN_SHA);
    assert!(advertisement.caps.contains("side-band-64k"));
    assert_eq!(advertisement.caps.value("agent"), Some("git/2.40"));

    let progress: Arc<StdMutex<Vec<Bytes>>> = Arc::new(StdMutex::new(Vec::new()));
    let progress_log = progress.clone();
    let opts = FetchOptions::new(vec![MAIN_SHA.to_string()])
        .caps(["side-band-64k", "thin-pack"])
        .deline(true)
        .on_progress(move |text| progress_log.lock().unwrap().push(text));

    let reader = transport.fetch(&LocalRefs, opts).await.unwrap().unwrap();

    let mut pack = Vec::new();
    while let Some(chunk) = reader.read().await.unwrap() {
        pack.extend_from_slice(&chunk);
    }
    assert_eq!(pack, b"PACK....firstsecond....");
    assert_eq!(
        *progress.lock().unwrap(),
        vec![Bytes::from_static(b"Counting objects: 2, done.\n")]
    );

    server.await.unwrap();
    transport.close().await.unwrap();
}

#[tokio::test]
async fn fetch_with_no_wants_completes_without_a_pack_stream() {
    let (client_end, mut server_end) = duplex(1024);
    let (reader, writer) = split(client_end);
    let platform = Platform::new().with_tcp(OneShotConnector {
        channel: Mutex::new(Some(ByteChannel {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })),
    });

    let mut transport = open(&platform, "git://daemon.example.com/srv/repo.git").unwrap();

    let server = tokio::spawn(async move {
        let preamble = read_frames(&mut server_end, 1).await;
        assert!(matches!(&preamble[0], Pkt::Data(_)));

        let mut advertisement = Vec::new();
        advertisement.extend_from_slice(&data_frame(&format!("{HEAD_SHA} HEAD\0multi_ack\n")));
        advertisement.extend_from_slice(&encode_flush());
        server_end.write_all(&advertisement).await.unwrap();

        // the empty-wants close-out: flush and done, nothing else
        let frames = read_frames(&mut server_end, 2).await;
        assert_eq!(frames[0], Pkt::Flush);
        assert_eq!(frames[1], Pkt::Data(Bytes::from_static(b"done\n")));
        server_end
    });

    transport.discover().await.unwrap();
    let reader = transport
        .fetch(&LocalRefs, FetchOptions::default())
        .await
        .unwrap();
    assert!(reader.is_none());
    server.await.unwrap();
}
