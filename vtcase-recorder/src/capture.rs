//! Per-connection proxy worker: relays bytes between scanner and target
//! immediately (the proxy must stay transparent and live), while framing
//! each direction into discrete HTTP messages and pairing requests with the
//! response that follows them.
//!
//! Grounded on `handle_proxy_client`/`parse_and_store_data_pair` in
//! `original_source/vts-qa-recorder/vts-recording/recorder.py`.

use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Bounds how large an unframeable buffer is allowed to grow before the
/// framer gives up and falls back to plain relaying (protects against a
/// pathological or non-HTTP stream accumulating without bound).
const MAX_FRAME_BUFFER: usize = 16 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("io error relaying connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to connect to target {0}: {1}")]
    Connect(SocketAddr, #[source] std::io::Error),
}

/// One matched request/response pair as captured off the wire, not yet
/// decompressed or canonicalized.
#[derive(Clone, Debug)]
pub struct CapturedExchange {
    pub request: Vec<u8>,
    pub response: Vec<u8>,
    pub captured_at: SystemTime,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameMode {
    Request,
    Response,
}

fn try_parse(mode: FrameMode, buf: &[u8]) -> Option<usize> {
    let result = match mode {
        FrameMode::Request => vtcase_http::try_parse_request(buf).map(|o| o.map(|(_, len)| len)),
        FrameMode::Response => vtcase_http::try_parse_response(buf).map(|o| o.map(|(_, len)| len)),
    };
    result.unwrap_or(None)
}

/// Reads from `reader`, writes every byte straight through to `writer`, and
/// sends each complete framed HTTP message's raw bytes on `tx` as it
/// becomes whole.
async fn copy_and_frame<R, W>(
    mut reader: R,
    mut writer: W,
    mode: FrameMode,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), CaptureError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&chunk[..n]).await?;
        buf.extend_from_slice(&chunk[..n]);

        loop {
            match try_parse(mode, &buf) {
                Some(len) if len <= buf.len() => {
                    let message = buf.drain(..len).collect::<Vec<u8>>();
                    if tx.send(message).await.is_err() {
                        return Ok(());
                    }
                }
                _ => break,
            }
        }
        if buf.len() > MAX_FRAME_BUFFER {
            tracing::warn!(mode = ?mode as u8, "frame buffer exceeded cap, dropping unframed bytes");
            buf.clear();
        }
    }
    let _ = writer.shutdown().await;
    Ok(())
}

/// Proxies one accepted connection to `target`, pushing every matched
/// request/response pair onto `sink` as it's captured. Runs until either
/// side closes its half of the connection.
pub async fn handle_connection(
    inbound: TcpStream,
    target: SocketAddr,
    sink: mpsc::Sender<CapturedExchange>,
) -> Result<(), CaptureError> {
    let outbound = TcpStream::connect(target)
        .await
        .map_err(|e| CaptureError::Connect(target, e))?;

    let (inbound_read, inbound_write) = inbound.into_split();
    let (outbound_read, outbound_write) = outbound.into_split();

    let (req_tx, mut req_rx) = mpsc::channel::<Vec<u8>>(32);
    let (resp_tx, mut resp_rx) = mpsc::channel::<Vec<u8>>(32);

    let client_to_server = copy_and_frame(inbound_read, outbound_write, FrameMode::Request, req_tx);
    let server_to_client = copy_and_frame(outbound_read, inbound_write, FrameMode::Response, resp_tx);

    let pairing = async move {
        loop {
            let request = match req_rx.recv().await {
                Some(r) => r,
                None => break,
            };
            let response = match resp_rx.recv().await {
                Some(r) => r,
                None => break,
            };
            if sink
                .send(CapturedExchange {
                    request,
                    response,
                    captured_at: SystemTime::now(),
                })
                .await
                .is_err()
            {
                break;
            }
        }
    };

    let (client_result, server_result, ()) =
        tokio::join!(client_to_server, server_to_client, pairing);
    client_result?;
    server_result?;
    Ok(())
}
