//! Per-transfer workers.
//!
//! Each `GET` or `ADD` spawns one of these as an isolated
//! `tokio::task`: it opens an ephemeral TCP listener, announces the
//! port over the command channel, waits up to the configured timeout
//! for the peer to connect, and then streams exactly one file in one
//! direction. A worker never sees the dispatcher's `Inventory`
//! mutably, so a stuck or slow peer can never block command-channel
//! dispatch or another transfer.

use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::multicast::MulticastEndpoint;
use crate::pending::{PendingGuard, PendingUploads};
use crate::wire::{self, tags};

/// Mode new upload files are created with.
const UPLOAD_FILE_MODE: u32 = 0o644;
/// Internal copy buffer size for the send path.
const COPY_BUF: usize = 64 * 1024;

/// Bind a TCP listener on an OS-assigned port and report that port.
async fn open_ephemeral_listener() -> Result<(TcpListener, u16), TransferError> {
    let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Wait up to `timeout_secs` for exactly one peer to connect, or until
/// `cancel` fires (shutdown takes priority over the handshake timeout).
async fn wait_for_peer(
    listener: &TcpListener,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<TcpStream, TransferError> {
    let dur = Duration::from_secs(timeout_secs);
    tokio::select! {
        result = timeout(dur, listener.accept()) => match result {
            Ok(Ok((stream, _peer))) => Ok(stream),
            Ok(Err(e)) => Err(TransferError::Accept(e)),
            Err(_) => Err(TransferError::HandshakeTimeout(dur)),
        },
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
    }
}

/// Send path: stream a local file to the peer that requested it with
/// `GET`. Any failure is logged and stops this task only — nothing is
/// created or deleted on disk for a send.
pub async fn run_send_worker(
    cmd: Arc<MulticastEndpoint>,
    peer: std::net::SocketAddr,
    seq: u64,
    basename: String,
    file_path: PathBuf,
    timeout_secs: u64,
    cancel: CancellationToken,
) {
    if let Err(e) =
        send_worker_inner(&cmd, peer, seq, &basename, &file_path, timeout_secs, &cancel).await
    {
        tracing::warn!(basename = %basename, peer = %peer, error = %e, "send worker failed");
    }
}

async fn send_worker_inner(
    cmd: &MulticastEndpoint,
    peer: std::net::SocketAddr,
    seq: u64,
    basename: &str,
    file_path: &Path,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let (listener, port) = open_ephemeral_listener().await?;

    let handshake = wire::encode_complex(tags::CONNECT_ME, seq, port as u64, basename.as_bytes());
    cmd.send_to(&handshake, peer).await?;

    let mut stream = wait_for_peer(&listener, timeout_secs, cancel).await?;

    let mut file = tokio::fs::File::open(file_path)
        .await
        .map_err(|source| TransferError::Open {
            path: file_path.to_path_buf(),
            source,
        })?;

    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let n = tokio::select! {
            result = tokio::io::AsyncReadExt::read(&mut file, &mut buf) => result?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };
        if n == 0 {
            break;
        }
        tokio::select! {
            result = tokio::io::AsyncWriteExt::write_all(&mut stream, &buf[..n]) => result?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        }
    }
    tokio::io::AsyncWriteExt::shutdown(&mut stream).await?;

    tracing::info!(basename = %basename, peer = %peer, "send worker completed");
    Ok(())
}

/// Receive path: accept exactly `expected_len` bytes from the peer
/// that announced an `ADD` and write them to `dest_path`. On any
/// failure the partial file is deleted. `pending` is the shared
/// `PendingUploads` set; a [`PendingGuard`] keeps the destination path
/// registered for the duration of the transfer regardless of outcome.
pub async fn run_receive_worker(
    cmd: Arc<MulticastEndpoint>,
    peer: std::net::SocketAddr,
    seq: u64,
    dest_path: PathBuf,
    expected_len: u64,
    timeout_secs: u64,
    pending: Arc<PendingUploads>,
    cancel: CancellationToken,
) {
    if let Err(e) = receive_worker_inner(
        &cmd,
        peer,
        seq,
        &dest_path,
        expected_len,
        timeout_secs,
        &pending,
        &cancel,
    )
    .await
    {
        tracing::warn!(path = %dest_path.display(), peer = %peer, error = %e, "receive worker failed; deleting partial file");
        if let Err(remove_err) = tokio::fs::remove_file(&dest_path).await {
            if remove_err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %dest_path.display(), error = %remove_err, "failed to delete partial upload");
            }
        }
    }
}

async fn receive_worker_inner(
    cmd: &MulticastEndpoint,
    peer: std::net::SocketAddr,
    seq: u64,
    dest_path: &Path,
    expected_len: u64,
    timeout_secs: u64,
    pending: &PendingUploads,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let (listener, port) = open_ephemeral_listener().await?;

    let handshake = wire::encode_complex(tags::CAN_ADD, seq, port as u64, b"");
    cmd.send_to(&handshake, peer).await?;

    let mut stream = wait_for_peer(&listener, timeout_secs, cancel).await?;

    // Only register the path as pending once the peer has actually
    // connected and we are about to start writing to disk — a
    // handshake timeout means no file was ever opened. create_new
    // rejects a pre-existing file outright rather than overwriting it.
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(UPLOAD_FILE_MODE)
        .open(dest_path)
        .await
        .map_err(|source| TransferError::Open {
            path: dest_path.to_path_buf(),
            source,
        })?;
    let guard = PendingGuard::new(pending, dest_path.to_path_buf());

    let mut remaining = expected_len;
    let mut buf = vec![0u8; COPY_BUF];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = tokio::select! {
            result = stream.read(&mut buf[..want]) => result?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };
        if n == 0 {
            return Err(TransferError::ShortUpload {
                expected: expected_len,
                got: expected_len - remaining,
            });
        }
        let write_result = tokio::select! {
            result = tokio::io::AsyncWriteExt::write_all(&mut file, &buf[..n]) => result,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };
        write_result.map_err(|e| {
            if e.kind() == std::io::ErrorKind::WriteZero {
                TransferError::ShortWrite {
                    path: dest_path.to_path_buf(),
                    wrote: 0,
                    want: n,
                }
            } else {
                TransferError::Io(e)
            }
        })?;
        remaining -= n as u64;
    }

    drop(guard);
    tracing::info!(path = %dest_path.display(), peer = %peer, bytes = expected_len, "receive worker completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn send_worker_streams_file_to_connecting_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let cmd_port = 45_241;
        let cmd = match MulticastEndpoint::open(Ipv4Addr::new(239, 10, 11, 13), cmd_port) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("skipping: multicast unavailable: {e}");
                return;
            }
        };

        let client = tokio::net::UdpSocket::bind("0.0.0.0:0").await.unwrap();
        client.connect(("127.0.0.1", cmd_port)).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let worker = tokio::spawn(run_send_worker(
            cmd.clone(),
            client_addr,
            7,
            "note.txt".to_string(),
            path.clone(),
            5,
            CancellationToken::new(),
        ));

        let mut buf = vec![0u8; 512];
        let n = client.recv(&mut buf).await.unwrap();
        let decoded = wire::decode_complex(&buf[..n]).unwrap();
        assert!(decoded.tag.matches("CONNECT_ME"));
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.data, b"note.txt");
        let port = decoded.param as u16;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"hello world");

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn receive_worker_writes_exact_announced_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploaded.bin");

        let cmd_port = 45_242;
        let cmd = match MulticastEndpoint::open(Ipv4Addr::new(239, 10, 11, 13), cmd_port) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("skipping: multicast unavailable: {e}");
                return;
            }
        };
        let pending = Arc::new(PendingUploads::new());

        let client = tokio::net::UdpSocket::bind("0.0.0.0:0").await.unwrap();
        client.connect(("127.0.0.1", cmd_port)).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let worker = tokio::spawn(run_receive_worker(
            cmd.clone(),
            client_addr,
            1,
            path.clone(),
            10,
            5,
            pending.clone(),
            CancellationToken::new(),
        ));

        let mut buf = vec![0u8; 512];
        let n = client.recv(&mut buf).await.unwrap();
        let decoded = wire::decode_complex(&buf[..n]).unwrap();
        assert!(decoded.tag.matches("CAN_ADD"));
        assert!(decoded.data.is_empty());
        let port = decoded.param as u16;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"0123456789")
            .await
            .unwrap();
        drop(stream);

        worker.await.unwrap();

        let written = tokio::fs::read(&path).await.unwrap();
        assert_eq!(written, b"0123456789");
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn receive_worker_deletes_partial_file_on_short_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploaded.bin");

        let cmd_port = 45_243;
        let cmd = match MulticastEndpoint::open(Ipv4Addr::new(239, 10, 11, 13), cmd_port) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("skipping: multicast unavailable: {e}");
                return;
            }
        };
        let pending = Arc::new(PendingUploads::new());

        let client = tokio::net::UdpSocket::bind("0.0.0.0:0").await.unwrap();
        client.connect(("127.0.0.1", cmd_port)).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let worker = tokio::spawn(run_receive_worker(
            cmd.clone(),
            client_addr,
            1,
            path.clone(),
            10,
            5,
            pending.clone(),
            CancellationToken::new(),
        ));

        let mut buf = vec![0u8; 512];
        let n = client.recv(&mut buf).await.unwrap();
        let decoded = wire::decode_complex(&buf[..n]).unwrap();
        let port = decoded.param as u16;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"12345").await.unwrap();
        drop(stream); // close early: only 5 of 10 bytes sent

        worker.await.unwrap();

        assert!(!path.exists());
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn receive_worker_refuses_preexisting_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("already-there.bin");
        tokio::fs::write(&path, b"not served by the inventory")
            .await
            .unwrap();

        let cmd_port = 45_244;
        let cmd = match MulticastEndpoint::open(Ipv4Addr::new(239, 10, 11, 13), cmd_port) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("skipping: multicast unavailable: {e}");
                return;
            }
        };
        let pending = Arc::new(PendingUploads::new());

        let client = tokio::net::UdpSocket::bind("0.0.0.0:0").await.unwrap();
        client.connect(("127.0.0.1", cmd_port)).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let worker = tokio::spawn(run_receive_worker(
            cmd.clone(),
            client_addr,
            1,
            path.clone(),
            10,
            5,
            pending.clone(),
            CancellationToken::new(),
        ));

        let mut buf = vec![0u8; 512];
        let n = client.recv(&mut buf).await.unwrap();
        let decoded = wire::decode_complex(&buf[..n]).unwrap();
        let port = decoded.param as u16;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"0123456789")
            .await
            .unwrap();
        drop(stream);

        worker.await.unwrap();

        // create_new must refuse to touch the pre-existing file's contents.
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents, b"not served by the inventory");
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn receive_worker_aborts_and_cleans_up_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploaded.bin");

        let cmd_port = 45_245;
        let cmd = match MulticastEndpoint::open(Ipv4Addr::new(239, 10, 11, 13), cmd_port) {
            Ok(c) => Arc::new(c),
            Err(e) => {
                eprintln!("skipping: multicast unavailable: {e}");
                return;
            }
        };
        let pending = Arc::new(PendingUploads::new());
        let cancel = CancellationToken::new();

        let client = tokio::net::UdpSocket::bind("0.0.0.0:0").await.unwrap();
        client.connect(("127.0.0.1", cmd_port)).await.unwrap();
        let client_addr = client.local_addr().unwrap();

        let worker = tokio::spawn(run_receive_worker(
            cmd.clone(),
            client_addr,
            1,
            path.clone(),
            10,
            5,
            pending.clone(),
            cancel.clone(),
        ));

        let mut buf = vec![0u8; 512];
        let n = client.recv(&mut buf).await.unwrap();
        let decoded = wire::decode_complex(&buf[..n]).unwrap();
        let port = decoded.param as u16;

        // Connect but send only part of the announced length, then cancel
        // before the rest arrives — the worker must stop promptly and
        // leave no partial file or pending entry behind.
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"12345")
            .await
            .unwrap();
        cancel.cancel();

        worker.await.unwrap();

        assert!(!path.exists());
        assert_eq!(pending.len(), 0);
    }
}
