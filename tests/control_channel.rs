use async_trait::async_trait;
use rftpd::auth::{AuthBackend, AuthenticationError, DefaultUser, UserDetail};
use rftpd::storage::{FileStat, FilesystemBackend, Reader, Result as StorageResult, WriteMode, Writer};
use rftpd::ServerBuilder;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug)]
struct EmptyFs;

#[async_trait]
impl FilesystemBackend for EmptyFs {
    async fn resolve(&self, cwd: &Path, path: &str) -> StorageResult<PathBuf> {
        Ok(cwd.join(path))
    }

    async fn open_read(&self, _handle: &Path, _offset: u64) -> StorageResult<Reader> {
        Ok(Box::new(tokio::io::empty()))
    }

    async fn open_write(&self, _handle: &Path, _offset: u64, _mode: WriteMode) -> StorageResult<Writer> {
        Ok(Box::new(tokio::io::sink()))
    }

    async fn list(&self, _handle: &Path) -> StorageResult<Vec<String>> {
        Ok(vec![])
    }

    async fn remove(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn mkdir(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn rmdir(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn rename(&self, _from: &Path, _to: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn stat(&self, _handle: &Path) -> StorageResult<FileStat> {
        Ok(FileStat { is_dir: false, size: 0 })
    }
}

#[derive(Debug)]
struct StaticAuth {
    username: &'static str,
    password: &'static str,
}

#[async_trait]
impl AuthBackend<DefaultUser> for StaticAuth {
    async fn check_user(&self, username: &str) -> bool {
        username == self.username
    }

    async fn check_pass(&self, username: &str, password: &str) -> Result<DefaultUser, AuthenticationError> {
        if username == self.username && password == self.password {
            Ok(DefaultUser(username.to_string()))
        } else {
            Err(AuthenticationError::BadCredentials)
        }
    }

    async fn check_acct(&self, _user: &DefaultUser, _account: &str) -> Result<(), AuthenticationError> {
        Ok(())
    }
}

async fn serve_one_connection() -> (TcpStream, tokio::task::JoinHandle<()>) {
    serve_one_connection_with(EmptyFs, StaticAuth { username: "alice", password: "secret" }).await
}

async fn serve_one_connection_with<Storage, User, Auth>(storage: Storage, auth: Auth) -> (TcpStream, tokio::task::JoinHandle<()>)
where
    Storage: FilesystemBackend + 'static,
    User: UserDetail + 'static,
    Auth: AuthBackend<User> + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move {
        let (stream, remote_addr) = listener.accept().await.unwrap();
        let server = ServerBuilder::new(Arc::new(storage), Arc::new(auth)).build();
        server.service(stream, remote_addr).await;
    });

    let client = TcpStream::connect(addr).await.unwrap();
    (client, accept)
}

#[derive(Debug, Clone)]
struct AcctGatedUser(String);

impl fmt::Display for AcctGatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl UserDetail for AcctGatedUser {
    fn account_required(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct AcctGatedAuth;

#[async_trait]
impl AuthBackend<AcctGatedUser> for AcctGatedAuth {
    async fn check_user(&self, _username: &str) -> bool {
        true
    }

    async fn check_pass(&self, username: &str, _password: &str) -> Result<AcctGatedUser, AuthenticationError> {
        Ok(AcctGatedUser(username.to_string()))
    }

    async fn check_acct(&self, _user: &AcctGatedUser, account: &str) -> Result<(), AuthenticationError> {
        if account == "eng" {
            Ok(())
        } else {
            Err(AuthenticationError::BadAccount)
        }
    }
}

/// An `AsyncRead` that never completes, used to hold a `RETR` transfer task open long enough for
/// a test to interleave an `ABOR` on the control channel.
struct NeverReady;

impl tokio::io::AsyncRead for NeverReady {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

#[derive(Debug)]
struct StuckFs;

#[async_trait]
impl FilesystemBackend for StuckFs {
    async fn resolve(&self, cwd: &Path, path: &str) -> StorageResult<PathBuf> {
        Ok(cwd.join(path))
    }

    async fn open_read(&self, _handle: &Path, _offset: u64) -> StorageResult<Reader> {
        Ok(Box::new(NeverReady))
    }

    async fn open_write(&self, _handle: &Path, _offset: u64, _mode: WriteMode) -> StorageResult<Writer> {
        Ok(Box::new(tokio::io::sink()))
    }

    async fn list(&self, _handle: &Path) -> StorageResult<Vec<String>> {
        Ok(vec![])
    }

    async fn remove(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn mkdir(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn rmdir(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn rename(&self, _from: &Path, _to: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn stat(&self, _handle: &Path) -> StorageResult<FileStat> {
        Ok(FileStat { is_dir: false, size: 0 })
    }
}

/// Records the offset every `open_read` was called with, so the restart-marker idempotence rule
/// can be checked without inspecting any private session state.
#[derive(Debug, Default)]
struct OffsetRecordingFs {
    last_offset: Arc<AtomicU64>,
}

#[async_trait]
impl FilesystemBackend for OffsetRecordingFs {
    async fn resolve(&self, cwd: &Path, path: &str) -> StorageResult<PathBuf> {
        Ok(cwd.join(path))
    }

    async fn open_read(&self, _handle: &Path, offset: u64) -> StorageResult<Reader> {
        self.last_offset.store(offset, Ordering::SeqCst);
        Ok(Box::new(tokio::io::empty()))
    }

    async fn open_write(&self, _handle: &Path, _offset: u64, _mode: WriteMode) -> StorageResult<Writer> {
        Ok(Box::new(tokio::io::sink()))
    }

    async fn list(&self, _handle: &Path) -> StorageResult<Vec<String>> {
        Ok(vec![])
    }

    async fn remove(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn mkdir(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn rmdir(&self, _handle: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn rename(&self, _from: &Path, _to: &Path) -> StorageResult<()> {
        Ok(())
    }

    async fn stat(&self, _handle: &Path) -> StorageResult<FileStat> {
        Ok(FileStat { is_dir: false, size: 0 })
    }
}

/// Pulls the port out of a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv_port(reply: &str) -> u16 {
    let inside = reply.split('(').nth(1).and_then(|s| s.split(')').next()).expect("PASV reply missing address tuple");
    let fields: Vec<u16> = inside.split(',').map(|n| n.trim().parse().expect("non-numeric PASV field")).collect();
    fields[4] * 256 + fields[5]
}

async fn read_reply(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    loop {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf).await.unwrap();
        line.push(buf[0] as char);
        if line.ends_with("\r\n") && (line.len() < 4 || line.as_bytes()[3] != b'-') {
            return line;
        }
    }
}

#[tokio::test]
async fn greets_and_answers_noop_then_quit() {
    let (client, _accept) = serve_one_connection().await;
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let greeting = read_reply(&mut reader).await;
    assert!(greeting.starts_with("220"), "unexpected greeting: {greeting}");

    write_half.write_all(b"NOOP\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("200"), "unexpected NOOP reply: {reply}");

    write_half.write_all(b"QUIT\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("221"), "unexpected QUIT reply: {reply}");
}

#[tokio::test]
async fn rejects_out_of_sequence_commands() {
    let (client, _accept) = serve_one_connection().await;
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_reply(&mut reader).await;

    // PWD is neither a successor of the just-connected state nor login-exempt, so the
    // sequencing check rejects it before the login gate is ever consulted.
    write_half.write_all(b"PWD\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("503"), "expected bad-sequence rejection, got: {reply}");
}

#[tokio::test]
async fn rejects_commands_while_awaiting_account() {
    let (client, _accept) = serve_one_connection_with(EmptyFs, AcctGatedAuth).await;
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_reply(&mut reader).await;

    write_half.write_all(b"USER bob\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("331"), "unexpected USER reply: {reply}");

    write_half.write_all(b"PASS whatever\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("332"), "unexpected PASS reply: {reply}");

    // PASS leaves sequencing unrestricted (any command may follow), so PWD reaches the login
    // gate, which rejects it since the account handshake hasn't completed yet.
    write_half.write_all(b"PWD\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("530"), "expected not-logged-in rejection, got: {reply}");
}

#[tokio::test]
async fn logs_in_with_correct_credentials() {
    let (client, _accept) = serve_one_connection().await;
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_reply(&mut reader).await;

    write_half.write_all(b"USER alice\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("331"), "unexpected USER reply: {reply}");

    write_half.write_all(b"PASS secret\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("230"), "unexpected PASS reply: {reply}");

    write_half.write_all(b"PWD\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("257"), "unexpected PWD reply: {reply}");
}

#[tokio::test]
async fn abor_interrupts_an_in_flight_retr() {
    let (client, _accept) = serve_one_connection_with(StuckFs, StaticAuth { username: "alice", password: "secret" }).await;
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_reply(&mut reader).await;
    write_half.write_all(b"USER alice\r\n").await.unwrap();
    let _ = read_reply(&mut reader).await;
    write_half.write_all(b"PASS secret\r\n").await.unwrap();
    let _ = read_reply(&mut reader).await;

    write_half.write_all(b"PASV\r\n").await.unwrap();
    let pasv_reply = read_reply(&mut reader).await;
    assert!(pasv_reply.starts_with("227"), "unexpected PASV reply: {pasv_reply}");
    let port = parse_pasv_port(&pasv_reply);
    let mut data_conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    write_half.write_all(b"RETR stuck.bin\r\n").await.unwrap();
    let pre_transfer_reply = read_reply(&mut reader).await;
    assert!(pre_transfer_reply.starts_with("150"), "unexpected pre-transfer reply: {pre_transfer_reply}");

    // The data task is blocked forever inside `NeverReady::poll_read`; ABOR must still be read
    // and acted on by the control loop instead of waiting for the transfer to finish.
    write_half.write_all(b"ABOR\r\n").await.unwrap();
    let aborted_reply = read_reply(&mut reader).await;
    assert!(aborted_reply.starts_with("426"), "expected 426 for the interrupted transfer, got: {aborted_reply}");
    let abor_reply = read_reply(&mut reader).await;
    assert!(abor_reply.starts_with("226"), "expected 226 for ABOR itself, got: {abor_reply}");

    // The data channel was force-closed as part of the abort.
    let mut buf = [0u8; 1];
    let n = data_conn.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "data connection should have been closed by the abort");
}

#[tokio::test]
async fn rest_marker_is_cleared_by_an_intervening_non_transfer_command() {
    let offsets = Arc::new(AtomicU64::new(u64::MAX));
    let storage = OffsetRecordingFs { last_offset: offsets.clone() };
    let (client, _accept) = serve_one_connection_with(storage, StaticAuth { username: "alice", password: "secret" }).await;
    let (read_half, mut write_half) = client.into_split();
    let mut reader = BufReader::new(read_half);

    let _greeting = read_reply(&mut reader).await;
    write_half.write_all(b"USER alice\r\n").await.unwrap();
    let _ = read_reply(&mut reader).await;
    write_half.write_all(b"PASS secret\r\n").await.unwrap();
    let _ = read_reply(&mut reader).await;

    write_half.write_all(b"REST 100\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("350"), "unexpected REST reply: {reply}");

    // NOOP is not a transfer command; the restart marker it leaves behind must not survive it.
    write_half.write_all(b"NOOP\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("200"), "unexpected NOOP reply: {reply}");

    write_half.write_all(b"PASV\r\n").await.unwrap();
    let pasv_reply = read_reply(&mut reader).await;
    let port = parse_pasv_port(&pasv_reply);
    let _data_conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

    write_half.write_all(b"RETR whatever\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("150"), "unexpected RETR reply: {reply}");

    // Give the spawned transfer task a chance to call `open_read` before asserting on it.
    for _ in 0..50 {
        if offsets.load(Ordering::SeqCst) != u64::MAX {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(offsets.load(Ordering::SeqCst), 0, "REST's offset should have been cleared by the intervening NOOP");
}
