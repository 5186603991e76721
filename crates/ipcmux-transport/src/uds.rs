use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::frame::FrameConfig;
use crate::transport::{ClientConnection, Transport};

/// Unix domain socket listener producing framed message transports.
///
/// Binds a filesystem-path socket and removes it again on drop, unless the
/// path was replaced by something else in the meantime.
#[derive(Debug)]
pub struct UnixSocketListener {
    listener: UnixListener,
    path: PathBuf,
    config: FrameConfig,
    created_inode: Option<(u64, u64)>,
}

impl UnixSocketListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path` with the default frame configuration.
    ///
    /// An existing socket file at `path` is treated as stale and removed.
    /// Any other kind of file is left alone and binding fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with(path, FrameConfig::default(), Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit frame configuration and permission mode.
    pub fn bind_with(path: impl AsRef<Path>, config: FrameConfig, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;

        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: Some((created.dev(), created.ino())),
            path,
            config,
        })
    }

    /// Wait for the next client and wrap it as a message transport.
    pub async fn accept(&self) -> Result<ClientConnection> {
        let (stream, _addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(ClientConnection::new(Transport::from_stream(
            stream,
            self.config.clone(),
        )))
    }

    /// Turn the listener into an endless stream of connections.
    ///
    /// Accept failures are logged and skipped. The socket file is cleaned up
    /// when the stream is dropped.
    pub fn incoming(self) -> BoxStream<'static, ClientConnection> {
        stream::unfold(self, |listener| async move {
            loop {
                match listener.accept().await {
                    Ok(conn) => return Some((conn, listener)),
                    Err(err) => warn!(error = %err, "accept failed"),
                }
            }
        })
        .boxed()
    }

    /// Connect to a listening socket with the default frame configuration.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Transport> {
        Self::connect_with(path, FrameConfig::default()).await
    }

    pub async fn connect_with(path: impl AsRef<Path>, config: FrameConfig) -> Result<Transport> {
        let path = path.as_ref();
        check_path_len(path)?;
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| TransportError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Transport::from_stream(stream, config))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= UnixSocketListener::MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: UnixSocketListener::MAX_PATH_LEN,
        });
    }
    Ok(())
}

impl Drop for UnixSocketListener {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket()
            && metadata.dev() == expected_dev
            && metadata.ino() == expected_ino
        {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ipcmux-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_bind_accept_connect() {
        let dir = scratch_dir("uds");
        let sock_path = dir.join("test.sock");

        let listener = UnixSocketListener::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let client = UnixSocketListener::connect(&sock_path).await.unwrap();
        let mut server = listener.accept().await.unwrap();

        client.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(server.transport.recv().await.unwrap().as_ref(), b"hello");

        client.close();
        server.disconnected.cancelled().await;

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_incoming_stream() {
        let dir = scratch_dir("uds-incoming");
        let sock_path = dir.join("incoming.sock");

        let mut incoming = UnixSocketListener::bind(&sock_path).unwrap().incoming();
        let mut client = UnixSocketListener::connect(&sock_path).await.unwrap();
        let conn = incoming.next().await.unwrap();

        conn.transport.send(Bytes::from_static(b"welcome")).unwrap();
        assert_eq!(client.recv().await.unwrap().as_ref(), b"welcome");

        drop(incoming);
        assert!(!sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixSocketListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[tokio::test]
    async fn test_connect_missing_socket() {
        let dir = scratch_dir("uds-missing");
        let result = UnixSocketListener::connect(dir.join("nobody.sock")).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bind_default_permissions_hardened() {
        let dir = scratch_dir("uds-perms");
        let sock_path = dir.join("perm.sock");

        let listener = UnixSocketListener::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = scratch_dir("uds-stale");
        let sock_path = dir.join("stale.sock");

        let first = UnixSocketListener::bind(&sock_path).unwrap();
        std::mem::forget(first);
        let second = UnixSocketListener::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        drop(second);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_bind_rejects_existing_non_socket_file() {
        let dir = scratch_dir("uds-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixSocketListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_drop_does_not_remove_replaced_path() {
        let dir = scratch_dir("uds-drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = UnixSocketListener::bind(&sock_path).unwrap();
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
