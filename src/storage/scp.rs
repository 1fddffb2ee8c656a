//! SCP destination: streamed file transfer over an authenticated ssh2
//! session. ssh2 is a blocking API, so every operation runs inside
//! `spawn_blocking`.

use crate::config::ScpSettings;
use crate::error::{Error, Result};
use crate::storage::Storage;
use async_trait::async_trait;
use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct ScpStorage {
    settings: ScpSettings,
    session: Option<Arc<Mutex<Session>>>,
}

impl ScpStorage {
    pub fn new(settings: ScpSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    fn session(&self) -> Result<Arc<Mutex<Session>>> {
        self.session
            .clone()
            .ok_or_else(|| Error::Transport("scp: session not opened".into()))
    }

    fn remote_path(&self, key: &str) -> String {
        let base = self.settings.path.trim_end_matches('/');
        if base.is_empty() {
            key.to_string()
        } else {
            format!("{base}/{key}")
        }
    }
}

fn connect(settings: &ScpSettings) -> Result<Session> {
    if settings.host.is_empty() {
        return Err(Error::Config("scp: host is required".into()));
    }
    if settings.password.is_none() && settings.private_key.is_none() {
        return Err(Error::Config(
            "scp: either password or private_key is required".into(),
        ));
    }

    let addr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|e| Error::Transport(format!("scp: resolve {}: {e}", settings.host)))?
        .next()
        .ok_or_else(|| Error::Transport(format!("scp: no address for {}", settings.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, settings.timeout)
        .map_err(|e| Error::Transport(format!("scp: connect {addr}: {e}")))?;

    let mut session =
        Session::new().map_err(|e| Error::Transport(format!("scp: session: {e}")))?;
    session.set_timeout(session_timeout_ms(settings.timeout));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| Error::Transport(format!("scp: handshake: {e}")))?;

    if let Some(key) = &settings.private_key {
        session
            .userauth_pubkey_file(&settings.username, None, key, None)
            .map_err(|e| Error::Transport(format!("scp: pubkey auth: {e}")))?;
    } else if let Some(password) = &settings.password {
        session
            .userauth_password(&settings.username, password)
            .map_err(|e| Error::Transport(format!("scp: password auth: {e}")))?;
    }

    Ok(session)
}

/// ssh2 takes the timeout as u32 milliseconds; an oversized configured
/// duration saturates instead of wrapping.
fn session_timeout_ms(timeout: std::time::Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn lock(session: &Arc<Mutex<Session>>) -> Result<std::sync::MutexGuard<'_, Session>> {
    session
        .lock()
        .map_err(|_| Error::Transport("scp: session lock poisoned".into()))
}

fn exec_remote(session: &Arc<Mutex<Session>>, command: &str) -> Result<()> {
    let guard = lock(session)?;
    let mut channel = guard
        .channel_session()
        .map_err(|e| Error::Transport(format!("scp: channel: {e}")))?;
    channel
        .exec(command)
        .map_err(|e| Error::Transport(format!("scp: exec {command}: {e}")))?;
    let mut output = String::new();
    let _ = channel.read_to_string(&mut output);
    channel
        .wait_close()
        .map_err(|e| Error::Transport(format!("scp: close channel: {e}")))?;

    let status = channel
        .exit_status()
        .map_err(|e| Error::Transport(format!("scp: exit status: {e}")))?;
    if status != 0 {
        return Err(Error::Transport(format!(
            "scp: {command} exited with {status}"
        )));
    }
    Ok(())
}

fn send_file(session: &Arc<Mutex<Session>>, local: &Path, remote: &str) -> Result<()> {
    let mut file = std::fs::File::open(local)?;
    let size = file.metadata()?.len();

    let guard = lock(session)?;
    let mut channel = guard
        .scp_send(Path::new(remote), 0o644, size, None)
        .map_err(|e| Error::Transport(format!("scp: send {remote}: {e}")))?;
    std::io::copy(&mut file, &mut channel)
        .map_err(|e| Error::Transport(format!("scp: copy {remote}: {e}")))?;
    channel
        .send_eof()
        .and_then(|_| channel.wait_eof())
        .and_then(|_| channel.close())
        .and_then(|_| channel.wait_close())
        .map_err(|e| Error::Transport(format!("scp: finish {remote}: {e}")))?;
    Ok(())
}

#[async_trait]
impl Storage for ScpStorage {
    async fn open(&mut self) -> Result<()> {
        let settings = self.settings.clone();
        let session = tokio::task::spawn_blocking(move || connect(&settings))
            .await
            .map_err(|e| Error::Transport(format!("scp: join: {e}")))??;
        let session = Arc::new(Mutex::new(session));

        if !self.settings.path.is_empty() {
            let base = self.settings.path.clone();
            let sess = session.clone();
            tokio::task::spawn_blocking(move || {
                exec_remote(&sess, &format!("mkdir -p '{base}'"))
            })
            .await
            .map_err(|e| Error::Transport(format!("scp: join: {e}")))??;
        }

        self.session = Some(session);
        Ok(())
    }

    async fn upload_file(&mut self, local: &Path, key: &str) -> Result<()> {
        let session = self.session()?;
        let remote = self.remote_path(key);
        let local: PathBuf = local.to_path_buf();

        info!(remote = %remote, "scp uploading");
        tokio::task::spawn_blocking(move || {
            // Chunk keys nest one directory deep; make sure it exists.
            if let Some((dir, _)) = remote.rsplit_once('/') {
                exec_remote(&session, &format!("mkdir -p '{dir}'"))?;
            }
            send_file(&session, &local, &remote)
        })
        .await
        .map_err(|e| Error::Transport(format!("scp: join: {e}")))?
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        let session = self.session()?;
        let remote = self.remote_path(key);
        tokio::task::spawn_blocking(move || {
            // -r covers chunk directories, -f tolerates an already-gone key.
            exec_remote(&session, &format!("rm -rf '{remote}'"))
        })
        .await
        .map_err(|e| Error::Transport(format!("scp: join: {e}")))?
    }

    async fn close(&mut self) {
        self.session = None;
    }
}
