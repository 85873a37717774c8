//! Wiring of the production stack for one CLI invocation

use crate::config::ClientConfig;
use anyhow::{Context, Result};
use corider_core::{Clock, Session, SessionStatus, SystemClock};
use corider_dispatch::DispatchCoordinator;
use corider_session::SessionManager;
use corider_transport::{HttpRestTransport, StompConnector, TransportAdapter};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Session, transport and dispatch built from one [`ClientConfig`]
pub struct Client {
    pub session: Arc<SessionManager>,
    pub transport: TransportAdapter,
    pub dispatch: DispatchCoordinator,
    session_file: PathBuf,
}

impl Client {
    /// Build the stack and restore the persisted session, if any.
    ///
    /// Must run inside a Tokio runtime; the channel actor and the session
    /// watcher are spawned here.
    pub fn build(config: &ClientConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let rest = Arc::new(
            HttpRestTransport::new(&config.transport).context("Failed to build HTTP client")?,
        );
        let session = Arc::new(SessionManager::new(
            rest.clone(),
            Arc::clone(&clock),
            config.session.clone(),
        ));
        if let Some(saved) = load_session(&config.session_file)? {
            session.restore(saved);
        }

        let transport = TransportAdapter::new(
            rest,
            Arc::new(StompConnector::new(&config.transport)),
            session.clone(),
            &config.transport,
        );
        let dispatch = DispatchCoordinator::new(
            transport.clone(),
            session.watch(),
            clock,
            config.dispatch.clone(),
        );

        Ok(Self {
            session,
            transport,
            dispatch,
            session_file: config.session_file.clone(),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Persist the current session, or remove the file after a logout
    pub fn save_session(&self) -> Result<()> {
        match self.session.current() {
            Some(session) => store_session(&self.session_file, &session),
            None => clear_session(&self.session_file),
        }
    }

    /// Stop background work; persists refreshed tokens first
    pub fn close(&self) -> Result<()> {
        self.dispatch.shutdown();
        self.transport.shutdown();
        self.save_session()
    }
}

/// Read a persisted session; a missing file means logged out
pub fn load_session(path: &Path) -> Result<Option<Session>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session {}", path.display()))?;
    let session = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse session {}", path.display()))?;
    Ok(Some(session))
}

/// Write the session readable by the owner only; it carries both tokens
pub fn store_session(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(session)?;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    // A file left by an older build keeps its mode on open
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
    }
    file.write_all(text.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn clear_session(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use corider_core::{Profile, UserId};

    fn session() -> Session {
        Session {
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            expires_at: Utc::now(),
            profile: Profile::Driver,
            user_id: UserId::new(7),
            generation: 3,
        }
    }

    #[test]
    fn session_survives_a_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        store_session(&path, &session()).unwrap();
        assert_eq!(load_session(&path).unwrap(), Some(session()));

        clear_session(&path).unwrap();
        assert_eq!(load_session(&path).unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("session.json");
        store_session(&fresh, &session()).unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let existing = dir.path().join("old-session.json");
        std::fs::write(&existing, "{}").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o644)).unwrap();
        store_session(&existing, &session()).unwrap();
        let mode = std::fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(load_session(&existing).unwrap(), Some(session()));
    }

    #[test]
    fn corrupt_session_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_session(&path).is_err());
    }
}
