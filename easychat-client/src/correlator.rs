//! Username resolution.
//!
//! Answers to `GET_USER_BY_NAME` arrive on the dispatcher task and land in
//! the directory. A resolver sends the request, then polls the directory
//! until the name shows up or its budget runs out.

use crate::connection::Connection;
use crate::directory::SessionDirectory;
use crate::error::ClientError;
use easychat_protocol::Encoder;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resolves usernames to user ids.
#[derive(Clone)]
pub struct RequestCorrelator {
    conn: Arc<Connection>,
    directory: Arc<SessionDirectory>,
    poll_interval: Duration,
}

impl RequestCorrelator {
    pub fn new(
        conn: Arc<Connection>,
        directory: Arc<SessionDirectory>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            conn,
            directory,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the id for `name`, asking the server if the directory does
    /// not know it.
    ///
    /// Fails with `ResolveTimeout` no earlier than `timeout` and no later
    /// than `timeout` plus one poll interval. Concurrent calls for the same
    /// name each send their own request.
    pub async fn resolve_name_to_id(&self, name: &str, timeout: Duration) -> Result<i32, ClientError> {
        if let Some(id) = self.directory.lookup_id(name) {
            return Ok(id);
        }

        let start = Instant::now();
        let deadline = start + timeout;
        let subject_id = self.directory.identity().user_id;

        tracing::debug!("Looking up user {:?} on the server", name);
        self.conn
            .write_all(&Encoder::get_user_by_name(subject_id, name))
            .await?;
        self.directory.register_lookup(name, deadline);

        loop {
            if let Some(id) = self.directory.lookup_id(name) {
                self.directory.remove_lookup(name);
                tracing::debug!("Resolved {:?} -> {} in {:?}", name, id, start.elapsed());
                return Ok(id);
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }

        self.directory.prune_lookups(Instant::now());
        tracing::debug!("Lookup of {:?} timed out after {:?}", name, timeout);
        Err(ClientError::ResolveTimeout {
            name: name.to_string(),
            timeout,
        })
    }

    /// Resolves user input that may be a name or a numeric id.
    ///
    /// A name already in the directory wins over reading the input as a
    /// number, so a user literally named "42" is still reachable. Anything
    /// else that parses as an `i32` is taken as an id; the rest goes to the
    /// server.
    pub async fn resolve_peer(&self, target: &str, timeout: Duration) -> Result<i32, ClientError> {
        if let Some(id) = self.directory.lookup_id(target) {
            return Ok(id);
        }
        if let Ok(id) = target.parse::<i32>() {
            return Ok(id);
        }
        self.resolve_name_to_id(target, timeout).await
    }
}
