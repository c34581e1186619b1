//! Connection to the Redis instance shared by every gatekeeper process.
//!
//! Rate-limit windows and credential state live here when `GATE_REDIS_URL`
//! is set, so limits and revocations hold across instances and restarts.
//!
//! # Post-conditions
//! - Opening a store never connects; the connection is made on first use.
//! - A connection that fails with an I/O error is dropped and reopened by
//!   the next call.

use std::fmt;

use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, RedisError, Script};
use tokio::sync::Mutex;

/// A lazily connected handle to the shared store.
pub struct SharedStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The connection info may carry a password.
        f.debug_struct("SharedStore").finish_non_exhaustive()
    }
}

impl SharedStore {
    /// Parse a `redis://` or `rediss://` URL.
    ///
    /// # Errors
    /// Returns the client error if the URL is not a valid connection string.
    pub fn open(url: &str) -> Result<Self, RedisError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Mutex::new(None),
        })
    }

    /// The cached connection, opening one if needed.
    async fn connection(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self.client.get_multiplexed_async_connection().await?;
        tracing::info!("connected to shared store");
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn discard_if_broken(&self, error: &RedisError) {
        if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() {
            self.connection.lock().await.take();
            tracing::warn!(error = %error, "shared store connection dropped");
        }
    }

    /// Run a Lua script atomically against `keys`.
    pub(crate) async fn run_script<T: FromRedisValue>(
        &self,
        script: &Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T, RedisError> {
        let mut connection = self.connection().await?;
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        let result = invocation.invoke_async(&mut connection).await;
        if let Err(e) = &result {
            self.discard_if_broken(e).await;
        }
        result
    }

    /// Run a single command.
    pub(crate) async fn run_command<T: FromRedisValue>(&self, command: &Cmd) -> Result<T, RedisError> {
        let mut connection = self.connection().await?;
        let result = command.query_async(&mut connection).await;
        if let Err(e) = &result {
            self.discard_if_broken(e).await;
        }
        result
    }
}
