use super::super::StoreError;
use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::Client;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Factory for redis connections
///
/// Consumers only issue short, non-blocking commands, thus a connection may be shared between
/// any number of consumers. Implementations are free to multiplex, pool or establish connections
/// on demand.
#[async_trait]
pub trait RedisFactory {
    /// Type of connection handed out by the factory
    type Connection: ConnectionLike + Send;

    /// Establishes a new connection or clones a shared one
    async fn connection(&self) -> Result<Self::Connection, StoreError>;

    /// Signals that a connection handed out earlier has encountered an I/O error
    /// and should no longer be used.
    async fn invalidate(&self);
}

/// [`RedisFactory`] sharing one lazily established [`MultiplexedConnection`]
///
/// When the connection breaks, it is discarded and re-established on next use.
pub struct MultiplexedRedisFactory {
    client: Client,
    shared: Mutex<Option<MultiplexedConnection>>,
}

impl MultiplexedRedisFactory {
    /// Creates a new factory for the server at the given URL without connecting to it
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Command(Box::new(e)))?;

        Ok(Self {
            client,
            shared: Mutex::new(None),
        })
    }
}

#[async_trait]
impl RedisFactory for MultiplexedRedisFactory {
    type Connection = MultiplexedConnection;

    async fn connection(&self) -> Result<Self::Connection, StoreError> {
        let mut shared = self.shared.lock().await;

        if let Some(connection) = shared.as_ref() {
            trace!("Reusing shared redis connection");
            return Ok(connection.clone());
        }

        debug!("Establishing shared redis connection");
        let connection = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Connection(Box::new(e)))?;

        *shared = Some(connection.clone());

        Ok(connection)
    }

    async fn invalidate(&self) {
        trace!("Invalidating shared redis connection");
        *(self.shared.lock().await) = None;
    }
}
