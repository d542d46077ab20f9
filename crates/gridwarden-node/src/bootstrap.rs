//! Admin password bootstrap.
//!
//! A freshly created persistent cluster only knows the engine's built-in
//! administrator with its well-known password. On first start we log in
//! with those credentials and change the password to the configured one.
//! On later starts the login fails, which means the rotation already
//! happened and counts as success.

use std::time::Duration;

use tracing::{debug, info};

use gridwarden_core::config::ClientTls;
use gridwarden_core::retry::{self, RetryPolicy};
use gridwarden_engine::{
    ClientConfiguration, ClientError, ClientResult, DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USER,
    Engine,
};

/// Cache the password change is issued through. Destroyed afterwards.
pub const BOOTSTRAP_CACHE: &str = "gridwarden_bootstrap";

/// Total connection attempts, the first one included.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The default password was replaced.
    Rotated,
    /// The default credentials were rejected: rotated on an earlier start.
    AlreadyRotated,
}

pub struct AdminBootstrap {
    password: String,
    client: ClientConfiguration,
    retry: RetryPolicy,
}

impl AdminBootstrap {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            client: ClientConfiguration {
                user_name: Some(DEFAULT_ADMIN_USER.to_string()),
                password: Some(DEFAULT_ADMIN_PASSWORD.to_string()),
                ..Default::default()
            },
            retry: RetryPolicy::exponential(DEFAULT_CONNECT_ATTEMPTS),
        }
    }

    pub fn with_client_tls(mut self, tls: Option<ClientTls>) -> Self {
        self.client.tls = tls;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.client.endpoint = endpoint.into();
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.client.socket_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Rotate the built-in administrator's password on `engine`.
    pub async fn run(&self, engine: &dyn Engine) -> ClientResult<BootstrapOutcome> {
        debug!(endpoint = %self.client.endpoint, "connecting admin client");
        let config = &self.client;
        let connected = retry::execute(&self.retry, ClientError::is_transient, move || {
            engine.connect_client(config)
        })
        .await;

        let mut client = match connected {
            Ok(client) => client,
            Err(ClientError::AuthenticationFailed { user }) if user == DEFAULT_ADMIN_USER => {
                info!(%user, "default credentials rejected, admin password already set");
                return Ok(BootstrapOutcome::AlreadyRotated);
            }
            Err(e) => return Err(e),
        };

        client
            .execute_admin_command(BOOTSTRAP_CACHE, &alter_user_sql(DEFAULT_ADMIN_USER, &self.password))
            .await?;
        match client.destroy_ephemeral_cache(BOOTSTRAP_CACHE).await {
            Ok(()) | Err(ClientError::CacheNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(user = DEFAULT_ADMIN_USER, "admin password rotated");
        Ok(BootstrapOutcome::Rotated)
    }
}

fn alter_user_sql(user: &str, password: &str) -> String {
    format!(
        "ALTER USER \"{user}\" WITH PASSWORD '{}';",
        password.replace('\'', "''")
    )
}
