//! The plugin chain: each plugin wraps the next one and can intercept `connect`, typically to
//! redirect the request to a different host before delegating.
//!
//! The full chain for a cluster-aware connection is Limitless router plugin -> failover
//! plugin -> the driver's own terminal plugin. A plugin that has nothing to do for a given
//! request just calls `next.connect(...)` unchanged.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{driver::DriverConnection, error::Result};

/// One link in the connect-request chain.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn connect(
        &self,
        attributes: &HashMap<String, String>,
    ) -> Result<Box<dyn DriverConnection>>;
}

/// Terminal link: hands the request to the wrapped driver with no further indirection.
pub struct TerminalPlugin {
    connector: std::sync::Arc<dyn crate::driver::DriverConnector>,
    host: String,
    port: i32,
}

impl TerminalPlugin {
    pub fn new(connector: std::sync::Arc<dyn crate::driver::DriverConnector>, host: impl Into<String>, port: i32) -> Self {
        Self {
            connector,
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Plugin for TerminalPlugin {
    async fn connect(&self, attributes: &HashMap<String, String>) -> Result<Box<dyn DriverConnection>> {
        let host = attributes.get("SERVER").map(String::as_str).unwrap_or(&self.host);
        let port = attributes
            .get("PORT")
            .and_then(|p| p.parse::<i32>().ok())
            .unwrap_or(self.port);
        self.connector.connect(host, port, attributes).await
    }
}
