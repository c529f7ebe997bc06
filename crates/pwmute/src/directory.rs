//! Object directory client.
//!
//! Wraps the registry handle acquired once per session. Every `bind` goes to
//! the server; nothing is cached between requests.

use tracing::{debug, warn};

use crate::error::{InitError, SubstrateError};
use crate::substrate::{NodeProxy, RemoteCore, RemoteDirectory};

pub struct ObjectDirectory<D> {
    inner: D,
}

impl<D: RemoteDirectory> ObjectDirectory<D> {
    /// Acquire the session's directory handle.
    pub fn acquire<C>(core: &C) -> Result<Self, InitError>
    where
        C: RemoteCore<Directory = D>,
    {
        let inner = core.directory()?;
        debug!("object directory acquired");
        Ok(Self { inner })
    }

    /// Bind `node_id` to a new node proxy. Failures are logged and returned.
    pub fn bind(&self, node_id: u32) -> Result<D::Node, SubstrateError> {
        match self.inner.bind(node_id) {
            Ok(node) => {
                debug!("bound node {} as proxy {}", node_id, node.proxy_id());
                Ok(node)
            }
            Err(e) => {
                warn!("Failed to bind to node {}: {}", node_id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeServer;

    #[test]
    fn test_bind_is_not_cached() {
        let server = FakeServer::new().with_node(42);
        let directory = ObjectDirectory {
            inner: server.directory(),
        };

        let first = directory.bind(42).unwrap();
        let second = directory.bind(42).unwrap();
        assert_ne!(first.proxy_id(), second.proxy_id());
        assert_eq!(server.binds(), 2);
    }

    #[test]
    fn test_bind_unknown_node_fails() {
        let server = FakeServer::new().with_node(42);
        let directory = ObjectDirectory {
            inner: server.directory(),
        };

        assert!(directory.bind(7).is_err());
        assert_eq!(server.binds(), 0);
    }
}
