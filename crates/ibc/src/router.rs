//! Port/channel binding registry.

use chainmesh_types::{ChannelId, Error, PortId, Result};
use std::collections::HashSet;
use std::sync::Mutex;

/// Flat set of bound (port, channel) keys with its own internal lock.
#[derive(Debug, Default)]
pub struct Router {
    bindings: Mutex<HashSet<(String, String)>>,
}

impl Router {
    pub fn new() -> Router {
        Router::default()
    }

    /// Bind a key. Fails with `InvalidState` if it already exists.
    pub fn bind(&self, port: &PortId, channel: &ChannelId) -> Result<()> {
        let mut bindings = self.bindings.lock().unwrap();
        if !bindings.insert((port.0.clone(), channel.0.clone())) {
            return Err(Error::invalid_state(format!(
                "binding {}:{} already exists",
                port, channel
            )));
        }
        Ok(())
    }

    /// Remove a key. Fails with `NotFound` if absent.
    pub fn unbind(&self, port: &PortId, channel: &ChannelId) -> Result<()> {
        let mut bindings = self.bindings.lock().unwrap();
        if !bindings.remove(&(port.0.clone(), channel.0.clone())) {
            return Err(Error::not_found(format!(
                "binding {}:{} not found",
                port, channel
            )));
        }
        Ok(())
    }

    pub fn is_bound(&self, port: &PortId, channel: &ChannelId) -> bool {
        self.bindings
            .lock()
            .unwrap()
            .contains(&(port.0.clone(), channel.0.clone()))
    }
}
