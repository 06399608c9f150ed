//! Page-level client slot.
//!
//! Holds at most one active [`ConsentClient`] per page. The embedder owns
//! the `PageContext` and passes it to whatever needs the client.

use crate::{ConsentClient, ConsentClientBuilder, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
pub struct PageContext {
    slot: Mutex<Option<Arc<ConsentClient>>>,
}

impl PageContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the installed client, or build and install one.
    ///
    /// When a client already exists `builder` is discarded unused.
    pub fn get_or_init(&self, builder: ConsentClientBuilder) -> Result<Arc<ConsentClient>> {
        let mut slot = self.slot.lock();
        if let Some(client) = slot.as_ref() {
            debug!("Consent client already installed; ignoring new builder");
            return Ok(client.clone());
        }
        let client = Arc::new(builder.build()?);
        *slot = Some(client.clone());
        Ok(client)
    }

    pub fn current(&self) -> Option<Arc<ConsentClient>> {
        self.slot.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Shut down and remove the installed client. Returns false if empty.
    pub fn release(&self) -> bool {
        let Some(client) = self.slot.lock().take() else {
            return false;
        };
        client.shutdown();
        info!("Consent client released");
        true
    }
}
