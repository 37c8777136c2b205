//! Repository-facing consumer for discovery events.
//!
//! Decoding failures are logged and skipped: the transport owns
//! redelivery, and a malformed document will not become well-formed by
//! retrying it here.

use std::sync::Arc;

use tracing::{debug, warn};

use stratus_core::error::Result;
use stratus_core::types::Entity;
use stratus_storage::EntityRepository;

use crate::envelope::DiscoveryEvent;
use crate::normalize::normalize;

/// Feeds normalized discovery events into the entity repository.
pub struct Consumer {
    repository: Arc<EntityRepository>,
}

impl Consumer {
    pub fn new(repository: Arc<EntityRepository>) -> Self {
        Self { repository }
    }

    /// Normalize one event and write it through.
    ///
    /// Returns the persisted entity. Storage errors propagate to the
    /// transport so it can apply its redelivery policy.
    pub fn handle(&self, event: &DiscoveryEvent) -> Result<Entity> {
        let entity = match normalize(event) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(
                    customer_id = %event.customer_id,
                    message_type = ?event.message_type,
                    error = %e,
                    "skipping undecodable discovery event"
                );
                return Err(e);
            }
        };

        let persisted = self.repository.put_entity(entity)?;
        debug!(
            customer_id = persisted.customer_id(),
            kind = persisted.kind_name(),
            key = persisted.key(),
            "stored discovery entity"
        );
        Ok(persisted)
    }
}
