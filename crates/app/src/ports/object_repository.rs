//! Object repository port: durable storage for versioned objects.

use std::future::Future;

use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::object::VersionedObject;

/// Durable key-value store behind the in-memory [`ObjectStore`](crate::store::ObjectStore).
///
/// Every write is awaited inside the device's write section, so an
/// implementation that fails makes that write fail without committing it
/// in memory.
pub trait ObjectRepository {
    /// Load every persisted object, grouped by nothing in particular.
    fn load_all(&self)
    -> impl Future<Output = Result<Vec<(Serial, VersionedObject)>, HubError>> + Send;

    /// Insert or overwrite one object of `serial`.
    fn upsert(
        &self,
        serial: &Serial,
        object: &VersionedObject,
    ) -> impl Future<Output = Result<(), HubError>> + Send;

    /// Remove every object of `serial`.
    fn delete_device(&self, serial: &Serial) -> impl Future<Output = Result<(), HubError>> + Send;
}

impl<T: ObjectRepository + Send + Sync> ObjectRepository for std::sync::Arc<T> {
    fn load_all(
        &self,
    ) -> impl Future<Output = Result<Vec<(Serial, VersionedObject)>, HubError>> + Send {
        (**self).load_all()
    }

    fn upsert(
        &self,
        serial: &Serial,
        object: &VersionedObject,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        (**self).upsert(serial, object)
    }

    fn delete_device(&self, serial: &Serial) -> impl Future<Output = Result<(), HubError>> + Send {
        (**self).delete_device(serial)
    }
}
