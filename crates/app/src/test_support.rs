//! In-memory doubles shared by the service tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::object::{ObjectKey, VersionedObject};

use crate::broker::SubscriptionBroker;
use crate::notifier::UpdateNotifier;
use crate::ports::ObjectRepository;
use crate::propagation::PropagationScheduler;

/// Repository keeping everything in a map, with a switch to fail writes.
#[derive(Default)]
pub struct InMemoryObjectRepository {
    objects: Mutex<BTreeMap<(Serial, ObjectKey), VersionedObject>>,
    fail_writes: AtomicBool,
}

impl InMemoryObjectRepository {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn objects_of(&self, serial: &Serial) -> Vec<VersionedObject> {
        self.objects
            .lock()
            .iter()
            .filter(|((owner, _), _)| owner == serial)
            .map(|(_, object)| object.clone())
            .collect()
    }

    fn check(&self) -> Result<(), HubError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HubError::Storage("disk full".into()));
        }
        Ok(())
    }
}

impl ObjectRepository for InMemoryObjectRepository {
    fn load_all(
        &self,
    ) -> impl Future<Output = Result<Vec<(Serial, VersionedObject)>, HubError>> + Send {
        let all = self
            .objects
            .lock()
            .iter()
            .map(|((serial, _), object)| (serial.clone(), object.clone()))
            .collect();
        async { Ok(all) }
    }

    fn upsert(
        &self,
        serial: &Serial,
        object: &VersionedObject,
    ) -> impl Future<Output = Result<(), HubError>> + Send {
        let result = self.check().map(|()| {
            self.objects
                .lock()
                .insert((serial.clone(), object.key.clone()), object.clone());
        });
        async { result }
    }

    fn delete_device(&self, serial: &Serial) -> impl Future<Output = Result<(), HubError>> + Send {
        let result = self.check().map(|()| {
            self.objects.lock().retain(|(owner, _), _| owner != serial);
        });
        async { result }
    }
}

/// A notifier wired to a fresh broker and a 15 s propagation window.
pub fn notifier() -> Arc<UpdateNotifier> {
    let broker = Arc::new(SubscriptionBroker::new(8));
    let propagation = Arc::new(PropagationScheduler::new(
        Duration::from_secs(15),
        Arc::clone(&broker),
    ));
    let (notifier, _rx) = UpdateNotifier::new(broker, propagation, 64);
    Arc::new(notifier)
}
