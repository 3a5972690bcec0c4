//! Object store: authoritative versioned state, partitioned by device.
//!
//! Reads go straight to a partition's object map. Writes go through a
//! [`DeviceWriter`], which holds that device's exclusive write section for
//! its whole lifetime: the durable repository is awaited first, the
//! in-memory map is updated only once it succeeded, and the notifier runs
//! before the write call returns. Devices never share a write section.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use hearth_domain::device::Serial;
use hearth_domain::error::HubError;
use hearth_domain::event::EventOrigin;
use hearth_domain::object::{self, ObjectKey, Payload, VersionedObject};
use hearth_domain::time;

use crate::notifier::UpdateNotifier;
use crate::ports::ObjectRepository;

#[derive(Default)]
struct Partition {
    section: Arc<Mutex<()>>,
    removed: AtomicBool,
    objects: RwLock<BTreeMap<ObjectKey, VersionedObject>>,
}

/// In-memory object cache in front of an [`ObjectRepository`].
pub struct ObjectStore<R> {
    repo: R,
    notifier: Arc<UpdateNotifier>,
    partitions: RwLock<HashMap<Serial, Arc<Partition>>>,
}

impl<R> ObjectStore<R>
where
    R: ObjectRepository + Send + Sync,
{
    #[must_use]
    pub fn new(repo: R, notifier: Arc<UpdateNotifier>) -> Self {
        Self {
            repo,
            notifier,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Load every persisted object. Returns how many were loaded.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    #[tracing::instrument(skip(self))]
    pub async fn hydrate(&self) -> Result<usize, HubError> {
        let loaded = self.repo.load_all().await?;
        let count = loaded.len();
        let mut partitions = self.partitions.write();
        for (serial, object) in loaded {
            let partition = partitions.entry(serial).or_default();
            partition.objects.write().insert(object.key.clone(), object);
        }
        tracing::info!(objects = count, devices = partitions.len(), "object store hydrated");
        Ok(count)
    }

    #[must_use]
    pub fn get(&self, serial: &Serial, key: &ObjectKey) -> Option<VersionedObject> {
        self.partition(serial)?.objects.read().get(key).cloned()
    }

    /// Snapshot of every object of one device.
    #[must_use]
    pub fn objects_for(&self, serial: &Serial) -> Option<BTreeMap<ObjectKey, VersionedObject>> {
        Some(self.partition(serial)?.objects.read().clone())
    }

    /// Objects among `baselines`' keys whose revision exceeds the baseline.
    #[must_use]
    pub fn get_since(
        &self,
        serial: &Serial,
        baselines: &BTreeMap<ObjectKey, u64>,
    ) -> Vec<VersionedObject> {
        let Some(partition) = self.partition(serial) else {
            return Vec::new();
        };
        let objects = partition.objects.read();
        baselines
            .iter()
            .filter_map(|(key, baseline)| {
                objects
                    .get(key)
                    .filter(|object| object.is_newer_than(*baseline))
                    .cloned()
            })
            .collect()
    }

    /// Whether [`get_since`](Self::get_since) would return anything.
    #[must_use]
    pub fn has_changes_since(&self, serial: &Serial, baselines: &BTreeMap<ObjectKey, u64>) -> bool {
        let Some(partition) = self.partition(serial) else {
            return false;
        };
        let objects = partition.objects.read();
        baselines.iter().any(|(key, baseline)| {
            objects
                .get(key)
                .is_some_and(|object| object.is_newer_than(*baseline))
        })
    }

    /// Known devices, sorted.
    #[must_use]
    pub fn serials(&self) -> Vec<Serial> {
        let mut serials: Vec<Serial> = self.partitions.read().keys().cloned().collect();
        serials.sort();
        serials
    }

    #[must_use]
    pub fn contains(&self, serial: &Serial) -> bool {
        self.partitions.read().contains_key(serial)
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enter the write section of `serial`, registering the device if new.
    pub async fn writer(&self, serial: &Serial) -> DeviceWriter<'_, R> {
        loop {
            let partition = Arc::clone(
                self.partitions
                    .write()
                    .entry(serial.clone())
                    .or_default(),
            );
            if let Some(writer) = self.enter(serial, partition).await {
                return writer;
            }
        }
    }

    /// Enter the write section of an already known device.
    pub async fn existing_writer(&self, serial: &Serial) -> Option<DeviceWriter<'_, R>> {
        loop {
            let partition = self.partition(serial)?;
            if let Some(writer) = self.enter(serial, partition).await {
                return Some(writer);
            }
        }
    }

    /// Remove a device and all of its objects. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Propagates repository failures; the device is kept in that case.
    #[tracing::instrument(skip(self), fields(serial = %serial))]
    pub async fn delete_device(&self, serial: &Serial) -> Result<bool, HubError> {
        let Some(writer) = self.existing_writer(serial).await else {
            return Ok(false);
        };
        self.repo.delete_device(serial).await?;
        writer.partition.removed.store(true, Ordering::Release);
        self.partitions.write().remove(serial);
        tracing::info!("device removed");
        Ok(true)
    }

    fn partition(&self, serial: &Serial) -> Option<Arc<Partition>> {
        self.partitions.read().get(serial).cloned()
    }

    async fn enter(&self, serial: &Serial, partition: Arc<Partition>) -> Option<DeviceWriter<'_, R>> {
        let section = Arc::clone(&partition.section).lock_owned().await;
        // deleted while we queued for the section
        if partition.removed.load(Ordering::Acquire) {
            return None;
        }
        Some(DeviceWriter {
            store: self,
            serial: serial.clone(),
            partition,
            _section: section,
        })
    }
}

/// Exclusive write access to one device's objects.
pub struct DeviceWriter<'a, R> {
    store: &'a ObjectStore<R>,
    serial: Serial,
    partition: Arc<Partition>,
    _section: OwnedMutexGuard<()>,
}

impl<R> DeviceWriter<'_, R>
where
    R: ObjectRepository + Send + Sync,
{
    #[must_use]
    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    #[must_use]
    pub fn get(&self, key: &ObjectKey) -> Option<VersionedObject> {
        self.partition.objects.read().get(key).cloned()
    }

    /// Merge `patch` into the stored value and bump the revision.
    ///
    /// # Errors
    ///
    /// Propagates repository failures; nothing is committed in that case.
    pub async fn merge(
        &mut self,
        key: &ObjectKey,
        patch: &Payload,
        origin: EventOrigin,
    ) -> Result<VersionedObject, HubError> {
        let now = time::now();
        let next = match self.get(key) {
            Some(current) => current.next(object::merge(&current.value, patch), now),
            None => VersionedObject::first(key.clone(), patch.clone(), now),
        };
        self.commit(next, origin).await
    }

    /// Like [`merge`](Self::merge), but skip the write (no revision bump, no
    /// notification) when the merged value equals the stored one.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn merge_if_changed(
        &mut self,
        key: &ObjectKey,
        patch: &Payload,
        origin: EventOrigin,
    ) -> Result<Option<VersionedObject>, HubError> {
        if let Some(current) = self.get(key) {
            if object::merge(&current.value, patch) == current.value {
                return Ok(None);
            }
        }
        self.merge(key, patch, origin).await.map(Some)
    }

    /// Replace the stored value entirely and bump the revision.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn replace(
        &mut self,
        key: &ObjectKey,
        value: Payload,
        origin: EventOrigin,
    ) -> Result<VersionedObject, HubError> {
        let now = time::now();
        let next = match self.get(key) {
            Some(current) => current.next(value, now),
            None => VersionedObject::first(key.clone(), value, now),
        };
        self.commit(next, origin).await
    }

    async fn commit(
        &mut self,
        next: VersionedObject,
        origin: EventOrigin,
    ) -> Result<VersionedObject, HubError> {
        if let Err(err) = self.store.repo.upsert(&self.serial, &next).await {
            tracing::error!(serial = %self.serial, key = %next.key, %err, "failed to persist object");
            return Err(err);
        }
        self.partition
            .objects
            .write()
            .insert(next.key.clone(), next.clone());
        self.store
            .notifier
            .object_changed(&self.serial, &next, origin);
        Ok(next)
    }
}
