// # Device Registry
//
// In-memory registry of devices keyed by MAC address, with a secondary
// equality index on the owning account name.
//
// ## Expiry
//
// Every entry lives until its device's `expired_at`. Readers treat expired
// entries as absent from the moment the deadline passes (lazy purge);
// `purge_expired()` drops them from memory (eager sweep, driven by the
// engine once per check cycle). Upserting a device whose deadline already
// passed removes any existing entry and stores nothing.
//
// ## Transactions
//
// The table sits behind a single `tokio::sync::RwLock`:
//
// - [`DeviceRegistry::write()`] opens a [`RegistryTxn`] that holds the write
//   lock for a whole diff/upsert/delete batch
// - [`DeviceRegistry::read()`] opens a [`RegistryView`], a consistent snapshot
//   for the duration of one scan
//
// Both capture "now" when opened, so every read inside one transaction agrees
// on which entries are expired. Callers must not await network calls while a
// transaction is open.
//
// ## Persistence
//
// None. The registry is rebuilt from the cloud roster on every start.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::{Device, MacAddress};

/// Shared device registry
///
/// Cloning is cheap and every clone refers to the same table.
///
/// # Example
///
/// ```rust,no_run
/// use nasauth_core::registry::DeviceRegistry;
/// use nasauth_core::device::{Device, MacAddress};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = DeviceRegistry::new();
///     let mac = MacAddress::parse("AA:BB:CC:DD:EE:FF")?;
///     let expires = chrono::Utc::now() + chrono::Duration::hours(1);
///
///     registry.upsert(Device::new("alice", mac.clone(), "secret", expires)).await;
///     assert!(registry.get(&mac).await.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<Table>>,
}

impl DeviceRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a read-only snapshot
    pub async fn read(&self) -> RegistryView<'_> {
        RegistryView {
            table: self.inner.read().await,
            now: Utc::now(),
        }
    }

    /// Open a write transaction
    pub async fn write(&self) -> RegistryTxn<'_> {
        RegistryTxn {
            table: self.inner.write().await,
            now: Utc::now(),
        }
    }

    /// Point lookup
    pub async fn get(&self, mac: &MacAddress) -> Option<Device> {
        self.read().await.get(mac).cloned()
    }

    /// Point upsert; returns `false` if the device was already expired
    pub async fn upsert(&self, device: Device) -> bool {
        self.write().await.upsert(device)
    }

    /// Point delete; returns the removed device, if it was live
    pub async fn delete(&self, mac: &MacAddress) -> Option<Device> {
        self.write().await.delete(mac)
    }

    /// Snapshot of every live device
    pub async fn scan_all(&self) -> Vec<Device> {
        self.read().await.scan_all().cloned().collect()
    }

    /// MACs of every live device owned by `name`
    pub async fn scan_by_name(&self, name: &str) -> Vec<MacAddress> {
        self.read().await.scan_by_name(name)
    }

    /// Number of live devices
    pub async fn len(&self) -> usize {
        self.read().await.len()
    }

    /// Check if the registry holds no live device
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries from memory; returns how many were dropped
    pub async fn purge_expired(&self) -> usize {
        self.write().await.purge_expired()
    }
}

/// Read-only snapshot of the registry
pub struct RegistryView<'a> {
    table: RwLockReadGuard<'a, Table>,
    now: DateTime<Utc>,
}

impl RegistryView<'_> {
    pub fn get(&self, mac: &MacAddress) -> Option<&Device> {
        self.table.get(mac, self.now)
    }

    pub fn scan_all(&self) -> impl Iterator<Item = &Device> {
        self.table.scan_all(self.now)
    }

    pub fn scan_by_name(&self, name: &str) -> Vec<MacAddress> {
        self.table.scan_by_name(name, self.now)
    }

    pub fn len(&self) -> usize {
        self.scan_all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive write transaction over the registry
///
/// Changes are visible to other readers once the transaction is dropped.
pub struct RegistryTxn<'a> {
    table: RwLockWriteGuard<'a, Table>,
    now: DateTime<Utc>,
}

impl RegistryTxn<'_> {
    pub fn get(&self, mac: &MacAddress) -> Option<&Device> {
        self.table.get(mac, self.now)
    }

    pub fn scan_all(&self) -> impl Iterator<Item = &Device> {
        self.table.scan_all(self.now)
    }

    pub fn scan_by_name(&self, name: &str) -> Vec<MacAddress> {
        self.table.scan_by_name(name, self.now)
    }

    pub fn len(&self) -> usize {
        self.scan_all().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace a device, re-arming its TTL from `expired_at`
    ///
    /// Returns `false` (and removes any existing entry) when the device is
    /// already expired.
    pub fn upsert(&mut self, device: Device) -> bool {
        self.table.upsert(device, self.now)
    }

    /// Remove a device; returns it if it was live
    pub fn delete(&mut self, mac: &MacAddress) -> Option<Device> {
        let now = self.now;
        self.table.remove(mac).filter(|d| !d.is_expired_at(now))
    }

    /// Mutate a live device in place
    ///
    /// Returns `false` when the MAC is absent or expired. The key cannot be
    /// changed; name and expiry changes are reindexed.
    pub fn update<F>(&mut self, mac: &MacAddress, f: F) -> bool
    where
        F: FnOnce(&mut Device),
    {
        let Some(mut device) = self.get(mac).cloned() else {
            return false;
        };
        f(&mut device);
        device.mac = mac.clone();
        self.upsert(device)
    }

    /// Apply `f` to every live device
    pub fn update_all<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Device),
    {
        let now = self.now;
        for device in self.table.devices.values_mut() {
            if !device.is_expired_at(now) {
                let name = device.name.clone();
                let expired_at = device.expired_at;
                f(device);
                // Identity fields are not editable through a bulk pass
                device.name = name;
                device.expired_at = expired_at;
            }
        }
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.table.devices.clear();
        self.table.by_name.clear();
    }

    /// Drop expired entries; returns how many were dropped
    pub fn purge_expired(&mut self) -> usize {
        self.table.purge_expired(self.now)
    }
}

#[derive(Debug, Default)]
struct Table {
    devices: HashMap<MacAddress, Device>,
    by_name: HashMap<String, BTreeSet<MacAddress>>,
}

impl Table {
    fn get(&self, mac: &MacAddress, now: DateTime<Utc>) -> Option<&Device> {
        self.devices.get(mac).filter(|d| !d.is_expired_at(now))
    }

    fn scan_all(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(move |d| !d.is_expired_at(now))
    }

    fn scan_by_name(&self, name: &str, now: DateTime<Utc>) -> Vec<MacAddress> {
        self.by_name
            .get(name)
            .map(|macs| {
                macs.iter()
                    .filter(|mac| self.get(mac, now).is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn upsert(&mut self, device: Device, now: DateTime<Utc>) -> bool {
        self.remove(&device.mac);
        if device.is_expired_at(now) {
            return false;
        }

        self.by_name
            .entry(device.name.clone())
            .or_default()
            .insert(device.mac.clone());
        self.devices.insert(device.mac.clone(), device);
        true
    }

    fn remove(&mut self, mac: &MacAddress) -> Option<Device> {
        let device = self.devices.remove(mac)?;
        if let Some(macs) = self.by_name.get_mut(&device.name) {
            macs.remove(mac);
            if macs.is_empty() {
                self.by_name.remove(&device.name);
            }
        }
        Some(device)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<MacAddress> = self
            .devices
            .values()
            .filter(|d| d.is_expired_at(now))
            .map(|d| d.mac.clone())
            .collect();

        for mac in &expired {
            self.remove(mac);
        }
        expired.len()
    }
}
