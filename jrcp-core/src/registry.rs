//! The device arena.

use crate::device::Device;
use jrcp_protocol::JrcpError;

/// Arena of devices indexed by node address.
///
/// The registry is the single owner of every device; callers address
/// devices by NAD and borrow them for the duration of one operation. A
/// removed NAD is immediately reusable.
pub struct DeviceRegistry {
    slots: Box<[Option<Device>; 256]>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }

    /// Inserts a device at its node address. The slot must be free.
    pub fn insert(&mut self, device: Device) -> Result<(), JrcpError> {
        let nad = device.nad();
        let slot = &mut self.slots[nad as usize];
        if slot.is_some() {
            return Err(JrcpError::NadInUse(nad));
        }
        *slot = Some(device);
        Ok(())
    }

    pub fn get(&self, nad: u8) -> Option<&Device> {
        self.slots[nad as usize].as_ref()
    }

    pub fn get_mut(&mut self, nad: u8) -> Option<&mut Device> {
        self.slots[nad as usize].as_mut()
    }

    /// Removes and returns the device at a node address.
    pub fn remove(&mut self, nad: u8) -> Result<Device, JrcpError> {
        self.slots[nad as usize]
            .take()
            .ok_or(JrcpError::NoDeviceRegistered(nad))
    }

    pub fn contains(&self, nad: u8) -> bool {
        self.slots[nad as usize].is_some()
    }

    /// Iterates over devices that completed registration, in NAD order.
    pub fn iter_registered(&self) -> impl Iterator<Item = &Device> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|device| device.is_registered())
    }

    /// Iterates over every device present, registered or not.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_exclusive_per_nad() {
        let mut registry = DeviceRegistry::new();
        registry.insert(Device::new(0x20, "a".into())).unwrap();

        let err = registry.insert(Device::new(0x20, "b".into()));
        assert!(matches!(err, Err(JrcpError::NadInUse(0x20))));

        // The loser did not clobber the original.
        assert_eq!(registry.get(0x20).unwrap().description(), "a");
    }

    #[test]
    fn remove_frees_the_slot_exactly_once() {
        let mut registry = DeviceRegistry::new();
        registry.insert(Device::new(0x20, "a".into())).unwrap();

        let removed = registry.remove(0x20).unwrap();
        assert_eq!(removed.nad(), 0x20);
        assert!(!registry.contains(0x20));

        let err = registry.remove(0x20);
        assert!(matches!(err, Err(JrcpError::NoDeviceRegistered(0x20))));

        // Slot is reusable after removal.
        registry.insert(Device::new(0x20, "c".into())).unwrap();
    }

    #[test]
    fn registered_iteration_skips_created_only_devices() {
        let mut registry = DeviceRegistry::new();
        registry.insert(Device::new(0x30, "visible".into())).unwrap();
        registry.insert(Device::new(0x10, "hidden".into())).unwrap();
        registry.get_mut(0x30).unwrap().mark_registered();

        let nads: Vec<u8> = registry.iter_registered().map(Device::nad).collect();
        assert_eq!(nads, vec![0x30]);

        let all: Vec<u8> = registry.iter().map(Device::nad).collect();
        assert_eq!(all, vec![0x10, 0x30]);
    }
}
