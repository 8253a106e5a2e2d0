use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::domain::device::{BorrowerId, Device, DeviceId};
use crate::errors::DomainError;
use crate::inventory::{InventoryStore, UpsertOutcome};

/// Borrower -> device -> units currently held. Zero-valued entries and
/// borrowers holding nothing are never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RentalLedger {
    holdings: BTreeMap<BorrowerId, BTreeMap<DeviceId, u32>>,
}

impl RentalLedger {
    pub fn held(&self, borrower: &BorrowerId, id: &DeviceId) -> u32 {
        self.holdings.get(borrower).and_then(|devices| devices.get(id)).copied().unwrap_or(0)
    }

    pub fn devices_held_by(&self, borrower: &BorrowerId) -> Vec<(DeviceId, u32)> {
        self.holdings
            .get(borrower)
            .map(|devices| devices.iter().map(|(id, qty)| (id.clone(), *qty)).collect())
            .unwrap_or_default()
    }

    pub fn borrowers_of(&self, id: &DeviceId) -> Vec<(BorrowerId, u32)> {
        self.holdings
            .iter()
            .filter_map(|(borrower, devices)| {
                devices.get(id).map(|qty| (borrower.clone(), *qty))
            })
            .collect()
    }

    pub fn total_for(&self, id: &DeviceId) -> u32 {
        self.holdings.values().filter_map(|devices| devices.get(id)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BorrowerId, &BTreeMap<DeviceId, u32>)> {
        self.holdings.iter()
    }

    fn credit(&mut self, borrower: &BorrowerId, id: &DeviceId, quantity: u32) -> u32 {
        let held = self.holdings.entry(borrower.clone()).or_default().entry(id.clone()).or_insert(0);
        *held += quantity;
        *held
    }

    fn debit(&mut self, borrower: &BorrowerId, id: &DeviceId, quantity: u32) -> u32 {
        let Some(devices) = self.holdings.get_mut(borrower) else {
            return 0;
        };
        let remaining = match devices.get_mut(id) {
            Some(held) => {
                *held = held.saturating_sub(quantity);
                *held
            }
            None => 0,
        };
        if remaining == 0 {
            devices.remove(id);
        }
        if devices.is_empty() {
            self.holdings.remove(borrower);
        }
        remaining
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RentalReceipt {
    pub device_id: DeviceId,
    pub description: String,
    pub borrower: BorrowerId,
    pub quantity: u32,
    /// Units the borrower holds after the operation.
    pub held: u32,
    /// Units left to rent after the operation.
    pub available: u32,
}

/// Devices and ledger together. They are co-invariant, so they are mutated,
/// persisted and reloaded as one value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryState {
    #[serde(default)]
    pub devices: InventoryStore,
    #[serde(default)]
    pub rentals: RentalLedger,
    /// Bumped on every committed change; conversation snapshots compare it.
    #[serde(default)]
    pub revision: u64,
}

impl InventoryState {
    pub fn rent(
        &mut self,
        borrower: &BorrowerId,
        id: &DeviceId,
        quantity: u32,
    ) -> Result<RentalReceipt, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { raw: quantity.to_string() });
        }
        let device = self.device(id)?;
        if device.quantity.is_none() {
            return Err(DomainError::QuantityUnspecified { id: id.to_string() });
        }
        let available = device.available();
        if quantity > available {
            return Err(DomainError::InsufficientAvailability {
                id: id.to_string(),
                requested: quantity,
                available,
            });
        }

        self.devices.adjust_rented(id, i64::from(quantity))?;
        let held = self.rentals.credit(borrower, id, quantity);
        self.receipt(borrower, id, quantity, held)
    }

    pub fn return_device(
        &mut self,
        borrower: &BorrowerId,
        id: &DeviceId,
        quantity: u32,
    ) -> Result<RentalReceipt, DomainError> {
        if quantity == 0 {
            return Err(DomainError::InvalidQuantity { raw: quantity.to_string() });
        }
        self.device(id)?;
        let held = self.rentals.held(borrower, id);
        if held == 0 {
            return Err(DomainError::NotRenting {
                borrower: borrower.to_string(),
                id: id.to_string(),
            });
        }
        if quantity > held {
            return Err(DomainError::ReturnExceedsHeld {
                borrower: borrower.to_string(),
                id: id.to_string(),
                requested: quantity,
                held,
            });
        }

        self.devices.adjust_rented(id, -i64::from(quantity))?;
        let held = self.rentals.debit(borrower, id, quantity);
        self.receipt(borrower, id, quantity, held)
    }

    pub fn upsert_device(
        &mut self,
        id: DeviceId,
        description: impl Into<String>,
        quantity: Option<u32>,
    ) -> Result<UpsertOutcome, DomainError> {
        self.devices.upsert(id, description, quantity)
    }

    pub fn delete_device(&mut self, id: &DeviceId) -> Result<Device, DomainError> {
        self.devices.delete(id)
    }

    pub fn devices_held_by(&self, borrower: &BorrowerId) -> Vec<(DeviceId, u32)> {
        self.rentals.devices_held_by(borrower)
    }

    pub fn borrowers_of(&self, id: &DeviceId) -> Vec<(BorrowerId, u32)> {
        self.rentals.borrowers_of(id)
    }

    /// Plain-text overview injected into conversations as the inventory snapshot.
    pub fn render_summary(&self) -> String {
        if self.devices.is_empty() {
            return "Kho thiết bị hiện đang trống.".to_owned();
        }

        let mut summary = String::from("Tình trạng kho thiết bị hiện tại:\n");
        for device in self.devices.iter() {
            let _ = writeln!(
                summary,
                "- {}: {} | tổng: {} | đang thuê: {} | còn: {}",
                device.id,
                device.description,
                device.quantity_label(),
                device.rented,
                device.available()
            );
        }

        if self.rentals.is_empty() {
            summary.push_str("Hiện không ai đang thuê thiết bị.");
        } else {
            summary.push_str("Người đang thuê:");
            for (borrower, devices) in self.rentals.iter() {
                let held = devices
                    .iter()
                    .map(|(id, qty)| format!("{id} x{qty}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = write!(summary, "\n- {borrower}: {held}");
            }
        }
        summary
    }

    /// Verifies `0 <= rented <= quantity`, that ledger sums equal `rented`, and
    /// that the ledger holds no empty entries or unknown devices.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        for device in self.devices.iter() {
            if device.rented > 0 && device.quantity.map_or(true, |qty| device.rented > qty) {
                return Err(DomainError::InvariantViolation(format!(
                    "device {} has rented {} above quantity {}",
                    device.id,
                    device.rented,
                    device.quantity_label()
                )));
            }
            let ledger_total = self.rentals.total_for(&device.id);
            if ledger_total != device.rented {
                return Err(DomainError::InvariantViolation(format!(
                    "device {} has rented {} but ledger holds {}",
                    device.id, device.rented, ledger_total
                )));
            }
        }

        for (borrower, devices) in self.rentals.iter() {
            if devices.is_empty() {
                return Err(DomainError::InvariantViolation(format!(
                    "borrower {borrower} has an empty ledger entry"
                )));
            }
            for (id, qty) in devices {
                if *qty == 0 {
                    return Err(DomainError::InvariantViolation(format!(
                        "borrower {borrower} holds zero units of {id}"
                    )));
                }
                if !self.devices.contains(id) {
                    return Err(DomainError::InvariantViolation(format!(
                        "borrower {borrower} holds unknown device {id}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn device(&self, id: &DeviceId) -> Result<&Device, DomainError> {
        self.devices.get(id).ok_or_else(|| DomainError::UnknownDevice { id: id.to_string() })
    }

    fn receipt(
        &self,
        borrower: &BorrowerId,
        id: &DeviceId,
        quantity: u32,
        held: u32,
    ) -> Result<RentalReceipt, DomainError> {
        let device = self.device(id)?;
        Ok(RentalReceipt {
            device_id: id.clone(),
            description: device.description.clone(),
            borrower: borrower.clone(),
            quantity,
            held,
            available: device.available(),
        })
    }
}
