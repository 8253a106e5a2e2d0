use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::device::{Device, DeviceId};
use crate::errors::DomainError;
use crate::text;

const FUZZY_THRESHOLD: f32 = 0.5;
const FUZZY_LIMIT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// A lookup hit. `exact` is set for identifier or full-description matches.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceMatch<'a> {
    pub device: &'a Device,
    pub exact: bool,
    pub score: f32,
}

/// Device records keyed by normalised identifier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryStore {
    devices: BTreeMap<DeviceId, Device>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    pub fn list_all(&self) -> Vec<&Device> {
        self.devices.values().collect()
    }

    pub fn list_available(&self) -> Vec<&Device> {
        self.devices.values().filter(|device| device.available() > 0).collect()
    }

    /// Creates the device or overwrites description and quantity, keeping the
    /// rented count. A known quantity can never drop below what is out on rent.
    pub fn upsert(
        &mut self,
        id: DeviceId,
        description: impl Into<String>,
        quantity: Option<u32>,
    ) -> Result<UpsertOutcome, DomainError> {
        let description = description.into();
        let Some(existing) = self.devices.get_mut(&id) else {
            let device = Device::new(id.clone(), description, quantity);
            self.devices.insert(id, device);
            return Ok(UpsertOutcome::Created);
        };

        if existing.rented > 0 && quantity.map_or(true, |quantity| quantity < existing.rented) {
            return Err(DomainError::QuantityBelowRented {
                id: id.to_string(),
                quantity: quantity.unwrap_or(0),
                rented: existing.rented,
            });
        }

        if existing.description == description && existing.quantity == quantity {
            return Ok(UpsertOutcome::Unchanged);
        }

        existing.description = description;
        existing.quantity = quantity;
        Ok(UpsertOutcome::Updated)
    }

    pub fn delete(&mut self, id: &DeviceId) -> Result<Device, DomainError> {
        let device =
            self.devices.get(id).ok_or_else(|| DomainError::UnknownDevice { id: id.to_string() })?;
        if device.rented > 0 {
            return Err(DomainError::OutstandingRentals { id: id.to_string(), rented: device.rented });
        }
        self.devices.remove(id).ok_or_else(|| DomainError::UnknownDevice { id: id.to_string() })
    }

    /// Moves the rented counter. Only the rental ledger calls this, always in
    /// the same mutation as the matching ledger change.
    pub(crate) fn adjust_rented(&mut self, id: &DeviceId, delta: i64) -> Result<(), DomainError> {
        let device = self
            .devices
            .get_mut(id)
            .ok_or_else(|| DomainError::UnknownDevice { id: id.to_string() })?;

        let next = i64::from(device.rented) + delta;
        if next < 0 {
            return Err(DomainError::InvariantViolation(format!(
                "rented count for {id} would drop below zero"
            )));
        }

        if delta > 0 {
            let Some(quantity) = device.quantity else {
                return Err(DomainError::QuantityUnspecified { id: id.to_string() });
            };
            if next > i64::from(quantity) {
                return Err(DomainError::InsufficientAvailability {
                    id: id.to_string(),
                    requested: u32::try_from(delta).unwrap_or(u32::MAX),
                    available: device.available(),
                });
            }
        }

        device.rented = u32::try_from(next).map_err(|_| {
            DomainError::InvariantViolation(format!("rented count for {id} overflowed"))
        })?;
        Ok(())
    }

    /// Case- and accent-insensitive full-description match.
    pub fn find_by_description(&self, description: &str) -> Option<&Device> {
        let wanted = text::fold(description);
        if wanted.is_empty() {
            return None;
        }
        self.devices.values().find(|device| text::fold(&device.description) == wanted)
    }

    /// Exact identifier, then exact description, then ranked token overlap.
    pub fn search(&self, query: &str) -> Vec<DeviceMatch<'_>> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }

        if let Some(device) = self.devices.get(&DeviceId::new(query)) {
            return vec![DeviceMatch { device, exact: true, score: 1.0 }];
        }
        if let Some(device) = self.find_by_description(query) {
            return vec![DeviceMatch { device, exact: true, score: 1.0 }];
        }

        let folded = text::fold(query);
        let mut matches = self
            .devices
            .values()
            .filter_map(|device| {
                let description = text::fold(&device.description);
                let mut score = text::token_overlap(query, &device.description)
                    .max(text::token_overlap(query, device.id.as_str()));
                if !folded.is_empty() && description.contains(&folded) {
                    score = score.max(0.9);
                }
                (score >= FUZZY_THRESHOLD).then_some(DeviceMatch { device, exact: false, score })
            })
            .collect::<Vec<_>>();

        matches.sort_by(|left, right| {
            right.score.total_cmp(&left.score).then_with(|| left.device.id.cmp(&right.device.id))
        });
        matches.truncate(FUZZY_LIMIT);
        matches
    }

    /// Identifier from the initials of each word, with a numeric suffix when
    /// the plain initials are already taken.
    pub fn generate_id(&self, description: &str) -> DeviceId {
        let initials = text::tokens(description)
            .iter()
            .filter_map(|token| token.chars().next())
            .collect::<String>();
        let base = if initials.is_empty() { "TB".to_owned() } else { initials.to_uppercase() };

        let first = DeviceId::new(&base);
        if !self.contains(&first) {
            return first;
        }
        (2u32..)
            .map(|suffix| DeviceId::new(&format!("{base}{suffix}")))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or(first)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}
