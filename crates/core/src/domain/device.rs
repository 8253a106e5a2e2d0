use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalised device key. Identifiers are compared case-insensitively, so the
/// stored form is always trimmed and upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Borrower identity as delivered by the chat transport (display name or
/// username). A leading `@` is dropped so `@alice` and `alice` are one borrower.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct BorrowerId(String);

impl BorrowerId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().trim_start_matches('@').to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BorrowerId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<BorrowerId> for String {
    fn from(value: BorrowerId) -> Self {
        value.0
    }
}

impl fmt::Display for BorrowerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub description: String,
    /// `None` until someone states how many units exist.
    pub quantity: Option<u32>,
    #[serde(default)]
    pub rented: u32,
}

impl Device {
    pub fn new(id: DeviceId, description: impl Into<String>, quantity: Option<u32>) -> Self {
        Self { id, description: description.into(), quantity, rented: 0 }
    }

    /// Units that can still be rented. Unknown quantity means nothing is rentable.
    pub fn available(&self) -> u32 {
        self.quantity.map(|quantity| quantity.saturating_sub(self.rented)).unwrap_or(0)
    }

    pub fn quantity_label(&self) -> String {
        match self.quantity {
            Some(quantity) => quantity.to_string(),
            None => "chưa xác định".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BorrowerId, Device, DeviceId};

    #[test]
    fn device_id_is_case_insensitive() {
        assert_eq!(DeviceId::new(" cam "), DeviceId::new("CAM"));
        assert_eq!(DeviceId::new("máy1").as_str(), "MÁY1");
    }

    #[test]
    fn device_id_normalises_on_deserialize() {
        let id: DeviceId = serde_json::from_str("\"cam\"").expect("deserialize id");
        assert_eq!(id, DeviceId::new("CAM"));
    }

    #[test]
    fn borrower_drops_leading_at_sign() {
        assert_eq!(BorrowerId::new("@alice"), BorrowerId::new("alice"));
    }

    #[test]
    fn unknown_quantity_has_nothing_available() {
        let device = Device::new(DeviceId::new("TRI"), "Tripod", None);
        assert_eq!(device.available(), 0);
        assert_eq!(device.quantity_label(), "chưa xác định");
    }
}
