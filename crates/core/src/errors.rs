use thiserror::Error;

/// Validation failures. The `Display` text is the reply shown in chat, so it
/// is written for the person who typed the command.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("❌ Không tìm thấy thiết bị `{id}`.")]
    UnknownDevice { id: String },
    #[error("⚠️ Thiết bị `{id}` chưa có số lượng, chưa thể cho thuê.")]
    QuantityUnspecified { id: String },
    #[error("⚠️ Số lượng không hợp lệ: `{raw}`. Hãy dùng số nguyên dương.")]
    InvalidQuantity { raw: String },
    #[error("❌ Thiết bị `{id}` chỉ còn {available} sẵn sàng, không đủ {requested}.")]
    InsufficientAvailability { id: String, requested: u32, available: u32 },
    #[error("⚠️ {borrower} không thuê thiết bị `{id}`.")]
    NotRenting { borrower: String, id: String },
    #[error("⚠️ {borrower} chỉ đang giữ {held} `{id}`, không thể trả {requested}.")]
    ReturnExceedsHeld { borrower: String, id: String, requested: u32, held: u32 },
    #[error("⚠️ Thiết bị `{id}` còn {rented} đang được thuê, không thể xoá.")]
    OutstandingRentals { id: String, rented: u32 },
    #[error("⚠️ Thiết bị `{id}` đang được thuê {rented}, không thể đặt tổng số lượng {quantity}.")]
    QuantityBelowRented { id: String, quantity: u32, rented: u32 },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "⚠️ Yêu cầu không hợp lệ, vui lòng kiểm tra lại.",
            Self::ServiceUnavailable { .. } => {
                "❌ Không lưu được thay đổi, vui lòng thử lại sau. Dữ liệu chưa bị thay đổi."
            }
            Self::Internal { .. } => "❌ Đã xảy ra lỗi nội bộ.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }

    /// Text to show in chat. Validation failures speak for themselves; anything
    /// else collapses to the fixed interface message.
    pub fn user_reply(&self, correlation_id: &str) -> String {
        match self {
            Self::Domain(DomainError::InvariantViolation(_)) => {
                self.clone().into_interface(correlation_id).user_message().to_owned()
            }
            Self::Domain(error) => error.to_string(),
            other => other.clone().into_interface(correlation_id).user_message().to_owned(),
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::UnknownDevice { id: "CAM".to_owned() })
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn validation_reply_names_the_device() {
        let error = ApplicationError::from(DomainError::InsufficientAvailability {
            id: "CAM".to_owned(),
            requested: 1,
            available: 0,
        });

        let reply = error.user_reply("req-2");
        assert!(reply.contains("CAM"));
        assert!(reply.contains("không đủ 1"));
    }

    #[test]
    fn persistence_error_collapses_to_fixed_message() {
        let error = ApplicationError::Persistence("database is locked".to_owned());
        let reply = error.user_reply("req-3");

        assert!(!reply.contains("database is locked"));
        assert!(matches!(error.into_interface("req-3"), InterfaceError::ServiceUnavailable { .. }));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface =
            ApplicationError::Configuration("bad token".to_owned()).into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.correlation_id(), "req-4");
        assert_eq!(interface.user_message(), "❌ Đã xảy ra lỗi nội bộ.");
    }
}
