pub mod conversation;
pub mod device;
