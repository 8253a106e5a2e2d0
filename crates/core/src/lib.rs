//! Rentdesk core - inventory and conversation domain
//!
//! Everything in this crate is deterministic and free of network or database
//! I/O. The agent runtime decides *when* to mutate state; this crate decides
//! *whether* a mutation is allowed.
//!
//! - `inventory` - device records and the `0 <= rented <= quantity` invariant
//! - `ledger` - borrower holdings, kept co-invariant with the inventory
//! - `bulk` - multi-line device list parsing and application
//! - `domain` - identifiers, device records, conversation logs
//! - `config` - layered configuration (defaults, file, env, overrides)

pub mod bulk;
pub mod config;
pub mod domain;
pub mod errors;
pub mod inventory;
pub mod ledger;
pub mod text;

pub use bulk::{BulkLine, BulkLineOutcome, BulkReport};
pub use domain::conversation::{ChatMessage, ConversationEntry, ConversationLog, Role};
pub use domain::device::{BorrowerId, Device, DeviceId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use inventory::{DeviceMatch, InventoryStore, UpsertOutcome};
pub use ledger::{InventoryState, RentalLedger, RentalReceipt};
