use std::fmt::Write as _;
use std::sync::Arc;

use rentdesk_core::{
    ApplicationError, BorrowerId, Device, DeviceId, DomainError, InventoryState, RentalReceipt,
    UpsertOutcome,
};

use crate::intent::Intent;
use crate::service::InventoryService;

/// How the transport should render a reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplyStyle {
    #[default]
    Plain,
    Markdown,
    /// Sent as a preformatted block so list output keeps its layout.
    Verbatim,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub reply: String,
    pub style: ReplyStyle,
    pub mutated: bool,
    pub error: Option<ApplicationError>,
}

impl ExecutionOutcome {
    fn reply(reply: String) -> Self {
        Self { reply, style: ReplyStyle::Plain, mutated: false, error: None }
    }

    fn committed(reply: String, changed: bool) -> Self {
        Self { reply, style: ReplyStyle::Plain, mutated: changed, error: None }
    }

    fn failed(error: ApplicationError, correlation_id: &str) -> Self {
        Self {
            reply: error.user_reply(correlation_id),
            style: ReplyStyle::Plain,
            mutated: false,
            error: Some(error),
        }
    }

    pub fn is_unknown_device(&self) -> bool {
        matches!(self.error, Some(ApplicationError::Domain(DomainError::UnknownDevice { .. })))
    }
}

/// Turns classified intents into inventory operations and deterministic replies.
pub struct CommandExecutor {
    inventory: Arc<InventoryService>,
}

impl CommandExecutor {
    pub fn new(inventory: Arc<InventoryService>) -> Self {
        Self { inventory }
    }

    pub async fn execute(
        &self,
        intent: &Intent,
        sender: &BorrowerId,
        correlation_id: &str,
    ) -> ExecutionOutcome {
        let outcome = match self.run(intent, sender).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if matches!(error, ApplicationError::Domain(_)) {
                    tracing::debug!(
                        event_name = "inventory.command.rejected",
                        correlation_id,
                        intent = intent.kind().as_str(),
                        reason = %error,
                        "inventory command rejected"
                    );
                } else {
                    tracing::error!(
                        event_name = "inventory.command.failed",
                        correlation_id,
                        intent = intent.kind().as_str(),
                        error = %error,
                        "inventory command failed"
                    );
                }
                return ExecutionOutcome::failed(error, correlation_id);
            }
        };

        tracing::info!(
            event_name = "inventory.command.executed",
            correlation_id,
            intent = intent.kind().as_str(),
            mutated = outcome.mutated,
            "inventory command executed"
        );
        outcome
    }

    async fn run(
        &self,
        intent: &Intent,
        sender: &BorrowerId,
    ) -> Result<ExecutionOutcome, ApplicationError> {
        match intent {
            Intent::ListDevices => Ok(ExecutionOutcome::reply(self.inventory.read(render_device_list).await)),
            Intent::ListAvailable => {
                Ok(ExecutionOutcome::reply(self.inventory.read(render_available).await))
            }
            Intent::DescribeDevice { query } => {
                let reply = self.inventory.read(|state| render_description(state, query)).await?;
                Ok(ExecutionOutcome::reply(reply))
            }
            Intent::WhoIsRenting { id } => {
                let reply = self.inventory.read(|state| render_borrowers(state, id)).await?;
                Ok(ExecutionOutcome::reply(reply))
            }
            Intent::WhatAmIRenting { borrower } => {
                let borrower = borrower.as_ref().unwrap_or(sender);
                Ok(ExecutionOutcome::reply(
                    self.inventory.read(|state| render_holdings(state, borrower)).await,
                ))
            }
            Intent::RentDevice { id, quantity } => {
                let committed = self
                    .inventory
                    .mutate("rent", |state| state.rent(sender, id, *quantity))
                    .await?;
                Ok(ExecutionOutcome::committed(render_rent(&committed.value), committed.changed))
            }
            Intent::ReturnDevice { id, quantity } => {
                let committed = self
                    .inventory
                    .mutate("return", |state| state.return_device(sender, id, *quantity))
                    .await?;
                Ok(ExecutionOutcome::committed(render_return(&committed.value), committed.changed))
            }
            Intent::AddOrUpdateDevice { id, description, quantity } => {
                let committed = self
                    .inventory
                    .mutate("upsert", |state| {
                        let existing = state.devices.get(id).cloned();
                        let description = description
                            .clone()
                            .or_else(|| existing.as_ref().map(|device| device.description.clone()))
                            .unwrap_or_else(|| id.to_string());
                        let quantity = quantity.or(existing.and_then(|device| device.quantity));
                        let outcome = state.upsert_device(id.clone(), description, quantity)?;
                        let device = state
                            .devices
                            .get(id)
                            .cloned()
                            .ok_or_else(|| DomainError::UnknownDevice { id: id.to_string() })?;
                        Ok((outcome, device))
                    })
                    .await?;
                let (outcome, device) = &committed.value;
                Ok(ExecutionOutcome::committed(render_upsert(*outcome, device), committed.changed))
            }
            Intent::DeleteDevice { id } => {
                let committed = self.inventory.mutate("delete", |state| state.delete_device(id)).await?;
                let device = &committed.value;
                Ok(ExecutionOutcome::committed(
                    format!("🗑️ Đã xoá thiết bị {} ({}).", device.id, device.description),
                    committed.changed,
                ))
            }
            Intent::BulkDeviceList { lines } => {
                let committed =
                    self.inventory.mutate("bulk", |state| Ok(state.apply_bulk(lines))).await?;
                Ok(ExecutionOutcome {
                    reply: committed.value.render(),
                    style: ReplyStyle::Verbatim,
                    mutated: committed.changed,
                    error: None,
                })
            }
            Intent::Malformed { raw_quantity, .. } => {
                Err(DomainError::InvalidQuantity { raw: raw_quantity.clone() }.into())
            }
        }
    }
}

fn device_line(device: &Device) -> String {
    format!(
        "- {}: {} (tổng: {}, đang thuê: {}, còn: {})",
        device.id,
        device.description,
        device.quantity_label(),
        device.rented,
        device.available()
    )
}

fn render_device_list(state: &InventoryState) -> String {
    let devices = state.devices.list_all();
    if devices.is_empty() {
        return "📦 Kho thiết bị đang trống.".to_owned();
    }
    let mut reply = String::from("📦 Danh sách thiết bị:");
    for device in devices {
        let _ = write!(reply, "\n{}", device_line(device));
        let holders = state
            .borrowers_of(&device.id)
            .iter()
            .map(|(borrower, quantity)| format!("{borrower} x{quantity}"))
            .collect::<Vec<_>>();
        if !holders.is_empty() {
            let _ = write!(reply, "\n  người thuê: {}", holders.join(", "));
        }
    }
    reply
}

fn render_available(state: &InventoryState) -> String {
    let devices = state.devices.list_available();
    if devices.is_empty() {
        return "⚠️ Hiện không còn thiết bị nào sẵn sàng.".to_owned();
    }
    let mut reply = String::from("✅ Thiết bị còn sẵn:");
    for device in devices {
        let _ = write!(reply, "\n- {}: {} (còn {})", device.id, device.description, device.available());
    }
    reply
}

fn render_description(state: &InventoryState, query: &str) -> Result<String, DomainError> {
    let matches = state.devices.search(query);
    let Some(first) = matches.first() else {
        return Err(DomainError::UnknownDevice { id: query.to_owned() });
    };

    if first.exact {
        let device = first.device;
        let mut reply = format!(
            "ℹ️ {}: {}\nTổng: {} | Đang thuê: {} | Còn: {}",
            device.id,
            device.description,
            device.quantity_label(),
            device.rented,
            device.available()
        );
        let borrowers = state.borrowers_of(&device.id);
        if !borrowers.is_empty() {
            let holders = borrowers
                .iter()
                .map(|(borrower, quantity)| format!("{borrower} x{quantity}"))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(reply, "\nNgười thuê: {holders}");
        }
        return Ok(reply);
    }

    let mut reply = format!("🔎 Không có thiết bị nào khớp chính xác `{query}`. Có phải bạn muốn tìm:");
    for candidate in &matches {
        let _ = write!(reply, "\n{}", device_line(candidate.device));
    }
    Ok(reply)
}

fn render_borrowers(state: &InventoryState, id: &DeviceId) -> Result<String, DomainError> {
    let device = state.devices.get(id).ok_or_else(|| DomainError::UnknownDevice { id: id.to_string() })?;
    let borrowers = state.borrowers_of(id);
    if borrowers.is_empty() {
        return Ok(format!("👥 Không ai đang thuê {} ({}).", device.id, device.description));
    }
    let mut reply = format!("👥 Người đang thuê {} ({}):", device.id, device.description);
    for (borrower, quantity) in borrowers {
        let _ = write!(reply, "\n- {borrower}: {quantity}");
    }
    Ok(reply)
}

fn render_holdings(state: &InventoryState, borrower: &BorrowerId) -> String {
    let held = state.devices_held_by(borrower);
    if held.is_empty() {
        return format!("🎒 {borrower} không thuê thiết bị nào.");
    }
    let mut reply = format!("🎒 {borrower} đang thuê:");
    for (id, quantity) in held {
        let description = state.devices.get(&id).map(|device| device.description.as_str()).unwrap_or("?");
        let _ = write!(reply, "\n- {id} ({description}) x{quantity}");
    }
    reply
}

fn render_rent(receipt: &RentalReceipt) -> String {
    format!(
        "✅ {} đã thuê {} {} ({}). Kho còn: {}.",
        receipt.borrower, receipt.quantity, receipt.device_id, receipt.description, receipt.available
    )
}

fn render_return(receipt: &RentalReceipt) -> String {
    format!(
        "↩️ {} đã trả {} {} ({}). Còn giữ: {}, kho còn: {}.",
        receipt.borrower,
        receipt.quantity,
        receipt.device_id,
        receipt.description,
        receipt.held,
        receipt.available
    )
}

fn render_upsert(outcome: UpsertOutcome, device: &Device) -> String {
    match outcome {
        UpsertOutcome::Created => format!(
            "🆕 Đã thêm thiết bị {}: {} (số lượng: {}).",
            device.id,
            device.description,
            device.quantity_label()
        ),
        UpsertOutcome::Updated => format!(
            "✏️ Đã cập nhật thiết bị {}: {} (số lượng: {}).",
            device.id,
            device.description,
            device.quantity_label()
        ),
        UpsertOutcome::Unchanged => format!("ℹ️ Thiết bị {} không có gì thay đổi.", device.id),
    }
}
