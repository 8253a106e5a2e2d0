use serde::Serialize;

use crate::commands::{open_inventory, prepare, CommandResult};

#[derive(Debug, Serialize)]
struct DeviceRow {
    id: String,
    description: String,
    quantity: Option<u32>,
    rented: u32,
    available: u32,
    borrowers: Vec<BorrowerRow>,
}

#[derive(Debug, Serialize)]
struct BorrowerRow {
    borrower: String,
    quantity: u32,
}

#[derive(Debug, Serialize)]
struct InventoryReport {
    command: &'static str,
    status: &'static str,
    revision: u64,
    devices: Vec<DeviceRow>,
}

pub fn run(json_output: bool) -> CommandResult {
    let (config, runtime) = match prepare("inventory") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let (pool, inventory) = open_inventory(&config).await?;
        let report = inventory
            .read(|state| InventoryReport {
                command: "inventory",
                status: "ok",
                revision: state.revision,
                devices: state
                    .devices
                    .list_all()
                    .into_iter()
                    .map(|device| DeviceRow {
                        id: device.id.to_string(),
                        description: device.description.clone(),
                        quantity: device.quantity,
                        rented: device.rented,
                        available: device.available(),
                        borrowers: state
                            .borrowers_of(&device.id)
                            .into_iter()
                            .map(|(borrower, quantity)| BorrowerRow {
                                borrower: borrower.to_string(),
                                quantity,
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .await;
        let (summary, _) = inventory.render_summary().await;
        pool.close().await;
        Ok::<_, (&'static str, String, u8)>((report, summary))
    });

    match result {
        Ok((report, _)) if json_output => match serde_json::to_string_pretty(&report) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => CommandResult::failure("inventory", "serialization", error.to_string(), 7),
        },
        Ok((report, summary)) => CommandResult {
            exit_code: 0,
            output: format!("inventory revision {}\n{summary}", report.revision),
        },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("inventory", error_class, message, exit_code)
        }
    }
}
