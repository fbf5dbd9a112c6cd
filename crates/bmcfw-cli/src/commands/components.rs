//! `bmcfw components`: the updatable component table for a slot

use anyhow::Result;
use bmcfw_firmware_update::Component;
use serde::Serialize;

use crate::output;

/// Addressing of one updatable component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentRow {
    /// Name accepted by the update entry point
    pub name: String,
    /// Route to the owning controller
    pub route: String,
    /// I2C bus selector and 8-bit address, when the device sits on a bus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Lease key held while updating
    pub lease: String,
    /// Accepted image formats
    pub formats: Vec<String>,
}

/// Component table rows for `slot`.
pub fn rows(slot: u8) -> Vec<ComponentRow> {
    Component::all()
        .into_iter()
        .map(|component| ComponentRow {
            name: component.to_string(),
            route: component.route(slot).to_string(),
            device: component
                .device()
                .map(|d| format!("{:#04x}/{:#04x}", d.selector(), d.addr())),
            lease: component.lease_key(slot),
            formats: component.formats().iter().map(ToString::to_string).collect(),
        })
        .collect()
}

/// Execute the components command.
pub fn execute(slot: u8, json: bool) -> Result<()> {
    output::print_components(slot, &rows(slot), json)
}
