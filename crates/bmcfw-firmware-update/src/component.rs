//! Updatable components of one slot and how each one is reached.
//!
//! The table here is the only place that knows which controller owns which
//! device: every component resolves to a [`Route`], a lease key and the
//! image formats it accepts. The coordinator does not special-case anything
//! beyond what this module returns.

use core::fmt;
use core::str::FromStr;

use bmcfw_errors::UpdateError;
use bmcfw_image::ImageFormat;
use bmcfw_transport::{Hop, Link, Route, ipmi, smbus_selector};
use serde::{Deserialize, Serialize};

use crate::lease::{BASEBOARD_LEASE_KEY, lease_key};
use crate::programmer::I2cDevice;
use crate::programmer::cpld::{BB_CPLD, SB_CPLD};

/// PMBus segment of the server-board regulators.
pub const SB_VR_BUS: u8 = 4;
/// PMBus segment of the 2OU expansion-board regulators.
pub const EXP_VR_BUS: u8 = 1;

/// Voltage rail with its own regulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VrRail {
    /// CPU core
    Vccin,
    /// DIMM
    Vccd,
    /// Always-on uncore
    Vccinfaon,
    /// 2OU PCIe switch core
    ExpPesw,
    /// 2OU 3V3 standby, first rail
    ExpStby1,
    /// 2OU 3V3 standby, second rail
    ExpStby2,
    /// 2OU 3V3 standby, third rail
    ExpStby3,
    /// 2OU 1V8
    Exp1v8,
}

impl VrRail {
    /// Every rail, server board first.
    pub const ALL: [VrRail; 8] = [
        VrRail::Vccin,
        VrRail::Vccd,
        VrRail::Vccinfaon,
        VrRail::ExpPesw,
        VrRail::ExpStby1,
        VrRail::ExpStby2,
        VrRail::ExpStby3,
        VrRail::Exp1v8,
    ];

    /// Rail name as used in component names.
    pub fn name(self) -> &'static str {
        match self {
            VrRail::Vccin => "vccin",
            VrRail::Vccd => "vccd",
            VrRail::Vccinfaon => "vccinfaon",
            VrRail::ExpPesw => "2ou_pesw",
            VrRail::ExpStby1 => "2ou_3v3_stby1",
            VrRail::ExpStby2 => "2ou_3v3_stby2",
            VrRail::ExpStby3 => "2ou_3v3_stby3",
            VrRail::Exp1v8 => "2ou_1v8",
        }
    }

    /// Check if the rail sits on the 2OU expansion board.
    pub fn is_expansion(self) -> bool {
        !matches!(self, VrRail::Vccin | VrRail::Vccd | VrRail::Vccinfaon)
    }

    /// PMBus segment number.
    pub fn bus(self) -> u8 {
        if self.is_expansion() {
            EXP_VR_BUS
        } else {
            SB_VR_BUS
        }
    }

    /// 8-bit slave address of the regulator.
    pub fn address(self) -> u8 {
        match self {
            VrRail::Vccin => 0xC0,
            VrRail::Vccd => 0xC4,
            VrRail::Vccinfaon => 0xEC,
            VrRail::ExpPesw => 0xC8,
            VrRail::ExpStby1 => 0xB0,
            VrRail::ExpStby2 => 0xB4,
            VrRail::ExpStby3 => 0xB8,
            VrRail::Exp1v8 => 0xBC,
        }
    }

    /// Regulator as an I2C device.
    pub fn device(self) -> I2cDevice {
        I2cDevice::new(smbus_selector(self.bus()), self.address())
    }
}

/// One updatable component of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Voltage regulator
    Vr(VrRail),
    /// Server-board CPLD, Lattice
    SbCpld,
    /// Baseboard CPLD, Altera, shared by every slot
    BbCpld,
    /// 2OU expansion-board CPLD, Lattice
    ExpCpld,
    /// Host BIOS
    Bios,
    /// 2OU PCIe switch
    PcieSwitch,
}

impl Component {
    /// Every component, regulators first.
    pub fn all() -> Vec<Component> {
        VrRail::ALL
            .into_iter()
            .map(Component::Vr)
            .chain([
                Component::SbCpld,
                Component::BbCpld,
                Component::ExpCpld,
                Component::Bios,
                Component::PcieSwitch,
            ])
            .collect()
    }

    /// Route from the BMC to the controller that owns the device.
    pub fn route(self, slot: u8) -> Route {
        let base = Route::slot(slot);
        match self {
            Component::Vr(rail) if rail.is_expansion() => base.via(Hop::new(ipmi::intf::REXP_BIC)),
            Component::Vr(_) | Component::SbCpld => base,
            Component::BbCpld => base.via(Hop::new(ipmi::intf::BB_BIC)),
            Component::ExpCpld => base.via(Hop::new(ipmi::intf::REXP_BIC)),
            Component::Bios => base.with_link(Link::Usb),
            Component::PcieSwitch => base.via(Hop::new(ipmi::intf::REXP_BIC)).with_link(Link::Usb),
        }
    }

    /// Key of the update lease guarding this component.
    ///
    /// The baseboard CPLD is reachable from every slot, so its key is shared.
    pub fn lease_key(self, slot: u8) -> String {
        match self {
            Component::BbCpld => BASEBOARD_LEASE_KEY.to_string(),
            _ => lease_key(slot),
        }
    }

    /// I2C device that receives the update, if it is addressed over I2C.
    pub fn device(self) -> Option<I2cDevice> {
        match self {
            Component::Vr(rail) => Some(rail.device()),
            Component::SbCpld => Some(SB_CPLD),
            Component::BbCpld | Component::ExpCpld => Some(BB_CPLD),
            Component::Bios | Component::PcieSwitch => None,
        }
    }

    /// Image formats the component accepts.
    pub fn formats(self) -> &'static [ImageFormat] {
        match self {
            Component::Vr(_) => &[
                ImageFormat::Isl,
                ImageFormat::Pxe,
                ImageFormat::Ti,
                ImageFormat::Ifx,
            ],
            Component::SbCpld | Component::ExpCpld => &[ImageFormat::Lattice],
            Component::BbCpld => &[ImageFormat::Altera],
            Component::Bios => &[ImageFormat::Bios],
            Component::PcieSwitch => &[ImageFormat::Pcie],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Vr(rail) => write!(f, "vr_{}", rail.name()),
            Component::SbCpld => f.write_str("cpld"),
            Component::BbCpld => f.write_str("bb_cpld"),
            Component::ExpCpld => f.write_str("2ou_cpld"),
            Component::Bios => f.write_str("bios"),
            Component::PcieSwitch => f.write_str("2ou_pcie_switch"),
        }
    }
}

impl FromStr for Component {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Component::all()
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UpdateError::config(format!("unknown component {wanted:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() -> Result<(), UpdateError> {
        for component in Component::all() {
            assert_eq!(component.to_string().parse::<Component>()?, component);
        }
        assert_eq!("VR_VCCD".parse::<Component>()?, Component::Vr(VrRail::Vccd));
        assert!("vr_vddq".parse::<Component>().is_err());
        Ok(())
    }

    #[test]
    fn test_routes() {
        assert!(Component::SbCpld.route(1).is_direct());
        assert_eq!(Component::Bios.route(2).link(), Link::Usb);

        let bb = Component::BbCpld.route(3);
        assert_eq!(bb.slot_id(), 3);
        assert_eq!(
            bb.hops().iter().map(Hop::interface).collect::<Vec<_>>(),
            vec![ipmi::intf::BB_BIC]
        );

        let pesw = Component::PcieSwitch.route(1);
        assert_eq!(pesw.link(), Link::Usb);
        assert_eq!(
            pesw.hops().iter().map(Hop::interface).collect::<Vec<_>>(),
            vec![ipmi::intf::REXP_BIC]
        );

        assert!(Component::Vr(VrRail::Vccin).route(1).is_direct());
        assert!(!Component::Vr(VrRail::ExpStby2).route(1).is_direct());
    }

    #[test]
    fn test_lease_keys() {
        assert_eq!(Component::Bios.lease_key(2), "fru2_fwupd");
        assert_eq!(Component::BbCpld.lease_key(2), "bb_fw_update");
        assert_eq!(Component::BbCpld.lease_key(4), "bb_fw_update");
    }

    #[test]
    fn test_regulator_devices() {
        let vccin = VrRail::Vccin.device();
        assert_eq!(vccin.selector(), 0x09);
        assert_eq!(vccin.addr(), 0xC0);

        let stby = VrRail::ExpStby3.device();
        assert_eq!(stby.selector(), 0x03);
        assert_eq!(stby.addr(), 0xB8);

        assert_eq!(Component::Bios.device(), None);
        assert_eq!(Component::BbCpld.device(), Some(BB_CPLD));
    }
}
