//! Routes to a target controller, including bridge relays.
//!
//! A request for a device behind one or more bridge controllers is wrapped
//! once per hop in an OEM `MSG_OUT` envelope:
//!
//! ```text
//! [NETFN_OEM_1S << 2, MSG_OUT, IANA(3), interface, inner request...]
//! ```
//!
//! The relayed response comes back as `[IANA(3), interface, netfn, cmd, cc,
//! payload...]` after the outer completion code, so the inner completion code
//! sits at byte 6 and the payload starts at byte 7.

use core::fmt;

use bmcfw_errors::TransportError;
use serde::{Deserialize, Serialize};

use crate::ipmi::{CMD_OEM_1S_MSG_OUT, IANA_ID, NETFN_OEM_1S, RELAY_CC_OFFSET};

/// Physical link used to reach the first controller on the route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Link {
    /// IPMB request/response
    #[default]
    Ipmb,
    /// USB bulk transfers for large payloads, IPMB for everything else
    Usb,
}

/// One bridge relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    iana: [u8; 3],
    interface: u8,
}

impl Hop {
    /// Relay through `interface` using the default OEM IANA id.
    pub const fn new(interface: u8) -> Self {
        Self {
            iana: IANA_ID,
            interface,
        }
    }

    /// Relay with an explicit IANA id.
    pub const fn with_iana(iana: [u8; 3], interface: u8) -> Self {
        Self { iana, interface }
    }

    /// Interface selector byte.
    pub const fn interface(&self) -> u8 {
        self.interface
    }

    /// IANA id prefix.
    pub const fn iana(&self) -> [u8; 3] {
        self.iana
    }

    fn wrap(&self, inner: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(inner.len() + 6);
        out.push(NETFN_OEM_1S << 2);
        out.push(CMD_OEM_1S_MSG_OUT);
        out.extend_from_slice(&self.iana);
        out.push(self.interface);
        out.extend_from_slice(inner);
        out
    }
}

/// Addressing of one update target, resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    slot: u8,
    link: Link,
    hops: Vec<Hop>,
}

impl Route {
    /// Direct IPMB route to the bridge controller of `slot`.
    pub fn slot(slot: u8) -> Self {
        Self {
            slot,
            link: Link::Ipmb,
            hops: Vec::new(),
        }
    }

    /// Append a relay hop.
    #[must_use]
    pub fn via(mut self, hop: Hop) -> Self {
        self.hops.push(hop);
        self
    }

    /// Select the link to the first controller.
    #[must_use]
    pub fn with_link(mut self, link: Link) -> Self {
        self.link = link;
        self
    }

    /// Same slot and link with the hops replaced.
    #[must_use]
    pub fn with_hops(&self, hops: Vec<Hop>) -> Self {
        Self {
            slot: self.slot,
            link: self.link,
            hops,
        }
    }

    /// Slot number.
    pub fn slot_id(&self) -> u8 {
        self.slot
    }

    /// Link to the first controller.
    pub fn link(&self) -> Link {
        self.link
    }

    /// Relay hops, outermost first.
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Check if the route reaches the first controller without relays.
    pub fn is_direct(&self) -> bool {
        self.hops.is_empty()
    }

    /// Wrap `request` once per hop, innermost hop first.
    pub fn encapsulate(&self, request: &[u8]) -> Vec<u8> {
        self.hops
            .iter()
            .rev()
            .fold(request.to_vec(), |inner, hop| hop.wrap(inner.as_slice()))
    }

    /// Strip relay envelopes from a response payload.
    ///
    /// `payload` is the outermost response with its completion code already
    /// checked and removed. `netfn`/`cmd` identify the innermost request and
    /// are used to label a failing inner completion code.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ShortResponse`] if an envelope is truncated
    /// and [`TransportError::CompletionCode`] if a relayed completion code is
    /// nonzero.
    pub fn unwrap_response(
        &self,
        mut payload: Vec<u8>,
        netfn: u8,
        cmd: u8,
    ) -> Result<Vec<u8>, TransportError> {
        let last = self.hops.len().saturating_sub(1);
        for (i, _hop) in self.hops.iter().enumerate() {
            let code = payload
                .get(RELAY_CC_OFFSET)
                .copied()
                .ok_or_else(|| TransportError::short(RELAY_CC_OFFSET + 1, payload.len()))?;
            if code != 0 {
                let (netfn, cmd) = if i == last {
                    (netfn, cmd)
                } else {
                    (NETFN_OEM_1S, CMD_OEM_1S_MSG_OUT)
                };
                return Err(TransportError::CompletionCode { netfn, cmd, code });
            }
            payload.drain(..=RELAY_CC_OFFSET);
        }
        Ok(payload)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.slot)?;
        for hop in &self.hops {
            write!(f, "->{:#04x}", hop.interface)?;
        }
        if self.link == Link::Usb {
            write!(f, " (usb)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipmi::intf;

    #[test]
    fn test_direct_route_passes_request_through() {
        let route = Route::slot(2);
        assert!(route.is_direct());
        assert_eq!(route.encapsulate(&[0x18, 0x01, 0xAA]), vec![0x18, 0x01, 0xAA]);
    }

    #[test]
    fn test_single_hop_envelope() {
        let route = Route::slot(1).via(Hop::new(intf::EXP_BIC));
        let wrapped = route.encapsulate(&[0x18, 0x52, 0x01]);
        assert_eq!(
            wrapped,
            vec![0xE0, 0x02, 0x9C, 0x9C, 0x00, 0x05, 0x18, 0x52, 0x01]
        );
    }

    #[test]
    fn test_two_hops_outermost_first() {
        let route = Route::slot(1)
            .via(Hop::new(intf::BB_BIC))
            .via(Hop::new(intf::REXP_BIC));
        let wrapped = route.encapsulate(&[0x18, 0x01]);
        assert_eq!(wrapped.get(5), Some(&intf::BB_BIC));
        assert_eq!(wrapped.get(11), Some(&intf::REXP_BIC));
        assert_eq!(wrapped.len(), 2 + 6 + 6);
    }

    #[test]
    fn test_unwrap_relayed_payload() -> Result<(), TransportError> {
        let route = Route::slot(1).via(Hop::new(intf::EXP_BIC));
        let rsp = vec![0x9C, 0x9C, 0x00, 0x05, 0x1C, 0x52, 0x00, 0xDE, 0xAD];
        assert_eq!(route.unwrap_response(rsp, 0x06, 0x52)?, vec![0xDE, 0xAD]);
        Ok(())
    }

    #[test]
    fn test_unwrap_inner_completion_code() {
        let route = Route::slot(1).via(Hop::new(intf::EXP_BIC));
        let rsp = vec![0x9C, 0x9C, 0x00, 0x05, 0x1C, 0x52, 0xC3];
        assert_eq!(
            route.unwrap_response(rsp, 0x06, 0x52),
            Err(TransportError::CompletionCode {
                netfn: 0x06,
                cmd: 0x52,
                code: 0xC3
            })
        );
    }

    #[test]
    fn test_unwrap_truncated_envelope() {
        let route = Route::slot(1).via(Hop::new(intf::EXP_BIC));
        assert_eq!(
            route.unwrap_response(vec![0x9C, 0x9C], 0x06, 0x52),
            Err(TransportError::short(7, 2))
        );
    }

    #[test]
    fn test_display() {
        let route = Route::slot(3)
            .via(Hop::new(intf::EXP_BIC))
            .with_link(Link::Usb);
        assert_eq!(route.to_string(), "slot3->0x05 (usb)");
    }
}
