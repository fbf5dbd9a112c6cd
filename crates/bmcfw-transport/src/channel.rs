//! Per-session request helper over a [`Transport`].

use std::time::Duration;

use bmcfw_errors::TransportError;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::ipmi::{CMD_APP_MASTER_WRITE_READ, IANA_ID, NETFN_APP, NETFN_OEM_1S};
use crate::retry::RetryPolicy;
use crate::route::Route;
use crate::transport::Transport;

/// Bus selector byte for an SMBus device behind the bridge: `(bus << 1) | 1`.
pub const fn smbus_selector(bus: u8) -> u8 {
    (bus << 1) | 1
}

/// A transport bound to one route, retry policy and clock.
///
/// Every helper performs exactly one logical exchange; a retryable
/// [`TransportError`] repeats that exchange up to the policy's attempt
/// budget, anything else is returned immediately.
pub struct Channel<'a> {
    transport: &'a mut dyn Transport,
    clock: &'a dyn Clock,
    route: Route,
    retry: RetryPolicy,
}

impl<'a> Channel<'a> {
    /// Bind `transport` to `route`.
    pub fn new(
        transport: &'a mut dyn Transport,
        clock: &'a dyn Clock,
        route: Route,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            clock,
            route,
            retry,
        }
    }

    /// Route of this channel.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Retry policy of this channel.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Clock of this channel.
    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    /// Sleep through the channel's clock.
    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Borrow the same transport over a different route.
    pub fn reroute(&mut self, route: Route) -> Channel<'_> {
        Channel {
            transport: &mut *self.transport,
            clock: self.clock,
            route,
            retry: self.retry,
        }
    }

    fn with_retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut dyn Transport, &Route) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let max = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(&mut *self.transport, &self.route) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max => {
                    warn!(route = %self.route, attempt, error = %e, "{what} failed, retrying");
                    self.clock.sleep(self.retry.delay_after(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send `[netfn << 2, cmd, data...]` and return the payload after the
    /// completion code.
    ///
    /// # Errors
    ///
    /// Returns the last [`TransportError`] once retries are exhausted, or
    /// the first non-retryable one.
    pub fn raw(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut request = Vec::with_capacity(data.len() + 2);
        request.push(netfn << 2);
        request.push(cmd);
        request.extend_from_slice(data);
        let wrapped = self.route.encapsulate(&request);

        self.with_retry("request", |transport, route| {
            let response = transport.send_recv(route, &wrapped)?;
            let (&code, payload) = response
                .split_first()
                .ok_or_else(|| TransportError::short(1, 0))?;
            if code != 0 {
                let (outer_netfn, outer_cmd) = if route.is_direct() {
                    (netfn, cmd)
                } else {
                    (NETFN_OEM_1S, crate::ipmi::CMD_OEM_1S_MSG_OUT)
                };
                return Err(TransportError::CompletionCode {
                    netfn: outer_netfn,
                    cmd: outer_cmd,
                    code,
                });
            }
            route.unwrap_response(payload.to_vec(), netfn, cmd)
        })
    }

    /// OEM request: prefixes the IANA id and strips its echo from the
    /// response.
    ///
    /// # Errors
    ///
    /// As [`Channel::raw`], plus [`TransportError::ShortResponse`] when the
    /// echo is missing.
    pub fn oem(&mut self, cmd: u8, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut body = Vec::with_capacity(data.len() + IANA_ID.len());
        body.extend_from_slice(&IANA_ID);
        body.extend_from_slice(data);
        let mut response = self.raw(NETFN_OEM_1S, cmd, &body)?;
        if response.len() < IANA_ID.len() {
            return Err(TransportError::short(IANA_ID.len(), response.len()));
        }
        response.drain(..IANA_ID.len());
        Ok(response)
    }

    /// I2C write-then-read through the bridge.
    ///
    /// `bus` is the selector byte placed verbatim in the request (see
    /// [`smbus_selector`]); `addr` is the 8-bit slave address.
    ///
    /// # Errors
    ///
    /// As [`Channel::raw`], plus [`TransportError::ShortResponse`] when fewer
    /// than `read_len` bytes come back.
    pub fn master_write_read(
        &mut self,
        bus: u8,
        addr: u8,
        write: &[u8],
        read_len: u8,
    ) -> Result<Vec<u8>, TransportError> {
        let mut data = Vec::with_capacity(write.len() + 3);
        data.extend_from_slice(&[bus, addr, read_len]);
        data.extend_from_slice(write);
        debug!(bus, addr, len = write.len(), read_len, "master write-read");
        let response = self.raw(NETFN_APP, CMD_APP_MASTER_WRITE_READ, &data)?;
        if response.len() < usize::from(read_len) {
            return Err(TransportError::short(usize::from(read_len), response.len()));
        }
        Ok(response)
    }

    /// Bulk packet over the route's USB endpoint.
    ///
    /// # Errors
    ///
    /// As [`Channel::raw`].
    pub fn bulk(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.with_retry("bulk transfer", |transport, route| {
            transport.bulk_write(route, packet)
        })
    }
}

impl core::fmt::Debug for Channel<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("route", &self.route)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
