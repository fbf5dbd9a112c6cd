//! The request/response contract the platform implements.

use bmcfw_errors::TransportError;

use crate::route::Route;

/// Blocking request/response primitive to an addressed controller.
///
/// Implementations own the physical bus (I2C, IPMB, USB) and nothing else:
/// they do not retry, interpret completion codes or strip relay envelopes.
/// [`crate::Channel`] layers those on top.
pub trait Transport: Send {
    /// Send one request and wait for its response.
    ///
    /// `request` is `[netfn << 2, cmd, data...]`, already wrapped for every
    /// hop of `route`. The response is `[completion_code, data...]` from the
    /// first controller on the route.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the exchange did not complete.
    fn send_recv(&mut self, route: &Route, request: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Push one pre-built packet over the bulk endpoint of `route`.
    ///
    /// The default rejects the transfer; only USB-capable transports
    /// override it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the transfer did not complete or the
    /// link has no bulk endpoint.
    fn bulk_write(&mut self, route: &Route, _packet: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(format!(
            "bulk transfer on {route}"
        )))
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_recv(&mut self, route: &Route, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).send_recv(route, request)
    }

    fn bulk_write(&mut self, route: &Route, packet: &[u8]) -> Result<(), TransportError> {
        (**self).bulk_write(route, packet)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_recv(&mut self, route: &Route, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).send_recv(route, request)
    }

    fn bulk_write(&mut self, route: &Route, packet: &[u8]) -> Result<(), TransportError> {
        (**self).bulk_write(route, packet)
    }
}
