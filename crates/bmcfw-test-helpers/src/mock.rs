//! Scripted transport and virtual clock.
//!
//! [`MockTransport`] decodes every request the engine sends (stripping the
//! relay envelopes of its route) and answers it from, in order: injected
//! failures, the scripted reply queue, the handler closure, and finally an
//! empty success (with the IANA echo for OEM requests). Replies are
//! re-wrapped in one relay envelope per hop so the engine's own unwrapping
//! runs against them.
//!
//! [`ManualClock`] records sleeps instead of blocking, so the full state
//! machines of the update engine run instantly in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bmcfw_errors::TransportError;
use bmcfw_transport::ipmi::{
    CMD_APP_MASTER_WRITE_READ, CMD_OEM_1S_MSG_OUT, IANA_ID, NETFN_APP, NETFN_OEM_1S,
};
use bmcfw_transport::{Clock, Route, Transport};
use parking_lot::Mutex;

const ENVELOPE_LEN: usize = 6;

/// A decoded request as seen by the innermost controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Route the request was sent on
    pub route: Route,
    /// Network function
    pub netfn: u8,
    /// Command
    pub cmd: u8,
    /// Request data after `cmd`
    pub data: Vec<u8>,
}

/// Decoded `MASTER_WRITE_READ` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cRequest<'a> {
    /// Bus selector byte
    pub bus: u8,
    /// 8-bit slave address
    pub addr: u8,
    /// Bytes the caller wants back
    pub read_len: u8,
    /// Bytes written to the slave
    pub write: &'a [u8],
}

impl Request {
    /// Strip one relay envelope per hop of `route` from `raw`.
    pub fn parse(route: &Route, raw: &[u8]) -> Option<Self> {
        let mut inner = raw;
        for _ in route.hops() {
            inner = inner.get(ENVELOPE_LEN..)?;
        }
        let (&netfn_lun, rest) = inner.split_first()?;
        let (&cmd, data) = rest.split_first()?;
        Some(Self {
            route: route.clone(),
            netfn: netfn_lun >> 2,
            cmd,
            data: data.to_vec(),
        })
    }

    /// Check the network function and command.
    pub fn is(&self, netfn: u8, cmd: u8) -> bool {
        self.netfn == netfn && self.cmd == cmd
    }

    /// Check for an OEM request with command `cmd`.
    pub fn is_oem(&self, cmd: u8) -> bool {
        self.is(NETFN_OEM_1S, cmd)
    }

    /// OEM body after the IANA id.
    pub fn oem_body(&self) -> Option<&[u8]> {
        if self.netfn != NETFN_OEM_1S {
            return None;
        }
        self.data.strip_prefix(&IANA_ID[..])
    }

    /// Decoded I2C write-read, if this is one.
    pub fn i2c(&self) -> Option<I2cRequest<'_>> {
        if !self.is(NETFN_APP, CMD_APP_MASTER_WRITE_READ) {
            return None;
        }
        match self.data.as_slice() {
            [bus, addr, read_len, write @ ..] => Some(I2cRequest {
                bus: *bus,
                addr: *addr,
                read_len: *read_len,
                write,
            }),
            _ => None,
        }
    }
}

/// Answer to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Completion code 0 followed by the payload
    Ok(Vec<u8>),
    /// Nonzero completion code from the innermost controller
    Code(u8),
    /// Exchange failure
    Err(TransportError),
}

impl Reply {
    /// Success with no data.
    pub fn empty() -> Self {
        Reply::Ok(Vec::new())
    }

    /// OEM success: the IANA echo followed by `payload`.
    pub fn oem(payload: &[u8]) -> Self {
        let mut data = IANA_ID.to_vec();
        data.extend_from_slice(payload);
        Reply::Ok(data)
    }

    /// Empty success for `request`; OEM requests get their IANA echo.
    pub fn empty_for(request: &Request) -> Self {
        if request.netfn == NETFN_OEM_1S {
            Reply::oem(&[])
        } else {
            Reply::empty()
        }
    }
}

type Handler = Box<dyn FnMut(&Request) -> Reply + Send>;

#[derive(Default)]
struct State {
    requests: Vec<Request>,
    raw: Vec<Vec<u8>>,
    bulk: Vec<Vec<u8>>,
    script: VecDeque<Reply>,
    handler: Option<Handler>,
    fail_next: usize,
    fail_bulk_next: usize,
}

/// Scripted [`Transport`]; clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl core::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("requests", &state.requests.len())
            .field("bulk", &state.bulk.len())
            .field("scripted", &state.script.len())
            .finish_non_exhaustive()
    }
}

fn wrap_reply(request: &Request, reply: Reply) -> Result<Vec<u8>, TransportError> {
    let (inner_cc, mut body) = match reply {
        Reply::Ok(payload) => (0u8, payload),
        Reply::Code(code) => (code, Vec::new()),
        Reply::Err(e) => return Err(e),
    };
    let hops = request.route.hops();
    if hops.is_empty() {
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(inner_cc);
        out.extend_from_slice(&body);
        return Ok(out);
    }
    let last = hops.len() - 1;
    for (i, hop) in hops.iter().enumerate().rev() {
        let (netfn, cmd, cc) = if i == last {
            (request.netfn, request.cmd, inner_cc)
        } else {
            (NETFN_OEM_1S, CMD_OEM_1S_MSG_OUT, 0)
        };
        let mut layer = Vec::with_capacity(body.len() + 7);
        layer.extend_from_slice(&hop.iana());
        layer.push(hop.interface());
        layer.push((netfn + 1) << 2);
        layer.push(cmd);
        layer.push(cc);
        layer.extend_from_slice(&body);
        body = layer;
    }
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(0);
    out.extend_from_slice(&body);
    Ok(out)
}

impl MockTransport {
    /// Transport answering every request with an empty success.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport answering through `handler`.
    pub fn with_handler(handler: impl FnMut(&Request) -> Reply + Send + 'static) -> Self {
        let mock = Self::new();
        mock.set_handler(handler);
        mock
    }

    /// Replace the handler. It must not call back into this mock.
    pub fn set_handler(&self, handler: impl FnMut(&Request) -> Reply + Send + 'static) {
        self.state.lock().handler = Some(Box::new(handler));
    }

    /// Queue a reply ahead of the handler.
    pub fn push_reply(&self, reply: Reply) {
        self.state.lock().script.push_back(reply);
    }

    /// Queue several replies.
    pub fn push_replies(&self, replies: impl IntoIterator<Item = Reply>) {
        self.state.lock().script.extend(replies);
    }

    /// Fail the next `n` requests with a timeout.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().fail_next = n;
    }

    /// Fail the next `n` bulk transfers with an I/O error.
    pub fn fail_bulk_next(&self, n: usize) {
        self.state.lock().fail_bulk_next = n;
    }

    /// Decoded requests, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    /// Decoded requests matching `netfn`/`cmd`.
    pub fn requests_for(&self, netfn: u8, cmd: u8) -> Vec<Request> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.is(netfn, cmd))
            .cloned()
            .collect()
    }

    /// Number of requests matching `netfn`/`cmd`.
    pub fn count(&self, netfn: u8, cmd: u8) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.is(netfn, cmd))
            .count()
    }

    /// Requests exactly as they were put on the wire.
    pub fn raw_requests(&self) -> Vec<Vec<u8>> {
        self.state.lock().raw.clone()
    }

    /// Bulk packets, in order.
    pub fn bulk_packets(&self) -> Vec<Vec<u8>> {
        self.state.lock().bulk.clone()
    }

    /// Forget recorded traffic and queued replies; the handler stays.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        state.raw.clear();
        state.bulk.clear();
        state.script.clear();
        state.fail_next = 0;
        state.fail_bulk_next = 0;
    }
}

impl Transport for MockTransport {
    fn send_recv(&mut self, route: &Route, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let decoded = Request::parse(route, request)
            .ok_or_else(|| TransportError::io(format!("undecodable request {request:02x?}")))?;

        let mut handler = {
            let mut state = self.state.lock();
            state.raw.push(request.to_vec());
            state.requests.push(decoded.clone());
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError::timeout(route.to_string(), 100));
            }
            if let Some(reply) = state.script.pop_front() {
                return wrap_reply(&decoded, reply);
            }
            state.handler.take()
        };

        let reply = handler
            .as_mut()
            .map_or_else(|| Reply::empty_for(&decoded), |h| h(&decoded));
        if let Some(handler) = handler {
            let mut state = self.state.lock();
            if state.handler.is_none() {
                state.handler = Some(handler);
            }
        }
        wrap_reply(&decoded, reply)
    }

    fn bulk_write(&mut self, _route: &Route, packet: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.bulk.push(packet.to_vec());
        if state.fail_bulk_next > 0 {
            state.fail_bulk_next -= 1;
            return Err(TransportError::io("usb stall"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClockState {
    now: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual clock: `sleep` advances time and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    /// Clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now = state.now.saturating_add(by);
    }

    /// Every sleep, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Sum of every sleep.
    pub fn total_slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.now = state.now.saturating_add(duration);
        state.sleeps.push(duration);
    }

    fn now(&self) -> Duration {
        self.state.lock().now
    }
}

#[cfg(test)]
mod tests {
    use bmcfw_transport::ipmi::{CMD_OEM_1S_GET_FW_CKSUM, intf};
    use bmcfw_transport::{Channel, Hop, RetryPolicy, smbus_selector};

    use super::*;

    #[test]
    fn test_direct_oem_roundtrip() -> Result<(), TransportError> {
        let mock = MockTransport::with_handler(|req| match req.oem_body() {
            Some([target, ..]) => Reply::oem(&[*target, 0xAA]),
            _ => Reply::Code(0xC1),
        });
        let mut transport = mock.clone();
        let clock = ManualClock::new();
        let mut ch = Channel::new(&mut transport, &clock, Route::slot(1), RetryPolicy::none());
        assert_eq!(ch.oem(CMD_OEM_1S_GET_FW_CKSUM, &[0x07])?, vec![0x07, 0xAA]);
        assert_eq!(mock.count(NETFN_OEM_1S, CMD_OEM_1S_GET_FW_CKSUM), 1);
        Ok(())
    }

    #[test]
    fn test_relayed_i2c_decoded_and_wrapped() -> Result<(), TransportError> {
        let mock = MockTransport::with_handler(|req| match req.i2c() {
            Some(i2c) if i2c.addr == 0xC0 => Reply::Ok(vec![0x5A; usize::from(i2c.read_len)]),
            _ => Reply::Code(0xFF),
        });
        let mut transport = mock.clone();
        let clock = ManualClock::new();
        let route = Route::slot(2)
            .via(Hop::new(intf::BB_BIC))
            .via(Hop::new(intf::EXP_BIC));
        let mut ch = Channel::new(&mut transport, &clock, route, RetryPolicy::none());
        let rsp = ch.master_write_read(smbus_selector(4), 0xC0, &[0xAD], 3)?;
        assert_eq!(rsp, vec![0x5A; 3]);

        let reqs = mock.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].data, vec![0x09, 0xC0, 0x03, 0xAD]);
        assert_eq!(mock.raw_requests()[0].len(), 4 + 2 + 2 * ENVELOPE_LEN);
        Ok(())
    }

    #[test]
    fn test_inner_completion_code_through_hop() {
        let mut mock = MockTransport::new();
        mock.push_reply(Reply::Code(0xD5));
        let clock = ManualClock::new();
        let route = Route::slot(1).via(Hop::new(intf::EXP_BIC));
        let mut ch = Channel::new(&mut mock, &clock, route, RetryPolicy::none());
        assert_eq!(
            ch.raw(NETFN_APP, 0x01, &[]),
            Err(TransportError::CompletionCode {
                netfn: NETFN_APP,
                cmd: 0x01,
                code: 0xD5
            })
        );
    }

    #[test]
    fn test_injected_failures_are_retried() -> Result<(), TransportError> {
        let mock = MockTransport::new();
        mock.fail_next(2);
        let mut transport = mock.clone();
        let clock = ManualClock::new();
        let policy = RetryPolicy::fixed(3, Duration::from_millis(50));
        let mut ch = Channel::new(&mut transport, &clock, Route::slot(1), policy);
        ch.raw(NETFN_APP, 0x01, &[])?;
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(100));
        Ok(())
    }

    #[test]
    fn test_script_before_handler() -> Result<(), TransportError> {
        let mut mock = MockTransport::with_handler(|_| Reply::Ok(vec![2]));
        mock.push_reply(Reply::Ok(vec![1]));
        let clock = ManualClock::new();
        let mut ch = Channel::new(&mut mock, &clock, Route::slot(1), RetryPolicy::none());
        assert_eq!(ch.raw(NETFN_APP, 0x01, &[])?, vec![1]);
        assert_eq!(ch.raw(NETFN_APP, 0x01, &[])?, vec![2]);
        Ok(())
    }

    #[test]
    fn test_bulk_recorded() {
        let mut mock = MockTransport::new();
        mock.fail_bulk_next(1);
        let route = Route::slot(1);
        assert!(mock.bulk_write(&route, &[1, 2]).is_err());
        assert!(mock.bulk_write(&route, &[3]).is_ok());
        assert_eq!(mock.bulk_packets(), vec![vec![1, 2], vec![3]]);
        mock.clear();
        assert!(mock.bulk_packets().is_empty());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_millis(10));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_millis(1010));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10)]);
    }
}
