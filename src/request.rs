//! Request objects for non-blocking operations
//!
//! Non-blocking operations such as `immediate_send()` return request objects
//! that borrow any buffers involved in the operation so as to ensure proper
//! access restrictions. To release the borrowed buffers, a completion
//! operation such as [`wait`](ReceiveRequest::wait) or
//! [`test`](ReceiveRequest::test) must be used on the request object, or the
//! request must be [cancelled](ReceiveRequest::cancel).
//!
//! **Note:** if a request is dropped without being resolved, the program
//! panics.
//!
//! Immediate sends complete at initiation: the payload is staged into the
//! message envelope before the initiating call returns. The send request
//! still must be resolved, keeping call sites portable to substrates with
//! genuinely deferred sends.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;

use crate::datatype;
use crate::datatype::traits::*;
use crate::error::CANCELLED;
use crate::fabric::{ContextId, Envelope, Fabric};
use crate::point_to_point::Status;
use crate::topology::{GroupHandle, Rank};
use crate::Tag;

/// The matching coordinates of a pending receive: where to look and what
/// envelope to accept.
struct Matcher {
    fabric: Arc<Fabric>,
    world: usize,
    context: ContextId,
    source: Option<Rank>,
    tag: Option<Tag>,
}

impl Matcher {
    fn new(handle: &GroupHandle, source: Option<Rank>, tag: Option<Tag>) -> Matcher {
        Matcher {
            fabric: handle.fabric_arc(),
            world: handle.own_world(),
            context: handle.context(),
            source,
            tag,
        }
    }

    fn take(&self) -> Envelope {
        self.fabric
            .take(self.world, self.context, self.source, self.tag)
    }

    fn try_take(&self) -> Option<Envelope> {
        self.fabric
            .try_take(self.world, self.context, self.source, self.tag)
    }
}

/// A request object for a non-blocking send
///
/// # Panics
///
/// Panics if dropped without being resolved by `wait`, `test` or `cancel`.
#[must_use]
#[derive(Debug)]
pub struct SendRequest {
    resolved: bool,
}

impl SendRequest {
    pub(crate) fn completed() -> SendRequest {
        SendRequest { resolved: false }
    }

    /// Wait for the send to finish, releasing the request.
    pub fn wait(mut self) {
        self.resolved = true;
    }

    /// Test whether the send has finished. With this substrate a send is
    /// finished from the moment of initiation, so this always succeeds.
    pub fn test(mut self) -> Result<(), SendRequest> {
        self.resolved = true;
        Ok(())
    }

    /// Initiate cancellation of the request. The message has already been
    /// delivered, so cancellation never takes effect; the request is
    /// released either way.
    pub fn cancel(mut self) {
        self.resolved = true;
    }
}

impl Drop for SendRequest {
    fn drop(&mut self) {
        if !self.resolved && !thread::panicking() {
            panic!("send request was dropped without being completed");
        }
    }
}

/// A request object for a non-blocking receive into a borrowed payload
///
/// The destination payload is never resized; it must be pre-sized to hold
/// the incoming element count.
///
/// # Panics
///
/// Panics if dropped without being resolved by `wait`, `test` or `cancel`.
///
/// # Examples
///
/// See `tests/immediate.rs`
#[must_use]
pub struct ReceiveRequest<'b, Buf: ?Sized + Payload> {
    matcher: Matcher,
    buf: Option<&'b mut Buf>,
}

impl<'b, Buf: ?Sized + Payload> ReceiveRequest<'b, Buf> {
    pub(crate) fn new(
        handle: &GroupHandle,
        source: Option<Rank>,
        tag: Option<Tag>,
        buf: &'b mut Buf,
    ) -> Self {
        ReceiveRequest {
            matcher: Matcher::new(handle, source, tag),
            buf: Some(buf),
        }
    }

    /// Wait for the receive to finish.
    ///
    /// Blocks until a matching message arrives, writes it into the borrowed
    /// payload and releases the request.
    pub fn wait(mut self) -> Status {
        let buf = self.buf.take().unwrap();
        let envelope = self.matcher.take();
        let status = Status::of_envelope(&envelope);
        buf.assign_prefix(&datatype::decode_vec(&envelope.data));
        status
    }

    /// Test whether the receive has finished.
    ///
    /// If a matching message has arrived, it is written into the borrowed
    /// payload and `Status` is returned. Otherwise the unfinished request is
    /// returned.
    pub fn test(mut self) -> Result<Status, Self> {
        match self.matcher.try_take() {
            Some(envelope) => {
                let status = Status::of_envelope(&envelope);
                let buf = self.buf.take().unwrap();
                buf.assign_prefix(&datatype::decode_vec(&envelope.data));
                Ok(status)
            }
            None => Err(self),
        }
    }

    /// Cancel the receive, releasing the request and the borrowed payload
    /// untouched. The returned `Status` carries the [`CANCELLED`] code; its
    /// envelope fields are meaningless.
    pub fn cancel(mut self) -> Status {
        self.buf = None;
        Status::new(-1, -1, 0).with_error(CANCELLED)
    }
}

impl<'b, Buf: ?Sized + Payload> Drop for ReceiveRequest<'b, Buf> {
    fn drop(&mut self) {
        if self.buf.is_some() && !thread::panicking() {
            panic!("receive request was dropped without being completed");
        }
    }
}

/// A future for a non-blocking receive of a single `Msg`, for call sites
/// that have no buffer to lend out
///
/// # Panics
///
/// Panics if dropped without being resolved by `get`, `try_get` or `cancel`.
#[must_use]
pub struct ReceiveFuture<Msg> {
    matcher: Matcher,
    resolved: bool,
    phantom: PhantomData<Msg>,
}

impl<Msg: Equivalence> ReceiveFuture<Msg> {
    pub(crate) fn new(handle: &GroupHandle, source: Option<Rank>, tag: Option<Tag>) -> Self {
        ReceiveFuture {
            matcher: Matcher::new(handle, source, tag),
            resolved: false,
            phantom: PhantomData,
        }
    }

    fn decode(envelope: Envelope) -> (Msg, Status) {
        let status = Status::of_envelope(&envelope);
        let elems = datatype::decode_vec::<Msg>(&envelope.data);
        assert_eq!(
            elems.len(),
            1,
            "scalar receive matched a message of {} elements",
            elems.len()
        );
        (elems[0], status)
    }

    /// Wait for the receive to finish and return the received value.
    pub fn get(mut self) -> (Msg, Status) {
        self.resolved = true;
        Self::decode(self.matcher.take())
    }

    /// Check whether the receive has finished, returning the unfinished
    /// future otherwise.
    pub fn try_get(mut self) -> Result<(Msg, Status), Self> {
        match self.matcher.try_take() {
            Some(envelope) => {
                self.resolved = true;
                Ok(Self::decode(envelope))
            }
            None => Err(self),
        }
    }

    /// Cancel the receive, releasing the future.
    pub fn cancel(mut self) -> Status {
        self.resolved = true;
        Status::new(-1, -1, 0).with_error(CANCELLED)
    }
}

impl<Msg> Drop for ReceiveFuture<Msg> {
    fn drop(&mut self) {
        if !self.resolved && !thread::panicking() {
            panic!("receive future was dropped without being completed");
        }
    }
}
