//! Point to point communication
//!
//! Endpoints of communication are described by types that implement the
//! [`Source`] and [`Destination`] traits. Communication operations are
//! default methods on those traits: a [`Process`] acts as both a source and
//! a destination, an [`AnyProcess`] acts as the wildcard source.
//!
//! Sends are standard-mode blocking: the substrate copies the payload into
//! the destination mailbox eagerly, so a send returns as soon as the
//! caller's buffer is reusable. Blocking receives size their destination to
//! the incoming message; the immediate variants in [`request`](crate::request)
//! never resize and require pre-sized destinations.
//!
//! User tags are non-negative. The tag wildcard used by the untagged
//! receive and probe variants matches user messages only, never the
//! library's internal collective traffic.

use crate::datatype::traits::*;
use crate::datatype::{self, Datatype};
use crate::error::{ErrorCode, SUCCESS};
use crate::fabric::Envelope;
use crate::request::{ReceiveFuture, ReceiveRequest, SendRequest};
use crate::topology::traits::*;
use crate::topology::{AnyProcess, Process, Rank};
use crate::{Count, Tag};

/// Point to point communication traits
pub mod traits {
    pub use super::{Destination, Source};
}

/// Describes a completed or probed message: its envelope metadata and the
/// per-message error code.
#[derive(Copy, Clone, Debug)]
pub struct Status {
    source: Rank,
    tag: Tag,
    bytes: usize,
    error: ErrorCode,
}

impl Status {
    pub(crate) fn new(source: Rank, tag: Tag, bytes: usize) -> Status {
        Status {
            source,
            tag,
            bytes,
            error: SUCCESS,
        }
    }

    pub(crate) fn with_error(mut self, error: ErrorCode) -> Status {
        self.error = error;
        self
    }

    pub(crate) fn of_envelope(envelope: &Envelope) -> Status {
        Status::new(envelope.source, envelope.tag, envelope.data.len())
    }

    /// The rank of the message source
    pub fn source_rank(&self) -> Rank {
        self.source
    }

    /// The message tag
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The per-message error code; `SUCCESS` for a clean completion.
    pub fn error(&self) -> ErrorCode {
        self.error
    }

    /// Number of instances of the type contained in the message
    ///
    /// # Panics
    ///
    /// Panics if the message size is not a whole number of elements of the
    /// given datatype.
    pub fn count(&self, datatype: Datatype) -> Count {
        assert_eq!(
            self.bytes % datatype.extent(),
            0,
            "message of {} bytes does not hold whole {}-byte elements",
            self.bytes,
            datatype.extent()
        );
        (self.bytes / datatype.extent()) as Count
    }

    /// Number of instances of `Msg` contained in the message
    pub fn count_of<Msg: Equivalence>(&self) -> Count {
        self.count(Msg::equivalent_datatype())
    }
}

fn assert_user_tag(tag: Tag) {
    assert!(tag >= 0, "user tags must be non-negative, got {}", tag);
}

fn probe_matching<S: Source + ?Sized>(source: &S, tag: Option<Tag>) -> Status {
    let handle = source.as_communicator().as_handle();
    let _guard = handle.profile("probe");
    let (rank, tag, bytes) =
        handle
            .fabric()
            .peek(handle.own_world(), handle.context(), source.source_rank(), tag);
    Status::new(rank, tag, bytes)
}

fn immediate_probe_matching<S: Source + ?Sized>(source: &S, tag: Option<Tag>) -> Option<Status> {
    let handle = source.as_communicator().as_handle();
    let _guard = handle.profile("probe");
    handle
        .fabric()
        .try_peek(handle.own_world(), handle.context(), source.source_rank(), tag)
        .map(|(rank, tag, bytes)| Status::new(rank, tag, bytes))
}

fn receive_scalar<S: Source + ?Sized, Msg: Equivalence>(source: &S, tag: Option<Tag>) -> (Msg, Status) {
    let handle = source.as_communicator().as_handle();
    let _guard = handle.profile("recv");
    let envelope =
        handle
            .fabric()
            .take(handle.own_world(), handle.context(), source.source_rank(), tag);
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

fn receive_into_matching<S: Source + ?Sized, Buf: Payload + ?Sized>(
    source: &S,
    buf: &mut Buf,
    tag: Option<Tag>,
) -> Status {
    let handle = source.as_communicator().as_handle();
    let _guard = handle.profile("recv");
    let envelope =
        handle
            .fabric()
            .take(handle.own_world(), handle.context(), source.source_rank(), tag);
    let status = Status::of_envelope(&envelope);
    buf.assign_from(datatype::decode_vec(&envelope.data));
    status
}

/// Something that can be used as the source in a point to point receive
/// operation
///
/// # Examples
///
/// - A `Process` used as a source for a receive operation will receive data
///   only from the identified process.
/// - A communicator can also be used as a source via the `AnyProcess`
///   identifier.
pub trait Source: AsCommunicator {
    /// `Rank` that identifies the source; `None` is the wildcard and
    /// matches any member.
    fn source_rank(&self) -> Option<Rank>;

    /// Probe a source for incoming messages.
    ///
    /// Returns the envelope metadata of a pending message tagged `tag`
    /// without receiving it, blocking until such a message is pending. The
    /// message remains matchable by a subsequent receive.
    fn probe_with_tag(&self, tag: Tag) -> Status {
        assert_user_tag(tag);
        probe_matching(self, Some(tag))
    }

    /// Probe a source for incoming messages with any tag.
    fn probe(&self) -> Status {
        probe_matching(self, None)
    }

    /// Asynchronously probe a source for incoming messages.
    ///
    /// Like `probe()` but returns `None` immediately if there is no
    /// matching message pending.
    fn immediate_probe_with_tag(&self, tag: Tag) -> Option<Status> {
        assert_user_tag(tag);
        immediate_probe_matching(self, Some(tag))
    }

    /// Asynchronously probe a source for incoming messages with any tag.
    fn immediate_probe(&self) -> Option<Status> {
        immediate_probe_matching(self, None)
    }

    /// Receive a message containing a single instance of type `Msg`.
    fn receive_with_tag<Msg>(&self, tag: Tag) -> (Msg, Status)
    where
        Msg: Equivalence,
    {
        assert_user_tag(tag);
        receive_scalar(self, Some(tag))
    }

    /// Receive a message from `Source` `&self` containing a single instance
    /// of type `Msg`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use groupcomm::traits::*;
    ///
    /// groupcomm::run(2, |ctx| {
    ///     let world = ctx.world();
    ///     if world.rank() == 0 {
    ///         world.process_at_rank(1).send(&3.14f64);
    ///     } else {
    ///         let (x, _status) = world.any_process().receive::<f64>();
    ///         assert_eq!(x, 3.14);
    ///     }
    /// })
    /// .unwrap();
    /// ```
    fn receive<Msg>(&self) -> (Msg, Status)
    where
        Msg: Equivalence,
    {
        receive_scalar(self, None)
    }

    /// Receive a message into a payload.
    ///
    /// Sequence payloads (`Vec`, `VecDeque`, `LinkedList`) are resized to
    /// the element count of the incoming message; fixed-size payloads must
    /// match the incoming count exactly.
    fn receive_into_with_tag<Buf: ?Sized>(&self, buf: &mut Buf, tag: Tag) -> Status
    where
        Buf: Payload,
    {
        assert_user_tag(tag);
        receive_into_matching(self, buf, Some(tag))
    }

    /// Receive a message with any tag into a payload.
    fn receive_into<Buf: ?Sized>(&self, buf: &mut Buf) -> Status
    where
        Buf: Payload,
    {
        receive_into_matching(self, buf, None)
    }

    /// Receive a message containing multiple instances of type `Msg` into
    /// a `Vec` sized to the incoming message.
    fn receive_vec_with_tag<Msg>(&self, tag: Tag) -> (Vec<Msg>, Status)
    where
        Msg: Equivalence,
    {
        let mut buf = Vec::new();
        let status = self.receive_into_with_tag(&mut buf, tag);
        (buf, status)
    }

    /// Receive a message with any tag containing multiple instances of type
    /// `Msg` into a `Vec`.
    fn receive_vec<Msg>(&self) -> (Vec<Msg>, Status)
    where
        Msg: Equivalence,
    {
        let mut buf = Vec::new();
        let status = self.receive_into(&mut buf);
        (buf, status)
    }

    /// Initiate an immediate (non-blocking) receive operation into `buf`,
    /// matching messages tagged `tag`.
    ///
    /// The destination is never resized: `buf` must be pre-sized to hold
    /// the incoming element count. The returned request must be waited on,
    /// tested to completion, or cancelled.
    fn immediate_receive_into_with_tag<'b, Buf: ?Sized>(
        &self,
        buf: &'b mut Buf,
        tag: Tag,
    ) -> ReceiveRequest<'b, Buf>
    where
        Buf: Payload,
    {
        assert_user_tag(tag);
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("irecv");
        ReceiveRequest::new(handle, self.source_rank(), Some(tag), buf)
    }

    /// Initiate an immediate (non-blocking) receive operation into `buf`.
    fn immediate_receive_into<'b, Buf: ?Sized>(&self, buf: &'b mut Buf) -> ReceiveRequest<'b, Buf>
    where
        Buf: Payload,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("irecv");
        ReceiveRequest::new(handle, self.source_rank(), None, buf)
    }

    /// Initiate a non-blocking receive operation for a single instance of
    /// `Msg` matching tag `tag`, without providing a buffer up front.
    fn immediate_receive_with_tag<Msg>(&self, tag: Tag) -> ReceiveFuture<Msg>
    where
        Msg: Equivalence,
    {
        assert_user_tag(tag);
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("irecv");
        ReceiveFuture::new(handle, self.source_rank(), Some(tag))
    }

    /// Initiate a non-blocking receive operation for a single instance of
    /// `Msg`.
    fn immediate_receive<Msg>(&self) -> ReceiveFuture<Msg>
    where
        Msg: Equivalence,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("irecv");
        ReceiveFuture::new(handle, self.source_rank(), None)
    }
}

impl<'a, C> Source for AnyProcess<'a, C>
where
    C: 'a + Communicator,
{
    fn source_rank(&self) -> Option<Rank> {
        None
    }
}

impl<'a, C> Source for Process<'a, C>
where
    C: 'a + Communicator,
{
    fn source_rank(&self) -> Option<Rank> {
        Some(self.rank())
    }
}

/// Something that can be used as the destination in a point to point send
/// operation
pub trait Destination: AsCommunicator {
    /// `Rank` that identifies the destination
    fn destination_rank(&self) -> Rank;

    /// Send a message containing the payload `buf` tagged `tag`.
    ///
    /// Returns once `buf` is reusable; with this substrate that is as soon
    /// as the payload has been copied into the destination mailbox.
    fn send_with_tag<Buf: ?Sized>(&self, buf: &Buf, tag: Tag)
    where
        Buf: Payload,
    {
        assert_user_tag(tag);
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("send");
        let world = handle.world_rank(self.destination_rank());
        handle.fabric().post(
            world,
            Envelope {
                context: handle.context(),
                source: handle.rank(),
                tag,
                data: datatype::encode(buf),
            },
        );
    }

    /// Send a message containing the payload `buf` with the default tag.
    ///
    /// # Examples
    /// See `tests/point_to_point.rs`
    fn send<Buf: ?Sized>(&self, buf: &Buf)
    where
        Buf: Payload,
    {
        self.send_with_tag(buf, Tag::default());
    }

    /// Initiate an immediate (non-blocking) send of `buf` tagged `tag`.
    ///
    /// The payload is staged into the message envelope before this call
    /// returns, so the request completes eagerly and `buf` is immediately
    /// reusable; the request object still must be resolved.
    fn immediate_send_with_tag<Buf: ?Sized>(&self, buf: &Buf, tag: Tag) -> SendRequest
    where
        Buf: Payload,
    {
        assert_user_tag(tag);
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("isend");
        let world = handle.world_rank(self.destination_rank());
        handle.fabric().post(
            world,
            Envelope {
                context: handle.context(),
                source: handle.rank(),
                tag,
                data: datatype::encode(buf),
            },
        );
        SendRequest::completed()
    }

    /// Initiate an immediate (non-blocking) send of `buf` with the default
    /// tag.
    fn immediate_send<Buf: ?Sized>(&self, buf: &Buf) -> SendRequest
    where
        Buf: Payload,
    {
        self.immediate_send_with_tag(buf, Tag::default())
    }
}

impl<'a, C> Destination for Process<'a, C>
where
    C: 'a + Communicator,
{
    fn destination_rank(&self) -> Rank {
        self.rank()
    }
}
