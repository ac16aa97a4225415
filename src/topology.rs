//! Organizing processes as groups and communicators
//!
//! All processes initially partaking in the computation are members of the
//! 'world communicator', available from
//! [`Context::world()`](crate::environment::Context::world). From the world
//! communicator, further communicators are derived by duplication and by
//! color/key splits. Processes are addressed by their [`Rank`] within a
//! specific communicator; that pairing is encapsulated in a [`Process`].
//!
//! Every communicator wraps a [`GroupHandle`]: the substrate reference, a
//! private communication context, and the ordered member table mapping group
//! ranks to world endpoints. Handles are exclusively owned; a communicator is
//! valid for its entire lifetime and there is no observable null state.

use std::sync::{Arc, Mutex, Weak};

use log::debug;

use crate::chronometer::{ChronoShared, ProfileGuard};
use crate::error::Error;
use crate::fabric::{ContextId, Envelope, Fabric, PayloadBytes, TAG_DUP, TAG_SPLIT, WORLD_CONTEXT};

/// Topology traits
pub mod traits {
    pub use super::{AsCommunicator, AsHandle, Communicator};
}

/// Identifies a certain process within a communicator.
pub type Rank = i32;

/// A key used when determining the rank order of processes after a
/// communicator split.
pub type Key = i32;

/// Something that has a communicator associated with it
pub trait AsCommunicator {
    /// The type of the associated communicator
    type Out: Communicator;
    /// Returns the associated communicator.
    fn as_communicator(&self) -> &Self::Out;
}

/// Something backed by a [`GroupHandle`]
pub trait AsHandle {
    /// Returns the backing handle.
    fn as_handle(&self) -> &GroupHandle;
}

/// The state shared by all communicator types: substrate reference, private
/// communication context, ordered member table and the owner's rank.
///
/// A handle is exclusively owned and never cloned; two communicators match
/// each other's traffic only if they share the same context id, which only
/// happens for the world communicators of one fabric.
pub struct GroupHandle {
    fabric: Arc<Fabric>,
    context: ContextId,
    /// World endpoint of each member, indexed by group rank.
    members: Arc<[usize]>,
    rank: Rank,
    profiler: Mutex<Weak<ChronoShared>>,
}

impl GroupHandle {
    pub(crate) fn new(
        fabric: Arc<Fabric>,
        context: ContextId,
        members: Arc<[usize]>,
        rank: Rank,
    ) -> GroupHandle {
        GroupHandle {
            fabric,
            context,
            members,
            rank,
            profiler: Mutex::new(Weak::new()),
        }
    }

    /// Assembles a handle from its constituent parts.
    ///
    /// `members` lists the world endpoint of each group rank in group rank
    /// order; `rank` is the caller's position in that list; `context` is a
    /// message-space id the members agreed on, obtained from
    /// [`Fabric::allocate_context`]. All members must assemble identical
    /// tables for traffic to match.
    pub fn assemble(
        fabric: Arc<Fabric>,
        context: u64,
        members: Vec<usize>,
        rank: Rank,
    ) -> Result<GroupHandle, Error> {
        if members.is_empty() {
            return Err(Error::invalid_argument(3, "member table must be non-empty"));
        }
        if let Some(&out) = members.iter().find(|&&m| m >= fabric.size() as usize) {
            return Err(Error::invalid_argument(
                3,
                format!("world endpoint {} out of range", out),
            ));
        }
        let mut seen = members.clone();
        seen.sort_unstable();
        if seen.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::invalid_argument(
                3,
                "member table contains a duplicate endpoint",
            ));
        }
        if rank < 0 || rank as usize >= members.len() {
            return Err(Error::RankOutOfRange {
                rank,
                size: members.len() as Rank,
            });
        }
        Ok(GroupHandle::new(fabric, context, members.into(), rank))
    }

    pub(crate) fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub(crate) fn fabric_arc(&self) -> Arc<Fabric> {
        Arc::clone(&self.fabric)
    }

    pub(crate) fn context(&self) -> ContextId {
        self.context
    }

    /// Number of members.
    pub fn size(&self) -> Rank {
        self.members.len() as Rank
    }

    /// The owner's rank within the group.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// World endpoint of the member at `rank`.
    pub(crate) fn world_rank(&self, rank: Rank) -> usize {
        self.members[rank as usize]
    }

    /// The owner's world endpoint.
    pub(crate) fn own_world(&self) -> usize {
        self.members[self.rank as usize]
    }

    /// Group rank of the member with the given world endpoint, if any.
    pub(crate) fn rank_of_world(&self, world: usize) -> Option<Rank> {
        self.members.iter().position(|&m| m == world).map(|p| p as Rank)
    }

    pub(crate) fn set_profiler(&self, shared: &Arc<ChronoShared>) {
        *self.profiler.lock().unwrap() = Arc::downgrade(shared);
    }

    pub(crate) fn clear_profiler(&self) {
        *self.profiler.lock().unwrap() = Weak::new();
    }

    /// Starts a measurement for `label` if an activated profiler is
    /// attached.
    pub(crate) fn profile(&self, label: &'static str) -> Option<ProfileGuard> {
        let shared = self.profiler.lock().unwrap().upgrade()?;
        ProfileGuard::begin(shared, label)
    }

    /// Sends an internal control message to the member at `dest`.
    pub(crate) fn post_control(&self, dest: Rank, tag: crate::Tag, data: PayloadBytes) {
        self.fabric.post(
            self.world_rank(dest),
            Envelope {
                context: self.context,
                source: self.rank,
                tag,
                data,
            },
        );
    }

    /// Receives an internal control message from the member at `source`.
    pub(crate) fn take_control(&self, source: Rank, tag: crate::Tag) -> PayloadBytes {
        self.fabric
            .take(self.own_world(), self.context, Some(source), Some(tag))
            .data
    }
}

/// A color used in a communicator split
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Color(i32);

impl Color {
    /// Special color of undefined value
    ///
    /// A process that passes the undefined color to a split does not join
    /// any of the new communicators.
    pub fn undefined() -> Color {
        Color(-1)
    }

    /// A color of a certain value
    ///
    /// Valid values are non-negative.
    pub fn with_value(value: i32) -> Color {
        if value < 0 {
            panic!("value of color must be non-negative");
        }
        Color(value)
    }

    fn as_raw(&self) -> i32 {
        self.0
    }

    fn is_undefined(&self) -> bool {
        self.0 < 0
    }
}

/// Communicators are contexts for communication
pub trait Communicator: AsHandle {
    /// Number of processes in this communicator
    fn size(&self) -> Rank {
        self.as_handle().size()
    }

    /// The `Rank` that identifies the calling process within this
    /// communicator
    fn rank(&self) -> Rank {
        self.as_handle().rank()
    }

    /// Bundles a reference to this communicator with a specific `Rank` into
    /// a `Process`.
    fn process_at_rank(&self, r: Rank) -> Process<'_, Self>
    where
        Self: Sized,
    {
        assert!(
            0 <= r && r < self.size(),
            "rank {} out of range for a communicator of size {}",
            r,
            self.size()
        );
        Process { comm: self, rank: r }
    }

    /// Returns an `AnyProcess` identifier that can be used, e.g. as a
    /// `Source` in point to point communication.
    fn any_process(&self) -> AnyProcess<'_, Self>
    where
        Self: Sized,
    {
        AnyProcess(self)
    }

    /// A `Process` for the calling process
    fn this_process(&self) -> Process<'_, Self>
    where
        Self: Sized,
    {
        let rank = self.rank();
        Process { comm: self, rank }
    }

    /// Duplicate a communicator.
    ///
    /// The duplicate has the same membership and rank order but a fresh
    /// communication context; messages sent on the duplicate are never
    /// matched by receives on the original, and vice versa. This call is
    /// collective over the communicator.
    fn duplicate(&self) -> UserCommunicator {
        let handle = self.as_handle();
        let context = if handle.rank() == 0 {
            let context = handle.fabric().allocate_context();
            for r in 1..handle.size() {
                let mut data = PayloadBytes::new();
                data.extend_from_slice(&context.to_ne_bytes());
                handle.post_control(r, TAG_DUP, data);
            }
            context
        } else {
            let data = handle.take_control(0, TAG_DUP);
            u64::from_ne_bytes(data[..8].try_into().unwrap())
        };
        debug!(
            "rank {} duplicated communicator into context {}",
            handle.rank(),
            context
        );
        UserCommunicator(GroupHandle::new(
            handle.fabric_arc(),
            context,
            Arc::clone(&handle.members),
            handle.rank(),
        ))
    }

    /// Split a communicator by color.
    ///
    /// Creates as many new communicators as distinct values of `color` are
    /// given. All processes with the same value of `color` join the same
    /// communicator. A process that passes the special undefined color does
    /// not join a new communicator and `None` is returned. This call is
    /// collective over the communicator.
    fn split_by_color(&self, color: Color) -> Option<UserCommunicator> {
        self.split_by_color_with_key(color, Key::default())
    }

    /// Split a communicator by color.
    ///
    /// Like `split_by_color()` but orders processes within each new
    /// communicator by ascending `key`, ties broken by rank in the old
    /// communicator.
    fn split_by_color_with_key(&self, color: Color, key: Key) -> Option<UserCommunicator> {
        let handle = self.as_handle();
        let reply = if handle.rank() == 0 {
            // Gather (color, key) pairs, lay out the subgroups, then answer
            // each member with its new context, rank and member table.
            let size = handle.size();
            let mut pairs = Vec::with_capacity(size as usize);
            pairs.push((color.as_raw(), key));
            for r in 1..size {
                let data = handle.take_control(r, TAG_SPLIT);
                let c = i32::from_ne_bytes(data[..4].try_into().unwrap());
                let k = i32::from_ne_bytes(data[4..8].try_into().unwrap());
                pairs.push((c, k));
            }

            let mut colors: Vec<i32> = pairs
                .iter()
                .map(|&(c, _)| c)
                .filter(|&c| c >= 0)
                .collect();
            colors.sort_unstable();
            colors.dedup();
            let first_context = if colors.is_empty() {
                WORLD_CONTEXT
            } else {
                handle.fabric().allocate_contexts(colors.len() as u64)
            };

            let mut replies: Vec<PayloadBytes> = vec![PayloadBytes::new(); size as usize];
            for (index, &c) in colors.iter().enumerate() {
                let context = first_context + index as u64;
                let mut group: Vec<Rank> = (0..size).filter(|&r| pairs[r as usize].0 == c).collect();
                group.sort_by_key(|&r| (pairs[r as usize].1, r));
                for (new_rank, &old_rank) in group.iter().enumerate() {
                    let reply = &mut replies[old_rank as usize];
                    reply.extend_from_slice(&context.to_ne_bytes());
                    reply.extend_from_slice(&(new_rank as i32).to_ne_bytes());
                    for &member in &group {
                        reply.extend_from_slice(
                            &(handle.world_rank(member) as u64).to_ne_bytes(),
                        );
                    }
                }
            }
            for r in 1..size {
                let reply = std::mem::take(&mut replies[r as usize]);
                handle.post_control(r, TAG_SPLIT, reply);
            }
            std::mem::take(&mut replies[0])
        } else {
            let mut request = PayloadBytes::new();
            request.extend_from_slice(&color.as_raw().to_ne_bytes());
            request.extend_from_slice(&key.to_ne_bytes());
            handle.post_control(0, TAG_SPLIT, request);
            handle.take_control(0, TAG_SPLIT)
        };

        if color.is_undefined() {
            debug_assert!(reply.is_empty());
            return None;
        }
        let context = u64::from_ne_bytes(reply[..8].try_into().unwrap());
        let new_rank = i32::from_ne_bytes(reply[8..12].try_into().unwrap());
        let members: Arc<[usize]> = reply[12..]
            .chunks_exact(8)
            .map(|chunk| u64::from_ne_bytes(chunk.try_into().unwrap()) as usize)
            .collect();
        debug!(
            "rank {} split into context {} as rank {} of {}",
            handle.rank(),
            context,
            new_rank,
            members.len()
        );
        Some(UserCommunicator(GroupHandle::new(
            handle.fabric_arc(),
            context,
            members,
            new_rank,
        )))
    }

    /// Group rank in `other` of the process known as `rank` in this
    /// communicator, or `None` if it is not a member of `other`.
    fn translate_rank<C: ?Sized>(&self, rank: Rank, other: &C) -> Option<Rank>
    where
        C: Communicator,
    {
        let world = self.as_handle().world_rank(rank);
        other.as_handle().rank_of_world(world)
    }

    /// Translates several ranks at once; see
    /// [`translate_rank`](Communicator::translate_rank).
    fn translate_ranks<C: ?Sized>(&self, ranks: &[Rank], other: &C) -> Vec<Option<Rank>>
    where
        C: Communicator,
    {
        ranks.iter().map(|&r| self.translate_rank(r, other)).collect()
    }

    /// Compare two communicators.
    ///
    /// See enum `CommunicatorRelation`.
    fn compare<C: ?Sized>(&self, other: &C) -> CommunicatorRelation
    where
        C: Communicator,
    {
        use CommunicatorRelation::*;
        let a = self.as_handle();
        let b = other.as_handle();
        if a.members == b.members {
            if a.context == b.context {
                return Identical;
            }
            return Congruent;
        }
        let mut mine: Vec<usize> = a.members.to_vec();
        let mut theirs: Vec<usize> = b.members.to_vec();
        mine.sort_unstable();
        theirs.sort_unstable();
        if mine == theirs {
            Similar
        } else {
            Unequal
        }
    }
}

/// The relation between two communicators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CommunicatorRelation {
    /// Identical groups and same contexts
    Identical,
    /// Groups match in constituents and rank order, contexts differ
    Congruent,
    /// Group constituents match but rank order differs
    Similar,
    /// Otherwise
    Unequal,
}

/// The communicator spanning the full process group
///
/// Obtained from [`Context::world()`](crate::environment::Context::world).
pub struct WorldCommunicator(GroupHandle);

impl WorldCommunicator {
    pub(crate) fn new(fabric: Arc<Fabric>, rank: Rank) -> WorldCommunicator {
        let members: Arc<[usize]> = (0..fabric.size() as usize).collect();
        WorldCommunicator(GroupHandle::new(fabric, WORLD_CONTEXT, members, rank))
    }

    /// Releases the backing handle.
    pub fn into_handle(self) -> GroupHandle {
        self.0
    }
}

impl AsHandle for WorldCommunicator {
    fn as_handle(&self) -> &GroupHandle {
        &self.0
    }
}

impl Communicator for WorldCommunicator {}

impl AsCommunicator for WorldCommunicator {
    type Out = WorldCommunicator;
    fn as_communicator(&self) -> &Self::Out {
        self
    }
}

/// A user-defined communicator
///
/// Created by duplication or splitting, or by adopting an assembled
/// [`GroupHandle`].
pub struct UserCommunicator(GroupHandle);

impl UserCommunicator {
    /// Wraps an externally assembled handle.
    pub fn from_handle(handle: GroupHandle) -> UserCommunicator {
        UserCommunicator(handle)
    }

    /// Releases the backing handle.
    pub fn into_handle(self) -> GroupHandle {
        self.0
    }
}

impl AsHandle for UserCommunicator {
    fn as_handle(&self) -> &GroupHandle {
        &self.0
    }
}

impl Communicator for UserCommunicator {}

impl AsCommunicator for UserCommunicator {
    type Out = UserCommunicator;
    fn as_communicator(&self) -> &Self::Out {
        self
    }
}

/// Identifies a process by its `Rank` within a certain communicator.
#[derive(Copy, Clone)]
pub struct Process<'a, C>
where
    C: 'a + Communicator,
{
    comm: &'a C,
    rank: Rank,
}

impl<'a, C> Process<'a, C>
where
    C: 'a + Communicator,
{
    /// The process rank
    pub fn rank(&self) -> Rank {
        self.rank
    }
}

impl<'a, C> AsCommunicator for Process<'a, C>
where
    C: 'a + Communicator,
{
    type Out = C;
    fn as_communicator(&self) -> &Self::Out {
        self.comm
    }
}

/// Identifies an arbitrary process that is a member of a certain
/// communicator, e.g. for use as a `Source` in point to point communication.
pub struct AnyProcess<'a, C>(pub(crate) &'a C)
where
    C: 'a + Communicator;

impl<'a, C> AsCommunicator for AnyProcess<'a, C>
where
    C: 'a + Communicator,
{
    type Out = C;
    fn as_communicator(&self) -> &Self::Out {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn negative_colors_are_rejected() {
        Color::with_value(-3);
    }

    #[test]
    fn assemble_validates_member_table() {
        let fabric = Fabric::new(4).unwrap();
        let context = fabric.allocate_context();
        assert!(GroupHandle::assemble(Arc::clone(&fabric), context, vec![], 0).is_err());
        assert!(GroupHandle::assemble(Arc::clone(&fabric), context, vec![0, 9], 0).is_err());
        assert!(GroupHandle::assemble(Arc::clone(&fabric), context, vec![1, 1], 0).is_err());
        assert!(GroupHandle::assemble(Arc::clone(&fabric), context, vec![0, 1], 5).is_err());
        let handle = GroupHandle::assemble(fabric, context, vec![3, 1], 1).unwrap();
        assert_eq!(handle.size(), 2);
        assert_eq!(handle.rank(), 1);
        assert_eq!(handle.world_rank(0), 3);
    }

    #[test]
    fn comparison_is_a_local_computation() {
        let fabric = Fabric::new(3).unwrap();
        let world = WorldCommunicator::new(Arc::clone(&fabric), 0);
        let same = WorldCommunicator::new(Arc::clone(&fabric), 0);
        assert_eq!(world.compare(&same), CommunicatorRelation::Identical);

        let congruent = UserCommunicator::from_handle(
            GroupHandle::assemble(Arc::clone(&fabric), fabric.allocate_context(), vec![0, 1, 2], 0)
                .unwrap(),
        );
        assert_eq!(world.compare(&congruent), CommunicatorRelation::Congruent);

        let similar = UserCommunicator::from_handle(
            GroupHandle::assemble(Arc::clone(&fabric), fabric.allocate_context(), vec![2, 0, 1], 1)
                .unwrap(),
        );
        assert_eq!(world.compare(&similar), CommunicatorRelation::Similar);

        let unequal = UserCommunicator::from_handle(
            GroupHandle::assemble(Arc::clone(&fabric), fabric.allocate_context(), vec![0, 2], 0)
                .unwrap(),
        );
        assert_eq!(world.compare(&unequal), CommunicatorRelation::Unequal);
    }

    #[test]
    fn rank_translation_follows_membership() {
        let fabric = Fabric::new(4).unwrap();
        let world = WorldCommunicator::new(Arc::clone(&fabric), 0);
        let sub = UserCommunicator::from_handle(
            GroupHandle::assemble(Arc::clone(&fabric), fabric.allocate_context(), vec![3, 1], 0)
                .unwrap(),
        );
        assert_eq!(world.translate_rank(3, &sub), Some(0));
        assert_eq!(world.translate_rank(1, &sub), Some(1));
        assert_eq!(world.translate_rank(0, &sub), None);
        assert_eq!(
            sub.translate_ranks(&[0, 1], &world),
            vec![Some(3), Some(1)]
        );
    }
}
