//! Collective communication
//!
//! Developing a collective operation involves all processes in the
//! communicator: symmetric operations such as [`barrier`] and
//! [`all_reduce_into`] are default methods on [`CommunicatorCollectives`];
//! rooted operations such as broadcast and reduce are default methods on
//! [`Root`], which every rank obtains by bundling the *same* root rank via
//! `comm.process_at_rank(root)`.
//!
//! Broadcast and reduce run over binomial trees, the barrier is a
//! dissemination barrier; all of them exchange messages on the
//! communicator's own context under reserved tags, so collective traffic
//! never collides with point to point messages. Reductions combine partial
//! results in ascending rank order over contiguous rank ranges, so any
//! associative operation reduces deterministically; commutativity is an
//! optimization hint, never a correctness requirement.
//!
//! [`barrier`]: CommunicatorCollectives::barrier
//! [`all_reduce_into`]: CommunicatorCollectives::all_reduce_into

use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::datatype::traits::*;
use crate::datatype::{self, DatatypeKind};
use crate::fabric::{PayloadBytes, TAG_BARRIER, TAG_BCAST, TAG_REDUCE};
use crate::topology::traits::*;
use crate::topology::{GroupHandle, Process, Rank};

/// Collective communication traits
pub mod traits {
    pub use super::{CommunicatorCollectives, Operation, Root};
}

/// Binomial-tree broadcast of raw payload bytes, rooted at `root`.
///
/// The root passes `Some(bytes)`, everyone else `None`; every rank returns
/// the broadcast bytes. Ranks are rotated so that the root sits at virtual
/// rank 0.
fn tree_broadcast(handle: &GroupHandle, root: Rank, data: Option<PayloadBytes>) -> PayloadBytes {
    let size = handle.size();
    let virt = (handle.rank() - root + size) % size;
    let actual = |v: Rank| (v + root) % size;

    let mut mask = 1;
    let mut data = data;
    while mask < size {
        if virt & mask != 0 {
            debug_assert!(data.is_none());
            data = Some(handle.take_control(actual(virt - mask), TAG_BCAST));
            break;
        }
        mask <<= 1;
    }
    let data = data.unwrap();

    mask >>= 1;
    while mask > 0 {
        if virt + mask < size {
            handle.post_control(actual(virt + mask), TAG_BCAST, data.clone());
        }
        mask >>= 1;
    }
    data
}

/// Binomial-tree reduction to rank 0 in ascending rank order.
///
/// Every partial held by a rank covers a contiguous rank range starting at
/// that rank; merging with the partner's range above it keeps the combine
/// order ascending, so the result at rank 0 is the in-order fold. Returns
/// `Some` at rank 0, `None` elsewhere.
fn tree_reduce<T, O>(handle: &GroupHandle, mut acc: Vec<T>, op: &O) -> Option<Vec<T>>
where
    T: Equivalence,
    O: Operation<T>,
{
    let rank = handle.rank();
    let size = handle.size();
    let mut mask = 1;
    while mask < size {
        if rank & mask != 0 {
            let bytes = SmallVec::from_slice(datatype::as_bytes(&acc));
            handle.post_control(rank - mask, TAG_REDUCE, bytes);
            return None;
        }
        let partner = rank + mask;
        if partner < size {
            let theirs = datatype::decode_vec::<T>(&handle.take_control(partner, TAG_REDUCE));
            op.combine(&mut acc, &theirs);
        }
        mask <<= 1;
    }
    Some(acc)
}

/// Reduction to an arbitrary root: in-order reduction to rank 0, then a
/// forward hop when the root is someone else.
fn reduce_to_root<T, O>(handle: &GroupHandle, root: Rank, acc: Vec<T>, op: &O) -> Option<Vec<T>>
where
    T: Equivalence,
    O: Operation<T>,
{
    let at_zero = tree_reduce(handle, acc, op);
    if root == 0 {
        return at_zero;
    }
    match at_zero {
        Some(result) => {
            let bytes = SmallVec::from_slice(datatype::as_bytes(&result));
            handle.post_control(root, TAG_REDUCE, bytes);
            None
        }
        None if handle.rank() == root => {
            Some(datatype::decode_vec(&handle.take_control(0, TAG_REDUCE)))
        }
        None => None,
    }
}

/// Collective operations that are related to a symmetric exchange within
/// the processes of a communicator
pub trait CommunicatorCollectives: Communicator {
    /// Barrier synchronization among all processes in a communicator
    ///
    /// Partake in a barrier, blocking until all processes in the
    /// communicator have entered it.
    ///
    /// # Examples
    /// See `tests/world.rs`
    fn barrier(&self) {
        let handle = self.as_handle();
        let _guard = handle.profile("barrier");
        let rank = handle.rank();
        let size = handle.size();
        // Dissemination barrier: log2(size) rounds of shifted exchanges.
        let mut round = 1;
        while round < size {
            let to = (rank + round) % size;
            let from = (rank - round + size) % size;
            handle.post_control(to, TAG_BARRIER, PayloadBytes::new());
            handle.take_control(from, TAG_BARRIER);
            round <<= 1;
        }
    }

    /// Performs an element-wise global reduction under the operation `op`
    /// of the input data in `sendbuf` and stores the result in `recvbuf`
    /// on all processes.
    fn all_reduce_into<S: ?Sized, R: ?Sized, O>(&self, sendbuf: &S, recvbuf: &mut R, op: O)
    where
        S: Payload,
        R: Payload<Elem = S::Elem>,
        O: Operation<S::Elem>,
    {
        let handle = self.as_handle();
        let _guard = handle.profile("allreduce");
        let result = tree_reduce(handle, datatype::stage(sendbuf), &op);
        let bytes = result.map(|r| SmallVec::from_slice(datatype::as_bytes(&r)));
        let bytes = tree_broadcast(handle, 0, bytes);
        recvbuf.assign_from(datatype::decode_vec(&bytes));
    }

    /// Like [`all_reduce_into`](CommunicatorCollectives::all_reduce_into),
    /// accumulating into the input buffer.
    fn all_reduce_in_place<B: ?Sized, O>(&self, buf: &mut B, op: O)
    where
        B: Payload,
        O: Operation<B::Elem>,
    {
        let handle = self.as_handle();
        let _guard = handle.profile("allreduce");
        let result = tree_reduce(handle, datatype::stage(buf), &op);
        let bytes = result.map(|r| SmallVec::from_slice(datatype::as_bytes(&r)));
        let bytes = tree_broadcast(handle, 0, bytes);
        buf.assign_from(datatype::decode_vec(&bytes));
    }
}

impl<C: Communicator> CommunicatorCollectives for C {}

/// Something that can take the role of 'root' in a collective operation.
///
/// Many collective operations define a 'root' process that takes a special
/// role in the communication. These collective operations are default
/// methods of this trait; every participating rank must name the same root.
pub trait Root: AsCommunicator {
    /// Rank of the root process
    fn root_rank(&self) -> Rank;

    /// Broadcast of the contents of a payload
    ///
    /// After the call completes, the contents of `buffer` on all processes
    /// are the bytes the root held on entry. Sequence payloads on non-root
    /// ranks are resized to the root's element count.
    ///
    /// # Examples
    /// See `tests/collective.rs`
    fn broadcast_into<Buf: ?Sized>(&self, buffer: &mut Buf)
    where
        Buf: Payload,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("bcast");
        let root = self.root_rank();
        let sent = if handle.rank() == root {
            Some(datatype::encode(buffer))
        } else {
            None
        };
        let bytes = tree_broadcast(handle, root, sent);
        if handle.rank() != root {
            buffer.assign_from(datatype::decode_vec(&bytes));
        }
    }

    /// Broadcast from a separate send payload into a receive payload.
    ///
    /// The root reads from `sendbuf`; every rank, the root included, ends
    /// up with the broadcast elements in `recvbuf`.
    fn broadcast_from_into<S: ?Sized, R: ?Sized>(&self, sendbuf: &S, recvbuf: &mut R)
    where
        S: Payload,
        R: Payload<Elem = S::Elem>,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("bcast");
        let root = self.root_rank();
        let sent = if handle.rank() == root {
            Some(datatype::encode(sendbuf))
        } else {
            None
        };
        let bytes = tree_broadcast(handle, root, sent);
        recvbuf.assign_from(datatype::decode_vec(&bytes));
    }

    /// Performs a global reduction under the operation `op` of the input
    /// data in `sendbuf`; this is the variant called by the non-root
    /// processes.
    fn reduce_into<S: ?Sized, O>(&self, sendbuf: &S, op: O)
    where
        S: Payload,
        O: Operation<S::Elem>,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("reduce");
        assert_ne!(
            handle.rank(),
            self.root_rank(),
            "the root process must call reduce_into_root"
        );
        let result = reduce_to_root(handle, self.root_rank(), datatype::stage(sendbuf), &op);
        debug_assert!(result.is_none());
    }

    /// Performs a global reduction under the operation `op` of the input
    /// data in `sendbuf`, storing the result in `recvbuf` on the root
    /// process.
    fn reduce_into_root<S: ?Sized, R: ?Sized, O>(&self, sendbuf: &S, recvbuf: &mut R, op: O)
    where
        S: Payload,
        R: Payload<Elem = S::Elem>,
        O: Operation<S::Elem>,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("reduce");
        assert_eq!(
            handle.rank(),
            self.root_rank(),
            "only the root process may call reduce_into_root"
        );
        let result = reduce_to_root(handle, self.root_rank(), datatype::stage(sendbuf), &op);
        recvbuf.assign_from(result.unwrap());
    }

    /// Like [`reduce_into_root`](Root::reduce_into_root), accumulating into
    /// the root's input buffer.
    fn reduce_in_place_root<B: ?Sized, O>(&self, buf: &mut B, op: O)
    where
        B: Payload,
        O: Operation<B::Elem>,
    {
        let handle = self.as_communicator().as_handle();
        let _guard = handle.profile("reduce");
        assert_eq!(
            handle.rank(),
            self.root_rank(),
            "only the root process may call reduce_in_place_root"
        );
        let result = reduce_to_root(handle, self.root_rank(), datatype::stage(buf), &op);
        buf.assign_from(result.unwrap());
    }
}

impl<'a, C> Root for Process<'a, C>
where
    C: 'a + Communicator,
{
    fn root_rank(&self) -> Rank {
        self.rank()
    }
}

/// An operation to be used in a reduction
///
/// `combine` folds the higher-rank partial `rhs` into the lower-rank
/// partial `acc`, element-wise. Reductions always combine in ascending rank
/// order, so the operation only needs to be associative;
/// [`is_commutative`](Operation::is_commutative) is an optimization hint
/// and a false claim of commutativity is a caller error the runtime does
/// not detect.
pub trait Operation<T: Equivalence> {
    /// Whether the operation is commutative
    fn is_commutative(&self) -> bool;

    /// Replaces each element of `acc` with `acc[i] op rhs[i]`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer lengths differ.
    fn combine(&self, acc: &mut [T], rhs: &[T]);
}

impl<'a, T: Equivalence, O: Operation<T>> Operation<T> for &'a O {
    fn is_commutative(&self) -> bool {
        (**self).is_commutative()
    }

    fn combine(&self, acc: &mut [T], rhs: &[T]) {
        (**self).combine(acc, rhs)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OperationKind {
    Max,
    Min,
    Sum,
    Product,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
}

/// A built-in operation like `sum` or `max`
///
/// The operation is applied according to the wire datatype of the reduced
/// elements. Logical and bitwise operations are defined for the integer
/// and boolean datatypes only, and no built-in operation is defined for
/// packed datatypes; violations panic.
///
/// # Examples
/// See `tests/collective.rs`
#[derive(Copy, Clone, Debug)]
pub struct SystemOperation(OperationKind);

macro_rules! system_operation_constructors {
    ($($ctor:ident => $kind:ident),*) => (
        $(
            /// A built-in operation
            pub fn $ctor() -> SystemOperation {
                SystemOperation(OperationKind::$kind)
            }
        )*
    )
}

impl SystemOperation {
    system_operation_constructors! {
        max => Max,
        min => Min,
        sum => Sum,
        product => Product,
        logical_and => LogicalAnd,
        logical_or => LogicalOr,
        logical_xor => LogicalXor,
        bitwise_and => BitwiseAnd,
        bitwise_or => BitwiseOr,
        bitwise_xor => BitwiseXor
    }
}

macro_rules! integer_combine {
    ($name:ident, $u:ty) => {
        unsafe fn $name<T>(kind: OperationKind, acc: &mut [T], rhs: &[T]) {
            let acc = datatype::cast_slice_mut::<T, $u>(acc);
            let rhs = datatype::cast_slice::<T, $u>(rhs);
            use OperationKind::*;
            for (a, &b) in acc.iter_mut().zip(rhs) {
                match kind {
                    Max => {
                        if b > *a {
                            *a = b;
                        }
                    }
                    Min => {
                        if b < *a {
                            *a = b;
                        }
                    }
                    Sum => *a = a.wrapping_add(b),
                    Product => *a = a.wrapping_mul(b),
                    LogicalAnd => *a = ((*a != 0) && (b != 0)) as $u,
                    LogicalOr => *a = ((*a != 0) || (b != 0)) as $u,
                    LogicalXor => *a = ((*a != 0) ^ (b != 0)) as $u,
                    BitwiseAnd => *a &= b,
                    BitwiseOr => *a |= b,
                    BitwiseXor => *a ^= b,
                }
            }
        }
    };
}

integer_combine!(combine_i8, i8);
integer_combine!(combine_i16, i16);
integer_combine!(combine_i32, i32);
integer_combine!(combine_i64, i64);
integer_combine!(combine_u8, u8);
integer_combine!(combine_u16, u16);
integer_combine!(combine_u32, u32);
integer_combine!(combine_u64, u64);

macro_rules! float_combine {
    ($name:ident, $u:ty) => {
        unsafe fn $name<T>(kind: OperationKind, acc: &mut [T], rhs: &[T]) {
            let acc = datatype::cast_slice_mut::<T, $u>(acc);
            let rhs = datatype::cast_slice::<T, $u>(rhs);
            use OperationKind::*;
            for (a, &b) in acc.iter_mut().zip(rhs) {
                match kind {
                    Max => {
                        if b > *a {
                            *a = b;
                        }
                    }
                    Min => {
                        if b < *a {
                            *a = b;
                        }
                    }
                    Sum => *a += b,
                    Product => *a *= b,
                    _ => panic!("operation {:?} is not defined for floating-point datatypes", kind),
                }
            }
        }
    };
}

float_combine!(combine_f32, f32);
float_combine!(combine_f64, f64);

unsafe fn combine_bool<T>(kind: OperationKind, acc: &mut [T], rhs: &[T]) {
    let acc = datatype::cast_slice_mut::<T, bool>(acc);
    let rhs = datatype::cast_slice::<T, bool>(rhs);
    use OperationKind::*;
    for (a, &b) in acc.iter_mut().zip(rhs) {
        match kind {
            LogicalAnd => *a = *a && b,
            LogicalOr => *a = *a || b,
            LogicalXor => *a ^= b,
            _ => panic!("operation {:?} is not defined for the boolean datatype", kind),
        }
    }
}

#[cfg(feature = "complex")]
macro_rules! complex_combine {
    ($name:ident, $u:ty) => {
        unsafe fn $name<T>(kind: OperationKind, acc: &mut [T], rhs: &[T]) {
            let acc = datatype::cast_slice_mut::<T, $u>(acc);
            let rhs = datatype::cast_slice::<T, $u>(rhs);
            use OperationKind::*;
            for (a, &b) in acc.iter_mut().zip(rhs) {
                match kind {
                    Sum => *a += b,
                    Product => *a *= b,
                    _ => panic!("operation {:?} is not defined for complex datatypes", kind),
                }
            }
        }
    };
}

#[cfg(feature = "complex")]
complex_combine!(combine_c32, num_complex::Complex32);
#[cfg(feature = "complex")]
complex_combine!(combine_c64, num_complex::Complex64);

impl<T: Equivalence> Operation<T> for SystemOperation {
    fn is_commutative(&self) -> bool {
        true
    }

    fn combine(&self, acc: &mut [T], rhs: &[T]) {
        assert_eq!(
            acc.len(),
            rhs.len(),
            "reduction buffers must hold the same element count"
        );
        use DatatypeKind::*;
        // Sound: the cast target is exactly the primitive the element's
        // datatype kind names.
        unsafe {
            match T::equivalent_datatype().kind() {
                Int8 => combine_i8(self.0, acc, rhs),
                Int16 => combine_i16(self.0, acc, rhs),
                Int32 => combine_i32(self.0, acc, rhs),
                Int64 => combine_i64(self.0, acc, rhs),
                Uint8 => combine_u8(self.0, acc, rhs),
                Uint16 => combine_u16(self.0, acc, rhs),
                Uint32 => combine_u32(self.0, acc, rhs),
                Uint64 => combine_u64(self.0, acc, rhs),
                Float => combine_f32(self.0, acc, rhs),
                Double => combine_f64(self.0, acc, rhs),
                Bool => combine_bool(self.0, acc, rhs),
                #[cfg(feature = "complex")]
                ComplexFloat => combine_c32(self.0, acc, rhs),
                #[cfg(feature = "complex")]
                ComplexDouble => combine_c64(self.0, acc, rhs),
                #[cfg(not(feature = "complex"))]
                ComplexFloat | ComplexDouble => {
                    unreachable!("complex datatypes require the `complex` feature")
                }
                Packed => panic!("built-in operations are not defined for packed datatypes"),
            }
        }
    }
}

/// A user-defined reduction operation
///
/// Wraps a closure folding a slice of higher-rank partials into a slice of
/// lower-rank partials. The commutativity flag is the caller's claim about
/// the operation; see [`Operation`].
///
/// # Examples
/// See `tests/collective.rs`
pub struct UserOperation<T, F> {
    commute: bool,
    function: F,
    phantom: PhantomData<fn(&mut [T], &[T])>,
}

impl<T, F> UserOperation<T, F>
where
    T: Equivalence,
    F: Fn(&mut [T], &[T]),
{
    /// Define an operation using `function`, which must be associative but
    /// need not be commutative.
    pub fn associative(function: F) -> Self {
        Self::new(false, function)
    }

    /// Define an operation using `function`, which must be associative and
    /// commutative.
    pub fn commutative(function: F) -> Self {
        Self::new(true, function)
    }

    /// Define an operation using `function`, with `commute` specifying
    /// whether it is commutative in addition to associative.
    pub fn new(commute: bool, function: F) -> Self {
        UserOperation {
            commute,
            function,
            phantom: PhantomData,
        }
    }
}

impl<T, F> Operation<T> for UserOperation<T, F>
where
    T: Equivalence,
    F: Fn(&mut [T], &[T]),
{
    fn is_commutative(&self) -> bool {
        self.commute
    }

    fn combine(&self, acc: &mut [T], rhs: &[T]) {
        assert_eq!(
            acc.len(),
            rhs.len(),
            "reduction buffers must hold the same element count"
        );
        (self.function)(acc, rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sum_and_extrema() {
        let mut acc = [1i32, 7, -2];
        SystemOperation::sum().combine(&mut acc, &[2, -3, 10]);
        assert_eq!(acc, [3, 4, 8]);
        SystemOperation::min().combine(&mut acc, &[5, 0, 9]);
        assert_eq!(acc, [3, 0, 8]);
        SystemOperation::max().combine(&mut acc, &[-1, 2, 99]);
        assert_eq!(acc, [3, 2, 99]);
    }

    #[test]
    fn system_bitwise_on_integers() {
        let mut acc = [0b1100u8];
        SystemOperation::bitwise_and().combine(&mut acc, &[0b1010]);
        assert_eq!(acc, [0b1000]);
        SystemOperation::bitwise_or().combine(&mut acc, &[0b0001]);
        assert_eq!(acc, [0b1001]);
        SystemOperation::bitwise_xor().combine(&mut acc, &[0b1001]);
        assert_eq!(acc, [0]);
    }

    #[test]
    fn system_logical_on_bools() {
        let mut acc = [true, false];
        SystemOperation::logical_and().combine(&mut acc, &[true, true]);
        assert_eq!(acc, [true, false]);
        SystemOperation::logical_or().combine(&mut acc, &[false, true]);
        assert_eq!(acc, [true, true]);
    }

    #[test]
    #[should_panic]
    fn bitwise_on_floats_is_rejected() {
        let mut acc = [1.0f64];
        SystemOperation::bitwise_or().combine(&mut acc, &[2.0]);
    }

    #[test]
    #[should_panic]
    fn mismatched_lengths_are_rejected() {
        let mut acc = [1i32, 2];
        SystemOperation::sum().combine(&mut acc, &[1]);
    }

    #[test]
    fn user_operation_preserves_order() {
        // String-like concatenation encoded in integers: keep the first
        // nonzero digit pairing to observe operand order.
        let op = UserOperation::associative(|acc: &mut [i64], rhs: &[i64]| {
            for (a, &b) in acc.iter_mut().zip(rhs) {
                *a = *a * 10 + b;
            }
        });
        assert!(!op.is_commutative());
        let mut acc = [1i64];
        op.combine(&mut acc, &[2]);
        op.combine(&mut acc, &[3]);
        assert_eq!(acc, [123]);
    }
}
