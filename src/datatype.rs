//! Bridging between Rust payload types and their wire representation
//!
//! Two compile-time decisions are made here, both resolved at
//! monomorphization time with no per-call branching:
//!
//! - [`Equivalence`] maps a payload *element* type onto a [`Datatype`]:
//!   either one of the predefined primitive wire types or an opaque
//!   byte blob ("packed") of the element's size. User-defined plain-data
//!   types opt in through the [`packed_datatype!`](crate::packed_datatype)
//!   macro.
//! - [`Payload`] classifies a payload as a single wire element (scalars) or
//!   a sequence of elements with a known count (slices, `Vec`, `VecDeque`,
//!   `LinkedList`, arrays). Sequences whose backing storage is contiguous
//!   expose it through [`Payload::as_contiguous`] and are transmitted
//!   directly; the others are staged through a temporary contiguous buffer.
//!
//! Packed types are transmitted as raw bytes of the sender's in-memory
//! layout. That is sound within one process group sharing an address-space
//! layout, but carries no endianness or layout portability guarantee.

use std::collections::{LinkedList, VecDeque};
use std::mem;

use smallvec::SmallVec;

use crate::fabric::PayloadBytes;
use crate::Count;

/// Datatype traits
pub mod traits {
    pub use super::{Equivalence, Payload};
}

/// The wire representation classes understood by the substrate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DatatypeKind {
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    Uint8,
    /// 16-bit unsigned integer
    Uint16,
    /// 32-bit unsigned integer
    Uint32,
    /// 64-bit unsigned integer
    Uint64,
    /// Single-precision float
    Float,
    /// Double-precision float
    Double,
    /// Boolean truth value
    Bool,
    /// Single-precision complex number
    ComplexFloat,
    /// Double-precision complex number
    ComplexDouble,
    /// Opaque byte blob of the element's size
    Packed,
}

/// A wire representation: a representation class plus the element extent in
/// bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Datatype {
    kind: DatatypeKind,
    extent: usize,
}

impl Datatype {
    pub(crate) const fn new(kind: DatatypeKind, extent: usize) -> Datatype {
        Datatype { kind, extent }
    }

    /// The opaque byte-blob representation for a plain-data type.
    ///
    /// # Panics
    ///
    /// Panics for zero-sized types; an element must occupy at least one
    /// byte on the wire.
    pub fn packed<T: Copy>() -> Datatype {
        assert!(
            mem::size_of::<T>() > 0,
            "zero-sized types have no wire representation"
        );
        Datatype::new(DatatypeKind::Packed, mem::size_of::<T>())
    }

    /// The representation class.
    pub fn kind(&self) -> DatatypeKind {
        self.kind
    }

    /// Size of one element in bytes.
    pub fn extent(&self) -> usize {
        self.extent
    }
}

/// A direct equivalence between the implementing type and a wire datatype
///
/// # Safety
///
/// An implementor asserts that the type is plain data: `Copy`, with no
/// padding bytes, no interior pointers or handles, and valid for every bit
/// pattern a peer may legitimately produce for it. The library reads and
/// writes values of the type as raw bytes based on this contract. The
/// reported datatype's extent must equal `size_of::<Self>()`, which must be
/// non-zero.
pub unsafe trait Equivalence: Copy {
    /// The wire representation of `Self`.
    fn equivalent_datatype() -> Datatype;
}

/// A payload transferable as a message: one wire element or a counted
/// sequence of them
///
/// # Safety
///
/// `count()` must equal the number of elements observed by `stage_into` and
/// `as_contiguous`, and `as_contiguous` must cover the payload's entire
/// element sequence whenever it returns `Some`.
pub unsafe trait Payload {
    /// Element type carried on the wire.
    type Elem: Equivalence;

    /// Number of wire elements in the payload.
    fn count(&self) -> Count;

    /// The backing storage, if it already is one contiguous buffer.
    fn as_contiguous(&self) -> Option<&[Self::Elem]>;

    /// Copies the elements into a temporary contiguous buffer, in order.
    fn stage_into(&self, staging: &mut Vec<Self::Elem>);

    /// Replaces the payload's contents with the received elements, resizing
    /// sequence payloads to the received count.
    fn assign_from(&mut self, elems: Vec<Self::Elem>);

    /// Overwrites the payload's leading elements without resizing; used by
    /// immediate receives, whose destinations must be pre-sized.
    ///
    /// # Panics
    ///
    /// Panics if more elements were received than the payload can hold.
    fn assign_prefix(&mut self, elems: &[Self::Elem]);
}

macro_rules! scalar_payload_impl {
    ($t:ty) => {
        unsafe impl $crate::datatype::Payload for $t {
            type Elem = $t;

            fn count(&self) -> $crate::Count {
                1
            }

            fn as_contiguous(&self) -> Option<&[$t]> {
                Some(::std::slice::from_ref(self))
            }

            fn stage_into(&self, staging: &mut Vec<$t>) {
                staging.push(*self);
            }

            fn assign_from(&mut self, elems: Vec<$t>) {
                assert_eq!(
                    elems.len(),
                    1,
                    "scalar destination received {} elements",
                    elems.len()
                );
                *self = elems[0];
            }

            fn assign_prefix(&mut self, elems: &[$t]) {
                assert_eq!(
                    elems.len(),
                    1,
                    "scalar destination received {} elements",
                    elems.len()
                );
                *self = elems[0];
            }
        }
    };
}

macro_rules! equivalent_datatype {
    ($t:ty, $kind:ident) => {
        unsafe impl Equivalence for $t {
            fn equivalent_datatype() -> Datatype {
                Datatype::new(DatatypeKind::$kind, mem::size_of::<$t>())
            }
        }

        scalar_payload_impl!($t);
    };
}

equivalent_datatype!(i8, Int8);
equivalent_datatype!(i16, Int16);
equivalent_datatype!(i32, Int32);
equivalent_datatype!(i64, Int64);
equivalent_datatype!(u8, Uint8);
equivalent_datatype!(u16, Uint16);
equivalent_datatype!(u32, Uint32);
equivalent_datatype!(u64, Uint64);
equivalent_datatype!(f32, Float);
equivalent_datatype!(f64, Double);
equivalent_datatype!(bool, Bool);

#[cfg(feature = "complex")]
mod complex {
    use super::*;
    use num_complex::{Complex32, Complex64};

    equivalent_datatype!(Complex32, ComplexFloat);
    equivalent_datatype!(Complex64, ComplexDouble);
}

/// Registers a user-defined plain-data type as a packed ("opaque byte
/// blob") payload element.
///
/// The type must be `Copy`, free of padding and of pointers/handles, and
/// non-zero-sized; see the safety contract on
/// [`Equivalence`](crate::datatype::Equivalence).
///
/// # Examples
///
/// ```
/// #[derive(Clone, Copy, PartialEq, Debug)]
/// #[repr(C)]
/// struct Particle {
///     position: [f64; 3],
///     charge: f64,
/// }
///
/// groupcomm::packed_datatype!(Particle);
/// ```
#[macro_export]
macro_rules! packed_datatype {
    ($t:ty) => {
        unsafe impl $crate::datatype::Equivalence for $t {
            fn equivalent_datatype() -> $crate::datatype::Datatype {
                $crate::datatype::Datatype::packed::<$t>()
            }
        }

        unsafe impl $crate::datatype::Payload for $t {
            type Elem = $t;

            fn count(&self) -> $crate::Count {
                1
            }

            fn as_contiguous(&self) -> Option<&[$t]> {
                Some(::std::slice::from_ref(self))
            }

            fn stage_into(&self, staging: &mut Vec<$t>) {
                staging.push(*self);
            }

            fn assign_from(&mut self, elems: Vec<$t>) {
                assert_eq!(elems.len(), 1, "scalar destination received a sequence");
                *self = elems[0];
            }

            fn assign_prefix(&mut self, elems: &[$t]) {
                assert_eq!(elems.len(), 1, "scalar destination received a sequence");
                *self = elems[0];
            }
        }
    };
}

unsafe impl<T: Equivalence> Payload for [T] {
    type Elem = T;

    fn count(&self) -> Count {
        self.len() as Count
    }

    fn as_contiguous(&self) -> Option<&[T]> {
        Some(self)
    }

    fn stage_into(&self, staging: &mut Vec<T>) {
        staging.extend_from_slice(self);
    }

    fn assign_from(&mut self, elems: Vec<T>) {
        assert_eq!(
            elems.len(),
            self.len(),
            "fixed-size destination holds {} elements but {} were received",
            self.len(),
            elems.len()
        );
        self.copy_from_slice(&elems);
    }

    fn assign_prefix(&mut self, elems: &[T]) {
        assert!(
            elems.len() <= self.len(),
            "destination holds {} elements but {} were received",
            self.len(),
            elems.len()
        );
        self[..elems.len()].copy_from_slice(elems);
    }
}

unsafe impl<T: Equivalence, const N: usize> Payload for [T; N] {
    type Elem = T;

    fn count(&self) -> Count {
        N as Count
    }

    fn as_contiguous(&self) -> Option<&[T]> {
        Some(self)
    }

    fn stage_into(&self, staging: &mut Vec<T>) {
        staging.extend_from_slice(self);
    }

    fn assign_from(&mut self, elems: Vec<T>) {
        self[..].assign_from(elems);
    }

    fn assign_prefix(&mut self, elems: &[T]) {
        self[..].assign_prefix(elems);
    }
}

unsafe impl<T: Equivalence> Payload for Vec<T> {
    type Elem = T;

    fn count(&self) -> Count {
        self.len() as Count
    }

    fn as_contiguous(&self) -> Option<&[T]> {
        Some(self)
    }

    fn stage_into(&self, staging: &mut Vec<T>) {
        staging.extend_from_slice(self);
    }

    fn assign_from(&mut self, elems: Vec<T>) {
        *self = elems;
    }

    fn assign_prefix(&mut self, elems: &[T]) {
        self.as_mut_slice().assign_prefix(elems);
    }
}

unsafe impl<T: Equivalence> Payload for VecDeque<T> {
    type Elem = T;

    fn count(&self) -> Count {
        self.len() as Count
    }

    fn as_contiguous(&self) -> Option<&[T]> {
        // A deque's ring buffer is contiguous only by accident; always stage.
        None
    }

    fn stage_into(&self, staging: &mut Vec<T>) {
        staging.extend(self.iter().copied());
    }

    fn assign_from(&mut self, elems: Vec<T>) {
        *self = elems.into();
    }

    fn assign_prefix(&mut self, elems: &[T]) {
        assert!(
            elems.len() <= self.len(),
            "destination holds {} elements but {} were received",
            self.len(),
            elems.len()
        );
        for (slot, value) in self.iter_mut().zip(elems) {
            *slot = *value;
        }
    }
}

unsafe impl<T: Equivalence> Payload for LinkedList<T> {
    type Elem = T;

    fn count(&self) -> Count {
        self.len() as Count
    }

    fn as_contiguous(&self) -> Option<&[T]> {
        None
    }

    fn stage_into(&self, staging: &mut Vec<T>) {
        staging.extend(self.iter().copied());
    }

    fn assign_from(&mut self, elems: Vec<T>) {
        *self = elems.into_iter().collect();
    }

    fn assign_prefix(&mut self, elems: &[T]) {
        assert!(
            elems.len() <= self.len(),
            "destination holds {} elements but {} were received",
            self.len(),
            elems.len()
        );
        for (slot, value) in self.iter_mut().zip(elems) {
            *slot = *value;
        }
    }
}

/// Views a typed element slice as its wire bytes.
pub(crate) fn as_bytes<T: Equivalence>(elems: &[T]) -> &[u8] {
    // Sound per the Equivalence contract: plain data, no padding.
    unsafe { std::slice::from_raw_parts(elems.as_ptr() as *const u8, mem::size_of_val(elems)) }
}

/// Rebuilds typed elements from wire bytes.
pub(crate) fn decode_vec<T: Equivalence>(bytes: &[u8]) -> Vec<T> {
    let extent = T::equivalent_datatype().extent();
    assert_eq!(
        bytes.len() % extent,
        0,
        "message length {} is not a whole number of {}-byte elements",
        bytes.len(),
        extent
    );
    let count = bytes.len() / extent;
    let mut elems = Vec::<T>::with_capacity(count);
    // Sound per the Equivalence contract: every peer-produced bit pattern
    // is a valid element, and the destination is allocated for `count`.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), elems.as_mut_ptr() as *mut u8, bytes.len());
        elems.set_len(count);
    }
    elems
}

/// Flattens a payload to wire bytes, staging non-contiguous sequences
/// through a temporary buffer.
pub(crate) fn encode<P: Payload + ?Sized>(payload: &P) -> PayloadBytes {
    match payload.as_contiguous() {
        Some(elems) => SmallVec::from_slice(as_bytes(elems)),
        None => {
            let mut staging = Vec::with_capacity(payload.count() as usize);
            payload.stage_into(&mut staging);
            SmallVec::from_slice(as_bytes(&staging))
        }
    }
}

/// Copies a payload's elements into one contiguous `Vec`.
pub(crate) fn stage<P: Payload + ?Sized>(payload: &P) -> Vec<P::Elem> {
    match payload.as_contiguous() {
        Some(elems) => elems.to_vec(),
        None => {
            let mut staging = Vec::with_capacity(payload.count() as usize);
            payload.stage_into(&mut staging);
            staging
        }
    }
}

/// Reinterprets a mutable element slice as another type of equal size.
///
/// # Safety
///
/// `T` and `U` must have identical size and compatible representations;
/// callers dispatch on `DatatypeKind`, which ties `T` to the concrete
/// primitive `U`.
pub(crate) unsafe fn cast_slice_mut<T, U>(slice: &mut [T]) -> &mut [U] {
    debug_assert_eq!(mem::size_of::<T>(), mem::size_of::<U>());
    std::slice::from_raw_parts_mut(slice.as_mut_ptr() as *mut U, slice.len())
}

/// Shared-reference counterpart of [`cast_slice_mut`].
///
/// # Safety
///
/// Same requirements as [`cast_slice_mut`].
pub(crate) unsafe fn cast_slice<T, U>(slice: &[T]) -> &[U] {
    debug_assert_eq!(mem::size_of::<T>(), mem::size_of::<U>());
    std::slice::from_raw_parts(slice.as_ptr() as *const U, slice.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Debug)]
    #[repr(C)]
    struct Sample {
        a: i32,
        b: i32,
    }

    crate::packed_datatype!(Sample);

    #[test]
    fn primitive_wire_mapping() {
        assert_eq!(i32::equivalent_datatype().kind(), DatatypeKind::Int32);
        assert_eq!(f64::equivalent_datatype().extent(), 8);
        assert_eq!(bool::equivalent_datatype().extent(), 1);
    }

    #[test]
    fn packed_wire_mapping() {
        let datatype = Sample::equivalent_datatype();
        assert_eq!(datatype.kind(), DatatypeKind::Packed);
        assert_eq!(datatype.extent(), mem::size_of::<Sample>());
    }

    #[test]
    fn encode_decode_round_trip() {
        let values = vec![3i64, -1, 42];
        let bytes = encode(&values);
        assert_eq!(bytes.len(), 24);
        assert_eq!(decode_vec::<i64>(&bytes), values);
    }

    #[test]
    fn staged_and_contiguous_encodings_agree() {
        let contiguous = vec![1.5f64, -2.5, 0.0];
        let linked: LinkedList<f64> = contiguous.iter().copied().collect();
        assert_eq!(encode(&contiguous), encode(&linked));
    }

    #[test]
    fn packed_round_trip() {
        let values = [Sample { a: 1, b: -2 }, Sample { a: 3, b: 4 }];
        let bytes = encode(&values);
        assert_eq!(decode_vec::<Sample>(&bytes), values);
    }

    #[test]
    fn scalar_assign() {
        let mut target = 0i32;
        target.assign_from(vec![17]);
        assert_eq!(target, 17);
    }

    #[test]
    fn vector_assign_resizes() {
        let mut target: Vec<u16> = Vec::new();
        target.assign_from(vec![1, 2, 3]);
        assert_eq!(target, [1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn slice_assign_requires_exact_count() {
        let mut target = [0u8; 2];
        target[..].assign_from(vec![1, 2, 3]);
    }

    #[test]
    fn zero_length_messages_are_legal() {
        let empty: Vec<u32> = Vec::new();
        let bytes = encode(&empty);
        assert!(bytes.is_empty());
        assert!(decode_vec::<u32>(&bytes).is_empty());
    }
}
