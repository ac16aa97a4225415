//! Message passing between the ranks of a process group
//!
//! The building blocks are communicators: contexts for exchanging typed
//! messages within an ordered group of processes. The library provides
//!
//! - a world communicator spanning the whole process group, and a
//!   communicator algebra (duplication, color/key splits, rank
//!   translation, comparison) for deriving private sub-groups from it,
//! - blocking and immediate point to point operations, with wildcard
//!   source/tag receives and probes,
//! - collective operations: barrier, broadcast, reductions under built-in
//!   or user-defined operators,
//! - a static datatype registry mapping Rust element types and standard
//!   containers onto wire representations, open to user plain-data types
//!   via [`packed_datatype!`],
//! - an attachable [`Chronometer`](chronometer::Chronometer) that times
//!   communication operations per label.
//!
//! Ranks run as OS threads over an in-process substrate, the
//! [`Fabric`](fabric::Fabric). A parallel session is entered through
//! [`run`]:
//!
//! ```
//! use groupcomm::traits::*;
//!
//! groupcomm::run(2, |ctx| {
//!     let world = ctx.world();
//!     match world.rank() {
//!         0 => world.process_at_rank(1).send(&vec![1.0f64, 2.0, 3.0]),
//!         _ => {
//!             let (msg, status) = world.process_at_rank(0).receive_vec::<f64>();
//!             assert_eq!(msg, [1.0, 2.0, 3.0]);
//!             assert_eq!(status.source_rank(), 0);
//!         }
//!     }
//! })
//! .unwrap();
//! ```

pub mod chronometer;
pub mod collective;
pub mod datatype;
pub mod environment;
pub mod error;
pub mod fabric;
pub mod point_to_point;
pub mod request;
pub mod topology;

/// Encodes a number of elements in a message.
pub type Count = i32;

/// Tags messages within a communicator; user tags are non-negative.
pub type Tag = i32;

pub use crate::environment::{run, run_with_threading, Context, Threading};
pub use crate::topology::Rank;

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::traits::*;
    pub use crate::datatype::traits::*;
    pub use crate::point_to_point::traits::*;
    pub use crate::topology::traits::*;
}
