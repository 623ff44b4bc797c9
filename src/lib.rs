//! xbrtime is a partitioned global address space (PGAS) runtime: a fixed group of
//! processing elements (PEs) share a symmetric heap and coordinate through a
//! dissemination barrier, one-sided strided put/get, and collectives built on
//! top of them.
//!
//! Every PE owns a symmetric segment. An allocation made in lockstep on all PEs
//! returns the same [SymAddr] everywhere, so that address can be handed directly
//! to a remote transfer aimed at any PE. All traffic goes through four
//! primitives (remote write, remote read, remote atomic swap and fence), each a
//! single element wide; [put][World::put], [get][World::get] and the collectives
//! are loops over them.
//!
//! PEs run as threads of one process ([Backend::Threads]) or as a lone PE
//! ([Backend::Local]).
//!
//! EXAMPLES
//! --------
//!
//! # Launching a group and exchanging data
//! ```
//! use xbrtime::WorldBuilder;
//!
//! WorldBuilder::new()
//!     .with_num_pes(4)
//!     .launch(|world| {
//!         let my_pe = world.my_pe();
//!         let num_pes = world.num_pes();
//!         let addr = world.malloc(num_pes * std::mem::size_of::<u32>()).unwrap();
//!         world.write_local(addr, my_pe as u32).unwrap();
//!         world.barrier().unwrap();
//!         // everyone receives pe 0's value
//!         world.broadcast::<u32>(addr, addr, 1, 0).unwrap();
//!         assert_eq!(world.read_local::<u32>(addr).unwrap(), 0);
//!         world.free(addr).unwrap();
//!         world.close().unwrap();
//!     })
//!     .unwrap();
//! ```
//!
//! # A single PE program
//! ```
//! let world = xbrtime::init().unwrap();
//! let addr = world.malloc(64).unwrap();
//! world.put::<u64>(world.my_pe(), addr.elem::<u64>(4), addr, 4, 1, 1).unwrap();
//! world.close().unwrap();
//! ```
//!
//! # Environment Variables
//! Defaults for [WorldBuilder] are read once from `XBRTIME_*` variables, see [Config].
//! Runtime warnings can also be silenced for the whole process with [disable_warnings].

mod barrier;
mod collectives;
mod env_var;
mod error;
mod fabric;
mod rdma;
mod warnings;
mod xbrtime_alloc;
mod xbrtime_arch;
mod xbrtime_world;

#[doc(hidden)]
pub use crate::barrier::BarrierRound;
pub use crate::collectives::ReduceOp;
pub use crate::env_var::{config, Alloc, Config};
pub use crate::error::{XbrtimeError, XbrtimeResult};
pub use crate::fabric::{Backend, CommStats, Reducible, Remote, SymAddr, MAX_PES};
pub use crate::warnings::{disable_warnings, enable_warnings};
pub use crate::xbrtime_arch::{IdentityArch, MappedArch, PeArch};
pub use crate::xbrtime_world::*;

#[doc(hidden)]
pub extern crate tracing;
