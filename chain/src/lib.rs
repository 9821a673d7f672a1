// Copyright 2018 The Cinder Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The chain-state engine: chains block headers into a best-work graph,
//! maintains the unspent-output set by replaying blocks forward and in
//! reverse across reorganizations, and prunes rollback data beyond the
//! safety horizon.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

extern crate cinder_core as core;
extern crate cinder_util as util;

mod chainstate;
pub mod error;
pub mod headers;
pub mod pipeline;
pub mod prune;
pub mod replay;
pub mod store;
pub mod types;
pub mod utxo;
pub mod walker;
pub mod wallet;

// Re-export the base interface

pub use crate::chainstate::{start_head_worker, ChainState, Options};
pub use crate::error::{Error, ErrorKind};
pub use crate::headers::HeaderGraph;
pub use crate::types::{
	BlockStorage, BlockTx, BlockTxesStorage, ChainAdapter, ChainConfig, Direction, LoadedTx,
	NoopAdapter, NoopRules, PruneMode, Rules, Tip, ValidatableTx,
};
pub use crate::walker::ChainWalker;
