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

//! Error types for chain

use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};

use crate::core::core::hash::Hash;
use crate::core::ser;
use cinder_store as store;

/// Error definition
#[derive(Debug, Fail)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// The block broke a consensus rule, its header gets marked invalid
	#[fail(display = "Block failed validation: {}", _0)]
	Validation(Hash),
	/// Storage doesn't hold data the current step requires
	#[fail(display = "Missing data for block: {}", _0)]
	MissingData(Hash),
	/// Attempted reverse replay past pruned data, fatal to the walker
	#[fail(display = "Cannot roll back past pruned data")]
	CannotRollback,
	/// A pooled resource didn't free up within the allotted time
	#[fail(display = "Timed out acquiring a pooled resource")]
	Timeout,
	/// Cooperative shutdown
	#[fail(display = "Cancelled")]
	Cancelled,
	/// An invariant was violated inside trusted storage, fatal
	#[fail(display = "Storage corruption: {}", _0)]
	Corruption(String),
	/// The two chains handed to the walker share no root
	#[fail(display = "Chains share no common ancestor")]
	NoCommonAncestor,
	/// A distinct genesis block is already present
	#[fail(display = "A different genesis block is already present")]
	GenesisMismatch,
	/// The header doesn't fit anywhere in our chain
	#[fail(display = "Header is unfit: {}", _0)]
	Unfit(String),
	/// Internal issue when trying to save or load data from store
	#[fail(display = "Store Error: {}", _1)]
	StoreErr(store::Error, String),
	/// Error serializing or deserializing a type
	#[fail(display = "Serialization Error: {}", _0)]
	SerErr(String),
	/// Anything else
	#[fail(display = "Other Error: {}", _0)]
	Other(String),
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let cause = match self.cause() {
			Some(c) => format!("{}", c),
			None => String::from("Unknown"),
		};
		let output = format!("{} \n Cause: {}", self.inner, cause);
		Display::fmt(&output, f)
	}
}

impl Error {
	/// get kind
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// get cause
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// get backtrace
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}

	/// Whether the error is due to a block that was intrinsically wrong,
	/// as opposed to a local storage or scheduling problem.
	pub fn is_bad_data(&self) -> bool {
		match self.kind() {
			ErrorKind::Validation(_) => true,
			_ => false,
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<store::Error> for Error {
	fn from(error: store::Error) -> Error {
		match error {
			store::Error::Timeout => Error {
				inner: Context::new(ErrorKind::Timeout),
			},
			e => {
				let ec = e.clone();
				Error {
					inner: e.context(ErrorKind::StoreErr(ec.clone(), format!("{}", ec))),
				}
			}
		}
	}
}

impl From<ser::Error> for Error {
	fn from(error: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(format!("{}", error))),
		}
	}
}
