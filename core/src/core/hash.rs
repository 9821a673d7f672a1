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

//! Hash Function
//!
//! Primary hash function used in the protocol: double SHA-256 over the
//! canonical binary encoding of the hashed value.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use util;

/// A hash consisting of all zeroes, often used as a sentinel. Not the hash
/// of anything.
pub const ZERO_HASH: Hash = Hash([0; 32]);

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for blocks, transactions and outputs.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_hex())
	}
}

impl Hash {
	/// Creates a new hash from a byte slice, zero padded on the left if the
	/// slice is shorter than 32 bytes.
	pub fn from_vec(v: &[u8]) -> Hash {
		let mut h = [0; 32];
		let copy_size = v.len().min(32);
		h[..copy_size].copy_from_slice(&v[..copy_size]);
		Hash(h)
	}

	/// Converts the hash to a byte vector
	pub fn to_vec(&self) -> Vec<u8> {
		self.0.to_vec()
	}

	/// Converts the hash to a byte slice
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Convert a hash to hex string format.
	pub fn to_hex(&self) -> String {
		util::to_hex(self.to_vec())
	}

	/// Convert hex string back to hash.
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		let bytes = util::from_hex(hex.to_string()).map_err(|_| ser::Error::CorruptedData)?;
		if bytes.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		Ok(Hash::from_vec(&bytes))
	}

	/// The double SHA-256 digest of the provided data.
	pub fn double_sha256(data: &[u8]) -> Hash {
		let first = Sha256::digest(data);
		let second = Sha256::digest(&first);
		let mut h = [0; 32];
		h.copy_from_slice(&second);
		Hash(h)
	}

	/// Hash of the canonical binary encoding of the provided value.
	pub fn of<W: Writeable>(thing: &W) -> Hash {
		let data = ser::ser_vec(thing).expect("serialization failed");
		Hash::double_sha256(&data)
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read(reader: &mut dyn Reader) -> Result<Hash, ser::Error> {
		let v = reader.read_fixed_bytes(32)?;
		Ok(Hash::from_vec(&v))
	}
}

/// A trait for types whose hash (double SHA-256 of their canonical encoding)
/// is computed once and then cached.
pub trait Hashed {
	/// Obtain the hash of the value
	fn hash(&self) -> Hash;
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn hash_hex_round_trip() {
		let hash = Hash::double_sha256(b"cinder");
		let hex = hash.to_hex();
		assert_eq!(Hash::from_hex(&hex).unwrap(), hash);
	}

	#[test]
	fn zero_hash_is_all_zeroes() {
		assert_eq!(ZERO_HASH.to_vec(), vec![0; 32]);
	}

	#[test]
	fn hash_serde_round_trip() {
		let hash = Hash::double_sha256(b"serde");
		let json = serde_json::to_string(&hash).unwrap();
		let back: Hash = serde_json::from_str(&json).unwrap();
		assert_eq!(back, hash);
	}
}
