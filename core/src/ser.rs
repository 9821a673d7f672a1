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

//! Serialization and deserialization layer specialized for binary encoding.
//! Ensures consistency and safety. Basically a minimal subset of
//! rustc_serialize customized for our need.
//!
//! To use it simply implement `Writeable` or `Readable` and then use the
//! `serialize` or `deserialize` functions on them as appropriate.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use num_bigint::BigUint;

/// The maximum number of elements accepted in a length-prefixed collection,
/// in case a facetious peer sends us more than what we can allocate.
const MAX_COLLECTION_LEN: u64 = 1_000_000;

/// Possible errors deriving from serializing or deserializing.
#[derive(Debug)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	IOErr(io::Error),
	/// Expected a given value that wasn't found
	UnexpectedData {
		/// What we wanted
		expected: Vec<u8>,
		/// What we got
		received: Vec<u8>,
	},
	/// Data wasn't in a consumable format
	CorruptedData,
	/// When asked to read too much data
	TooLargeReadErr(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::IOErr(ref e) => write!(f, "IO error: {}", e),
			Error::UnexpectedData {
				ref expected,
				ref received,
			} => write!(f, "expected {:?}, got {:?}", expected, received),
			Error::CorruptedData => write!(f, "corrupted data"),
			Error::TooLargeReadErr(ref s) => write!(f, "too large read: {}", s),
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(e)
	}
}

/// Implementations defined how different numbers and binary structures are
/// written to an underlying stream or container (depending on implementation).
pub trait Writer {
	/// Writes a fixed number of bytes. The reader is expected to know the length.
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;

	/// Writes a u8 as bytes
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.write_fixed_bytes(&[n])
	}

	/// Writes a u16 as bytes
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		let mut bytes = [0; 2];
		BigEndian::write_u16(&mut bytes, n);
		self.write_fixed_bytes(&bytes)
	}

	/// Writes a u32 as bytes
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		let mut bytes = [0; 4];
		BigEndian::write_u32(&mut bytes, n);
		self.write_fixed_bytes(&bytes)
	}

	/// Writes a u64 as bytes
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		let mut bytes = [0; 8];
		BigEndian::write_u64(&mut bytes, n);
		self.write_fixed_bytes(&bytes)
	}

	/// Writes an i64 as bytes
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		let mut bytes = [0; 8];
		BigEndian::write_i64(&mut bytes, n);
		self.write_fixed_bytes(&bytes)
	}

	/// Writes a variable number of bytes. The length is encoded as a 64-bit
	/// prefix so the reader knows how much to read.
	fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.write_u64(bytes.len() as u64)?;
		self.write_fixed_bytes(bytes)
	}
}

/// Implementations defined how different numbers and binary structures are
/// read from an underlying stream or container (depending on implementation).
pub trait Reader {
	/// Read a u8 from the underlying Read
	fn read_u8(&mut self) -> Result<u8, Error>;
	/// Read a u16 from the underlying Read
	fn read_u16(&mut self) -> Result<u16, Error>;
	/// Read a u32 from the underlying Read
	fn read_u32(&mut self) -> Result<u32, Error>;
	/// Read a u64 from the underlying Read
	fn read_u64(&mut self) -> Result<u64, Error>;
	/// Read an i64 from the underlying Read
	fn read_i64(&mut self) -> Result<i64, Error>;
	/// Read a fixed number of bytes from the underlying Read
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error>;
	/// Read a variable size vector from the underlying Read. Expects a usize
	fn read_bytes_len_prefix(&mut self) -> Result<Vec<u8>, Error>;
	/// Consumes a byte from the reader, producing an error if it doesn't have
	/// the expected value
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error>;
}

/// Utility wrapper for an underlying byte Writer. Defines higher level methods
/// to write numbers, byte vectors, hashes, etc.
pub struct BinWriter<'a> {
	sink: &'a mut dyn Write,
}

impl<'a> BinWriter<'a> {
	/// Wraps a standard Write in a new BinWriter
	pub fn new(sink: &'a mut dyn Write) -> BinWriter<'a> {
		BinWriter { sink }
	}
}

impl<'a> Writer for BinWriter<'a> {
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.sink.write_all(bytes)?;
		Ok(())
	}
}

/// Utility wrapper for an underlying byte Reader. Defines higher level methods
/// to read numbers, byte vectors, hashes, etc.
pub struct BinReader<'a> {
	source: &'a mut dyn Read,
}

impl<'a> BinReader<'a> {
	/// Wraps a standard Read in a new BinReader
	pub fn new(source: &'a mut dyn Read) -> BinReader<'a> {
		BinReader { source }
	}
}

impl<'a> Reader for BinReader<'a> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.source.read_u8().map_err(Error::IOErr)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.source.read_u16::<BigEndian>().map_err(Error::IOErr)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.source.read_u32::<BigEndian>().map_err(Error::IOErr)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.source.read_u64::<BigEndian>().map_err(Error::IOErr)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.source.read_i64::<BigEndian>().map_err(Error::IOErr)
	}
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error> {
		// not reading more than 100k in a single fixed read
		if length > 100_000 {
			return Err(Error::TooLargeReadErr(format!(
				"fixed bytes length too large: {}",
				length
			)));
		}
		let mut buf = vec![0; length];
		self.source
			.read_exact(&mut buf)
			.map(move |_| buf)
			.map_err(Error::IOErr)
	}
	fn read_bytes_len_prefix(&mut self) -> Result<Vec<u8>, Error> {
		let len = self.read_u64()?;
		self.read_fixed_bytes(len as usize)
	}
	fn expect_u8(&mut self, val: u8) -> Result<u8, Error> {
		let b = self.read_u8()?;
		if b == val {
			Ok(b)
		} else {
			Err(Error::UnexpectedData {
				expected: vec![val],
				received: vec![b],
			})
		}
	}
}

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
/// Reads directly to a Reader, a utility type thinly wrapping an
/// underlying Read implementation.
pub trait Readable: Sized {
	/// Reads the data necessary to this Readable from the provided reader
	fn read(reader: &mut dyn Reader) -> Result<Self, Error>;
}

/// Deserializes a Readable from any std::io::Read implementation.
pub fn deserialize<T: Readable>(source: &mut dyn Read) -> Result<T, Error> {
	let mut reader = BinReader::new(source);
	T::read(&mut reader)
}

/// Serializes a Writeable into any std::io::Write implementation.
pub fn serialize<W: Writeable>(sink: &mut dyn Write, thing: &W) -> Result<(), Error> {
	let mut writer = BinWriter::new(sink);
	thing.write(&mut writer)
}

/// Utility function to serialize a writeable directly in memory using a
/// Vec<u8>.
pub fn ser_vec<W: Writeable>(thing: &W) -> Result<Vec<u8>, Error> {
	let mut vec = vec![];
	serialize(&mut vec, thing)?;
	Ok(vec)
}

/// Writes a 256-bit unsigned integer as a fixed 32-byte big-endian value.
pub fn write_biguint256<W: Writer>(writer: &mut W, n: &BigUint) -> Result<(), Error> {
	let bytes = n.to_bytes_be();
	if bytes.len() > 32 {
		return Err(Error::CorruptedData);
	}
	let mut buf = [0u8; 32];
	buf[32 - bytes.len()..].copy_from_slice(&bytes);
	writer.write_fixed_bytes(&buf)
}

/// Reads a 256-bit unsigned integer from its fixed 32-byte big-endian form.
pub fn read_biguint256(reader: &mut dyn Reader) -> Result<BigUint, Error> {
	let bytes = reader.read_fixed_bytes(32)?;
	Ok(BigUint::from_bytes_be(&bytes))
}

impl Writeable for u8 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u8(*self)
	}
}

impl Readable for u8 {
	fn read(reader: &mut dyn Reader) -> Result<u8, Error> {
		reader.read_u8()
	}
}

impl Writeable for u32 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u32(*self)
	}
}

impl Readable for u32 {
	fn read(reader: &mut dyn Reader) -> Result<u32, Error> {
		reader.read_u32()
	}
}

impl Writeable for u64 {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u64(*self)
	}
}

impl Readable for u64 {
	fn read(reader: &mut dyn Reader) -> Result<u64, Error> {
		reader.read_u64()
	}
}

impl<T: Writeable> Writeable for Vec<T> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
		writer.write_u64(self.len() as u64)?;
		for item in self {
			item.write(writer)?;
		}
		Ok(())
	}
}

impl<T: Readable> Readable for Vec<T> {
	fn read(reader: &mut dyn Reader) -> Result<Vec<T>, Error> {
		let count = reader.read_u64()?;
		if count > MAX_COLLECTION_LEN {
			return Err(Error::TooLargeReadErr(format!(
				"collection too large: {}",
				count
			)));
		}
		let mut items = Vec::with_capacity(count as usize);
		for _ in 0..count {
			items.push(T::read(reader)?);
		}
		Ok(items)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn ser_deser_primitives() {
		let mut vec = vec![];
		{
			let mut writer = BinWriter::new(&mut vec);
			writer.write_u8(7).unwrap();
			writer.write_u32(70_000).unwrap();
			writer.write_u64(1 << 40).unwrap();
			writer.write_bytes(b"cinder").unwrap();
		}
		let mut slice = &vec[..];
		let mut reader = BinReader::new(&mut slice);
		assert_eq!(reader.read_u8().unwrap(), 7);
		assert_eq!(reader.read_u32().unwrap(), 70_000);
		assert_eq!(reader.read_u64().unwrap(), 1 << 40);
		assert_eq!(reader.read_bytes_len_prefix().unwrap(), b"cinder".to_vec());
	}

	#[test]
	fn ser_deser_biguint() {
		let n = BigUint::from(123_456_789_u64) << 100;
		let mut vec = vec![];
		{
			let mut writer = BinWriter::new(&mut vec);
			write_biguint256(&mut writer, &n).unwrap();
		}
		assert_eq!(vec.len(), 32);
		let mut slice = &vec[..];
		let mut reader = BinReader::new(&mut slice);
		assert_eq!(read_biguint256(&mut reader).unwrap(), n);
	}
}
