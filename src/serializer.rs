// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Record serializers used to move shuffle data through storage.

use std::fmt::Debug;
use std::sync::Arc;

use crate::dependency::Record;
use crate::error::{Result, ShuffleError};

/// Encodes records into bytes and decodes them back.
pub trait Serializer: Debug + Send + Sync {
    /// Whether serialized records can be reordered or concatenated as
    /// opaque byte ranges and still decode correctly.
    ///
    /// This holds only when the encoding of a record does not depend on the
    /// records written before it (no shared headers, back-references or
    /// dictionary state).
    fn supports_relocation(&self) -> bool;

    /// Appends the encoding of `record` to `out`.
    fn serialize(&self, record: &Record, out: &mut Vec<u8>) -> Result<()>;

    /// Decodes every record in `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<Record>>;
}

/// A serializer proven to support relocation of serialized records.
///
/// Only obtainable through [`RelocatableSerializer::try_new`], so holding
/// one is proof that the check already ran.
#[derive(Debug, Clone)]
pub struct RelocatableSerializer(Arc<dyn Serializer>);

impl RelocatableSerializer {
    /// Returns `None` if `serializer` does not support relocation.
    pub fn try_new(serializer: Arc<dyn Serializer>) -> Option<Self> {
        serializer
            .supports_relocation()
            .then_some(RelocatableSerializer(serializer))
    }

    pub fn inner(&self) -> &Arc<dyn Serializer> {
        &self.0
    }
}

/// Frames each record as `[u32 key_len][key][u32 value_len][value]`,
/// little-endian. Records are self-delimiting and therefore relocatable.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixedSerializer;

impl LengthPrefixedSerializer {
    fn write_field(field: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let len = u32::try_from(field.len()).map_err(|_| {
            ShuffleError::Serialization(format!(
                "field of {} bytes exceeds the u32 length prefix",
                field.len()
            ))
        })?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(field);
        Ok(())
    }

    fn read_field<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
        let header = bytes.get(*pos..*pos + 4).ok_or_else(|| {
            ShuffleError::Serialization(format!(
                "truncated length prefix at byte {pos}"
            ))
        })?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]])
            as usize;
        let start = *pos + 4;
        let field = bytes.get(start..start + len).ok_or_else(|| {
            ShuffleError::Serialization(format!(
                "truncated field of {len} bytes at byte {start}"
            ))
        })?;
        *pos = start + len;
        Ok(field)
    }
}

impl Serializer for LengthPrefixedSerializer {
    fn supports_relocation(&self) -> bool {
        true
    }

    fn serialize(&self, record: &Record, out: &mut Vec<u8>) -> Result<()> {
        Self::write_field(&record.key, out)?;
        Self::write_field(&record.value, out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let key = Self::read_field(bytes, &mut pos)?;
            let value = Self::read_field(bytes, &mut pos)?;
            records.push(Record::new(key, value));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenated_records_decode_in_any_order() -> Result<()> {
        let serializer = LengthPrefixedSerializer;
        let a = Record::new("a", "1");
        let b = Record::new("bb", "");

        let mut first = Vec::new();
        serializer.serialize(&a, &mut first)?;
        let mut second = Vec::new();
        serializer.serialize(&b, &mut second)?;

        let mut swapped = second.clone();
        swapped.extend_from_slice(&first);
        assert_eq!(serializer.deserialize(&swapped)?, vec![b, a]);
        Ok(())
    }

    #[test]
    fn truncated_block_is_rejected() -> Result<()> {
        let serializer = LengthPrefixedSerializer;
        let mut bytes = Vec::new();
        serializer.serialize(&Record::new("key", "value"), &mut bytes)?;
        bytes.pop();

        let err = serializer.deserialize(&bytes).unwrap_err();
        assert!(matches!(err, ShuffleError::Serialization(_)));
        Ok(())
    }

    #[test]
    fn relocatable_proof_requires_support() {
        #[derive(Debug)]
        struct Stateful;
        impl Serializer for Stateful {
            fn supports_relocation(&self) -> bool {
                false
            }
            fn serialize(&self, _: &Record, _: &mut Vec<u8>) -> Result<()> {
                Ok(())
            }
            fn deserialize(&self, _: &[u8]) -> Result<Vec<Record>> {
                Ok(vec![])
            }
        }

        assert!(RelocatableSerializer::try_new(Arc::new(Stateful)).is_none());
        assert!(
            RelocatableSerializer::try_new(Arc::new(LengthPrefixedSerializer)).is_some()
        );
    }
}
