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
use std::hash::{BuildHasher, Hash, Hasher};

pub(crate) fn make_hash<Q: ?Sized, S: BuildHasher>(build_hasher: &S, value: &Q) -> u64
where
    Q: Hash,
{
    let mut hasher = build_hasher.build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn seed_from_hasher<S: BuildHasher>(build_hasher: &S) -> u64 {
    make_hash(build_hasher, &0u8)
}

pub(crate) fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// All NaN payloads collapse to one bit pattern; `-0.0` and `+0.0` stay
/// distinct.
pub(crate) fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

pub(crate) fn canonical_f32_bits(value: f32) -> u32 {
    if value.is_nan() {
        f32::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

/// IEEE binary16: NaN iff the exponent is all ones and the mantissa nonzero.
pub(crate) fn canonical_f16_bits(bits: u16) -> u16 {
    if bits & 0x7c00 == 0x7c00 && bits & 0x03ff != 0 {
        0x7e00
    } else {
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_bits_canonicalised() {
        let quiet = f64::NAN.to_bits();
        let payload = f64::from_bits(quiet | 0xdead);
        assert!(payload.is_nan());
        assert_eq!(canonical_f64_bits(payload), quiet);
        assert_eq!(canonical_f32_bits(f32::from_bits(0x7fc0_0001)), f32::NAN.to_bits());
        assert_eq!(canonical_f16_bits(0x7e01), 0x7e00);
        assert_eq!(canonical_f16_bits(0x7c00), 0x7c00); // +inf untouched
    }

    #[test]
    fn test_signed_zeros_stay_distinct() {
        assert_ne!(canonical_f64_bits(0.0), canonical_f64_bits(-0.0));
        assert_ne!(canonical_f32_bits(0.0), canonical_f32_bits(-0.0));
    }
}
