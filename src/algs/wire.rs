//! Fixed, versioned, little-endian wire types for the group-creation handshake.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::hash::{Hash, Hasher};
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received payload into owned values. Copies, so the payload
/// need not be aligned for `T`.
pub fn collect_from_bytes<T: Pod>(v: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

pub const KIND_GROUP_HELLO: u16 = 1;
pub const KIND_GROUP_ACK: u16 = 2;

/// All multi-byte integers in these structs are **little-endian** on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32, // keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

/// Sent by every non-root member to the group's local rank 0.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireGroupHello {
    pub hdr: WireHdr,
    pub group_le: u64,
    pub members_le: u32,
    pub local_rank_le: u32,
    pub fingerprint_le: u64,
}

impl WireGroupHello {
    pub fn new(group: u64, members: usize, local_rank: usize, fingerprint: u64) -> Self {
        Self {
            hdr: WireHdr::new(KIND_GROUP_HELLO),
            group_le: group.to_le(),
            members_le: (members as u32).to_le(),
            local_rank_le: (local_rank as u32).to_le(),
            fingerprint_le: fingerprint.to_le(),
        }
    }
    pub fn group(&self) -> u64 {
        u64::from_le(self.group_le)
    }
    pub fn members(&self) -> usize {
        u32::from_le(self.members_le) as usize
    }
    pub fn local_rank(&self) -> usize {
        u32::from_le(self.local_rank_le) as usize
    }
    pub fn fingerprint(&self) -> u64 {
        u64::from_le(self.fingerprint_le)
    }
}

/// Root's verdict on a group-creation handshake.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, Debug)]
pub struct WireAck {
    pub hdr: WireHdr,
    pub group_le: u64,
    pub ok_le: u32,
    pub reserved_le: u32,
}

impl WireAck {
    pub fn new(group: u64, ok: bool) -> Self {
        Self {
            hdr: WireHdr::new(KIND_GROUP_ACK),
            group_le: group.to_le(),
            ok_le: (ok as u32).to_le(),
            reserved_le: 0,
        }
    }
    pub fn group(&self) -> u64 {
        u64::from_le(self.group_le)
    }
    pub fn ok(&self) -> bool {
        u32::from_le(self.ok_le) != 0
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireGroupHello>(), 32);
const_assert_eq!(size_of::<WireAck>(), 24);

/// Stable fingerprint of an ordered rank set (FNV-1a over little-endian u64s),
/// identical on every rank regardless of platform.
pub fn rank_fingerprint(ranks: &[usize]) -> u64 {
    let mut h = Fnv1a::default();
    for &r in ranks {
        (r as u64).hash(&mut h);
    }
    h.finish()
}

struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }
}

impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
        self.0
    }
    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x0100_0000_01b3);
        }
    }
    fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_fields_survive_the_wire() {
        let hello = WireGroupHello::new(7, 4, 3, 0xDEAD_BEEF);
        let bytes = cast_slice(std::slice::from_ref(&hello)).to_vec();
        let back: Vec<WireGroupHello> = collect_from_bytes(&bytes);
        assert_eq!(back[0].hdr.version(), WIRE_VERSION);
        assert_eq!(back[0].hdr.kind(), KIND_GROUP_HELLO);
        assert_eq!(back[0].group(), 7);
        assert_eq!(back[0].members(), 4);
        assert_eq!(back[0].local_rank(), 3);
        assert_eq!(back[0].fingerprint(), 0xDEAD_BEEF);
    }

    #[test]
    fn fingerprint_is_order_sensitive() {
        assert_eq!(rank_fingerprint(&[0, 1]), rank_fingerprint(&[0, 1]));
        assert_ne!(rank_fingerprint(&[0, 1]), rank_fingerprint(&[1, 0]));
    }
}
