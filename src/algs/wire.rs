//! Fixed, versioned, little-endian wire types for forest and cmesh exchanges.

use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::{Element, SubelementId};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr`].
pub mod kind {
    /// Migrated forest elements ([`super::WireElement`]).
    pub const ELEMENTS: u16 = 1;
    /// Ghost records ([`super::WireGhost`]).
    pub const GHOSTS: u16 = 2;
    /// Coarse-mesh trees (variable-length tree records).
    pub const TREES: u16 = 3;
}

/// All multi-byte integers in these structs are little-endian on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
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

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

const FLAG_SUBELEMENT: u8 = 1;

/// One element tagged with its global tree id.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireElement {
    pub tree_le: u64,
    pub anchor_le: [u32; 3],
    pub level: u8,
    pub sub_type: u8,
    pub sub_index: u8,
    pub flags: u8,
}

impl WireElement {
    pub fn new(tree: u64, e: &Element) -> Self {
        let (flags, sub_type, sub_index) = match e.sub {
            Some(sub) => (FLAG_SUBELEMENT, sub.transition_type, sub.index),
            None => (0, 0, 0),
        };
        Self {
            tree_le: tree.to_le(),
            anchor_le: e.anchor.map(u32::to_le),
            level: e.level,
            sub_type,
            sub_index,
            flags,
        }
    }
    pub fn tree(&self) -> u64 {
        u64::from_le(self.tree_le)
    }
    pub fn element(&self) -> Element {
        let base = Element::new(self.level, self.anchor_le.map(u32::from_le));
        if self.flags & FLAG_SUBELEMENT != 0 {
            base.with_subelement(SubelementId {
                transition_type: self.sub_type,
                index: self.sub_index,
            })
        } else {
            base
        }
    }
}

/// A ghost element with its provenance in the owner's tree.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireGhost {
    pub element: WireElement,
    pub owner_index_le: u32,
    pub eclass: u8,
    pub _pad: [u8; 3],
}

impl WireGhost {
    pub fn new(tree: u64, eclass: ElementClass, e: &Element, owner_index: u32) -> Self {
        Self {
            element: WireElement::new(tree, e),
            owner_index_le: owner_index.to_le(),
            eclass: eclass as u8,
            _pad: [0; 3],
        }
    }
    pub fn owner_index(&self) -> u32 {
        u32::from_le(self.owner_index_le)
    }
    pub fn eclass(&self) -> Result<ElementClass, MeshForestError> {
        ElementClass::from_u8(self.eclass)
            .ok_or_else(|| MeshForestError::WireFormat(format!("unknown element class tag {}", self.eclass)))
    }
}

/// Number of elements that follow for one tree.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireTreeCount {
    pub tree_le: u64,
    pub count_le: u64,
}

impl WireTreeCount {
    pub fn new(tree: u64, count: u64) -> Self {
        Self {
            tree_le: tree.to_le(),
            count_le: count.to_le(),
        }
    }
    pub fn tree(&self) -> u64 {
        u64::from_le(self.tree_le)
    }
    pub fn count(&self) -> u64 {
        u64::from_le(self.count_le)
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireElement>(), 24);
const_assert_eq!(align_of::<WireElement>(), 8);
const_assert_eq!(size_of::<WireGhost>(), 32);
const_assert_eq!(size_of::<WireTreeCount>(), 16);

const FRAME_LEN: usize = size_of::<WireHdr>() + size_of::<WireCount>();

/// Frame `records` as header, count, then the records.
pub fn encode_records<T: Pod>(kind: u16, records: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_LEN + size_of::<T>() * records.len());
    out.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(kind)));
    out.extend_from_slice(bytemuck::bytes_of(&WireCount::new(records.len())));
    out.extend_from_slice(cast_slice(records));
    out
}

/// Check a frame header and return the record count and payload.
pub fn decode_frame(kind: u16, bytes: &[u8]) -> Result<(usize, &[u8]), MeshForestError> {
    if bytes.len() < FRAME_LEN {
        return Err(MeshForestError::WireFormat(format!(
            "frame of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let hdr: WireHdr = bytemuck::pod_read_unaligned(&bytes[..size_of::<WireHdr>()]);
    if hdr.version() != WIRE_VERSION || hdr.kind() != kind {
        return Err(MeshForestError::WireFormat(format!(
            "expected kind {kind} version {WIRE_VERSION}, got kind {} version {}",
            hdr.kind(),
            hdr.version()
        )));
    }
    let count: WireCount = bytemuck::pod_read_unaligned(&bytes[size_of::<WireHdr>()..FRAME_LEN]);
    Ok((count.get(), &bytes[FRAME_LEN..]))
}

/// Decode a frame produced by [`encode_records`].
pub fn decode_records<T: Pod>(kind: u16, bytes: &[u8]) -> Result<Vec<T>, MeshForestError> {
    let (n, payload) = decode_frame(kind, bytes)?;
    let expected = n * size_of::<T>();
    if payload.len() != expected {
        return Err(MeshForestError::WireFormat(format!(
            "expected {expected} bytes for {n} records, got {}",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::element_len;

    #[test]
    fn element_frame_keeps_subelement_tags() {
        let base = Element::new(3, [element_len(3), 0, 0]);
        let sub = base.with_subelement(SubelementId {
            transition_type: 0b0101,
            index: 4,
        });
        let bytes = encode_records(kind::ELEMENTS, &[WireElement::new(9, &base), WireElement::new(2, &sub)]);
        let back: Vec<WireElement> = decode_records(kind::ELEMENTS, &bytes).unwrap();
        assert_eq!(back[0].tree(), 9);
        assert_eq!(back[0].element(), base);
        assert_eq!(back[1].element(), sub);
    }

    #[test]
    fn wrong_kind_or_length_is_rejected() {
        let bytes = encode_records(kind::GHOSTS, &[WireTreeCount::new(1, 2)]);
        assert!(decode_records::<WireTreeCount>(kind::ELEMENTS, &bytes).is_err());
        assert!(decode_records::<WireGhost>(kind::GHOSTS, &bytes).is_err());
        assert!(decode_frame(kind::GHOSTS, &bytes[..5]).is_err());
    }

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(kind::TREES);
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!(hdr.kind(), kind::TREES);
    }
}
