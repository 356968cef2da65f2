//! Coarse-mesh trees and their face links.

use crate::eclass::ElementClass;
use crate::mesh_error::MeshForestError;
use crate::scheme::cube::inverse_orientation;
use bytes::{Buf, BufMut};

/// Connection of one tree face to a face of another (or the same) tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FaceLink {
    /// Global id of the neighbor tree.
    pub tree: u64,
    /// Face of the neighbor tree.
    pub face: u8,
    /// Orientation of the neighbor face seen from this tree.
    pub orientation: u8,
    /// Class of the neighbor tree.
    pub eclass: ElementClass,
}

impl FaceLink {
    /// The link stored on the other side, pointing back to `tree`, `face`.
    pub fn reversed(&self, tree: u64, face: u8, eclass: ElementClass) -> FaceLink {
        FaceLink {
            tree,
            face,
            orientation: inverse_orientation(self.orientation),
            eclass,
        }
    }
}

/// A macro-element of the coarse mesh. Immutable once committed.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub(crate) global_id: u64,
    pub(crate) eclass: ElementClass,
    pub(crate) links: Vec<Option<FaceLink>>,
    pub(crate) vertices: Option<Vec<[f64; 3]>>,
}

impl Tree {
    pub(crate) fn new(global_id: u64, eclass: ElementClass) -> Self {
        Self {
            global_id,
            eclass,
            links: vec![None; eclass.num_faces()],
            vertices: None,
        }
    }

    pub fn global_id(&self) -> u64 {
        self.global_id
    }

    pub fn eclass(&self) -> ElementClass {
        self.eclass
    }

    /// Link across `face`; `None` on the domain boundary.
    pub fn face_link(&self, face: usize) -> Option<&FaceLink> {
        self.links.get(face).and_then(Option::as_ref)
    }

    pub fn links(&self) -> &[Option<FaceLink>] {
        &self.links
    }

    /// Attached corner coordinates, if any.
    pub fn vertices(&self) -> Option<&[[f64; 3]]> {
        self.vertices.as_deref()
    }

    /// Global ids of the face-neighbor trees, without duplicates.
    pub fn neighbor_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.links.iter().flatten().map(|l| l.tree).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Append the tree record to `buf`.
    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.global_id);
        buf.put_u8(self.eclass as u8);
        buf.put_u8(self.links.len() as u8);
        for link in &self.links {
            match link {
                Some(l) => {
                    buf.put_u8(1);
                    buf.put_u64_le(l.tree);
                    buf.put_u8(l.face);
                    buf.put_u8(l.orientation);
                    buf.put_u8(l.eclass as u8);
                }
                None => buf.put_u8(0),
            }
        }
        match &self.vertices {
            Some(vertices) => {
                buf.put_u8(1);
                buf.put_u32_le(vertices.len() as u32);
                for v in vertices {
                    for &c in v {
                        buf.put_f64_le(c);
                    }
                }
            }
            None => buf.put_u8(0),
        }
    }

    /// Read one tree record from `buf`.
    pub(crate) fn decode(buf: &mut impl Buf) -> Result<Tree, MeshForestError> {
        need(buf, 10)?;
        let global_id = buf.get_u64_le();
        let eclass = decode_class(buf.get_u8())?;
        let num_links = buf.get_u8() as usize;
        let mut links = Vec::with_capacity(num_links);
        for _ in 0..num_links {
            need(buf, 1)?;
            if buf.get_u8() == 0 {
                links.push(None);
                continue;
            }
            need(buf, 11)?;
            let tree = buf.get_u64_le();
            let face = buf.get_u8();
            let orientation = buf.get_u8();
            let eclass = decode_class(buf.get_u8())?;
            links.push(Some(FaceLink {
                tree,
                face,
                orientation,
                eclass,
            }));
        }
        need(buf, 1)?;
        let vertices = if buf.get_u8() == 1 {
            need(buf, 4)?;
            let n = buf.get_u32_le() as usize;
            need(buf, n * 24)?;
            Some(
                (0..n)
                    .map(|_| [buf.get_f64_le(), buf.get_f64_le(), buf.get_f64_le()])
                    .collect(),
            )
        } else {
            None
        };
        Ok(Tree {
            global_id,
            eclass,
            links,
            vertices,
        })
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), MeshForestError> {
    if buf.remaining() < n {
        Err(MeshForestError::WireFormat(format!(
            "tree record truncated: need {n} bytes, {} left",
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

fn decode_class(tag: u8) -> Result<ElementClass, MeshForestError> {
    ElementClass::from_u8(tag)
        .ok_or_else(|| MeshForestError::WireFormat(format!("unknown element class tag {tag}")))
}
