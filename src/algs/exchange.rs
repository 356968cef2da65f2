//! Blocking collectives built on the point-to-point [`Communicator`].
//!
//! Every collective posts all receives and sends first, then waits on every
//! receive without returning early, then drains every send handle. A
//! malformed or missing message is reported only after the exchange is
//! complete, so no handle outlives the call.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice};
use crate::mesh_error::MeshForestError;
use bytemuck::Zeroable;

/// Exchange one byte buffer per destination; `outgoing[r]` goes to rank `r`.
///
/// Returns `incoming[r]`, the buffer rank `r` addressed to this process. The
/// entry for this rank is moved across without messaging.
pub fn all_to_all<C: Communicator>(
    comm: &C,
    tag: CommTag,
    mut outgoing: Vec<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, MeshForestError> {
    let size = comm.size();
    let me = comm.rank();
    if outgoing.len() != size {
        return Err(MeshForestError::WireFormat(format!(
            "all-to-all expects {size} buffers, got {}",
            outgoing.len()
        )));
    }

    // 1) post all receives
    let recvs: Vec<(usize, C::RecvHandle)> = (0..size)
        .filter(|&peer| peer != me)
        .map(|peer| (peer, comm.irecv(peer, tag)))
        .collect();

    // 2) post all sends
    let sends: Vec<C::SendHandle> = (0..size)
        .filter(|&peer| peer != me)
        .map(|peer| comm.isend(peer, tag, &outgoing[peer]))
        .collect();

    // 3) wait for all receives, remember the first failure
    let mut incoming = vec![Vec::new(); size];
    incoming[me] = std::mem::take(&mut outgoing[me]);
    let mut maybe_err = None;
    for (peer, handle) in recvs {
        match handle.wait() {
            Some(data) => incoming[peer] = data,
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshForestError::CommError {
                    neighbor: peer,
                    detail: format!("no message with tag {:#06x}", tag.as_u16()),
                });
            }
            None => {}
        }
    }

    // 4) always drain sends
    for send in sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Gather one byte buffer from every process on every process.
pub fn all_gather_bytes<C: Communicator>(
    comm: &C,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, MeshForestError> {
    let outgoing = vec![payload.to_vec(); comm.size()];
    all_to_all(comm, CommTag::ALL_GATHER, outgoing)
}

/// Gather one `u64` from every process, indexed by rank.
pub fn all_gather_u64<C: Communicator>(comm: &C, value: u64) -> Result<Vec<u64>, MeshForestError> {
    let gathered = all_gather_bytes(comm, &value.to_le_bytes())?;
    gathered
        .into_iter()
        .enumerate()
        .map(|(rank, bytes)| {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                MeshForestError::CommError {
                    neighbor: rank,
                    detail: format!("expected 8 bytes for a gathered count, got {}", bytes.len()),
                }
            })?;
            Ok(u64::from_le_bytes(raw))
        })
        .collect()
}

/// Logical or of `flag` over the group.
pub fn all_reduce_or<C: Communicator>(comm: &C, flag: bool) -> Result<bool, MeshForestError> {
    let count = WireCount::new(usize::from(flag));
    let outgoing = vec![cast_slice(std::slice::from_ref(&count)).to_vec(); comm.size()];
    let gathered = all_to_all(comm, CommTag::REDUCE_OR, outgoing)?;
    let mut any = false;
    for (rank, bytes) in gathered.iter().enumerate() {
        if bytes.len() != std::mem::size_of::<WireCount>() {
            return Err(MeshForestError::CommError {
                neighbor: rank,
                detail: format!("expected a flag, got {} bytes", bytes.len()),
            });
        }
        let mut value = WireCount::zeroed();
        bytemuck::bytes_of_mut(&mut value).copy_from_slice(bytes);
        any |= value.get() != 0;
    }
    Ok(any)
}

/// Exclusive prefix sum of per-rank counts, with the total appended.
pub fn offsets_from_counts(counts: &[u64]) -> Result<Vec<u64>, MeshForestError> {
    let mut offsets = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0u64;
    offsets.push(0);
    for &c in counts {
        acc = acc
            .checked_add(c)
            .ok_or(MeshForestError::Overflow("partition offsets"))?;
        offsets.push(acc);
    }
    Ok(offsets)
}
