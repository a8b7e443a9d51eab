//! Delta application: reconstruct a target object from its base.

use super::{read_op, read_sizes, DeltaOp};
use crate::PackError;

/// Apply `delta` to `base`, producing the target bytes.
///
/// The declared base size must match `base`, every copy must stay inside
/// it, and the output must come out at exactly the declared result size;
/// any deviation is fatal.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let (base_size, result_size, mut pos) = read_sizes(delta)?;

    if base_size != base.len() {
        return Err(PackError::BadDelta {
            offset: 0,
            reason: format!("base size {} does not match base ({})", base_size, base.len()),
        });
    }

    let mut out = Vec::with_capacity(result_size);
    while pos < delta.len() {
        let (op, next) = read_op(delta, pos)?;
        match op {
            DeltaOp::Copy { offset, len } => {
                let end = offset.checked_add(len).filter(|&e| e <= base.len()).ok_or(
                    PackError::BadDelta {
                        offset: pos as u64,
                        reason: format!(
                            "copy {offset}+{len} escapes base of {} bytes",
                            base.len()
                        ),
                    },
                )?;
                out.extend_from_slice(&base[offset..end]);
            }
            DeltaOp::Insert(bytes) => out.extend_from_slice(&bytes),
        }
        pos = next;
    }

    if out.len() != result_size {
        return Err(PackError::BadDelta {
            offset: 0,
            reason: format!("result is {} bytes, delta declared {}", out.len(), result_size),
        });
    }
    Ok(out)
}
