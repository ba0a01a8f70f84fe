//! `apply_id` wire format: `"{id}-{apply_sn:016}"`.
//!
//! The format is persisted by the workflow engine and echoed back in every
//! callback, so it must never change.

use crate::error::{CatalogError, CatalogResult};

pub fn encode_apply_id(id: u64, apply_sn: u64) -> String {
    format!("{}-{:016}", id, apply_sn)
}

/// Split on the first `-` and parse both halves. Only the exact form
/// [`encode_apply_id`] produces is accepted: ASCII digits, no sign, an SN
/// padded to at least sixteen digits and no other leading zeros.
pub fn decode_apply_id(apply_id: &str) -> CatalogResult<(u64, u64)> {
    let invalid = || CatalogError::InvalidApplyId(apply_id.to_string());

    let (id, sn) = apply_id.split_once('-').ok_or_else(invalid)?;
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(id) || !all_digits(sn) {
        return Err(invalid());
    }
    let id = id.parse::<u64>().map_err(|_| invalid())?;
    let sn = sn.parse::<u64>().map_err(|_| invalid())?;
    if encode_apply_id(id, sn) != apply_id {
        return Err(invalid());
    }
    Ok((id, sn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sn_is_zero_padded_to_sixteen_digits() {
        assert_eq!(encode_apply_id(12, 42), "12-0000000000000042");
    }

    #[test]
    fn round_trips_extreme_values() {
        for (id, sn) in [(0, 0), (1, 1), (u64::MAX, u64::MAX), (987_654, 1 << 62)] {
            assert_eq!(decode_apply_id(&encode_apply_id(id, sn)).unwrap(), (id, sn));
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "12", "-5", "12-", "a-0000000000000001", "12-xyz", "12-3-4", "12--3"] {
            assert!(
                matches!(decode_apply_id(bad), Err(CatalogError::InvalidApplyId(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn rejects_non_canonical_forms() {
        for bad in [
            "+12-+3",
            "12-3",
            "12-+000000000000003",
            "012-0000000000000003",
            "12-00000000000000003",
            " 12-0000000000000003",
            "12-0000000000000003 ",
        ] {
            assert!(
                matches!(decode_apply_id(bad), Err(CatalogError::InvalidApplyId(_))),
                "accepted {:?}",
                bad
            );
        }
    }
}
