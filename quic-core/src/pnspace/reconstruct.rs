//! Truncated packet-number reconstruction and the length a sender must
//! use so the receiver can reconstruct unambiguously (RFC 9000 §A.3,
//! spec §4.4).

/// Recover the full packet number from its truncated wire encoding.
///
/// `pn_nbits` is `8 * pn_len` (pn_len in `1..=4` bytes).
pub fn reconstruct_pn(largest: i64, truncated: u64, pn_nbits: u32) -> u64 {
    let expected = largest + 1;
    let win: i64 = 1i64 << pn_nbits;
    let hwin = win / 2;
    let mask = win - 1;

    let mut candidate = (expected & !mask) | truncated as i64;
    if candidate + hwin <= expected {
        candidate += win;
    } else if candidate > expected + hwin && candidate > win {
        candidate -= win;
    }
    candidate as u64
}

/// Smallest packet-number length (in bytes, `1..=4`) such that the peer,
/// knowing only `largest_acked`, can reconstruct `pn` unambiguously:
/// `pn - largest_acked < 2^(8*len - 1)`. Before any ACK has been
/// received, the full 4-byte length is used.
pub fn required_pn_length(pn: u64, largest_acked: Option<u64>) -> usize {
    let Some(largest_acked) = largest_acked else {
        return 4;
    };
    let range = pn.saturating_sub(largest_acked);
    for len in 1..=4u32 {
        if range < (1u64 << (8 * len - 1)) {
            return len as usize;
        }
    }
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_forward_across_epoch_boundary() {
        // largest=0xffffffff, truncated=0x01, pn_nbits=8 -> 0x100000001
        assert_eq!(reconstruct_pn(0xffff_ffff, 0x01, 8), 0x1_0000_0001);
    }

    #[test]
    fn small_truncated_value_does_not_go_negative() {
        // largest=0, truncated=0xff, pn_nbits=8 -> 0xff, not -1.
        assert_eq!(reconstruct_pn(0, 0xff, 8), 0xff);
    }

    #[test]
    fn recovers_pn_within_half_window_of_expected() {
        for pn_nbits in [8u32, 16, 24, 32] {
            let largest: i64 = 1_000_000;
            let half = 1i64 << (pn_nbits - 1);
            for delta in [-half + 1, 0, half - 1] {
                let pn = (largest + 1 + delta) as u64;
                let win = 1u64 << pn_nbits;
                let truncated = pn & (win - 1);
                assert_eq!(reconstruct_pn(largest, truncated, pn_nbits), pn);
            }
        }
    }

    #[test]
    fn required_length_grows_with_distance_from_largest_acked() {
        assert_eq!(required_pn_length(10, Some(9)), 1);
        assert_eq!(required_pn_length(200, Some(0)), 2);
        assert_eq!(required_pn_length(1 << 20, Some(0)), 3);
        assert_eq!(required_pn_length(1 << 28, Some(0)), 4);
    }

    #[test]
    fn no_prior_ack_forces_full_length() {
        assert_eq!(required_pn_length(0, None), 4);
    }
}
