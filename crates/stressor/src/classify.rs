//! Broadcast result classification.
//!
//! The chain returns a numeric code synchronously from every broadcast; the
//! verdict decides how the pacing loop reacts. Classification is total:
//! every possible code maps to exactly one verdict, and unrecognized codes
//! surface as `Fatal` rather than being papered over.

/// Transaction accepted into the mempool.
pub const CODE_OK: u32 = 0;
/// Transaction already present in the mempool cache; the local sequence has
/// drifted behind the chain's view.
pub const CODE_TX_IN_MEMPOOL_CACHE: u32 = 19;
/// Mempool is saturated; backpressure, not an account problem.
pub const CODE_MEMPOOL_FULL: u32 = 20;
/// Sequence or account number did not match what the chain expects.
pub const CODE_WRONG_SEQUENCE: u32 = 32;

/// How the pacing loop should react to a broadcast result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastVerdict {
    /// Code zero: register with the tracker and keep going.
    Accepted,
    /// Transient backpressure: undo the just-consumed sequence and defer the
    /// rest of the round; the same account retries next round.
    RetrySameAccount,
    /// The active account's sequence is out of sync: rotate to the next
    /// signer (which refreshes from chain) and continue.
    AdvanceAccount,
    /// Unrecognized failure: abort the run and surface the result verbatim.
    Fatal,
}

/// Map a broadcast result code to a verdict.
pub fn classify(code: u32) -> BroadcastVerdict {
    match code {
        CODE_OK => BroadcastVerdict::Accepted,
        CODE_MEMPOOL_FULL => BroadcastVerdict::RetrySameAccount,
        CODE_TX_IN_MEMPOOL_CACHE | CODE_WRONG_SEQUENCE => BroadcastVerdict::AdvanceAccount,
        _ => BroadcastVerdict::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_their_verdicts() {
        assert_eq!(classify(CODE_OK), BroadcastVerdict::Accepted);
        assert_eq!(classify(CODE_MEMPOOL_FULL), BroadcastVerdict::RetrySameAccount);
        assert_eq!(
            classify(CODE_TX_IN_MEMPOOL_CACHE),
            BroadcastVerdict::AdvanceAccount
        );
        assert_eq!(classify(CODE_WRONG_SEQUENCE), BroadcastVerdict::AdvanceAccount);
    }

    #[test]
    fn every_code_gets_exactly_one_verdict() {
        // Spot-check the space around the known codes plus extremes; the
        // match is total by construction.
        for code in (0..64).chain([u32::MAX - 1, u32::MAX]) {
            let verdict = classify(code);
            let expected = match code {
                CODE_OK => BroadcastVerdict::Accepted,
                CODE_MEMPOOL_FULL => BroadcastVerdict::RetrySameAccount,
                CODE_TX_IN_MEMPOOL_CACHE | CODE_WRONG_SEQUENCE => {
                    BroadcastVerdict::AdvanceAccount
                }
                _ => BroadcastVerdict::Fatal,
            };
            assert_eq!(verdict, expected, "code {code}");
        }
    }
}
