//! Weighted validator set with proposer-priority bookkeeping.
//!
//! Validators are kept in a deterministic order (power descending, address
//! ascending) so every reader sees the same set. The proposer rotates via
//! the accumulate-and-subtract priority rule: each round every validator
//! gains priority equal to its power, the highest-priority validator
//! proposes and pays the total power back. Priority advances every height
//! even when the membership does not change.

use {
    crate::{
        error::{EngineError, Result},
        vote::Commit,
    },
    chainmock_abci::types::BlockIdFlag,
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::collections::HashMap,
};

/// A single validator: identity, voting power, and rotation priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub address: Pubkey,
    pub power: u64,
    pub proposer_priority: i64,
}

/// An ordered, weighted set of validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    /// Sorted by power (descending), then address (ascending).
    validators: Vec<Validator>,
    /// Fast lookup from address to index in `validators`.
    index: HashMap<Pubkey, usize>,
    /// Sum of all voting power.
    total_power: u64,
    /// The validator that proposes the next block.
    proposer: Option<Pubkey>,
}

fn canonical_sort(validators: &mut [Validator]) {
    validators.sort_by(|a, b| {
        b.power
            .cmp(&a.power)
            .then_with(|| a.address.cmp(&b.address))
    });
}

impl ValidatorSet {
    /// Create a validator set from (address, power) pairs.
    /// Zero-power entries are dropped; the order of the input is irrelevant.
    pub fn new(entries: Vec<(Pubkey, u64)>) -> Self {
        let mut validators: Vec<Validator> = entries
            .into_iter()
            .filter(|(_, power)| *power > 0)
            .map(|(address, power)| Validator {
                address,
                power,
                proposer_priority: 0,
            })
            .collect();
        canonical_sort(&mut validators);

        let mut set = Self {
            validators,
            index: HashMap::new(),
            total_power: 0,
            proposer: None,
        };
        set.rebuild();
        set.proposer = set.validators.first().map(|v| v.address);
        set
    }

    fn rebuild(&mut self) {
        self.total_power = self.validators.iter().map(|v| v.power).sum();
        self.index = self
            .validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.address, i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Look up a validator and its index by address.
    pub fn get_by_address(&self, address: &Pubkey) -> Option<(usize, &Validator)> {
        self.index
            .get(address)
            .map(|&i| (i, &self.validators[i]))
    }

    pub fn power_of(&self, address: &Pubkey) -> u64 {
        self.get_by_address(address).map(|(_, v)| v.power).unwrap_or(0)
    }

    pub fn contains(&self, address: &Pubkey) -> bool {
        self.index.contains_key(address)
    }

    /// Iterator over all validators in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }

    /// All validator addresses in canonical order.
    pub fn addresses(&self) -> Vec<Pubkey> {
        self.validators.iter().map(|v| v.address).collect()
    }

    /// The validator currently designated to propose.
    pub fn proposer(&self) -> Option<&Validator> {
        self.proposer
            .as_ref()
            .and_then(|addr| self.get_by_address(addr))
            .map(|(_, v)| v)
    }

    /// Digest over the ordered (address, power) pairs.
    pub fn hash(&self) -> Hash {
        let entries: Vec<Vec<u8>> = self
            .validators
            .iter()
            .map(|v| {
                let mut bytes = v.address.to_bytes().to_vec();
                bytes.extend_from_slice(&v.power.to_le_bytes());
                bytes
            })
            .collect();
        let refs: Vec<&[u8]> = entries.iter().map(|e| e.as_slice()).collect();
        solana_sha256_hasher::hashv(&refs)
    }

    // -- Quorum --

    /// Whether `power` is strictly more than 2/3 of the total power.
    pub fn has_quorum(&self, power: u64) -> bool {
        // Integer arithmetic: power > total * 2/3  <=>  power * 3 > total * 2.
        (power as u128) * 3 > (self.total_power as u128) * 2
    }

    /// The minimum power that constitutes a quorum.
    pub fn quorum_power(&self) -> u64 {
        self.total_power * 2 / 3 + 1
    }

    // -- Proposer rotation --

    /// Advance the proposer priority `times` rounds, re-electing the
    /// proposer after each round.
    pub fn increment_proposer_priority(&mut self, times: u32) {
        for _ in 0..times {
            for v in &mut self.validators {
                v.proposer_priority = v.proposer_priority.saturating_add(v.power as i64);
            }
            let Some(top) = self
                .validators
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.proposer_priority
                        .cmp(&b.proposer_priority)
                        // Prefer the lower address on ties.
                        .then_with(|| b.address.cmp(&a.address))
                })
                .map(|(i, _)| i)
            else {
                return;
            };
            self.validators[top].proposer_priority = self.validators[top]
                .proposer_priority
                .saturating_sub(self.total_power as i64);
            self.proposer = Some(self.validators[top].address);
        }
    }

    /// Clone the set and advance its priority, leaving the receiver intact.
    pub fn copy_increment_proposer_priority(&self, times: u32) -> Self {
        let mut next = self.clone();
        next.increment_proposer_priority(times);
        next
    }

    // -- Membership changes --

    /// Apply a batch of power changes. Power 0 removes the validator (an
    /// error if it is not present); otherwise the validator is added or its
    /// power replaced. The set must remain non-empty.
    pub fn update_with_change_set(&mut self, changes: &[(Pubkey, u64)]) -> Result<()> {
        for (address, power) in changes {
            if *power == 0 {
                if !self.index.contains_key(address) {
                    return Err(EngineError::InvalidValidatorUpdate(format!(
                        "cannot remove validator {address}: not in the set"
                    )));
                }
                self.validators.retain(|v| v.address != *address);
            } else if let Some(&i) = self.index.get(address) {
                self.validators[i].power = *power;
            } else {
                self.validators.push(Validator {
                    address: *address,
                    power: *power,
                    proposer_priority: 0,
                });
            }
            // Keep the index fresh for subsequent changes in this batch.
            self.index = self
                .validators
                .iter()
                .enumerate()
                .map(|(i, v)| (v.address, i))
                .collect();
        }

        if self.validators.is_empty() {
            return Err(EngineError::EmptyValidatorSet);
        }

        canonical_sort(&mut self.validators);
        self.rebuild();

        // Re-elect the proposer if it was removed.
        if self
            .proposer
            .map(|addr| !self.index.contains_key(&addr))
            .unwrap_or(true)
        {
            self.proposer = self
                .validators
                .iter()
                .max_by(|a, b| {
                    a.proposer_priority
                        .cmp(&b.proposer_priority)
                        .then_with(|| b.address.cmp(&a.address))
                })
                .map(|v| v.address);
        }
        Ok(())
    }

    // -- Commit verification --

    /// Verify that a commit carries valid signatures worth strictly more
    /// than `trust_num/trust_denom` of this set's power.
    ///
    /// This is the defence against malformed aggregation: every signature
    /// that claims to be part of the commit must actually verify.
    pub fn verify_commit_light_trusting(
        &self,
        chain_id: &str,
        commit: &Commit,
        trust_num: u64,
        trust_denom: u64,
    ) -> Result<()> {
        let mut tallied: u64 = 0;
        for (idx, sig) in commit.signatures.iter().enumerate() {
            if sig.block_id_flag != BlockIdFlag::Commit {
                continue;
            }
            // Validators that left the set since the commit are skipped.
            let Some((_, validator)) = self.get_by_address(&sig.validator_address) else {
                continue;
            };
            let signature = sig.signature.as_ref().ok_or_else(|| {
                EngineError::CommitVerification(format!(
                    "commit signature {idx} is flagged Commit but carries no signature"
                ))
            })?;
            let sign_bytes = commit.vote_sign_bytes(chain_id, idx);
            if !signature.verify(sig.validator_address.as_ref(), &sign_bytes) {
                return Err(EngineError::CommitVerification(format!(
                    "invalid signature from validator {}",
                    sig.validator_address
                )));
            }
            tallied = tallied.saturating_add(validator.power);
            if (tallied as u128) * (trust_denom as u128)
                > (self.total_power as u128) * (trust_num as u128)
            {
                return Ok(());
            }
        }
        Err(EngineError::CommitVerification(format!(
            "trusted power {tallied} is not more than {trust_num}/{trust_denom} of {}",
            self.total_power
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_addresses(n: usize) -> Vec<Pubkey> {
        (0..n).map(|_| Pubkey::new_unique()).collect()
    }

    #[test]
    fn test_new_sorted_by_power_desc() {
        let addrs = make_addresses(3);
        let vs = ValidatorSet::new(vec![(addrs[0], 100), (addrs[1], 300), (addrs[2], 200)]);
        assert_eq!(vs.len(), 3);
        assert_eq!(vs.get(0).unwrap().power, 300);
        assert_eq!(vs.get(1).unwrap().power, 200);
        assert_eq!(vs.get(2).unwrap().power, 100);
        assert_eq!(vs.total_power(), 600);
    }

    #[test]
    fn test_zero_power_filtered() {
        let addrs = make_addresses(2);
        let vs = ValidatorSet::new(vec![(addrs[0], 0), (addrs[1], 100)]);
        assert_eq!(vs.len(), 1);
        assert!(!vs.contains(&addrs[0]));
    }

    #[test]
    fn test_quorum_strictly_greater_than_two_thirds() {
        let addrs = make_addresses(3);
        let vs = ValidatorSet::new(vec![(addrs[0], 100), (addrs[1], 100), (addrs[2], 100)]);
        // 200 is exactly 2/3 of 300 — not a quorum.
        assert!(!vs.has_quorum(200));
        assert!(vs.has_quorum(201));
        assert_eq!(vs.quorum_power(), 201);
    }

    #[test]
    fn test_proposer_rotates_over_equal_powers() {
        let addrs = make_addresses(4);
        let mut vs = ValidatorSet::new(addrs.iter().map(|a| (*a, 100)).collect());
        let mut seen = Vec::new();
        for _ in 0..4 {
            vs.increment_proposer_priority(1);
            seen.push(vs.proposer().unwrap().address);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4, "every validator should get a turn");
    }

    #[test]
    fn test_proposer_frequency_tracks_power() {
        let addrs = make_addresses(2);
        let mut vs = ValidatorSet::new(vec![(addrs[0], 300), (addrs[1], 100)]);
        let heavy = vs.get(0).unwrap().address;
        let mut heavy_count = 0;
        for _ in 0..400 {
            vs.increment_proposer_priority(1);
            if vs.proposer().unwrap().address == heavy {
                heavy_count += 1;
            }
        }
        // 3/4 of the rounds, exactly, under the accumulate-subtract rule.
        assert_eq!(heavy_count, 300);
    }

    #[test]
    fn test_copy_increment_leaves_original() {
        let addrs = make_addresses(3);
        let vs = ValidatorSet::new(addrs.iter().map(|a| (*a, 10)).collect());
        let advanced = vs.copy_increment_proposer_priority(1);
        assert_ne!(vs, advanced);
        assert_eq!(vs.get(0).unwrap().proposer_priority, 0);
    }

    #[test]
    fn test_update_with_change_set_add_replace_remove() {
        let addrs = make_addresses(3);
        let mut vs = ValidatorSet::new(vec![(addrs[0], 100), (addrs[1], 200)]);

        vs.update_with_change_set(&[(addrs[2], 300), (addrs[0], 150), (addrs[1], 0)])
            .unwrap();

        assert_eq!(vs.len(), 2);
        assert!(!vs.contains(&addrs[1]));
        assert_eq!(vs.power_of(&addrs[0]), 150);
        assert_eq!(vs.power_of(&addrs[2]), 300);
        assert_eq!(vs.total_power(), 450);
    }

    #[test]
    fn test_remove_unknown_validator_rejected() {
        let addrs = make_addresses(2);
        let mut vs = ValidatorSet::new(vec![(addrs[0], 100)]);
        let err = vs.update_with_change_set(&[(addrs[1], 0)]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidValidatorUpdate(_)));
    }

    #[test]
    fn test_emptying_the_set_rejected() {
        let addrs = make_addresses(1);
        let mut vs = ValidatorSet::new(vec![(addrs[0], 100)]);
        let err = vs.update_with_change_set(&[(addrs[0], 0)]).unwrap_err();
        assert!(matches!(err, EngineError::EmptyValidatorSet));
    }

    #[test]
    fn test_hash_changes_with_membership() {
        let addrs = make_addresses(2);
        let vs1 = ValidatorSet::new(vec![(addrs[0], 100)]);
        let vs2 = ValidatorSet::new(vec![(addrs[0], 100), (addrs[1], 100)]);
        assert_ne!(vs1.hash(), vs2.hash());
    }

    #[test]
    fn test_hash_independent_of_input_order() {
        let addrs = make_addresses(3);
        let vs1 = ValidatorSet::new(vec![(addrs[0], 1), (addrs[1], 2), (addrs[2], 3)]);
        let vs2 = ValidatorSet::new(vec![(addrs[2], 3), (addrs[0], 1), (addrs[1], 2)]);
        assert_eq!(vs1.hash(), vs2.hash());
    }
}
