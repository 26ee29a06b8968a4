//! The shuffled collection of cards and the batch operations the protocol
//! layer invokes on it (spec.md §3/§4.3).

use num_bigint::BigUint;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::card::{Card, CardFace};
use crate::cipher::Key;
use crate::error::{PokerError, Result};

/// An ordered, fixed-length collection of [`Card`]s that has been shuffled
/// exactly once, plus the owner's key.
pub struct CardHolder {
    cards: Vec<Card>,
    key: Key,
}

impl CardHolder {
    /// Builds a holder from locally-known faces, shuffling them into a
    /// uniformly random order. The returned order is never observed by
    /// the opponent except through the card indices agreed at handshake
    /// time (spec.md §4.3 "Ordering").
    pub fn new_holder(key: Key, faces: Vec<CardFace>) -> Result<Self> {
        if faces.is_empty() {
            return Err(PokerError::EmptyInput);
        }
        let mut cards: Vec<Card> = faces
            .into_iter()
            .map(|face| Card::new_card(face, key.clone()))
            .collect();
        cards.shuffle(&mut thread_rng());
        Ok(CardHolder { cards, key })
    }

    /// Builds a holder from ciphertexts encrypted by the opponent,
    /// independently shuffled from whatever order the opponent used.
    pub fn holder_from_encrypted(key: Key, their_ciphertexts: Vec<BigUint>) -> Result<Self> {
        if their_ciphertexts.is_empty() {
            return Err(PokerError::EmptyInput);
        }
        let mut cards: Vec<Card> = their_ciphertexts
            .into_iter()
            .map(|theirs| Card::card_from_theirs(theirs, key.clone()))
            .collect();
        cards.shuffle(&mut thread_rng());
        Ok(CardHolder { cards, key })
    }

    pub fn size(&self) -> u64 {
        self.cards.len() as u64
    }

    fn index(&self, index: u64) -> Result<usize> {
        let size = self.size();
        if index >= size {
            return Err(PokerError::OutOfBounds { index, size });
        }
        Ok(index as usize)
    }

    pub fn get(&mut self, index: u64) -> Result<CardFace> {
        let i = self.index(index)?;
        if !self.cards[i].can_decrypt() {
            return Err(PokerError::NotDecryptable);
        }
        self.cards[i].face()
    }

    pub fn can_get(&self, index: u64) -> Result<bool> {
        let i = self.index(index)?;
        Ok(self.cards[i].can_decrypt())
    }

    pub fn can_get_theirs(&self, index: u64) -> Result<bool> {
        let i = self.index(index)?;
        Ok(self.cards[i].has_encrypted())
    }

    pub fn get_theirs(&mut self, index: u64) -> Result<BigUint> {
        if !self.can_get_theirs(index)? {
            return Err(PokerError::NotAvailable);
        }
        let i = self.index(index)?;
        self.cards[i].theirs()
    }

    pub fn set_mine(&mut self, index: u64, value: BigUint) -> Result<()> {
        let i = self.index(index)?;
        self.cards[i].set_mine(value)
    }

    /// Applies the opponent's key to every card, enabling the audit path
    /// (`can_decrypt`/`validate`) after the game has ended.
    pub fn set_their_key(&mut self, key: Key) {
        for card in &mut self.cards {
            card.set_their_key(key.clone());
        }
    }

    /// Rebuilds every card from a freshly jointly-encrypted value,
    /// discarding prior `face`/`mine`/`theirs`. The only non-monotonic
    /// mutation of card state; invoked exactly once, by the initiating
    /// peer, on receipt of `END_DECK`.
    pub fn set_both_encrypted(&mut self, encrypted_faces: Vec<BigUint>) -> Result<()> {
        if encrypted_faces.is_empty() {
            return Err(PokerError::EmptyInput);
        }
        if encrypted_faces.len() != self.cards.len() {
            return Err(PokerError::LengthMismatch {
                expected: self.cards.len(),
                actual: encrypted_faces.len(),
            });
        }
        self.cards = encrypted_faces
            .into_iter()
            .map(|both| Card::card_from_both(both, self.key.clone()))
            .collect();
        Ok(())
    }

    /// Returns whatever `mine` values are currently derivable, in stored
    /// (post-shuffle) order, plus whether every card had one.
    pub fn get_all_mine(&mut self) -> Result<(Vec<Option<BigUint>>, bool)> {
        let mut values = Vec::with_capacity(self.cards.len());
        let mut all_present = true;
        for card in &mut self.cards {
            if card.can_decrypt() {
                values.push(Some(card.mine()?));
            } else {
                values.push(None);
                all_present = false;
            }
        }
        Ok((values, all_present))
    }

    /// Returns whatever `both` values are currently derivable, in stored
    /// order, plus whether every card had one.
    pub fn get_all_both(&mut self) -> Result<(Vec<Option<BigUint>>, bool)> {
        let mut values = Vec::with_capacity(self.cards.len());
        let mut all_present = true;
        for card in &mut self.cards {
            if card.has_encrypted() {
                values.push(Some(card.both()?));
            } else {
                values.push(None);
                all_present = false;
            }
        }
        Ok((values, all_present))
    }

    /// Validates every card, returning the index of the first failure.
    pub fn validate_all(&self) -> Result<()> {
        for (i, card) in self.cards.iter().enumerate() {
            card.validate().map_err(|err| match err {
                PokerError::IntegrityViolation { reason, .. } => {
                    PokerError::IntegrityViolation { index: i, reason }
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{generate_key_from_prime, primes_for_tests};

    fn key() -> Key {
        let p = primes_for_tests(48);
        generate_key_from_prime(&p).unwrap()
    }

    fn faces(n: usize) -> Vec<CardFace> {
        (0..n).map(|i| CardFace::from(format!("CARD{i}"))).collect()
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            CardHolder::new_holder(key(), vec![]),
            Err(PokerError::EmptyInput)
        ));
    }

    #[test]
    fn size_is_stable_across_operations() {
        let mut holder = CardHolder::new_holder(key(), faces(8)).unwrap();
        assert_eq!(holder.size(), 8);
        let _ = holder.get_all_mine().unwrap();
        assert_eq!(holder.size(), 8);
    }

    #[test]
    fn out_of_bounds_get_is_reported() {
        let mut holder = CardHolder::new_holder(key(), faces(4)).unwrap();
        assert!(matches!(
            holder.get(10_000),
            Err(PokerError::OutOfBounds { index: 10_000, size: 4 })
        ));
    }

    #[test]
    fn shuffle_reorders_with_overwhelming_probability() {
        let original = faces(16);
        let mut holder = CardHolder::new_holder(key(), original.clone()).unwrap();
        let (mine, all_present) = holder.get_all_mine().unwrap();
        assert!(all_present);
        // Decrypt each slot back to a face and compare order against input.
        let mut recovered = Vec::with_capacity(mine.len());
        for (i, _) in mine.iter().enumerate() {
            recovered.push(holder.get(i as u64).unwrap());
        }
        assert_ne!(recovered, original, "16-card shuffle landed on the identity permutation");
    }

    #[test]
    fn set_both_encrypted_requires_matching_length() {
        let mut holder = CardHolder::new_holder(key(), faces(4)).unwrap();
        let err = holder.set_both_encrypted(vec![BigUint::from(1u32)]).unwrap_err();
        assert!(matches!(err, PokerError::LengthMismatch { expected: 4, actual: 1 }));
    }

    #[test]
    fn validate_all_reports_first_failing_index() {
        let k1 = key();
        let k2 = key();
        let mut origin = CardHolder::new_holder(k1.clone(), faces(3)).unwrap();
        let (mine, _) = origin.get_all_mine().unwrap();
        let both: Vec<BigUint> = mine
            .into_iter()
            .map(|m| crate::cipher::encrypt(&m.unwrap(), &k2).unwrap())
            .collect();

        let mut audit = CardHolder::new_holder(k1.clone(), faces(3)).unwrap();
        audit.set_both_encrypted(both).unwrap();
        audit.set_their_key(k2.clone());
        assert!(audit.validate_all().is_ok());

        // A peer who lied about `mine` at index 1 is caught, and the
        // reported index matches where the lie was planted.
        audit.set_mine(1, BigUint::from(999_999u64)).unwrap();
        match audit.validate_all() {
            Err(PokerError::IntegrityViolation { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected IntegrityViolation at index 1, got {other:?}"),
        }
    }
}
