//! A single card's four cryptographic views and the lazy, monotonic
//! transitions between them (spec.md §3/§4.2).

use num_bigint::BigUint;

use crate::cipher::{self, Key};
use crate::error::{PokerError, Result};

/// The plaintext identity of a card: an opaque byte string whose
/// big-endian integer interpretation must be smaller than the shared
/// modulus.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CardFace(pub Vec<u8>);

impl CardFace {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    fn from_biguint(v: &BigUint) -> Self {
        CardFace(v.to_bytes_be())
    }
}

impl From<&str> for CardFace {
    fn from(s: &str) -> Self {
        CardFace(s.as_bytes().to_vec())
    }
}

impl From<String> for CardFace {
    fn from(s: String) -> Self {
        CardFace(s.into_bytes())
    }
}

/// One card's cryptographic state: up to four cached views plus the
/// key(s) needed to move between them. There is exactly one concrete
/// implementation (spec.md §9: "closed variants" — no interface needed
/// at this layer, only at the Deck boundary).
#[derive(Clone, Debug)]
pub struct Card {
    face: Option<CardFace>,
    mine: Option<BigUint>,
    theirs: Option<BigUint>,
    both: Option<BigUint>,
    my_key: Key,
    their_key: Option<Key>,
}

impl Card {
    /// Constructs a card originated locally with a known face. `mine` is
    /// not computed eagerly; it is derived and memoized the first time
    /// `mine()` (or `get_all_mine` on the holder) is called.
    pub fn new_card(face: CardFace, my_key: Key) -> Self {
        Card {
            face: Some(face),
            mine: None,
            theirs: None,
            both: None,
            my_key,
            their_key: None,
        }
    }

    /// Constructs a card from an opponent-encrypted ciphertext. The face
    /// is unknown until the opponent's key is learned (audit time).
    pub fn card_from_theirs(theirs: BigUint, my_key: Key) -> Self {
        Card {
            face: None,
            mine: None,
            theirs: Some(theirs),
            both: None,
            my_key,
            their_key: None,
        }
    }

    /// Constructs a card that has already been jointly encrypted.
    pub fn card_from_both(both: BigUint, my_key: Key) -> Self {
        Card {
            face: None,
            mine: None,
            theirs: None,
            both: Some(both),
            my_key,
            their_key: None,
        }
    }

    pub fn face(&mut self) -> Result<CardFace> {
        if let Some(face) = &self.face {
            return Ok(face.clone());
        }
        let mine = self
            .mine
            .as_ref()
            .ok_or(PokerError::NeedsCounterparty)?
            .clone();
        let face = CardFace::from_biguint(&cipher::decrypt(&mine, &self.my_key));
        self.face = Some(face.clone());
        Ok(face)
    }

    pub fn mine(&mut self) -> Result<BigUint> {
        if let Some(mine) = &self.mine {
            return Ok(mine.clone());
        }
        let face = self.face.as_ref().ok_or(PokerError::NeedsCounterparty)?;
        let mine = cipher::encrypt(&face.to_biguint(), &self.my_key)?;
        self.mine = Some(mine.clone());
        Ok(mine)
    }

    pub fn theirs(&mut self) -> Result<BigUint> {
        if let Some(theirs) = &self.theirs {
            return Ok(theirs.clone());
        }
        let both = self.both.as_ref().ok_or(PokerError::NeedsCounterparty)?;
        let theirs = cipher::decrypt(both, &self.my_key);
        self.theirs = Some(theirs.clone());
        Ok(theirs)
    }

    pub fn both(&mut self) -> Result<BigUint> {
        if let Some(both) = &self.both {
            return Ok(both.clone());
        }
        let theirs = self.theirs.as_ref().ok_or(PokerError::NeedsCounterparty)?;
        let both = cipher::encrypt(theirs, &self.my_key)?;
        self.both = Some(both.clone());
        Ok(both)
    }

    /// Stores the opponent-removable ciphertext for this card. A second
    /// call with a different value fails — `mine` is cached monotonically
    /// and never silently replaced (spec.md §9's resolution of the
    /// source's ambiguity; see DESIGN.md).
    pub fn set_mine(&mut self, value: BigUint) -> Result<()> {
        match &self.mine {
            Some(existing) if *existing != value => {
                Err(PokerError::MonotonicityViolation("mine"))
            }
            _ => {
                self.mine = Some(value);
                Ok(())
            }
        }
    }

    pub fn set_their_key(&mut self, key: Key) {
        self.their_key = Some(key);
    }

    pub fn has_their_key(&self) -> bool {
        self.their_key.is_some()
    }

    /// True iff the face is already known, derivable from `mine` alone,
    /// or derivable via the opponent's key from `theirs`/`both` (the
    /// audit-time path).
    pub fn can_decrypt(&self) -> bool {
        self.face.is_some()
            || self.mine.is_some()
            || (self.their_key.is_some() && (self.theirs.is_some() || self.both.is_some()))
    }

    pub fn has_encrypted(&self) -> bool {
        self.theirs.is_some() || self.both.is_some()
    }

    /// Recomputes every derivable field from `both` using both keys and
    /// checks it against whatever is already cached. Any mismatch is a
    /// cheating signal.
    pub fn validate(&self) -> Result<()> {
        let both = self.both.as_ref().ok_or(PokerError::MissingField("both"))?;
        let their_key = self
            .their_key
            .as_ref()
            .ok_or(PokerError::MissingField("their_key"))?;

        let theirs_prime = cipher::decrypt(both, &self.my_key);
        let mine_prime = cipher::decrypt(both, their_key);
        let face_prime = CardFace::from_biguint(&cipher::decrypt(&mine_prime, &self.my_key));

        if let Some(stored) = &self.theirs {
            if *stored != theirs_prime {
                return Err(PokerError::IntegrityViolation {
                    index: 0,
                    reason: "theirs does not match recomputation from both".into(),
                });
            }
        }
        if let Some(stored) = &self.mine {
            if *stored != mine_prime {
                return Err(PokerError::IntegrityViolation {
                    index: 0,
                    reason: "mine does not match recomputation from both".into(),
                });
            }
        }
        if let Some(stored) = &self.face {
            if *stored != face_prime {
                return Err(PokerError::IntegrityViolation {
                    index: 0,
                    reason: "face does not match recomputation from both".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{generate_key_from_prime, primes_for_tests};

    fn keys() -> (Key, Key) {
        let p = primes_for_tests(48);
        (
            generate_key_from_prime(&p).unwrap(),
            generate_key_from_prime(&p).unwrap(),
        )
    }

    #[test]
    fn new_card_round_trips_face_and_mine() {
        let (k1, _) = keys();
        let mut card = Card::new_card(CardFace::from("ACE"), k1);
        assert_eq!(card.face().unwrap(), CardFace::from("ACE"));
        let mine = card.mine().unwrap();
        // second call returns the memoized value
        assert_eq!(card.mine().unwrap(), mine);
        // face is still available unchanged (P2)
        assert_eq!(card.face().unwrap(), CardFace::from("ACE"));
    }

    #[test]
    fn card_from_theirs_needs_counterparty_for_face() {
        let (k1, _) = keys();
        let mut card = Card::card_from_theirs(BigUint::from(42u32), k1);
        assert!(matches!(card.face(), Err(PokerError::NeedsCounterparty)));
        assert!(card.theirs().is_ok());
    }

    #[test]
    fn set_mine_rejects_conflicting_overwrite() {
        let (k1, _) = keys();
        let mut card = Card::card_from_theirs(BigUint::from(42u32), k1);
        card.set_mine(BigUint::from(7u32)).unwrap();
        // identical value is fine (idempotent)
        card.set_mine(BigUint::from(7u32)).unwrap();
        let err = card.set_mine(BigUint::from(8u32)).unwrap_err();
        assert!(matches!(err, PokerError::MonotonicityViolation("mine")));
    }

    #[test]
    fn can_decrypt_reflects_available_paths() {
        let (k1, k2) = keys();
        let mut card = Card::card_from_both(BigUint::from(99u32), k1);
        assert!(!card.can_decrypt());
        card.set_their_key(k2);
        assert!(card.can_decrypt());
    }

    #[test]
    fn validate_detects_tampering() {
        let (k1, k2) = keys();
        let mut origin = Card::new_card(CardFace::from("QUEEN"), k1.clone());
        let mine = origin.mine().unwrap();
        let both = cipher::encrypt(&mine, &k2).unwrap();

        let mut audited = Card::card_from_both(both, k1);
        audited.set_their_key(k2);
        assert!(audited.validate().is_ok());

        // A tampered `theirs` should be caught.
        audited.theirs = Some(BigUint::from(1234567u64));
        assert!(matches!(
            audited.validate(),
            Err(PokerError::IntegrityViolation { .. })
        ));
    }
}
