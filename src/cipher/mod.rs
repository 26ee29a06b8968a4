//! Commutative (Shamir three-pass) cipher over a shared prime modulus.
//!
//! Two independently generated keys over the same prime commute:
//! `encrypt(encrypt(m, k1), k2) == encrypt(encrypt(m, k2), k1)`. Neither
//! peer ever needs to learn the other's key for either of them to remove
//! their own layer of encryption later.

mod primes;

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;

use crate::error::{PokerError, Result};

/// Bit width mandated by the spec for the shared modulus.
pub const PRIME_BITS: u64 = 1024;

/// A commutative-cipher keypair over a shared modulus `p`.
///
/// `e` and `d` are private to whichever peer generated them; `p` is public
/// (it is sent in plaintext as part of `START_DECK`). `d` is the sensitive
/// half — anyone holding it can remove this peer's layer of encryption.
/// `num_bigint::BigUint` stores its limbs in a heap `Vec` with no hook for
/// `zeroize::Zeroize`, so unlike the byte-array secrets this crate's stack
/// model usually deals with, `d` is not scrubbed on drop; see DESIGN.md.
#[derive(Clone)]
pub struct Key {
    e: BigUint,
    d: BigUint,
    p: BigUint,
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("e", &"<redacted>")
            .field("d", &"<redacted>")
            .field("p", &self.p)
            .finish()
    }
}

impl Key {
    pub fn modulus(&self) -> &BigUint {
        &self.p
    }
}

/// Generates a cryptographically selected 1024-bit safe prime, as required
/// by the modulus contract in spec.md §4.1.
pub fn random_prime_1024() -> Result<BigUint> {
    random_prime(PRIME_BITS)
}

/// Generates a cryptographically selected safe prime of `bits` width.
/// `random_prime_1024` pins this to the spec's literal width; callers that
/// need a configurable modulus (tests, [`crate::config::DeckConfig`]) use
/// this directly.
pub fn random_prime(bits: u64) -> Result<BigUint> {
    if bits < 8 {
        return Err(PokerError::InvalidPrime);
    }
    Ok(primes::generate_safe_prime(bits))
}

/// Derives a fresh `Key` over the given shared prime: samples `e` coprime
/// to `p - 1` and computes `d = e^-1 mod (p - 1)`.
pub fn generate_key_from_prime(p: &BigUint) -> Result<Key> {
    if *p < BigUint::from(5u32) {
        return Err(PokerError::InvalidPrime);
    }
    let phi = p - BigUint::one();
    let mut rng = OsRng;

    const MAX_ATTEMPTS: u32 = 10_000;
    for _ in 0..MAX_ATTEMPTS {
        let e = rng.gen_biguint_range(&BigUint::from(3u32), &phi);
        if let Some(d) = modular_inverse(&e, &phi) {
            return Ok(Key {
                e,
                d,
                p: p.clone(),
            });
        }
    }
    Err(PokerError::KeyGenerationFailed)
}

/// `encrypt(m, k) = m^e mod p`.
pub fn encrypt(m: &BigUint, key: &Key) -> Result<BigUint> {
    if *m >= key.p {
        return Err(PokerError::InvalidArgument(
            "face value is not smaller than the shared modulus".into(),
        ));
    }
    Ok(m.modpow(&key.e, &key.p))
}

/// `decrypt(c, k) = c^d mod p`.
pub fn decrypt(c: &BigUint, key: &Key) -> BigUint {
    c.modpow(&key.d, &key.p)
}

/// Computes `a^-1 mod m` via the extended Euclidean algorithm, or `None`
/// if `a` and `m` are not coprime.
fn modular_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a_signed = BigInt::from_biguint(Sign::Plus, a.clone());
    let m_signed = BigInt::from_biguint(Sign::Plus, m.clone());
    let egcd = a_signed.extended_gcd(&m_signed);
    if egcd.gcd != BigInt::one() {
        return None;
    }
    let m_signed_i = m_signed;
    let mut x = egcd.x % &m_signed_i;
    if x.sign() == Sign::Minus {
        x += &m_signed_i;
    }
    x.to_biguint()
}

/// Test-only helper: generates a small safe prime so cipher-dependent
/// tests elsewhere in the crate don't pay for a 1024-bit modulus.
#[cfg(test)]
pub fn primes_for_tests(bits: u64) -> BigUint {
    primes::generate_safe_prime(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_prime() -> BigUint {
        primes::generate_safe_prime(48)
    }

    #[test]
    fn modular_inverse_round_trips() {
        let m = BigUint::from(101u32);
        let a = BigUint::from(37u32);
        let inv = modular_inverse(&a, &m).unwrap();
        assert_eq!((&a * &inv) % &m, BigUint::one());
    }

    #[test]
    fn encrypt_then_decrypt_recovers_plaintext() {
        let p = small_prime();
        let key = generate_key_from_prime(&p).unwrap();
        let msg = BigUint::from(12345u64) % &p;
        let c = encrypt(&msg, &key).unwrap();
        let back = decrypt(&c, &key);
        assert_eq!(back, msg);
    }

    #[test]
    fn commutes_across_two_independent_keys() {
        let p = small_prime();
        let k1 = generate_key_from_prime(&p).unwrap();
        let k2 = generate_key_from_prime(&p).unwrap();
        let msg = BigUint::from(777u64) % &p;

        let order_a = encrypt(&encrypt(&msg, &k1).unwrap(), &k2).unwrap();
        let order_b = encrypt(&encrypt(&msg, &k2).unwrap(), &k1).unwrap();
        assert_eq!(order_a, order_b, "encryption must commute across keys");

        // P1: full three-pass round trip recovers the original message.
        let once_removed = decrypt(&order_a, &k1);
        let fully_removed = decrypt(&once_removed, &k2);
        assert_eq!(fully_removed, msg);
    }

    #[test]
    fn rejects_face_not_smaller_than_modulus() {
        let p = small_prime();
        let key = generate_key_from_prime(&p).unwrap();
        let err = encrypt(&p, &key).unwrap_err();
        assert!(matches!(err, PokerError::InvalidArgument(_)));
    }
}
