use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::rngs::OsRng;
use rand::RngCore;

/// Number of Miller-Rabin rounds. 40 rounds gives a false-positive
/// probability below 2^-80, comfortably past what a 1024-bit modulus needs.
const MILLER_RABIN_ROUNDS: u32 = 40;

/// Generates a safe prime `p` (i.e. `p` and `(p-1)/2` are both prime) of
/// exactly `bits` bits. Pinned to 1024 by the public API; parameterized
/// here so tests can use a much smaller width and stay fast.
pub fn generate_safe_prime(bits: u64) -> BigUint {
    let mut rng = OsRng;
    loop {
        let mut candidate = rng.gen_biguint(bits);
        // Force the top bit (exact width) and the low bit (odd).
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if !is_probably_prime(&candidate, &mut rng) {
            continue;
        }
        let sophie_germain = (&candidate - BigUint::one()) >> 1;
        if is_probably_prime(&sophie_germain, &mut rng) {
            return candidate;
        }
    }
}

/// Miller-Rabin primality test.
pub fn is_probably_prime(n: &BigUint, rng: &mut impl RngCore) -> bool {
    let zero = BigUint::zero();
    let one = BigUint::one();
    let two = &one + &one;

    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if n.is_even() {
        return false;
    }

    for small in SMALL_PRIMES {
        let small = BigUint::from(*small as u32);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    // write n - 1 = 2^s * d with d odd
    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut s: u64 = 0;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rand_range(rng, &two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..s.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn rand_range(rng: &mut impl RngCore, low: &BigUint, high: &BigUint) -> BigUint {
    let span = high - low;
    let bits = span.bits().max(1);
    low + rng.gen_biguint(bits) % (&span + BigUint::one())
}

const SMALL_PRIMES: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
];
