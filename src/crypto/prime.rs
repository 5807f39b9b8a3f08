//! Probabilistic primality testing and prime generation.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

use crate::core::KeyExchangeError;

const SMALL_PRIMES: [u32; 24] = [
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

/// Miller-Rabin test with `rounds` random witnesses.
///
/// A composite passes with probability at most `4^-rounds`.
pub fn is_probable_prime<R: Rng + ?Sized>(n: &BigUint, rounds: u32, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if (n % 2u32).is_zero() {
        return false;
    }
    for p in SMALL_PRIMES {
        let p = BigUint::from(p);
        if *n == p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let one = BigUint::one();
    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Random probable prime of exactly `bits` bits.
///
/// Fails with [`KeyExchangeError::PrimeGenerationFailed`] after `attempts`
/// candidates.
pub fn generate_prime<R: Rng + ?Sized>(
    bits: u64,
    rounds: u32,
    attempts: u32,
    rng: &mut R,
) -> Result<BigUint, KeyExchangeError> {
    if bits < 3 {
        return Err(KeyExchangeError::InvalidParameters(format!(
            "cannot generate a {bits}-bit prime"
        )));
    }
    for _ in 0..attempts {
        let mut candidate = rng.gen_biguint(bits);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, rounds, rng) {
            return Ok(candidate);
        }
    }
    Err(KeyExchangeError::PrimeGenerationFailed { bits, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_small_numbers() {
        let primes = [2u32, 3, 5, 97, 101, 7919, 104_729];
        let composites = [0u32, 1, 4, 9, 91, 561, 7917, 104_730];
        for p in primes {
            assert!(is_probable_prime(&BigUint::from(p), 16, &mut OsRng), "{p}");
        }
        for c in composites {
            assert!(!is_probable_prime(&BigUint::from(c), 16, &mut OsRng), "{c}");
        }
    }

    #[test]
    fn test_carmichael_numbers_rejected() {
        for c in [1105u32, 1729, 2465, 2821, 6601, 8911, 41041, 825_265] {
            assert!(!is_probable_prime(&BigUint::from(c), 16, &mut OsRng), "{c}");
        }
    }

    #[test]
    fn test_mersenne_prime() {
        let m127 = (BigUint::one() << 127u32) - BigUint::one();
        assert!(is_probable_prime(&m127, 16, &mut OsRng));
        let m128 = (BigUint::one() << 128u32) - BigUint::one();
        assert!(!is_probable_prime(&m128, 16, &mut OsRng));
    }

    #[test]
    fn test_generate_prime() {
        let p = generate_prime(128, 16, 10_000, &mut OsRng).unwrap();
        assert_eq!(p.bits(), 128);
        assert!(is_probable_prime(&p, 32, &mut OsRng));
    }

    #[test]
    fn test_generate_prime_bounded_attempts() {
        let err = generate_prime(512, 16, 0, &mut OsRng).unwrap_err();
        assert_eq!(err, KeyExchangeError::PrimeGenerationFailed { bits: 512, attempts: 0 });
    }
}
