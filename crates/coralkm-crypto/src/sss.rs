//! Shamir secret sharing over GF(256)
//!
//! The DEK is split byte-wise: each secret byte gets its own random
//! polynomial of degree `t - 1` over GF(256), and share `i` holds the
//! evaluations at `x = i`. Any `t` distinct shares reconstruct the secret by
//! Lagrange interpolation at zero; fewer than `t` reveal nothing.
//!
//! Shares carry their index and threshold, and serialize with a length
//! prefix so reconstruction works on any `t`-subset without out-of-band
//! metadata.

use coralkm_core::{CoralError, Effects, Result};
use std::ops::{Add, Div, Mul};

/// Element of GF(2^8) with the AES reduction polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gf256(u8);

impl Gf256 {
    const ZERO: Self = Gf256(0);
    const ONE: Self = Gf256(1);

    /// Multiplicative inverse via a^254. Zero has no inverse.
    fn invert(self) -> Self {
        debug_assert!(self.0 != 0, "zero has no inverse in GF(256)");
        let mut acc = self;
        for _ in 0..253 {
            acc = acc * self;
        }
        acc
    }

    /// Horner evaluation of a polynomial given in ascending-degree order.
    fn eval_poly(coeffs: &[Self], x: Self) -> Self {
        let mut acc = Gf256::ZERO;
        for &c in coeffs.iter().rev() {
            acc = acc * x + c;
        }
        acc
    }

    /// Interpolate `f(0)` from `(x, y)` points with distinct non-zero `x`.
    fn lagrange_at_zero(points: &[(Self, Self)]) -> Self {
        let mut acc = Gf256::ZERO;
        for (i, &(xi, yi)) in points.iter().enumerate() {
            let mut num = Gf256::ONE;
            let mut den = Gf256::ONE;
            for (j, &(xj, _)) in points.iter().enumerate() {
                if i != j {
                    num = num * xj;
                    // Subtraction is XOR in GF(2^8)
                    den = den * (xj + xi);
                }
            }
            acc = acc + (num / den) * yi;
        }
        acc
    }
}

impl Add for Gf256 {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn add(self, rhs: Self) -> Self {
        Gf256(self.0 ^ rhs.0)
    }
}

impl Mul for Gf256 {
    type Output = Self;

    fn mul(mut self, mut rhs: Self) -> Self {
        let mut out = 0u8;
        while rhs.0 != 0 {
            if rhs.0 & 1 != 0 {
                out ^= self.0;
            }
            let carry = self.0 & 0x80;
            self.0 <<= 1;
            if carry != 0 {
                // x^8 + x^4 + x^3 + x + 1
                self.0 ^= 0x1B;
            }
            rhs.0 >>= 1;
        }
        Gf256(out)
    }
}

impl Div for Gf256 {
    type Output = Self;

    #[allow(clippy::suspicious_arithmetic_impl)]
    fn div(self, rhs: Self) -> Self {
        self * rhs.invert()
    }
}

/// One share of a split secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretShare {
    /// Evaluation point, non-zero and unique per split
    pub index: u8,
    /// Minimum shares needed to reconstruct
    pub threshold: u8,
    /// One evaluation per secret byte
    pub data: Vec<u8>,
}

impl SecretShare {
    /// Wire form: `index, threshold, u32-be payload length, payload`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.push(self.index);
        out.push(self.threshold);
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse the wire form. Any structural defect is a corrupt share.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(CoralError::SssCorruptShare);
        }
        let index = bytes[0];
        let threshold = bytes[1];
        let len = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        if index == 0 || threshold == 0 || bytes.len() != 6 + len {
            return Err(CoralError::SssCorruptShare);
        }
        Ok(SecretShare {
            index,
            threshold,
            data: bytes[6..].to_vec(),
        })
    }
}

/// Split `secret` into `n` shares with reconstruction threshold `t`.
///
/// Polynomial coefficients come from the injected randomness, so tests can
/// reproduce exact share sets.
pub fn split(secret: &[u8], n: u8, t: u8, effects: &Effects) -> Result<Vec<SecretShare>> {
    if secret.is_empty() {
        return Err(CoralError::invalid_argument("cannot split an empty secret"));
    }
    if t == 0 || t > n {
        return Err(CoralError::invalid_argument(format!(
            "threshold must satisfy 1 <= t <= n, got t={t}, n={n}"
        )));
    }

    let mut shares: Vec<SecretShare> = (1..=n)
        .map(|index| SecretShare {
            index,
            threshold: t,
            data: vec![0u8; secret.len()],
        })
        .collect();

    let mut coeffs = vec![Gf256::ZERO; t as usize];
    for (byte_index, &secret_byte) in secret.iter().enumerate() {
        coeffs[0] = Gf256(secret_byte);
        for c in coeffs.iter_mut().skip(1) {
            let [b] = effects.random_bytes::<1>();
            *c = Gf256(b);
        }
        for share in &mut shares {
            share.data[byte_index] = Gf256::eval_poly(&coeffs, Gf256(share.index)).0;
        }
    }

    // Coefficient zero held secret bytes
    coeffs.fill(Gf256::ZERO);

    Ok(shares)
}

/// Reconstruct the secret from at least `threshold` distinct shares.
///
/// The threshold is read from the share metadata. Duplicate indices or
/// inconsistent threshold/length metadata are reported as corruption, not
/// silently interpolated over.
pub fn combine(shares: &[SecretShare]) -> Result<Vec<u8>> {
    let first = shares.first().ok_or(CoralError::SssInsufficientShares {
        needed: 1,
        got: 0,
    })?;
    let threshold = first.threshold as usize;
    let secret_len = first.data.len();

    let mut seen = [false; 256];
    for share in shares {
        if share.index == 0 || share.data.len() != secret_len {
            return Err(CoralError::SssCorruptShare);
        }
        if share.threshold != first.threshold || seen[share.index as usize] {
            return Err(CoralError::SssCorruptShare);
        }
        seen[share.index as usize] = true;
    }

    if shares.len() < threshold {
        return Err(CoralError::SssInsufficientShares {
            needed: threshold,
            got: shares.len(),
        });
    }

    let mut secret = vec![0u8; secret_len];
    for (byte_index, out) in secret.iter_mut().enumerate() {
        let points: Vec<(Gf256, Gf256)> = shares
            .iter()
            .take(threshold)
            .map(|s| (Gf256(s.index), Gf256(s.data[byte_index])))
            .collect();
        *out = Gf256::lagrange_at_zero(&points).0;
    }

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effects() -> Effects {
        Effects::deterministic(99, 0)
    }

    #[test]
    fn field_inverse_roundtrips() {
        for value in 1..=255u8 {
            let x = Gf256(value);
            assert_eq!(x * x.invert(), Gf256::ONE);
        }
    }

    #[test]
    fn split_rejects_bad_parameters() {
        let fx = effects();
        assert!(split(&[], 3, 2, &fx).is_err());
        assert!(split(b"secret", 3, 0, &fx).is_err());
        assert!(split(b"secret", 2, 3, &fx).is_err());
    }

    #[test]
    fn any_threshold_subset_reconstructs() {
        let fx = effects();
        let secret = [7u8; 32];
        let shares = split(&secret, 5, 3, &fx).unwrap();
        assert_eq!(combine(&shares[0..3]).unwrap(), secret);
        assert_eq!(combine(&[shares[4].clone(), shares[1].clone(), shares[3].clone()]).unwrap(), secret);
        assert_eq!(combine(&shares).unwrap(), secret);
    }

    #[test]
    fn below_threshold_fails() {
        let fx = effects();
        let shares = split(&[1u8; 32], 4, 3, &fx).unwrap();
        assert_eq!(
            combine(&shares[0..2]),
            Err(CoralError::SssInsufficientShares { needed: 3, got: 2 })
        );
        assert_eq!(
            combine(&[]),
            Err(CoralError::SssInsufficientShares { needed: 1, got: 0 })
        );
    }

    #[test]
    fn duplicate_index_is_corrupt() {
        let fx = effects();
        let shares = split(&[1u8; 8], 3, 2, &fx).unwrap();
        let result = combine(&[shares[0].clone(), shares[0].clone()]);
        assert_eq!(result, Err(CoralError::SssCorruptShare));
    }

    #[test]
    fn inconsistent_threshold_is_corrupt() {
        let fx = effects();
        let shares = split(&[1u8; 8], 3, 2, &fx).unwrap();
        let mut tampered = shares[1].clone();
        tampered.threshold = 3;
        assert_eq!(
            combine(&[shares[0].clone(), tampered]),
            Err(CoralError::SssCorruptShare)
        );
    }

    #[test]
    fn wire_roundtrip() {
        let fx = effects();
        let shares = split(&[9u8; 32], 3, 2, &fx).unwrap();
        for share in &shares {
            let decoded = SecretShare::from_bytes(&share.to_bytes()).unwrap();
            assert_eq!(&decoded, share);
        }
    }

    #[test]
    fn truncated_wire_form_is_corrupt() {
        let fx = effects();
        let bytes = split(&[9u8; 32], 3, 2, &fx).unwrap()[0].to_bytes();
        assert_eq!(
            SecretShare::from_bytes(&bytes[..bytes.len() - 1]),
            Err(CoralError::SssCorruptShare)
        );
        assert_eq!(SecretShare::from_bytes(&[]), Err(CoralError::SssCorruptShare));
    }

    #[test]
    fn threshold_one_means_every_share_is_the_secret() {
        let fx = effects();
        let secret = [3u8; 16];
        let shares = split(&secret, 3, 1, &fx).unwrap();
        for share in &shares {
            assert_eq!(combine(std::slice::from_ref(share)).unwrap(), secret);
        }
    }
}
