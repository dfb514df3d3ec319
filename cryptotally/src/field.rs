use num::bigint::BigInt;
use num::{Integer, ToPrimitive, Zero};
use rand::Rng;

/// Default prime modulus. Fits in a 64-bit signed integer; products of two
/// field elements do not, which is why everything below goes through BigInt.
pub const DEFAULT_PRIME: i64 = 1_104_637_706_180_507;

/// Arithmetic over the prime field GF(p).
///
/// Every operation returns the nonnegative representative in `[0, p)`.
#[derive(Debug, Clone)]
pub struct Field {
    prime: i64,
    modulus: BigInt,
}

impl Default for Field {
    fn default() -> Self {
        Field::new(DEFAULT_PRIME)
    }
}

impl Field {
    pub fn new(prime: i64) -> Field {
        assert!(prime > 1, "field modulus must be a prime greater than 1");
        Field {
            prime,
            modulus: BigInt::from(prime),
        }
    }

    pub fn prime(&self) -> i64 {
        self.prime
    }

    /// Reduce an arbitrary-precision value to its representative in `[0, p)`.
    pub fn reduce(&self, value: &BigInt) -> i64 {
        value
            .mod_floor(&self.modulus)
            .to_i64()
            .expect("cryptotally: reduced field element exceeds i64")
    }

    pub fn add(&self, a: i64, b: i64) -> i64 {
        self.reduce(&(BigInt::from(a) + BigInt::from(b)))
    }

    pub fn sub(&self, a: i64, b: i64) -> i64 {
        self.reduce(&(BigInt::from(a) - BigInt::from(b)))
    }

    pub fn mul(&self, a: i64, b: i64) -> i64 {
        self.reduce(&(BigInt::from(a) * BigInt::from(b)))
    }

    pub fn pow(&self, base: i64, exponent: i64) -> i64 {
        let base = BigInt::from(base).mod_floor(&self.modulus);
        self.reduce(&base.modpow(&BigInt::from(exponent), &self.modulus))
    }

    /// Multiplicative inverse by Fermat's little theorem: `a^(p-2) mod p`.
    /// Requires the modulus to be prime and `a` nonzero in the field.
    pub fn inverse(&self, a: i64) -> i64 {
        self.pow(a, self.prime - 2)
    }

    /// Draw a uniformly random field element.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> i64 {
        rng.gen_range(0..self.prime)
    }

    /// Evaluate `f(x) = c[0] + c[1]x + c[2]x^2 + ... mod p` by Horner's rule.
    pub fn eval_polynomial(&self, coefficients: &[i64], x: i64) -> i64 {
        let x = BigInt::from(x);
        let mut acc = BigInt::zero();
        for c in coefficients.iter().rev() {
            acc = &acc * &x + BigInt::from(*c);
        }
        self.reduce(&acc)
    }

    /// Lagrange interpolation at `x = 0`:
    ///
    /// `f(0) = sum_i y_i * prod_{j != i} x_j * (x_j - x_i)^-1 mod p`
    ///
    /// The x-coordinates must be distinct and nonzero. Both the products and
    /// the division run in modular arithmetic; with `k >= deg(f) + 1` points
    /// the result is exact.
    pub fn interpolate_at_zero(&self, points: &[(i64, i64)]) -> i64 {
        let mut total = BigInt::zero();
        for (i, &(xi, yi)) in points.iter().enumerate() {
            let mut term = BigInt::from(yi);
            for (j, &(xj, _)) in points.iter().enumerate() {
                if i == j {
                    continue;
                }
                let inv = self.inverse(self.sub(xj, xi));
                term = term * BigInt::from(xj) % &self.modulus * BigInt::from(inv) % &self.modulus;
            }
            total += term;
        }
        self.reduce(&total)
    }
}
