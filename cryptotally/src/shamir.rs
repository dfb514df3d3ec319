use crate::*;
use rand::rngs::OsRng;
use rand::Rng;

/// A voter's secret polynomial over GF(p).
///
/// The constant term is the vote; the remaining `threshold - 1` coefficients
/// are drawn from the system CSPRNG and never leave this type. Any set of
/// `threshold` evaluations determines the constant term; fewer determine
/// nothing.
pub struct SecretPolynomial {
    field: Field,
    coefficients: Vec<i64>,
}

impl SecretPolynomial {
    pub fn random(field: &Field, secret: i64, threshold: usize) -> SecretPolynomial {
        assert!(threshold >= 1, "a polynomial needs at least one coefficient");

        let mut coefficients = vec![0i64; threshold];
        coefficients[0] = secret;
        for c in coefficients.iter_mut().skip(1) {
            *c = field.sample(&mut OsRng);
        }

        SecretPolynomial {
            field: field.clone(),
            coefficients,
        }
    }

    /// The share destined for committee member `index`: `f(index + 1)`.
    /// Zero is never used as an x-coordinate since `f(0)` is the secret.
    pub fn share(&self, index: usize) -> i64 {
        self.field
            .eval_polynomial(&self.coefficients, index as i64 + 1)
    }

    pub fn shares(&self, n: usize) -> Vec<i64> {
        (0..n).map(|i| self.share(i)).collect()
    }
}

/// A random 62-bit nonce identifying one voter across retries and restarts.
pub fn random_voter_id() -> i64 {
    OsRng.gen_range(0..(1i64 << 62))
}
