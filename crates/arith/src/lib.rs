//! Modular arithmetic over `u32` for the RSA chat.
//!
//! Everything here stays inside 32 bits: `mul_mod` never forms the full
//! product, so a modulus up to `2^31 - 1` is safe on any target without
//! widening to `u64`.

/// Compute `(a * b) % m` by binary long multiplication.
///
/// Walks the bits of `b`, doubling a running residue of `a` and folding it
/// into the result whenever the bit is set, reducing mod `m` at every step.
/// No intermediate value exceeds `2 * (m - 1)`, hence the `m < 2^31` bound.
///
/// # Panics
///
/// Panics if `m == 0` or `m >= 2^31`. Both are caller bugs, not runtime
/// conditions.
pub fn mul_mod(a: u32, b: u32, m: u32) -> u32 {
    assert!(m > 0, "mul_mod: modulus must be nonzero");
    assert!(m < 1 << 31, "mul_mod: modulus must be below 2^31");

    let mut result = 0u32;
    let mut dbl = a % m;
    let mut b = b;
    while b > 0 {
        if b & 1 == 1 {
            result = (result + dbl) % m;
        }
        dbl = (dbl << 1) % m;
        b >>= 1;
    }
    result
}

/// Compute `a^b % m` by square-and-multiply on top of [`mul_mod`].
///
/// Example: `pow_mod(2, 5, 13) == 6`.
///
/// # Panics
///
/// Panics if `m == 0` or `m >= 2^31`.
pub fn pow_mod(a: u32, b: u32, m: u32) -> u32 {
    assert!(m > 0, "pow_mod: modulus must be nonzero");
    assert!(m < 1 << 31, "pow_mod: modulus must be below 2^31");

    let mut result = 1 % m;
    let mut sqr = a % m; // a^(2^i) at iteration i
    let mut b = b;
    while b > 0 {
        if b & 1 == 1 {
            result = mul_mod(result, sqr, m);
        }
        sqr = mul_mod(sqr, sqr, m);
        b >>= 1;
    }
    result
}

/// Greatest common divisor by repeated remainder.
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b > 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_mod_matches_wide_reference() {
        let moduli = [2u32, 13, 255, 65_537, 1_000_003, (1 << 31) - 1];
        let values = [0u32, 1, 2, 254, 32_749, 65_521, 123_456_789, u32::MAX >> 1];
        for &m in &moduli {
            for &a in &values {
                for &b in &values {
                    let expected = ((u64::from(a) * u64::from(b)) % u64::from(m)) as u32;
                    assert_eq!(mul_mod(a, b, m), expected, "a={a} b={b} m={m}");
                }
            }
        }
    }

    #[test]
    fn pow_mod_fixed_vector() {
        assert_eq!(pow_mod(2, 5, 13), 6);
    }

    #[test]
    fn pow_mod_matches_reference() {
        fn reference(a: u32, mut b: u32, m: u32) -> u32 {
            let mut result = 1u64 % u64::from(m);
            let mut base = u64::from(a) % u64::from(m);
            while b > 0 {
                if b & 1 == 1 {
                    result = result * base % u64::from(m);
                }
                base = base * base % u64::from(m);
                b >>= 1;
            }
            result as u32
        }
        let cases = [
            (2u32, 5u32, 13u32),
            (0, 0, 7),
            (10, 0, 7),
            (0, 10, 7),
            (7, 560, 561),
            (65_521, 32_749, 1_000_003),
            (3, u32::MAX, (1 << 31) - 1),
        ];
        for (a, b, m) in cases {
            assert_eq!(pow_mod(a, b, m), reference(a, b, m), "a={a} b={b} m={m}");
        }
    }

    #[test]
    fn pow_mod_modulus_one_is_zero() {
        assert_eq!(pow_mod(5, 3, 1), 0);
        assert_eq!(mul_mod(5, 3, 1), 0);
    }

    #[test]
    #[should_panic(expected = "modulus must be nonzero")]
    fn mul_mod_rejects_zero_modulus() {
        mul_mod(1, 2, 0);
    }

    #[test]
    #[should_panic(expected = "modulus must be nonzero")]
    fn pow_mod_rejects_zero_modulus() {
        pow_mod(1, 2, 0);
    }

    #[test]
    #[should_panic(expected = "below 2^31")]
    fn mul_mod_rejects_wide_modulus() {
        mul_mod(1, 2, 1 << 31);
    }

    #[test]
    fn gcd_basics() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(17, 5), 1);
        assert_eq!(gcd(0, 9), 9);
        assert_eq!(gcd(9, 0), 9);
        assert_eq!(gcd(65_521, 32_749), 1);
    }
}
