//! Elliptic-curve cryptography over prime fields.
//!
//! The curve arithmetic uses complete projective formulas
//! (Renes/Costello/Batina 2015, <https://eprint.iacr.org/2015/1060>,
//! algorithms 1 and 3) on Montgomery-form field elements, so point
//! addition and doubling share one code path for all inputs.


pub mod curves;


use std::ops::{Add, Mul, Sub};

use crypto_bigint::modular::{BoxedMontyForm, BoxedMontyParams};
use crypto_bigint::{BoxedUint, Integer, NonZero};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, CtOption};
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::{boxed_uint_from_be_slice, Error};


/// A point in affine coordinates.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, ZeroizeOnDrop)]
pub struct AffinePoint {
    x: BoxedUint,
    y: BoxedUint,
}
impl AffinePoint {
    pub const fn new(x: BoxedUint, y: BoxedUint) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> &BoxedUint { &self.x }
    pub fn y(&self) -> &BoxedUint { &self.y }

    /// Serializes to the uncompressed form `04 ‖ X ‖ Y` with both
    /// coordinates padded to `bytes_per_component`.
    pub fn to_be_bytes(&self, bytes_per_component: usize) -> Zeroizing<Vec<u8>> {
        let mut ret = Zeroizing::new(Vec::with_capacity(1 + 2*bytes_per_component));
        ret.push(0x04); // uncompressed coordinates

        for component in [&self.x, &self.y] {
            let bytes = Zeroizing::new(component.to_be_bytes());
            let significant = &bytes[bytes.len().saturating_sub(bytes_per_component)..];
            // strip or add leading zeros to the component length
            let leading_zeros = bytes.len() - significant.len();
            assert!(bytes[..leading_zeros].iter().all(|&b| b == 0x00));
            for _ in 0..(bytes_per_component - significant.len()) {
                ret.push(0x00);
            }
            ret.extend(significant);
        }

        ret
    }

    /// Parses the uncompressed form. The coordinate length is inferred by
    /// splitting the remainder in the middle.
    pub fn try_from_be_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }
        if bytes[0] != 0x04 {
            // only the uncompressed representation is supported
            return None;
        }
        if (bytes.len() - 1) % 2 != 0 {
            return None;
        }
        let coordinate_length = (bytes.len() - 1) / 2;

        let x = boxed_uint_from_be_slice(&bytes[1..1+coordinate_length]);
        let y = boxed_uint_from_be_slice(&bytes[1+coordinate_length..]);
        Some(Self { x, y })
    }
}


/// A point in projective coordinates in Montgomery form.
#[derive(Clone, Debug)]
struct ProjectivePoint {
    x: BoxedMontyForm,
    y: BoxedMontyForm,
    z: BoxedMontyForm,
}

/// Field context for one curve: the Montgomery parameters of the prime
/// and the curve coefficients lifted into Montgomery form.
struct FieldContext {
    prime: BoxedUint,
    params: BoxedMontyParams,
    a: BoxedMontyForm,
    b: BoxedMontyForm,
    b3: BoxedMontyForm,
}
impl FieldContext {
    /// Lifts a field element into Montgomery form, reducing wire-decoded
    /// values that are out of range or carry excess precision.
    fn lift(&self, value: &BoxedUint) -> BoxedMontyForm {
        let precision = value.bits_precision().max(self.prime.bits_precision());
        let reduced = value.widen(precision)
            .rem(&NonZero::new(self.prime.widen(precision)).unwrap())
            .shorten(self.prime.bits_precision());
        BoxedMontyForm::new(reduced, self.params.clone())
    }

    fn from_affine(&self, point: &AffinePoint) -> ProjectivePoint {
        ProjectivePoint {
            x: self.lift(point.x()),
            y: self.lift(point.y()),
            z: BoxedMontyForm::one(self.params.clone()),
        }
    }

    fn infinity(&self) -> ProjectivePoint {
        ProjectivePoint {
            x: BoxedMontyForm::zero(self.params.clone()),
            y: BoxedMontyForm::one(self.params.clone()),
            z: BoxedMontyForm::zero(self.params.clone()),
        }
    }

    fn to_affine(&self, point: &ProjectivePoint) -> CtOption<AffinePoint> {
        let inverse_option = point.z.invert();
        let inverse = inverse_option.clone().into_option().unwrap_or_else(|| point.z.clone());
        let x = (&point.x).mul(&inverse);
        let y = (&point.y).mul(&inverse);
        CtOption::new(
            AffinePoint::new(x.retrieve(), y.retrieve()),
            inverse_option.is_some(),
        )
    }

    fn is_on_curve(&self, point: &ProjectivePoint) -> Choice {
        let inverse_option = point.z.invert();
        let inverse = inverse_option.clone().into_option().unwrap_or_else(|| point.z.clone());
        let x = (&point.x).mul(&inverse);
        let y = (&point.y).mul(&inverse);

        let y_squared = (&y).mul(&y);
        let x_cubed = (&x).mul(&x).mul(&x);
        let ax = (&x).mul(&self.a);
        let rhs = (&x_cubed).add(&ax).add(&self.b);
        let are_equal = y_squared.retrieve().ct_eq(&rhs.retrieve());
        Choice::conditional_select(&Choice::from(0), &are_equal, inverse_option.is_some())
    }

    /// Complete point addition, algorithm 1 of Renes/Costello/Batina.
    fn add(&self, lhs: &ProjectivePoint, rhs: &ProjectivePoint) -> ProjectivePoint {
        let t0 = (&lhs.x).mul(&rhs.x);
        let t1 = (&lhs.y).mul(&rhs.y);
        let t2 = (&lhs.z).mul(&rhs.z);

        let t3 = (&lhs.x).add(&lhs.y).mul(&(&rhs.x).add(&rhs.y));
        let t3 = (&t3).sub(&(&t0).add(&t1));

        let t4 = (&lhs.x).add(&lhs.z).mul(&(&rhs.x).add(&rhs.z));
        let t4 = (&t4).sub(&(&t0).add(&t2));

        let t5 = (&lhs.y).add(&lhs.z).mul(&(&rhs.y).add(&rhs.z));
        let t5 = (&t5).sub(&(&t1).add(&t2));

        let z3 = (&self.a).mul(&t4);
        let x3 = (&self.b3).mul(&t2);
        let z3 = (&x3).add(&z3);
        let x3 = (&t1).sub(&z3);
        let z3 = (&t1).add(&z3);
        let y3 = (&x3).mul(&z3);

        let t1 = (&t0).add(&t0).add(&t0);
        let t2 = (&self.a).mul(&t2);
        let t4 = (&self.b3).mul(&t4);
        let t1 = (&t1).add(&t2);
        let t2 = (&t0).sub(&t2);
        let t2 = (&self.a).mul(&t2);
        let t4 = (&t4).add(&t2);

        let t0 = (&t1).mul(&t4);
        let y3 = (&y3).add(&t0);
        let t0 = (&t5).mul(&t4);
        let x3 = (&t3).mul(&x3).sub(&t0);
        let t0 = (&t3).mul(&t1);
        let z3 = (&t5).mul(&z3).add(&t0);

        ProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// Complete point doubling, algorithm 3 of Renes/Costello/Batina.
    fn double(&self, point: &ProjectivePoint) -> ProjectivePoint {
        let t0 = (&point.x).mul(&point.x);
        let t1 = (&point.y).mul(&point.y);
        let t2 = (&point.z).mul(&point.z);
        let t3 = (&point.x).mul(&point.y);
        let t3 = (&t3).add(&t3);

        let z3 = (&point.x).mul(&point.z);
        let z3 = (&z3).add(&z3);
        let x3 = (&self.a).mul(&z3);
        let y3 = (&self.b3).mul(&t2).add(&x3);
        let x3 = (&t1).sub(&y3);
        let y3 = (&t1).add(&y3);
        let y3 = (&x3).mul(&y3);
        let x3 = (&t3).mul(&x3);

        let z3 = (&self.b3).mul(&z3);
        let t2 = (&self.a).mul(&t2);
        let t3 = (&t0).sub(&t2);
        let t3 = (&self.a).mul(&t3).add(&z3);

        let z3 = (&t0).add(&t0);
        let t0 = (&z3).add(&t0).add(&t2);
        let t0 = (&t0).mul(&t3);
        let y3 = (&y3).add(&t0);

        let t2 = (&point.y).mul(&point.z);
        let t2 = (&t2).add(&t2);
        let t0 = (&t2).mul(&t3);
        let x3 = (&x3).sub(&t0);

        let z3 = (&t2).mul(&t1);
        let z3 = (&z3).add(&z3);
        let z3 = (&z3).add(&z3);

        ProjectivePoint { x: x3, y: y3, z: z3 }
    }

    /// Double-and-add scalar multiplication; the iteration count depends
    /// only on the scalar width.
    fn multiply(&self, scalar: &BoxedUint, point: &ProjectivePoint) -> ProjectivePoint {
        let mut result = self.infinity();
        let mut doubled = point.clone();
        for i in 0..scalar.bits_precision() {
            let sum = self.add(&result, &doubled);
            result = if bool::from(scalar.bit(i)) { sum } else { result };
            doubled = self.double(&doubled);
        }
        result
    }
}


/// An elliptic curve `y² ≡ x³ + ax + b` over a prime field.
#[derive(Clone, Debug, ZeroizeOnDrop)]
pub struct PrimeWeierstrassCurve {
    /// The prime (modulus) of the underlying field.
    prime: BoxedUint,

    /// Coefficient `a` in the curve equation.
    coefficient_a: BoxedUint,

    /// Coefficient `b` in the curve equation.
    coefficient_b: BoxedUint,

    /// The generator (base point) of the group.
    generator: AffinePoint,

    /// The order of the group generated by the base point.
    order: BoxedUint,

    /// The cofactor of the curve.
    cofactor: u8,
}
impl PrimeWeierstrassCurve {
    /// Panics if the prime is even or the generator does not satisfy the
    /// curve equation; curve definitions are compile-time constants and a
    /// mistyped one must not survive startup.
    pub fn new(
        prime: BoxedUint,
        coefficient_a: BoxedUint,
        coefficient_b: BoxedUint,
        generator: AffinePoint,
        order: BoxedUint,
        cofactor: u8,
    ) -> Self {
        if !bool::from(prime.is_odd()) {
            panic!("prime is not odd");
        }
        let curve = Self {
            prime,
            coefficient_a,
            coefficient_b,
            generator,
            order,
            cofactor,
        };
        if !bool::from(curve.is_on_curve(&curve.generator)) {
            panic!("generator is not on curve");
        }
        curve
    }

    /// Non-panicking variant of [`Self::new`] for explicit domain
    /// parameters decoded from the chip.
    pub fn try_new(
        prime: BoxedUint,
        coefficient_a: BoxedUint,
        coefficient_b: BoxedUint,
        generator: AffinePoint,
        order: BoxedUint,
        cofactor: u8,
    ) -> Option<Self> {
        if !bool::from(prime.is_odd()) || !bool::from(order.is_odd()) {
            return None;
        }
        let curve = Self {
            prime,
            coefficient_a,
            coefficient_b,
            generator,
            order,
            cofactor,
        };
        if !bool::from(curve.is_on_curve(&curve.generator)) {
            return None;
        }
        Some(curve)
    }

    pub fn prime(&self) -> &BoxedUint { &self.prime }
    pub fn coefficient_a(&self) -> &BoxedUint { &self.coefficient_a }
    pub fn coefficient_b(&self) -> &BoxedUint { &self.coefficient_b }
    pub fn generator(&self) -> &AffinePoint { &self.generator }
    pub fn order(&self) -> &BoxedUint { &self.order }
    pub fn cofactor(&self) -> u8 { self.cofactor }

    /// The byte length of a serialized field element, and thereby of a
    /// private key.
    pub fn field_element_len_bytes(&self) -> usize {
        (self.prime.bits() as usize + 7) / 8
    }

    fn field(&self) -> FieldContext {
        let params = BoxedMontyParams::new(self.prime.to_odd().unwrap());
        let a = BoxedMontyForm::new(self.coefficient_a.clone(), params.clone());
        let b = BoxedMontyForm::new(self.coefficient_b.clone(), params.clone());
        let b3 = (&b).add(&b).add(&b);
        FieldContext { prime: self.prime.clone(), params, a, b, b3 }
    }

    pub fn is_on_curve(&self, point: &AffinePoint) -> Choice {
        let field = self.field();
        let projective = field.from_affine(point);
        field.is_on_curve(&projective)
    }

    fn lift_scalar(&self, scalar: &BoxedUint) -> BoxedUint {
        scalar.widen(scalar.bits_precision().max(self.prime.bits_precision()))
    }

    /// Calculates the public key `private · G`.
    pub fn calculate_public_key(&self, private_key: &BoxedUint) -> AffinePoint {
        let field = self.field();
        let generator = field.from_affine(&self.generator);
        let product = field.multiply(&self.lift_scalar(private_key), &generator);
        field.to_affine(&product)
            .into_option()
            .expect("scalar multiple of the generator has no affine form")
    }

    /// Derives the shared point `private · other_public`.
    ///
    /// The other party's point is checked against the curve equation
    /// before use.
    pub fn diffie_hellman_point(&self, private_key: &BoxedUint, other_public_key: &AffinePoint) -> Result<AffinePoint, Error> {
        let field = self.field();
        let other = field.from_affine(other_public_key);
        if !bool::from(field.is_on_curve(&other)) {
            return Err(Error::PointNotOnCurve);
        }
        let product = field.multiply(&self.lift_scalar(private_key), &other);
        field.to_affine(&product)
            .into_option()
            .ok_or(Error::DegenerateSharedSecret)
    }

    /// Key agreement returning the shared point; callers take the x
    /// coordinate as the shared secret.
    pub fn diffie_hellman(&self, private_key: &BoxedUint, other_public_key: &AffinePoint) -> Result<AffinePoint, Error> {
        self.diffie_hellman_point(private_key, other_public_key)
    }

    /// Derives the session curve for generic mapping: the generator is
    /// replaced by `G' = nonce · G + shared_secret`, order and cofactor
    /// are kept.
    pub fn derive_generic_mapping_session_curve(&self, nonce: &BoxedUint, shared_secret: &AffinePoint) -> Self {
        let field = self.field();
        let generator = field.from_affine(&self.generator);
        let shared = field.from_affine(shared_secret);

        let product = field.multiply(&self.lift_scalar(nonce), &generator);
        let sum = field.add(&product, &shared);
        let new_generator = field.to_affine(&sum)
            .into_option()
            .expect("mapped generator has no affine form");

        Self {
            prime: self.prime.clone(),
            coefficient_a: self.coefficient_a.clone(),
            coefficient_b: self.coefficient_b.clone(),
            generator: new_generator,
            order: self.order.clone(),
            cofactor: self.cofactor,
        }
    }

    /// Verifies an ECDSA signature `(r, s)` over a message digest under
    /// the given public key.
    pub fn verify_ecdsa(&self, public_key: &AffinePoint, digest: &[u8], r: &BoxedUint, s: &BoxedUint) -> Result<(), Error> {
        let order_bits = self.order.bits();
        let order_precision = self.order.bits_precision();
        let order_params = BoxedMontyParams::new(self.order.to_odd().unwrap());

        let reduce_mod_order = |value: &BoxedUint| -> BoxedUint {
            let precision = value.bits_precision().max(order_precision);
            value.widen(precision)
                .rem(&NonZero::new(self.order.widen(precision)).unwrap())
                .shorten(order_precision)
        };

        // both signature components must lie in [1, n-1]
        let r = r.widen(r.bits_precision().max(order_precision));
        let s = s.widen(s.bits_precision().max(order_precision));
        let order_wide_r = self.order.widen(r.bits_precision());
        let order_wide_s = self.order.widen(s.bits_precision());
        if bool::from(r.is_zero()) || bool::from(s.is_zero()) || r >= order_wide_r || s >= order_wide_s {
            return Err(Error::InvalidSignature);
        }
        let r = r.shorten(order_precision);
        let s = s.shorten(order_precision);

        // e is the leftmost order_bits bits of the digest
        let mut digest = digest;
        if digest.len() * 8 > order_bits as usize {
            digest = &digest[..(order_bits as usize) / 8];
        }
        let e = reduce_mod_order(&boxed_uint_from_be_slice(digest));

        // w = s^-1 mod n, u1 = e·w mod n, u2 = r·w mod n
        let w = BoxedMontyForm::new(s.clone(), order_params.clone())
            .invert()
            .into_option()
            .ok_or(Error::InvalidSignature)?;
        let u1 = (&w).mul(&BoxedMontyForm::new(e, order_params.clone())).retrieve();
        let u2 = (&w).mul(&BoxedMontyForm::new(r.clone(), order_params.clone())).retrieve();

        let field = self.field();
        let public = field.from_affine(public_key);
        if !bool::from(field.is_on_curve(&public)) {
            return Err(Error::PointNotOnCurve);
        }
        let generator = field.from_affine(&self.generator);

        // R = u1·G + u2·Q; the signature is valid iff R.x ≡ r (mod n)
        let combined = field.add(
            &field.multiply(&self.lift_scalar(&u1), &generator),
            &field.multiply(&self.lift_scalar(&u2), &public),
        );
        let combined_affine = field.to_affine(&combined)
            .into_option()
            .ok_or(Error::InvalidSignature)?;

        let v = reduce_mod_order(combined_affine.x());
        if bool::from(v.ct_eq(&r)) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::curves::{brainpool_p256r1, nist_p256};
    use hex_literal::hex;

    #[test]
    fn icao_doc9303_part11_appendix_g1_mapping_and_agreement() {
        // elliptic-curve Diffie-Hellman on brainpoolP256r1
        let curve = brainpool_p256r1();

        let nonce = boxed_uint_from_be_slice(&hex!("
            3F00C4D3 9D153F2B 2A214A07 8D899B22
        "));

        let terminal_private = boxed_uint_from_be_slice(&hex!("
            7F4EF07B 9EA82FD7 8AD689B3 8D0BC78C
            F21F249D 953BC46F 4C6E1925 9C010F99
        "));
        let chip_private = boxed_uint_from_be_slice(&hex!("
            498FF497 56F2DC15 87840041 839A8598
            2BE7761D 14715FB0 91EFA7BC E9058560
        "));

        let terminal_public = curve.calculate_public_key(&terminal_private);
        let chip_public = curve.calculate_public_key(&chip_private);
        assert_eq!(
            terminal_public.to_be_bytes(32).as_slice(),
            &hex!("
                04
                7ACF3EFC 982EC455 65A4B155 129EFBC7 4650DCBF A6362D89 6FC70262 E0C2CC5E
                544552DC B6725218 799115B5 5C9BAA6D 9F6BC3A9 618E70C2 5AF71777 A9C4922D
            "),
        );
        assert_eq!(
            chip_public.to_be_bytes(32).as_slice(),
            &hex!("
                04
                824FBA91 C9CBE26B EF53A0EB E7342A3B F178CEA9 F45DE0B7 0AA60165 1FBA3F57
                30D8C879 AAA9C9F7 3991E61B 58F4D52E B87A0A0C 709A49DC 63719363 CCD13C54
            "),
        );

        let terminal_secret = curve.diffie_hellman(&terminal_private, &chip_public).unwrap();
        let chip_secret = curve.diffie_hellman(&chip_private, &terminal_public).unwrap();
        assert_eq!(terminal_secret, chip_secret);
        assert_eq!(
            terminal_secret.x().to_be_bytes().as_ref(),
            &hex!("60332EF2 450B5D24 7EF6D386 8397D398 852ED6E8 CAF6FFEE F6BF85CA 57057FD5"),
        );

        // map the session generator: G' = nonce·G + shared
        let session_curve = curve.derive_generic_mapping_session_curve(&nonce, &terminal_secret);
        assert_eq!(
            session_curve.generator().to_be_bytes(32).as_slice(),
            &hex!("
                04
                8CED63C9 1426D4F0 EB1435E7 CB1D74A4 6723A0AF 21C89634 F65A9AE8 7A9265E2
                8C879506 743F8611 AC33645C 5B985C80 B5F09A0B 83407C1B 6A4D857A E76FE522
            "),
        );

        let session_terminal_private = boxed_uint_from_be_slice(&hex!("
            A73FB703 AC1436A1 8E0CFA5A BB3F7BEC
            7A070E7A 6788486B EE230C4A 22762595
        "));
        let session_chip_private = boxed_uint_from_be_slice(&hex!("
            107CF586 96EF6155 053340FD 633392BA
            81909DF7 B9706F22 6F32086C 7AFF974A
        "));

        let session_terminal_public = session_curve.calculate_public_key(&session_terminal_private);
        let session_chip_public = session_curve.calculate_public_key(&session_chip_private);
        assert_eq!(
            session_terminal_public.to_be_bytes(32).as_slice(),
            &hex!("
                04
                2DB7A64C 0355044E C9DF1905 14C625CB A2CEA487 54887122 F3A5EF0D 5EDD301C
                3556F3B3 B186DF10 B857B58F 6A7EB80F 20BA5DC7 BE1D43D9 BF850149 FBB36462
            "),
        );
        assert_eq!(
            session_chip_public.to_be_bytes(32).as_slice(),
            &hex!("
                04
                9E880F84 2905B8B3 181F7AF7 CAA9F0EF B743847F 44A306D2 D28C1D9E C65DF6DB
                7764B222 77A2EDDC 3C265A9F 018F9CB8 52E111B7 68B32690 4B59A019 3776F094
            "),
        );

        let session_secret = session_curve.diffie_hellman(&session_terminal_private, &session_chip_public).unwrap();
        let session_secret_chip = session_curve.diffie_hellman(&session_chip_private, &session_terminal_public).unwrap();
        assert_eq!(session_secret.x(), session_secret_chip.x());
        assert_eq!(
            session_secret.x().to_be_bytes().as_ref(),
            &hex!("28768D20 701247DA E81804C9 E780EDE5 82A9996D B4A31502 0B273319 7DB84925"),
        );
    }

    #[test]
    fn reject_point_off_curve() {
        let curve = brainpool_p256r1();
        let off_curve = AffinePoint::new(
            boxed_uint_from_be_slice(&[0x02]),
            boxed_uint_from_be_slice(&[0x03]),
        );
        let private = boxed_uint_from_be_slice(&[0x42]);
        assert_eq!(
            curve.diffie_hellman(&private, &off_curve).unwrap_err(),
            Error::PointNotOnCurve,
        );
    }

    #[test]
    fn uncompressed_point_round_trip() {
        let curve = brainpool_p256r1();
        let public = curve.calculate_public_key(&boxed_uint_from_be_slice(&hex!("0123456789ABCDEF")));
        let serialized = public.to_be_bytes(32);
        assert_eq!(serialized.len(), 65);
        assert_eq!(serialized[0], 0x04);
        let parsed = AffinePoint::try_from_be_bytes(&serialized).unwrap();
        assert!(bool::from(parsed.x().ct_eq(&public.x().widen(parsed.x().bits_precision()))));
        assert!(AffinePoint::try_from_be_bytes(&serialized[1..]).is_none());
    }

    #[test]
    fn ecdsa_rfc6979_p256_sample() {
        // RFC 6979 appendix A.2.5, message "sample" with SHA-256
        let curve = nist_p256();
        let public_key = AffinePoint::new(
            boxed_uint_from_be_slice(&hex!("
                60FED4BA 255A9D31 C961EB74 C6356D68 C049B892 3B61FA6C E669622E 60F29FB6
            ")),
            boxed_uint_from_be_slice(&hex!("
                7903FE10 08B8BC99 A41AE9E9 5628BC64 F2F1B20C 2D7E9F51 77A3C294 D4462299
            ")),
        );
        let digest = crate::crypt::hash::HashAlgorithm::Sha256.digest(b"sample");
        let r = boxed_uint_from_be_slice(&hex!("
            EFD48B2A ACB6A8FD 1140DD9C D45E81D6 9D2C877B 56AAF991 C34D0EA8 4EAF3716
        "));
        let s = boxed_uint_from_be_slice(&hex!("
            F7CB1C94 2D657C41 D436C7A1 B6E29F65 F3E900DB B9AFF406 4DC4AB2F 843ACDA8
        "));
        curve.verify_ecdsa(&public_key, &digest, &r, &s).expect("valid signature rejected");

        // flipping a digest bit must invalidate the signature
        let mut bad_digest = digest.clone();
        bad_digest[0] ^= 0x01;
        assert!(curve.verify_ecdsa(&public_key, &bad_digest, &r, &s).is_err());
    }
}
