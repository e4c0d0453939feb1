use super::errors::*;
use super::models::Password;
use std::time::{Instant, Duration};

use pbkdf2::pbkdf2_hmac;
use sha2::{Sha256, Sha512, Digest};
use subtle::ConstantTimeEq;

#[derive(Clone, Copy)]
pub struct HashedPassword {
    hash: [u8; 24],
    salt: [u8; 16],
    initial_rounds: i16,
    extra_rounds: i16,
}

impl From<Password> for HashedPassword {
    fn from(db_password: Password) -> Self {
        let mut hash = [0_u8; 24];
        let mut salt = [0_u8; 16];
        hash[..].clone_from_slice(&db_password.password_hash[..]);
        salt[..].clone_from_slice(&db_password.salt[..]);
        HashedPassword {
            hash,
            salt,
            initial_rounds: db_password.initial_rounds,
            extra_rounds: db_password.extra_rounds,
        }
    }
}

impl HashedPassword {
    pub fn into_db(self, user_id: i32) -> Password {
        Password {
            id: user_id,
            password_hash: (&self.hash[..]).into(),
            salt: (&self.salt[..]).into(),
            initial_rounds: self.initial_rounds,
            extra_rounds: self.extra_rounds,
        }
    }
}

// Round counts are exponents; each round doubles the PBKDF2 iteration count.
fn iterations(rounds: i16) -> u32 {
    1_u32 << (rounds.max(1).min(30) as u32)
}

fn derive_password_hash(plaintext_pw: &str,
                        salt: [u8; 16],
                        initial_rounds: i16,
                        pepper: &[u8])
                        -> HashedPassword {
    let mut hasher = Sha512::new();
    hasher.update(plaintext_pw.as_bytes());
    hasher.update(pepper);
    let peppered_pw = hasher.finalize();

    let mut output_hash = [0_u8; 24];
    pbkdf2_hmac::<Sha256>(&peppered_pw, &salt, iterations(initial_rounds), &mut output_hash);
    HashedPassword {
        hash: output_hash,
        salt,
        initial_rounds,
        extra_rounds: 0,
    }
}

pub fn set_password(plaintext_pw: &str,
                    pepper: &[u8],
                    stretch_time: Duration)
                    -> Result<HashedPassword> {
    use rand::RngCore;
    use rand::rngs::OsRng;

    if plaintext_pw.len() < 8 {
        return Err(ErrorKind::PasswordTooShort.into());
    };
    if plaintext_pw.len() > 1024 {
        return Err(ErrorKind::PasswordTooLong.into());
    };

    let mut salt = [0_u8; 16];
    OsRng.fill_bytes(&mut salt);

    let mut rounds = 10;
    let start_time = Instant::now();
    let mut hashed_pw = derive_password_hash(plaintext_pw, salt, rounds, pepper);
    let mut elapsed = Instant::now().duration_since(start_time);

    while elapsed < stretch_time {
        debug!("Derivation took only {:?}; doubling the work factor.", elapsed);
        rounds += 1;
        let start_time = Instant::now();
        hashed_pw = derive_password_hash(plaintext_pw, salt, rounds, pepper);
        elapsed = Instant::now().duration_since(start_time);
    }

    Ok(hashed_pw)
}

/// Re-derives the hash towards a higher strength goal without the plaintext.
/// Each extra round feeds the previous hash back through the KDF, so
/// stretching is path-independent.
pub fn stretch_password(strength_goal: i16, hashed_pw: HashedPassword) -> HashedPassword {
    let mut output_hash = hashed_pw.hash;
    let mut extra_rounds = hashed_pw.extra_rounds;

    while hashed_pw.initial_rounds + extra_rounds < strength_goal {
        let input = output_hash;
        pbkdf2_hmac::<Sha256>(&input,
                              &hashed_pw.salt,
                              iterations(hashed_pw.initial_rounds + extra_rounds),
                              &mut output_hash);
        extra_rounds += 1;
    }
    HashedPassword {
        hash: output_hash,
        salt: hashed_pw.salt,
        initial_rounds: hashed_pw.initial_rounds,
        extra_rounds,
    }
}

pub fn check_password(plaintext_pw: &str, pw_from_db: HashedPassword, pepper: &[u8]) -> Result<()> {
    let init_hash = derive_password_hash(plaintext_pw,
                                         pw_from_db.salt,
                                         pw_from_db.initial_rounds,
                                         pepper);
    let stretched_pw = stretch_password(pw_from_db.initial_rounds + pw_from_db.extra_rounds,
                                        init_hash);

    if stretched_pw.hash.ct_eq(&pw_from_db.hash).into() {
        Ok(())
    } else {
        Err(ErrorKind::PasswordDoesntMatch.into())
    }
}


#[test]
fn test_set_then_check_password() {
    let pepper = [7_u8; 32];
    let pw = set_password("durango apatite", &pepper, Duration::from_millis(0)).unwrap();
    assert!(check_password("durango apatite", pw, &pepper).is_ok());
    assert!(check_password("durango zircon", pw, &pepper).is_err());
}

#[test]
fn test_password_length_limits() {
    let pepper = [7_u8; 32];
    assert!(set_password("1234567", &pepper, Duration::from_millis(0)).is_err());
    let too_long = "x".repeat(1025);
    assert!(set_password(&too_long, &pepper, Duration::from_millis(0)).is_err());
}

#[test]
fn test_stretching_is_path_independent() {
    let pepper = [7_u8; 32];
    let init_pw = set_password("fish canyon tuff", &pepper, Duration::from_millis(0)).unwrap();

    let one_hop = stretch_password(12, init_pw);
    let two_hops = stretch_password(12, stretch_password(11, init_pw));

    assert_eq!(one_hop.hash, two_hops.hash);
    assert_eq!(one_hop.extra_rounds, two_hops.extra_rounds);
}

#[test]
fn test_stretching_to_current_strength_is_a_noop() {
    let pepper = [7_u8; 32];
    let init_pw = set_password("fish canyon tuff", &pepper, Duration::from_millis(0)).unwrap();
    let unchanged = stretch_password(10, init_pw);

    assert_eq!(init_pw.hash, unchanged.hash);
    assert_eq!(0, unchanged.extra_rounds);
}

#[test]
fn test_stretched_password_still_checks() {
    let pepper = [7_u8; 32];
    let init_pw = set_password("mount dromedary", &pepper, Duration::from_millis(0)).unwrap();
    let stretched = stretch_password(12, init_pw);

    assert!(check_password("mount dromedary", stretched, &pepper).is_ok());
    assert!(check_password("mount dromedary!", stretched, &pepper).is_err());
}
