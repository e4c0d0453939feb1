
use super::*;
use std::thread;
use std::time::Duration;
use chrono::offset::Utc;
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

pub const TOKEN_BITS: usize = 192;

type HmacSha256 = Hmac<Sha256>;

/// The identity a valid bearer token resolves to.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub sess_id: i32,
    pub user_id: i32,
    pub username: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl UserSession {
    pub fn is_guest(&self) -> bool {
        self.username == user::GUEST_USERNAME
    }
}

/// Tokens as handed to the client. Only digests of these ever hit the DB.
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn fresh_token() -> Result<[u8; TOKEN_BITS / 8]> {
    use rand::RngCore;
    use rand::rngs::OsRng;
    let mut token = [0_u8; TOKEN_BITS / 8];
    OsRng.fill_bytes(&mut token);
    Ok(token)
}

pub fn token_digest(token: &[u8], hmac_key: &[u8]) -> Vec<u8> {
    let mut hmac_maker = HmacSha256::new_from_slice(hmac_key)
        .expect("HMAC accepts keys of any length");
    hmac_maker.update(token);
    hmac_maker.finalize().into_bytes().to_vec()
}

fn wire_token_digest(token_base64url: &str, hmac_key: &[u8]) -> Result<Vec<u8>> {
    let token = BASE64URL_NOPAD
        .decode(token_base64url.trim().as_bytes())
        .map_err(|_| ErrorKind::BadToken)?;
    Ok(token_digest(&token, hmac_key))
}

// Slows down brute forcing of credentials.
pub fn punishment_sleep() {
    use rand::Rng;
    thread::sleep(Duration::from_millis(20 + rand::thread_rng().gen_range(0..5)));
}

pub fn start(conn: &mut PgConnection,
             user: &User,
             hmac_key: &[u8],
             access_ttl: chrono::Duration,
             refresh_ttl: chrono::Duration)
             -> Result<(TokenPair, Session)> {
    use schema::sessions;

    let access = fresh_token()?;
    let refresh = fresh_token()?;
    let now = Utc::now();

    let new_sess = NewSession {
        user_id: user.id,
        access_hash: &token_digest(&access, hmac_key),
        refresh_hash: &token_digest(&refresh, hmac_key),
        access_expires: now + access_ttl,
        refresh_expires: now + refresh_ttl,
        started: now,
        last_seen: now,
    };

    let db_sess: Session = diesel::insert_into(sessions::table)
        .values(&new_sess)
        .get_result(conn)
        .chain_err(|| "Couldn't start a session!")?;

    Ok((TokenPair {
            access: BASE64URL_NOPAD.encode(&access),
            refresh: BASE64URL_NOPAD.encode(&refresh),
        },
        db_sess))
}

/// Rotates the access token against a still-valid refresh token.
/// Returns None when the refresh token is unknown or expired.
pub fn refresh(conn: &mut PgConnection,
               refresh_base64url: &str,
               hmac_key: &[u8],
               access_ttl: chrono::Duration)
               -> Result<Option<String>> {
    use schema::sessions;

    let digest = wire_token_digest(refresh_base64url, hmac_key)?;
    let now = Utc::now();

    let db_sess: Option<Session> = sessions::table
        .filter(sessions::refresh_hash.eq(&digest))
        .filter(sessions::refresh_expires.gt(now))
        .get_result(conn)
        .optional()?;

    let sess = match db_sess {
        Some(sess) => sess,
        None => {
            warn!("Somebody tried to refresh with a bad token! (Either a bug or a hacking attempt.)");
            punishment_sleep();
            return Ok(None);
        }
    };

    let access = fresh_token()?;
    diesel::update(sessions::table.filter(sessions::id.eq(sess.id)))
        .set((sessions::access_hash.eq(token_digest(&access, hmac_key)),
              sessions::access_expires.eq(now + access_ttl),
              sessions::last_seen.eq(now)))
        .execute(conn)?;

    Ok(Some(BASE64URL_NOPAD.encode(&access)))
}

/// Resolves a bearer access token. None means unknown/expired credentials;
/// inactive accounts resolve to None as well.
pub fn check(conn: &mut PgConnection,
             access_base64url: &str,
             hmac_key: &[u8])
             -> Result<Option<UserSession>> {
    use schema::{sessions, users};

    let digest = wire_token_digest(access_base64url, hmac_key)?;
    let now = Utc::now();

    let sess_user: Option<(Session, User)> = sessions::table
        .inner_join(users::table)
        .filter(sessions::access_hash.eq(&digest))
        .filter(sessions::access_expires.gt(now))
        .get_result(conn)
        .optional()?;

    if let Some((sess, user)) = sess_user {
        if !user.is_active {
            return Ok(None);
        }
        diesel::update(sessions::table.filter(sessions::id.eq(sess.id)))
            .set(sessions::last_seen.eq(now))
            .execute(conn)?;
        Ok(Some(UserSession {
            sess_id: sess.id,
            user_id: user.id,
            username: user.username,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
        }))
    } else {
        warn!("Somebody tried to authenticate with a bad access token!");
        punishment_sleep();
        Ok(None)
    }
}

pub fn clean_old_sessions(conn: &mut PgConnection, how_old: chrono::Duration) -> Result<usize> {
    use schema::sessions;

    let deleted_count = diesel::delete(sessions::table
        .filter(sessions::refresh_expires.lt(Utc::now() - how_old)))
        .execute(conn)?;

    Ok(deleted_count)
}


#[test]
fn test_token_digest_is_keyed() {
    let token = [1_u8; TOKEN_BITS / 8];
    let a = token_digest(&token, b"key-one");
    let b = token_digest(&token, b"key-two");
    assert_ne!(a, b);
    assert_eq!(a, token_digest(&token, b"key-one"));
}

#[test]
fn test_wire_token_rejects_garbage() {
    assert!(wire_token_digest("!!!not-base64url!!!", b"key").is_err());
}

#[test]
#[ignore]
fn test_db_token_lifecycle() {
    let mut conn = scratch_conn();
    let (user, _) = scratch_user(&mut conn, "token_user");
    let key = b"0123456789abcdef0123456789abcdef";
    let access_ttl = chrono::Duration::minutes(30);

    let (tokens, _) = start(&mut conn, &user, key, access_ttl,
                            chrono::Duration::days(30)).unwrap();

    let sess = check(&mut conn, &tokens.access, key).unwrap().unwrap();
    assert_eq!(sess.user_id, user.id);
    assert_eq!(sess.username, "token_user");

    let rotated = refresh(&mut conn, &tokens.refresh, key, access_ttl).unwrap().unwrap();
    assert!(check(&mut conn, &tokens.access, key).unwrap().is_none());
    assert!(check(&mut conn, &rotated, key).unwrap().is_some());

    // An access token is not a refresh token.
    assert!(refresh(&mut conn, &tokens.access, key, access_ttl).unwrap().is_none());
}
