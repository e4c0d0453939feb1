use super::*;
use std::time::Duration;

/// The shared anonymous account. Counts submitted by it never close samples.
pub const GUEST_USERNAME: &str = "guest";

lazy_static! {
    static ref USERNAME_RE: regex::Regex =
        regex::Regex::new(r"^[0-9A-Za-z_@+.-]{1,150}$").unwrap();
}

pub fn get_user(conn: &mut PgConnection, user_id: i32) -> Result<User> {
    use schema::users::dsl::*;
    use diesel::result::Error::NotFound;

    users
        .filter(id.eq(user_id))
        .first(conn)
        .map_err(|e| match e {
            NotFound => ErrorKind::NotFound.into(),
            e => Error::with_chain(e, "Error when trying to retrieve user!"),
        })
}

pub fn get_user_by_name(conn: &mut PgConnection, name: &str) -> Result<User> {
    use schema::users::dsl::*;
    use diesel::result::Error::NotFound;

    users
        .filter(username.eq(name))
        .first(conn)
        .map_err(|e| match e {
            NotFound => ErrorKind::NoSuchUser(name.into()).into(),
            e => Error::with_chain(e, "Error when trying to retrieve user!"),
        })
}

fn get_user_pass_by_name(conn: &mut PgConnection, name: &str) -> Result<(User, Password)> {
    use schema::users;
    use schema::passwords;
    use diesel::result::Error::NotFound;

    users::table
        .inner_join(passwords::table)
        .filter(users::username.eq(name))
        .first(conn)
        .map_err(|e| match e {
            NotFound => ErrorKind::NoSuchUser(name.into()).into(),
            e => Error::with_chain(e, "Error when trying to retrieve user!"),
        })
}

pub fn auth_user(conn: &mut PgConnection,
                 username: &str,
                 plaintext_pw: &str,
                 pepper: &[u8])
                 -> Result<Option<User>> {
    let (user, hashed_pw_from_db) = match get_user_pass_by_name(conn, username) {
        Err(err) => match *err.kind() {
            ErrorKind::NoSuchUser(_) => {
                session::punishment_sleep();
                return Ok(None);
            }
            _ => Err(err),
        },
        ok => ok,
    }?;

    if !user.is_active {
        warn!("Deactivated user {:?} tried to log in.", username);
        session::punishment_sleep();
        return Ok(None);
    }

    match password::check_password(plaintext_pw, hashed_pw_from_db.into(), pepper) {
        Err(err) => match *err.kind() {
            ErrorKind::PasswordDoesntMatch => {
                session::punishment_sleep();
                return Ok(None);
            }
            _ => Err(err),
        },
        ok => ok,
    }?;

    Ok(Some(user))
}

pub fn add_user(conn: &mut PgConnection,
                username: &str,
                email: Option<&str>,
                plaintext_pw: &str,
                staff: bool,
                superuser: bool,
                pepper: &[u8],
                stretch_time: Duration)
                -> Result<User> {
    use schema::{users, passwords};

    if !USERNAME_RE.is_match(username) {
        return Err(ErrorKind::InvalidInput(
            format!("Username {:?} must be 1-150 characters from [0-9A-Za-z_@+.-].", username),
        ).into());
    }
    if let Some(email) = email {
        if email.len() > 254 {
            return Err(ErrorKind::InvalidInput("Email address too long.".into()).into());
        }
        if !email.contains('@') {
            return Err(ErrorKind::InvalidInput("Email address is missing a @.".into()).into());
        }
    }

    let pw = password::set_password(plaintext_pw, pepper, stretch_time)?;

    let new_user = NewUser {
        username,
        email,
        is_staff: staff,
        is_superuser: superuser,
    };

    let user: User = conn.transaction(|conn| -> Result<User> {
        let user: User = diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(conn)
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::UniqueViolation, _) =>
                        ErrorKind::Conflict("a user with that username already exists").into(),
                e => Error::with_chain(e, "Couldn't create a new user!"),
            })?;

        diesel::insert_into(passwords::table)
            .values(&pw.into_db(user.id))
            .execute(conn)
            .chain_err(|| "Couldn't insert the new password into database!")?;

        Ok(user)
    })?;

    info!("Created a new user {:?}.", username);
    Ok(user)
}

pub fn change_password(conn: &mut PgConnection,
                       user_id: i32,
                       new_password: &str,
                       pepper: &[u8],
                       stretch_time: Duration)
                       -> Result<()> {
    let pw = password::set_password(new_password, pepper, stretch_time)
        .chain_err(|| "Setting password didn't succeed!")?;

    let _: Password = pw.into_db(user_id)
        .save_changes(conn)
        .chain_err(|| "Couldn't save the new password!")?;

    Ok(())
}

/// Creates the shared guest account if missing and keeps its password in
/// sync with the configured one.
pub fn ensure_guest(conn: &mut PgConnection,
                    guest_password: &str,
                    pepper: &[u8],
                    stretch_time: Duration)
                    -> Result<User> {
    use schema::users;

    let existing: Option<User> = users::table
        .filter(users::username.eq(GUEST_USERNAME))
        .first(conn)
        .optional()?;

    match existing {
        Some(user) => {
            change_password(conn, user.id, guest_password, pepper, stretch_time)?;
            Ok(user)
        }
        None => add_user(conn,
                         GUEST_USERNAME,
                         None,
                         guest_password,
                         false,
                         false,
                         pepper,
                         stretch_time),
    }
}

pub fn deactivate_user(conn: &mut PgConnection, user_id: i32) -> Result<User> {
    use schema::{users, sessions};

    conn.transaction(|conn| -> Result<User> {
        let user: User = diesel::update(users::table.filter(users::id.eq(user_id)))
            .set(users::is_active.eq(false))
            .get_result(conn)
            .chain_err(|| "Couldn't deactivate the user!")?;

        // Live tokens die with the account.
        diesel::delete(sessions::table.filter(sessions::user_id.eq(user_id)))
            .execute(conn)?;

        Ok(user)
    })
}

pub fn remove_user(conn: &mut PgConnection, rm_name: &str) -> Result<User> {
    use schema::users::dsl::*;
    use diesel::result::Error::NotFound;

    diesel::delete(users.filter(username.eq(rm_name)))
        .get_result(conn)
        .map_err(|e| match e {
            NotFound => ErrorKind::NoSuchUser(rm_name.into()).into(),
            e => Error::with_chain(e, "Couldn't remove the user!"),
        })
}

pub fn list_users(conn: &mut PgConnection) -> Result<Vec<User>> {
    use schema::users::dsl::*;

    users.order(id.asc())
        .get_results(conn)
        .chain_err(|| "Couldn't list the users!")
}
