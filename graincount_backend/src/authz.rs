use super::*;

/// What a caller wants to do with an entity. Deletes count as mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Mutate,
}

/// An entity to check access against. Ownership is computed by walking the
/// containment chain up to the project creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Project(i32),
    Sample(i32),
    Grain(i32),
    Image(i32),
}

pub fn project_owner(conn: &mut PgConnection, project_id: i32) -> Result<Option<i32>> {
    use schema::projects;

    Ok(projects::table
        .filter(projects::id.eq(project_id))
        .select(projects::creator_id)
        .first(conn)
        .optional()?)
}

pub fn sample_owner(conn: &mut PgConnection, sample_id: i32) -> Result<Option<i32>> {
    use schema::{projects, samples};

    Ok(samples::table
        .inner_join(projects::table)
        .filter(samples::id.eq(sample_id))
        .select(projects::creator_id)
        .first(conn)
        .optional()?)
}

pub fn grain_owner(conn: &mut PgConnection, grain_id: i32) -> Result<Option<i32>> {
    use schema::{grains, projects, samples};

    Ok(grains::table
        .inner_join(samples::table.inner_join(projects::table))
        .filter(grains::id.eq(grain_id))
        .select(projects::creator_id)
        .first(conn)
        .optional()?)
}

pub fn image_owner(conn: &mut PgConnection, image_id: i32) -> Result<Option<i32>> {
    use schema::{grains, images, projects, samples};

    Ok(images::table
        .inner_join(grains::table.inner_join(samples::table.inner_join(projects::table)))
        .filter(images::id.eq(image_id))
        .select(projects::creator_id)
        .first(conn)
        .optional()?)
}

fn owner(conn: &mut PgConnection, scope: Scope) -> Result<Option<i32>> {
    match scope {
        Scope::Project(id) => project_owner(conn, id),
        Scope::Sample(id) => sample_owner(conn, id),
        Scope::Grain(id) => grain_owner(conn, id),
        Scope::Image(id) => image_owner(conn, id),
    }
}

/// Whether the entity sits inside a public sample. Projects have no public
/// flag of their own.
fn in_public_sample(conn: &mut PgConnection, scope: Scope) -> Result<bool> {
    use schema::{grains, images, samples};

    let public: Option<bool> = match scope {
        Scope::Project(_) => return Ok(false),
        Scope::Sample(id) => samples::table
            .filter(samples::id.eq(id))
            .select(samples::public)
            .first(conn)
            .optional()?,
        Scope::Grain(id) => grains::table
            .inner_join(samples::table)
            .filter(grains::id.eq(id))
            .select(samples::public)
            .first(conn)
            .optional()?,
        Scope::Image(id) => images::table
            .inner_join(grains::table.inner_join(samples::table))
            .filter(images::id.eq(id))
            .select(samples::public)
            .first(conn)
            .optional()?,
    };
    Ok(public.unwrap_or(false))
}

/// The uniform access predicate: superusers everything, owners their own
/// subtree, and anyone (authenticated or not) may read inside public samples.
pub fn can(conn: &mut PgConnection,
           sess: Option<&UserSession>,
           op: Op,
           scope: Scope)
           -> Result<bool> {
    if let Some(sess) = sess {
        if sess.is_superuser {
            return Ok(true);
        }
        if owner(conn, scope)? == Some(sess.user_id) {
            return Ok(true);
        }
    }
    if op == Op::Read && in_public_sample(conn, scope)? {
        return Ok(true);
    }
    Ok(false)
}

/// Like `can`, but turns a denied check into the error the API reports:
/// entities the caller can't even read look like they don't exist.
pub fn require(conn: &mut PgConnection,
               sess: Option<&UserSession>,
               op: Op,
               scope: Scope)
               -> Result<()> {
    if can(conn, sess, op, scope)? {
        return Ok(());
    }
    if op == Op::Mutate && can(conn, sess, Op::Read, scope)? {
        bail!(ErrorKind::AccessDenied);
    }
    bail!(ErrorKind::NotFound);
}


#[test]
#[ignore]
fn test_db_ownership_walks_to_the_project_creator() {
    use schema::{images, samples};

    let mut conn = scratch_conn();
    let (owner, owner_sess) = scratch_user(&mut conn, "owner");
    let (_, intruder_sess) = scratch_user(&mut conn, "intruder");
    let (project, sample) = scratch_sample(&mut conn, owner.id, "SCR-7", 1);
    let grain = scratch_grain(&mut conn, sample.id, 1);
    let image: Image = diesel::insert_into(images::table)
        .values(&NewImage {
            grain_id: grain.id,
            format: "J",
            ft_type: "S",
            index: 1,
            data: &[0xff, 0xd8, 0xff],
            light_path: None,
            focus: None,
        })
        .get_result(&mut conn)
        .unwrap();

    assert_eq!(sample_owner(&mut conn, sample.id).unwrap(), Some(owner.id));
    assert_eq!(grain_owner(&mut conn, grain.id).unwrap(), Some(owner.id));
    assert_eq!(image_owner(&mut conn, image.id).unwrap(), Some(owner.id));

    assert!(can(&mut conn, Some(&owner_sess), Op::Mutate, Scope::Image(image.id)).unwrap());
    assert!(!can(&mut conn, Some(&intruder_sess), Op::Read, Scope::Grain(grain.id)).unwrap());

    // Unreadable entities look missing, readable-but-foreign ones denied.
    match require(&mut conn, Some(&intruder_sess), Op::Mutate, Scope::Project(project.id)) {
        Err(Error(ErrorKind::NotFound, _)) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }

    diesel::update(samples::table.filter(samples::id.eq(sample.id)))
        .set(samples::public.eq(true))
        .execute(&mut conn)
        .unwrap();
    assert!(can(&mut conn, Some(&intruder_sess), Op::Read, Scope::Grain(grain.id)).unwrap());
    assert!(can(&mut conn, None, Op::Read, Scope::Image(image.id)).unwrap());
    match require(&mut conn, Some(&intruder_sess), Op::Mutate, Scope::Grain(grain.id)) {
        Err(Error(ErrorKind::AccessDenied, _)) => {}
        other => panic!("expected AccessDenied, got {:?}", other),
    }
}
