use super::*;
use regex::Regex;

lazy_static! {

    static ref PROJECT_NAME_RE: Regex =
        Regex::new(r"^[0-9A-Za-z_-]+$").unwrap();

    static ref SAMPLE_NAME_RE: Regex =
        Regex::new(r"^[0-9A-Za-z _#():@/-]+$").unwrap();
}

fn unique_conflict(what: &'static str) -> impl Fn(diesel::result::Error) -> Error {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    move |e| match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            ErrorKind::Conflict(what).into()
        }
        e => e.into(),
    }
}

fn check_project_name(name: &str) -> Result<()> {
    if !PROJECT_NAME_RE.is_match(name) {
        return Err(ErrorKind::InvalidInput(
            format!("Project name {:?} may only contain [0-9A-Za-z_-].", name),
        ).into());
    }
    Ok(())
}

fn check_sample_name(name: &str) -> Result<()> {
    if !SAMPLE_NAME_RE.is_match(name) {
        return Err(ErrorKind::InvalidInput(
            format!("Sample name {:?} may only contain [0-9A-Za-z _#():@/-].", name),
        ).into());
    }
    Ok(())
}

fn check_sample_property(property: &str) -> Result<()> {
    match property {
        "T" | "A" | "D" => Ok(()),
        other => Err(ErrorKind::InvalidInput(
            format!("Sample property must be T, A or D, not {:?}.", other),
        ).into()),
    }
}


#[derive(Debug, Deserialize)]
pub struct ProjectInput {
    pub project_name: String,
    #[serde(default)]
    pub project_description: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub closed: bool,
}

pub fn create_project(conn: &mut PgConnection,
                      sess: &UserSession,
                      input: &ProjectInput)
                      -> Result<Project> {
    use schema::projects;

    if !(sess.is_staff || sess.is_superuser) {
        bail!(ErrorKind::AccessDenied);
    }
    check_project_name(&input.project_name)?;

    let new_project = NewProject {
        project_name: &input.project_name,
        creator_id: sess.user_id,
        project_description: &input.project_description,
        priority: input.priority,
        closed: input.closed,
    };

    let project: Project = diesel::insert_into(projects::table)
        .values(&new_project)
        .get_result(conn)
        .map_err(unique_conflict("a project with that name already exists"))?;

    info!("Created project {:?} (id {}).", project.project_name, project.id);
    Ok(project)
}

pub fn get_project(conn: &mut PgConnection,
                   sess: Option<&UserSession>,
                   id: i32)
                   -> Result<Project> {
    use schema::projects;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Project(id))?;

    projects::table
        .filter(projects::id.eq(id))
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => ErrorKind::NotFound.into(),
            e => Error::with_chain(e, "Couldn't get the project!"),
        })
}

pub fn lookup_project(conn: &mut PgConnection, key: &str) -> Result<Option<Project>> {
    use schema::projects;

    if let Ok(id) = key.parse::<i32>() {
        return Ok(projects::table
            .filter(projects::id.eq(id))
            .first(conn)
            .optional()?);
    }
    Ok(projects::table
        .filter(projects::project_name.ilike(key))
        .first(conn)
        .optional()?)
}

pub fn list_projects(conn: &mut PgConnection, sess: &UserSession) -> Result<Vec<Project>> {
    use schema::projects;

    let mut query = projects::table.into_boxed();
    if !sess.is_superuser {
        query = query.filter(projects::creator_id.eq(sess.user_id));
    }
    Ok(query.order(projects::id.asc()).load(conn)?)
}

pub fn update_project(conn: &mut PgConnection,
                      sess: Option<&UserSession>,
                      id: i32,
                      item: &UpdateProject)
                      -> Result<Project> {
    use schema::projects;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Project(id))?;
    // An all-None patch would build an empty UPDATE; answer with the row
    // as it stands.
    if item.is_empty() {
        return get_project(conn, sess, id);
    }
    if let Some(ref name) = item.project_name {
        check_project_name(name)?;
    }

    diesel::update(projects::table.filter(projects::id.eq(id)))
        .set(item)
        .get_result(conn)
        .map_err(unique_conflict("a project with that name already exists"))
}

pub fn remove_project(conn: &mut PgConnection,
                      sess: Option<&UserSession>,
                      id: i32)
                      -> Result<()> {
    use schema::projects;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Project(id))?;

    diesel::delete(projects::table.filter(projects::id.eq(id))).execute(conn)?;
    info!("Removed project {}.", id);
    Ok(())
}


#[derive(Debug, Deserialize)]
pub struct SampleInput {
    pub sample_name: String,
    #[serde(alias = "in_project")]
    pub project: i32,
    #[serde(default = "default_sample_property")]
    pub sample_property: String,
    #[serde(default)]
    pub total_grains: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_min_contributor_num")]
    pub min_contributor_num: i32,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub public: bool,
}

fn default_sample_property() -> String {
    "T".into()
}

fn default_min_contributor_num() -> i32 {
    1
}

pub fn create_sample(conn: &mut PgConnection,
                     sess: Option<&UserSession>,
                     input: &SampleInput)
                     -> Result<Sample> {
    use schema::samples;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Project(input.project))?;
    check_sample_name(&input.sample_name)?;
    check_sample_property(&input.sample_property)?;

    let new_sample = NewSample {
        sample_name: &input.sample_name,
        project_id: input.project,
        sample_property: &input.sample_property,
        total_grains: input.total_grains,
        priority: input.priority,
        min_contributor_num: input.min_contributor_num,
        completed: input.completed,
        public: input.public,
    };

    let sample: Sample = diesel::insert_into(samples::table)
        .values(&new_sample)
        .get_result(conn)
        .map_err(unique_conflict("a sample with that name already exists in the project"))?;

    info!("Created sample {:?} (id {}) in project {}.",
          sample.sample_name,
          sample.id,
          sample.project_id);
    Ok(sample)
}

pub fn get_sample(conn: &mut PgConnection,
                  sess: Option<&UserSession>,
                  id: i32)
                  -> Result<Sample> {
    use schema::samples;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Sample(id))?;

    samples::table
        .filter(samples::id.eq(id))
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => ErrorKind::NotFound.into(),
            e => Error::with_chain(e, "Couldn't get the sample!"),
        })
}

pub fn lookup_sample(conn: &mut PgConnection, key: &str) -> Result<Option<Sample>> {
    use schema::samples;

    if let Ok(id) = key.parse::<i32>() {
        return Ok(samples::table
            .filter(samples::id.eq(id))
            .first(conn)
            .optional()?);
    }
    Ok(samples::table
        .filter(samples::sample_name.ilike(key))
        .first(conn)
        .optional()?)
}

/// Lists the samples the caller may see, optionally scoped to one project
/// given by id or (case-insensitive) name.
pub fn list_samples(conn: &mut PgConnection,
                    sess: &UserSession,
                    project: Option<&str>)
                    -> Result<Vec<Sample>> {
    use schema::{projects, samples};

    let mut query = samples::table
        .inner_join(projects::table)
        .select(samples::all_columns)
        .into_boxed();

    if !sess.is_superuser {
        query = query.filter(projects::creator_id.eq(sess.user_id).or(samples::public.eq(true)));
    }

    if let Some(key) = project {
        let project = lookup_project(conn, key)?.ok_or(ErrorKind::NotFound)?;
        query = query.filter(samples::project_id.eq(project.id));
    }

    Ok(query.order(samples::id.asc()).load(conn)?)
}

pub fn update_sample(conn: &mut PgConnection,
                     sess: Option<&UserSession>,
                     id: i32,
                     item: &UpdateSample)
                     -> Result<Sample> {
    use schema::samples;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Sample(id))?;
    if item.is_empty() {
        return get_sample(conn, sess, id);
    }
    if let Some(ref name) = item.sample_name {
        check_sample_name(name)?;
    }
    if let Some(ref property) = item.sample_property {
        check_sample_property(property)?;
    }

    diesel::update(samples::table.filter(samples::id.eq(id)))
        .set(item)
        .get_result(conn)
        .map_err(unique_conflict("a sample with that name already exists in the project"))
}

pub fn remove_sample(conn: &mut PgConnection,
                     sess: Option<&UserSession>,
                     id: i32)
                     -> Result<()> {
    use schema::samples;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Sample(id))?;

    diesel::delete(samples::table.filter(samples::id.eq(id))).execute(conn)?;
    info!("Removed sample {}.", id);
    Ok(())
}


pub fn get_grain(conn: &mut PgConnection,
                 sess: Option<&UserSession>,
                 id: i32)
                 -> Result<Grain> {
    use schema::grains;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Grain(id))?;

    grains::table
        .filter(grains::id.eq(id))
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => ErrorKind::NotFound.into(),
            e => Error::with_chain(e, "Couldn't get the grain!"),
        })
}

pub fn get_grain_by_index(conn: &mut PgConnection,
                          sample_id: i32,
                          grain_index: i32)
                          -> Result<Option<Grain>> {
    use schema::grains;

    Ok(grains::table
        .filter(grains::sample_id.eq(sample_id))
        .filter(grains::index.eq(grain_index))
        .first(conn)
        .optional()?)
}

pub fn list_grains(conn: &mut PgConnection,
                   sess: Option<&UserSession>,
                   sample_id: i32)
                   -> Result<Vec<Grain>> {
    use schema::grains;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Sample(sample_id))?;

    Ok(grains::table
        .filter(grains::sample_id.eq(sample_id))
        .order(grains::index.asc())
        .load(conn)?)
}

pub fn update_grain(conn: &mut PgConnection,
                    sess: Option<&UserSession>,
                    id: i32,
                    item: &UpdateGrain)
                    -> Result<Grain> {
    use schema::grains;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Grain(id))?;
    if item.is_empty() {
        return get_grain(conn, sess, id);
    }
    if let Some(target) = item.sample_id {
        // Moving between samples needs rights on the receiving side too.
        authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Sample(target))?;
    }
    if let Some(index) = item.index {
        if index < 1 {
            return Err(ErrorKind::InvalidInput(
                format!("Grain index must be at least 1, not {}.", index),
            ).into());
        }
    }

    diesel::update(grains::table.filter(grains::id.eq(id)))
        .set(item)
        .get_result(conn)
        .map_err(unique_conflict("a grain with that index already exists in the sample"))
}

pub fn remove_grain(conn: &mut PgConnection,
                    sess: Option<&UserSession>,
                    id: i32)
                    -> Result<()> {
    use schema::grains;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Grain(id))?;

    diesel::delete(grains::table.filter(grains::id.eq(id))).execute(conn)?;
    info!("Removed grain {}.", id);
    Ok(())
}


pub fn get_image(conn: &mut PgConnection,
                 sess: Option<&UserSession>,
                 id: i32)
                 -> Result<ImageInfo> {
    use schema::images;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Image(id))?;

    images::table
        .filter(images::id.eq(id))
        .select((images::id,
                 images::grain_id,
                 images::format,
                 images::ft_type,
                 images::index,
                 images::light_path,
                 images::focus))
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => ErrorKind::NotFound.into(),
            e => Error::with_chain(e, "Couldn't get the image!"),
        })
}

pub fn get_image_data(conn: &mut PgConnection,
                      sess: Option<&UserSession>,
                      id: i32)
                      -> Result<(naming::ImgFormat, Vec<u8>)> {
    use schema::images;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Image(id))?;

    let (format, data): (String, Vec<u8>) = images::table
        .filter(images::id.eq(id))
        .select((images::format, images::data))
        .first(conn)
        .map_err(|e| match e {
            diesel::result::Error::NotFound => ErrorKind::NotFound.into(),
            e => Error::with_chain(e, "Couldn't get the image data!"),
        })?;

    Ok((naming::ImgFormat::from_str(&format)?, data))
}

pub fn list_images(conn: &mut PgConnection,
                   sess: Option<&UserSession>,
                   grain_id: i32)
                   -> Result<Vec<ImageInfo>> {
    use schema::images;

    authz::require(conn, sess, authz::Op::Read, authz::Scope::Grain(grain_id))?;

    Ok(images::table
        .filter(images::grain_id.eq(grain_id))
        .select((images::id,
                 images::grain_id,
                 images::format,
                 images::ft_type,
                 images::index,
                 images::light_path,
                 images::focus))
        .order((images::index.asc(), images::ft_type.asc()))
        .load(conn)?)
}

pub fn update_image(conn: &mut PgConnection,
                    sess: Option<&UserSession>,
                    id: i32,
                    item: &UpdateImage)
                    -> Result<ImageInfo> {
    use schema::images;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Image(id))?;
    if item.is_empty() {
        return get_image(conn, sess, id);
    }
    if let Some(target) = item.grain_id {
        authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Grain(target))?;
    }
    if let Some(ref format) = item.format {
        naming::ImgFormat::from_str(format)?;
    }
    if let Some(ref ft_type) = item.ft_type {
        naming::FtType::from_str(ft_type)?;
    }

    let image: Image = diesel::update(images::table.filter(images::id.eq(id)))
        .set(item)
        .get_result(conn)
        .map_err(unique_conflict("the grain already has an image at that index and track type"))?;

    Ok(ImageInfo {
        id: image.id,
        grain_id: image.grain_id,
        format: image.format,
        ft_type: image.ft_type,
        index: image.index,
        light_path: image.light_path,
        focus: image.focus,
    })
}

pub fn remove_image(conn: &mut PgConnection,
                    sess: Option<&UserSession>,
                    id: i32)
                    -> Result<()> {
    use schema::images;

    authz::require(conn, sess, authz::Op::Mutate, authz::Scope::Image(id))?;

    diesel::delete(images::table.filter(images::id.eq(id))).execute(conn)?;
    info!("Removed image {}.", id);
    Ok(())
}


#[test]
fn test_empty_patch_detection() {
    assert!(UpdateProject::default().is_empty());
    assert!(UpdateSample::default().is_empty());
    assert!(UpdateImage::default().is_empty());
    assert!(!UpdateSample { priority: Some(2), ..Default::default() }.is_empty());

    // Clearing a nullable column is a change, not an empty patch.
    assert!(UpdateGrain::default().is_empty());
    assert!(!UpdateGrain { scale_x: Some(None), ..Default::default() }.is_empty());
}

#[test]
#[ignore]
fn test_db_empty_patches_leave_rows_unchanged() {
    let mut conn = scratch_conn();
    let (user, sess) = scratch_user(&mut conn, "owner");
    let (project, sample) = scratch_sample(&mut conn, user.id, "SCR-9", 3);
    let grain = scratch_grain(&mut conn, sample.id, 1);

    let same_project = update_project(&mut conn, Some(&sess), project.id,
                                      &UpdateProject::default())
        .unwrap();
    assert_eq!(same_project.project_name, project.project_name);
    assert_eq!(same_project.priority, project.priority);

    let same_sample = update_sample(&mut conn, Some(&sess), sample.id,
                                    &UpdateSample::default())
        .unwrap();
    assert_eq!(same_sample.total_grains, 3);
    assert_eq!(same_sample.sample_name, sample.sample_name);

    let same_grain = update_grain(&mut conn, Some(&sess), grain.id,
                                  &UpdateGrain::default())
        .unwrap();
    assert_eq!((same_grain.index, same_grain.image_width), (1, 1000));
}

#[test]
#[ignore]
fn test_db_sample_removal_cascades_to_the_subtree() {
    use counts::{self, CountPayload, PointInput};
    use naming::FtType;
    use schema::{grain_points, grains, images, regions, track_counts, vertices};

    let mut conn = scratch_conn();
    let (creator, sess) = scratch_user(&mut conn, "owner");
    let (_, sample) = scratch_sample(&mut conn, creator.id, "SCR-4", 1);
    let grain = scratch_grain(&mut conn, sample.id, 1);
    let (_, keeper_sample) = scratch_sample(&mut conn, creator.id, "SCR-5", 1);
    let keeper_grain = scratch_grain(&mut conn, keeper_sample.id, 1);

    diesel::insert_into(images::table)
        .values(&NewImage {
            grain_id: grain.id,
            format: "J",
            ft_type: "S",
            index: 1,
            data: &[0xff, 0xd8, 0xff],
            light_path: None,
            focus: None,
        })
        .execute(&mut conn)
        .unwrap();
    let count = counts::submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous,
                               &CountPayload::Points(vec![
                                   PointInput { x_pixels: 10, y_pixels: 10,
                                                category: None, comment: None },
                               ]))
        .unwrap();
    let baseline: Region = diesel::insert_into(regions::table)
        .values(&NewRegion { grain_id: grain.id, result_id: None })
        .get_result(&mut conn)
        .unwrap();
    let anchored: Region = diesel::insert_into(regions::table)
        .values(&NewRegion { grain_id: grain.id, result_id: Some(count.id) })
        .get_result(&mut conn)
        .unwrap();
    diesel::insert_into(vertices::table)
        .values(&vec![
            NewVertex { region_id: baseline.id, x: 0, y: 0 },
            NewVertex { region_id: baseline.id, x: 100, y: 0 },
            NewVertex { region_id: baseline.id, x: 0, y: 100 },
            NewVertex { region_id: anchored.id, x: 50, y: 50 },
        ])
        .execute(&mut conn)
        .unwrap();

    counts::submit(&mut conn, &sess, keeper_sample.id, 1, FtType::Spontaneous,
                   &CountPayload::Points(vec![
                       PointInput { x_pixels: 20, y_pixels: 20,
                                    category: None, comment: None },
                   ]))
        .unwrap();

    remove_sample(&mut conn, Some(&sess), sample.id).unwrap();

    let grains_left: i64 = grains::table.count().get_result(&mut conn).unwrap();
    let images_left: i64 = images::table.count().get_result(&mut conn).unwrap();
    let counts_left: i64 = track_counts::table.count().get_result(&mut conn).unwrap();
    let points_left: i64 = grain_points::table.count().get_result(&mut conn).unwrap();
    let regions_left: i64 = regions::table.count().get_result(&mut conn).unwrap();
    let vertices_left: i64 = vertices::table.count().get_result(&mut conn).unwrap();
    assert_eq!((grains_left, images_left, counts_left), (1, 0, 1));
    assert_eq!((points_left, regions_left, vertices_left), (1, 0, 0));

    let keeper: Grain = grains::table
        .filter(grains::id.eq(keeper_grain.id))
        .first(&mut conn)
        .unwrap();
    assert_eq!(keeper.sample_id, keeper_sample.id);
    assert!(get_grain(&mut conn, Some(&sess), grain.id).is_err());
}
