use super::*;
use geometry::LatLng;
use naming::FtType;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One unit of counting work: a grain slot in a sample, viewed as one track
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assignment {
    pub project_id: i32,
    pub sample_id: i32,
    pub grain_index: i32,
    pub ft_type: FtType,
}

#[derive(Debug)]
pub enum NextUnit {
    Work(Assignment),
    /// A partial save takes precedence over fresh work.
    Resume {
        assignment: Assignment,
        result_id: i32,
    },
    Done,
}

fn guest_user_id(conn: &mut PgConnection) -> Result<Option<i32>> {
    use schema::users;

    Ok(users::table
        .filter(users::username.eq(user::GUEST_USERNAME))
        .select(users::id)
        .first(conn)
        .optional()?)
}

/// Which track type a sample's grains are counted with. Dosimeter samples
/// carry no spontaneous tracks of interest.
pub fn sample_ft_type(sample: &Sample) -> FtType {
    if sample.sample_property == "D" {
        FtType::Induced
    } else {
        FtType::Spontaneous
    }
}

fn newest_partial(conn: &mut PgConnection, worker_id: i32) -> Result<Option<NextUnit>> {
    use schema::{grains, samples, track_counts};

    let partial: Option<(TrackCount, (Grain, Sample))> = track_counts::table
        .inner_join(grains::table.inner_join(samples::table))
        .filter(track_counts::worker_id.eq(worker_id))
        .filter(track_counts::result.eq(-1))
        .order((track_counts::create_date.desc(), track_counts::id.desc()))
        .first(conn)
        .optional()?;

    Ok(partial.map(|(count, (grain, sample))| {
        debug!("Resuming partial result {} for worker {}.", count.id, worker_id);
        NextUnit::Resume {
            assignment: Assignment {
                project_id: sample.project_id,
                sample_id: sample.id,
                grain_index: grain.index,
                ft_type: FtType::from_str(&count.ft_type)
                    .unwrap_or(FtType::Spontaneous),
            },
            result_id: count.id,
        }
    }))
}

/// Guests aren't tracked against contribution minimums; they just get a
/// uniformly random grain, and never trigger closure writes.
fn random_grain_for_guest(conn: &mut PgConnection) -> Result<NextUnit> {
    use schema::{grains, samples};

    let candidates: Vec<(Grain, Sample)> = grains::table
        .inner_join(samples::table)
        .load(conn)?;

    let mut rng = rand::thread_rng();
    Ok(match candidates.choose(&mut rng) {
        Some((grain, sample)) => NextUnit::Work(Assignment {
            project_id: sample.project_id,
            sample_id: sample.id,
            grain_index: grain.index,
            ft_type: sample_ft_type(sample),
        }),
        None => NextUnit::Done,
    })
}

/// The project/sample cascade of the assignment engine. Closure flags are
/// persisted as they are discovered; reruns are idempotent.
pub fn next_unit(conn: &mut PgConnection, user: &UserSession) -> Result<NextUnit> {
    use schema::{grains, projects, samples, track_counts};

    if let Some(resume) = newest_partial(conn, user.user_id)? {
        return Ok(resume);
    }

    if user.is_guest() {
        return random_grain_for_guest(conn);
    }

    let guest_id = guest_user_id(conn)?;
    let mut rng = rand::thread_rng();

    // Highest priority first, oldest first within a priority, random within
    // full ties.
    let mut candidates: Vec<(Project, u32)> = projects::table
        .filter(projects::closed.eq(false))
        .load::<Project>(conn)?
        .into_iter()
        .map(|p| (p, rng.gen()))
        .collect();
    candidates.sort_by(|a, b| {
        b.0.priority
            .cmp(&a.0.priority)
            .then(a.0.create_date.cmp(&b.0.create_date))
            .then(a.1.cmp(&b.1))
    });

    for (project, _) in candidates {
        let mut open_samples: Vec<(Sample, u32)> = samples::table
            .filter(samples::project_id.eq(project.id))
            .filter(samples::completed.eq(false))
            .load::<Sample>(conn)?
            .into_iter()
            .map(|s| (s, rng.gen()))
            .collect();

        if open_samples.is_empty() {
            info!("Project {} has no open samples left; closing it.", project.id);
            // Best effort; the flag is recomputed on the next pass anyway.
            if let Err(e) = diesel::update(projects::table.filter(projects::id.eq(project.id)))
                .set(projects::closed.eq(true))
                .execute(conn)
            {
                warn!("Couldn't close project {}: {}", project.id, e);
            }
            continue;
        }

        open_samples.sort_by(|a, b| b.0.priority.cmp(&a.0.priority).then(a.1.cmp(&b.1)));

        for (sample, _) in open_samples {
            let ft = sample_ft_type(&sample);

            let rows: Vec<(i32, i32)> = track_counts::table
                .inner_join(grains::table)
                .filter(grains::sample_id.eq(sample.id))
                .filter(track_counts::ft_type.eq(ft.as_str()))
                .select((grains::index, track_counts::worker_id))
                .load(conn)?;

            let mut contributors: HashMap<i32, HashSet<i32>> = HashMap::new();
            let mut own: HashSet<i32> = HashSet::new();
            for (grain_index, worker_id) in rows {
                if worker_id == user.user_id {
                    own.insert(grain_index);
                }
                if Some(worker_id) == guest_id {
                    continue;
                }
                contributors.entry(grain_index).or_default().insert(worker_id);
            }

            let unsatisfied: Vec<i32> = (1..=sample.total_grains)
                .filter(|index| {
                    contributors
                        .get(index)
                        .map(|workers| (workers.len() as i32) < sample.min_contributor_num)
                        .unwrap_or(true)
                })
                .collect();

            if unsatisfied.is_empty() {
                info!("Sample {} has the contributions it needs; marking completed.",
                      sample.id);
                if let Err(e) = diesel::update(samples::table.filter(samples::id.eq(sample.id)))
                    .set(samples::completed.eq(true))
                    .execute(conn)
                {
                    warn!("Couldn't mark sample {} completed: {}", sample.id, e);
                }
                continue;
            }

            let remaining: Vec<i32> = unsatisfied
                .into_iter()
                .filter(|index| !own.contains(index))
                .collect();

            if let Some(&grain_index) = remaining.choose(&mut rng) {
                return Ok(NextUnit::Work(Assignment {
                    project_id: project.id,
                    sample_id: sample.id,
                    grain_index,
                    ft_type: ft,
                }));
            }
        }
    }

    Ok(NextUnit::Done)
}

/// Everything the counting client needs to draw one unit of work.
#[derive(Debug, Serialize)]
pub struct CountingBundle {
    pub project_id: i32,
    pub sample_id: i32,
    pub grain_id: i32,
    pub grain_index: i32,
    pub ft_type: FtType,
    pub image_width: i32,
    pub image_height: i32,
    pub image_ids: Vec<i32>,
    pub rois: Vec<Vec<LatLng>>,
    pub marker_latlngs: Vec<LatLng>,
    pub result_id: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Counting {
    Unit(Box<CountingBundle>),
    Done { done: bool },
}

/// Resolves `next_unit` into a drawable bundle: the grain row, its images
/// for the assigned track type and the ROI rings, plus resume markers when
/// a partial is being picked up.
pub fn counting_bundle(conn: &mut PgConnection, user: &UserSession) -> Result<Counting> {
    use schema::images;

    let (assignment, result_id) = match next_unit(conn, user)? {
        NextUnit::Done => return Ok(Counting::Done { done: true }),
        NextUnit::Work(assignment) => (assignment, None),
        NextUnit::Resume { assignment, result_id } => (assignment, Some(result_id)),
    };

    let grain = manage::get_grain_by_index(conn, assignment.sample_id, assignment.grain_index)?
        .ok_or(ErrorKind::DatabaseOdd("an assigned grain slot has no grain row"))?;

    let image_ids: Vec<i32> = images::table
        .filter(images::grain_id.eq(grain.id))
        .filter(images::ft_type.eq(assignment.ft_type.as_str()))
        .order(images::index.asc())
        .select(images::id)
        .load(conn)?;
    if image_ids.is_empty() {
        bail!(ErrorKind::DatabaseOdd("the assigned grain has no images for its track type"));
    }

    let rois = rois::load_rois_latlngs(conn, &grain, assignment.ft_type)?
        .ok_or(ErrorKind::DatabaseOdd("the assigned grain has an empty ROI region"))?;
    if rois.is_empty() {
        bail!(ErrorKind::DatabaseOdd("the assigned grain has no ROI regions"));
    }

    let marker_latlngs = match result_id {
        Some(id) => results::to_latlngs(conn, id)?,
        None => Vec::new(),
    };

    Ok(Counting::Unit(Box::new(CountingBundle {
        project_id: assignment.project_id,
        sample_id: assignment.sample_id,
        grain_id: grain.id,
        grain_index: assignment.grain_index,
        ft_type: assignment.ft_type,
        image_width: grain.image_width,
        image_height: grain.image_height,
        image_ids,
        rois,
        marker_latlngs,
        result_id,
    })))
}


#[test]
fn test_sample_ft_type() {
    let mut sample = Sample {
        id: 1,
        sample_name: "ADM-1".into(),
        project_id: 1,
        sample_property: "T".into(),
        total_grains: 10,
        priority: 0,
        min_contributor_num: 1,
        completed: false,
        public: false,
    };
    assert_eq!(sample_ft_type(&sample), FtType::Spontaneous);
    sample.sample_property = "A".into();
    assert_eq!(sample_ft_type(&sample), FtType::Spontaneous);
    sample.sample_property = "D".into();
    assert_eq!(sample_ft_type(&sample), FtType::Induced);
}

#[test]
#[ignore]
fn test_db_assignment_resumes_then_closes() {
    use counts::CountPayload;
    use schema::{projects, samples};

    let mut conn = scratch_conn();
    let (creator, _) = scratch_user(&mut conn, "owner");
    let (project, sample) = scratch_sample(&mut conn, creator.id, "SCR-3", 1);
    scratch_grain(&mut conn, sample.id, 1);
    let (_, worker) = scratch_user(&mut conn, "worker");

    match next_unit(&mut conn, &worker).unwrap() {
        NextUnit::Work(a) => {
            assert_eq!(a.sample_id, sample.id);
            assert_eq!(a.grain_index, 1);
            assert_eq!(a.ft_type, FtType::Spontaneous);
        }
        other => panic!("expected fresh work, got {:?}", other),
    }

    counts::save_partial(&mut conn, &worker, sample.id, 1, FtType::Spontaneous,
                         &CountPayload::LatLngs(vec![LatLng { lat: 0.5, lng: 0.5 }]))
        .unwrap();
    match next_unit(&mut conn, &worker).unwrap() {
        NextUnit::Resume { assignment, .. } => assert_eq!(assignment.grain_index, 1),
        other => panic!("expected a resume, got {:?}", other),
    }

    counts::submit(&mut conn, &worker, sample.id, 1, FtType::Spontaneous,
                   &CountPayload::LatLngs(vec![LatLng { lat: 0.5, lng: 0.5 },
                                               LatLng { lat: 0.25, lng: 0.75 }]))
        .unwrap();

    // The only grain is satisfied now; the sample closes on this pass and
    // the emptied project on the one after.
    match next_unit(&mut conn, &worker).unwrap() {
        NextUnit::Done => {}
        other => panic!("expected no more work, got {:?}", other),
    }
    let completed: bool = samples::table
        .filter(samples::id.eq(sample.id))
        .select(samples::completed)
        .first(&mut conn)
        .unwrap();
    assert!(completed);

    match next_unit(&mut conn, &worker).unwrap() {
        NextUnit::Done => {}
        other => panic!("expected no more work, got {:?}", other),
    }
    let closed: bool = projects::table
        .filter(projects::id.eq(project.id))
        .select(projects::closed)
        .first(&mut conn)
        .unwrap();
    assert!(closed);

    // The exhausted corpus still serves guests.
    let (_, guest) = scratch_user(&mut conn, user::GUEST_USERNAME);
    match next_unit(&mut conn, &guest).unwrap() {
        NextUnit::Work(a) => assert_eq!(a.grain_index, 1),
        other => panic!("expected guest work, got {:?}", other),
    }
}
