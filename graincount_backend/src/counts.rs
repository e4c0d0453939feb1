use super::*;
use chrono::Utc;
use geometry::{self, LatLng};
use naming::FtType;
use serde::Deserialize;
use std::collections::HashSet;

/// A point dict as accepted on the wire. Latlng submissions are converted
/// into this form before anything touches the database.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointInput {
    pub x_pixels: i32,
    pub y_pixels: i32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug)]
pub enum CountPayload {
    LatLngs(Vec<LatLng>),
    Points(Vec<PointInput>),
}

impl CountPayload {
    pub fn len(&self) -> usize {
        match *self {
            CountPayload::LatLngs(ref lls) => lls.len(),
            CountPayload::Points(ref ps) => ps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, PartialEq)]
struct StagedPoint {
    x_pixels: i32,
    y_pixels: i32,
    category: String,
    comment: Option<String>,
}

/// Category every bare mark lands in.
pub const DEFAULT_CATEGORY: &str = "track";

fn stage_points(payload: &CountPayload, width: i32, height: i32, known: &HashSet<String>)
    -> Vec<StagedPoint>
{
    let categorize = |category: Option<&String>| -> String {
        match category {
            Some(c) if known.contains(c) => c.clone(),
            Some(c) => {
                warn!("Unknown point category {:?}; falling back to {:?}.",
                      c, DEFAULT_CATEGORY);
                DEFAULT_CATEGORY.to_owned()
            }
            None => DEFAULT_CATEGORY.to_owned(),
        }
    };
    match *payload {
        CountPayload::LatLngs(ref lls) => lls
            .iter()
            .map(|&ll| {
                let (x, y) = geometry::latlng_to_pixels(ll, width, height);
                StagedPoint {
                    x_pixels: x,
                    y_pixels: y,
                    category: DEFAULT_CATEGORY.to_owned(),
                    comment: None,
                }
            })
            .collect(),
        CountPayload::Points(ref ps) => ps
            .iter()
            .map(|p| StagedPoint {
                x_pixels: p.x_pixels,
                y_pixels: p.y_pixels,
                category: categorize(p.category.as_ref()),
                comment: p.comment.clone(),
            })
            .collect(),
    }
}

fn known_categories(conn: &mut PgConnection) -> Result<HashSet<String>> {
    use schema::grain_point_categories;

    Ok(grain_point_categories::table
        .select(grain_point_categories::name)
        .load::<String>(conn)?
        .into_iter()
        .collect())
}

fn replace_points(conn: &mut PgConnection, result_id: i32, staged: &[StagedPoint]) -> Result<()> {
    use schema::grain_points;

    diesel::delete(grain_points::table.filter(grain_points::result_id.eq(result_id)))
        .execute(conn)?;
    let rows: Vec<NewGrainPoint> = staged
        .iter()
        .map(|p| NewGrainPoint {
            result_id,
            x_pixels: p.x_pixels,
            y_pixels: p.y_pixels,
            category: &p.category,
            comment: p.comment.as_deref(),
        })
        .collect();
    diesel::insert_into(grain_points::table)
        .values(&rows)
        .execute(conn)?;
    Ok(())
}

fn replace_result_regions(conn: &mut PgConnection,
                          grain_id: i32,
                          result_id: i32,
                          result_regions: Option<&[Vec<[i32; 2]>]>)
    -> Result<()>
{
    use schema::{regions, vertices};

    let old = regions::table
        .filter(regions::result_id.eq(result_id))
        .select(regions::id);
    diesel::delete(vertices::table.filter(vertices::region_id.eq_any(old)))
        .execute(conn)?;
    diesel::delete(regions::table.filter(regions::result_id.eq(result_id)))
        .execute(conn)?;

    for ring in result_regions.unwrap_or(&[]) {
        let region: Region = diesel::insert_into(regions::table)
            .values(&NewRegion { grain_id, result_id: Some(result_id) })
            .get_result(conn)?;
        let rows: Vec<NewVertex> = ring
            .iter()
            .map(|&[x, y]| NewVertex { region_id: region.id, x, y })
            .collect();
        diesel::insert_into(vertices::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(())
}

/// The shared write path. Non-guest workers keep at most one result per
/// (grain, worker, track type) that no tutorial page refers to; guests
/// append and never disturb history.
fn save(conn: &mut PgConnection,
        worker_id: i32,
        worker_is_guest: bool,
        grain: &Grain,
        ft: FtType,
        payload: &CountPayload,
        result_value: i32,
        result_regions: Option<&[Vec<[i32; 2]>]>)
    -> Result<TrackCount>
{
    use schema::track_counts;

    let known = known_categories(conn)?;
    let staged = stage_points(payload, grain.image_width, grain.image_height, &known);

    conn.transaction(|conn| {
        let target: TrackCount = if worker_is_guest {
            diesel::insert_into(track_counts::table)
                .values(&NewTrackCount {
                    grain_id: grain.id,
                    ft_type: ft.as_str(),
                    worker_id,
                    result: result_value,
                })
                .get_result(conn)?
        } else {
            let anchored = tutorial::anchored_result_ids(conn)?;
            let existing: Vec<TrackCount> = track_counts::table
                .filter(track_counts::grain_id.eq(grain.id))
                .filter(track_counts::worker_id.eq(worker_id))
                .filter(track_counts::ft_type.eq(ft.as_str()))
                .order((track_counts::create_date.asc(), track_counts::id.asc()))
                .load(conn)?;

            let mut survivor = None;
            let mut stale = Vec::new();
            for row in existing {
                if anchored.contains(&row.id) {
                    continue;
                }
                if survivor.is_none() {
                    survivor = Some(row);
                } else {
                    stale.push(row.id);
                }
            }
            if !stale.is_empty() {
                diesel::delete(track_counts::table.filter(track_counts::id.eq_any(&stale)))
                    .execute(conn)?;
            }

            match survivor {
                Some(row) => diesel::update(track_counts::table.filter(track_counts::id.eq(row.id)))
                    .set((track_counts::result.eq(result_value),
                          track_counts::create_date.eq(Utc::now())))
                    .get_result(conn)?,
                None => diesel::insert_into(track_counts::table)
                    .values(&NewTrackCount {
                        grain_id: grain.id,
                        ft_type: ft.as_str(),
                        worker_id,
                        result: result_value,
                    })
                    .get_result(conn)?,
            }
        };

        replace_points(conn, target.id, &staged)?;
        replace_result_regions(conn, grain.id, target.id, result_regions)?;

        debug!("Saved result {} for worker {} on grain {} ({}): result = {}.",
               target.id, worker_id, grain.id, ft.as_str(), result_value);
        Ok(target)
    })
}

fn target_grain(conn: &mut PgConnection, sample_id: i32, grain_index: i32) -> Result<Grain> {
    match manage::get_grain_by_index(conn, sample_id, grain_index)? {
        Some(grain) => Ok(grain),
        None => bail!(ErrorKind::NotFound),
    }
}

/// A finished count. Replaces whatever the worker had on this grain and
/// track type before.
pub fn submit(conn: &mut PgConnection,
              sess: &UserSession,
              sample_id: i32,
              grain_index: i32,
              ft: FtType,
              payload: &CountPayload)
    -> Result<TrackCount>
{
    let grain = target_grain(conn, sample_id, grain_index)?;
    save(conn, sess.user_id, sess.is_guest(), &grain, ft, payload,
         payload.len() as i32, None)
}

/// An in-flight save. The assignment engine hands it back on the next
/// request as a resume.
pub fn save_partial(conn: &mut PgConnection,
                    sess: &UserSession,
                    sample_id: i32,
                    grain_index: i32,
                    ft: FtType,
                    payload: &CountPayload)
    -> Result<TrackCount>
{
    let grain = target_grain(conn, sample_id, grain_index)?;
    save(conn, sess.user_id, sess.is_guest(), &grain, ft, payload, -1, None)
}

/// The administrative submission path. A superuser may count on behalf of
/// any worker and attach counted-area regions to the result; everyone else
/// may only write as themselves.
pub fn submit_for(conn: &mut PgConnection,
                  sess: &UserSession,
                  worker: &User,
                  sample_id: i32,
                  grain_index: i32,
                  ft: FtType,
                  payload: &CountPayload,
                  result: Option<i32>,
                  result_regions: Option<&[Vec<[i32; 2]>]>)
    -> Result<TrackCount>
{
    if !sess.is_superuser && worker.id != sess.user_id {
        bail!(ErrorKind::AccessDenied);
    }
    let result_value = match result {
        None => payload.len() as i32,
        Some(-1) => -1,
        Some(n) if n == payload.len() as i32 => n,
        Some(n) => bail!(ErrorKind::InvalidInput(format!(
            "result = {} does not match the {} points supplied", n, payload.len()))),
    };
    let grain = target_grain(conn, sample_id, grain_index)?;
    save(conn, worker.id, worker.username == user::GUEST_USERNAME, &grain, ft,
         payload, result_value, result_regions)
}

fn anchored_conflict(e: diesel::result::Error) -> Error {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match e {
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
            ErrorKind::Conflict("a tutorial page is built on this result").into()
        }
        e => e.into(),
    }
}

/// Removing a result is its worker's (or a superuser's) call; to anyone
/// else it does not exist. A result a tutorial page is built on answers
/// with a conflict instead of going.
pub fn delete_result(conn: &mut PgConnection, sess: &UserSession, result_id: i32) -> Result<()> {
    use schema::track_counts;

    let count: TrackCount = match track_counts::table
        .filter(track_counts::id.eq(result_id))
        .first(conn)
        .optional()?
    {
        Some(count) => count,
        None => bail!(ErrorKind::NotFound),
    };
    if !sess.is_superuser && count.worker_id != sess.user_id {
        bail!(ErrorKind::NotFound);
    }
    // Points and result regions cascade with the row; the tutorial anchor
    // does not, which is what keeps anchored results around.
    diesel::delete(track_counts::table.filter(track_counts::id.eq(count.id)))
        .execute(conn)
        .map_err(anchored_conflict)?;
    info!("Deleted result {} of worker {} on grain {}.",
          count.id, count.worker_id, count.grain_id);
    Ok(())
}


#[test]
fn test_stage_points_from_latlngs() {
    let known = HashSet::new();
    let payload = CountPayload::LatLngs(vec![
        LatLng { lat: 0.3, lng: 0.25 },
        LatLng { lat: 0.0, lng: 0.0 },
    ]);
    let staged = stage_points(&payload, 1000, 800, &known);
    assert_eq!(staged.len(), 2);
    assert_eq!((staged[0].x_pixels, staged[0].y_pixels), (250, 500));
    assert_eq!((staged[1].x_pixels, staged[1].y_pixels), (0, 800));
    assert_eq!(staged[0].category, "track");
}

#[test]
fn test_stage_points_category_fallback() {
    let known: HashSet<String> =
        vec!["track".to_owned(), "inclusion".to_owned()].into_iter().collect();
    let payload = CountPayload::Points(vec![
        PointInput { x_pixels: 1, y_pixels: 2, category: Some("inclusion".into()),
                     comment: Some("dark".into()) },
        PointInput { x_pixels: 3, y_pixels: 4, category: Some("scratch".into()),
                     comment: None },
        PointInput { x_pixels: 5, y_pixels: 6, category: None, comment: None },
    ]);
    let staged = stage_points(&payload, 100, 100, &known);
    assert_eq!(staged[0].category, "inclusion");
    assert_eq!(staged[0].comment.as_deref(), Some("dark"));
    assert_eq!(staged[1].category, "track");
    assert_eq!(staged[2].category, "track");
}

#[test]
#[ignore]
fn test_db_resubmission_replaces_the_earlier_result() {
    use schema::{grain_points, track_counts};

    let mut conn = scratch_conn();
    let (user, sess) = scratch_user(&mut conn, "counter");
    let (_, sample) = scratch_sample(&mut conn, user.id, "SCR-1", 1);
    let grain = scratch_grain(&mut conn, sample.id, 1);

    let first = submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous,
                       &CountPayload::LatLngs(vec![LatLng { lat: 0.25, lng: 0.25 },
                                                   LatLng { lat: 0.5, lng: 0.5 }]))
        .unwrap();
    assert_eq!(first.result, 2);

    let second = submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous,
                        &CountPayload::Points(vec![
                            PointInput { x_pixels: 10, y_pixels: 20, category: None, comment: None },
                            PointInput { x_pixels: 30, y_pixels: 40, category: None, comment: None },
                            PointInput { x_pixels: 50, y_pixels: 60, category: None, comment: None },
                        ]))
        .unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.result, 3);
    assert!(second.create_date >= first.create_date);

    let rows: i64 = track_counts::table
        .filter(track_counts::grain_id.eq(grain.id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(rows, 1);

    let xs: Vec<i32> = grain_points::table
        .filter(grain_points::result_id.eq(first.id))
        .order(grain_points::x_pixels.asc())
        .select(grain_points::x_pixels)
        .load(&mut conn)
        .unwrap();
    assert_eq!(xs, vec![10, 30, 50]);
}

#[test]
#[ignore]
fn test_db_guest_results_append() {
    use schema::track_counts;

    let mut conn = scratch_conn();
    let (guest, guest_sess) = scratch_user(&mut conn, user::GUEST_USERNAME);
    assert!(guest_sess.is_guest());
    let (_, sample) = scratch_sample(&mut conn, guest.id, "SCR-2", 1);
    let grain = scratch_grain(&mut conn, sample.id, 1);

    let one = CountPayload::LatLngs(vec![LatLng { lat: 0.5, lng: 0.5 }]);
    submit(&mut conn, &guest_sess, sample.id, 1, FtType::Spontaneous, &one).unwrap();
    submit(&mut conn, &guest_sess, sample.id, 1, FtType::Spontaneous, &one).unwrap();

    let rows: i64 = track_counts::table
        .filter(track_counts::grain_id.eq(grain.id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(rows, 2);
}

#[test]
#[ignore]
fn test_db_tutorial_anchors_survive_resubmission() {
    use schema::{track_counts, tutorial_pages};

    let mut conn = scratch_conn();
    let (user, sess) = scratch_user(&mut conn, "counter");
    let (_, sample) = scratch_sample(&mut conn, user.id, "SCR-6", 1);
    let grain = scratch_grain(&mut conn, sample.id, 1);

    let one = CountPayload::LatLngs(vec![LatLng { lat: 0.5, lng: 0.5 }]);
    let anchored = submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous, &one).unwrap();
    diesel::insert_into(tutorial_pages::table)
        .values((tutorial_pages::result_id.eq(anchored.id),
                 tutorial_pages::page_type.eq("E"),
                 tutorial_pages::message.eq("Count every track in the view."),
                 tutorial_pages::active.eq(true)))
        .execute(&mut conn)
        .unwrap();

    let two = CountPayload::LatLngs(vec![LatLng { lat: 0.25, lng: 0.25 },
                                         LatLng { lat: 0.75, lng: 0.75 }]);
    let replacement = submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous, &two).unwrap();
    assert_ne!(replacement.id, anchored.id);

    let third = submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous, &one).unwrap();
    assert_eq!(third.id, replacement.id);

    let kept: TrackCount = track_counts::table
        .filter(track_counts::id.eq(anchored.id))
        .first(&mut conn)
        .unwrap();
    assert_eq!(kept.result, 1);

    let rows: i64 = track_counts::table
        .filter(track_counts::grain_id.eq(grain.id))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(rows, 2);
}

#[test]
#[ignore]
fn test_db_anchored_results_refuse_deletion() {
    use schema::{track_counts, tutorial_pages};

    let mut conn = scratch_conn();
    let (user, sess) = scratch_user(&mut conn, "counter");
    let (_, sample) = scratch_sample(&mut conn, user.id, "SCR-11", 1);
    scratch_grain(&mut conn, sample.id, 1);

    let one = CountPayload::LatLngs(vec![LatLng { lat: 0.5, lng: 0.5 }]);
    let anchored = submit(&mut conn, &sess, sample.id, 1, FtType::Spontaneous, &one).unwrap();
    let page_id: i32 = diesel::insert_into(tutorial_pages::table)
        .values((tutorial_pages::result_id.eq(anchored.id),
                 tutorial_pages::page_type.eq("E"),
                 tutorial_pages::message.eq("Count every track in the view."),
                 tutorial_pages::active.eq(true)))
        .returning(tutorial_pages::id)
        .get_result(&mut conn)
        .unwrap();

    match delete_result(&mut conn, &sess, anchored.id) {
        Err(Error(ErrorKind::Conflict(_), _)) => {}
        other => panic!("expected a conflict, got {:?}", other),
    }
    let still_there: i64 = track_counts::table.count().get_result(&mut conn).unwrap();
    assert_eq!(still_there, 1);

    // With the page gone the result may go too.
    diesel::delete(tutorial_pages::table.filter(tutorial_pages::id.eq(page_id)))
        .execute(&mut conn)
        .unwrap();
    delete_result(&mut conn, &sess, anchored.id).unwrap();
    let left: i64 = track_counts::table.count().get_result(&mut conn).unwrap();
    assert_eq!(left, 0);
}
