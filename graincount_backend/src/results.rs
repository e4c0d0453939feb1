use super::*;
use authz::{Op, Scope};
use chrono::{DateTime, Utc};
use geometry::{self, LatLng};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerOut {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
}

impl From<User> for WorkerOut {
    fn from(u: User) -> Self {
        WorkerOut { id: u.id, username: u.username, email: u.email }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WirePoint {
    pub x_pixels: i32,
    pub y_pixels: i32,
    pub category: String,
    pub comment: Option<String>,
}

impl From<GrainPoint> for WirePoint {
    fn from(p: GrainPoint) -> Self {
        WirePoint {
            x_pixels: p.x_pixels,
            y_pixels: p.y_pixels,
            category: p.category,
            comment: p.comment,
        }
    }
}

/// One result in the pixel shape.
#[derive(Debug, Serialize)]
pub struct CountOut {
    pub id: i32,
    pub grain: i32,
    pub ft_type: String,
    pub worker: WorkerOut,
    pub result: i32,
    pub create_date: DateTime<Utc>,
    pub regions: Option<Vec<Vec<[i32; 2]>>>,
    pub grainpoints: Vec<WirePoint>,
}

/// One result in the latlng shape. Only `track` points are projected.
#[derive(Debug, Serialize)]
pub struct CountLatLngs {
    pub id: i32,
    pub grain: i32,
    pub ft_type: String,
    pub worker: WorkerOut,
    pub result: i32,
    pub create_date: DateTime<Utc>,
    pub regions: Option<Vec<Vec<[i32; 2]>>>,
    pub latlngs: Vec<LatLng>,
}

#[derive(Debug, Default)]
pub struct CountFilter<'a> {
    /// Include in-flight results (`result = -1`) as well.
    pub all: bool,
    /// Sample id or name.
    pub sample: Option<&'a str>,
    /// Grain index within the sample.
    pub grain_index: Option<i32>,
    /// Worker username.
    pub worker: Option<&'a str>,
}

struct Loaded {
    count: TrackCount,
    grain: Grain,
    worker: WorkerOut,
    points: Vec<GrainPoint>,
    regions: Option<Vec<Vec<[i32; 2]>>>,
}

/// Results the caller may see: their own, those on their projects, or all
/// of them for a superuser.
fn load_visible<'a>(conn: &mut PgConnection,
                    sess: &UserSession,
                    filter: &CountFilter<'a>)
                    -> Result<Vec<Loaded>> {
    use schema::{grain_points, grains, projects, regions, samples, track_counts, users,
                 vertices};

    let mut query = track_counts::table
        .inner_join(grains::table.inner_join(samples::table.inner_join(projects::table)))
        .select((track_counts::all_columns, grains::all_columns))
        .into_boxed();

    if !sess.is_superuser {
        query = query.filter(track_counts::worker_id
            .eq(sess.user_id)
            .or(projects::creator_id.eq(sess.user_id)));
    }
    if !filter.all {
        query = query.filter(track_counts::result.ge(0));
    }
    if let Some(key) = filter.sample {
        match key.parse::<i32>() {
            Ok(id) => query = query.filter(samples::id.eq(id)),
            Err(_) => query = query.filter(samples::sample_name.ilike(key.to_owned())),
        }
    }
    if let Some(index) = filter.grain_index {
        query = query.filter(grains::index.eq(index));
    }
    if let Some(name) = filter.worker {
        let worker_ids = users::table
            .filter(users::username.eq(name.to_owned()))
            .select(users::id);
        query = query.filter(track_counts::worker_id.eq_any(worker_ids));
    }

    let rows: Vec<(TrackCount, Grain)> = query
        .order((grains::sample_id.asc(), grains::index.asc(), track_counts::id.asc()))
        .load(conn)?;

    let result_ids: Vec<i32> = rows.iter().map(|(c, _)| c.id).collect();

    let mut points_by: HashMap<i32, Vec<GrainPoint>> = HashMap::new();
    let points: Vec<GrainPoint> = grain_points::table
        .filter(grain_points::result_id.eq_any(&result_ids))
        .order(grain_points::id.asc())
        .load(conn)?;
    for p in points {
        points_by.entry(p.result_id).or_default().push(p);
    }

    let nullable_ids: Vec<Option<i32>> = result_ids.iter().map(|&id| Some(id)).collect();
    let result_regions: Vec<Region> = regions::table
        .filter(regions::result_id.eq_any(nullable_ids))
        .order(regions::id.asc())
        .load(conn)?;
    let region_ids: Vec<i32> = result_regions.iter().map(|r| r.id).collect();
    let region_vertices: Vec<Vertex> = vertices::table
        .filter(vertices::region_id.eq_any(region_ids))
        .order((vertices::region_id.asc(), vertices::id.asc()))
        .load(conn)?;
    let mut regions_by: HashMap<i32, Vec<Vec<[i32; 2]>>> = HashMap::new();
    for region in &result_regions {
        let ring = region_vertices
            .iter()
            .filter(|v| v.region_id == region.id)
            .map(|v| [v.x, v.y])
            .collect();
        if let Some(result_id) = region.result_id {
            regions_by.entry(result_id).or_default().push(ring);
        }
    }

    let worker_ids: Vec<i32> = rows.iter().map(|(c, _)| c.worker_id).collect();
    let workers: HashMap<i32, WorkerOut> = users::table
        .filter(users::id.eq_any(worker_ids))
        .load::<User>(conn)?
        .into_iter()
        .map(|u| (u.id, WorkerOut::from(u)))
        .collect();

    let mut loaded = Vec::with_capacity(rows.len());
    for (count, grain) in rows {
        let worker = match workers.get(&count.worker_id) {
            Some(w) => w.clone(),
            None => bail!(ErrorKind::DatabaseOdd("a result refers to a missing worker")),
        };
        loaded.push(Loaded {
            worker,
            points: points_by.remove(&count.id).unwrap_or_default(),
            regions: regions_by.remove(&count.id),
            grain,
            count,
        });
    }
    Ok(loaded)
}

pub fn list_counts<'a>(conn: &mut PgConnection,
                       sess: &UserSession,
                       filter: &CountFilter<'a>)
                       -> Result<Vec<CountOut>> {
    Ok(load_visible(conn, sess, filter)?
        .into_iter()
        .map(|l| CountOut {
            id: l.count.id,
            grain: l.grain.id,
            ft_type: l.count.ft_type,
            worker: l.worker,
            result: l.count.result,
            create_date: l.count.create_date,
            regions: l.regions,
            grainpoints: l.points.into_iter().map(WirePoint::from).collect(),
        })
        .collect())
}

pub fn list_counts_latlngs<'a>(conn: &mut PgConnection,
                               sess: &UserSession,
                               filter: &CountFilter<'a>)
                               -> Result<Vec<CountLatLngs>> {
    Ok(load_visible(conn, sess, filter)?
        .into_iter()
        .map(|l| {
            let (w, h) = (l.grain.image_width, l.grain.image_height);
            CountLatLngs {
                id: l.count.id,
                grain: l.grain.id,
                ft_type: l.count.ft_type,
                worker: l.worker,
                result: l.count.result,
                create_date: l.count.create_date,
                regions: l.regions,
                latlngs: l.points
                    .iter()
                    .filter(|p| p.category == counts::DEFAULT_CATEGORY)
                    .map(|p| geometry::pixels_to_latlng(
                        f64::from(p.x_pixels), f64::from(p.y_pixels), w, h))
                    .collect(),
            }
        })
        .collect())
}

/// The latlng projection of a single result's `track` points. Resumed
/// partials are redrawn from this.
pub fn to_latlngs(conn: &mut PgConnection, result_id: i32) -> Result<Vec<LatLng>> {
    use schema::{grain_points, grains, track_counts};

    let grain: Grain = match track_counts::table
        .inner_join(grains::table)
        .filter(track_counts::id.eq(result_id))
        .select(grains::all_columns)
        .first(conn)
        .optional()?
    {
        Some(grain) => grain,
        None => bail!(ErrorKind::NotFound),
    };
    let points: Vec<GrainPoint> = grain_points::table
        .filter(grain_points::result_id.eq(result_id))
        .filter(grain_points::category.eq(counts::DEFAULT_CATEGORY))
        .order(grain_points::id.asc())
        .load(conn)?;

    Ok(points
        .iter()
        .map(|p| geometry::pixels_to_latlng(
            f64::from(p.x_pixels), f64::from(p.y_pixels),
            grain.image_width, grain.image_height))
        .collect())
}

/// One row of the staff results table.
#[derive(Debug, Serialize)]
pub struct ReportRow {
    pub project_name: String,
    pub sample_name: String,
    pub grain_index: i32,
    pub ft_type: String,
    pub result: i32,
    pub worker: String,
    pub create_date: DateTime<Utc>,
}

/// Flat listing of submitted counts for the given samples. Staff only;
/// non-superusers see their own projects' rows.
pub fn report_rows(conn: &mut PgConnection,
                   sess: &UserSession,
                   sample_ids: &[i32])
                   -> Result<Vec<ReportRow>> {
    use schema::{grains, projects, samples, track_counts, users};

    if !sess.is_staff && !sess.is_superuser {
        bail!(ErrorKind::AccessDenied);
    }

    let mut query = track_counts::table
        .inner_join(grains::table.inner_join(samples::table.inner_join(projects::table)))
        .inner_join(users::table)
        .filter(grains::sample_id.eq_any(sample_ids.to_vec()))
        .filter(track_counts::result.ge(0))
        .select((projects::project_name, samples::sample_name, grains::index,
                 track_counts::ft_type, track_counts::result, users::username,
                 track_counts::create_date))
        .into_boxed();

    if !sess.is_superuser {
        query = query.filter(projects::creator_id.eq(sess.user_id));
    }

    let rows: Vec<(String, String, i32, String, i32, String, DateTime<Utc>)> = query
        .order((samples::id.asc(), grains::index.asc(), track_counts::id.asc()))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(project_name, sample_name, grain_index, ft_type, result, worker,
               create_date)| {
            ReportRow {
                project_name,
                sample_name,
                grain_index,
                ft_type,
                result,
                worker,
                create_date,
            }
        })
        .collect())
}

/// Per-grain aggregation for the owner's sample report.
#[derive(Debug, Serialize)]
pub struct GrainSummary {
    pub grain_index: i32,
    pub area_pixels: f64,
    pub area_mm2: Option<f64>,
    pub workers: Vec<String>,
    pub counts: Vec<i32>,
    pub dates: Vec<DateTime<Utc>>,
}

pub fn sample_report(conn: &mut PgConnection,
                     sess: &UserSession,
                     sample_key: &str)
                     -> Result<Vec<GrainSummary>> {
    use schema::{grains, track_counts, users};

    let sample = match manage::lookup_sample(conn, sample_key)? {
        Some(sample) => sample,
        None => bail!(ErrorKind::NotFound),
    };
    authz::require(conn, Some(sess), Op::Mutate, Scope::Sample(sample.id))?;
    let ft = assignment::sample_ft_type(&sample);

    let sample_grains: Vec<Grain> = grains::table
        .filter(grains::sample_id.eq(sample.id))
        .order(grains::index.asc())
        .load(conn)?;

    let mut report = Vec::with_capacity(sample_grains.len());
    for grain in &sample_grains {
        // Net of holes, like point membership.
        let rings = rois::baseline_rings(conn, grain.id)?;
        let area_pixels = geometry::regions_area(&rings);
        let area_mm2 = geometry::area_mm2(area_pixels, grain.scale_x, grain.scale_y);

        let contributions: Vec<(String, i32, DateTime<Utc>)> = track_counts::table
            .inner_join(users::table)
            .filter(track_counts::grain_id.eq(grain.id))
            .filter(track_counts::ft_type.eq(ft.as_str()))
            .filter(track_counts::result.ge(0))
            .order(track_counts::create_date.asc())
            .select((users::username, track_counts::result, track_counts::create_date))
            .load(conn)?;

        let mut workers = Vec::with_capacity(contributions.len());
        let mut counts = Vec::with_capacity(contributions.len());
        let mut dates = Vec::with_capacity(contributions.len());
        for (worker, count, date) in contributions {
            workers.push(worker);
            counts.push(count);
            dates.push(date);
        }
        report.push(GrainSummary {
            grain_index: grain.index,
            area_pixels,
            area_mm2,
            workers,
            counts,
            dates,
        });
    }
    Ok(report)
}

fn visible_track_latlngs(points: &[GrainPoint],
                         rings: &[Vec<(f64, f64)>],
                         width: i32,
                         height: i32)
                         -> Vec<LatLng> {
    points
        .iter()
        .filter(|p| p.category == counts::DEFAULT_CATEGORY)
        .filter(|p| geometry::point_in_regions(
            (f64::from(p.x_pixels), f64::from(p.y_pixels)), rings))
        .map(|p| geometry::pixels_to_latlng(
            f64::from(p.x_pixels), f64::from(p.y_pixels), width, height))
        .collect()
}

/// Marks shown on the public page of a grain: the project creator's current
/// count, cut down to `track` points that fall inside the ROI. Needs no
/// session; the sample must be flagged public.
pub fn public_markers(conn: &mut PgConnection,
                      sample_key: &str,
                      grain_index: i32)
                      -> Result<Vec<LatLng>> {
    use schema::{grain_points, projects, track_counts};

    let sample = match manage::lookup_sample(conn, sample_key)? {
        Some(sample) if sample.public => sample,
        _ => bail!(ErrorKind::NotFound),
    };
    let grain = match manage::get_grain_by_index(conn, sample.id, grain_index)? {
        Some(grain) => grain,
        None => bail!(ErrorKind::NotFound),
    };
    let project: Project = projects::table
        .filter(projects::id.eq(sample.project_id))
        .first(conn)?;
    let ft = assignment::sample_ft_type(&sample);

    let latest: Option<TrackCount> = track_counts::table
        .filter(track_counts::grain_id.eq(grain.id))
        .filter(track_counts::worker_id.eq(project.creator_id))
        .filter(track_counts::ft_type.eq(ft.as_str()))
        .filter(track_counts::result.ge(0))
        .order((track_counts::create_date.desc(), track_counts::id.desc()))
        .first(conn)
        .optional()?;
    let latest = match latest {
        Some(latest) => latest,
        None => return Ok(Vec::new()),
    };

    let points: Vec<GrainPoint> = grain_points::table
        .filter(grain_points::result_id.eq(latest.id))
        .order(grain_points::id.asc())
        .load(conn)?;
    let rings = rois::baseline_rings(conn, grain.id)?;

    Ok(visible_track_latlngs(&points, &rings, grain.image_width, grain.image_height))
}


#[cfg(test)]
fn point(x: i32, y: i32, category: &str) -> GrainPoint {
    GrainPoint {
        id: 0,
        result_id: 0,
        x_pixels: x,
        y_pixels: y,
        category: category.into(),
        comment: None,
    }
}

#[test]
fn test_visible_track_latlngs_clips_to_roi() {
    // 100x100 outer ring with a 40..60 square hole.
    let rings = vec![
        vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
        vec![(40.0, 40.0), (60.0, 40.0), (60.0, 60.0), (40.0, 60.0)],
    ];
    let points = vec![
        point(120, 20, "track"),
        point(50, 50, "track"),
        point(20, 20, "track"),
    ];
    let lls = visible_track_latlngs(&points, &rings, 100, 100);
    assert_eq!(lls.len(), 1);
    assert_eq!(lls[0], geometry::pixels_to_latlng(20.0, 20.0, 100, 100));
}

#[test]
fn test_visible_track_latlngs_skips_other_categories() {
    let rings = vec![vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]];
    let points = vec![point(10, 10, "inclusion"), point(20, 20, "track")];
    let lls = visible_track_latlngs(&points, &rings, 100, 100);
    assert_eq!(lls.len(), 1);
}
