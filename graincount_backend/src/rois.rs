use super::*;
use geometry::{LatLng, Matrix2x3};
use naming::FtType;
use serde::{Serialize, Deserialize};

/// One polygon of interest as it appears on the wire. `shift` echoes the
/// grain-level mica shift for every region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiRegion {
    pub shift: [i32; 2],
    pub vertices: Vec<[i32; 2]>,
}

/// The ROI bundle served for a grain: canvas size, stage metadata, regions
/// and the optional mica transform.
#[derive(Debug, Serialize)]
pub struct RoisBundle {
    pub grain_id: i32,
    pub image_width: i32,
    pub image_height: i32,
    pub scale_x: Option<f64>,
    pub scale_y: Option<f64>,
    pub stage_x: Option<f64>,
    pub stage_y: Option<f64>,
    pub mica_stage_x: Option<f64>,
    pub mica_stage_y: Option<f64>,
    pub regions: Vec<RoiRegion>,
    pub mica_transform_matrix: Option<Matrix2x3>,
}

pub fn transform2d_as_matrix(t: &Transform2D) -> Matrix2x3 {
    [[t.x0, t.y0, t.t0], [t.x1, t.y1, t.t1]]
}

pub fn transform_matrix(conn: &mut PgConnection, grain: &Grain) -> Result<Option<Matrix2x3>> {
    use schema::transforms;

    let id = match grain.transform_id {
        Some(id) => id,
        None => return Ok(None),
    };
    let t: Transform2D = transforms::table
        .filter(transforms::id.eq(id))
        .first(conn)
        .chain_err(|| "Couldn't get the mica transform!")?;
    Ok(Some(transform2d_as_matrix(&t)))
}

/// The grain's baseline regions, in id order. User-drawn regions hang off a
/// result row instead.
fn regions_generic(conn: &mut PgConnection, grain_id: i32) -> Result<Vec<Region>> {
    use schema::regions;

    Ok(regions::table
        .filter(regions::grain_id.eq(grain_id))
        .filter(regions::result_id.is_null())
        .order(regions::id.asc())
        .load(conn)?)
}

/// The baseline ROI as pixel rings, one per region.
pub fn baseline_rings(conn: &mut PgConnection, grain_id: i32) -> Result<Vec<Vec<(f64, f64)>>> {
    let regions = regions_generic(conn, grain_id)?;
    let region_ids: Vec<i32> = regions.iter().map(|r| r.id).collect();
    let vertices = vertices_by_region(conn, &region_ids)?;

    Ok(regions
        .iter()
        .map(|region| {
            vertices
                .iter()
                .filter(|v| v.region_id == region.id)
                .map(|v| (f64::from(v.x), f64::from(v.y)))
                .collect()
        })
        .collect())
}

/// The regions attached to the user's most recent result for the grain,
/// falling back to the baseline when there are none.
fn regions_for_user(conn: &mut PgConnection,
                    grain_id: i32,
                    user_id: i32)
                    -> Result<Vec<Region>> {
    use schema::{regions, track_counts};

    let latest: Option<TrackCount> = track_counts::table
        .filter(track_counts::grain_id.eq(grain_id))
        .filter(track_counts::worker_id.eq(user_id))
        .order((track_counts::create_date.desc(), track_counts::id.desc()))
        .first(conn)
        .optional()?;

    if let Some(latest) = latest {
        let own: Vec<Region> = regions::table
            .filter(regions::grain_id.eq(grain_id))
            .filter(regions::result_id.eq(latest.id))
            .order(regions::id.asc())
            .load(conn)?;
        if !own.is_empty() {
            return Ok(own);
        }
    }
    regions_generic(conn, grain_id)
}

fn vertices_by_region(conn: &mut PgConnection,
                      region_ids: &[i32])
                      -> Result<Vec<Vertex>> {
    use schema::vertices;

    Ok(vertices::table
        .filter(vertices::region_id.eq_any(region_ids))
        .order((vertices::region_id.asc(), vertices::id.asc()))
        .load(conn)?)
}

fn bundle_from_regions(conn: &mut PgConnection,
                       grain: &Grain,
                       regions: Vec<Region>)
                       -> Result<RoisBundle> {
    let region_ids: Vec<i32> = regions.iter().map(|r| r.id).collect();
    let vertices = vertices_by_region(conn, &region_ids)?;

    let wire_regions = regions
        .iter()
        .map(|region| {
            RoiRegion {
                shift: [grain.shift_x, grain.shift_y],
                vertices: vertices
                    .iter()
                    .filter(|v| v.region_id == region.id)
                    .map(|v| [v.x, v.y])
                    .collect(),
            }
        })
        .collect();

    Ok(RoisBundle {
        grain_id: grain.id,
        image_width: grain.image_width,
        image_height: grain.image_height,
        scale_x: grain.scale_x,
        scale_y: grain.scale_y,
        stage_x: grain.stage_x,
        stage_y: grain.stage_y,
        mica_stage_x: grain.mica_stage_x,
        mica_stage_y: grain.mica_stage_y,
        regions: wire_regions,
        mica_transform_matrix: transform_matrix(conn, grain)?,
    })
}

pub fn get_rois(conn: &mut PgConnection, grain: &Grain) -> Result<RoisBundle> {
    let regions = regions_generic(conn, grain.id)?;
    bundle_from_regions(conn, grain, regions)
}

pub fn get_rois_user(conn: &mut PgConnection,
                     grain: &Grain,
                     user_id: i32)
                     -> Result<RoisBundle> {
    let regions = regions_for_user(conn, grain.id, user_id)?;
    bundle_from_regions(conn, grain, regions)
}

/// Bundles for every grain the caller may see, optionally narrowed to
/// projects, samples (by id or name) and grain ids.
pub fn get_roiss(conn: &mut PgConnection,
                 sess: &UserSession,
                 projects: &[String],
                 samples: &[String],
                 grain_ids: &[i32])
                 -> Result<Vec<RoisBundle>> {
    use schema::{grains, projects as projects_t, samples as samples_t};

    let mut project_ids = Vec::with_capacity(projects.len());
    for key in projects {
        if let Some(p) = manage::lookup_project(conn, key)? {
            project_ids.push(p.id);
        }
    }
    let mut sample_ids = Vec::with_capacity(samples.len());
    for key in samples {
        if let Some(s) = manage::lookup_sample(conn, key)? {
            sample_ids.push(s.id);
        }
    }

    let mut query = grains::table
        .inner_join(samples_t::table.inner_join(projects_t::table))
        .select(grains::all_columns)
        .into_boxed();

    if !sess.is_superuser {
        query = query.filter(projects_t::creator_id
            .eq(sess.user_id)
            .or(samples_t::public.eq(true)));
    }
    if !projects.is_empty() {
        query = query.filter(samples_t::project_id.eq_any(project_ids));
    }
    if !samples.is_empty() {
        query = query.filter(grains::sample_id.eq_any(sample_ids));
    }
    if !grain_ids.is_empty() {
        query = query.filter(grains::id.eq_any(grain_ids.to_vec()));
    }

    let grains: Vec<Grain> = query.order(grains::id.asc()).load(conn)?;

    let mut bundles = Vec::with_capacity(grains.len());
    for grain in &grains {
        bundles.push(get_rois(conn, grain)?);
    }
    Ok(bundles)
}

/// Replaces the grain's baseline regions with the given ones. The grain's
/// stored shift follows the first region's.
pub fn save_regions(conn: &mut PgConnection,
                    grain: &Grain,
                    new_regions: &[RoiRegion])
                    -> Result<()> {
    use schema::{grains, regions, vertices};

    conn.transaction(|conn| -> Result<()> {
        let baseline = regions::table
            .filter(regions::grain_id.eq(grain.id))
            .filter(regions::result_id.is_null())
            .select(regions::id);

        diesel::delete(vertices::table.filter(vertices::region_id.eq_any(baseline)))
            .execute(conn)?;
        diesel::delete(
            regions::table
                .filter(regions::grain_id.eq(grain.id))
                .filter(regions::result_id.is_null()),
        ).execute(conn)?;

        for r in new_regions {
            let region: Region = diesel::insert_into(regions::table)
                .values(&NewRegion { grain_id: grain.id, result_id: None })
                .get_result(conn)?;

            let new_vertices: Vec<NewVertex> = r.vertices
                .iter()
                .map(|v| NewVertex { region_id: region.id, x: v[0], y: v[1] })
                .collect();
            diesel::insert_into(vertices::table)
                .values(&new_vertices)
                .execute(conn)?;
        }

        if let Some(first) = new_regions.first() {
            diesel::update(grains::table.filter(grains::id.eq(grain.id)))
                .set((grains::shift_x.eq(first.shift[0]),
                      grains::shift_y.eq(first.shift[1])))
                .execute(conn)?;
        }

        Ok(())
    })
}

/// Per-region latlng rings for the counting canvas, with the mica mapping
/// and shift applied for induced views. `None` when a region has no
/// vertices; the canvas can't draw a partial ROI set.
pub fn load_rois_latlngs(conn: &mut PgConnection,
                         grain: &Grain,
                         ft_type: FtType)
                         -> Result<Option<Vec<Vec<LatLng>>>> {
    let matrix = transform_matrix(conn, grain)?;
    let regions = regions_generic(conn, grain.id)?;
    let region_ids: Vec<i32> = regions.iter().map(|r| r.id).collect();
    let vertices = vertices_by_region(conn, &region_ids)?;

    let w = f64::from(grain.image_width);
    let (shift_x, shift_y) = match ft_type {
        FtType::Induced => (f64::from(grain.shift_x) / w, f64::from(grain.shift_y) / w),
        FtType::Spontaneous => (0.0, 0.0),
    };

    let mut rois = Vec::with_capacity(regions.len());
    for region in &regions {
        let mut ring = Vec::new();
        for v in vertices.iter().filter(|v| v.region_id == region.id) {
            let mut ll = geometry::pixels_to_latlng(f64::from(v.x),
                                                    f64::from(v.y),
                                                    grain.image_width,
                                                    grain.image_height);
            if ft_type == FtType::Induced {
                ll = geometry::mica_latlng(ll, matrix.as_ref());
            }
            ring.push(LatLng { lat: ll.lat + shift_y, lng: ll.lng + shift_x });
        }
        if ring.is_empty() {
            return Ok(None);
        }
        rois.push(ring);
    }
    Ok(Some(rois))
}


#[test]
fn test_roi_region_wire_shape() {
    let region: RoiRegion =
        serde_json::from_str(r#"{"shift":[4,-2],"vertices":[[10,10],[990,10],[500,790]]}"#)
            .unwrap();
    assert_eq!(region.shift, [4, -2]);
    assert_eq!(region.vertices.len(), 3);
    assert_eq!(region.vertices[2], [500, 790]);
}

#[test]
fn test_bundle_serializes_matrix_rows() {
    let bundle = RoisBundle {
        grain_id: 7,
        image_width: 1000,
        image_height: 800,
        scale_x: None,
        scale_y: None,
        stage_x: None,
        stage_y: None,
        mica_stage_x: None,
        mica_stage_y: None,
        regions: vec![],
        mica_transform_matrix: Some([[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
    };
    let json = serde_json::to_value(&bundle).unwrap();
    assert_eq!(json["grain_id"], 7);
    assert_eq!(json["mica_transform_matrix"][0][0], -1.0);
    assert_eq!(json["scale_x"], serde_json::Value::Null);
}
