use super::*;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use graincount::authz::{self, Op, Scope};
use graincount::counts::{self, CountPayload, PointInput};
use graincount::geometry::LatLng;
use graincount::ingest;
use graincount::manage::{self, ProjectInput, SampleInput};
use graincount::models::{Grain, ImageInfo, Project, Sample, TrackCount, UpdateGrain, UpdateImage,
                         UpdateProject, UpdateSample};
use graincount::naming::FtType;
use graincount::results::{self, CountFilter};
use graincount::rois;
use graincount::user;

// PROJECTS

pub async fn list_projects(req: HttpRequest,
                           pool: web::Data<ConnectionPool>,
                           config: web::Data<Config>)
                           -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let projects = web::block(move || -> Result<Vec<Project>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::list_projects(&mut conn, &sess)
    })
    .await??;
    Ok(HttpResponse::Ok().json(projects))
}

pub async fn create_project(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>,
                            body: web::Json<ProjectInput>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let project = web::block(move || -> Result<Project> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::create_project(&mut conn, &sess, &body)
    })
    .await??;
    Ok(HttpResponse::Created().json(project))
}

/// Project detail carries the ids of the samples the caller may see in it.
pub async fn get_project(req: HttpRequest,
                         pool: web::Data<ConnectionPool>,
                         config: web::Data<Config>,
                         path: web::Path<i32>)
                         -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let detail = web::block(move || -> Result<serde_json::Value> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let project = manage::get_project(&mut conn, Some(&sess), id)?;
        let sample_ids: Vec<i32> = manage::list_samples(&mut conn, &sess, Some(&id.to_string()))?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut value = serde_json::to_value(&project)?;
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert("samples".into(), json!(sample_ids));
        }
        Ok(value)
    })
    .await??;
    Ok(HttpResponse::Ok().json(detail))
}

pub async fn update_project(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>,
                            path: web::Path<i32>,
                            body: web::Json<UpdateProject>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let project = web::block(move || -> Result<Project> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::update_project(&mut conn, Some(&sess), id, &body)
    })
    .await??;
    Ok(HttpResponse::Ok().json(project))
}

pub async fn remove_project(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>,
                            path: web::Path<i32>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::remove_project(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::NoContent().finish())
}

// SAMPLES

#[derive(Debug, Deserialize)]
pub struct SampleListQuery {
    project: Option<String>,
    in_project: Option<String>,
}

pub async fn list_samples(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          query: web::Query<SampleListQuery>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let q = query.into_inner();
    let samples = web::block(move || -> Result<Vec<Sample>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let project = q.project.as_deref().or(q.in_project.as_deref());
        manage::list_samples(&mut conn, &sess, project)
    })
    .await??;
    Ok(HttpResponse::Ok().json(samples))
}

pub async fn create_sample(req: HttpRequest,
                           pool: web::Data<ConnectionPool>,
                           config: web::Data<Config>,
                           body: web::Json<SampleInput>)
                           -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let sample = web::block(move || -> Result<Sample> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::create_sample(&mut conn, Some(&sess), &body)
    })
    .await??;
    Ok(HttpResponse::Created().json(sample))
}

pub async fn get_sample(req: HttpRequest,
                        pool: web::Data<ConnectionPool>,
                        config: web::Data<Config>,
                        path: web::Path<i32>)
                        -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let sample = web::block(move || -> Result<Sample> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::get_sample(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::Ok().json(sample))
}

pub async fn update_sample(req: HttpRequest,
                           pool: web::Data<ConnectionPool>,
                           config: web::Data<Config>,
                           path: web::Path<i32>,
                           body: web::Json<UpdateSample>)
                           -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let sample = web::block(move || -> Result<Sample> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::update_sample(&mut conn, Some(&sess), id, &body)
    })
    .await??;
    Ok(HttpResponse::Ok().json(sample))
}

pub async fn remove_sample(req: HttpRequest,
                           pool: web::Data<ConnectionPool>,
                           config: web::Data<Config>,
                           path: web::Path<i32>)
                           -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::remove_sample(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::NoContent().finish())
}

/// Per-grain tally of everything counted on a sample. The sample is
/// addressed by id or name.
pub async fn sample_report(req: HttpRequest,
                           pool: web::Data<ConnectionPool>,
                           config: web::Data<Config>,
                           path: web::Path<String>)
                           -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let key = path.into_inner();
    let report = web::block(move || -> Result<Vec<results::GrainSummary>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        results::sample_report(&mut conn, &sess, &key)
    })
    .await??;
    Ok(HttpResponse::Ok().json(report))
}

// GRAINS

pub async fn list_grains(req: HttpRequest,
                         pool: web::Data<ConnectionPool>,
                         config: web::Data<Config>,
                         path: web::Path<i32>)
                         -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let sample_id = path.into_inner();
    let grains = web::block(move || -> Result<Vec<Grain>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::list_grains(&mut conn, Some(&sess), sample_id)
    })
    .await??;
    Ok(HttpResponse::Ok().json(grains))
}

/// A whole-grain upload: stack images, metadata and rois.json in one
/// multipart request. A plain `index` field picks the grain number,
/// otherwise the next free one is taken.
pub async fn create_grain(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>,
                          payload: Multipart)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let sample_id = path.into_inner();
    let files = read_multipart(payload, config.upload_cap).await?;
    let grain = web::block(move || -> Result<Grain> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let sample = manage::get_sample(&mut conn, Some(&sess), sample_id)?;
        authz::require(&mut conn, Some(&sess), Op::Mutate, Scope::Sample(sample.id))?;

        let mut requested_index = None;
        let mut upload = Vec::with_capacity(files.len());
        for f in files {
            if f.field == "index" && f.file_name.is_none() {
                let text = String::from_utf8_lossy(&f.data).into_owned();
                let index = text.trim().parse().map_err(|_| {
                    ErrorKind::InvalidInput(format!("index = {:?} is not a number", text))
                })?;
                requested_index = Some(index);
            } else if f.field == "rois" {
                // The descriptor is keyed by its field name; clients need
                // not name the file itself.
                upload.push(("rois.json".to_owned(), f.data));
            } else {
                upload.push((f.name().to_owned(), f.data));
            }
        }
        ingest::new_grain(&mut conn, &sample, requested_index, &upload)
    })
    .await??;
    Ok(HttpResponse::Created().json(grain))
}

pub async fn get_grain(req: HttpRequest,
                       pool: web::Data<ConnectionPool>,
                       config: web::Data<Config>,
                       path: web::Path<i32>)
                       -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let grain = web::block(move || -> Result<Grain> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::get_grain(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::Ok().json(grain))
}

pub async fn update_grain(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>,
                          body: web::Json<UpdateGrain>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let grain = web::block(move || -> Result<Grain> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::update_grain(&mut conn, Some(&sess), id, &body)
    })
    .await??;
    Ok(HttpResponse::Ok().json(grain))
}

pub async fn remove_grain(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::remove_grain(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::NoContent().finish())
}

// ROIS

#[derive(Debug, Deserialize)]
pub struct RoisQuery {
    worker: Option<i32>,
}

/// The grain's counting regions. With `?worker=`, the regions attached to
/// that worker's current result instead of the baseline ones; seeing
/// another worker's takes owner rights.
pub async fn get_grain_rois(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>,
                            path: web::Path<i32>,
                            query: web::Query<RoisQuery>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let worker = query.into_inner().worker;
    let bundle = web::block(move || -> Result<rois::RoisBundle> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let grain = manage::get_grain(&mut conn, Some(&sess), id)?;
        match worker {
            Some(worker) if worker != sess.user_id => {
                authz::require(&mut conn, Some(&sess), Op::Mutate, Scope::Grain(grain.id))?;
                rois::get_rois_user(&mut conn, &grain, worker)
            }
            Some(worker) => rois::get_rois_user(&mut conn, &grain, worker),
            None => rois::get_rois(&mut conn, &grain),
        }
    })
    .await??;
    Ok(HttpResponse::Ok().json(bundle))
}

/// Replaces the grain's rois.json wholesale. The body is the raw
/// descriptor file.
pub async fn replace_grain_rois(req: HttpRequest,
                                pool: web::Data<ConnectionPool>,
                                config: web::Data<Config>,
                                path: web::Path<i32>,
                                body: web::Bytes)
                                -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let grain = web::block(move || -> Result<Grain> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let grain = manage::get_grain(&mut conn, Some(&sess), id)?;
        authz::require(&mut conn, Some(&sess), Op::Mutate, Scope::Grain(grain.id))?;
        ingest::replace_rois(&mut conn, &grain, &body)
    })
    .await??;
    Ok(HttpResponse::Ok().json(grain))
}

#[derive(Debug, Deserialize)]
pub struct RoissQuery {
    projects: Option<String>,
    samples: Option<String>,
    grains: Option<String>,
}

fn split_keys(joined: &Option<String>) -> Vec<String> {
    joined.as_deref()
        .map(|s| {
            s.split_terminator(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// ROI bundles across everything the caller may see, narrowed by
/// comma-separated `projects`, `samples` and `grains` lists.
pub async fn list_rois(req: HttpRequest,
                       pool: web::Data<ConnectionPool>,
                       config: web::Data<Config>,
                       query: web::Query<RoissQuery>)
                       -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let q = query.into_inner();
    let bundles = web::block(move || -> Result<Vec<rois::RoisBundle>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let projects = split_keys(&q.projects);
        let samples = split_keys(&q.samples);
        let mut grain_ids = Vec::new();
        for part in split_keys(&q.grains) {
            let id = part.parse().map_err(|_| {
                ErrorKind::InvalidInput(format!("grain id {:?} is not a number", part))
            })?;
            grain_ids.push(id);
        }
        rois::get_roiss(&mut conn, &sess, &projects, &samples, &grain_ids)
    })
    .await??;
    Ok(HttpResponse::Ok().json(bundles))
}

// IMAGES

pub async fn list_images(req: HttpRequest,
                         pool: web::Data<ConnectionPool>,
                         config: web::Data<Config>,
                         path: web::Path<i32>)
                         -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let grain_id = path.into_inner();
    let images = web::block(move || -> Result<Vec<ImageInfo>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::list_images(&mut conn, Some(&sess), grain_id)
    })
    .await??;
    Ok(HttpResponse::Ok().json(images))
}

pub async fn create_image(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>,
                          payload: Multipart)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let grain_id = path.into_inner();
    let mut files = read_multipart(payload, config.upload_cap).await?;
    if files.len() != 1 {
        return Err(ErrorKind::InvalidInput(
            "Upload exactly one stack image per request.".into(),
        ).into());
    }
    let file = files.remove(0);
    let image = web::block(move || -> Result<ImageInfo> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let grain = manage::get_grain(&mut conn, Some(&sess), grain_id)?;
        authz::require(&mut conn, Some(&sess), Op::Mutate, Scope::Grain(grain.id))?;
        ingest::add_image(&mut conn, &grain, file.name(), &file.data)
    })
    .await??;
    Ok(HttpResponse::Created().json(image))
}

pub async fn get_image(req: HttpRequest,
                       pool: web::Data<ConnectionPool>,
                       config: web::Data<Config>,
                       path: web::Path<i32>)
                       -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let image = web::block(move || -> Result<ImageInfo> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::get_image(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::Ok().json(image))
}

pub async fn update_image(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>,
                          body: web::Json<UpdateImage>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let image = web::block(move || -> Result<ImageInfo> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::update_image(&mut conn, Some(&sess), id, &body)
    })
    .await??;
    Ok(HttpResponse::Ok().json(image))
}

pub async fn remove_image(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::remove_image(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn image_data(req: HttpRequest,
                        pool: web::Data<ConnectionPool>,
                        config: web::Data<Config>,
                        path: web::Path<i32>)
                        -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    let (format, data) = web::block(move || {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        manage::get_image_data(&mut conn, Some(&sess), id)
    })
    .await??;
    Ok(HttpResponse::Ok().content_type(format.mime()).body(data))
}

// COUNTS

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    #[serde(default)]
    all: bool,
    sample: Option<String>,
    grain: Option<i32>,
    worker: Option<String>,
}

pub async fn list_counts(req: HttpRequest,
                         pool: web::Data<ConnectionPool>,
                         config: web::Data<Config>,
                         query: web::Query<CountQuery>)
                         -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let q = query.into_inner();
    let counts_out = web::block(move || -> Result<Vec<results::CountOut>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let filter = CountFilter {
            all: q.all,
            sample: q.sample.as_deref(),
            grain_index: q.grain,
            worker: q.worker.as_deref(),
        };
        results::list_counts(&mut conn, &sess, &filter)
    })
    .await??;
    Ok(HttpResponse::Ok().json(counts_out))
}

pub async fn list_counts_latlngs(req: HttpRequest,
                                 pool: web::Data<ConnectionPool>,
                                 config: web::Data<Config>,
                                 query: web::Query<CountQuery>)
                                 -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let q = query.into_inner();
    let counts_out = web::block(move || -> Result<Vec<results::CountLatLngs>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let filter = CountFilter {
            all: q.all,
            sample: q.sample.as_deref(),
            grain_index: q.grain,
            worker: q.worker.as_deref(),
        };
        results::list_counts_latlngs(&mut conn, &sess, &filter)
    })
    .await??;
    Ok(HttpResponse::Ok().json(counts_out))
}

/// A grain on the wire: a plain id, or `"<sample>/<index>"` with the
/// sample given by id or name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GrainRef {
    Id(i32),
    Path(String),
}

fn resolve_grain(conn: &mut PgConnection,
                 sess: &UserSession,
                 grain_ref: &GrainRef)
                 -> Result<Grain> {
    match *grain_ref {
        GrainRef::Id(id) => manage::get_grain(conn, Some(sess), id),
        GrainRef::Path(ref path) => {
            let (sample_key, index) = match path.rsplit_once('/') {
                Some(pair) => pair,
                None => bail!(ErrorKind::InvalidInput(format!(
                    "grain = {:?} is neither an id nor a sample/index pair", path))),
            };
            let index = index.parse().map_err(|_| {
                ErrorKind::InvalidInput(format!("grain index {:?} is not a number", index))
            })?;
            let sample = match manage::lookup_sample(conn, sample_key)? {
                Some(sample) => sample,
                None => bail!(ErrorKind::NotFound),
            };
            let grain = manage::get_grain_by_index(conn, sample.id, index)?
                .ok_or(ErrorKind::NotFound)?;
            authz::require(conn, Some(sess), Op::Read, Scope::Grain(grain.id))?;
            Ok(grain)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CountUpload {
    grain: GrainRef,
    ft_type: String,
    #[serde(default)]
    worker: Option<String>,
    #[serde(default)]
    result: Option<i32>,
    #[serde(default)]
    regions: Option<Vec<Vec<[i32; 2]>>>,
    #[serde(default)]
    grainpoints: Vec<PointInput>,
}

pub async fn upload_count(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          body: web::Json<CountUpload>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let up = body.into_inner();
    let ft = FtType::from_str(&up.ft_type)?;
    let count = web::block(move || -> Result<TrackCount> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let grain = resolve_grain(&mut conn, &sess, &up.grain)?;
        let worker = match up.worker {
            Some(ref name) => user::get_user_by_name(&mut conn, name)?,
            None => user::get_user(&mut conn, sess.user_id)?,
        };
        let payload = CountPayload::Points(up.grainpoints);
        counts::submit_for(&mut conn,
                           &sess,
                           &worker,
                           grain.sample_id,
                           grain.index,
                           ft,
                           &payload,
                           up.result,
                           up.regions.as_deref())
    })
    .await??;
    Ok(HttpResponse::Created().json(count))
}

#[derive(Debug, Deserialize)]
pub struct CountLatLngUpload {
    grain: GrainRef,
    ft_type: String,
    #[serde(default)]
    worker: Option<String>,
    #[serde(default)]
    result: Option<i32>,
    #[serde(default)]
    regions: Option<Vec<Vec<[i32; 2]>>>,
    #[serde(default)]
    latlngs: Vec<LatLng>,
}

pub async fn upload_count_latlngs(req: HttpRequest,
                                  pool: web::Data<ConnectionPool>,
                                  config: web::Data<Config>,
                                  body: web::Json<CountLatLngUpload>)
                                  -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let up = body.into_inner();
    let ft = FtType::from_str(&up.ft_type)?;
    let count = web::block(move || -> Result<TrackCount> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let grain = resolve_grain(&mut conn, &sess, &up.grain)?;
        let worker = match up.worker {
            Some(ref name) => user::get_user_by_name(&mut conn, name)?,
            None => user::get_user(&mut conn, sess.user_id)?,
        };
        let payload = CountPayload::LatLngs(up.latlngs);
        counts::submit_for(&mut conn,
                           &sess,
                           &worker,
                           grain.sample_id,
                           grain.index,
                           ft,
                           &payload,
                           up.result,
                           up.regions.as_deref())
    })
    .await??;
    Ok(HttpResponse::Created().json(count))
}

pub async fn remove_count(req: HttpRequest,
                          pool: web::Data<ConnectionPool>,
                          config: web::Data<Config>,
                          path: web::Path<i32>)
                          -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let id = path.into_inner();
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        counts::delete_result(&mut conn, &sess, id)
    })
    .await??;
    Ok(HttpResponse::NoContent().finish())
}

#[test]
fn grain_refs_take_both_shapes() {
    let by_id: GrainRef = serde_json::from_str("17").unwrap();
    match by_id {
        GrainRef::Id(17) => (),
        other => panic!("parsed {:?}", other),
    }
    let by_path: GrainRef = serde_json::from_str("\"ADM-1/3\"").unwrap();
    match by_path {
        GrainRef::Path(ref p) if p == "ADM-1/3" => (),
        other => panic!("parsed {:?}", other),
    }
}

#[test]
fn key_lists_split_on_commas() {
    assert_eq!(split_keys(&Some("a, b,,c".to_owned())), vec!["a", "b", "c"]);
    assert_eq!(split_keys(&None), Vec::<String>::new());
}
