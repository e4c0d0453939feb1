use super::*;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use graincount::assignment;
use graincount::counts::{self, CountPayload};
use graincount::geometry::LatLng;
use graincount::naming::FtType;
use graincount::results;
use graincount::session;
use graincount::session::TokenPair;
use graincount::tutorial;
use graincount::user;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn get_token(pool: web::Data<ConnectionPool>,
                       config: web::Data<Config>,
                       form: web::Form<LoginForm>)
                       -> ApiResult<HttpResponse> {
    let tokens = web::block(move || -> Result<TokenPair> {
        let mut conn = db_connect(&pool)?;
        let user = match user::auth_user(&mut conn,
                                         &form.username,
                                         &form.password,
                                         &config.pepper)? {
            Some(user) => user,
            None => bail!(ErrorKind::AuthError),
        };
        let (tokens, _) = session::start(&mut conn,
                                         &user,
                                         &config.hmac_key,
                                         config.access_ttl,
                                         config.refresh_ttl)?;
        info!("User {} logged in.", user.username);
        Ok(tokens)
    })
    .await??;
    Ok(HttpResponse::Ok().json(tokens))
}

#[derive(Debug, Deserialize)]
pub struct RefreshForm {
    refresh: String,
}

pub async fn refresh_token(pool: web::Data<ConnectionPool>,
                           config: web::Data<Config>,
                           body: web::Json<RefreshForm>)
                           -> ApiResult<HttpResponse> {
    let access = web::block(move || -> Result<String> {
        let mut conn = db_connect(&pool)?;
        match session::refresh(&mut conn, &body.refresh, &config.hmac_key, config.access_ttl)? {
            Some(access) => Ok(access),
            None => {
                session::punishment_sleep();
                bail!(ErrorKind::BadToken)
            }
        }
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "access": access })))
}

/// The next unit of counting work for this session, or `{"done": true}`
/// once the queue is empty.
pub async fn get_grain_images(req: HttpRequest,
                              pool: web::Data<ConnectionPool>,
                              config: web::Data<Config>)
                              -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let bundle = web::block(move || -> Result<assignment::Counting> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        assignment::counting_bundle(&mut conn, &sess)
    })
    .await??;
    Ok(HttpResponse::Ok().json(bundle))
}

#[derive(Debug, Deserialize)]
pub struct CountingRes {
    sample_id: i32,
    grain_num: i32,
    ft_type: String,
    track_num: i32,
    marker_latlngs: Vec<LatLng>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFtnResult {
    counting_res: CountingRes,
}

pub async fn update_ftn_result(req: HttpRequest,
                               pool: web::Data<ConnectionPool>,
                               config: web::Data<Config>,
                               body: web::Json<UpdateFtnResult>)
                               -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let res = body.into_inner().counting_res;
    if res.track_num as usize != res.marker_latlngs.len() {
        return Err(ErrorKind::InvalidInput(format!(
            "track_num = {} does not match the {} markers supplied",
            res.track_num,
            res.marker_latlngs.len(),
        )).into());
    }
    let ft = FtType::from_str(&res.ft_type)?;
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let payload = CountPayload::LatLngs(res.marker_latlngs);
        counts::submit(&mut conn, &sess, res.sample_id, res.grain_num, ft, &payload)?;
        Ok(())
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "reply": "Done and thank you" })))
}

#[derive(Debug, Deserialize)]
pub struct WorkingRes {
    sample_id: i32,
    grain_num: i32,
    ft_type: String,
    marker_latlngs: Vec<LatLng>,
}

#[derive(Debug, Deserialize)]
pub struct SaveWorkingGrain {
    intermedia_res: WorkingRes,
}

/// An in-flight count. It comes back as resume markers on the next
/// `get_grain_images` of the same session's user.
pub async fn save_working_grain(req: HttpRequest,
                                pool: web::Data<ConnectionPool>,
                                config: web::Data<Config>,
                                body: web::Json<SaveWorkingGrain>)
                                -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let res = body.into_inner().intermedia_res;
    let ft = FtType::from_str(&res.ft_type)?;
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        let payload = CountPayload::LatLngs(res.marker_latlngs);
        counts::save_partial(&mut conn, &sess, res.sample_id, res.grain_num, ft, &payload)?;
        Ok(())
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "reply": "Saved" })))
}

#[derive(Debug, Deserialize)]
pub struct TableQuery {
    client_response: Vec<i32>,
}

/// Staff results table. Rows come out as arrays, ready for the table
/// widget on the client side.
pub async fn get_table_data(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>,
                            body: web::Json<TableQuery>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let rows = web::block(move || -> Result<Vec<results::ReportRow>> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        results::report_rows(&mut conn, &sess, &body.client_response)
    })
    .await??;
    let aa_data: Vec<_> = rows.into_iter()
        .map(|r| {
            json!([r.project_name,
                   r.sample_name,
                   r.grain_index,
                   r.ft_type,
                   r.result,
                   r.worker,
                   r.create_date.format("%Y-%m-%d %H:%M:%S").to_string()])
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "aaData": aa_data })))
}

/// The only unauthenticated data endpoint: current marks of the project
/// owner on a grain of a public sample.
pub async fn public_grain(pool: web::Data<ConnectionPool>,
                          path: web::Path<(String, i32)>)
                          -> ApiResult<HttpResponse> {
    let (sample, index) = path.into_inner();
    let marks = web::block(move || -> Result<Vec<LatLng>> {
        let mut conn = db_connect(&pool)?;
        results::public_markers(&mut conn, &sample, index)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "marker_latlngs": marks })))
}

pub async fn tutorial_pages(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let pages = web::block(move || -> Result<Vec<tutorial::PageOut>> {
        let mut conn = db_connect(&pool)?;
        auth_session(&mut conn, &token, &config.hmac_key)?;
        tutorial::pages(&mut conn)
    })
    .await??;
    Ok(HttpResponse::Ok().json(pages))
}

pub async fn tutorial_state(req: HttpRequest,
                            pool: web::Data<ConnectionPool>,
                            config: web::Data<Config>)
                            -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    let completed = web::block(move || -> Result<bool> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        tutorial::is_done(&mut conn, &sess)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "completed": completed })))
}

pub async fn tutorial_result(req: HttpRequest,
                             pool: web::Data<ConnectionPool>,
                             config: web::Data<Config>)
                             -> ApiResult<HttpResponse> {
    let token = bearer_token(&req)?;
    web::block(move || -> Result<()> {
        let mut conn = db_connect(&pool)?;
        let sess = auth_session(&mut conn, &token, &config.hmac_key)?;
        tutorial::set_done(&mut conn, &sess)
    })
    .await??;
    Ok(HttpResponse::Ok().json(json!({ "reply": "Done" })))
}
