#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

mod crud_api;
mod helpers;
mod http_api;

pub use helpers::*;

pub use graincount::errors::{Error, ErrorKind, Result};
pub use graincount::session::UserSession;
pub use graincount::{ConnectionPool, PgConnection};

use actix_web::{middleware, web, App, HttpServer};
use graincount::session;
use graincount::user;
use std::thread;

fn clean_sessions_forever(pool: ConnectionPool, retention: chrono::Duration) {
    loop {
        thread::sleep(std::time::Duration::from_secs(60 * 60));
        let removed = db_connect(&pool)
            .and_then(|mut conn| session::clean_old_sessions(&mut conn, retention));
        match removed {
            Ok(0) => (),
            Ok(n) => info!("Cleaned {} expired sessions.", n),
            Err(e) => error!("Couldn't clean expired sessions: {}", e),
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    pretty_env_logger::init();
    info!("Starting.");

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        for err in e.iter().skip(1) {
            eprintln!("Caused by: {}", err);
        }
        std::process::exit(1);
    });

    let pool = graincount::build_pool(&config.database_url).expect("Can't connect to database!");
    {
        let mut conn = pool.get().expect("Can't connect to database!");
        let have_users =
            graincount::check_db(&mut conn).expect("Something funny with the DB!");
        if !have_users {
            warn!("No users in the database! Add one with the user CLI so someone can log in.");
        }
        user::ensure_guest(&mut conn,
                           &config.guest_password,
                           &config.pepper,
                           config.password_stretching)
            .expect("Couldn't ensure the guest account!");
    }
    info!("Database OK.");

    {
        let pool = pool.clone();
        let retention = config.session_retention;
        thread::spawn(move || clean_sessions_forever(pool, retention));
    }

    let binding = config.server_binding;
    let pool_data = web::Data::new(pool);
    let config_data = web::Data::new(config);

    info!("Listening on {}.", binding);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(pool_data.clone())
            .app_data(config_data.clone())
            // SESSIONS
            .route("/get-token", web::post().to(http_api::get_token))
            .route("/refresh-token", web::post().to(http_api::refresh_token))
            // COUNTING
            .route("/getGrainImages", web::get().to(http_api::get_grain_images))
            .route("/updateFtnResult", web::post().to(http_api::update_ftn_result))
            .route("/saveWorkingGrain", web::post().to(http_api::save_working_grain))
            .route("/getTableData", web::post().to(http_api::get_table_data))
            .route("/tutorial/pages/", web::get().to(http_api::tutorial_pages))
            .route("/tutorial/state/", web::get().to(http_api::tutorial_state))
            .route("/tutorialResult", web::post().to(http_api::tutorial_result))
            .route("/public/sample/{sample}/grain/{index}/",
                   web::get().to(http_api::public_grain))
            // PROJECTS AND SAMPLES
            .route("/project/", web::get().to(crud_api::list_projects))
            .route("/project/", web::post().to(crud_api::create_project))
            .route("/project/{id}/", web::get().to(crud_api::get_project))
            .route("/project/{id}/", web::patch().to(crud_api::update_project))
            .route("/project/{id}/", web::delete().to(crud_api::remove_project))
            .route("/sample/", web::get().to(crud_api::list_samples))
            .route("/sample/", web::post().to(crud_api::create_sample))
            .route("/sample/{id}/", web::get().to(crud_api::get_sample))
            .route("/sample/{id}/", web::patch().to(crud_api::update_sample))
            .route("/sample/{id}/", web::delete().to(crud_api::remove_sample))
            .route("/sample/{sample}/report/", web::get().to(crud_api::sample_report))
            // GRAINS AND IMAGES
            .route("/sample/{id}/grain/", web::get().to(crud_api::list_grains))
            .route("/sample/{id}/grain/", web::post().to(crud_api::create_grain))
            .route("/grain/{id}/", web::get().to(crud_api::get_grain))
            .route("/grain/{id}/", web::patch().to(crud_api::update_grain))
            .route("/grain/{id}/", web::delete().to(crud_api::remove_grain))
            .route("/grain/{id}/rois/", web::get().to(crud_api::get_grain_rois))
            .route("/grain/{id}/rois/", web::post().to(crud_api::replace_grain_rois))
            .route("/rois/", web::get().to(crud_api::list_rois))
            .route("/grain/{id}/image/", web::get().to(crud_api::list_images))
            .route("/grain/{id}/image/", web::post().to(crud_api::create_image))
            .route("/image/{id}/", web::get().to(crud_api::get_image))
            .route("/image/{id}/", web::patch().to(crud_api::update_image))
            .route("/image/{id}/", web::delete().to(crud_api::remove_image))
            .route("/image/{id}/data/", web::get().to(crud_api::image_data))
            // COUNTS
            .route("/count/", web::get().to(crud_api::list_counts))
            .route("/count/", web::post().to(crud_api::upload_count))
            .route("/count/{id}/", web::delete().to(crud_api::remove_count))
            .route("/countll/", web::get().to(crud_api::list_counts_latlngs))
            .route("/countll/", web::post().to(crud_api::upload_count_latlngs))
    })
    .bind(binding)?
    .run()
    .await
}
