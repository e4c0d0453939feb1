use super::*;
use geometry::{self, LatLng};
use serde::Serialize;
use std::collections::HashSet;

/// Results referenced by any tutorial page. The submission path must never
/// delete these, active or not.
pub fn anchored_result_ids(conn: &mut PgConnection) -> Result<HashSet<i32>> {
    use schema::tutorial_pages;

    Ok(tutorial_pages::table
        .select(tutorial_pages::result_id)
        .load::<i32>(conn)?
        .into_iter()
        .collect())
}

/// A tutorial page with its exemplar marks projected onto the map.
#[derive(Debug, Serialize)]
pub struct PageOut {
    pub id: i32,
    pub sequence: i32,
    pub page_type: String,
    pub category: Option<String>,
    pub point_limit: Option<i32>,
    pub message: String,
    pub grain: i32,
    pub marks: Vec<LatLng>,
}

/// The active pages in presentation order. A page with a category shows
/// only marks of that category.
pub fn pages(conn: &mut PgConnection) -> Result<Vec<PageOut>> {
    use schema::{grain_points, grains, track_counts, tutorial_pages};

    let active: Vec<TutorialPage> = tutorial_pages::table
        .filter(tutorial_pages::active.eq(true))
        .order((tutorial_pages::sequence.asc(), tutorial_pages::id.asc()))
        .load(conn)?;

    let mut out = Vec::with_capacity(active.len());
    for page in active {
        let grain: Grain = match track_counts::table
            .inner_join(grains::table)
            .filter(track_counts::id.eq(page.result_id))
            .select(grains::all_columns)
            .first(conn)
            .optional()?
        {
            Some(grain) => grain,
            None => bail!(ErrorKind::DatabaseOdd("a tutorial page anchors a missing result")),
        };

        let mut points = grain_points::table
            .filter(grain_points::result_id.eq(page.result_id))
            .order(grain_points::id.asc())
            .into_boxed();
        if let Some(ref category) = page.category {
            points = points.filter(grain_points::category.eq(category.clone()));
        }
        let marks = points
            .load::<GrainPoint>(conn)?
            .iter()
            .map(|p| geometry::pixels_to_latlng(
                f64::from(p.x_pixels), f64::from(p.y_pixels),
                grain.image_width, grain.image_height))
            .collect();

        out.push(PageOut {
            id: page.id,
            sequence: page.sequence,
            page_type: page.page_type,
            category: page.category,
            point_limit: page.point_limit,
            message: page.message,
            grain: grain.id,
            marks,
        });
    }
    Ok(out)
}

fn completion_query(sess: &UserSession) -> (Option<i32>, Option<i32>) {
    if sess.is_guest() {
        (None, Some(sess.sess_id))
    } else {
        (Some(sess.user_id), None)
    }
}

/// Whether the caller has been through the tutorial. Guests are tracked per
/// session; everyone else per account.
pub fn is_done(conn: &mut PgConnection, sess: &UserSession) -> Result<bool> {
    use schema::tutorial_results;

    let (user_id, session_id) = completion_query(sess);
    let found: Option<i32> = match (user_id, session_id) {
        (Some(uid), _) => tutorial_results::table
            .filter(tutorial_results::user_id.eq(uid))
            .select(tutorial_results::id)
            .first(conn)
            .optional()?,
        (_, Some(sid)) => tutorial_results::table
            .filter(tutorial_results::session_id.eq(sid))
            .select(tutorial_results::id)
            .first(conn)
            .optional()?,
        _ => None,
    };
    Ok(found.is_some())
}

pub fn set_done(conn: &mut PgConnection, sess: &UserSession) -> Result<()> {
    use schema::tutorial_results;

    if is_done(conn, sess)? {
        return Ok(());
    }
    let (user_id, session_id) = completion_query(sess);
    diesel::insert_into(tutorial_results::table)
        .values(&NewTutorialResult { user_id, session_id })
        .execute(conn)?;
    info!("Tutorial completed by {}.", sess.username);
    Ok(())
}


#[test]
fn test_completion_key_guest_vs_user() {
    let user = UserSession {
        sess_id: 7,
        user_id: 3,
        username: "ada".into(),
        is_staff: false,
        is_superuser: false,
    };
    assert_eq!(completion_query(&user), (Some(3), None));

    let guest = UserSession {
        sess_id: 9,
        user_id: 4,
        username: user::GUEST_USERNAME.into(),
        is_staff: false,
        is_superuser: false,
    };
    assert_eq!(completion_query(&guest), (None, Some(9)));
}
