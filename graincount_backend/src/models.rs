use super::schema::*;
use chrono::{DateTime, offset::Utc};
use serde::{Serialize, Deserialize, Deserializer};

pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where T: Deserialize<'de>,
          D: Deserializer<'de>
{
    Deserialize::deserialize(de).map(Some)
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Identifiable, Clone, Queryable, Debug, AsChangeset, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    pub joined: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[derive(Identifiable, Queryable, Debug, Associations, Insertable, AsChangeset)]
#[diesel(belongs_to(User, foreign_key = id))]
#[diesel(table_name = passwords)]
pub struct Password {
    pub id: i32,
    pub password_hash: Vec<u8>,
    pub salt: Vec<u8>,
    pub initial_rounds: i16,
    pub extra_rounds: i16,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub user_id: i32,
    pub access_hash: &'a [u8],
    pub refresh_hash: &'a [u8],
    pub access_expires: DateTime<Utc>,
    pub refresh_expires: DateTime<Utc>,
    pub started: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Identifiable, Queryable, Debug, Associations, AsChangeset)]
#[diesel(table_name = sessions)]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct Session {
    pub id: i32,
    pub user_id: i32,
    pub access_hash: Vec<u8>,
    pub refresh_hash: Vec<u8>,
    pub access_expires: DateTime<Utc>,
    pub refresh_expires: DateTime<Utc>,
    pub started: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject<'a> {
    pub project_name: &'a str,
    pub creator_id: i32,
    pub project_description: &'a str,
    pub priority: i32,
    pub closed: bool,
}

#[derive(Identifiable, Clone, Queryable, Debug, Associations, AsChangeset, Serialize)]
#[diesel(table_name = projects)]
#[diesel(belongs_to(User, foreign_key = creator_id))]
pub struct Project {
    pub id: i32,
    pub project_name: String,
    pub creator_id: i32,
    pub create_date: DateTime<Utc>,
    pub project_description: String,
    pub priority: i32,
    pub closed: bool,
}

#[derive(AsChangeset, Debug, Deserialize, Default)]
#[diesel(table_name = projects)]
#[serde(default)]
pub struct UpdateProject {
    pub project_name: Option<String>,
    pub project_description: Option<String>,
    pub priority: Option<i32>,
    pub closed: Option<bool>,
}

impl UpdateProject {
    pub fn is_empty(&self) -> bool {
        self.project_name.is_none() && self.project_description.is_none()
            && self.priority.is_none() && self.closed.is_none()
    }
}

#[derive(Insertable)]
#[diesel(table_name = samples)]
pub struct NewSample<'a> {
    pub sample_name: &'a str,
    pub project_id: i32,
    pub sample_property: &'a str,
    pub total_grains: i32,
    pub priority: i32,
    pub min_contributor_num: i32,
    pub completed: bool,
    pub public: bool,
}

#[derive(Identifiable, Clone, Queryable, Debug, Associations, AsChangeset, Serialize)]
#[diesel(table_name = samples)]
#[diesel(belongs_to(Project, foreign_key = project_id))]
pub struct Sample {
    pub id: i32,
    pub sample_name: String,
    pub project_id: i32,
    pub sample_property: String,
    pub total_grains: i32,
    pub priority: i32,
    pub min_contributor_num: i32,
    pub completed: bool,
    pub public: bool,
}

#[derive(AsChangeset, Debug, Deserialize, Default)]
#[diesel(table_name = samples)]
#[serde(default)]
pub struct UpdateSample {
    pub sample_name: Option<String>,
    pub sample_property: Option<String>,
    pub total_grains: Option<i32>,
    pub priority: Option<i32>,
    pub min_contributor_num: Option<i32>,
    pub completed: Option<bool>,
    pub public: Option<bool>,
}

impl UpdateSample {
    pub fn is_empty(&self) -> bool {
        self.sample_name.is_none() && self.sample_property.is_none()
            && self.total_grains.is_none() && self.priority.is_none()
            && self.min_contributor_num.is_none() && self.completed.is_none()
            && self.public.is_none()
    }
}

#[derive(Insertable, Debug, Clone, Copy, PartialEq)]
#[diesel(table_name = transforms)]
pub struct NewTransform {
    pub x0: f64,
    pub y0: f64,
    pub t0: f64,
    pub x1: f64,
    pub y1: f64,
    pub t1: f64,
}

#[derive(Identifiable, Queryable, Debug, Clone, Copy, AsChangeset)]
#[diesel(table_name = transforms)]
pub struct Transform2D {
    pub id: i32,
    pub x0: f64,
    pub y0: f64,
    pub t0: f64,
    pub x1: f64,
    pub y1: f64,
    pub t1: f64,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = grains)]
pub struct NewGrain {
    pub sample_id: i32,
    pub index: i32,
    pub image_width: i32,
    pub image_height: i32,
    pub scale_x: Option<f64>,
    pub scale_y: Option<f64>,
    pub stage_x: Option<f64>,
    pub stage_y: Option<f64>,
    pub mica_stage_x: Option<f64>,
    pub mica_stage_y: Option<f64>,
    pub shift_x: i32,
    pub shift_y: i32,
    pub transform_id: Option<i32>,
}

#[derive(Identifiable, Clone, Queryable, Debug, Associations, AsChangeset, Serialize)]
#[diesel(table_name = grains)]
#[diesel(belongs_to(Sample, foreign_key = sample_id))]
pub struct Grain {
    pub id: i32,
    pub sample_id: i32,
    pub index: i32,
    pub image_width: i32,
    pub image_height: i32,
    pub scale_x: Option<f64>,
    pub scale_y: Option<f64>,
    pub stage_x: Option<f64>,
    pub stage_y: Option<f64>,
    pub mica_stage_x: Option<f64>,
    pub mica_stage_y: Option<f64>,
    pub shift_x: i32,
    pub shift_y: i32,
    pub transform_id: Option<i32>,
}

#[derive(AsChangeset, Debug, Deserialize, Default)]
#[diesel(table_name = grains)]
#[serde(default)]
pub struct UpdateGrain {
    pub sample_id: Option<i32>,
    pub index: Option<i32>,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    #[serde(deserialize_with = "double_option")]
    pub scale_x: Option<Option<f64>>,
    #[serde(deserialize_with = "double_option")]
    pub scale_y: Option<Option<f64>>,
    #[serde(deserialize_with = "double_option")]
    pub stage_x: Option<Option<f64>>,
    #[serde(deserialize_with = "double_option")]
    pub stage_y: Option<Option<f64>>,
    #[serde(deserialize_with = "double_option")]
    pub mica_stage_x: Option<Option<f64>>,
    #[serde(deserialize_with = "double_option")]
    pub mica_stage_y: Option<Option<f64>>,
    pub shift_x: Option<i32>,
    pub shift_y: Option<i32>,
}

impl UpdateGrain {
    // A `Some(None)` clears its column, so only all-`None` is empty.
    pub fn is_empty(&self) -> bool {
        self.sample_id.is_none() && self.index.is_none()
            && self.image_width.is_none() && self.image_height.is_none()
            && self.scale_x.is_none() && self.scale_y.is_none()
            && self.stage_x.is_none() && self.stage_y.is_none()
            && self.mica_stage_x.is_none() && self.mica_stage_y.is_none()
            && self.shift_x.is_none() && self.shift_y.is_none()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = regions)]
pub struct NewRegion {
    pub grain_id: i32,
    pub result_id: Option<i32>,
}

#[derive(Identifiable, Queryable, Debug, Associations, Clone, Copy)]
#[diesel(table_name = regions)]
#[diesel(belongs_to(Grain, foreign_key = grain_id))]
#[diesel(belongs_to(TrackCount, foreign_key = result_id))]
pub struct Region {
    pub id: i32,
    pub grain_id: i32,
    pub result_id: Option<i32>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = vertices)]
pub struct NewVertex {
    pub region_id: i32,
    pub x: i32,
    pub y: i32,
}

#[derive(Identifiable, Queryable, Debug, Associations, Clone, Copy)]
#[diesel(table_name = vertices)]
#[diesel(belongs_to(Region, foreign_key = region_id))]
pub struct Vertex {
    pub id: i32,
    pub region_id: i32,
    pub x: i32,
    pub y: i32,
}

#[derive(Insertable)]
#[diesel(table_name = images)]
pub struct NewImage<'a> {
    pub grain_id: i32,
    pub format: &'a str,
    pub ft_type: &'a str,
    pub index: i32,
    pub data: &'a [u8],
    pub light_path: Option<&'a str>,
    pub focus: Option<f64>,
}

#[derive(Identifiable, Queryable, Debug, Associations, AsChangeset)]
#[diesel(table_name = images)]
#[diesel(belongs_to(Grain, foreign_key = grain_id))]
pub struct Image {
    pub id: i32,
    pub grain_id: i32,
    pub format: String,
    pub ft_type: String,
    pub index: i32,
    pub data: Vec<u8>,
    pub light_path: Option<String>,
    pub focus: Option<f64>,
}

/// Row shape for listings; leaves the blob column unselected.
#[derive(Queryable, Debug, Serialize)]
pub struct ImageInfo {
    pub id: i32,
    pub grain_id: i32,
    pub format: String,
    pub ft_type: String,
    pub index: i32,
    pub light_path: Option<String>,
    pub focus: Option<f64>,
}

#[derive(AsChangeset, Debug, Deserialize, Default)]
#[diesel(table_name = images)]
#[serde(default)]
pub struct UpdateImage {
    pub grain_id: Option<i32>,
    pub format: Option<String>,
    pub ft_type: Option<String>,
    pub index: Option<i32>,
    #[serde(deserialize_with = "double_option")]
    pub light_path: Option<Option<String>>,
    #[serde(deserialize_with = "double_option")]
    pub focus: Option<Option<f64>>,
}

impl UpdateImage {
    pub fn is_empty(&self) -> bool {
        self.grain_id.is_none() && self.format.is_none()
            && self.ft_type.is_none() && self.index.is_none()
            && self.light_path.is_none() && self.focus.is_none()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = track_counts)]
pub struct NewTrackCount<'a> {
    pub grain_id: i32,
    pub ft_type: &'a str,
    pub worker_id: i32,
    pub result: i32,
}

#[derive(Identifiable, Clone, Queryable, Debug, Associations, AsChangeset, Serialize)]
#[diesel(table_name = track_counts)]
#[diesel(belongs_to(Grain, foreign_key = grain_id))]
#[diesel(belongs_to(User, foreign_key = worker_id))]
pub struct TrackCount {
    pub id: i32,
    pub grain_id: i32,
    pub ft_type: String,
    pub worker_id: i32,
    pub result: i32,
    pub create_date: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = grain_points)]
pub struct NewGrainPoint<'a> {
    pub result_id: i32,
    pub x_pixels: i32,
    pub y_pixels: i32,
    pub category: &'a str,
    pub comment: Option<&'a str>,
}

#[derive(Identifiable, Queryable, Debug, Associations, Clone, Serialize)]
#[diesel(table_name = grain_points)]
#[diesel(belongs_to(TrackCount, foreign_key = result_id))]
pub struct GrainPoint {
    pub id: i32,
    pub result_id: i32,
    pub x_pixels: i32,
    pub y_pixels: i32,
    pub category: String,
    pub comment: Option<String>,
}

#[derive(Identifiable, Clone, Queryable, Debug, Associations, AsChangeset, Serialize)]
#[diesel(table_name = tutorial_pages)]
#[diesel(belongs_to(TrackCount, foreign_key = result_id))]
pub struct TutorialPage {
    pub id: i32,
    pub result_id: i32,
    pub category: Option<String>,
    pub page_type: String,
    pub point_limit: Option<i32>,
    pub message: String,
    pub active: bool,
    pub sequence: i32,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = tutorial_results)]
pub struct NewTutorialResult {
    pub user_id: Option<i32>,
    pub session_id: Option<i32>,
}
