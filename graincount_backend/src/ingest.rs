use super::*;
use geometry::Matrix2x3;
use naming::{ImageName, UploadName};
use rois::RoiRegion;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

/// The `rois.json` upload descriptor. Dimension fields arrive as floats when
/// the file was generated from microscope metadata.
#[derive(Debug, Deserialize)]
pub struct RoisDescriptor {
    #[serde(deserialize_with = "int_from_number")]
    pub image_width: i32,
    #[serde(deserialize_with = "int_from_number")]
    pub image_height: i32,
    #[serde(default)]
    pub scale_x: Option<f64>,
    #[serde(default)]
    pub scale_y: Option<f64>,
    #[serde(default)]
    pub stage_x: Option<f64>,
    #[serde(default)]
    pub stage_y: Option<f64>,
    #[serde(default)]
    pub mica_stage_x: Option<f64>,
    #[serde(default)]
    pub mica_stage_y: Option<f64>,
    pub regions: Vec<RoiRegion>,
    #[serde(default)]
    pub mica_transform: Option<Matrix2x3>,
}

fn int_from_number<'de, D>(de: D) -> ::std::result::Result<i32, D::Error>
    where D: Deserializer<'de>
{
    let v = f64::deserialize(de)?;
    Ok(v.round() as i32)
}

pub fn parse_rois_descriptor(bytes: &[u8]) -> Result<RoisDescriptor> {
    let descriptor: RoisDescriptor = serde_json::from_slice(bytes)
        .map_err(|e| ErrorKind::InvalidInput(format!("Bad rois.json: {}", e)))?;
    if descriptor.regions.is_empty() {
        return Err(ErrorKind::InvalidInput(
            "rois.json must contain at least one region.".into(),
        ).into());
    }
    Ok(descriptor)
}

/// Grain-level values read from a Zeiss `_metadata.xml` sidecar.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct GrainMetadata {
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub scale_x: Option<f64>,
    pub scale_y: Option<f64>,
    pub stage_x: Option<f64>,
    pub stage_y: Option<f64>,
}

/// Image-level values read from a Zeiss `_metadata.xml` sidecar.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImageMetadata {
    pub light_path: Option<String>,
    pub focus: Option<f64>,
}

fn find_child<'a, 'input>(node: roxmltree::Node<'a, 'input>,
                          tag: &str)
                          -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn find_child_by_id<'a, 'input>(node: roxmltree::Node<'a, 'input>,
                                tag: &str,
                                id: &str)
                                -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.has_tag_name(tag) && n.attribute("Id") == Some(id))
}

fn float_text(node: Option<roxmltree::Node>) -> Option<f64> {
    node.and_then(|n| n.text())
        .and_then(|t| t.trim().parse().ok())
}

fn stage_position(root: roxmltree::Node, axis: &str) -> Option<f64> {
    let hw = find_child(root, "HardwareSetting")?;
    float_text(find_child_by_id(hw, "ParameterCollection", axis)
        .and_then(|n| find_child(n, "Position")))
}

fn parse_xml(xml: &str) -> Result<roxmltree::Document> {
    roxmltree::Document::parse(xml)
        .map_err(|e| ErrorKind::InvalidInput(format!("Bad metadata XML: {}", e)).into())
}

/// Missing elements yield `None` fields; partial microscope exports are
/// common.
pub fn parse_grain_metadata(xml: &str) -> Result<GrainMetadata> {
    let doc = parse_xml(xml)?;
    let root = doc.root_element();

    let image = find_child(root, "Information").and_then(|n| find_child(n, "Image"));
    let scaling = find_child(root, "Scaling").and_then(|n| find_child(n, "Items"));
    let scale = |axis: &str| {
        float_text(scaling
            .and_then(|n| find_child_by_id(n, "Distance", axis))
            .and_then(|n| find_child(n, "Value")))
    };

    Ok(GrainMetadata {
        image_width: float_text(image.and_then(|n| find_child(n, "SizeX")))
            .map(|v| v.round() as i32),
        image_height: float_text(image.and_then(|n| find_child(n, "SizeY")))
            .map(|v| v.round() as i32),
        scale_x: scale("X"),
        scale_y: scale("Y"),
        stage_x: stage_position(root, "MTBStageAxisX"),
        stage_y: stage_position(root, "MTBStageAxisY"),
    })
}

pub fn parse_image_metadata(xml: &str) -> Result<ImageMetadata> {
    let doc = parse_xml(xml)?;
    let root = doc.root_element();

    let light_path = find_child(root, "HardwareSetting")
        .and_then(|hw| find_child_by_id(hw, "ParameterCollection", "MTBRLTLSwitch"))
        .and_then(|n| find_child(n, "PositionName"))
        .and_then(|n| n.text())
        .and_then(|t| match t.trim() {
            "RLTLSwitch.RL" => Some("R".to_string()),
            "RLTLSwitch.TL" => Some("T".to_string()),
            _ => None,
        });

    Ok(ImageMetadata {
        light_path,
        focus: stage_position(root, "MTBFocus"),
    })
}

fn probe_dimensions(bytes: &[u8]) -> Result<(i32, i32)> {
    let reader = image::io::Reader::new(::std::io::Cursor::new(bytes))
        .with_guessed_format()?;
    let (w, h) = reader
        .into_dimensions()
        .map_err(|e| ErrorKind::InvalidInput(format!("Unreadable image: {}", e)))?;
    Ok((w as i32, h as i32))
}

/// The rectangle counted when no ROI was supplied: the canvas inset by 5%
/// on every side.
pub fn default_regions(width: i32, height: i32) -> Vec<RoiRegion> {
    let x1 = (f64::from(width) * 0.05) as i32;
    let x2 = (f64::from(width) * 0.95) as i32;
    let y1 = (f64::from(height) * 0.05) as i32;
    let y2 = (f64::from(height) * 0.95) as i32;
    vec![RoiRegion {
        shift: [0, 0],
        vertices: vec![[x1, y1], [x1, y2], [x2, y2], [x2, y1]],
    }]
}

fn grain_conflict(e: diesel::result::Error) -> Error {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            ErrorKind::Conflict("a grain with that index already exists in the sample").into()
        }
        e => e.into(),
    }
}

fn image_conflict(e: diesel::result::Error) -> Error {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            ErrorKind::Conflict("the grain already has an image at that index and track type").into()
        }
        e => e.into(),
    }
}

fn next_grain_index(conn: &mut PgConnection, sample_id: i32) -> Result<i32> {
    use schema::grains;

    let max: Option<i32> = grains::table
        .filter(grains::sample_id.eq(sample_id))
        .select(diesel::dsl::max(grains::index))
        .first(conn)?;
    Ok(max.unwrap_or(0) + 1)
}

// Image files keyed by (ft_type, index); refl/flat are already folded into
// the index by the classifier.
type ImageKey = (&'static str, i32);

struct SortedUpload<'a> {
    descriptor: Option<RoisDescriptor>,
    images: BTreeMap<ImageKey, (ImageName, &'a [u8])>,
    image_meta: BTreeMap<ImageKey, ImageMetadata>,
    grain_meta: Option<GrainMetadata>,
    mica_stage: (Option<f64>, Option<f64>),
}

fn sort_upload(files: &[(String, Vec<u8>)]) -> Result<SortedUpload> {
    let mut sorted = SortedUpload {
        descriptor: None,
        images: BTreeMap::new(),
        image_meta: BTreeMap::new(),
        grain_meta: None,
        mica_stage: (None, None),
    };

    for (name, bytes) in files {
        match naming::parse_upload_name(name)? {
            UploadName::Rois => {
                if sorted.descriptor.is_some() {
                    return Err(ErrorKind::InvalidInput(
                        "More than one rois.json in the upload.".into(),
                    ).into());
                }
                sorted.descriptor = Some(parse_rois_descriptor(bytes)?);
            }
            UploadName::Image(img) => {
                let key = (img.ft_type.as_str(), img.index);
                if img.meta {
                    let xml = ::std::str::from_utf8(bytes).map_err(|_| {
                        ErrorKind::InvalidInput(format!("Metadata {} isn't UTF-8.", name))
                    })?;
                    sorted.image_meta.insert(key, parse_image_metadata(xml)?);
                    if img.mica {
                        if sorted.mica_stage == (None, None) {
                            let doc = parse_xml(xml)?;
                            let root = doc.root_element();
                            sorted.mica_stage = (stage_position(root, "MTBStageAxisX"),
                                                 stage_position(root, "MTBStageAxisY"));
                        }
                    } else if sorted.grain_meta.is_none() {
                        sorted.grain_meta = Some(parse_grain_metadata(xml)?);
                    }
                } else if sorted.images.insert(key, (img, bytes.as_slice())).is_some() {
                    return Err(ErrorKind::InvalidInput(
                        format!("Duplicate image upload {}.", name),
                    ).into());
                }
            }
        }
    }
    Ok(sorted)
}

/// Creates a grain under the sample from one uploaded batch: the optional
/// `rois.json`, the stack images and their metadata sidecars. Canvas size
/// comes from the descriptor, else from metadata, else from the largest
/// image uploaded. A grain landing past the sample's recorded grain total
/// raises the total. Everything lands in one transaction.
pub fn new_grain(conn: &mut PgConnection,
                 sample: &Sample,
                 requested_index: Option<i32>,
                 files: &[(String, Vec<u8>)])
                 -> Result<Grain> {
    use schema::{grains, images, samples, transforms};

    let sorted = sort_upload(files)?;
    let grain_meta = sorted.grain_meta.unwrap_or_default();

    let (width, height) = match sorted.descriptor {
        Some(ref d) => (d.image_width, d.image_height),
        None => {
            match (grain_meta.image_width, grain_meta.image_height) {
                (Some(w), Some(h)) => (w, h),
                _ => {
                    let mut dims = (0, 0);
                    for (_, bytes) in sorted.images.values() {
                        let (w, h) = probe_dimensions(bytes)?;
                        dims = (dims.0.max(w), dims.1.max(h));
                    }
                    if dims == (0, 0) {
                        return Err(ErrorKind::InvalidInput(
                            "Upload contains neither a rois.json nor any stack image.".into(),
                        ).into());
                    }
                    dims
                }
            }
        }
    };

    let regions = match sorted.descriptor {
        Some(ref d) => d.regions.clone(),
        None => default_regions(width, height),
    };
    let first_shift = regions.first().map(|r| r.shift).unwrap_or([0, 0]);

    let index = match requested_index {
        Some(index) if index < 1 => {
            return Err(ErrorKind::InvalidInput(
                format!("Grain index must be at least 1, not {}.", index),
            ).into());
        }
        Some(index) => index,
        None => next_grain_index(conn, sample.id)?,
    };

    let (scale_x, scale_y, stage_x, stage_y, mica_stage_x, mica_stage_y) =
        match sorted.descriptor {
            Some(ref d) => (d.scale_x, d.scale_y, d.stage_x, d.stage_y,
                            d.mica_stage_x, d.mica_stage_y),
            None => (grain_meta.scale_x, grain_meta.scale_y,
                     grain_meta.stage_x, grain_meta.stage_y,
                     sorted.mica_stage.0, sorted.mica_stage.1),
        };

    conn.transaction(|conn| -> Result<Grain> {
        let transform_id = match sorted.descriptor.as_ref().and_then(|d| d.mica_transform) {
            Some(m) => {
                let t: Transform2D = diesel::insert_into(transforms::table)
                    .values(&NewTransform {
                        x0: m[0][0], y0: m[0][1], t0: m[0][2],
                        x1: m[1][0], y1: m[1][1], t1: m[1][2],
                    })
                    .get_result(conn)?;
                Some(t.id)
            }
            None => None,
        };

        let grain: Grain = diesel::insert_into(grains::table)
            .values(&NewGrain {
                sample_id: sample.id,
                index,
                image_width: width,
                image_height: height,
                scale_x,
                scale_y,
                stage_x,
                stage_y,
                mica_stage_x,
                mica_stage_y,
                shift_x: first_shift[0],
                shift_y: first_shift[1],
                transform_id,
            })
            .get_result(conn)
            .map_err(grain_conflict)?;

        // A grain past the recorded total widens the required set, so a
        // stale completion flag lifts with it.
        if index > sample.total_grains {
            diesel::update(samples::table
                    .filter(samples::id.eq(sample.id))
                    .filter(samples::total_grains.lt(index)))
                .set((samples::total_grains.eq(index),
                      samples::completed.eq(false)))
                .execute(conn)?;
        }

        rois::save_regions(conn, &grain, &regions)?;

        for (key, (img, bytes)) in &sorted.images {
            let meta = sorted.image_meta.get(key);
            diesel::insert_into(images::table)
                .values(&NewImage {
                    grain_id: grain.id,
                    format: img.format.as_str(),
                    ft_type: img.ft_type.as_str(),
                    index: img.index,
                    data: bytes,
                    light_path: meta.and_then(|m| m.light_path.as_deref()),
                    focus: meta.and_then(|m| m.focus),
                })
                .execute(conn)
                .map_err(image_conflict)?;
        }

        info!("Created grain {} (index {}) in sample {} with {} images.",
              grain.id,
              grain.index,
              sample.id,
              sorted.images.len());
        Ok(grain)
    })
}

/// Stores one stack image posted on its own; classification comes from the
/// file name.
pub fn add_image(conn: &mut PgConnection,
                 grain: &Grain,
                 filename: &str,
                 bytes: &[u8])
                 -> Result<ImageInfo> {
    use schema::images;

    let img = match naming::parse_upload_name(filename)? {
        UploadName::Image(img) if !img.meta => img,
        _ => {
            return Err(ErrorKind::InvalidInput(
                format!("{} is not a stack image name.", filename),
            ).into())
        }
    };

    let image: Image = diesel::insert_into(images::table)
        .values(&NewImage {
            grain_id: grain.id,
            format: img.format.as_str(),
            ft_type: img.ft_type.as_str(),
            index: img.index,
            data: bytes,
            light_path: None,
            focus: None,
        })
        .get_result(conn)
        .map_err(image_conflict)?;

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

/// Re-applies a `rois.json` descriptor to an existing grain: canvas and
/// stage fields, the mica transform and the baseline regions.
pub fn replace_rois(conn: &mut PgConnection,
                    grain: &Grain,
                    bytes: &[u8])
                    -> Result<Grain> {
    use schema::{grains, transforms};

    let descriptor = parse_rois_descriptor(bytes)?;

    conn.transaction(|conn| -> Result<Grain> {
        let transform_id = match descriptor.mica_transform {
            Some(m) => {
                let t: Transform2D = diesel::insert_into(transforms::table)
                    .values(&NewTransform {
                        x0: m[0][0], y0: m[0][1], t0: m[0][2],
                        x1: m[1][0], y1: m[1][1], t1: m[1][2],
                    })
                    .get_result(conn)?;
                Some(t.id)
            }
            None => None,
        };

        let updated: Grain = diesel::update(grains::table.filter(grains::id.eq(grain.id)))
            .set((grains::image_width.eq(descriptor.image_width),
                  grains::image_height.eq(descriptor.image_height),
                  grains::scale_x.eq(descriptor.scale_x),
                  grains::scale_y.eq(descriptor.scale_y),
                  grains::stage_x.eq(descriptor.stage_x),
                  grains::stage_y.eq(descriptor.stage_y),
                  grains::mica_stage_x.eq(descriptor.mica_stage_x),
                  grains::mica_stage_y.eq(descriptor.mica_stage_y),
                  grains::transform_id.eq(transform_id)))
            .get_result(conn)?;

        rois::save_regions(conn, &updated, &descriptor.regions)?;

        if let Some(old) = grain.transform_id {
            diesel::delete(transforms::table.filter(transforms::id.eq(old))).execute(conn)?;
        }

        Ok(updated)
    })
}


#[test]
fn test_parse_rois_descriptor() {
    let descriptor = parse_rois_descriptor(
        br#"{"image_width":1000.0,"image_height":800,
             "scale_x":1.5e-7,
             "regions":[{"shift":[0,0],"vertices":[[10,10],[990,10],[990,790],[10,790]]}],
             "mica_transform":[[-1.0,0.0,0.0],[0.0,-1.0,0.0]]}"#,
    ).unwrap();
    assert_eq!(descriptor.image_width, 1000);
    assert_eq!(descriptor.image_height, 800);
    assert_eq!(descriptor.scale_x, Some(1.5e-7));
    assert_eq!(descriptor.scale_y, None);
    assert_eq!(descriptor.regions.len(), 1);
    assert_eq!(descriptor.mica_transform, Some([[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0]]));
}

#[test]
fn test_rois_descriptor_needs_regions() {
    assert!(parse_rois_descriptor(br#"{"image_width":10,"image_height":10,"regions":[]}"#)
        .is_err());
    assert!(parse_rois_descriptor(b"{").is_err());
}

#[test]
fn test_default_regions_inset() {
    let regions = default_regions(1000, 800);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].shift, [0, 0]);
    assert_eq!(regions[0].vertices,
               vec![[50, 40], [50, 760], [950, 760], [950, 40]]);
}

#[test]
fn test_parse_grain_metadata() {
    let xml = r#"
        <ImageMetadata>
          <Information><Image><SizeX>1608</SizeX><SizeY>1608</SizeY></Image></Information>
          <Scaling><Items>
            <Distance Id="X"><Value>1.0E-07</Value></Distance>
            <Distance Id="Y"><Value>2.0E-07</Value></Distance>
          </Items></Scaling>
          <HardwareSetting>
            <ParameterCollection Id="MTBStageAxisX"><Position>12.5</Position></ParameterCollection>
            <ParameterCollection Id="MTBStageAxisY"><Position>-3.25</Position></ParameterCollection>
          </HardwareSetting>
        </ImageMetadata>"#;
    let meta = parse_grain_metadata(xml).unwrap();
    assert_eq!(meta.image_width, Some(1608));
    assert_eq!(meta.image_height, Some(1608));
    assert_eq!(meta.scale_x, Some(1.0e-7));
    assert_eq!(meta.scale_y, Some(2.0e-7));
    assert_eq!(meta.stage_x, Some(12.5));
    assert_eq!(meta.stage_y, Some(-3.25));
}

#[test]
fn test_parse_grain_metadata_partial() {
    let meta = parse_grain_metadata("<ImageMetadata></ImageMetadata>").unwrap();
    assert_eq!(meta, GrainMetadata::default());
}

#[test]
fn test_parse_image_metadata() {
    let xml = r#"
        <ImageMetadata>
          <HardwareSetting>
            <ParameterCollection Id="MTBRLTLSwitch"><PositionName>RLTLSwitch.RL</PositionName></ParameterCollection>
            <ParameterCollection Id="MTBFocus"><Position>2.125</Position></ParameterCollection>
          </HardwareSetting>
        </ImageMetadata>"#;
    let meta = parse_image_metadata(xml).unwrap();
    assert_eq!(meta.light_path.as_deref(), Some("R"));
    assert_eq!(meta.focus, Some(2.125));

    let tl = parse_image_metadata(
        r#"<M><HardwareSetting>
             <ParameterCollection Id="MTBRLTLSwitch"><PositionName>RLTLSwitch.TL</PositionName></ParameterCollection>
           </HardwareSetting></M>"#,
    ).unwrap();
    assert_eq!(tl.light_path.as_deref(), Some("T"));
    assert_eq!(tl.focus, None);
}

#[test]
#[ignore]
fn test_db_new_grain_roundtrips_the_descriptor() {
    let mut conn = scratch_conn();
    let (user, _) = scratch_user(&mut conn, "uploader");
    let (_, sample) = scratch_sample(&mut conn, user.id, "SCR-8", 5);

    let descriptor = br#"{
        "image_width": 1000,
        "image_height": 800,
        "scale_x": 1.5e-7,
        "regions": [{"shift": [4, -2],
                     "vertices": [[10, 10], [990, 10], [990, 790], [10, 790]]}]
    }"#;
    let files = vec![("rois.json".to_owned(), descriptor.to_vec())];

    let grain = new_grain(&mut conn, &sample, None, &files).unwrap();
    assert_eq!(grain.index, 1);
    assert_eq!((grain.image_width, grain.image_height), (1000, 800));
    assert_eq!((grain.shift_x, grain.shift_y), (4, -2));
    assert_eq!(grain.scale_x, Some(1.5e-7));

    let bundle = rois::get_rois(&mut conn, &grain).unwrap();
    assert_eq!((bundle.image_width, bundle.image_height), (1000, 800));
    assert_eq!(bundle.regions.len(), 1);
    assert_eq!(bundle.regions[0].shift, [4, -2]);
    assert_eq!(bundle.regions[0].vertices,
               vec![[10, 10], [990, 10], [990, 790], [10, 790]]);

    let next = new_grain(&mut conn, &sample, None, &files).unwrap();
    assert_eq!(next.index, 2);
}

#[test]
#[ignore]
fn test_db_grain_uploads_grow_the_sample_total() {
    use schema::samples;

    let mut conn = scratch_conn();
    let (user, sess) = scratch_user(&mut conn, "uploader");
    // Provisioned without a grain total, like a bare create-sample call.
    let (_, sample) = scratch_sample(&mut conn, user.id, "SCR-10", 0);

    let descriptor = br#"{
        "image_width": 1000,
        "image_height": 800,
        "regions": [{"shift": [0, 0],
                     "vertices": [[10, 10], [990, 10], [990, 790], [10, 790]]}]
    }"#;
    let files = vec![("rois.json".to_owned(), descriptor.to_vec())];

    new_grain(&mut conn, &sample, None, &files).unwrap();
    let grown: Sample = samples::table
        .filter(samples::id.eq(sample.id))
        .first(&mut conn)
        .unwrap();
    assert_eq!(grown.total_grains, 1);
    assert!(!grown.completed);

    // The sample must be assignable, not silently marked completed.
    match assignment::next_unit(&mut conn, &sess).unwrap() {
        assignment::NextUnit::Work(a) => {
            assert_eq!((a.sample_id, a.grain_index), (sample.id, 1));
        }
        other => panic!("expected work on the uploaded grain, got {:?}", other),
    }

    new_grain(&mut conn, &grown, Some(7), &files).unwrap();
    let widened: Sample = samples::table
        .filter(samples::id.eq(sample.id))
        .first(&mut conn)
        .unwrap();
    assert_eq!(widened.total_grains, 7);
}
