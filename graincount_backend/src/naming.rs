//! Upload filename classification.
//!
//! One anchored grammar covers everything a grain upload may contain:
//!
//! ```text
//! name = "rois.json"
//!      | ("mica"? "refl"? "stack" ("-" z | "flat")) "." ext ("_metadata.xml")?
//! ext  = "jpg" | "jpeg" | "png"
//! z    = signed integer
//! ```
//!
//! Names are matched case-insensitively. Anything else is rejected.

use crate::errors::*;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

lazy_static! {
    static ref UPLOAD_NAME: Regex = Regex::new(
        r"(?i)^(?:(?P<rois>rois\.json)|(?P<mica>mica)?(?P<refl>refl)?stack(?:-(?P<z>-?[0-9]+)|(?P<flat>flat))\.(?P<ext>jpe?g|png)(?P<meta>_metadata\.xml)?)$"
    ).expect("the upload name grammar is a valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FtType {
    Spontaneous,
    Induced,
}

impl FtType {
    pub fn as_str(self) -> &'static str {
        match self {
            FtType::Spontaneous => "S",
            FtType::Induced => "I",
        }
    }

    pub fn from_str(s: &str) -> Result<FtType> {
        match s {
            "S" => Ok(FtType::Spontaneous),
            "I" => Ok(FtType::Induced),
            other => Err(ErrorKind::InvalidInput(format!("unknown track type {:?}", other)).into()),
        }
    }
}

impl serde::Serialize for FtType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for FtType {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> ::std::result::Result<FtType, D::Error> {
        let s = String::deserialize(de)?;
        FtType::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImgFormat {
    Jpeg,
    Png,
}

impl ImgFormat {
    /// Single-letter code stored in the image row.
    pub fn as_str(self) -> &'static str {
        match self {
            ImgFormat::Jpeg => "J",
            ImgFormat::Png => "P",
        }
    }

    pub fn from_str(s: &str) -> Result<ImgFormat> {
        match s {
            "J" => Ok(ImgFormat::Jpeg),
            "P" => Ok(ImgFormat::Png),
            other => Err(ErrorKind::InvalidInput(format!("unknown image format {:?}", other)).into()),
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImgFormat::Jpeg => "image/jpeg",
            ImgFormat::Png => "image/png",
        }
    }

    fn canonical_ext(self) -> &'static str {
        match self {
            ImgFormat::Jpeg => "jpg",
            ImgFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageName {
    pub mica: bool,
    pub refl: bool,
    pub flat: bool,
    pub meta: bool,
    pub ft_type: FtType,
    pub index: i32,
    pub format: ImgFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadName {
    Rois,
    Image(ImageName),
}

impl UploadName {
    pub fn is_image(&self) -> bool {
        match self {
            UploadName::Rois => false,
            UploadName::Image(img) => !img.meta,
        }
    }
}

/// Stack layers count upward from the flat composite: plain `flat` is 0,
/// the reflected flat composite is −1, a reflected layer z sits at 100 − z
/// so reflected stacks sort above ordinary ones.
fn image_index(refl: bool, flat: bool, z: i32) -> i32 {
    match (refl, flat) {
        (true, true) => -1,
        (false, true) => 0,
        (true, false) => 100 - z,
        (false, false) => z,
    }
}

pub fn parse_upload_name(name: &str) -> Result<UploadName> {
    let caps = UPLOAD_NAME
        .captures(name)
        .ok_or_else(|| ErrorKind::FileNameUnknown(name.to_owned()))?;

    if caps.name("rois").is_some() {
        return Ok(UploadName::Rois);
    }

    let mica = caps.name("mica").is_some();
    let refl = caps.name("refl").is_some();
    let flat = caps.name("flat").is_some();
    let z = match caps.name("z") {
        Some(z) => z.as_str()
            .parse::<i32>()
            .map_err(|_| ErrorKind::FileNameUnknown(name.to_owned()))?,
        None => 0,
    };
    let format = match &*caps["ext"].to_ascii_lowercase() {
        "png" => ImgFormat::Png,
        _ => ImgFormat::Jpeg,
    };

    Ok(UploadName::Image(ImageName {
        mica,
        refl,
        flat,
        meta: caps.name("meta").is_some(),
        ft_type: if mica { FtType::Induced } else { FtType::Spontaneous },
        index: image_index(refl, flat, z),
        format,
    }))
}

/// Renders the canonical filename back from a classification. Inverse of
/// `parse_upload_name` over (ft_type, index, refl, flat, meta).
pub fn format_upload_name(img: &ImageName) -> String {
    let mut name = String::new();
    if img.ft_type == FtType::Induced {
        name.push_str("mica");
    }
    if img.refl {
        name.push_str("refl");
    }
    name.push_str("stack");
    if img.flat {
        name.push_str("flat");
    } else {
        let z = if img.refl { 100 - img.index } else { img.index };
        name.push_str(&format!("-{}", z));
    }
    name.push('.');
    name.push_str(img.format.canonical_ext());
    if img.meta {
        name.push_str("_metadata.xml");
    }
    name
}


#[test]
fn test_classify_plain_stack() {
    let n = parse_upload_name("stack-03.jpg").unwrap();
    match n {
        UploadName::Image(img) => {
            assert!(n.is_image());
            assert_eq!(img.ft_type, FtType::Spontaneous);
            assert_eq!(img.index, 3);
            assert_eq!(img.format, ImgFormat::Jpeg);
            assert!(!img.meta && !img.mica && !img.refl && !img.flat);
        }
        _ => panic!("should classify as an image"),
    }
}

#[test]
fn test_classify_corners() {
    let cases: &[(&str, FtType, i32)] = &[
        ("stackflat.png", FtType::Spontaneous, 0),
        ("ReflStackFlat.JPEG", FtType::Spontaneous, -1),
        ("micastack-2.jpg", FtType::Induced, 2),
        ("micareflstack-2.jpg", FtType::Induced, 98),
        ("reflstack-0.png", FtType::Spontaneous, 100),
        ("stack--4.png", FtType::Spontaneous, -4),
    ];
    for &(name, ft, index) in cases {
        match parse_upload_name(name).unwrap() {
            UploadName::Image(img) => {
                assert_eq!(img.ft_type, ft, "{}", name);
                assert_eq!(img.index, index, "{}", name);
            }
            _ => panic!("{} should classify as an image", name),
        }
    }
}

#[test]
fn test_classify_rois_and_metadata() {
    assert_eq!(parse_upload_name("rois.json").unwrap(), UploadName::Rois);
    assert_eq!(parse_upload_name("ROIS.JSON").unwrap(), UploadName::Rois);
    assert!(!parse_upload_name("rois.json").unwrap().is_image());

    let n = parse_upload_name("stack-5.jpg_metadata.xml").unwrap();
    assert!(!n.is_image());
    match n {
        UploadName::Image(img) => {
            assert!(img.meta);
            assert_eq!(img.index, 5);
        }
        _ => panic!("metadata names carry their image classification"),
    }
}

#[test]
fn test_rejects() {
    for name in &["grain.tif", "stack.png", "stackflat", "stack-5", "mica.jpg",
                  "xstack-1.jpg", "stack-1.jpgx", "rois.json5", "stack-1.gif"] {
        assert!(parse_upload_name(name).is_err(), "{} should be rejected", name);
    }
}

#[test]
fn test_format_classify_bijection() {
    let mut names = Vec::new();
    for &ft_type in &[FtType::Spontaneous, FtType::Induced] {
        for &meta in &[false, true] {
            for &format in &[ImgFormat::Jpeg, ImgFormat::Png] {
                names.push(ImageName {
                    mica: ft_type == FtType::Induced,
                    refl: true, flat: true, meta, ft_type, index: -1, format,
                });
                names.push(ImageName {
                    mica: ft_type == FtType::Induced,
                    refl: false, flat: true, meta, ft_type, index: 0, format,
                });
                for index in -3..4 {
                    names.push(ImageName {
                        mica: ft_type == FtType::Induced,
                        refl: false, flat: false, meta, ft_type, index, format,
                    });
                    names.push(ImageName {
                        mica: ft_type == FtType::Induced,
                        refl: true, flat: false, meta, ft_type, index: 100 - index, format,
                    });
                }
            }
        }
    }
    for img in names {
        let rendered = format_upload_name(&img);
        assert_eq!(parse_upload_name(&rendered).unwrap(), UploadName::Image(img), "{}", rendered);
    }
}
