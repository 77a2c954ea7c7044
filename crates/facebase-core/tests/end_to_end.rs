use facebase_core::{
    build_database, load, recognize, save, BoundingBox, BuildOptions, CollaboratorError,
    DetectionMode, Descriptor, FaceDetection, FaceEmbedder, MatchError,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::fs;
use std::path::Path;

/// Treats a uniformly coloured image as a single face whose descriptor is the
/// normalised colour. Black images contain no face.
struct ColourEmbedder;

impl FaceEmbedder for ColourEmbedder {
    fn detect_and_embed(
        &mut self,
        image: &DynamicImage,
        _mode: DetectionMode,
        _upsampling: u32,
    ) -> Result<Vec<FaceDetection>, CollaboratorError> {
        let rgb = image.to_rgb8();
        let Rgb([r, g, b]) = *rgb.get_pixel(0, 0);
        if [r, g, b] == [0, 0, 0] {
            return Ok(Vec::new());
        }
        Ok(vec![FaceDetection {
            bounding_box: BoundingBox::new(0, 0, rgb.width() as i32, rgb.height() as i32)?,
            descriptor: Descriptor::new(
                [r, g, b].iter().map(|&c| f32::from(c) / 255.0).collect(),
            ),
        }])
    }
}

fn write_face(root: &Path, rel: &str, colour: [u8; 3]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(16, 12, Rgb(colour)).save(&path).unwrap();
}

fn probe(colour: [u8; 3]) -> FaceDetection {
    FaceDetection {
        bounding_box: BoundingBox::new(5, 5, 50, 60).unwrap(),
        descriptor: Descriptor::new(colour.iter().map(|&c| f32::from(c) / 255.0).collect()),
    }
}

#[test]
fn build_save_load_recognize() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("database");
    write_face(&root, "alice/alice.png", [200, 30, 30]);
    write_face(&root, "bob/bob.png", [30, 30, 200]);

    let db = build_database(&root, ColourEmbedder, BuildOptions::default()).unwrap();
    assert_eq!(db.len(), 2);

    let csv_path = dir.path().join("people.csv");
    save(&db, &csv_path).unwrap();
    let loaded = load(&csv_path).unwrap();
    assert_eq!(loaded, db);

    let alice = &loaded.records()[0];
    assert_eq!(alice.name, "alice");
    assert_eq!(alice.bounding_box.to_array(), [0, 0, 16, 12]);

    let query = FaceDetection {
        bounding_box: BoundingBox::new(5, 5, 50, 60).unwrap(),
        descriptor: alice.descriptor.clone(),
    };
    let results = recognize(&[query], &loaded, 0.6).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name.as_deref(), Some("alice"));
    assert!(results[0].distance.unwrap().abs() < 1e-6);
    assert_eq!(results[0].bounding_box.to_array(), [5, 5, 50, 60]);
}

#[test]
fn faceless_reference_images_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_face(root, "alice/dark.png", [0, 0, 0]);
    write_face(root, "alice/lit.png", [180, 180, 180]);
    write_face(root, "carol.png", [10, 200, 10]);

    let db = build_database(root, ColourEmbedder, BuildOptions::default()).unwrap();
    let names: Vec<_> = db.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["alice", "carol"]);
    assert!(db.records()[0].image_path.ends_with("lit.png"));
}

#[test]
fn unknown_faces_and_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_face(root, "alice/1.png", [255, 0, 0]);
    write_face(root, "bob/1.png", [0, 0, 255]);
    let db = build_database(root, ColourEmbedder, BuildOptions::default()).unwrap();

    let results = recognize(&[probe([250, 5, 5]), probe([0, 255, 0])], &db, 0.1).unwrap();
    let labels: Vec<_> = results.iter().map(|r| r.label()).collect();
    assert_eq!(labels, vec!["alice", "unknown"]);

    assert!(matches!(
        recognize(&[probe([1, 1, 1])], &db, -0.1),
        Err(MatchError::InvalidThreshold(_))
    ));
}

#[test]
fn build_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_face(root, "zed/a.png", [1, 2, 3]);
    write_face(root, "amy/b.png", [4, 5, 6]);
    write_face(root, "amy/a.png", [7, 8, 9]);

    let first = facebase_core::codec::encode_to_string(
        &build_database(root, ColourEmbedder, BuildOptions::default()).unwrap(),
    )
    .unwrap();
    let second = facebase_core::codec::encode_to_string(
        &build_database(root, ColourEmbedder, BuildOptions::default()).unwrap(),
    )
    .unwrap();
    assert_eq!(first, second);

    let names: Vec<_> = facebase_core::codec::decode_str(&first)
        .unwrap()
        .iter()
        .map(|r| r.name.clone())
        .collect();
    assert_eq!(names, vec!["amy", "amy", "zed"]);
}
