//! Reference database construction from a directory of labelled images.
//!
//! Layout: every sub-directory of the root is one identity, and every image
//! below it (at any depth) is labelled with the sub-directory name. Images
//! sitting directly in the root are labelled with their file stem.

use crate::types::{Database, DescriptorError, FaceRecord, InvalidRecord};
use crate::vision::{CollaboratorError, DetectionMode, FaceEmbedder, FsImageSource, ImageSource};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("database directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("failed to scan {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: CollaboratorError,
    },
    #[error("face detection failed on {path}: {source}")]
    Embedder {
        path: PathBuf,
        #[source]
        source: CollaboratorError,
    },
    #[error("{path}: {found}-dim descriptor, database uses {expected}")]
    InconsistentDescriptor {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("unusable descriptor for a face in {path}: {source}")]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: DescriptorError,
    },
    #[error("image path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

/// Detector settings used while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub mode: DetectionMode,
    pub upsampling: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Accurate,
            upsampling: 1,
        }
    }
}

/// An image found under the database root, with its identity label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub name: String,
    pub path: PathBuf,
}

/// Builds a [`Database`] by running the embedder over every reference image.
pub struct DatabaseBuilder<E, S = FsImageSource> {
    embedder: E,
    images: S,
    options: BuildOptions,
}

impl<E: FaceEmbedder> DatabaseBuilder<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            images: FsImageSource,
            options: BuildOptions::default(),
        }
    }
}

impl<E: FaceEmbedder, S: ImageSource> DatabaseBuilder<E, S> {
    pub fn with_image_source<S2: ImageSource>(self, images: S2) -> DatabaseBuilder<E, S2> {
        DatabaseBuilder {
            embedder: self.embedder,
            images,
            options: self.options,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Scan `root` and produce one record per detected face.
    ///
    /// Images without faces are skipped with a warning. Any unreadable image
    /// or detector failure aborts the build.
    pub fn build(&mut self, root: &Path) -> Result<Database, BuildError> {
        let started = Instant::now();
        let images = scan(root)?;
        tracing::info!(
            root = %root.display(),
            images = images.len(),
            mode = %self.options.mode,
            upsampling = self.options.upsampling,
            "building face database"
        );

        let mut records: Vec<FaceRecord> = Vec::new();
        let mut faceless = 0usize;

        for LabeledImage { name, path } in images.iter().cloned() {
            let image = self.images.open(&path).map_err(|source| BuildError::Image {
                path: path.clone(),
                source,
            })?;
            let faces = self
                .embedder
                .detect_and_embed(&image, self.options.mode, self.options.upsampling)
                .map_err(|source| BuildError::Embedder {
                    path: path.clone(),
                    source,
                })?;

            if faces.is_empty() {
                tracing::warn!(path = %path.display(), "no face detected, skipping image");
                faceless += 1;
                continue;
            }
            tracing::debug!(path = %path.display(), name = %name, faces = faces.len(), "faces detected");

            let Some(image_path) = path.to_str().map(str::to_owned) else {
                return Err(BuildError::NonUtf8Path(path));
            };
            for face in faces {
                if let Err(source) = face.descriptor.check() {
                    return Err(BuildError::InvalidDescriptor { path, source });
                }
                if let Some(expected) = records.first().map(|r| r.descriptor.len()) {
                    if face.descriptor.len() != expected {
                        return Err(BuildError::InconsistentDescriptor {
                            path,
                            expected,
                            found: face.descriptor.len(),
                        });
                    }
                }
                records.push(FaceRecord {
                    name: name.clone(),
                    image_path: image_path.clone(),
                    bounding_box: face.bounding_box,
                    descriptor: face.descriptor,
                });
            }
        }

        if records.is_empty() && !images.is_empty() {
            tracing::warn!(root = %root.display(), "no faces were detected in the database images");
        }

        let database = Database::new(records).map_err(|e| match e {
            InvalidRecord::Descriptor { source, .. } => BuildError::InvalidDescriptor {
                path: root.to_path_buf(),
                source,
            },
            InvalidRecord::InconsistentDescriptor { expected, found, .. } => {
                BuildError::InconsistentDescriptor {
                    path: root.to_path_buf(),
                    expected,
                    found,
                }
            }
        })?;

        tracing::info!(
            records = database.len(),
            identities = database.identities().len(),
            faceless_images = faceless,
            descriptor_len = ?database.descriptor_len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "face database built"
        );
        Ok(database)
    }
}

/// Build a database from `root` with images decoded from disk.
pub fn build_database<E: FaceEmbedder>(
    root: &Path,
    embedder: E,
    options: BuildOptions,
) -> Result<Database, BuildError> {
    DatabaseBuilder::new(embedder).with_options(options).build(root)
}

/// List every image under `root` in lexicographic order with its label.
///
/// Symbolic links are followed; a link cycle is reported as [`BuildError::Walk`].
pub fn scan(root: &Path) -> Result<Vec<LabeledImage>, BuildError> {
    if !root.is_dir() {
        return Err(BuildError::RootNotFound(root.to_path_buf()));
    }

    let mut images = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|source| BuildError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() || !is_image(entry.path()) {
            continue;
        }
        if entry.path().to_str().is_none() {
            return Err(BuildError::NonUtf8Path(entry.into_path()));
        }
        if entry.path_is_symlink() {
            tracing::debug!(path = %entry.path().display(), "following symlink");
        }
        match identity_label(root, entry.path()) {
            Some(name) => images.push(LabeledImage {
                name,
                path: entry.into_path(),
            }),
            None => tracing::debug!(path = %entry.path().display(), "cannot derive identity label"),
        }
    }
    Ok(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Sub-directory name directly under `root`, or the file stem for top-level images.
fn identity_label(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut components = relative.components();
    let first = components.next()?;
    let label = if components.next().is_some() {
        first.as_os_str().to_string_lossy()
    } else {
        relative.file_stem()?.to_string_lossy()
    };
    Some(label.into_owned())
}
