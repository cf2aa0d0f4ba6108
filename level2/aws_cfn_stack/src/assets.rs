//! Local asset packaging.
//!
//! A local path is turned into an object that can be uploaded to the
//! asset bucket: directories are zipped, single files are staged as is.
//! The object key is derived from a fingerprint of the source contents
//! so unchanged sources map to the same key across runs.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Asset path {path:?} does not exist")]
    NotFound { path: PathBuf },

    #[error("Failed to stage asset {path:?}\n{source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build zip archive for {path:?}\n{source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetOptions {
    /// use this instead of the computed content fingerprint.
    pub asset_hash: Option<String>,
    /// entries of a directory asset to leave out. An entry matches a
    /// relative path exactly, any path below it, or, when written as
    /// `*.ext`, any file with that suffix.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetPackaging {
    ZipDirectory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedAsset {
    pub source_hash: String,
    pub object_key: String,
    pub is_zip_archive: bool,
    pub packaging: AssetPackaging,
    /// where the packaged bytes were written, if anywhere.
    pub staged_path: Option<PathBuf>,
}

pub trait AssetPackager {
    fn package(&self, path: &Path, options: &AssetOptions) -> Result<PackagedAsset, AssetError>;
}

/// packages assets into `out_dir` as `asset.<hash>.<ext>`.
#[derive(Debug, Clone)]
pub struct ZipAssetPackager {
    out_dir: PathBuf,
}

impl ZipAssetPackager {
    pub fn new<P: Into<PathBuf>>(out_dir: P) -> Self {
        Self { out_dir: out_dir.into() }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn package_directory(&self, dir: &Path, options: &AssetOptions) -> Result<PackagedAsset, AssetError> {
        let mut files = vec![];
        iter_files_recursively(dir, &mut |p| {
            let relative = relative_name(dir, &p);
            if !is_excluded(&relative, &options.exclude) {
                files.push((relative, p));
            }
            Ok(())
        })?;
        files.sort();

        let source_hash = match &options.asset_hash {
            Some(h) => h.clone(),
            None => {
                let mut hasher = Sha256::new();
                for (relative, p) in files.iter() {
                    let contents = read(p)?;
                    hasher.update(relative.as_bytes());
                    hasher.update([0u8]);
                    hasher.update((contents.len() as u64).to_le_bytes());
                    hasher.update(&contents);
                }
                format!("{:x}", hasher.finalize())
            }
        };

        let object_key = format!("{source_hash}.zip");
        let staged_path = self.out_dir.join(format!("asset.{object_key}"));
        if staged_path.exists() {
            info!(path = %dir.display(), staged = %staged_path.display(), "asset already staged");
        } else {
            let mut staging = self.staging_file()?;
            write_zip(dir, &files, &mut staging)?;
            persist(staging, &staged_path)?;
            info!(path = %dir.display(), files = files.len(), staged = %staged_path.display(), "zipped directory asset");
        }
        Ok(PackagedAsset {
            source_hash,
            object_key,
            is_zip_archive: true,
            packaging: AssetPackaging::ZipDirectory,
            staged_path: Some(staged_path),
        })
    }

    fn package_file(&self, file: &Path, options: &AssetOptions) -> Result<PackagedAsset, AssetError> {
        let extension = file.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let is_zip_archive = extension == "zip" || extension == "jar";
        let source_hash = match &options.asset_hash {
            Some(h) => h.clone(),
            None => {
                let contents = read(file)?;
                format!("{:x}", Sha256::digest(&contents))
            }
        };
        let object_key = if extension.is_empty() {
            source_hash.clone()
        } else {
            format!("{source_hash}.{extension}")
        };
        let staged_path = self.out_dir.join(format!("asset.{object_key}"));
        if !staged_path.exists() {
            let mut staging = self.staging_file()?;
            let mut source_file = std::fs::File::open(file).map_err(|source| AssetError::Io { path: file.to_path_buf(), source })?;
            std::io::copy(&mut source_file, &mut staging).map_err(|source| AssetError::Io { path: file.to_path_buf(), source })?;
            persist(staging, &staged_path)?;
            info!(path = %file.display(), staged = %staged_path.display(), "staged file asset");
        }
        Ok(PackagedAsset {
            source_hash,
            object_key,
            is_zip_archive,
            packaging: AssetPackaging::File,
            staged_path: Some(staged_path),
        })
    }

    /// a file next to where staged assets go. It is removed again
    /// unless it gets persisted under its final name.
    fn staging_file(&self) -> Result<NamedTempFile, AssetError> {
        let io_err = |source| AssetError::Io { path: self.out_dir.clone(), source };
        std::fs::create_dir_all(&self.out_dir).map_err(io_err)?;
        NamedTempFile::new_in(&self.out_dir).map_err(io_err)
    }
}

/// only complete archives ever appear under a staged name, since an
/// existing staged file is reused as is.
fn persist(staging: NamedTempFile, staged_path: &Path) -> Result<(), AssetError> {
    staging.persist(staged_path)
        .map(|_| ())
        .map_err(|e| AssetError::Io { path: staged_path.to_path_buf(), source: e.error })
}

impl AssetPackager for ZipAssetPackager {
    fn package(&self, path: &Path, options: &AssetOptions) -> Result<PackagedAsset, AssetError> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssetError::NotFound { path: path.to_path_buf() });
            }
            Err(source) => return Err(AssetError::Io { path: path.to_path_buf(), source }),
        };
        if meta.is_dir() {
            self.package_directory(path, options)
        } else {
            self.package_file(path, options)
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, AssetError> {
    std::fs::read(path).map_err(|source| AssetError::Io { path: path.to_path_buf(), source })
}

fn iter_files_recursively(
    start_dir: &Path,
    callback: &mut impl FnMut(PathBuf) -> Result<(), AssetError>,
) -> Result<(), AssetError> {
    let io_err = |source| AssetError::Io { path: start_dir.to_path_buf(), source };
    let readdir = std::fs::read_dir(start_dir).map_err(io_err)?;
    for entry in readdir {
        let direntry = entry.map_err(io_err)?;
        let path = direntry.path();
        if path.is_dir() {
            iter_files_recursively(&path, callback)?;
        } else {
            callback(path)?;
        }
    }
    Ok(())
}

/// relative path with `/` separators regardless of platform.
fn relative_name(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_excluded(relative: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix('*') {
            return relative.ends_with(suffix);
        }
        let pattern = pattern.trim_end_matches('/');
        relative == pattern || relative.starts_with(&format!("{pattern}/"))
    })
}

fn write_zip(dir: &Path, files: &[(String, PathBuf)], out: &mut NamedTempFile) -> Result<(), AssetError> {
    let zip_err = |source| AssetError::Zip { path: dir.to_path_buf(), source };
    let mut writer = zip::ZipWriter::new(out);
    // fixed timestamps keep archives byte for byte reproducible
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    for (relative, path) in files {
        writer.start_file(relative.as_str(), options).map_err(zip_err)?;
        let contents = read(path)?;
        writer.write_all(&contents).map_err(|source| AssetError::Io { path: path.clone(), source })?;
    }
    writer.finish().map_err(zip_err)?;
    Ok(())
}
