use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use http::{Method, StatusCode};
use tracing::debug;

use crate::collaborators::Controller;
use crate::server::{Request, Response};

/// Files under one public directory, addressed by URL path.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base_dir: base.into() }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a URL path below the base directory; `..` and absolute components are refused.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.base_dir.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn content_type(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase()
            .as_str()
        {
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" => "application/javascript",
            "json" => "application/json",
            "xml" => "application/xml",
            "txt" => "text/plain",
            "png" => "image/png",
            "ico" => "image/x-icon",
            _ => "application/octet-stream",
        }
    }

    /// Read a file and infer its content type. A directory serves its `index.html`.
    pub fn load(&self, url_path: &str) -> io::Result<(Vec<u8>, &'static str)> {
        let mut path = self
            .map_path(url_path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "invalid path"))?;
        if path.is_dir() {
            path.push("index.html");
        }
        if !path.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        }
        let bytes = fs::read(&path)?;
        Ok((bytes, Self::content_type(&path)))
    }
}

/// Serves [`StaticFiles`] for `GET` and `HEAD`; everything else is answered in-band.
#[derive(Debug, Clone)]
pub struct StaticFilesController {
    files: StaticFiles,
}

impl StaticFilesController {
    pub fn new(files: StaticFiles) -> Self {
        Self { files }
    }
}

impl Controller for StaticFilesController {
    fn name(&self) -> &str {
        "static_files"
    }

    fn process(&self, request: &Request, response: &mut Response) -> anyhow::Result<()> {
        if request.method != Method::GET && request.method != Method::HEAD {
            response.set_header("Allow", "GET, HEAD".to_string());
            response.render(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "Method Not Allowed");
            return Ok(());
        }
        match self.files.load(&request.path) {
            Ok((bytes, content_type)) => {
                response.render(StatusCode::OK, content_type, bytes);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %request.path, "Static file not found");
                response.render(StatusCode::NOT_FOUND, "text/plain", "Not Found");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
