use std::io;
use std::path::{Path, PathBuf};

/// A document written to transient local storage for the duration of one
/// request.
#[derive(Debug)]
pub struct StagedDocument {
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
}

/// Owns every file staged for a single request and guarantees each backing
/// file is released exactly once, on every exit path.
///
/// Callers stage entries one at a time (a failed entry leaves the set usable
/// for the rest of the sequence) and must call [`release`](Self::release)
/// before returning. Dropping an unreleased set removes the files
/// synchronously as a backstop.
pub struct StagedSet {
    dir: PathBuf,
    docs: Vec<StagedDocument>,
    released: bool,
}

impl StagedSet {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            docs: Vec::new(),
            released: false,
        }
    }

    /// Writes `content` to a uniquely-named path derived from `id` and
    /// `filename` and takes ownership of the resulting file.
    pub async fn stage(
        &mut self,
        id: &str,
        filename: &str,
        content: &[u8],
    ) -> io::Result<&StagedDocument> {
        let flat = flatten_filename(filename)?;
        let path = self.dir.join(format!("temp_{id}_{flat}"));

        tokio::fs::write(&path, content).await?;

        let doc = StagedDocument {
            id: id.to_string(),
            filename: filename.to_string(),
            path,
        };
        tracing::debug!(
            document_id = %doc.id,
            filename = %doc.filename,
            path = %doc.path.display(),
            bytes = content.len(),
            "staged document"
        );
        self.docs.push(doc);
        Ok(self.docs.last().unwrap())
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.docs.iter().map(|d| d.path.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Removes every staged file. Best-effort: a file already gone is not an
    /// error, and removal failures are logged and swallowed.
    pub async fn release(&mut self) {
        for doc in self.docs.drain(..) {
            if let Err(e) = tokio::fs::remove_file(&doc.path).await
                && e.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!(path = %doc.path.display(), error = %e, "failed to remove staged file");
            }
        }
        self.released = true;
    }
}

impl Drop for StagedSet {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for doc in self.docs.drain(..) {
            let _ = std::fs::remove_file(&doc.path);
        }
    }
}

/// Collapses a client-supplied filename to a single path component so staged
/// paths always land inside the staging directory.
fn flatten_filename(filename: &str) -> io::Result<String> {
    let flat: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();

    if flat.trim_matches(['_', '.', ' ']).is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty filename",
        ));
    }
    Ok(flat)
}
