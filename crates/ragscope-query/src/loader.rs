//! Loading a directory of plain-text documents.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, DirEntry};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use ragscope_core::{Document, RagError, StartupError};

/// The documents of one corpus directory, keyed (and ordered) by filename.
#[derive(Debug, Default)]
pub struct Corpus {
    documents: BTreeMap<String, Document>,
    skipped: Vec<RagError>,
}

impl Corpus {
    /// Load every regular file directly inside `dir` as a document.
    ///
    /// Subdirectories are ignored. An entry that cannot be inspected, a file
    /// that cannot be read or is not valid UTF-8, and a file whose name
    /// collides with another after lossy UTF-8 conversion are skipped and
    /// recorded in [`Corpus::skipped`]. Failing to list `dir` is fatal.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, StartupError> {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|e| StartupError::corpus_load(dir, e))?;

        let mut corpus = Corpus::default();
        let paths = corpus.collect_files(dir, entries);

        for (name, path) in paths {
            match fs::read_to_string(&path) {
                Ok(content) => corpus.insert(Document::new(name, content)),
                Err(e) => {
                    warn!("Skipping document {}: {}", name, e);
                    corpus.skipped.push(RagError::document_read(name, e));
                }
            }
        }

        info!(
            "Loaded {} documents from {:?} ({} skipped)",
            corpus.documents.len(),
            dir,
            corpus.skipped.len()
        );

        Ok(corpus)
    }

    /// Regular files (or symlinks to them) among `entries`, keyed by display
    /// name. Entries are visited in raw filename order so the same file wins
    /// a name collision on every run.
    fn collect_files(
        &mut self,
        dir: &Path,
        entries: impl IntoIterator<Item = io::Result<DirEntry>>,
    ) -> BTreeMap<String, PathBuf> {
        let mut candidates: Vec<(OsString, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                    self.skipped
                        .push(RagError::document_read(dir.display().to_string(), e));
                    continue;
                }
            };

            let path = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_file() => candidates.push((entry.file_name(), path)),
                Ok(t) if t.is_symlink() && path.is_file() => {
                    candidates.push((entry.file_name(), path))
                }
                Ok(_) => debug!("Skipping non-file entry {:?}", path),
                Err(e) => {
                    warn!("Skipping {:?}: {}", path, e);
                    let name = entry.file_name().to_string_lossy().into_owned();
                    self.skipped.push(RagError::document_read(name, e));
                }
            }
        }
        candidates.sort();

        let mut files = BTreeMap::new();
        for (raw, path) in candidates {
            let name = raw.to_string_lossy().into_owned();
            match files.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(path);
                }
                Entry::Occupied(slot) => {
                    warn!("Skipping {:?}: name collides with {:?}", path, slot.get());
                    self.skipped.push(RagError::document_read(
                        slot.key().clone(),
                        format!("name collides with {}", slot.get().display()),
                    ));
                }
            }
        }
        files
    }

    /// Build a corpus from in-memory `(filename, content)` pairs.
    pub fn from_documents<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut corpus = Corpus::default();
        for (id, content) in documents {
            corpus.insert(Document::new(id, content));
        }
        corpus
    }

    fn insert(&mut self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    /// Documents in filename order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Look up a document by filename.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Number of loaded documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether no documents were loaded.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Files that were found but could not be loaded.
    pub fn skipped(&self) -> &[RagError] {
        &self.skipped
    }

    /// Filename to content, as returned to callers.
    pub fn contents(&self) -> BTreeMap<String, String> {
        self.documents
            .iter()
            .map(|(id, doc)| (id.clone(), doc.content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_sorted_by_filename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "second").unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), "ignored").unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();

        let ids: Vec<_> = corpus.documents().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["a.txt", "b.txt"]);
        assert_eq!(corpus.get("a.txt").unwrap().content, "first");
        assert!(corpus.skipped().is_empty());
    }

    #[test]
    fn test_non_utf8_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), "hello").unwrap();
        fs::write(dir.path().join("bad.bin"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();

        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.skipped().len(), 1);
        assert!(matches!(
            &corpus.skipped()[0],
            RagError::DocumentRead { id, .. } if id == "bad.bin"
        ));
    }

    #[test]
    fn test_entry_errors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();

        let entries = fs::read_dir(dir.path())
            .unwrap()
            .chain(std::iter::once(Err(io::Error::other("stale handle"))));

        let mut corpus = Corpus::default();
        let files = corpus.collect_files(dir.path(), entries);

        assert_eq!(files.keys().collect::<Vec<_>>(), ["a.txt"]);
        assert_eq!(corpus.skipped().len(), 1);
        assert_eq!(corpus.skipped()[0].error_code(), "DOCUMENT_READ_ERROR");
    }

    #[cfg(unix)]
    #[test]
    fn test_lossy_name_collision_is_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xff.txt")), "second").unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"a\xfe.txt")), "first").unwrap();

        let corpus = Corpus::load(dir.path()).unwrap();

        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get("a\u{FFFD}.txt").unwrap().content, "first");
        assert_eq!(corpus.skipped().len(), 1);
        assert!(matches!(
            &corpus.skipped()[0],
            RagError::DocumentRead { id, .. } if id == "a\u{FFFD}.txt"
        ));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Corpus::load(dir.path().join("missing")).unwrap_err();
        assert_eq!(err.error_code(), "CORPUS_LOAD_ERROR");
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::load(dir.path()).unwrap();
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_from_documents() {
        let corpus = Corpus::from_documents([("z.txt", "zed"), ("m.txt", "em")]);
        let contents = corpus.contents();
        assert_eq!(contents.keys().collect::<Vec<_>>(), ["m.txt", "z.txt"]);
        assert_eq!(contents["z.txt"], "zed");
    }
}
