//! The primitive catalogue, built from annotated declaration lines.
//!
//! An annotated line starts (after trimming) with the sentinel `///`,
//! followed by a declaration and a trailing `// description`:
//!
//! ```text
//! ///std::vector<Eigen::MatrixXi> fliplr(std::vector<Eigen::MatrixXi> arg0); // Flip left and right columns
//! ```
//!
//! Lines that do not follow the declaration grammar are dropped. The
//! catalogue is best-effort over all annotated lines and never fails on
//! content, only on I/O.

use std::collections::HashMap;
use std::path::Path;

use crate::signature::Signature;

/// Sentinel marking an annotated declaration line.
pub const ANNOTATION_SENTINEL: &str = "///";

/// Delimiter between a declaration and its description.
const DESCRIPTION_DELIMITER: &str = "//";

/// An annotated declaration kept verbatim alongside its parsed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry {
    /// The annotated line with the sentinel stripped
    pub annotation: String,
    /// The parsed signature (description attached)
    pub signature: Signature,
}

/// Ordered, unique set of primitive signatures.
///
/// Uniqueness is by canonical key; the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: Vec<CatalogueEntry>,
    by_key: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Catalogue {
    /// Build a catalogue from annotated source text.
    pub fn parse(source: &str) -> Self {
        let mut catalogue = Self::default();
        let mut dropped = 0u64;

        for line in source.lines() {
            let trimmed = line.trim();
            let Some(annotation) = trimmed.strip_prefix(ANNOTATION_SENTINEL) else {
                continue;
            };

            match parse_annotation(annotation) {
                Some(signature) => {
                    catalogue.insert(CatalogueEntry {
                        annotation: annotation.trim().to_string(),
                        signature,
                    });
                }
                None => {
                    dropped += 1;
                    tracing::debug!(line = annotation, "dropping malformed annotated declaration");
                }
            }
        }

        if dropped > 0 {
            tracing::debug!(dropped, kept = catalogue.len(), "catalogue built with dropped lines");
        }

        catalogue
    }

    /// Build a catalogue from an annotated source file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogueError> {
        let source = std::fs::read_to_string(path).map_err(|source| CatalogueError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&source))
    }

    fn insert(&mut self, entry: CatalogueEntry) {
        let key = entry.signature.canonical_key();
        if self.by_key.contains_key(&key) {
            tracing::debug!(key = %key, "duplicate catalogue entry ignored");
            return;
        }

        let index = self.entries.len();
        self.by_name
            .entry(entry.signature.name.clone())
            .or_insert(index);
        self.by_key.insert(key, index);
        self.entries.push(entry);
    }

    /// Look up a signature by its exact canonical key.
    ///
    /// Lookup is literal: whitespace differences are a miss.
    pub fn get_by_key(&self, key: &str) -> Option<&Signature> {
        self.by_key.get(key).map(|&i| &self.entries[i].signature)
    }

    /// Look up the first signature with the given name.
    pub fn get_by_name(&self, name: &str) -> Option<&Signature> {
        self.by_name.get(name).map(|&i| &self.entries[i].signature)
    }

    /// Whether a primitive with this name exists.
    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterate signatures in source order.
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.entries.iter().map(|e| &e.signature)
    }

    /// Iterate entries (annotation + signature) in source order.
    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }


    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalogue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse one annotation (sentinel already stripped).
///
/// The description is everything after the last `//`; without a `//` the
/// whole annotation is the declaration.
fn parse_annotation(annotation: &str) -> Option<Signature> {
    let (declaration, description) = match annotation.rfind(DESCRIPTION_DELIMITER) {
        Some(i) => (
            &annotation[..i],
            annotation[i + DESCRIPTION_DELIMITER.len()..].trim(),
        ),
        None => (annotation, ""),
    };

    Signature::parse(declaration).map(|s| s.with_description(description))
}

/// Catalogue errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("Failed to read annotated source {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
