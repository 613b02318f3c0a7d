//! Per-person note ledger, one markdown file per person.
//!
//! Each file carries a TOML front matter block between `+++` fences followed
//! by one `- [YYYY-MM-DD] note` line per note. Notes are append-only.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::write_atomic;

const FENCE: &str = "+++";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipRecord {
    pub key: String,
    pub name: String,
    pub relationship_type: String,
    pub first_mentioned: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub notes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    name: String,
    #[serde(default)]
    relationship: String,
    first_mentioned: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

pub struct RelationshipMemory {
    dir: PathBuf,
}

impl RelationshipMemory {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create relationships dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.md", key))
    }

    /// Create or update the record for `name`. An empty `note` only seeds
    /// the record; an empty `relationship_type` keeps the stored type.
    pub fn add_note(
        &self,
        name: &str,
        relationship_type: &str,
        note: &str,
    ) -> Result<RelationshipRecord> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Name must not be empty");
        }
        let key = sanitize_key(name);
        if key.is_empty() {
            anyhow::bail!("Name '{}' has no usable characters", name);
        }

        let now = Utc::now();
        let relationship_type = relationship_type.trim();
        let path = self.path_for(&key);

        let mut record = if path.exists() {
            self.read_record(&key)?
        } else {
            RelationshipRecord {
                key: key.clone(),
                name: name.to_string(),
                relationship_type: relationship_type.to_string(),
                first_mentioned: now,
                last_updated: now,
                notes: Vec::new(),
            }
        };

        if !relationship_type.is_empty() {
            record.relationship_type = relationship_type.to_string();
        }
        // One note per line on disk, so line breaks fold into spaces.
        let note = note.split_whitespace().collect::<Vec<_>>().join(" ");
        if !note.is_empty() {
            record
                .notes
                .push(format!("[{}] {}", now.format("%Y-%m-%d"), note));
        }
        record.last_updated = now;

        write_atomic(&path, &render(&record)?)?;
        tracing::debug!(
            "Saved relationship '{}' ({} notes)",
            record.key,
            record.notes.len()
        );
        Ok(record)
    }

    /// Exact lookup by sanitized key.
    pub fn get_notes(&self, name: &str) -> Result<Option<RelationshipRecord>> {
        let key = sanitize_key(name);
        if key.is_empty() || !self.path_for(&key).exists() {
            return Ok(None);
        }
        self.read_record(&key).map(Some)
    }

    /// Every record whose type matches `query`, synonyms included, by key order.
    pub fn find_by_relationship_type(&self, query: &str) -> Result<Vec<RelationshipRecord>> {
        let mut results: Vec<RelationshipRecord> = self
            .all_records()?
            .into_iter()
            .filter(|record| relationship_types_match(query, &record.relationship_type))
            .collect();
        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    /// All readable records; corrupt files are logged and skipped.
    pub fn all_records(&self) -> Result<Vec<RelationshipRecord>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list relationships in {:?}", self.dir))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.read_record(key) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable relationship file {:?}: {:#}", path, e),
            }
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    fn read_record(&self, key: &str) -> Result<RelationshipRecord> {
        let path = self.path_for(key);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read relationship file {:?}", path))?;
        parse(key, &contents).with_context(|| format!("Malformed relationship file {:?}", path))
    }
}

fn render(record: &RelationshipRecord) -> Result<String> {
    let front = FrontMatter {
        name: record.name.clone(),
        relationship: record.relationship_type.clone(),
        first_mentioned: record.first_mentioned,
        last_updated: record.last_updated,
    };
    let front = toml::to_string(&front).context("Failed to serialize front matter")?;

    let mut out = format!("{FENCE}\n{front}{FENCE}\n\n");
    for note in &record.notes {
        out.push_str("- ");
        out.push_str(note);
        out.push('\n');
    }
    Ok(out)
}

fn parse(key: &str, contents: &str) -> Result<RelationshipRecord> {
    let rest = contents
        .strip_prefix(FENCE)
        .context("Missing opening +++ fence")?;
    let end = rest
        .find(&format!("\n{FENCE}"))
        .context("Missing closing +++ fence")?;
    let front: FrontMatter = toml::from_str(&rest[..end]).context("Invalid front matter")?;
    let body = &rest[end + FENCE.len() + 1..];

    let notes = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.strip_prefix('-')
                .or_else(|| line.strip_prefix('*'))
                .unwrap_or(line)
                .trim()
                .to_string()
        })
        .collect();

    Ok(RelationshipRecord {
        key: key.to_string(),
        name: front.name,
        relationship_type: front.relationship,
        first_mentioned: front.first_mentioned,
        last_updated: front.last_updated,
        notes,
    })
}

/// Lowercase, drop punctuation other than space/hyphen/underscore, and
/// collapse runs of separators into a single `_`.
pub fn sanitize_key(name: &str) -> String {
    let kept: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();

    kept.split(|c: char| matches!(c, ' ' | '-' | '_'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

const SYNONYM_RULES: &[(&[&str], &[&str])] = &[
    (&["mom", "mother"], &["mom", "mother", "family"]),
    (&["dad", "father"], &["dad", "father", "family"]),
    (&["family"], &["mom", "mother", "dad", "father", "family"]),
    (&["therapist", "counselor"], &["therapist", "counselor"]),
    (&["pet", "dog", "cat"], &["pet", "dog", "cat"]),
];

/// Case-insensitive type match that also honours the synonym table.
pub fn relationship_types_match(query: &str, stored: &str) -> bool {
    let query = query.trim().to_lowercase();
    let stored = stored.trim().to_lowercase();
    if query.is_empty() {
        return false;
    }
    if query == stored {
        return true;
    }

    SYNONYM_RULES.iter().any(|(queries, matches)| {
        queries.contains(&query.as_str()) && matches.contains(&stored.as_str())
    })
}

const INFERENCE_RULES: &[(&str, &[&str])] = &[
    ("therapist", &["therapist", "therapy", "counselor", "psychologist"]),
    ("family", &["mom", "mother", "dad", "father", "parent", "parents"]),
    ("friend", &["friend", "friends", "buddy", "pal"]),
    ("colleague", &["boss", "manager", "colleague", "coworker", "work"]),
    ("doctor", &["doctor", "dr", "physician", "dentist"]),
    ("teacher", &["teacher", "professor", "instructor"]),
    ("pet", &["dog", "cat", "pet", "puppy", "kitten"]),
    (
        "partner",
        &["wife", "husband", "spouse", "partner", "girlfriend", "boyfriend"],
    ),
    ("child", &["son", "daughter", "child", "kid", "kids"]),
    ("sibling", &["brother", "sister", "sibling"]),
];

/// Guess a relationship type from recent conversation text, first rule wins.
pub fn infer_relationship_type(context: &str) -> &'static str {
    let lowered = context.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    INFERENCE_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
        .map(|(kind, _)| *kind)
        .unwrap_or("person")
}
