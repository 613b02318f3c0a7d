//! Persona directories: a `personality.toml` describing who the companion is,
//! plus the `modifiers.toml` owned by [`TraitStore`].

pub mod traits;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::write_atomic;
pub use traits::{Modifier, ModifierUpdate, TraitStore, MODIFIER_MAX, MODIFIER_MIN};

pub const PERSONALITY_FILE: &str = "personality.toml";
pub const MODIFIERS_FILE: &str = "modifiers.toml";
const TEMPLATE_DIR: &str = "template";

/// Contents of `personality.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub traits: Vec<String>,
    /// Conversation-style reminders appended to the system prompt
    #[serde(default)]
    pub style: Vec<String>,
}

impl Personality {
    fn starter(name: &str) -> Self {
        Self {
            name: capitalize(name),
            description: "a steady, loyal companion who helps the user think clearly and keep moving forward."
                .to_string(),
            traits: vec![
                "unflinching".to_string(),
                "loyal".to_string(),
                "curious".to_string(),
            ],
            style: vec![
                "Ask questions more than giving speeches".to_string(),
                "Surface contradictions gently but directly".to_string(),
                "Emphasize forward motion over emotional wallowing".to_string(),
                "Use occasional metaphors and structured reframing when helpful".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Persona {
    pub dir: PathBuf,
    pub personality: Personality,
}

impl Persona {
    /// Load a persona directory. Only `personality.toml` must exist; the
    /// modifiers file is seeded by [`TraitStore::load`] when absent.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(PERSONALITY_FILE);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read personality from {:?}", path))?;
        let personality: Personality = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse personality in {:?}", path))?;

        Ok(Self { dir, personality })
    }

    pub fn name(&self) -> &str {
        &self.personality.name
    }

    pub fn modifiers_path(&self) -> PathBuf {
        self.dir.join(MODIFIERS_FILE)
    }

    pub fn load_traits(&self) -> Result<TraitStore> {
        TraitStore::load(self.modifiers_path())
    }

    /// Identity line plus any non-zero modifiers.
    pub fn build_profile(&self, traits: &TraitStore) -> String {
        let mut profile = format!(
            "You are {}, {}\n\n",
            self.personality.name,
            self.personality.description.trim()
        );

        if !self.personality.traits.is_empty() {
            profile.push_str(&format!(
                "Core traits: {}\n\n",
                self.personality.traits.join(", ")
            ));
        }

        let active: Vec<(Modifier, i32)> = traits
            .values()
            .into_iter()
            .filter(|(_, value)| *value != 0)
            .collect();

        if !active.is_empty() {
            profile.push_str(
                "Personality modifiers (scale -3 to +3, where -3 is extreme negative, 0 is neutral, +3 is extreme positive):\n",
            );
            for (modifier, value) in active {
                profile.push_str(&format!("- {}: {}\n", modifier, value));
            }
            profile.push_str("\nAdjust your personality accordingly based on these modifier values.\n");
        }

        profile
    }
}

/// The directory that holds one sub-directory per persona.
pub struct PersonaLibrary {
    root: PathBuf,
}

impl PersonaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persona names with both files present, sorted, excluding the template.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list personas in {:?}", self.root))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_dir() || name == TEMPLATE_DIR {
                continue;
            }
            if path.join(PERSONALITY_FILE).exists() && path.join(MODIFIERS_FILE).exists() {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }

    /// Accepts a bare persona name (looked up under the library root) or a path.
    pub fn resolve(&self, input: &str) -> Result<Persona> {
        let input = input.trim();
        let dir = if input.contains('/') || input.contains('\\') {
            PathBuf::from(input)
        } else {
            self.root.join(input)
        };

        if !dir.is_dir() {
            let available = self.list().unwrap_or_default();
            let available = if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            };
            anyhow::bail!(
                "Persona '{}' not found. Available personas: {}",
                input,
                available
            );
        }

        if !dir.join(PERSONALITY_FILE).exists() {
            anyhow::bail!("Persona '{}' is missing {}", input, PERSONALITY_FILE);
        }

        Persona::load(dir)
    }

    /// Create a starter persona named `name` if it does not exist yet.
    pub fn ensure_default(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        let personality_path = dir.join(PERSONALITY_FILE);
        if personality_path.exists() {
            return Ok(dir);
        }

        let contents = toml::to_string_pretty(&Personality::starter(name))
            .context("Failed to serialize starter personality")?;
        write_atomic(&personality_path, &contents)?;
        TraitStore::load(dir.join(MODIFIERS_FILE))?;

        tracing::info!("Created starter persona '{}' at {:?}", name, dir);
        Ok(dir)
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
