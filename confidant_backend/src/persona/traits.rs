//! Bounded personality modifiers with durable, atomic persistence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::storage::write_atomic;

pub const MODIFIER_MIN: i32 = -3;
pub const MODIFIER_MAX: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Modifier {
    Warmth,
    Challenge,
    Verbosity,
    EmotionalDepth,
    Structure,
}

impl Modifier {
    pub const ALL: [Modifier; 5] = [
        Modifier::Warmth,
        Modifier::Challenge,
        Modifier::Verbosity,
        Modifier::EmotionalDepth,
        Modifier::Structure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modifier::Warmth => "warmth",
            Modifier::Challenge => "challenge",
            Modifier::Verbosity => "verbosity",
            Modifier::EmotionalDepth => "emotional_depth",
            Modifier::Structure => "structure",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|modifier| modifier.as_str().eq_ignore_ascii_case(name))
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.as_str()).collect()
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a mutation request. Unknown names and boundary hits are
/// reported here rather than as errors; `Err` is reserved for I/O failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModifierUpdate {
    pub success: bool,
    pub modifier: String,
    pub old_value: Option<i32>,
    pub new_value: Option<i32>,
    pub message: String,
}

impl ModifierUpdate {
    fn unknown(name: &str) -> Self {
        Self {
            success: false,
            modifier: name.to_string(),
            old_value: None,
            new_value: None,
            message: format!("Unknown modifier: {}", name),
        }
    }
}

/// On-disk shape of `modifiers.toml`
#[derive(Debug, Default, Serialize, Deserialize)]
struct ModifierFile {
    #[serde(default)]
    modifiers: BTreeMap<String, i64>,
}

fn clamp(value: i64) -> i32 {
    value.clamp(MODIFIER_MIN as i64, MODIFIER_MAX as i64) as i32
}

pub struct TraitStore {
    path: PathBuf,
    values: BTreeMap<Modifier, i32>,
}

impl TraitStore {
    /// Load modifiers from `path`. A missing file is seeded with zeros;
    /// stored values outside the range are clamped on the way in.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut values: BTreeMap<Modifier, i32> =
            Modifier::ALL.iter().map(|m| (*m, 0)).collect();

        if !path.exists() {
            let store = Self { path, values };
            store.persist(&store.values)?;
            tracing::info!("Seeded modifiers at {:?}", store.path);
            return Ok(store);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read modifiers from {:?}", path))?;
        let file: ModifierFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse modifiers in {:?}", path))?;

        for (name, value) in file.modifiers {
            match Modifier::parse(&name) {
                Some(modifier) => {
                    values.insert(modifier, clamp(value));
                }
                None => tracing::warn!("Ignoring unknown modifier '{}' in {:?}", name, path),
            }
        }

        tracing::debug!("Loaded modifiers from {:?}: {:?}", path, values);
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, modifier: Modifier) -> i32 {
        self.values.get(&modifier).copied().unwrap_or(0)
    }

    /// Current values in canonical modifier order.
    pub fn values(&self) -> Vec<(Modifier, i32)> {
        Modifier::ALL.iter().map(|m| (*m, self.get(*m))).collect()
    }

    /// Relative change. Hitting the boundary with no movement is a failure.
    pub fn adjust(&mut self, name: &str, delta: i64) -> Result<ModifierUpdate> {
        let Some(modifier) = Modifier::parse(name) else {
            return Ok(ModifierUpdate::unknown(name));
        };

        let current = self.get(modifier);
        let new_value = clamp((current as i64).saturating_add(delta));

        if new_value == current {
            return Ok(ModifierUpdate {
                success: false,
                modifier: modifier.to_string(),
                old_value: Some(current),
                new_value: Some(current),
                message: format!(
                    "Modifier '{}' is already at the boundary (current: {})",
                    modifier, current
                ),
            });
        }

        self.commit(modifier, new_value)?;
        Ok(ModifierUpdate {
            success: true,
            modifier: modifier.to_string(),
            old_value: Some(current),
            new_value: Some(new_value),
            message: format!("Adjusted {} from {} to {}", modifier, current, new_value),
        })
    }

    /// Absolute change. Always succeeds for a known name, even when unchanged.
    pub fn set(&mut self, name: &str, value: i64) -> Result<ModifierUpdate> {
        let Some(modifier) = Modifier::parse(name) else {
            return Ok(ModifierUpdate::unknown(name));
        };

        let current = self.get(modifier);
        let new_value = clamp(value);

        self.commit(modifier, new_value)?;
        Ok(ModifierUpdate {
            success: true,
            modifier: modifier.to_string(),
            old_value: Some(current),
            new_value: Some(new_value),
            message: format!("Set {} from {} to {}", modifier, current, new_value),
        })
    }

    fn commit(&mut self, modifier: Modifier, value: i32) -> Result<()> {
        let mut next = self.values.clone();
        next.insert(modifier, value);
        self.persist(&next)?;
        self.values = next;
        tracing::info!("Modifier {} is now {}", modifier, value);
        Ok(())
    }

    fn persist(&self, values: &BTreeMap<Modifier, i32>) -> Result<()> {
        let file = ModifierFile {
            modifiers: values
                .iter()
                .map(|(m, v)| (m.as_str().to_string(), *v as i64))
                .collect(),
        };
        let contents = toml::to_string_pretty(&file).context("Failed to serialize modifiers")?;
        write_atomic(&self.path, &contents)
    }
}
