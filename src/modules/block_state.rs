use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::modules::error::FormatError;

const DEFAULT_NAMESPACE: &str = "minecraft:";

const AIR_BLOCKS: &[&str] = &["air", "cave_air", "void_air", "structure_void"];

/// A block type plus its state properties, e.g. `oak_stairs[facing=north,half=bottom]`.
///
/// The `minecraft:` namespace is dropped on parse; other namespaces stay part
/// of the name. Properties are kept sorted so rendering is deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: base_name(&name).to_string(),
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> Self {
        Self::new("air")
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_air(&self) -> bool {
        is_air(&self.name)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn facing(&self) -> Option<&str> {
        self.property("facing")
    }

    /// Render for a `/setblock` command: `minecraft:name[k=v,...]`.
    pub fn command_string(&self) -> String {
        if self.name.contains(':') {
            self.to_string()
        } else {
            format!("{}{}", DEFAULT_NAMESPACE, self)
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.properties.is_empty() {
            let props: Vec<String> = self
                .properties
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "[{}]", props.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for BlockState {
    type Err = FormatError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (name, props) = match trimmed.split_once('[') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(']')
                    .ok_or_else(|| FormatError::BlockState(trimmed.to_string()))?;
                (name, Some(inner))
            }
            None => (trimmed, None),
        };

        if name.is_empty() {
            return Err(FormatError::BlockState(trimmed.to_string()));
        }

        let mut state = BlockState::new(name);
        if let Some(inner) = props {
            for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| FormatError::BlockState(trimmed.to_string()))?;
                state
                    .properties
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Ok(state)
    }
}

/// Strip the default namespace and any property list.
pub fn base_name(name: &str) -> &str {
    let name = name.split('[').next().unwrap_or(name);
    name.strip_prefix(DEFAULT_NAMESPACE).unwrap_or(name)
}

pub fn is_air(name: &str) -> bool {
    AIR_BLOCKS.contains(&base_name(name))
}
