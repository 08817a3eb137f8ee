//! Topic name validation and partition naming

use std::fmt;

/// Suffix inserted between a topic name and its partition index
const PARTITION_SUFFIX: &str = "-partition-";

/// A validated topic name
///
/// Partitioned topics expand into one sub-topic per partition, named with
/// the broker's `{topic}-partition-{n}` convention. Non-partitioned topics
/// are addressed by their bare name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    name: String,
}

impl TopicName {
    /// Parse and validate a topic name
    ///
    /// Returns `None` for empty names and names containing whitespace or
    /// control characters.
    pub fn parse(name: &str) -> Option<Self> {
        if name.is_empty() {
            return None;
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return None;
        }
        Some(Self {
            name: name.to_string(),
        })
    }

    /// The full topic name as a string
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Name of the sub-topic backing partition `index`
    pub fn partition_name(&self, index: usize) -> String {
        format!("{}{}{}", self.name, PARTITION_SUFFIX, index)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
