//! Named joint-angle targets for the manipulator.

use std::collections::BTreeMap;
use std::fmt;

use lockstep_types::GatewayError;
use serde::{Deserialize, Serialize};

/// Name of the rest pose every routine starts and ends in.
pub const HOME: &str = "home";

/// One angle per joint, in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointAngles(pub Vec<f64>);

impl JointAngles {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Copy with `delta` degrees added to every joint.
    pub fn offset(&self, delta: f64) -> Self {
        Self(self.0.iter().map(|a| a + delta).collect())
    }
}

impl From<Vec<f64>> for JointAngles {
    fn from(angles: Vec<f64>) -> Self {
        Self(angles)
    }
}

impl fmt::Display for JointAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, angle) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{angle:.3}")?;
        }
        f.write_str("]")
    }
}

/// Lookup table from symbolic position name to joint target.
///
/// The default table holds the factory-taught poses of the six-axis arm at
/// the hand-off station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionTable(BTreeMap<String, JointAngles>);

impl Default for PositionTable {
    fn default() -> Self {
        Self::empty()
            .with(
                HOME,
                vec![80.555, -111.609, 110.737, -188.994, -84.695, 144.436],
            )
            .with(
                "position_1",
                vec![80.555, -91.025, 126.989, -188.994, -84.695, 144.436],
            )
    }
}

impl PositionTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, angles: impl Into<JointAngles>) -> Self {
        self.insert(name, angles);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, angles: impl Into<JointAngles>) {
        self.0.insert(name.into(), angles.into());
    }

    pub fn get(&self, name: &str) -> Option<&JointAngles> {
        self.0.get(name)
    }

    /// Like [`get`][Self::get] but classified for gateway callers.
    pub fn resolve(&self, name: &str) -> Result<&JointAngles, GatewayError> {
        self.get(name)
            .ok_or_else(|| GatewayError::UnknownPosition(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JointAngles)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_home_and_target() {
        let table = PositionTable::default();
        assert!(table.contains(HOME));
        assert!(table.contains("position_1"));
        assert_eq!(table.get(HOME).unwrap().len(), 6);
    }

    #[test]
    fn resolve_unknown_position_is_classified() {
        let table = PositionTable::default();
        match table.resolve("nowhere") {
            Err(GatewayError::UnknownPosition(name)) => assert_eq!(name, "nowhere"),
            other => panic!("expected UnknownPosition, got {other:?}"),
        }
    }

    #[test]
    fn offset_shifts_every_joint() {
        let angles = JointAngles(vec![1.0, -2.0]);
        assert_eq!(angles.offset(0.5), JointAngles(vec![1.5, -1.5]));
    }

    #[test]
    fn display_rounds_to_three_places() {
        let angles = JointAngles(vec![80.5551, -1.0]);
        assert_eq!(angles.to_string(), "[80.555, -1.000]");
    }

    #[test]
    fn table_deserializes_from_plain_map() {
        let table: PositionTable =
            serde_json::from_str(r#"{"home":[0.0,1.0],"drop":[2.0,3.0]}"#).unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["drop", "home"]);
    }
}
