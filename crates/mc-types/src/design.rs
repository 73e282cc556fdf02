use rust_decimal::Decimal;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Candidate value of one condition or hyperparameter axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AxisValue {
    /// Exact decimal, e.g. a sample size or an autocorrelation.
    Number(Decimal),
    /// Categorical level, e.g. a model family.
    Level(String),
}

impl AxisValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Number(d) => Some(*d),
            Self::Level(_) => None,
        }
    }

    pub fn as_level(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Level(s) => Some(s),
        }
    }

    pub fn is_level(&self) -> bool {
        matches!(self, Self::Level(_))
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(d) => write!(f, "{}", d.normalize()),
            Self::Level(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for AxisValue {
    fn from(value: i64) -> Self {
        Self::Number(Decimal::from(value))
    }
}

impl From<i32> for AxisValue {
    fn from(value: i32) -> Self {
        Self::Number(Decimal::from(value))
    }
}

impl From<Decimal> for AxisValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for AxisValue {
    fn from(value: &str) -> Self {
        Self::Level(value.to_string())
    }
}

impl From<String> for AxisValue {
    fn from(value: String) -> Self {
        Self::Level(value)
    }
}

/// Map key carrying the exact text of a number that a JSON number would
/// not reproduce.
const EXACT_NUMBER_KEY: &str = "decimal";

// Numbers travel as plain JSON numbers so hand-written configs read naturally.
// A number that would not read back identically is written as
// `{"decimal": "<text>"}`.
impl Serialize for AxisValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(d) => {
                if d.scale() == 0 {
                    if let Ok(v) = i64::try_from(*d) {
                        return serializer.serialize_i64(v);
                    }
                    if let Ok(v) = u64::try_from(*d) {
                        return serializer.serialize_u64(v);
                    }
                }
                match f64::try_from(*d) {
                    Ok(v) if d.scale() > 0 && decimal_from_f64(v).as_ref() == Some(d) => {
                        serializer.serialize_f64(v)
                    }
                    _ => {
                        let mut map = serializer.serialize_map(Some(1))?;
                        map.serialize_entry(EXACT_NUMBER_KEY, &d.to_string())?;
                        map.end()
                    }
                }
            }
            Self::Level(s) => serializer.serialize_str(s),
        }
    }
}

// Shortest round-trip text, so 0.4 stays 0.4 and not its binary expansion.
fn decimal_from_f64(v: f64) -> Option<Decimal> {
    Decimal::from_str(&v.to_string()).ok()
}

impl<'de> Deserialize<'de> for AxisValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AxisValueVisitor)
    }
}

struct AxisValueVisitor;

impl<'de> Visitor<'de> for AxisValueVisitor {
    type Value = AxisValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number, a string level or an exact decimal map")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<AxisValue, E> {
        Ok(AxisValue::Number(Decimal::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<AxisValue, E> {
        Ok(AxisValue::Number(Decimal::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<AxisValue, E> {
        decimal_from_f64(v)
            .map(AxisValue::Number)
            .ok_or_else(|| E::custom(format!("number {v} is not representable as a decimal")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<AxisValue, E> {
        Ok(AxisValue::Level(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<AxisValue, E> {
        Ok(AxisValue::Level(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<AxisValue, A::Error> {
        let (key, text): (String, String) = map
            .next_entry()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        if key != EXACT_NUMBER_KEY {
            return Err(de::Error::unknown_field(&key, &[EXACT_NUMBER_KEY]));
        }
        if map.next_key::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(2, &self));
        }
        Decimal::from_str(&text)
            .map(AxisValue::Number)
            .map_err(|e| de::Error::custom(format!("invalid decimal '{text}': {e}")))
    }
}

/// Axis name to candidate values. Keys iterate in byte order, which is the
/// normalized axis order used for expansion, seeding and filenames.
pub type AxisSet = BTreeMap<String, Vec<AxisValue>>;

/// Which stage a table drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Simulation,
    Dependent,
}

/// One job: a full combination of axis values plus derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignRow {
    pub conditions: BTreeMap<String, AxisValue>,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, AxisValue>,
    pub replicate: u32,
    pub seed: u64,
    pub output_path: PathBuf,
    pub output_file: String,
    /// Result file of the base row this row consumes (dependent tables only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl DesignRow {
    /// Look up a column by name, conditions first.
    pub fn value(&self, column: &str) -> Option<&AxisValue> {
        self.conditions
            .get(column)
            .or_else(|| self.hyperparameters.get(column))
    }

    /// Default location of this row's result file.
    pub fn result_path(&self) -> PathBuf {
        self.output_path.join(&self.output_file)
    }
}

/// A fully expanded design: every job of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignTable {
    pub kind: TableKind,
    pub global_seed: u64,
    pub rows: Vec<DesignRow>,
}

impl DesignTable {
    pub fn new(kind: TableKind, global_seed: u64, rows: Vec<DesignRow>) -> Self {
        Self {
            kind,
            global_seed,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DesignRow> {
        self.rows.iter()
    }

    pub fn condition_axes(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.conditions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn hyperparameter_axes(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|r| r.hyperparameters.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Column order of the tabular export.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.condition_axes();
        columns.extend(self.hyperparameter_axes());
        columns.extend(
            ["replicate", "seed", "output_path", "output_file", "source"]
                .iter()
                .map(|c| c.to_string()),
        );
        columns
    }
}
