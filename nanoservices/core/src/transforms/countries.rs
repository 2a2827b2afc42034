//! Projection of REST Countries entities onto `(country, population, area)`.

use serde_json::Value;
use snapflow_utils::error::TransformationError;
use snapflow_utils::{RawDocument, Record, Snapshot};

use super::Transform;

const COUNTRY: (&str, &[&str]) = ("name.official", &["name", "official"]);
const POPULATION: (&str, &[&str]) = ("population", &["population"]);
const AREA: (&str, &[&str]) = ("area", &["area"]);

/// Maps each entity of a country list to one [`Record`].
#[derive(Debug, Clone)]
pub struct CountryProjection {
    name: String,
}

impl CountryProjection {
    pub fn new() -> Self {
        Self { name: "transform".to_string() }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for CountryProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for CountryProjection {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&self, doc: &RawDocument) -> Result<Snapshot, TransformationError> {
        let entities = doc.as_array().ok_or(TransformationError::NotAnArray {
            found: json_kind(doc),
        })?;

        entities
            .iter()
            .enumerate()
            .map(|(index, entity)| project(index, entity))
            .collect::<Result<Vec<_>, _>>()
            .map(Snapshot::new)
    }
}

fn project(index: usize, entity: &Value) -> Result<Record, TransformationError> {
    let country = lookup(index, entity, COUNTRY)?;
    let country = country.as_str().ok_or_else(|| wrong_type(index, COUNTRY.0, "a string", country))?;

    let population = lookup(index, entity, POPULATION)?;
    let population = match population.as_i64() {
        Some(n) => n,
        None if population.is_u64() => {
            return Err(TransformationError::OutOfRange {
                index,
                field: POPULATION.0,
                value: population.to_string(),
            })
        }
        None => return Err(wrong_type(index, POPULATION.0, "an integer", population)),
    };

    let area = lookup(index, entity, AREA)?;
    let area = area.as_f64().ok_or_else(|| wrong_type(index, AREA.0, "a number", area))?;

    Ok(Record::new(country, population, area))
}

/// Walk `path` into `entity`. A JSON `null` counts as missing.
fn lookup<'a>(
    index: usize,
    entity: &'a Value,
    (field, path): (&'static str, &[&str]),
) -> Result<&'a Value, TransformationError> {
    path.iter()
        .try_fold(entity, |value, key| value.get(key))
        .filter(|value| !value.is_null())
        .ok_or(TransformationError::MissingField { index, field })
}

fn wrong_type(index: usize, field: &'static str, expected: &'static str, found: &Value) -> TransformationError {
    TransformationError::WrongType {
        index,
        field,
        expected,
        found: json_kind(found).to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "an integer",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projects_single_entity() {
        let doc = json!([{"name": {"official": "Testland"}, "population": 100, "area": 50.5}]);
        let snap = CountryProjection::new().transform(&doc).unwrap();
        assert_eq!(snap.records(), &[Record::new("Testland", 100, 50.5)]);
    }

    #[test]
    fn preserves_input_order_and_count() {
        let doc = json!([
            {"name": {"official": "Republic of Zed", "common": "Zed"}, "population": 3, "area": 1},
            {"name": {"official": "Kingdom of Ay"}, "population": 1, "area": 2.25, "capital": ["Ay"]},
            {"name": {"official": "Emm"}, "population": 2, "area": 0.5},
        ]);
        let snap = CountryProjection::new().transform(&doc).unwrap();
        let names: Vec<&str> = snap.iter().map(|r| r.country.as_str()).collect();
        assert_eq!(names, vec!["Republic of Zed", "Kingdom of Ay", "Emm"]);
        // integral JSON numbers are accepted for area
        assert_eq!(snap.records()[0].area, 1.0);
    }

    #[test]
    fn empty_array_is_an_empty_snapshot() {
        let snap = CountryProjection::new().transform(&json!([])).unwrap();
        assert!(snap.is_empty());
    }

    #[test]
    fn missing_field_fails_whole_document() {
        let doc = json!([
            {"name": {"official": "Fine"}, "population": 1, "area": 1.0},
            {"name": {"official": "Broken"}, "area": 1.0},
        ]);
        let err = CountryProjection::new().transform(&doc).unwrap_err();
        assert_eq!(err, TransformationError::MissingField { index: 1, field: "population" });
    }

    #[test]
    fn missing_nested_name_is_reported_by_path() {
        let doc = json!([{"name": {"common": "Nope"}, "population": 1, "area": 1.0}]);
        let err = CountryProjection::new().transform(&doc).unwrap_err();
        assert_eq!(err, TransformationError::MissingField { index: 0, field: "name.official" });
    }

    #[test]
    fn null_counts_as_missing() {
        let doc = json!([{"name": {"official": "X"}, "population": 1, "area": null}]);
        let err = CountryProjection::new().transform(&doc).unwrap_err();
        assert_eq!(err, TransformationError::MissingField { index: 0, field: "area" });
    }

    #[test]
    fn fractional_population_is_rejected() {
        let doc = json!([{"name": {"official": "X"}, "population": 1.5, "area": 1.0}]);
        let err = CountryProjection::new().transform(&doc).unwrap_err();
        assert_eq!(
            err,
            TransformationError::WrongType {
                index: 0,
                field: "population",
                expected: "an integer",
                found: "a number".to_string(),
            }
        );
    }

    #[test]
    fn population_beyond_i64_is_out_of_range() {
        let doc = json!([{"name": {"official": "X"}, "population": u64::MAX, "area": 1.0}]);
        let err = CountryProjection::new().transform(&doc).unwrap_err();
        assert_eq!(
            err,
            TransformationError::OutOfRange {
                index: 0,
                field: "population",
                value: "18446744073709551615".to_string(),
            }
        );
        assert!(err.to_string().contains("does not fit a 64-bit signed integer"));
    }

    #[test]
    fn non_array_document_is_rejected() {
        let err = CountryProjection::new()
            .transform(&json!({"status": 400, "message": "Bad Request"}))
            .unwrap_err();
        assert_eq!(err, TransformationError::NotAnArray { found: "an object" });
    }
}
