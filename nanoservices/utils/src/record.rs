use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Opaque JSON returned by the source API.
pub type RawDocument = serde_json::Value;

/// One row of the destination table.
///
/// Field order matches the column order of the table: `country`,
/// `population`, `area`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub country: String,
    pub population: i64,
    pub area: f64,
}

impl Record {
    pub fn new(country: impl Into<String>, population: i64, area: f64) -> Self {
        Self { country: country.into(), population, area }
    }
}

impl<S: Into<String>> From<(S, i64, f64)> for Record {
    fn from((country, population, area): (S, i64, f64)) -> Self {
        Record::new(country, population, area)
    }
}

/// The ordered set of records produced by one run.
///
/// Cloning is cheap; every stage that receives a snapshot sees the same rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot(Arc<Vec<Record>>);

impl Snapshot {
    pub fn new(records: Vec<Record>) -> Self {
        Snapshot(Arc::new(records))
    }

    pub fn records(&self) -> &[Record] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.0.iter()
    }
}

impl FromIterator<Record> for Snapshot {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Snapshot::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keeps_insertion_order() {
        let snap: Snapshot = vec![("b", 2, 2.0), ("a", 1, 1.0)]
            .into_iter()
            .map(Record::from)
            .collect();
        let names: Vec<&str> = snap.iter().map(|r| r.country.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn clones_share_rows() {
        let snap = Snapshot::new(vec![Record::new("Testland", 100, 50.5)]);
        let other = snap.clone();
        assert_eq!(other.records().as_ptr(), snap.records().as_ptr());
        assert_eq!(other.len(), 1);
    }
}
