//! 结果合并：多个 ExtractorResult 对齐成一张宽表
//!
//! 行 = 去重后的刺激 (name, onset, duration)，按 onset 升序（稳定排序）；
//! 列 = `<extractor-id>_<feature-name>`；缺失单元格显式标记为 Missing。

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write;

use log::debug;
use serde::{Deserialize, Serialize};

use super::{ExtractorResult, FeatureValue};
use crate::core::error::FeatureError;
use crate::core::stim::{StimInfo, StimKey};

const MISSING_MARKER: &str = "NA";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    /// Not computed for this stimulus. Distinct from any computed value.
    Missing,
    Value(FeatureValue),
}

impl Cell {
    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn value(&self) -> Option<&FeatureValue> {
        match self {
            Cell::Missing => None,
            Cell::Value(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub extractor: String,
    pub feature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub stim: StimInfo,
    pub cells: Vec<Cell>,
}

/// One computed value in long format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRecord {
    pub stim_name: String,
    pub onset: Option<f64>,
    pub duration: Option<f64>,
    pub extractor: String,
    pub feature: String,
    pub value: FeatureValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    columns: Vec<Column>,
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| &r.cells[col])
    }

    /// Every computed cell as one record, row by row.
    pub fn to_long(&self) -> Vec<LongRecord> {
        self.rows
            .iter()
            .flat_map(|row| {
                row.cells
                    .iter()
                    .zip(&self.columns)
                    .filter_map(move |(cell, column)| {
                        cell.value().map(|value| LongRecord {
                            stim_name: row.stim.name.clone(),
                            onset: row.stim.onset,
                            duration: row.stim.duration,
                            extractor: column.extractor.clone(),
                            feature: column.feature.clone(),
                            value: value.clone(),
                        })
                    })
            })
            .collect()
    }

    /// Comma-delimited output; missing cells and absent times are written as `NA`.
    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<(), FeatureError> {
        let mut header = vec![
            "stim_name".to_string(),
            "onset".to_string(),
            "duration".to_string(),
        ];
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        write_csv_line(&mut out, &header)?;

        for row in &self.rows {
            let mut fields = Vec::with_capacity(3 + row.cells.len());
            fields.push(row.stim.name.clone());
            fields.push(format_seconds(row.stim.onset));
            fields.push(format_seconds(row.stim.duration));
            fields.extend(row.cells.iter().map(|cell| match cell {
                Cell::Missing => MISSING_MARKER.to_string(),
                Cell::Value(v) => v.to_string(),
            }));
            write_csv_line(&mut out, &fields)?;
        }
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String, FeatureError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|e| FeatureError::invalid(e.to_string()))
    }
}

fn format_seconds(value: Option<f64>) -> String {
    value.map_or_else(|| MISSING_MARKER.to_string(), |v| v.to_string())
}

fn write_csv_line<W: Write>(out: &mut W, fields: &[String]) -> Result<(), FeatureError> {
    let line: Vec<String> = fields.iter().map(|f| escape_csv(f)).collect();
    writeln!(out, "{}", line.join(","))?;
    Ok(())
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

struct Group {
    stim: StimInfo,
    values: HashMap<usize, FeatureValue>,
}

/// Align results from any number of extractors and stimuli into one table.
///
/// Results are grouped by stimulus key (name, onset, duration), so equal
/// stimuli from independent extraction passes share a row.
pub fn merge_results(results: &[ExtractorResult]) -> Result<FeatureTable, FeatureError> {
    let mut columns: Vec<Column> = Vec::new();
    let mut column_of: HashMap<(&str, &str), usize> = HashMap::new();
    let mut column_names: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    let mut group_of: HashMap<StimKey, usize> = HashMap::new();

    for result in results {
        let stim = result.stim();
        let group = match group_of.entry(stim.key()) {
            Entry::Occupied(e) => {
                let existing = &groups[*e.get()].stim;
                if existing.kind != stim.kind {
                    return Err(FeatureError::MergeConflict(format!(
                        "stimulus key {} is shared by a {} and a {}",
                        e.key(),
                        existing.kind,
                        stim.kind
                    )));
                }
                if existing.filename != stim.filename || existing.source != stim.source {
                    return Err(FeatureError::MergeConflict(format!(
                        "stimulus key {} is shared by stimuli from {:?} and {:?}",
                        e.key(),
                        existing.source.as_ref().or(existing.filename.as_ref()),
                        stim.source.as_ref().or(stim.filename.as_ref())
                    )));
                }
                *e.get()
            }
            Entry::Vacant(e) => {
                groups.push(Group {
                    stim: stim.clone(),
                    values: HashMap::new(),
                });
                *e.insert(groups.len() - 1)
            }
        };

        let extractor = result.extractor_id();
        for (feature, value) in result.features() {
            let col = match column_of.get(&(extractor, feature.as_str())) {
                Some(&col) => col,
                None => {
                    let name = format!("{extractor}_{feature}");
                    if let Some(&other) = column_names.get(&name) {
                        return Err(FeatureError::MergeConflict(format!(
                            "column {name} produced by both {}/{} and {extractor}/{feature}",
                            columns[other].extractor, columns[other].feature
                        )));
                    }
                    columns.push(Column {
                        name: name.clone(),
                        extractor: extractor.to_string(),
                        feature: feature.clone(),
                    });
                    let col = columns.len() - 1;
                    column_names.insert(name, col);
                    column_of.insert((extractor, feature.as_str()), col);
                    col
                }
            };

            match groups[group].values.entry(col) {
                Entry::Occupied(e) if e.get() != value => {
                    return Err(FeatureError::MergeConflict(format!(
                        "{} has two values for {}: {} and {}",
                        stim.name,
                        columns[col].name,
                        e.get(),
                        value
                    )));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(e) => {
                    e.insert(value.clone());
                }
            }
        }
    }

    // stable: equal onsets keep first-seen order
    groups.sort_by(|a, b| compare_onsets(a.stim.onset, b.stim.onset));

    let rows: Vec<FeatureRow> = groups
        .into_iter()
        .map(|mut group| FeatureRow {
            cells: (0..columns.len())
                .map(|col| group.values.remove(&col).map_or(Cell::Missing, Cell::Value))
                .collect(),
            stim: group.stim,
        })
        .collect();

    debug!(
        "🧮 Merged {} results into {} rows x {} columns",
        results.len(),
        rows.len(),
        columns.len()
    );
    Ok(FeatureTable { columns, rows })
}

/// Ascending onset; stimuli without an onset sort last.
fn compare_onsets(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
