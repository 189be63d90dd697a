//! Metric text parsing.
//!
//! Pipelines write small text files of region labels and values. Three
//! layouts are understood:
//!
//! - [`Layout::Columnar`]: labels on the first line, values on the second,
//!   with a fixed number of leading tokens discarded on both (ROI statistics).
//! - [`Layout::Paired`]: one `label value` pair per line over an inclusive
//!   line range, optionally split on a delimiter (CIVET `.dat` files).
//! - Freesurfer `.stats` tables, see [`parse_freesurfer_stats`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("expected line {line} but input has only {available} lines")]
    MissingLine { line: usize, available: usize },

    #[error("value '{token}' for label '{label}' is not a number")]
    BadValue { label: String, token: String },

    #[error("{labels} labels but {values} values")]
    CountMismatch { labels: usize, values: usize },

    #[error("line {line} has no '{delimiter}' separated label/value pair")]
    MissingPair { line: usize, delimiter: String },

    #[error("no metrics found")]
    Empty,

    #[error("stats table has no '{0}' column")]
    UnknownColumn(String),
}

/// How metric text is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    Columnar {
        /// Leading tokens dropped from both lines.
        #[serde(default)]
        skip: usize,
    },
    Paired {
        first: usize,
        /// Inclusive.
        last: usize,
        #[serde(default)]
        delimiter: Option<char>,
    },
}

/// One parsed metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub label: String,
    pub value: f64,
    pub description: String,
}

/// Parsed metrics in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics(Vec<Metric>);

impl Metrics {
    pub fn get(&self, label: &str) -> Option<&Metric> {
        self.0.iter().find(|m| m.label == label)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Metric> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Metric> {
        self.0
    }
}

impl IntoIterator for Metrics {
    type Item = Metric;
    type IntoIter = std::vec::IntoIter<Metric>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

const LOBE_DESCRIPTIONS: [&str; 9] = [
    "midsaggittal, brainstem, corpus callosum",
    "parietal lobe",
    "occipital lobe",
    "frontal lobe",
    "posterior cingulate",
    "parahippocampal gyrus",
    "cingulate gyrus minus posterior",
    "temporal lobe minus parahippocampal gyrus",
    "insula",
];

const GYRIFICATION_DESCRIPTIONS: [&str; 3] = [
    "gyrification index of gray matter",
    "gyrification index of white matter",
    "gyrification index of mid",
];

const TISSUE_DESCRIPTIONS: [&str; 3] = ["CSF", "gray matter", "white matter"];

/// Known region descriptions for a label set of `count` labels.
///
/// Unrecognized sets get empty descriptions.
pub fn region_descriptions(count: usize, delimiter: Option<char>) -> Vec<String> {
    let known: &[&str] = match (count, delimiter) {
        (9, _) => &LOBE_DESCRIPTIONS,
        (3, Some(':')) => &GYRIFICATION_DESCRIPTIONS,
        (3, _) => &TISSUE_DESCRIPTIONS,
        _ => &[],
    };
    if known.is_empty() {
        vec![String::new(); count]
    } else {
        known.iter().map(|d| d.to_string()).collect()
    }
}

/// Parse `text` according to `layout`.
pub fn parse_metrics(text: &str, layout: &Layout) -> Result<Metrics, FormatError> {
    let lines: Vec<&str> = text.lines().collect();
    let pairs = match layout {
        Layout::Columnar { skip } => columnar_pairs(&lines, *skip)?,
        Layout::Paired {
            first,
            last,
            delimiter,
        } => paired_pairs(&lines, *first, *last, *delimiter)?,
    };

    if pairs.is_empty() {
        return Err(FormatError::Empty);
    }

    // The lobe, gyrification and tissue tables only describe `.dat` pairs
    let descriptions = match layout {
        Layout::Paired { delimiter, .. } => region_descriptions(pairs.len(), *delimiter),
        Layout::Columnar { .. } => vec![String::new(); pairs.len()],
    };

    pairs
        .into_iter()
        .zip(descriptions)
        .map(|((label, token), description)| {
            let value = parse_value(&label, &token)?;
            Ok(Metric {
                label,
                value,
                description,
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Metrics)
}

fn columnar_pairs(lines: &[&str], skip: usize) -> Result<Vec<(String, String)>, FormatError> {
    // Leading blank lines are not part of the table
    let content: Vec<&str> = lines
        .iter()
        .copied()
        .skip_while(|line| line.trim().is_empty())
        .collect();

    if content.len() < 2 {
        return Err(FormatError::MissingLine {
            line: 2,
            available: content.len(),
        });
    }

    let labels: Vec<&str> = content[0].split_whitespace().skip(skip).collect();
    let values: Vec<&str> = content[1].split_whitespace().skip(skip).collect();
    if labels.len() != values.len() {
        return Err(FormatError::CountMismatch {
            labels: labels.len(),
            values: values.len(),
        });
    }

    Ok(labels
        .into_iter()
        .zip(values)
        .map(|(l, v)| (l.to_string(), v.to_string()))
        .collect())
}

fn paired_pairs(
    lines: &[&str],
    first: usize,
    last: usize,
    delimiter: Option<char>,
) -> Result<Vec<(String, String)>, FormatError> {
    if last >= lines.len() {
        return Err(FormatError::MissingLine {
            line: last + 1,
            available: lines.len(),
        });
    }

    let mut pairs = Vec::with_capacity(last.saturating_sub(first) + 1);
    for (idx, line) in lines.iter().enumerate().take(last + 1).skip(first) {
        let pair = match delimiter {
            Some(delim) => line
                .split_once(delim)
                .map(|(label, value)| (label.trim(), value.trim())),
            None => {
                let mut tokens = line.split_whitespace();
                tokens.next().zip(tokens.next())
            }
        };
        let (label, value) = pair.ok_or_else(|| FormatError::MissingPair {
            line: idx + 1,
            delimiter: delimiter.map_or_else(|| "whitespace".to_string(), |d| d.to_string()),
        })?;
        pairs.push((label.to_string(), value.to_string()));
    }
    Ok(pairs)
}

fn parse_value(label: &str, token: &str) -> Result<f64, FormatError> {
    token.trim().parse::<f64>().map_err(|_| FormatError::BadValue {
        label: label.to_string(),
        token: token.to_string(),
    })
}

// ============================================================================
// Freesurfer stats
// ============================================================================

/// One measurement column of a Freesurfer stats table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsColumn {
    pub header: &'static str,
    pub derivative: &'static str,
    pub measure: &'static str,
    pub units: &'static str,
}

/// Measurement columns loaded from `.stats` tables, in table order.
pub const STATS_COLUMNS: &[StatsColumn] = &[
    StatsColumn {
        header: "NumVert",
        derivative: "number of vertices",
        measure: "count",
        units: "",
    },
    StatsColumn {
        header: "SurfArea",
        derivative: "surface area",
        measure: "area",
        units: "mm^2",
    },
    StatsColumn {
        header: "GrayVol",
        derivative: "gray matter volume",
        measure: "volume",
        units: "mm^3",
    },
    StatsColumn {
        header: "ThickAvg",
        derivative: "average cortical thickness",
        measure: "distance",
        units: "mm",
    },
    StatsColumn {
        header: "ThickStd",
        derivative: "standard deviation of cortical thickness",
        measure: "distance",
        units: "mm",
    },
    StatsColumn {
        header: "MeanCurv",
        derivative: "integrated rectified mean curvature",
        measure: "curvature",
        units: "mm^-1",
    },
    StatsColumn {
        header: "GausCurv",
        derivative: "integrated rectified gaussian curvature",
        measure: "curvature",
        units: "mm^-2",
    },
    StatsColumn {
        header: "FoldInd",
        derivative: "folding index",
        measure: "index",
        units: "",
    },
    StatsColumn {
        header: "CurvInd",
        derivative: "intrinsic curvature index",
        measure: "index",
        units: "",
    },
];

/// One structure/measurement value from a stats table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsMeasure {
    pub structure: String,
    pub derivative: String,
    pub measure: String,
    pub units: String,
    pub value: f64,
}

/// Parse a Freesurfer `.stats` table.
///
/// The `# ColHeaders` comment names the columns; every following
/// non-comment line is one structure. Each known measurement column yields
/// one [`StatsMeasure`].
pub fn parse_freesurfer_stats(text: &str) -> Result<Vec<StatsMeasure>, FormatError> {
    let headers: Vec<&str> = text
        .lines()
        .find_map(|line| {
            line.trim_start_matches('#')
                .trim()
                .strip_prefix("ColHeaders")
                .map(|rest| rest.split_whitespace().collect())
        })
        .ok_or_else(|| FormatError::UnknownColumn("ColHeaders".to_string()))?;

    let name_idx = headers
        .iter()
        .position(|h| *h == "StructName")
        .ok_or_else(|| FormatError::UnknownColumn("StructName".to_string()))?;

    let columns: Vec<(usize, &StatsColumn)> = STATS_COLUMNS
        .iter()
        .filter_map(|col| headers.iter().position(|h| *h == col.header).map(|idx| (idx, col)))
        .collect();
    if columns.is_empty() {
        return Err(FormatError::UnknownColumn("ThickAvg".to_string()));
    }

    let mut measures = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        if tokens.len() < headers.len() {
            return Err(FormatError::CountMismatch {
                labels: headers.len(),
                values: tokens.len(),
            });
        }
        let structure = tokens[name_idx];
        for (idx, col) in &columns {
            measures.push(StatsMeasure {
                structure: structure.to_string(),
                derivative: col.derivative.to_string(),
                measure: col.measure.to_string(),
                units: col.units.to_string(),
                value: parse_value(structure, tokens[*idx])?,
            });
        }
    }

    if measures.is_empty() {
        return Err(FormatError::Empty);
    }
    Ok(measures)
}
