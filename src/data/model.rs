use std::cmp::Ordering;
use std::fmt;

use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

// ---------------------------------------------------------------------------
// MetadataValue – one cohort label
// ---------------------------------------------------------------------------

/// A cohort label as read from a participant table.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    String(String),
    /// Empty cell.
    Null,
}

impl MetadataValue {
    /// Cross-variant order: missing, then numbers, then text.
    fn rank(&self) -> u8 {
        match self {
            MetadataValue::Null => 0,
            MetadataValue::Integer(_) => 1,
            MetadataValue::Float(_) => 2,
            MetadataValue::String(_) => 3,
        }
    }
}

// Labels key the per-cohort BTreeMap, so floats order by `total_cmp`.
impl Eq for MetadataValue {}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MetadataValue::Integer(a), MetadataValue::Integer(b)) => a.cmp(b),
            (MetadataValue::Float(a), MetadataValue::Float(b)) => a.total_cmp(b),
            (MetadataValue::String(a), MetadataValue::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::String(s) => f.write_str(s),
            MetadataValue::Null => f.write_str("missing"),
        }
    }
}

// ---------------------------------------------------------------------------
// Representation kind
// ---------------------------------------------------------------------------

/// What a single time step of a subject holds. A dataset is homogeneous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepresentationKind {
    /// One scalar per time step, selected by a summary-statistic key.
    Curve { statistic: String },
    /// A fixed-length vector per time step (flattened persistence image).
    Image,
}

impl RepresentationKind {
    /// Curve when a statistic is given, image otherwise.
    pub fn from_statistic(statistic: Option<&str>) -> Self {
        match statistic {
            Some(s) if !s.is_empty() => RepresentationKind::Curve {
                statistic: s.to_string(),
            },
            _ => RepresentationKind::Image,
        }
    }

    pub fn is_curve(&self) -> bool {
        matches!(self, RepresentationKind::Curve { .. })
    }
}

// ---------------------------------------------------------------------------
// Subject – one experimental unit
// ---------------------------------------------------------------------------

/// One subject's time series, stored as a (time × dim) matrix. Curves have
/// `dim == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    /// Parsed integer key. Zero-padded keys collapse (`"007"` is 7), and
    /// output names use this canonical form.
    pub id: i64,
    pub series: Array2<f64>,
}

impl Subject {
    pub fn new(id: i64, series: Array2<f64>) -> Self {
        Self { id, series }
    }

    /// Build a curve subject from one scalar per time step.
    pub fn from_curve(id: i64, values: Vec<f64>) -> Self {
        let series = Array1::from_vec(values).insert_axis(Axis(1));
        Self { id, series }
    }

    pub fn time_steps(&self) -> usize {
        self.series.nrows()
    }

    pub fn dim(&self) -> usize {
        self.series.ncols()
    }
}

// ---------------------------------------------------------------------------
// Dataset – all subjects of one run
// ---------------------------------------------------------------------------

/// Subjects sorted by numeric id (so `9` precedes `10`), all sharing one
/// time-step count and dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    kind: RepresentationKind,
    subjects: Vec<Subject>,
}

impl Dataset {
    /// Validate shapes and sort by subject id.
    pub fn new(kind: RepresentationKind, mut subjects: Vec<Subject>) -> Result<Self> {
        if subjects.is_empty() {
            return Err(AnalysisError::malformed("dataset contains no subjects"));
        }
        subjects.sort_by_key(|s| s.id);

        if let Some(w) = subjects.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(AnalysisError::malformed(format!(
                "subject {} appears more than once",
                w[0].id
            )));
        }

        let first = &subjects[0];
        let (steps, dim) = (first.time_steps(), first.dim());
        if steps == 0 {
            return Err(AnalysisError::malformed(format!(
                "subject {} has an empty time series",
                first.id
            )));
        }
        if kind.is_curve() && dim != 1 {
            return Err(AnalysisError::malformed(format!(
                "curve representation must be scalar, subject {} has dimension {dim}",
                first.id
            )));
        }
        for s in &subjects[1..] {
            if s.time_steps() != steps {
                return Err(AnalysisError::malformed(format!(
                    "subject {} has {} time steps but subject {} has {steps}",
                    s.id,
                    s.time_steps(),
                    first.id
                )));
            }
            if s.dim() != dim {
                return Err(AnalysisError::malformed(format!(
                    "subject {} has representation dimension {} but subject {} has {dim}",
                    s.id,
                    s.dim(),
                    first.id
                )));
            }
        }

        Ok(Self { kind, subjects })
    }

    pub fn kind(&self) -> &RepresentationKind {
        &self.kind
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn subject(&self, id: i64) -> Option<&Subject> {
        self.subjects
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|i| &self.subjects[i])
    }

    pub fn ids(&self) -> Vec<i64> {
        self.subjects.iter().map(|s| s.id).collect()
    }

    /// Number of subjects.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether the dataset is empty. Never true for a validated dataset.
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn time_steps(&self) -> usize {
        self.subjects[0].time_steps()
    }

    pub fn dim(&self) -> usize {
        self.subjects[0].dim()
    }

    /// Apply `f` to every series, re-validating the result.
    pub fn map_series<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(ArrayView2<'_, f64>) -> Array2<f64>,
    {
        let subjects = self
            .subjects
            .iter()
            .map(|s| Subject::new(s.id, f(s.series.view())))
            .collect();
        Dataset::new(self.kind.clone(), subjects)
    }

    /// Stack all subjects into a (subjects × time × dim) array.
    pub fn stacked(&self) -> Array3<f64> {
        let mut out = Array3::zeros((self.len(), self.time_steps(), self.dim()));
        for (mut slot, s) in out.axis_iter_mut(Axis(0)).zip(&self.subjects) {
            slot.assign(&s.series);
        }
        out
    }

    /// Concatenate all series along the sample axis, subject-major.
    pub fn concatenated(&self) -> Array2<f64> {
        let (t, d) = (self.time_steps(), self.dim());
        let mut out = Array2::zeros((self.len() * t, d));
        for (i, s) in self.subjects.iter().enumerate() {
            out.slice_mut(s![i * t..(i + 1) * t, ..]).assign(&s.series);
        }
        out
    }

    /// Stack into a (time × subject × dim) tensor for joint multislice
    /// encoders.
    pub fn time_major_tensor(&self) -> Array3<f64> {
        self.stacked()
            .permuted_axes([1, 0, 2])
            .as_standard_layout()
            .into_owned()
    }
}

// ---------------------------------------------------------------------------
// Cohorts
// ---------------------------------------------------------------------------

/// A cohort-label column read from a side table, in row order.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortTable {
    pub column: String,
    pub labels: Vec<MetadataValue>,
}

impl CohortTable {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Cohort label per subject, aligned to the dataset's sorted subject order.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortAssignment {
    subjects: Vec<i64>,
    labels: Vec<MetadataValue>,
}

impl CohortAssignment {
    /// Align table rows to the dataset's subjects. Row `i` belongs to the
    /// `i`-th subject in sorted order.
    pub fn align(dataset: &Dataset, table: &CohortTable) -> Result<Self> {
        if table.len() != dataset.len() {
            return Err(AnalysisError::malformed(format!(
                "cohort table has {} rows but the dataset has {} subjects",
                table.len(),
                dataset.len()
            )));
        }
        Ok(Self {
            subjects: dataset.ids(),
            labels: table.labels.clone(),
        })
    }

    pub fn labels(&self) -> &[MetadataValue] {
        &self.labels
    }

    pub fn label_of(&self, subject: i64) -> Option<&MetadataValue> {
        self.subjects
            .iter()
            .position(|&s| s == subject)
            .map(|i| &self.labels[i])
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn image_subject(id: i64, rows: usize, cols: usize) -> Subject {
        Subject::new(id, Array2::from_elem((rows, cols), id as f64))
    }

    #[test]
    fn subjects_are_sorted_by_id() {
        let ds = Dataset::new(
            RepresentationKind::Image,
            vec![image_subject(12, 3, 2), image_subject(3, 3, 2), image_subject(7, 3, 2)],
        )
        .unwrap();
        assert_eq!(ds.ids(), vec![3, 7, 12]);
        assert_eq!(ds.subject(7).unwrap().series[[0, 0]], 7.0);
    }

    #[test]
    fn inconsistent_time_steps_are_rejected() {
        let err = Dataset::new(
            RepresentationKind::Image,
            vec![image_subject(1, 3, 2), image_subject(2, 4, 2)],
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput(_)));
    }

    #[test]
    fn inconsistent_dimension_is_rejected() {
        let err = Dataset::new(
            RepresentationKind::Image,
            vec![image_subject(1, 3, 2), image_subject(2, 3, 5)],
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedInput(_)));
    }

    #[test]
    fn stacking_and_concatenation_keep_subject_order() {
        let ds = Dataset::new(
            RepresentationKind::Image,
            vec![
                Subject::new(2, array![[2.0, 2.5], [2.1, 2.6]]),
                Subject::new(1, array![[1.0, 1.5], [1.1, 1.6]]),
            ],
        )
        .unwrap();

        let stacked = ds.stacked();
        assert_eq!(stacked.shape(), &[2, 2, 2]);
        assert_eq!(stacked[[0, 1, 0]], 1.1);
        assert_eq!(stacked[[1, 0, 1]], 2.5);

        let flat = ds.concatenated();
        assert_eq!(flat.shape(), &[4, 2]);
        assert_eq!(flat[[2, 0]], 2.0);

        let tensor = ds.time_major_tensor();
        assert_eq!(tensor.shape(), &[2, 2, 2]);
        assert_eq!(tensor[[1, 0, 0]], 1.1);
        assert_eq!(tensor[[0, 1, 0]], 2.0);
    }

    #[test]
    fn cohort_table_must_match_subject_count() {
        let ds = Dataset::new(
            RepresentationKind::from_statistic(Some("total_persistence")),
            vec![Subject::from_curve(1, vec![0.0, 1.0]), Subject::from_curve(2, vec![1.0, 2.0])],
        )
        .unwrap();
        let table = CohortTable {
            column: "cluster".into(),
            labels: vec![MetadataValue::Integer(0)],
        };
        assert!(matches!(
            CohortAssignment::align(&ds, &table),
            Err(AnalysisError::MalformedInput(_))
        ));

        let table = CohortTable {
            column: "cluster".into(),
            labels: vec![MetadataValue::Integer(0), MetadataValue::Integer(1)],
        };
        let assignment = CohortAssignment::align(&ds, &table).unwrap();
        assert_eq!(assignment.label_of(2), Some(&MetadataValue::Integer(1)));
    }

    #[test]
    fn labels_order_missing_numbers_text() {
        let mut labels = vec![
            MetadataValue::String("b".into()),
            MetadataValue::Float(0.5),
            MetadataValue::Integer(3),
            MetadataValue::Null,
            MetadataValue::String("a".into()),
        ];
        labels.sort();
        let shown: Vec<String> = labels.iter().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["missing", "3", "0.5", "a", "b"]);
    }
}
