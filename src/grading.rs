use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Display rounding used throughout the app: `Math.round(100*x)/100`.
/// Aggregates are rounded as soon as they are computed and the rounded
/// value is what ranking compares.
pub fn round_2_decimals(x: f64) -> f64 {
    (100.0 * x).round() / 100.0
}

/// Grading-curve constants. The dataset has no credits or max-marks table,
/// so every subject shares one ceiling and one credit weight; callers pass
/// these in rather than the formula hard-coding them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradingConfig {
    pub max_marks: f64,
    pub credit_weight: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_marks: 150.0,
            credit_weight: 3.0,
        }
    }
}

/// Maps a raw subject total to a discrete grade point on the fixed curve.
///
/// | fraction of max | grade point |
/// |-----------------|-------------|
/// | >= 0.85         | 10          |
/// | >= 0.80         | 9           |
/// | >= 0.70         | 8           |
/// | >= 0.60         | 7           |
/// | >= 0.50         | 6           |
/// | >= 0.45         | 5           |
/// | >= 0.40         | 4           |
/// | below           | 0           |
///
/// Total and never fails: NaN or negative marks fall through to 0, totals
/// above the ceiling are not clamped.
pub fn grade_point(total_marks: f64, max_marks: f64) -> u8 {
    if !(max_marks > 0.0) {
        return 0;
    }
    let ratio = total_marks / max_marks;
    match ratio {
        r if r >= 0.85 => 10,
        r if r >= 0.80 => 9,
        r if r >= 0.70 => 8,
        r if r >= 0.60 => 7,
        r if r >= 0.50 => 6,
        r if r >= 0.45 => 5,
        r if r >= 0.40 => 4,
        _ => 0,
    }
}

/// Identity row as fetched from the students table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub roll_number: i64,
    pub enrollment_no: String,
    pub name: String,
    pub birth_date: Option<String>,
    pub class_name: String,
}

/// Flat per-(student, subject) mark row. Components are nullable in the
/// store; an absent component contributes nothing to the subject total.
#[derive(Debug, Clone, Default)]
pub struct MarkRow {
    pub student_id: String,
    pub subject_code: String,
    pub ct1: Option<f64>,
    pub ct2: Option<f64>,
    pub ct3: Option<f64>,
    pub assignment: Option<f64>,
    pub mid_sem: Option<f64>,
    pub end_sem: Option<f64>,
}

impl MarkRow {
    pub fn component_sum(&self) -> f64 {
        [
            self.ct1,
            self.ct2,
            self.ct3,
            self.assignment,
            self.mid_sem,
            self.end_sem,
        ]
        .iter()
        .flatten()
        .sum()
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub student_id: String,
    pub subject_code: String,
    pub percentage: f64,
}

/// Per-student result of one aggregation pass. `sgpa` is the credit-weighted
/// average of per-subject grade points, `attendance` the mean of per-subject
/// attendance percentages; both already rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub student_id: String,
    pub roll_number: i64,
    pub enrollment_no: String,
    pub name: String,
    pub class_name: String,
    pub sgpa: f64,
    pub attendance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudentAggregate {
    pub rank: i64,
    #[serde(flatten)]
    pub aggregate: StudentAggregate,
}

/// One subject's contribution to a student's aggregate, kept for profile
/// and comparison views.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub subject_code: String,
    pub total_marks: f64,
    pub grade_point: u8,
    pub attendance: Option<f64>,
}

/// Per-subject standing used by subject leaderboards, where the ranking key
/// is the subject total rather than the cross-subject average.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStanding {
    pub rank: i64,
    pub student_id: String,
    pub roll_number: i64,
    pub enrollment_no: String,
    pub name: String,
    pub class_name: String,
    pub total_marks: f64,
    pub grade_point: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
    Metric,
    Attendance,
}

impl RankKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grade" => Some(RankKey::Metric),
            "attendance" => Some(RankKey::Attendance),
            _ => None,
        }
    }
}

/// Groups mark rows into per-student, per-subject totals. Duplicate rows for
/// the same pair sum together like extra components.
fn subject_totals_by_student(marks: &[MarkRow]) -> HashMap<String, HashMap<String, f64>> {
    let mut by_student: HashMap<String, HashMap<String, f64>> = HashMap::new();
    for row in marks {
        *by_student
            .entry(row.student_id.clone())
            .or_default()
            .entry(row.subject_code.clone())
            .or_insert(0.0) += row.component_sum();
    }
    by_student
}

fn attendance_means(attendance: &[AttendanceRow]) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for row in attendance {
        let entry = sums.entry(row.student_id.clone()).or_insert((0.0, 0));
        entry.0 += row.percentage;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(id, (sum, n))| (id, round_2_decimals(sum / n as f64)))
        .collect()
}

fn weighted_metric(subject_totals: &HashMap<String, f64>, config: &GradingConfig) -> f64 {
    let mut point_sum = 0.0_f64;
    let mut weight_sum = 0.0_f64;
    for total in subject_totals.values() {
        point_sum += f64::from(grade_point(*total, config.max_marks)) * config.credit_weight;
        weight_sum += config.credit_weight;
    }
    if weight_sum > 0.0 {
        round_2_decimals(point_sum / weight_sum)
    } else {
        0.0
    }
}

/// Builds one aggregate per identity row. Students missing from the marks or
/// attendance fetch are kept with the missing side at 0; mark/attendance rows
/// without a matching identity row are dropped (the identity fetch defines
/// the cohort). Output order follows the input students.
pub fn compute_aggregates(
    students: &[StudentRow],
    marks: &[MarkRow],
    attendance: &[AttendanceRow],
    config: &GradingConfig,
) -> Vec<StudentAggregate> {
    let totals = subject_totals_by_student(marks);
    let attendance = attendance_means(attendance);

    students
        .iter()
        .map(|s| {
            let sgpa = totals
                .get(&s.id)
                .map(|per_subject| weighted_metric(per_subject, config))
                .unwrap_or(0.0);
            StudentAggregate {
                student_id: s.id.clone(),
                roll_number: s.roll_number,
                enrollment_no: s.enrollment_no.clone(),
                name: s.name.clone(),
                class_name: s.class_name.clone(),
                sgpa,
                attendance: attendance.get(&s.id).copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// Per-subject breakdown for one student, sorted by subject code.
pub fn subject_results_for(
    student_id: &str,
    marks: &[MarkRow],
    attendance: &[AttendanceRow],
    config: &GradingConfig,
) -> Vec<SubjectResult> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for row in marks.iter().filter(|r| r.student_id == student_id) {
        *totals.entry(row.subject_code.clone()).or_insert(0.0) += row.component_sum();
    }
    let mut out: Vec<SubjectResult> = totals
        .into_iter()
        .map(|(subject_code, total)| {
            let att = attendance
                .iter()
                .find(|a| a.student_id == student_id && a.subject_code == subject_code)
                .map(|a| a.percentage);
            SubjectResult {
                grade_point: grade_point(total, config.max_marks),
                total_marks: total,
                subject_code,
                attendance: att,
            }
        })
        .collect();
    out.sort_by(|a, b| a.subject_code.cmp(&b.subject_code));
    out
}

fn descending_then_roll(key_a: f64, key_b: f64, roll_a: i64, roll_b: i64) -> Ordering {
    key_b
        .partial_cmp(&key_a)
        .unwrap_or(Ordering::Equal)
        .then(roll_a.cmp(&roll_b))
}

/// Orders aggregates descending by the chosen key, breaking ties by ascending
/// roll number, and assigns dense 1-based ranks. The tie-break makes the
/// order strict, so no two records ever share a rank.
pub fn rank_by(records: Vec<StudentAggregate>, key: RankKey) -> Vec<RankedStudentAggregate> {
    let mut records = records;
    records.sort_by(|a, b| {
        let (ka, kb) = match key {
            RankKey::Metric => (a.sgpa, b.sgpa),
            RankKey::Attendance => (a.attendance, b.attendance),
        };
        descending_then_roll(ka, kb, a.roll_number, b.roll_number)
    });
    records
        .into_iter()
        .enumerate()
        .map(|(i, aggregate)| RankedStudentAggregate {
            rank: (i + 1) as i64,
            aggregate,
        })
        .collect()
}

/// Subject leaderboard: cohort restricted to the subject's enrollees, ranked
/// by the subject total with the same tie-break and dense-rank policy.
pub fn rank_subject(
    students: &[StudentRow],
    marks: &[MarkRow],
    subject_code: &str,
    config: &GradingConfig,
) -> Vec<SubjectStanding> {
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for row in marks.iter().filter(|r| r.subject_code == subject_code) {
        *totals.entry(row.student_id.as_str()).or_insert(0.0) += row.component_sum();
    }

    let mut standings: Vec<(f64, &StudentRow)> = students
        .iter()
        .filter_map(|s| totals.get(s.id.as_str()).map(|t| (*t, s)))
        .collect();
    standings.sort_by(|a, b| descending_then_roll(a.0, b.0, a.1.roll_number, b.1.roll_number));

    standings
        .into_iter()
        .enumerate()
        .map(|(i, (total, s))| SubjectStanding {
            rank: (i + 1) as i64,
            student_id: s.id.clone(),
            roll_number: s.roll_number,
            enrollment_no: s.enrollment_no.clone(),
            name: s.name.clone(),
            class_name: s.class_name.clone(),
            total_marks: total,
            grade_point: grade_point(total, config.max_marks),
        })
        .collect()
}

/// Picks 2 distinct students uniformly without replacement. None when the
/// cohort has fewer than 2 members.
pub fn random_pair<'a, R: Rng + ?Sized>(
    aggregates: &'a [StudentAggregate],
    rng: &mut R,
) -> Option<(&'a StudentAggregate, &'a StudentAggregate)> {
    if aggregates.len() < 2 {
        return None;
    }
    let picked = rand::seq::index::sample(rng, aggregates.len(), 2);
    Some((&aggregates[picked.index(0)], &aggregates[picked.index(1)]))
}
