use thiserror::Error;

/// Everything that can go wrong while ingesting a score export.
///
/// The first three variants are batch-fatal and abort the upload before any
/// row is touched; the rest are row-scoped and end up in the batch report.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("could not derive a course from file name '{0}'")]
    UnresolvableFilename(String),
    #[error("file has fewer than one header row and one data row")]
    EmptyOrMalformedInput,
    #[error("no week-assignment columns found in header '{0}'")]
    NoScoreColumnsFound(String),
    #[error("row carries neither an email nor a roll number")]
    MissingIdentity,
    #[error("no student record matches '{0}'")]
    StudentNotFound(String),
    #[error("record store write failed: {0}")]
    PersistenceFailure(String),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::UnresolvableFilename(_) => "unresolvable_filename",
            ImportError::EmptyOrMalformedInput => "empty_or_malformed_input",
            ImportError::NoScoreColumnsFound(_) => "no_score_columns_found",
            ImportError::MissingIdentity => "missing_identity",
            ImportError::StudentNotFound(_) => "student_not_found",
            ImportError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

/// Branch codes the filename resolver recognizes. `ece` sits before the
/// two-letter codes so it is never shadowed by `ce` or `ee`.
const KNOWN_BRANCH_CODES: &[&str] = &["ece", "cs", "me", "ce", "ee", "ch", "ge", "de", "mm"];

/// Term prefix used for every canonical course id.
const CURRENT_TERM: &str = "noc25";

#[derive(Debug, Clone, PartialEq)]
pub struct CourseRef {
    pub branch_code: String,
    pub number: String,
    pub course_id: String,
}

impl CourseRef {
    fn new(branch_code: &str, number: &str) -> Self {
        CourseRef {
            branch_code: branch_code.to_string(),
            number: number.to_string(),
            course_id: format!("{}-{}{}", CURRENT_TERM, branch_code, number),
        }
    }
}

/// Derive a canonical course id from an uploaded file's display name.
///
/// Extractors run most-specific first; the first hit wins and later, looser
/// patterns are never consulted.
pub fn resolve_course(file_name: &str) -> Result<CourseRef, ImportError> {
    const EXTRACTORS: &[fn(&str) -> Option<CourseRef>] = &[
        course_with_term_prefix,
        course_with_known_branch,
        course_from_short_code,
        course_from_letters_digits,
    ];

    let stem = file_stem(file_name).to_ascii_lowercase();
    for extract in EXTRACTORS {
        if let Some(course) = extract(&stem) {
            return Ok(course);
        }
    }
    Err(ImportError::UnresolvableFilename(file_name.to_string()))
}

fn file_stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            stem
        }
        _ => name,
    }
}

fn skip_separator(s: &str, i: usize) -> usize {
    match s.as_bytes().get(i) {
        Some(b'-') | Some(b'_') | Some(b' ') => i + 1,
        _ => i,
    }
}

fn known_branch_at(s: &str, i: usize) -> Option<&'static str> {
    KNOWN_BRANCH_CODES
        .iter()
        .find(|code| s[i..].starts_with(*code))
        .copied()
}

fn digits_at(s: &str, i: usize) -> Option<(&str, usize)> {
    let bytes = s.as_bytes();
    let mut j = i;
    while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
    }
    if j > i {
        Some((&s[i..j], j))
    } else {
        None
    }
}

/// `noc<digits>` then a known branch code then a number, separators optional.
/// Example stems: `ns_noc25_ce38_week`, `noc25-cs52`.
fn course_with_term_prefix(stem: &str) -> Option<CourseRef> {
    let mut search = 0;
    while let Some(rel) = stem[search..].find("noc") {
        let at = search + rel;
        search = at + 1;

        let Some((_, after_term)) = digits_at(stem, at + 3) else {
            continue;
        };
        let branch_start = skip_separator(stem, after_term);
        let Some(branch) = known_branch_at(stem, branch_start) else {
            continue;
        };
        let number_start = skip_separator(stem, branch_start + branch.len());
        if let Some((number, _)) = digits_at(stem, number_start) {
            return Some(CourseRef::new(branch, number));
        }
    }
    None
}

/// A known branch code followed by a number anywhere in the stem.
fn course_with_known_branch(stem: &str) -> Option<CourseRef> {
    for i in 0..stem.len() {
        if !stem.is_char_boundary(i) {
            continue;
        }
        let Some(branch) = known_branch_at(stem, i) else {
            continue;
        };
        let number_start = skip_separator(stem, i + branch.len());
        if let Some((number, _)) = digits_at(stem, number_start) {
            return Some(CourseRef::new(branch, number));
        }
    }
    None
}

/// A branch-code-shaped token: 2-4 letters, optional separator, digits.
fn course_from_short_code(stem: &str) -> Option<CourseRef> {
    scan_letter_runs(stem, |run| run.len() >= 2 && run.len() <= 4)
}

/// Last resort: any run of letters followed by digits.
fn course_from_letters_digits(stem: &str) -> Option<CourseRef> {
    scan_letter_runs(stem, |_| true)
}

fn scan_letter_runs(stem: &str, accept: fn(&str) -> bool) -> Option<CourseRef> {
    let bytes = stem.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_alphabetic() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let run = &stem[start..i];
        if !accept(run) {
            continue;
        }
        let number_start = skip_separator(stem, i);
        if let Some((number, _)) = digits_at(stem, number_start) {
            return Some(CourseRef::new(run, number));
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreColumn {
    pub week_label: String,
    pub source_index: usize,
}

/// Where the interesting columns live in one export's header row.
#[derive(Debug, Default)]
pub struct HeaderMap {
    pub email_column: Option<usize>,
    pub roll_column: Option<usize>,
    pub score_columns: Vec<ScoreColumn>,
}

/// Classify every header cell. Week columns keep their source order; two
/// columns naming the same week are both kept (the file's problem, not ours).
pub fn map_header(header: &[String]) -> HeaderMap {
    let mut map = HeaderMap::default();
    for (idx, cell) in header.iter().enumerate() {
        let lower = cell.to_ascii_lowercase();
        if map.email_column.is_none() && lower.contains("email") {
            map.email_column = Some(idx);
            continue;
        }
        if map.roll_column.is_none() && lower.contains("roll") {
            map.roll_column = Some(idx);
            continue;
        }
        if let Some(label) = canonical_week_label(&lower) {
            map.score_columns.push(ScoreColumn {
                week_label: label,
                source_index: idx,
            });
        }
    }
    map
}

/// Normalize any spelling of a week reference to `"Week {n} Assignment"`.
///
/// Accepts a bare number, `week3`, `Week 03`, `Week 1 Assignment` and the
/// separator variants in between; zero padding is stripped.
pub fn canonical_week_label(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let n: u32 = trimmed.parse().ok()?;
        return Some(format!("Week {} Assignment", n));
    }

    let lower = trimmed.to_ascii_lowercase();
    let at = lower.find("week")?;
    let mut i = at + 4;
    let bytes = lower.as_bytes();
    while i < bytes.len() && matches!(bytes[i], b' ' | b'-' | b'_') {
        i += 1;
    }
    let (digits, _) = digits_at(&lower, i)?;
    let n: u32 = digits.parse().ok()?;
    Some(format!("Week {} Assignment", n))
}

/// Split raw upload bytes into a trimmed header row plus data rows.
///
/// Blank lines vanish and rows shorter than the header are dropped, which
/// tolerates the trailing junk lines these exports usually carry.
pub fn parse_table(
    bytes: &[u8],
    delimiter: u8,
) -> Result<(Vec<String>, Vec<Vec<String>>), ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|_| ImportError::EmptyOrMalformedInput)?;
        let cells: Vec<String> = record
            .iter()
            .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
            .collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        rows.push(cells);
    }

    if rows.len() < 2 {
        return Err(ImportError::EmptyOrMalformedInput);
    }

    let mut rows = rows.into_iter();
    let header = rows.next().unwrap_or_default();
    let data: Vec<Vec<String>> = rows.filter(|r| r.len() >= header.len()).collect();
    if data.is_empty() {
        return Err(ImportError::EmptyOrMalformedInput);
    }
    Ok((header, data))
}

#[derive(Debug, Clone, Default)]
pub struct RowIdentity {
    pub email: Option<String>,
    pub roll_number: Option<String>,
}

impl RowIdentity {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.roll_number.is_none()
    }

    /// Whatever identifies the row best in a failure report.
    pub fn describe(&self) -> String {
        self.roll_number
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| "<no identity>".to_string())
    }
}

pub fn identity_from_row(row: &[String], header: &HeaderMap) -> RowIdentity {
    let pick = |col: Option<usize>| {
        col.and_then(|idx| row.get(idx))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    RowIdentity {
        email: pick(header.email_column),
        roll_number: pick(header.roll_column),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeekResult {
    pub week_label: String,
    pub score: f64,
}

/// A malformed or negative score cell counts as 0 rather than failing the row.
pub fn parse_score(cell: &str) -> f64 {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .unwrap_or(0.0)
}

pub fn week_results_from_row(row: &[String], columns: &[ScoreColumn]) -> Vec<WeekResult> {
    columns
        .iter()
        .map(|col| WeekResult {
            week_label: col.week_label.clone(),
            score: row.get(col.source_index).map(|c| parse_score(c)).unwrap_or(0.0),
        })
        .collect()
}
