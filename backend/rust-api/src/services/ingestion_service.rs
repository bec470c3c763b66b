use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::{
    config::QuizSettings,
    error::IngestionError,
    metrics::QUIZ_ROWS_SKIPPED_TOTAL,
    models::quiz::QuizSubmission,
    services::{
        normalizer::{
            has_legacy_validity_override, normalize_email, normalize_student_id, score_passed,
            DomainTables,
        },
        quiz_source::QuizSource,
        store::SubmissionStore,
    },
    utils::time::{validity_window_start, Clock},
};

/// Google Forms response timestamp, e.g. `9/14/2025 13:45:12`.
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

const COL_TIMESTAMP: usize = 0;
const COL_SCORE: usize = 1;
const COL_NAME: usize = 2;
const COL_STUDENT_ID: usize = 3;
const COL_EMAIL: usize = 4;
const COLUMN_COUNT: usize = 5;

#[derive(Debug, Default)]
pub struct ParsedSheet {
    pub submissions: Vec<QuizSubmission>,
    pub skipped_rows: usize,
    /// Rows dated before the validity window (legacy overrides excluded)
    pub outside_window: usize,
}

/// Turns one quiz export into normalized submissions. Rows that cannot be
/// read are skipped with a warning; they never fail the sheet.
pub fn parse_submissions(
    quiz_id: &str,
    csv_text: &str,
    tables: &DomainTables,
    window_start: DateTime<Utc>,
) -> ParsedSheet {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let mut sheet = ParsedSheet::default();

    for (index, record) in reader.records().enumerate() {
        let row = index + 1;

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                skip_row(&mut sheet, quiz_id, row, "malformed_record", &err.to_string());
                continue;
            }
        };

        if record.len() < COLUMN_COUNT {
            skip_row(
                &mut sheet,
                quiz_id,
                row,
                "missing_columns",
                &format!("{} columns", record.len()),
            );
            continue;
        }

        let raw_timestamp = record.get(COL_TIMESTAMP).unwrap_or_default();
        let submitted_at = match NaiveDateTime::parse_from_str(raw_timestamp, TIMESTAMP_FORMAT) {
            Ok(naive) => naive.and_utc(),
            Err(err) => {
                skip_row(&mut sheet, quiz_id, row, "bad_timestamp", &err.to_string());
                continue;
            }
        };

        let student_id = normalize_student_id(record.get(COL_STUDENT_ID));
        let email = normalize_email(record.get(COL_EMAIL), student_id, tables);
        let score_text = record.get(COL_SCORE).unwrap_or_default().to_string();

        let mut passed = score_passed(&score_text);
        if submitted_at < window_start && !has_legacy_validity_override(student_id) {
            sheet.outside_window += 1;
            passed = false;
        }

        sheet.submissions.push(QuizSubmission {
            id: QuizSubmission::document_id(quiz_id, row),
            quiz_id: quiz_id.to_string(),
            email,
            student_id,
            name: record.get(COL_NAME).unwrap_or_default().to_string(),
            submitted_at,
            score_text,
            passed,
        });
    }

    sheet
}

fn skip_row(sheet: &mut ParsedSheet, quiz_id: &str, row: usize, reason: &str, detail: &str) {
    warn!(quiz_id, row, reason, detail, "Skipping quiz row");
    QUIZ_ROWS_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    sheet.skipped_rows += 1;
}

pub struct IngestionService {
    source: Arc<dyn QuizSource>,
    submissions: Arc<dyn SubmissionStore>,
    tables: DomainTables,
    reset_day_of_year: u32,
    clock: Arc<dyn Clock>,
}

impl IngestionService {
    pub fn new(
        source: Arc<dyn QuizSource>,
        submissions: Arc<dyn SubmissionStore>,
        settings: &QuizSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            submissions,
            tables: DomainTables::from_settings(settings),
            reset_day_of_year: settings.reset_day_of_year,
            clock,
        }
    }

    /// Fetches the quiz sheet and replaces every stored submission of
    /// `quiz_id` with the parsed rows. Returns the number stored.
    pub async fn ingest_quiz(&self, quiz_id: &str) -> Result<usize, IngestionError> {
        let csv_text = self.source.fetch_csv(quiz_id).await?;

        let window_start = validity_window_start(self.clock.now(), self.reset_day_of_year);
        let sheet = parse_submissions(quiz_id, &csv_text, &self.tables, window_start);

        let stored = self
            .submissions
            .replace_for_quiz(quiz_id, &sheet.submissions)
            .await?;

        let passing = sheet.submissions.iter().filter(|s| s.passed).count();
        info!(
            quiz_id,
            stored,
            passing,
            outside_window = sheet.outside_window,
            skipped_rows = sheet.skipped_rows,
            window_start = %window_start,
            "Ingested quiz sheet"
        );

        Ok(stored)
    }
}
