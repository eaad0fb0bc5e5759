//! Results table for a completed plan

use crate::plan::{Metrics, Plan};
use serde::Serialize;

/// One experiment's final numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub id: String,
    pub name: String,
    pub metrics: Metrics,
    pub is_winner: bool,
}

/// Final comparison of every experiment in a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsReport {
    pub title: String,
    pub summary: String,
    /// Resolved winner; the first experiment when the recommended id is unknown
    pub winner_id: Option<String>,
    pub rows: Vec<ReportRow>,
}

impl ResultsReport {
    /// Rows are in plan order and carry the target metrics.
    pub fn from_plan(plan: &Plan) -> Self {
        let winner_id = plan.winner().map(|w| w.id.clone());
        let rows = plan
            .experiments
            .iter()
            .map(|exp| ReportRow {
                id: exp.id.clone(),
                name: exp.name.clone(),
                metrics: exp.simulated_metrics,
                is_winner: winner_id.as_deref() == Some(exp.id.as_str()),
            })
            .collect();

        Self {
            title: plan.title.clone(),
            summary: plan.summary.clone(),
            winner_id,
            rows,
        }
    }

    pub fn winner(&self) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.is_winner)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// CSV table with a header row; fields are quoted where RFC 4180 requires it
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.write_record(CSV_HEADER)?;
        for row in &self.rows {
            wtr.serialize(CsvRow {
                id: &row.id,
                name: &row.name,
                accuracy: row.metrics.accuracy,
                latency_ms: row.metrics.latency_ms,
                model_size_mb: row.metrics.model_size_mb,
                winner: row.is_winner,
            })?;
        }
        let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

const CSV_HEADER: [&str; 6] = [
    "id",
    "name",
    "accuracy",
    "latency_ms",
    "model_size_mb",
    "winner",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    name: &'a str,
    accuracy: f64,
    latency_ms: f64,
    model_size_mb: f64,
    winner: bool,
}
