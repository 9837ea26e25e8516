//! Spreadsheet analytics: KPI categorization, trend and anomaly detection,
//! and heuristic business insights.
//!
//! The analyzer works over the typed [`Sheet`] model from [`crate::table`].
//! Detection and narrative rendering are kept separate: every pass
//! produces structured values first, and the `render_*` functions turn
//! them into the text that flows into the retrieval pipeline. Section
//! banners (`=== SHEET: … ===`) double as cut points for the segmenter.
//!
//! Keyword and time-period tables cover both English and Finnish column
//! names; they are process-wide constants, initialized once and shared
//! across requests without locking.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use serde::Serialize;

use crate::numeric;
use crate::table::{ColumnKind, Sheet};

const REVENUE_KEYWORDS: &[&str] = &[
    "liikevaihto",
    "myynti",
    "tulot",
    "revenue",
    "sales",
    "income",
    "net sales",
    "gross revenue",
    "turnover",
];

const PROFIT_KEYWORDS: &[&str] = &[
    "voitto",
    "tulos",
    "kate",
    "profit",
    "ebit",
    "ebitda",
    "operating income",
    "net income",
    "gross profit",
    "margin",
];

const COST_KEYWORDS: &[&str] = &[
    "kulut",
    "kustannukset",
    "menot",
    "costs",
    "expenses",
    "operating costs",
    "cogs",
    "overhead",
];

const GROWTH_KEYWORDS: &[&str] = &[
    "kasvu", "muutos", "growth", "change", "increase", "delta", "variance", "yoy", "mom",
];

/// Quarter tokens, four-digit years, and month abbreviations in English
/// and Finnish. Matched against lowercased column names.
static TIME_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"q[1-4]|quarter|kvartaali|neljännes|\d{4}",
        r"|jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec",
        r"|tammi|helmi|maalis|huhti|touko|kesä|heinä|elo|syys|loka|marras|joulu",
    ))
    .expect("time label pattern")
});

/// Minimum non-missing values for trend fitting.
const TREND_MIN_POINTS: usize = 3;
/// Minimum non-missing values for outlier detection.
const ANOMALY_MIN_POINTS: usize = 5;
/// Z-score beyond which a value is an outlier.
const OUTLIER_Z: f64 = 2.0;
/// Values sitting numerically on the threshold count as outliers.
const OUTLIER_Z_TOLERANCE: f64 = 1e-4;
/// A slope within this fraction of the stddev counts as flat.
const STABLE_SLOPE_FRACTION: f64 = 0.1;
/// A maximum this many times the mean is reported as an insight.
const LARGE_VALUE_MULTIPLE: f64 = 3.0;
/// Absolute Pearson coefficient considered a strong correlation.
const STRONG_CORRELATION: f64 = 0.7;

/// Semantic KPI bucket for a column. Declaration order is priority order:
/// the first keyword set that matches a column name wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiCategory {
    Revenue,
    Profit,
    Cost,
    Growth,
    Other,
}

impl KpiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            KpiCategory::Revenue => "revenue",
            KpiCategory::Profit => "profit",
            KpiCategory::Cost => "cost",
            KpiCategory::Growth => "growth",
            KpiCategory::Other => "other",
        }
    }
}

/// Descriptive statistics for one categorized numeric column.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnStats {
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Compound per-period growth rate in percent; absent when the series
    /// starts at or below zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth_rate: Option<f64>,
}

/// KPI categorization for one sheet.
#[derive(Debug, Clone, Serialize)]
pub struct KpiReport {
    /// Column names per category, including non-numeric keyword matches.
    pub categories: BTreeMap<KpiCategory, Vec<String>>,
    /// Statistics per category, numeric columns only.
    pub statistics: BTreeMap<KpiCategory, BTreeMap<String, ColumnStats>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnTrend {
    pub direction: TrendDirection,
    pub slope: f64,
    /// Percent change from the first to the last value.
    pub change_pct: f64,
    /// Coefficient of variation in percent (`stddev / mean * 100`).
    pub volatility: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub trends: BTreeMap<String, ColumnTrend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalRange {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnAnomalies {
    pub outlier_count: usize,
    pub outlier_pct: f64,
    pub outliers: Vec<f64>,
    /// 5th/95th percentile band of the column.
    pub normal_range: NormalRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub columns: BTreeMap<String, ColumnAnomalies>,
}

/// A detected business insight: a tag plus its parameters. Rendering to
/// narrative text is a separate, pure step ([`Insight::render`]).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Insight {
    LargeValue {
        sheet: String,
        column: String,
        max: f64,
        multiple: f64,
    },
    NegativeValues {
        sheet: String,
        column: String,
        count: usize,
    },
    Correlation {
        sheet: String,
        first: String,
        second: String,
        coefficient: f64,
    },
}

impl Insight {
    pub fn render(&self) -> String {
        match self {
            Insight::LargeValue {
                sheet,
                column,
                max,
                multiple,
            } => format!(
                "{}: {} contains an unusually large value ({:.0}), {:.1}x the column mean",
                sheet, column, max, multiple
            ),
            Insight::NegativeValues {
                sheet,
                column,
                count,
            } => format!(
                "{}: {} contains {} negative value(s), check for errors or losses",
                sheet, column, count
            ),
            Insight::Correlation {
                sheet,
                first,
                second,
                coefficient,
            } => {
                let direction = if *coefficient > 0.0 {
                    "positive"
                } else {
                    "negative"
                };
                format!(
                    "{}: strong {} correlation between {} and {} ({:.2})",
                    sheet, direction, first, second, coefficient
                )
            }
        }
    }
}

/// Structural summary produced by the first analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct SheetStructure {
    pub rows: usize,
    pub columns: usize,
    pub column_names: Vec<String>,
    pub numeric_count: usize,
    pub date_count: usize,
    pub text_count: usize,
    /// Text columns whose names look like time-period labels.
    pub time_label_columns: Vec<String>,
}

/// Full analysis of one compacted sheet.
#[derive(Debug, Clone, Serialize)]
pub struct SheetAnalysis {
    pub name: String,
    pub structure: SheetStructure,
    pub kpis: Option<KpiReport>,
    pub trends: Option<TrendReport>,
    pub anomalies: Option<AnomalyReport>,
    pub insights: Vec<Insight>,
}

/// Aggregated analysis across all sheets of a workbook.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkbookAnalysis {
    pub sheets: Vec<String>,
    pub structure: BTreeMap<String, SheetStructure>,
    pub kpi_analysis: BTreeMap<String, KpiReport>,
    pub trend_analysis: BTreeMap<String, TrendReport>,
    pub anomaly_detection: BTreeMap<String, AnomalyReport>,
    pub business_insights: Vec<Insight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkbookAnalysis {
    /// Error-only result for a workbook that could not be analyzed.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Analyze every sheet of a workbook and render the combined narrative.
///
/// Sheets are compacted (fully-empty rows/columns dropped) before
/// analysis; sheets that end up empty are skipped. The returned narrative
/// starts with a workbook-level overview followed by one block per sheet.
///
/// Fails only on malformed input (ragged sheets); the caller is expected
/// to degrade to the basic per-sheet summary in that case.
pub fn analyze_workbook(sheets: &[Sheet]) -> Result<(String, WorkbookAnalysis)> {
    for sheet in sheets {
        let rows = sheet.row_count();
        if sheet.columns.iter().any(|c| c.cells.len() != rows) {
            bail!("sheet '{}' has ragged columns", sheet.name);
        }
    }

    let mut analysis = WorkbookAnalysis {
        sheets: sheets.iter().map(|s| s.name.clone()).collect(),
        ..Default::default()
    };
    let mut parts: Vec<String> = Vec::new();

    for sheet in sheets {
        let sheet = sheet.clone().compact();
        if sheet.is_empty() {
            continue;
        }
        let sa = analyze_sheet(&sheet);

        parts.push(render_structure(&sa.name, &sa.structure));
        analysis.structure.insert(sa.name.clone(), sa.structure.clone());
        if let Some(kpis) = &sa.kpis {
            parts.push(render_kpis(&sa.name, kpis));
            analysis.kpi_analysis.insert(sa.name.clone(), kpis.clone());
        }
        if let Some(trends) = &sa.trends {
            parts.push(render_trends(&sa.name, trends));
            analysis
                .trend_analysis
                .insert(sa.name.clone(), trends.clone());
        }
        if let Some(anomalies) = &sa.anomalies {
            parts.push(render_anomalies(&sa.name, anomalies));
            analysis
                .anomaly_detection
                .insert(sa.name.clone(), anomalies.clone());
        }
        analysis.business_insights.extend(sa.insights);
    }

    let mut blocks = vec![render_overview(&analysis)];
    blocks.extend(parts);
    Ok((blocks.join("\n\n"), analysis))
}

/// Run all analysis passes over one compacted, non-empty sheet.
///
/// Column types are probed exactly once, during the structure pass;
/// every later pass dispatches on the resulting tags.
pub fn analyze_sheet(sheet: &Sheet) -> SheetAnalysis {
    let kinds = column_kinds(sheet);
    SheetAnalysis {
        name: sheet.name.clone(),
        structure: sheet_structure(sheet, &kinds),
        kpis: identify_kpis(sheet, &kinds),
        trends: analyze_trends(sheet, &kinds),
        anomalies: detect_anomalies(sheet, &kinds),
        insights: sheet_insights(sheet, &kinds),
    }
}

/// Classify every column once, in column order.
pub fn column_kinds(sheet: &Sheet) -> Vec<ColumnKind> {
    sheet.columns.iter().map(|c| c.kind()).collect()
}

fn sheet_structure(sheet: &Sheet, kinds: &[ColumnKind]) -> SheetStructure {
    let mut numeric_count = 0;
    let mut date_count = 0;
    let mut text_count = 0;
    let mut time_label_columns = Vec::new();

    for (col, kind) in sheet.columns.iter().zip(kinds) {
        match kind {
            ColumnKind::Numeric => numeric_count += 1,
            ColumnKind::Date => date_count += 1,
            ColumnKind::Text => {
                text_count += 1;
                if TIME_LABEL.is_match(&col.name.to_lowercase()) {
                    time_label_columns.push(col.name.clone());
                }
            }
        }
    }

    SheetStructure {
        rows: sheet.row_count(),
        columns: sheet.column_count(),
        column_names: sheet.columns.iter().map(|c| c.name.clone()).collect(),
        numeric_count,
        date_count,
        text_count,
        time_label_columns,
    }
}

/// First keyword set whose entry appears in the lowercased column name.
fn keyword_category(name_lower: &str) -> Option<KpiCategory> {
    let sets = [
        (REVENUE_KEYWORDS, KpiCategory::Revenue),
        (PROFIT_KEYWORDS, KpiCategory::Profit),
        (COST_KEYWORDS, KpiCategory::Cost),
        (GROWTH_KEYWORDS, KpiCategory::Growth),
    ];
    for (keywords, category) in sets {
        if keywords.iter().any(|k| name_lower.contains(k)) {
            return Some(category);
        }
    }
    None
}

fn identify_kpis(sheet: &Sheet, kinds: &[ColumnKind]) -> Option<KpiReport> {
    let mut categories: BTreeMap<KpiCategory, Vec<String>> = BTreeMap::new();
    let mut statistics: BTreeMap<KpiCategory, BTreeMap<String, ColumnStats>> = BTreeMap::new();

    for (col, kind) in sheet.columns.iter().zip(kinds) {
        let numeric = *kind == ColumnKind::Numeric;
        let category = match keyword_category(&col.name.to_lowercase()) {
            Some(c) => c,
            None if numeric => KpiCategory::Other,
            None => continue,
        };
        categories
            .entry(category)
            .or_default()
            .push(col.name.clone());

        if numeric {
            let values = col.numeric_values();
            if !values.is_empty() {
                statistics
                    .entry(category)
                    .or_default()
                    .insert(col.name.clone(), column_stats(&values));
            }
        }
    }

    if categories.is_empty() {
        None
    } else {
        Some(KpiReport {
            categories,
            statistics,
        })
    }
}

fn column_stats(values: &[f64]) -> ColumnStats {
    ColumnStats {
        sum: values.iter().sum(),
        mean: numeric::mean(values),
        median: numeric::median(values),
        std_dev: numeric::std_dev(values),
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        growth_rate: growth_rate(values),
    }
}

/// Compound per-period growth rate in percent.
///
/// `((end / start)^(1 / periods) - 1) * 100` over `len - 1` periods.
/// Undefined (None) when there are fewer than two values, the series
/// starts at or below zero, or the endpoint ratio is not positive.
pub fn growth_rate(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let start = values[0];
    let end = values[values.len() - 1];
    if start <= 0.0 {
        return None;
    }
    let ratio = end / start;
    if ratio <= 0.0 {
        return None;
    }
    let periods = (values.len() - 1) as f64;
    Some((ratio.powf(1.0 / periods) - 1.0) * 100.0)
}

fn analyze_trends(sheet: &Sheet, kinds: &[ColumnKind]) -> Option<TrendReport> {
    let mut trends = BTreeMap::new();

    for (col, kind) in sheet.columns.iter().zip(kinds) {
        if *kind != ColumnKind::Numeric {
            continue;
        }
        let values = col.numeric_values();
        if values.len() < TREND_MIN_POINTS {
            continue;
        }

        let slope = numeric::linear_slope(&values);
        let sd = numeric::std_dev(&values);
        let direction = if slope.abs() <= STABLE_SLOPE_FRACTION * sd {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let start = values[0];
        let end = values[values.len() - 1];
        let change_pct = if start == 0.0 {
            0.0
        } else {
            (end - start) / start.abs() * 100.0
        };
        let m = numeric::mean(&values);
        let volatility = if m == 0.0 { 0.0 } else { sd / m * 100.0 };

        trends.insert(
            col.name.clone(),
            ColumnTrend {
                direction,
                slope,
                change_pct,
                volatility,
            },
        );
    }

    if trends.is_empty() {
        None
    } else {
        Some(TrendReport { trends })
    }
}

fn detect_anomalies(sheet: &Sheet, kinds: &[ColumnKind]) -> Option<AnomalyReport> {
    let mut columns = BTreeMap::new();

    for (col, kind) in sheet.columns.iter().zip(kinds) {
        if *kind != ColumnKind::Numeric {
            continue;
        }
        let values = col.numeric_values();
        if values.len() < ANOMALY_MIN_POINTS {
            continue;
        }

        let m = numeric::mean(&values);
        let sd = numeric::std_dev(&values);
        if sd == 0.0 {
            continue;
        }

        let outliers: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| ((v - m) / sd).abs() > OUTLIER_Z - OUTLIER_Z_TOLERANCE)
            .collect();
        if outliers.is_empty() {
            continue;
        }

        columns.insert(
            col.name.clone(),
            ColumnAnomalies {
                outlier_count: outliers.len(),
                outlier_pct: outliers.len() as f64 / values.len() as f64 * 100.0,
                outliers,
                normal_range: NormalRange {
                    low: numeric::percentile(&values, 0.05),
                    high: numeric::percentile(&values, 0.95),
                },
            },
        );
    }

    if columns.is_empty() {
        None
    } else {
        Some(AnomalyReport { columns })
    }
}

fn sheet_insights(sheet: &Sheet, kinds: &[ColumnKind]) -> Vec<Insight> {
    let mut insights = Vec::new();
    let numeric_cols: Vec<usize> = (0..sheet.columns.len())
        .filter(|&i| kinds[i] == ColumnKind::Numeric)
        .collect();

    for &i in &numeric_cols {
        let col = &sheet.columns[i];
        let values = col.numeric_values();
        if values.is_empty() {
            continue;
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let m = numeric::mean(&values);
        if m > 0.0 && max > LARGE_VALUE_MULTIPLE * m {
            insights.push(Insight::LargeValue {
                sheet: sheet.name.clone(),
                column: col.name.clone(),
                max,
                multiple: max / m,
            });
        }
        let negatives = values.iter().filter(|v| **v < 0.0).count();
        if negatives > 0 {
            insights.push(Insight::NegativeValues {
                sheet: sheet.name.clone(),
                column: col.name.clone(),
                count: negatives,
            });
        }
    }

    for (pos, &i) in numeric_cols.iter().enumerate() {
        for &j in &numeric_cols[pos + 1..] {
            let (xs, ys) = sheet.paired_numeric(i, j);
            if let Some(r) = numeric::pearson(&xs, &ys) {
                if r.abs() > STRONG_CORRELATION {
                    insights.push(Insight::Correlation {
                        sheet: sheet.name.clone(),
                        first: sheet.columns[i].name.clone(),
                        second: sheet.columns[j].name.clone(),
                        coefficient: r,
                    });
                }
            }
        }
    }

    insights
}

// ============ Narrative rendering ============

fn render_structure(name: &str, s: &SheetStructure) -> String {
    let mut out = format!(
        "=== SHEET: {} ===\nRows: {}, Columns: {} (numeric: {}, date: {}, text: {})\nColumns: {}",
        name,
        s.rows,
        s.columns,
        s.numeric_count,
        s.date_count,
        s.text_count,
        s.column_names.join(", ")
    );
    if !s.time_label_columns.is_empty() {
        out.push_str(&format!(
            "\nTime-series labels: {}",
            s.time_label_columns.join(", ")
        ));
    }
    out
}

fn render_kpis(name: &str, report: &KpiReport) -> String {
    let mut lines = vec![format!("KPI ANALYSIS ({}):", name)];
    for (category, columns) in &report.statistics {
        for (column, stats) in columns {
            lines.push(format!(
                "  {} / {}: sum {:.0}, mean {:.2}, median {:.2}, range {:.0} - {:.0}",
                category.as_str().to_uppercase(),
                column,
                stats.sum,
                stats.mean,
                stats.median,
                stats.min,
                stats.max
            ));
            if let Some(rate) = stats.growth_rate {
                lines.push(format!("    growth: {:.1}% per period", rate));
            }
        }
    }
    lines.join("\n")
}

fn render_trends(name: &str, report: &TrendReport) -> String {
    let mut lines = vec![format!("TREND ANALYSIS ({}):", name)];
    for (column, trend) in &report.trends {
        lines.push(format!(
            "  {}: {}, change {:+.1}%, volatility {:.1}%",
            column,
            trend.direction.as_str(),
            trend.change_pct,
            trend.volatility
        ));
    }
    lines.join("\n")
}

fn render_anomalies(name: &str, report: &AnomalyReport) -> String {
    let mut lines = vec![format!("ANOMALY ANALYSIS ({}):", name)];
    for (column, anomalies) in &report.columns {
        let mut largest = anomalies.outliers.clone();
        largest.sort_by(|a, b| {
            b.abs()
                .partial_cmp(&a.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let top: Vec<String> = largest.iter().take(3).map(|v| format!("{:.0}", v)).collect();
        lines.push(format!(
            "  {}: {} outlier(s) ({:.1}%), normal range {:.1} - {:.1}, largest: {}",
            column,
            anomalies.outlier_count,
            anomalies.outlier_pct,
            anomalies.normal_range.low,
            anomalies.normal_range.high,
            top.join(", ")
        ));
    }
    lines.join("\n")
}

fn render_overview(analysis: &WorkbookAnalysis) -> String {
    let mut lines = vec![
        "WORKBOOK ANALYSIS".to_string(),
        "=".repeat(50),
        format!("Sheets analyzed: {}", analysis.sheets.len()),
    ];

    if !analysis.kpi_analysis.is_empty() {
        lines.push("KPI categories found:".to_string());
        for (sheet, report) in &analysis.kpi_analysis {
            for (category, columns) in &report.statistics {
                lines.push(format!(
                    "  - {} ({}): {} metric(s)",
                    category.as_str(),
                    sheet,
                    columns.len()
                ));
            }
        }
    }

    if !analysis.business_insights.is_empty() {
        lines.push(format!(
            "Business insights: {}",
            analysis.business_insights.len()
        ));
        for insight in analysis.business_insights.iter().take(5) {
            lines.push(format!("  - {}", insight.render()));
        }
    }

    lines.join("\n")
}
