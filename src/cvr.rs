use log::{debug, info, warn};

use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;
use text_diff::print_diff;

use approval_voting::{AnalysisErrors, CoApproval, VotingPatterns};

use crate::cvr::config_reader::*;
use crate::cvr::ingest::{IngestStats, IngestStatus, Ingestor};

pub mod analytics;
pub mod config_reader;
pub mod ingest;
pub mod io_common;
pub mod io_json;
pub mod io_xml;
pub mod reconcile;
pub mod report_store;
pub mod store;

pub const DEFAULT_CVR_DATABASE: &str = "cvr-data.sqlite3";
pub const DEFAULT_BATCH_SIZE: usize = 5000;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CvrError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing the JSON content of {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Error writing the JSON summary"))]
    WritingJson { source: serde_json::Error },
    #[snafu(display("{path}: expected a JSON array of ballots"))]
    JsonNotArray { path: String },
    #[snafu(display("{path}: ballot #{index} is not a JSON object"))]
    JsonBallotNotObject { path: String, index: usize },
    #[snafu(display("{path}: ballot #{index}: field {field} is not a string"))]
    JsonFieldNotString {
        path: String,
        index: usize,
        field: String,
    },
    #[snafu(display("Error reading the XML document {path}"))]
    ParsingXml {
        source: quick_xml::Error,
        path: String,
    },
    #[snafu(display("{path}: the XML document ends before closing {element}"))]
    TruncatedXml { path: String, element: String },
    #[snafu(display("{path}: missing element {field}"))]
    MissingXmlField { path: String, field: String },
    #[snafu(display("{path}: could not read {field} from {value:?}"))]
    InvalidNumber {
        path: String,
        field: String,
        value: String,
    },
    #[snafu(display("The file source {path} requires a contestName"))]
    MissingContestName { path: String },
    #[snafu(display("Provider not implemented: {provider}"))]
    UnknownProvider { provider: String },
    #[snafu(display("Database error while {action}"))]
    Sqlite {
        source: rusqlite::Error,
        action: String,
    },
    #[snafu(display("Ballot {id} was written but cannot be found"))]
    BallotNotFound { id: String },
    #[snafu(display("The CVR database {path} does not exist"))]
    MissingCvrStore { path: String },
    #[snafu(display("The report database {path} does not exist"))]
    MissingReportStore { path: String },
    #[snafu(display("Analysis error"))]
    Analysis { source: AnalysisErrors },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type CvrResult<T> = Result<T, CvrError>;

/// A ballot, as decoded by the readers.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedBallot {
    pub id: String,
    pub batch_sequence: Option<i64>,
    pub sheet_number: Option<i64>,
    pub precinct_name: Option<String>,
    pub precinct_id: Option<String>,
    pub is_blank: bool,
    pub contests: Vec<ParsedContest>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedContest {
    pub name: String,
    pub id: String,
    pub undervotes: i64,
    pub selections: Vec<ParsedSelection>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedSelection {
    pub candidate_name: String,
    pub candidate_id: String,
    /// 1 for an approval.
    pub value: i64,
}

/// Options of a run that are not part of the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub reset_source: bool,
    pub skip_ingest: bool,
    pub out: Option<String>,
    pub reference: Option<String>,
    /// Raised when the user interrupts the program.
    pub interrupted: Arc<AtomicBool>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ContestSummary {
    pub contest: String,
    #[serde(rename = "reportId")]
    pub report_id: Option<i64>,
    #[serde(rename = "coApprovals")]
    pub co_approvals: Vec<CoApproval>,
    #[serde(rename = "votingPatterns")]
    pub voting_patterns: Option<VotingPatterns>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub source: String,
    pub interrupted: bool,
    pub contests: Vec<ContestSummary>,
    #[serde(rename = "electionWide")]
    pub election_wide: Option<ContestSummary>,
}

/// Ingests all the configured sources, analyzes every contest and, when a
/// report database is configured, publishes the results to it.
///
/// `root_dir` is the directory against which the relative paths of the configuration are resolved.
pub fn run(config: &RunConfig, root_dir: &Path, options: &RunOptions) -> CvrResult<RunSummary> {
    info!("config: {:?}", config);

    // Check the prerequisites before doing any work.
    let report_path = config
        .report_database
        .as_ref()
        .map(|p| resolve_path(root_dir, p));
    if let Some(p) = report_path.as_ref() {
        ensure!(
            Path::new(p).exists(),
            MissingReportStoreSnafu { path: p.clone() }
        );
    }
    let cvr_path = resolve_path(
        root_dir,
        config
            .cvr_database
            .as_deref()
            .unwrap_or(DEFAULT_CVR_DATABASE),
    );
    if options.skip_ingest {
        ensure!(
            Path::new(&cvr_path).exists(),
            MissingCvrStoreSnafu { path: cvr_path }
        );
    }

    let mut conn = store::open_store(&cvr_path)?;
    if options.reset_source {
        store::reset_source(&mut conn, &config.source)?;
    }

    if !options.skip_ingest {
        if config.cvr_file_sources.is_empty() {
            warn!("No file sources configured, nothing to ingest");
        }
        let mut ingestor = Ingestor::new(
            &config.source,
            config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        );
        let mut status = IngestStatus::Completed;
        for cfs in config.cvr_file_sources.iter() {
            status = ingest::ingest_source(
                &mut conn,
                &mut ingestor,
                root_dir,
                cfs,
                options.interrupted.as_ref(),
            )?;
            if status == IngestStatus::Interrupted {
                break;
            }
        }
        let stats = ingestor.finish(&mut conn)?;
        log_ingest_summary(&conn, &config.source, &stats)?;
        if status == IngestStatus::Interrupted {
            warn!("Processing interrupted by user, the buffered ballots have been saved");
            return Ok(RunSummary {
                source: config.source.clone(),
                interrupted: true,
                contests: Vec::new(),
                election_wide: None,
            });
        }
    }

    let mut report_conn = match report_path.as_ref() {
        Some(p) => Some(report_store::open_report_store(p)?),
        None => None,
    };

    let mut contests: Vec<ContestSummary> = Vec::new();
    for contest_name in store::contest_names(&conn, &config.source)? {
        info!("Processing contest {}", contest_name);
        let analysis = analytics::analyze_contest(&conn, &config.source, &contest_name)?;

        let mut summary = ContestSummary {
            contest: contest_name.clone(),
            report_id: None,
            co_approvals: analysis.co_approvals.clone(),
            voting_patterns: analysis.patterns.clone(),
        };

        if let Some(rconn) = report_conn.as_mut() {
            let report_id = reconcile::find_report(rconn, config, &contest_name)?;
            match report_id {
                None => {
                    warn!("No matching report found for contest {:?}", contest_name);
                }
                Some(_) if analysis.is_empty() => {
                    warn!("No co-approval data generated for {:?}", contest_name);
                }
                Some(rid) => {
                    info!("Found report {} for contest {:?}", rid, contest_name);
                    let published = reconcile::reconcile_contest(
                        rconn,
                        &conn,
                        &config.source,
                        &contest_name,
                        rid,
                        &analysis,
                    )?;
                    summary.report_id = Some(rid);
                    summary.co_approvals = published.co_approvals;
                    summary.voting_patterns = published.patterns;
                }
            }
        }
        contests.push(summary);
    }

    let election_wide = match config.election_wide.as_ref() {
        None => None,
        Some(settings) => {
            info!("Generating the election-wide analysis");
            let ew = analytics::analyze_election_wide(
                &conn,
                &config.source,
                &settings.contest_display_names,
            )?;
            let mut report_id = None;
            if let Some(rconn) = report_conn.as_mut() {
                if ew.is_empty() {
                    warn!("No election-wide co-approval data generated");
                } else {
                    report_id = Some(reconcile::publish_election_wide(rconn, settings, &ew)?);
                }
            }
            Some(ContestSummary {
                contest: ELECTION_WIDE_OFFICE.to_string(),
                report_id,
                co_approvals: ew.co_approvals,
                voting_patterns: ew.patterns,
            })
        }
    };

    if let (Some(rconn), Some(rpath)) = (report_conn.as_mut(), report_path.as_ref()) {
        if same_file(&cvr_path, rpath) {
            debug!("The CVR tables already are in the report database");
        } else {
            let exported = store::export_source(&conn, rconn, &config.source)?;
            info!(
                "Exported {} ballots, {} contests, {} selections to the report database",
                exported.ballots, exported.contests, exported.selections
            );
        }
    }

    let summary = RunSummary {
        source: config.source.clone(),
        interrupted: false,
        contests,
        election_wide,
    };
    write_and_check_summary(&summary, options)?;
    Ok(summary)
}

fn same_file(p1: &str, p2: &str) -> bool {
    match (fs::canonicalize(p1), fs::canonicalize(p2)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn log_ingest_summary(conn: &rusqlite::Connection, source: &str, stats: &IngestStats) -> CvrResult<()> {
    info!(
        "Files processed: {}, errors: {}, new ballots: {}, already present: {}",
        stats.processed, stats.errors, stats.new_ballots, stats.existing_ballots
    );
    let counts = store::row_counts(conn, source)?;
    info!(
        "Database: {} ballots, {} contests, {} selections",
        counts.ballots, counts.contests, counts.selections
    );
    for (precinct, count) in stats.top_precincts(10) {
        info!("  {}: {} ballots", precinct, count);
    }
    for (contest, count) in stats.contests.iter() {
        info!("  {}: {} instances", contest, count);
    }
    for (candidate, count) in stats.candidates.iter() {
        debug!("  {}: {} approvals", candidate, count);
    }
    Ok(())
}

fn write_and_check_summary(summary: &RunSummary, options: &RunOptions) -> CvrResult<()> {
    // Going through a JSON value orders the keys the same way as the reference.
    let js_stats = serde_json::to_value(summary).context(WritingJsonSnafu {})?;
    let pretty_js_stats = serde_json::to_string_pretty(&js_stats).context(WritingJsonSnafu {})?;
    debug!("summary: {}", pretty_js_stats);

    match options.out.as_deref() {
        Some("stdout") => {
            println!("{}", pretty_js_stats);
        }
        Some(path) => {
            info!("Writing summary to {:?}", path);
            fs::write(path, pretty_js_stats.as_str()).context(OpeningFileSnafu { path })?;
        }
        None => {}
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = options.reference.as_ref() {
        let summary_ref = read_summary(summary_p)?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(WritingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary")
        }
    }
    Ok(())
}

pub fn read_summary(path: &str) -> CvrResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    Ok(js)
}
