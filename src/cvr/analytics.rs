use crate::cvr::io_common::title_case;
use crate::cvr::*;

use approval_voting::builder::Builder;
use approval_voting::{composite_key, AnalysisMode, ApprovalAnalysis};
use rusqlite::Connection;
use snafu::ResultExt;
use std::collections::BTreeMap;

/// Co-approvals and voting patterns of a single contest, under the CVR names
/// of the candidates.
pub fn analyze_contest(conn: &Connection, source: &str, contest_name: &str) -> CvrResult<ApprovalAnalysis> {
    let approvals = store::contest_approvals(conn, source, contest_name)?;
    let mut builder = Builder::new(&AnalysisMode::PerContest).context(AnalysisSnafu {})?;
    for (ballot_id, candidate) in approvals.iter() {
        builder
            .add_approval(*ballot_id, candidate)
            .context(AnalysisSnafu {})?;
    }
    info!(
        "Contest {:?}: {} ballots with approvals",
        contest_name,
        builder.ballots().len()
    );
    let analysis = builder.run().context(AnalysisSnafu {})?;
    debug!("analyze_contest: {:?}", analysis);
    Ok(analysis)
}

/// The name of a contest in the composite candidate names.
pub fn contest_display_name(contest_name: &str, display_names: &BTreeMap<String, String>) -> String {
    match display_names.get(contest_name) {
        Some(n) => n.clone(),
        None => title_case(contest_name),
    }
}

/// Analysis of all the contests of a source together. Every candidate is
/// named `"{Candidate} ({Contest})"`.
pub fn analyze_election_wide(
    conn: &Connection,
    source: &str,
    display_names: &BTreeMap<String, String>,
) -> CvrResult<ApprovalAnalysis> {
    let approvals = store::election_approvals(conn, source)?;
    let mut builder = Builder::new(&AnalysisMode::ElectionWide).context(AnalysisSnafu {})?;
    let mut contests: BTreeMap<String, String> = BTreeMap::new();
    for (ballot_id, contest_name, candidate) in approvals.iter() {
        let contest_display = contests
            .entry(contest_name.clone())
            .or_insert_with(|| contest_display_name(contest_name, display_names));
        let key = composite_key(&title_case(candidate), contest_display);
        builder
            .add_approval(*ballot_id, &key)
            .context(AnalysisSnafu {})?;
    }
    info!(
        "Election-wide: {} ballots with approvals across {} contests",
        builder.ballots().len(),
        contests.len()
    );
    let analysis = builder.run().context(AnalysisSnafu {})?;
    if let Some(cc) = analysis.patterns.as_ref().and_then(|p| p.cross_contest.as_ref()) {
        info!(
            "Multi-approval voters: {} ({:.1}%), single-approval only voters: {} ({:.1}%)",
            cc.multi_approval_voters,
            cc.multi_approval_rate,
            cc.single_approval_only_voters,
            cc.single_approval_only_rate
        );
    }
    Ok(analysis)
}
