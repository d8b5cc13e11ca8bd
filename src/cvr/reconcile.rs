use crate::cvr::io_common::normalize_contest_name;
use crate::cvr::report_store::*;
use crate::cvr::*;

use approval_voting::{ApprovalAnalysis, ApprovalHistogram};
use rusqlite::Connection;
use snafu::ResultExt;
use std::collections::BTreeMap;

/// The form under which CVR names and report names are compared:
/// `Tishaura O. Jones` and `TISHAURA O JONES` are the same candidate.
pub fn normalize_for_match(name: &str) -> String {
    name.to_uppercase()
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['.', ' '], "")
}

/// Maps the CVR names of the candidates to their names in the report.
///
/// The first report name with the same normalized form wins. Names without a
/// match are left out of the mapping.
pub fn candidate_name_mapping(cvr_names: &[String], proper_names: &[String]) -> BTreeMap<String, String> {
    let normalized: Vec<(String, &String)> = proper_names
        .iter()
        .map(|n| (normalize_for_match(n), n))
        .collect();
    let mut mapping: BTreeMap<String, String> = BTreeMap::new();
    for cvr_name in cvr_names.iter() {
        let key = normalize_for_match(cvr_name);
        match normalized.iter().find(|(k, _)| *k == key) {
            Some((_, proper)) => {
                debug!("candidate_name_mapping: {:?} -> {:?}", cvr_name, proper);
                mapping.insert(cvr_name.clone(), (*proper).clone());
            }
            None => {
                warn!("No candidate of the report matches {:?}", cvr_name);
            }
        }
    }
    mapping
}

fn mapped(mapping: &BTreeMap<String, String>, name: &str) -> String {
    mapping
        .get(name)
        .cloned()
        .unwrap_or_else(|| name.to_string())
}

fn merge_histogram(target: &mut ApprovalHistogram, other: &ApprovalHistogram) {
    for (k, v) in other.iter() {
        *target.entry(*k).or_insert(0) += v;
    }
}

/// Renames the candidates everywhere in an analysis.
pub fn apply_name_mapping(analysis: &ApprovalAnalysis, mapping: &BTreeMap<String, String>) -> ApprovalAnalysis {
    let mut res = analysis.clone();
    res.candidates = analysis
        .candidates
        .iter()
        .map(|n| mapped(mapping, n))
        .collect();
    for ca in res.co_approvals.iter_mut() {
        ca.candidate_a = mapped(mapping, &ca.candidate_a);
        ca.candidate_b = mapped(mapping, &ca.candidate_b);
    }
    let mut approvals: BTreeMap<String, u64> = BTreeMap::new();
    for (name, count) in analysis.candidate_approvals.iter() {
        *approvals.entry(mapped(mapping, name)).or_insert(0) += count;
    }
    res.candidate_approvals = approvals;

    if let Some(p) = res.patterns.as_mut() {
        let mut dists: BTreeMap<String, ApprovalHistogram> = BTreeMap::new();
        for (name, hist) in p.candidate_approval_distributions.iter() {
            merge_histogram(dists.entry(mapped(mapping, name)).or_default(), hist);
        }
        p.candidate_approval_distributions = dists;

        let mut anyone_but: BTreeMap<String, u64> = BTreeMap::new();
        for (name, count) in p.anyone_but_analysis.iter() {
            *anyone_but.entry(mapped(mapping, name)).or_insert(0) += count;
        }
        p.anyone_but_analysis = anyone_but;

        let mut combination: Vec<String> = p
            .most_common_combination
            .iter()
            .map(|n| mapped(mapping, n))
            .collect();
        combination.sort();
        p.most_common_combination = combination;
    }
    res
}

/// Finds the report of a contest: first through the configured report paths,
/// then through the office and the date of the election.
pub fn find_report(conn: &Connection, config: &RunConfig, contest_name: &str) -> CvrResult<Option<i64>> {
    if let Some(path) = config.report_path_for(contest_name) {
        let res = find_report_by_path(conn, path)?;
        if res.is_none() {
            warn!("No report at path {:?} for contest {:?}", path, contest_name);
        }
        return Ok(res);
    }
    let office = normalize_contest_name(contest_name);
    debug!("find_report: {:?} -> office {:?}", contest_name, office);
    find_report_by_office(conn, &office, config.election_date.as_deref())
}

/// Writes the analysis of a contest to its report, in a single transaction.
///
/// The co-approvals and voting patterns are replaced, the ballot count and the
/// votes of the candidates are overwritten. The votes are read back, and a
/// difference is only reported.
pub fn publish_contest(
    report_conn: &mut Connection,
    report_id: i64,
    analysis: &ApprovalAnalysis,
    tallies: &[(String, u64)],
) -> CvrResult<()> {
    let tx = report_conn.transaction().context(SqliteSnafu {
        action: "starting the report update",
    })?;
    replace_analytics(&tx, report_id, analysis)?;
    if let Some(p) = analysis.patterns.as_ref() {
        info!("Updating report ballot count to {}", p.total_ballots);
        update_ballot_count(&tx, report_id, p.total_ballots)?;
    }
    for (name, votes) in tallies.iter() {
        info!("Updating {}: {} votes", name, votes);
        match set_candidate_votes(&tx, report_id, name, *votes)? {
            Some(v) if v == *votes as i64 => {}
            Some(v) => {
                warn!(
                    "Vote count mismatch for {}: expected {}, got {}",
                    name, votes, v
                );
            }
            None => {
                warn!("Candidate {:?} not found in report {}", name, report_id);
            }
        }
    }
    tx.commit().context(SqliteSnafu {
        action: "committing the report update",
    })?;
    info!(
        "Exported {} co-approval entries and voting patterns to report {}",
        analysis.co_approvals.len(),
        report_id
    );
    Ok(())
}

/// Renames the candidates of a contest analysis after the report, then
/// publishes it along with the tallies of the CVR store.
///
/// Returns the renamed analysis.
pub fn reconcile_contest(
    report_conn: &mut Connection,
    cvr_conn: &Connection,
    source: &str,
    contest_name: &str,
    report_id: i64,
    analysis: &ApprovalAnalysis,
) -> CvrResult<ApprovalAnalysis> {
    let proper_names = candidate_names(report_conn, report_id)?;
    let cvr_names = store::contest_candidate_names(cvr_conn, source, contest_name)?;
    let mapping = candidate_name_mapping(&cvr_names, &proper_names);
    let renamed = apply_name_mapping(analysis, &mapping);
    let tallies: Vec<(String, u64)> = store::contest_tallies(cvr_conn, source, contest_name)?
        .into_iter()
        .map(|(name, n)| (mapped(&mapping, &name), n))
        .collect();
    publish_contest(report_conn, report_id, &renamed, &tallies)?;
    Ok(renamed)
}

/// Writes the election-wide analysis to its own report, created if needed.
/// The candidates of the report are replaced by the composite candidates.
pub fn publish_election_wide(
    report_conn: &mut Connection,
    settings: &ElectionWideSettings,
    analysis: &ApprovalAnalysis,
) -> CvrResult<i64> {
    let total_ballots = analysis
        .patterns
        .as_ref()
        .map(|p| p.total_ballots)
        .unwrap_or(0);
    let tx = report_conn.transaction().context(SqliteSnafu {
        action: "starting the election-wide update",
    })?;
    let report_id = upsert_election_wide_report(&tx, settings, total_ballots)?;
    replace_candidates(&tx, report_id, &analysis.candidate_approvals)?;
    replace_analytics(&tx, report_id, analysis)?;
    tx.commit().context(SqliteSnafu {
        action: "committing the election-wide update",
    })?;
    info!(
        "Election-wide report {}: {} candidates, {} co-approvals",
        report_id,
        analysis.candidate_approvals.len(),
        analysis.co_approvals.len()
    );
    Ok(report_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvr::report_store::tests::{analysis, memory_reports};
    use approval_voting::{run_approval_stats, AnalysisMode, ApprovalBallots};

    fn names(l: &[&str]) -> Vec<String> {
        l.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_for_match("Tishaura O. Jones"), "TISHAURAOJONES");
        assert_eq!(
            normalize_for_match("Michael \u{201C}Mike\u{201D} Smith"),
            "MICHAEL\"MIKE\"SMITH"
        );
    }

    #[test]
    fn mapping() {
        let m = candidate_name_mapping(
            &names(&["TISHAURA O JONES", "CARA SPENCER", "WRITE-IN"]),
            &names(&["Cara Spencer", "Tishaura O. Jones", "CARA  SPENCER"]),
        );
        assert_eq!(m.len(), 2);
        assert_eq!(m["TISHAURA O JONES"], "Tishaura O. Jones");
        assert_eq!(m["CARA SPENCER"], "Cara Spencer");
        assert_eq!(mapped(&m, "WRITE-IN"), "WRITE-IN");
    }

    #[test]
    fn renames_everything() {
        let a = analysis(&[(1, &["A", "B"]), (2, &["A", "B"]), (3, &["C"]), (4, &["B", "C"])]);
        let mut m = BTreeMap::new();
        m.insert("A".to_string(), "Zed".to_string());
        let r = apply_name_mapping(&a, &m);
        assert!(r.co_approvals.iter().all(|c| c.candidate_a != "A" && c.candidate_b != "A"));
        assert!(r.co_approvals.iter().any(|c| c.candidate_a == "Zed"));
        let p = r.patterns.unwrap();
        assert_eq!(p.most_common_combination, names(&["B", "Zed"]));
        assert!(p.candidate_approval_distributions.contains_key("Zed"));
        assert!(!p.candidate_approval_distributions.contains_key("A"));
        assert_eq!(p.anyone_but_analysis.get("Zed"), Some(&1));
        assert_eq!(r.candidate_approvals["Zed"], 2);
    }

    #[test]
    fn find_by_path_or_office() {
        let conn = memory_reports();
        conn.execute_batch(
            "INSERT INTO reports (id, office, date, path) VALUES (1, 'alderman-ward3', '2025-03-04', 'us/mo/st_louis/ward3');
             INSERT INTO reports (id, office, date, path) VALUES (2, 'senate', '2025-12-01', 'us/ut/senate_11');",
        )
        .unwrap();
        let config: RunConfig = serde_json::from_str(
            r#"{"source": "s", "electionDate": "2025-03-04",
                "contestReports": [{"contestName": "Utah Senate District 11", "reportPath": "us/ut/senate_11"}]}"#,
        )
        .unwrap();
        assert_eq!(find_report(&conn, &config, "ALDERMAN - WARD 3").unwrap(), Some(1));
        assert_eq!(find_report(&conn, &config, "Utah Senate District 11").unwrap(), Some(2));
        assert_eq!(find_report(&conn, &config, "SHERIFF").unwrap(), None);
    }

    #[test]
    fn publish_overwrites_votes() {
        let mut conn = memory_reports();
        conn.execute_batch(
            "INSERT INTO reports (id, office, ballotCount) VALUES (1, 'mayor', 0);
             INSERT INTO candidates (report_id, name, votes, winner) VALUES (1, 'A', 0, 0);
             INSERT INTO candidates (report_id, name, votes, winner) VALUES (1, 'B', 0, 0);",
        )
        .unwrap();
        let a = analysis(&[(1, &["A", "B"]), (2, &["A"]), (3, &["B"])]);
        let tallies = vec![("A".to_string(), 2), ("B".to_string(), 2), ("C".to_string(), 1)];
        publish_contest(&mut conn, 1, &a, &tallies).unwrap();
        publish_contest(&mut conn, 1, &a, &tallies).unwrap();
        let votes: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT votes FROM candidates WHERE report_id = 1 ORDER BY name")
                .unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.map(|r| r.unwrap()).collect()
        };
        assert_eq!(votes, vec![2, 2]);
        let (count, n_pairs): (i64, i64) = conn
            .query_row(
                "SELECT ballotCount, (SELECT COUNT(*) FROM co_approvals WHERE report_id = 1) FROM reports WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(n_pairs, 2);
    }

    #[test]
    fn election_wide_report_is_reused() {
        let mut conn = memory_reports();
        let settings: ElectionWideSettings = serde_json::from_str(
            r#"{"name": "Primary", "date": "2025-03-04", "jurisdictionPath": "us/mo/st_louis", "electionPath": "2025/03"}"#,
        )
        .unwrap();
        let mut ab = ApprovalBallots::default();
        ab.ballots.insert(1, ["A (Mayor)".to_string(), "B (Mayor)".to_string()].into_iter().collect());
        ab.ballots.insert(2, ["A (Mayor)".to_string(), "C (Ward 1)".to_string()].into_iter().collect());
        let a = run_approval_stats(&ab, &AnalysisMode::ElectionWide, &None).unwrap();

        let id1 = publish_election_wide(&mut conn, &settings, &a).unwrap();
        let id2 = publish_election_wide(&mut conn, &settings, &a).unwrap();
        assert_eq!(id1, id2);
        let (n_reports, n_candidates, n_pairs, office, path): (i64, i64, i64, String, String) = conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM reports),
                        (SELECT COUNT(*) FROM candidates WHERE report_id = ?1),
                        (SELECT COUNT(*) FROM co_approvals WHERE report_id = ?1),
                        office, path
                 FROM reports WHERE id = ?1",
                [id1],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(n_reports, 1);
        assert_eq!(n_candidates, 3);
        assert_eq!(n_pairs, 6);
        assert_eq!(office, "election-wide");
        assert_eq!(path, "us/mo/st_louis/2025/03");
        let multi: i64 = conn
            .query_row(
                "SELECT multi_approval_voters FROM voting_patterns WHERE report_id = ?1",
                [id1],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(multi, 1);
    }
}
