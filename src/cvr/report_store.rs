//! Access to the reporting database.
//!
//! The `reports` and `candidates` tables are owned by the reporting
//! application. The `co_approvals` and `voting_patterns` tables are created
//! and migrated here.

use crate::cvr::*;

use approval_voting::ApprovalAnalysis;
use rusqlite::{params, Connection, OptionalExtension};
use snafu::ResultExt;
use std::collections::BTreeMap;

const ANALYTICS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS co_approvals (
    id INTEGER PRIMARY KEY,
    report_id INTEGER NOT NULL,
    candidate_a TEXT NOT NULL,
    candidate_b TEXT NOT NULL,
    co_approval_count INTEGER NOT NULL,
    co_approval_rate REAL NOT NULL,
    FOREIGN KEY(report_id) REFERENCES reports(id)
);

CREATE TABLE IF NOT EXISTS voting_patterns (
    id INTEGER PRIMARY KEY,
    report_id INTEGER,
    total_ballots INTEGER,
    bullet_voting_count INTEGER,
    bullet_voting_rate REAL,
    full_approval_count INTEGER,
    full_approval_rate REAL,
    average_approvals_per_ballot REAL,
    most_common_combination TEXT,
    approval_distribution TEXT,
    candidate_approval_distributions TEXT,
    FOREIGN KEY(report_id) REFERENCES reports(id)
);

CREATE INDEX IF NOT EXISTS idx_co_approvals_report ON co_approvals(report_id);
CREATE INDEX IF NOT EXISTS idx_voting_patterns_report ON voting_patterns(report_id);
";

/// Columns added to `voting_patterns` after its first version.
const MIGRATED_COLUMNS: [(&str, &str); 5] = [
    ("anyone_but_analysis", "TEXT"),
    ("multi_approval_voters", "INTEGER"),
    ("multi_approval_rate", "REAL"),
    ("single_approval_only_voters", "INTEGER"),
    ("single_approval_only_rate", "REAL"),
];

pub fn open_report_store(path: &str) -> CvrResult<Connection> {
    info!("Opening the report database {:?}", path);
    let conn = Connection::open(path).context(SqliteSnafu {
        action: format!("opening {}", path),
    })?;
    ensure_analytics_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_analytics_schema(conn: &Connection) -> CvrResult<()> {
    conn.execute_batch(ANALYTICS_SCHEMA).context(SqliteSnafu {
        action: "creating the analytics tables",
    })?;
    let existing = table_columns(conn, "voting_patterns")?;
    for (column, sql_type) in MIGRATED_COLUMNS.iter() {
        if !existing.iter().any(|c| c == column) {
            info!("Adding column {} to voting_patterns", column);
            conn.execute_batch(&format!(
                "ALTER TABLE voting_patterns ADD COLUMN {} {}",
                column, sql_type
            ))
            .context(SqliteSnafu {
                action: format!("adding column {}", column),
            })?;
        }
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> CvrResult<Vec<String>> {
    let action = format!("reading the columns of {}", table);
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .context(SqliteSnafu {
            action: action.as_str(),
        })?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .context(SqliteSnafu {
            action: action.as_str(),
        })?;
    rows.collect::<Result<Vec<String>, _>>()
        .context(SqliteSnafu {
            action: action.as_str(),
        })
}

pub fn find_report_by_path(conn: &Connection, path: &str) -> CvrResult<Option<i64>> {
    conn.query_row(
        "SELECT id FROM reports WHERE path = ?1 ORDER BY id LIMIT 1",
        params![path],
        |row| row.get(0),
    )
    .optional()
    .context(SqliteSnafu {
        action: format!("looking up the report {}", path),
    })
}

pub fn find_report_by_office(conn: &Connection, office: &str, date: Option<&str>) -> CvrResult<Option<i64>> {
    let res = match date {
        Some(d) => conn.query_row(
            "SELECT id FROM reports WHERE office = ?1 AND date = ?2 ORDER BY id LIMIT 1",
            params![office, d],
            |row| row.get(0),
        ),
        None => conn.query_row(
            "SELECT id FROM reports WHERE office = ?1 ORDER BY id LIMIT 1",
            params![office],
            |row| row.get(0),
        ),
    };
    res.optional().context(SqliteSnafu {
        action: format!("looking up the report of office {}", office),
    })
}

/// The names of the candidates of a report, by id.
pub fn candidate_names(conn: &Connection, report_id: i64) -> CvrResult<Vec<String>> {
    let action = "listing the candidates of a report";
    let mut stmt = conn
        .prepare("SELECT name FROM candidates WHERE report_id = ?1 ORDER BY id")
        .context(SqliteSnafu { action })?;
    let rows = stmt
        .query_map(params![report_id], |row| row.get(0))
        .context(SqliteSnafu { action })?;
    rows.collect::<Result<Vec<String>, _>>()
        .context(SqliteSnafu { action })
}

/// Replaces the co-approvals and the voting patterns of a report.
///
/// Does nothing to the voting patterns when the analysis has none.
pub fn replace_analytics(conn: &Connection, report_id: i64, analysis: &ApprovalAnalysis) -> CvrResult<()> {
    conn.execute(
        "DELETE FROM co_approvals WHERE report_id = ?1",
        params![report_id],
    )
    .context(SqliteSnafu {
        action: "clearing the co-approvals",
    })?;
    conn.execute(
        "DELETE FROM voting_patterns WHERE report_id = ?1",
        params![report_id],
    )
    .context(SqliteSnafu {
        action: "clearing the voting patterns",
    })?;

    {
        let mut stmt = conn
            .prepare(
                "INSERT INTO co_approvals (report_id, candidate_a, candidate_b, co_approval_count, co_approval_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .context(SqliteSnafu {
                action: "preparing the co-approval insert",
            })?;
        for ca in analysis.co_approvals.iter() {
            stmt.execute(params![
                report_id,
                ca.candidate_a,
                ca.candidate_b,
                ca.co_approval_count as i64,
                ca.co_approval_rate
            ])
            .context(SqliteSnafu {
                action: "inserting a co-approval",
            })?;
        }
    }
    debug!(
        "replace_analytics: report {}: {} co-approvals",
        report_id,
        analysis.co_approvals.len()
    );

    if let Some(p) = analysis.patterns.as_ref() {
        let cross = p.cross_contest.as_ref();
        conn.execute(
            "INSERT INTO voting_patterns (
                report_id, total_ballots, bullet_voting_count, bullet_voting_rate,
                full_approval_count, full_approval_rate, average_approvals_per_ballot,
                most_common_combination, approval_distribution, candidate_approval_distributions,
                anyone_but_analysis, multi_approval_voters, multi_approval_rate,
                single_approval_only_voters, single_approval_only_rate
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                report_id,
                p.total_ballots as i64,
                p.bullet_voting_count as i64,
                p.bullet_voting_rate,
                p.full_approval_count as i64,
                p.full_approval_rate,
                p.average_approvals_per_ballot,
                to_json_text(&p.most_common_combination)?,
                to_json_text(&p.approval_distribution)?,
                to_json_text(&p.candidate_approval_distributions)?,
                to_json_text(&p.anyone_but_analysis)?,
                cross.map(|c| c.multi_approval_voters as i64),
                cross.map(|c| c.multi_approval_rate),
                cross.map(|c| c.single_approval_only_voters as i64),
                cross.map(|c| c.single_approval_only_rate),
            ],
        )
        .context(SqliteSnafu {
            action: "inserting the voting patterns",
        })?;
    }
    Ok(())
}

fn to_json_text<T: Serialize>(value: &T) -> CvrResult<String> {
    serde_json::to_string(value).context(WritingJsonSnafu {})
}

pub fn update_ballot_count(conn: &Connection, report_id: i64, ballot_count: u64) -> CvrResult<()> {
    conn.execute(
        "UPDATE reports SET ballotCount = ?1 WHERE id = ?2",
        params![ballot_count as i64, report_id],
    )
    .context(SqliteSnafu {
        action: "updating the ballot count",
    })?;
    Ok(())
}

/// Overwrites the votes of a candidate and returns the value read back, if the
/// candidate exists.
pub fn set_candidate_votes(conn: &Connection, report_id: i64, name: &str, votes: u64) -> CvrResult<Option<i64>> {
    conn.execute(
        "UPDATE candidates SET votes = ?1 WHERE report_id = ?2 AND name = ?3",
        params![votes as i64, report_id, name],
    )
    .context(SqliteSnafu {
        action: format!("updating the votes of {}", name),
    })?;
    conn.query_row(
        "SELECT votes FROM candidates WHERE report_id = ?1 AND name = ?2",
        params![report_id, name],
        |row| row.get(0),
    )
    .optional()
    .context(SqliteSnafu {
        action: format!("reading the votes of {}", name),
    })
}

/// Finds the election-wide report of an election, or creates it. Its metadata
/// is refreshed from the settings in both cases.
pub fn upsert_election_wide_report(
    conn: &Connection,
    settings: &ElectionWideSettings,
    ballot_count: u64,
) -> CvrResult<i64> {
    let path = settings.report_path();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM reports WHERE path = ?1 AND office = ?2 ORDER BY id LIMIT 1",
            params![path, ELECTION_WIDE_OFFICE],
            |row| row.get(0),
        )
        .optional()
        .context(SqliteSnafu {
            action: "looking up the election-wide report",
        })?;
    let ballot_count = ballot_count as i64;
    let sql = match existing {
        Some(_) => {
            "UPDATE reports SET name = ?1, date = ?2, jurisdictionPath = ?3, electionPath = ?4,
             officeName = ?6, jurisdictionName = ?7, electionName = ?8, website = ?9,
             notes = ?10, ballotCount = ?11
             WHERE path = ?12 AND office = ?5"
        }
        None => {
            "INSERT INTO reports (
                name, date, jurisdictionPath, electionPath, office, officeName,
                jurisdictionName, electionName, website, notes, ballotCount, path, hidden
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)"
        }
    };
    conn.execute(
        sql,
        params![
            settings.name,
            settings.date,
            settings.jurisdiction_path,
            settings.election_path,
            ELECTION_WIDE_OFFICE,
            settings.office_name(),
            settings.jurisdiction_name,
            settings.election_name,
            settings.website,
            settings.notes,
            ballot_count,
            path,
        ],
    )
    .context(SqliteSnafu {
        action: "writing the election-wide report",
    })?;
    match existing {
        Some(id) => {
            info!("Updated election-wide report {}", id);
            Ok(id)
        }
        None => {
            let id = conn.last_insert_rowid();
            info!("Created election-wide report {}", id);
            Ok(id)
        }
    }
}

/// Replaces all the candidates of a report. None of them is a winner.
pub fn replace_candidates(conn: &Connection, report_id: i64, votes: &BTreeMap<String, u64>) -> CvrResult<()> {
    conn.execute(
        "DELETE FROM candidates WHERE report_id = ?1",
        params![report_id],
    )
    .context(SqliteSnafu {
        action: "clearing the candidates",
    })?;
    let mut stmt = conn
        .prepare("INSERT INTO candidates (report_id, name, votes, winner) VALUES (?1, ?2, ?3, 0)")
        .context(SqliteSnafu {
            action: "preparing the candidate insert",
        })?;
    for (name, count) in votes.iter() {
        stmt.execute(params![report_id, name, *count as i64])
            .context(SqliteSnafu {
                action: format!("inserting candidate {}", name),
            })?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approval_voting::{run_approval_stats, AnalysisMode, ApprovalBallots};

    /// The tables of the reporting application, as far as this crate uses them.
    pub(crate) const REPORTS_FIXTURE_SCHEMA: &str = "
    CREATE TABLE reports (
        id INTEGER PRIMARY KEY,
        name TEXT,
        date TEXT,
        jurisdictionPath TEXT,
        electionPath TEXT,
        office TEXT,
        officeName TEXT,
        jurisdictionName TEXT,
        electionName TEXT,
        website TEXT,
        notes TEXT,
        ballotCount INTEGER,
        path TEXT,
        hidden INTEGER
    );
    CREATE TABLE candidates (
        id INTEGER PRIMARY KEY,
        report_id INTEGER,
        name TEXT,
        votes INTEGER,
        winner INTEGER
    );
    ";

    pub(crate) fn memory_reports() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(REPORTS_FIXTURE_SCHEMA).unwrap();
        ensure_analytics_schema(&conn).unwrap();
        conn
    }

    pub(crate) fn analysis(ballots: &[(i64, &[&str])]) -> ApprovalAnalysis {
        let mut ab = ApprovalBallots::default();
        for (id, names) in ballots.iter() {
            ab.ballots
                .insert(*id, names.iter().map(|s| s.to_string()).collect());
        }
        run_approval_stats(&ab, &AnalysisMode::PerContest, &None).unwrap()
    }

    #[test]
    fn migrates_old_voting_patterns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(REPORTS_FIXTURE_SCHEMA).unwrap();
        conn.execute_batch(
            "CREATE TABLE voting_patterns (
                id INTEGER PRIMARY KEY,
                report_id INTEGER,
                total_ballots INTEGER,
                bullet_voting_count INTEGER,
                bullet_voting_rate REAL,
                full_approval_count INTEGER,
                full_approval_rate REAL,
                average_approvals_per_ballot REAL,
                most_common_combination TEXT,
                approval_distribution TEXT,
                candidate_approval_distributions TEXT
            )",
        )
        .unwrap();
        ensure_analytics_schema(&conn).unwrap();
        let cols = table_columns(&conn, "voting_patterns").unwrap();
        for (c, _) in MIGRATED_COLUMNS.iter() {
            assert!(cols.iter().any(|x| x == c), "missing {}", c);
        }
        // Running again is harmless.
        ensure_analytics_schema(&conn).unwrap();
    }

    #[test]
    fn replace_is_idempotent() {
        let conn = memory_reports();
        let a = analysis(&[(1, &["A", "B"]), (2, &["A"]), (3, &["B", "C"])]);
        replace_analytics(&conn, 7, &a).unwrap();
        replace_analytics(&conn, 7, &a).unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM co_approvals WHERE report_id = 7", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n as usize, a.co_approvals.len());
        let (dist, anyone_but, multi): (String, String, Option<i64>) = conn
            .query_row(
                "SELECT approval_distribution, anyone_but_analysis, multi_approval_voters FROM voting_patterns WHERE report_id = 7",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(dist, r#"{"1":1,"2":2}"#);
        assert_eq!(anyone_but, r#"{"A":1,"C":1}"#);
        assert_eq!(multi, None);
    }

    #[test]
    fn report_lookup() {
        let conn = memory_reports();
        conn.execute_batch(
            "INSERT INTO reports (id, office, date, path) VALUES (3, 'mayor', '2025-03-04', 'us/mo/st_louis/mayor');
             INSERT INTO candidates (report_id, name, votes, winner) VALUES (3, 'Cara Spencer', 10, 1);",
        )
        .unwrap();
        assert_eq!(find_report_by_office(&conn, "mayor", Some("2025-03-04")).unwrap(), Some(3));
        assert_eq!(find_report_by_office(&conn, "mayor", Some("2021-03-02")).unwrap(), None);
        assert_eq!(find_report_by_office(&conn, "mayor", None).unwrap(), Some(3));
        assert_eq!(find_report_by_path(&conn, "us/mo/st_louis/mayor").unwrap(), Some(3));
        assert_eq!(candidate_names(&conn, 3).unwrap(), vec!["Cara Spencer"]);
        assert_eq!(set_candidate_votes(&conn, 3, "Cara Spencer", 42).unwrap(), Some(42));
        assert_eq!(set_candidate_votes(&conn, 3, "Nobody", 42).unwrap(), None);
        update_ballot_count(&conn, 3, 99).unwrap();
        let n: i64 = conn
            .query_row("SELECT ballotCount FROM reports WHERE id = 3", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 99);
    }
}
