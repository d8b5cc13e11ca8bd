//! The normalized store of the ballots: `cvr_ballots`, `cvr_contests` and `cvr_selections`.
//!
//! All the rows carry the `source` they were ingested from, so that several
//! exports may share the same database.

use crate::cvr::*;

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use snafu::ResultExt;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cvr_ballots (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,
    cvr_guid TEXT NOT NULL,
    batch_sequence INTEGER,
    sheet_number INTEGER,
    precinct_name TEXT,
    precinct_id TEXT,
    is_blank BOOLEAN,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(source, cvr_guid)
);

CREATE TABLE IF NOT EXISTS cvr_contests (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,
    ballot_id INTEGER NOT NULL,
    contest_name TEXT NOT NULL,
    contest_id TEXT NOT NULL,
    undervotes INTEGER,
    FOREIGN KEY(ballot_id) REFERENCES cvr_ballots(id)
);

CREATE TABLE IF NOT EXISTS cvr_selections (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL,
    contest_record_id INTEGER NOT NULL,
    candidate_name TEXT NOT NULL,
    candidate_id TEXT NOT NULL,
    selection_value INTEGER,
    FOREIGN KEY(contest_record_id) REFERENCES cvr_contests(id)
);

CREATE INDEX IF NOT EXISTS idx_cvr_guid ON cvr_ballots(source, cvr_guid);
CREATE INDEX IF NOT EXISTS idx_precinct ON cvr_ballots(source, precinct_id);
CREATE INDEX IF NOT EXISTS idx_contest ON cvr_contests(source, contest_id);
CREATE INDEX IF NOT EXISTS idx_ballot_contest ON cvr_contests(source, ballot_id, contest_id);
CREATE INDEX IF NOT EXISTS idx_candidate ON cvr_selections(source, candidate_id);
CREATE INDEX IF NOT EXISTS idx_contest_selection ON cvr_selections(source, contest_record_id, candidate_id);
";

/// Number of rows of a source in each table.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct RowCounts {
    pub ballots: u64,
    pub contests: u64,
    pub selections: u64,
}

/// Opens (and creates if needed) the store at the given path.
pub fn open_store(path: &str) -> CvrResult<Connection> {
    info!("Opening the CVR database {:?}", path);
    let conn = Connection::open(path).context(SqliteSnafu {
        action: format!("opening {}", path),
    })?;
    init_store(&conn)?;
    Ok(conn)
}

pub fn init_store(conn: &Connection) -> CvrResult<()> {
    let journal_mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .context(SqliteSnafu {
            action: "setting the journal mode",
        })?;
    debug!("journal mode: {}", journal_mode);
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )
    .context(SqliteSnafu {
        action: "tuning the database",
    })?;
    conn.execute_batch(SCHEMA).context(SqliteSnafu {
        action: "creating the schema",
    })?;
    Ok(())
}

/// Deletes all the rows of a source, children first.
pub fn reset_source(conn: &mut Connection, source: &str) -> CvrResult<()> {
    info!("Deleting all the ballots of source {:?}", source);
    let tx = conn.transaction().context(SqliteSnafu {
        action: "starting the reset",
    })?;
    for table in ["cvr_selections", "cvr_contests", "cvr_ballots"] {
        let n = tx
            .execute(
                &format!("DELETE FROM {} WHERE source = ?1", table),
                params![source],
            )
            .context(SqliteSnafu {
                action: format!("clearing {}", table),
            })?;
        debug!("reset_source: deleted {} rows from {}", n, table);
    }
    tx.commit().context(SqliteSnafu {
        action: "committing the reset",
    })
}

// ********* Ingestion *********

/// Returns true if the ballot was not present yet.
pub fn insert_ballot(conn: &Connection, source: &str, b: &ParsedBallot) -> CvrResult<bool> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR IGNORE INTO cvr_ballots
             (source, cvr_guid, batch_sequence, sheet_number, precinct_name, precinct_id, is_blank)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .context(SqliteSnafu {
            action: "preparing the ballot insert",
        })?;
    let changed = stmt
        .execute(params![
            source,
            b.id,
            b.batch_sequence,
            b.sheet_number,
            b.precinct_name,
            b.precinct_id,
            b.is_blank
        ])
        .context(SqliteSnafu {
            action: format!("inserting ballot {}", b.id),
        })?;
    Ok(changed > 0)
}

pub fn ballot_id(conn: &Connection, source: &str, cvr_guid: &str) -> CvrResult<Option<i64>> {
    let mut stmt = conn
        .prepare_cached("SELECT id FROM cvr_ballots WHERE source = ?1 AND cvr_guid = ?2")
        .context(SqliteSnafu {
            action: "preparing the ballot lookup",
        })?;
    stmt.query_row(params![source, cvr_guid], |row| row.get(0))
        .optional()
        .context(SqliteSnafu {
            action: format!("looking up ballot {}", cvr_guid),
        })
}

pub fn contest_record_exists(
    conn: &Connection,
    source: &str,
    ballot_id: i64,
    contest_id: &str,
) -> CvrResult<bool> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id FROM cvr_contests WHERE source = ?1 AND ballot_id = ?2 AND contest_id = ?3",
        )
        .context(SqliteSnafu {
            action: "preparing the contest lookup",
        })?;
    let res: Option<i64> = stmt
        .query_row(params![source, ballot_id, contest_id], |row| row.get(0))
        .optional()
        .context(SqliteSnafu {
            action: format!("looking up contest {} of ballot {}", contest_id, ballot_id),
        })?;
    Ok(res.is_some())
}

/// Returns the id of the new contest record.
pub fn insert_contest(
    conn: &Connection,
    source: &str,
    ballot_id: i64,
    contest: &ParsedContest,
) -> CvrResult<i64> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO cvr_contests (source, ballot_id, contest_name, contest_id, undervotes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .context(SqliteSnafu {
            action: "preparing the contest insert",
        })?;
    let id = stmt
        .insert(params![
            source,
            ballot_id,
            contest.name,
            contest.id,
            contest.undervotes
        ])
        .context(SqliteSnafu {
            action: format!("inserting contest {} of ballot {}", contest.id, ballot_id),
        })?;
    Ok(id)
}

pub fn insert_selection(
    conn: &Connection,
    source: &str,
    contest_record_id: i64,
    sel: &ParsedSelection,
) -> CvrResult<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT INTO cvr_selections (source, contest_record_id, candidate_name, candidate_id, selection_value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .context(SqliteSnafu {
            action: "preparing the selection insert",
        })?;
    stmt.execute(params![
        source,
        contest_record_id,
        sel.candidate_name,
        sel.candidate_id,
        sel.value
    ])
    .context(SqliteSnafu {
        action: format!("inserting selection {}", sel.candidate_id),
    })?;
    Ok(())
}

// ********* Queries *********

pub fn row_counts(conn: &Connection, source: &str) -> CvrResult<RowCounts> {
    let count = |table: &str| -> CvrResult<u64> {
        let n: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE source = ?1", table),
                params![source],
                |row| row.get(0),
            )
            .context(SqliteSnafu {
                action: format!("counting {}", table),
            })?;
        Ok(n as u64)
    };
    Ok(RowCounts {
        ballots: count("cvr_ballots")?,
        contests: count("cvr_contests")?,
        selections: count("cvr_selections")?,
    })
}

fn query_strings(conn: &Connection, sql: &str, args: &[&str], action: &str) -> CvrResult<Vec<String>> {
    let mut stmt = conn.prepare(sql).context(SqliteSnafu { action })?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| row.get(0))
        .context(SqliteSnafu { action })?;
    rows.collect::<Result<Vec<String>, _>>()
        .context(SqliteSnafu { action })
}

/// The names of the contests of a source, in sorted order.
pub fn contest_names(conn: &Connection, source: &str) -> CvrResult<Vec<String>> {
    query_strings(
        conn,
        "SELECT DISTINCT contest_name FROM cvr_contests WHERE source = ?1 ORDER BY contest_name",
        &[source],
        "listing the contests",
    )
}

/// The names of all the candidates appearing in a contest, approved or not.
pub fn contest_candidate_names(conn: &Connection, source: &str, contest_name: &str) -> CvrResult<Vec<String>> {
    query_strings(
        conn,
        "SELECT DISTINCT s.candidate_name
         FROM cvr_contests c
         JOIN cvr_selections s ON c.id = s.contest_record_id
         WHERE c.source = ?1 AND c.contest_name = ?2
         ORDER BY s.candidate_name",
        &[source, contest_name],
        "listing the candidates",
    )
}

/// (ballot id, candidate name) for every approval of a contest, by ballot.
pub fn contest_approvals(conn: &Connection, source: &str, contest_name: &str) -> CvrResult<Vec<(i64, String)>> {
    let action = "reading the approvals of a contest";
    let mut stmt = conn
        .prepare(
            "SELECT c.ballot_id, s.candidate_name
             FROM cvr_contests c
             JOIN cvr_selections s ON c.id = s.contest_record_id
             WHERE c.source = ?1 AND c.contest_name = ?2 AND s.selection_value = 1
             ORDER BY c.ballot_id, s.candidate_name",
        )
        .context(SqliteSnafu { action })?;
    let rows = stmt
        .query_map(params![source, contest_name], |row| Ok((row.get(0)?, row.get(1)?)))
        .context(SqliteSnafu { action })?;
    rows.collect::<Result<Vec<(i64, String)>, _>>()
        .context(SqliteSnafu { action })
}

/// Number of approvals of each candidate of a contest.
pub fn contest_tallies(conn: &Connection, source: &str, contest_name: &str) -> CvrResult<Vec<(String, u64)>> {
    let action = "tallying a contest";
    let mut stmt = conn
        .prepare(
            "SELECT s.candidate_name, COUNT(*)
             FROM cvr_contests c
             JOIN cvr_selections s ON c.id = s.contest_record_id
             WHERE c.source = ?1 AND c.contest_name = ?2 AND s.selection_value = 1
             GROUP BY s.candidate_name
             ORDER BY s.candidate_name",
        )
        .context(SqliteSnafu { action })?;
    let rows = stmt
        .query_map(params![source, contest_name], |row| {
            let n: i64 = row.get(1)?;
            Ok((row.get(0)?, n as u64))
        })
        .context(SqliteSnafu { action })?;
    rows.collect::<Result<Vec<(String, u64)>, _>>()
        .context(SqliteSnafu { action })
}

/// (ballot id, contest name, candidate name) for every approval of a source.
pub fn election_approvals(conn: &Connection, source: &str) -> CvrResult<Vec<(i64, String, String)>> {
    let action = "reading the approvals of the election";
    let mut stmt = conn
        .prepare(
            "SELECT c.ballot_id, c.contest_name, s.candidate_name
             FROM cvr_contests c
             JOIN cvr_selections s ON c.id = s.contest_record_id
             WHERE c.source = ?1 AND s.selection_value = 1
             ORDER BY c.ballot_id, c.contest_name, s.candidate_name",
        )
        .context(SqliteSnafu { action })?;
    let rows = stmt
        .query_map(params![source], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .context(SqliteSnafu { action })?;
    rows.collect::<Result<Vec<(i64, String, String)>, _>>()
        .context(SqliteSnafu { action })
}

// ********* Export *********

/// Replaces the rows of a source in another database by the rows of this store.
///
/// The schema is created in `dest` if needed. Everything happens in one
/// transaction on `dest`; the ids of ballots and contest records are those of `dest`.
pub fn export_source(conn: &Connection, dest: &mut Connection, source: &str) -> CvrResult<RowCounts> {
    info!("Exporting the ballots of source {:?}", source);
    dest.execute_batch(SCHEMA).context(SqliteSnafu {
        action: "creating the schema for the export",
    })?;
    let tx = dest.transaction().context(SqliteSnafu {
        action: "starting the export",
    })?;
    let counts = copy_source(conn, &tx, source).context(SqliteSnafu {
        action: format!("exporting source {}", source),
    })?;
    tx.commit().context(SqliteSnafu {
        action: "committing the export",
    })?;
    Ok(counts)
}

fn copy_source(conn: &Connection, dest: &Connection, source: &str) -> rusqlite::Result<RowCounts> {
    for table in ["cvr_selections", "cvr_contests", "cvr_ballots"] {
        let n = dest.execute(
            &format!("DELETE FROM {} WHERE source = ?1", table),
            params![source],
        )?;
        debug!("export_source: deleted {} rows from {}", n, table);
    }
    let mut counts = RowCounts {
        ballots: 0,
        contests: 0,
        selections: 0,
    };

    let mut ballot_ids: HashMap<i64, i64> = HashMap::new();
    let mut read = conn.prepare(
        "SELECT id, cvr_guid, batch_sequence, sheet_number, precinct_name, precinct_id, is_blank, created_at
         FROM cvr_ballots WHERE source = ?1 ORDER BY id",
    )?;
    let mut write = dest.prepare(
        "INSERT INTO cvr_ballots
         (source, cvr_guid, batch_sequence, sheet_number, precinct_name, precinct_id, is_blank, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let mut rows = read.query(params![source])?;
    while let Some(row) = rows.next()? {
        let old_id: i64 = row.get(0)?;
        let new_id = write.insert(params![
            source,
            row.get::<_, Value>(1)?,
            row.get::<_, Value>(2)?,
            row.get::<_, Value>(3)?,
            row.get::<_, Value>(4)?,
            row.get::<_, Value>(5)?,
            row.get::<_, Value>(6)?,
            row.get::<_, Value>(7)?
        ])?;
        ballot_ids.insert(old_id, new_id);
        counts.ballots += 1;
    }

    let mut contest_ids: HashMap<i64, i64> = HashMap::new();
    let mut read = conn.prepare(
        "SELECT id, ballot_id, contest_name, contest_id, undervotes
         FROM cvr_contests WHERE source = ?1 ORDER BY id",
    )?;
    let mut write = dest.prepare(
        "INSERT INTO cvr_contests (source, ballot_id, contest_name, contest_id, undervotes)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut rows = read.query(params![source])?;
    while let Some(row) = rows.next()? {
        let old_id: i64 = row.get(0)?;
        let ballot_id = match ballot_ids.get(&row.get::<_, i64>(1)?) {
            Some(id) => *id,
            None => continue,
        };
        let new_id = write.insert(params![
            source,
            ballot_id,
            row.get::<_, Value>(2)?,
            row.get::<_, Value>(3)?,
            row.get::<_, Value>(4)?
        ])?;
        contest_ids.insert(old_id, new_id);
        counts.contests += 1;
    }

    let mut read = conn.prepare(
        "SELECT contest_record_id, candidate_name, candidate_id, selection_value
         FROM cvr_selections WHERE source = ?1 ORDER BY id",
    )?;
    let mut write = dest.prepare(
        "INSERT INTO cvr_selections (source, contest_record_id, candidate_name, candidate_id, selection_value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut rows = read.query(params![source])?;
    while let Some(row) = rows.next()? {
        let contest_id = match contest_ids.get(&row.get::<_, i64>(0)?) {
            Some(id) => *id,
            None => continue,
        };
        write.execute(params![
            source,
            contest_id,
            row.get::<_, Value>(1)?,
            row.get::<_, Value>(2)?,
            row.get::<_, Value>(3)?
        ])?;
        counts.selections += 1;
    }
    Ok(counts)
}
