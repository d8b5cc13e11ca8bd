use crate::cvr::io_json::JsonBallotReader;
use crate::cvr::io_xml::{list_xml_files, read_xml_ballot};
use crate::cvr::*;

use log::error;
use rusqlite::Connection;
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

/// Position of a buffered ballot in the batch.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
struct BallotIdx(usize);

/// Position of a buffered contest in the batch.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
struct ContestIdx(usize);

#[derive(Debug)]
struct PendingContest {
    ballot: BallotIdx,
    contest: ParsedContest,
}

#[derive(Debug)]
struct PendingSelection {
    contest: ContestIdx,
    selection: ParsedSelection,
}

/// The rows waiting to be written. Contests and selections point to their
/// parents within the batch.
#[derive(Debug, Default)]
struct Batch {
    ballots: Vec<ParsedBallot>,
    contests: Vec<PendingContest>,
    selections: Vec<PendingSelection>,
}

impl Batch {
    fn push(&mut self, mut ballot: ParsedBallot) {
        let bidx = BallotIdx(self.ballots.len());
        for mut contest in std::mem::take(&mut ballot.contests) {
            let cidx = ContestIdx(self.contests.len());
            for selection in std::mem::take(&mut contest.selections) {
                self.selections.push(PendingSelection {
                    contest: cidx,
                    selection,
                });
            }
            self.contests.push(PendingContest {
                ballot: bidx,
                contest,
            });
        }
        self.ballots.push(ballot);
    }
}

/// What a flush wrote.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default)]
pub struct FlushOutcome {
    pub new_ballots: u64,
    pub existing_ballots: u64,
    pub contests_inserted: u64,
    pub selections_inserted: u64,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct IngestStats {
    /// Ballots successfully decoded.
    pub processed: u64,
    /// Records that could not be decoded.
    pub errors: u64,
    pub new_ballots: u64,
    pub existing_ballots: u64,
    pub contests_inserted: u64,
    pub selections_inserted: u64,
    /// Ballots per precinct.
    pub precincts: BTreeMap<String, u64>,
    /// Ballots per contest.
    pub contests: BTreeMap<String, u64>,
    /// Approvals per candidate.
    pub candidates: BTreeMap<String, u64>,
}

impl IngestStats {
    /// The precincts with the most ballots.
    pub fn top_precincts(&self, n: usize) -> Vec<(String, u64)> {
        let mut res: Vec<(String, u64)> = self
            .precincts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        res.sort_by(|(n1, c1), (n2, c2)| c2.cmp(c1).then(n1.cmp(n2)));
        res.truncate(n);
        res
    }

    fn count(&mut self, ballot: &ParsedBallot) {
        self.processed += 1;
        if let Some(p) = ballot.precinct_name.as_ref().or(ballot.precinct_id.as_ref()) {
            *self.precincts.entry(p.clone()).or_insert(0) += 1;
        }
        for c in ballot.contests.iter() {
            *self.contests.entry(c.name.clone()).or_insert(0) += 1;
            for s in c.selections.iter().filter(|s| s.value == 1) {
                *self.candidates.entry(s.candidate_name.clone()).or_insert(0) += 1;
            }
        }
    }

    fn record_flush(&mut self, outcome: &FlushOutcome) {
        self.new_ballots += outcome.new_ballots;
        self.existing_ballots += outcome.existing_ballots;
        self.contests_inserted += outcome.contests_inserted;
        self.selections_inserted += outcome.selections_inserted;
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum IngestStatus {
    Completed,
    Interrupted,
}

/// Accumulates decoded ballots and writes them to the store by batches.
///
/// ```ignore
/// let mut ingestor = Ingestor::new("st_louis", 5000);
/// ingestor.add_ballot(&mut conn, ballot)?;
/// let stats = ingestor.finish(&mut conn)?;
/// ```
pub struct Ingestor {
    source: String,
    batch_size: usize,
    batch: Batch,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(source: &str, batch_size: usize) -> Ingestor {
        Ingestor {
            source: source.to_string(),
            batch_size: batch_size.max(1),
            batch: Batch::default(),
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Number of ballots waiting to be written.
    pub fn pending(&self) -> usize {
        self.batch.ballots.len()
    }

    /// Buffers a ballot. The batch is written once it reaches the batch size.
    pub fn add_ballot(&mut self, conn: &mut Connection, ballot: ParsedBallot) -> CvrResult<()> {
        debug!("add_ballot: {:?}", ballot.id);
        self.stats.count(&ballot);
        self.batch.push(ballot);
        if self.batch.ballots.len() >= self.batch_size {
            self.flush(conn)?;
        }
        Ok(())
    }

    pub fn record_error(&mut self, identifier: &str, err: &CvrError) {
        self.stats.errors += 1;
        error!("Error processing {}: {}", identifier, err);
    }

    /// Writes the buffered ballots in a single transaction.
    ///
    /// The buffer is emptied even when the write fails: nothing of the batch
    /// is then in the store.
    pub fn flush(&mut self, conn: &mut Connection) -> CvrResult<FlushOutcome> {
        let batch = std::mem::take(&mut self.batch);
        if batch.ballots.is_empty() {
            return Ok(FlushOutcome::default());
        }
        let outcome = write_batch(conn, &self.source, &batch)?;
        info!(
            "Wrote batch: {} new ballots, {} already present, {} contests, {} selections",
            outcome.new_ballots,
            outcome.existing_ballots,
            outcome.contests_inserted,
            outcome.selections_inserted
        );
        self.stats.record_flush(&outcome);
        Ok(outcome)
    }

    pub fn finish(mut self, conn: &mut Connection) -> CvrResult<IngestStats> {
        self.flush(conn)?;
        Ok(self.stats)
    }
}

fn write_batch(conn: &mut Connection, source: &str, batch: &Batch) -> CvrResult<FlushOutcome> {
    let tx = conn.transaction().context(SqliteSnafu {
        action: "starting a batch",
    })?;
    let mut outcome = FlushOutcome::default();

    // Durable ids of the ballots inserted by this batch.
    let mut new_ballot_ids: Vec<Option<i64>> = Vec::with_capacity(batch.ballots.len());
    for b in batch.ballots.iter() {
        let inserted = store::insert_ballot(&tx, source, b)?;
        let id = store::ballot_id(&tx, source, &b.id)?.context(BallotNotFoundSnafu { id: b.id.clone() })?;
        if inserted {
            outcome.new_ballots += 1;
            new_ballot_ids.push(Some(id));
        } else {
            debug!("write_batch: ballot {} already present", b.id);
            outcome.existing_ballots += 1;
            new_ballot_ids.push(None);
        }
    }

    let mut contest_ids: Vec<Option<i64>> = Vec::with_capacity(batch.contests.len());
    for pc in batch.contests.iter() {
        let record_id = match new_ballot_ids[pc.ballot.0] {
            Some(bid) if !store::contest_record_exists(&tx, source, bid, &pc.contest.id)? => {
                outcome.contests_inserted += 1;
                Some(store::insert_contest(&tx, source, bid, &pc.contest)?)
            }
            _ => None,
        };
        contest_ids.push(record_id);
    }

    for ps in batch.selections.iter() {
        if let Some(cid) = contest_ids[ps.contest.0] {
            store::insert_selection(&tx, source, cid, &ps.selection)?;
            outcome.selections_inserted += 1;
        }
    }

    tx.commit().context(SqliteSnafu {
        action: "committing a batch",
    })?;
    Ok(outcome)
}

/// Reads all the ballots of a file source into the ingestor.
///
/// Records that cannot be decoded are counted and skipped. When the interrupt
/// flag is raised, the reading stops and the buffered ballots are written.
pub fn ingest_source(
    conn: &mut Connection,
    ingestor: &mut Ingestor,
    root_dir: &Path,
    cfs: &FileSource,
    interrupted: &AtomicBool,
) -> CvrResult<IngestStatus> {
    let path = resolve_path(root_dir, &cfs.file_path);
    info!("Attempting to read {} source {:?}", cfs.provider, path);
    match cfs.provider.as_str() {
        "xml" => {
            let files = list_xml_files(&path)?;
            info!("Found {} XML files", files.len());
            for (idx, file) in files.iter().enumerate() {
                if interrupted.load(Ordering::SeqCst) {
                    ingestor.flush(conn)?;
                    return Ok(IngestStatus::Interrupted);
                }
                match read_xml_ballot(file) {
                    Ok(b) => ingestor.add_ballot(conn, b)?,
                    Err(e) => ingestor.record_error(file, &e),
                }
                if (idx + 1) % 1000 == 0 {
                    info!("Processed {}/{} files", idx + 1, files.len());
                }
            }
        }
        "json" => {
            let reader = JsonBallotReader::new(&path, cfs)?;
            let records = reader.read_records()?;
            info!("Found {} JSON records", records.len());
            for (idx, record) in records.iter().enumerate() {
                if interrupted.load(Ordering::SeqCst) {
                    ingestor.flush(conn)?;
                    return Ok(IngestStatus::Interrupted);
                }
                match reader.parse_record(idx, record) {
                    Ok(b) => ingestor.add_ballot(conn, b)?,
                    Err(e) => ingestor.record_error(&format!("{}#{}", path, idx), &e),
                }
            }
        }
        x => {
            return UnknownProviderSnafu { provider: x }.fail();
        }
    }
    Ok(IngestStatus::Completed)
}
