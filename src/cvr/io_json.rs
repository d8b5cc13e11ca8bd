use crate::cvr::io_common::{candidate_id_of, simplify_file_name, slug};
use crate::cvr::*;

use snafu::{OptionExt, ResultExt};

/// Reads the ballots of a JSON export: an array of flat objects, all the
/// ballots belonging to a single contest.
#[derive(Debug, Clone)]
pub struct JsonBallotReader {
    path: String,
    file_name: String,
    contest_name: String,
    contest_id: String,
    vote_prefix: String,
    id_field: String,
}

impl JsonBallotReader {
    pub fn new(path: &str, cfs: &FileSource) -> CvrResult<JsonBallotReader> {
        let contest_name = cfs
            .contest_name
            .clone()
            .context(MissingContestNameSnafu { path })?;
        let contest_id = cfs
            .contest_id
            .clone()
            .unwrap_or_else(|| slug(&contest_name));
        Ok(JsonBallotReader {
            path: path.to_string(),
            file_name: simplify_file_name(path),
            contest_name,
            contest_id,
            vote_prefix: cfs.vote_prefix().to_string(),
            id_field: cfs.id_field().to_string(),
        })
    }

    /// Loads the records of the file. A file that is not an array of records is
    /// rejected as a whole.
    pub fn read_records(&self) -> CvrResult<Vec<JSValue>> {
        let path = self.path.as_str();
        let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
        let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
        match js {
            JSValue::Array(records) => Ok(records),
            _ => JsonNotArraySnafu { path }.fail(),
        }
    }

    /// Decodes the record at the given position of the array.
    pub fn parse_record(&self, index: usize, record: &JSValue) -> CvrResult<ParsedBallot> {
        let path = self.path.as_str();
        let obj = record
            .as_object()
            .context(JsonBallotNotObjectSnafu { path, index })?;

        let id = match obj.get(&self.id_field) {
            None | Some(JSValue::Null) => format!("{}-{:08}", self.file_name, index),
            Some(JSValue::String(s)) => s.clone(),
            Some(_) => {
                return JsonFieldNotStringSnafu {
                    path,
                    index,
                    field: self.id_field.clone(),
                }
                .fail()
            }
        };

        // serde_json keeps the keys sorted.
        let mut selections: Vec<ParsedSelection> = Vec::new();
        for (key, value) in obj.iter() {
            if !key.starts_with(&self.vote_prefix) {
                continue;
            }
            match value {
                JSValue::Null => {}
                JSValue::String(s) if s.trim().is_empty() => {}
                JSValue::String(s) => {
                    let name = s.trim();
                    // The same candidate under two keys is a single approval.
                    if selections.iter().any(|sel| sel.candidate_name == name) {
                        continue;
                    }
                    selections.push(ParsedSelection {
                        candidate_name: name.to_string(),
                        candidate_id: candidate_id_of(name),
                        value: 1,
                    });
                }
                _ => {
                    return JsonFieldNotStringSnafu {
                        path,
                        index,
                        field: key.clone(),
                    }
                    .fail()
                }
            }
        }

        Ok(ParsedBallot {
            id,
            batch_sequence: None,
            sheet_number: None,
            precinct_name: None,
            precinct_id: None,
            is_blank: selections.is_empty(),
            contests: vec![ParsedContest {
                name: self.contest_name.clone(),
                id: self.contest_id.clone(),
                undervotes: 0,
                selections,
            }],
        })
    }
}
