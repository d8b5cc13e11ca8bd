use crate::cvr::*;

use std::collections::BTreeMap;
use std::path::PathBuf;

use snafu::ResultExt;

/// The office of the report holding the analysis across all the contests.
pub const ELECTION_WIDE_OFFICE: &str = "election-wide";

const DEFAULT_VOTE_PREFIX: &str = "vote_";
const DEFAULT_ID_FIELD: &str = "tracking";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FileSource {
    /// `xml` or `json`
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    /// The contest of all the ballots of a JSON file.
    #[serde(rename = "contestName")]
    pub contest_name: Option<String>,
    #[serde(rename = "contestId")]
    pub contest_id: Option<String>,
    #[serde(rename = "votePrefix")]
    pub vote_prefix: Option<String>,
    #[serde(rename = "idField")]
    pub id_field: Option<String>,
}

impl FileSource {
    pub fn vote_prefix(&self) -> &str {
        self.vote_prefix.as_deref().unwrap_or(DEFAULT_VOTE_PREFIX)
    }

    pub fn id_field(&self) -> &str {
        self.id_field.as_deref().unwrap_or(DEFAULT_ID_FIELD)
    }
}

/// Pins a contest to an existing report, bypassing the matching on the office.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ContestReport {
    #[serde(rename = "contestName")]
    pub contest_name: String,
    #[serde(rename = "reportPath")]
    pub report_path: String,
}

/// The metadata of the election-wide report.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionWideSettings {
    pub name: String,
    pub date: String,
    #[serde(rename = "jurisdictionPath")]
    pub jurisdiction_path: String,
    #[serde(rename = "electionPath")]
    pub election_path: String,
    #[serde(rename = "officeName")]
    pub office_name: Option<String>,
    #[serde(rename = "jurisdictionName")]
    pub jurisdiction_name: Option<String>,
    #[serde(rename = "electionName")]
    pub election_name: Option<String>,
    pub website: Option<String>,
    pub notes: Option<String>,
    /// Defaults to `{jurisdictionPath}/{electionPath}`.
    pub path: Option<String>,
    /// CVR contest name -> name displayed in the composite candidate names.
    #[serde(rename = "contestDisplayNames", default)]
    pub contest_display_names: BTreeMap<String, String>,
}

impl ElectionWideSettings {
    pub fn report_path(&self) -> String {
        match self.path.as_ref() {
            Some(p) => p.clone(),
            None => format!("{}/{}", self.jurisdiction_path, self.election_path),
        }
    }

    pub fn office_name(&self) -> &str {
        self.office_name
            .as_deref()
            .unwrap_or("Election Wide Details")
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Namespace of all the rows written to the CVR store.
    pub source: String,
    #[serde(rename = "cvrDatabase")]
    pub cvr_database: Option<String>,
    #[serde(rename = "reportDatabase")]
    pub report_database: Option<String>,
    #[serde(rename = "electionDate")]
    pub election_date: Option<String>,
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    #[serde(rename = "cvrFileSources", default)]
    pub cvr_file_sources: Vec<FileSource>,
    #[serde(rename = "contestReports", default)]
    pub contest_reports: Vec<ContestReport>,
    #[serde(rename = "electionWide")]
    pub election_wide: Option<ElectionWideSettings>,
}

impl RunConfig {
    pub fn report_path_for(&self, contest_name: &str) -> Option<&str> {
        self.contest_reports
            .iter()
            .find(|cr| cr.contest_name == contest_name)
            .map(|cr| cr.report_path.as_str())
    }
}

pub fn read_config(path: &str) -> CvrResult<RunConfig> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    let config: RunConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    Ok(config)
}

/// Resolves a path of the configuration against the directory of the configuration.
pub fn resolve_path(root_dir: &Path, path: &str) -> String {
    let p: PathBuf = [root_dir, Path::new(path)].iter().collect();
    p.as_path().display().to_string()
}
