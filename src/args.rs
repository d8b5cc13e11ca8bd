use clap::Parser;

/// Ingests the cast vote records of approval elections and computes co-approval statistics.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path, optional) The JSON file describing the run: the sources of ballots, the databases,
    /// the election-wide report. Relative paths in this file are resolved against its directory.
    #[clap(short, long, value_parser)]
    pub config: Option<String>,

    /// (file path) A reference summary in JSON format. If provided, apcvr will check that the computed
    /// summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the run will be written in JSON format to the given
    /// location.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file or directory path) A source of ballots. Setting this option replaces the sources that may be specified
    /// with the --config option.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default xml) The type of the input: 'xml' for a directory of ballot documents, 'json' for an
    /// array of ballots.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// The name of the contest of a JSON input.
    #[clap(long, value_parser)]
    pub contest: Option<String>,

    /// The label of the ballots in the CVR database.
    #[clap(long, value_parser)]
    pub source: Option<String>,

    /// (file path, default cvr-data.sqlite3) The database holding the ingested ballots.
    #[clap(long, value_parser)]
    pub cvr_db: Option<String>,

    /// (file path) The report database receiving the analysis. It must already exist.
    #[clap(long, value_parser)]
    pub report_db: Option<String>,

    /// (YYYY-MM-DD) The date of the election, used to find the reports of the contests.
    #[clap(long, value_parser)]
    pub date: Option<String>,

    /// (default 5000) The number of ballots written to the database in each transaction.
    #[clap(long, value_parser)]
    pub batch_size: Option<usize>,

    /// If passed as an argument, deletes all the ballots of the source before ingesting.
    #[clap(long, takes_value = false)]
    pub reset_source: bool,

    /// If passed as an argument, only analyzes the ballots already present in the CVR database.
    #[clap(long, takes_value = false)]
    pub skip_ingest: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
