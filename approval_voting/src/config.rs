// ********* Input data structures ***********

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::Display;

/// The identifier of a ballot, as assigned by the store that holds it.
pub type BallotId = i64;

/// The approvals made on each ballot.
///
/// A ballot may be present with an empty set of approvals: it then counts
/// toward the total number of ballots and the zero bucket of the distribution.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ApprovalBallots {
    pub ballots: BTreeMap<BallotId, BTreeSet<String>>,
}

impl ApprovalBallots {
    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }
}

/// How the candidate keys of the ballots should be interpreted.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum AnalysisMode {
    /// All the keys belong to a single contest.
    /// Pairs (A, B) where nobody approved A are left out of the matrix.
    PerContest,
    /// The keys are composite `"{candidate} ({contest})"` names spanning all
    /// the contests of an election. The matrix is always complete, and the
    /// cross-contest behavior of the voters is computed.
    ElectionWide,
}

impl AnalysisMode {
    pub fn emits_empty_pairs(&self) -> bool {
        matches!(self, AnalysisMode::ElectionWide)
    }
}

// ******** Output data structures *********

/// "Of the ballots approving `candidate_a`, `co_approval_rate` percent also approved `candidate_b`."
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CoApproval {
    #[serde(rename = "candidateA")]
    pub candidate_a: String,
    #[serde(rename = "candidateB")]
    pub candidate_b: String,
    #[serde(rename = "coApprovalCount")]
    pub co_approval_count: u64,
    #[serde(rename = "coApprovalRate")]
    pub co_approval_rate: f64,
}

/// Number of approvals on a ballot -> number of ballots.
pub type ApprovalHistogram = BTreeMap<usize, u64>;

/// How voters split their approvals across the contests of an election.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct CrossContestBehavior {
    #[serde(rename = "multiApprovalVoters")]
    pub multi_approval_voters: u64,
    #[serde(rename = "multiApprovalRate")]
    pub multi_approval_rate: f64,
    #[serde(rename = "singleApprovalOnlyVoters")]
    pub single_approval_only_voters: u64,
    #[serde(rename = "singleApprovalOnlyRate")]
    pub single_approval_only_rate: f64,
}

/// Ballot-shape statistics for a set of ballots. All the rates are percentages.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct VotingPatterns {
    #[serde(rename = "totalBallots")]
    pub total_ballots: u64,
    #[serde(rename = "bulletVotingCount")]
    pub bullet_voting_count: u64,
    #[serde(rename = "bulletVotingRate")]
    pub bullet_voting_rate: f64,
    #[serde(rename = "fullApprovalCount")]
    pub full_approval_count: u64,
    #[serde(rename = "fullApprovalRate")]
    pub full_approval_rate: f64,
    #[serde(rename = "averageApprovalsPerBallot")]
    pub average_approvals_per_ballot: f64,
    /// Sorted candidate names. Empty if no ballot approved anyone.
    #[serde(rename = "mostCommonCombination")]
    pub most_common_combination: Vec<String>,
    #[serde(rename = "mostCommonCombinationCount")]
    pub most_common_combination_count: u64,
    #[serde(rename = "approvalDistribution")]
    pub approval_distribution: ApprovalHistogram,
    #[serde(rename = "candidateApprovalDistributions")]
    pub candidate_approval_distributions: BTreeMap<String, ApprovalHistogram>,
    #[serde(rename = "anyoneButAnalysis")]
    pub anyone_but_analysis: BTreeMap<String, u64>,
    #[serde(
        rename = "crossContest",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cross_contest: Option<CrossContestBehavior>,
}

/// The outcome of an analysis.
///
/// When there is not enough data (fewer than two ballots or two candidates),
/// the matrix is empty and there are no patterns.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct ApprovalAnalysis {
    /// The candidates considered, in sorted order.
    pub candidates: Vec<String>,
    pub co_approvals: Vec<CoApproval>,
    pub patterns: Option<VotingPatterns>,
    /// The number of ballots approving each candidate.
    pub candidate_approvals: BTreeMap<String, u64>,
}

impl ApprovalAnalysis {
    pub fn is_empty(&self) -> bool {
        self.co_approvals.is_empty() && self.patterns.is_none()
    }
}

/// Errors that prevent the analysis from completing.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum AnalysisErrors {
    EmptyCandidateName,
    DuplicateCandidate(String),
}

impl Error for AnalysisErrors {}

impl Display for AnalysisErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisErrors::EmptyCandidateName => write!(f, "a candidate name is empty"),
            AnalysisErrors::DuplicateCandidate(name) => {
                write!(f, "candidate {:?} is registered more than once", name)
            }
        }
    }
}
